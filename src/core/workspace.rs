//! Repository workspace: artifact locations and the configuration inputs of one run.

use crate::core::corpus::DocCorpus;
use crate::core::doc_spec::{self, DocSpec};
use crate::core::error::DocsorError;
use crate::core::language::{self, ResolvedLanguage};
use crate::core::manifest::{self, Manifest};
use crate::core::output;
use crate::core::policy::{self, Policy};
use crate::core::topology::{self, TopologyContract};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

pub const POLICY_PATH: &str = "docs/.doc-policy.json";
pub const MANIFEST_PATH: &str = "docs/.doc-manifest.json";
pub const DOC_SPEC_PATH: &str = "docs/.doc-spec.json";
pub const FACTS_PATH: &str = "docs/.repo-facts.json";
pub const PLAN_PATH: &str = "docs/.doc-plan.json";
pub const APPLY_REPORT_PATH: &str = "docs/.doc-apply-report.json";
pub const VALIDATE_REPORT_PATH: &str = "docs/.doc-validate-report.json";
pub const EVIDENCE_MAP_PATH: &str = "docs/.doc-evidence-map.json";
pub const AGENTS_PATH: &str = "AGENTS.md";

/// Output artifact locations, relative to the repository root. Overridable from
/// `docsor.toml`; configuration inputs always live at their fixed paths.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactPaths {
    pub facts: String,
    pub plan: String,
    pub apply_report: String,
    pub validate_report: String,
    pub evidence_map: String,
}

impl Default for ArtifactPaths {
    fn default() -> Self {
        Self {
            facts: FACTS_PATH.to_string(),
            plan: PLAN_PATH.to_string(),
            apply_report: APPLY_REPORT_PATH.to_string(),
            validate_report: VALIDATE_REPORT_PATH.to_string(),
            evidence_map: EVIDENCE_MAP_PATH.to_string(),
        }
    }
}

/// Configuration and documents as found on disk at the start of a step.
#[derive(Debug, Clone)]
pub struct Workspace {
    pub root: PathBuf,
    pub policy: Policy,
    pub policy_exists: bool,
    pub manifest: Manifest,
    pub manifest_exists: bool,
    pub doc_spec: Option<DocSpec>,
    pub topology: Option<TopologyContract>,
    pub corpus: DocCorpus,
    pub language: ResolvedLanguage,
}

impl Workspace {
    /// Loads policy, manifest, doc spec, topology contract and the corpus.
    /// Any malformed artifact is a `ConfigError`.
    pub fn load(root: &Path) -> Result<Self, DocsorError> {
        let (policy, policy_exists) = policy::load_policy(&root.join(POLICY_PATH))?;
        let (manifest, manifest_exists) = manifest::load_manifest(&root.join(MANIFEST_PATH))?;
        let doc_spec = doc_spec::load_doc_spec(&root.join(DOC_SPEC_PATH))?;
        let topology = topology::load_contract(&root.join(&policy.doc_topology.path))?;
        let corpus = DocCorpus::load(root, &corpus_extras(&manifest))?;
        let inferred = language::infer_from_docs(|rel| {
            corpus
                .get(rel)
                .map(str::to_string)
                .or_else(|| output::read_text_lossy(&root.join(rel)).ok())
        });
        let language = language::resolve(&policy.language, inferred);
        debug!(
            root = %root.display(),
            policy_exists,
            manifest_exists,
            language = language.primary.as_str(),
            docs = corpus.paths().count(),
            "workspace loaded"
        );
        Ok(Self {
            root: root.to_path_buf(),
            policy,
            policy_exists,
            manifest,
            manifest_exists,
            doc_spec,
            topology,
            corpus,
            language,
        })
    }

    pub fn abs(&self, rel: &str) -> PathBuf {
        self.root.join(rel)
    }

    pub fn exists(&self, rel: &str) -> bool {
        self.abs(rel).exists()
    }

    pub fn read_text(&self, rel: &str) -> Option<String> {
        output::read_text_lossy(&self.abs(rel)).ok()
    }

    /// Documents a run manages: manifest files, doc spec documents and, when topology is
    /// enabled, contract nodes.
    pub fn declared_docs(&self) -> Vec<String> {
        let mut out: Vec<String> = self.manifest.managed_files().into_iter().collect();
        if let Some(spec) = &self.doc_spec {
            out.extend(spec.documents.iter().map(|d| d.path.clone()));
        }
        if self.policy.doc_topology.enabled {
            if let Some(contract) = &self.topology {
                out.extend(contract.nodes.iter().map(|n| n.path.clone()));
            }
        }
        out.sort();
        out.dedup();
        out
    }

    /// Auto-update is allowed by policy or because this tool generated the document.
    pub fn may_auto_update(&self, rel: &str) -> bool {
        self.policy.allows_auto_update(rel) || self.corpus.is_generated(rel)
    }
}

fn corpus_extras(manifest: &Manifest) -> Vec<String> {
    let mut extras: Vec<String> = manifest
        .managed_files()
        .into_iter()
        .filter(|p| !p.starts_with("docs/") && p.ends_with(".md"))
        .collect();
    extras.push(AGENTS_PATH.to_string());
    extras.push("README.md".to_string());
    extras.sort();
    extras.dedup();
    extras
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_load_empty_repository_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let ws = Workspace::load(dir.path()).unwrap();
        assert!(!ws.policy_exists);
        assert!(!ws.manifest_exists);
        assert!(ws.doc_spec.is_none());
        assert_eq!(ws.declared_docs(), vec!["docs/index.md"]);
        assert_eq!(ws.language.primary, "en-US");
    }

    #[test]
    fn test_language_is_inferred_from_existing_docs_unless_policy_sets_it() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("docs")).unwrap();
        fs::write(dir.path().join("docs/runbook.md"), "# 运行手册\n\n## 开发命令\n\n## 验证命令\n").unwrap();
        let ws = Workspace::load(dir.path()).unwrap();
        assert_eq!(ws.language.profile, language::Profile::ZhCn);
        assert_eq!(ws.language.source, language::LanguageSource::Inferred);

        fs::write(dir.path().join(POLICY_PATH), r#"{"language": {"primary": "en-US"}}"#).unwrap();
        let ws = Workspace::load(dir.path()).unwrap();
        assert_eq!(ws.language.profile, language::Profile::EnUs);
    }

    #[test]
    fn test_malformed_manifest_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("docs")).unwrap();
        fs::write(dir.path().join(MANIFEST_PATH), r#"{"required": {"files": ["../escape.md"]}}"#).unwrap();
        let err = Workspace::load(dir.path()).unwrap_err();
        assert!(err.is_config());
    }
}
