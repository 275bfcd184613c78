//! Documentation capabilities and the adaptive manifest.
//!
//! Each capability contributes managed paths to the manifest. A capability is enabled
//! by repository signals from the fact snapshot or forced through `doc_goals`; the
//! root index is a baseline that can never be excluded.

use crate::core::facts::Facts;
use crate::core::manifest::ROOT_INDEX;
use crate::core::paths;
use crate::core::policy::{DocGoals, ManifestOverrides, Policy};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

pub const CORE_INDEX: &str = "core.index";

/// Short goal names accepted in `doc_goals`.
pub const GOAL_ALIASES: &[(&str, &str)] = &[
    ("index", CORE_INDEX),
    ("core", CORE_INDEX),
    ("architecture", "architecture.overview"),
    ("runbook", "operations.runbook"),
    ("operations", "operations.runbook"),
    ("planning", "planning.workspace"),
    ("exec-plans", "planning.workspace"),
    ("glossary", "glossary.terms"),
    ("incident", "incident.response"),
    ("incident-response", "incident.response"),
    ("security", "security.posture"),
    ("compliance", "compliance.controls"),
];

struct Capability {
    id: &'static str,
    required_files: &'static [&'static str],
    required_dirs: &'static [&'static str],
    optional_files: &'static [&'static str],
}

const CAPABILITIES: &[Capability] = &[
    Capability {
        id: CORE_INDEX,
        required_files: &[ROOT_INDEX],
        required_dirs: &[],
        optional_files: &[],
    },
    Capability {
        id: "operations.runbook",
        required_files: &["docs/runbook.md"],
        required_dirs: &[],
        optional_files: &[],
    },
    Capability {
        id: "architecture.overview",
        required_files: &["docs/architecture.md"],
        required_dirs: &[],
        optional_files: &[],
    },
    Capability {
        id: "planning.workspace",
        required_files: &[],
        required_dirs: &["docs/exec-plans/active", "docs/exec-plans/completed", "docs/tech-debt"],
        optional_files: &[],
    },
    Capability {
        id: "glossary.terms",
        required_files: &[],
        required_dirs: &[],
        optional_files: &["docs/glossary.md"],
    },
    Capability {
        id: "incident.response",
        required_files: &["docs/incident-response.md"],
        required_dirs: &[],
        optional_files: &[],
    },
    Capability {
        id: "security.posture",
        required_files: &["docs/security.md"],
        required_dirs: &[],
        optional_files: &[],
    },
    Capability {
        id: "compliance.controls",
        required_files: &["docs/compliance.md"],
        required_dirs: &[],
        optional_files: &[],
    },
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ManifestProfile {
    #[default]
    Tiny,
    Small,
    Medium,
    Large,
}

impl ManifestProfile {
    pub fn from_file_count(files: usize) -> Self {
        match files {
            0..=30 => ManifestProfile::Tiny,
            31..=120 => ManifestProfile::Small,
            121..=400 => ManifestProfile::Medium,
            _ => ManifestProfile::Large,
        }
    }
}

/// Counts read off the fact snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoMetrics {
    pub file_count: usize,
    pub modules_count: usize,
    pub language_count: usize,
    pub ci_count: usize,
    pub build_manifest_count: usize,
    pub docs_markdown_count: usize,
    pub tests_detected: bool,
    pub dev_commands_detected: bool,
}

impl RepoMetrics {
    pub fn of(facts: Option<&Facts>) -> Self {
        let Some(facts) = facts else {
            return Self::default();
        };
        Self {
            file_count: facts.files.len(),
            modules_count: facts.modules.len(),
            language_count: facts.languages.len(),
            ci_count: facts.ci.len(),
            build_manifest_count: facts.build_manifests.len(),
            docs_markdown_count: facts
                .files
                .iter()
                .filter(|f| f.starts_with("docs/") && f.ends_with(".md"))
                .count(),
            tests_detected: facts.has_evidence("repo_scan.tests"),
            dev_commands_detected: facts.has_evidence("runbook.dev_commands"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionSource {
    Baseline,
    Signal,
    GoalInclude,
    GoalExclude,
    Disabled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityDecision {
    pub id: String,
    pub enabled: bool,
    pub source: DecisionSource,
    pub evidence: Vec<String>,
}

/// Enabled capabilities and the paths they contribute, after overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdaptiveManifest {
    pub profile: ManifestProfile,
    pub metrics: RepoMetrics,
    pub decisions: Vec<CapabilityDecision>,
    pub required_files: Vec<String>,
    pub required_dirs: Vec<String>,
    pub optional_files: Vec<String>,
    pub override_notes: Vec<String>,
}

impl AdaptiveManifest {
    pub fn enabled_ids(&self) -> Vec<String> {
        self.decisions
            .iter()
            .filter(|d| d.enabled)
            .map(|d| d.id.clone())
            .collect()
    }
}

pub fn resolve_goal(raw: &str) -> Option<&str> {
    let key = raw.trim();
    if key.is_empty() {
        return None;
    }
    Some(
        GOAL_ALIASES
            .iter()
            .find(|(alias, _)| *alias == key)
            .map_or(key, |(_, id)| *id),
    )
}

fn goal_set(raw: &[String]) -> BTreeSet<&str> {
    raw.iter().filter_map(|g| resolve_goal(g)).collect()
}

fn signals(id: &str, m: &RepoMetrics) -> Vec<String> {
    let mut evidence = Vec::new();
    match id {
        "operations.runbook" => {
            if m.dev_commands_detected {
                evidence.push("dev_commands_detected".to_string());
            }
            if m.build_manifest_count > 0 {
                evidence.push(format!("manifests_present={}", m.build_manifest_count));
            }
            if m.ci_count > 0 {
                evidence.push(format!("ci_configs={}", m.ci_count));
            }
        }
        "architecture.overview" => {
            if m.modules_count > 0 {
                evidence.push(format!("modules={}", m.modules_count));
            }
            if m.language_count >= 2 {
                evidence.push(format!("languages={}", m.language_count));
            }
            if m.file_count >= 50 {
                evidence.push(format!("file_count={}", m.file_count));
            }
        }
        "planning.workspace" => {
            if m.ci_count > 0 {
                evidence.push(format!("ci_configs={}", m.ci_count));
            }
            if m.file_count >= 80 {
                evidence.push(format!("file_count={}", m.file_count));
            }
        }
        "glossary.terms" => {
            if m.docs_markdown_count >= 6 {
                evidence.push(format!("docs_markdown_count={}", m.docs_markdown_count));
            }
            if m.modules_count >= 5 {
                evidence.push(format!("modules={}", m.modules_count));
            }
        }
        "security.posture" => {
            if m.ci_count > 0 && m.build_manifest_count > 0 {
                evidence.push("ci_and_build_manifests_detected".to_string());
            }
        }
        _ => {}
    }
    evidence
}

/// One decision per capability, in table order.
pub fn decide(metrics: &RepoMetrics, goals: &DocGoals) -> Vec<CapabilityDecision> {
    let include = goal_set(&goals.include);
    let exclude = goal_set(&goals.exclude);
    CAPABILITIES
        .iter()
        .map(|cap| {
            if cap.id == CORE_INDEX {
                let mut evidence = vec!["baseline capability is always required".to_string()];
                if exclude.contains(cap.id) {
                    evidence.push("core.index cannot be excluded".to_string());
                }
                return CapabilityDecision {
                    id: cap.id.to_string(),
                    enabled: true,
                    source: DecisionSource::Baseline,
                    evidence,
                };
            }
            let mut evidence = signals(cap.id, metrics);
            let (mut enabled, mut source) = if evidence.is_empty() {
                (false, DecisionSource::Disabled)
            } else {
                (true, DecisionSource::Signal)
            };
            if include.contains(cap.id) {
                enabled = true;
                source = DecisionSource::GoalInclude;
                evidence.push("enabled by doc_goals.include".to_string());
            }
            if exclude.contains(cap.id) {
                enabled = false;
                source = DecisionSource::GoalExclude;
                evidence = vec!["disabled by doc_goals.exclude".to_string()];
            }
            if evidence.is_empty() {
                evidence.push("no enabling signals".to_string());
            }
            CapabilityDecision {
                id: cap.id.to_string(),
                enabled,
                source,
                evidence,
            }
        })
        .collect()
}

fn normalized_set(items: &[String]) -> BTreeSet<String> {
    items
        .iter()
        .filter(|p| !p.trim().is_empty())
        .map(|p| paths::normalize_rel(p))
        .collect()
}

fn apply_overrides(
    required_files: &mut BTreeSet<String>,
    required_dirs: &mut BTreeSet<String>,
    optional_files: &mut BTreeSet<String>,
    overrides: &ManifestOverrides,
) -> Vec<String> {
    let include_files = normalized_set(&overrides.include_files);
    let include_dirs = normalized_set(&overrides.include_dirs);
    let exclude_files = normalized_set(&overrides.exclude_files);
    let exclude_dirs = normalized_set(&overrides.exclude_dirs);

    required_files.extend(include_files.iter().cloned());
    required_dirs.extend(include_dirs.iter().cloned());
    required_files.retain(|f| !exclude_files.contains(f));
    required_dirs.retain(|d| !exclude_dirs.contains(d));
    optional_files.retain(|f| !exclude_files.contains(f) && !required_files.contains(f));

    let mut notes = Vec::new();
    for (name, set) in [
        ("include_files", &include_files),
        ("include_dirs", &include_dirs),
        ("exclude_files", &exclude_files),
        ("exclude_dirs", &exclude_dirs),
    ] {
        if !set.is_empty() {
            notes.push(format!("{name}={}", set.len()));
        }
    }
    notes
}

/// Derives the paths a repository with these facts should carry under `policy`.
pub fn derive(facts: Option<&Facts>, policy: &Policy) -> AdaptiveManifest {
    let metrics = RepoMetrics::of(facts);
    let decisions = decide(&metrics, &policy.doc_goals);

    let mut required_files = BTreeSet::new();
    let mut required_dirs = BTreeSet::new();
    let mut optional_files = BTreeSet::new();
    for cap in CAPABILITIES {
        if !decisions.iter().any(|d| d.id == cap.id && d.enabled) {
            continue;
        }
        required_files.extend(cap.required_files.iter().map(|s| s.to_string()));
        required_dirs.extend(cap.required_dirs.iter().map(|s| s.to_string()));
        optional_files.extend(cap.optional_files.iter().map(|s| s.to_string()));
    }
    let override_notes = apply_overrides(
        &mut required_files,
        &mut required_dirs,
        &mut optional_files,
        &policy.adaptive_manifest_overrides,
    );
    required_files.insert(ROOT_INDEX.to_string());

    AdaptiveManifest {
        profile: ManifestProfile::from_file_count(metrics.file_count),
        metrics,
        decisions,
        required_files: required_files.into_iter().collect(),
        required_dirs: required_dirs.into_iter().collect(),
        optional_files: optional_files.into_iter().collect(),
        override_notes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn facts(files: usize, modules: &[&str], ci: &[&str], manifests: &[&str]) -> Facts {
        Facts {
            files: (0..files).map(|i| format!("src/f{i}.rs")).collect(),
            modules: modules.iter().map(|m| m.to_string()).collect(),
            ci: ci.iter().map(|m| m.to_string()).collect(),
            build_manifests: manifests.iter().map(|m| m.to_string()).collect(),
            ..Facts::default()
        }
    }

    fn decision<'a>(report: &'a AdaptiveManifest, id: &str) -> &'a CapabilityDecision {
        report.decisions.iter().find(|d| d.id == id).unwrap()
    }

    #[test]
    fn test_small_repository_gets_only_the_index() {
        let report = derive(Some(&facts(3, &[], &[], &[])), &Policy::default());
        assert_eq!(report.profile, ManifestProfile::Tiny);
        assert_eq!(report.enabled_ids(), vec![CORE_INDEX]);
        assert_eq!(report.required_files, vec![ROOT_INDEX]);
        assert!(report.required_dirs.is_empty());
    }

    #[test]
    fn test_signals_enable_runbook_planning_and_security() {
        let report = derive(
            Some(&facts(90, &["core", "api"], &[".github/workflows/ci.yml"], &["Cargo.toml"])),
            &Policy::default(),
        );
        assert_eq!(report.profile, ManifestProfile::Small);
        assert!(decision(&report, "operations.runbook").enabled);
        assert!(decision(&report, "architecture.overview").enabled);
        assert!(decision(&report, "security.posture").enabled);
        assert_eq!(
            report.required_dirs,
            vec!["docs/exec-plans/active", "docs/exec-plans/completed", "docs/tech-debt"]
        );
        assert!(!decision(&report, "compliance.controls").enabled);
    }

    #[test]
    fn test_goals_resolve_aliases_and_index_cannot_be_excluded() {
        let mut policy = Policy::default();
        policy.doc_goals = DocGoals {
            include: vec!["glossary".into(), "incident-response".into()],
            exclude: vec!["index".into(), "architecture".into()],
        };
        let report = derive(Some(&facts(3, &["core"], &[], &[])), &policy);

        let index = decision(&report, CORE_INDEX);
        assert!(index.enabled);
        assert!(index.evidence.iter().any(|e| e == "core.index cannot be excluded"));
        assert_eq!(decision(&report, "glossary.terms").source, DecisionSource::GoalInclude);
        let arch = decision(&report, "architecture.overview");
        assert!(!arch.enabled);
        assert_eq!(arch.source, DecisionSource::GoalExclude);
        assert_eq!(report.optional_files, vec!["docs/glossary.md"]);
        assert_eq!(report.required_files, vec!["docs/incident-response.md", ROOT_INDEX]);
    }

    #[test]
    fn test_overrides_include_and_exclude_but_keep_the_index() {
        let mut policy = Policy::default();
        policy.adaptive_manifest_overrides = ManifestOverrides {
            include_files: vec!["docs/onboarding.md".into()],
            include_dirs: vec!["docs/adr".into()],
            exclude_files: vec![ROOT_INDEX.into(), "docs/architecture.md".into()],
            exclude_dirs: vec![],
        };
        let report = derive(Some(&facts(3, &["core"], &[], &[])), &policy);
        assert_eq!(report.required_files, vec![ROOT_INDEX, "docs/onboarding.md"]);
        assert_eq!(report.required_dirs, vec!["docs/adr"]);
        assert_eq!(
            report.override_notes,
            vec!["include_files=1", "include_dirs=1", "exclude_files=2"]
        );
    }

    #[test]
    fn test_manifest_profile_boundaries() {
        assert_eq!(ManifestProfile::from_file_count(30), ManifestProfile::Tiny);
        assert_eq!(ManifestProfile::from_file_count(31), ManifestProfile::Small);
        assert_eq!(ManifestProfile::from_file_count(400), ManifestProfile::Medium);
        assert_eq!(ManifestProfile::from_file_count(401), ManifestProfile::Large);
    }
}
