//! Repository fact snapshot.
//!
//! The snapshot is produced once per run and consumed read-only. Its `generated_at`
//! date is the reference date for freshness decisions in planning.

use crate::core::error::DocsorError;
use crate::core::{output, paths, time};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::debug;

pub const FACTS_SCHEMA_VERSION: u32 = 1;

const MODULE_ROOTS: &[&str] = &["src", "crates", "packages", "lib"];
pub(crate) const DEV_COMMAND_FILES: &[&str] = &["Makefile", "justfile", "Justfile", "package.json", "Taskfile.yml"];
const TEST_DIR_NAMES: &[&str] = &["tests", "test", "__tests__", "spec"];
const BUILD_MANIFESTS: &[&str] = &[
    "Cargo.toml",
    "package.json",
    "pyproject.toml",
    "setup.py",
    "requirements.txt",
    "go.mod",
    "pom.xml",
    "build.gradle",
    "build.gradle.kts",
    "CMakeLists.txt",
    "Gemfile",
    "composer.json",
];
const CI_FILES: &[&str] = &[".gitlab-ci.yml", ".travis.yml", "azure-pipelines.yml", "Jenkinsfile"];

fn language_of(file: &str) -> Option<&'static str> {
    let ext = file.rsplit_once('.')?.1;
    Some(match ext {
        "rs" => "rust",
        "py" => "python",
        "js" | "mjs" | "cjs" | "jsx" => "javascript",
        "ts" | "tsx" => "typescript",
        "go" => "go",
        "java" => "java",
        "kt" | "kts" => "kotlin",
        "rb" => "ruby",
        "php" => "php",
        "c" | "h" => "c",
        "cc" | "cpp" | "cxx" | "hpp" => "cpp",
        "cs" => "csharp",
        "swift" => "swift",
        "sh" | "bash" => "shell",
        _ => return None,
    })
}

fn is_ci_file(file: &str) -> bool {
    if CI_FILES.contains(&file) {
        return true;
    }
    file.strip_prefix(".github/workflows/")
        .is_some_and(|name| !name.contains('/') && (name.ends_with(".yml") || name.ends_with(".yaml")))
        || file == ".circleci/config.yml"
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Facts {
    pub version: u32,
    pub generated_at: String,
    pub root: String,
    pub modules: Vec<String>,
    pub files: Vec<String>,
    /// Source file counts keyed by language name.
    pub languages: BTreeMap<String, usize>,
    pub build_manifests: Vec<String>,
    pub ci: Vec<String>,
    pub evidence_types: Vec<String>,
}

impl Facts {
    /// Reference date for freshness checks; `None` when the snapshot carries no
    /// parsable timestamp.
    pub fn reference_date(&self) -> Option<NaiveDate> {
        time::parse_reference_date(&self.generated_at)
    }

    pub fn has_evidence(&self, evidence_type: &str) -> bool {
        self.evidence_types.iter().any(|e| e == evidence_type)
    }

    pub fn has_file(&self, rel: &str) -> bool {
        self.files.iter().any(|f| f == rel)
    }

    /// Language with the most source files; ties go to the alphabetically first.
    pub fn primary_language(&self) -> Option<&str> {
        self.languages
            .iter()
            .max_by(|a, b| a.1.cmp(b.1).then_with(|| b.0.cmp(a.0)))
            .map(|(name, _)| name.as_str())
    }
}

/// Walks `root` and builds a snapshot stamped with `generated_at`.
pub fn scan_repository(root: &Path, generated_at: &str) -> Result<Facts, DocsorError> {
    let mut files = Vec::new();
    paths::collect_files(root, root, &mut files)?;
    files.sort();

    let mut modules: BTreeSet<String> = BTreeSet::new();
    for file in &files {
        let mut parts = file.split('/');
        let (Some(top), Some(second), Some(_)) = (parts.next(), parts.next(), parts.next()) else {
            continue;
        };
        if MODULE_ROOTS.contains(&top) && !second.starts_with('.') {
            modules.insert(second.to_string());
        }
    }
    for file in &files {
        if let Some(rest) = file.strip_prefix("src/") {
            if !rest.contains('/') {
                if let Some(stem) = rest.strip_suffix(".rs").or_else(|| rest.strip_suffix(".py")) {
                    if !matches!(stem, "lib" | "main" | "mod" | "__init__") {
                        modules.insert(stem.to_string());
                    }
                }
            }
        }
    }

    let mut languages: BTreeMap<String, usize> = BTreeMap::new();
    for lang in files.iter().filter_map(|f| language_of(f)) {
        *languages.entry(lang.to_string()).or_default() += 1;
    }
    let build_manifests: Vec<String> = files
        .iter()
        .filter(|f| {
            let name = f.rsplit('/').next().unwrap_or(f);
            BUILD_MANIFESTS.contains(&name)
        })
        .cloned()
        .collect();
    let ci: Vec<String> = files.iter().filter(|f| is_ci_file(f)).cloned().collect();

    let mut evidence: BTreeSet<String> = BTreeSet::new();
    if !files.is_empty() {
        evidence.insert("repo_scan.files".to_string());
    }
    if !modules.is_empty() {
        evidence.insert("repo_scan.modules".to_string());
    }
    if files.iter().any(|f| {
        f.split('/')
            .take(f.split('/').count().saturating_sub(1))
            .any(|p| TEST_DIR_NAMES.contains(&p))
    }) {
        evidence.insert("repo_scan.tests".to_string());
    }
    if files.iter().any(|f| DEV_COMMAND_FILES.contains(&f.as_str())) {
        evidence.insert("runbook.dev_commands".to_string());
    }
    if !languages.is_empty() {
        evidence.insert("repo_scan.languages".to_string());
    }
    if !build_manifests.is_empty() {
        evidence.insert("repo_scan.build_manifests".to_string());
    }
    if !ci.is_empty() {
        evidence.insert("repo_scan.ci".to_string());
    }

    debug!(
        files = files.len(),
        modules = modules.len(),
        languages = languages.len(),
        "repository scan complete"
    );

    Ok(Facts {
        version: FACTS_SCHEMA_VERSION,
        generated_at: generated_at.to_string(),
        root: root.display().to_string(),
        modules: modules.into_iter().collect(),
        files,
        languages,
        build_manifests,
        ci,
        evidence_types: evidence.into_iter().collect(),
    })
}

pub fn load_facts(path: &Path) -> Result<Option<Facts>, DocsorError> {
    output::read_json(path)
}

pub fn save_facts(path: &Path, facts: &Facts) -> Result<(), DocsorError> {
    output::write_json(path, facts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_scan_repository_collects_modules_and_evidence() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("src/planner")).unwrap();
        fs::write(root.join("src/planner/mod.rs"), "").unwrap();
        fs::write(root.join("src/lib.rs"), "").unwrap();
        fs::write(root.join("src/cache.rs"), "").unwrap();
        fs::create_dir_all(root.join("tests")).unwrap();
        fs::write(root.join("tests/it.rs"), "").unwrap();
        fs::write(root.join("Makefile"), "test:\n").unwrap();
        fs::create_dir_all(root.join(".git")).unwrap();
        fs::write(root.join(".git/HEAD"), "ref").unwrap();

        let facts = scan_repository(root, "2026-01-02T00:00:00+00:00").unwrap();
        assert_eq!(facts.modules, vec!["cache", "planner"]);
        assert!(facts.has_evidence("repo_scan.modules"));
        assert!(facts.has_evidence("repo_scan.tests"));
        assert!(facts.has_evidence("runbook.dev_commands"));
        assert!(!facts.files.iter().any(|f| f.starts_with(".git/")));
        assert_eq!(
            facts.reference_date(),
            NaiveDate::from_ymd_opt(2026, 1, 2)
        );
    }

    #[test]
    fn test_scan_profiles_languages_manifests_and_ci() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("src")).unwrap();
        fs::write(root.join("src/lib.rs"), "").unwrap();
        fs::write(root.join("src/cache.rs"), "").unwrap();
        fs::create_dir_all(root.join("web")).unwrap();
        fs::write(root.join("web/app.ts"), "").unwrap();
        fs::write(root.join("web/package.json"), "{}").unwrap();
        fs::write(root.join("Cargo.toml"), "[package]\n").unwrap();
        fs::create_dir_all(root.join(".github/workflows")).unwrap();
        fs::write(root.join(".github/workflows/ci.yml"), "on: push\n").unwrap();

        let facts = scan_repository(root, "2026-01-02").unwrap();
        assert_eq!(facts.languages.get("rust"), Some(&2));
        assert_eq!(facts.languages.get("typescript"), Some(&1));
        assert_eq!(facts.primary_language(), Some("rust"));
        assert_eq!(facts.build_manifests, vec!["Cargo.toml", "web/package.json"]);
        assert_eq!(facts.ci, vec![".github/workflows/ci.yml"]);
        assert!(facts.has_evidence("repo_scan.languages"));
        assert!(facts.has_evidence("repo_scan.ci"));
    }

    #[test]
    fn test_scan_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b.md"), "").unwrap();
        fs::write(dir.path().join("a.md"), "").unwrap();
        let one = scan_repository(dir.path(), "2026-01-02").unwrap();
        let two = scan_repository(dir.path(), "2026-01-02").unwrap();
        assert_eq!(one, two);
        assert_eq!(one.files, vec!["a.md", "b.md"]);
    }
}
