//! Manifest of required and optional managed paths.
//!
//! Evolution is additive only: merging a desired manifest into the current one can add
//! paths but never drops a required path. Removal happens through archiving.

use crate::core::capability;
use crate::core::error::{self, DocsorError};
use crate::core::facts::Facts;
use crate::core::policy::Policy;
use crate::core::{output, paths};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;

pub const MANIFEST_SCHEMA_VERSION: u32 = 1;
pub const ROOT_INDEX: &str = "docs/index.md";
pub const DEFAULT_ARCHIVE_DIR: &str = "docs/archive";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RequiredPaths {
    pub files: Vec<String>,
    pub dirs: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct OptionalPaths {
    pub files: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Manifest {
    pub version: u32,
    pub required: RequiredPaths,
    pub optional: OptionalPaths,
    pub archive_dir: String,
}

impl Default for Manifest {
    /// The minimal manifest: only the root index is required.
    fn default() -> Self {
        Self {
            version: MANIFEST_SCHEMA_VERSION,
            required: RequiredPaths {
                files: vec![ROOT_INDEX.to_string()],
                dirs: Vec::new(),
            },
            optional: OptionalPaths::default(),
            archive_dir: DEFAULT_ARCHIVE_DIR.to_string(),
        }
    }
}

fn sorted_unique(items: &[String]) -> Vec<String> {
    items
        .iter()
        .map(|p| paths::normalize_rel(p))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

impl Manifest {
    /// Sorted, de-duplicated copy with normalized paths. Optional entries that are
    /// also required are dropped from the optional list.
    pub fn normalized(&self) -> Manifest {
        let files = sorted_unique(&self.required.files);
        let optional = sorted_unique(&self.optional.files)
            .into_iter()
            .filter(|p| !files.contains(p))
            .collect();
        Manifest {
            version: self.version.max(MANIFEST_SCHEMA_VERSION),
            required: RequiredPaths {
                files,
                dirs: sorted_unique(&self.required.dirs),
            },
            optional: OptionalPaths { files: optional },
            archive_dir: paths::normalize_rel(&self.archive_dir),
        }
    }

    pub fn validate(self) -> Result<Self, DocsorError> {
        let mut errors = Vec::new();
        if self.version == 0 {
            errors.push("version must be > 0".to_string());
        }
        if !paths::is_safe_rel(&self.archive_dir) {
            errors.push(format!("archive_dir must be repo-relative, got {:?}", self.archive_dir));
        }
        for p in self
            .required
            .files
            .iter()
            .chain(self.required.dirs.iter())
            .chain(self.optional.files.iter())
        {
            if !paths::is_safe_rel(p) {
                errors.push(format!("path must be repo-relative POSIX, got {p:?}"));
            }
        }
        if errors.is_empty() {
            Ok(self.normalized())
        } else {
            Err(error::config_error("manifest", errors.join("; ")))
        }
    }

    /// Required and optional files, sorted.
    pub fn managed_files(&self) -> BTreeSet<String> {
        self.required
            .files
            .iter()
            .chain(self.optional.files.iter())
            .cloned()
            .collect()
    }

    pub fn is_archived(&self, rel: &str) -> bool {
        let prefix = format!("{}/", self.archive_dir.trim_end_matches('/'));
        rel.starts_with(&prefix)
    }
}

/// Docs a repository with these facts should carry under `policy`, on top of `base`.
pub fn desired_manifest(base: &Manifest, facts: Option<&Facts>, policy: &Policy) -> Manifest {
    let derived = capability::derive(facts, policy);
    let mut desired = base.clone();
    desired.required.files.extend(derived.required_files);
    desired.required.dirs.extend(derived.required_dirs);
    desired.optional.files.extend(derived.optional_files);
    desired.normalized()
}

/// Merges `desired` into `current` without removing anything. Returns the merged
/// manifest and one note per added path.
pub fn merge_additive(current: &Manifest, desired: &Manifest) -> (Manifest, Vec<String>) {
    let current = current.normalized();
    let desired = desired.normalized();
    let mut notes = Vec::new();
    let mut merged = current.clone();

    for file in &desired.required.files {
        if !merged.required.files.contains(file) {
            notes.push(format!("required.files += {file}"));
            merged.required.files.push(file.clone());
        }
    }
    for dir in &desired.required.dirs {
        if !merged.required.dirs.contains(dir) {
            notes.push(format!("required.dirs += {dir}"));
            merged.required.dirs.push(dir.clone());
        }
    }
    for file in &desired.optional.files {
        if !merged.optional.files.contains(file) && !merged.required.files.contains(file) {
            notes.push(format!("optional.files += {file}"));
            merged.optional.files.push(file.clone());
        }
    }
    (merged.normalized(), notes)
}

pub fn load_manifest(path: &Path) -> Result<(Manifest, bool), DocsorError> {
    let raw: Option<serde_json::Value> = output::read_json(path)?;
    match raw {
        None => Ok((Manifest::default(), false)),
        Some(value) => {
            let manifest: Manifest = serde_json::from_value(value)
                .map_err(|e| error::config_error(&path.display().to_string(), e))?;
            Ok((manifest.validate()?, true))
        }
    }
}
