//! Read-only snapshot of the managed document corpus.
//!
//! The planner and validator read documents only through this snapshot, so one run
//! sees one consistent view regardless of the order in which checks execute.

use crate::core::error::DocsorError;
use crate::core::{output, paths};
use std::collections::BTreeMap;
use std::path::Path;

/// Marker the executor writes into documents it generates. Generated documents may be
/// updated automatically and may be overwritten by merge/split targets.
pub const GENERATED_MARKER: &str = "<!-- docsor:managed -->";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocCorpus {
    docs: BTreeMap<String, String>,
}

impl DocCorpus {
    /// Loads markdown under `docs/` plus the given extra repo-relative paths.
    pub fn load(root: &Path, extra: &[String]) -> Result<Self, DocsorError> {
        let mut docs = BTreeMap::new();
        let mut files = Vec::new();
        paths::collect_files(root, &root.join("docs"), &mut files)?;
        for rel in files.into_iter().filter(|f| f.ends_with(".md")) {
            let text = output::read_text_lossy(&root.join(&rel))?;
            docs.insert(rel, text);
        }
        for rel in extra {
            let abs = root.join(rel);
            if abs.is_file() && !docs.contains_key(rel) {
                let text = output::read_text_lossy(&abs)?;
                docs.insert(rel.clone(), text);
            }
        }
        Ok(Self { docs })
    }

    pub fn from_docs<I, K, V>(docs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            docs: docs.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }

    pub fn get(&self, rel: &str) -> Option<&str> {
        self.docs.get(rel).map(String::as_str)
    }

    pub fn contains(&self, rel: &str) -> bool {
        self.docs.contains_key(rel)
    }

    pub fn paths(&self) -> impl Iterator<Item = &String> {
        self.docs.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.docs.iter()
    }

    pub fn is_generated(&self, rel: &str) -> bool {
        self.get(rel).is_some_and(|t| t.contains(GENERATED_MARKER))
    }

    /// Markdown under `docs/`, excluding hidden files and the archive subtree.
    pub fn scope_docs(&self, archive_dir: &str) -> Vec<String> {
        let prefix = format!("{}/", archive_dir.trim_end_matches('/'));
        self.docs
            .keys()
            .filter(|p| p.starts_with("docs/") && !p.starts_with(&prefix))
            .filter(|p| !paths::basename(p).starts_with('.'))
            .cloned()
            .collect()
    }
}
