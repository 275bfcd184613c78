//! Document spec: required sections and evidence-bearing claims per managed document.

use crate::core::error::{self, DocsorError};
use crate::core::{output, paths};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ClaimSpec {
    pub claim_id: String,
    pub statement_template: String,
    pub required_evidence_types: Vec<String>,
    pub allow_unknown: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SectionSpec {
    pub section_id: String,
    pub heading: Option<String>,
    pub claims: Vec<ClaimSpec>,
}

impl SectionSpec {
    /// `## Heading` line for the section; defaults to the title-cased id.
    pub fn heading_line(&self) -> String {
        let text = match &self.heading {
            Some(h) if !h.trim().is_empty() => h.trim().to_string(),
            _ => self
                .section_id
                .split(['_', '-'])
                .filter(|w| !w.is_empty())
                .map(|w| {
                    let mut chars = w.chars();
                    match chars.next() {
                        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                        None => String::new(),
                    }
                })
                .collect::<Vec<_>>()
                .join(" "),
        };
        format!("## {text}")
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DocumentSpec {
    pub path: String,
    pub required_sections: Vec<String>,
    pub render_order: Vec<String>,
    pub sections: Vec<SectionSpec>,
}

impl DocumentSpec {
    pub fn section(&self, section_id: &str) -> Option<&SectionSpec> {
        self.sections.iter().find(|s| s.section_id == section_id)
    }

    /// Sections in render order, followed by any not named there, in declaration order.
    pub fn ordered_sections(&self) -> Vec<&SectionSpec> {
        let mut out: Vec<&SectionSpec> = self
            .render_order
            .iter()
            .filter_map(|id| self.section(id))
            .collect();
        for section in &self.sections {
            if !self.render_order.contains(&section.section_id) {
                out.push(section);
            }
        }
        out
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DocSpec {
    pub version: u32,
    pub documents: Vec<DocumentSpec>,
}

impl Default for DocSpec {
    fn default() -> Self {
        Self {
            version: 1,
            documents: Vec::new(),
        }
    }
}

impl DocSpec {
    pub fn document(&self, path: &str) -> Option<&DocumentSpec> {
        self.documents.iter().find(|d| d.path == path)
    }

    /// Every structural problem in the spec, in a stable order.
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.version == 0 {
            problems.push("version must be a positive integer".to_string());
        }
        let mut seen_paths = BTreeSet::new();
        for (d_idx, doc) in self.documents.iter().enumerate() {
            let at = format!("documents[{d_idx}]");
            if !paths::is_safe_rel(&doc.path) {
                problems.push(format!("{at}.path must be repo-relative POSIX, got {:?}", doc.path));
            }
            if !seen_paths.insert(doc.path.as_str()) {
                problems.push(format!("{at}.path duplicates {}", doc.path));
            }

            let mut section_ids = BTreeSet::new();
            let mut doc_claims = BTreeSet::new();
            for (s_idx, section) in doc.sections.iter().enumerate() {
                let s_at = format!("{at}.sections[{s_idx}]");
                if section.section_id.trim().is_empty() {
                    problems.push(format!("{s_at}.section_id is empty"));
                }
                if !section_ids.insert(section.section_id.as_str()) {
                    problems.push(format!("{s_at}.section_id duplicates {}", section.section_id));
                }
                let mut section_claims = BTreeSet::new();
                for (c_idx, claim) in section.claims.iter().enumerate() {
                    let c_at = format!("{s_at}.claims[{c_idx}]");
                    if claim.claim_id.trim().is_empty() {
                        problems.push(format!("{c_at}.claim_id is empty"));
                    }
                    if claim.required_evidence_types.is_empty() {
                        problems.push(format!("{c_at}.required_evidence_types must be non-empty"));
                    }
                    if !section_claims.insert(claim.claim_id.as_str()) {
                        problems.push(format!("{c_at}.claim_id duplicates {} in section", claim.claim_id));
                    } else if !doc_claims.insert(claim.claim_id.as_str()) {
                        problems.push(format!("{c_at}.claim_id duplicates {} in document", claim.claim_id));
                    }
                }
            }
            for id in &doc.required_sections {
                if !section_ids.contains(id.as_str()) {
                    problems.push(format!("{at}.required_sections references undefined section {id}"));
                }
            }
            for id in &doc.render_order {
                if !section_ids.contains(id.as_str()) {
                    problems.push(format!("{at}.render_order references undefined section {id}"));
                }
            }
        }
        problems
    }
}

pub fn load_doc_spec(path: &Path) -> Result<Option<DocSpec>, DocsorError> {
    let raw: Option<serde_json::Value> = output::read_json(path)?;
    let Some(value) = raw else {
        return Ok(None);
    };
    let spec: DocSpec = serde_json::from_value(value)
        .map_err(|e| error::config_error(&path.display().to_string(), e))?;
    let problems = spec.problems();
    if !problems.is_empty() {
        return Err(error::config_error("doc spec", problems.join("; ")));
    }
    Ok(Some(spec))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spec(value: serde_json::Value) -> DocSpec {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_problems_catch_duplicates_and_dangling_refs() {
        let s = spec(json!({
            "version": 1,
            "documents": [
                {
                    "path": "docs/runbook.md",
                    "required_sections": ["setup", "missing"],
                    "render_order": ["ghost"],
                    "sections": [
                        {"section_id": "setup", "claims": [
                            {"claim_id": "c1", "required_evidence_types": ["runbook.dev_commands"]},
                            {"claim_id": "c1", "required_evidence_types": ["runbook.dev_commands"]}
                        ]},
                        {"section_id": "setup", "claims": [
                            {"claim_id": "c2", "required_evidence_types": []}
                        ]}
                    ]
                },
                {"path": "docs/runbook.md"},
                {"path": "docs\\win.md"}
            ]
        }));
        let problems = s.problems().join("\n");
        assert!(problems.contains("claim_id duplicates c1 in section"));
        assert!(problems.contains("section_id duplicates setup"));
        assert!(problems.contains("required_evidence_types must be non-empty"));
        assert!(problems.contains("required_sections references undefined section missing"));
        assert!(problems.contains("render_order references undefined section ghost"));
        assert!(problems.contains("path duplicates docs/runbook.md"));
        assert!(problems.contains("must be repo-relative POSIX"));
    }

    #[test]
    fn test_claim_duplicate_across_sections_in_document() {
        let s = spec(json!({
            "version": 1,
            "documents": [{
                "path": "docs/a.md",
                "sections": [
                    {"section_id": "one", "claims": [{"claim_id": "c", "required_evidence_types": ["repo_scan.files"]}]},
                    {"section_id": "two", "claims": [{"claim_id": "c", "required_evidence_types": ["repo_scan.files"]}]}
                ]
            }]
        }));
        assert!(s.problems().iter().any(|p| p.contains("duplicates c in document")));
    }

    #[test]
    fn test_zero_version_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("spec.json");
        std::fs::write(&path, r#"{"version": 0, "documents": []}"#).unwrap();
        assert!(load_doc_spec(&path).unwrap_err().is_config());
    }

    #[test]
    fn test_heading_line_and_order() {
        let s = spec(json!({
            "documents": [{
                "path": "docs/a.md",
                "render_order": ["dev_commands"],
                "sections": [
                    {"section_id": "overview", "heading": "Overview"},
                    {"section_id": "dev_commands"}
                ]
            }]
        }));
        let doc = &s.documents[0];
        let order: Vec<_> = doc.ordered_sections().iter().map(|s| s.heading_line()).collect();
        assert_eq!(order, vec!["## Dev Commands", "## Overview"]);
    }
}
