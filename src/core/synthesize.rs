//! Claim synthesis: binds every doc spec claim to the evidence that supports it.
//!
//! `repo_scan.*` evidence is read from the facts snapshot by field path and
//! `runbook.*` evidence from the fenced shell blocks of the runbook sections. The
//! result is written as the evidence map, one entry per claim, with the statement
//! rendered from its template.

use crate::core::error::DocsorError;
use crate::core::facts::{self, Facts};
use crate::core::language::{self, Profile};
use crate::core::workspace::Workspace;
use crate::core::{markdown, output, semantic};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::LazyLock;
use tracing::{debug, info};

const RUNBOOK_PATH: &str = "docs/runbook.md";
const RUNBOOK_SECTIONS: &[&str] = &["dev_commands", "validation_commands"];
const SHELL_FENCES: &[&str] = &["", "bash", "sh", "zsh", "shell", "console"];

static PLACEHOLDER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{[A-Za-z_][A-Za-z0-9_]*\}").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimStatus {
    Supported,
    Unknown,
    Missing,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceItem {
    #[serde(rename = "type")]
    pub evidence_type: String,
    pub value: JsonValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimEntry {
    pub claim_id: String,
    pub status: ClaimStatus,
    pub statement: String,
    pub statement_template: String,
    pub required_evidence_types: Vec<String>,
    pub missing_evidence_types: Vec<String>,
    pub allow_unknown: bool,
    pub evidence: Vec<EvidenceItem>,
    pub citations: Vec<String>,
    pub citation: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionClaims {
    pub section_id: String,
    pub claims: Vec<ClaimEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentClaims {
    pub path: String,
    pub sections: Vec<SectionClaims>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SynthesisMetrics {
    pub claims: usize,
    pub supported: usize,
    pub unknown: usize,
    pub missing: usize,
}

impl SynthesisMetrics {
    fn count(&mut self, status: ClaimStatus) {
        self.claims += 1;
        match status {
            ClaimStatus::Supported => self.supported += 1,
            ClaimStatus::Unknown => self.unknown += 1,
            ClaimStatus::Missing => self.missing += 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceMap {
    pub generated_at: String,
    pub doc_spec_exists: bool,
    pub facts_exists: bool,
    pub warnings: Vec<String>,
    pub metrics: SynthesisMetrics,
    pub documents: Vec<DocumentClaims>,
}

/// Commands listed in fenced shell blocks under the runbook section `section_id`,
/// in order and without duplicates. Headings of every language profile are accepted.
pub fn runbook_commands(runbook: &str, section_id: &str) -> Vec<String> {
    let Some(doc) = language::builtin(RUNBOOK_PATH) else {
        return Vec::new();
    };
    let Some(body) = Profile::ALL
        .iter()
        .filter_map(|p| doc.heading(section_id, *p))
        .find_map(|heading| markdown::section_body(runbook, heading))
    else {
        return Vec::new();
    };

    let mut seen = BTreeSet::new();
    let mut commands = Vec::new();
    let mut in_shell = false;
    let mut in_fence = false;
    for line in body.lines() {
        let trimmed = line.trim();
        if let Some(info) = trimmed.strip_prefix("```") {
            if in_fence {
                in_fence = false;
                in_shell = false;
            } else {
                in_fence = true;
                in_shell = SHELL_FENCES.contains(&info.trim().to_ascii_lowercase().as_str());
            }
            continue;
        }
        if !in_shell || trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        if seen.insert(trimmed.to_string()) {
            commands.push(trimmed.to_string());
        }
    }
    commands
}

/// Resolves evidence values once per run; the runbook is read lazily.
struct Resolver<'a> {
    facts: Option<JsonValue>,
    snapshot: Option<&'a Facts>,
    runbook: Option<String>,
    runbook_cache: BTreeMap<String, Vec<String>>,
}

impl<'a> Resolver<'a> {
    fn new(ws: &Workspace, snapshot: Option<&'a Facts>) -> Result<Self, DocsorError> {
        let facts = snapshot.map(serde_json::to_value).transpose()?;
        let runbook = match ws.corpus.get(RUNBOOK_PATH) {
            Some(text) => Some(text.to_string()),
            None => {
                let path = ws.abs(RUNBOOK_PATH);
                if path.is_file() {
                    Some(output::read_text_lossy(&path)?)
                } else {
                    None
                }
            }
        };
        Ok(Self {
            facts,
            snapshot,
            runbook,
            runbook_cache: BTreeMap::new(),
        })
    }

    fn resolve(&mut self, evidence_type: &str) -> Option<JsonValue> {
        if let Some(path) = evidence_type.strip_prefix("repo_scan.") {
            let mut cursor = self.facts.as_ref()?;
            for key in path.split('.') {
                match cursor.get(key) {
                    Some(next) => cursor = next,
                    None => {
                        // Signals without a dedicated field, such as `repo_scan.tests`.
                        return self
                            .snapshot
                            .filter(|f| f.has_evidence(evidence_type))
                            .map(|_| JsonValue::String("detected".into()));
                    }
                }
            }
            return Some(cursor.clone());
        }
        if let Some(section) = evidence_type.strip_prefix("runbook.") {
            if !RUNBOOK_SECTIONS.contains(&section) {
                return None;
            }
            let runbook = self.runbook.as_deref();
            let commands = self
                .runbook_cache
                .entry(section.to_string())
                .or_insert_with(|| runbook.map(|t| runbook_commands(t, section)).unwrap_or_default());
            if !commands.is_empty() {
                return Some(JsonValue::from(commands.clone()));
            }
            if section == "dev_commands" {
                let files: Vec<&String> = self
                    .snapshot?
                    .files
                    .iter()
                    .filter(|f| facts::DEV_COMMAND_FILES.contains(&f.as_str()))
                    .collect();
                if !files.is_empty() {
                    return serde_json::to_value(files).ok();
                }
            }
            return None;
        }
        None
    }
}

fn is_empty_value(value: &JsonValue) -> bool {
    match value {
        JsonValue::Null => true,
        JsonValue::String(s) => s.is_empty(),
        JsonValue::Array(a) => a.is_empty(),
        JsonValue::Object(o) => o.is_empty(),
        _ => false,
    }
}

/// One-line rendering of an evidence value for statement templates.
pub fn summarize(value: &JsonValue) -> String {
    match value {
        JsonValue::Null => "UNKNOWN".to_string(),
        JsonValue::String(s) => s.clone(),
        JsonValue::Array(items) if items.is_empty() => "UNKNOWN".to_string(),
        JsonValue::Array(items) => items.iter().map(summarize).collect::<Vec<_>>().join(", "),
        JsonValue::Object(map) if map.is_empty() => "UNKNOWN".to_string(),
        JsonValue::Object(map) if map.values().all(JsonValue::is_boolean) => {
            let on: Vec<&str> = map
                .iter()
                .filter(|(_, v)| v.as_bool() == Some(true))
                .map(|(k, _)| k.as_str())
                .collect();
            if on.is_empty() { "none".to_string() } else { on.join(", ") }
        }
        JsonValue::Object(map) => map
            .iter()
            .map(|(k, v)| format!("{k}:{}", summarize(v)))
            .collect::<Vec<_>>()
            .join(", "),
        other => other.to_string(),
    }
}

/// Replaces every `{placeholder}` in `template` with `value`. A template without
/// placeholders is returned as is; an empty one becomes `value`.
pub fn render_statement(template: &str, value: &str) -> String {
    if template.is_empty() {
        return value.to_string();
    }
    PLACEHOLDER_RE.replace_all(template, regex::NoExpand(value)).into_owned()
}

fn claim_entry(claim: &crate::core::doc_spec::ClaimSpec, resolver: &mut Resolver<'_>) -> ClaimEntry {
    let mut evidence = Vec::new();
    let mut missing = Vec::new();
    for evidence_type in &claim.required_evidence_types {
        match resolver.resolve(evidence_type) {
            Some(value) if !is_empty_value(&value) => evidence.push(EvidenceItem {
                evidence_type: evidence_type.clone(),
                value,
            }),
            _ => missing.push(evidence_type.clone()),
        }
    }

    let (status, statement) = if missing.is_empty() {
        let summary = evidence
            .first()
            .map(|item| summarize(&item.value))
            .unwrap_or_else(|| "UNKNOWN".to_string());
        (ClaimStatus::Supported, render_statement(&claim.statement_template, &summary))
    } else if claim.allow_unknown {
        (ClaimStatus::Unknown, render_statement(&claim.statement_template, "UNKNOWN"))
    } else {
        (ClaimStatus::Missing, render_statement(&claim.statement_template, "TODO"))
    };

    let mut citations: Vec<String> = Vec::new();
    for item in &evidence {
        let token = semantic::citation_token(&item.evidence_type);
        if !citations.contains(&token) {
            citations.push(token);
        }
    }

    ClaimEntry {
        claim_id: claim.claim_id.clone(),
        status,
        statement,
        statement_template: claim.statement_template.clone(),
        required_evidence_types: claim.required_evidence_types.clone(),
        missing_evidence_types: missing,
        allow_unknown: claim.allow_unknown,
        evidence,
        citation: citations.first().cloned(),
        citations,
    }
}

/// Builds the evidence map for every claim of the workspace's doc spec. Without a
/// doc spec the map is empty and carries a warning.
pub fn synthesize(ws: &Workspace, facts: Option<&Facts>, generated_at: &str) -> Result<EvidenceMap, DocsorError> {
    let mut map = EvidenceMap {
        generated_at: generated_at.to_string(),
        doc_spec_exists: ws.doc_spec.is_some(),
        facts_exists: facts.is_some(),
        warnings: Vec::new(),
        metrics: SynthesisMetrics::default(),
        documents: Vec::new(),
    };
    let Some(spec) = &ws.doc_spec else {
        map.warnings.push("doc spec missing; synthesis skipped".to_string());
        return Ok(map);
    };
    if facts.is_none() {
        map.warnings
            .push("facts snapshot missing; repo_scan evidence is unavailable".to_string());
    }

    let mut resolver = Resolver::new(ws, facts)?;
    for doc in &spec.documents {
        let mut sections = Vec::new();
        for section in &doc.sections {
            if section.claims.is_empty() {
                continue;
            }
            let claims: Vec<ClaimEntry> = section
                .claims
                .iter()
                .map(|claim| claim_entry(claim, &mut resolver))
                .collect();
            for claim in &claims {
                map.metrics.count(claim.status);
            }
            sections.push(SectionClaims {
                section_id: section.section_id.clone(),
                claims,
            });
        }
        if !sections.is_empty() {
            map.documents.push(DocumentClaims {
                path: doc.path.clone(),
                sections,
            });
        }
    }

    debug!(documents = map.documents.len(), "claims synthesized");
    info!(
        claims = map.metrics.claims,
        supported = map.metrics.supported,
        unknown = map.metrics.unknown,
        missing = map.metrics.missing,
        "evidence map built"
    );
    Ok(map)
}

pub fn save_evidence_map(path: &Path, map: &EvidenceMap) -> Result<(), DocsorError> {
    output::write_json(path, map)
}
