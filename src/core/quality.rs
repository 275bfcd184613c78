//! Document quality metrics and the quality gate thresholds.

use crate::core::corpus::DocCorpus;
use crate::core::doc_spec::DocSpec;
use crate::core::facts::Facts;
use crate::core::legacy::{self, LegacyStatus, Registry};
use crate::core::policy::Policy;
use crate::core::semantic::{self, ClaimLine};
use crate::core::{markdown, paths};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CitationIssueKind {
    Missing,
    Invalid,
    Untraceable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CitationIssue {
    pub path: String,
    pub claim_id: String,
    pub kind: CitationIssueKind,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClaimConflict {
    pub claim_id: String,
    pub statements: Vec<String>,
    pub paths: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QualityMetrics {
    pub total_claims: usize,
    pub supported_claims: usize,
    pub evidence_coverage: f64,
    pub conflicts: usize,
    pub unknown_claims: usize,
    pub unresolved_todo: usize,
    pub citation_issues: usize,
    pub structured_section_completeness: f64,
    pub progressive_slot_completeness: f64,
    pub next_step_presence: f64,
    pub section_verbosity_over_budget: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QualityReport {
    pub metrics: QualityMetrics,
    pub conflicts: Vec<ClaimConflict>,
    pub citation_issues: Vec<CitationIssue>,
    pub missing_claims: Vec<String>,
    pub failed_checks: Vec<String>,
}

impl QualityReport {
    pub fn passed(&self) -> bool {
        self.failed_checks.is_empty()
    }
}

fn quality_scope(corpus: &DocCorpus, spec: Option<&DocSpec>, archive_dir: &str) -> Vec<String> {
    let mut docs = corpus.scope_docs(archive_dir);
    if let Some(spec) = spec {
        docs.extend(
            spec.documents
                .iter()
                .filter(|d| corpus.contains(&d.path))
                .map(|d| d.path.clone()),
        );
    }
    docs.sort();
    docs.dedup();
    docs
}

fn citation_issues_for(path: &str, line: &ClaimLine, facts: Option<&Facts>) -> Vec<CitationIssue> {
    let issue = |kind, detail: String| CitationIssue {
        path: path.to_string(),
        claim_id: line.claim_id.clone(),
        kind,
        detail,
    };
    if line.citations.is_empty() {
        return vec![issue(CitationIssueKind::Missing, "claim has no citations".into())];
    }
    let mut out = Vec::new();
    for token in &line.citations {
        match semantic::citation_type(token) {
            None => out.push(issue(CitationIssueKind::Invalid, format!("invalid citation {token}"))),
            Some(t) => {
                if facts.is_some_and(|f| !f.has_evidence(t)) {
                    out.push(issue(CitationIssueKind::Untraceable, format!("{token} not present in facts")));
                }
            }
        }
    }
    out
}

fn supported(line: &ClaimLine) -> bool {
    !line.citations.is_empty()
        && line.citations.iter().all(|c| semantic::citation_type(c).is_some())
        && !line.statement.contains("UNKNOWN")
        && !line.statement.contains("TODO")
}

fn count_items(body: &str) -> usize {
    markdown::bullet_items(body).len().max(
        body.lines()
            .filter(|l| !l.trim().is_empty() && !l.trim_start().starts_with("- "))
            .count()
            .min(1),
    )
}

/// Computes every metric over the corpus and checks the policy thresholds.
pub fn evaluate(
    policy: &Policy,
    corpus: &DocCorpus,
    spec: Option<&DocSpec>,
    facts: Option<&Facts>,
    registry: Option<&Registry>,
    archive_dir: &str,
) -> QualityReport {
    let mut report = QualityReport::default();
    let docs = quality_scope(corpus, spec, archive_dir);

    let mut statements: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    let mut claim_paths: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    let mut total = 0usize;
    let mut supported_count = 0usize;

    for rel in &docs {
        let Some(text) = corpus.get(rel) else {
            continue;
        };
        let lines = semantic::claim_lines(text);
        let mut ids: BTreeSet<String> = lines.iter().map(|l| l.claim_id.clone()).collect();
        if let Some(doc) = spec.and_then(|s| s.document(rel)) {
            ids.extend(
                doc.sections
                    .iter()
                    .flat_map(|s| s.claims.iter().map(|c| c.claim_id.clone())),
            );
        }
        for id in &ids {
            total += 1;
            let for_id: Vec<&ClaimLine> = lines.iter().filter(|l| &l.claim_id == id).collect();
            if for_id.is_empty() {
                report.missing_claims.push(format!("{rel}#{id}"));
            } else if for_id.iter().any(|l| supported(l)) {
                supported_count += 1;
            }
        }
        for line in &lines {
            statements
                .entry(line.claim_id.clone())
                .or_default()
                .insert(line.statement.clone());
            claim_paths
                .entry(line.claim_id.clone())
                .or_default()
                .insert(rel.clone());
            if line.statement.contains("UNKNOWN") {
                report.metrics.unknown_claims += 1;
            }
            if line.statement.contains("TODO") {
                report.metrics.unresolved_todo += 1;
            }
            report
                .citation_issues
                .extend(citation_issues_for(rel, line, facts));
        }
        report.metrics.unresolved_todo += markdown::prose_lines(text)
            .iter()
            .filter(|l| l.contains("TODO(claim:"))
            .count();
    }

    for (claim_id, set) in statements {
        if set.len() > 1 {
            report.conflicts.push(ClaimConflict {
                paths: claim_paths
                    .remove(&claim_id)
                    .map(|p| p.into_iter().collect())
                    .unwrap_or_default(),
                claim_id,
                statements: set.into_iter().collect(),
            });
        }
    }

    let m = &mut report.metrics;
    m.total_claims = total;
    m.supported_claims = supported_count;
    m.evidence_coverage = if total == 0 {
        1.0
    } else {
        supported_count as f64 / total as f64
    };
    m.conflicts = report.conflicts.len();
    m.citation_issues = report.citation_issues.len();
    m.structured_section_completeness = structured_completeness(corpus, registry);
    let (slots, next_steps, over_budget) = progressive_metrics(policy, corpus, &docs);
    m.progressive_slot_completeness = slots;
    m.next_step_presence = next_steps;
    m.section_verbosity_over_budget = over_budget;

    report.failed_checks = failed_checks(policy, &report.metrics);
    report
}

/// Average share of structured headings across migrated legacy blocks.
fn structured_completeness(corpus: &DocCorpus, registry: Option<&Registry>) -> f64 {
    let Some(registry) = registry else {
        return 1.0;
    };
    let ratios: Vec<f64> = registry
        .entries
        .values()
        .filter(|e| matches!(e.status, LegacyStatus::Migrated | LegacyStatus::Archived))
        .filter_map(|e| {
            let target = e.target_path.as_deref()?;
            let block = corpus.get(target).and_then(|t| legacy::block_for(t, &e.source_path));
            Some(block.map(legacy::structured_presence).unwrap_or(0.0))
        })
        .collect();
    if ratios.is_empty() {
        1.0
    } else {
        ratios.iter().sum::<f64>() / ratios.len() as f64
    }
}

fn progressive_metrics(policy: &Policy, corpus: &DocCorpus, docs: &[String]) -> (f64, f64, usize) {
    let settings = &policy.progressive_disclosure;
    if !settings.enabled || settings.required_slots.is_empty() {
        return (1.0, 1.0, 0);
    }
    let scoped: Vec<&String> = docs
        .iter()
        .filter(|d| paths::matches_any(&settings.scope_globs, d))
        .collect();
    if scoped.is_empty() {
        return (1.0, 1.0, 0);
    }
    let mut slot_hits = 0usize;
    let mut next_step_docs = 0usize;
    let mut over_budget = 0usize;
    for rel in &scoped {
        let Some(text) = corpus.get(rel) else {
            continue;
        };
        let missing = semantic::missing_slots(text, &settings.required_slots);
        slot_hits += settings.required_slots.len() - missing.len();
        let body = |slot: &str| {
            semantic::slot_heading(slot)
                .and_then(|h| markdown::section_body(text, h))
                .unwrap_or_default()
        };
        let next = body("next_steps");
        if !next.trim().is_empty() {
            next_step_docs += 1;
        }
        let summary = body("summary");
        if summary.chars().count() > settings.summary_max_chars
            || count_items(&body("key_facts")) > settings.max_key_facts
            || count_items(&next) > settings.max_next_steps
        {
            over_budget += 1;
        }
    }
    let slots_total = scoped.len() * settings.required_slots.len();
    (
        slot_hits as f64 / slots_total as f64,
        next_step_docs as f64 / scoped.len() as f64,
        over_budget,
    )
}

fn failed_checks(policy: &Policy, m: &QualityMetrics) -> Vec<String> {
    let gates = &policy.doc_quality_gates;
    if !gates.enabled {
        return Vec::new();
    }
    let mut failed = Vec::new();
    if m.evidence_coverage < gates.min_evidence_coverage {
        failed.push(format!(
            "evidence_coverage {:.2} < {:.2}",
            m.evidence_coverage, gates.min_evidence_coverage
        ));
    }
    if m.conflicts > gates.max_conflicts {
        failed.push(format!("conflicts {} > {}", m.conflicts, gates.max_conflicts));
    }
    if m.unknown_claims > gates.max_unknown_claims {
        failed.push(format!("unknown_claims {} > {}", m.unknown_claims, gates.max_unknown_claims));
    }
    if m.unresolved_todo > gates.max_unresolved_todo {
        failed.push(format!("unresolved_todo {} > {}", m.unresolved_todo, gates.max_unresolved_todo));
    }
    if m.citation_issues > gates.max_citation_issues {
        failed.push(format!("citation_issues {} > {}", m.citation_issues, gates.max_citation_issues));
    }
    if m.structured_section_completeness < gates.min_structured_section_completeness {
        failed.push(format!(
            "structured_section_completeness {:.2} < {:.2}",
            m.structured_section_completeness, gates.min_structured_section_completeness
        ));
    }
    if policy.progressive_disclosure.enabled {
        if m.progressive_slot_completeness < gates.min_progressive_slot_completeness {
            failed.push(format!(
                "progressive_slot_completeness {:.2} < {:.2}",
                m.progressive_slot_completeness, gates.min_progressive_slot_completeness
            ));
        }
        if m.next_step_presence < gates.min_next_step_presence {
            failed.push(format!(
                "next_step_presence {:.2} < {:.2}",
                m.next_step_presence, gates.min_next_step_presence
            ));
        }
        if m.section_verbosity_over_budget > gates.max_section_verbosity_over_budget {
            failed.push(format!(
                "section_verbosity_over_budget {} > {}",
                m.section_verbosity_over_budget, gates.max_section_verbosity_over_budget
            ));
        }
    }
    failed
}
