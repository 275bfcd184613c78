//! Semantic runtime entries: validating parser, matcher and quality grader.
//!
//! # For AI Agents
//!
//! - **The core never generates semantic content**: it only consumes the runtime report
//!   an invoking agent wrote to `semantic_generation.runtime_report_path`.
//! - **Entries are typed or rejected**: a raw entry either parses into a `RuntimeEntry`
//!   with a closed `Selector`, or it is rejected with a reason. Nothing half-trusted.
//! - **Matching precedence**: claim > section > action type > path only. Ties at one
//!   level go to the entry that appears first in the report. An entry is consumed at
//!   most once per run.
//! - **Grades are ephemeral**: recomputed per action, never persisted as truth.

use crate::core::action::{Action, ActionPayload, ActionType};
use crate::core::corpus::DocCorpus;
use crate::core::error::DocsorError;
use crate::core::paths;
use crate::core::policy::{CGradeDecision, Policy, SemanticMode, SemanticSettings};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use std::sync::LazyLock;
use tracing::{debug, warn};

pub const CITATION_SCHEME: &str = "evidence://";

static CLAIM_LINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*-\s*CLAIM\(claim:([^)]+)\):\s*(.*?)\s*(?:\(citations:\s*([^)]*)\))?\s*$").unwrap()
});

/// Failure codes shared by the grader, the structural gate and the reports.
pub mod codes {
    pub const RUNTIME_STATUS_NOT_OK: &str = "runtime_status_not_ok";
    pub const MISSING_STATEMENT: &str = "missing_statement";
    pub const MISSING_CONTENT: &str = "missing_content";
    pub const MISSING_CITATIONS: &str = "missing_citations";
    pub const INVALID_CITATION_TOKEN: &str = "invalid_citation_token";
    pub const CITATION_PREFIX_NOT_ALLOWED: &str = "citation_prefix_not_allowed";
    pub const MISSING_REQUIRED_CITATIONS: &str = "missing_required_citations";
    pub const SUMMARY_OVER_BUDGET: &str = "summary_over_budget";
    pub const KEY_FACTS_OVER_BUDGET: &str = "key_facts_over_budget";
    pub const NEXT_STEPS_OVER_BUDGET: &str = "next_steps_over_budget";
    pub const CLAIM_CONFLICT: &str = "claim_conflict";
    pub const MISSING_NAVIGATION_TARGETS: &str = "missing_navigation_targets";
    pub const MISSING_DECLARED_NAVIGATION_TARGETS: &str = "missing_declared_navigation_targets";
    pub const MISSING_SOURCE_PATHS: &str = "missing_source_paths";
    pub const MISSING_DECLARED_SOURCES: &str = "missing_declared_sources";
    pub const MISSING_SPLIT_OUTPUTS: &str = "missing_split_outputs";
    pub const MISSING_DECLARED_SPLIT_TARGETS: &str = "missing_declared_split_targets";
    pub const INVALID_JSON_CONTENT: &str = "invalid_json_content";

    pub fn missing_slot(slot: &str) -> String {
        format!("missing_slot_{slot}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Grade {
    A,
    B,
    C,
    D,
}

impl Grade {
    /// True when `self` is at least as good as `floor`.
    pub fn meets(self, floor: Grade) -> bool {
        self <= floor
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Grade::A => "A",
            Grade::B => "B",
            Grade::C => "C",
            Grade::D => "D",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    Ok,
    ManualReview,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Slots {
    pub summary: String,
    pub key_facts: Vec<String>,
    pub next_steps: Vec<String>,
}

impl Slots {
    pub fn has(&self, slot: &str) -> bool {
        match slot {
            "summary" => !self.summary.trim().is_empty(),
            "key_facts" => self.key_facts.iter().any(|f| !f.trim().is_empty()),
            "next_steps" => self.next_steps.iter().any(|f| !f.trim().is_empty()),
            _ => false,
        }
    }
}

/// Heading a progressive-disclosure slot is rendered under.
pub fn slot_heading(slot: &str) -> Option<&'static str> {
    match slot {
        "summary" => Some("### Summary"),
        "key_facts" => Some("### Key Facts"),
        "next_steps" => Some("### Next Steps"),
        _ => None,
    }
}

/// Required slots whose heading is absent from `text` or has an empty body.
pub fn missing_slots(text: &str, required: &[String]) -> Vec<String> {
    required
        .iter()
        .filter(|slot| {
            slot_heading(slot).is_none_or(|h| {
                crate::core::markdown::section_body(text, h).is_none_or(|b| b.trim().is_empty())
            })
        })
        .cloned()
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SplitOutput {
    pub path: String,
    pub content: String,
    pub title: Option<String>,
    pub source_paths: Vec<String>,
}

/// Which actions an entry may answer. Fields that are present must agree with the action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "selector", rename_all = "snake_case")]
pub enum Selector {
    PathOnly,
    ActionType {
        action_type: ActionType,
    },
    Section {
        action_type: Option<ActionType>,
        section_id: String,
    },
    Claim {
        action_type: Option<ActionType>,
        section_id: Option<String>,
        claim_id: String,
    },
}

impl Selector {
    pub fn specificity(&self) -> u8 {
        match self {
            Selector::PathOnly => 0,
            Selector::ActionType { .. } => 1,
            Selector::Section { .. } => 2,
            Selector::Claim { .. } => 3,
        }
    }

    fn action_type(&self) -> Option<ActionType> {
        match self {
            Selector::PathOnly => None,
            Selector::ActionType { action_type } => Some(*action_type),
            Selector::Section { action_type, .. } | Selector::Claim { action_type, .. } => *action_type,
        }
    }

    pub fn admits(&self, action: &Action) -> bool {
        if let Some(t) = self.action_type() {
            if t != action.action_type {
                return false;
            }
        }
        match self {
            Selector::PathOnly | Selector::ActionType { .. } => true,
            Selector::Section { section_id, .. } => action.section_id.as_deref() == Some(section_id),
            Selector::Claim {
                section_id,
                claim_id,
                ..
            } => {
                action.claim_id.as_deref() == Some(claim_id)
                    && section_id
                        .as_ref()
                        .is_none_or(|s| action.section_id.as_deref() == Some(s))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuntimeEntry {
    pub index: usize,
    pub entry_id: String,
    pub path: String,
    pub selector: Selector,
    pub status: EntryStatus,
    pub content: Option<String>,
    pub statement: Option<String>,
    pub slots: Option<Slots>,
    pub split_outputs: Vec<SplitOutput>,
    pub citations: Vec<String>,
    pub risk_notes: Vec<String>,
    pub source_paths: Vec<String>,
    pub target_paths: Vec<String>,
    pub index_links: Vec<String>,
    pub evidence_map: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct RawEntry {
    entry_id: Option<String>,
    path: Option<String>,
    doc_path: Option<String>,
    action_type: Option<String>,
    section_id: Option<String>,
    claim_id: Option<String>,
    status: Option<String>,
    content: Option<String>,
    statement: Option<String>,
    slots: Option<Slots>,
    split_outputs: Vec<SplitOutput>,
    citations: Vec<String>,
    risk_notes: Vec<String>,
    source_paths: Vec<String>,
    target_paths: Vec<String>,
    index_links: Vec<String>,
    evidence_map: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rejection {
    pub index: usize,
    pub entry_id: String,
    pub reason: String,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// Parses one raw entry. `index` is its position in the report.
pub fn parse_entry(index: usize, raw: &Value, warnings: &mut Vec<String>) -> Result<RuntimeEntry, Rejection> {
    let fallback_id = format!("runtime-{index:04}");
    let reject = |entry_id: &str, reason: &str| Rejection {
        index,
        entry_id: entry_id.to_string(),
        reason: reason.to_string(),
    };
    if !raw.is_object() {
        return Err(reject(&fallback_id, "entry_not_object"));
    }
    let entry: RawEntry = serde_json::from_value(raw.clone())
        .map_err(|e| reject(&fallback_id, &format!("malformed_entry: {e}")))?;
    let entry_id = non_empty(entry.entry_id).unwrap_or(fallback_id);

    let Some(path) = non_empty(entry.path).or(non_empty(entry.doc_path)) else {
        return Err(reject(&entry_id, "missing_path"));
    };
    let path = paths::normalize_rel(&path);
    if !paths::is_safe_rel(&path) {
        return Err(reject(&entry_id, "unsafe_path"));
    }

    let action_type = match non_empty(entry.action_type) {
        None => None,
        Some(raw_type) => match ActionType::parse(&raw_type) {
            Some(t) => Some(t),
            None => return Err(reject(&entry_id, "unknown_action_type")),
        },
    };
    let section_id = non_empty(entry.section_id);
    let claim_id = non_empty(entry.claim_id);
    let selector = match (claim_id, section_id, action_type) {
        (Some(claim_id), section_id, action_type) => Selector::Claim {
            action_type,
            section_id,
            claim_id,
        },
        (None, Some(section_id), action_type) => Selector::Section {
            action_type,
            section_id,
        },
        (None, None, Some(action_type)) => Selector::ActionType { action_type },
        (None, None, None) => Selector::PathOnly,
    };

    let status = match non_empty(entry.status).as_deref() {
        None | Some("ok") => EntryStatus::Ok,
        Some("manual_review") => EntryStatus::ManualReview,
        Some(other) => {
            warnings.push(format!(
                "entry {entry_id}: unknown status {other:?} treated as manual_review"
            ));
            EntryStatus::ManualReview
        }
    };

    let content = non_empty(entry.content);
    let statement = non_empty(entry.statement);
    let slots = entry.slots.filter(|s| s.has("summary") || s.has("key_facts") || s.has("next_steps"));
    let split_outputs: Vec<SplitOutput> = entry
        .split_outputs
        .into_iter()
        .filter(|o| !o.path.trim().is_empty())
        .map(|mut o| {
            o.path = paths::normalize_rel(&o.path);
            o
        })
        .collect();
    if content.is_none() && statement.is_none() && slots.is_none() && split_outputs.is_empty() {
        return Err(reject(&entry_id, codes::MISSING_CONTENT));
    }
    if split_outputs.iter().any(|o| !paths::is_safe_rel(&o.path)) {
        return Err(reject(&entry_id, "unsafe_split_output_path"));
    }

    let normalize_all = |v: Vec<String>| -> Vec<String> {
        v.iter()
            .map(|p| paths::normalize_rel(p))
            .filter(|p| !p.is_empty())
            .collect()
    };

    Ok(RuntimeEntry {
        index,
        entry_id,
        path,
        selector,
        status,
        content,
        statement,
        slots,
        split_outputs,
        citations: entry
            .citations
            .into_iter()
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .collect(),
        risk_notes: entry.risk_notes,
        source_paths: normalize_all(entry.source_paths),
        target_paths: normalize_all(entry.target_paths),
        index_links: entry.index_links,
        evidence_map: entry.evidence_map,
    })
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RuntimeCatalog {
    pub version: Option<u64>,
    pub entries: Vec<RuntimeEntry>,
    pub rejected: Vec<Rejection>,
    pub warnings: Vec<String>,
}

pub fn parse_report(value: &Value) -> RuntimeCatalog {
    let mut catalog = RuntimeCatalog {
        version: value.get("version").and_then(Value::as_u64),
        ..RuntimeCatalog::default()
    };
    let Some(raw_entries) = value.get("entries").and_then(Value::as_array) else {
        catalog
            .warnings
            .push("runtime report has no entries array".to_string());
        return catalog;
    };
    for (index, raw) in raw_entries.iter().enumerate() {
        match parse_entry(index, raw, &mut catalog.warnings) {
            Ok(entry) => catalog.entries.push(entry),
            Err(rejection) => {
                debug!(entry = %rejection.entry_id, reason = %rejection.reason, "runtime entry rejected");
                catalog.rejected.push(rejection);
            }
        }
    }
    catalog
}

/// One run's view of the runtime report. `catalog == None` means the report is
/// unavailable, which is an expected outcome, not an error.
#[derive(Debug, Clone, Default)]
pub struct RuntimeSession {
    catalog: Option<RuntimeCatalog>,
    consumed: BTreeSet<usize>,
    pub error: Option<String>,
}

impl RuntimeSession {
    pub fn unavailable(error: Option<String>) -> Self {
        Self {
            catalog: None,
            consumed: BTreeSet::new(),
            error,
        }
    }

    pub fn from_catalog(catalog: RuntimeCatalog) -> Self {
        Self {
            catalog: Some(catalog),
            consumed: BTreeSet::new(),
            error: None,
        }
    }

    pub fn load(root: &Path, settings: &SemanticSettings) -> Result<Self, DocsorError> {
        let path = root.join(&settings.runtime_report_path);
        if !path.exists() {
            return Ok(Self::unavailable(None));
        }
        let text = fs::read_to_string(&path).map_err(DocsorError::IoError)?;
        match serde_json::from_str::<Value>(&text) {
            Ok(value) if value.is_object() => {
                let catalog = parse_report(&value);
                for w in &catalog.warnings {
                    warn!("{w}");
                }
                Ok(Self::from_catalog(catalog))
            }
            Ok(_) => Ok(Self::unavailable(Some("runtime report root must be an object".into()))),
            Err(e) => {
                warn!(error = %e, "runtime report unreadable; treating as unavailable");
                Ok(Self::unavailable(Some(format!("invalid runtime report: {e}"))))
            }
        }
    }

    pub fn is_available(&self) -> bool {
        self.catalog.is_some()
    }

    pub fn catalog(&self) -> Option<&RuntimeCatalog> {
        self.catalog.as_ref()
    }

    /// Best unconsumed entry for `action`.
    pub fn select(&self, action: &Action) -> Option<&RuntimeEntry> {
        let catalog = self.catalog.as_ref()?;
        select(
            catalog
                .entries
                .iter()
                .filter(|e| !self.consumed.contains(&e.index)),
            action,
        )
    }

    pub fn mark_consumed(&mut self, entry: &RuntimeEntry) {
        self.consumed.insert(entry.index);
    }

    pub fn consumed_count(&self) -> usize {
        self.consumed.len()
    }
}

/// Highest-specificity admitted entry for `action`; first-registered wins within a level.
pub fn select<'a, I>(entries: I, action: &Action) -> Option<&'a RuntimeEntry>
where
    I: IntoIterator<Item = &'a RuntimeEntry>,
{
    let mut best: Option<&RuntimeEntry> = None;
    for entry in entries {
        if entry.path != action.path || !entry.selector.admits(action) {
            continue;
        }
        match best {
            Some(current) if entry.selector.specificity() <= current.selector.specificity() => {}
            _ => best = Some(entry),
        }
    }
    best
}

// ===== Citations and claims =====

pub fn citation_type(token: &str) -> Option<&str> {
    let rest = token.trim().strip_prefix(CITATION_SCHEME)?;
    let valid = !rest.is_empty()
        && rest
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    valid.then_some(rest)
}

pub fn citation_token(evidence_type: &str) -> String {
    format!("{CITATION_SCHEME}{evidence_type}")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimLine {
    pub claim_id: String,
    pub statement: String,
    pub citations: Vec<String>,
}

pub fn parse_claim_line(line: &str) -> Option<ClaimLine> {
    let caps = CLAIM_LINE_RE.captures(line)?;
    let citations = caps
        .get(3)
        .map(|m| {
            m.as_str()
                .split(',')
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty())
                .collect()
        })
        .unwrap_or_default();
    Some(ClaimLine {
        claim_id: caps[1].trim().to_string(),
        statement: caps[2].trim().to_string(),
        citations,
    })
}

pub fn claim_lines(text: &str) -> Vec<ClaimLine> {
    text.lines().filter_map(parse_claim_line).collect()
}

pub fn render_claim_line(claim_id: &str, statement: &str, citations: &[String]) -> String {
    let statement = statement.split_whitespace().collect::<Vec<_>>().join(" ");
    if citations.is_empty() {
        format!("- CLAIM(claim:{claim_id}): {statement}")
    } else {
        format!("- CLAIM(claim:{claim_id}): {statement} (citations: {})", citations.join(", "))
    }
}

// ===== Grading =====

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Consume,
    Fallback,
    ManualReview,
    Block,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Finding {
    pub code: String,
    pub deduction: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QualityResult {
    pub grade: Grade,
    pub score: u32,
    pub findings: Vec<Finding>,
    pub decision: Decision,
}

impl QualityResult {
    pub fn codes(&self) -> Vec<String> {
        self.findings.iter().map(|f| f.code.clone()).collect()
    }
}

fn wants_statement(action: &Action) -> bool {
    matches!(action.action_type, ActionType::FillClaim | ActionType::QualityRepair)
        && action.claim_id.is_some()
}

fn wants_slots(action: &Action) -> bool {
    action.action_type == ActionType::SemanticRewrite
}

/// Statements for `claim_id` in documents other than `except`.
fn conflicting_statements(corpus: &DocCorpus, except: &str, claim_id: &str, statement: &str) -> bool {
    corpus
        .iter()
        .filter(|(p, _)| p.as_str() != except)
        .flat_map(|(_, text)| claim_lines(text))
        .any(|c| c.claim_id == claim_id && c.statement != statement)
}

pub fn grade(entry: &RuntimeEntry, action: &Action, policy: &Policy, corpus: &DocCorpus) -> QualityResult {
    let settings = &policy.semantic_generation;
    let table = &settings.input_quality.grading;
    let weights = &table.deductions;
    let progressive = &policy.progressive_disclosure;
    let mut findings: Vec<Finding> = Vec::new();
    let mut push = |code: &str, deduction: u32| {
        if !findings.iter().any(|f| f.code == code) {
            findings.push(Finding {
                code: code.to_string(),
                deduction,
            });
        }
    };

    if entry.status != EntryStatus::Ok {
        push(codes::RUNTIME_STATUS_NOT_OK, weights.runtime_status_not_ok);
    }

    let statement = entry.statement.as_ref().or(entry.content.as_ref());
    if wants_statement(action) && statement.is_none() {
        push(codes::MISSING_STATEMENT, weights.missing_statement);
    }
    let has_body = entry.content.is_some()
        || entry.slots.is_some()
        || (wants_statement(action) && statement.is_some())
        || (matches!(action.action_type, ActionType::SplitDoc) && !entry.split_outputs.is_empty());
    if !wants_statement(action) && !has_body {
        push(codes::MISSING_CONTENT, weights.missing_content);
    }

    if wants_slots(action) || entry.slots.is_some() {
        let slots = entry.slots.clone().unwrap_or_default();
        for slot in &progressive.required_slots {
            if !slots.has(slot) {
                push(&codes::missing_slot(slot), weights.missing_slot);
            }
        }
        if slots.summary.chars().count() > progressive.summary_max_chars {
            push(codes::SUMMARY_OVER_BUDGET, weights.slot_over_budget);
        }
        if slots.key_facts.len() > progressive.max_key_facts {
            push(codes::KEY_FACTS_OVER_BUDGET, weights.slot_over_budget);
        }
        if slots.next_steps.len() > progressive.max_next_steps {
            push(codes::NEXT_STEPS_OVER_BUDGET, weights.slot_over_budget);
        }
    }

    if entry.citations.is_empty() {
        push(codes::MISSING_CITATIONS, weights.missing_citations);
    }
    let mut cited_types = Vec::new();
    for token in &entry.citations {
        match citation_type(token) {
            None => push(codes::INVALID_CITATION_TOKEN, weights.invalid_citation_token),
            Some(t) => {
                if !settings.required_evidence_prefixes.is_empty()
                    && !settings.required_evidence_prefixes.iter().any(|p| t.starts_with(p.as_str()))
                {
                    push(codes::CITATION_PREFIX_NOT_ALLOWED, weights.citation_prefix_not_allowed);
                }
                cited_types.push(t.to_string());
            }
        }
    }
    let required = action.required_evidence_types();
    if !required.is_empty() && !required.iter().all(|r| cited_types.contains(r)) {
        push(codes::MISSING_REQUIRED_CITATIONS, weights.missing_required_citations);
    }

    if let (Some(claim_id), Some(statement)) = (action.claim_id.as_deref(), statement) {
        let normalized = statement.split_whitespace().collect::<Vec<_>>().join(" ");
        if conflicting_statements(corpus, &action.path, claim_id, &normalized) {
            push(codes::CLAIM_CONFLICT, weights.claim_conflict);
        }
    }

    let total: u32 = findings.iter().map(|f| f.deduction).sum();
    let score = table.baseline.saturating_sub(total);
    let grade = table.grade_for(score);
    let quality = &settings.input_quality;
    let decision = if !quality.enabled {
        match entry.status {
            EntryStatus::Ok => Decision::Consume,
            EntryStatus::ManualReview => Decision::ManualReview,
        }
    } else if grade.meets(quality.min_consumable_grade) {
        Decision::Consume
    } else if grade == Grade::D {
        Decision::Block
    } else {
        match quality.c_grade_decision {
            CGradeDecision::Fallback => Decision::Fallback,
            CGradeDecision::ManualReview => Decision::ManualReview,
        }
    };

    QualityResult {
        grade,
        score,
        findings,
        decision,
    }
}

// ===== Fallback policy =====

/// Why a semantic action did not consume runtime content. Declared from highest to
/// lowest priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackReason {
    RuntimeQualityManualReview,
    RuntimeQualityGradeD,
    RuntimeQualityGradeC,
    PathDenied,
    RuntimeUnavailable,
    RuntimeEntryNotFound,
    RuntimeGateFailed,
}

impl FallbackReason {
    pub fn as_str(self) -> &'static str {
        match self {
            FallbackReason::RuntimeQualityManualReview => "runtime_quality_manual_review",
            FallbackReason::RuntimeQualityGradeD => "runtime_quality_grade_d",
            FallbackReason::RuntimeQualityGradeC => "runtime_quality_grade_c",
            FallbackReason::PathDenied => "path_denied",
            FallbackReason::RuntimeUnavailable => "runtime_unavailable",
            FallbackReason::RuntimeEntryNotFound => "runtime_entry_not_found",
            FallbackReason::RuntimeGateFailed => "runtime_gate_failed",
        }
    }

    pub fn from_decision(decision: Decision, grade: Grade) -> Option<FallbackReason> {
        match decision {
            Decision::Consume => None,
            Decision::Block => Some(FallbackReason::RuntimeQualityGradeD),
            Decision::ManualReview => Some(FallbackReason::RuntimeQualityManualReview),
            Decision::Fallback if grade == Grade::D => Some(FallbackReason::RuntimeQualityGradeD),
            Decision::Fallback => Some(FallbackReason::RuntimeQualityGradeC),
        }
    }

    /// Highest-priority reason among `reasons`.
    pub fn dominant<I: IntoIterator<Item = FallbackReason>>(reasons: I) -> Option<FallbackReason> {
        reasons.into_iter().min()
    }
}

/// Whether the deterministic template may stand in for runtime content.
pub fn fallback_allowed(reason: FallbackReason, settings: &SemanticSettings) -> bool {
    if settings.mode == SemanticMode::AgentStrict || !settings.allow_fallback_template {
        return false;
    }
    match reason {
        FallbackReason::RuntimeQualityGradeD | FallbackReason::RuntimeQualityManualReview => false,
        FallbackReason::RuntimeQualityGradeC => {
            settings.input_quality.c_grade_decision == CGradeDecision::Fallback
        }
        FallbackReason::PathDenied
        | FallbackReason::RuntimeUnavailable
        | FallbackReason::RuntimeEntryNotFound
        | FallbackReason::RuntimeGateFailed => true,
    }
}

/// Semantic switch for an action type; `None` when the type never consumes runtime
/// content.
pub fn action_enabled(settings: &SemanticSettings, action_type: ActionType) -> Option<bool> {
    let a = &settings.actions;
    let enabled = match action_type {
        ActionType::UpdateSection => a.update_section,
        ActionType::FillClaim => a.fill_claim,
        ActionType::SemanticRewrite => a.semantic_rewrite,
        ActionType::MigrateLegacy => a.migrate_legacy,
        ActionType::MergeDocs => a.merge_docs,
        ActionType::SplitDoc => a.split_doc,
        ActionType::NavigationRepair => a.navigation_repair,
        ActionType::QualityRepair => a.quality_repair,
        ActionType::RefreshEvidence => a.refresh_evidence,
        _ => return None,
    };
    Some(enabled)
}

pub fn path_denied(settings: &SemanticSettings, action: &Action) -> bool {
    paths::matches_any(&settings.deny_paths, &action.path)
}

/// Required evidence types declared on a fill-claim payload that the facts can back.
pub fn available_for(action: &Action) -> Vec<String> {
    match &action.payload {
        Some(ActionPayload::Claim {
            required_evidence_types,
            available_evidence_types,
            ..
        }) => required_evidence_types
            .iter()
            .filter(|t| available_evidence_types.contains(t))
            .cloned()
            .collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::action::{Risk, TargetKind};
    use serde_json::json;

    fn action(action_type: ActionType, section: Option<&str>, claim: Option<&str>) -> Action {
        Action {
            id: "A001".into(),
            action_type,
            kind: TargetKind::File,
            path: "docs/runbook.md".into(),
            risk: Risk::Medium,
            reason: "test".into(),
            evidence: vec!["test".into()],
            section_id: section.map(str::to_string),
            section_heading: None,
            claim_id: claim.map(str::to_string),
            payload: None,
        }
    }

    fn catalog(entries: serde_json::Value) -> RuntimeCatalog {
        parse_report(&json!({"version": 1, "entries": entries}))
    }

    #[test]
    fn test_parse_rejects_entries_without_content_or_path() {
        let c = catalog(json!([
            {"path": "docs/a.md"},
            {"content": "x"},
            {"path": "docs/a.md", "action_type": "add", "content": "x"},
            {"doc_path": "docs/a.md", "status": "weird", "content": "x"}
        ]));
        let reasons: Vec<_> = c.rejected.iter().map(|r| r.reason.as_str()).collect();
        assert_eq!(reasons, vec!["missing_content", "missing_path", "unknown_action_type"]);
        assert_eq!(c.entries.len(), 1);
        assert_eq!(c.entries[0].entry_id, "runtime-0003");
        assert_eq!(c.entries[0].status, EntryStatus::ManualReview);
        assert_eq!(c.warnings.len(), 1);
    }

    #[test]
    fn test_select_prefers_most_specific_then_first_registered() {
        let c = catalog(json!([
            {"entry_id": "path", "path": "docs/runbook.md", "content": "p"},
            {"entry_id": "type", "path": "docs/runbook.md", "action_type": "fill_claim", "content": "t"},
            {"entry_id": "section-1", "path": "docs/runbook.md", "section_id": "ops", "content": "s1"},
            {"entry_id": "section-2", "path": "docs/runbook.md", "section_id": "ops", "content": "s2"},
            {"entry_id": "claim", "path": "docs/runbook.md", "claim_id": "c1", "statement": "c"},
            {"entry_id": "wrong-claim", "path": "docs/runbook.md", "claim_id": "c2", "statement": "c"}
        ]));
        let pick = |a: &Action| select(c.entries.iter(), a).map(|e| e.entry_id.clone());

        assert_eq!(pick(&action(ActionType::FillClaim, Some("ops"), Some("c1"))), Some("claim".into()));
        assert_eq!(pick(&action(ActionType::FillClaim, Some("ops"), Some("c9"))), Some("section-1".into()));
        assert_eq!(pick(&action(ActionType::FillClaim, None, None)), Some("type".into()));
        assert_eq!(pick(&action(ActionType::UpdateSection, None, None)), Some("path".into()));
    }

    #[test]
    fn test_session_consumes_entries_once() {
        let c = catalog(json!([
            {"entry_id": "one", "path": "docs/runbook.md", "content": "a"},
            {"entry_id": "two", "path": "docs/runbook.md", "content": "b"}
        ]));
        let mut session = RuntimeSession::from_catalog(c);
        let a = action(ActionType::UpdateSection, Some("x"), None);
        let first = session.select(&a).cloned().unwrap();
        assert_eq!(first.entry_id, "one");
        session.mark_consumed(&first);
        assert_eq!(session.select(&a).unwrap().entry_id, "two");
    }

    #[test]
    fn test_grade_manual_review_with_citations_is_c() {
        let c = catalog(json!([{
            "path": "docs/runbook.md", "action_type": "update_section", "section_id": "checks",
            "status": "manual_review",
            "slots": {"summary": "audit first", "key_facts": ["keep evidence"], "next_steps": ["run validate"]},
            "citations": ["evidence://runbook.dev_commands"]
        }]));
        let policy = Policy::default();
        let result = grade(&c.entries[0], &action(ActionType::UpdateSection, Some("checks"), None), &policy, &DocCorpus::default());
        assert_eq!(result.grade, Grade::C);
        assert_eq!(result.decision, Decision::Fallback);
        assert_eq!(
            FallbackReason::from_decision(result.decision, result.grade),
            Some(FallbackReason::RuntimeQualityGradeC)
        );
    }

    #[test]
    fn test_grade_manual_review_without_citations_is_blocked() {
        let c = catalog(json!([{
            "path": "docs/runbook.md", "status": "manual_review",
            "slots": {"summary": "s", "key_facts": ["k"], "next_steps": ["n"]},
            "citations": []
        }]));
        let result = grade(&c.entries[0], &action(ActionType::UpdateSection, Some("x"), None), &Policy::default(), &DocCorpus::default());
        assert_eq!(result.grade, Grade::D);
        assert_eq!(result.decision, Decision::Block);
        assert!(result.codes().contains(&"missing_citations".to_string()));
    }

    #[test]
    fn test_grade_fill_claim_requires_declared_evidence() {
        let c = catalog(json!([{
            "path": "docs/runbook.md", "claim_id": "c1",
            "statement": "Run make test.",
            "citations": ["evidence://repo_scan.files", "evidence://custom.thing", "not-a-token"]
        }]));
        let mut a = action(ActionType::FillClaim, Some("ops"), Some("c1"));
        a.payload = Some(ActionPayload::Claim {
            statement_template: String::new(),
            required_evidence_types: vec!["runbook.dev_commands".into()],
            available_evidence_types: vec!["runbook.dev_commands".into()],
            allow_unknown: false,
        });
        let result = grade(&c.entries[0], &a, &Policy::default(), &DocCorpus::default());
        let codes = result.codes();
        assert!(codes.contains(&"missing_required_citations".to_string()));
        assert!(codes.contains(&"citation_prefix_not_allowed".to_string()));
        assert!(codes.contains(&"invalid_citation_token".to_string()));
        assert_eq!(result.score, 100 - 20 - 10 - 15);
        assert_eq!(result.grade, Grade::C);
    }

    #[test]
    fn test_grade_detects_conflicting_claim_elsewhere() {
        let corpus = DocCorpus::from_docs([(
            "docs/other.md",
            "- CLAIM(claim:c1): Tests run with cargo. (citations: evidence://repo_scan.tests)\n",
        )]);
        let c = catalog(json!([{
            "path": "docs/runbook.md", "claim_id": "c1",
            "statement": "Tests run with make.",
            "citations": ["evidence://repo_scan.tests"]
        }]));
        let result = grade(&c.entries[0], &action(ActionType::FillClaim, None, Some("c1")), &Policy::default(), &corpus);
        assert!(result.codes().contains(&"claim_conflict".to_string()));
    }

    #[test]
    fn test_fallback_policy() {
        let mut settings = SemanticSettings::default();
        assert!(fallback_allowed(FallbackReason::RuntimeUnavailable, &settings));
        assert!(fallback_allowed(FallbackReason::RuntimeQualityGradeC, &settings));
        assert!(!fallback_allowed(FallbackReason::RuntimeQualityGradeD, &settings));
        assert!(!fallback_allowed(FallbackReason::RuntimeQualityManualReview, &settings));
        settings.mode = SemanticMode::AgentStrict;
        assert!(!fallback_allowed(FallbackReason::RuntimeUnavailable, &settings));
        assert_eq!(
            FallbackReason::dominant([FallbackReason::RuntimeGateFailed, FallbackReason::PathDenied]),
            Some(FallbackReason::PathDenied)
        );
    }

    #[test]
    fn test_claim_line_parsing() {
        let line = render_claim_line("c1", "Build  with make.", &["evidence://runbook.dev_commands".into()]);
        assert_eq!(line, "- CLAIM(claim:c1): Build with make. (citations: evidence://runbook.dev_commands)");
        let parsed = parse_claim_line(&line).unwrap();
        assert_eq!(parsed.claim_id, "c1");
        assert_eq!(parsed.statement, "Build with make.");
        assert_eq!(parsed.citations, vec!["evidence://runbook.dev_commands"]);
        assert_eq!(citation_type("evidence://repo_scan.files"), Some("repo_scan.files"));
        assert_eq!(citation_type("evidence://"), None);
    }
}
