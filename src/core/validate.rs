//! Validator: re-derives structural, freshness, drift, topology, quality and semantic
//! observability metrics from the working tree and applies pass/fail gates.
//!
//! # For AI Agents
//!
//! - **`docsor validate` MUST pass before documentation changes merge**
//! - **Validation is deterministic**: same tree, facts and apply report give the same report
//! - **Topology violations are hard failures** while the contract is enabled
//! - **Scoped runs never hide policy changes**: touching a high-risk file upgrades the
//!   run to full validation and records `upgrade_reason`
//!
//! # Gates
//!
//! - Structural (required paths, protected writes, duplicate section markers, links)
//! - Freshness (doc metadata review dates)
//! - Drift (actionable audit re-plan)
//! - Topology (orphans, unreachable docs, depth bound)
//! - Quality (evidence coverage, conflicts, TODO/UNKNOWN, slots)
//! - Semantic observability (runtime attempts without exemption)
//! - Legacy coverage (registry completeness, denylist)
//! - Exec-plan closeout (completed plans link their closeout)
//! - Agents (AGENTS.md headings, links, commands, index overlap) when generation is on

use crate::core::action::{ActionType, LegacyDecision};
use crate::core::agents::{self, AgentsMetrics};
use crate::core::apply::{self, SemanticObservability};
use crate::core::error::{DocsorError, marker_error};
use crate::core::facts::Facts;
use crate::core::legacy::{self, LegacyStatus};
use crate::core::plan::{self, PlanMode};
use crate::core::policy::SemanticMode;
use crate::core::quality::{self, QualityMetrics};
use crate::core::topology::{self, TopologyGraph, TopologyMetrics};
use crate::core::workspace::{self, Workspace};
use crate::core::{markdown, metadata, output, paths, time};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::{debug, info};

const EXEC_PLAN_ACTIVE_DIR: &str = "docs/exec-plans/active/";
const EXEC_PLAN_STATUS_KEY: &str = "exec-plan-status";
const EXEC_PLAN_CLOSEOUT_KEY: &str = "exec-plan-closeout";

/// Inputs a caller controls for one validation run.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidateRequest {
    /// Changed files for scoped validation; `None` validates the whole repository.
    pub scope_files: Option<Vec<String>>,
    pub fail_on_drift: bool,
    pub fail_on_freshness: bool,
    pub apply_report_path: String,
    /// Date review cycles are checked against; `None` means today.
    pub reference_date: Option<NaiveDate>,
}

impl Default for ValidateRequest {
    fn default() -> Self {
        Self {
            scope_files: None,
            fail_on_drift: false,
            fail_on_freshness: false,
            apply_report_path: workspace::APPLY_REPORT_PATH.to_string(),
            reference_date: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeMode {
    Full,
    Scoped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationScope {
    pub requested_mode: ScopeMode,
    pub effective_mode: ScopeMode,
    pub changed_files: Vec<String>,
    pub docs: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upgrade_reason: Option<String>,
}

impl ValidationScope {
    fn full(ws: &Workspace, requested_mode: ScopeMode, changed_files: Vec<String>, reason: Option<&str>) -> Self {
        Self {
            requested_mode,
            effective_mode: ScopeMode::Full,
            changed_files,
            docs: ws.corpus.scope_docs(&ws.manifest.archive_dir),
            upgrade_reason: reason.map(str::to_string),
        }
    }

    pub fn is_full(&self) -> bool {
        self.effective_mode == ScopeMode::Full
    }
}

/// Resolves the documents a run checks. Changed docs expand by inbound/outbound links
/// and topology neighbours; a high-risk change validates everything.
pub fn resolve_scope(ws: &Workspace, scope_files: Option<&[String]>) -> ValidationScope {
    let Some(files) = scope_files else {
        return ValidationScope::full(ws, ScopeMode::Full, Vec::new(), None);
    };
    let mut changed: Vec<String> = files
        .iter()
        .map(|f| paths::normalize_rel(f))
        .filter(|f| !f.is_empty())
        .collect();
    changed.sort();
    changed.dedup();
    if changed.is_empty() {
        return ValidationScope::full(ws, ScopeMode::Scoped, changed, Some("no_changed_files"));
    }
    let settings = &ws.policy.scoped_validation;
    if let Some(risky) = changed
        .iter()
        .find(|f| paths::matches_any(&settings.high_risk_patterns, f) || **f == ws.policy.doc_topology.path)
    {
        info!(file = %risky, "high-risk change; validating the full repository");
        return ValidationScope::full(ws, ScopeMode::Scoped, changed, Some("high_risk_file"));
    }

    let seeds: Vec<&String> = changed.iter().filter(|f| ws.corpus.contains(f)).collect();
    let mut docs: BTreeSet<String> = seeds.iter().map(|s| s.to_string()).collect();
    if settings.expand_links {
        for seed in &seeds {
            if let Some(text) = ws.corpus.get(seed) {
                for target in markdown::local_links(text) {
                    if let Some(resolved) = paths::resolve_link(seed, &target) {
                        if ws.corpus.contains(&resolved) {
                            docs.insert(resolved);
                        }
                    }
                }
            }
            for doc in ws.corpus.paths() {
                if topology::links_to(&ws.corpus, doc, seed) {
                    docs.insert(doc.clone());
                }
            }
        }
    }
    if settings.expand_topology && ws.policy.doc_topology.enabled {
        if let Some(graph) = ws.topology.as_ref().and_then(|c| TopologyGraph::build(c).ok()) {
            for seed in &seeds {
                docs.extend(graph.ancestors(seed).into_iter().map(str::to_string));
                docs.extend(graph.children_of(seed).into_iter().map(str::to_string));
            }
        }
    }
    debug!(changed = changed.len(), docs = docs.len(), "scope resolved");
    ValidationScope {
        requested_mode: ScopeMode::Scoped,
        effective_mode: ScopeMode::Scoped,
        changed_files: changed,
        docs: docs.into_iter().collect(),
        upgrade_reason: None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateStatus {
    Passed,
    Warned,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateOutcome {
    pub status: GateStatus,
    pub errors: usize,
    pub warnings: usize,
    /// Errors caused by unusable configuration rather than document state.
    #[serde(default)]
    pub config_errors: usize,
}

/// Gates whose failures a `repair` plan can act on.
pub const REPAIRABLE_GATES: &[&str] = &["freshness", "drift", "topology", "quality"];

/// Collects messages per gate; a gate with no message passes.
#[derive(Debug, Default)]
struct GateLedger {
    errors: Vec<String>,
    warnings: Vec<String>,
    gates: BTreeMap<String, GateOutcome>,
    current: String,
}

impl GateLedger {
    fn begin(&mut self, gate: &str) {
        debug!(gate, "gate started");
        self.current = gate.to_string();
        self.gates.insert(
            gate.to_string(),
            GateOutcome {
                status: GateStatus::Passed,
                errors: 0,
                warnings: 0,
                config_errors: 0,
            },
        );
    }

    fn outcome(&mut self) -> Option<&mut GateOutcome> {
        self.gates.get_mut(&self.current)
    }

    fn fail(&mut self, message: String) {
        if let Some(g) = self.outcome() {
            g.errors += 1;
            g.status = GateStatus::Failed;
        }
        self.errors.push(message);
    }

    fn fail_config(&mut self, message: String) {
        if let Some(g) = self.outcome() {
            g.config_errors += 1;
        }
        self.fail(message);
    }

    fn warn(&mut self, message: String) {
        if let Some(g) = self.outcome() {
            g.warnings += 1;
            if g.status == GateStatus::Passed {
                g.status = GateStatus::Warned;
            }
        }
        self.warnings.push(message);
    }

    /// Error when `hard`, warning otherwise.
    fn report(&mut self, hard: bool, message: String) {
        if hard {
            self.fail(message)
        } else {
            self.warn(message)
        }
    }

    fn skip(&mut self) {
        if let Some(g) = self.outcome() {
            g.status = GateStatus::Skipped;
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ValidationMetrics {
    pub errors: usize,
    pub warnings: usize,
    pub checked_docs: usize,
    pub checked_links: usize,
    pub broken_links: usize,
    pub duplicate_section_markers: usize,
    pub protected_writes: usize,
    pub metadata_checked_docs: usize,
    pub metadata_missing_fields: usize,
    pub metadata_invalid_fields: usize,
    pub metadata_stale_docs: usize,
    pub drift_action_count: usize,
    pub legacy_discovered_sources: usize,
    pub legacy_completed_sources: usize,
    pub legacy_unresolved_sources: usize,
    pub active_exec_plan_files: usize,
    pub completed_exec_plans: usize,
    pub missing_exec_plan_closeouts: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topology: Option<TopologyMetrics>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality: Option<QualityMetrics>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub semantic_observability: Option<SemanticObservability>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agents: Option<AgentsMetrics>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationReport {
    pub generated_at: String,
    pub root: String,
    pub passed: bool,
    pub fail_on_drift: bool,
    pub fail_on_freshness: bool,
    pub scope: ValidationScope,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub drift: Vec<String>,
    pub metrics: ValidationMetrics,
    pub gates: BTreeMap<String, GateOutcome>,
}

impl ValidationReport {
    /// True when some failed gate has a failure a `repair` plan could address.
    pub fn has_repairable_failure(&self) -> bool {
        self.gates.iter().any(|(name, g)| {
            g.status == GateStatus::Failed
                && REPAIRABLE_GATES.contains(&name.as_str())
                && g.errors > g.config_errors
        })
    }

    /// Condenses a failed run into one error: structural breakage first, then the other gates.
    pub fn failure(&self) -> Option<DocsorError> {
        if self.passed {
            return None;
        }
        let structural_failed = self
            .gates
            .get("structural")
            .is_some_and(|g| g.status == GateStatus::Failed);
        if structural_failed {
            return Some(DocsorError::StructuralViolation(output::preview_messages(
                &self.errors,
                2,
                110,
            )));
        }
        let failed: Vec<&str> = self
            .gates
            .iter()
            .filter(|(_, g)| g.status == GateStatus::Failed)
            .map(|(name, _)| name.as_str())
            .collect();
        Some(marker_error(
            "DOCSOR_GATES_FAILED",
            &format!("{} error(s)", self.errors.len()),
            Some(serde_json::json!({ "gates": failed })),
        ))
    }
}

pub fn save_validation_report(path: &Path, report: &ValidationReport) -> Result<(), DocsorError> {
    output::write_json(path, report)
}

struct Validator<'a> {
    ws: &'a Workspace,
    facts: &'a Facts,
    request: &'a ValidateRequest,
    scope: ValidationScope,
    ledger: GateLedger,
    metrics: ValidationMetrics,
    drift: Vec<String>,
}

/// Validates the repository at `root`. Malformed configuration is a `ConfigError`;
/// every gate failure is reported as a value.
pub fn validate(root: &Path, facts: &Facts, request: &ValidateRequest) -> Result<ValidationReport, DocsorError> {
    let ws = Workspace::load(root)?;
    validate_workspace(&ws, facts, request)
}

pub fn validate_workspace(
    ws: &Workspace,
    facts: &Facts,
    request: &ValidateRequest,
) -> Result<ValidationReport, DocsorError> {
    let scope = resolve_scope(ws, request.scope_files.as_deref());
    let mut v = Validator {
        ws,
        facts,
        request,
        metrics: ValidationMetrics {
            checked_docs: scope.docs.len(),
            ..ValidationMetrics::default()
        },
        scope,
        ledger: GateLedger::default(),
        drift: Vec::new(),
    };

    v.validate_structure();
    v.validate_freshness();
    v.validate_drift()?;
    v.validate_topology();
    v.validate_quality()?;
    v.validate_semantic_observability()?;
    v.validate_legacy_coverage()?;
    v.validate_exec_plan_closeout();
    v.validate_agents();

    let Validator {
        scope,
        ledger,
        mut metrics,
        drift,
        ..
    } = v;
    metrics.errors = ledger.errors.len();
    metrics.warnings = ledger.warnings.len();
    let passed = ledger.errors.is_empty();
    info!(
        passed,
        errors = metrics.errors,
        warnings = metrics.warnings,
        scope = ?scope.effective_mode,
        "validation finished"
    );
    if !passed {
        debug!(
            "validate: failures {}: {}",
            ledger.errors.len(),
            output::preview_messages(&ledger.errors, 2, 110)
        );
    }
    Ok(ValidationReport {
        generated_at: time::now_rfc3339(),
        root: ws.root.display().to_string(),
        passed,
        fail_on_drift: request.fail_on_drift,
        fail_on_freshness: request.fail_on_freshness,
        scope,
        errors: ledger.errors,
        warnings: ledger.warnings,
        drift,
        metrics,
        gates: ledger.gates,
    })
}

impl<'a> Validator<'a> {
    fn scoped_docs(&self) -> Vec<&'a str> {
        let ws: &'a Workspace = self.ws;
        self.scope
            .docs
            .iter()
            .filter_map(|d| ws.corpus.paths().find(|p| *p == d).map(String::as_str))
            .collect()
    }

    // ===== Structural =====

    fn validate_structure(&mut self) {
        let ws = self.ws;
        self.ledger.begin("structural");

        let required = &ws.manifest.required;
        if required.files.is_empty() && required.dirs.is_empty() {
            self.ledger.warn("manifest has no required files/dirs".to_string());
        }
        for rel in &required.files {
            if !ws.abs(rel).is_file() {
                self.ledger.fail(format!("missing required file: {rel}"));
            }
        }
        for rel in &required.dirs {
            if !ws.abs(rel).is_dir() {
                self.ledger.fail(format!("missing required directory: {rel}"));
            }
        }

        for rel in self.scoped_docs() {
            let Some(text) = ws.corpus.get(rel) else {
                continue;
            };
            let mut seen = BTreeSet::new();
            let mut reported = BTreeSet::new();
            for id in markdown::comment_values(text, "section") {
                if !seen.insert(id.clone()) && reported.insert(id.clone()) {
                    self.metrics.duplicate_section_markers += 1;
                    self.ledger.fail(format!("duplicate section marker in {rel}: {id}"));
                }
            }
            for link in markdown::local_links(text) {
                self.metrics.checked_links += 1;
                let target = link.split('#').next().unwrap_or_default();
                if target.is_empty() {
                    continue;
                }
                let exists = paths::resolve_link(rel, target).is_some_and(|p| ws.exists(&p));
                if !exists {
                    self.metrics.broken_links += 1;
                    self.ledger.fail(format!("broken link in {rel}: {link}"));
                }
            }
        }
        if self.metrics.checked_links == 0 && self.scope.is_full() {
            self.ledger.warn("no internal markdown links found".to_string());
        }

        let report_path = ws.abs(&self.request.apply_report_path);
        if let Ok(Some(report)) = apply::load_apply_report(&report_path) {
            for r in report
                .results
                .iter()
                .filter(|r| r.action_type != ActionType::Create)
            {
                for written in r.written_paths.iter().filter(|p| ws.policy.is_protected(p)) {
                    self.metrics.protected_writes += 1;
                    self.ledger.fail(format!(
                        "protected path modified outside create: {written} by {} {}",
                        r.id, r.action_type
                    ));
                }
            }
        }
    }

    // ===== Freshness =====

    fn validate_freshness(&mut self) {
        let ws = self.ws;
        self.ledger.begin("freshness");
        let settings = &ws.policy.doc_metadata;
        if !settings.enabled {
            self.ledger.skip();
            return;
        }
        let reference = self.request.reference_date.unwrap_or_else(time::today);
        for rel in self.scoped_docs() {
            if !metadata::applies_to(rel, settings) {
                continue;
            }
            let Some(text) = ws.corpus.get(rel) else {
                continue;
            };
            let eval = metadata::evaluate(rel, text, settings, reference);
            self.metrics.metadata_checked_docs += 1;
            self.metrics.metadata_missing_fields += eval.missing.len();
            self.metrics.metadata_invalid_fields += eval.invalid.len();
            if !eval.missing.is_empty() {
                self.ledger
                    .fail(format!("missing doc metadata in {rel}: {}", eval.missing.join(", ")));
            }
            if !eval.invalid.is_empty() {
                self.ledger
                    .fail(format!("invalid doc metadata in {rel}: {}", eval.invalid.join(", ")));
            }
            if eval.stale {
                self.metrics.metadata_stale_docs += 1;
                let due = eval.due_date.map(time::format_iso_date).unwrap_or_default();
                self.ledger.report(
                    self.request.fail_on_freshness,
                    format!("stale doc metadata in {rel}: due {due}"),
                );
            }
        }
    }

    // ===== Drift =====

    fn validate_drift(&mut self) -> Result<(), DocsorError> {
        self.ledger.begin("drift");
        let audit = match plan::plan(self.ws, self.facts, PlanMode::Audit) {
            Ok(audit) => audit,
            Err(e) if e.is_config() => {
                self.ledger.fail_config(format!("drift: audit plan failed: {e}"));
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        self.drift = audit
            .actionable()
            .map(|a| format!("{} {} {}", a.id, a.action_type, a.path))
            .collect();
        self.metrics.drift_action_count = self.drift.len();
        if !self.drift.is_empty() {
            let message = format!(
                "drift: {} actionable action(s): {}",
                self.drift.len(),
                output::preview_messages(&self.drift, 3, 80)
            );
            self.ledger.report(self.request.fail_on_drift, message);
        }
        Ok(())
    }

    // ===== Topology =====

    fn validate_topology(&mut self) {
        let ws = self.ws;
        self.ledger.begin("topology");
        let settings = &ws.policy.doc_topology;
        if !settings.enabled {
            self.ledger.skip();
            return;
        }
        let Some(contract) = &ws.topology else {
            self.ledger
                .fail(format!("doc-topology: contract missing: {}", settings.path));
            return;
        };
        let graph = match TopologyGraph::build(contract) {
            Ok(g) => g,
            Err(e) => {
                self.ledger.fail_config(format!("doc-topology: {e}"));
                return;
            }
        };
        let limit = topology::effective_depth_limit(contract, settings.max_depth);
        let analysis = topology::analyze(contract, &graph, &ws.corpus, limit);
        if !analysis.orphans.is_empty() {
            self.ledger.report(
                settings.fail_on_orphan,
                format!(
                    "doc-topology: orphan docs detected: {} ({})",
                    analysis.orphans.len(),
                    analysis.orphans.join(", ")
                ),
            );
        }
        if !analysis.unreachable.is_empty() {
            self.ledger.report(
                settings.fail_on_unreachable,
                format!(
                    "doc-topology: unreachable docs detected: {} ({})",
                    analysis.unreachable.len(),
                    analysis.unreachable.join(", ")
                ),
            );
        }
        if !analysis.over_depth.is_empty() {
            self.ledger.report(
                settings.enforce_max_depth,
                format!(
                    "doc-topology: max depth {} exceeds limit {}: {}",
                    analysis.metrics.max_depth,
                    limit,
                    analysis.over_depth.join(", ")
                ),
            );
        }
        for missing in &analysis.missing_docs {
            self.ledger
                .fail(format!("doc-topology: contract node has no document: {missing}"));
        }
        self.metrics.topology = Some(analysis.metrics);
    }

    // ===== Quality =====

    fn validate_quality(&mut self) -> Result<(), DocsorError> {
        let ws = self.ws;
        self.ledger.begin("quality");
        let gates = &ws.policy.doc_quality_gates;
        if !gates.enabled {
            self.ledger.skip();
            return Ok(());
        }
        let registry = if ws.policy.legacy_sources.enabled {
            Some(legacy::load_registry(&ws.abs(&ws.policy.legacy_sources.registry_path))?)
        } else {
            None
        };
        let report = quality::evaluate(
            &ws.policy,
            &ws.corpus,
            ws.doc_spec.as_ref(),
            Some(self.facts),
            registry.as_ref(),
            &ws.manifest.archive_dir,
        );
        for check in &report.failed_checks {
            self.ledger
                .report(gates.fail_on_quality_gate, format!("doc-quality: {check}"));
        }
        self.metrics.quality = Some(report.metrics);
        Ok(())
    }

    // ===== Semantic observability =====

    fn validate_semantic_observability(&mut self) -> Result<(), DocsorError> {
        let ws = self.ws;
        self.ledger.begin("semantic_observability");
        let settings = &ws.policy.semantic_generation;
        let obs_settings = &settings.observability;
        let required = settings.enabled
            && settings.mode != SemanticMode::Deterministic
            && settings.prefer_agent_semantic_first
            && settings.require_semantic_attempt;
        if !obs_settings.enabled || !required {
            self.ledger.skip();
            return Ok(());
        }
        let Some(report) = apply::load_apply_report(&ws.abs(&self.request.apply_report_path))? else {
            self.ledger.warn("apply report missing".to_string());
            return Ok(());
        };
        let obs = SemanticObservability::from_results(&report.results);
        let count = obs.semantic_action_count;
        let unattempted = obs.semantic_unattempted_without_exemption;
        if count > 0 && unattempted > 0 {
            let ratio = obs.unattempted_ratio();
            let large_gap =
                unattempted >= obs_settings.large_unattempted_count || ratio >= obs_settings.large_unattempted_ratio;
            let message = format!(
                "semantic-first actions missing runtime attempts: count={unattempted}/{count} ratio={ratio:.2}"
            );
            self.ledger
                .report(large_gap && obs_settings.fail_on_large_unattempted, message);
        }
        self.metrics.semantic_observability = Some(obs);
        Ok(())
    }

    // ===== Legacy coverage =====

    fn validate_legacy_coverage(&mut self) -> Result<(), DocsorError> {
        let ws = self.ws;
        self.ledger.begin("legacy_coverage");
        let settings = &ws.policy.legacy_sources;
        if !settings.enabled {
            self.ledger.skip();
            return Ok(());
        }
        let registry = legacy::load_registry(&ws.abs(&settings.registry_path))?;
        let signals = legacy::load_semantic_report(&ws.abs(&settings.semantic_report_path))?;
        let candidates = legacy::discover(&self.facts.files, settings);
        self.metrics.legacy_discovered_sources = candidates.len();

        let mut unresolved = Vec::new();
        for source in &candidates {
            match registry.status(source) {
                Some(_) => self.metrics.legacy_completed_sources += 1,
                None if legacy::is_exempt(source, settings) => {}
                None => {
                    let content = ws.read_text(source);
                    let c = legacy::classify(source, content.as_deref(), settings, &signals);
                    if c.decision != LegacyDecision::Skip {
                        unresolved.push(source.clone());
                    }
                }
            }
        }
        self.metrics.legacy_unresolved_sources = unresolved.len();
        if !unresolved.is_empty() {
            let shown: Vec<String> = unresolved.iter().take(20).cloned().collect();
            self.ledger
                .fail(format!("legacy unresolved sources: {}", shown.join(", ")));
        }

        let mut denylisted = Vec::new();
        for (source, entry) in &registry.entries {
            let done = matches!(entry.status, LegacyStatus::Migrated | LegacyStatus::Archived);
            if entry.status == LegacyStatus::Archived {
                let archive = entry.archive_path.as_deref().unwrap_or_default();
                if archive.is_empty() || !ws.exists(archive) {
                    self.ledger.fail(format!(
                        "legacy archive missing for {source}: {}",
                        if archive.is_empty() { "UNKNOWN" } else { archive }
                    ));
                }
            }
            if !done {
                continue;
            }
            if legacy::is_denylisted(source, settings) {
                denylisted.push(source.clone());
            }
            let target = entry.target_path.as_deref().unwrap_or_default();
            match ws.read_text(target).filter(|_| !target.is_empty()) {
                None => self.ledger.fail(format!(
                    "legacy target missing for {source}: {}",
                    if target.is_empty() { "UNKNOWN" } else { target }
                )),
                Some(text) => {
                    if !text.contains(&legacy::source_marker(source)) {
                        self.ledger
                            .warn(format!("legacy source marker missing in {target}: {source}"));
                    }
                }
            }
        }
        if !denylisted.is_empty() {
            self.ledger.fail(format!(
                "denylist sources attempted migration: {}",
                denylisted.join(", ")
            ));
        }
        Ok(())
    }

    // ===== Exec-plan closeout =====

    fn validate_exec_plan_closeout(&mut self) {
        let ws = self.ws;
        self.ledger.begin("exec_plan_closeout");
        let plans: Vec<&str> = self
            .scoped_docs()
            .into_iter()
            .filter(|d| d.starts_with(EXEC_PLAN_ACTIVE_DIR))
            .collect();
        for rel in plans {
            let Some(text) = ws.corpus.get(rel) else {
                continue;
            };
            self.metrics.active_exec_plan_files += 1;
            let completed = markdown::comment_values(text, EXEC_PLAN_STATUS_KEY)
                .first()
                .is_some_and(|s| s.trim().eq_ignore_ascii_case("completed"));
            if !completed {
                continue;
            }
            self.metrics.completed_exec_plans += 1;
            match markdown::comment_values(text, EXEC_PLAN_CLOSEOUT_KEY).first() {
                None => {
                    self.metrics.missing_exec_plan_closeouts += 1;
                    self.ledger
                        .fail(format!("exec-plan closeout missing link marker: {rel}"));
                }
                Some(target) => {
                    let target = paths::normalize_rel(target.trim());
                    if !ws.exists(&target) {
                        self.metrics.missing_exec_plan_closeouts += 1;
                        self.ledger
                            .fail(format!("exec-plan closeout target missing for {rel}: {target}"));
                    }
                }
            }
        }
    }

    // ===== Agents =====

    fn validate_agents(&mut self) {
        let ws = self.ws;
        self.ledger.begin("agents");
        let settings = &ws.policy.agents_generation;
        if !settings.enabled {
            self.ledger.skip();
            return;
        }
        let eval = agents::evaluate(ws);
        if !eval.passed {
            let detail = if eval.errors.is_empty() {
                eval.failed_checks.join(", ")
            } else {
                output::preview_messages(&eval.errors, 2, 110)
            };
            self.ledger.report(
                settings.fail_on_agents_drift,
                format!("agents-quality: agents gate failed: {detail}"),
            );
        }
        for warning in &eval.warnings {
            self.ledger.warn(format!("agents-quality: {warning}"));
        }
        self.metrics.agents = Some(eval.metrics);
    }
}
