//! Executor: applies a plan's actions to the working tree and records one result per
//! action in the apply report.
//!
//! # For AI Agents
//!
//! - **Markers make re-application a no-op**: every write carries a stable marker
//!   (section, claim, legacy source, source-path, split-from, link presence, registry
//!   status). An action whose marker is already present is `skipped`, never re-appended.
//! - **Runtime content first**: semantic-capable actions consume a graded runtime entry
//!   when one exists. Otherwise the deterministic template is used only where policy
//!   allows it. `agent_strict` never falls back; the result is an `error` instead.
//! - **Failures are values**: one failing action is recorded as `error` and the rest of
//!   the plan still runs. Nothing is deleted; archiving is a move under the archive root.

use crate::core::action::{Action, ActionPayload, ActionType, TargetKind, Template, TopologyIssue};
use crate::core::agents::{self, AgentsReport};
use crate::core::corpus::GENERATED_MARKER;
use crate::core::language::{self, Profile};
use crate::core::error::{self, DocsorError};
use crate::core::legacy::{self, Classification, LegacyStatus, MigrationDigest, RegistryEntry};
use crate::core::manifest::{self, ROOT_INDEX};
use crate::core::metadata;
use crate::core::plan::{self, Plan, PlanMode};
use crate::core::policy::{ApplyMode, Policy, SemanticMode};
use crate::core::semantic::{
    self, Decision, FallbackReason, Grade, RuntimeEntry, RuntimeSession, Slots, codes,
};
use crate::core::topology::{self, Layer, TopologyContract, TopologyGraph, TopologyNode};
use crate::core::workspace::{self, Workspace};
use crate::core::{markdown, output, paths, time};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Applied,
    Skipped,
    Error,
}

/// How a semantic-capable action resolved against the runtime report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SemanticStatus {
    Consumed,
    Fallback,
    Blocked,
    Error,
    DeterministicMode,
    SemanticDisabled,
    ActionDisabled,
    AlreadySatisfied,
}

impl SemanticStatus {
    /// Statuses that legitimately skip a runtime attempt.
    pub fn is_exempt(self) -> bool {
        matches!(
            self,
            SemanticStatus::DeterministicMode
                | SemanticStatus::SemanticDisabled
                | SemanticStatus::ActionDisabled
                | SemanticStatus::AlreadySatisfied
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SemanticStatus::Consumed => "consumed",
            SemanticStatus::Fallback => "fallback",
            SemanticStatus::Blocked => "blocked",
            SemanticStatus::Error => "error",
            SemanticStatus::DeterministicMode => "deterministic_mode",
            SemanticStatus::SemanticDisabled => "semantic_disabled",
            SemanticStatus::ActionDisabled => "action_disabled",
            SemanticStatus::AlreadySatisfied => "already_satisfied",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemanticRuntimeResult {
    pub status: SemanticStatus,
    pub attempted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grade: Option<Grade>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<Decision>,
    #[serde(default)]
    pub findings: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<FallbackReason>,
    #[serde(default)]
    pub gate_failures: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SemanticRuntimeResult {
    fn new(status: SemanticStatus, attempted: bool) -> Self {
        Self {
            status,
            attempted,
            entry_id: None,
            grade: None,
            score: None,
            decision: None,
            findings: Vec::new(),
            fallback_reason: None,
            gate_failures: Vec::new(),
            error: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    pub id: String,
    #[serde(rename = "type")]
    pub action_type: ActionType,
    pub path: String,
    pub status: ActionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default)]
    pub details: Vec<String>,
    #[serde(default)]
    pub written_paths: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub semantic_runtime: Option<SemanticRuntimeResult>,
}

fn result(action: &Action, status: ActionStatus, reason: Option<&str>) -> ActionResult {
    ActionResult {
        id: action.id.clone(),
        action_type: action.action_type,
        path: action.path.clone(),
        status,
        reason: reason.map(str::to_string),
        details: Vec::new(),
        written_paths: Vec::new(),
        semantic_runtime: None,
    }
}

fn skipped(action: &Action, reason: &str) -> ActionResult {
    result(action, ActionStatus::Skipped, Some(reason))
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplySummary {
    pub total: usize,
    pub applied: usize,
    pub skipped: usize,
    pub errors: usize,
}

impl ApplySummary {
    pub fn of(results: &[ActionResult]) -> Self {
        let count = |s: ActionStatus| results.iter().filter(|r| r.status == s).count();
        Self {
            total: results.len(),
            applied: count(ActionStatus::Applied),
            skipped: count(ActionStatus::Skipped),
            errors: count(ActionStatus::Error),
        }
    }
}

/// Aggregate view of runtime usage across one apply run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SemanticObservability {
    pub semantic_action_count: usize,
    pub semantic_attempt_count: usize,
    pub semantic_success_count: usize,
    pub fallback_count: usize,
    pub blocked_count: usize,
    pub error_count: usize,
    pub semantic_exempt_count: usize,
    pub semantic_unattempted_without_exemption: usize,
    pub fallback_reason_breakdown: BTreeMap<String, usize>,
    pub grade_distribution: BTreeMap<String, usize>,
    pub exemption_breakdown: BTreeMap<String, usize>,
    pub semantic_hit_rate: f64,
}

impl SemanticObservability {
    pub fn from_results(results: &[ActionResult]) -> Self {
        let mut obs = Self::default();
        for trace in results.iter().filter_map(|r| r.semantic_runtime.as_ref()) {
            obs.semantic_action_count += 1;
            if trace.attempted {
                obs.semantic_attempt_count += 1;
            }
            match trace.status {
                SemanticStatus::Consumed => obs.semantic_success_count += 1,
                SemanticStatus::Fallback => obs.fallback_count += 1,
                SemanticStatus::Blocked => obs.blocked_count += 1,
                SemanticStatus::Error => obs.error_count += 1,
                exempt => {
                    obs.semantic_exempt_count += 1;
                    *obs.exemption_breakdown.entry(exempt.as_str().to_string()).or_insert(0) += 1;
                }
            }
            if !trace.attempted && !trace.status.is_exempt() {
                obs.semantic_unattempted_without_exemption += 1;
            }
            if let Some(reason) = trace.fallback_reason {
                *obs.fallback_reason_breakdown.entry(reason.as_str().to_string()).or_insert(0) += 1;
            }
            if let Some(grade) = trace.grade {
                *obs.grade_distribution.entry(grade.as_str().to_string()).or_insert(0) += 1;
            }
        }
        if obs.semantic_attempt_count > 0 {
            let rate = obs.semantic_success_count as f64 / obs.semantic_attempt_count as f64;
            obs.semantic_hit_rate = (rate * 10_000.0).round() / 10_000.0;
        }
        obs
    }

    pub fn unattempted_ratio(&self) -> f64 {
        if self.semantic_action_count == 0 {
            0.0
        } else {
            self.semantic_unattempted_without_exemption as f64 / self.semantic_action_count as f64
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeSummary {
    pub available: bool,
    pub entries: usize,
    pub rejected: usize,
    pub consumed: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplyReport {
    pub generated_at: String,
    pub run_id: String,
    pub apply_mode: ApplyMode,
    pub plan_mode: PlanMode,
    pub plan_digest: String,
    pub runtime: RuntimeSummary,
    pub summary: ApplySummary,
    pub observability: SemanticObservability,
    pub results: Vec<ActionResult>,
    /// AGENTS.md sync run after the actions, when triggered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agents: Option<AgentsReport>,
}

impl ApplyReport {
    pub fn has_errors(&self) -> bool {
        self.summary.errors > 0
    }
}

pub fn save_apply_report(path: &Path, report: &ApplyReport) -> Result<(), DocsorError> {
    output::write_json(path, report)
}

pub fn load_apply_report(path: &Path) -> Result<Option<ApplyReport>, DocsorError> {
    output::read_json(path)
}

/// Applies `plan` with the runtime report configured in the policy.
pub fn apply_plan(ws: &Workspace, plan: &Plan, mode: ApplyMode) -> Result<ApplyReport, DocsorError> {
    let session = RuntimeSession::load(&ws.root, &ws.policy.semantic_generation)?;
    apply_with_session(ws, plan, mode, session)
}

pub fn apply_with_session(
    ws: &Workspace,
    plan: &Plan,
    mode: ApplyMode,
    session: RuntimeSession,
) -> Result<ApplyReport, DocsorError> {
    let reference = time::parse_iso_date(&plan.meta.reference_date).ok_or_else(|| {
        error::config_error(
            workspace::PLAN_PATH,
            format!("reference_date {:?} is not an ISO date", plan.meta.reference_date),
        )
    })?;
    let mut executor = Executor {
        ws,
        mode,
        reference,
        stamp: plan.meta.generated_at.clone(),
        modules: plan.meta.modules.clone(),
        session,
    };

    let mut results = Vec::with_capacity(plan.actions.len());
    for action in &plan.actions {
        let r = executor.execute(action);
        debug!(
            id = %r.id,
            action = %r.action_type,
            path = %r.path,
            status = ?r.status,
            reason = r.reason.as_deref().unwrap_or(""),
            "action executed"
        );
        results.push(r);
    }

    let agents = sync_agents(ws, plan, mode, &results)?;

    let catalog = executor.session.catalog();
    let runtime = RuntimeSummary {
        available: executor.session.is_available(),
        entries: catalog.map(|c| c.entries.len()).unwrap_or(0),
        rejected: catalog.map(|c| c.rejected.len()).unwrap_or(0),
        consumed: executor.session.consumed_count(),
        error: executor.session.error.clone(),
        warnings: catalog.map(|c| c.warnings.clone()).unwrap_or_default(),
    };
    let summary = ApplySummary::of(&results);
    let observability = SemanticObservability::from_results(&results);
    info!(
        mode = mode.as_str(),
        applied = summary.applied,
        skipped = summary.skipped,
        errors = summary.errors,
        semantic_hits = observability.semantic_success_count,
        "apply finished"
    );
    Ok(ApplyReport {
        generated_at: time::now_rfc3339(),
        run_id: time::new_run_id(),
        apply_mode: mode,
        plan_mode: plan.meta.mode,
        plan_digest: plan.meta.digest.clone(),
        runtime,
        summary,
        observability,
        results,
        agents,
    })
}

/// Result types whose success changes what AGENTS.md should point at.
const AGENTS_STRUCTURAL_TRIGGERS: &[ActionType] = &[
    ActionType::SyncManifest,
    ActionType::Create,
    ActionType::Archive,
    ActionType::ArchiveLegacy,
    ActionType::MigrateLegacy,
    ActionType::SemanticRewrite,
];

const AGENTS_SEMANTIC_TRIGGERS: &[ActionType] = &[
    ActionType::UpdateSection,
    ActionType::FillClaim,
    ActionType::SemanticRewrite,
    ActionType::MigrateLegacy,
    ActionType::MergeDocs,
    ActionType::SplitDoc,
];

/// Why this run should regenerate AGENTS.md, if at all.
fn agents_trigger(ws: &Workspace, plan: &Plan, results: &[ActionResult]) -> Option<&'static str> {
    let settings = &ws.policy.agents_generation;
    if !settings.enabled {
        return None;
    }
    let applied = |r: &&ActionResult| r.status == ActionStatus::Applied;
    if plan.meta.mode == PlanMode::Bootstrap {
        Some("bootstrap")
    } else if !ws.exists(workspace::AGENTS_PATH) {
        Some("agents_missing")
    } else if results
        .iter()
        .filter(applied)
        .any(|r| AGENTS_STRUCTURAL_TRIGGERS.contains(&r.action_type) && r.path != workspace::AGENTS_PATH)
    {
        Some("structural_change")
    } else if settings.regenerate_on_semantic_actions
        && plan.actions.iter().any(|a| AGENTS_SEMANTIC_TRIGGERS.contains(&a.action_type))
    {
        Some("semantic_actions")
    } else if settings.sync_on_manifest_change
        && (plan.meta.manifest_changed
            || results
                .iter()
                .filter(applied)
                .any(|r| r.action_type == ActionType::SyncManifest))
    {
        Some("manifest_changed")
    } else {
        None
    }
}

fn sync_agents(
    ws: &Workspace,
    plan: &Plan,
    mode: ApplyMode,
    results: &[ActionResult],
) -> Result<Option<AgentsReport>, DocsorError> {
    if mode == ApplyMode::None {
        return Ok(None);
    }
    let Some(trigger) = agents_trigger(ws, plan, results) else {
        return Ok(None);
    };
    let (current, _) = manifest::load_manifest(&ws.abs(workspace::MANIFEST_PATH))?;
    let mut generation = agents::generate(ws, &current, &plan.meta.modules, false);
    agents::write_generation(ws, &mut generation)?;
    debug!(trigger, status = ?generation.report.status, "AGENTS.md sync");
    Ok(Some(generation.report))
}

struct FileWrite {
    path: String,
    content: String,
}

impl FileWrite {
    fn new(path: &str, content: String) -> Self {
        Self {
            path: path.to_string(),
            content,
        }
    }
}

enum Fallback {
    Template,
    Stop {
        status: ActionStatus,
        reason: String,
        details: Vec<String>,
    },
}

enum Route {
    Runtime(Box<RuntimeEntry>),
    Fallback(Fallback),
}

/// Runtime content merged into the scaffold, or the structural gate codes it failed.
enum Merged {
    Ready(Vec<FileWrite>),
    GateFailed(Vec<String>),
}

#[derive(Debug, PartialEq, Eq)]
enum Relocation {
    Moved,
    AlreadyMoved,
    SourceMissing,
    TargetExists,
}

struct Executor<'a> {
    ws: &'a Workspace,
    mode: ApplyMode,
    reference: NaiveDate,
    stamp: String,
    modules: Vec<String>,
    session: RuntimeSession,
}

impl<'a> Executor<'a> {
    fn execute(&mut self, action: &Action) -> ActionResult {
        if self.mode == ApplyMode::None {
            return skipped(action, "dry_run");
        }
        if !paths::is_safe_rel(&action.path) {
            let err = DocsorError::PathError(format!("target escapes the repository: {}", action.path));
            warn!(id = %action.id, error = %err, "action rejected");
            return self.rejected(action, "unsafe_path", err.to_string());
        }
        let outcome = match action.action_type {
            ActionType::Create => self.create(action),
            ActionType::UpdateSection => self.update_section(action),
            ActionType::FillClaim => self.fill_claim(action),
            ActionType::Archive => self.archive(action),
            ActionType::ManualReview => {
                let mut r = skipped(action, "manual_review");
                r.details = action.evidence.clone();
                Ok(r)
            }
            ActionType::SyncManifest => self.sync_manifest(action),
            ActionType::MigrateLegacy => self.migrate_legacy(action),
            ActionType::ArchiveLegacy => self.archive_legacy(action),
            ActionType::TopologyRepair => self.topology_repair(action),
            ActionType::NavigationRepair => self.navigation_repair(action),
            ActionType::MergeDocs => self.merge_docs(action),
            ActionType::SplitDoc => self.split_doc(action),
            ActionType::SemanticRewrite => self.semantic_rewrite(action),
            ActionType::QualityRepair => self.quality_repair(action),
            ActionType::RefreshEvidence => self.refresh_evidence(action),
        };
        match outcome {
            Ok(r) => r,
            Err(e) => {
                warn!(id = %action.id, action = %action.action_type, error = %e, "action failed");
                self.rejected(action, "execution_failed", e.to_string())
            }
        }
    }

    fn profile(&self) -> Profile {
        self.ws.language.profile
    }

    fn policy(&self) -> &Policy {
        &self.ws.policy
    }

    fn is_semantic(&self, action: &Action) -> bool {
        semantic::action_enabled(&self.policy().semantic_generation, action.action_type).is_some()
            && !matches!(
                action.payload,
                Some(ActionPayload::Metadata { .. }) | Some(ActionPayload::Modules { .. })
            )
    }

    /// Precondition failure: the action is not attempted at all.
    fn rejected(&self, action: &Action, reason: &str, detail: String) -> ActionResult {
        let mut r = result(action, ActionStatus::Error, Some(reason));
        if self.is_semantic(action) {
            let mut trace = SemanticRuntimeResult::new(SemanticStatus::Error, false);
            trace.error = Some(detail.clone());
            r.semantic_runtime = Some(trace);
        }
        r.details.push(detail);
        r
    }

    /// The marker for this action is already present.
    fn satisfied(&self, action: &Action, detail: &str) -> ActionResult {
        let mut r = skipped(action, "already_satisfied");
        r.details.push(detail.to_string());
        if self.is_semantic(action) {
            r.semantic_runtime = Some(SemanticRuntimeResult::new(SemanticStatus::AlreadySatisfied, false));
        }
        r
    }

    fn read(&self, rel: &str) -> Option<String> {
        self.ws.read_text(rel)
    }

    fn with_metadata(&self, rel: &str, text: String) -> String {
        let settings = &self.policy().doc_metadata;
        if metadata::applies_to(rel, settings) {
            metadata::ensure_block(&text, settings, self.reference, false)
        } else {
            text
        }
    }

    // ===== Runtime routing =====

    fn exemption(&self, action: &Action) -> Option<SemanticStatus> {
        let settings = &self.policy().semantic_generation;
        if !settings.enabled {
            Some(SemanticStatus::SemanticDisabled)
        } else if settings.mode == SemanticMode::Deterministic {
            Some(SemanticStatus::DeterministicMode)
        } else if semantic::action_enabled(settings, action.action_type) == Some(false) {
            Some(SemanticStatus::ActionDisabled)
        } else {
            None
        }
    }

    fn route(&self, action: &Action, trace: &mut SemanticRuntimeResult) -> Route {
        if let Some(status) = self.exemption(action) {
            trace.status = status;
            trace.attempted = false;
            return Route::Fallback(Fallback::Template);
        }
        trace.attempted = true;
        let settings = &self.policy().semantic_generation;
        if semantic::path_denied(settings, action) {
            return Route::Fallback(self.reroute(action, trace, FallbackReason::PathDenied));
        }
        let Some(entry) = self.session.select(action).cloned() else {
            let reason = if self.session.is_available() {
                FallbackReason::RuntimeEntryNotFound
            } else {
                trace.error = self.session.error.clone();
                FallbackReason::RuntimeUnavailable
            };
            return Route::Fallback(self.reroute(action, trace, reason));
        };
        let quality = semantic::grade(&entry, action, self.policy(), &self.ws.corpus);
        trace.entry_id = Some(entry.entry_id.clone());
        trace.grade = Some(quality.grade);
        trace.score = Some(quality.score);
        trace.decision = Some(quality.decision);
        trace.findings = quality.codes();
        match FallbackReason::from_decision(quality.decision, quality.grade) {
            Some(reason) => Route::Fallback(self.reroute(action, trace, reason)),
            None => Route::Runtime(Box::new(entry)),
        }
    }

    fn reroute(&self, action: &Action, trace: &mut SemanticRuntimeResult, reason: FallbackReason) -> Fallback {
        let settings = &self.policy().semantic_generation;
        trace.fallback_reason = Some(reason);
        debug!(id = %action.id, reason = reason.as_str(), "runtime content not consumed");
        if settings.mode == SemanticMode::AgentStrict {
            trace.status = SemanticStatus::Error;
            let why = if reason == FallbackReason::PathDenied {
                "path_denied"
            } else {
                "runtime_required"
            };
            return Fallback::Stop {
                status: ActionStatus::Error,
                reason: why.to_string(),
                details: vec![format!(
                    "agent_strict requires consumable runtime content: {}",
                    reason.as_str()
                )],
            };
        }
        if semantic::fallback_allowed(reason, settings) {
            trace.status = SemanticStatus::Fallback;
            Fallback::Template
        } else {
            trace.status = SemanticStatus::Blocked;
            Fallback::Stop {
                status: ActionStatus::Skipped,
                reason: "fallback_blocked".to_string(),
                details: vec![format!("fallback blocked: {}", reason.as_str())],
            }
        }
    }

    /// Runs a semantic-capable action: runtime content through `merge`, otherwise the
    /// deterministic `scaffold` when policy allows it.
    fn drive<S, M>(&mut self, action: &Action, scaffold: S, merge: M) -> Result<ActionResult, DocsorError>
    where
        S: FnOnce(&Self) -> Result<Vec<FileWrite>, DocsorError>,
        M: FnOnce(&Self, &RuntimeEntry) -> Result<Merged, DocsorError>,
    {
        let mut trace = SemanticRuntimeResult::new(SemanticStatus::Fallback, false);
        let writes = match self.route(action, &mut trace) {
            Route::Runtime(entry) => match json_gate(merge(&*self, &entry)?) {
                Merged::Ready(writes) => {
                    self.session.mark_consumed(&entry);
                    trace.status = SemanticStatus::Consumed;
                    writes
                }
                Merged::GateFailed(failures) => {
                    debug!(id = %action.id, failures = ?failures, "runtime content failed structural gate");
                    trace.gate_failures = failures;
                    match self.reroute(action, &mut trace, FallbackReason::RuntimeGateFailed) {
                        Fallback::Template => scaffold(&*self)?,
                        Fallback::Stop { status, reason, details } => {
                            return Ok(stopped(action, status, &reason, details, trace));
                        }
                    }
                }
            },
            Route::Fallback(Fallback::Template) => scaffold(&*self)?,
            Route::Fallback(Fallback::Stop { status, reason, details }) => {
                return Ok(stopped(action, status, &reason, details, trace));
            }
        };
        self.finish(action, writes, Some(trace))
    }

    /// Commits the writes whose content differs from disk.
    fn finish(
        &self,
        action: &Action,
        writes: Vec<FileWrite>,
        trace: Option<SemanticRuntimeResult>,
    ) -> Result<ActionResult, DocsorError> {
        let mut written = Vec::new();
        for w in writes {
            if self.read(&w.path).as_deref() == Some(w.content.as_str()) {
                continue;
            }
            output::write_text(&self.ws.abs(&w.path), &w.content)?;
            written.push(w.path);
        }
        let mut r = if written.is_empty() {
            skipped(action, "no changes")
        } else {
            result(action, ActionStatus::Applied, None)
        };
        r.written_paths = written;
        r.semantic_runtime = trace;
        Ok(r)
    }

    fn relocate(&self, source: &str, target: &str) -> Result<Relocation, DocsorError> {
        let from = self.ws.abs(source);
        let to = self.ws.abs(target);
        match (from.exists(), to.exists()) {
            (false, true) => return Ok(Relocation::AlreadyMoved),
            (false, false) => return Ok(Relocation::SourceMissing),
            (true, true) => return Ok(Relocation::TargetExists),
            (true, false) => {}
        }
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent)?;
        }
        if fs::rename(&from, &to).is_err() {
            fs::copy(&from, &to)?;
            fs::remove_file(&from)?;
        }
        Ok(Relocation::Moved)
    }

    // ===== create =====

    fn create(&self, action: &Action) -> Result<ActionResult, DocsorError> {
        let abs = self.ws.abs(&action.path);
        if action.kind == TargetKind::Dir {
            if abs.is_dir() {
                return Ok(skipped(action, "already exists"));
            }
            fs::create_dir_all(&abs)?;
            let mut r = result(action, ActionStatus::Applied, None);
            r.written_paths.push(action.path.clone());
            return Ok(r);
        }
        if abs.exists() {
            return Ok(skipped(action, "already exists"));
        }
        let content = match &action.payload {
            Some(ActionPayload::Manifest { snapshot, .. }) => json_text(&snapshot.normalized())?,
            Some(ActionPayload::Template { template }) => self.render_template(*template, &action.path)?,
            _ => self.render_template(Template::Managed, &action.path)?,
        };
        self.finish(action, vec![FileWrite::new(&action.path, content)], None)
    }

    fn render_template(&self, template: Template, rel: &str) -> Result<String, DocsorError> {
        let ws = self.ws;
        let text = match template {
            Template::Policy => return json_text(&Policy::default()),
            Template::Manifest => return json_text(&ws.manifest.normalized()),
            Template::TopologyContract => return json_text(&self.default_contract()),
            Template::Agents => {
                let settings = &ws.policy.agents_generation;
                let links = agents::navigation_links(settings, &ws.manifest, |p| ws.exists(p));
                agents::clip(&agents::render(self.profile(), &links, &self.modules), settings.max_lines)
            }
            Template::Index => {
                let builtin = language::builtin(ROOT_INDEX);
                let heading = |id: &str, fallback: &str| {
                    builtin
                        .and_then(|d| d.heading(id, self.profile()))
                        .unwrap_or(fallback)
                        .to_string()
                };
                let mut lines = vec![
                    GENERATED_MARKER.to_string(),
                    heading("title", "# Documentation Index"),
                    String::new(),
                    heading("core_docs", "## Core Documents"),
                    String::new(),
                ];
                let docs: Vec<String> = ws
                    .declared_docs()
                    .into_iter()
                    .filter(|d| d != rel && d.ends_with(".md") && ws.exists(d))
                    .collect();
                if docs.is_empty() {
                    lines.push(
                        match self.profile() {
                            Profile::EnUs => "- No managed documents yet.",
                            Profile::ZhCn => "- 暂无受管文档。",
                        }
                        .to_string(),
                    );
                }
                for doc in docs {
                    let title = doc_title(self.read(&doc).as_deref(), &doc);
                    lines.push(link_line(rel, &doc, &title));
                }
                if let Some(doc) = builtin {
                    let workflow = doc.render_section("workflow", self.profile());
                    if !workflow.is_empty() {
                        lines.push(String::new());
                        lines.push(workflow);
                    }
                }
                lines.push(String::new());
                lines.join("\n")
            }
            Template::Managed => {
                let spec_doc = ws.doc_spec.as_ref().and_then(|s| s.document(rel));
                match (spec_doc, language::builtin(rel)) {
                    (None, Some(builtin)) => format!("{GENERATED_MARKER}\n{}", builtin.render(self.profile())),
                    _ => {
                        let mut lines = vec![
                            GENERATED_MARKER.to_string(),
                            format!("# {}", title_from_path(rel)),
                            String::new(),
                            format!("Managed document for `{rel}`."),
                            String::new(),
                        ];
                        for section in spec_doc.iter().flat_map(|d| d.ordered_sections()) {
                            lines.push(section.heading_line());
                            lines.push(String::new());
                            lines.push(plan::section_marker(&section.section_id));
                            lines.push(String::new());
                        }
                        lines.join("\n")
                    }
                }
            }
        };
        let progressive = &self.policy().progressive_disclosure;
        let text = if progressive.enabled && paths::matches_any(&progressive.scope_globs, rel) {
            let slots = self.deterministic_slots(rel, &text);
            fill_slots(&text, &slots, &progressive.required_slots)
        } else {
            text
        };
        Ok(self.with_metadata(rel, text))
    }

    fn default_contract(&self) -> TopologyContract {
        let ws = self.ws;
        let mut contract = TopologyContract::rooted_at(ROOT_INDEX, ws.policy.doc_topology.max_depth);
        for doc in ws.corpus.scope_docs(&ws.manifest.archive_dir) {
            if doc == ROOT_INDEX {
                continue;
            }
            contract.nodes.push(TopologyNode {
                domain: domain_of(&doc),
                path: doc,
                layer: Layer::Leaf,
                parent: Some(ROOT_INDEX.to_string()),
            });
        }
        contract
    }

    // ===== update_section =====

    fn update_section(&mut self, action: &Action) -> Result<ActionResult, DocsorError> {
        let Some(text) = self.read(&action.path) else {
            return Ok(self.rejected(action, "target_missing", format!("{} does not exist", action.path)));
        };
        match &action.payload {
            Some(ActionPayload::Metadata { .. }) => {
                let updated = metadata::ensure_block(&text, &self.policy().doc_metadata, self.reference, false);
                return self.finish(action, vec![FileWrite::new(&action.path, updated)], None);
            }
            Some(ActionPayload::Modules { missing_modules }) => {
                let heading = action
                    .section_heading
                    .as_deref()
                    .unwrap_or_else(|| language::module_inventory_heading(self.profile()));
                let mut updated = text.clone();
                for module in missing_modules {
                    if !updated.contains(module.as_str()) {
                        updated = markdown::append_under_heading(
                            &updated,
                            heading,
                            &language::module_line(module, self.profile()),
                        );
                    }
                }
                return self.finish(action, vec![FileWrite::new(&action.path, updated)], None);
            }
            _ => {}
        }

        let Some(section_id) = action.section_id.as_deref() else {
            return Ok(self.rejected(action, "missing_section_id", "update_section needs a section id".into()));
        };
        let heading = action
            .section_heading
            .clone()
            .unwrap_or_else(|| format!("## {section_id}"));
        let marker = plan::section_marker(section_id);
        if text.contains(&marker) || markdown::section_range(&text, &heading).is_some() {
            return Ok(self.satisfied(action, "section present"));
        }
        let max_chars = self.policy().semantic_generation.max_output_chars_per_section;
        let path = action.path.as_str();
        self.drive(
            action,
            |_| {
                let body = format!("{marker}\n\nMaintained section `{section_id}` of `{path}`.");
                Ok(vec![FileWrite::new(path, markdown::upsert_section(&text, &heading, &body))])
            },
            |_, entry| {
                let Some(content) = entry.content.as_ref().or(entry.statement.as_ref()) else {
                    return Ok(Merged::GateFailed(vec![codes::MISSING_CONTENT.to_string()]));
                };
                let mut body = format!("{marker}\n\n{}", output::truncate_chars(content.trim(), max_chars));
                if !entry.citations.is_empty() {
                    body.push_str(&format!("\n\nCitations: {}", entry.citations.join(", ")));
                }
                Ok(Merged::Ready(vec![FileWrite::new(
                    path,
                    markdown::upsert_section(&text, &heading, &body),
                )]))
            },
        )
    }

    // ===== fill_claim =====

    fn fill_claim(&mut self, action: &Action) -> Result<ActionResult, DocsorError> {
        let Some(claim_id) = action.claim_id.as_deref() else {
            return Ok(self.rejected(action, "missing_claim_id", "fill_claim needs a claim id".into()));
        };
        let Some(ActionPayload::Claim {
            statement_template,
            required_evidence_types,
            ..
        }) = &action.payload
        else {
            return Ok(self.rejected(action, "invalid_payload", "fill_claim needs a claim payload".into()));
        };
        let Some(text) = self.read(&action.path) else {
            return Ok(self.rejected(action, "target_missing", format!("{} does not exist", action.path)));
        };
        if semantic::claim_lines(&text).iter().any(|c| c.claim_id == claim_id) {
            return Ok(self.satisfied(action, "claim line present"));
        }

        let todo = format!("TODO(claim:{claim_id})");
        let heading = action.section_heading.as_deref().unwrap_or("## Claims");
        let place = |line: &str| -> String {
            markdown::replace_line_containing(&text, &todo, line)
                .unwrap_or_else(|| markdown::append_under_heading(&text, heading, line))
        };
        let path = action.path.as_str();
        let section = action.section_id.as_deref().unwrap_or("claims");
        let available = semantic::available_for(action);
        self.drive(
            action,
            |_| {
                let missing: Vec<&String> = required_evidence_types
                    .iter()
                    .filter(|t| !available.contains(t))
                    .collect();
                let line = if missing.is_empty() {
                    let citations: Vec<String> = required_evidence_types
                        .iter()
                        .map(|t| semantic::citation_token(t))
                        .collect();
                    semantic::render_claim_line(claim_id, statement_template, &citations)
                } else {
                    let types: Vec<String> = missing.iter().map(|t| format!("`{t}`")).collect();
                    format!(
                        "- {todo}: Add evidence types {} for section `{section}` and update the related content.",
                        types.join(", ")
                    )
                };
                Ok(vec![FileWrite::new(path, place(&line))])
            },
            |_, entry| {
                let Some(statement) = entry.statement.as_ref().or(entry.content.as_ref()) else {
                    return Ok(Merged::GateFailed(vec![codes::MISSING_STATEMENT.to_string()]));
                };
                let line = semantic::render_claim_line(claim_id, statement, &entry.citations);
                Ok(Merged::Ready(vec![FileWrite::new(path, place(&line))]))
            },
        )
    }

    // ===== archive =====

    fn archive(&self, action: &Action) -> Result<ActionResult, DocsorError> {
        let Some(ActionPayload::Archive { source_path }) = &action.payload else {
            return Ok(self.rejected(action, "invalid_payload", "archive needs a source path".into()));
        };
        if self.mode != ApplyMode::ApplyWithArchive {
            return Ok(skipped(action, "archive requires apply-with-archive"));
        }
        Ok(match self.relocate(source_path, &action.path)? {
            Relocation::Moved => {
                info!(source = %source_path, target = %action.path, "document archived");
                let mut r = result(action, ActionStatus::Applied, None);
                r.written_paths = vec![source_path.clone(), action.path.clone()];
                r
            }
            Relocation::AlreadyMoved => skipped(action, "already archived"),
            Relocation::SourceMissing => skipped(action, "source missing"),
            Relocation::TargetExists => self.rejected(
                action,
                "archive_target_exists",
                format!("{} already exists", action.path),
            ),
        })
    }

    // ===== sync_manifest =====

    fn sync_manifest(&self, action: &Action) -> Result<ActionResult, DocsorError> {
        let Some(ActionPayload::Manifest { snapshot, notes }) = &action.payload else {
            return Ok(self.rejected(action, "invalid_payload", "sync_manifest needs a snapshot".into()));
        };
        let (current, _) = manifest::load_manifest(&self.ws.abs(workspace::MANIFEST_PATH))?;
        let desired = snapshot.normalized();
        if current.normalized() == desired {
            return Ok(skipped(action, "manifest already in sync"));
        }
        let mut r = self.finish(
            action,
            vec![FileWrite::new(workspace::MANIFEST_PATH, json_text(&desired)?)],
            None,
        )?;
        r.details = notes.clone();
        Ok(r)
    }

    // ===== legacy =====

    fn registry_entry(action: &Action, status: LegacyStatus) -> Option<RegistryEntry> {
        let Some(ActionPayload::Legacy {
            source_path,
            target_path,
            archive_path,
            category,
            confidence,
            ..
        }) = &action.payload
        else {
            return None;
        };
        Some(RegistryEntry {
            source_path: source_path.clone(),
            status,
            target_path: (!target_path.is_empty()).then(|| target_path.clone()),
            archive_path: Some(archive_path.clone()),
            category: (!category.is_empty()).then(|| category.clone()),
            confidence: Some(*confidence),
            updated_at: None,
        })
    }

    /// Records the migration and, in archive mode, moves the source away.
    fn record_migration(&self, action: &Action, r: &mut ActionResult) -> Result<(), DocsorError> {
        let Some(ActionPayload::Legacy {
            source_path,
            archive_path,
            ..
        }) = &action.payload
        else {
            return Ok(());
        };
        let settings = &self.policy().legacy_sources;
        let registry_path = self.ws.abs(&settings.registry_path);
        let mut registry = legacy::load_registry(&registry_path)?;
        let mut status = LegacyStatus::Migrated;
        if self.mode == ApplyMode::ApplyWithArchive {
            match self.relocate(source_path, archive_path)? {
                Relocation::Moved => {
                    r.written_paths.push(source_path.clone());
                    r.written_paths.push(archive_path.clone());
                    status = LegacyStatus::Archived;
                }
                Relocation::AlreadyMoved => status = LegacyStatus::Archived,
                Relocation::SourceMissing | Relocation::TargetExists => {
                    r.details.push(format!("source {source_path} left in place"));
                }
            }
        }
        if registry.status(source_path) != Some(status) {
            if let Some(entry) = Self::registry_entry(action, status) {
                registry.upsert(entry, &self.stamp);
                legacy::save_registry(&registry_path, &registry)?;
                r.written_paths.push(settings.registry_path.clone());
            }
        }
        Ok(())
    }

    fn migrate_legacy(&mut self, action: &Action) -> Result<ActionResult, DocsorError> {
        let Some(ActionPayload::Legacy {
            source_path,
            target_path,
            archive_path,
            category,
            confidence,
            decision,
        }) = action.payload.clone()
        else {
            return Ok(self.rejected(action, "invalid_payload", "migrate_legacy needs a legacy payload".into()));
        };
        let ws = self.ws;
        let settings = &ws.policy.legacy_sources;
        if legacy::is_denylisted(&source_path, settings) {
            return Ok(self.rejected(
                action,
                "denylisted_source",
                format!("{source_path} is on the legacy denylist"),
            ));
        }
        let existing = self.read(&target_path);
        if existing
            .as_deref()
            .is_some_and(|t| t.contains(&legacy::source_marker(&source_path)))
        {
            let mut r = self.satisfied(action, "migration block present");
            let registry = legacy::load_registry(&self.ws.abs(&settings.registry_path))?;
            let finished = match registry.status(&source_path) {
                Some(LegacyStatus::Archived) | Some(LegacyStatus::Exempted) => true,
                Some(LegacyStatus::Migrated) => self.mode != ApplyMode::ApplyWithArchive,
                None => false,
            };
            if !finished {
                self.record_migration(action, &mut r)?;
                if !r.written_paths.is_empty() {
                    r.status = ActionStatus::Applied;
                    r.reason = Some("migration record completed".to_string());
                }
            }
            return Ok(r);
        }
        let Some(content) = self.read(&source_path) else {
            return Ok(self.rejected(action, "source_missing", format!("{source_path} does not exist")));
        };

        let classification = Classification {
            source_path: source_path.clone(),
            category,
            confidence,
            decision,
            rationale: action.reason.clone(),
            signals: Vec::new(),
        };
        let digest = legacy::digest(
            &source_path,
            &content,
            &archive_path,
            Some(&classification),
            &action.evidence,
        );
        let base = match existing {
            Some(text) => text,
            None => self.with_metadata(
                &target_path,
                format!("{GENERATED_MARKER}\n{}", legacy::target_header()),
            ),
        };
        let stamp = self.stamp.clone();
        let compose = |digest: &MigrationDigest| -> Vec<FileWrite> {
            let block = legacy::render_block(&source_path, digest, &stamp);
            vec![FileWrite::new(
                &target_path,
                format!("{}\n\n{}", base.trim_end(), block),
            )]
        };
        let mut r = self.drive(
            action,
            |_| Ok(compose(&digest)),
            |_, entry| {
                let mut d = digest.clone();
                overlay_digest(&mut d, entry);
                Ok(Merged::Ready(compose(&d)))
            },
        )?;
        if r.status == ActionStatus::Applied {
            self.record_migration(action, &mut r)?;
        }
        Ok(r)
    }

    fn archive_legacy(&self, action: &Action) -> Result<ActionResult, DocsorError> {
        let Some(ActionPayload::Legacy { source_path, archive_path, .. }) = &action.payload else {
            return Ok(self.rejected(action, "invalid_payload", "archive_legacy needs a legacy payload".into()));
        };
        if self.mode != ApplyMode::ApplyWithArchive {
            return Ok(skipped(action, "archive requires apply-with-archive"));
        }
        let mut r = match self.relocate(source_path, archive_path)? {
            Relocation::Moved => {
                let mut r = result(action, ActionStatus::Applied, None);
                r.written_paths = vec![source_path.clone(), archive_path.clone()];
                r
            }
            Relocation::AlreadyMoved => skipped(action, "already archived"),
            Relocation::SourceMissing => return Ok(skipped(action, "source missing")),
            Relocation::TargetExists => {
                return Ok(self.rejected(
                    action,
                    "archive_target_exists",
                    format!("{archive_path} already exists"),
                ));
            }
        };
        let settings = &self.policy().legacy_sources;
        let registry_path = self.ws.abs(&settings.registry_path);
        let mut registry = legacy::load_registry(&registry_path)?;
        if registry.status(source_path) != Some(LegacyStatus::Archived) {
            if let Some(entry) = Self::registry_entry(action, LegacyStatus::Archived) {
                registry.upsert(entry, &self.stamp);
                legacy::save_registry(&registry_path, &registry)?;
                r.written_paths.push(settings.registry_path.clone());
                r.status = ActionStatus::Applied;
            }
        }
        Ok(r)
    }

    // ===== topology =====

    fn topology_repair(&self, action: &Action) -> Result<ActionResult, DocsorError> {
        let Some(ActionPayload::Topology { issue, parent }) = &action.payload else {
            return Ok(self.rejected(action, "invalid_payload", "topology_repair needs an issue".into()));
        };
        let contract_path = self.policy().doc_topology.path.clone();
        if *issue == TopologyIssue::MissingContract {
            if self.ws.exists(&contract_path) {
                return Ok(skipped(action, "contract exists"));
            }
            let text = json_text(&self.default_contract())?;
            return self.finish(action, vec![FileWrite::new(&contract_path, text)], None);
        }

        let Some(mut contract) = topology::load_contract(&self.ws.abs(&contract_path))? else {
            return Ok(self.rejected(
                action,
                "topology_contract_missing",
                format!("{contract_path} does not exist"),
            ));
        };
        let parent = parent.clone().unwrap_or_else(|| contract.root.clone());
        match contract.nodes.iter_mut().find(|n| n.path == action.path) {
            Some(node) if node.layer == Layer::Root => {
                return Ok(skipped(action, "root node is never re-parented"));
            }
            Some(node) => {
                if *issue == TopologyIssue::Orphan || node.parent.as_deref() == Some(parent.as_str()) {
                    return Ok(skipped(action, "node already placed"));
                }
                node.parent = Some(parent);
            }
            None => {
                if *issue == TopologyIssue::OverDepth {
                    return Ok(self.rejected(
                        action,
                        "topology_node_missing",
                        format!("{} is not a contract node", action.path),
                    ));
                }
                contract.nodes.push(TopologyNode {
                    path: action.path.clone(),
                    layer: Layer::Leaf,
                    parent: Some(parent),
                    domain: domain_of(&action.path),
                });
            }
        }
        TopologyGraph::build(&contract)?;
        self.finish(action, vec![FileWrite::new(&contract_path, json_text(&contract)?)], None)
    }

    fn navigation_repair(&mut self, action: &Action) -> Result<ActionResult, DocsorError> {
        let Some(ActionPayload::Navigation { children }) = &action.payload else {
            return Ok(self.rejected(action, "invalid_payload", "navigation_repair needs children".into()));
        };
        let Some(text) = self.read(&action.path) else {
            return Ok(self.rejected(action, "target_missing", format!("{} does not exist", action.path)));
        };
        let parent = action.path.as_str();
        let missing: Vec<&String> = children
            .iter()
            .filter(|c| !links_to_path(&text, parent, c))
            .collect();
        if missing.is_empty() {
            return Ok(self.satisfied(action, "children already linked"));
        }
        let append_links = |ex: &Self, base: &str, targets: &[&String]| -> String {
            let mut out = base.to_string();
            for child in targets {
                if links_to_path(&out, parent, child) {
                    continue;
                }
                let title = doc_title(ex.read(child).as_deref(), child);
                out = markdown::append_under_heading(&out, "## Navigation", &link_line(parent, child, &title));
            }
            out
        };
        self.drive(
            action,
            |ex| Ok(vec![FileWrite::new(parent, append_links(ex, &text, &missing))]),
            |ex, entry| {
                let mut failures = Vec::new();
                let links: Vec<String> = entry.index_links.iter().map(|l| paths::normalize_rel(l)).collect();
                if links.is_empty() || links.iter().any(|l| !ex.ws.exists(l)) {
                    failures.push(codes::MISSING_NAVIGATION_TARGETS.to_string());
                }
                if missing.iter().any(|c| !links.contains(*c)) {
                    failures.push(codes::MISSING_DECLARED_NAVIGATION_TARGETS.to_string());
                }
                if !failures.is_empty() {
                    return Ok(Merged::GateFailed(failures));
                }
                let mut base = text.clone();
                if let Some(content) = &entry.content {
                    if markdown::section_range(&base, "## Navigation").is_none() {
                        base = markdown::upsert_section(&base, "## Navigation", content.trim());
                    }
                }
                let targets: Vec<&String> = links.iter().collect();
                Ok(Merged::Ready(vec![FileWrite::new(parent, append_links(ex, &base, &targets))]))
            },
        )
    }

    // ===== restructure =====

    fn merge_docs(&mut self, action: &Action) -> Result<ActionResult, DocsorError> {
        let Some(ActionPayload::Merge { title, sources }) = &action.payload else {
            return Ok(self.rejected(action, "invalid_payload", "merge_docs needs sources".into()));
        };
        if let Some(protected) = sources.iter().find(|s| self.policy().is_protected(s)) {
            return Ok(self.rejected(action, "protected_source", format!("{protected} is protected")));
        }
        let target = action.path.as_str();
        if let Some(existing) = self.read(target) {
            if !existing.contains(GENERATED_MARKER) {
                return Ok(self.rejected(
                    action,
                    "target_collision",
                    format!("{target} exists and is not generated"),
                ));
            }
            if sources
                .iter()
                .all(|s| existing.contains(&markdown::comment("source-path", s)))
            {
                return Ok(self.satisfied(action, "sources already merged"));
            }
        }
        let mut texts = Vec::with_capacity(sources.len());
        for s in sources {
            let Some(text) = self.read(s) else {
                return Ok(self.rejected(action, "source_missing", format!("{s} does not exist")));
            };
            texts.push((s.clone(), text));
        }
        self.drive(
            action,
            |ex| {
                let mut lines = vec![GENERATED_MARKER.to_string(), format!("# {title}"), String::new()];
                for (source, text) in &texts {
                    lines.push(markdown::comment("source-path", source));
                    lines.push(format!("## {}", doc_title(Some(text), source)));
                    lines.push(String::new());
                    lines.push(demote_headings(&strip_front_matter(text)));
                    lines.push(String::new());
                }
                Ok(vec![FileWrite::new(target, ex.with_metadata(target, lines.join("\n")))])
            },
            |ex, entry| {
                let mut failures = Vec::new();
                let Some(content) = &entry.content else {
                    return Ok(Merged::GateFailed(vec![codes::MISSING_CONTENT.to_string()]));
                };
                if entry.source_paths.is_empty() {
                    failures.push(codes::MISSING_SOURCE_PATHS.to_string());
                }
                if sources.iter().any(|s| !entry.source_paths.contains(s)) {
                    failures.push(codes::MISSING_DECLARED_SOURCES.to_string());
                }
                if !failures.is_empty() {
                    return Ok(Merged::GateFailed(failures));
                }
                let mut lines = vec![GENERATED_MARKER.to_string()];
                lines.extend(sources.iter().map(|s| markdown::comment("source-path", s)));
                lines.push(format!("# {title}"));
                lines.push(String::new());
                lines.push(content.trim().to_string());
                lines.push(String::new());
                Ok(Merged::Ready(vec![FileWrite::new(target, ex.with_metadata(target, lines.join("\n")))]))
            },
        )
    }

    fn split_doc(&mut self, action: &Action) -> Result<ActionResult, DocsorError> {
        let Some(ActionPayload::Split { outputs }) = &action.payload else {
            return Ok(self.rejected(action, "invalid_payload", "split_doc needs outputs".into()));
        };
        let source = action.path.as_str();
        if self.policy().is_protected(source) {
            return Ok(self.rejected(action, "protected_source", format!("{source} is protected")));
        }
        let split_marker = markdown::comment("split-from", source);
        let existing: Vec<Option<String>> = outputs.iter().map(|o| self.read(&o.path)).collect();
        if let Some((o, _)) = outputs
            .iter()
            .zip(&existing)
            .find(|(_, t)| t.as_deref().is_some_and(|t| !t.contains(GENERATED_MARKER)))
        {
            return Ok(self.rejected(
                action,
                "target_collision",
                format!("{} exists and is not generated", o.path),
            ));
        }
        if existing
            .iter()
            .all(|t| t.as_deref().is_some_and(|t| t.contains(&split_marker)))
        {
            return Ok(self.satisfied(action, "split outputs present"));
        }
        let Some(text) = self.read(source) else {
            return Ok(self.rejected(action, "source_missing", format!("{source} does not exist")));
        };
        let source_with_links = {
            let mut out = text.clone();
            for o in outputs {
                if !links_to_path(&out, source, &o.path) {
                    out = markdown::append_under_heading(&out, "## Split Documents", &link_line(source, &o.path, &o.title));
                }
            }
            out
        };
        let render = |ex: &Self, path: &str, title: &str, body: &str| -> FileWrite {
            let text = [
                GENERATED_MARKER,
                split_marker.as_str(),
                &format!("# {title}"),
                "",
                body.trim(),
                "",
            ]
            .join("\n");
            FileWrite::new(path, ex.with_metadata(path, text))
        };
        self.drive(
            action,
            |ex| {
                let chunks = partition_sections(&text, outputs.len());
                let mut writes: Vec<FileWrite> = outputs
                    .iter()
                    .zip(chunks)
                    .map(|(o, body)| render(ex, &o.path, &o.title, &body))
                    .collect();
                writes.push(FileWrite::new(source, source_with_links.clone()));
                Ok(writes)
            },
            |ex, entry| {
                let mut failures = Vec::new();
                if entry.split_outputs.is_empty() {
                    failures.push(codes::MISSING_SPLIT_OUTPUTS.to_string());
                }
                if outputs
                    .iter()
                    .any(|o| !entry.split_outputs.iter().any(|s| s.path == o.path))
                {
                    failures.push(codes::MISSING_DECLARED_SPLIT_TARGETS.to_string());
                }
                if !failures.is_empty() {
                    return Ok(Merged::GateFailed(failures));
                }
                let mut writes = Vec::with_capacity(outputs.len() + 1);
                for o in outputs {
                    if let Some(s) = entry.split_outputs.iter().find(|s| s.path == o.path) {
                        let title = s.title.as_deref().unwrap_or(&o.title);
                        writes.push(render(ex, &o.path, title, &s.content));
                    }
                }
                writes.push(FileWrite::new(source, source_with_links.clone()));
                Ok(Merged::Ready(writes))
            },
        )
    }

    // ===== progressive disclosure =====

    fn deterministic_slots(&self, rel: &str, text: &str) -> Slots {
        let progressive = &self.policy().progressive_disclosure;
        let summary = markdown::prose_lines(text)
            .into_iter()
            .map(str::trim)
            .find(|l| !l.is_empty() && !l.starts_with('#') && !l.starts_with("- "))
            .map(str::to_string)
            .unwrap_or_else(|| format!("Reference for `{rel}`."));
        let mut key_facts: Vec<String> = markdown::headings(text)
            .into_iter()
            .filter(|h| h.level == 2)
            .map(|h| format!("Covers {}.", h.text))
            .take(progressive.max_key_facts)
            .collect();
        if key_facts.is_empty() {
            key_facts.push(format!("Document path: `{rel}`."));
        }
        Slots {
            summary: output::truncate_chars(&summary, progressive.summary_max_chars),
            key_facts,
            next_steps: vec!["Review this document against the latest repository facts.".to_string()],
        }
    }

    fn semantic_rewrite(&mut self, action: &Action) -> Result<ActionResult, DocsorError> {
        let Some(text) = self.read(&action.path) else {
            return Ok(self.rejected(action, "target_missing", format!("{} does not exist", action.path)));
        };
        let progressive = self.policy().progressive_disclosure.clone();
        let missing = semantic::missing_slots(&text, &progressive.required_slots);
        if missing.is_empty() {
            return Ok(self.satisfied(action, "slots present"));
        }
        let path = action.path.as_str();
        let fallback = self.deterministic_slots(path, &text);
        self.drive(
            action,
            |_| Ok(vec![FileWrite::new(path, fill_slots(&text, &fallback, &missing))]),
            |_, entry| {
                let runtime = entry.slots.clone().unwrap_or_default();
                let pick = |slot: &str| runtime.has(slot);
                let slots = Slots {
                    summary: if pick("summary") {
                        output::truncate_chars(runtime.summary.trim(), progressive.summary_max_chars)
                    } else {
                        fallback.summary.clone()
                    },
                    key_facts: if pick("key_facts") {
                        runtime.key_facts.iter().take(progressive.max_key_facts).cloned().collect()
                    } else {
                        fallback.key_facts.clone()
                    },
                    next_steps: if pick("next_steps") {
                        runtime.next_steps.iter().take(progressive.max_next_steps).cloned().collect()
                    } else {
                        fallback.next_steps.clone()
                    },
                };
                Ok(Merged::Ready(vec![FileWrite::new(path, fill_slots(&text, &slots, &missing))]))
            },
        )
    }

    // ===== quality / freshness =====

    fn quality_repair(&mut self, action: &Action) -> Result<ActionResult, DocsorError> {
        let Some(ActionPayload::Quality { claim_ids }) = &action.payload else {
            return Ok(self.rejected(action, "invalid_payload", "quality_repair needs claim ids".into()));
        };
        let Some(text) = self.read(&action.path) else {
            return Ok(self.rejected(action, "target_missing", format!("{} does not exist", action.path)));
        };
        let conflicting: Vec<&String> = claim_ids
            .iter()
            .filter(|id| {
                let statements: std::collections::BTreeSet<String> = semantic::claim_lines(&text)
                    .into_iter()
                    .filter(|c| &c.claim_id == *id)
                    .map(|c| c.statement)
                    .collect();
                statements.len() > 1
            })
            .collect();
        if conflicting.is_empty() {
            return Ok(self.satisfied(action, "no conflicting claims"));
        }
        let path = action.path.as_str();
        self.drive(
            action,
            |_| Ok(vec![FileWrite::new(path, dedupe_claims(&text, &conflicting, None))]),
            |_, entry| {
                let chosen = match (conflicting.as_slice(), entry.statement.as_ref().or(entry.content.as_ref())) {
                    ([only], Some(statement)) => Some(semantic::render_claim_line(only, statement, &entry.citations)),
                    _ => None,
                };
                Ok(Merged::Ready(vec![FileWrite::new(
                    path,
                    dedupe_claims(&text, &conflicting, chosen.as_deref()),
                )]))
            },
        )
    }

    fn refresh_evidence(&mut self, action: &Action) -> Result<ActionResult, DocsorError> {
        let Some(text) = self.read(&action.path) else {
            return Ok(self.rejected(action, "target_missing", format!("{} does not exist", action.path)));
        };
        let settings = self.policy().doc_metadata.clone();
        let eval = metadata::evaluate(&action.path, &text, &settings, self.reference);
        if !eval.stale {
            return Ok(self.satisfied(action, "review date current"));
        }
        let restamped = metadata::ensure_block(&text, &settings, self.reference, true);
        let path = action.path.as_str();
        let day = time::format_iso_date(self.reference);
        self.drive(
            action,
            |_| Ok(vec![FileWrite::new(path, restamped.clone())]),
            |_, entry| {
                let Some(content) = entry.content.as_ref().or(entry.statement.as_ref()) else {
                    return Ok(Merged::GateFailed(vec![codes::MISSING_CONTENT.to_string()]));
                };
                let mut body = format!("Refreshed {day}: {}", content.trim());
                if !entry.citations.is_empty() {
                    body.push_str(&format!("\n\nCitations: {}", entry.citations.join(", ")));
                }
                Ok(Merged::Ready(vec![FileWrite::new(
                    path,
                    markdown::upsert_section(&restamped, "## Evidence Refresh", &body),
                )]))
            },
        )
    }
}

fn stopped(
    action: &Action,
    status: ActionStatus,
    reason: &str,
    details: Vec<String>,
    trace: SemanticRuntimeResult,
) -> ActionResult {
    let mut r = result(action, status, Some(reason));
    r.details = details;
    r.semantic_runtime = Some(trace);
    r
}

/// Runtime writes to JSON artifacts must parse.
fn json_gate(merged: Merged) -> Merged {
    match merged {
        Merged::Ready(writes)
            if writes
                .iter()
                .any(|w| w.path.ends_with(".json") && serde_json::from_str::<serde_json::Value>(&w.content).is_err()) =>
        {
            Merged::GateFailed(vec![codes::INVALID_JSON_CONTENT.to_string()])
        }
        other => other,
    }
}

fn json_text<T: Serialize>(value: &T) -> Result<String, DocsorError> {
    let mut text = serde_json::to_string_pretty(value)?;
    text.push('\n');
    Ok(text)
}

fn title_from_path(rel: &str) -> String {
    let stem = paths::basename(rel).trim_end_matches(".md");
    let stem = if stem == "index" {
        match paths::basename(paths::parent_dir(rel)) {
            "" | "docs" => "index",
            dir => dir,
        }
    } else {
        stem
    };
    stem.split(['-', '_', ' '])
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn doc_title(text: Option<&str>, rel: &str) -> String {
    text.and_then(markdown::title).unwrap_or_else(|| title_from_path(rel))
}

fn domain_of(rel: &str) -> String {
    let inner = rel.strip_prefix("docs/").unwrap_or(rel);
    match inner.split_once('/') {
        Some((dir, _)) => dir.to_string(),
        None => "general".to_string(),
    }
}

fn links_to_path(text: &str, from: &str, target: &str) -> bool {
    markdown::local_links(text)
        .iter()
        .filter_map(|t| paths::resolve_link(from, t))
        .any(|p| p == target)
}

fn link_line(from: &str, to: &str, title: &str) -> String {
    format!("- [{title}]({})", paths::relative_link(from, to))
}

fn is_front_matter(line: &str) -> bool {
    let t = line.trim();
    t == GENERATED_MARKER
        || [metadata::OWNER_KEY, metadata::LAST_REVIEWED_KEY, metadata::REVIEW_CYCLE_KEY]
            .iter()
            .any(|k| t.starts_with("<!--") && t.contains(&format!("{k}:")))
}

/// Body of a document without its metadata block, generated marker and H1.
fn strip_front_matter(text: &str) -> String {
    let mut title_seen = false;
    text.lines()
        .filter(|l| !is_front_matter(l))
        .filter(|l| {
            if !title_seen && l.starts_with("# ") {
                title_seen = true;
                return false;
            }
            true
        })
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

/// Pushes every heading one level down, leaving fenced blocks alone.
fn demote_headings(text: &str) -> String {
    let mut in_fence = false;
    text.lines()
        .map(|l| {
            if l.trim_start().starts_with("```") {
                in_fence = !in_fence;
            }
            if !in_fence && l.starts_with('#') && l.trim_start_matches('#').starts_with(' ') {
                format!("#{l}")
            } else {
                l.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Splits the body of `text` at its H2 headings into `parts` contiguous chunks.
fn partition_sections(text: &str, parts: usize) -> Vec<String> {
    let body = strip_front_matter(text);
    let lines: Vec<&str> = body.lines().collect();
    let starts: Vec<usize> = markdown::headings(&body)
        .into_iter()
        .filter(|h| h.level == 2 && h.text != "Split Documents")
        .map(|h| h.line)
        .collect();
    let mut out = vec![String::new(); parts.max(1)];
    if starts.is_empty() {
        out[0] = body.clone();
        return out;
    }
    let preamble = lines[..starts[0]].join("\n");
    for (i, start) in starts.iter().enumerate() {
        let end = starts.get(i + 1).copied().unwrap_or(lines.len());
        let slot = (i * out.len() / starts.len()).min(out.len() - 1);
        let chunk = lines[*start..end].join("\n");
        let target = &mut out[slot];
        if !target.is_empty() {
            target.push_str("\n\n");
        }
        target.push_str(chunk.trim());
    }
    if !preamble.trim().is_empty() {
        out[0] = format!("{}\n\n{}", preamble.trim(), out[0]);
    }
    out
}

fn fill_slots(text: &str, slots: &Slots, which: &[String]) -> String {
    let mut out = text.to_string();
    for slot in which {
        let Some(heading) = semantic::slot_heading(slot) else {
            continue;
        };
        let body = match slot.as_str() {
            "summary" => slots.summary.clone(),
            "key_facts" => bullets(&slots.key_facts),
            "next_steps" => bullets(&slots.next_steps),
            _ => continue,
        };
        out = markdown::upsert_section(&out, heading, &body);
    }
    out
}

fn bullets(items: &[String]) -> String {
    items
        .iter()
        .map(|i| format!("- {}", i.trim()))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Keeps one line per conflicting claim id: `chosen` when given, else the first.
fn dedupe_claims(text: &str, claim_ids: &[&String], chosen: Option<&str>) -> String {
    let mut kept: std::collections::BTreeSet<String> = std::collections::BTreeSet::new();
    let mut out = Vec::new();
    for line in text.lines() {
        match semantic::parse_claim_line(line) {
            Some(c) if claim_ids.iter().any(|id| **id == c.claim_id) => {
                if kept.insert(c.claim_id) {
                    out.push(chosen.unwrap_or(line).to_string());
                }
            }
            _ => out.push(line.to_string()),
        }
    }
    let mut joined = out.join("\n");
    joined.push('\n');
    joined
}

fn overlay_digest(digest: &mut MigrationDigest, entry: &RuntimeEntry) {
    if let Some(slots) = &entry.slots {
        if let (true, Some(first)) = (slots.has("summary"), digest.summary.first_mut()) {
            *first = slots.summary.trim().to_string();
        }
        if slots.has("key_facts") {
            digest.key_facts = slots.key_facts.clone();
        }
        if slots.has("next_steps") {
            digest.risks.extend(slots.next_steps.iter().cloned());
        }
    } else if let Some(content) = entry.content.as_ref().or(entry.statement.as_ref()) {
        if let (Some(line), Some(first)) = (
            content.lines().map(str::trim).find(|l| !l.is_empty()),
            digest.summary.first_mut(),
        ) {
            *first = line.to_string();
        }
    }
    digest.risks.extend(entry.risk_notes.iter().cloned());
    if !entry.citations.is_empty() {
        digest.trace.push(format!("Citations: {}", entry.citations.join(", ")));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::action::{LegacyDecision, Risk};
    use crate::core::facts;
    use crate::core::semantic::parse_report;
    use serde_json::json;

    fn write(root: &Path, rel: &str, text: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, text).unwrap();
    }

    fn setup(policy: serde_json::Value) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), workspace::POLICY_PATH, &policy.to_string());
        write(dir.path(), workspace::MANIFEST_PATH, r#"{"version": 1, "required": {"files": ["docs/index.md"]}}"#);
        dir
    }

    fn plan_of(actions: Vec<Action>) -> Plan {
        let digest = plan::digest_actions(&actions).unwrap();
        Plan {
            meta: plan::PlanMeta {
                generated_at: "2026-03-01T00:00:00Z".into(),
                mode: PlanMode::ApplySafe,
                reference_date: "2026-03-01".into(),
                policy_path: workspace::POLICY_PATH.into(),
                manifest_path: workspace::MANIFEST_PATH.into(),
                manifest_changed: false,
                manifest_notes: Vec::new(),
                manifest_profile: Default::default(),
                capabilities: Vec::new(),
                language: "en-US".into(),
                modules: Vec::new(),
                digest,
            },
            inputs: plan::PlanInputs::default(),
            summary: plan::PlanSummary::of(&actions),
            actions,
            legacy: None,
        }
    }

    fn claim_action() -> Action {
        Action {
            id: "A001".into(),
            action_type: ActionType::FillClaim,
            kind: TargetKind::File,
            path: "docs/index.md".into(),
            risk: Risk::Medium,
            reason: "claim has no statement".into(),
            evidence: vec!["doc spec claim".into()],
            section_id: Some("overview".into()),
            section_heading: Some("## Overview".into()),
            claim_id: Some("files".into()),
            payload: Some(ActionPayload::Claim {
                statement_template: "Repository files are scanned.".into(),
                required_evidence_types: vec!["repo_scan.files".into()],
                available_evidence_types: vec!["repo_scan.files".into()],
                allow_unknown: false,
            }),
        }
    }

    fn session(entries: serde_json::Value) -> RuntimeSession {
        RuntimeSession::from_catalog(parse_report(&json!({"version": 1, "entries": entries})))
    }

    #[test]
    fn test_create_index_then_reapply_is_skipped() {
        let dir = setup(json!({}));
        let ws = Workspace::load(dir.path()).unwrap();
        let f = facts::scan_repository(dir.path(), "2026-03-01T00:00:00Z").unwrap();
        let p = plan::plan(&ws, &f, PlanMode::Bootstrap).unwrap();
        let first = apply_plan(&ws, &p, ApplyMode::ApplySafe).unwrap();
        assert_eq!(first.summary.applied, 1);
        let index = fs::read_to_string(dir.path().join("docs/index.md")).unwrap();
        assert!(index.contains(GENERATED_MARKER));
        assert!(index.contains("doc-last-reviewed: 2026-03-01"));
        assert!(!index.contains("TODO(claim:"));

        let ws = Workspace::load(dir.path()).unwrap();
        let second = apply_plan(&ws, &p, ApplyMode::ApplySafe).unwrap();
        assert_eq!(second.summary.skipped, 1);
        assert_eq!(fs::read_to_string(dir.path().join("docs/index.md")).unwrap(), index);
    }

    #[test]
    fn test_strict_mode_errors_without_runtime_and_consumes_with_it() {
        let dir = setup(json!({"semantic_generation": {"mode": "agent_strict"}}));
        write(dir.path(), "docs/index.md", "# Index\n\n## Overview\n");
        let ws = Workspace::load(dir.path()).unwrap();
        let p = plan_of(vec![claim_action()]);

        let report = apply_with_session(&ws, &p, ApplyMode::ApplySafe, RuntimeSession::unavailable(None)).unwrap();
        let r = &report.results[0];
        assert_eq!(r.status, ActionStatus::Error);
        assert_eq!(r.reason.as_deref(), Some("runtime_required"));
        let trace = r.semantic_runtime.as_ref().unwrap();
        assert!(trace.attempted);
        assert_eq!(trace.fallback_reason, Some(FallbackReason::RuntimeUnavailable));

        let runtime = session(json!([{
            "entry_id": "files-claim", "path": "docs/index.md", "claim_id": "files",
            "statement": "The scanner lists every tracked file.",
            "citations": ["evidence://repo_scan.files"]
        }]));
        let report = apply_with_session(&ws, &p, ApplyMode::ApplySafe, runtime).unwrap();
        let r = &report.results[0];
        assert_eq!(r.status, ActionStatus::Applied);
        assert_eq!(r.semantic_runtime.as_ref().unwrap().status, SemanticStatus::Consumed);
        assert_eq!(report.runtime.consumed, 1);
        assert_eq!(report.observability.semantic_hit_rate, 1.0);
        let text = fs::read_to_string(dir.path().join("docs/index.md")).unwrap();
        assert!(text.contains(
            "- CLAIM(claim:files): The scanner lists every tracked file. (citations: evidence://repo_scan.files)"
        ));
    }

    #[test]
    fn test_grade_c_falls_back_to_template() {
        let dir = setup(json!({}));
        write(dir.path(), "docs/index.md", "# Index\n\n## Overview\n");
        let ws = Workspace::load(dir.path()).unwrap();
        let runtime = session(json!([{
            "path": "docs/index.md", "claim_id": "files",
            "statement": "Files are scanned.",
            "citations": ["evidence://custom.thing"]
        }]));
        let report = apply_with_session(&ws, &plan_of(vec![claim_action()]), ApplyMode::ApplySafe, runtime).unwrap();
        let r = &report.results[0];
        assert_eq!(r.status, ActionStatus::Applied);
        let trace = r.semantic_runtime.as_ref().unwrap();
        assert_eq!(trace.status, SemanticStatus::Fallback);
        assert_eq!(trace.grade, Some(Grade::C));
        assert_eq!(trace.fallback_reason, Some(FallbackReason::RuntimeQualityGradeC));
        let text = fs::read_to_string(dir.path().join("docs/index.md")).unwrap();
        assert!(text.contains("- CLAIM(claim:files): Repository files are scanned. (citations: evidence://repo_scan.files)"));
        assert_eq!(report.observability.fallback_reason_breakdown["runtime_quality_grade_c"], 1);
    }

    #[test]
    fn test_grade_d_blocks_fallback() {
        let dir = setup(json!({}));
        write(dir.path(), "docs/index.md", "# Index\n\n## Overview\n");
        let ws = Workspace::load(dir.path()).unwrap();
        let runtime = session(json!([{
            "path": "docs/index.md", "claim_id": "files", "status": "manual_review",
            "statement": "Files are scanned."
        }]));
        let report = apply_with_session(&ws, &plan_of(vec![claim_action()]), ApplyMode::ApplySafe, runtime).unwrap();
        let r = &report.results[0];
        assert_eq!(r.status, ActionStatus::Skipped);
        assert_eq!(r.reason.as_deref(), Some("fallback_blocked"));
        assert_eq!(r.semantic_runtime.as_ref().unwrap().status, SemanticStatus::Blocked);
        assert_eq!(fs::read_to_string(dir.path().join("docs/index.md")).unwrap(), "# Index\n\n## Overview\n");
    }

    #[test]
    fn test_migrate_legacy_archives_after_write() {
        let dir = setup(json!({"legacy_sources": {"enabled": true}}));
        write(dir.path(), "legacy/notes.md", "Meeting notes 2025-01-10\nDecision: keep the queue.\n");
        let ws = Workspace::load(dir.path()).unwrap();
        let target = "docs/history/legacy/notes.md";
        let action = Action {
            id: "A001".into(),
            action_type: ActionType::MigrateLegacy,
            kind: TargetKind::File,
            path: target.into(),
            risk: Risk::High,
            reason: "legacy source migrates into the docs tree".into(),
            evidence: vec!["legacy classification notes".into()],
            section_id: None,
            section_heading: None,
            claim_id: None,
            payload: Some(ActionPayload::Legacy {
                source_path: "legacy/notes.md".into(),
                target_path: target.into(),
                archive_path: "docs/archive/legacy/legacy/notes.md".into(),
                category: "notes".into(),
                confidence: 0.9,
                decision: LegacyDecision::AutoMigrate,
            }),
        };
        let p = plan_of(vec![action]);
        let report = apply_with_session(&ws, &p, ApplyMode::ApplyWithArchive, RuntimeSession::unavailable(None)).unwrap();
        assert_eq!(report.results[0].status, ActionStatus::Applied);
        let migrated = fs::read_to_string(dir.path().join(target)).unwrap();
        assert!(migrated.contains("<!-- legacy-source: legacy/notes.md -->"));
        assert!(migrated.contains("### Decisions"));
        assert!(!dir.path().join("legacy/notes.md").exists());
        assert!(dir.path().join("docs/archive/legacy/legacy/notes.md").exists());
        let registry = legacy::load_registry(&dir.path().join(&ws.policy.legacy_sources.registry_path)).unwrap();
        assert_eq!(registry.status("legacy/notes.md"), Some(LegacyStatus::Archived));

        let ws = Workspace::load(dir.path()).unwrap();
        let again = apply_with_session(&ws, &p, ApplyMode::ApplyWithArchive, RuntimeSession::unavailable(None)).unwrap();
        assert_eq!(again.results[0].status, ActionStatus::Skipped);
        assert_eq!(fs::read_to_string(dir.path().join(target)).unwrap(), migrated);
    }

    #[test]
    fn test_merge_rejects_non_generated_target() {
        let dir = setup(json!({}));
        write(dir.path(), "docs/a.md", "# A\n\nalpha\n");
        write(dir.path(), "docs/b.md", "# B\n\nbeta\n");
        write(dir.path(), "docs/guide.md", "# Hand written\n");
        let ws = Workspace::load(dir.path()).unwrap();
        let mut action = claim_action();
        action.action_type = ActionType::MergeDocs;
        action.path = "docs/guide.md".into();
        action.claim_id = None;
        action.payload = Some(ActionPayload::Merge {
            title: "Guide".into(),
            sources: vec!["docs/a.md".into(), "docs/b.md".into()],
        });
        let report = apply_with_session(&ws, &plan_of(vec![action.clone()]), ApplyMode::ApplySafe, RuntimeSession::unavailable(None)).unwrap();
        assert_eq!(report.results[0].status, ActionStatus::Error);
        assert_eq!(report.results[0].reason.as_deref(), Some("target_collision"));
        assert_eq!(report.observability.semantic_unattempted_without_exemption, 1);

        fs::remove_file(dir.path().join("docs/guide.md")).unwrap();
        let ws = Workspace::load(dir.path()).unwrap();
        let report = apply_with_session(&ws, &plan_of(vec![action]), ApplyMode::ApplySafe, RuntimeSession::unavailable(None)).unwrap();
        assert_eq!(report.results[0].status, ActionStatus::Applied);
        let merged = fs::read_to_string(dir.path().join("docs/guide.md")).unwrap();
        assert!(merged.contains("<!-- source-path: docs/a.md -->"));
        assert!(merged.contains("beta"));
    }

    #[test]
    fn test_paths_outside_the_repository_are_rejected() {
        let dir = setup(json!({}));
        let ws = Workspace::load(dir.path()).unwrap();
        let mut action = claim_action();
        action.path = "../escape.md".into();
        let report = apply_with_session(&ws, &plan_of(vec![action]), ApplyMode::ApplySafe, RuntimeSession::unavailable(None)).unwrap();
        assert_eq!(report.results[0].status, ActionStatus::Error);
        assert_eq!(report.results[0].reason.as_deref(), Some("unsafe_path"));
        assert!(report.results[0].details[0].starts_with("Path error:"));
        assert!(!dir.path().parent().unwrap().join("escape.md").exists());
    }

    #[test]
    fn test_partition_sections_is_contiguous() {
        let text = "# Big\n\nintro\n\n## One\n1\n\n## Two\n2\n\n## Three\n3\n";
        let parts = partition_sections(text, 2);
        assert_eq!(parts.len(), 2);
        assert!(parts[0].starts_with("intro"));
        assert!(parts[0].contains("## One"));
        assert!(parts[0].contains("## Two"));
        assert_eq!(parts[1], "## Three\n3");
    }

    #[test]
    fn test_title_from_path() {
        assert_eq!(title_from_path("docs/dev-guide.md"), "Dev Guide");
        assert_eq!(title_from_path("docs/index.md"), "Index");
        assert_eq!(title_from_path("docs/ops/index.md"), "Ops");
    }
}
