//! Garden: bounded plan → apply → validate repair loop.
//!
//! # For AI Agents
//!
//! - **The loop is bounded** by `doc_gardening.max_repair_iterations`; it never retries past it
//! - **Exhaustion is a failure**: `exhausted-fail` carries the checks that still fail
//! - **Repair iterations re-plan in `repair` mode** and run even when the repair plan is empty
//! - **Configuration errors abort** with `aborted-config-error` before anything is planned
//!
//! Every run writes the JSON and markdown garden reports, including skipped and aborted runs.

use crate::core::apply::{self, ApplyReport};
use crate::core::error::DocsorError;
use crate::core::facts::{self, Facts};
use crate::core::plan::{self, PlanMode};
use crate::core::policy::{ApplyMode, GardeningSettings};
use crate::core::validate::{self, ValidateRequest, ValidationReport};
use crate::core::workspace::{ArtifactPaths, Workspace};
use crate::core::{output, time};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};

/// `stop_reason` when validation fails only on checks a repair plan cannot fix.
pub const NO_REPAIRABLE_FAILURES: &str = "no_repairable_failures";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GardenStatus {
    Running,
    Repaired,
    ExhaustedFail,
    AbortedConfigError,
    Skipped,
}

impl GardenStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            GardenStatus::Running => "running",
            GardenStatus::Repaired => "repaired",
            GardenStatus::ExhaustedFail => "exhausted-fail",
            GardenStatus::AbortedConfigError => "aborted-config-error",
            GardenStatus::Skipped => "skipped",
        }
    }
}

/// Caller overrides; `None` falls back to the policy's `doc_gardening` settings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GardenRequest {
    pub plan_mode: PlanMode,
    pub apply_mode: Option<ApplyMode>,
    pub fail_on_drift: Option<bool>,
    pub fail_on_freshness: Option<bool>,
    pub max_repair_iterations: Option<usize>,
    /// Timestamp stamped into the facts snapshot; defaults to now.
    pub generated_at: Option<String>,
    pub artifacts: ArtifactPaths,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GardenIteration {
    pub iteration: usize,
    pub plan_mode: PlanMode,
    pub action_count: usize,
    pub applied: usize,
    pub skipped: usize,
    pub errors: usize,
    pub validation_passed: bool,
    pub validation_errors: usize,
    pub validation_warnings: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GardenReport {
    pub generated_at: String,
    pub root: String,
    pub status: GardenStatus,
    /// Repair iterations run after the initial pass.
    pub attempts: usize,
    pub max_repair_iterations: usize,
    pub plan_mode: PlanMode,
    pub apply_mode: ApplyMode,
    pub fail_on_drift: bool,
    pub fail_on_freshness: bool,
    pub iterations: Vec<GardenIteration>,
    pub remaining_failures: Vec<String>,
    /// Set when the loop ended before the iteration bound.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl GardenReport {
    pub fn is_success(&self) -> bool {
        matches!(self.status, GardenStatus::Repaired | GardenStatus::Skipped)
    }

    pub fn failure(&self) -> Option<DocsorError> {
        match self.status {
            GardenStatus::ExhaustedFail => Some(DocsorError::RepairExhausted(format!(
                "{} failure(s) after {} attempt(s)",
                self.remaining_failures.len(),
                self.attempts
            ))),
            GardenStatus::AbortedConfigError => Some(DocsorError::ConfigError(
                self.error.clone().unwrap_or_default(),
            )),
            _ => None,
        }
    }
}

pub fn render_markdown(report: &GardenReport) -> String {
    let mut lines = vec![
        "# Doc Garden Report".to_string(),
        String::new(),
        format!("- Generated at: {}", report.generated_at),
        format!("- Root: {}", report.root),
        format!("- Status: {}", report.status.as_str()),
        format!("- Plan mode: {}", report.plan_mode.as_str()),
        format!("- Apply mode: {}", report.apply_mode.as_str()),
        format!(
            "- Repair attempts: {}/{}",
            report.attempts, report.max_repair_iterations
        ),
    ];
    if let Some(reason) = &report.stop_reason {
        lines.push(format!("- Stopped: {reason}"));
    }
    if let Some(error) = &report.error {
        lines.push(format!("- Error: {error}"));
    }
    if !report.iterations.is_empty() {
        lines.extend([String::new(), "## Iterations".to_string(), String::new()]);
        for it in &report.iterations {
            lines.push(format!(
                "- #{} `{}` actions={} applied={} skipped={} errors={} validate={} (errors={}, warnings={})",
                it.iteration,
                it.plan_mode.as_str(),
                it.action_count,
                it.applied,
                it.skipped,
                it.errors,
                if it.validation_passed { "passed" } else { "failed" },
                it.validation_errors,
                it.validation_warnings
            ));
        }
    }
    if !report.remaining_failures.is_empty() {
        lines.extend([String::new(), "## Remaining Failures".to_string(), String::new()]);
        lines.extend(report.remaining_failures.iter().map(|f| format!("- {f}")));
    }
    lines.push(String::new());
    lines.join("\n")
}

struct Garden<'a> {
    root: &'a Path,
    request: &'a GardenRequest,
    generated_at: String,
}

/// Runs the garden loop at `root` and writes its reports. Only I/O failures surface
/// as `Err`; configuration problems become an `aborted-config-error` report.
pub fn run_garden(root: &Path, request: &GardenRequest) -> Result<GardenReport, DocsorError> {
    let generated_at = request.generated_at.clone().unwrap_or_else(time::now_rfc3339);
    let mut report = GardenReport {
        generated_at: generated_at.clone(),
        root: root.display().to_string(),
        status: GardenStatus::Running,
        attempts: 0,
        max_repair_iterations: 0,
        plan_mode: request.plan_mode,
        apply_mode: request.apply_mode.unwrap_or_default(),
        fail_on_drift: false,
        fail_on_freshness: false,
        iterations: Vec::new(),
        remaining_failures: Vec::new(),
        stop_reason: None,
        error: None,
    };
    let garden = Garden {
        root,
        request,
        generated_at,
    };
    let mut settings = GardeningSettings::default();
    match garden.run(&mut report, &mut settings) {
        Ok(()) => {}
        Err(e) if e.is_config() => {
            warn!(error = %e, "garden aborted on configuration error");
            report.status = GardenStatus::AbortedConfigError;
            report.error = Some(e.to_string());
        }
        Err(e) => return Err(e),
    }
    output::write_json(&root.join(&settings.report_json), &report)?;
    output::write_text(&root.join(&settings.report_md), &render_markdown(&report))?;
    info!(
        status = report.status.as_str(),
        attempts = report.attempts,
        "garden finished"
    );
    Ok(report)
}

impl Garden<'_> {
    fn run(&self, report: &mut GardenReport, settings: &mut GardeningSettings) -> Result<(), DocsorError> {
        let ws = Workspace::load(self.root)?;
        *settings = ws.policy.doc_gardening.clone();
        report.apply_mode = self.request.apply_mode.unwrap_or(settings.apply_mode);
        report.fail_on_drift = self.request.fail_on_drift.unwrap_or(settings.fail_on_drift);
        report.fail_on_freshness = self
            .request
            .fail_on_freshness
            .unwrap_or(settings.fail_on_freshness);
        report.max_repair_iterations = self
            .request
            .max_repair_iterations
            .unwrap_or(settings.max_repair_iterations);
        if !settings.enabled {
            info!("doc_gardening disabled by policy");
            report.status = GardenStatus::Skipped;
            return Ok(());
        }

        let mut validation = self.pass(ws, report, 0, self.request.plan_mode)?;
        for iteration in 1..=report.max_repair_iterations {
            if validation.passed {
                break;
            }
            if !validation.has_repairable_failure() {
                info!(
                    failures = validation.errors.len(),
                    "no repairable failures; stopping repair loop"
                );
                report.stop_reason = Some(NO_REPAIRABLE_FAILURES.to_string());
                break;
            }
            info!(
                iteration,
                failures = validation.errors.len(),
                "repair iteration"
            );
            let ws = Workspace::load(self.root)?;
            validation = self.pass(ws, report, iteration, PlanMode::Repair)?;
            report.attempts = iteration;
        }
        if validation.passed {
            report.status = GardenStatus::Repaired;
        } else {
            report.status = GardenStatus::ExhaustedFail;
            report.remaining_failures = validation.errors;
        }
        Ok(())
    }

    fn scan(&self) -> Result<Facts, DocsorError> {
        let facts = facts::scan_repository(self.root, &self.generated_at)?;
        facts::save_facts(&self.root.join(&self.request.artifacts.facts), &facts)?;
        Ok(facts)
    }

    /// One scan → plan → apply → rescan → validate pass.
    fn pass(
        &self,
        mut ws: Workspace,
        report: &mut GardenReport,
        iteration: usize,
        mode: PlanMode,
    ) -> Result<ValidationReport, DocsorError> {
        let artifacts = &self.request.artifacts;
        let mut facts = self.scan()?;
        let plan = plan::plan(&ws, &facts, mode)?;
        plan::save_plan(&self.root.join(&artifacts.plan), &plan)?;

        let mut applied: Option<ApplyReport> = None;
        if report.apply_mode != ApplyMode::None {
            let result = apply::apply_plan(&ws, &plan, report.apply_mode)?;
            apply::save_apply_report(&self.root.join(&artifacts.apply_report), &result)?;
            applied = Some(result);
            facts = self.scan()?;
            ws = Workspace::load(self.root)?;
        }

        let request = ValidateRequest {
            scope_files: None,
            fail_on_drift: report.fail_on_drift,
            fail_on_freshness: report.fail_on_freshness,
            apply_report_path: artifacts.apply_report.clone(),
            reference_date: time::parse_reference_date(&self.generated_at),
        };
        let validation = validate::validate_workspace(&ws, &facts, &request)?;
        validate::save_validation_report(&self.root.join(&artifacts.validate_report), &validation)?;

        let summary = applied.map(|a| a.summary).unwrap_or_default();
        report.iterations.push(GardenIteration {
            iteration,
            plan_mode: mode,
            action_count: plan.actions.len(),
            applied: summary.applied,
            skipped: summary.skipped,
            errors: summary.errors,
            validation_passed: validation.passed,
            validation_errors: validation.errors.len(),
            validation_warnings: validation.warnings.len(),
        });
        Ok(validation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::workspace;
    use serde_json::json;
    use std::fs;

    fn write(root: &Path, rel: &str, text: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, text).unwrap();
    }

    fn request() -> GardenRequest {
        GardenRequest {
            generated_at: Some("2026-03-01T00:00:00Z".to_string()),
            ..GardenRequest::default()
        }
    }

    #[test]
    fn test_disabled_gardening_writes_skipped_report() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), workspace::POLICY_PATH, r#"{"doc_gardening": {"enabled": false}}"#);
        let report = run_garden(dir.path(), &request()).unwrap();
        assert_eq!(report.status, GardenStatus::Skipped);
        assert!(report.is_success());
        assert!(report.iterations.is_empty());
        let md = fs::read_to_string(dir.path().join("docs/.doc-garden-report.md")).unwrap();
        assert!(md.starts_with("# Doc Garden Report"));
        assert!(md.contains("- Status: skipped"));
        assert!(dir.path().join("docs/.doc-garden-report.json").exists());
    }

    #[test]
    fn test_malformed_policy_aborts() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), workspace::POLICY_PATH, "{not json");
        let report = run_garden(dir.path(), &request()).unwrap();
        assert_eq!(report.status, GardenStatus::AbortedConfigError);
        assert!(report.error.is_some());
        assert!(!report.is_success());
        assert!(!dir.path().join(workspace::PLAN_PATH).exists());
    }

    #[test]
    fn test_unsatisfiable_evidence_exhausts_repairs() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            workspace::POLICY_PATH,
            &json!({"doc_gardening": {"max_repair_iterations": 2}}).to_string(),
        );
        write(
            dir.path(),
            workspace::MANIFEST_PATH,
            r#"{"version": 1, "required": {"files": ["docs/index.md"]}}"#,
        );
        write(
            dir.path(),
            workspace::DOC_SPEC_PATH,
            &json!({
                "version": 1,
                "documents": [{
                    "path": "docs/index.md",
                    "required_sections": [],
                    "sections": [{
                        "section_id": "overview",
                        "claims": [
                            {"claim_id": "slo", "statement_template": "SLO is met.", "required_evidence_types": ["metrics.slo"]}
                        ]
                    }]
                }]
            })
            .to_string(),
        );
        let report = run_garden(dir.path(), &request()).unwrap();
        assert_eq!(report.status, GardenStatus::ExhaustedFail);
        assert_eq!(report.attempts, 2);
        assert_eq!(report.iterations.len(), 3);
        assert_eq!(report.iterations[1].plan_mode, PlanMode::Repair);
        assert!(report
            .remaining_failures
            .iter()
            .any(|f| f.starts_with("doc-quality: evidence_coverage")));
        let md = fs::read_to_string(dir.path().join("docs/.doc-garden-report.md")).unwrap();
        assert!(md.contains("## Remaining Failures"));
    }

    #[test]
    fn test_unrepairable_failures_stop_the_loop_early() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            workspace::POLICY_PATH,
            &json!({"doc_quality_gates": {"enabled": false}}).to_string(),
        );
        write(
            dir.path(),
            workspace::MANIFEST_PATH,
            r#"{"version": 1, "required": {"files": ["docs/index.md"]}}"#,
        );
        write(
            dir.path(),
            "docs/index.md",
            "<!-- doc-owner: docs -->\n<!-- doc-last-reviewed: 2026-02-20 -->\n<!-- doc-review-cycle-days: 90 -->\n# Index\n\n- [Gone](./gone.md)\n",
        );
        let request = GardenRequest {
            fail_on_drift: Some(false),
            ..request()
        };
        let report = run_garden(dir.path(), &request).unwrap();
        assert_eq!(report.status, GardenStatus::ExhaustedFail);
        assert_eq!(report.attempts, 0);
        assert_eq!(report.iterations.len(), 1);
        assert_eq!(report.stop_reason.as_deref(), Some(NO_REPAIRABLE_FAILURES));
        assert!(report
            .remaining_failures
            .contains(&"broken link in docs/index.md: ./gone.md".to_string()));
        let md = fs::read_to_string(dir.path().join("docs/.doc-garden-report.md")).unwrap();
        assert!(md.contains("- Stopped: no_repairable_failures"));
    }

    #[test]
    fn test_render_markdown_lists_iterations() {
        let report = GardenReport {
            generated_at: "2026-03-01T00:00:00Z".into(),
            root: "/repo".into(),
            status: GardenStatus::Repaired,
            attempts: 1,
            max_repair_iterations: 3,
            plan_mode: PlanMode::Audit,
            apply_mode: ApplyMode::ApplySafe,
            fail_on_drift: true,
            fail_on_freshness: true,
            iterations: vec![GardenIteration {
                iteration: 1,
                plan_mode: PlanMode::Repair,
                action_count: 2,
                applied: 2,
                skipped: 0,
                errors: 0,
                validation_passed: true,
                validation_errors: 0,
                validation_warnings: 1,
            }],
            remaining_failures: Vec::new(),
            stop_reason: None,
            error: None,
        };
        let md = render_markdown(&report);
        assert!(md.contains("- Status: repaired"));
        assert!(md.contains("- #1 `repair` actions=2 applied=2"));
        assert!(!md.contains("Remaining Failures"));
    }
}
