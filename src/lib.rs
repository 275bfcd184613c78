//! docsor: a documentation system-of-record maintainer.
//!
//! **docsor keeps a repository's docs truthful, structured and navigable.**
//!
//! It derives a deterministic action plan from a repository facts snapshot, a policy, a
//! manifest and an optional doc spec; executes that plan with optional agent-produced
//! semantic content; and validates the result with hard gates.
//!
//! # Core Principles
//!
//! - **Deterministic**: same inputs, same plan, same digest
//! - **Fail-closed**: ungraded or low-grade semantic content is never consumed silently
//! - **Additive**: manifests and navigation only grow; non-generated docs are never replaced
//! - **Bounded**: the repair loop stops after a configured number of iterations
//!
//! # For AI Agents
//!
//! **You MUST:**
//! 1. Produce the runtime semantic report before `docsor apply` when semantic-first is on
//! 2. Never hand-edit managed artifacts under `docs/.doc-*.json`
//! 3. Run `docsor validate` before completion; a failing gate is a failing change
//!
//! # Examples
//!
//! ```bash
//! docsor scan
//! docsor plan --mode bootstrap
//! docsor apply --mode apply-safe
//! docsor validate --changed-file docs/runbook.md
//! docsor garden --max-repair-iterations 2
//! docsor synthesize
//! docsor agents --check
//! ```
//!
//! # Crate Structure
//!
//! - [`core`]: planner, executor, semantic grading, topology, validator and garden loop

mod cli;
pub mod core;

use crate::cli::{Cli, Command, OutputFormat};
use crate::core::error::{self, DocsorError};
use crate::core::facts::{self, Facts};
use crate::core::garden::{self, GardenRequest};
use crate::core::plan::{self, PlanMode};
use crate::core::policy::ApplyMode;
use crate::core::validate::{self, ValidateRequest};
use crate::core::workspace::{ArtifactPaths, Workspace};
use crate::core::agents::{self, GenerationStatus};
use crate::core::synthesize;
use crate::core::{apply, output, time};

use clap::Parser;
use colored::Colorize;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{debug, info};

/// Defaults a `docsor.toml` may set; CLI flags override them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunDefaults {
    pub plan_mode: Option<PlanMode>,
    pub apply_mode: Option<ApplyMode>,
}

/// Optional `docsor.toml` run configuration.
///
/// ```toml
/// [artifacts]
/// plan = "build/doc-plan.json"
///
/// [defaults]
/// plan_mode = "audit"
/// apply_mode = "apply-safe"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub artifacts: ArtifactPaths,
    pub defaults: RunDefaults,
}

impl RunConfig {
    /// A missing file yields defaults; malformed TOML is a `ConfigError`.
    pub fn load(path: &Path) -> Result<Self, DocsorError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| error::config_error(&path.display().to_string(), e))
    }
}

struct Context {
    root: PathBuf,
    config: RunConfig,
    format: OutputFormat,
}

impl Context {
    fn artifact(&self, rel: &str) -> PathBuf {
        self.root.join(rel)
    }

    /// The saved facts snapshot, or a fresh scan when none exists yet.
    fn facts(&self, rescan: bool) -> Result<Facts, DocsorError> {
        let path = self.artifact(&self.config.artifacts.facts);
        if !rescan {
            if let Some(f) = facts::load_facts(&path)? {
                return Ok(f);
            }
            info!(path = %path.display(), "facts snapshot missing; scanning");
        }
        let f = facts::scan_repository(&self.root, &time::now_rfc3339())?;
        facts::save_facts(&path, &f)?;
        Ok(f)
    }

    fn emit(&self, cmd: &str, ok: bool, report: serde_json::Value, text: &[String]) -> Result<(), DocsorError> {
        match self.format {
            OutputFormat::Json => {
                let status = if ok { "ok" } else { "failed" };
                let envelope = time::command_envelope(cmd, status, serde_json::json!({ "report": report }));
                println!("{}", serde_json::to_string_pretty(&envelope)?);
            }
            OutputFormat::Text => {
                for line in text {
                    println!("{line}");
                }
                let mark = if ok { "✓".bright_green() } else { "✗".bright_red() };
                println!("{} {}: {}", mark, cmd.bright_cyan(), if ok { "ok" } else { "failed" });
            }
        }
        Ok(())
    }
}

fn exit_for(ok: bool) -> ExitCode {
    if ok { ExitCode::SUCCESS } else { ExitCode::FAILURE }
}

pub fn run() -> Result<ExitCode, DocsorError> {
    let cli = Cli::parse();
    let root = match cli.root {
        Some(r) => r,
        None => std::env::current_dir()?,
    };
    if !root.is_dir() {
        return Err(DocsorError::NotFound(format!("repository root {}", root.display())));
    }
    let config_path = if cli.config.is_absolute() {
        cli.config.clone()
    } else {
        root.join(&cli.config)
    };
    let ctx = Context {
        config: RunConfig::load(&config_path)?,
        root,
        format: cli.format,
    };

    match cli.command {
        Command::Scan(scan_cli) => {
            let generated_at = scan_cli.generated_at.unwrap_or_else(time::now_rfc3339);
            let f = facts::scan_repository(&ctx.root, &generated_at)?;
            let path = ctx.artifact(&ctx.config.artifacts.facts);
            facts::save_facts(&path, &f)?;
            ctx.emit(
                "scan",
                true,
                serde_json::to_value(&f)?,
                &[format!(
                    "scan: files={} modules={} evidence={} -> {}",
                    f.files.len(),
                    f.modules.len(),
                    f.evidence_types.join(","),
                    path.display()
                )],
            )?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Plan(plan_cli) => {
            let ws = Workspace::load(&ctx.root)?;
            let f = ctx.facts(plan_cli.rescan)?;
            let mode = plan_cli
                .mode
                .or(ctx.config.defaults.plan_mode)
                .unwrap_or_default();
            let p = plan::plan(&ws, &f, mode)?;
            plan::save_plan(&ctx.artifact(&ctx.config.artifacts.plan), &p)?;
            let mut lines = vec![format!(
                "plan: mode={} actions={} drift={} digest={}",
                mode.as_str(),
                p.summary.action_count,
                p.summary.has_actionable_drift,
                output::truncate_chars(&p.meta.digest, 12)
            )];
            lines.extend(
                p.actions
                    .iter()
                    .map(|a| format!("  {} {} {} ({})", a.id, a.action_type, a.path, a.reason)),
            );
            ctx.emit("plan", true, serde_json::to_value(&p)?, &lines)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Apply(apply_cli) => {
            let ws = Workspace::load(&ctx.root)?;
            let plan_path = ctx.artifact(&ctx.config.artifacts.plan);
            let p = plan::load_plan(&plan_path)?
                .ok_or_else(|| DocsorError::NotFound(format!("plan {}; run `docsor plan` first", plan_path.display())))?;
            let mode = apply_cli
                .mode
                .or(ctx.config.defaults.apply_mode)
                .unwrap_or_default();
            let report = apply::apply_plan(&ws, &p, mode)?;
            apply::save_apply_report(&ctx.artifact(&ctx.config.artifacts.apply_report), &report)?;
            let ok = !report.has_errors();
            let mut lines = vec![format!(
                "apply: mode={} applied={} skipped={} errors={} semantic_hit_rate={:.2}",
                mode.as_str(),
                report.summary.applied,
                report.summary.skipped,
                report.summary.errors,
                report.observability.semantic_hit_rate
            )];
            lines.extend(report.results.iter().map(|r| {
                format!(
                    "  {} {} {} {:?} {}",
                    r.id,
                    r.action_type,
                    r.path,
                    r.status,
                    r.reason.as_deref().unwrap_or("")
                )
            }));
            ctx.emit("apply", ok, serde_json::to_value(&report)?, &lines)?;
            Ok(exit_for(ok))
        }
        Command::Validate(validate_cli) => {
            let f = ctx.facts(false)?;
            let scoped = validate_cli.scoped || !validate_cli.changed_files.is_empty();
            let request = ValidateRequest {
                scope_files: scoped.then_some(validate_cli.changed_files),
                fail_on_drift: validate_cli.fail_on_drift,
                fail_on_freshness: validate_cli.fail_on_freshness,
                apply_report_path: ctx.config.artifacts.apply_report.clone(),
                reference_date: None,
            };
            let report = validate::validate(&ctx.root, &f, &request)?;
            validate::save_validation_report(&ctx.artifact(&ctx.config.artifacts.validate_report), &report)?;
            let mut lines = vec![format!(
                "validate: scope={:?}{} docs={} errors={} warnings={}",
                report.scope.effective_mode,
                report
                    .scope
                    .upgrade_reason
                    .as_deref()
                    .map(|r| format!(" ({r})"))
                    .unwrap_or_default(),
                report.scope.docs.len(),
                report.errors.len(),
                report.warnings.len()
            )];
            if !report.errors.is_empty() {
                lines.push(format!(
                    "validate: failures {}: {}",
                    report.errors.len(),
                    output::preview_messages(&report.errors, 2, 110)
                ));
            }
            if !report.warnings.is_empty() {
                lines.push(format!(
                    "validate: warnings {}: {}",
                    report.warnings.len(),
                    output::preview_messages(&report.warnings, 2, 110)
                ));
            }
            if let Some(err) = report.failure() {
                debug!(error = %err, "validation failed");
            }
            ctx.emit("validate", report.passed, serde_json::to_value(&report)?, &lines)?;
            Ok(exit_for(report.passed))
        }
        Command::Garden(garden_cli) => {
            let request = GardenRequest {
                plan_mode: garden_cli
                    .plan_mode
                    .or(ctx.config.defaults.plan_mode)
                    .unwrap_or_default(),
                apply_mode: garden_cli.apply_mode.or(ctx.config.defaults.apply_mode),
                fail_on_drift: garden_cli.fail_on_drift(),
                fail_on_freshness: garden_cli.fail_on_freshness(),
                max_repair_iterations: garden_cli.max_repair_iterations,
                generated_at: garden_cli.generated_at.clone(),
                artifacts: ctx.config.artifacts.clone(),
            };
            let report = garden::run_garden(&ctx.root, &request)?;
            let ok = report.is_success();
            let mut lines = vec![format!(
                "garden: status={} attempts={}/{} apply_mode={}",
                report.status.as_str(),
                report.attempts,
                report.max_repair_iterations,
                report.apply_mode.as_str()
            )];
            if !report.remaining_failures.is_empty() {
                lines.push(format!(
                    "garden: remaining {}: {}",
                    report.remaining_failures.len(),
                    output::preview_messages(&report.remaining_failures, 3, 110)
                ));
            }
            if let Some(err) = report.failure() {
                lines.push(format!("garden: {err}"));
            }
            ctx.emit("garden", ok, serde_json::to_value(&report)?, &lines)?;
            Ok(exit_for(ok))
        }
        Command::Synthesize(synth_cli) => {
            let ws = Workspace::load(&ctx.root)?;
            let f = ctx.facts(false)?;
            let map = synthesize::synthesize(&ws, Some(&f), &time::now_rfc3339())?;
            let path = ctx.artifact(&ctx.config.artifacts.evidence_map);
            if !synth_cli.dry_run {
                synthesize::save_evidence_map(&path, &map)?;
            }
            let mut lines = vec![format!(
                "synthesize: claims={} supported={} unknown={} missing={}{}",
                map.metrics.claims,
                map.metrics.supported,
                map.metrics.unknown,
                map.metrics.missing,
                if synth_cli.dry_run { String::new() } else { format!(" -> {}", path.display()) }
            )];
            lines.extend(map.warnings.iter().map(|w| format!("synthesize: warning: {w}")));
            ctx.emit("synthesize", true, serde_json::to_value(&map)?, &lines)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Agents(agents_cli) => {
            let ws = Workspace::load(&ctx.root)?;
            let mut lines = Vec::new();
            let mut generation = None;
            if !agents_cli.check {
                let f = ctx.facts(false)?;
                let mut g = agents::generate(&ws, &ws.manifest, &f.modules, agents_cli.force);
                if !agents_cli.dry_run {
                    agents::write_generation(&ws, &mut g)?;
                }
                lines.push(format!(
                    "agents: status={:?} lines={} written={}{}",
                    g.report.status,
                    g.report.line_count,
                    g.report.written,
                    g.report.reason.as_deref().map(|r| format!(" ({r})")).unwrap_or_default()
                ));
                if agents_cli.dry_run && g.report.status != GenerationStatus::Skipped {
                    lines.push(g.content.clone());
                }
                generation = Some(g);
            }
            let evaluate = !agents_cli.dry_run
                && generation
                    .as_ref()
                    .is_none_or(|g| g.report.status != GenerationStatus::Skipped);
            let evaluation = evaluate.then(|| agents::evaluate(&ws));
            if let Some(eval) = &evaluation {
                lines.push(format!(
                    "agents: checks {} overlap={:.2}",
                    if eval.passed { "passed".to_string() } else { eval.failed_checks.join(",") },
                    eval.metrics.overlap_ratio
                ));
                lines.extend(eval.errors.iter().map(|e| format!("  error: {e}")));
                lines.extend(eval.warnings.iter().map(|w| format!("  warning: {w}")));
            }
            let ok = evaluation.as_ref().is_none_or(|e| e.passed);
            let report = serde_json::json!({
                "generation": generation.map(|g| g.report),
                "evaluation": evaluation,
            });
            ctx.emit("agents", ok, report, &lines)?;
            Ok(exit_for(ok))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_config_defaults_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let config = RunConfig::load(&dir.path().join("docsor.toml")).unwrap();
        assert_eq!(config, RunConfig::default());
    }

    #[test]
    fn test_run_config_overrides_artifacts_and_modes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("docsor.toml");
        fs::write(
            &path,
            "[artifacts]\nplan = \"build/plan.json\"\n\n[defaults]\nplan_mode = \"repair\"\napply_mode = \"none\"\n",
        )
        .unwrap();
        let config = RunConfig::load(&path).unwrap();
        assert_eq!(config.artifacts.plan, "build/plan.json");
        assert_eq!(config.artifacts.facts, crate::core::workspace::FACTS_PATH);
        assert_eq!(config.defaults.plan_mode, Some(PlanMode::Repair));
        assert_eq!(config.defaults.apply_mode, Some(ApplyMode::None));
    }

    #[test]
    fn test_run_config_rejects_malformed_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("docsor.toml");
        fs::write(&path, "[artifacts\n").unwrap();
        assert!(RunConfig::load(&path).unwrap_err().is_config());
    }
}
