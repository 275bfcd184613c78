//! CLI struct definitions for the docsor command-line interface.
//!
//! All clap-derived types live here. Dispatch lives in `lib.rs`.

use crate::core::plan::PlanMode;
use crate::core::policy::ApplyMode;

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(
    name = "docsor",
    version = env!("CARGO_PKG_VERSION"),
    about = "Keeps a repository's documentation corpus as a system of record: scan, plan, apply, validate, garden, synthesize, agents."
)]
pub(crate) struct Cli {
    /// Repository root (defaults to the current directory).
    #[clap(long, global = true)]
    pub root: Option<PathBuf>,
    /// Run configuration file, relative to the root unless absolute.
    #[clap(long, global = true, default_value = "docsor.toml")]
    pub config: PathBuf,
    /// Output format.
    #[clap(long, global = true, value_enum, default_value = "text")]
    pub format: OutputFormat,
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Command {
    /// Scan the repository and write the facts snapshot
    Scan(ScanCli),
    /// Compute the action plan from facts, policy, manifest and doc spec
    Plan(PlanCli),
    /// Execute a saved plan
    Apply(ApplyCli),
    /// Re-derive metrics and apply the pass/fail gates
    Validate(ValidateCli),
    /// Run the bounded plan/apply/validate repair loop
    Garden(GardenCli),
    /// Bind doc spec claims to evidence and write the evidence map
    Synthesize(SynthesizeCli),
    /// Generate AGENTS.md and check it
    Agents(AgentsCli),
}

#[derive(clap::Args, Debug)]
pub(crate) struct ScanCli {
    /// Timestamp stamped into the snapshot (RFC3339); defaults to now.
    #[clap(long)]
    pub generated_at: Option<String>,
}

#[derive(clap::Args, Debug)]
pub(crate) struct PlanCli {
    /// bootstrap | audit | apply-safe | apply-with-archive | repair
    #[clap(long, value_parser = parse_plan_mode)]
    pub mode: Option<PlanMode>,
    /// Rescan instead of reading the saved facts snapshot.
    #[clap(long)]
    pub rescan: bool,
}

#[derive(clap::Args, Debug)]
pub(crate) struct ApplyCli {
    /// none | apply-safe | apply-with-archive
    #[clap(long, value_parser = parse_apply_mode)]
    pub mode: Option<ApplyMode>,
}

#[derive(clap::Args, Debug)]
pub(crate) struct ValidateCli {
    /// Validate only docs affected by these changed files (repeatable).
    #[clap(long = "changed-file")]
    pub changed_files: Vec<String>,
    /// Request scoped validation even when no changed file is given.
    #[clap(long)]
    pub scoped: bool,
    /// Treat actionable drift as an error.
    #[clap(long)]
    pub fail_on_drift: bool,
    /// Treat stale doc metadata as an error.
    #[clap(long)]
    pub fail_on_freshness: bool,
}

#[derive(clap::Args, Debug)]
pub(crate) struct GardenCli {
    /// Plan mode of the initial pass: audit | apply-with-archive
    #[clap(long, value_parser = parse_plan_mode)]
    pub plan_mode: Option<PlanMode>,
    /// Overrides doc_gardening.apply_mode.
    #[clap(long, value_parser = parse_apply_mode)]
    pub apply_mode: Option<ApplyMode>,
    #[clap(long, conflicts_with = "no_fail_on_drift")]
    pub fail_on_drift: bool,
    #[clap(long)]
    pub no_fail_on_drift: bool,
    #[clap(long, conflicts_with = "no_fail_on_freshness")]
    pub fail_on_freshness: bool,
    #[clap(long)]
    pub no_fail_on_freshness: bool,
    /// Overrides doc_gardening.max_repair_iterations.
    #[clap(long)]
    pub max_repair_iterations: Option<usize>,
    /// Timestamp stamped into the facts snapshot (RFC3339); defaults to now.
    #[clap(long)]
    pub generated_at: Option<String>,
}

#[derive(clap::Args, Debug)]
pub(crate) struct SynthesizeCli {
    /// Print the evidence map without writing it.
    #[clap(long)]
    pub dry_run: bool,
}

#[derive(clap::Args, Debug)]
pub(crate) struct AgentsCli {
    /// Generate even when disabled by policy or when AGENTS.md is hand-written.
    #[clap(long)]
    pub force: bool,
    /// Render without writing; the on-disk file is not evaluated.
    #[clap(long, conflicts_with = "check")]
    pub dry_run: bool,
    /// Only evaluate the existing AGENTS.md.
    #[clap(long)]
    pub check: bool,
}

impl GardenCli {
    pub fn fail_on_drift(&self) -> Option<bool> {
        tri_state(self.fail_on_drift, self.no_fail_on_drift)
    }

    pub fn fail_on_freshness(&self) -> Option<bool> {
        tri_state(self.fail_on_freshness, self.no_fail_on_freshness)
    }
}

fn tri_state(on: bool, off: bool) -> Option<bool> {
    match (on, off) {
        (true, _) => Some(true),
        (_, true) => Some(false),
        _ => None,
    }
}

pub(crate) fn parse_plan_mode(value: &str) -> Result<PlanMode, String> {
    serde_json::from_value(serde_json::Value::String(value.to_string()))
        .map_err(|_| format!("unknown plan mode: {value}"))
}

pub(crate) fn parse_apply_mode(value: &str) -> Result<ApplyMode, String> {
    serde_json::from_value(serde_json::Value::String(value.to_string()))
        .map_err(|_| format!("unknown apply mode: {value}"))
}
