//! Policy model: the single immutable configuration value every component receives.
//!
//! # For AI Agents
//!
//! - **Never mutate a loaded `Policy`**: pass `&Policy` explicitly; there is no global.
//! - **Absent means conservative**: every settings struct is `#[serde(default)]` and its
//!   `Default` picks the safer option (fallbacks only where deterministic, gates on).
//! - **Malformed means fatal**: `Policy::validate` returns `ConfigError`; callers abort
//!   before planning.

use crate::core::error::{self, DocsorError};
use crate::core::output;
use crate::core::paths;
use crate::core::semantic::Grade;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::warn;

pub const POLICY_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SemanticMode {
    Deterministic,
    #[default]
    Hybrid,
    AgentStrict,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CGradeDecision {
    #[default]
    Fallback,
    ManualReview,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ApplyMode {
    None,
    #[default]
    ApplySafe,
    ApplyWithArchive,
}

impl ApplyMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ApplyMode::None => "none",
            ApplyMode::ApplySafe => "apply-safe",
            ApplyMode::ApplyWithArchive => "apply-with-archive",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MappingStrategy {
    #[default]
    PathBased,
    TagBased,
    ManualTable,
}

// ===== Semantic generation =====

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Deductions {
    pub runtime_status_not_ok: u32,
    pub missing_statement: u32,
    pub missing_content: u32,
    pub missing_citations: u32,
    pub invalid_citation_token: u32,
    pub citation_prefix_not_allowed: u32,
    pub missing_required_citations: u32,
    pub missing_slot: u32,
    pub slot_over_budget: u32,
    pub claim_conflict: u32,
}

impl Default for Deductions {
    fn default() -> Self {
        Self {
            runtime_status_not_ok: 30,
            missing_statement: 40,
            missing_content: 40,
            missing_citations: 25,
            invalid_citation_token: 15,
            citation_prefix_not_allowed: 10,
            missing_required_citations: 20,
            missing_slot: 15,
            slot_over_budget: 10,
            claim_conflict: 30,
        }
    }
}

/// Score-to-grade cutoffs and per-finding deductions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GradingTable {
    pub baseline: u32,
    pub grade_a_min: u32,
    pub grade_b_min: u32,
    pub grade_c_min: u32,
    pub deductions: Deductions,
}

impl Default for GradingTable {
    fn default() -> Self {
        Self {
            baseline: 100,
            grade_a_min: 90,
            grade_b_min: 75,
            grade_c_min: 50,
            deductions: Deductions::default(),
        }
    }
}

impl GradingTable {
    pub fn grade_for(&self, score: u32) -> Grade {
        if score >= self.grade_a_min {
            Grade::A
        } else if score >= self.grade_b_min {
            Grade::B
        } else if score >= self.grade_c_min {
            Grade::C
        } else {
            Grade::D
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct InputQualitySettings {
    pub enabled: bool,
    pub c_grade_decision: CGradeDecision,
    /// Lowest grade the executor consumes directly; also the strict-mode floor.
    pub min_consumable_grade: Grade,
    pub grading: GradingTable,
}

impl Default for InputQualitySettings {
    fn default() -> Self {
        Self {
            enabled: true,
            c_grade_decision: CGradeDecision::Fallback,
            min_consumable_grade: Grade::B,
            grading: GradingTable::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ObservabilitySettings {
    pub enabled: bool,
    pub large_unattempted_ratio: f64,
    pub large_unattempted_count: usize,
    pub fail_on_large_unattempted: bool,
}

impl Default for ObservabilitySettings {
    fn default() -> Self {
        Self {
            enabled: true,
            large_unattempted_ratio: 0.5,
            large_unattempted_count: 2,
            fail_on_large_unattempted: true,
        }
    }
}

/// Per-action switches for semantic consumption.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SemanticActions {
    pub update_section: bool,
    pub fill_claim: bool,
    pub semantic_rewrite: bool,
    pub migrate_legacy: bool,
    pub merge_docs: bool,
    pub split_doc: bool,
    pub navigation_repair: bool,
    pub quality_repair: bool,
    pub refresh_evidence: bool,
}

impl Default for SemanticActions {
    fn default() -> Self {
        Self {
            update_section: true,
            fill_claim: true,
            semantic_rewrite: true,
            migrate_legacy: true,
            merge_docs: true,
            split_doc: true,
            navigation_repair: true,
            quality_repair: true,
            refresh_evidence: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SemanticSettings {
    pub enabled: bool,
    pub mode: SemanticMode,
    pub prefer_agent_semantic_first: bool,
    pub require_semantic_attempt: bool,
    pub runtime_report_path: String,
    pub fail_closed: bool,
    pub allow_fallback_template: bool,
    pub max_output_chars_per_section: usize,
    pub required_evidence_prefixes: Vec<String>,
    pub deny_paths: Vec<String>,
    pub actions: SemanticActions,
    pub input_quality: InputQualitySettings,
    pub observability: ObservabilitySettings,
}

impl Default for SemanticSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            mode: SemanticMode::Hybrid,
            prefer_agent_semantic_first: true,
            require_semantic_attempt: true,
            runtime_report_path: "docs/.semantic-runtime-report.json".to_string(),
            fail_closed: true,
            allow_fallback_template: true,
            max_output_chars_per_section: 4000,
            required_evidence_prefixes: vec![
                "repo_scan.".to_string(),
                "runbook.".to_string(),
                "semantic_report.".to_string(),
            ],
            deny_paths: vec!["docs/adr/**".to_string()],
            actions: SemanticActions::default(),
            input_quality: InputQualitySettings::default(),
            observability: ObservabilitySettings::default(),
        }
    }
}

// ===== Documents =====

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MetadataSettings {
    pub enabled: bool,
    pub require_owner: bool,
    pub require_last_reviewed: bool,
    pub require_review_cycle_days: bool,
    pub default_owner: String,
    pub default_review_cycle_days: u32,
    pub ignore_paths: Vec<String>,
}

impl Default for MetadataSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            require_owner: true,
            require_last_reviewed: true,
            require_review_cycle_days: true,
            default_owner: "TODO-owner".to_string(),
            default_review_cycle_days: 90,
            ignore_paths: vec!["docs/archive/**".to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TopologySettings {
    pub enabled: bool,
    pub path: String,
    pub enforce_max_depth: bool,
    pub max_depth: usize,
    pub fail_on_orphan: bool,
    pub fail_on_unreachable: bool,
}

impl Default for TopologySettings {
    fn default() -> Self {
        Self {
            enabled: false,
            path: "docs/.doc-topology.json".to_string(),
            enforce_max_depth: true,
            max_depth: 3,
            fail_on_orphan: true,
            fail_on_unreachable: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProgressiveSettings {
    pub enabled: bool,
    pub required_slots: Vec<String>,
    pub summary_max_chars: usize,
    pub max_key_facts: usize,
    pub max_next_steps: usize,
    pub fail_on_missing_slots: bool,
    pub scope_globs: Vec<String>,
}

impl Default for ProgressiveSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            required_slots: vec![
                "summary".to_string(),
                "key_facts".to_string(),
                "next_steps".to_string(),
            ],
            summary_max_chars: 160,
            max_key_facts: 5,
            max_next_steps: 3,
            fail_on_missing_slots: true,
            scope_globs: vec!["docs/**/*.md".to_string()],
        }
    }
}

// ===== Legacy migration =====

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LegacySemanticSettings {
    pub auto_migrate_threshold: f64,
    pub review_threshold: f64,
    pub denylist_files: Vec<String>,
    pub categories: Vec<String>,
    pub fail_closed: bool,
}

impl Default for LegacySemanticSettings {
    fn default() -> Self {
        Self {
            auto_migrate_threshold: 0.85,
            review_threshold: 0.60,
            denylist_files: vec!["README.md".to_string(), "AGENTS.md".to_string()],
            categories: vec![
                "requirement".to_string(),
                "design".to_string(),
                "decision".to_string(),
                "roadmap".to_string(),
                "runbook".to_string(),
                "notes".to_string(),
            ],
            fail_closed: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LegacySettings {
    pub enabled: bool,
    pub include_globs: Vec<String>,
    pub exclude_globs: Vec<String>,
    pub archive_root: String,
    pub mapping_strategy: MappingStrategy,
    pub target_root: String,
    pub registry_path: String,
    pub semantic_report_path: String,
    pub mapping_table: BTreeMap<String, String>,
    pub exempt_sources: Vec<String>,
    pub semantic: LegacySemanticSettings,
}

impl Default for LegacySettings {
    fn default() -> Self {
        Self {
            enabled: false,
            include_globs: Vec::new(),
            exclude_globs: vec![
                "docs/**".to_string(),
                ".git/**".to_string(),
                "target/**".to_string(),
                "node_modules/**".to_string(),
            ],
            archive_root: "docs/archive/legacy".to_string(),
            mapping_strategy: MappingStrategy::PathBased,
            target_root: "docs/history/legacy".to_string(),
            registry_path: "docs/.legacy-migration-map.json".to_string(),
            semantic_report_path: "docs/.legacy-semantic-report.json".to_string(),
            mapping_table: BTreeMap::new(),
            exempt_sources: Vec::new(),
            semantic: LegacySemanticSettings::default(),
        }
    }
}

// ===== Gates =====

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct QualityGateSettings {
    pub enabled: bool,
    pub min_evidence_coverage: f64,
    pub max_conflicts: usize,
    pub max_unknown_claims: usize,
    pub max_unresolved_todo: usize,
    pub max_citation_issues: usize,
    pub min_structured_section_completeness: f64,
    pub min_progressive_slot_completeness: f64,
    pub min_next_step_presence: f64,
    pub max_section_verbosity_over_budget: usize,
    pub fail_on_quality_gate: bool,
}

impl Default for QualityGateSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            min_evidence_coverage: 0.9,
            max_conflicts: 0,
            max_unknown_claims: 0,
            max_unresolved_todo: 0,
            max_citation_issues: 0,
            min_structured_section_completeness: 1.0,
            min_progressive_slot_completeness: 0.95,
            min_next_step_presence: 1.0,
            max_section_verbosity_over_budget: 0,
            fail_on_quality_gate: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScopedValidationSettings {
    pub high_risk_patterns: Vec<String>,
    pub expand_links: bool,
    pub expand_topology: bool,
}

impl Default for ScopedValidationSettings {
    fn default() -> Self {
        Self {
            high_risk_patterns: vec![
                "docs/.doc-policy.json".to_string(),
                "docs/.doc-manifest.json".to_string(),
                "docs/.doc-spec.json".to_string(),
                "docs/.doc-topology.json".to_string(),
                "docs/*policy*.json".to_string(),
                "docs/*manifest*.json".to_string(),
                "docsor.toml".to_string(),
            ],
            expand_links: true,
            expand_topology: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GardeningSettings {
    pub enabled: bool,
    pub apply_mode: ApplyMode,
    pub fail_on_drift: bool,
    pub fail_on_freshness: bool,
    pub max_repair_iterations: usize,
    pub report_json: String,
    pub report_md: String,
}

impl Default for GardeningSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            apply_mode: ApplyMode::ApplySafe,
            fail_on_drift: true,
            fail_on_freshness: true,
            max_repair_iterations: 3,
            report_json: "docs/.doc-garden-report.json".to_string(),
            report_md: "docs/.doc-garden-report.md".to_string(),
        }
    }
}

// ===== Restructuring =====

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MergeRule {
    pub target: String,
    pub title: String,
    pub sources: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SplitTarget {
    pub path: String,
    pub title: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SplitRule {
    pub source: String,
    pub max_lines: usize,
    pub outputs: Vec<SplitTarget>,
}

impl Default for SplitRule {
    fn default() -> Self {
        Self {
            source: String::new(),
            max_lines: 400,
            outputs: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RestructureSettings {
    pub enabled: bool,
    pub merge_rules: Vec<MergeRule>,
    pub split_rules: Vec<SplitRule>,
}

// ===== Language and AGENTS.md =====

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LanguageSettings {
    pub primary: Option<String>,
    pub profile: Option<String>,
    pub locked: bool,
    pub preserve_english_terms: bool,
    pub english_only_contexts: Vec<String>,
}

impl Default for LanguageSettings {
    fn default() -> Self {
        Self {
            primary: None,
            profile: None,
            locked: true,
            preserve_english_terms: true,
            english_only_contexts: vec![
                "code_identifiers".to_string(),
                "config_keys".to_string(),
                "cli_flags".to_string(),
                "file_paths".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AgentsMode {
    #[default]
    Dynamic,
    Deterministic,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AgentsSettings {
    pub enabled: bool,
    pub mode: AgentsMode,
    pub max_lines: usize,
    pub required_links: Vec<String>,
    pub sync_on_manifest_change: bool,
    pub regenerate_on_semantic_actions: bool,
    pub fail_on_agents_drift: bool,
    pub max_overlap_ratio: f64,
    pub report_path: String,
}

impl Default for AgentsSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            mode: AgentsMode::Dynamic,
            max_lines: 140,
            required_links: Vec::new(),
            sync_on_manifest_change: true,
            regenerate_on_semantic_actions: true,
            fail_on_agents_drift: true,
            max_overlap_ratio: 0.7,
            report_path: "docs/.agents-report.json".to_string(),
        }
    }
}

// ===== Manifest evolution =====

/// Capabilities forced on or off regardless of repository signals. Entries are
/// capability ids or their short aliases.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DocGoals {
    pub include: Vec<String>,
    pub exclude: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ManifestOverrides {
    pub include_files: Vec<String>,
    pub include_dirs: Vec<String>,
    pub exclude_files: Vec<String>,
    pub exclude_dirs: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ManifestEvolution {
    pub allow_additive: bool,
}

impl Default for ManifestEvolution {
    fn default() -> Self {
        Self {
            allow_additive: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Policy {
    pub version: u32,
    pub allow_auto_update: Vec<String>,
    pub protect_from_auto_overwrite: Vec<String>,
    pub bootstrap_agents_md: bool,
    pub language: LanguageSettings,
    pub agents_generation: AgentsSettings,
    pub doc_goals: DocGoals,
    pub adaptive_manifest_overrides: ManifestOverrides,
    pub manifest_evolution: ManifestEvolution,
    pub semantic_generation: SemanticSettings,
    pub doc_metadata: MetadataSettings,
    pub doc_topology: TopologySettings,
    pub progressive_disclosure: ProgressiveSettings,
    pub legacy_sources: LegacySettings,
    pub doc_quality_gates: QualityGateSettings,
    pub doc_gardening: GardeningSettings,
    pub scoped_validation: ScopedValidationSettings,
    pub restructure: RestructureSettings,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            version: POLICY_SCHEMA_VERSION,
            allow_auto_update: Vec::new(),
            protect_from_auto_overwrite: vec![
                "README.md".to_string(),
                "AGENTS.md".to_string(),
                "docs/adr/**".to_string(),
            ],
            bootstrap_agents_md: false,
            language: LanguageSettings::default(),
            agents_generation: AgentsSettings::default(),
            doc_goals: DocGoals::default(),
            adaptive_manifest_overrides: ManifestOverrides::default(),
            manifest_evolution: ManifestEvolution::default(),
            semantic_generation: SemanticSettings::default(),
            doc_metadata: MetadataSettings::default(),
            doc_topology: TopologySettings::default(),
            progressive_disclosure: ProgressiveSettings::default(),
            legacy_sources: LegacySettings::default(),
            doc_quality_gates: QualityGateSettings::default(),
            doc_gardening: GardeningSettings::default(),
            scoped_validation: ScopedValidationSettings::default(),
            restructure: RestructureSettings::default(),
        }
    }
}

fn check_ratio(errors: &mut Vec<String>, name: &str, value: f64) {
    if !(0.0..=1.0).contains(&value) || value.is_nan() {
        errors.push(format!("{name} must be within [0, 1], got {value}"));
    }
}

fn check_rel(errors: &mut Vec<String>, name: &str, value: &str) {
    if !paths::is_safe_rel(value) {
        errors.push(format!("{name} must be a repo-relative POSIX path, got {value:?}"));
    }
}

impl Policy {
    /// Checks ranges and paths; clamps the legacy review threshold to the auto threshold.
    pub fn validate(mut self) -> Result<Self, DocsorError> {
        let mut errors = Vec::new();
        if self.version == 0 {
            errors.push("version must be > 0".to_string());
        }

        let sem = &self.semantic_generation;
        let table = &sem.input_quality.grading;
        if !(table.grade_a_min >= table.grade_b_min
            && table.grade_b_min >= table.grade_c_min
            && table.baseline >= table.grade_a_min)
        {
            errors.push(format!(
                "grading thresholds must satisfy baseline >= A >= B >= C, got {}/{}/{}/{}",
                table.baseline, table.grade_a_min, table.grade_b_min, table.grade_c_min
            ));
        }
        if sem.max_output_chars_per_section == 0 {
            errors.push("semantic_generation.max_output_chars_per_section must be > 0".into());
        }
        check_rel(&mut errors, "semantic_generation.runtime_report_path", &sem.runtime_report_path);
        check_ratio(
            &mut errors,
            "semantic_generation.observability.large_unattempted_ratio",
            sem.observability.large_unattempted_ratio,
        );

        let gates = &self.doc_quality_gates;
        check_ratio(&mut errors, "doc_quality_gates.min_evidence_coverage", gates.min_evidence_coverage);
        check_ratio(
            &mut errors,
            "doc_quality_gates.min_structured_section_completeness",
            gates.min_structured_section_completeness,
        );
        check_ratio(
            &mut errors,
            "doc_quality_gates.min_progressive_slot_completeness",
            gates.min_progressive_slot_completeness,
        );
        check_ratio(&mut errors, "doc_quality_gates.min_next_step_presence", gates.min_next_step_presence);

        if self.doc_topology.max_depth == 0 {
            errors.push("doc_topology.max_depth must be >= 1".to_string());
        }
        check_rel(&mut errors, "doc_topology.path", &self.doc_topology.path);
        if self.progressive_disclosure.summary_max_chars == 0 {
            errors.push("progressive_disclosure.summary_max_chars must be > 0".to_string());
        }
        for slot in &self.progressive_disclosure.required_slots {
            if !matches!(slot.as_str(), "summary" | "key_facts" | "next_steps") {
                errors.push(format!("progressive_disclosure.required_slots has unknown slot {slot:?}"));
            }
        }

        let legacy = &mut self.legacy_sources;
        check_ratio(&mut errors, "legacy_sources.semantic.auto_migrate_threshold", legacy.semantic.auto_migrate_threshold);
        check_ratio(&mut errors, "legacy_sources.semantic.review_threshold", legacy.semantic.review_threshold);
        if legacy.semantic.review_threshold > legacy.semantic.auto_migrate_threshold {
            warn!(
                review = legacy.semantic.review_threshold,
                auto = legacy.semantic.auto_migrate_threshold,
                "legacy review_threshold clamped to auto_migrate_threshold"
            );
            legacy.semantic.review_threshold = legacy.semantic.auto_migrate_threshold;
        }
        for (name, value) in [
            ("legacy_sources.archive_root", &legacy.archive_root),
            ("legacy_sources.target_root", &legacy.target_root),
            ("legacy_sources.registry_path", &legacy.registry_path),
            ("legacy_sources.semantic_report_path", &legacy.semantic_report_path),
        ] {
            check_rel(&mut errors, name, value);
        }

        let agents = &mut self.agents_generation;
        if agents.max_lines == 0 {
            errors.push("agents_generation.max_lines must be > 0".to_string());
        }
        if agents.max_overlap_ratio.is_nan() {
            errors.push("agents_generation.max_overlap_ratio must be a number".to_string());
        } else if !(0.0..=1.0).contains(&agents.max_overlap_ratio) {
            let clamped = agents.max_overlap_ratio.clamp(0.0, 1.0);
            warn!(ratio = agents.max_overlap_ratio, clamped, "agents_generation.max_overlap_ratio clamped");
            agents.max_overlap_ratio = clamped;
        }
        check_rel(&mut errors, "agents_generation.report_path", &agents.report_path);
        for link in &agents.required_links {
            check_rel(&mut errors, "agents_generation.required_links", link);
        }
        let overrides = &self.adaptive_manifest_overrides;
        for path in overrides.include_files.iter().chain(&overrides.include_dirs) {
            check_rel(&mut errors, "adaptive_manifest_overrides", path);
        }

        let garden = &self.doc_gardening;
        check_rel(&mut errors, "doc_gardening.report_json", &garden.report_json);
        check_rel(&mut errors, "doc_gardening.report_md", &garden.report_md);

        for rule in &self.restructure.merge_rules {
            check_rel(&mut errors, "restructure.merge_rules.target", &rule.target);
            if rule.sources.is_empty() {
                errors.push(format!("restructure merge rule for {} has no sources", rule.target));
            }
        }
        for rule in &self.restructure.split_rules {
            check_rel(&mut errors, "restructure.split_rules.source", &rule.source);
            if rule.outputs.is_empty() {
                errors.push(format!("restructure split rule for {} has no outputs", rule.source));
            }
        }

        if errors.is_empty() {
            Ok(self)
        } else {
            Err(error::config_error("policy", errors.join("; ")))
        }
    }

    pub fn is_protected(&self, rel: &str) -> bool {
        paths::matches_any(&self.protect_from_auto_overwrite, rel)
    }

    pub fn allows_auto_update(&self, rel: &str) -> bool {
        paths::matches_any(&self.allow_auto_update, rel)
    }
}

/// Loads and validates the policy. A missing file yields the defaults and `false`.
pub fn load_policy(path: &Path) -> Result<(Policy, bool), DocsorError> {
    let raw: Option<serde_json::Value> = output::read_json(path)?;
    match raw {
        None => Ok((Policy::default(), false)),
        Some(value) => {
            let policy: Policy = serde_json::from_value(value)
                .map_err(|e| error::config_error(&path.display().to_string(), e))?;
            Ok((policy.validate()?, true))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_absent_fields_resolve_to_defaults() {
        let policy: Policy = serde_json::from_value(json!({
            "semantic_generation": {"mode": "agent_strict"}
        }))
        .unwrap();
        assert_eq!(policy.semantic_generation.mode, SemanticMode::AgentStrict);
        assert!(policy.semantic_generation.fail_closed);
        assert_eq!(policy.semantic_generation.deny_paths, vec!["docs/adr/**"]);
        assert!(policy.doc_quality_gates.fail_on_quality_gate);
        assert!(!policy.doc_topology.enabled);
        assert_eq!(policy.doc_metadata.default_review_cycle_days, 90);
    }

    #[test]
    fn test_unknown_mode_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("policy.json");
        std::fs::write(&path, r#"{"semantic_generation": {"mode": "yolo"}}"#).unwrap();
        let err = load_policy(&path).unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn test_review_threshold_is_clamped() {
        let mut policy = Policy::default();
        policy.legacy_sources.semantic.auto_migrate_threshold = 0.7;
        policy.legacy_sources.semantic.review_threshold = 0.9;
        let policy = policy.validate().unwrap();
        assert_eq!(policy.legacy_sources.semantic.review_threshold, 0.7);
    }

    #[test]
    fn test_agents_overlap_ratio_is_clamped_and_links_checked() {
        let mut policy = Policy::default();
        policy.agents_generation.max_overlap_ratio = 1.4;
        let policy = policy.validate().unwrap();
        assert_eq!(policy.agents_generation.max_overlap_ratio, 1.0);

        let mut policy = Policy::default();
        policy.agents_generation.required_links = vec!["../outside.md".to_string()];
        assert!(policy.validate().unwrap_err().is_config());
    }

    #[test]
    fn test_out_of_range_ratio_rejected() {
        let mut policy = Policy::default();
        policy.doc_quality_gates.min_evidence_coverage = 1.5;
        assert!(policy.validate().is_err());
    }

    #[test]
    fn test_grade_table_cutoffs() {
        let table = GradingTable::default();
        assert_eq!(table.grade_for(100), Grade::A);
        assert_eq!(table.grade_for(80), Grade::B);
        assert_eq!(table.grade_for(70), Grade::C);
        assert_eq!(table.grade_for(45), Grade::D);
    }

    #[test]
    fn test_missing_policy_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let (policy, present) = load_policy(&dir.path().join("absent.json")).unwrap();
        assert!(!present);
        assert_eq!(policy, Policy::default());
    }
}
