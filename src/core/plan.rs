//! Planner: compares facts, policy, manifest and doc spec against the corpus and emits
//! an ordered, deterministic action list.
//!
//! # For AI Agents
//!
//! - **Pure with respect to its inputs**: the reference date comes from the facts
//!   snapshot and traversal is always sorted, so identical inputs give a byte-identical
//!   plan (the `digest` in the meta proves it).
//! - **Ambiguity becomes `manual_review`**: the planner never guesses content it cannot
//!   back with evidence.
//! - **One writer per file**: whole-file actions (create, archive, merge target, split
//!   outputs) suppress every other action on the same path.

use crate::core::action::{
    Action, ActionPayload, ActionType, LegacyDecision, Risk, TargetKind, Template, TopologyIssue,
};
use crate::core::capability::{self, ManifestProfile};
use crate::core::error::{self, DocsorError};
use crate::core::facts::Facts;
use crate::core::language;
use crate::core::legacy::{self, LegacySemanticReport, LegacyStatus};
use crate::core::manifest::{self, Manifest, ROOT_INDEX};
use crate::core::metadata;
use crate::core::semantic;
use crate::core::topology::{self, TopologyGraph};
use crate::core::workspace::{self, Workspace};
use crate::core::{markdown, output, paths, time};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum PlanMode {
    Bootstrap,
    #[default]
    Audit,
    ApplySafe,
    ApplyWithArchive,
    Repair,
}

impl PlanMode {
    pub fn as_str(self) -> &'static str {
        match self {
            PlanMode::Bootstrap => "bootstrap",
            PlanMode::Audit => "audit",
            PlanMode::ApplySafe => "apply-safe",
            PlanMode::ApplyWithArchive => "apply-with-archive",
            PlanMode::Repair => "repair",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanMeta {
    pub generated_at: String,
    pub mode: PlanMode,
    pub reference_date: String,
    pub policy_path: String,
    pub manifest_path: String,
    pub manifest_changed: bool,
    #[serde(default)]
    pub manifest_notes: Vec<String>,
    #[serde(default)]
    pub manifest_profile: ManifestProfile,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub language: String,
    /// Modules of the facts snapshot; AGENTS.md lists them.
    #[serde(default)]
    pub modules: Vec<String>,
    pub digest: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanInputs {
    pub policy_exists: bool,
    pub manifest_exists: bool,
    pub facts_loaded: bool,
    pub doc_spec_loaded: bool,
    pub topology_contract_loaded: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanSummary {
    pub action_count: usize,
    pub action_counts: BTreeMap<String, usize>,
    pub has_actionable_drift: bool,
}

impl PlanSummary {
    pub fn of(actions: &[Action]) -> Self {
        let mut action_counts = BTreeMap::new();
        for a in actions {
            *action_counts.entry(a.action_type.as_str().to_string()).or_insert(0) += 1;
        }
        Self {
            action_count: actions.len(),
            action_counts,
            has_actionable_drift: actions.iter().any(|a| a.action_type.is_actionable_drift()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub meta: PlanMeta,
    pub inputs: PlanInputs,
    pub summary: PlanSummary,
    pub actions: Vec<Action>,
    #[serde(default, skip_serializing_if = "Option::is_none", skip_deserializing)]
    pub legacy: Option<LegacySemanticReport>,
}

impl Plan {
    pub fn actionable(&self) -> impl Iterator<Item = &Action> {
        self.actions.iter().filter(|a| a.action_type.is_actionable_drift())
    }
}

pub fn digest_actions(actions: &[Action]) -> Result<String, DocsorError> {
    let bytes = serde_json::to_vec(actions)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

pub fn load_plan(path: &Path) -> Result<Option<Plan>, DocsorError> {
    output::read_json(path)
}

pub fn save_plan(path: &Path, plan: &Plan) -> Result<(), DocsorError> {
    output::write_json(path, plan)
}

fn default_risk(action_type: ActionType) -> Risk {
    match action_type {
        ActionType::Create
        | ActionType::SyncManifest
        | ActionType::RefreshEvidence
        | ActionType::NavigationRepair => Risk::Low,
        ActionType::Archive
        | ActionType::ArchiveLegacy
        | ActionType::MigrateLegacy
        | ActionType::MergeDocs
        | ActionType::SplitDoc => Risk::High,
        _ => Risk::Medium,
    }
}

fn draft(action_type: ActionType, path: &str, reason: &str, evidence: Vec<String>) -> Action {
    Action {
        id: String::new(),
        action_type,
        kind: TargetKind::File,
        path: paths::normalize_rel(path),
        risk: default_risk(action_type),
        reason: reason.to_string(),
        evidence,
        section_id: None,
        section_heading: None,
        claim_id: None,
        payload: None,
    }
}

fn with_payload(mut action: Action, payload: ActionPayload) -> Action {
    action.payload = Some(payload);
    action
}

/// Rewrites an auto-update action as `manual_review` when policy does not allow it.
fn gated(ws: &Workspace, action: Action) -> Action {
    if ws.may_auto_update(&action.path) {
        return action;
    }
    let proposed = action.action_type;
    let mut review = draft(
        ActionType::ManualReview,
        &action.path,
        &format!("{} requires review: path is not auto-updatable", proposed),
        action.evidence.clone(),
    );
    review.section_id = action.section_id;
    review.section_heading = action.section_heading;
    review.claim_id = action.claim_id;
    review.payload = Some(ActionPayload::Review { proposed });
    review
}

struct Planner<'a> {
    ws: &'a Workspace,
    facts: &'a Facts,
    mode: PlanMode,
    reference: NaiveDate,
    actions: Vec<Action>,
    legacy: Vec<legacy::Classification>,
}

impl<'a> Planner<'a> {
    fn push(&mut self, action: Action) {
        self.actions.push(action);
    }

    fn doc_text(&self, rel: &str) -> Option<String> {
        self.ws
            .corpus
            .get(rel)
            .map(str::to_string)
            .or_else(|| self.ws.read_text(rel))
    }

    fn artifacts_pass(&mut self, effective: &Manifest, notes: &[String], manifest_changed: bool) {
        if !self.ws.policy_exists {
            self.push(with_payload(
                draft(
                    ActionType::Create,
                    workspace::POLICY_PATH,
                    "policy file is missing",
                    vec!["docs automation requires policy boundaries".into()],
                ),
                ActionPayload::Template {
                    template: Template::Policy,
                },
            ));
        }
        if !self.ws.manifest_exists {
            self.push(with_payload(
                draft(
                    ActionType::Create,
                    workspace::MANIFEST_PATH,
                    "manifest file is missing",
                    vec!["docs structure requires a manifest contract".into()],
                ),
                ActionPayload::Manifest {
                    snapshot: effective.clone(),
                    notes: notes.to_vec(),
                },
            ));
        } else if manifest_changed {
            self.push(with_payload(
                draft(
                    ActionType::SyncManifest,
                    workspace::MANIFEST_PATH,
                    "manifest requires additive evolution from repository facts",
                    notes.to_vec(),
                ),
                ActionPayload::Manifest {
                    snapshot: effective.clone(),
                    notes: notes.to_vec(),
                },
            ));
        }

        for dir in &effective.required.dirs {
            if !self.ws.abs(dir).is_dir() {
                let mut a = draft(
                    ActionType::Create,
                    dir,
                    "required directory is missing",
                    vec![format!("manifest.required.dirs includes {dir}")],
                );
                a.kind = TargetKind::Dir;
                self.push(a);
            }
        }
        for file in &effective.required.files {
            if !self.ws.exists(file) {
                let template = if file == ROOT_INDEX {
                    Template::Index
                } else {
                    Template::Managed
                };
                self.push(with_payload(
                    draft(
                        ActionType::Create,
                        file,
                        "required file is missing",
                        vec![format!("manifest.required.files includes {file}")],
                    ),
                    ActionPayload::Template { template },
                ));
            }
        }
        if self.mode == PlanMode::Bootstrap {
            for file in &effective.optional.files {
                if !self.ws.exists(file) {
                    self.push(with_payload(
                        draft(
                            ActionType::Create,
                            file,
                            "optional managed file missing during bootstrap",
                            vec![format!("manifest.optional.files includes {file}")],
                        ),
                        ActionPayload::Template {
                            template: Template::Managed,
                        },
                    ));
                }
            }
            if self.ws.policy.bootstrap_agents_md && !self.ws.exists(workspace::AGENTS_PATH) {
                self.push(with_payload(
                    draft(
                        ActionType::Create,
                        workspace::AGENTS_PATH,
                        "AGENTS navigation file is missing during bootstrap",
                        vec!["policy.bootstrap_agents_md=true".into()],
                    ),
                    ActionPayload::Template {
                        template: Template::Agents,
                    },
                ));
            }
        }
    }

    fn section_pass(&mut self, managed: &[String]) {
        let ws = self.ws;
        let mut docs: Vec<String> = managed.to_vec();
        if let Some(spec) = &ws.doc_spec {
            docs.extend(spec.documents.iter().map(|d| d.path.clone()));
        }
        docs.sort();
        docs.dedup();

        for rel in docs {
            let Some(text) = self.doc_text(&rel) else {
                continue;
            };

            if let Some(doc) = ws.doc_spec.as_ref().and_then(|s| s.document(&rel)) {
                let claims_present: BTreeSet<String> = semantic::claim_lines(&text)
                    .into_iter()
                    .map(|c| c.claim_id)
                    .collect();
                for section in doc.ordered_sections() {
                    let heading = section.heading_line();
                    let marker = section_marker(&section.section_id);
                    let present = text.contains(&marker) || markdown::section_range(&text, &heading).is_some();
                    if !present && doc.required_sections.contains(&section.section_id) {
                        let mut a = draft(
                            ActionType::UpdateSection,
                            &rel,
                            "managed document misses a required section",
                            vec![format!("doc spec requires section {}", section.section_id)],
                        );
                        a.section_id = Some(section.section_id.clone());
                        a.section_heading = Some(heading.clone());
                        self.push(gated(ws, a));
                    }

                    for claim in &section.claims {
                        if claims_present.contains(&claim.claim_id) {
                            continue;
                        }
                        let available: Vec<String> = claim
                            .required_evidence_types
                            .iter()
                            .filter(|t| self.facts.has_evidence(t))
                            .cloned()
                            .collect();
                        let missing: Vec<String> = claim
                            .required_evidence_types
                            .iter()
                            .filter(|t| !available.contains(t))
                            .cloned()
                            .collect();
                        // A follow-up line stays until the evidence shows up.
                        let todo = format!("TODO(claim:{})", claim.claim_id);
                        if text.contains(&todo) && !missing.is_empty() {
                            continue;
                        }
                        let payload = ActionPayload::Claim {
                            statement_template: claim.statement_template.clone(),
                            required_evidence_types: claim.required_evidence_types.clone(),
                            available_evidence_types: available,
                            allow_unknown: claim.allow_unknown,
                        };
                        let mut action = if missing.is_empty() || claim.allow_unknown {
                            let mut a = draft(
                                ActionType::FillClaim,
                                &rel,
                                "claim has no statement in the document",
                                vec![format!(
                                    "doc spec claim {} requires {}",
                                    claim.claim_id,
                                    claim.required_evidence_types.join(", ")
                                )],
                            );
                            a.payload = Some(payload);
                            gated(ws, a)
                        } else {
                            let ambiguity = DocsorError::PlanningAmbiguity(format!(
                                "claim {} lacks evidence: {}",
                                claim.claim_id,
                                missing.join(", ")
                            ));
                            debug!(doc = %rel, error = %ambiguity, "downgraded to manual review");
                            let mut a = draft(
                                ActionType::ManualReview,
                                &rel,
                                "claim evidence is unavailable in repository facts",
                                vec![format!("missing evidence types: {}", missing.join(", "))],
                            );
                            a.payload = Some(payload);
                            a
                        };
                        action.section_id = Some(section.section_id.clone());
                        action.section_heading = Some(heading.clone());
                        action.claim_id = Some(claim.claim_id.clone());
                        self.push(action);
                    }
                }
            }

            if metadata::applies_to(&rel, &ws.policy.doc_metadata) {
                let eval = metadata::evaluate(&rel, &text, &ws.policy.doc_metadata, self.reference);
                if !eval.is_complete() {
                    let mut evidence = Vec::new();
                    if !eval.missing.is_empty() {
                        evidence.push(format!("missing doc metadata: {}", eval.missing.join(", ")));
                    }
                    if !eval.invalid.is_empty() {
                        evidence.push(format!("invalid doc metadata: {}", eval.invalid.join(", ")));
                    }
                    let a = with_payload(
                        draft(
                            ActionType::UpdateSection,
                            &rel,
                            "managed document misses required doc metadata",
                            evidence,
                        ),
                        ActionPayload::Metadata {
                            missing: eval.missing.clone(),
                            invalid: eval.invalid.clone(),
                        },
                    );
                    self.push(gated(ws, a));
                } else if eval.stale {
                    let a = with_payload(
                        draft(
                            ActionType::RefreshEvidence,
                            &rel,
                            "document review is overdue",
                            vec![format!(
                                "review due {} before reference date {}",
                                eval.due_date.map(time::format_iso_date).unwrap_or_default(),
                                time::format_iso_date(self.reference)
                            )],
                        ),
                        ActionPayload::Refresh {
                            last_reviewed: eval.last_reviewed.map(time::format_iso_date),
                            due_date: eval.due_date.map(time::format_iso_date),
                        },
                    );
                    self.push(gated(ws, a));
                }
            }
        }

        const ARCHITECTURE: &str = "docs/architecture.md";
        if !self.facts.modules.is_empty() {
            if let Some(text) = self.doc_text(ARCHITECTURE) {
                let missing: Vec<String> = self
                    .facts
                    .modules
                    .iter()
                    .filter(|m| !text.contains(m.as_str()))
                    .cloned()
                    .collect();
                if !missing.is_empty() {
                    let mut a = with_payload(
                        draft(
                            ActionType::UpdateSection,
                            ARCHITECTURE,
                            "architecture document does not list discovered modules",
                            vec![format!("missing modules: {}", missing.join(", "))],
                        ),
                        ActionPayload::Modules {
                            missing_modules: missing,
                        },
                    );
                    a.section_id = Some("modules".into());
                    a.section_heading = Some(language::module_inventory_heading(ws.language.profile).into());
                    self.push(gated(ws, a));
                }
            }
        }
    }

    fn stale_pass(&mut self, declared: &BTreeSet<String>) {
        if !matches!(
            self.mode,
            PlanMode::Audit | PlanMode::ApplySafe | PlanMode::ApplyWithArchive
        ) {
            return;
        }
        let ws = self.ws;
        let legacy_root = format!("{}/", ws.policy.legacy_sources.target_root.trim_end_matches('/'));
        let mut restructure_targets: BTreeSet<String> = BTreeSet::new();
        for rule in &ws.policy.restructure.merge_rules {
            restructure_targets.insert(rule.target.clone());
        }
        for rule in &ws.policy.restructure.split_rules {
            restructure_targets.extend(rule.outputs.iter().map(|o| o.path.clone()));
        }

        for rel in ws.corpus.scope_docs(&ws.manifest.archive_dir) {
            if declared.contains(&rel)
                || restructure_targets.contains(&rel)
                || rel.starts_with(&legacy_root)
                || rel.starts_with("docs/exec-plans/")
                || ws.policy.is_protected(&rel)
            {
                continue;
            }
            let evidence = vec![format!("not declared in manifest: {rel}")];
            if self.mode == PlanMode::ApplyWithArchive {
                let from_docs = rel.strip_prefix("docs/").unwrap_or(&rel);
                let target = format!("{}/{from_docs}", ws.manifest.archive_dir.trim_end_matches('/'));
                self.push(with_payload(
                    draft(
                        ActionType::Archive,
                        &target,
                        "stale document archived in archive mode",
                        evidence,
                    ),
                    ActionPayload::Archive { source_path: rel },
                ));
            } else {
                self.push(draft(
                    ActionType::ManualReview,
                    &rel,
                    "stale document requires review",
                    evidence,
                ));
            }
        }
    }

    fn legacy_pass(&mut self) -> Result<(), DocsorError> {
        let ws = self.ws;
        let settings = &ws.policy.legacy_sources;
        if !settings.enabled {
            return Ok(());
        }
        let registry = legacy::load_registry(&ws.abs(&settings.registry_path))?;
        let signals = legacy::load_semantic_report(&ws.abs(&settings.semantic_report_path))?;

        for source in legacy::discover(&self.facts.files, settings) {
            match registry.status(&source) {
                Some(LegacyStatus::Archived) | Some(LegacyStatus::Exempted) => continue,
                Some(LegacyStatus::Migrated) => {
                    if self.mode == PlanMode::ApplyWithArchive {
                        let entry = registry.get(&source);
                        let archive = entry
                            .and_then(|e| e.archive_path.clone())
                            .unwrap_or_else(|| legacy::archive_path(&source, settings));
                        let target = entry.and_then(|e| e.target_path.clone()).unwrap_or_default();
                        self.push(with_payload(
                            draft(
                                ActionType::ArchiveLegacy,
                                &source,
                                "migrated legacy source still present",
                                vec![format!("legacy registry marks {source} as migrated")],
                            ),
                            ActionPayload::Legacy {
                                source_path: source.clone(),
                                target_path: target,
                                archive_path: archive,
                                category: entry.and_then(|e| e.category.clone()).unwrap_or_default(),
                                confidence: entry.and_then(|e| e.confidence).unwrap_or(1.0),
                                decision: LegacyDecision::AutoMigrate,
                            },
                        ));
                    }
                    continue;
                }
                None => {}
            }

            let content = ws.read_text(&source);
            let c = legacy::classify(&source, content.as_deref(), settings, &signals);
            let target = legacy::target_path(&source, &c.category, settings);
            let archive = legacy::archive_path(&source, settings);
            let evidence = vec![format!(
                "legacy classification {} confidence {:.2} ({})",
                c.category, c.confidence, c.rationale
            )];
            let payload = ActionPayload::Legacy {
                source_path: source.clone(),
                target_path: target.clone().unwrap_or_default(),
                archive_path: archive,
                category: c.category.clone(),
                confidence: c.confidence,
                decision: c.decision,
            };
            match (c.decision, target) {
                (LegacyDecision::AutoMigrate, Some(target)) => {
                    self.push(with_payload(
                        draft(ActionType::MigrateLegacy, &target, "legacy source migrates into the docs tree", evidence),
                        payload,
                    ));
                }
                (LegacyDecision::AutoMigrate, None) | (LegacyDecision::ManualReview, _) => {
                    self.push(with_payload(
                        draft(ActionType::ManualReview, &source, "legacy source needs a migration decision", evidence),
                        payload,
                    ));
                }
                (LegacyDecision::Skip, _) => {}
            }
            self.legacy.push(c);
        }
        Ok(())
    }

    fn topology_pass(&mut self) -> Result<(), DocsorError> {
        let ws = self.ws;
        let settings = &ws.policy.doc_topology;
        if !settings.enabled {
            return Ok(());
        }
        let Some(contract) = &ws.topology else {
            self.push(with_payload(
                draft(
                    ActionType::TopologyRepair,
                    &settings.path,
                    "topology contract is missing",
                    vec!["doc_topology.enabled=true".into()],
                ),
                ActionPayload::Topology {
                    issue: TopologyIssue::MissingContract,
                    parent: None,
                },
            ));
            return Ok(());
        };
        let graph = TopologyGraph::build(contract)?;
        let limit = topology::effective_depth_limit(contract, settings.max_depth);
        let analysis = topology::analyze(contract, &graph, &ws.corpus, limit);
        let root = graph.root_path().to_string();

        for orphan in &analysis.orphans {
            self.push(with_payload(
                draft(
                    ActionType::TopologyRepair,
                    orphan,
                    "document is not part of the topology contract",
                    vec![format!("{orphan} has no topology node")],
                ),
                ActionPayload::Topology {
                    issue: TopologyIssue::Orphan,
                    parent: Some(root.clone()),
                },
            ));
        }
        for deep in &analysis.over_depth {
            let parent = graph
                .ancestor_at_depth(deep, limit.saturating_sub(1))
                .unwrap_or(root.as_str())
                .to_string();
            self.push(with_payload(
                draft(
                    ActionType::TopologyRepair,
                    deep,
                    "document exceeds the topology depth limit",
                    vec![format!(
                        "depth {} > limit {limit}",
                        analysis.depths.get(deep).copied().unwrap_or_default()
                    )],
                ),
                ActionPayload::Topology {
                    issue: TopologyIssue::OverDepth,
                    parent: Some(parent),
                },
            ));
        }
        for (parent, children) in &analysis.navigation_missing_by_parent {
            if !ws.corpus.contains(parent) {
                continue;
            }
            self.push(with_payload(
                draft(
                    ActionType::NavigationRepair,
                    parent,
                    "parent document does not link its topology children",
                    children.iter().map(|c| format!("unreachable child: {c}")).collect(),
                ),
                ActionPayload::Navigation {
                    children: children.clone(),
                },
            ));
        }
        Ok(())
    }

    fn structural_pass(&mut self) {
        let ws = self.ws;
        for rel in ws.corpus.scope_docs(&ws.manifest.archive_dir) {
            let Some(text) = ws.corpus.get(&rel) else {
                continue;
            };
            let mut statements: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
            for c in semantic::claim_lines(text) {
                statements.entry(c.claim_id).or_default().insert(c.statement);
            }
            let conflicting: Vec<String> = statements
                .into_iter()
                .filter(|(_, s)| s.len() > 1)
                .map(|(id, _)| id)
                .collect();
            if !conflicting.is_empty() {
                let a = with_payload(
                    draft(
                        ActionType::QualityRepair,
                        &rel,
                        "document carries conflicting claim statements",
                        conflicting.iter().map(|id| format!("claim {id} has several statements")).collect(),
                    ),
                    ActionPayload::Quality {
                        claim_ids: conflicting,
                    },
                );
                self.push(gated(ws, a));
            }
        }

        let restructure = &ws.policy.restructure;
        if restructure.enabled {
            for rule in &restructure.merge_rules {
                let target_free = !ws.corpus.contains(&rule.target) || ws.corpus.is_generated(&rule.target);
                let sources_present = rule.sources.iter().all(|s| ws.corpus.contains(s));
                let already_merged = ws.corpus.get(&rule.target).is_some_and(|t| {
                    rule.sources
                        .iter()
                        .all(|s| t.contains(&markdown::comment("source-path", s)))
                });
                if target_free && sources_present && !already_merged {
                    self.push(with_payload(
                        draft(
                            ActionType::MergeDocs,
                            &rule.target,
                            "restructure rule merges documents",
                            vec![format!("restructure.merge_rules: {} <- {}", rule.target, rule.sources.join(", "))],
                        ),
                        ActionPayload::Merge {
                            title: rule.title.clone(),
                            sources: rule.sources.clone(),
                        },
                    ));
                }
            }
            for rule in &restructure.split_rules {
                let Some(text) = ws.corpus.get(&rule.source) else {
                    continue;
                };
                let lines = text.lines().count();
                let outputs_done = rule.outputs.iter().all(|o| ws.corpus.contains(&o.path));
                if lines > rule.max_lines && !outputs_done {
                    self.push(with_payload(
                        draft(
                            ActionType::SplitDoc,
                            &rule.source,
                            "document exceeds the split threshold",
                            vec![format!("{} has {lines} lines > {}", rule.source, rule.max_lines)],
                        ),
                        ActionPayload::Split {
                            outputs: rule.outputs.clone(),
                        },
                    ));
                }
            }
        }

        let progressive = &ws.policy.progressive_disclosure;
        if progressive.enabled {
            for rel in ws.corpus.scope_docs(&ws.manifest.archive_dir) {
                if !paths::matches_any(&progressive.scope_globs, &rel) {
                    continue;
                }
                let Some(text) = ws.corpus.get(&rel) else {
                    continue;
                };
                let missing = semantic::missing_slots(text, &progressive.required_slots);
                if missing.is_empty() {
                    continue;
                }
                let a = with_payload(
                    draft(
                        ActionType::SemanticRewrite,
                        &rel,
                        "document lacks progressive disclosure slots",
                        vec![format!("missing slots: {}", missing.join(", "))],
                    ),
                    ActionPayload::Rewrite {
                        missing_slots: missing,
                    },
                );
                self.push(gated(ws, a));
            }
        }
    }

    fn mode_filter(&self, action: &Action) -> bool {
        if self.mode != PlanMode::Repair {
            return true;
        }
        let policy = &self.ws.policy;
        match action.action_type {
            t if t.is_repair_safe() => true,
            ActionType::TopologyRepair | ActionType::NavigationRepair => policy.doc_topology.enabled,
            ActionType::SemanticRewrite => policy.progressive_disclosure.enabled,
            _ => false,
        }
    }
}

pub fn section_marker(section_id: &str) -> String {
    markdown::comment("section", section_id)
}

/// Drops actions that would write a path some whole-file action already owns.
fn resolve_conflicts(actions: Vec<Action>) -> Vec<Action> {
    let mut owners: BTreeMap<String, usize> = BTreeMap::new();
    for (idx, action) in actions.iter().enumerate() {
        for target in action.whole_file_targets() {
            owners.entry(target).or_insert(idx);
        }
    }
    actions
        .into_iter()
        .enumerate()
        .filter(|(idx, action)| {
            let mut touched = action.whole_file_targets();
            touched.push(action.path.clone());
            let keep = touched
                .iter()
                .all(|p| owners.get(p).is_none_or(|owner| owner == idx));
            if !keep {
                debug!(action = %action.action_type, path = %action.path, "suppressed by whole-file action");
            }
            keep
        })
        .map(|(_, a)| a)
        .collect()
}

/// Builds the plan for `ws` against `facts`.
pub fn plan(ws: &Workspace, facts: &Facts, mode: PlanMode) -> Result<Plan, DocsorError> {
    let reference = facts.reference_date().ok_or_else(|| {
        error::config_error(
            workspace::FACTS_PATH,
            format!("generated_at {:?} is not a timestamp", facts.generated_at),
        )
    })?;

    let adaptive = capability::derive(Some(facts), &ws.policy);
    let desired = manifest::desired_manifest(&ws.manifest, Some(facts), &ws.policy);
    let (effective, notes, manifest_changed) = if ws.policy.manifest_evolution.allow_additive {
        let (merged, notes) = manifest::merge_additive(&ws.manifest, &desired);
        let changed = !notes.is_empty();
        (merged, notes, changed)
    } else {
        (ws.manifest.normalized(), Vec::new(), false)
    };

    let mut planner = Planner {
        ws,
        facts,
        mode,
        reference,
        actions: Vec::new(),
        legacy: Vec::new(),
    };

    planner.artifacts_pass(&effective, &notes, manifest_changed);
    let managed: Vec<String> = effective.managed_files().into_iter().collect();
    planner.section_pass(&managed);
    let mut declared: BTreeSet<String> = ws.declared_docs().into_iter().collect();
    declared.extend(managed.iter().cloned());
    planner.stale_pass(&declared);
    planner.legacy_pass()?;
    planner.topology_pass()?;
    planner.structural_pass();

    let actions = std::mem::take(&mut planner.actions);
    let filtered: Vec<Action> = actions.into_iter().filter(|a| planner.mode_filter(a)).collect();
    let mut actions = resolve_conflicts(filtered);
    for (idx, action) in actions.iter_mut().enumerate() {
        action.id = format!("A{:03}", idx + 1);
    }

    let legacy = (!planner.legacy.is_empty())
        .then(|| LegacySemanticReport::new(&facts.generated_at, std::mem::take(&mut planner.legacy)));
    let digest = digest_actions(&actions)?;
    let summary = PlanSummary::of(&actions);
    info!(
        mode = mode.as_str(),
        actions = summary.action_count,
        drift = summary.has_actionable_drift,
        "plan built"
    );

    Ok(Plan {
        meta: PlanMeta {
            generated_at: facts.generated_at.clone(),
            mode,
            reference_date: time::format_iso_date(reference),
            policy_path: workspace::POLICY_PATH.to_string(),
            manifest_path: workspace::MANIFEST_PATH.to_string(),
            manifest_changed,
            manifest_notes: notes,
            manifest_profile: adaptive.profile,
            capabilities: adaptive.enabled_ids(),
            language: ws.language.profile.as_str().to_string(),
            modules: facts.modules.clone(),
            digest,
        },
        inputs: PlanInputs {
            policy_exists: ws.policy_exists,
            manifest_exists: ws.manifest_exists,
            facts_loaded: true,
            doc_spec_loaded: ws.doc_spec.is_some(),
            topology_contract_loaded: ws.topology.is_some(),
        },
        summary,
        actions,
        legacy,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::facts;
    use std::fs;

    fn facts_at(root: &Path) -> Facts {
        facts::scan_repository(root, "2026-03-01T00:00:00Z").unwrap()
    }

    fn write(root: &Path, rel: &str, text: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, text).unwrap();
    }

    fn write_config(root: &Path, policy: serde_json::Value) {
        write(root, workspace::POLICY_PATH, &policy.to_string());
        write(root, workspace::MANIFEST_PATH, r#"{"version": 1, "required": {"files": ["docs/index.md"]}}"#);
    }

    const FRESH_META: &str = "<!-- doc-owner: docs -->\n<!-- doc-last-reviewed: 2026-02-20 -->\n<!-- doc-review-cycle-days: 90 -->\n";

    #[test]
    fn test_empty_repository_plans_single_index_create() {
        let dir = tempfile::tempdir().unwrap();
        write_config(dir.path(), serde_json::json!({}));
        let ws = Workspace::load(dir.path()).unwrap();
        let plan = plan(&ws, &facts_at(dir.path()), PlanMode::Bootstrap).unwrap();
        assert_eq!(plan.actions.len(), 1);
        assert_eq!(plan.actions[0].action_type, ActionType::Create);
        assert_eq!(plan.actions[0].path, "docs/index.md");
        assert_eq!(plan.actions[0].id, "A001");
        assert!(plan.summary.has_actionable_drift);
    }

    #[test]
    fn test_plan_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        write_config(dir.path(), serde_json::json!({"allow_auto_update": ["docs/**"]}));
        write(dir.path(), "docs/index.md", "# Index\n");
        write(dir.path(), "docs/notes.md", "# Notes\n");
        write(dir.path(), "src/engine/mod.rs", "");
        let ws = Workspace::load(dir.path()).unwrap();
        let f = facts_at(dir.path());
        let first = plan(&ws, &f, PlanMode::Audit).unwrap();
        let second = plan(&ws, &f, PlanMode::Audit).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.meta.digest, second.meta.digest);
        assert!(first.actions.iter().any(|a| a.action_type == ActionType::SyncManifest));
        assert!(first
            .actions
            .iter()
            .any(|a| a.action_type == ActionType::ManualReview && a.path == "docs/notes.md"));
    }

    #[test]
    fn test_claims_without_evidence_become_manual_review() {
        let dir = tempfile::tempdir().unwrap();
        write_config(dir.path(), serde_json::json!({"allow_auto_update": ["docs/index.md"]}));
        write(dir.path(), "docs/index.md", &format!("{FRESH_META}\n# Index\n\n## Overview\n<!-- section:overview -->\n"));
        write(
            dir.path(),
            workspace::DOC_SPEC_PATH,
            &serde_json::json!({
                "version": 1,
                "documents": [{
                    "path": "docs/index.md",
                    "required_sections": ["overview"],
                    "sections": [{
                        "section_id": "overview",
                        "claims": [
                            {"claim_id": "files", "statement_template": "Repository files are scanned.", "required_evidence_types": ["repo_scan.files"]},
                            {"claim_id": "slo", "statement_template": "SLO is met.", "required_evidence_types": ["metrics.slo"]}
                        ]
                    }]
                }]
            })
            .to_string(),
        );
        let ws = Workspace::load(dir.path()).unwrap();
        let plan = plan(&ws, &facts_at(dir.path()), PlanMode::Audit).unwrap();
        let kinds: Vec<_> = plan
            .actions
            .iter()
            .map(|a| (a.action_type, a.claim_id.clone()))
            .collect();
        assert_eq!(
            kinds,
            vec![
                (ActionType::FillClaim, Some("files".to_string())),
                (ActionType::ManualReview, Some("slo".to_string())),
            ]
        );
    }

    #[test]
    fn test_unprotected_updates_need_allow_list() {
        let dir = tempfile::tempdir().unwrap();
        write_config(dir.path(), serde_json::json!({}));
        write(dir.path(), "docs/index.md", "# Index\n");
        let ws = Workspace::load(dir.path()).unwrap();
        let plan = plan(&ws, &facts_at(dir.path()), PlanMode::Audit).unwrap();
        assert_eq!(plan.actions.len(), 1);
        assert_eq!(plan.actions[0].action_type, ActionType::ManualReview);
        assert!(!plan.summary.has_actionable_drift);
    }

    #[test]
    fn test_repair_mode_keeps_only_convergent_actions() {
        let dir = tempfile::tempdir().unwrap();
        write_config(dir.path(), serde_json::json!({"allow_auto_update": ["docs/**"]}));
        write(dir.path(), "docs/index.md", "# Index\n");
        write(dir.path(), "docs/extra.md", "# Extra\n");
        let ws = Workspace::load(dir.path()).unwrap();
        let plan = plan(&ws, &facts_at(dir.path()), PlanMode::Repair).unwrap();
        assert!(plan.actions.iter().all(|a| a.action_type.is_repair_safe()));
        assert_eq!(plan.actions.len(), 1);
        assert_eq!(plan.actions[0].path, "docs/index.md");
    }

    #[test]
    fn test_corrupt_legacy_inputs_are_config_errors() {
        let dir = tempfile::tempdir().unwrap();
        write_config(
            dir.path(),
            serde_json::json!({"legacy_sources": {"enabled": true, "include_globs": ["legacy/**"]}}),
        );
        write(dir.path(), "docs/index.md", &format!("{FRESH_META}# Index\n"));
        write(dir.path(), "legacy/notes.md", "# Notes\n");
        write(dir.path(), "docs/.legacy-migration-map.json", "{\"entries\": [");
        let ws = Workspace::load(dir.path()).unwrap();
        let err = plan(&ws, &facts_at(dir.path()), PlanMode::Audit).unwrap_err();
        assert!(err.is_config(), "{err}");

        fs::remove_file(dir.path().join("docs/.legacy-migration-map.json")).unwrap();
        write(dir.path(), "docs/.legacy-semantic-report.json", "not json");
        let err = plan(&ws, &facts_at(dir.path()), PlanMode::Audit).unwrap_err();
        assert!(err.is_config(), "{err}");
    }

    #[test]
    fn test_whole_file_targets_suppress_other_writes() {
        let a = {
            let mut a = draft(ActionType::Create, "docs/a.md", "r", vec!["e".into()]);
            a.payload = Some(ActionPayload::Template { template: Template::Managed });
            a
        };
        let b = draft(ActionType::UpdateSection, "docs/a.md", "r", vec!["e".into()]);
        let c = draft(ActionType::UpdateSection, "docs/b.md", "r", vec!["e".into()]);
        let kept = resolve_conflicts(vec![b, a, c]);
        let kept: Vec<_> = kept.iter().map(|a| (a.action_type, a.path.as_str())).collect();
        assert_eq!(
            kept,
            vec![(ActionType::Create, "docs/a.md"), (ActionType::UpdateSection, "docs/b.md")]
        );
    }
}
