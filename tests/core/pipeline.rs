use docsor::core::action::{ActionPayload, ActionType, LegacyDecision};
use docsor::core::apply::{self, ActionStatus, SemanticStatus};
use docsor::core::error::DocsorError;
use docsor::core::facts::{self, Facts};
use docsor::core::garden::{self, GardenRequest, GardenStatus};
use docsor::core::legacy;
use docsor::core::plan::{self, PlanMode};
use docsor::core::policy::ApplyMode;
use docsor::core::time;
use docsor::core::synthesize::{self, ClaimStatus};
use docsor::core::validate::{self, GateStatus, ScopeMode, ValidateRequest};
use docsor::core::workspace::{self, Workspace};
use serde_json::json;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tempfile::tempdir;

const GENERATED_AT: &str = "2026-03-01T00:00:00Z";
const FRESH_META: &str =
    "<!-- doc-owner: docs -->\n<!-- doc-last-reviewed: 2026-02-20 -->\n<!-- doc-review-cycle-days: 3650 -->\n";

fn write(root: &Path, rel: &str, text: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, text).unwrap();
}

fn minimal_repo(policy: serde_json::Value) -> tempfile::TempDir {
    let dir = tempdir().expect("tempdir");
    write(dir.path(), workspace::POLICY_PATH, &policy.to_string());
    write(
        dir.path(),
        workspace::MANIFEST_PATH,
        r#"{"version": 1, "required": {"files": ["docs/index.md"]}}"#,
    );
    dir
}

fn scan(root: &Path) -> Facts {
    facts::scan_repository(root, GENERATED_AT).expect("scan")
}

fn plan_at(root: &Path, mode: PlanMode) -> plan::Plan {
    let ws = Workspace::load(root).expect("workspace");
    plan::plan(&ws, &scan(root), mode).expect("plan")
}

#[test]
fn bootstrap_empty_repository_creates_index_and_validates() {
    let dir = minimal_repo(json!({}));
    let root = dir.path();

    let p = plan_at(root, PlanMode::Bootstrap);
    assert_eq!(p.actions.len(), 1);
    assert_eq!(p.actions[0].action_type, ActionType::Create);
    assert_eq!(p.actions[0].path, "docs/index.md");

    let ws = Workspace::load(root).unwrap();
    let report = apply::apply_plan(&ws, &p, ApplyMode::ApplySafe).unwrap();
    assert_eq!(report.summary.applied, 1);
    apply::save_apply_report(&root.join(workspace::APPLY_REPORT_PATH), &report).unwrap();

    let validation = validate::validate(root, &scan(root), &ValidateRequest::default()).unwrap();
    assert!(validation.passed, "{:?}", validation.errors);
    assert_eq!(validation.metrics.errors, 0);
    assert_eq!(validation.scope.effective_mode, ScopeMode::Full);
    assert!(validation.failure().is_none());
}

#[test]
fn second_apply_of_the_same_plan_skips_everything() {
    let dir = minimal_repo(json!({}));
    let root = dir.path();
    let p = plan_at(root, PlanMode::Bootstrap);

    let first = apply::apply_plan(&Workspace::load(root).unwrap(), &p, ApplyMode::ApplySafe).unwrap();
    assert_eq!(first.summary.applied, 1);
    let after_first = fs::read_to_string(root.join("docs/index.md")).unwrap();

    let second = apply::apply_plan(&Workspace::load(root).unwrap(), &p, ApplyMode::ApplySafe).unwrap();
    assert_eq!(second.summary.applied, 0);
    assert!(second.results.iter().all(|r| r.status == ActionStatus::Skipped));
    assert_eq!(fs::read_to_string(root.join("docs/index.md")).unwrap(), after_first);
}

fn snapshot(root: &Path) -> BTreeMap<String, Vec<u8>> {
    fn walk(root: &Path, dir: &Path, out: &mut BTreeMap<String, Vec<u8>>) {
        for entry in fs::read_dir(dir).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                walk(root, &path, out);
            } else {
                let rel = path.strip_prefix(root).unwrap().to_string_lossy().replace('\\', "/");
                out.insert(rel, fs::read(&path).unwrap());
            }
        }
    }
    let mut out = BTreeMap::new();
    walk(root, root, &mut out);
    out
}

#[test]
fn reapplying_a_mixed_plan_leaves_the_tree_untouched() {
    let dir = minimal_repo(json!({
        "allow_auto_update": ["docs/**"],
        "doc_topology": {"enabled": true},
        "legacy_sources": {"enabled": true, "include_globs": ["legacy/**"]}
    }));
    let root = dir.path();
    write(root, "docs/index.md", "# Index\n");
    write(root, "docs/guide.md", &format!("{FRESH_META}\n# Guide\n\n- [Index](./index.md)\n"));
    write(root, "legacy/notes.md", "# Notes\n\nDecision: keep one index.\n");
    write(
        root,
        "docs/.legacy-semantic-report.json",
        &json!({"entries": [{"source_path": "legacy/notes.md", "category": "notes", "confidence": 0.99}]}).to_string(),
    );
    write(
        root,
        "docs/.doc-topology.json",
        &json!({
            "version": 1,
            "root": "docs/index.md",
            "max_depth": 3,
            "nodes": [
                {"path": "docs/index.md", "layer": "root"},
                {"path": "docs/guide.md", "layer": "leaf", "parent": "docs/index.md"}
            ]
        })
        .to_string(),
    );
    write(
        root,
        workspace::DOC_SPEC_PATH,
        &json!({
            "version": 1,
            "documents": [{
                "path": "docs/index.md",
                "required_sections": ["overview"],
                "sections": [{
                    "section_id": "overview",
                    "claims": [{
                        "claim_id": "files",
                        "statement_template": "Repository files are scanned.",
                        "required_evidence_types": ["repo_scan.files"]
                    }]
                }]
            }]
        })
        .to_string(),
    );

    let p = plan_at(root, PlanMode::ApplyWithArchive);
    let planned: Vec<ActionType> = p.actions.iter().map(|a| a.action_type).collect();
    for expected in [
        ActionType::UpdateSection,
        ActionType::FillClaim,
        ActionType::MigrateLegacy,
        ActionType::NavigationRepair,
    ] {
        assert!(planned.contains(&expected), "{expected:?} missing from {planned:?}");
    }
    assert!(p
        .actions
        .iter()
        .any(|a| matches!(a.payload, Some(ActionPayload::Metadata { .. }))));

    let first = apply::apply_plan(&Workspace::load(root).unwrap(), &p, ApplyMode::ApplyWithArchive).unwrap();
    assert!(first.summary.applied > 0);
    assert_eq!(first.summary.errors, 0, "{:?}", first.results);
    let after_first = snapshot(root);
    assert!(!after_first.contains_key("legacy/notes.md"));

    let second = apply::apply_plan(&Workspace::load(root).unwrap(), &p, ApplyMode::ApplyWithArchive).unwrap();
    assert_eq!(second.summary.applied, 0, "{:?}", second.results);
    assert_eq!(snapshot(root), after_first);
}

#[test]
fn bootstrap_with_agents_generation_writes_and_keeps_agents_md() {
    let dir = minimal_repo(json!({"agents_generation": {"enabled": true}}));
    let root = dir.path();

    let p = plan_at(root, PlanMode::Bootstrap);
    let first = apply::apply_plan(&Workspace::load(root).unwrap(), &p, ApplyMode::ApplySafe).unwrap();
    let agents = first.agents.as_ref().expect("agents sync report");
    assert!(agents.written);
    let generated = fs::read_to_string(root.join(workspace::AGENTS_PATH)).unwrap();
    assert!(generated.contains("- [docs/index.md](./docs/index.md)"));
    assert!(generated.contains("docsor validate --fail-on-drift --fail-on-freshness"));
    apply::save_apply_report(&root.join(workspace::APPLY_REPORT_PATH), &first).unwrap();

    let validation = validate::validate(root, &scan(root), &ValidateRequest::default()).unwrap();
    assert!(validation.passed, "{:?}", validation.errors);
    assert_eq!(validation.gates["agents"].status, GateStatus::Passed);

    let before = snapshot(root);
    let second = apply::apply_plan(&Workspace::load(root).unwrap(), &p, ApplyMode::ApplySafe).unwrap();
    assert!(second.agents.as_ref().is_none_or(|a| !a.written));
    assert_eq!(snapshot(root), before);
}

#[test]
fn hand_written_agents_md_is_left_alone_but_still_checked() {
    let dir = minimal_repo(json!({"agents_generation": {"enabled": true}}));
    let root = dir.path();
    write(root, workspace::AGENTS_PATH, "# AGENTS\n\nRun `docsor deploy`.\n");

    let p = plan_at(root, PlanMode::Bootstrap);
    apply::apply_plan(&Workspace::load(root).unwrap(), &p, ApplyMode::ApplySafe).unwrap();
    assert_eq!(
        fs::read_to_string(root.join(workspace::AGENTS_PATH)).unwrap(),
        "# AGENTS\n\nRun `docsor deploy`.\n"
    );

    let validation = validate::validate(root, &scan(root), &ValidateRequest::default()).unwrap();
    assert_eq!(validation.gates["agents"].status, GateStatus::Failed);
    assert!(validation
        .errors
        .iter()
        .any(|e| e.starts_with("agents-quality: agents gate failed: missing AGENTS headings")));
}

#[test]
fn synthesis_reports_claim_support_from_facts_and_runbook() {
    let dir = minimal_repo(json!({}));
    let root = dir.path();
    write(root, "Cargo.toml", "[package]\nname = \"demo\"\n");
    write(
        root,
        "docs/runbook.md",
        "# Runbook\n\n## Validation Commands\n\n```bash\ncargo test\n```\n",
    );
    write(
        root,
        workspace::DOC_SPEC_PATH,
        &json!({
            "version": 1,
            "documents": [{
                "path": "docs/runbook.md",
                "sections": [{
                    "section_id": "validation_commands",
                    "claims": [
                        {"claim_id": "checks", "statement_template": "Checks: {value}.", "required_evidence_types": ["runbook.validation_commands"]},
                        {"claim_id": "build", "statement_template": "Built from {value}.", "required_evidence_types": ["repo_scan.build_manifests"]},
                        {"claim_id": "ci", "statement_template": "CI runs {value}.", "required_evidence_types": ["repo_scan.ci"]}
                    ]
                }]
            }]
        })
        .to_string(),
    );

    let ws = Workspace::load(root).unwrap();
    let map = synthesize::synthesize(&ws, Some(&scan(root)), GENERATED_AT).unwrap();
    let claims = &map.documents[0].sections[0].claims;
    assert_eq!(claims[0].statement, "Checks: cargo test.");
    assert_eq!(claims[1].statement, "Built from Cargo.toml.");
    assert_eq!(claims[2].status, ClaimStatus::Missing);
    assert_eq!((map.metrics.supported, map.metrics.missing), (2, 1));
}

#[test]
fn planning_is_deterministic() {
    let dir = minimal_repo(json!({"allow_auto_update": ["docs/**"]}));
    let root = dir.path();
    write(root, "docs/index.md", &format!("{FRESH_META}# Index\n"));
    write(root, "docs/notes.md", "# Notes\n");
    write(root, "src/engine/mod.rs", "");

    let a = plan_at(root, PlanMode::Audit);
    let b = plan_at(root, PlanMode::Audit);
    assert_eq!(a.actions, b.actions);
    assert_eq!(a.meta.digest, b.meta.digest);
}

#[test]
fn denylisted_legacy_sources_are_never_migrated() {
    let dir = minimal_repo(json!({
        "legacy_sources": {
            "enabled": true,
            "include_globs": ["**/*.md"],
            "mapping_strategy": "manual_table",
            "mapping_table": {
                "README.md": "docs/history/readme.md",
                "AGENTS.md": "docs/history/agents.md",
                "legacy/notes.md": "docs/history/notes.md"
            }
        }
    }));
    let root = dir.path();
    write(root, "docs/index.md", &format!("{FRESH_META}# Index\n"));
    write(root, "README.md", "# Readme\n\nDecision: keep it short.\n");
    write(root, "AGENTS.md", "# Agents\n");
    write(root, "legacy/notes.md", "# Notes\n\nDecision: use one index.\n");
    write(
        root,
        "docs/.legacy-semantic-report.json",
        &json!({
            "entries": [
                {"source_path": "README.md", "category": "design", "confidence": 0.99},
                {"source_path": "AGENTS.md", "category": "design", "confidence": 0.99},
                {"source_path": "legacy/notes.md", "category": "notes", "confidence": 0.99}
            ]
        })
        .to_string(),
    );

    let p = plan_at(root, PlanMode::ApplySafe);
    let migrated: Vec<String> = p
        .actions
        .iter()
        .filter(|a| a.action_type == ActionType::MigrateLegacy)
        .filter_map(|a| match &a.payload {
            Some(ActionPayload::Legacy { source_path, .. }) => Some(source_path.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(migrated, vec!["legacy/notes.md".to_string()]);
    let legacy_sources: Vec<&str> = p
        .actions
        .iter()
        .filter_map(|a| match &a.payload {
            Some(ActionPayload::Legacy { source_path, .. }) => Some(source_path.as_str()),
            _ => None,
        })
        .collect();
    assert!(!legacy_sources.contains(&"README.md"));
    assert!(!legacy_sources.contains(&"AGENTS.md"));

    let ws = Workspace::load(root).unwrap();
    let settings = &ws.policy.legacy_sources;
    let signals = legacy::load_semantic_report(&root.join(&settings.semantic_report_path)).unwrap();
    for source in ["README.md", "AGENTS.md"] {
        let c = legacy::classify(source, Some("# Any\n"), settings, &signals);
        assert_eq!(c.decision, LegacyDecision::Skip, "{source}");
    }
}

#[test]
fn agent_strict_never_falls_back() {
    let dir = minimal_repo(json!({
        "allow_auto_update": ["docs/index.md"],
        "semantic_generation": {"mode": "agent_strict"}
    }));
    let root = dir.path();
    write(
        root,
        "docs/index.md",
        &format!("{FRESH_META}\n# Index\n\n## Overview\n<!-- section:overview -->\n"),
    );
    write(
        root,
        workspace::DOC_SPEC_PATH,
        &json!({
            "version": 1,
            "documents": [{
                "path": "docs/index.md",
                "required_sections": ["overview"],
                "sections": [{
                    "section_id": "overview",
                    "claims": [
                        {"claim_id": "files", "statement_template": "Repository files are scanned.", "required_evidence_types": ["repo_scan.files"]}
                    ]
                }]
            }]
        })
        .to_string(),
    );

    let p = plan_at(root, PlanMode::Audit);
    assert!(p.actions.iter().any(|a| a.action_type == ActionType::FillClaim));
    let before = fs::read_to_string(root.join("docs/index.md")).unwrap();
    let report = apply::apply_plan(&Workspace::load(root).unwrap(), &p, ApplyMode::ApplySafe).unwrap();

    for r in report.results.iter().filter(|r| r.semantic_runtime.is_some()) {
        let trace = r.semantic_runtime.as_ref().unwrap();
        assert_ne!(trace.status, SemanticStatus::Fallback, "{}", r.id);
        if trace.status != SemanticStatus::Consumed && !trace.status.is_exempt() {
            assert_eq!(r.status, ActionStatus::Error, "{}", r.id);
        }
    }
    let claim = report
        .results
        .iter()
        .find(|r| r.action_type == ActionType::FillClaim)
        .unwrap();
    assert_eq!(claim.reason.as_deref(), Some("runtime_required"));
    assert_eq!(fs::read_to_string(root.join("docs/index.md")).unwrap(), before);
}

#[test]
fn unsatisfiable_evidence_exhausts_the_garden() {
    let dir = minimal_repo(json!({"doc_gardening": {"max_repair_iterations": 2}}));
    let root = dir.path();
    write(
        root,
        workspace::DOC_SPEC_PATH,
        &json!({
            "version": 1,
            "documents": [{
                "path": "docs/index.md",
                "required_sections": ["overview"],
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

    let request = GardenRequest {
        generated_at: Some(GENERATED_AT.to_string()),
        ..GardenRequest::default()
    };
    let report = garden::run_garden(root, &request).unwrap();
    assert_eq!(report.status, GardenStatus::ExhaustedFail);
    assert_eq!(report.attempts, 2);
    assert!(!report.is_success());
    assert!(!report.remaining_failures.is_empty());
    assert!(matches!(report.failure(), Some(DocsorError::RepairExhausted(_))));
    assert!(report
        .iterations
        .iter()
        .skip(1)
        .all(|it| it.plan_mode == PlanMode::Repair && !it.validation_passed));

    let saved: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(root.join("docs/.doc-garden-report.json")).unwrap()).unwrap();
    assert_eq!(saved["status"], "exhausted-fail");
    assert_eq!(saved["attempts"], 2);
}

#[test]
fn freshness_is_checked_against_today_not_the_snapshot_date() {
    let dir = minimal_repo(json!({}));
    let root = dir.path();
    write(
        root,
        "docs/index.md",
        "<!-- doc-owner: docs -->\n<!-- doc-last-reviewed: 2001-01-01 -->\n<!-- doc-review-cycle-days: 30 -->\n# Index\n",
    );
    let old_snapshot = facts::scan_repository(root, "2001-01-05T00:00:00Z").unwrap();

    let strict = ValidateRequest {
        fail_on_freshness: true,
        ..ValidateRequest::default()
    };
    let report = validate::validate(root, &old_snapshot, &strict).unwrap();
    assert!(!report.passed);
    assert!(report
        .errors
        .contains(&"stale doc metadata in docs/index.md: due 2001-01-31".to_string()));

    let pinned = ValidateRequest {
        reference_date: time::parse_iso_date("2001-01-05"),
        ..strict
    };
    let report = validate::validate(root, &old_snapshot, &pinned).unwrap();
    assert_eq!(report.metrics.metadata_stale_docs, 0);
}

#[test]
fn high_risk_change_upgrades_scoped_validation() {
    let dir = minimal_repo(json!({}));
    let root = dir.path();
    write(root, "docs/index.md", &format!("{FRESH_META}# Index\n\n- [Runbook](./runbook.md)\n"));
    write(root, "docs/runbook.md", &format!("{FRESH_META}# Runbook\n"));
    write(root, "docs/policy.json", "{}");

    let request = ValidateRequest {
        scope_files: Some(vec!["docs/policy.json".to_string()]),
        ..ValidateRequest::default()
    };
    let report = validate::validate(root, &scan(root), &request).unwrap();
    assert_eq!(report.scope.requested_mode, ScopeMode::Scoped);
    assert_eq!(report.scope.effective_mode, ScopeMode::Full);
    assert_eq!(report.scope.upgrade_reason.as_deref(), Some("high_risk_file"));
    assert!(report.scope.docs.contains(&"docs/runbook.md".to_string()));
}

#[test]
fn documents_deeper_than_the_bound_fail_validation() {
    let dir = minimal_repo(json!({"doc_topology": {"enabled": true, "max_depth": 1}}));
    let root = dir.path();
    write(root, "docs/index.md", &format!("{FRESH_META}# Index\n\n- [Guide](./guide.md)\n"));
    write(root, "docs/guide.md", &format!("{FRESH_META}# Guide\n\n- [Deep](./deep.md)\n"));
    write(root, "docs/deep.md", &format!("{FRESH_META}# Deep\n"));
    write(
        root,
        "docs/.doc-topology.json",
        &json!({
            "version": 1,
            "root": "docs/index.md",
            "max_depth": 1,
            "nodes": [
                {"path": "docs/index.md", "layer": "root"},
                {"path": "docs/guide.md", "layer": "section", "parent": "docs/index.md"},
                {"path": "docs/deep.md", "layer": "leaf", "parent": "docs/guide.md"}
            ]
        })
        .to_string(),
    );

    let report = validate::validate(root, &scan(root), &ValidateRequest::default()).unwrap();
    assert!(!report.passed);
    assert!(report.errors.iter().any(|e| e.starts_with("doc-topology: max depth 2 exceeds limit 1")));
    let failure = report.failure().expect("failed report");
    assert!(failure.to_string().contains("DOCSOR_GATES_FAILED"));
    assert!(failure.to_string().contains("topology"));
}
