//! AGENTS.md: a short navigation file for coding agents.
//!
//! The file is rendered from the manifest, the module list of the facts snapshot and
//! the working language, then clipped to `agents_generation.max_lines`. Evaluation
//! re-reads it from disk and checks headings, links, `docsor` command references and
//! how much of the root index it merely repeats.
//!
//! # For AI Agents
//!
//! - **Keep AGENTS.md thin**: navigation and guardrails only, knowledge lives in `docs/`
//! - **A human-written AGENTS.md is never replaced** unless generation is forced

use crate::core::corpus::GENERATED_MARKER;
use crate::core::error::DocsorError;
use crate::core::language::Profile;
use crate::core::manifest::{Manifest, ROOT_INDEX};
use crate::core::policy::{AgentsMode, AgentsSettings};
use crate::core::workspace::{self, AGENTS_PATH, Workspace};
use crate::core::{markdown, output, paths, time};
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::sync::LazyLock;
use tracing::{debug, info};

/// Subcommands an AGENTS.md may reference.
pub const DOCSOR_COMMANDS: &[&str] = &["scan", "plan", "apply", "validate", "garden", "synthesize", "agents"];

const MIN_OVERLAP_LINE_CHARS: usize = 6;
const MAX_MODULES_LISTED: usize = 8;
const MAX_MANIFEST_LINKS: usize = 4;

static COMMAND_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bdocsor\s+([a-z][a-z0-9-]*)").unwrap());
static INLINE_LINK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[[^\]]+\]\(([^)]+)\)").unwrap());
static LEADING_MARKS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[#>\-\d.\s]+").unwrap());
static SPACES_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Heading groups every AGENTS.md must carry; any profile's variant satisfies a group.
const REQUIRED_HEADINGS: &[(&str, &[&str])] = &[
    ("purpose", &["## Purpose", "## 目标"]),
    ("navigation", &["## Navigation", "## 导航"]),
    ("commands", &["## Standard Commands", "## 标准命令"]),
    ("guardrails", &["## Guardrails"]),
];

fn markdown_link(path: &str) -> String {
    format!("[{path}](./{path})")
}

/// Links listed under Navigation: the root index and docsor's own artifacts when present,
/// every configured required link, then up to four other manifest documents.
pub fn navigation_links<F>(settings: &AgentsSettings, manifest: &Manifest, exists: F) -> Vec<String>
where
    F: Fn(&str) -> bool,
{
    let mut links: Vec<String> = [ROOT_INDEX, workspace::POLICY_PATH, workspace::MANIFEST_PATH]
        .into_iter()
        .filter(|p| exists(p))
        .map(str::to_string)
        .collect();
    links.extend(settings.required_links.iter().map(|l| paths::normalize_rel(l)));
    links.extend(
        manifest
            .required
            .files
            .iter()
            .filter(|p| {
                p.starts_with("docs/")
                    && p.ends_with(".md")
                    && !matches!(p.as_str(), ROOT_INDEX | "docs/architecture.md" | "docs/runbook.md")
                    && exists(p)
            })
            .take(MAX_MANIFEST_LINKS)
            .cloned(),
    );
    let mut seen = BTreeSet::new();
    links.retain(|l| !l.trim().is_empty() && seen.insert(l.clone()));
    links
}

fn standard_commands() -> Vec<&'static str> {
    vec![
        "```bash",
        "docsor scan",
        "docsor plan --mode audit",
        "docsor validate --fail-on-drift --fail-on-freshness",
        "```",
    ]
}

pub fn render(profile: Profile, links: &[String], modules: &[String]) -> String {
    let shown = modules
        .iter()
        .take(MAX_MODULES_LISTED)
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(", ");
    let mut lines: Vec<String> = vec!["# AGENTS".into(), String::new(), GENERATED_MARKER.into(), String::new()];
    match profile {
        Profile::EnUs => {
            lines.extend(["## Purpose", "", "Treat `docs/` as the repository system of record.", ""].map(String::from));
            lines.extend(["## Navigation", "", "- Start at `docs/index.md`."].map(String::from));
        }
        Profile::ZhCn => {
            lines.extend(["## 目标", "", "将 `docs/` 作为仓库的 system of record。", ""].map(String::from));
            lines.extend(["## 导航", "", "- 从 `docs/index.md` 开始。"].map(String::from));
        }
    }
    lines.extend(links.iter().map(|l| format!("- {}", markdown_link(l))));
    if !shown.is_empty() {
        lines.push(match profile {
            Profile::EnUs => format!("- Top-level modules detected: `{shown}`."),
            Profile::ZhCn => format!("- 当前顶层模块：`{shown}`。"),
        });
    }
    lines.push(String::new());
    lines.push(
        match profile {
            Profile::EnUs => "## Standard Commands",
            Profile::ZhCn => "## 标准命令",
        }
        .to_string(),
    );
    lines.push(String::new());
    lines.extend(standard_commands().into_iter().map(String::from));
    lines.extend(["", "## Guardrails", ""].map(String::from));
    let guardrails: [&str; 3] = match profile {
        Profile::EnUs => [
            "- Keep AGENTS concise; store detailed knowledge under `docs/`.",
            "- Do not hard-delete docs; archive to `docs/archive/`.",
            "- Apply documentation changes through PR flow in CI-driven repositories.",
        ],
        Profile::ZhCn => [
            "- 保持 AGENTS 精简；详细知识放在 `docs/`。",
            "- 禁止硬删除 docs；统一归档到 `docs/archive/`。",
            "- 在 CI 驱动仓库中通过 PR 流程应用文档变更。",
        ],
    };
    lines.extend(guardrails.map(String::from));
    format!("{}\n", lines.join("\n").trim_end())
}

/// Keeps the first `max_lines - 1` lines plus a blank last line.
pub fn clip(content: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = content.lines().collect();
    if lines.len() <= max_lines {
        return content.to_string();
    }
    let keep = max_lines.saturating_sub(1);
    format!("{}\n\n", lines[..keep].join("\n"))
}

pub fn content_sha256(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationStatus {
    Generated,
    Unchanged,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentsReport {
    pub generated_at: String,
    pub output: String,
    pub status: GenerationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub profile: Profile,
    pub mode: AgentsMode,
    pub navigation_links: Vec<String>,
    pub modules: Vec<String>,
    pub line_count: usize,
    pub content_sha256: String,
    #[serde(default)]
    pub written: bool,
}

#[derive(Debug, Clone)]
pub struct Generation {
    pub content: String,
    pub report: AgentsReport,
}

/// Renders AGENTS.md for `ws`. Nothing is written; see [`write_generation`].
///
/// Skips when generation is disabled or the existing file was not generated by docsor,
/// unless `force` is set.
pub fn generate(ws: &Workspace, manifest: &Manifest, modules: &[String], force: bool) -> Generation {
    let settings = &ws.policy.agents_generation;
    let profile = ws.language.profile;
    let skipped = |reason: &str| Generation {
        content: String::new(),
        report: AgentsReport {
            generated_at: time::now_rfc3339(),
            output: AGENTS_PATH.to_string(),
            status: GenerationStatus::Skipped,
            reason: Some(reason.to_string()),
            profile,
            mode: settings.mode,
            navigation_links: Vec::new(),
            modules: modules.to_vec(),
            line_count: 0,
            content_sha256: String::new(),
            written: false,
        },
    };
    if !settings.enabled && !force {
        return skipped("agents_generation disabled");
    }
    let existing = ws.read_text(AGENTS_PATH);
    if existing.as_deref().is_some_and(|t| !t.contains(GENERATED_MARKER)) && !force {
        return skipped("AGENTS.md is not generated by docsor");
    }

    let links = navigation_links(settings, manifest, |p| ws.exists(p));
    let content = clip(&render(profile, &links, modules), settings.max_lines);
    let status = if existing.as_deref() == Some(content.as_str()) {
        GenerationStatus::Unchanged
    } else {
        GenerationStatus::Generated
    };
    debug!(?status, links = links.len(), "AGENTS.md rendered");
    Generation {
        report: AgentsReport {
            generated_at: time::now_rfc3339(),
            output: AGENTS_PATH.to_string(),
            status,
            reason: None,
            profile,
            mode: settings.mode,
            navigation_links: links,
            modules: modules.to_vec(),
            line_count: content.lines().count(),
            content_sha256: content_sha256(&content),
            written: false,
        },
        content,
    }
}

/// Writes AGENTS.md and the generation report when the content changed.
pub fn write_generation(ws: &Workspace, generation: &mut Generation) -> Result<(), DocsorError> {
    if generation.report.status != GenerationStatus::Generated {
        return Ok(());
    }
    output::write_text(&ws.abs(AGENTS_PATH), &generation.content)?;
    generation.report.written = true;
    output::write_json(&ws.abs(&ws.policy.agents_generation.report_path), &generation.report)?;
    info!(lines = generation.report.line_count, "AGENTS.md written");
    Ok(())
}

// ===== Evaluation =====

fn normalize_line(line: &str) -> String {
    let text = line.trim().to_lowercase().replace('`', "");
    let text = INLINE_LINK_RE.replace_all(&text, "$1");
    let text = LEADING_MARKS_RE.replace(&text, "");
    SPACES_RE.replace_all(&text, " ").trim().to_string()
}

fn overlap_lines(text: &str) -> BTreeSet<String> {
    text.lines()
        .map(normalize_line)
        .filter(|l| l.chars().count() >= MIN_OVERLAP_LINE_CHARS)
        .collect()
}

/// Shared normalized lines over the smaller of the two line sets.
pub fn overlap_ratio(a: &str, b: &str) -> f64 {
    let (left, right) = (overlap_lines(a), overlap_lines(b));
    if left.is_empty() || right.is_empty() {
        return 0.0;
    }
    let shared = left.intersection(&right).count();
    shared as f64 / left.len().min(right.len()).max(1) as f64
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentsMetrics {
    pub line_count: usize,
    pub missing_headings: usize,
    pub missing_required_links: usize,
    pub broken_links: usize,
    pub unknown_commands: usize,
    pub overlap_ratio: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentsEvaluation {
    pub passed: bool,
    pub failed_checks: Vec<String>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub metrics: AgentsMetrics,
}

/// Checks AGENTS.md as it is on disk.
pub fn evaluate(ws: &Workspace) -> AgentsEvaluation {
    let settings = &ws.policy.agents_generation;
    let mut eval = AgentsEvaluation::default();
    let Some(content) = ws.read_text(AGENTS_PATH) else {
        eval.errors.push(format!("AGENTS.md not found: {AGENTS_PATH}"));
        eval.failed_checks.push("agents_file_exists".to_string());
        eval.metrics.missing_headings = REQUIRED_HEADINGS.len() + 1;
        eval.metrics.missing_required_links = settings.required_links.len();
        return eval;
    };
    eval.metrics.line_count = content.lines().count();

    let mut missing: Vec<&str> = Vec::new();
    if !content.contains("# AGENTS") {
        missing.push("# AGENTS");
    }
    for &(key, variants) in REQUIRED_HEADINGS {
        if !variants.iter().any(|h| content.contains(*h)) {
            missing.push(key);
        }
    }
    eval.metrics.missing_headings = missing.len();
    if !missing.is_empty() {
        eval.errors.push(format!("missing AGENTS headings: {}", missing.join(", ")));
        eval.failed_checks.push("required_headings".to_string());
    }

    let links = markdown::local_links(&content);
    let resolved: BTreeSet<String> = links
        .iter()
        .filter_map(|l| paths::resolve_link(AGENTS_PATH, l.split('#').next().unwrap_or_default()))
        .collect();
    let broken: BTreeSet<&str> = links
        .iter()
        .map(String::as_str)
        .filter(|l| {
            let target = l.split('#').next().unwrap_or_default();
            !target.is_empty() && !paths::resolve_link(AGENTS_PATH, target).is_some_and(|p| ws.exists(&p))
        })
        .collect();
    eval.metrics.broken_links = broken.len();
    if !broken.is_empty() {
        eval.errors.push(format!(
            "broken AGENTS links: {}",
            broken.into_iter().collect::<Vec<_>>().join(", ")
        ));
        eval.failed_checks.push("dead_links".to_string());
    }

    let missing_links: Vec<&str> = settings
        .required_links
        .iter()
        .map(String::as_str)
        .filter(|rel| !resolved.contains(&paths::normalize_rel(rel)) && !content.contains(rel))
        .collect();
    eval.metrics.missing_required_links = missing_links.len();
    if !missing_links.is_empty() {
        eval.errors
            .push(format!("missing required AGENTS links: {}", missing_links.join(", ")));
        eval.failed_checks.push("required_links".to_string());
    }

    let unknown: BTreeSet<&str> = COMMAND_RE
        .captures_iter(&content)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str())
        .filter(|cmd| !DOCSOR_COMMANDS.contains(cmd))
        .collect();
    eval.metrics.unknown_commands = unknown.len();
    if !unknown.is_empty() {
        eval.errors.push(format!(
            "unknown docsor commands in AGENTS: {}",
            unknown.into_iter().collect::<Vec<_>>().join(", ")
        ));
        eval.failed_checks.push("command_paths".to_string());
    }

    if let Some(index) = ws.read_text(ROOT_INDEX) {
        let ratio = overlap_ratio(&content, &index);
        eval.metrics.overlap_ratio = (ratio * 10_000.0).round() / 10_000.0;
        if ratio > settings.max_overlap_ratio {
            eval.warnings.push(format!(
                "AGENTS/index overlap ratio is high: {ratio:.2} > {:.2}",
                settings.max_overlap_ratio
            ));
            eval.failed_checks.push("overlap_ratio".to_string());
        }
    }

    eval.passed = eval.failed_checks.is_empty();
    eval
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::Path;

    fn write(root: &Path, rel: &str, text: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, text).unwrap();
    }

    fn enabled_repo(extra: serde_json::Value) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let mut policy = serde_json::json!({"agents_generation": {"enabled": true}});
        if let (Some(base), Some(more)) = (policy["agents_generation"].as_object_mut(), extra.as_object()) {
            base.extend(more.clone());
        }
        write(dir.path(), workspace::POLICY_PATH, &policy.to_string());
        write(
            dir.path(),
            workspace::MANIFEST_PATH,
            r#"{"version": 1, "required": {"files": ["docs/index.md", "docs/runbook.md", "docs/security.md"]}}"#,
        );
        write(dir.path(), "docs/index.md", "# Documentation Index\n\n- [Runbook](./runbook.md)\n");
        write(dir.path(), "docs/runbook.md", "# Runbook\n");
        write(dir.path(), "docs/security.md", "# Security Baseline\n");
        dir
    }

    #[test]
    fn test_generated_agents_passes_evaluation() {
        let dir = enabled_repo(serde_json::json!({}));
        let ws = Workspace::load(dir.path()).unwrap();
        let mut generation = generate(&ws, &ws.manifest, &["core".to_string()], false);
        assert_eq!(generation.report.status, GenerationStatus::Generated);
        assert_eq!(
            generation.report.navigation_links,
            vec![ROOT_INDEX, workspace::POLICY_PATH, workspace::MANIFEST_PATH, "docs/security.md"]
        );
        assert!(generation.content.contains("- Top-level modules detected: `core`."));
        write_generation(&ws, &mut generation).unwrap();
        assert!(dir.path().join("docs/.agents-report.json").is_file());

        let ws = Workspace::load(dir.path()).unwrap();
        let eval = evaluate(&ws);
        assert!(eval.passed, "{:?}", eval.errors);
        assert_eq!(generate(&ws, &ws.manifest, &["core".to_string()], false).report.status, GenerationStatus::Unchanged);
    }

    #[test]
    fn test_human_agents_file_is_left_alone_unless_forced() {
        let dir = enabled_repo(serde_json::json!({}));
        write(dir.path(), AGENTS_PATH, "# AGENTS\n\nHand written.\n");
        let ws = Workspace::load(dir.path()).unwrap();
        let generation = generate(&ws, &ws.manifest, &[], false);
        assert_eq!(generation.report.status, GenerationStatus::Skipped);
        let forced = generate(&ws, &ws.manifest, &[], true);
        assert_eq!(forced.report.status, GenerationStatus::Generated);
    }

    #[test]
    fn test_evaluation_reports_each_failed_check() {
        let dir = enabled_repo(serde_json::json!({"required_links": ["docs/security.md"]}));
        write(
            dir.path(),
            AGENTS_PATH,
            "# AGENTS\n\n## Purpose\n\n- [Gone](./docs/gone.md)\n\n```bash\ndocsor deploy\n```\n",
        );
        let ws = Workspace::load(dir.path()).unwrap();
        let eval = evaluate(&ws);
        assert!(!eval.passed);
        assert_eq!(
            eval.failed_checks,
            vec!["required_headings", "dead_links", "required_links", "command_paths"]
        );
        assert_eq!(eval.metrics.missing_headings, 3);
        assert_eq!(eval.metrics.unknown_commands, 1);
    }

    #[test]
    fn test_overlap_with_index_is_flagged() {
        let dir = enabled_repo(serde_json::json!({"max_overlap_ratio": 0.5}));
        let body = "## Purpose\n\n## Navigation\n\n## Standard Commands\n\n## Guardrails\n";
        write(dir.path(), AGENTS_PATH, &format!("# AGENTS\n\n{body}"));
        write(dir.path(), ROOT_INDEX, &format!("# Documentation Index\n\n{body}"));
        let ws = Workspace::load(dir.path()).unwrap();
        let eval = evaluate(&ws);
        assert_eq!(eval.failed_checks, vec!["overlap_ratio"]);
        assert_eq!(eval.warnings.len(), 1);
        assert!(eval.errors.is_empty());
    }

    #[test]
    fn test_clip_keeps_a_trailing_blank_line() {
        assert_eq!(clip("a\nb\nc\nd\n", 3), "a\nb\n\n");
        assert_eq!(clip("a\nb\n", 3), "a\nb\n");
    }

    #[test]
    fn test_chinese_profile_renders_localized_headings() {
        let text = render(Profile::ZhCn, &[ROOT_INDEX.to_string()], &[]);
        assert!(text.contains("## 导航"));
        assert!(text.contains("- [docs/index.md](./docs/index.md)"));
        assert!(!text.contains("顶层模块"));
    }
}
