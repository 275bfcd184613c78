//! Legacy source migration: discovery, classification, target mapping, the structured
//! migration block and the migration registry.
//!
//! # For AI Agents
//!
//! - **Denylisted sources never migrate**: `classify` short-circuits them to `skip` with
//!   confidence 1.0 before looking at semantic signals or the mapping table.
//! - **Archive after write**: the executor moves a source into the archive only after the
//!   migration block is on disk. The registry records each step so an interrupted run can
//!   finish with `archive_legacy`.

use crate::core::action::LegacyDecision;
use crate::core::error::DocsorError;
use crate::core::output;
use crate::core::paths;
use crate::core::policy::{LegacySettings, MappingStrategy};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::LazyLock;

pub const REGISTRY_VERSION: u32 = 1;
pub const NOT_MIGRATABLE: &str = "not_migratable";
/// Headings every migration block carries; structured completeness counts them.
pub const STRUCTURED_HEADINGS: [&str; 5] = [
    "### Summary",
    "### Key Facts",
    "### Decisions",
    "### TODO & Risks",
    "### Source Trace",
];

static DATE_LINE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(20\d{2}[-/]\d{1,2}[-/]\d{1,2})\b").unwrap());

const CATEGORY_SIGNALS: &[(&str, &[&str])] = &[
    ("requirement", &["requirement", "requirements", "spec", "scope"]),
    ("design", &["design", "architecture", "component", "interface"]),
    ("decision", &["decision", "decided", "tradeoff", "adr"]),
    ("roadmap", &["roadmap", "milestone", "timeline", "phase", "plan"]),
    ("runbook", &["runbook", "deploy", "command", "script", "oncall"]),
    ("notes", &["notes", "meeting", "journal", "log", "worklog"]),
];
const DECISION_KEYWORDS: &[&str] = &["decision", "decide", "constraint", "must"];
const RISK_KEYWORDS: &[&str] = &["todo", "risk", "block", "pending", "issue"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LegacyStatus {
    Migrated,
    Archived,
    Exempted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryEntry {
    pub source_path: String,
    pub status: LegacyStatus,
    #[serde(default)]
    pub target_path: Option<String>,
    #[serde(default)]
    pub archive_path: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Registry {
    pub version: u32,
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(default)]
    pub entries: BTreeMap<String, RegistryEntry>,
}

impl Default for Registry {
    fn default() -> Self {
        Self {
            version: REGISTRY_VERSION,
            updated_at: None,
            entries: BTreeMap::new(),
        }
    }
}

impl Registry {
    pub fn get(&self, source: &str) -> Option<&RegistryEntry> {
        self.entries.get(&paths::normalize_rel(source))
    }

    pub fn status(&self, source: &str) -> Option<LegacyStatus> {
        self.get(source).map(|e| e.status)
    }

    /// Inserts or replaces the entry for `entry.source_path`.
    pub fn upsert(&mut self, mut entry: RegistryEntry, at: &str) {
        entry.source_path = paths::normalize_rel(&entry.source_path);
        entry.updated_at = Some(at.to_string());
        if let Some(existing) = self.entries.get(&entry.source_path) {
            entry.target_path = entry.target_path.or_else(|| existing.target_path.clone());
            entry.archive_path = entry.archive_path.or_else(|| existing.archive_path.clone());
            entry.category = entry.category.or_else(|| existing.category.clone());
            entry.confidence = entry.confidence.or(existing.confidence);
        }
        self.updated_at = Some(at.to_string());
        self.entries.insert(entry.source_path.clone(), entry);
    }
}

pub fn load_registry(path: &Path) -> Result<Registry, DocsorError> {
    Ok(output::read_json::<Registry>(path)?.unwrap_or_default())
}

pub fn save_registry(path: &Path, registry: &Registry) -> Result<(), DocsorError> {
    output::write_json(path, registry)
}

/// Externally supplied classification for one legacy source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegacySignal {
    pub source_path: String,
    pub category: String,
    pub confidence: f64,
    #[serde(default)]
    pub rationale: Option<String>,
}

/// Reads the legacy semantic report. Malformed entries are dropped; an unreadable file
/// is a config error because the policy pointed at it.
pub fn load_semantic_report(path: &Path) -> Result<BTreeMap<String, LegacySignal>, DocsorError> {
    let Some(value) = output::read_json::<Value>(path)? else {
        return Ok(BTreeMap::new());
    };
    let mut signals = BTreeMap::new();
    for raw in value.get("entries").and_then(Value::as_array).into_iter().flatten() {
        if let Ok(mut signal) = serde_json::from_value::<LegacySignal>(raw.clone()) {
            signal.source_path = paths::normalize_rel(&signal.source_path);
            signal.confidence = signal.confidence.clamp(0.0, 1.0);
            signals.insert(signal.source_path.clone(), signal);
        }
    }
    Ok(signals)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Classification {
    pub source_path: String,
    pub category: String,
    pub confidence: f64,
    pub decision: LegacyDecision,
    pub rationale: String,
    pub signals: Vec<String>,
}

/// Candidate legacy sources among the scanned files.
pub fn discover(files: &[String], settings: &LegacySettings) -> Vec<String> {
    if !settings.enabled || settings.include_globs.is_empty() {
        return Vec::new();
    }
    let archive_prefix = format!("{}/", settings.archive_root.trim_end_matches('/'));
    let mut out: Vec<String> = files
        .iter()
        .map(|f| paths::normalize_rel(f))
        .filter(|f| !f.starts_with(&archive_prefix))
        .filter(|f| *f != settings.registry_path && *f != settings.semantic_report_path)
        .filter(|f| !paths::basename(f).starts_with('.'))
        .filter(|f| paths::matches_any(&settings.include_globs, f))
        .filter(|f| !paths::matches_any(&settings.exclude_globs, f))
        .collect();
    out.sort();
    out.dedup();
    out
}

pub fn is_denylisted(source: &str, settings: &LegacySettings) -> bool {
    let name = paths::basename(source);
    settings
        .semantic
        .denylist_files
        .iter()
        .any(|d| d == source || paths::basename(d) == name)
}

pub fn is_exempt(source: &str, settings: &LegacySettings) -> bool {
    paths::matches_any(&settings.exempt_sources, source)
}

fn decide(category: &str, confidence: f64, settings: &LegacySettings) -> LegacyDecision {
    if category == NOT_MIGRATABLE {
        return LegacyDecision::Skip;
    }
    if confidence >= settings.semantic.auto_migrate_threshold {
        LegacyDecision::AutoMigrate
    } else if confidence >= settings.semantic.review_threshold {
        LegacyDecision::ManualReview
    } else {
        LegacyDecision::Skip
    }
}

/// Keyword classifier used when no external signal exists for a source.
fn classify_by_keywords(source: &str, content: &str, settings: &LegacySettings) -> (String, f64, Vec<String>) {
    let haystack = format!("{}\n{}", source.to_lowercase(), content.to_lowercase());
    let allowed = &settings.semantic.categories;
    let mut best: Option<(&str, Vec<&str>)> = None;
    for (category, keywords) in CATEGORY_SIGNALS {
        if !allowed.is_empty() && !allowed.iter().any(|c| c == category) {
            continue;
        }
        let hits: Vec<&str> = keywords.iter().copied().filter(|k| haystack.contains(k)).collect();
        if hits.is_empty() {
            continue;
        }
        if best.as_ref().is_none_or(|(_, b)| hits.len() > b.len()) {
            best = Some((category, hits));
        }
    }
    match best {
        None => (NOT_MIGRATABLE.to_string(), 0.40, vec!["no-matched-keyword".to_string()]),
        Some((category, hits)) => {
            let confidence = (0.55 + hits.len() as f64 * 0.12).min(0.98);
            let confidence = (confidence * 10_000.0).round() / 10_000.0;
            (
                category.to_string(),
                confidence,
                hits.into_iter().map(str::to_string).collect(),
            )
        }
    }
}

/// Resolves the migration decision for one candidate.
pub fn classify(
    source: &str,
    content: Option<&str>,
    settings: &LegacySettings,
    signals: &BTreeMap<String, LegacySignal>,
) -> Classification {
    let source_path = paths::normalize_rel(source);
    let build = |category: String, confidence: f64, decision, rationale: &str, signals: Vec<String>| Classification {
        source_path: source_path.clone(),
        category,
        confidence,
        decision,
        rationale: rationale.to_string(),
        signals,
    };

    if is_denylisted(&source_path, settings) {
        return build(
            NOT_MIGRATABLE.into(),
            1.0,
            LegacyDecision::Skip,
            "source matched denylist_files",
            vec!["denylist_files".into()],
        );
    }
    if is_exempt(&source_path, settings) {
        return build(
            NOT_MIGRATABLE.into(),
            1.0,
            LegacyDecision::Skip,
            "source is exempt",
            vec!["exempt_sources".into()],
        );
    }
    if let Some(signal) = signals.get(&source_path) {
        let decision = decide(&signal.category, signal.confidence, settings);
        return build(
            signal.category.clone(),
            signal.confidence,
            decision,
            signal.rationale.as_deref().unwrap_or("semantic report signal"),
            vec!["semantic_report".into()],
        );
    }
    let Some(content) = content else {
        let decision = if settings.semantic.fail_closed {
            LegacyDecision::ManualReview
        } else {
            LegacyDecision::Skip
        };
        return build(NOT_MIGRATABLE.into(), 0.0, decision, "source unreadable", vec!["read-error".into()]);
    };
    let (category, confidence, hits) = classify_by_keywords(&source_path, content, settings);
    let decision = decide(&category, confidence, settings);
    build(category, confidence, decision, "keyword signals", hits)
}

/// Target document for a migrated source. `None` when the mapping table has no entry
/// under the manual strategy.
pub fn target_path(source: &str, category: &str, settings: &LegacySettings) -> Option<String> {
    let source = paths::normalize_rel(source);
    if let Some(mapped) = settings.mapping_table.get(&source) {
        let mapped = paths::normalize_rel(mapped);
        if !mapped.is_empty() {
            return Some(mapped);
        }
    }
    let root = settings.target_root.trim_end_matches('/');
    match settings.mapping_strategy {
        MappingStrategy::PathBased => {
            let stem = match source.rsplit_once('.') {
                Some((stem, _)) if !stem.is_empty() && !stem.ends_with('/') => stem,
                _ => source.as_str(),
            };
            Some(format!("{root}/{stem}.md"))
        }
        MappingStrategy::TagBased => Some(format!("{root}/{category}.md")),
        MappingStrategy::ManualTable => None,
    }
}

pub fn archive_path(source: &str, settings: &LegacySettings) -> String {
    format!(
        "{}/{}",
        settings.archive_root.trim_end_matches('/'),
        paths::normalize_rel(source)
    )
}

pub fn source_marker(source: &str) -> String {
    format!("<!-- legacy-source: {} -->", paths::normalize_rel(source))
}

/// The migration block for `source` inside `target_text`, if present.
pub fn block_for<'a>(target_text: &'a str, source: &str) -> Option<&'a str> {
    let marker = source_marker(source);
    let start = target_text.find(&marker)?;
    let rest = &target_text[start + marker.len()..];
    let end = rest
        .find("\n## Legacy Source `")
        .map(|i| start + marker.len() + i)
        .unwrap_or(target_text.len());
    Some(&target_text[start..end])
}

/// Share of structured headings present in a migration block.
pub fn structured_presence(block: &str) -> f64 {
    let hit = STRUCTURED_HEADINGS.iter().filter(|h| block.contains(*h)).count();
    hit as f64 / STRUCTURED_HEADINGS.len() as f64
}

fn shorten(line: &str, max: usize) -> String {
    if line.chars().count() <= max {
        return line.to_string();
    }
    let head: String = line.chars().take(max.saturating_sub(3)).collect();
    format!("{}...", head.trim_end())
}

fn lines_with(lines: &[&str], keywords: &[&str], max: usize) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for line in lines {
        let lower = line.to_lowercase();
        if !keywords.iter().any(|k| lower.contains(k)) {
            continue;
        }
        let item = shorten(line, 180);
        if !out.contains(&item) {
            out.push(item);
        }
        if out.len() >= max {
            break;
        }
    }
    out
}

/// Structured content of a migration block, before rendering.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationDigest {
    pub summary: Vec<String>,
    pub key_facts: Vec<String>,
    pub decisions: Vec<String>,
    pub risks: Vec<String>,
    pub trace: Vec<String>,
    pub excerpt: String,
}

pub fn digest(source: &str, content: &str, archive: &str, classification: Option<&Classification>, evidence: &[String]) -> MigrationDigest {
    let lines: Vec<&str> = content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .take(120)
        .collect();

    let mut summary = vec![shorten(lines.first().copied().unwrap_or("(empty)"), 180)];
    if let Some(c) = classification {
        summary.push(format!("Semantic category: `{}`", c.category));
        summary.push(format!("Semantic confidence: `{:.2}`", c.confidence));
    }

    let mut key_facts = vec![format!("Source file: `{source}`")];
    let dir = paths::parent_dir(source);
    if !dir.is_empty() {
        key_facts.push(format!("Source directory: `{dir}`"));
    }
    for line in &lines {
        if key_facts.len() >= 5 {
            break;
        }
        if DATE_LINE_RE.is_match(line) {
            let item = shorten(line, 180);
            if !key_facts.contains(&item) {
                key_facts.push(item);
            }
        }
    }

    let mut trace = vec![
        format!("Source path: `{source}`"),
        format!("Archive path: `{archive}`"),
    ];
    if let Some(first) = evidence.iter().map(|e| e.trim()).find(|e| !e.is_empty()) {
        trace.push(format!("Evidence references: `{first}`"));
    }

    let excerpt = content.lines().take(20).collect::<Vec<_>>().join("\n");
    let excerpt = excerpt.trim();
    MigrationDigest {
        summary,
        key_facts,
        decisions: lines_with(&lines, DECISION_KEYWORDS, 5),
        risks: lines_with(&lines, RISK_KEYWORDS, 6),
        trace,
        excerpt: if excerpt.is_empty() { "(empty)".into() } else { excerpt.to_string() },
    }
}

fn render_list(out: &mut Vec<String>, heading: &str, items: &[String], empty: &str) {
    out.push(heading.to_string());
    if items.is_empty() {
        out.push(format!("- {empty}"));
    } else {
        out.extend(items.iter().map(|i| format!("- {i}")));
    }
    out.push(String::new());
}

/// Renders the migration block appended to the target document.
pub fn render_block(source: &str, digest: &MigrationDigest, migrated_at: &str) -> String {
    let mut out = vec![
        format!("## Legacy Source `{source}`"),
        source_marker(source),
        format!("<!-- legacy-migrated-at: {migrated_at} -->"),
        String::new(),
    ];
    render_list(&mut out, STRUCTURED_HEADINGS[0], &digest.summary, "No summary available");
    render_list(&mut out, STRUCTURED_HEADINGS[1], &digest.key_facts, "UNKNOWN");
    render_list(&mut out, STRUCTURED_HEADINGS[2], &digest.decisions, "No decisions recorded");
    render_list(&mut out, STRUCTURED_HEADINGS[3], &digest.risks, "No pending tasks or risks");
    render_list(&mut out, STRUCTURED_HEADINGS[4], &digest.trace, "UNKNOWN");
    out.push("#### Source Excerpt".to_string());
    out.push(String::new());
    out.push("````text".to_string());
    out.push(digest.excerpt.clone());
    out.push("````".to_string());
    out.push(String::new());
    out.join("\n")
}

pub fn target_header() -> &'static str {
    "# Legacy Migration Records\n\nThis document records migrated legacy sources.\n"
}

/// Per-run record of legacy classification, written next to the plan.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LegacySemanticReport {
    pub generated_at: String,
    pub candidates: Vec<Classification>,
    pub counts: BTreeMap<String, usize>,
}

impl LegacySemanticReport {
    pub fn new(generated_at: &str, candidates: Vec<Classification>) -> Self {
        let mut counts = BTreeMap::new();
        for c in &candidates {
            let key = match c.decision {
                LegacyDecision::AutoMigrate => "auto_migrate",
                LegacyDecision::ManualReview => "manual_review",
                LegacyDecision::Skip => "skip",
            };
            *counts.entry(key.to_string()).or_insert(0) += 1;
        }
        Self {
            generated_at: generated_at.to_string(),
            candidates,
            counts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> LegacySettings {
        LegacySettings {
            enabled: true,
            include_globs: vec!["**/*.md".into(), "legacy/**".into()],
            ..LegacySettings::default()
        }
    }

    fn signal(path: &str, confidence: f64) -> (String, LegacySignal) {
        (
            path.to_string(),
            LegacySignal {
                source_path: path.to_string(),
                category: "notes".into(),
                confidence,
                rationale: None,
            },
        )
    }

    #[test]
    fn test_denylist_beats_high_confidence_signal() {
        let s = settings();
        let signals: BTreeMap<_, _> = [
            signal("README.md", 0.99),
            signal("AGENTS.md", 0.99),
            signal("legacy/notes.md", 0.99),
        ]
        .into_iter()
        .collect();
        let decisions: Vec<_> = ["README.md", "AGENTS.md", "legacy/notes.md"]
            .iter()
            .map(|p| classify(p, Some("notes"), &s, &signals).decision)
            .collect();
        assert_eq!(
            decisions,
            vec![LegacyDecision::Skip, LegacyDecision::Skip, LegacyDecision::AutoMigrate]
        );
        let readme = classify("sub/README.md", None, &s, &signals);
        assert_eq!(readme.confidence, 1.0);
        assert_eq!(readme.decision, LegacyDecision::Skip);
    }

    #[test]
    fn test_thresholds_and_keyword_fallback() {
        let s = settings();
        let signals: BTreeMap<_, _> = [signal("legacy/a.md", 0.7), signal("legacy/b.md", 0.2)].into_iter().collect();
        assert_eq!(classify("legacy/a.md", None, &s, &signals).decision, LegacyDecision::ManualReview);
        assert_eq!(classify("legacy/b.md", None, &s, &signals).decision, LegacyDecision::Skip);

        let plain = classify("legacy/c.txt", Some("lorem ipsum"), &s, &BTreeMap::new());
        assert_eq!(plain.category, NOT_MIGRATABLE);
        assert_eq!(plain.decision, LegacyDecision::Skip);

        let roadmap = classify(
            "legacy/roadmap.md",
            Some("Milestone one. Timeline slips. Phase two plan."),
            &s,
            &BTreeMap::new(),
        );
        assert_eq!(roadmap.category, "roadmap");
        assert_eq!(roadmap.decision, LegacyDecision::AutoMigrate);
    }

    #[test]
    fn test_discover_filters_archive_and_excludes() {
        let s = settings();
        let files = vec![
            "docs/index.md".to_string(),
            "docs/archive/legacy/old.md".to_string(),
            "legacy/notes.md".to_string(),
            "legacy/.hidden.md".to_string(),
            "src/lib.rs".to_string(),
        ];
        assert_eq!(discover(&files, &s), vec!["legacy/notes.md"]);
    }

    #[test]
    fn test_target_mapping_strategies() {
        let mut s = settings();
        assert_eq!(target_path("legacy/notes.txt", "notes", &s).as_deref(), Some("docs/history/legacy/legacy/notes.md"));
        s.mapping_strategy = MappingStrategy::TagBased;
        assert_eq!(target_path("legacy/notes.txt", "notes", &s).as_deref(), Some("docs/history/legacy/notes.md"));
        s.mapping_strategy = MappingStrategy::ManualTable;
        assert_eq!(target_path("legacy/notes.txt", "notes", &s), None);
        s.mapping_table.insert("legacy/notes.txt".into(), "docs/history/n.md".into());
        assert_eq!(target_path("legacy/notes.txt", "notes", &s).as_deref(), Some("docs/history/n.md"));
        assert_eq!(archive_path("legacy/notes.txt", &s), "docs/archive/legacy/legacy/notes.txt");
    }

    #[test]
    fn test_block_rendering_is_fully_structured() {
        let content = "Release notes\nDecision: we must ship on 2026-01-05\nTODO: fix flaky test\n";
        let d = digest("legacy/notes.md", content, "docs/archive/legacy/legacy/notes.md", None, &["evidence://legacy".into()]);
        let block = render_block("legacy/notes.md", &d, "2026-02-01");
        let text = format!("{}\n{block}", target_header());
        let found = block_for(&text, "legacy/notes.md").unwrap();
        assert_eq!(structured_presence(found), 1.0);
        assert!(found.contains("- Decision: we must ship on 2026-01-05"));
        assert!(found.contains("- TODO: fix flaky test"));
        assert!(block_for(&text, "legacy/other.md").is_none());
    }

    #[test]
    fn test_registry_upsert_keeps_known_fields() {
        let mut registry = Registry::default();
        registry.upsert(
            RegistryEntry {
                source_path: "./legacy/notes.md".into(),
                status: LegacyStatus::Migrated,
                target_path: Some("docs/history/legacy/legacy/notes.md".into()),
                archive_path: None,
                category: Some("notes".into()),
                confidence: Some(0.9),
                updated_at: None,
            },
            "t1",
        );
        registry.upsert(
            RegistryEntry {
                source_path: "legacy/notes.md".into(),
                status: LegacyStatus::Archived,
                target_path: None,
                archive_path: Some("docs/archive/legacy/legacy/notes.md".into()),
                category: None,
                confidence: None,
                updated_at: None,
            },
            "t2",
        );
        let entry = registry.get("legacy/notes.md").unwrap();
        assert_eq!(entry.status, LegacyStatus::Archived);
        assert_eq!(entry.target_path.as_deref(), Some("docs/history/legacy/legacy/notes.md"));
        assert_eq!(entry.category.as_deref(), Some("notes"));
        assert_eq!(registry.updated_at.as_deref(), Some("t2"));
    }
}
