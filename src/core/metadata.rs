//! Doc metadata block: owner, last review date and review cycle, stored as
//! `<!-- doc-... : value -->` lines at the top of a managed document.

use crate::core::markdown;
use crate::core::paths;
use crate::core::policy::MetadataSettings;
use crate::core::time;
use chrono::{Duration, NaiveDate};
use serde::Serialize;

pub const OWNER_KEY: &str = "doc-owner";
pub const LAST_REVIEWED_KEY: &str = "doc-last-reviewed";
pub const REVIEW_CYCLE_KEY: &str = "doc-review-cycle-days";

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct MetadataEval {
    pub path: String,
    pub owner: Option<String>,
    pub last_reviewed: Option<NaiveDate>,
    pub review_cycle_days: Option<u32>,
    pub missing: Vec<String>,
    pub invalid: Vec<String>,
    pub stale: bool,
    pub age_days: Option<i64>,
    pub due_date: Option<NaiveDate>,
}

impl MetadataEval {
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty() && self.invalid.is_empty()
    }
}

/// Metadata applies to markdown under `docs/` that is not ignored by policy.
pub fn applies_to(rel: &str, settings: &MetadataSettings) -> bool {
    settings.enabled
        && rel.starts_with("docs/")
        && rel.ends_with(".md")
        && !paths::matches_any(&settings.ignore_paths, rel)
}

fn first_value(text: &str, key: &str) -> Option<String> {
    markdown::comment_values(text, key)
        .into_iter()
        .next()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_cycle(raw: &str) -> Option<u32> {
    raw.parse::<u32>().ok().filter(|n| *n > 0)
}

pub fn evaluate(rel: &str, text: &str, settings: &MetadataSettings, reference: NaiveDate) -> MetadataEval {
    let owner = first_value(text, OWNER_KEY);
    let reviewed_raw = first_value(text, LAST_REVIEWED_KEY);
    let cycle_raw = first_value(text, REVIEW_CYCLE_KEY);

    let mut eval = MetadataEval {
        path: rel.to_string(),
        owner: owner.clone(),
        ..MetadataEval::default()
    };

    if settings.require_owner && owner.is_none() {
        eval.missing.push(OWNER_KEY.to_string());
    }

    match reviewed_raw.as_deref() {
        None => {
            if settings.require_last_reviewed {
                eval.missing.push(LAST_REVIEWED_KEY.to_string());
            }
        }
        Some(raw) => match time::parse_iso_date(raw) {
            Some(date) => eval.last_reviewed = Some(date),
            None => eval.invalid.push(LAST_REVIEWED_KEY.to_string()),
        },
    }

    match cycle_raw.as_deref() {
        None => {
            if settings.require_review_cycle_days {
                eval.missing.push(REVIEW_CYCLE_KEY.to_string());
            }
        }
        Some(raw) => match parse_cycle(raw) {
            Some(days) => eval.review_cycle_days = Some(days),
            None => eval.invalid.push(REVIEW_CYCLE_KEY.to_string()),
        },
    }

    if let Some(reviewed) = eval.last_reviewed {
        let cycle = eval
            .review_cycle_days
            .unwrap_or(settings.default_review_cycle_days);
        let due = reviewed + Duration::days(i64::from(cycle));
        eval.age_days = Some((reference - reviewed).num_days());
        eval.due_date = Some(due);
        eval.stale = due < reference;
    }
    eval
}

fn is_metadata_line(line: &str) -> bool {
    let t = line.trim();
    [OWNER_KEY, LAST_REVIEWED_KEY, REVIEW_CYCLE_KEY]
        .iter()
        .any(|k| t.starts_with("<!--") && t.contains(&format!("{k}:")))
}

/// Rewrites the metadata block, keeping valid existing values and filling the rest
/// from defaults. When `restamp` is set the review date becomes `reference`.
pub fn ensure_block(text: &str, settings: &MetadataSettings, reference: NaiveDate, restamp: bool) -> String {
    let owner = first_value(text, OWNER_KEY).unwrap_or_else(|| settings.default_owner.clone());
    let reviewed = if restamp {
        reference
    } else {
        first_value(text, LAST_REVIEWED_KEY)
            .and_then(|v| time::parse_iso_date(&v))
            .unwrap_or(reference)
    };
    let cycle = first_value(text, REVIEW_CYCLE_KEY)
        .and_then(|v| parse_cycle(&v))
        .unwrap_or(settings.default_review_cycle_days);

    let block = [
        markdown::comment(OWNER_KEY, &owner),
        markdown::comment(LAST_REVIEWED_KEY, &time::format_iso_date(reviewed)),
        markdown::comment(REVIEW_CYCLE_KEY, &cycle.to_string()),
    ]
    .join("\n");

    let body = text
        .lines()
        .filter(|l| !is_metadata_line(l))
        .collect::<Vec<_>>()
        .join("\n");
    let body = body.trim_matches('\n');
    if body.is_empty() {
        format!("{block}\n")
    } else {
        format!("{block}\n\n{body}\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_evaluate_reports_missing_invalid_and_stale() {
        let settings = MetadataSettings::default();
        let text = "<!-- doc-last-reviewed: 2026-13-01 -->\n<!-- doc-review-cycle-days: 0 -->\n# T\n";
        let eval = evaluate("docs/a.md", text, &settings, date(2026, 5, 1));
        assert_eq!(eval.missing, vec![OWNER_KEY]);
        assert_eq!(eval.invalid, vec![LAST_REVIEWED_KEY, REVIEW_CYCLE_KEY]);
        assert!(!eval.stale);

        let text = "<!-- doc-owner: team -->\n<!-- doc-last-reviewed: 2026-01-01 -->\n<!-- doc-review-cycle-days: 30 -->\n";
        let eval = evaluate("docs/a.md", text, &settings, date(2026, 3, 1));
        assert!(eval.is_complete());
        assert!(eval.stale);
        assert_eq!(eval.due_date, Some(date(2026, 1, 31)));
        let fresh = evaluate("docs/a.md", text, &settings, date(2026, 1, 31));
        assert!(!fresh.stale);
    }

    #[test]
    fn test_ensure_block_is_idempotent_and_keeps_values() {
        let settings = MetadataSettings::default();
        let text = "<!-- doc-owner: docs-team -->\n# Title\n\nbody\n";
        let once = ensure_block(text, &settings, date(2026, 2, 2), false);
        assert!(once.starts_with("<!-- doc-owner: docs-team -->\n<!-- doc-last-reviewed: 2026-02-02 -->"));
        assert!(once.ends_with("# Title\n\nbody\n"));
        assert_eq!(ensure_block(&once, &settings, date(2026, 9, 9), false), once);
        let restamped = ensure_block(&once, &settings, date(2026, 9, 9), true);
        assert!(restamped.contains("doc-last-reviewed: 2026-09-09"));
    }

    #[test]
    fn test_applies_to_respects_ignore() {
        let settings = MetadataSettings::default();
        assert!(applies_to("docs/index.md", &settings));
        assert!(!applies_to("docs/archive/old.md", &settings));
        assert!(!applies_to("README.md", &settings));
    }
}
