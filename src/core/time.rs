//! Shared timestamp and envelope helpers.
//!
//! Planning never reads the wall clock: freshness decisions use the date carried by
//! the facts snapshot. Only report stamping goes through `now_*`.

use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value as JsonValue;
use ulid::Ulid;

/// RFC3339 UTC timestamp for report headers.
pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}

pub fn today() -> NaiveDate {
    Utc::now().date_naive()
}

pub fn new_run_id() -> String {
    Ulid::new().to_string()
}

/// Extracts the calendar date from an RFC3339 timestamp or a bare `YYYY-MM-DD`.
pub fn parse_reference_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Some(ts.with_timezone(&Utc).date_naive());
    }
    parse_iso_date(value)
}

pub fn parse_iso_date(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").ok()
}

pub fn format_iso_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Standard command response envelope shape used by `--format json`.
pub fn command_envelope(cmd: &str, status: &str, extra: JsonValue) -> JsonValue {
    let mut base = serde_json::json!({
        "envelope_version": "1.0.0",
        "ts": now_rfc3339(),
        "event_id": new_run_id(),
        "cmd": cmd,
        "status": status
    });
    if let (Some(base_obj), Some(extra_obj)) = (base.as_object_mut(), extra.as_object()) {
        for (k, v) in extra_obj {
            base_obj.insert(k.clone(), v.clone());
        }
    }
    base
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_reference_date_accepts_rfc3339_and_plain_dates() {
        let expected = NaiveDate::from_ymd_opt(2026, 3, 4).unwrap();
        assert_eq!(
            parse_reference_date("2026-03-04T23:10:00+00:00"),
            Some(expected)
        );
        assert_eq!(parse_reference_date("2026-03-04"), Some(expected));
        assert_eq!(parse_reference_date("yesterday"), None);
    }

    #[test]
    fn test_format_iso_date_round_trips() {
        let date = NaiveDate::from_ymd_opt(2025, 12, 31).unwrap();
        assert_eq!(parse_iso_date(&format_iso_date(date)), Some(date));
    }

    #[test]
    fn test_command_envelope_with_extra() {
        let envelope = command_envelope("plan", "ok", serde_json::json!({"action_count": 3}));
        assert_eq!(envelope["cmd"], "plan");
        assert_eq!(envelope["status"], "ok");
        assert_eq!(envelope["action_count"], 3);
        assert!(ulid::Ulid::from_string(envelope["event_id"].as_str().unwrap()).is_ok());
    }
}
