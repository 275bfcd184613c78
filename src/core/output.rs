//! Artifact persistence and compact output rendering.
//!
//! Reports are overwritten each run; JSON artifacts are written pretty-printed with a
//! trailing newline so diffs stay readable.

use crate::core::error::{self, DocsorError};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs;
use std::path::Path;
use tracing::warn;

/// Collapse newlines/extra whitespace and bound length for terminal display.
pub fn compact_line(input: &str, max_chars: usize) -> String {
    let collapsed = input.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut chars = collapsed.chars();
    let preview: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{}...", preview)
    } else {
        preview
    }
}

/// Render up to `max_items` messages with compact formatting.
pub fn preview_messages(messages: &[String], max_items: usize, max_chars: usize) -> String {
    if messages.is_empty() {
        return String::new();
    }
    let shown = messages
        .iter()
        .take(max_items)
        .map(|m| compact_line(m, max_chars))
        .collect::<Vec<_>>()
        .join(" | ");
    if messages.len() > max_items {
        format!("{} (+{} more)", shown, messages.len() - max_items)
    } else {
        shown
    }
}

/// Truncates on a char boundary, returning the input unchanged when it fits.
pub fn truncate_chars(input: &str, max_chars: usize) -> String {
    if input.chars().count() <= max_chars {
        return input.to_string();
    }
    input.chars().take(max_chars).collect()
}

/// Reads a text file, replacing invalid UTF-8 sequences instead of failing.
pub fn read_text_lossy(path: &Path) -> Result<String, DocsorError> {
    let bytes = fs::read(path)?;
    match String::from_utf8(bytes) {
        Ok(text) => Ok(text),
        Err(e) => {
            warn!(path = %path.display(), "invalid UTF-8 replaced while reading");
            Ok(String::from_utf8_lossy(e.as_bytes()).into_owned())
        }
    }
}

/// Reads a JSON artifact. A missing file is `Ok(None)`; unparsable content is a
/// `ConfigError` naming the artifact.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, DocsorError> {
    if !path.exists() {
        return Ok(None);
    }
    let bytes = fs::read(path).map_err(DocsorError::IoError)?;
    if bytes.iter().all(|b| b.is_ascii_whitespace()) {
        return Ok(None);
    }
    let value = serde_json::from_slice(&bytes)
        .map_err(|e| error::config_error(&path.display().to_string(), e))?;
    Ok(Some(value))
}

pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), DocsorError> {
    let mut bytes = serde_json::to_vec_pretty(value)?;
    bytes.push(b'\n');
    write_bytes(path, &bytes)
}

pub fn write_text(path: &Path, text: &str) -> Result<(), DocsorError> {
    write_bytes(path, text.as_bytes())
}

fn write_bytes(path: &Path, bytes: &[u8]) -> Result<(), DocsorError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(DocsorError::IoError)?;
    }
    fs::write(path, bytes).map_err(DocsorError::IoError)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compact_line_bounds_length() {
        assert_eq!(compact_line("a  b\n c", 10), "a b c");
        assert_eq!(compact_line("abcdefgh", 3), "abc...");
    }

    #[test]
    fn test_preview_messages_reports_overflow() {
        let msgs = vec!["one".to_string(), "two".to_string(), "three".to_string()];
        assert_eq!(preview_messages(&msgs, 2, 20), "one | two (+1 more)");
        assert_eq!(preview_messages(&[], 2, 20), "");
    }

    #[test]
    fn test_truncate_chars_respects_multibyte() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("hi", 8), "hi");
    }

    #[test]
    fn test_read_json_missing_and_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let missing: Option<serde_json::Value> = read_json(&dir.path().join("nope.json")).unwrap();
        assert!(missing.is_none());

        let bad = dir.path().join("bad.json");
        fs::write(&bad, "{not json").unwrap();
        let err = read_json::<serde_json::Value>(&bad).unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn test_write_json_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("docs/nested/report.json");
        write_json(&path, &serde_json::json!({"ok": true})).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.ends_with("}\n"));
    }
}
