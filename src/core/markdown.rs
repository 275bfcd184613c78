//! Line-oriented markdown helpers used by the executor and the validator.
//!
//! Only ATX headings outside fenced code blocks are considered structure. Section
//! blocks run from their heading to the next heading of the same or higher level.

use regex::Regex;
use std::sync::LazyLock;

static LINK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[[^\]]+\]\(([^)\s]+)\)").unwrap());
static COMMENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<!--\s*([a-z0-9_.-]+)\s*:\s*(.*?)\s*-->").unwrap());

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Heading {
    pub level: usize,
    pub text: String,
    pub line: usize,
}

fn is_fence(line: &str) -> bool {
    let t = line.trim_start();
    t.starts_with("```") || t.starts_with("~~~")
}

fn parse_heading(line: &str) -> Option<(usize, String)> {
    let hashes = line.chars().take_while(|c| *c == '#').count();
    if hashes == 0 || hashes > 6 {
        return None;
    }
    let rest = &line[hashes..];
    if !rest.is_empty() && !rest.starts_with(' ') {
        return None;
    }
    Some((hashes, rest.trim().to_string()))
}

pub fn headings(text: &str) -> Vec<Heading> {
    let mut out = Vec::new();
    let mut in_fence = false;
    for (idx, line) in text.lines().enumerate() {
        if is_fence(line) {
            in_fence = !in_fence;
            continue;
        }
        if in_fence {
            continue;
        }
        if let Some((level, text)) = parse_heading(line) {
            out.push(Heading {
                level,
                text,
                line: idx,
            });
        }
    }
    out
}

pub fn title(text: &str) -> Option<String> {
    headings(text)
        .into_iter()
        .find(|h| h.level == 1)
        .map(|h| h.text)
}

/// Line range `[start, end)` of the block opened by `heading` (a full `## Title` line).
pub fn section_range(text: &str, heading: &str) -> Option<(usize, usize)> {
    let (level, wanted) = parse_heading(heading.trim())?;
    let all = headings(text);
    let pos = all
        .iter()
        .position(|h| h.level == level && h.text == wanted)?;
    let start = all[pos].line;
    let end = all[pos + 1..]
        .iter()
        .find(|h| h.level <= level)
        .map(|h| h.line)
        .unwrap_or_else(|| text.lines().count());
    Some((start, end))
}

pub fn section_body(text: &str, heading: &str) -> Option<String> {
    let (start, end) = section_range(text, heading)?;
    let lines: Vec<&str> = text.lines().collect();
    Some(lines[start + 1..end].join("\n").trim().to_string())
}

fn finish(lines: Vec<String>) -> String {
    let mut text = lines.join("\n");
    while text.ends_with("\n\n") {
        text.pop();
    }
    if !text.ends_with('\n') {
        text.push('\n');
    }
    text
}

/// Replaces the block under `heading` with `body`, appending the section when absent.
pub fn upsert_section(text: &str, heading: &str, body: &str) -> String {
    let lines: Vec<String> = text.lines().map(str::to_string).collect();
    let mut block = vec![heading.trim().to_string(), String::new()];
    block.extend(body.trim_end().lines().map(str::to_string));
    block.push(String::new());

    match section_range(text, heading) {
        Some((start, end)) => {
            let mut out = lines[..start].to_vec();
            out.extend(block);
            out.extend(lines[end..].iter().cloned());
            finish(out)
        }
        None => {
            let mut out = lines;
            if out.last().is_some_and(|l| !l.trim().is_empty()) {
                out.push(String::new());
            }
            out.extend(block);
            finish(out)
        }
    }
}

/// Appends `line` at the end of the block under `heading`, creating the block when
/// missing. Trailing blank lines of the block are preserved after the new line.
pub fn append_under_heading(text: &str, heading: &str, line: &str) -> String {
    let lines: Vec<String> = text.lines().map(str::to_string).collect();
    match section_range(text, heading) {
        Some((start, end)) => {
            let mut insert_at = end;
            while insert_at > start + 1 && lines[insert_at - 1].trim().is_empty() {
                insert_at -= 1;
            }
            let mut out = lines[..insert_at].to_vec();
            if insert_at == start + 1 {
                out.push(String::new());
            }
            out.push(line.to_string());
            if end < lines.len() {
                out.push(String::new());
            }
            out.extend(lines[end..].iter().cloned());
            finish(out)
        }
        None => upsert_section(text, heading, line),
    }
}

/// Replaces the first line containing `token` with `replacement`.
pub fn replace_line_containing(text: &str, token: &str, replacement: &str) -> Option<String> {
    let lines: Vec<&str> = text.lines().collect();
    let idx = lines.iter().position(|l| l.contains(token))?;
    let mut out: Vec<String> = lines.iter().map(|l| l.to_string()).collect();
    out[idx] = replacement.to_string();
    Some(finish(out))
}

/// Markdown link targets, excluding external schemes and pure anchors.
pub fn local_links(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut in_fence = false;
    for line in text.lines() {
        if is_fence(line) {
            in_fence = !in_fence;
            continue;
        }
        if in_fence {
            continue;
        }
        for cap in LINK_RE.captures_iter(line) {
            let target = cap[1].trim();
            let lowered = target.to_ascii_lowercase();
            if target.starts_with('#')
                || lowered.starts_with("http://")
                || lowered.starts_with("https://")
                || lowered.starts_with("mailto:")
            {
                continue;
            }
            out.push(target.to_string());
        }
    }
    out
}

/// Values of `<!-- key: value -->` comments, in document order.
pub fn comment_values(text: &str, key: &str) -> Vec<String> {
    COMMENT_RE
        .captures_iter(text)
        .filter(|c| &c[1] == key)
        .map(|c| c[2].to_string())
        .collect()
}

pub fn comment(key: &str, value: &str) -> String {
    format!("<!-- {key}: {value} -->")
}

/// Body lines outside fences and HTML comments.
pub fn prose_lines(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut in_fence = false;
    let mut in_comment = false;
    for line in text.lines() {
        if is_fence(line) {
            in_fence = !in_fence;
            continue;
        }
        if in_fence {
            continue;
        }
        let trimmed = line.trim();
        if in_comment {
            if trimmed.contains("-->") {
                in_comment = false;
            }
            continue;
        }
        if trimmed.starts_with("<!--") {
            if !trimmed.contains("-->") {
                in_comment = true;
            }
            continue;
        }
        out.push(line);
    }
    out
}

pub fn bullet_items(body: &str) -> Vec<String> {
    body.lines()
        .filter_map(|l| {
            let t = l.trim_start();
            t.strip_prefix("- ")
                .or_else(|| t.strip_prefix("* "))
                .map(|s| s.trim().to_string())
        })
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = "# Title\n\nintro\n\n## Setup\n\nstep one\n\n```\n## not a heading\n```\n\n## Usage\n\nrun it\n";

    #[test]
    fn test_section_range_ignores_fenced_headings() {
        let body = section_body(DOC, "## Setup").unwrap();
        assert!(body.contains("## not a heading"));
        assert!(!body.contains("run it"));
    }

    #[test]
    fn test_upsert_section_replaces_and_appends() {
        let replaced = upsert_section(DOC, "## Usage", "new usage");
        assert!(replaced.contains("## Usage\n\nnew usage\n"));
        assert!(!replaced.contains("run it"));

        let appended = upsert_section(DOC, "## Extra", "more");
        assert!(appended.ends_with("## Extra\n\nmore\n"));
        assert_eq!(upsert_section(&appended, "## Extra", "more"), appended);
    }

    #[test]
    fn test_append_under_heading_keeps_following_sections() {
        let out = append_under_heading(DOC, "## Setup", "- added");
        let setup = section_body(&out, "## Setup").unwrap();
        assert!(setup.ends_with("- added"));
        assert!(out.contains("## Usage\n\nrun it"));
    }

    #[test]
    fn test_local_links_skip_external() {
        let text = "[a](./a.md) [b](https://x.io) [c](#anchor) [d](mailto:x@y) [e](../e.md#s)";
        assert_eq!(local_links(text), vec!["./a.md", "../e.md#s"]);
    }

    #[test]
    fn test_comment_values() {
        let text = "<!-- doc-owner: team-a -->\n<!-- doc-owner: team-b -->\n<!-- other: x -->";
        assert_eq!(comment_values(text, "doc-owner"), vec!["team-a", "team-b"]);
    }

    #[test]
    fn test_prose_lines_skip_comments() {
        let text = "<!-- doc-owner: TODO-owner -->\n<!--\nTODO hidden\n-->\nTODO: visible";
        assert_eq!(prose_lines(text), vec!["TODO: visible"]);
    }
}
