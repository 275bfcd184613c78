//! Repository-relative path normalization and glob matching.
//!
//! Glob semantics: `**` crosses directory separators (and `**/` may match zero
//! directories), `*` and `?` stay within one path segment, everything else is literal.

use crate::core::error::DocsorError;
use regex::Regex;
use std::fs;
use std::path::{Component, Path, PathBuf};

/// Normalizes a repo-relative path to POSIX form without `./` prefixes.
pub fn normalize_rel(path: &str) -> String {
    let replaced = path.trim().replace('\\', "/");
    let mut parts: Vec<&str> = Vec::new();
    for part in replaced.split('/') {
        match part {
            "" | "." => continue,
            _ => parts.push(part),
        }
    }
    parts.join("/")
}

/// True when `path` is relative, POSIX-separated and never escapes the root.
pub fn is_safe_rel(path: &str) -> bool {
    if path.is_empty() || path.contains('\\') || path.starts_with('/') {
        return false;
    }
    !path.split('/').any(|p| p == ".." || p.is_empty())
}

pub fn to_rel(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let mut parts = Vec::new();
    for component in rel.components() {
        match component {
            Component::Normal(s) => parts.push(s.to_string_lossy().to_string()),
            _ => return None,
        }
    }
    Some(parts.join("/"))
}

pub fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

pub fn parent_dir(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[..idx],
        None => "",
    }
}

/// Joins a markdown link target onto the directory of `from_doc`, resolving `..`.
/// Returns `None` for targets that leave the repository.
pub fn resolve_link(from_doc: &str, target: &str) -> Option<String> {
    let target = target.split('#').next().unwrap_or("").trim();
    if target.is_empty() {
        return None;
    }
    if let Some(stripped) = target.strip_prefix('/') {
        return resolve_link("", stripped);
    }
    let mut parts: Vec<String> = parent_dir(from_doc)
        .split('/')
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect();
    for seg in target.split('/') {
        match seg {
            "" | "." => {}
            ".." => {
                parts.pop()?;
            }
            other => parts.push(other.to_string()),
        }
    }
    Some(parts.join("/"))
}

/// Relative link from the directory of `from_doc` to `to_doc`, prefixed with `./`
/// when it stays in or below that directory.
pub fn relative_link(from_doc: &str, to_doc: &str) -> String {
    let from_parts: Vec<&str> = parent_dir(from_doc)
        .split('/')
        .filter(|p| !p.is_empty())
        .collect();
    let to_parts: Vec<&str> = to_doc.split('/').collect();
    let mut common = 0;
    while common < from_parts.len()
        && common + 1 < to_parts.len()
        && from_parts[common] == to_parts[common]
    {
        common += 1;
    }
    let ups = from_parts.len() - common;
    let rest = to_parts[common..].join("/");
    if ups == 0 {
        format!("./{rest}")
    } else {
        format!("{}{rest}", "../".repeat(ups))
    }
}

fn glob_to_regex(pattern: &str) -> String {
    let mut out = String::from("^");
    let chars: Vec<char> = pattern.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            '*' => {
                if chars.get(i + 1) == Some(&'*') {
                    if chars.get(i + 2) == Some(&'/') {
                        out.push_str("(?:.*/)?");
                        i += 3;
                        continue;
                    }
                    out.push_str(".*");
                    i += 2;
                    continue;
                }
                out.push_str("[^/]*");
            }
            '?' => out.push_str("[^/]"),
            _ => out.push_str(&regex::escape(&c.to_string())),
        }
        i += 1;
    }
    out.push('$');
    out
}

pub fn glob_match(pattern: &str, path: &str) -> bool {
    let pattern = normalize_rel(pattern);
    if pattern == path {
        return true;
    }
    match Regex::new(&glob_to_regex(&pattern)) {
        Ok(re) => re.is_match(path),
        Err(_) => false,
    }
}

pub fn matches_any(patterns: &[String], path: &str) -> bool {
    patterns.iter().any(|p| glob_match(p, path))
}

/// Recursively lists files under `dir` (repo-relative), skipping VCS and build output.
pub fn collect_files(root: &Path, dir: &Path, out: &mut Vec<String>) -> Result<(), DocsorError> {
    fn recurse(root: &Path, dir: &Path, out: &mut Vec<String>) -> Result<(), DocsorError> {
        if !dir.is_dir() {
            return Ok(());
        }
        let name = dir.file_name().and_then(|s| s.to_str()).unwrap_or("");
        if dir != root && matches!(name, ".git" | "target" | "node_modules") {
            return Ok(());
        }
        let mut entries: Vec<PathBuf> = Vec::new();
        for entry in fs::read_dir(dir).map_err(DocsorError::IoError)? {
            let entry = entry.map_err(DocsorError::IoError)?;
            entries.push(entry.path());
        }
        entries.sort();
        for path in entries {
            if path.is_dir() {
                recurse(root, &path, out)?;
            } else if path.is_file() {
                if let Some(rel) = to_rel(root, &path) {
                    out.push(rel);
                }
            }
        }
        Ok(())
    }

    recurse(root, dir, out)
}
