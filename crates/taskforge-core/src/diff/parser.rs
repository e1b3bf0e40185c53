//! Unified-diff parsing into per-file blocks.

use std::sync::LazyLock;

use regex::Regex;

use super::{ChangeSet, DiffError, FileChangeKind, FileDiff, MAX_DIFF_LEN};

/// `diff --git a/<old> b/<new>` header line.
static GIT_HEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^diff --git a/(.+) b/(.+)$").expect("git header regex is valid"));

pub(super) fn parse(text: &str) -> Result<ChangeSet, DiffError> {
    if text.trim().is_empty() {
        return Err(DiffError::Malformed {
            reason: "empty diff".to_string(),
        });
    }
    if text.len() > MAX_DIFF_LEN {
        return Err(DiffError::Malformed {
            reason: format!("diff exceeds {MAX_DIFF_LEN} bytes"),
        });
    }

    let has_git_headers = text.lines().any(|l| l.starts_with("diff --git "));
    let starts = if has_git_headers {
        git_block_starts(text)
    } else {
        plain_block_starts(text)
    };

    if starts.is_empty() {
        return Err(DiffError::Malformed {
            reason: "no file headers found (expected 'diff --git' or '--- …/+++ …' pairs)"
                .to_string(),
        });
    }

    let mut files = Vec::with_capacity(starts.len());
    for (i, &start) in starts.iter().enumerate() {
        let end = starts.get(i + 1).copied().unwrap_or(text.len());
        files.push(parse_block(&text[start..end])?);
    }
    Ok(ChangeSet::from_files(files))
}

/// Byte offsets of lines beginning a `diff --git` file block.
fn git_block_starts(text: &str) -> Vec<usize> {
    let mut starts = Vec::new();
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        if line.starts_with("diff --git ") {
            starts.push(offset);
        }
        offset += line.len();
    }
    starts
}

/// Byte offsets of `--- <old>` lines immediately followed by `+++ <new>`.
fn plain_block_starts(text: &str) -> Vec<usize> {
    let mut lines = Vec::new();
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        lines.push((offset, line));
        offset += line.len();
    }

    let mut starts = Vec::new();
    for window in lines.windows(2) {
        let (off, line) = window[0];
        let (_, next) = window[1];
        if line.starts_with("--- ") && next.starts_with("+++ ") {
            starts.push(off);
        }
    }
    starts
}

/// Parse a single per-file block, extracting path and change kind.
fn parse_block(raw: &str) -> Result<FileDiff, DiffError> {
    let mut old_path: Option<&str> = None;
    let mut new_path: Option<&str> = None;
    let mut saw_new_file_mode = false;
    let mut saw_deleted_file_mode = false;

    // Only header lines before the first hunk are inspected; a removed
    // content line starting with "--" would otherwise be mistaken for a
    // file header.
    for line in raw.lines() {
        if line.starts_with("@@") {
            break;
        }
        if let Some(rest) = line.strip_prefix("--- ") {
            old_path = Some(strip_diff_prefix(rest));
        } else if let Some(rest) = line.strip_prefix("+++ ") {
            new_path = Some(strip_diff_prefix(rest));
        } else if line.starts_with("new file mode") {
            saw_new_file_mode = true;
        } else if line.starts_with("deleted file mode") {
            saw_deleted_file_mode = true;
        }
    }

    let kind = if old_path == Some("/dev/null") || saw_new_file_mode {
        FileChangeKind::Added
    } else if new_path == Some("/dev/null") || saw_deleted_file_mode {
        FileChangeKind::Removed
    } else {
        FileChangeKind::Modified
    };

    let path = match kind {
        FileChangeKind::Removed => old_path.filter(|p| *p != "/dev/null"),
        _ => new_path.filter(|p| *p != "/dev/null"),
    };

    // Fall back to the `diff --git` header when ---/+++ lines are absent
    // (e.g. binary patches or mode-only changes).
    let path = path.or_else(|| {
        raw.lines().next().and_then(|first| {
            GIT_HEADER.captures(first).map(|caps| {
                let idx = if kind == FileChangeKind::Removed { 1 } else { 2 };
                caps.get(idx).map_or("", |m| m.as_str())
            })
        })
    });

    let Some(path) = path.filter(|p| !p.is_empty()) else {
        let first = raw.lines().next().unwrap_or_default();
        return Err(DiffError::Malformed {
            reason: format!("file block has no resolvable path (starts: {first:?})"),
        });
    };

    let mut raw = raw.to_string();
    if !raw.ends_with('\n') {
        raw.push('\n');
    }

    Ok(FileDiff {
        path: path.to_string(),
        raw,
        kind,
    })
}

/// Strip the `a/` or `b/` prefix git puts on header paths, and any
/// trailing tab-separated timestamp some diff tools append.
fn strip_diff_prefix(header_path: &str) -> &str {
    let path = header_path.split('\t').next().unwrap_or(header_path);
    let path = path.trim_end();
    if path == "/dev/null" {
        return path;
    }
    path.strip_prefix("a/")
        .or_else(|| path.strip_prefix("b/"))
        .unwrap_or(path)
}
