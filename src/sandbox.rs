//! Path containment for session directories.
//!
//! Every path that enters or leaves a build session goes through
//! [`contained_path`]. Normalization is purely lexical: `a/b/../c` folds to
//! `a/c`, and a `..` with no real segment left to cancel becomes the literal
//! segment [`ESCAPE_SENTINEL`] instead of climbing above the root. The
//! external compiler applies the same folding in its own sandbox mode, so
//! parent-relative includes are still found.

use crate::error::Violation;
use std::path::{Component, Path, PathBuf};

/// Literal segment substituted for an unmatched `..`.
pub const ESCAPE_SENTINEL: &str = ".parent";

/// Normalize a caller-supplied relative path.
///
/// Splits on both `/` and `\`, drops empty and `.` segments, and folds `..`
/// against the preceding real segment. The result is joined with `/`.
///
/// # Errors
///
/// - `EmptyPath` if the input is empty or folds to nothing
/// - `NulByte` if the input contains `\0`
pub fn normalize(raw: &str) -> Result<String, Violation> {
    if raw.is_empty() {
        return Err(Violation::EmptyPath);
    }
    if raw.contains('\0') {
        return Err(Violation::NulByte {
            path: raw.to_string(),
        });
    }

    let mut parts: Vec<&str> = Vec::new();
    for part in raw.split(['/', '\\']) {
        match part {
            "" | "." => {}
            ".." => {
                if parts.last().is_some_and(|top| *top != ESCAPE_SENTINEL) {
                    parts.pop();
                } else {
                    parts.push(ESCAPE_SENTINEL);
                }
            }
            other => parts.push(other),
        }
    }

    if parts.is_empty() {
        return Err(Violation::EmptyPath);
    }
    Ok(parts.join("/"))
}

/// Resolve `raw` to an absolute path guaranteed to lie under `root`.
///
/// Pure: nothing on disk is consulted.
///
/// # Errors
///
/// Any [`Violation`] from [`normalize`], or `EscapesRoot` if the joined path
/// somehow does not start with `root`.
pub fn contained_path(root: &Path, raw: &str) -> Result<PathBuf, Violation> {
    let relative = normalize(raw)?;
    let full = root.join(&relative);

    let stays_inside = full.starts_with(root)
        && full
            .strip_prefix(root)
            .map(|rest| rest.components().all(|c| matches!(c, Component::Normal(_))))
            .unwrap_or(false);
    if !stays_inside {
        return Err(Violation::EscapesRoot { path: relative });
    }
    Ok(full)
}
