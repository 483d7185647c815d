//! Path resolution against a [`SourceDocument`].
//!
//! A source path is an ordered list of node names, written `/`-delimited in
//! mapping files. Resolution follows the first matching child at every step;
//! a missing node is a normal outcome and resolves to `None`.

use crate::document::{Node, SourceDocument};

/// Splits a `/`-delimited path into segments, ignoring empty segments so that
/// `/Policy/PolicyNumber/` and `Policy/PolicyNumber` are equivalent.
pub fn split_path(path: &str) -> Vec<String> {
    path.split('/')
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn join_path(segments: &[String]) -> String {
    segments.join("/")
}

/// Resolves `segments` to the trimmed text of the addressed node.
///
/// Returns `None` when any segment is missing, when the node has no text, or
/// when the text is blank after trimming.
pub fn resolve(document: &SourceDocument, segments: &[String]) -> Option<String> {
    if segments.is_empty() {
        return None;
    }
    let mut current: &Node = document.root();
    for segment in segments {
        current = current.child(segment)?;
    }
    let trimmed = current.text.as_deref()?.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Counts every node the path addresses when all repetitions are followed.
///
/// [`resolve`] only ever reads the first match; a count above one means a
/// repeating group was truncated to its first occurrence.
pub fn count_matches(document: &SourceDocument, segments: &[String]) -> usize {
    if segments.is_empty() {
        return 0;
    }
    let mut frontier: Vec<&Node> = vec![document.root()];
    for segment in segments {
        frontier = frontier
            .into_iter()
            .flat_map(|node| node.children_named(segment))
            .collect();
        if frontier.is_empty() {
            return 0;
        }
    }
    frontier.len()
}
