//! Structural validation of encoded tree objects
//!
//! Every rebuilt tree is checked before insertion. A tree that fails here
//! would be rejected by `git fsck`, so the run aborts instead of writing it.

use crate::object::{canonical_cmp, parse_tree_entry, FileMode};
use std::cmp::Ordering;
use std::collections::HashSet;

/// Why a tree failed validation
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TreeCheckError {
    #[error("entry {index}: {reason}")]
    Unparsable { index: usize, reason: String },

    #[error("entry {index}: non-canonical mode {mode:?}")]
    NonCanonicalMode { index: usize, mode: String },

    #[error("entry {index}: empty name")]
    EmptyName { index: usize },

    #[error("entry {name:?}: invalid name")]
    InvalidName { name: String },

    #[error("entry {name:?}: out of order")]
    Unsorted { name: String },

    #[error("entry {name:?}: duplicate name")]
    Duplicate { name: String },
}

/// Validate the binary encoding of a tree
pub fn check_tree(data: &[u8]) -> Result<(), TreeCheckError> {
    let mut seen: HashSet<Vec<u8>> = HashSet::new();
    let mut previous: Option<(Vec<u8>, FileMode)> = None;
    let mut rest = data;
    let mut index = 0;

    while !rest.is_empty() {
        let (entry, tail) = parse_tree_entry(rest).map_err(|e| TreeCheckError::Unparsable {
            index,
            reason: e.reason,
        })?;
        let display = || entry.name_lossy();

        // Parsing folds legacy modes, so compare against the written text
        let written = &rest[..rest.len() - tail.len()];
        if !written.starts_with(format!("{} ", entry.mode.to_octal()).as_bytes()) {
            let mode = written.split(|&b| b == b' ').next().unwrap_or_default();
            return Err(TreeCheckError::NonCanonicalMode {
                index,
                mode: String::from_utf8_lossy(mode).into_owned(),
            });
        }

        if entry.name.is_empty() {
            return Err(TreeCheckError::EmptyName { index });
        }
        if !is_valid_name(&entry.name) {
            return Err(TreeCheckError::InvalidName { name: display() });
        }
        if let Some((prev_name, prev_mode)) = &previous {
            if canonical_cmp(prev_name, *prev_mode, &entry.name, entry.mode) != Ordering::Less {
                return Err(TreeCheckError::Unsorted { name: display() });
            }
        }
        if !seen.insert(entry.name.clone()) {
            return Err(TreeCheckError::Duplicate { name: display() });
        }

        previous = Some((entry.name, entry.mode));
        rest = tail;
        index += 1;
    }
    Ok(())
}

fn is_valid_name(name: &[u8]) -> bool {
    if name == b"." || name == b".." || name.eq_ignore_ascii_case(b".git") {
        return false;
    }
    !name.iter().any(|&b| b == b'/' || b == 0)
}
