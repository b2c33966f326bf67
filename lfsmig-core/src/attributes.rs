//! `.gitattributes` rewriting
//!
//! Every tracked suffix must end up routed through the LFS filter exactly
//! once, while lines the user already had keep their content and position.

use std::collections::BTreeSet;

/// Attribute line routing `*<suffix>` through LFS
pub fn lfs_rule(suffix: &str) -> String {
    format!("*{}\tfilter=lfs diff=lfs merge=lfs -crlf", suffix)
}

/// Merge the LFS rules for `suffixes` into an existing attributes file.
///
/// Existing lines are kept in order; a line equal to a required rule
/// satisfies it. Rules still missing afterwards are appended in
/// lexicographic order. Output lines are always `\n`-terminated.
pub fn rewrite_attributes(existing: &[u8], suffixes: &[String]) -> Vec<u8> {
    let mut required: BTreeSet<String> = suffixes.iter().map(|s| lfs_rule(s)).collect();
    let mut out = Vec::with_capacity(existing.len() + required.len() * 48);

    for line in split_lines(existing) {
        if let Ok(text) = std::str::from_utf8(line) {
            required.remove(text);
        }
        out.extend_from_slice(line);
        out.push(b'\n');
    }
    for rule in required {
        out.extend_from_slice(rule.as_bytes());
        out.push(b'\n');
    }
    out
}

/// Lines as a line reader yields them: `\n`, `\r\n` or a lone `\r` end a
/// line, and a final unterminated line still counts.
fn split_lines(data: &[u8]) -> Vec<&[u8]> {
    let mut lines = Vec::new();
    let mut start = 0;
    let mut i = 0;
    while i < data.len() {
        match data[i] {
            b'\n' => {
                lines.push(&data[start..i]);
                start = i + 1;
            }
            b'\r' => {
                lines.push(&data[start..i]);
                if data.get(i + 1) == Some(&b'\n') {
                    i += 1;
                }
                start = i + 1;
            }
            _ => {}
        }
        i += 1;
    }
    if start < data.len() {
        lines.push(&data[start..]);
    }
    lines
}
