//! # Path Model
//!
//! Parsing and normalization of semantic paths.
//!
//! A raw path is split on `.` outside brackets, so selector segments such as
//! `trucks[efficiency < 4.5]` or `lote[x => x.kilos * 0.9]` survive intact.
//! Normalization then expands bracket groups into plain segments:
//!
//! - `trucks[1]` → `trucks`, `1`
//! - `menu["latte"]` / `menu['latte']` → `menu`, `latte`
//! - `grid[1][2]` → `grid`, `1`, `2`
//! - a malformed bracket tail is kept verbatim as one segment
//!
//! The canonical key of a path is its segments joined by `.`; the root path
//! has the empty key.

use serde::{Deserialize, Serialize};
use std::fmt;

/// An ordered sequence of path segments.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SemanticPath(Vec<String>);

impl SemanticPath {
    /// The root path (no segments).
    #[must_use]
    pub fn root() -> Self {
        Self::default()
    }

    /// Build from already-split segments.
    #[must_use]
    pub fn from_segments(segments: Vec<String>) -> Self {
        Self(segments)
    }

    /// Split a raw path on top-level dots. Segments are trimmed; empty
    /// segments are dropped. Bracket contents are left untouched.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        let mut segments = Vec::new();
        let mut current = String::new();
        let mut depth = 0usize;
        let mut quote: Option<char> = None;

        for c in raw.chars() {
            if let Some(q) = quote {
                current.push(c);
                if c == q {
                    quote = None;
                }
                continue;
            }
            match c {
                '"' | '\'' if depth > 0 => {
                    quote = Some(c);
                    current.push(c);
                }
                '[' => {
                    depth += 1;
                    current.push(c);
                }
                ']' => {
                    depth = depth.saturating_sub(1);
                    current.push(c);
                }
                '.' if depth == 0 => {
                    push_trimmed(&mut segments, &current);
                    current.clear();
                }
                _ => current.push(c),
            }
        }
        push_trimmed(&mut segments, &current);
        Self(segments)
    }

    /// Parse a canonical key produced by [`SemanticPath::key`].
    #[must_use]
    pub fn from_key(key: &str) -> Self {
        Self(
            key.split('.')
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        )
    }

    /// Parse then normalize.
    #[must_use]
    pub fn canonical(raw: &str) -> Self {
        Self::parse(raw).normalize()
    }

    /// Expand bracket groups into plain segments.
    #[must_use]
    pub fn normalize(&self) -> Self {
        let mut out = Vec::with_capacity(self.0.len());
        for segment in &self.0 {
            normalize_segment(segment, &mut out);
        }
        Self(out)
    }

    /// Canonical dot-joined key.
    #[must_use]
    pub fn key(&self) -> String {
        self.0.join(".")
    }

    #[must_use]
    pub fn segments(&self) -> &[String] {
        &self.0
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn last(&self) -> Option<&str> {
        self.0.last().map(String::as_str)
    }

    /// The path without its last segment (root stays root).
    #[must_use]
    pub fn parent(&self) -> Self {
        let end = self.0.len().saturating_sub(1);
        Self(self.0[..end].to_vec())
    }

    /// The first `n` segments.
    #[must_use]
    pub fn prefix(&self, n: usize) -> Self {
        Self(self.0[..n.min(self.0.len())].to_vec())
    }

    /// Segments after the first `n`.
    #[must_use]
    pub fn suffix(&self, n: usize) -> Self {
        Self(self.0[n.min(self.0.len())..].to_vec())
    }

    /// Append one segment.
    #[must_use]
    pub fn child(&self, segment: impl Into<String>) -> Self {
        let mut segments = self.0.clone();
        segments.push(segment.into());
        Self(segments)
    }

    /// Append all segments of `other`.
    #[must_use]
    pub fn join(&self, other: &Self) -> Self {
        let mut segments = self.0.clone();
        segments.extend(other.0.iter().cloned());
        Self(segments)
    }

    /// True when `prefix` is an ancestor-or-self of this path.
    #[must_use]
    pub fn starts_with(&self, prefix: &Self) -> bool {
        self.0.starts_with(&prefix.0)
    }

    /// Ancestors from shallow to deep, including self but excluding root.
    pub fn ancestors(&self) -> impl Iterator<Item = Self> + '_ {
        (1..=self.0.len()).map(|n| self.prefix(n))
    }
}

impl fmt::Display for SemanticPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

impl From<&str> for SemanticPath {
    fn from(raw: &str) -> Self {
        Self::parse(raw)
    }
}

/// True when `key` equals `prefix` or lies under it. The empty prefix covers everything.
#[must_use]
pub fn key_at_or_under(key: &str, prefix: &str) -> bool {
    prefix.is_empty()
        || key == prefix
        || (key.len() > prefix.len()
            && key.starts_with(prefix)
            && key.as_bytes()[prefix.len()] == b'.')
}

// =============================================================================
// SEGMENT NORMALIZATION
// =============================================================================

fn push_trimmed(segments: &mut Vec<String>, raw: &str) {
    let trimmed = raw.trim();
    if !trimmed.is_empty() {
        segments.push(trimmed.to_string());
    }
}

fn normalize_segment(segment: &str, out: &mut Vec<String>) {
    let s = segment.trim();
    if s.is_empty() {
        return;
    }
    let Some(first) = s.find('[') else {
        out.push(s.to_string());
        return;
    };

    let base = s[..first].trim();
    if !base.is_empty() {
        out.push(base.to_string());
    }

    let tail = &s[first..];
    match split_bracket_groups(tail) {
        Some(groups) => {
            for group in groups {
                let inner = strip_quotes(group.trim());
                if !inner.is_empty() {
                    out.push(inner.to_string());
                }
            }
        }
        None => out.push(tail.to_string()),
    }
}

/// Split `[a][b]...` into its group contents. `None` if the tail is malformed.
pub(crate) fn split_bracket_groups(tail: &str) -> Option<Vec<&str>> {
    let mut groups = Vec::new();
    let bytes = tail.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'[' {
            return None;
        }
        let close = matching_bracket(tail, i)?;
        groups.push(&tail[i + 1..close]);
        i = close + 1;
    }
    Some(groups)
}

/// Index of the `]` closing the `[` at `open`, honoring nesting and quotes.
pub(crate) fn matching_bracket(s: &str, open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut quote: Option<u8> = None;
    for (i, &b) in s.as_bytes().iter().enumerate().skip(open) {
        if let Some(q) = quote {
            if b == q {
                quote = None;
            }
            continue;
        }
        match b {
            b'"' | b'\'' => quote = Some(b),
            b'[' => depth += 1,
            b']' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Remove one pair of matching surrounding quotes.
pub(crate) fn strip_quotes(s: &str) -> &str {
    let quoted = s.len() >= 2
        && ((s.starts_with('"') && s.ends_with('"')) || (s.starts_with('\'') && s.ends_with('\'')));
    if quoted { &s[1..s.len() - 1] } else { s }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn segs(path: &SemanticPath) -> Vec<&str> {
        path.segments().iter().map(String::as_str).collect()
    }

    #[test]
    fn parse_keeps_dots_inside_brackets() {
        let path = SemanticPath::parse("fleet.trucks[efficiency < 4.5].alert");
        assert_eq!(segs(&path), ["fleet", "trucks[efficiency < 4.5]", "alert"]);

        let path = SemanticPath::parse("finca.lote[x => x.kilos * 0.9]");
        assert_eq!(segs(&path), ["finca", "lote[x => x.kilos * 0.9]"]);

        let path = SemanticPath::parse("a.[1..3].b");
        assert_eq!(segs(&path), ["a", "[1..3]", "b"]);
    }

    #[test]
    fn parse_drops_empty_segments() {
        assert_eq!(segs(&SemanticPath::parse(".a..b.")), ["a", "b"]);
        assert!(SemanticPath::parse("").is_root());
    }

    #[test]
    fn normalize_expands_brackets() {
        assert_eq!(
            segs(&SemanticPath::canonical("fleet.trucks[1].km")),
            ["fleet", "trucks", "1", "km"]
        );
        assert_eq!(
            segs(&SemanticPath::canonical("menu[\"latte\"].price")),
            ["menu", "latte", "price"]
        );
        assert_eq!(
            segs(&SemanticPath::canonical("grid[1]['b']")),
            ["grid", "1", "b"]
        );
        assert_eq!(
            segs(&SemanticPath::canonical("trucks[efficiency < 4.5]")),
            ["trucks", "efficiency < 4.5"]
        );
    }

    #[test]
    fn normalize_keeps_malformed_tail() {
        assert_eq!(
            segs(&SemanticPath::canonical("a.b[oops")),
            ["a", "b", "[oops"]
        );
    }

    #[test]
    fn prefix_relations() {
        let path = SemanticPath::canonical("a.b.c");
        assert!(path.starts_with(&SemanticPath::canonical("a.b")));
        assert!(path.starts_with(&SemanticPath::root()));
        assert!(!path.starts_with(&SemanticPath::canonical("a.bc")));
        assert_eq!(path.parent().key(), "a.b");
        assert_eq!(path.suffix(1).key(), "b.c");
        assert_eq!(path.ancestors().count(), 3);
    }

    #[test]
    fn key_prefix_matching() {
        assert!(key_at_or_under("a.b.c", "a.b"));
        assert!(key_at_or_under("a.b", "a.b"));
        assert!(!key_at_or_under("a.bc", "a.b"));
        assert!(key_at_or_under("anything", ""));
    }
}
