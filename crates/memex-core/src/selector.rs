//! # Selector Engine
//!
//! Bracketed path segments that address several siblings at once.
//!
//! ## Read selectors (tried in this order)
//!
//! 1. Transform `coll[x => x.kilos * 0.9]`: terminal projection of every child
//!    of `coll` through the expression, with `x.` stripped
//! 2. Multi-select `coll[[a, b]]` and inclusive range `coll[1..3]`
//!    (span capped at [`MAX_RANGE_SPAN`])
//! 3. Logical filter `coll[km > 100 && fuel < 50]`: clauses combined strictly
//!    left to right, `&&` and `||` share one precedence level
//!
//! Selectors read the materialized index only, plus per-child reads through
//! the host's [`Resolve`] implementation.
//!
//! ## Write broadcasts
//!
//! `coll[i]` in a derivation target broadcasts over the current children of
//! `coll`; a filter segment broadcasts over the children matching it at
//! registration time.

use crate::evaluator::{Resolve, evaluate};
use crate::materializer::Index;
use crate::path::strip_quotes;
use crate::primitives::{ITERATOR_TOKEN, MAX_RANGE_SPAN};
use crate::{SemanticPath, Value};
use std::cmp::Ordering;
use std::collections::BTreeMap;

// =============================================================================
// SEGMENT PARSING
// =============================================================================

/// `base[selector]` split into its parts. Both must be non-empty and the
/// segment must end with the closing bracket.
#[must_use]
pub fn parse_selector_segment(segment: &str) -> Option<(&str, &str)> {
    let s = segment.trim();
    let first = s.find('[')?;
    let last = s.rfind(']')?;
    if first == 0 || last <= first || last != s.len() - 1 {
        return None;
    }
    let base = s[..first].trim();
    let selector = s[first + 1..last].trim();
    (!base.is_empty() && !selector.is_empty()).then_some((base, selector))
}

/// Keys addressed by a multi-select list or an inclusive integer range.
#[must_use]
pub fn parse_keys(selector: &str) -> Option<Vec<String>> {
    let s = selector.trim();
    if let Some(inner) = s.strip_prefix('[').and_then(|r| r.strip_suffix(']')) {
        return Some(
            inner
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(|p| strip_quotes(p).to_string())
                .collect(),
        );
    }
    parse_range(s)
}

fn parse_range(s: &str) -> Option<Vec<String>> {
    let (start, end) = s.split_once("..")?;
    let start = parse_signed_integer(start.trim())?;
    let end = parse_signed_integer(end.trim())?;
    if end.checked_sub(start)?.checked_abs()? > MAX_RANGE_SPAN {
        return None;
    }
    let keys = if start <= end {
        (start..=end).map(|n| n.to_string()).collect()
    } else {
        (end..=start).rev().map(|n| n.to_string()).collect()
    };
    Some(keys)
}

fn parse_signed_integer(s: &str) -> Option<i64> {
    let digits = s.strip_prefix('-').unwrap_or(s);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

/// A `var => expr` projection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transform {
    pub var: String,
    pub expr: String,
}

impl Transform {
    #[must_use]
    pub fn parse(selector: &str) -> Option<Self> {
        let (var, expr) = selector.trim().split_once("=>")?;
        let var = var.trim();
        let expr = expr.trim();
        let mut chars = var.chars();
        let head_ok = chars
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
        if !head_ok || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') || expr.is_empty() {
            return None;
        }
        Some(Self {
            var: var.to_string(),
            expr: expr.to_string(),
        })
    }

    /// The expression with every `var.` prefix removed at a word boundary.
    #[must_use]
    pub fn relative_expression(&self) -> String {
        let pattern = format!("{}.", self.var);
        let mut out = String::with_capacity(self.expr.len());
        let mut rest = self.expr.as_str();
        while let Some(pos) = rest.find(&pattern) {
            let at_boundary = rest[..pos]
                .chars()
                .next_back()
                .is_none_or(|c| !(c.is_ascii_alphanumeric() || c == '_'));
            let keep = if at_boundary { pos } else { pos + pattern.len() };
            out.push_str(&rest[..keep]);
            rest = &rest[pos + pattern.len()..];
        }
        out.push_str(rest);
        out
    }
}

// =============================================================================
// LOGICAL FILTERS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Gt,
    Lt,
    Ge,
    Le,
    Eq,
    Ne,
}

impl Comparison {
    /// Two-character operators first so `>=` is never read as `>`.
    const ALL: [(&'static str, Self); 6] = [
        (">=", Self::Ge),
        ("<=", Self::Le),
        ("==", Self::Eq),
        ("!=", Self::Ne),
        (">", Self::Gt),
        ("<", Self::Lt),
    ];

    fn holds(self, left: &Value, right: &Value) -> bool {
        match self {
            Self::Eq => left.loose_eq(right),
            Self::Ne => !left.loose_eq(right),
            Self::Gt => left.loose_cmp(right) == Some(Ordering::Greater),
            Self::Lt => left.loose_cmp(right) == Some(Ordering::Less),
            Self::Ge => matches!(
                left.loose_cmp(right),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            Self::Le => matches!(
                left.loose_cmp(right),
                Some(Ordering::Less | Ordering::Equal)
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connective {
    And,
    Or,
}

/// `left OP right`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Clause {
    pub left: String,
    pub op: Comparison,
    pub right: String,
}

impl Clause {
    /// The shortest non-empty left side followed by a comparison operator
    /// and a non-empty right side.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        let s = raw.trim();
        for (i, _) in s.char_indices().skip(1) {
            let rest = s[i..].trim_start();
            for (symbol, op) in Comparison::ALL {
                let Some(right) = rest.strip_prefix(symbol) else {
                    continue;
                };
                let left = s[..i].trim();
                let right = right.trim();
                if left.is_empty() || right.is_empty() {
                    continue;
                }
                return Some(Self {
                    left: left.to_string(),
                    op,
                    right: right.to_string(),
                });
            }
        }
        None
    }
}

/// Clauses joined by `&&`/`||`, evaluated left to right.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogicalFilter {
    clauses: Vec<Clause>,
    connectives: Vec<Connective>,
}

impl LogicalFilter {
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        let mut clauses = Vec::new();
        let mut connectives = Vec::new();
        for (i, part) in split_connectives(raw.trim()).into_iter().enumerate() {
            match (i % 2, part) {
                (0, Part::Text(text)) => clauses.push(Clause::parse(text)?),
                (1, Part::Connective(c)) => connectives.push(c),
                _ => return None,
            }
        }
        if clauses.is_empty() || connectives.len() + 1 != clauses.len() {
            return None;
        }
        Some(Self {
            clauses,
            connectives,
        })
    }

    #[must_use]
    pub fn clauses(&self) -> &[Clause] {
        &self.clauses
    }

    /// Evaluate against the child rooted at `scope`.
    pub fn matches<R: Resolve + ?Sized>(&self, scope: &SemanticPath, resolver: &R) -> bool {
        let mut clauses = self.clauses.iter();
        let Some(first) = clauses.next() else {
            return false;
        };
        let mut acc = clause_holds(first, scope, resolver);
        for (clause, connective) in clauses.zip(&self.connectives) {
            let v = clause_holds(clause, scope, resolver);
            acc = match connective {
                Connective::And => acc && v,
                Connective::Or => acc || v,
            };
        }
        acc
    }
}

enum Part<'a> {
    Text(&'a str),
    Connective(Connective),
}

fn split_connectives(raw: &str) -> Vec<Part<'_>> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut i = 0;
    let bytes = raw.as_bytes();
    while i + 1 < bytes.len() {
        let connective = match &bytes[i..i + 2] {
            b"&&" => Some(Connective::And),
            b"||" => Some(Connective::Or),
            _ => None,
        };
        match connective {
            Some(c) => {
                push_text(&mut parts, &raw[start..i]);
                parts.push(Part::Connective(c));
                i += 2;
                start = i;
            }
            None => i += 1,
        }
    }
    push_text(&mut parts, &raw[start..]);
    parts
}

fn push_text<'a>(parts: &mut Vec<Part<'a>>, text: &'a str) {
    let text = text.trim();
    if !text.is_empty() {
        parts.push(Part::Text(text));
    }
}

/// A literal right-hand side, or `None` when it names a path.
fn parse_literal(raw: &str) -> Option<Value> {
    let s = raw.trim();
    let quoted = s.len() >= 2
        && ((s.starts_with('"') && s.ends_with('"')) || (s.starts_with('\'') && s.ends_with('\'')));
    if quoted {
        return Some(Value::text(&s[1..s.len() - 1]));
    }
    match s {
        "true" => Some(Value::Bool(true)),
        "false" => Some(Value::Bool(false)),
        "null" => Some(Value::Null),
        _ => Value::text(s).to_finite_number().map(Value::Number),
    }
}

fn read_relative_first<R: Resolve + ?Sized>(
    scope: &SemanticPath,
    raw: &str,
    resolver: &R,
) -> Option<Value> {
    let parts = SemanticPath::canonical(raw);
    let present = |v: Option<Value>| v.filter(|v| *v != Value::Null);
    present(resolver.read_path(&scope.join(&parts))).or_else(|| present(resolver.read_path(&parts)))
}

fn clause_holds<R: Resolve + ?Sized>(clause: &Clause, scope: &SemanticPath, resolver: &R) -> bool {
    let Some(left) = read_relative_first(scope, &clause.left, resolver) else {
        return false;
    };
    let right = match parse_literal(&clause.right) {
        Some(literal) => literal,
        None => match read_relative_first(scope, &clause.right, resolver) {
            Some(value) => value,
            None => return false,
        },
    };
    if right == Value::Null {
        return false;
    }
    clause.op.holds(&left, &right)
}

// =============================================================================
// READ SELECTORS
// =============================================================================

/// Terminal transform projection, if `path` ends with a transform segment.
pub fn read_transform<R: Resolve + ?Sized>(
    path: &SemanticPath,
    index: &Index,
    resolver: &R,
) -> Option<Value> {
    let segments = path.segments();
    let (pos, base, transform) = segments.iter().enumerate().find_map(|(i, seg)| {
        let (base, selector) = parse_selector_segment(seg)?;
        Transform::parse(selector).map(|t| (i, base, t))
    })?;
    if pos + 1 != segments.len() {
        return None;
    }

    let collection = path.prefix(pos).normalize().child(base);
    let expr = transform.relative_expression();
    let mut out = BTreeMap::new();
    for child in index.children_of(&collection) {
        let scope = collection.child(child.clone());
        if let Some(value) = evaluate(&expr, &scope, resolver) {
            out.insert(child, value);
        }
    }
    Some(Value::Object(out))
}

/// Multi-select or range read, if some segment carries a key selector.
pub fn read_selection<R: Resolve + ?Sized>(
    path: &SemanticPath,
    index: &Index,
    resolver: &R,
) -> Option<Value> {
    let segments = path.segments();
    let (pos, base, keys) = segments.iter().enumerate().find_map(|(i, seg)| {
        let (base, selector) = parse_selector_segment(seg)?;
        parse_keys(selector).map(|keys| (i, base, keys))
    })?;

    let collection = path.prefix(pos).normalize().child(base);
    let suffix = path.suffix(pos + 1);
    let mut out = BTreeMap::new();
    for key in keys {
        let scope = collection.child(key.clone());
        let value = if suffix.is_root() {
            index.subtree(&scope)
        } else {
            resolver.read_path(&scope.join(&suffix))
        };
        if let Some(value) = value {
            out.insert(key, value);
        }
    }
    Some(Value::Object(out))
}

/// Logical filter read over an already normalized path.
pub fn read_filter<R: Resolve + ?Sized>(
    path: &SemanticPath,
    index: &Index,
    resolver: &R,
) -> Option<Value> {
    let segments = path.segments();
    let (pos, filter) = segments
        .iter()
        .enumerate()
        .find_map(|(i, seg)| LogicalFilter::parse(seg).map(|f| (i, f)))?;
    if pos == 0 {
        return None;
    }

    let collection = path.prefix(pos);
    let suffix = path.suffix(pos + 1);
    let mut out = BTreeMap::new();
    for child in index.children_of(&collection) {
        let scope = collection.child(child.clone());
        if !filter.matches(&scope, resolver) {
            continue;
        }
        let value = if suffix.is_root() {
            index.subtree(&scope)
        } else {
            resolver.read_path(&scope.join(&suffix))
        };
        if let Some(value) = value {
            out.insert(child, value);
        }
    }
    Some(Value::Object(out))
}

// =============================================================================
// WRITE BROADCASTS
// =============================================================================

/// True when some raw segment carries a logical filter selector.
#[must_use]
pub fn contains_filter(path: &SemanticPath) -> bool {
    path.segments().iter().any(|seg| {
        parse_selector_segment(seg).is_some_and(|(_, sel)| LogicalFilter::parse(sel).is_some())
    })
}

/// Every `child + tail` scope whose child currently matches the first
/// filter segment of `path`.
pub fn filtered_scopes<R: Resolve + ?Sized>(
    path: &SemanticPath,
    index: &Index,
    resolver: &R,
) -> Vec<SemanticPath> {
    let segments = path.segments();
    let found = segments.iter().enumerate().find_map(|(i, seg)| {
        let (base, selector) = parse_selector_segment(seg)?;
        LogicalFilter::parse(selector).map(|f| (i, base, f))
    });
    let Some((pos, base, filter)) = found else {
        return Vec::new();
    };

    let collection = path.prefix(pos).normalize().child(base);
    let tail = path.suffix(pos + 1);
    index
        .children_of(&collection)
        .into_iter()
        .map(|child| collection.child(child))
        .filter(|scope| filter.matches(scope, resolver))
        .map(|scope| scope.join(&tail))
        .collect()
}

#[must_use]
pub fn contains_iterator(path: &SemanticPath) -> bool {
    path.segments().iter().any(|seg| seg.contains(ITERATOR_TOKEN))
}

/// Replace every `[i]` with `[index]` in each raw segment.
#[must_use]
pub fn substitute_iterator(path: &SemanticPath, index: &str) -> SemanticPath {
    let concrete = format!("[{}]", index);
    SemanticPath::from_segments(
        path.segments()
            .iter()
            .map(|seg| seg.replace(ITERATOR_TOKEN, &concrete))
            .collect(),
    )
}

/// Replace every `[i]` with `[index]` in an expression.
#[must_use]
pub fn substitute_iterator_in(expr: &str, index: &str) -> String {
    expr.replace(ITERATOR_TOKEN, &format!("[{}]", index))
}

/// Current children of the collection named by the first iterator segment,
/// numeric keys first in numeric order, then the rest lexicographically.
#[must_use]
pub fn iterator_indices(path: &SemanticPath, index: &Index) -> Vec<String> {
    let segments = path.segments();
    let Some(pos) = segments.iter().position(|seg| seg.contains(ITERATOR_TOKEN)) else {
        return Vec::new();
    };
    let mut collection = path.prefix(pos).normalize();
    let base = segments[pos].replace(ITERATOR_TOKEN, "");
    let base = base.trim();
    if !base.is_empty() {
        collection = collection.join(&SemanticPath::canonical(base));
    }

    let mut children = index.children_of(&collection);
    children.sort_by(compare_iterator_keys);
    children
}

fn compare_iterator_keys(a: &String, b: &String) -> Ordering {
    let na = Value::text(a.as_str()).to_finite_number();
    let nb = Value::text(b.as_str()).to_finite_number();
    match (na, nb) {
        (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.cmp(b),
    }
}

// =============================================================================
// TESTS
// =============================================================================
