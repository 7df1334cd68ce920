//! # Core Type Definitions
//!
//! This module contains the core types of the Memex engine:
//! - The stored value model (`Value`)
//! - Ledger records (`Thought`) and operator kinds (`OperatorKind`)
//! - Error types (`MemexError`)
//!
//! ## Value semantics
//!
//! `Value` is a closed tagged union. Pointer and identity markers are their own
//! variants, so structural data can never be confused with application objects,
//! and ciphertext is a dedicated variant rather than a shaped object.
//!
//! Comparison helpers (`is_truthy`, `loose_eq`, `loose_cmp`, `to_finite_number`)
//! implement the permissive scalar semantics shared by the evaluator and the
//! filter selectors: numeric strings coerce to numbers, booleans coerce to 0/1
//! for equality, and strings compare lexicographically with each other.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

// =============================================================================
// VALUE
// =============================================================================

/// A value stored at a path.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
    List(Vec<Value>),
    Object(BTreeMap<String, Value>),
    /// Structural reference to another path.
    Pointer(String),
    /// Claimed identity (normalized username).
    Identity(String),
    /// Opaque cipher blob (base64 text).
    Ciphertext(String),
}

impl Value {
    /// Create a text value.
    #[must_use]
    pub fn text(s: impl Into<String>) -> Self {
        Self::Text(s.into())
    }

    /// Pointer and identity markers are structural and never encrypted.
    #[must_use]
    pub fn is_marker(&self) -> bool {
        matches!(self, Self::Pointer(_) | Self::Identity(_))
    }

    /// Get the text content, if this is a text value.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Get the pointer target, if this is a pointer marker.
    #[must_use]
    pub fn as_pointer(&self) -> Option<&str> {
        match self {
            Self::Pointer(target) => Some(target),
            _ => None,
        }
    }

    /// Truthiness: null, false, zero, NaN and the empty string are falsy.
    #[must_use]
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Null => false,
            Self::Bool(b) => *b,
            Self::Number(n) => *n != 0.0 && !n.is_nan(),
            Self::Text(s) => !s.is_empty(),
            _ => true,
        }
    }

    /// Coerce to a finite number.
    ///
    /// Numbers pass through when finite; text is parsed after trimming (the
    /// empty string is zero). Everything else is `None`.
    #[must_use]
    pub fn to_finite_number(&self) -> Option<f64> {
        let n = match self {
            Self::Number(n) => *n,
            Self::Text(s) => parse_numeric_text(s)?,
            _ => return None,
        };
        n.is_finite().then_some(n)
    }

    /// Numeric view used by relational comparisons; `NaN` when not numeric.
    fn numeric_view(&self) -> f64 {
        match self {
            Self::Null => 0.0,
            Self::Bool(b) => f64::from(u8::from(*b)),
            Self::Number(n) => *n,
            Self::Text(s) => parse_numeric_text(s).unwrap_or(f64::NAN),
            _ => f64::NAN,
        }
    }

    /// Loose equality.
    ///
    /// - Same-variant values compare structurally (`NaN` never equals itself)
    /// - Numbers and text compare numerically
    /// - Booleans compare as 0/1 against numbers and numeric text
    /// - Null only equals null
    #[must_use]
    pub fn loose_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Null, _) | (_, Self::Null) => false,
            (Self::Number(a), Self::Number(b)) => a == b,
            (Self::Text(a), Self::Text(b)) => a == b,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Number(_), Self::Text(_))
            | (Self::Text(_), Self::Number(_))
            | (Self::Bool(_), Self::Number(_) | Self::Text(_))
            | (Self::Number(_) | Self::Text(_), Self::Bool(_)) => {
                self.numeric_view() == other.numeric_view()
            }
            (a, b) => a == b,
        }
    }

    /// Loose ordering: text against text is lexicographic, anything else is
    /// compared numerically. `None` when either side is not comparable.
    #[must_use]
    pub fn loose_cmp(&self, other: &Self) -> Option<Ordering> {
        if let (Self::Text(a), Self::Text(b)) = (self, other) {
            return Some(a.cmp(b));
        }
        self.numeric_view().partial_cmp(&other.numeric_view())
    }

    /// Convert to plain JSON for display and interchange.
    ///
    /// Markers render as `{"ptr": ..}`, `{"id": ..}` and `{"blob": ..}`.
    /// Integral numbers render without a fractional part.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as Json;
        match self {
            Self::Null => Json::Null,
            Self::Bool(b) => Json::Bool(*b),
            Self::Number(n) => number_to_json(*n),
            Self::Text(s) => Json::String(s.clone()),
            Self::List(items) => Json::Array(items.iter().map(Self::to_json).collect()),
            Self::Object(map) => Json::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
            Self::Pointer(target) => serde_json::json!({ "ptr": target }),
            Self::Identity(id) => serde_json::json!({ "id": id }),
            Self::Ciphertext(blob) => serde_json::json!({ "blob": blob }),
        }
    }

    /// Convert plain JSON into a value. Objects always become `Object`;
    /// markers are only created through their dedicated operations.
    #[must_use]
    pub fn from_json(json: &serde_json::Value) -> Self {
        use serde_json::Value as Json;
        match json {
            Json::Null => Self::Null,
            Json::Bool(b) => Self::Bool(*b),
            Json::Number(n) => n.as_f64().map(Self::Number).unwrap_or(Self::Null),
            Json::String(s) => Self::Text(s.clone()),
            Json::Array(items) => Self::List(items.iter().map(Self::from_json).collect()),
            Json::Object(map) => Self::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), Self::from_json(v)))
                    .collect(),
            ),
        }
    }
}

fn parse_numeric_text(s: &str) -> Option<f64> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return Some(0.0);
    }
    // Rust accepts "inf"/"nan" spellings; only plain decimal notation counts.
    if trimmed
        .chars()
        .any(|c| !(c.is_ascii_digit() || matches!(c, '.' | '-' | '+' | 'e' | 'E')))
    {
        return None;
    }
    trimmed.parse::<f64>().ok()
}

fn number_to_json(n: f64) -> serde_json::Value {
    if n.fract() == 0.0 && n.abs() < 9.0e15 {
        return serde_json::Value::from(n as i64);
    }
    serde_json::Number::from_f64(n)
        .map(serde_json::Value::Number)
        .unwrap_or(serde_json::Value::Null)
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) => f.write_str(s),
            other => write!(f, "{}", other.to_json()),
        }
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Number(n as f64)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Self::Number(f64::from(n))
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

// =============================================================================
// OPERATOR KINDS
// =============================================================================

/// Kernel operator kinds a registry symbol can map to.
///
/// A plain value write carries no kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperatorKind {
    Secret,
    Noise,
    Pointer,
    Identity,
    Derive,
    Query,
    Remove,
}

impl OperatorKind {
    /// Canonical tag name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Secret => "secret",
            Self::Noise => "noise",
            Self::Pointer => "pointer",
            Self::Identity => "identity",
            Self::Derive => "derive",
            Self::Query => "query",
            Self::Remove => "remove",
        }
    }
}

impl FromStr for OperatorKind {
    type Err = MemexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "secret" => Ok(Self::Secret),
            "noise" => Ok(Self::Noise),
            "pointer" => Ok(Self::Pointer),
            "identity" => Ok(Self::Identity),
            "derive" | "eval" => Ok(Self::Derive),
            "query" | "collect" => Ok(Self::Query),
            "remove" => Ok(Self::Remove),
            other => Err(MemexError::InvalidOperator(format!(
                "unknown operator kind '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for OperatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// THOUGHT (LEDGER RECORD)
// =============================================================================

/// An immutable, hash-chained ledger record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thought {
    /// Dot-joined canonical path.
    pub path: String,
    /// Operator kind, `None` for a plain value write.
    pub operator: Option<OperatorKind>,
    /// The raw input as given.
    pub expression: Value,
    /// The committed value: ciphertext, plaintext or a marker.
    pub value: Value,
    /// Digest of the key material in effect, empty when cleartext.
    pub effective_secret: String,
    /// Content hash over the six-tuple (path..prev_hash).
    pub hash: String,
    /// Hash of the preceding record, empty for the first.
    pub prev_hash: String,
    /// Milliseconds from the store's clock.
    pub timestamp: u64,
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors that can occur in the Memex engine.
///
/// - Only malformed input to declaration-style calls is an error
/// - "Not found" is never an error; reads return `Option`
/// - The engine should never panic; all errors must be recoverable
#[derive(Debug, Error)]
pub enum MemexError {
    /// An identity username failed validation.
    #[error("Invalid identity username: {0}")]
    InvalidIdentity(String),

    /// Operator definition arguments were malformed.
    #[error("Invalid operator definition: {0}")]
    InvalidOperator(String),

    /// Attempted to redefine the protected registry-mutation symbol.
    #[error("Operator symbol '{0}' is protected")]
    ProtectedOperator(String),

    /// A declaration-style write carried a malformed payload.
    #[error("Invalid declaration at '{path}': {reason}")]
    InvalidDeclaration { path: String, reason: String },

    /// A record's `prev_hash` does not match its predecessor's hash.
    #[error("Ledger chain broken at record {0}")]
    ChainBroken(usize),

    /// A record's stored hash does not match its recomputed content hash.
    #[error("Ledger hash mismatch at record {0}")]
    HashMismatch(usize),

    /// A serialization error occurred.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// A deserialization error occurred.
    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    IoError(String),

    /// The shared store lock was poisoned by a panicking holder.
    #[error("Store lock poisoned")]
    LockPoisoned,
}

// =============================================================================
// TESTS
// =============================================================================
