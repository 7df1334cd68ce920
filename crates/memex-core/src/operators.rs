//! # Operator Registry
//!
//! Maps operator symbols to kernel operator kinds, and classifies a write
//! into a single [`Instruction`].
//!
//! ## Default symbols
//!
//! | Symbol      | Kind       |
//! |-------------|------------|
//! | `_`         | secret     |
//! | `~`         | noise      |
//! | `__`, `->`  | pointer    |
//! | `@`         | identity   |
//! | `=`         | derive     |
//! | `?`         | query      |
//! | `-`         | remove     |
//!
//! `+` mutates the registry itself and can never be redefined.

use crate::primitives::{MAX_USERNAME_LENGTH, MIN_USERNAME_LENGTH, OP_DEFINE};
use crate::{MemexError, OperatorKind, SemanticPath, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const DEFAULT_OPERATORS: [(&str, OperatorKind); 8] = [
    ("_", OperatorKind::Secret),
    ("~", OperatorKind::Noise),
    ("__", OperatorKind::Pointer),
    ("->", OperatorKind::Pointer),
    ("@", OperatorKind::Identity),
    ("=", OperatorKind::Derive),
    ("?", OperatorKind::Query),
    ("-", OperatorKind::Remove),
];

/// Symbol → kind table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatorRegistry {
    operators: BTreeMap<String, OperatorKind>,
}

impl Default for OperatorRegistry {
    fn default() -> Self {
        Self {
            operators: DEFAULT_OPERATORS
                .iter()
                .map(|(symbol, kind)| ((*symbol).to_string(), *kind))
                .collect(),
        }
    }
}

impl OperatorRegistry {
    /// The default registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overlaid with `imported`. The protected symbol is ignored.
    #[must_use]
    pub fn with_imported(imported: BTreeMap<String, OperatorKind>) -> Self {
        let mut registry = Self::default();
        for (symbol, kind) in imported {
            if symbol != OP_DEFINE && !symbol.is_empty() {
                registry.operators.insert(symbol, kind);
            }
        }
        registry
    }

    /// Bind `symbol` to the kind named by `kind`. Kind names are parsed by
    /// [`OperatorKind`]'s `FromStr`; there is no user-defined kind.
    pub fn define(&mut self, symbol: &str, kind: &str) -> Result<OperatorKind, MemexError> {
        let symbol = symbol.trim();
        if symbol.is_empty() {
            return Err(MemexError::InvalidOperator("empty symbol".to_string()));
        }
        if symbol == OP_DEFINE {
            return Err(MemexError::ProtectedOperator(symbol.to_string()));
        }
        if symbol.contains('.') || symbol.contains('[') || symbol.contains(']') {
            return Err(MemexError::InvalidOperator(format!(
                "symbol '{}' is not a single path segment",
                symbol
            )));
        }
        let kind: OperatorKind = kind.parse()?;
        self.operators.insert(symbol.to_string(), kind);
        Ok(kind)
    }

    #[must_use]
    pub fn kind_of(&self, symbol: &str) -> Option<OperatorKind> {
        self.operators.get(symbol).copied()
    }

    #[must_use]
    pub fn entries(&self) -> &BTreeMap<String, OperatorKind> {
        &self.operators
    }
}

// =============================================================================
// CLASSIFICATION
// =============================================================================

/// A write, classified.
#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    /// Plain value write.
    Set { path: SemanticPath, value: Value },
    DeclareSecret { scope: SemanticPath, secret: String },
    DeclareNoise { scope: SemanticPath, noise: String },
    Pointer { path: SemanticPath, target: String },
    Identity { path: SemanticPath, username: String },
    /// Derive `scope.name` from `expression`. `scope` keeps its raw segments
    /// so iterator and filter broadcasts survive.
    Derive {
        scope: SemanticPath,
        name: String,
        expression: String,
    },
    /// Root-level evaluation: computed, never committed.
    Evaluate { expression: String },
    /// Read `paths`; return them at the root, commit them at `scope` otherwise.
    Collect { scope: SemanticPath, paths: Vec<String> },
    Remove { target: SemanticPath },
    DefineOperator { symbol: String, kind: String },
}

fn invalid(path: &SemanticPath, reason: &str) -> MemexError {
    MemexError::InvalidDeclaration {
        path: path.key(),
        reason: reason.to_string(),
    }
}

fn expect_text<'a>(value: &'a Value, path: &SemanticPath, what: &str) -> Result<&'a str, MemexError> {
    value
        .as_text()
        .ok_or_else(|| invalid(path, &format!("{} must be a string", what)))
}

/// Render a scalar argument as trimmed text.
fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::Text(s) => Some(s.trim().to_string()),
        Value::Number(_) | Value::Bool(_) => Some(value.to_string()),
        _ => None,
    }
}

/// Classify a write at raw `path`, with an optional operator symbol that
/// acts as if appended as the leaf segment.
pub fn classify(
    registry: &OperatorRegistry,
    path: &SemanticPath,
    value: Value,
    hint: Option<&str>,
) -> Result<Instruction, MemexError> {
    let path = match hint.map(str::trim) {
        Some(symbol) if symbol == OP_DEFINE || registry.kind_of(symbol).is_some() => {
            path.child(symbol)
        }
        Some(symbol) => {
            return Err(MemexError::InvalidOperator(format!(
                "unknown operator symbol '{}'",
                symbol
            )));
        }
        None => path.clone(),
    };

    let Some(leaf) = path.last() else {
        return Ok(Instruction::Set { path, value });
    };

    if leaf == OP_DEFINE {
        if path.len() != 1 {
            return Err(MemexError::InvalidOperator(
                "operators can only be defined at the root".to_string(),
            ));
        }
        let args = match &value {
            Value::List(items) if items.len() >= 2 => {
                (scalar_text(&items[0]), scalar_text(&items[1]))
            }
            _ => (None, None),
        };
        return match args {
            (Some(symbol), Some(kind)) if !symbol.is_empty() && !kind.is_empty() => {
                Ok(Instruction::DefineOperator { symbol, kind })
            }
            _ => Err(MemexError::InvalidOperator(
                "expected [symbol, kind]".to_string(),
            )),
        };
    }

    let Some(kind) = registry.kind_of(leaf) else {
        return Ok(Instruction::Set {
            path: path.normalize(),
            value,
        });
    };
    classify_kind(kind, path.parent(), &path, value)
}

/// Build the instruction for an operator `kind` acting on `scope`. `path` is
/// the full call path, used in error reports.
pub fn classify_kind(
    kind: OperatorKind,
    scope: SemanticPath,
    path: &SemanticPath,
    value: Value,
) -> Result<Instruction, MemexError> {
    match kind {
        OperatorKind::Secret => Ok(Instruction::DeclareSecret {
            secret: expect_text(&value, path, "secret")?.to_string(),
            scope: scope.normalize(),
        }),
        OperatorKind::Noise => Ok(Instruction::DeclareNoise {
            noise: expect_text(&value, path, "noise")?.to_string(),
            scope: scope.normalize(),
        }),
        OperatorKind::Pointer => {
            let raw = expect_text(&value, path, "pointer target")?;
            let target = raw.trim().trim_start_matches('.').trim();
            if target.is_empty() {
                return Err(invalid(path, "pointer target is empty"));
            }
            if scope.is_root() {
                return Err(invalid(path, "a pointer cannot be declared at the root"));
            }
            Ok(Instruction::Pointer {
                path: scope.normalize(),
                target: SemanticPath::canonical(target).key(),
            })
        }
        OperatorKind::Identity => {
            let raw = expect_text(&value, path, "identity")?;
            Ok(Instruction::Identity {
                path: scope.normalize(),
                username: normalize_username(raw)?,
            })
        }
        OperatorKind::Derive => classify_derive(scope, path, value),
        OperatorKind::Query => {
            let paths: Vec<String> = match &value {
                Value::List(items) => items
                    .iter()
                    .filter_map(scalar_text)
                    .filter(|p| !p.is_empty())
                    .collect(),
                Value::Text(single) => vec![single.trim().to_string()],
                _ => Vec::new(),
            };
            if paths.iter().all(String::is_empty) {
                return Err(invalid(path, "expected a list of paths"));
            }
            Ok(Instruction::Collect {
                scope: scope.normalize(),
                paths,
            })
        }
        OperatorKind::Remove => match value {
            Value::Null => Ok(Instruction::Remove {
                target: scope.normalize(),
            }),
            Value::Text(rel) => Ok(Instruction::Remove {
                target: scope.join(&SemanticPath::parse(&rel)).normalize(),
            }),
            _ => Err(invalid(path, "remove takes no value or a relative path")),
        },
    }
}

fn classify_derive(
    scope: SemanticPath,
    path: &SemanticPath,
    value: Value,
) -> Result<Instruction, MemexError> {
    match value {
        Value::List(items) if items.len() >= 2 => {
            let name = scalar_text(&items[0]).unwrap_or_default();
            let expression = scalar_text(&items[1]).unwrap_or_default();
            if name.is_empty() || expression.is_empty() {
                return Err(invalid(path, "expected [name, expression]"));
            }
            Ok(Instruction::Derive {
                scope,
                name,
                expression,
            })
        }
        Value::Text(expression) => {
            let expression = expression.trim().to_string();
            if expression.is_empty() {
                return Err(invalid(path, "empty expression"));
            }
            match scope.last() {
                None => Ok(Instruction::Evaluate { expression }),
                Some(name) => Ok(Instruction::Derive {
                    name: name.to_string(),
                    scope: scope.parent(),
                    expression,
                }),
            }
        }
        _ => Err(invalid(path, "expected an expression")),
    }
}

/// Trim, lowercase and validate an identity username.
///
/// Accepted: 3 to 63 characters of `[a-z0-9-]`, alphanumeric at both ends,
/// no `--`.
pub fn normalize_username(raw: &str) -> Result<String, MemexError> {
    let name = raw.trim().to_lowercase();
    let reject = |reason: &str| Err(MemexError::InvalidIdentity(format!("'{}': {}", raw, reason)));

    if name.len() < MIN_USERNAME_LENGTH || name.len() > MAX_USERNAME_LENGTH {
        return reject("length must be between 3 and 63");
    }
    if !name
        .bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
    {
        return reject("only a-z, 0-9 and '-' are allowed");
    }
    if name.starts_with('-') || name.ends_with('-') {
        return reject("must start and end with a letter or digit");
    }
    if name.contains("--") {
        return reject("consecutive hyphens are not allowed");
    }
    Ok(name)
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    fn classify_raw(path: &str, value: Value) -> Result<Instruction, MemexError> {
        classify(&OperatorRegistry::new(), &SemanticPath::parse(path), value, None)
    }

    fn list(items: &[&str]) -> Value {
        Value::List(items.iter().map(|s| Value::text(*s)).collect())
    }

    #[test]
    fn define_validates_arguments() {
        let mut registry = OperatorRegistry::new();
        assert_eq!(registry.define("%", "remove").expect("define"), OperatorKind::Remove);
        assert_eq!(registry.kind_of("%"), Some(OperatorKind::Remove));
        assert!(matches!(
            registry.define("+", "query"),
            Err(MemexError::ProtectedOperator(_))
        ));
        assert!(matches!(
            registry.define(" ", "query"),
            Err(MemexError::InvalidOperator(_))
        ));
        assert!(matches!(
            registry.define("!", "teleport"),
            Err(MemexError::InvalidOperator(_))
        ));
        assert!(matches!(
            registry.define("a.b", "query"),
            Err(MemexError::InvalidOperator(_))
        ));
    }

    #[test]
    fn imported_registry_keeps_defaults() {
        let mut imported = BTreeMap::new();
        imported.insert("%".to_string(), OperatorKind::Query);
        imported.insert("+".to_string(), OperatorKind::Remove);
        let registry = OperatorRegistry::with_imported(imported);
        assert_eq!(registry.kind_of("%"), Some(OperatorKind::Query));
        assert_eq!(registry.kind_of("_"), Some(OperatorKind::Secret));
        assert_eq!(registry.kind_of("+"), None);
    }

    #[test]
    fn plain_write_is_normalized() {
        let instruction = classify_raw("fleet.trucks[1].km", Value::from(5)).expect("classify");
        assert_eq!(
            instruction,
            Instruction::Set {
                path: SemanticPath::canonical("fleet.trucks.1.km"),
                value: Value::from(5),
            }
        );
    }

    #[test]
    fn declarations() {
        assert!(matches!(
            classify_raw("wallet._", Value::text("k")),
            Ok(Instruction::DeclareSecret { ref scope, .. }) if scope.key() == "wallet"
        ));
        assert!(matches!(
            classify_raw("_", Value::text("k")),
            Ok(Instruction::DeclareSecret { ref scope, .. }) if scope.is_root()
        ));
        assert!(matches!(
            classify_raw("layer.~", Value::text("n")),
            Ok(Instruction::DeclareNoise { .. })
        ));
        assert!(matches!(
            classify_raw("wallet._", Value::from(3)),
            Err(MemexError::InvalidDeclaration { .. })
        ));
    }

    #[test]
    fn pointer_targets_are_trimmed() {
        let instruction = classify_raw("a.b.__", Value::text("  .x.y ")).expect("classify");
        assert_eq!(
            instruction,
            Instruction::Pointer {
                path: SemanticPath::canonical("a.b"),
                target: "x.y".to_string(),
            }
        );
        assert!(classify_raw("a.->", Value::text(" . ")).is_err());
    }

    #[test]
    fn identity_usernames_are_validated() {
        let instruction = classify_raw("@", Value::text(" JabellaE ")).expect("classify");
        assert_eq!(
            instruction,
            Instruction::Identity {
                path: SemanticPath::root(),
                username: "jabellae".to_string(),
            }
        );
        for bad in ["ab", "-abc", "abc-", "a--b", "ana maria", "ñandu"] {
            assert!(
                matches!(normalize_username(bad), Err(MemexError::InvalidIdentity(_))),
                "{bad}"
            );
        }
        assert_eq!(normalize_username(&"a".repeat(63)).expect("max length").len(), 63);
        assert!(normalize_username(&"a".repeat(64)).is_err());
    }

    #[test]
    fn derive_forms() {
        let Instruction::Derive { scope, name, expression } =
            classify_raw("shops[i].menu.=", list(&["deal", "latte.price - 1"])).expect("classify")
        else {
            panic!("expected derive");
        };
        assert_eq!(scope.segments(), ["shops[i]", "menu"]);
        assert_eq!(name, "deal");
        assert_eq!(expression, "latte.price - 1");

        let Instruction::Derive { scope, name, .. } =
            classify_raw("wallet.net.=", Value::text("income - rent")).expect("classify")
        else {
            panic!("expected derive");
        };
        assert_eq!(scope.key(), "wallet");
        assert_eq!(name, "net");

        assert_eq!(
            classify_raw("=", Value::text("2 + 2")).expect("classify"),
            Instruction::Evaluate {
                expression: "2 + 2".to_string()
            }
        );
    }

    #[test]
    fn collect_and_remove() {
        assert!(matches!(
            classify_raw("summary.?", list(&["a.b", " ", "c"])),
            Ok(Instruction::Collect { ref paths, .. }) if paths.len() == 2
        ));
        assert!(classify_raw("?", Value::List(Vec::new())).is_err());
        assert_eq!(
            classify_raw("fleet.-", Value::Null).expect("classify"),
            Instruction::Remove {
                target: SemanticPath::canonical("fleet")
            }
        );
        assert_eq!(
            classify_raw("fleet.-", Value::text("trucks.1")).expect("classify"),
            Instruction::Remove {
                target: SemanticPath::canonical("fleet.trucks.1")
            }
        );
    }

    #[test]
    fn hints_act_as_leaf_symbols() {
        let registry = OperatorRegistry::new();
        let path = SemanticPath::parse("wallet");
        assert!(matches!(
            classify(&registry, &path, Value::text("k"), Some("_")),
            Ok(Instruction::DeclareSecret { .. })
        ));
        assert!(matches!(
            classify(&registry, &path, Value::text("k"), Some("$$")),
            Err(MemexError::InvalidOperator(_))
        ));
        assert!(matches!(
            classify(&registry, &path, list(&["x", "remove"]), Some("+")),
            Err(MemexError::InvalidOperator(_))
        ));
        assert!(matches!(
            classify(&registry, &SemanticPath::root(), list(&["x", "remove"]), Some("+")),
            Ok(Instruction::DefineOperator { .. })
        ));
    }
}
