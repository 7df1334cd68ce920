//! # Pointer Resolver
//!
//! Follows pointer markers stored in the index.
//!
//! - A pointer exactly at the current path is a hop to its target
//! - Otherwise the longest proper prefix holding a pointer is substituted by
//!   its target, keeping the remaining suffix (`a.b → x.y` turns `a.b.c` into
//!   `x.y.c`)
//! - Every redirect spends one unit of a caller-owned budget, so a read that
//!   also follows pointers found inside secret branches shares one bound

use crate::materializer::Index;
use crate::primitives::MAX_POINTER_HOPS;
use crate::{SemanticPath, Value};

/// Where a pointer walk ended.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    /// The final, fully redirected path.
    pub path: SemanticPath,
    /// The index entry at `path`; `None` when absent or the budget ran out.
    pub raw: Option<Value>,
    /// The walk stopped because the hop budget ran out.
    pub exhausted: bool,
}

/// A fresh hop budget for one read.
#[must_use]
pub const fn hop_budget() -> usize {
    MAX_POINTER_HOPS
}

/// Walk pointers from `path` until a non-pointer location is reached.
pub fn resolve(index: &Index, path: &SemanticPath, budget: &mut usize) -> Resolution {
    let mut current = path.clone();
    loop {
        let exact = index.get(&current);
        let next = match exact {
            Some(Value::Pointer(target)) => Some(SemanticPath::canonical(target)),
            _ => redirect_through_prefix(index, &current),
        };

        let Some(next) = next else {
            return Resolution {
                path: current,
                raw: exact.cloned(),
                exhausted: false,
            };
        };
        if *budget == 0 {
            tracing::debug!(path = %path, "pointer hop budget exhausted");
            return Resolution {
                path: current,
                raw: None,
                exhausted: true,
            };
        }
        *budget -= 1;
        current = next;
    }
}

fn redirect_through_prefix(index: &Index, path: &SemanticPath) -> Option<SemanticPath> {
    (0..path.len()).rev().find_map(|n| match index.get(&path.prefix(n)) {
        Some(Value::Pointer(target)) => {
            Some(SemanticPath::canonical(target).join(&path.suffix(n)))
        }
        _ => None,
    })
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::materializer::materialize;
    use crate::secrets::ScopeRegistry;
    use crate::Thought;

    fn index_of(entries: &[(&str, Value)]) -> Index {
        let thoughts: Vec<Thought> = entries
            .iter()
            .enumerate()
            .map(|(i, (path, value))| Thought {
                path: (*path).to_string(),
                operator: None,
                expression: value.clone(),
                value: value.clone(),
                effective_secret: String::new(),
                hash: format!("{:04}", i),
                prev_hash: String::new(),
                timestamp: i as u64,
            })
            .collect();
        materialize(&thoughts, &ScopeRegistry::new())
    }

    fn p(raw: &str) -> SemanticPath {
        SemanticPath::canonical(raw)
    }

    #[test]
    fn prefix_pointer_rewrites_suffix() {
        let index = index_of(&[
            ("a.b", Value::Pointer("x.y".into())),
            ("x.y.z", Value::from(5)),
        ]);
        let mut budget = hop_budget();
        let resolution = resolve(&index, &p("a.b.z"), &mut budget);
        assert_eq!(resolution.path, p("x.y.z"));
        assert_eq!(resolution.raw, Some(Value::from(5)));
        assert_eq!(budget, MAX_POINTER_HOPS - 1);
    }

    #[test]
    fn chained_pointers_are_followed() {
        let index = index_of(&[
            ("a", Value::Pointer("b".into())),
            ("b", Value::Pointer("c".into())),
            ("c.v", Value::from(1)),
        ]);
        let mut budget = hop_budget();
        let resolution = resolve(&index, &p("a.v"), &mut budget);
        assert_eq!(resolution.raw, Some(Value::from(1)));
    }

    #[test]
    fn cycles_exhaust_the_budget() {
        let index = index_of(&[
            ("a", Value::Pointer("b".into())),
            ("b", Value::Pointer("a".into())),
        ]);
        let mut budget = hop_budget();
        let resolution = resolve(&index, &p("a.v"), &mut budget);
        assert_eq!(resolution.raw, None);
        assert!(resolution.exhausted);
        assert_eq!(budget, 0);
    }

    #[test]
    fn chain_longer_than_bound_is_absent() {
        let mut entries: Vec<(String, Value)> = (0..=MAX_POINTER_HOPS)
            .map(|i| (format!("p{}", i), Value::Pointer(format!("p{}", i + 1))))
            .collect();
        entries.push((format!("p{}", MAX_POINTER_HOPS + 1), Value::from(7)));
        let borrowed: Vec<(&str, Value)> = entries
            .iter()
            .map(|(k, v)| (k.as_str(), v.clone()))
            .collect();
        let index = index_of(&borrowed);

        // p1 needs exactly MAX_POINTER_HOPS redirects, p0 one more.
        let mut budget = hop_budget();
        assert_eq!(resolve(&index, &p("p1"), &mut budget).raw, Some(Value::from(7)));
        let mut budget = hop_budget();
        assert_eq!(resolve(&index, &p("p0"), &mut budget).raw, None);
    }

    #[test]
    fn plain_paths_pass_through() {
        let index = index_of(&[("k", Value::from(3))]);
        let mut budget = hop_budget();
        let resolution = resolve(&index, &p("k"), &mut budget);
        assert_eq!(resolution.path, p("k"));
        assert_eq!(resolution.raw, Some(Value::from(3)));
        assert_eq!(budget, MAX_POINTER_HOPS);
        assert_eq!(resolve(&index, &p("nope"), &mut budget).raw, None);
    }
}
