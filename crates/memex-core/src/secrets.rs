//! # Secret/Noise Resolver
//!
//! Declared secrets and noises, and the effective key derived from them.
//!
//! ## Fractal secrets
//!
//! The effective secret of a path chains every secret declared along it:
//!
//! ```text
//! seed = "root"                                  (no noise)
//!      | H("noise::" + deepest_noise)            (noise at/above path)
//! seed = H(seed + "::" + root_secret)            (only without noise)
//! for each ancestor-or-self p with a secret s:   (only at/under the noise)
//!     seed = H(seed + "::" + s)
//! ```
//!
//! A seed still equal to `"root"` means cleartext (empty effective secret).
//!
//! ## Branch scopes
//!
//! The deepest path with a declared secret is the path's *branch scope*.
//! Non-root branch scopes hide their descendants from the index; their data
//! lives in one encrypted blob per scope.

use crate::cipher::digest_hex;
use crate::path::key_at_or_under;
use crate::primitives::ROOT_SEED;
use crate::SemanticPath;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Secret and noise declarations keyed by canonical scope key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeRegistry {
    secrets: BTreeMap<String, String>,
    noises: BTreeMap<String, String>,
}

impl ScopeRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from exported maps.
    #[must_use]
    pub fn from_maps(secrets: BTreeMap<String, String>, noises: BTreeMap<String, String>) -> Self {
        Self { secrets, noises }
    }

    pub fn declare_secret(&mut self, scope: &SemanticPath, secret: impl Into<String>) {
        self.secrets.insert(scope.key(), secret.into());
    }

    pub fn declare_noise(&mut self, scope: &SemanticPath, noise: impl Into<String>) {
        self.noises.insert(scope.key(), noise.into());
    }

    #[must_use]
    pub fn secrets(&self) -> &BTreeMap<String, String> {
        &self.secrets
    }

    #[must_use]
    pub fn noises(&self) -> &BTreeMap<String, String> {
        &self.noises
    }

    fn live_secret(&self, key: &str) -> Option<&str> {
        self.secrets
            .get(key)
            .map(String::as_str)
            .filter(|s| !s.is_empty())
    }

    /// Drop every secret and noise declared at or under `prefix`.
    /// The root prefix drops all of them.
    pub fn purge_under(&mut self, prefix: &SemanticPath) {
        let prefix = prefix.key();
        self.secrets.retain(|k, _| !key_at_or_under(k, &prefix));
        self.noises.retain(|k, _| !key_at_or_under(k, &prefix));
    }

    /// The effective secret for `path`, or the empty string for cleartext.
    #[must_use]
    pub fn effective_secret(&self, path: &SemanticPath) -> String {
        let mut noise: Option<(String, &str)> =
            self.noises.get("").map(|v| (String::new(), v.as_str()));
        for ancestor in path.ancestors() {
            let key = ancestor.key();
            if let Some(value) = self.noises.get(&key) {
                noise = Some((key, value.as_str()));
            }
        }

        let mut seed = ROOT_SEED.to_string();
        match noise {
            Some((_, value)) if !value.is_empty() => {
                seed = digest_hex(&format!("noise::{}", value));
            }
            _ => {
                if let Some(root) = self.live_secret("") {
                    seed = digest_hex(&format!("{}::{}", seed, root));
                }
            }
        }

        for ancestor in path.ancestors() {
            let key = ancestor.key();
            let Some(secret) = self.live_secret(&key) else {
                continue;
            };
            if let Some((noise_key, _)) = &noise {
                if !key_at_or_under(&key, noise_key) {
                    continue;
                }
            }
            seed = digest_hex(&format!("{}::{}", seed, secret));
        }

        if seed == ROOT_SEED { String::new() } else { seed }
    }

    /// The deepest ancestor-or-self of `path` with a declared secret.
    /// `Some(root)` when only a root secret applies.
    #[must_use]
    pub fn branch_scope(&self, path: &SemanticPath) -> Option<SemanticPath> {
        let mut best = self.live_secret("").map(|_| SemanticPath::root());
        for ancestor in path.ancestors() {
            if self.live_secret(&ancestor.key()).is_some() {
                best = Some(ancestor);
            }
        }
        best
    }

    /// The non-root branch scope hiding `path`, if any.
    #[must_use]
    pub fn hiding_scope(&self, path: &SemanticPath) -> Option<SemanticPath> {
        self.branch_scope(path)
            .filter(|scope| !scope.is_root() && path.starts_with(scope))
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn p(raw: &str) -> SemanticPath {
        SemanticPath::canonical(raw)
    }

    #[test]
    fn no_declarations_is_cleartext() {
        let scopes = ScopeRegistry::new();
        assert_eq!(scopes.effective_secret(&p("a.b")), "");
        assert!(scopes.branch_scope(&p("a.b")).is_none());
    }

    #[test]
    fn secrets_chain_along_the_path() {
        let mut scopes = ScopeRegistry::new();
        scopes.declare_secret(&p("wallet"), "w");
        scopes.declare_secret(&p("wallet.hidden"), "h");

        let outer = scopes.effective_secret(&p("wallet.balance"));
        let inner = scopes.effective_secret(&p("wallet.hidden.notes"));
        let expected_outer = digest_hex(&format!("{}::w", ROOT_SEED));
        assert_eq!(outer, expected_outer);
        assert_eq!(inner, digest_hex(&format!("{}::h", expected_outer)));
    }

    #[test]
    fn sibling_scopes_are_unrelated() {
        let mut scopes = ScopeRegistry::new();
        scopes.declare_secret(&p("a.x"), "same");
        scopes.declare_secret(&p("a.y"), "same");
        assert_eq!(
            scopes.effective_secret(&p("a.x.v")),
            scopes.effective_secret(&p("a.y.v"))
        );

        scopes.declare_secret(&p("a.y"), "other");
        assert_ne!(
            scopes.effective_secret(&p("a.x.v")),
            scopes.effective_secret(&p("a.y.v"))
        );
    }

    #[test]
    fn noise_resets_lineage() {
        let mut scopes = ScopeRegistry::new();
        scopes.declare_secret(&p("vault"), "k");
        let before = scopes.effective_secret(&p("vault.layer.item"));

        scopes.declare_noise(&p("vault.layer"), "n");
        scopes.declare_secret(&p("vault.layer"), "k");
        let after = scopes.effective_secret(&p("vault.layer.item"));

        assert_ne!(before, after);
        // Only the secret at/under the noise contributes.
        let noise_seed = digest_hex("noise::n");
        assert_eq!(after, digest_hex(&format!("{}::k", noise_seed)));
    }

    #[test]
    fn root_secret_yields_root_branch_scope() {
        let mut scopes = ScopeRegistry::new();
        scopes.declare_secret(&SemanticPath::root(), "r");
        assert_eq!(scopes.branch_scope(&p("a.b")), Some(SemanticPath::root()));
        assert!(scopes.hiding_scope(&p("a.b")).is_none());
        assert!(!scopes.effective_secret(&p("a.b")).is_empty());
    }

    #[test]
    fn deepest_scope_wins() {
        let mut scopes = ScopeRegistry::new();
        scopes.declare_secret(&p("a"), "1");
        scopes.declare_secret(&p("a.b"), "2");
        assert_eq!(scopes.hiding_scope(&p("a.b.c")), Some(p("a.b")));
        assert_eq!(scopes.hiding_scope(&p("a.z")), Some(p("a")));
    }

    #[test]
    fn purge_removes_nested_declarations() {
        let mut scopes = ScopeRegistry::new();
        scopes.declare_secret(&p("a"), "1");
        scopes.declare_secret(&p("a.b"), "2");
        scopes.declare_noise(&p("a.b.c"), "n");
        scopes.declare_secret(&p("ab"), "3");

        scopes.purge_under(&p("a.b"));
        assert!(scopes.secrets().contains_key("a"));
        assert!(!scopes.secrets().contains_key("a.b"));
        assert!(scopes.noises().is_empty());
        assert!(scopes.secrets().contains_key("ab"));

        scopes.purge_under(&SemanticPath::root());
        assert!(scopes.secrets().is_empty());
    }
}
