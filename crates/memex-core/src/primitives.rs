//! # Innate Primitives
//!
//! Hardcoded runtime constants for the Memex engine.
//!
//! These are compiled into the binary and immutable at runtime.
//!
//! ## Primitives
//!
//! 1. **Resolution bounds**: pointer hop limit, selector range cap.
//! 2. **Markers**: the masked placeholder and declaration/tombstone markers.
//! 3. **Format identity**: magic bytes and version of the snapshot encoding.

/// Maximum number of pointer redirections followed by a single read.
///
/// - Prefix redirects and marker hops share this budget.
/// - A read that exhausts it resolves to absent.
pub const MAX_POINTER_HOPS: usize = 8;

/// Maximum span of an inclusive numeric range selector (`[a..b]`).
///
/// Ranges with `|b - a| > MAX_RANGE_SPAN` are rejected as selectors.
pub const MAX_RANGE_SPAN: i64 = 10_000;

/// Placeholder shown by `explain` in place of a stealth input's value.
pub const MASK_PLACEHOLDER: &str = "●●●●";

/// Expression and value recorded for secret and noise declarations.
///
/// The declared string itself never enters the ledger.
pub const DECLARATION_MARKER: &str = "***";

/// Expression and value recorded for remove thoughts.
pub const TOMBSTONE_MARKER: &str = "-";

/// The protected operator symbol used to mutate the registry.
pub const OP_DEFINE: &str = "+";

/// Identifier prefix resolving relative to the pointer stored at the evaluation scope.
pub const POINTER_NAMESPACE: &str = "__ptr";

/// Iterator placeholder that turns a derivation into a broadcast.
pub const ITERATOR_TOKEN: &str = "[i]";

/// Branch key receiving a value written at a secret scope's root path.
pub const SCOPE_ROOT_KEY: &str = "expression";

/// Seed of the effective-secret chain before any declaration contributes.
pub const ROOT_SEED: &str = "root";

// =============================================================================
// IDENTITY LIMITS
// =============================================================================

/// Minimum length of a normalized identity username.
pub const MIN_USERNAME_LENGTH: usize = 3;

/// Maximum length of a normalized identity username.
pub const MAX_USERNAME_LENGTH: usize = 63;

// =============================================================================
// FORMAT IDENTITY
// =============================================================================

/// Magic bytes for the Memex snapshot binary format header.
///
/// - File Header = Magic Bytes ("MEMX") + Version (u8) before payload.
pub const MAGIC_BYTES: &[u8; 4] = b"MEMX";

/// Current snapshot serialization format version.
///
/// Increment this when making breaking changes to the serialization format.
pub const FORMAT_VERSION: u8 = 1;
