//! # Configuration
//!
//! Optional `memex.toml` settings, merged under the command-line flags.
//!
//! Precedence, highest first:
//! 1. Command-line flag
//! 2. `MEMEX_DB` (database path only)
//! 3. `memex.toml` (or the file given with `--config`)
//! 4. Built-in defaults

use memex_core::MemexError;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Default configuration file, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "memex.toml";

/// Default database location.
pub const DEFAULT_DATABASE: &str = "memex.db";

/// Environment variable overriding the database path.
pub const DATABASE_ENV: &str = "MEMEX_DB";

/// Default ledger tail shown by `inspect`.
pub const DEFAULT_INSPECT_LAST: usize = 20;

// =============================================================================
// BACKEND
// =============================================================================

/// Where a store is persisted between commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backend {
    /// redb journal (ACID, append-only ledger writes).
    #[default]
    Redb,
    /// One binary snapshot file, rewritten on every save.
    File,
}

impl FromStr for Backend {
    type Err = MemexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "redb" => Ok(Self::Redb),
            "file" => Ok(Self::File),
            other => Err(MemexError::IoError(format!(
                "Unknown backend '{}' (expected 'redb' or 'file')",
                other
            ))),
        }
    }
}

impl Backend {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Redb => "redb",
            Self::File => "file",
        }
    }
}

// =============================================================================
// FILE CONFIG
// =============================================================================

/// Contents of `memex.toml`. Every key is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub database: Option<PathBuf>,
    pub backend: Option<String>,
    pub json: Option<bool>,
    pub inspect_last: Option<usize>,
}

impl FileConfig {
    /// Parse TOML text.
    pub fn parse(text: &str) -> Result<Self, MemexError> {
        toml::from_str(text).map_err(|e| {
            MemexError::DeserializationError(format!("Invalid configuration: {}", e))
        })
    }

    /// Load the configuration file.
    ///
    /// A missing default file yields the defaults; a missing file that was
    /// named explicitly is an error.
    pub fn load(path: Option<&Path>) -> Result<Self, MemexError> {
        let (path, explicit) = match path {
            Some(path) => (path.to_path_buf(), true),
            None => (PathBuf::from(DEFAULT_CONFIG_FILE), false),
        };
        if !path.exists() {
            if explicit {
                return Err(MemexError::IoError(format!(
                    "Configuration file '{}' not found",
                    path.display()
                )));
            }
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(&path)
            .map_err(|e| MemexError::IoError(format!("Read config: {}", e)))?;
        tracing::debug!(path = %path.display(), "configuration loaded");
        Self::parse(&text)
    }
}

// =============================================================================
// RESOLVED SETTINGS
// =============================================================================

/// Command-line overrides, `None` when the flag was not given.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub database: Option<PathBuf>,
    pub backend: Option<String>,
    pub json_mode: bool,
}

/// Effective settings for one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub database: PathBuf,
    pub backend: Backend,
    pub json_mode: bool,
    pub inspect_last: usize,
}

impl Settings {
    /// Merge flags, environment and file configuration.
    pub fn resolve(
        overrides: Overrides,
        file: FileConfig,
        env_database: Option<String>,
    ) -> Result<Self, MemexError> {
        let database = overrides
            .database
            .or_else(|| env_database.filter(|s| !s.trim().is_empty()).map(PathBuf::from))
            .or(file.database)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATABASE));

        let backend = match overrides.backend.or(file.backend) {
            Some(raw) => raw.parse()?,
            None => Backend::default(),
        };

        Ok(Self {
            database,
            backend,
            json_mode: overrides.json_mode || file.json.unwrap_or(false),
            inspect_last: file.inspect_last.unwrap_or(DEFAULT_INSPECT_LAST),
        })
    }
}

// =============================================================================
// TESTS
// =============================================================================
