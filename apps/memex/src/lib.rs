//! # memex
//!
//! Command-line front end for the Memex engine.
//!
//! The binary in `main.rs` only installs logging and dispatches; the
//! commands, configuration and backends live here so they can be tested
//! without spawning a process.

pub mod cli;
pub mod config;
