/*============================================================
  Synavera Project: Syn-Mod
  Module: synmod_core::error
  Etiquette: Synavera Script Etiquette — Rust Profile v1.1.1
  ------------------------------------------------------------
  Purpose:
    Centralise Syn-Mod-Core error types so that collaborators,
    phases, and the entry point share one diagnostic vocabulary.

  Security / Safety Notes:
    Error contexts carry package names and module paths only;
    shell payloads are never echoed back in full.

  Dependencies:
    thiserror for ergonomic error definitions.

  Operational Scope:
    Fatal variants surface only during environment setup; the
    per-package loop converts everything else into report rows.

  Revision History:
    2025-11-12 COD  Established shared error definitions.
  ------------------------------------------------------------
  SSE Principles Observed:
    - Explicit error taxonomy with actionable context
    - Stable exit codes for operational tooling
============================================================*/

use std::io;
use std::process::ExitCode;

use thiserror::Error;

/// Result alias for Syn-Mod-Core operations.
pub type Result<T> = std::result::Result<T, SynmodError>;

/// Enumerates high-level error domains surfaced by Syn-Mod-Core.
#[derive(Debug, Error)]
pub enum SynmodError {
    #[error("Required command `{command}` not found in PATH")]
    CommandMissing { command: String },
    #[error("Command `{command}` failed with status {status}: {stderr}")]
    CommandFailure {
        command: String,
        status: i32,
        stderr: String,
    },
    #[error("Configuration: {0}")]
    Config(String),
    #[error("Network: {0}")]
    Network(String),
    #[error("Serialization: {0}")]
    Serialization(String),
    #[error("Filesystem: {0}")]
    Filesystem(String),
    #[error("Runtime: {0}")]
    Runtime(String),
    #[error("Version `{0}` is not a dotted numeric version")]
    Version(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl SynmodError {
    /// Map error category to a deterministic exit code.
    pub fn exit_code(&self) -> ExitCode {
        match self {
            SynmodError::CommandMissing { .. } => ExitCode::from(10),
            SynmodError::CommandFailure { .. } => ExitCode::from(11),
            SynmodError::Config(_) => ExitCode::from(20),
            SynmodError::Network(_) => ExitCode::from(30),
            SynmodError::Serialization(_) => ExitCode::from(31),
            SynmodError::Version(_) => ExitCode::from(32),
            SynmodError::Filesystem(_) => ExitCode::from(40),
            SynmodError::Io(_) => ExitCode::from(41),
            SynmodError::Runtime(_) => ExitCode::from(50),
        }
    }
}
