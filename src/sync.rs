/*============================================================
  Synavera Project: Syn-Mod
  Module: synmod_core::sync
  Etiquette: Synavera Script Etiquette — Rust Profile v1.1.1
  ------------------------------------------------------------
  Purpose:
    Ensure the secondary environment holds the exact version
    directory the primary environment resolved to, copying only
    when it is absent.

  Security / Safety Notes:
    Writes are confined to `<secondary>/<package>/<version>`.
    A failed copy is reported with its reason and never retried
    automatically; partial trees are left for the operator.

  Dependencies:
    environment filesystem seam.

  Operational Scope:
    Phase 2 of a reconciliation run, before stale scanning.

  Revision History:
    2025-11-12 COD  Authored environment synchronizer.
  ------------------------------------------------------------
  SSE Principles Observed:
    - Idempotent: an existing target performs no I/O
    - Per-package isolation of copy failures
============================================================*/

use std::path::PathBuf;

use crate::environment::{EnvironmentId, EnvironmentLayout, ModuleFilesystem};
use crate::logger::Logger;
use crate::version::ModuleVersion;

/// The version every environment should hold after this run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedVersion {
    pub package: String,
    pub version: ModuleVersion,
    /// Version directory in the primary environment.
    pub source: PathBuf,
}

/// Whether the secondary environment now holds the resolved version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    AlreadySynchronized,
    Synchronized,
    SyncFailed(String),
}

pub struct EnvironmentSynchronizer<'a, F: ModuleFilesystem> {
    layout: &'a EnvironmentLayout,
    filesystem: &'a F,
    logger: &'a Logger,
}

impl<'a, F: ModuleFilesystem> EnvironmentSynchronizer<'a, F> {
    pub fn new(layout: &'a EnvironmentLayout, filesystem: &'a F, logger: &'a Logger) -> Self {
        Self {
            layout,
            filesystem,
            logger,
        }
    }

    /// Secondary-environment path the resolved version must occupy.
    pub fn target_path(&self, resolved: &ResolvedVersion) -> PathBuf {
        self.layout
            .version_dir(EnvironmentId::Secondary, &resolved.package, &resolved.version)
    }

    pub fn synchronize(&self, resolved: &ResolvedVersion) -> SyncOutcome {
        let target = self.target_path(resolved);
        if self.filesystem.exists(&target) {
            self.logger.debug(
                "SYNC",
                format!(
                    "{} {}: already present at {}",
                    resolved.package,
                    resolved.version,
                    target.display()
                ),
            );
            return SyncOutcome::AlreadySynchronized;
        }

        match self.filesystem.copy_tree(&resolved.source, &target) {
            Ok(()) => {
                self.logger.info(
                    "SYNC",
                    format!(
                        "{} {}: copied to {}",
                        resolved.package,
                        resolved.version,
                        target.display()
                    ),
                );
                SyncOutcome::Synchronized
            }
            Err(err) => {
                self.logger.error(
                    "SYNC",
                    format!(
                        "{} {}: copy failed, target left absent: {err}",
                        resolved.package, resolved.version
                    ),
                );
                SyncOutcome::SyncFailed(err.to_string())
            }
        }
    }
}
