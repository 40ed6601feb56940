/*============================================================
  Synavera Project: Syn-Mod
  Module: synmod_core::scanner
  Etiquette: Synavera Script Etiquette — Rust Profile v1.1.1
  ------------------------------------------------------------
  Purpose:
    Find every non-current version of a package, by directory
    in the secondary environment and by registration in the
    primary one, and queue removal directives for it.

  Security / Safety Notes:
    Only proposes work; nothing is removed here. The resolved
    version is protected in the pending set before any proposal
    is made, so it can never be queued.

  Dependencies:
    environment filesystem seam, cleanup pending set.

  Operational Scope:
    Phase 2 of a reconciliation run, after synchronization, and
    for legacy packages that are kept only to be swept.

  Revision History:
    2025-11-12 COD  Authored stale version scanner.
  ------------------------------------------------------------
  SSE Principles Observed:
    - Zero versions or zero directories is a no-op
    - Duplicate proposals collapse in the shared set
============================================================*/

use crate::cleanup::{CleanupDirective, InsertOutcome, PendingCleanupSet};
use crate::environment::{
    EnvironmentId, EnvironmentLayout, InstalledVersionRecord, ModuleFilesystem,
};
use crate::error::Result;
use crate::logger::Logger;
use crate::sync::ResolvedVersion;
use crate::version::max_version;

/// Directives a scan added to the pending set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanTally {
    pub added: usize,
    pub duplicates: usize,
    pub protected: usize,
}

impl ScanTally {
    fn record(&mut self, outcome: InsertOutcome) {
        match outcome {
            InsertOutcome::Added => self.added += 1,
            InsertOutcome::Duplicate => self.duplicates += 1,
            InsertOutcome::Protected => self.protected += 1,
        }
    }
}

pub struct StaleVersionScanner<'a, F: ModuleFilesystem> {
    layout: &'a EnvironmentLayout,
    filesystem: &'a F,
    logger: &'a Logger,
}

impl<'a, F: ModuleFilesystem> StaleVersionScanner<'a, F> {
    pub fn new(layout: &'a EnvironmentLayout, filesystem: &'a F, logger: &'a Logger) -> Self {
        Self {
            layout,
            filesystem,
            logger,
        }
    }

    /// Queue every secondary version directory other than the resolved one.
    ///
    /// Directories whose names are not version strings are left alone.
    pub fn scan_directories(
        &self,
        resolved: &ResolvedVersion,
        pending: &mut PendingCleanupSet,
    ) -> Result<ScanTally> {
        let target = self
            .layout
            .version_dir(EnvironmentId::Secondary, &resolved.package, &resolved.version);
        pending.protect(&resolved.package, &resolved.version, Some(target.as_path()));

        let root = self.layout.root(EnvironmentId::Secondary);
        let mut tally = ScanTally::default();
        for directory in self
            .filesystem
            .list_version_directories(root, &resolved.package)?
        {
            let Some(version) = directory.version() else {
                self.logger.debug(
                    "SCAN",
                    format!(
                        "{}: ignoring non-version directory {}",
                        resolved.package, directory.name
                    ),
                );
                continue;
            };
            if version == resolved.version {
                continue;
            }
            tally.record(pending.insert(CleanupDirective::RemoveDirectory {
                package: resolved.package.clone(),
                version: directory.name,
                path: directory.path,
            }));
        }
        Ok(tally)
    }

    /// Queue an uninstall for every registered version except the highest.
    pub fn scan_registrations(
        &self,
        package: &str,
        records: &[InstalledVersionRecord],
        pending: &mut PendingCleanupSet,
    ) -> ScanTally {
        let mut tally = ScanTally::default();
        if records.len() < 2 {
            return tally;
        }
        let Some(newest) = max_version(records.iter().map(|record| &record.version)) else {
            return tally;
        };
        for record in records {
            if &record.version == newest {
                continue;
            }
            tally.record(pending.insert(CleanupDirective::Uninstall {
                package: package.to_string(),
                version: record.version.to_string(),
            }));
        }
        tally
    }
}
