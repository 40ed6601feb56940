/*============================================================
  Synavera Project: Syn-Mod
  Module: synmod_core::resolver
  Etiquette: Synavera Script Etiquette — Rust Profile v1.1.1
  ------------------------------------------------------------
  Purpose:
    Decide, per managed package, whether the highest locally
    registered version trails the latest published one, and
    trigger the install when it does.

  Security / Safety Notes:
    Installs run through the registry client with operator
    privileges; nothing is elevated here.

  Dependencies:
    registry client trait, version ordering.

  Operational Scope:
    Phase 1 of a reconciliation run.

  Revision History:
    2025-11-12 COD  Authored version resolver.
  ------------------------------------------------------------
  SSE Principles Observed:
    - Per-package isolation: failures are recorded, not raised
    - Availability over precision when the registry is unreachable
============================================================*/

use crate::config::InstallScope;
use crate::logger::Logger;
use crate::registry::RegistryClient;
use crate::version::ModuleVersion;

/// Outcome of the remote lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteLookup {
    Found(ModuleVersion),
    NotFound,
    Failed(String),
}

/// What Phase 1 did about a package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateAction {
    /// Local install is current; nothing was attempted.
    NotRequired,
    Installed,
    Failed(String),
}

/// Per-package Phase 1 result.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub package: String,
    pub installed_before: Option<ModuleVersion>,
    pub remote: RemoteLookup,
    pub needs_update: bool,
    pub action: UpdateAction,
}

/// Pure decision: does the local state warrant an install?
///
/// Missing local installs always do. A failed lookup does too, so a
/// flaky registry costs an extra install rather than a skipped update.
pub fn needs_update(local: Option<&ModuleVersion>, remote: &RemoteLookup) -> bool {
    match (local, remote) {
        (None, _) => true,
        (Some(_), RemoteLookup::Failed(_)) => true,
        (Some(_), RemoteLookup::NotFound) => false,
        (Some(local), RemoteLookup::Found(latest)) => local < latest,
    }
}

pub struct VersionResolver<'a, R: RegistryClient> {
    registry: &'a R,
    scope: InstallScope,
    logger: &'a Logger,
}

impl<'a, R: RegistryClient> VersionResolver<'a, R> {
    pub fn new(registry: &'a R, scope: InstallScope, logger: &'a Logger) -> Self {
        Self {
            registry,
            scope,
            logger,
        }
    }

    pub async fn resolve(&self, package: &str) -> Resolution {
        let installed_before = self.highest_local(package).await;
        let remote = match self.registry.find_latest(package).await {
            Ok(Some(info)) => RemoteLookup::Found(info.version),
            Ok(None) => RemoteLookup::NotFound,
            Err(err) => {
                self.logger.warn(
                    "QUERY",
                    format!("{package}: latest-version lookup failed, assuming update: {err}"),
                );
                RemoteLookup::Failed(err.to_string())
            }
        };

        let update_required = needs_update(installed_before.as_ref(), &remote);
        self.logger.debug(
            "RESOLVE",
            format!(
                "{package}: local={} remote={} needs_update={update_required}",
                installed_before
                    .as_ref()
                    .map(ModuleVersion::as_str)
                    .unwrap_or("none"),
                describe_remote(&remote)
            ),
        );

        let action = if update_required {
            match self.registry.install_or_update(package, self.scope).await {
                Ok(()) => {
                    self.logger
                        .info("INSTALL", format!("{package}: install/update completed"));
                    UpdateAction::Installed
                }
                Err(err) => {
                    self.logger
                        .warn("INSTALL", format!("{package}: install/update failed: {err}"));
                    UpdateAction::Failed(err.to_string())
                }
            }
        } else {
            UpdateAction::NotRequired
        };

        Resolution {
            package: package.to_string(),
            installed_before,
            remote,
            needs_update: update_required,
            action,
        }
    }

    async fn highest_local(&self, package: &str) -> Option<ModuleVersion> {
        match self.registry.list_installed(package, true).await {
            Ok(records) => records.into_iter().map(|record| record.version).max(),
            Err(err) => {
                self.logger.warn(
                    "RESOLVE",
                    format!("{package}: local listing failed, treating as not installed: {err}"),
                );
                None
            }
        }
    }
}

fn describe_remote(remote: &RemoteLookup) -> &str {
    match remote {
        RemoteLookup::Found(version) => version.as_str(),
        RemoteLookup::NotFound => "not-found",
        RemoteLookup::Failed(_) => "query-error",
    }
}
