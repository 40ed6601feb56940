/*============================================================
  Synavera Project: Syn-Mod
  Module: synmod_core::reconcile
  Etiquette: Synavera Script Etiquette — Rust Profile v1.1.1
  ------------------------------------------------------------
  Purpose:
    Drive Phase 1 (resolve + install) and Phase 2 (synchronize
    + scan) across the whole package list, accumulating the one
    pending cleanup set that Phase 3 consumes.

  Security / Safety Notes:
    Nothing is removed in this module. Removals are deferred to
    the detached sweep so they can never race a copy.

  Dependencies:
    resolver, sync, scanner, registry and filesystem seams.

  Operational Scope:
    Called once per run by the entry point.

  Revision History:
    2025-11-12 COD  Authored phase driver.
  ------------------------------------------------------------
  SSE Principles Observed:
    - Sequential phases with a global barrier before cleanup
    - No fatal path once the package loop begins
============================================================*/

use crate::cleanup::PendingCleanupSet;
use crate::config::InstallScope;
use crate::environment::{EnvironmentId, EnvironmentLayout, ModuleFilesystem};
use crate::logger::Logger;
use crate::registry::RegistryClient;
use crate::resolver::{Resolution, VersionResolver};
use crate::scanner::StaleVersionScanner;
use crate::sync::{EnvironmentSynchronizer, ResolvedVersion, SyncOutcome};

/// Everything known about one managed package after Phase 2.
#[derive(Debug, Clone)]
pub struct PackageState {
    pub resolution: Resolution,
    pub resolved: Option<ResolvedVersion>,
    pub sync: Option<SyncOutcome>,
    pub note: Option<String>,
}

/// Phase 1 and 2 results, ready for cleanup and reporting.
#[derive(Debug)]
pub struct ReconcileOutcome {
    pub packages: Vec<PackageState>,
    pub pending: PendingCleanupSet,
}

pub struct Reconciler<'a, R: RegistryClient, F: ModuleFilesystem> {
    registry: &'a R,
    filesystem: &'a F,
    layout: &'a EnvironmentLayout,
    logger: &'a Logger,
    scope: InstallScope,
}

impl<'a, R: RegistryClient, F: ModuleFilesystem> Reconciler<'a, R, F> {
    pub fn new(
        registry: &'a R,
        filesystem: &'a F,
        layout: &'a EnvironmentLayout,
        logger: &'a Logger,
        scope: InstallScope,
    ) -> Self {
        Self {
            registry,
            filesystem,
            layout,
            logger,
            scope,
        }
    }

    pub async fn run(&self, managed: &[String], legacy: &[String]) -> ReconcileOutcome {
        let resolver = VersionResolver::new(self.registry, self.scope, self.logger);
        let mut resolutions = Vec::with_capacity(managed.len());
        for package in managed {
            resolutions.push(resolver.resolve(package).await);
        }
        self.logger.info(
            "PHASE1",
            format!(
                "Resolved {} package(s); {} needed an update",
                resolutions.len(),
                resolutions.iter().filter(|r| r.needs_update).count()
            ),
        );

        let mut pending = PendingCleanupSet::new();
        let mut packages = Vec::with_capacity(resolutions.len());
        for resolution in resolutions {
            packages.push(self.converge(resolution, &mut pending).await);
        }
        for package in legacy {
            self.sweep_registrations(package, &mut pending).await;
        }
        self.logger.info(
            "PHASE2",
            format!("{} stale target(s) pending cleanup", pending.len()),
        );

        ReconcileOutcome { packages, pending }
    }

    async fn converge(
        &self,
        resolution: Resolution,
        pending: &mut PendingCleanupSet,
    ) -> PackageState {
        let package = resolution.package.clone();
        let records = match self.registry.list_installed(&package, true).await {
            Ok(records) => records,
            Err(err) => {
                self.logger
                    .warn("RESOLVE", format!("{package}: post-install listing failed: {err}"));
                return unresolved(resolution, format!("listing failed: {err}"));
            }
        };
        let Some(current) = records.iter().max_by(|a, b| a.version.cmp(&b.version)) else {
            self.logger
                .warn("RESOLVE", format!("{package}: no installed version after Phase 1"));
            return unresolved(resolution, "no installed version found".into());
        };

        let source = current.path.clone().unwrap_or_else(|| {
            self.layout
                .version_dir(EnvironmentId::Primary, &package, &current.version)
        });
        let resolved = ResolvedVersion {
            package: package.clone(),
            version: current.version.clone(),
            source,
        };
        pending.protect(&package, &resolved.version, Some(resolved.source.as_path()));

        let synchronizer = EnvironmentSynchronizer::new(self.layout, self.filesystem, self.logger);
        let sync = synchronizer.synchronize(&resolved);

        let scanner = StaleVersionScanner::new(self.layout, self.filesystem, self.logger);
        let mut note = None;
        if matches!(sync, SyncOutcome::SyncFailed(_)) {
            note = Some("secondary directories kept until the copy succeeds".to_string());
        } else {
            match scanner.scan_directories(&resolved, pending) {
                Ok(tally) => self.logger.debug(
                    "SCAN",
                    format!("{package}: {} stale directory(ies) queued", tally.added),
                ),
                Err(err) => self
                    .logger
                    .warn("SCAN", format!("{package}: directory scan failed: {err}")),
            }
        }
        let tally = scanner.scan_registrations(&package, &records, pending);
        self.logger.debug(
            "SCAN",
            format!("{package}: {} stale registration(s) queued", tally.added),
        );

        PackageState {
            resolution,
            resolved: Some(resolved),
            sync: Some(sync),
            note,
        }
    }

    async fn sweep_registrations(&self, package: &str, pending: &mut PendingCleanupSet) {
        let records = match self.registry.list_installed(package, true).await {
            Ok(records) => records,
            Err(err) => {
                self.logger
                    .warn("LEGACY", format!("{package}: listing failed: {err}"));
                return;
            }
        };
        let scanner = StaleVersionScanner::new(self.layout, self.filesystem, self.logger);
        let tally = scanner.scan_registrations(package, &records, pending);
        if tally.added > 0 {
            self.logger.info(
                "LEGACY",
                format!("{package}: {} superseded version(s) queued", tally.added),
            );
        }
    }
}

fn unresolved(resolution: Resolution, note: String) -> PackageState {
    PackageState {
        resolution,
        resolved: None,
        sync: None,
        note: Some(note),
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use super::*;
    use crate::cleanup::{CleanupDirective, CleanupOutcome, DeferredCleanupExecutor};
    use crate::config::EnvironmentRoots;
    use crate::resolver::UpdateAction;
    use crate::testing::{CountingFilesystem, FakeRegistry, RecordingLauncher};

    struct World {
        root: tempfile::TempDir,
        layout: EnvironmentLayout,
        registry: FakeRegistry,
        logger: Logger,
    }

    impl World {
        fn new() -> Self {
            let root = tempfile::tempdir().expect("tempdir");
            let primary = root.path().join("primary");
            let secondary = root.path().join("secondary");
            fs::create_dir_all(&secondary).expect("mkdir");
            Self {
                layout: EnvironmentLayout::new(EnvironmentRoots {
                    primary: primary.clone(),
                    secondary,
                }),
                registry: FakeRegistry::new(&primary),
                logger: Logger::stderr_only(),
                root,
            }
        }

        fn secondary(&self, rel: &str) -> PathBuf {
            self.root.path().join("secondary").join(rel)
        }

        async fn run(&self, filesystem: &CountingFilesystem, managed: &[&str]) -> ReconcileOutcome {
            let managed: Vec<String> = managed.iter().map(|name| name.to_string()).collect();
            Reconciler::new(
                &self.registry,
                filesystem,
                &self.layout,
                &self.logger,
                InstallScope::AllUsers,
            )
            .run(&managed, &[])
            .await
        }
    }

    fn names(pending: &PendingCleanupSet) -> Vec<String> {
        pending.iter().map(CleanupDirective::describe).collect()
    }

    #[tokio::test]
    async fn scenario_a_fresh_install_is_copied_to_secondary() {
        let world = World::new();
        world.registry.publish("P", "2.0.0");
        let filesystem = CountingFilesystem::default();

        let outcome = world.run(&filesystem, &["P"]).await;

        let state = &outcome.packages[0];
        assert!(state.resolution.needs_update);
        assert_eq!(state.resolution.action, UpdateAction::Installed);
        assert_eq!(world.registry.install_calls(), vec!["P".to_string()]);
        let resolved = state.resolved.as_ref().expect("resolved");
        assert_eq!(resolved.version.as_str(), "2.0.0");
        assert_eq!(state.sync, Some(SyncOutcome::Synchronized));
        assert!(world.secondary("P/2.0.0/P.psd1").is_file());
        assert!(outcome.pending.is_empty());
    }

    #[tokio::test]
    async fn scenario_b_old_registrations_are_queued_for_uninstall() {
        let world = World::new();
        world.registry.seed_installed("P", &["1.0.0", "1.5.0"]);
        world.registry.publish("P", "2.0.0");
        let filesystem = CountingFilesystem::default();

        let outcome = world.run(&filesystem, &["P"]).await;

        let resolved = outcome.packages[0].resolved.as_ref().expect("resolved");
        assert_eq!(resolved.version.as_str(), "2.0.0");
        assert_eq!(
            names(&outcome.pending),
            vec!["uninstall P 1.0.0".to_string(), "uninstall P 1.5.0".to_string()]
        );
    }

    #[tokio::test]
    async fn scenario_c_existing_secondary_copy_is_left_alone() {
        let world = World::new();
        world.registry.seed_installed("P", &["2.0.0"]);
        world.registry.publish("P", "2.0.0");
        fs::create_dir_all(world.secondary("P/2.0.0")).expect("mkdir");
        let filesystem = CountingFilesystem::default();

        let outcome = world.run(&filesystem, &["P"]).await;

        assert_eq!(
            outcome.packages[0].sync,
            Some(SyncOutcome::AlreadySynchronized)
        );
        assert_eq!(filesystem.writes(), 0);
        assert!(world.registry.install_calls().is_empty());
    }

    #[tokio::test]
    async fn scenario_d_query_error_still_attempts_install() {
        let world = World::new();
        world.registry.seed_installed("P", &["2.0.0"]);
        world.registry.publish("P", "2.0.0");
        world.registry.fail_lookups_of("P");
        let filesystem = CountingFilesystem::default();

        let outcome = world.run(&filesystem, &["P"]).await;

        let state = &outcome.packages[0];
        assert!(state.resolution.needs_update);
        assert_eq!(world.registry.install_calls(), vec!["P".to_string()]);
        assert_eq!(
            state.resolved.as_ref().map(|r| r.version.as_str()),
            Some("2.0.0")
        );
    }

    #[tokio::test]
    async fn stale_secondary_directories_join_the_pending_set() {
        let world = World::new();
        world.registry.seed_installed("P", &["2.0.0"]);
        world.registry.publish("P", "2.0.0");
        for version in ["1.0.0", "2.0.0"] {
            fs::create_dir_all(world.secondary("P").join(version)).expect("mkdir");
        }
        let filesystem = CountingFilesystem::default();

        let outcome = world.run(&filesystem, &["P"]).await;

        let expected = format!(
            "remove directory {}",
            world.secondary("P/1.0.0").display()
        );
        assert_eq!(names(&outcome.pending), vec![expected]);
    }

    #[tokio::test]
    async fn failed_install_without_local_copy_is_unresolved() {
        let world = World::new();
        world.registry.publish("P", "2.0.0");
        world.registry.fail_installs_of("P");
        world.registry.seed_installed("Q", &["1.0.0"]);
        world.registry.publish("Q", "1.0.0");
        let filesystem = CountingFilesystem::default();

        let outcome = world.run(&filesystem, &["P", "Q"]).await;

        assert!(outcome.packages[0].resolved.is_none());
        assert!(outcome.packages[0].sync.is_none());
        assert!(outcome.packages[0].note.is_some());
        assert_eq!(
            outcome.packages[1].sync,
            Some(SyncOutcome::Synchronized)
        );
    }

    #[tokio::test]
    async fn failed_copy_keeps_old_secondary_directories() {
        let world = World::new();
        world.registry.seed_installed("P", &["2.0.0"]);
        world.registry.publish("P", "2.0.0");
        fs::create_dir_all(world.secondary("P/1.0.0")).expect("mkdir");
        let filesystem = CountingFilesystem::failing_copies();

        let outcome = world.run(&filesystem, &["P"]).await;

        assert!(matches!(
            outcome.packages[0].sync,
            Some(SyncOutcome::SyncFailed(_))
        ));
        assert!(outcome.pending.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn interrupted_copy_stays_failed_on_the_next_run() {
        let world = World::new();
        world.registry.seed_installed("P", &["2.0.0"]);
        world.registry.publish("P", "2.0.0");
        fs::create_dir_all(world.secondary("P/1.0.0")).expect("mkdir");
        let _socket = std::os::unix::net::UnixListener::bind(
            world.registry.version_path("P", "2.0.0").join("host.sock"),
        )
        .expect("bind socket");
        let filesystem = CountingFilesystem::default();

        for _ in 0..2 {
            let outcome = world.run(&filesystem, &["P"]).await;
            assert!(matches!(
                outcome.packages[0].sync,
                Some(SyncOutcome::SyncFailed(_))
            ));
            assert!(outcome.pending.is_empty());
            assert!(!world.secondary("P/2.0.0").exists());
            assert!(world.secondary("P/1.0.0").is_dir());
        }
    }

    #[tokio::test]
    async fn legacy_packages_are_swept_and_cleanup_runs_once() {
        let world = World::new();
        world.registry.seed_installed("AzureRM", &["6.13.1", "5.7.0", "6.0.0"]);
        world.registry.seed_installed("P", &["1.0.0", "2.0.0"]);
        world.registry.publish("P", "2.0.0");
        let filesystem = CountingFilesystem::default();
        let managed = vec!["P".to_string()];
        let legacy = vec!["AzureRM".to_string(), "NeverInstalled".to_string()];

        let outcome = Reconciler::new(
            &world.registry,
            &filesystem,
            &world.layout,
            &world.logger,
            InstallScope::AllUsers,
        )
        .run(&managed, &legacy)
        .await;
        assert_eq!(
            names(&outcome.pending),
            vec![
                "uninstall AzureRM 5.7.0".to_string(),
                "uninstall AzureRM 6.0.0".to_string(),
                "uninstall P 1.0.0".to_string(),
            ]
        );

        let launcher = RecordingLauncher::exiting_with(0);
        let result = DeferredCleanupExecutor::new(&launcher, &world.logger, None)
            .execute(outcome.pending)
            .await;
        assert_eq!(launcher.launches(), 1);
        assert!(matches!(result, CleanupOutcome::Succeeded { directives: 3, .. }));
    }
}
