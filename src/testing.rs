//! In-memory collaborators shared by the unit tests.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::cleanup::{CommandBatch, ExitReport, ProcessLauncher, SweepSummary};
use crate::config::InstallScope;
use crate::environment::{
    EnvironmentId, InstalledVersionRecord, LocalFilesystem, ModuleFilesystem, VersionDirectory,
};
use crate::error::{Result, SynmodError};
use crate::registry::{RegistryClient, RemoteVersionInfo};
use crate::version::ModuleVersion;

/// Registry double whose installs materialise real directories under
/// `primary_root` so the synchronizer has something to copy.
pub struct FakeRegistry {
    primary_root: PathBuf,
    installed: Mutex<HashMap<String, Vec<String>>>,
    published: Mutex<HashMap<String, String>>,
    failing_lookups: Mutex<HashSet<String>>,
    failing_installs: Mutex<HashSet<String>>,
    install_calls: Mutex<Vec<String>>,
    uninstall_calls: Mutex<Vec<(String, String)>>,
}

impl FakeRegistry {
    pub fn new(primary_root: &Path) -> Self {
        Self {
            primary_root: primary_root.to_path_buf(),
            installed: Mutex::default(),
            published: Mutex::default(),
            failing_lookups: Mutex::default(),
            failing_installs: Mutex::default(),
            install_calls: Mutex::default(),
            uninstall_calls: Mutex::default(),
        }
    }

    pub fn seed_installed(&self, name: &str, versions: &[&str]) {
        for version in versions {
            self.materialise(name, version);
        }
    }

    pub fn publish(&self, name: &str, version: &str) {
        self.published
            .lock()
            .expect("lock")
            .insert(name.to_string(), version.to_string());
    }

    pub fn fail_lookups_of(&self, name: &str) {
        self.failing_lookups
            .lock()
            .expect("lock")
            .insert(name.to_string());
    }

    pub fn fail_installs_of(&self, name: &str) {
        self.failing_installs
            .lock()
            .expect("lock")
            .insert(name.to_string());
    }

    pub fn install_calls(&self) -> Vec<String> {
        self.install_calls.lock().expect("lock").clone()
    }

    pub fn uninstall_calls(&self) -> Vec<(String, String)> {
        self.uninstall_calls.lock().expect("lock").clone()
    }

    pub fn version_path(&self, name: &str, version: &str) -> PathBuf {
        self.primary_root.join(name).join(version)
    }

    fn materialise(&self, name: &str, version: &str) {
        let dir = self.version_path(name, version);
        std::fs::create_dir_all(&dir).expect("create module dir");
        std::fs::write(
            dir.join(format!("{name}.psd1")),
            format!("@{{ ModuleVersion = '{version}' }}"),
        )
        .expect("write manifest");
        let mut installed = self.installed.lock().expect("lock");
        let versions = installed.entry(name.to_string()).or_default();
        if !versions.iter().any(|existing| existing == version) {
            versions.push(version.to_string());
        }
    }
}

#[async_trait]
impl RegistryClient for FakeRegistry {
    async fn find_latest(&self, name: &str) -> Result<Option<RemoteVersionInfo>> {
        if self.failing_lookups.lock().expect("lock").contains(name) {
            return Err(SynmodError::Network(format!("lookup of {name} timed out")));
        }
        let published = self.published.lock().expect("lock").get(name).cloned();
        match published {
            Some(raw) => Ok(Some(RemoteVersionInfo {
                package: name.to_string(),
                version: raw.parse()?,
            })),
            None => Ok(None),
        }
    }

    async fn install_or_update(&self, name: &str, _scope: InstallScope) -> Result<()> {
        self.install_calls
            .lock()
            .expect("lock")
            .push(name.to_string());
        if self.failing_installs.lock().expect("lock").contains(name) {
            return Err(SynmodError::CommandFailure {
                command: format!("Install-Module {name}"),
                status: 1,
                stderr: "access denied".into(),
            });
        }
        let published = self.published.lock().expect("lock").get(name).cloned();
        match published {
            Some(version) => {
                self.materialise(name, &version);
                Ok(())
            }
            None => Err(SynmodError::CommandFailure {
                command: format!("Install-Module {name}"),
                status: 1,
                stderr: "No match was found".into(),
            }),
        }
    }

    async fn list_installed(
        &self,
        name: &str,
        all_versions: bool,
    ) -> Result<Vec<InstalledVersionRecord>> {
        let versions = self
            .installed
            .lock()
            .expect("lock")
            .get(name)
            .cloned()
            .unwrap_or_default();
        let mut records: Vec<InstalledVersionRecord> = versions
            .iter()
            .filter_map(|raw| {
                let version = raw.parse::<ModuleVersion>().ok()?;
                Some(InstalledVersionRecord {
                    package: name.to_string(),
                    environment: EnvironmentId::Primary,
                    version,
                    path: Some(self.version_path(name, raw)),
                })
            })
            .collect();
        records.sort_by(|a, b| a.version.cmp(&b.version));
        if !all_versions {
            records = records.pop().into_iter().collect();
        }
        Ok(records)
    }

    async fn uninstall(&self, name: &str, version: &ModuleVersion) -> Result<()> {
        self.uninstall_calls
            .lock()
            .expect("lock")
            .push((name.to_string(), version.to_string()));
        if let Some(versions) = self.installed.lock().expect("lock").get_mut(name) {
            versions.retain(|existing| existing != version.as_str());
        }
        Ok(())
    }
}

/// Real filesystem that counts mutating calls.
#[derive(Default)]
pub struct CountingFilesystem {
    copies: AtomicUsize,
    removals: AtomicUsize,
    fail_copies: bool,
}

impl CountingFilesystem {
    pub fn failing_copies() -> Self {
        Self {
            fail_copies: true,
            ..Self::default()
        }
    }

    pub fn writes(&self) -> usize {
        self.copies.load(Ordering::SeqCst) + self.removals.load(Ordering::SeqCst)
    }
}

impl ModuleFilesystem for CountingFilesystem {
    fn exists(&self, path: &Path) -> bool {
        LocalFilesystem.exists(path)
    }

    fn list_version_directories(
        &self,
        root: &Path,
        package: &str,
    ) -> Result<Vec<VersionDirectory>> {
        LocalFilesystem.list_version_directories(root, package)
    }

    fn copy_tree(&self, source: &Path, destination: &Path) -> Result<()> {
        self.copies.fetch_add(1, Ordering::SeqCst);
        if self.fail_copies {
            return Err(SynmodError::Filesystem(format!(
                "No space left copying {}",
                source.display()
            )));
        }
        LocalFilesystem.copy_tree(source, destination)
    }

    fn remove_tree(&self, path: &Path) -> Result<()> {
        self.removals.fetch_add(1, Ordering::SeqCst);
        LocalFilesystem.remove_tree(path)
    }
}

/// Launcher double that records batches instead of spawning.
pub struct RecordingLauncher {
    exit_code: i32,
    failed_removals: usize,
    batches: Mutex<Vec<CommandBatch>>,
}

impl RecordingLauncher {
    pub fn exiting_with(exit_code: i32) -> Self {
        Self {
            exit_code,
            failed_removals: 0,
            batches: Mutex::default(),
        }
    }

    /// Report `count` removals as failed in the acknowledgment.
    pub fn failing_removals(mut self, count: usize) -> Self {
        self.failed_removals = count;
        self
    }

    pub fn launches(&self) -> usize {
        self.batches.lock().expect("lock").len()
    }

    pub fn batches(&self) -> Vec<CommandBatch> {
        self.batches.lock().expect("lock").clone()
    }
}

#[async_trait]
impl ProcessLauncher for RecordingLauncher {
    type Handle = SweepSummary;

    async fn launch_detached(&self, batch: &CommandBatch) -> Result<SweepSummary> {
        self.batches.lock().expect("lock").push(batch.clone());
        Ok(SweepSummary {
            attempted: batch.directive_count(),
            failed: self.failed_removals,
        })
    }

    async fn wait_for_exit(&self, summary: SweepSummary) -> Result<ExitReport> {
        Ok(ExitReport {
            exit_code: Some(self.exit_code),
            acknowledgment: Some(summary),
        })
    }
}
