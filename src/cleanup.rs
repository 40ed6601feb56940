/*============================================================
  Synavera Project: Syn-Mod
  Module: synmod_core::cleanup
  Etiquette: Synavera Script Etiquette — Rust Profile v1.1.1
  ------------------------------------------------------------
  Purpose:
    Accumulate stale-version removal directives across a run and
    execute them once, in a detached process that holds none of
    this process's open handles.

  Security / Safety Notes:
    The sweep process is this same executable re-launched with
    the hidden `sweep` subcommand; it receives its work through
    a JSON batch file in the staging directory and nothing else.
    Resolved versions are protected and can never be queued.

  Dependencies:
    serde_json for the batch payload, tokio::process for the
    launch/wait, libc for session detachment on Unix.

  Operational Scope:
    Phase 3 of a reconciliation run, plus the worker side that
    performs the removals.

  Revision History:
    2025-11-12 COD  Authored deferred cleanup executor and sweep worker.
  ------------------------------------------------------------
  SSE Principles Observed:
    - Removals are idempotent and best-effort
    - Single hard barrier: the caller blocks until the sweep exits
    - Cleanup failure is reported, never escalated
============================================================*/

use std::collections::BTreeSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::process::{Child, Command};

use crate::environment::ModuleFilesystem;
use crate::error::{Result, SynmodError};
use crate::logger::Logger;
use crate::registry::{map_spawn_error, RegistryClient};
use crate::version::ModuleVersion;

/// Prefix of the line the sweep worker prints as its final step.
pub const ACK_PREFIX: &str = "SWEEP-ACK";

/// One idempotent removal instruction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum CleanupDirective {
    RemoveDirectory {
        package: String,
        version: String,
        path: PathBuf,
    },
    Uninstall {
        package: String,
        version: String,
    },
}

impl CleanupDirective {
    pub fn package(&self) -> &str {
        match self {
            CleanupDirective::RemoveDirectory { package, .. }
            | CleanupDirective::Uninstall { package, .. } => package,
        }
    }

    pub fn version(&self) -> &str {
        match self {
            CleanupDirective::RemoveDirectory { version, .. }
            | CleanupDirective::Uninstall { version, .. } => version,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            CleanupDirective::RemoveDirectory { path, .. } => {
                format!("remove directory {}", path.display())
            }
            CleanupDirective::Uninstall { package, version } => {
                format!("uninstall {package} {version}")
            }
        }
    }
}

#[derive(Debug, Clone)]
struct ProtectedTarget {
    package: String,
    version: ModuleVersion,
    path: Option<PathBuf>,
}

impl ProtectedTarget {
    fn covers(&self, directive: &CleanupDirective) -> bool {
        if !self.package.eq_ignore_ascii_case(directive.package()) {
            return false;
        }
        let same_version = directive
            .version()
            .parse::<ModuleVersion>()
            .map(|version| version == self.version)
            .unwrap_or(false);
        let same_path = match (directive, &self.path) {
            (CleanupDirective::RemoveDirectory { path, .. }, Some(protected)) => path == protected,
            _ => false,
        };
        same_version || same_path
    }
}

/// Result of offering a directive to the pending set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Added,
    Duplicate,
    Protected,
}

/// Unique removal directives accumulated across all packages.
#[derive(Debug, Default)]
pub struct PendingCleanupSet {
    directives: BTreeSet<CleanupDirective>,
    protected: Vec<ProtectedTarget>,
}

impl PendingCleanupSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a package's current version as untouchable.
    ///
    /// Directives already queued for it are evicted; later ones are refused.
    pub fn protect(&mut self, package: &str, version: &ModuleVersion, path: Option<&Path>) {
        let target = ProtectedTarget {
            package: package.to_string(),
            version: version.clone(),
            path: path.map(Path::to_path_buf),
        };
        self.directives.retain(|directive| !target.covers(directive));
        self.protected.push(target);
    }

    pub fn insert(&mut self, directive: CleanupDirective) -> InsertOutcome {
        if self.protected.iter().any(|target| target.covers(&directive)) {
            return InsertOutcome::Protected;
        }
        if self.directives.insert(directive) {
            InsertOutcome::Added
        } else {
            InsertOutcome::Duplicate
        }
    }

    pub fn len(&self) -> usize {
        self.directives.len()
    }

    pub fn is_empty(&self) -> bool {
        self.directives.is_empty()
    }

    #[cfg(test)]
    pub fn iter(&self) -> impl Iterator<Item = &CleanupDirective> {
        self.directives.iter()
    }
}

/// One step of the serialized sweep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchStep {
    Remove(CleanupDirective),
    Acknowledge,
}

/// The whole pending set, serialized for the sweep process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandBatch {
    pub created_at: String,
    pub steps: Vec<BatchStep>,
}

impl CommandBatch {
    /// `None` when there is nothing to remove.
    pub fn from_set(set: PendingCleanupSet) -> Option<Self> {
        if set.is_empty() {
            return None;
        }
        let mut steps: Vec<BatchStep> = set.directives.into_iter().map(BatchStep::Remove).collect();
        steps.push(BatchStep::Acknowledge);
        Some(Self {
            created_at: Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string(),
            steps,
        })
    }

    pub fn directive_count(&self) -> usize {
        self.steps
            .iter()
            .filter(|step| matches!(step, BatchStep::Remove(_)))
            .count()
    }

    pub fn write_to(&self, path: &Path) -> Result<()> {
        let payload = serde_json::to_vec_pretty(self).map_err(|err| {
            SynmodError::Serialization(format!("Failed to encode cleanup batch: {err}"))
        })?;
        std::fs::write(path, payload).map_err(|err| {
            SynmodError::Filesystem(format!(
                "Failed to write cleanup batch {}: {err}",
                path.display()
            ))
        })
    }

    pub fn read_from(path: &Path) -> Result<Self> {
        let raw = std::fs::read(path).map_err(|err| {
            SynmodError::Filesystem(format!(
                "Failed to read cleanup batch {}: {err}",
                path.display()
            ))
        })?;
        serde_json::from_slice(&raw).map_err(|err| {
            SynmodError::Serialization(format!(
                "Failed to decode cleanup batch {}: {err}",
                path.display()
            ))
        })
    }
}

/// What the sweep process reported on exit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitReport {
    pub exit_code: Option<i32>,
    /// Counters from the worker's acknowledgment line, if one was printed.
    pub acknowledgment: Option<SweepSummary>,
}

/// Launches a batch in an independent OS process and waits on it.
#[async_trait]
pub trait ProcessLauncher: Send + Sync {
    type Handle: Send;

    async fn launch_detached(&self, batch: &CommandBatch) -> Result<Self::Handle>;

    async fn wait_for_exit(&self, handle: Self::Handle) -> Result<ExitReport>;
}

/// Re-launches the current executable as a detached sweep worker.
pub struct DetachedLauncher {
    program: PathBuf,
    config_path: Option<PathBuf>,
    log_path: Option<PathBuf>,
    staging_dir: PathBuf,
}

pub struct DetachedHandle {
    child: Child,
    batch_path: PathBuf,
}

impl DetachedLauncher {
    pub fn new(program: PathBuf, config_path: Option<PathBuf>, staging_dir: PathBuf) -> Self {
        Self {
            program,
            config_path,
            log_path: None,
            staging_dir,
        }
    }

    /// Have the worker log to `path`; its stderr is discarded.
    pub fn with_log(mut self, path: PathBuf) -> Self {
        self.log_path = Some(path);
        self
    }

    /// Launcher targeting the running executable.
    pub fn for_current_exe(config_path: Option<PathBuf>, staging_dir: PathBuf) -> Result<Self> {
        let program = std::env::current_exe().map_err(|err| {
            SynmodError::Runtime(format!("Unable to locate current executable: {err}"))
        })?;
        Ok(Self::new(program, config_path, staging_dir))
    }

    fn batch_path(&self) -> PathBuf {
        let stamp = Utc::now().format("%Y-%m-%d_%H-%M-%S");
        self.staging_dir
            .join(format!("sweep_{stamp}_{}.json", std::process::id()))
    }
}

#[async_trait]
impl ProcessLauncher for DetachedLauncher {
    type Handle = DetachedHandle;

    async fn launch_detached(&self, batch: &CommandBatch) -> Result<DetachedHandle> {
        std::fs::create_dir_all(&self.staging_dir).map_err(|err| {
            SynmodError::Filesystem(format!(
                "Failed to create staging directory {}: {err}",
                self.staging_dir.display()
            ))
        })?;
        let batch_path = self.batch_path();
        batch.write_to(&batch_path)?;

        let mut command = Command::new(&self.program);
        if let Some(config) = &self.config_path {
            command.arg("--config").arg(config);
        }
        if let Some(log) = &self.log_path {
            command.arg("--log").arg(log);
        }
        command
            .arg("sweep")
            .arg("--batch")
            .arg(&batch_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(false);
        detach(&mut command);

        let program = self.program.display().to_string();
        let child = match command.spawn() {
            Ok(child) => child,
            Err(err) => {
                let _ = std::fs::remove_file(&batch_path);
                return Err(map_spawn_error(err, &program));
            }
        };
        Ok(DetachedHandle { child, batch_path })
    }

    async fn wait_for_exit(&self, handle: DetachedHandle) -> Result<ExitReport> {
        let DetachedHandle { child, batch_path } = handle;
        let output = child.wait_with_output().await.map_err(|err| {
            SynmodError::Runtime(format!("Failed waiting on sweep process: {err}"))
        })?;
        // The worker removes its own batch; this only catches crashed workers.
        let _ = std::fs::remove_file(&batch_path);
        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(ExitReport {
            exit_code: output.status.code(),
            acknowledgment: stdout.lines().find_map(parse_ack),
        })
    }
}

#[cfg(unix)]
fn detach(command: &mut Command) {
    // SAFETY: setsid is async-signal-safe and touches no parent state.
    unsafe {
        command.pre_exec(|| {
            if libc::setsid() == -1 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(())
        });
    }
}

#[cfg(windows)]
fn detach(command: &mut Command) {
    const DETACHED_PROCESS: u32 = 0x0000_0008;
    const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
    command.creation_flags(DETACHED_PROCESS | CREATE_NEW_PROCESS_GROUP);
}

#[cfg(not(any(unix, windows)))]
fn detach(_command: &mut Command) {}

/// Parse `SWEEP-ACK <attempted> <failed>`.
fn parse_ack(line: &str) -> Option<SweepSummary> {
    let mut fields = line.split_whitespace();
    if fields.next()? != ACK_PREFIX {
        return None;
    }
    let attempted = fields.next()?.parse().ok()?;
    let failed = fields.next()?.parse().ok()?;
    Some(SweepSummary { attempted, failed })
}

/// Executor lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorState {
    Idle,
    Batched,
    Launched,
    Completed,
}

/// Final cleanup result for the report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CleanupOutcome {
    /// Nothing was pending; no process was launched.
    Skipped,
    /// The sweep ran to its acknowledgment. `failed` targets were left
    /// in place and are picked up again by the next run.
    Succeeded {
        directives: usize,
        failed: usize,
        exit_code: i32,
    },
    Failed {
        directives: usize,
        exit_code: Option<i32>,
        reason: String,
    },
}

pub struct DeferredCleanupExecutor<'a, L: ProcessLauncher> {
    launcher: &'a L,
    logger: &'a Logger,
    timeout: Option<Duration>,
    state: ExecutorState,
}

impl<'a, L: ProcessLauncher> DeferredCleanupExecutor<'a, L> {
    pub fn new(launcher: &'a L, logger: &'a Logger, timeout: Option<Duration>) -> Self {
        Self {
            launcher,
            logger,
            timeout,
            state: ExecutorState::Idle,
        }
    }

    #[cfg(test)]
    pub fn state(&self) -> ExecutorState {
        self.state
    }

    fn transition(&mut self, next: ExecutorState) {
        self.logger
            .debug("CLEANUP", format!("executor {:?} -> {next:?}", self.state));
        self.state = next;
    }

    /// Run the whole pending set once and block until the sweep exits.
    pub async fn execute(&mut self, set: PendingCleanupSet) -> CleanupOutcome {
        let Some(batch) = CommandBatch::from_set(set) else {
            self.transition(ExecutorState::Completed);
            self.logger.info("CLEANUP", "No stale versions pending");
            return CleanupOutcome::Skipped;
        };
        let directives = batch.directive_count();
        self.transition(ExecutorState::Batched);
        for step in &batch.steps {
            if let BatchStep::Remove(directive) = step {
                self.logger.debug("CLEANUP", directive.describe());
            }
        }

        let handle = match self.launcher.launch_detached(&batch).await {
            Ok(handle) => handle,
            Err(err) => {
                self.transition(ExecutorState::Completed);
                self.logger
                    .warn("CLEANUP", format!("Sweep process failed to launch: {err}"));
                return CleanupOutcome::Failed {
                    directives,
                    exit_code: None,
                    reason: err.to_string(),
                };
            }
        };
        self.transition(ExecutorState::Launched);
        self.logger.info(
            "CLEANUP",
            format!("Sweep launched with {directives} directive(s); waiting for exit"),
        );

        let waited = match self.timeout {
            Some(limit) => {
                match tokio::time::timeout(limit, self.launcher.wait_for_exit(handle)).await {
                    Ok(result) => result,
                    Err(_) => Err(SynmodError::Runtime(format!(
                        "Sweep did not exit within {}s",
                        limit.as_secs()
                    ))),
                }
            }
            None => self.launcher.wait_for_exit(handle).await,
        };
        self.transition(ExecutorState::Completed);

        let outcome = match waited {
            Ok(ExitReport {
                exit_code: Some(0),
                acknowledgment: Some(summary),
            }) => CleanupOutcome::Succeeded {
                directives,
                failed: summary.failed,
                exit_code: 0,
            },
            Ok(ExitReport {
                exit_code,
                acknowledgment,
            }) => CleanupOutcome::Failed {
                directives,
                exit_code,
                reason: if acknowledgment.is_some() {
                    "sweep exited abnormally".into()
                } else {
                    "sweep exited without acknowledgment".into()
                },
            },
            Err(err) => CleanupOutcome::Failed {
                directives,
                exit_code: None,
                reason: err.to_string(),
            },
        };
        match &outcome {
            CleanupOutcome::Failed { reason, .. } => {
                self.logger.warn("CLEANUP", format!("Sweep failed: {reason}"))
            }
            CleanupOutcome::Succeeded { failed, .. } if *failed > 0 => self.logger.warn(
                "CLEANUP",
                format!("Sweep completed; {failed} target(s) could not be removed"),
            ),
            _ => self.logger.info("CLEANUP", "Sweep completed"),
        }
        outcome
    }
}

/// Counters from the worker side of a sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepSummary {
    pub attempted: usize,
    pub failed: usize,
}

/// Worker side: execute every step best-effort, then acknowledge.
///
/// Failures are logged and counted but never stop the sweep; a target
/// still locked today is picked up again by the next run.
pub async fn run_sweep<R, F, W>(
    batch: &CommandBatch,
    registry: &R,
    filesystem: &F,
    logger: &Logger,
    out: &mut W,
) -> SweepSummary
where
    R: RegistryClient,
    F: ModuleFilesystem,
    W: Write,
{
    let mut summary = SweepSummary::default();
    for step in &batch.steps {
        match step {
            BatchStep::Remove(directive) => {
                summary.attempted += 1;
                if let Err(err) = apply_directive(directive, registry, filesystem).await {
                    summary.failed += 1;
                    logger.warn("SWEEP", format!("{} skipped: {err}", directive.describe()));
                }
            }
            BatchStep::Acknowledge => {
                let _ = writeln!(
                    out,
                    "{ACK_PREFIX} {} {}",
                    summary.attempted, summary.failed
                );
                let _ = out.flush();
            }
        }
    }
    summary
}

async fn apply_directive<R, F>(
    directive: &CleanupDirective,
    registry: &R,
    filesystem: &F,
) -> Result<()>
where
    R: RegistryClient,
    F: ModuleFilesystem,
{
    match directive {
        CleanupDirective::RemoveDirectory { path, .. } => filesystem.remove_tree(path),
        CleanupDirective::Uninstall { package, version } => {
            let version: ModuleVersion = version.parse()?;
            registry.uninstall(package, &version).await
        }
    }
}
