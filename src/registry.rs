/*============================================================
  Synavera Project: Syn-Mod
  Module: synmod_core::registry
  Etiquette: Synavera Script Etiquette — Rust Profile v1.1.1
  ------------------------------------------------------------
  Purpose:
    Interface with PowerShellGet to look up latest versions,
    install or update modules, enumerate registered versions,
    and uninstall specific versions.

  Security / Safety Notes:
    Executes the configured PowerShell host with user-supplied
    privileges only; no elevation is attempted. Every argument
    embedded in a script is single-quote escaped.

  Dependencies:
    tokio::process for async command execution, async-trait for
    the collaborator seam.

  Operational Scope:
    Supplies the resolver and scanner with registration data and
    the sweep worker with uninstall capability.

  Revision History:
    2025-11-12 COD  Crafted PowerShellGet integration layer.
  ------------------------------------------------------------
  SSE Principles Observed:
    - Deterministic command invocation with explicit checks
    - Structured parsing with clear failure modes
============================================================*/

use std::io;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

use crate::config::{InstallScope, SynmodConfig};
use crate::environment::{EnvironmentId, InstalledVersionRecord};
use crate::error::{Result, SynmodError};
use crate::feed::FeedClient;
use crate::version::ModuleVersion;

/// Exit status our lookup script uses to signal "no such package".
const NOT_FOUND_STATUS: i32 = 3;

/// Latest published version of a package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteVersionInfo {
    pub package: String,
    pub version: ModuleVersion,
}

/// Registry operations consumed by the engine.
#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// `Ok(None)` when the registry has no such package; `Err` when the
    /// lookup itself failed.
    async fn find_latest(&self, name: &str) -> Result<Option<RemoteVersionInfo>>;

    async fn install_or_update(&self, name: &str, scope: InstallScope) -> Result<()>;

    async fn list_installed(
        &self,
        name: &str,
        all_versions: bool,
    ) -> Result<Vec<InstalledVersionRecord>>;

    async fn uninstall(&self, name: &str, version: &ModuleVersion) -> Result<()>;
}

/// Registry client backed by a PowerShell host running PowerShellGet.
pub struct PowerShellGetClient {
    program: String,
    repository: String,
    feed: Option<FeedClient>,
}

impl PowerShellGetClient {
    pub fn new(config: &SynmodConfig) -> Result<Self> {
        let feed = match config.feed.url.as_deref() {
            Some(url) if !url.trim().is_empty() => Some(FeedClient::new(url, &config.feed)?),
            _ => None,
        };
        Ok(Self {
            program: config.shell.program.clone(),
            repository: config.shell.repository.clone(),
            feed,
        })
    }

    async fn run_script(&self, script: &str) -> Result<ScriptOutput> {
        let output = Command::new(&self.program)
            .args(["-NoProfile", "-NonInteractive", "-Command", script])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|err| map_spawn_error(err, &self.program))?;

        let stdout = String::from_utf8(output.stdout).map_err(|err| {
            SynmodError::Serialization(format!("{} emitted invalid UTF-8: {err}", self.program))
        })?;
        Ok(ScriptOutput {
            status: output.status.code().unwrap_or(-1),
            stdout,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }

    fn failure(&self, summary: String, output: ScriptOutput) -> SynmodError {
        SynmodError::CommandFailure {
            command: format!("{} -Command {summary}", self.program),
            status: output.status,
            stderr: output.stderr,
        }
    }
}

struct ScriptOutput {
    status: i32,
    stdout: String,
    stderr: String,
}

#[async_trait]
impl RegistryClient for PowerShellGetClient {
    async fn find_latest(&self, name: &str) -> Result<Option<RemoteVersionInfo>> {
        if let Some(feed) = &self.feed {
            return feed.find_latest(name).await;
        }

        let output = self
            .run_script(&find_module_script(name, &self.repository))
            .await?;
        if output.status == NOT_FOUND_STATUS {
            return Ok(None);
        }
        if output.status != 0 {
            return Err(self.failure(format!("Find-Module {name}"), output));
        }
        let text = output.stdout.trim();
        if text.is_empty() {
            return Ok(None);
        }
        let version = text.lines().last().unwrap_or(text).parse()?;
        Ok(Some(RemoteVersionInfo {
            package: name.to_string(),
            version,
        }))
    }

    async fn install_or_update(&self, name: &str, scope: InstallScope) -> Result<()> {
        let output = self
            .run_script(&install_module_script(name, &self.repository, scope))
            .await?;
        if output.status != 0 {
            return Err(self.failure(format!("Install-Module {name}"), output));
        }
        Ok(())
    }

    async fn list_installed(
        &self,
        name: &str,
        all_versions: bool,
    ) -> Result<Vec<InstalledVersionRecord>> {
        let output = self
            .run_script(&installed_module_script(name, all_versions))
            .await?;
        if output.status != 0 {
            return Err(self.failure(format!("Get-InstalledModule {name}"), output));
        }
        Ok(parse_installed_listing(name, &output.stdout))
    }

    async fn uninstall(&self, name: &str, version: &ModuleVersion) -> Result<()> {
        let output = self
            .run_script(&uninstall_module_script(name, version))
            .await?;
        if output.status != 0 {
            return Err(self.failure(format!("Uninstall-Module {name} {version}"), output));
        }
        Ok(())
    }
}

/// Quote a value as a PowerShell single-quoted literal.
pub fn ps_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn find_module_script(name: &str, repository: &str) -> String {
    format!(
        "try {{ (Find-Module -Name {} -Repository {} -ErrorAction Stop).Version.ToString() }} \
         catch {{ if ($_.FullyQualifiedErrorId -like 'NoMatchFoundForCriteria*') {{ exit {NOT_FOUND_STATUS} }} else {{ throw }} }}",
        ps_quote(name),
        ps_quote(repository)
    )
}

fn install_module_script(name: &str, repository: &str, scope: InstallScope) -> String {
    format!(
        "Install-Module -Name {} -Repository {} -Scope {scope} -Force -AllowClobber -ErrorAction Stop",
        ps_quote(name),
        ps_quote(repository)
    )
}

fn installed_module_script(name: &str, all_versions: bool) -> String {
    let all = if all_versions { " -AllVersions" } else { "" };
    format!(
        "Get-InstalledModule -Name {}{all} -ErrorAction SilentlyContinue | \
         ForEach-Object {{ '{{0}}|{{1}}' -f $_.Version, $_.InstalledLocation }}",
        ps_quote(name)
    )
}

/// PowerShell statement that removes one registered version, errors suppressed.
pub fn uninstall_module_script(name: &str, version: &ModuleVersion) -> String {
    format!(
        "Uninstall-Module -Name {} -RequiredVersion {} -Force -ErrorAction SilentlyContinue",
        ps_quote(name),
        ps_quote(version.as_str())
    )
}

/// Parse `version|location` lines emitted by the listing script.
///
/// Lines whose version cannot be parsed are skipped.
pub fn parse_installed_listing(name: &str, stdout: &str) -> Vec<InstalledVersionRecord> {
    let mut records = Vec::new();
    for line in stdout.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let (raw_version, raw_path) = line.split_once('|').unwrap_or((line, ""));
        let Ok(version) = raw_version.parse::<ModuleVersion>() else {
            continue;
        };
        let path = raw_path.trim();
        records.push(InstalledVersionRecord {
            package: name.to_string(),
            environment: EnvironmentId::Primary,
            version,
            path: (!path.is_empty()).then(|| path.into()),
        });
    }
    records.sort_by(|a, b| a.version.cmp(&b.version));
    records
}

pub(crate) fn map_spawn_error(err: io::Error, command: &str) -> SynmodError {
    if err.kind() == io::ErrorKind::NotFound {
        SynmodError::CommandMissing {
            command: command.into(),
        }
    } else {
        SynmodError::Runtime(format!("Failed to spawn {command}: {err}"))
    }
}
