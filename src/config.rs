/*============================================================
  Synavera Project: Syn-Mod
  Module: synmod_core::config
  Etiquette: Synavera Script Etiquette — Rust Profile v1.1.1
  ------------------------------------------------------------
  Purpose:
    Load operator configuration: environment roots, managed and
    legacy package lists, shell and feed settings, and output
    locations.

  Security / Safety Notes:
    Configuration is read from operator-controlled paths only.
    No values are written back.

  Dependencies:
    toml + serde for parsing, dirs for platform directories.

  Operational Scope:
    Consulted once at startup by the orchestrator and again by
    the detached sweep worker.

  Revision History:
    2025-11-12 COD  Authored configuration layer.
  ------------------------------------------------------------
  SSE Principles Observed:
    - Explicit defaults, explicit overrides
    - Fatal only when an environment root cannot be determined
============================================================*/

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, SynmodError};

const APP_DIR: &str = "syn-mod";

/// Top-level configuration document.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SynmodConfig {
    pub environments: EnvironmentConfig,
    pub packages: PackageConfig,
    pub shell: ShellConfig,
    pub feed: FeedConfig,
    pub cleanup: CleanupConfig,
    pub paths: PathConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EnvironmentConfig {
    /// Authoritative module root (PowerShell 7 on Windows).
    pub primary_root: Option<PathBuf>,
    /// Module root kept in step with the primary one.
    pub secondary_root: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PackageConfig {
    pub managed: Vec<String>,
    /// Superseded packages kept only so their old versions get swept.
    pub legacy: Vec<String>,
    pub install_scope: InstallScope,
}

impl Default for PackageConfig {
    fn default() -> Self {
        Self {
            managed: ["Az", "Microsoft.Graph", "ExchangeOnlineManagement", "PnP.PowerShell"]
                .iter()
                .map(|name| name.to_string())
                .collect(),
            legacy: ["AzureRM", "AzureAD", "MSOnline"]
                .iter()
                .map(|name| name.to_string())
                .collect(),
            install_scope: InstallScope::AllUsers,
        }
    }
}

/// Install scope handed to the registry client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
pub enum InstallScope {
    #[default]
    AllUsers,
    CurrentUser,
}

impl fmt::Display for InstallScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstallScope::AllUsers => f.write_str("AllUsers"),
            InstallScope::CurrentUser => f.write_str("CurrentUser"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ShellConfig {
    pub program: String,
    pub repository: String,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            program: "pwsh".into(),
            repository: "PSGallery".into(),
        }
    }
}

/// Optional NuGet v3 flat-container feed used for latest-version lookups.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    pub url: Option<String>,
    pub timeout: u64,
    pub max_retries: usize,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout: 20,
            max_retries: 3,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CleanupConfig {
    pub staging_dir: Option<PathBuf>,
    /// Upper bound on the wait for the sweep process. Unset waits forever.
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PathConfig {
    pub log_dir: Option<PathBuf>,
    pub report_path: Option<PathBuf>,
}

/// The two module roots, resolved and validated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentRoots {
    pub primary: PathBuf,
    pub secondary: PathBuf,
}

impl SynmodConfig {
    /// Load from an explicit path, or the default location when absent.
    ///
    /// An explicit path that does not exist is an error; a missing
    /// default file silently yields defaults.
    pub fn load_from_optional_path(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(explicit) => Self::load_from_path(explicit),
            None => match default_config_path() {
                Some(candidate) if candidate.is_file() => Self::load_from_path(&candidate),
                _ => Ok(Self::default()),
            },
        }
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|err| {
            SynmodError::Config(format!(
                "Failed to read configuration {}: {err}",
                path.display()
            ))
        })?;
        Self::parse(&raw).map_err(|err| match err {
            SynmodError::Config(msg) => {
                SynmodError::Config(format!("{} ({})", msg, path.display()))
            }
            other => other,
        })
    }

    pub fn parse(raw: &str) -> Result<Self> {
        toml::from_str(raw)
            .map_err(|err| SynmodError::Config(format!("Invalid configuration: {err}")))
    }

    /// Resolve both environment roots, falling back to platform defaults.
    pub fn environment_roots(&self) -> Result<EnvironmentRoots> {
        let primary = self
            .environments
            .primary_root
            .clone()
            .or_else(default_primary_root)
            .ok_or_else(|| {
                SynmodError::Config("Unable to determine primary module root".into())
            })?;
        let secondary = self
            .environments
            .secondary_root
            .clone()
            .or_else(default_secondary_root)
            .ok_or_else(|| {
                SynmodError::Config("Unable to determine secondary module root".into())
            })?;
        if primary == secondary {
            return Err(SynmodError::Config(format!(
                "Primary and secondary module roots are identical: {}",
                primary.display()
            )));
        }
        Ok(EnvironmentRoots { primary, secondary })
    }

    pub fn log_dir(&self) -> PathBuf {
        self.paths
            .log_dir
            .clone()
            .unwrap_or_else(|| app_data_dir().join("logs"))
    }

    pub fn report_path(&self) -> PathBuf {
        self.paths
            .report_path
            .clone()
            .unwrap_or_else(|| app_data_dir().join("report.json"))
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.cleanup
            .staging_dir
            .clone()
            .unwrap_or_else(|| app_data_dir().join("batches"))
    }
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(APP_DIR).join("config.toml"))
}

fn app_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(APP_DIR)
}

#[cfg(windows)]
fn default_primary_root() -> Option<PathBuf> {
    std::env::var_os("ProgramFiles")
        .map(|dir| PathBuf::from(dir).join("PowerShell").join("Modules"))
}

#[cfg(windows)]
fn default_secondary_root() -> Option<PathBuf> {
    std::env::var_os("ProgramFiles")
        .map(|dir| PathBuf::from(dir).join("WindowsPowerShell").join("Modules"))
}

#[cfg(not(windows))]
fn default_primary_root() -> Option<PathBuf> {
    None
}

#[cfg(not(windows))]
fn default_secondary_root() -> Option<PathBuf> {
    None
}
