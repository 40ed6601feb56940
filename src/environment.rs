/*============================================================
  Synavera Project: Syn-Mod
  Module: synmod_core::environment
  Etiquette: Synavera Script Etiquette — Rust Profile v1.1.1
  ------------------------------------------------------------
  Purpose:
    Describe the two installation environments and provide the
    filesystem operations the engine needs against them: listing
    version directories, copying a version tree, removing one.

  Security / Safety Notes:
    Copies and removals are confined to paths derived from the
    configured module roots. Symlinks are copied as links when
    the platform allows, never followed out of the tree.

  Dependencies:
    std::fs only.

  Operational Scope:
    Used by the synchronizer and scanner in-process, and by the
    detached sweep worker for directory removal.

  Revision History:
    2025-11-12 COD  Authored environment layout and filesystem seam.
  ------------------------------------------------------------
  SSE Principles Observed:
    - Narrow trait at the I/O boundary
    - Missing roots are empty, not errors
============================================================*/

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::config::EnvironmentRoots;
use crate::error::{Result, SynmodError};
use crate::version::ModuleVersion;

/// Which of the two installation environments a record belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnvironmentId {
    Primary,
    Secondary,
}

impl fmt::Display for EnvironmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnvironmentId::Primary => f.write_str("primary"),
            EnvironmentId::Secondary => f.write_str("secondary"),
        }
    }
}

/// One installed version of a package in one environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledVersionRecord {
    pub package: String,
    pub environment: EnvironmentId,
    pub version: ModuleVersion,
    pub path: Option<PathBuf>,
}

/// A `<root>/<package>/<version>` directory found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionDirectory {
    pub name: String,
    pub path: PathBuf,
}

impl VersionDirectory {
    /// Parsed version, when the directory name is a version string.
    pub fn version(&self) -> Option<ModuleVersion> {
        self.name.parse().ok()
    }
}

/// Module root layout for both environments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentLayout {
    primary: PathBuf,
    secondary: PathBuf,
}

impl EnvironmentLayout {
    pub fn new(roots: EnvironmentRoots) -> Self {
        Self {
            primary: roots.primary,
            secondary: roots.secondary,
        }
    }

    pub fn root(&self, environment: EnvironmentId) -> &Path {
        match environment {
            EnvironmentId::Primary => &self.primary,
            EnvironmentId::Secondary => &self.secondary,
        }
    }

    pub fn package_dir(&self, environment: EnvironmentId, package: &str) -> PathBuf {
        self.root(environment).join(package)
    }

    pub fn version_dir(
        &self,
        environment: EnvironmentId,
        package: &str,
        version: &ModuleVersion,
    ) -> PathBuf {
        self.package_dir(environment, package).join(version.as_str())
    }
}

/// Filesystem operations required by the engine.
pub trait ModuleFilesystem {
    fn exists(&self, path: &Path) -> bool;

    /// List the immediate subdirectories of `<root>/<package>`.
    fn list_version_directories(&self, root: &Path, package: &str)
        -> Result<Vec<VersionDirectory>>;

    /// Copy `source` so that `destination` only ever appears complete.
    fn copy_tree(&self, source: &Path, destination: &Path) -> Result<()>;

    fn remove_tree(&self, path: &Path) -> Result<()>;
}

/// `std::fs` backed implementation.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFilesystem;

impl ModuleFilesystem for LocalFilesystem {
    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn list_version_directories(
        &self,
        root: &Path,
        package: &str,
    ) -> Result<Vec<VersionDirectory>> {
        let package_dir = root.join(package);
        let entries = match fs::read_dir(&package_dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(SynmodError::Filesystem(format!(
                    "Failed to list {}: {err}",
                    package_dir.display()
                )))
            }
        };

        let mut directories = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|err| {
                SynmodError::Filesystem(format!(
                    "Failed to read entry under {}: {err}",
                    package_dir.display()
                ))
            })?;
            let is_dir = entry.file_type().map(|kind| kind.is_dir()).unwrap_or(false);
            if !is_dir {
                continue;
            }
            directories.push(VersionDirectory {
                name: entry.file_name().to_string_lossy().into_owned(),
                path: entry.path(),
            });
        }
        directories.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(directories)
    }

    fn copy_tree(&self, source: &Path, destination: &Path) -> Result<()> {
        if !source.is_dir() {
            return Err(SynmodError::Filesystem(format!(
                "Copy source {} is not a directory",
                source.display()
            )));
        }
        let staging = staging_path(destination);
        if staging.exists() {
            fs::remove_dir_all(&staging).map_err(|err| {
                SynmodError::Filesystem(format!(
                    "Failed to clear stale staging copy {}: {err}",
                    staging.display()
                ))
            })?;
        }
        let copied = copy_dir_recursive(source, &staging)
            .and_then(|()| fs::rename(&staging, destination));
        copied.map_err(|err| {
            let _ = fs::remove_dir_all(&staging);
            SynmodError::Filesystem(format!(
                "Failed to copy {} to {}: {err}",
                source.display(),
                destination.display()
            ))
        })
    }

    fn remove_tree(&self, path: &Path) -> Result<()> {
        match fs::remove_dir_all(path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(SynmodError::Filesystem(format!(
                "Failed to remove {}: {err}",
                path.display()
            ))),
        }
    }
}

/// Sibling of `destination` that receives the copy until it is complete.
/// The leading dot keeps the name from ever parsing as a version.
fn staging_path(destination: &Path) -> PathBuf {
    let mut name = std::ffi::OsString::from(".");
    if let Some(final_name) = destination.file_name() {
        name.push(final_name);
    }
    name.push(".partial");
    destination.with_file_name(name)
}

fn copy_dir_recursive(source: &Path, destination: &Path) -> io::Result<()> {
    fs::create_dir_all(destination)?;
    for entry in fs::read_dir(source)? {
        let entry = entry?;
        let kind = entry.file_type()?;
        let target = destination.join(entry.file_name());
        if kind.is_dir() {
            copy_dir_recursive(&entry.path(), &target)?;
        } else if kind.is_symlink() {
            copy_symlink(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn copy_symlink(source: &Path, target: &Path) -> io::Result<()> {
    let link = fs::read_link(source)?;
    std::os::unix::fs::symlink(link, target)
}

#[cfg(not(unix))]
fn copy_symlink(source: &Path, target: &Path) -> io::Result<()> {
    // Link creation needs privileges on Windows; copy the referent instead.
    if source.is_dir() {
        copy_dir_recursive(source, target)
    } else {
        fs::copy(source, target).map(|_| ())
    }
}
