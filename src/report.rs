/*============================================================
  Synavera Project: Syn-Mod
  Module: synmod_core::report
  Etiquette: Synavera Script Etiquette — Rust Profile v1.1.1
  ------------------------------------------------------------
  Purpose:
    Join per-package resolution and synchronization outcomes
    with the cleanup result into one final report.

  Security / Safety Notes:
    Report data is written to operator-controlled paths; no
    privileged operations are performed.

  Dependencies:
    serde for JSON serialization.

  Operational Scope:
    Rendered at the end of every run, including partial-failure
    runs, as a JSON document and a console table.

  Revision History:
    2025-11-12 COD  Authored report aggregator.
  ------------------------------------------------------------
  SSE Principles Observed:
    - Deterministic ordering for reproducible reports
    - Unresolved packages are listed, never dropped
============================================================*/

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs::File;
use std::path::Path;

use chrono::{SecondsFormat, Utc};
use serde::Serialize;

use crate::cleanup::CleanupOutcome;
use crate::environment::{EnvironmentId, EnvironmentLayout};
use crate::error::{Result, SynmodError};
use crate::reconcile::PackageState;
use crate::resolver::{RemoteLookup, UpdateAction};
use crate::sync::SyncOutcome;

/// Marker rendered in place of a version for unresolved packages.
pub const UNRESOLVED: &str = "unresolved";

#[derive(Debug, Serialize)]
pub struct ReportDocument {
    pub metadata: ReportMetadata,
    pub packages: BTreeMap<String, FinalReportRow>,
}

#[derive(Debug, Serialize)]
pub struct ReportMetadata {
    pub generated_at: String,
    pub generated_by: String,
    pub primary_root: String,
    pub secondary_root: String,
    pub total_packages: usize,
    pub updated: usize,
    pub synchronized: usize,
    pub sync_failures: usize,
    pub unresolved: usize,
    pub cleanup: CleanupOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct FinalReportRow {
    pub resolved_version: String,
    pub installed_before: Option<String>,
    pub remote_version: Option<String>,
    pub primary_status: PrimaryStatus,
    pub secondary_status: SecondaryStatus,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PrimaryStatus {
    UpToDate,
    Installed,
    Updated,
    UpdateFailed,
    Unresolved,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SecondaryStatus {
    AlreadySynchronized,
    Synchronized,
    SyncFailed,
    NotAttempted,
}

impl PrimaryStatus {
    fn label(self) -> &'static str {
        match self {
            PrimaryStatus::UpToDate => "up-to-date",
            PrimaryStatus::Installed => "installed",
            PrimaryStatus::Updated => "updated",
            PrimaryStatus::UpdateFailed => "update-failed",
            PrimaryStatus::Unresolved => UNRESOLVED,
        }
    }
}

impl SecondaryStatus {
    fn label(self) -> &'static str {
        match self {
            SecondaryStatus::AlreadySynchronized => "in-sync",
            SecondaryStatus::Synchronized => "synchronized",
            SecondaryStatus::SyncFailed => "sync-failed",
            SecondaryStatus::NotAttempted => "not-attempted",
        }
    }
}

/// Build one row per managed package plus run-level metadata.
pub fn build_report(
    states: &[PackageState],
    cleanup: CleanupOutcome,
    layout: &EnvironmentLayout,
) -> ReportDocument {
    let mut packages = BTreeMap::new();
    let mut updated = 0usize;
    let mut synchronized = 0usize;
    let mut sync_failures = 0usize;
    let mut unresolved = 0usize;

    for state in states {
        let row = build_row(state);
        match row.primary_status {
            PrimaryStatus::Installed | PrimaryStatus::Updated => updated += 1,
            PrimaryStatus::Unresolved => unresolved += 1,
            _ => {}
        }
        match row.secondary_status {
            SecondaryStatus::Synchronized => synchronized += 1,
            SecondaryStatus::SyncFailed => sync_failures += 1,
            _ => {}
        }
        packages.insert(state.resolution.package.clone(), row);
    }

    let metadata = ReportMetadata {
        generated_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        generated_by: "synmod_core".to_string(),
        primary_root: layout.root(EnvironmentId::Primary).display().to_string(),
        secondary_root: layout.root(EnvironmentId::Secondary).display().to_string(),
        total_packages: states.len(),
        updated,
        synchronized,
        sync_failures,
        unresolved,
        cleanup,
    };

    ReportDocument { metadata, packages }
}

fn build_row(state: &PackageState) -> FinalReportRow {
    let resolution = &state.resolution;
    let installed_before = resolution.installed_before.as_ref().map(|v| v.to_string());
    let remote_version = match &resolution.remote {
        RemoteLookup::Found(version) => Some(version.to_string()),
        _ => None,
    };

    let mut notes: Vec<String> = Vec::new();
    if let RemoteLookup::Failed(reason) = &resolution.remote {
        notes.push(format!("remote lookup failed: {reason}"));
    }
    if let UpdateAction::Failed(reason) = &resolution.action {
        notes.push(format!("install failed: {reason}"));
    }

    let Some(resolved) = &state.resolved else {
        notes.extend(state.note.clone());
        return FinalReportRow {
            resolved_version: UNRESOLVED.to_string(),
            installed_before,
            remote_version,
            primary_status: PrimaryStatus::Unresolved,
            secondary_status: SecondaryStatus::NotAttempted,
            notes: join_notes(notes),
        };
    };

    let primary_status = match &resolution.action {
        UpdateAction::NotRequired => PrimaryStatus::UpToDate,
        UpdateAction::Failed(_) => PrimaryStatus::UpdateFailed,
        UpdateAction::Installed => match &resolution.installed_before {
            None => PrimaryStatus::Installed,
            Some(before) if *before == resolved.version => PrimaryStatus::UpToDate,
            Some(_) => PrimaryStatus::Updated,
        },
    };
    let secondary_status = match &state.sync {
        Some(SyncOutcome::AlreadySynchronized) => SecondaryStatus::AlreadySynchronized,
        Some(SyncOutcome::Synchronized) => SecondaryStatus::Synchronized,
        Some(SyncOutcome::SyncFailed(reason)) => {
            notes.push(format!("copy failed: {reason}"));
            SecondaryStatus::SyncFailed
        }
        None => SecondaryStatus::NotAttempted,
    };
    notes.extend(state.note.clone());

    FinalReportRow {
        resolved_version: resolved.version.to_string(),
        installed_before,
        remote_version,
        primary_status,
        secondary_status,
        notes: join_notes(notes),
    }
}

fn join_notes(notes: Vec<String>) -> Option<String> {
    if notes.is_empty() {
        None
    } else {
        Some(notes.join("; "))
    }
}

/// Plain-text table for the console.
pub fn render_table(document: &ReportDocument) -> String {
    let width = document
        .packages
        .keys()
        .map(String::len)
        .max()
        .unwrap_or(0)
        .max("PACKAGE".len());
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<width$}  {:<14}  {:<14}  {}",
        "PACKAGE", "VERSION", "PRIMARY", "SECONDARY"
    );
    for (name, row) in &document.packages {
        let _ = writeln!(
            out,
            "{:<width$}  {:<14}  {:<14}  {}",
            name,
            row.resolved_version,
            row.primary_status.label(),
            row.secondary_status.label()
        );
    }
    let cleanup = match &document.metadata.cleanup {
        CleanupOutcome::Skipped => "nothing to remove".to_string(),
        CleanupOutcome::Succeeded {
            directives,
            failed: 0,
            ..
        } => format!("{directives} stale target(s) swept"),
        CleanupOutcome::Succeeded {
            directives, failed, ..
        } => format!(
            "{} of {directives} stale target(s) swept, {failed} left for the next run",
            directives.saturating_sub(*failed)
        ),
        CleanupOutcome::Failed {
            directives, reason, ..
        } => format!("{directives} stale target(s), sweep failed: {reason}"),
    };
    let _ = writeln!(
        out,
        "→ Packages={} Updated={} Synchronized={} Unresolved={} Cleanup: {}",
        document.metadata.total_packages,
        document.metadata.updated,
        document.metadata.synchronized,
        document.metadata.unresolved,
        cleanup
    );
    out
}

/// Persist the report to the given path.
pub fn write_report(document: &ReportDocument, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|err| {
            SynmodError::Filesystem(format!(
                "Failed to create report directory {}: {err}",
                parent.display()
            ))
        })?;
    }
    let file = File::create(path).map_err(|err| {
        SynmodError::Filesystem(format!(
            "Failed to create report file {}: {err}",
            path.display()
        ))
    })?;
    serde_json::to_writer_pretty(file, document).map_err(|err| {
        SynmodError::Serialization(format!("Failed to write report {}: {err}", path.display()))
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::config::EnvironmentRoots;
    use crate::resolver::Resolution;
    use crate::sync::ResolvedVersion;
    use crate::version::ModuleVersion;

    fn v(raw: &str) -> ModuleVersion {
        raw.parse().expect("version")
    }

    fn layout() -> EnvironmentLayout {
        EnvironmentLayout::new(EnvironmentRoots {
            primary: PathBuf::from("/p"),
            secondary: PathBuf::from("/s"),
        })
    }

    fn state(
        package: &str,
        before: Option<&str>,
        action: UpdateAction,
        resolved: Option<&str>,
        sync: Option<SyncOutcome>,
    ) -> PackageState {
        PackageState {
            resolution: Resolution {
                package: package.into(),
                installed_before: before.map(v),
                remote: RemoteLookup::Found(v("2.0.0")),
                needs_update: !matches!(action, UpdateAction::NotRequired),
                action,
            },
            resolved: resolved.map(|version| ResolvedVersion {
                package: package.into(),
                version: v(version),
                source: PathBuf::from("/p").join(package).join(version),
            }),
            sync,
            note: None,
        }
    }

    #[test]
    fn unresolved_packages_are_reported_explicitly() {
        let states = vec![
            state(
                "Gone",
                None,
                UpdateAction::Failed("access denied".into()),
                None,
                None,
            ),
            state(
                "Az",
                Some("1.0.0"),
                UpdateAction::Installed,
                Some("2.0.0"),
                Some(SyncOutcome::Synchronized),
            ),
        ];
        let document = build_report(&states, CleanupOutcome::Skipped, &layout());

        assert_eq!(document.packages.len(), 2);
        let gone = &document.packages["Gone"];
        assert_eq!(gone.resolved_version, UNRESOLVED);
        assert_eq!(gone.primary_status, PrimaryStatus::Unresolved);
        assert_eq!(gone.secondary_status, SecondaryStatus::NotAttempted);
        assert!(gone.notes.as_deref().unwrap_or("").contains("access denied"));

        let az = &document.packages["Az"];
        assert_eq!(az.primary_status, PrimaryStatus::Updated);
        assert_eq!(az.secondary_status, SecondaryStatus::Synchronized);
        assert_eq!(document.metadata.updated, 1);
        assert_eq!(document.metadata.unresolved, 1);
        assert_eq!(document.metadata.synchronized, 1);
    }

    #[test]
    fn failed_update_with_old_version_stays_resolved() {
        let states = vec![state(
            "Az",
            Some("1.0.0"),
            UpdateAction::Failed("locked".into()),
            Some("1.0.0"),
            Some(SyncOutcome::SyncFailed("disk full".into())),
        )];
        let document = build_report(&states, CleanupOutcome::Skipped, &layout());
        let row = &document.packages["Az"];
        assert_eq!(row.resolved_version, "1.0.0");
        assert_eq!(row.primary_status, PrimaryStatus::UpdateFailed);
        assert_eq!(row.secondary_status, SecondaryStatus::SyncFailed);
        let notes = row.notes.as_deref().unwrap_or("");
        assert!(notes.contains("locked") && notes.contains("disk full"));
        assert_eq!(document.metadata.sync_failures, 1);
    }

    #[test]
    fn table_lists_every_package_and_cleanup() {
        let states = vec![state(
            "Microsoft.Graph",
            Some("2.0.0"),
            UpdateAction::NotRequired,
            Some("2.0.0"),
            Some(SyncOutcome::AlreadySynchronized),
        )];
        let document = build_report(
            &states,
            CleanupOutcome::Succeeded {
                directives: 4,
                failed: 0,
                exit_code: 0,
            },
            &layout(),
        );
        let table = render_table(&document);
        assert!(table.contains("Microsoft.Graph"));
        assert!(table.contains("up-to-date"));
        assert!(table.contains("in-sync"));
        assert!(table.contains("4 stale target(s) swept"));
    }

    #[test]
    fn locked_targets_are_not_counted_as_swept() {
        let cleanup = CleanupOutcome::Succeeded {
            directives: 3,
            failed: 2,
            exit_code: 0,
        };
        let document = build_report(&[], cleanup, &layout());

        let table = render_table(&document);
        assert!(table.contains("1 of 3 stale target(s) swept, 2 left for the next run"));
        let value = serde_json::to_value(&document).expect("json");
        assert_eq!(value["metadata"]["cleanup"]["status"], "SUCCEEDED");
        assert_eq!(value["metadata"]["cleanup"]["failed"], 2);
    }

    #[test]
    fn report_is_written_as_json() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("out/report.json");
        let document = build_report(&[], CleanupOutcome::Skipped, &layout());
        write_report(&document, &path).expect("write");

        let value: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).expect("read")).expect("json");
        assert_eq!(value["metadata"]["total_packages"], 0);
        assert_eq!(value["metadata"]["cleanup"]["status"], "SKIPPED");
    }
}
