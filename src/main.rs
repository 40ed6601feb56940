/*============================================================
  Synavera Project: Syn-Mod
  Module: synmod_core::main
  Etiquette: Synavera Script Etiquette — Rust Profile v1.1.1
  ------------------------------------------------------------
  Purpose:
    Entry point for Syn-Mod Core. Brings managed PowerShell
    modules up to date in the primary environment, mirrors the
    resolved versions into the secondary environment, and sweeps
    stale versions from a detached process.

  Security / Safety Notes:
    Operates within the invoking user's privileges. Executes the
    configured PowerShell host, copies module directories, and
    re-launches itself as the detached sweep worker.

  Dependencies:
    clap for CLI parsing, chrono for timestamps, tokio runtime.

  Operational Scope:
    Invoked by operators or schedulers as a single end-to-end
    run; the hidden `sweep` subcommand is reserved for the
    detached cleanup process.

  Revision History:
    2025-11-12 COD  Authored Syn-Mod Core runtime.
  ------------------------------------------------------------
  SSE Principles Observed:
    - Result-first error handling with deterministic exits
    - Per-package failures are reported, not escalated
    - Structured logging following Synavera cadence
============================================================*/

mod cleanup;
mod config;
mod environment;
mod error;
mod feed;
mod logger;
mod reconcile;
mod registry;
mod report;
mod resolver;
mod scanner;
mod sync;
#[cfg(test)]
mod testing;
mod version;

use std::collections::HashSet;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use chrono::Utc;
use clap::{ArgAction, Parser, Subcommand};

use cleanup::{run_sweep, CommandBatch, DeferredCleanupExecutor, DetachedLauncher};
use config::SynmodConfig;
use environment::{EnvironmentLayout, LocalFilesystem};
use error::Result;
use logger::Logger;
use reconcile::Reconciler;
use registry::PowerShellGetClient;
use report::{build_report, render_table, write_report};

/// Command-line arguments for Syn-Mod-Core.
#[derive(Debug, Parser)]
#[command(
    name = "Syn-Mod-Core",
    version,
    author = "Synavera Systems",
    about = "Module reconciler for primary and secondary PowerShell environments"
)]
struct Cli {
    /// Override configuration file path.
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,
    /// Override report output path.
    #[arg(long, value_name = "PATH")]
    report: Option<PathBuf>,
    /// Explicit log file path.
    #[arg(long, value_name = "PATH", global = true)]
    log: Option<PathBuf>,
    /// Limit the run to specific managed packages; skips the legacy sweep.
    #[arg(long = "package", value_name = "PKG", action = ArgAction::Append)]
    packages: Vec<String>,
    /// Enable verbose logging to stderr.
    #[arg(long, action = ArgAction::SetTrue, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Execute a cleanup batch. Launched detached by the main run.
    #[command(hide = true)]
    Sweep {
        #[arg(long, value_name = "PATH")]
        batch: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let outcome = match cli.command {
        Some(Command::Sweep { ref batch }) => sweep(&cli, batch).await,
        None => run(&cli).await,
    };
    match outcome {
        Ok(code) => code,
        Err(err) => {
            eprintln!("[Syn-Mod-Core] {}", err);
            err.exit_code()
        }
    }
}

async fn run(cli: &Cli) -> Result<ExitCode> {
    let config = SynmodConfig::load_from_optional_path(cli.config.as_deref())?;
    let roots = config.environment_roots()?;
    let report_path = cli.report.clone().unwrap_or_else(|| config.report_path());

    let session_stamp = Utc::now().format("%Y-%m-%d_%H-%M-%S").to_string();
    let log_path = cli
        .log
        .clone()
        .unwrap_or_else(|| config.log_dir().join(format!("core_{session_stamp}.log")));
    let sweep_log_path = log_path.with_file_name(format!("sweep_{session_stamp}.log"));
    let logger = Logger::new(Some(log_path), cli.verbose)?;
    logger.info("INIT", "Syn-Mod Core awakening.");
    logger.info(
        "ROOTS",
        format!(
            "primary={} secondary={}",
            roots.primary.display(),
            roots.secondary.display()
        ),
    );

    let layout = EnvironmentLayout::new(roots);
    let registry = PowerShellGetClient::new(&config)?;
    let filesystem = LocalFilesystem;

    let managed = select_packages(&config.packages.managed, &cli.packages, &logger);
    let legacy: &[String] = if cli.packages.is_empty() {
        &config.packages.legacy
    } else {
        &[]
    };
    logger.info(
        "PACKAGES",
        format!("managed={} legacy={}", managed.len(), legacy.len()),
    );

    let reconciled = Reconciler::new(
        &registry,
        &filesystem,
        &layout,
        &logger,
        config.packages.install_scope,
    )
    .run(&managed, legacy)
    .await;

    let cleanup = match DetachedLauncher::for_current_exe(cli.config.clone(), config.staging_dir())
    {
        Ok(launcher) => {
            let launcher = launcher.with_log(sweep_log_path);
            let timeout = config.cleanup.timeout_secs.map(Duration::from_secs);
            DeferredCleanupExecutor::new(&launcher, &logger, timeout)
                .execute(reconciled.pending)
                .await
        }
        Err(err) => {
            logger.warn("CLEANUP", format!("Sweep unavailable: {err}"));
            cleanup::CleanupOutcome::Failed {
                directives: reconciled.pending.len(),
                exit_code: None,
                reason: err.to_string(),
            }
        }
    };

    let document = build_report(&reconciled.packages, cleanup, &layout);
    print!("{}", render_table(&document));
    match write_report(&document, &report_path) {
        Ok(()) => logger.info(
            "REPORT",
            format!("Report written to {}", report_path.display()),
        ),
        Err(err) => logger.warn("REPORT", format!("Report not written: {err}")),
    }

    logger.info(
        "SUMMARY",
        format!(
            "packages={} updated={} synchronized={} unresolved={}",
            document.metadata.total_packages,
            document.metadata.updated,
            document.metadata.synchronized,
            document.metadata.unresolved
        ),
    );
    logger.info("COMPLETE", "Environments reconciled.");
    if let Err(err) = logger.finalize() {
        eprintln!("[Syn-Mod-Core] {err}");
    }

    Ok(ExitCode::SUCCESS)
}

/// Detached worker: run the batch, acknowledge, remove the batch file.
async fn sweep(cli: &Cli, batch_path: &std::path::Path) -> Result<ExitCode> {
    let config = SynmodConfig::load_from_optional_path(cli.config.as_deref())?;
    let logger = match &cli.log {
        Some(path) => Logger::new(Some(path.clone()), cli.verbose)
            .unwrap_or_else(|_| Logger::stderr_only()),
        None => Logger::stderr_only(),
    };
    let batch = CommandBatch::read_from(batch_path)?;
    let registry = PowerShellGetClient::new(&config)?;

    let mut stdout = std::io::stdout();
    let summary = run_sweep(&batch, &registry, &LocalFilesystem, &logger, &mut stdout).await;
    logger.info(
        "SWEEP",
        format!(
            "attempted={} failed={}",
            summary.attempted, summary.failed
        ),
    );
    let _ = std::fs::remove_file(batch_path);
    logger.finalize()?;
    Ok(ExitCode::SUCCESS)
}

/// Restrict the managed list to the requested names, warning on strays.
fn select_packages(managed: &[String], requested: &[String], logger: &Logger) -> Vec<String> {
    let mut selected: Vec<String> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    for name in managed {
        if seen.insert(name.to_ascii_lowercase()) {
            selected.push(name.clone());
        }
    }
    if requested.is_empty() {
        return selected;
    }

    let wanted: HashSet<String> = requested.iter().map(|n| n.to_ascii_lowercase()).collect();
    selected.retain(|name| wanted.contains(&name.to_ascii_lowercase()));

    let mut missing: Vec<&str> = requested
        .iter()
        .filter(|name| {
            !selected
                .iter()
                .any(|pkg| pkg.eq_ignore_ascii_case(name.as_str()))
        })
        .map(String::as_str)
        .collect();
    missing.sort_unstable();
    missing.dedup();
    if !missing.is_empty() {
        logger.warn(
            "PKG404",
            format!("Requested packages are not managed: {}", missing.join(", ")),
        );
    }
    selected
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|name| name.to_string()).collect()
    }

    #[test]
    fn no_filter_keeps_all_unique_managed() {
        let logger = Logger::stderr_only();
        let selected = select_packages(&names(&["Az", "Pester", "az"]), &[], &logger);
        assert_eq!(selected, names(&["Az", "Pester"]));
    }

    #[test]
    fn filter_is_case_insensitive_and_drops_strangers() {
        let logger = Logger::stderr_only();
        let selected = select_packages(
            &names(&["Az", "Microsoft.Graph", "Pester"]),
            &names(&["microsoft.graph", "NotManaged"]),
            &logger,
        );
        assert_eq!(selected, names(&["Microsoft.Graph"]));
    }

    #[test]
    fn cli_accepts_bare_invocation_and_hidden_sweep() {
        let bare = Cli::try_parse_from(["synmod_core"]).expect("bare run parses");
        assert!(bare.command.is_none());
        assert!(bare.packages.is_empty());

        let worker = Cli::try_parse_from([
            "synmod_core",
            "--config",
            "/etc/syn-mod.toml",
            "sweep",
            "--batch",
            "/tmp/sweep.json",
        ])
        .expect("sweep parses");
        match worker.command {
            Some(Command::Sweep { batch }) => assert_eq!(batch, PathBuf::from("/tmp/sweep.json")),
            None => panic!("expected sweep subcommand"),
        }
        assert_eq!(worker.config, Some(PathBuf::from("/etc/syn-mod.toml")));
    }
}
