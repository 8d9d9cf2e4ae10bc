//! nf3 - addon installer for large modpacks

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use nf3::archive::{Extractor, Platform};
use nf3::catalog::{self, CatalogEntry};
use nf3::installer::{
    InstallConfig, InstallReport, Installer, ProgressCallback, ProgressEvent, RunOutcome,
};
use nf3::settings::Settings;

#[derive(Parser)]
#[command(name = "nf3")]
#[command(version)]
#[command(about = "Fetch, verify, extract and normalize modpack addons")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging (use RUST_LOG for finer control)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Also write logs to this file
    #[arg(long, global = true, env = "NF3_LOG_FILE")]
    log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Install or update every addon in a catalog
    Install {
        /// Tab-delimited addon catalog
        catalog: PathBuf,

        /// Install root (holds downloads/ and mods/); defaults to the saved setting
        #[arg(short, long, env = "NF3_ROOT")]
        root: Option<PathBuf>,

        /// Parallel downloads (defaults to CPU thread count)
        #[arg(short = 'j', long)]
        download_workers: Option<usize>,

        /// Parallel extractions (defaults to CPU thread count)
        #[arg(short = 'x', long)]
        extract_workers: Option<usize>,

        /// curl-impersonate binary for the file host
        #[arg(long, env = "NF3_IMPERSONATE_BIN")]
        impersonate_bin: Option<PathBuf>,

        /// 7z binary
        #[arg(long, env = "NF3_7Z_BIN")]
        seven_zip_bin: Option<PathBuf>,
    },

    /// Parse a catalog and show how it would be installed
    Check {
        /// Tab-delimited addon catalog
        catalog: PathBuf,
    },

    /// Extract one archive with the same dispatch the installer uses
    Extract {
        archive: PathBuf,
        dest: PathBuf,
    },

    /// Show or update saved defaults
    Defaults {
        #[arg(long)]
        root: Option<PathBuf>,
        #[arg(long)]
        download_workers: Option<usize>,
        #[arg(long)]
        extract_workers: Option<usize>,
        #[arg(long)]
        impersonate_bin: Option<PathBuf>,
        #[arg(long)]
        seven_zip_bin: Option<PathBuf>,
    },
}

/// Cancellation token fired by Ctrl-C.
fn ctrl_c_token() -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nCancelling... (partial files are left in place)");
            trigger.cancel();
        }
    });
    cancel
}

fn overall_bar(multi: &MultiProgress, total: u64) -> ProgressBar {
    let pb = multi.add(ProgressBar::new(total));
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) | {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-"),
    );
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

fn progress_callback(pb: ProgressBar) -> ProgressCallback {
    Arc::new(move |event: ProgressEvent| match event {
        ProgressEvent::Overall { completed, total } => {
            pb.set_length(total as u64);
            pb.set_position(completed as u64);
        }
        ProgressEvent::Unit {
            phase,
            name,
            percent,
        } => pb.set_message(format!("{} {} {:.0}%", phase.name(), name, percent)),
        ProgressEvent::Status { message } => pb.println(message),
    })
}

fn print_report(report: &InstallReport) {
    println!("\n=== Installation Summary ===");
    println!(
        "Archives: {} fetched, {} unchanged",
        report.fetched, report.unchanged
    );
    println!(
        "Groups:   {} of {} installed, {} failed",
        report.completed,
        report.total_groups,
        report.failures.len()
    );

    if !report.failures.is_empty() {
        println!("\n=== Failed ===");
        for failure in &report.failures {
            println!("  {} ({:?}): {}", failure.id, failure.stage, failure.error);
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _log_guard = nf3::logging::init(cli.verbose, cli.log_file.as_deref())?;
    let settings = Settings::load();

    match cli.command {
        Commands::Install {
            catalog,
            root,
            download_workers,
            extract_workers,
            impersonate_bin,
            seven_zip_bin,
        } => {
            let root = root
                .or_else(|| settings.default_root_dir())
                .context("No install root: pass --root or save one with `nf3 defaults --root`")?;

            let mut config = InstallConfig::new(catalog, root);
            if let Some(n) = download_workers.or(settings.download_workers) {
                config.download_workers = n;
            }
            if let Some(n) = extract_workers.or(settings.extract_workers) {
                config.extract_workers = n;
            }
            config.impersonate_bin = impersonate_bin.or_else(|| settings.impersonate_bin());
            config.seven_zip_bin = seven_zip_bin.or_else(|| settings.seven_zip_bin());

            println!("nf3 - addon installer");
            println!("Root:      {}", config.root_dir.display());
            println!(
                "Workers:   {} download / {} extract",
                config.download_workers, config.extract_workers
            );
            println!();

            let installer = Installer::new(config)?;
            let groups = installer.plan()?;

            let multi = MultiProgress::new();
            let pb = overall_bar(&multi, groups.len() as u64);
            let installer = installer.with_progress(progress_callback(pb.clone()));

            let cancel = ctrl_c_token();
            let outcome = installer.run_groups(groups, &cancel).await?;
            pb.finish_and_clear();

            match outcome {
                RunOutcome::Completed(report) => {
                    print_report(&report);
                    println!("\nInstallation complete!");
                }
                RunOutcome::PartialFailure(report) => {
                    print_report(&report);
                    bail!(
                        "{} archive group(s) failed after retry. Fix issues and run again.",
                        report.failures.len()
                    );
                }
                RunOutcome::Cancelled => bail!("Installation cancelled"),
            }
        }

        Commands::Check { catalog: path } => {
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let entries = catalog::parse_catalog(&text)?;

            let separators = entries
                .iter()
                .filter(|e| matches!(e, CatalogEntry::Separator { .. }))
                .count();
            let records = catalog::addons(entries);

            let mut by_kind: HashMap<&'static str, usize> = HashMap::new();
            for record in &records {
                *by_kind.entry(record.kind.name()).or_insert(0) += 1;
            }

            let record_count = records.len();
            let groups = catalog::group(records, &PathBuf::from("downloads"));
            let shared = groups.iter().filter(|g| g.members().len() > 1).count();

            println!("=== Catalog ===");
            println!("Addons:      {}", record_count);
            println!("Separators:  {}", separators);
            println!("Downloads:   {} ({} shared by several addons)", groups.len(), shared);

            println!("\n=== Sources ===");
            let mut counts: Vec<_> = by_kind.into_iter().collect();
            counts.sort_by(|a, b| b.1.cmp(&a.1));
            for (kind, count) in counts {
                println!("{:>8}  {}", count, kind);
            }

            for group in groups.iter().filter(|g| g.members().len() > 1) {
                println!("\n{}:", group.id());
                for member in group.members() {
                    println!("  {}", member.folder_name());
                }
            }
        }

        Commands::Extract { archive, dest } => {
            let extractor = Extractor::new(Platform::current(), settings.seven_zip_bin().as_deref());

            let multi = MultiProgress::new();
            let pb = overall_bar(&multi, 100);
            pb.set_message(archive.display().to_string());
            let bar = pb.clone();
            let on_percent = move |percent: f64| bar.set_position(percent as u64);

            let cancel = ctrl_c_token();
            extractor.extract(&archive, &dest, &on_percent, &cancel).await?;
            pb.finish_and_clear();
            println!("Extracted {} to {}", archive.display(), dest.display());
        }

        Commands::Defaults {
            root,
            download_workers,
            extract_workers,
            impersonate_bin,
            seven_zip_bin,
        } => {
            let mut updated = settings.clone();
            if let Some(root) = root {
                updated.default_root_dir = root.to_string_lossy().to_string();
            }
            if download_workers.is_some() {
                updated.download_workers = download_workers;
            }
            if extract_workers.is_some() {
                updated.extract_workers = extract_workers;
            }
            if let Some(bin) = impersonate_bin {
                updated.impersonate_bin = bin.to_string_lossy().to_string();
            }
            if let Some(bin) = seven_zip_bin {
                updated.seven_zip_bin = bin.to_string_lossy().to_string();
            }

            if updated != settings {
                if let Err(e) = updated.save() {
                    warn!("Could not save settings: {:#}", e);
                    return Err(e);
                }
            }

            println!("{}", serde_json::to_string_pretty(&updated)?);
            if let Ok(path) = Settings::settings_path() {
                println!("({})", path.display());
            }
        }
    }

    Ok(())
}
