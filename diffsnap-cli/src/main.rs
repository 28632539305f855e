//! diffsnap - full and differential directory backups
//!
//! Reads a TOML configuration, picks the backup kind from the differential
//! cadence, runs the engine and updates the configuration and statistics.

mod config;
mod services;

use anyhow::{Context, Result};
use chrono::Local;
use clap::Parser;
use config::BackupConfig;
use diffsnap_engine::report::{format_bytes, format_duration};
use diffsnap_engine::{
    utils, BackupError, BackupKind, BackupRunner, FixedDecision, OverwriteDecider, RecordStore,
};
use services::{archive::TarZstdArchiver, prompt::TerminalPrompt, stats::StatsLedger};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", default_value = "conf.toml")]
    config: PathBuf,

    /// Force a full backup
    #[arg(short, long, conflicts_with = "differential")]
    full: bool,

    /// Force a differential backup
    #[arg(short, long)]
    differential: bool,

    /// Do not count this differential backup towards the next full backup
    #[arg(long)]
    no_increment: bool,

    /// Leave the backup uncompressed regardless of the configuration
    #[arg(long)]
    no_compress: bool,

    /// Print the recorded run statistics and exit
    #[arg(long)]
    stats: bool,

    /// Reset the differential counter and exit
    #[arg(long)]
    reset_counter: bool,

    /// Replace an existing backup directory without asking
    #[arg(short = 'y', long)]
    yes: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,
}

impl Args {
    fn forced_kind(&self) -> Option<BackupKind> {
        if self.full {
            Some(BackupKind::Full)
        } else if self.differential {
            Some(BackupKind::Differential)
        } else {
            None
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<()> {
    let Some(session) = Session::open(&args.config)? else {
        println!(
            "Created {}. Fill in source-directories and destination, then run diffsnap again.",
            args.config.display()
        );
        return Ok(());
    };

    let log_level = args.log_level.as_deref().unwrap_or(&session.config.log_level);
    utils::logger::init(log_level)?;

    session.execute(&args).await
}

/// A loaded configuration and where it lives
struct Session {
    config_path: PathBuf,
    /// Directory relative record and stats paths resolve against
    base: PathBuf,
    config: BackupConfig,
}

impl Session {
    /// Load the configuration, or write the template and return `None`.
    fn open(path: &Path) -> Result<Option<Self>> {
        let config_path =
            std::path::absolute(path).with_context(|| format!("cannot resolve {}", path.display()))?;
        let base = config_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        Ok(BackupConfig::load_or_create(&config_path)?.map(|config| Self {
            config_path,
            base,
            config,
        }))
    }

    /// Run the action `args` asks for. Nothing on disk changes before the
    /// configuration has been validated.
    async fn execute(mut self, args: &Args) -> Result<()> {
        let stats_path = BackupConfig::resolve(&self.base, &self.config.stats_file);

        if args.reset_counter {
            self.config.reset_counter();
            self.config.save(&self.config_path)?;
            println!("Differential counter reset.");
            return Ok(());
        }

        if args.stats {
            print!("{}", StatsLedger::load(&stats_path)?.render());
            return Ok(());
        }

        self.config.validate()?;
        let plan = self.config.plan(&self.base)?;
        let kind = self.config.select_kind(args.forced_kind());

        tracing::info!(
            "diffsnap v{}: {} backup ({} of {} differentials since last full)",
            env!("CARGO_PKG_VERSION"),
            kind,
            self.config.current_differential_backups,
            self.config.differential_backups
        );

        if kind == BackupKind::Full {
            warn_on_stale_records(&plan.record_path, plan.mode);
        }

        let decider: Arc<dyn OverwriteDecider> = if args.yes {
            Arc::new(FixedDecision(true))
        } else {
            Arc::new(TerminalPrompt)
        };

        let mut runner = BackupRunner::new(plan, decider)?;
        if self.config.compress && !args.no_compress {
            runner = runner.with_archiver(Arc::new(TarZstdArchiver::new(self.config.compression_level)));
        }

        let started_at = Local::now();
        let record = runner.run(kind, started_at).await?;

        println!(
            "{} backup finished in {}: {} files, {} directories, {}",
            record.kind,
            format_duration(record.elapsed.as_secs()),
            record.totals.files,
            record.totals.dirs,
            format_bytes(record.totals.bytes)
        );
        match &record.archive {
            Some(archive) => println!("Archive: {}", archive.display()),
            None => println!("Backup: {}", record.run_dir.display()),
        }
        if record.ignored > 0 {
            println!("{} item(s) ignored", record.ignored);
        }
        if !record.failures.is_empty() {
            println!("{} item(s) could not be backed up:", record.failures.len());
            for failure in &record.failures {
                println!("  {}: {}", failure.path.display(), failure.reason);
            }
        }

        self.config.mark_completed(kind, started_at, !args.no_increment);
        self.config.save(&self.config_path)?;

        let stats = record.stats();
        let ledger_result = StatsLedger::load(&stats_path).and_then(|mut ledger| {
            ledger.record(stats);
            ledger.save(&stats_path)
        });
        if let Err(e) = ledger_result {
            tracing::warn!("Run statistics not saved: {:#}", e);
        }

        Ok(())
    }
}

/// A full run rebuilds the record store, so a store in another mode or a
/// damaged one is only worth a warning.
fn warn_on_stale_records(path: &Path, mode: diffsnap_engine::CompareMode) {
    if !path.exists() {
        return;
    }

    match RecordStore::load(path, mode) {
        Ok(_) => {}
        Err(BackupError::ModeMismatch { found, .. }) => {
            tracing::warn!(
                "Record file {} was written in {} mode; it will be rebuilt in {} mode",
                path.display(),
                found,
                mode
            );
        }
        Err(e) => tracing::warn!("Existing record file will be replaced: {}", e),
    }
}
