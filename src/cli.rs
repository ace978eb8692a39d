use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::commands::{self, CommandReport};
use crate::tracks::paths::validate_track_id;

#[derive(Parser)]
#[command(name = "tracks")]
#[command(about = "Archive conductor tracks and inspect their lifecycle", long_about = None)]
#[command(version)]
#[command(subcommand_help_heading = "Commands")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Archive a track: metadata, directory, registry and index
    Archive {
        /// Track id, e.g. backend-standards_20260220
        #[arg(value_parser = parse_track_id)]
        track_id: String,

        /// Why the track is archived (defaults to the configured reason)
        reason: Option<String>,

        /// Report pending steps without changing anything
        #[arg(long)]
        dry_run: bool,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show where a track is in its lifecycle and what an archive would still do
    Status {
        #[arg(value_parser = parse_track_id)]
        track_id: String,

        #[arg(long)]
        json: bool,
    },

    /// Show resolved artifact locations and effective configuration
    Paths {
        #[arg(long)]
        json: bool,
    },
}

fn parse_track_id(raw: &str) -> Result<String, String> {
    validate_track_id(raw)?;
    Ok(raw.to_string())
}

fn print_report(report: &CommandReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    let verdict = if report.ok { "ok" } else { "failed" };
    println!("{}: {verdict}", report.command);
    for detail in &report.details {
        println!("  {detail}");
    }
    for issue in &report.issues {
        println!("  issue: {issue}");
    }
    Ok(())
}

pub fn run() -> Result<()> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) if err.use_stderr() => {
            let _ = err.print();
            anyhow::bail!("E_USAGE: invalid invocation");
        }
        Err(err) => err.exit(),
    };

    let (report, json) = match cli.command {
        Commands::Archive {
            track_id,
            reason,
            dry_run,
            json,
        } => (
            commands::archive::run(&track_id, reason.as_deref(), dry_run)?,
            json,
        ),
        Commands::Status { track_id, json } => (commands::status::run(&track_id)?, json),
        Commands::Paths { json } => (commands::paths::run()?, json),
    };

    print_report(&report, json)?;
    if !report.ok {
        anyhow::bail!("{}", report.issues.join("; "));
    }
    Ok(())
}
