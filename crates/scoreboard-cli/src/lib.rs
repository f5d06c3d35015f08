//! Operator command surface for the score ledger.
//!
//! Hosts that already own a process entry point can embed the same behavior
//! through:
//! - [`run_cli`] for full parsed CLI execution.
//! - [`run_with_db`] for direct [`Command`] execution against a DB path.
//! - [`run_command`] for execution against an existing [`Scoreboard`].

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use scoreboard_core::{
    ActivityEntry, LeaderboardEntry, PersonalBestEntry, PlayerId, Scoreboard,
    DEFAULT_LEADERBOARD_LIMIT, DEFAULT_PERSONAL_BEST_LIMIT, DEFAULT_RECENT_ACTIVITY_LIMIT,
};
use scoreboard_store_sqlite::SqliteScoreLedger;
use time::format_description::FormatItem;
use time::OffsetDateTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

const NO_RESULTS: &str = "No results yet";

#[derive(Debug, Parser)]
#[command(name = "scoreboard")]
#[command(about = "Score ledger and leaderboard CLI")]
pub struct Cli {
    /// Path to the SQLite score ledger, created on first use.
    #[arg(long, env = "SCOREBOARD_DB", default_value = "./scores.sqlite3")]
    db: PathBuf,

    /// Tracing filter directive, e.g. `info` or `scoreboard_cli=debug`.
    #[arg(long, env = "SCOREBOARD_LOG", default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

impl Cli {
    #[must_use]
    pub fn log_level(&self) -> &str {
        &self.log_level
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Record one completed game.
    Record(RecordArgs),
    /// Global leaderboard by each player's best score.
    Top(TopArgs),
    /// A single player's best scores.
    Mine(MineArgs),
    /// Most recent games.
    Recent(RecentArgs),
}

#[derive(Debug, Args)]
pub struct RecordArgs {
    #[arg(long)]
    player_id: i64,
    #[arg(long)]
    display_name: Option<String>,
    #[arg(long, allow_negative_numbers = true)]
    score: i64,
}

#[derive(Debug, Args)]
pub struct TopArgs {
    #[arg(long, default_value_t = DEFAULT_LEADERBOARD_LIMIT, allow_negative_numbers = true)]
    limit: i64,
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Args)]
pub struct MineArgs {
    #[arg(long)]
    player_id: i64,
    #[arg(long, default_value_t = DEFAULT_PERSONAL_BEST_LIMIT, allow_negative_numbers = true)]
    limit: i64,
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Args)]
pub struct RecentArgs {
    #[arg(long, default_value_t = DEFAULT_RECENT_ACTIVITY_LIMIT, allow_negative_numbers = true)]
    limit: i64,
    #[arg(long)]
    json: bool,
}

/// Installs the process-wide tracing subscriber on stderr.
///
/// An invalid filter directive falls back to `warn`. Calling this more than
/// once keeps the first subscriber.
pub fn init_tracing(level: &str) {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("warn"));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .try_init();
}

/// Executes the parsed top-level CLI command.
///
/// # Errors
/// Returns an error when opening or migrating the ledger fails, or when the
/// command itself fails validation or storage.
pub fn run_cli(cli: Cli) -> Result<()> {
    run_with_db(&cli.db, cli.command)
}

/// Opens and migrates the ledger at `db_path`, then executes `command`.
///
/// # Errors
/// Returns an error when store open/migrate fails or the requested command fails.
pub fn run_with_db(db_path: &Path, command: Command) -> Result<()> {
    tracing::debug!(db = %db_path.display(), "opening score ledger");
    let ledger = SqliteScoreLedger::open(db_path)?;
    ledger
        .migrate()
        .with_context(|| format!("failed to migrate {}", db_path.display()))?;
    let events = ledger.event_count()?;
    tracing::debug!(events, "score ledger ready");

    let scoreboard = Scoreboard::new(ledger);
    run_command(command, &scoreboard)
}

/// Executes a parsed command against an existing scoreboard and prints the
/// result to stdout.
///
/// # Errors
/// Returns an error when validation, persistence, or rendering fails.
pub fn run_command(command: Command, scoreboard: &Scoreboard<SqliteScoreLedger>) -> Result<()> {
    let output = execute(command, scoreboard)?;
    println!("{output}");
    Ok(())
}

fn execute(command: Command, scoreboard: &Scoreboard<SqliteScoreLedger>) -> Result<String> {
    match command {
        Command::Record(args) => {
            let event = scoreboard.record_score(
                Some(PlayerId(args.player_id)),
                args.display_name.as_deref().unwrap_or_default(),
                args.score,
            )?;
            tracing::info!(
                event_id = event.id,
                player_id = %event.player_id,
                score = event.score,
                "score recorded"
            );
            Ok(serde_json::to_string_pretty(&event)?)
        }
        Command::Top(args) => {
            let entries = scoreboard.top_scores(args.limit)?;
            if args.json {
                Ok(serde_json::to_string_pretty(&entries)?)
            } else {
                Ok(render_leaderboard(&entries))
            }
        }
        Command::Mine(args) => {
            let entries = scoreboard.personal_best(PlayerId(args.player_id), args.limit)?;
            if args.json {
                Ok(serde_json::to_string_pretty(&entries)?)
            } else {
                render_personal_best(&entries)
            }
        }
        Command::Recent(args) => {
            let entries = scoreboard.recent_activity(args.limit)?;
            if args.json {
                Ok(serde_json::to_string_pretty(&entries)?)
            } else {
                render_recent_activity(&entries)
            }
        }
    }
}

fn render_leaderboard(entries: &[LeaderboardEntry]) -> String {
    let mut out = String::from("Top players:");
    if entries.is_empty() {
        out.push('\n');
        out.push_str(NO_RESULTS);
        return out;
    }

    for (index, entry) in entries.iter().enumerate() {
        let _ = write!(out, "\n{}. {}: {}", index + 1, entry.display_name, entry.score);
    }
    out
}

fn render_personal_best(entries: &[PersonalBestEntry]) -> Result<String> {
    let mut out = String::from("Your best results:");
    if entries.is_empty() {
        out.push('\n');
        out.push_str(NO_RESULTS);
        return Ok(out);
    }

    let date = date_format()?;
    for (index, entry) in entries.iter().enumerate() {
        let _ = write!(
            out,
            "\n{}. {} ({})",
            index + 1,
            entry.score,
            format_timestamp(entry.recorded_at, &date)?
        );
    }
    Ok(out)
}

fn render_recent_activity(entries: &[ActivityEntry]) -> Result<String> {
    let mut out = String::from("Recent games:");
    if entries.is_empty() {
        out.push('\n');
        out.push_str(NO_RESULTS);
        return Ok(out);
    }

    let date_time = date_time_format()?;
    for entry in entries {
        let _ = write!(
            out,
            "\n• {}: {} ({})",
            entry.display_name,
            entry.score,
            format_timestamp(entry.recorded_at, &date_time)?
        );
    }
    Ok(out)
}

fn date_format() -> Result<Vec<FormatItem<'static>>> {
    time::format_description::parse("[day].[month].[year]").context("invalid date format")
}

fn date_time_format() -> Result<Vec<FormatItem<'static>>> {
    time::format_description::parse("[day].[month].[year] [hour]:[minute]")
        .context("invalid date-time format")
}

fn format_timestamp(value: OffsetDateTime, format: &[FormatItem<'_>]) -> Result<String> {
    value
        .format(format)
        .context("failed to format timestamp")
}
