//! maildesk: pulls support mail out of an IMAP folder and files it as tickets.
//!
//! Usage:
//!   maildesk sync [--loop <seconds>]   Run the ingestion pipeline
//!   maildesk test                      Check the mailbox connection
//!   maildesk info                      Show ticket and sync run summary
//!   maildesk cleanup --days <n>        Delete archived tickets older than n days

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing_subscriber::EnvFilter;

use maildesk::db::{sync_run_repo, ticket_repo};
use maildesk::sync::RunStatus;
use maildesk::{
    cleanup_archived, load_config, AttachmentStore, Config, Database, SyncEngine, SyncReport,
};

enum Command {
    Sync { interval: Option<u64> },
    Test,
    Info,
    Cleanup { days: u32 },
    Help,
    Version,
}

struct CliArgs {
    command: Command,
    config_path: String,
    debug: bool,
}

fn parse_args(args: &[String]) -> Result<CliArgs, String> {
    let mut config_path = "maildesk.json".to_string();
    let mut debug = false;
    let mut subcommand: Option<&str> = None;
    let mut interval: Option<u64> = None;
    let mut days: Option<u32> = None;
    let mut show_help = false;
    let mut show_version = false;

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--config" => {
                i += 1;
                config_path = args
                    .get(i)
                    .cloned()
                    .ok_or("--config requires a path".to_string())?;
            }
            "--debug" => debug = true,
            "--loop" => {
                i += 1;
                let value = args.get(i).ok_or("--loop requires seconds".to_string())?;
                let parsed: u64 = value
                    .parse()
                    .map_err(|_| format!("invalid interval '{}'", value))?;
                if parsed == 0 {
                    return Err("--loop interval must be at least 1 second".to_string());
                }
                interval = Some(parsed);
            }
            "--days" => {
                i += 1;
                let value = args.get(i).ok_or("--days requires a number".to_string())?;
                days = Some(
                    value
                        .parse()
                        .map_err(|_| format!("invalid day count '{}'", value))?,
                );
            }
            "--help" | "-h" => show_help = true,
            "--version" | "-V" => show_version = true,
            "sync" | "test" | "info" | "cleanup" if subcommand.is_none() => {
                subcommand = Some(args[i].as_str());
            }
            other => return Err(format!("unknown argument '{}'", other)),
        }
        i += 1;
    }

    let command = if show_help {
        Command::Help
    } else if show_version {
        Command::Version
    } else {
        match subcommand {
            Some("sync") => Command::Sync { interval },
            Some("test") => Command::Test,
            Some("info") => Command::Info,
            Some("cleanup") => Command::Cleanup {
                days: days.ok_or("cleanup requires --days <n>".to_string())?,
            },
            _ => Command::Help,
        }
    };

    Ok(CliArgs {
        command,
        config_path,
        debug,
    })
}

fn print_help() {
    println!("maildesk - email to support ticket ingestion");
    println!();
    println!("Usage: maildesk <command> [options]");
    println!();
    println!("Commands:");
    println!("  sync               Run one sync: fetch new mail and file it as tickets");
    println!("  test               Connect to the mailbox and report what a sync would see");
    println!("  info               Show ticket counts and recent sync runs");
    println!("  cleanup --days N   Delete archived tickets untouched for N days");
    println!();
    println!("Options:");
    println!("  --config <path>    Config file (default: maildesk.json)");
    println!("  --loop <seconds>   With sync: repeat on an interval until interrupted");
    println!("  --debug            Verbose logging");
    println!("  --help             Show this help message");
    println!("  --version          Show version");
}

fn init_logging(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    // Also bridges records from the log crate, which the library's leaf
    // modules use.
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let raw_args: Vec<String> = std::env::args().skip(1).collect();
    let args = match parse_args(&raw_args) {
        Ok(args) => args,
        Err(message) => {
            eprintln!("error: {}", message);
            eprintln!("Run 'maildesk --help' for usage.");
            return std::process::ExitCode::from(2);
        }
    };

    match args.command {
        Command::Help => {
            print_help();
            return std::process::ExitCode::SUCCESS;
        }
        Command::Version => {
            println!("maildesk {}", env!("CARGO_PKG_VERSION"));
            return std::process::ExitCode::SUCCESS;
        }
        _ => {}
    }

    init_logging(args.debug);

    let config = match load_config(&args.config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: failed to load '{}': {}", args.config_path, e);
            return std::process::ExitCode::FAILURE;
        }
    };

    let db = match Database::open(&config.resolve_database_path()) {
        Ok(db) => db,
        Err(e) => {
            eprintln!("error: failed to open database: {}", e);
            return std::process::ExitCode::FAILURE;
        }
    };

    match args.command {
        Command::Sync { interval } => run_sync(config, db, interval).await,
        Command::Test => run_test(config, db).await,
        Command::Info => run_info(&config, &db),
        Command::Cleanup { days } => run_cleanup(&config, &db, days),
        Command::Help | Command::Version => std::process::ExitCode::SUCCESS,
    }
}

async fn run_sync(config: Config, db: Database, interval: Option<u64>) -> std::process::ExitCode {
    let engine = Arc::new(SyncEngine::new(config, db));
    let interrupted = Arc::new(AtomicBool::new(false));

    {
        let engine = Arc::clone(&engine);
        let interrupted = Arc::clone(&interrupted);
        if let Err(e) = ctrlc::set_handler(move || {
            eprintln!("Interrupt received, stopping at the next message boundary");
            interrupted.store(true, Ordering::SeqCst);
            engine.request_stop();
        }) {
            tracing::warn!("Could not install signal handler: {}", e);
        }
    }

    let mut last_failed = false;
    loop {
        match engine.run().await {
            Ok(report) => {
                print_report(&report);
                last_failed = report.status == RunStatus::Failure;
            }
            Err(e) => {
                eprintln!("error: {}", e);
                return std::process::ExitCode::FAILURE;
            }
        }

        let seconds = match interval {
            Some(seconds) if !interrupted.load(Ordering::SeqCst) => seconds,
            _ => break,
        };
        tracing::info!("Next run in {}s", seconds);
        sleep_until_interrupted(seconds, &interrupted).await;
        if interrupted.load(Ordering::SeqCst) {
            break;
        }
    }

    if last_failed {
        std::process::ExitCode::FAILURE
    } else {
        std::process::ExitCode::SUCCESS
    }
}

/// Sleeps for the loop interval, waking early when stop is requested.
async fn sleep_until_interrupted(seconds: u64, interrupted: &AtomicBool) {
    let deadline = Instant::now() + Duration::from_secs(seconds);
    while Instant::now() < deadline {
        if interrupted.load(Ordering::SeqCst) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
}

fn print_report(report: &SyncReport) {
    println!();
    println!(
        "Sync of '{}' finished: {}",
        report.folder,
        report.status.as_str()
    );
    println!(
        "  fetched {}, tickets created {}, replies appended {}, duplicates {}, failed {}",
        report.messages_fetched,
        report.tickets_created,
        report.replies_appended,
        report.duplicates_skipped,
        report.messages_failed
    );
    if report.degraded_dedup > 0 {
        println!(
            "  {} message(s) had no Message-ID and used the degraded dedup key",
            report.degraded_dedup
        );
    }
    println!(
        "  watermark {} after {} ms",
        report.final_watermark, report.duration_ms
    );
    for failure in &report.failures {
        println!("  UID {} failed: {}", failure.uid, failure.reason);
    }
    if let Some(error) = &report.error {
        println!("  run error: {}", error);
    }
}

async fn run_test(config: Config, db: Database) -> std::process::ExitCode {
    let engine = SyncEngine::new(config, db);
    match engine.test_connection().await {
        Ok(report) => {
            println!("Connected to {} and opened '{}'", report.host, report.folder);
            println!(
                "  UIDVALIDITY {}, resume watermark {}, {} message(s) pending",
                report.uidvalidity, report.watermark, report.pending_messages
            );
            println!("  folders:");
            for folder in &report.folders {
                println!("    {}", folder);
            }
            std::process::ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Connection test failed: {}", e);
            std::process::ExitCode::FAILURE
        }
    }
}

fn run_info(config: &Config, db: &Database) -> std::process::ExitCode {
    let counts = match ticket_repo::count_by_status(db) {
        Ok(counts) => counts,
        Err(e) => {
            eprintln!("error: {}", e);
            return std::process::ExitCode::FAILURE;
        }
    };
    let runs = match sync_run_repo::recent(db, 5) {
        Ok(runs) => runs,
        Err(e) => {
            eprintln!("error: {}", e);
            return std::process::ExitCode::FAILURE;
        }
    };

    println!(
        "Mailbox: {}@{} folder '{}'",
        config.mailbox.username, config.mailbox.host, config.mailbox.folder
    );
    println!("Database: {}", config.resolve_database_path().display());
    println!("Attachments: {}", config.resolve_attachment_root().display());
    println!();
    println!(
        "Tickets: {} total ({} new, {} read, {} archived)",
        counts.total, counts.new, counts.read, counts.archived
    );
    println!();
    if runs.is_empty() {
        println!("No sync runs recorded yet.");
    } else {
        println!("Recent sync runs:");
        for run in &runs {
            println!(
                "  #{} {} [{}] fetched {}, created {}, replied {}, failed {}, watermark {}",
                run.id,
                run.started_at,
                run.status,
                run.messages_fetched,
                run.tickets_created,
                run.replies_appended,
                run.messages_failed,
                run.watermark
            );
        }
    }
    std::process::ExitCode::SUCCESS
}

fn run_cleanup(config: &Config, db: &Database, days: u32) -> std::process::ExitCode {
    let store = AttachmentStore::new(config.resolve_attachment_root());
    match cleanup_archived(db, &store, days) {
        Ok(report) => {
            println!(
                "Removed {} archived ticket(s) and {} attachment director(ies) older than {} days",
                report.tickets_deleted, report.directories_removed, days
            );
            std::process::ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Cleanup failed: {}", e);
            std::process::ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_sync_with_loop() {
        let parsed = parse_args(&args(&["sync", "--loop", "300"])).unwrap();
        assert!(matches!(
            parsed.command,
            Command::Sync {
                interval: Some(300)
            }
        ));
    }

    #[test]
    fn test_parse_defaults_to_help() {
        let parsed = parse_args(&args(&[])).unwrap();
        assert!(matches!(parsed.command, Command::Help));
        assert_eq!(parsed.config_path, "maildesk.json");
        assert!(!parsed.debug);
    }

    #[test]
    fn test_parse_cleanup_requires_days() {
        assert!(parse_args(&args(&["cleanup"])).is_err());
        let parsed = parse_args(&args(&["cleanup", "--days", "90"])).unwrap();
        assert!(matches!(parsed.command, Command::Cleanup { days: 90 }));
    }

    #[test]
    fn test_parse_config_and_debug_flags() {
        let parsed = parse_args(&args(&["--config", "/tmp/m.json", "--debug", "test"])).unwrap();
        assert!(matches!(parsed.command, Command::Test));
        assert_eq!(parsed.config_path, "/tmp/m.json");
        assert!(parsed.debug);
    }

    #[test]
    fn test_parse_rejects_unknown_arguments() {
        assert!(parse_args(&args(&["sync", "--fast"])).is_err());
        assert!(parse_args(&args(&["sync", "extra"])).is_err());
        assert!(parse_args(&args(&["--loop", "abc", "sync"])).is_err());
    }

    #[test]
    fn test_parse_help_wins_over_subcommand() {
        let parsed = parse_args(&args(&["sync", "--help"])).unwrap();
        assert!(matches!(parsed.command, Command::Help));
    }
}
