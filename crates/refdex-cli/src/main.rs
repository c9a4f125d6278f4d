//! refdex - Crossref metadata indexer
//!
//! Loads Crossref works dumps (enveloped JSON or NDJSON, plain or gzip) into
//! an Elasticsearch-compatible search index.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use log::LevelFilter;
use refdex_core::{ProgressContext, init_logging, request_shutdown};

mod cmd;
mod config;

use config::Config;

#[derive(Parser)]
#[command(name = "refdex")]
#[command(about = "Index Crossref metadata dumps into Elasticsearch")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Log level: off, error, warn, info, debug, trace
    /// (default: warn with progress bars, info otherwise)
    #[arg(long, global = true)]
    log_level: Option<LevelFilter>,

    /// Config file path (default: ./refdex.toml or ~/.config/refdex/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Index a dump file, a directory of dumps or stdin
    Index(cmd::index::IndexArgs),
    /// Create the index with settings and mappings
    CreateIndex(cmd::admin::CreateIndexArgs),
    /// Delete the index
    DeleteIndex(cmd::admin::DeleteIndexArgs),
    /// Show current configuration
    Config,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Progress context (TTY auto-detect)
    let progress = Arc::new(ProgressContext::new());

    // Logging:
    //   TTY:     warn unless --log-level  (progress bars show activity)
    //   non-TTY: info unless --log-level  (logs are the only progress indicator)
    let is_tty = progress.is_tty();
    let multi = if is_tty { Some(progress.multi()) } else { None };
    let default_level = if is_tty {
        LevelFilter::Warn
    } else {
        LevelFilter::Info
    };
    init_logging(cli.log_level.unwrap_or(default_level), multi);

    let config = match load_config(cli.config) {
        Ok(c) => c,
        Err(e) => {
            log::error!("Configuration error: {e:#}");
            return ExitCode::from(2);
        }
    };

    let outcome = match cli.command {
        Command::Index(args) => {
            setup_signal_handler();
            cmd::index::run_index(args, &config, &progress)
        }
        Command::CreateIndex(args) => cmd::admin::create(args, &config).map(|()| ExitCode::SUCCESS),
        Command::DeleteIndex(args) => cmd::admin::delete(args, &config).map(|()| ExitCode::SUCCESS),
        Command::Config => {
            show_config(&config);
            Ok(ExitCode::SUCCESS)
        }
    };
    match outcome {
        Ok(code) => code,
        Err(e) => {
            log::error!("Fatal error: {e:#}");
            ExitCode::from(2)
        }
    }
}

fn load_config(path: Option<PathBuf>) -> Result<Config> {
    match path {
        Some(path) => Config::from_file(&path),
        None => Config::load(),
    }
}

fn show_config(config: &Config) {
    use comfy_table::{Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};

    let es = &config.elastic;
    let p = &config.pipeline;
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new("Setting").fg(Color::Cyan),
            Cell::new("Value").fg(Color::Cyan),
        ]);

    table.add_row(vec!["Hosts", &es.hosts.join(", ")]);
    table.add_row(vec!["User", es.username.as_deref().unwrap_or("-")]);
    table.add_row(vec![
        "Password",
        if es.password.is_some() {
            "configured"
        } else {
            "not set"
        },
    ]);
    table.add_row(vec![
        "CA certificate",
        &es.ca_cert
            .as_ref()
            .map_or_else(|| "-".to_string(), |path| path.display().to_string()),
    ]);
    table.add_row(vec!["Compress requests", &es.compress.to_string()]);
    table.add_row(vec!["Request timeout", &format!("{}s", es.timeout)]);
    table.add_row(vec!["Index", &p.index]);
    table.add_row(vec!["Workers", &p.workers.to_string()]);
    table.add_row(vec!["Queue capacity", &p.queue_capacity.to_string()]);
    table.add_row(vec!["Flush bytes", &p.flush_bytes.to_string()]);
    table.add_row(vec!["Flush interval", &format!("{}ms", p.flush_interval_ms)]);
    table.add_row(vec!["Flush workers", &p.flush_workers.to_string()]);
    table.add_row(vec!["Max retries", &p.max_retries.to_string()]);
    table.add_row(vec![
        "Retry backoff",
        &format!(
            "{}ms x{} (cap {}ms)",
            p.retry_base_ms, p.retry_multiplier, p.retry_cap_ms
        ),
    ]);
    table.add_row(vec![
        "Retry on status",
        &p.retry_on_status
            .iter()
            .map(u16::to_string)
            .collect::<Vec<_>>()
            .join(", "),
    ]);

    eprintln!("\n{table}");
}

fn setup_signal_handler() {
    // First signal: set graceful shutdown flag
    // Second signal: force exit
    // SAFETY: request_shutdown is a single atomic swap; process::exit is
    // async-signal-safe
    for signal in [signal_hook::consts::SIGTERM, signal_hook::consts::SIGINT] {
        let registered = unsafe {
            signal_hook::low_level::register(signal, || {
                if request_shutdown() {
                    std::process::exit(130);
                }
            })
        };
        if let Err(e) = registered {
            log::warn!("Failed to register handler for signal {signal}: {e}");
        }
    }
}
