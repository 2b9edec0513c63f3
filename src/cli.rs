//! sessionguard command line
//!
//! Operator entry points over [`SessionGuard`]: one-shot diagnostics with
//! optional repair, device bridge housekeeping, and a foreground watch loop.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::bridge::DeviceState;
use crate::config::Config;
use crate::diagnostics::RepairCycle;
use crate::errors::{EXIT_ISSUES_REMAIN, EXIT_NETWORK_ERROR, EXIT_SUCCESS};
use crate::guard::SessionGuard;
use crate::observability::telemetry::{
    init_tracing, init_tracing_verbose, init_tracing_with_file,
};
use crate::observability::ConsoleLogger;
use crate::probe::PortProbe;
use crate::server::ServerStatus;
use crate::session::HealthReport;

#[derive(Parser)]
#[command(name = "sessionguard")]
#[command(about = "Keeps a device automation session alive, diagnoses what breaks it")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<String>,

    /// Debug-level tracing on stderr
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    /// Also write a daily-rolling log file into this directory
    #[arg(long, value_name = "DIR", global = true)]
    log_dir: Option<PathBuf>,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,
}

/// Output format for commands that print a report
#[derive(Debug, Clone, Copy, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text (default)
    #[default]
    Text,
    /// JSON output for scripting
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every probe and print the issue report
    #[command(alias = "d")]
    Diagnose {
        /// Repair auto-fixable issues and diagnose again
        #[arg(short, long)]
        repair: bool,

        #[arg(long = "format", value_enum, default_value = "text")]
        output_format: OutputFormat,
    },

    /// List devices known to the bridge tool
    Devices {
        #[arg(long = "format", value_enum, default_value = "text")]
        output_format: OutputFormat,
    },

    /// Check whether a TCP port accepts connections
    Probe {
        host: String,
        port: u16,

        /// Connect timeout in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
    },

    /// Disconnect stale loopback entries from the device list
    CleanZombies {
        /// Cleanup rounds before giving up
        #[arg(long)]
        attempts: Option<u32>,
    },

    /// Disconnect and reconnect an offline device
    FixDevice { address: String },

    /// Poll the automation server's status endpoint once
    ServerStatus {
        #[arg(long = "format", value_enum, default_value = "text")]
        output_format: OutputFormat,
    },

    /// Open a session and keep it alive until interrupted
    #[command(alias = "w")]
    Watch {
        /// Seconds between printed health reports
        #[arg(long, default_value = "10")]
        report_every: u64,
    },
}

/// Parse arguments, run one command, and return the process exit code.
pub async fn run() -> Result<u8> {
    let cli = Cli::parse();

    if cli.no_color {
        colored::control::set_override(false);
    }

    let _log_guard = match &cli.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
            let filter = if cli.verbose { "sessionguard=debug,info" } else { "info" };
            init_tracing_with_file(filter, dir)
        }
        None => {
            if cli.verbose {
                init_tracing_verbose();
            } else {
                init_tracing();
            }
            None
        }
    };

    let config = Config::load(cli.config.as_deref())?;

    if let Commands::Probe {
        host,
        port,
        timeout_ms,
    } = &cli.command
    {
        let timeout = timeout_ms
            .map(Duration::from_millis)
            .unwrap_or_else(|| config.diagnostics.probe_timeout());
        return Ok(probe(host, *port, timeout).await);
    }

    let guard = SessionGuard::from_config(config, Arc::new(ConsoleLogger))?;

    match cli.command {
        Commands::Diagnose {
            repair,
            output_format,
        } => diagnose(&guard, repair, output_format).await,
        Commands::Devices { output_format } => devices(&guard, output_format).await,
        Commands::CleanZombies { attempts } => {
            let attempts = attempts.unwrap_or(guard.config().bridge.zombie_cleanup_attempts);
            Ok(exit_for(guard.bridge().clear_zombie_connections(attempts).await))
        }
        Commands::FixDevice { address } => {
            Ok(exit_for(guard.bridge().fix_offline_device(&address).await))
        }
        Commands::ServerStatus { output_format } => server_status(&guard, output_format).await,
        Commands::Watch { report_every } => watch(&guard, Duration::from_secs(report_every.max(1))).await,
        Commands::Probe { .. } => Ok(EXIT_SUCCESS),
    }
}

fn exit_for(ok: bool) -> u8 {
    if ok {
        EXIT_SUCCESS
    } else {
        EXIT_ISSUES_REMAIN
    }
}

async fn probe(host: &str, port: u16, timeout: Duration) -> u8 {
    if PortProbe::new(timeout).is_reachable(host, port).await {
        println!("{} {}:{} is accepting connections", "✓".green(), host, port);
        EXIT_SUCCESS
    } else {
        println!("{} {}:{} is not reachable", "✗".red(), host, port);
        EXIT_NETWORK_ERROR
    }
}

async fn diagnose(guard: &SessionGuard, repair: bool, format: OutputFormat) -> Result<u8> {
    let cycle = if repair {
        guard.diagnose_and_repair().await
    } else {
        RepairCycle {
            initial: guard.diagnose_all().await,
            summary: None,
            final_report: None,
        }
    };

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&cycle)?),
        OutputFormat::Text => {
            if let Some(summary) = &cycle.summary {
                println!("{}", cycle.initial.render_text());
                println!(
                    "{} {}/{} repair actions succeeded",
                    "Repair:".bold(),
                    summary.succeeded(),
                    summary.attempted()
                );
                for record in &summary.records {
                    let marker = if record.success { "✓".green() } else { "✗".red() };
                    println!("  {} {} ({} ms)", marker, record.action, record.elapsed_ms);
                }
                println!();
            }
            println!("{}", cycle.latest().render_text());
        }
    }

    Ok(exit_for(!cycle.latest().has_critical()))
}

async fn devices(guard: &SessionGuard, format: OutputFormat) -> Result<u8> {
    let devices = guard.bridge().list_devices().await?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&devices)?),
        OutputFormat::Text => {
            if devices.is_empty() {
                println!("No devices attached");
            }
            for device in &devices {
                let state = match device.state {
                    DeviceState::Connected => device.raw_state.green(),
                    DeviceState::Offline => device.raw_state.red(),
                    DeviceState::Unauthorized => device.raw_state.yellow(),
                    DeviceState::Unknown => device.raw_state.dimmed(),
                };
                println!("{:<32} {}", device.address, state);
            }
        }
    }
    Ok(EXIT_SUCCESS)
}

async fn server_status(guard: &SessionGuard, format: OutputFormat) -> Result<u8> {
    let status = guard.server().status().await;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&status)?),
        OutputFormat::Text => {
            let url = guard.server().status_url();
            let line = match &status {
                ServerStatus::Ready { build, elapsed_ms } => format!(
                    "{} ready in {} ms (build {})",
                    "✓".green(),
                    elapsed_ms,
                    build.as_deref().unwrap_or("unknown")
                ),
                ServerStatus::Slow { elapsed_ms } => {
                    format!("{} ready but slow ({} ms)", "!".yellow(), elapsed_ms)
                }
                ServerStatus::NotReady { message } => {
                    format!("{} not ready: {}", "!".yellow(), message)
                }
                ServerStatus::Refused => format!("{} connection refused", "✗".red()),
                ServerStatus::TimedOut => format!("{} timed out", "✗".red()),
                ServerStatus::HttpError { code } => format!("{} HTTP {}", "✗".red(), code),
                ServerStatus::Unreachable { message } => {
                    format!("{} unreachable: {}", "✗".red(), message)
                }
            };
            println!("{} {}", url.bold(), line);
        }
    }

    Ok(if status.is_ready() {
        EXIT_SUCCESS
    } else {
        EXIT_NETWORK_ERROR
    })
}

async fn watch(guard: &SessionGuard, report_every: Duration) -> Result<u8> {
    guard.open_session().await?;
    guard.start_monitoring();
    print_health(&guard.get_health_report());

    let mut ticker = tokio::time::interval(report_every);
    ticker.tick().await;

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                eprintln!("\nReceived shutdown signal, stopping monitor...");
                break;
            }
            _ = ticker.tick() => {
                print_health(&guard.get_health_report());
                if !guard.monitor().is_monitoring() {
                    break;
                }
            }
        }
    }

    let report = guard.get_health_report();
    guard.shutdown().await;
    Ok(exit_for(report.alive))
}

fn print_health(report: &HealthReport) {
    let marker = if report.alive { "●".green() } else { "●".red() };
    println!(
        "{} {} session={} reconnects={} failures={}{}",
        marker,
        report.phase,
        report.session_id.as_deref().unwrap_or("-"),
        report.reconnect_count,
        report.total_failures,
        report
            .last_error
            .as_deref()
            .map(|e| format!(" last_error={}", e))
            .unwrap_or_default()
    );
}

/// Resolves on ctrl-c, or on SIGTERM where available.
pub async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {},
                    _ = sigterm.recv() => {},
                }
            }
            Err(e) => {
                tracing::warn!("SIGTERM handler unavailable: {}", e);
                ctrl_c.await.ok();
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}
