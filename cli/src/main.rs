// quizmesh — command line front end
//
// Inspect relay payloads, manage settings and run a whole quiz session
// in-process to watch the relay protocol converge.

mod config;
mod simulate;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use quizmesh_core::{build_score_payload, decode_message, RelayMessage};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "quizmesh")]
#[command(about = "quizmesh — nearby multiplayer quiz session relay", long_about = None)]
#[command(version)]
struct Cli {
    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Write logs to this file instead of stderr
    #[arg(long, global = true)]
    log_file: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Configure settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Run a host and guests in-process and print every scoreboard
    Simulate {
        #[arg(short, long)]
        guests: Option<usize>,
        /// Round length in seconds
        #[arg(short, long)]
        seconds: Option<u32>,
        /// Clock tick in milliseconds
        #[arg(long)]
        tick_ms: Option<u64>,
        /// Seed for the simulated answers
        #[arg(long)]
        seed: Option<u64>,
        /// Print the reports as JSON
        #[arg(long)]
        json: bool,
    },
    /// Decode a relay payload
    Decode {
        payload: String,
        /// The payload is hex encoded
        #[arg(long)]
        hex: bool,
    },
    /// Build a score payload
    Encode {
        endpoint_id: String,
        score: u32,
        /// Mark the score as final
        #[arg(long = "final")]
        is_final: bool,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    Set { key: String, value: String },
    Get { key: String },
    List,
    /// Print the config file location
    Path,
}

fn init_logging(cli: &Cli, config: &config::Config) -> Result<Option<WorkerGuard>> {
    let default_level = if cli.verbose {
        "debug"
    } else {
        config.log_level.as_str()
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let log_file = cli.log_file.as_deref().or(config.log_file.as_deref());
    match log_file {
        Some(path) => {
            let path = Path::new(path);
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let file_name = path.file_name().context("Log file path has no file name")?;
            std::fs::create_dir_all(dir).context("Failed to create log directory")?;

            let appender = tracing_appender::rolling::never(dir, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
            Ok(None)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = config::Config::load()?;
    let _log_guard = init_logging(&cli, &config)?;

    match cli.command {
        Commands::Config { action } => cmd_config(config, action),
        Commands::Simulate {
            guests,
            seconds,
            tick_ms,
            seed,
            json,
        } => cmd_simulate(config, guests, seconds, tick_ms, seed, json).await,
        Commands::Decode { payload, hex } => cmd_decode(&payload, hex),
        Commands::Encode {
            endpoint_id,
            score,
            is_final,
        } => cmd_encode(&endpoint_id, score, is_final),
    }
}

fn cmd_config(mut config: config::Config, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Set { key, value } => {
            config.set(&key, &value)?;
            config.save()?;
            println!("{} Set {} = {}", "✓".green(), key.bright_cyan(), value);
        }

        ConfigAction::Get { key } => match config.get(&key) {
            Some(value) => println!("{} = {}", key.bright_cyan(), value),
            None if key == "log_file" => println!("{} = {}", key.bright_cyan(), "(stderr)".dimmed()),
            None => anyhow::bail!("Unknown config key: {}", key),
        },

        ConfigAction::List => {
            println!("{}", "Configuration".bold());
            println!();
            for (key, value) in config.list() {
                println!("  {:<20} {}", key.bright_cyan(), value);
            }
        }

        ConfigAction::Path => {
            println!("{}", config::Config::config_file()?.display());
        }
    }

    Ok(())
}

async fn cmd_simulate(
    config: config::Config,
    guests: Option<usize>,
    seconds: Option<u32>,
    tick_ms: Option<u64>,
    seed: Option<u64>,
    json: bool,
) -> Result<()> {
    let mut session = config.session.clone();
    if let Some(seconds) = seconds {
        session.round_duration_secs = seconds;
    }
    if let Some(tick_ms) = tick_ms {
        session.tick_interval_ms = tick_ms;
    }
    let guests = guests.unwrap_or(config.simulation.guests);

    if !json {
        println!(
            "{} 1 host + {} guests, {}s round",
            "Simulating".bold(),
            guests,
            session.round_duration_secs
        );
    }

    let report = simulate::run(simulate::SimulationOptions {
        session,
        guests,
        accuracy: config.simulation.accuracy,
        seed,
    })
    .await?;

    if json {
        let devices: Vec<serde_json::Value> = report
            .devices
            .iter()
            .map(|d| {
                serde_json::json!({
                    "name": d.name,
                    "endpoint_id": d.endpoint_id,
                    "final_score": d.final_score,
                    "scoreboard": d.scoreboard.lines().collect::<Vec<_>>(),
                })
            })
            .collect();
        let out = serde_json::json!({ "converged": report.converged, "devices": devices });
        println!(
            "{}",
            serde_json::to_string_pretty(&out).context("Failed to serialize report")?
        );
        return Ok(());
    }

    for device in &report.devices {
        println!();
        println!(
            "{} {}",
            device.name.bold(),
            format!("({})", device.endpoint_id).dimmed()
        );
        for line in device.scoreboard.lines() {
            println!("  {}", line);
        }
    }
    println!();
    if report.converged {
        println!("{} Every device holds every final score", "✓".green());
    } else {
        println!("{} Scoreboards did not converge", "✗".red());
    }
    Ok(())
}

fn cmd_decode(payload: &str, is_hex: bool) -> Result<()> {
    let bytes = if is_hex {
        hex::decode(payload.trim()).context("Invalid hex payload")?
    } else {
        payload.as_bytes().to_vec()
    };

    match decode_message(&bytes) {
        Ok(message) => {
            println!("{} {}", "✓".green(), message);
            if let RelayMessage::Score(score) = &message {
                let subject = if score.is_self_report() {
                    "sender".to_string()
                } else {
                    score.endpoint_id.clone()
                };
                println!("  {:<10} {}", "subject".bright_cyan(), subject);
                println!("  {:<10} {}", "score".bright_cyan(), score.score);
                println!("  {:<10} {}", "final".bright_cyan(), score.is_final);
            }
            Ok(())
        }
        Err(e) => {
            println!("{} {}", "✗".red(), e);
            anyhow::bail!("Payload {} is not a valid relay message", hex::encode(&bytes))
        }
    }
}

fn cmd_encode(endpoint_id: &str, score: u32, is_final: bool) -> Result<()> {
    let payload = build_score_payload(score, endpoint_id, is_final)
        .context("Cannot build score payload")?;
    println!("{}", String::from_utf8_lossy(&payload));
    println!("{}", hex::encode(&payload).dimmed());
    Ok(())
}
