//! Binary entrypoint for the oicbridge CLI.
//!
//! Commands:
//! - `start [--port <path>]` - run the endpoint, optionally on a specific serial port
//! - `init` - write a starter `config.toml`
//! - `ports` - list serial adapters and show which one auto-selection picks
//!
//! While running, each stdin line `<resource> <value>` is pushed to the
//! observers of that resource. Ctrl-C or end of input stops the endpoint.
//!
//! See the library crate docs for module-level details: `oicbridge::`.
use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use log::{info, warn};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

use oicbridge::actuator::{available_port_names, select_port, start_actuator, SerialLine};
use oicbridge::config::Config;
use oicbridge::gateway::{Gateway, Transmitter};
use oicbridge::lights::{build_server, NotifyValue};
use oicbridge::logutil::escape_log;
use oicbridge::metrics;

#[derive(Parser)]
#[command(name = "oicbridge")]
#[command(about = "OIC/CoAP light endpoint driving a serial actuator")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (can be used before or after subcommand)
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: String,

    /// Verbose logging (-v, -vv for more; may appear before or after subcommand)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the endpoint
    Start {
        /// Actuator serial port (e.g., /dev/ttyUSB0)
        #[arg(short, long)]
        port: Option<String>,
    },
    /// Write a default configuration file
    Init,
    /// List serial adapters
    Ports,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Start { port } => {
            let config = Config::load(&cli.config).await?;
            init_logging(&Some(config.clone()), cli.verbose);
            info!("Starting oicbridge v{}", env!("CARGO_PKG_VERSION"));
            run(config, port).await?;
        }
        Commands::Init => {
            init_logging(&None, cli.verbose);
            if std::path::Path::new(&cli.config).exists() {
                return Err(anyhow!("{} already exists; not overwriting", cli.config));
            }
            Config::create_default(&cli.config).await?;
            info!("Configuration file created at {}", cli.config);
        }
        Commands::Ports => {
            let pre_config = Config::load(&cli.config).await.ok();
            init_logging(&pre_config, cli.verbose);
            let configured = pre_config.as_ref().and_then(|c| c.serial.configured_port().map(str::to_string));
            let names = available_port_names();
            let chosen = select_port(configured.as_deref(), &names);
            if names.is_empty() {
                println!("No serial adapters found.");
            }
            for name in &names {
                let mark = if chosen.as_deref() == Some(name.as_str()) { "*" } else { " " };
                println!("{} {}", mark, name);
            }
            match chosen {
                Some(p) => println!("Actuator port: {}", p),
                None => println!("Actuator port: none (outputs would be ignored)"),
            }
        }
    }

    Ok(())
}

async fn run(config: Config, port: Option<String>) -> Result<()> {
    // CLI overrides config; empty config falls back to auto-selection
    let configured = port.or_else(|| config.serial.configured_port().map(str::to_string));
    let line = SerialLine::connect(configured.as_deref(), config.serial.baud_rate, config.serial.write_timeout());
    let actuator = Arc::new(start_actuator(line));

    let transmitter = Transmitter::new();
    let server = build_server(&config, transmitter.callback(), actuator)?;
    let mut gateway = Gateway::start(&config.network, server, transmitter)?;

    info!("Enter '<resource> <value>' to notify observers; Ctrl-C to stop");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
            line = lines.next_line() => match line {
                Ok(Some(line)) => operator_command(&gateway, &line),
                Ok(None) => {
                    info!("Console closed");
                    break;
                }
                Err(e) => {
                    warn!("Console read failed: {}", e);
                    break;
                }
            },
        }
    }

    gateway.shutdown().await;
    match serde_json::to_string(&metrics::snapshot()) {
        Ok(json) => info!("metrics {}", json),
        Err(e) => warn!("metrics snapshot not serializable: {}", e),
    }
    Ok(())
}

fn operator_command(gateway: &Gateway, line: &str) {
    let line = line.trim();
    if line.is_empty() {
        return;
    }
    let Some((name, value)) = line.split_once(char::is_whitespace) else {
        warn!("Expected '<resource> <value>', got '{}'", escape_log(line));
        return;
    };
    let n = gateway.notify_observers(name, &NotifyValue::parse(value));
    info!("{} -> {} observer(s)", escape_log(name), n);
}

fn init_logging(config: &Option<Config>, verbosity: u8) {
    use std::io::Write;
    let mut builder = env_logger::Builder::new();
    // CLI verbosity wins over the configured level
    let base_level = match verbosity {
        0 => config
            .as_ref()
            .and_then(|c| c.logging.level.parse().ok())
            .unwrap_or(log::LevelFilter::Info),
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    builder.filter_level(base_level);

    let file = config
        .as_ref()
        .and_then(|c| c.logging.file.as_ref())
        .and_then(|path| std::fs::OpenOptions::new().create(true).append(true).open(path).ok());

    if let Some(f) = file {
        let write_mutex = std::sync::Arc::new(std::sync::Mutex::new(f));
        // Echo to the console only in the foreground
        let is_tty = atty::is(atty::Stream::Stdout);
        builder.format(move |fmt, record| {
            let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
            let line = format!("{} [{}] {}", ts, record.level(), record.args());
            if let Ok(mut guard) = write_mutex.lock() {
                let _ = writeln!(guard, "{}", line);
            }
            if is_tty {
                writeln!(fmt, "{}", line)
            } else {
                Ok(())
            }
        });
    } else {
        builder.format(|fmt, record| {
            let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
            writeln!(fmt, "{} [{}] {}", ts, record.level(), record.args())
        });
    }
    let _ = builder.try_init();
}
