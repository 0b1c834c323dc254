//! Binary entrypoint for the loglink CLI.
//!
//! Commands:
//! - `start [--port <path>]` - connect to the display and stream stdin lines to it
//! - `init` - write a starter `config.toml`
//!
//! Lines shaped like `E/tag: message` keep their severity and tag; anything
//! else is logged as Info under the `stdin` tag.
//!
//! See the library crate docs for module-level details: `loglink::`.
use anyhow::Result;
use clap::{Parser, Subcommand};
use log::{info, warn};
use tokio::io::{AsyncBufReadExt, BufReader};

use loglink::bridge::LogHandle;
use loglink::config::Config;
use loglink::logger::{self, DeviceSink};
use loglink::store::Severity;

#[derive(Parser)]
#[command(name = "loglink")]
#[command(about = "Mirror an application log onto a serial display device")]
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
    /// Connect to the device and forward stdin lines
    Start {
        /// Display device port (e.g., /dev/ttyACM0); overrides the config
        #[arg(short, long)]
        port: Option<String>,
    },
    /// Write a default configuration file
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Start { port } => {
            let mut config = Config::load(&cli.config).await?;
            if let Some(cli_port) = port {
                config.serial.port = cli_port;
            }
            let sink = init_logging(Some(&config), cli.verbose);
            info!("Starting loglink v{}", env!("CARGO_PKG_VERSION"));
            run_link(config, sink).await?;
        }
        Commands::Init => {
            init_logging(None, cli.verbose);
            Config::create_default(&cli.config).await?;
            info!("Configuration file created at {}", cli.config);
        }
    }

    Ok(())
}

#[cfg(feature = "serial")]
async fn run_link(config: Config, sink: Option<DeviceSink>) -> Result<()> {
    use loglink::bridge::DeviceLog;
    use loglink::link::SerialTransport;

    if config.serial.port.is_empty() {
        return Err(anyhow::anyhow!(
            "No device port configured; set [serial].port or pass --port"
        ));
    }
    let transport = SerialTransport::open(&config.serial)?;
    let link = DeviceLog::start(transport, config.link.clone())?;
    let log = link.handle();
    if let Some(sink) = sink {
        sink.attach(log.clone());
    }
    info!("Connected to display on {}", config.serial.port);

    pump_stdin(&log).await?;

    // Joining the engine blocks until it releases the port.
    let metrics = link.metrics();
    tokio::task::spawn_blocking(move || link.shutdown()).await?;
    info!("Link closed: {:?}", metrics);
    Ok(())
}

#[cfg(not(feature = "serial"))]
async fn run_link(_config: Config, _sink: Option<DeviceSink>) -> Result<()> {
    Err(anyhow::anyhow!(
        "Start requires the 'serial' feature (cargo build --features serial)"
    ))
}

/// Append stdin lines until EOF or Ctrl-C.
#[cfg_attr(not(feature = "serial"), allow(dead_code))]
async fn pump_stdin(log: &LogHandle) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            line = lines.next_line() => match line? {
                Some(line) => append_line(log, &line),
                None => {
                    info!("stdin closed");
                    break;
                }
            },
            res = &mut ctrl_c => {
                if let Err(e) = res {
                    warn!("Ctrl-C handler failed: {}", e);
                }
                info!("Interrupted");
                break;
            }
        }
    }
    Ok(())
}

#[cfg_attr(not(feature = "serial"), allow(dead_code))]
fn append_line(log: &LogHandle, line: &str) {
    let line = line.trim_end();
    if line.is_empty() {
        return;
    }
    match logger::parse_line(line) {
        Some(parsed) => log.append(parsed.tag, parsed.message, parsed.message, parsed.severity),
        None => log.append("stdin", line, line, Severity::Info),
    };
}

/// Install the console/file logger; returns the sink that mirrors records to the device.
fn init_logging(config: Option<&Config>, verbosity: u8) -> Option<DeviceSink> {
    use std::io::Write;
    let mut builder = env_logger::Builder::new();
    // CLI verbosity overrides the configured level
    let base_level = match verbosity {
        0 => config.map_or(log::LevelFilter::Info, |c| c.logging.level_filter()),
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    builder.filter_level(base_level);

    let log_file = config
        .and_then(|c| c.logging.file.as_ref())
        .and_then(|file| {
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(file)
                .ok()
        });
    if let Some(f) = log_file {
        let write_mutex = std::sync::Arc::new(std::sync::Mutex::new(f));
        // Echo to the console only when someone is watching it
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
            writeln!(
                fmt,
                "{} [{}] {}",
                chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ"),
                record.level(),
                record.args()
            )
        });
    }

    let forward = config.is_some_and(|c| c.logging.forward_to_device);
    logger::install(&mut builder, forward).ok()
}
