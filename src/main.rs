//! oneputt-bridge - headless OnePutt putting sensor bridge
//!
//! Reads `start`, `stop`, `pause`, `resume`, `club <code>` and `quit` from
//! stdin and logs everything the sensor reports.

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use log::{error, info, warn};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use oneputt_bridge_lib::commands::parse_command;
use oneputt_bridge_lib::config::{AppConfig, default_config_dir};
use oneputt_bridge_lib::core::{ControllerCommand, DeviceEvent};
use oneputt_bridge_lib::logging::{init_logging, print_json_lines};
use oneputt_bridge_lib::utils::battery_label;
use oneputt_bridge_lib::{Bridge, bluetooth_bridge, simulated_bridge};

#[derive(Parser)]
#[command(name = "oneputt-bridge")]
#[command(about = "Connects a OnePutt putting sensor and reports its shots")]
#[command(version)]
struct Cli {
    /// Use a simulated sensor instead of the Bluetooth adapter
    #[arg(long)]
    simulate: bool,

    /// Directory holding config.json
    #[arg(long)]
    config_dir: Option<PathBuf>,

    /// Write the effective configuration to the config directory and continue
    #[arg(long)]
    save_config: bool,

    /// Start scanning right away
    #[arg(long)]
    autostart: bool,

    /// Also print log messages to stdout as JSON lines, next to the shots
    #[arg(long)]
    json_logs: bool,

    /// Verbose logging
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_dir = match cli.config_dir.clone() {
        Some(dir) => dir,
        None => default_config_dir()?,
    };
    let config = AppConfig::load_config(&config_dir).await?;

    let level = match cli.verbose {
        0 => config.logging.level_filter(),
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    let log_sink = if cli.json_logs {
        let (tx, rx) = mpsc::unbounded_channel();
        // the global logger keeps the sender, so this task lives until exit
        tokio::spawn(print_json_lines(rx));
        Some(tx)
    } else {
        None
    };
    init_logging(level, log_sink);

    if cli.save_config {
        config.save_config(&config_dir).await?;
    }

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let token = CancellationToken::new();
    let Bridge {
        controller,
        handle,
        demo,
    } = if cli.simulate {
        info!("Running against a simulated OnePutt");
        simulated_bridge(&config, events_tx, token.clone())
    } else {
        bluetooth_bridge(&config, events_tx).await?
    };

    let controller_task = tokio::spawn(controller.run());
    let printer = tokio::spawn(print_events(events_rx, config.logging.print_shots));

    if cli.autostart {
        handle.start()?;
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    info!("stdin closed, shutting down");
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                match parse_command(&line) {
                    Ok(ControllerCommand::Shutdown) => break,
                    Ok(command) => handle.send(command)?,
                    Err(e) => warn!("{}", e),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, shutting down");
                break;
            }
        }
    }

    if handle.shutdown().is_err() {
        warn!("Controller already stopped");
    }
    if let Err(e) = controller_task.await {
        error!("Controller task failed: {}", e);
    }
    token.cancel();
    if let Some(demo) = demo {
        let _ = demo.await;
    }
    drop(handle);
    let _ = printer.await;
    Ok(())
}

async fn print_events(mut events: mpsc::UnboundedReceiver<DeviceEvent>, print_shots: bool) {
    while let Some(event) = events.recv().await {
        match &event {
            DeviceEvent::Shot(ball) => {
                info!("Putting shot: {} mph, HLA {}, VLA {}", ball.speed, ball.hla, ball.vla);
                if print_shots {
                    match serde_json::to_string(&event) {
                        Ok(json) => println!("{}", json),
                        Err(e) => error!("Failed to serialize shot: {}", e),
                    }
                }
            }
            DeviceEvent::Battery(level) => info!("Battery: {}", battery_label(*level)),
            DeviceEvent::Connected(status) => info!("Putting device {}", status),
            DeviceEvent::Status { kind, message } => info!("{}: {}", kind, message),
            DeviceEvent::Error(message) => error!("Putting device error: {}", message),
            DeviceEvent::Rssi(rssi) => info!("RSSI: {}", rssi),
            DeviceEvent::Scanning(message) => info!("{}", message),
            DeviceEvent::DeviceNotFound(message) | DeviceEvent::ScanError(message) => {
                warn!("{}", message)
            }
            DeviceEvent::Disconnected => info!("Putting device disconnected"),
            DeviceEvent::Forwarding { paused } => {
                info!("Shot forwarding {}", if *paused { "paused" } else { "active" })
            }
        }
    }
}
