use std::{error::Error, sync::Arc};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

mod app_metrics;
mod bridge;
mod config;
mod error;
mod frame_filter;
mod outbound;
mod reporter;
mod socketcan_channel;
mod transport;
mod udp_ingress;
mod writer_process;

use bridge::{Bridge, BridgeHandle, BridgeOptions, Collaborators, Upward};
use config::Config;
use nmea2k::{AddressClaimer, RawPayloadEncoder, StaticAddressClaimer};
use reporter::TracingReporter;
use transport::{SystemTransportFactory, TransportMode};
use udp_ingress::UdpIngress;

// ========== Logging Setup ==========

fn init_logging(log_config: &config::LogConfig) -> Result<(), Box<dyn Error>> {
    use tracing_appender::rolling;
    use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

    // Create log directory if it doesn't exist
    std::fs::create_dir_all(&log_config.directory)?;

    // Create daily rolling file appender
    let file_appender = rolling::daily(&log_config.directory, &log_config.file_prefix);

    let file_layer = fmt::layer()
        .with_writer(file_appender)
        .with_ansi(false)
        .with_timer(fmt::time::OffsetTime::local_rfc_3339().unwrap_or_else(|_| {
            fmt::time::OffsetTime::new(time::UtcOffset::UTC, time::format_description::well_known::Rfc3339)
        }));

    // stdout carries the upward stream
    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_timer(fmt::time::OffsetTime::local_rfc_3339().unwrap_or_else(|_| {
            fmt::time::OffsetTime::new(time::UtcOffset::UTC, time::format_description::well_known::Rfc3339)
        }));

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log_config.level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    Ok(())
}

fn print_help() {
    println!("NMEA2000 CAN bridge");
    println!();
    println!("USAGE:");
    println!("    nmea_canbridge [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("    --config <path>                      Configuration file (default: config.json)");
    println!("    --stdin                              Exchange JSON lines over stdin/stdout");
    println!("    --writer                             Write frames through the external writer");
    println!("    --validate-config, --validate, -v    Validate configuration and exit");
    println!("    --help, -h                           Show this help message");
}

// ========== Upward Output ==========

/// Writes inbound traffic to stdout, one JSON envelope or text line per frame
async fn print_upward(mut upward: mpsc::UnboundedReceiver<Upward>) {
    let mut stdout = tokio::io::stdout();
    while let Some(item) = upward.recv().await {
        let line = match item {
            Upward::Envelope(envelope) => match serde_json::to_string(&envelope) {
                Ok(json) => json,
                Err(e) => {
                    warn!("Failed to serialize envelope: {}", e);
                    continue;
                }
            },
            Upward::Text(text) => text,
        };
        if let Err(e) = stdout.write_all(format!("{}\n", line).as_bytes()).await {
            error!("stdout closed: {}", e);
            return;
        }
    }
}

/// Feeds candump text from stdin to the bridge
async fn read_candump_stdin(handle: BridgeHandle) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if !handle.line(line) {
                    return;
                }
            }
            Ok(None) => {
                debug!("stdin closed");
                return;
            }
            Err(e) => {
                warn!("Error reading stdin: {}", e);
                return;
            }
        }
    }
}

// ========== Main Application ==========

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let args: Vec<String> = std::env::args().collect();

    if args.contains(&"--help".to_string()) || args.contains(&"-h".to_string()) {
        print_help();
        std::process::exit(0);
    }

    let validate_only = args.contains(&"--validate-config".to_string())
        || args.contains(&"--validate".to_string())
        || args.contains(&"-v".to_string());

    let config_path = args
        .iter()
        .position(|arg| arg == "--config")
        .and_then(|i| args.get(i + 1))
        .cloned()
        .unwrap_or_else(|| "config.json".to_string());

    let mut config = match Config::from_file(&config_path) {
        Ok(cfg) => {
            if validate_only {
                println!("✓ Configuration validation successful");
                println!("  CAN interface: {}", cfg.can_interface);
                println!(
                    "  Transport: external writer={}, stdin={}, writer command={}",
                    cfg.transport.use_external_writer, cfg.transport.from_stdin, cfg.transport.writer_command
                );
                println!("  Multi-frame PGNs: {:?}", cfg.multi_frame_pgns);
                println!("  Device address: {}", cfg.device.preferred_address);
                std::process::exit(0);
            }
            cfg
        }
        Err(e) => {
            let err_msg = e.to_string();
            if validate_only {
                eprintln!("✗ Configuration validation failed: {}", e);
                std::process::exit(1);
            }
            if err_msg.contains("CAN interface") {
                eprintln!("Fatal configuration error: {}", e);
                eprintln!("Please fix the CAN interface configuration and try again.");
                std::process::exit(1);
            }
            eprintln!("Warning: Could not load {}: {}", config_path, e);
            eprintln!("Using default configuration");
            Config::default()
        }
    };

    if args.contains(&"--stdin".to_string()) {
        config.transport.from_stdin = true;
    }
    if args.contains(&"--writer".to_string()) {
        config.transport.use_external_writer = true;
    }

    init_logging(&config.logging)?;
    info!("NMEA2000 CAN bridge starting...");

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let (upward_tx, upward_rx) = mpsc::unbounded_channel();

    let device: Box<dyn AddressClaimer> = Box::new(StaticAddressClaimer::new(
        config.device.iso_name(),
        config.device.preferred_address,
    ));
    let collaborators = Collaborators {
        factory: Arc::new(SystemTransportFactory),
        reporter: Arc::new(TracingReporter::new("nmea_canbridge")),
        encoder: Box::new(RawPayloadEncoder),
        device: Some(device),
    };

    let bridge = Bridge::start(BridgeOptions::from(&config), collaborators, upward_tx, events_tx.clone()).await;
    let handle = BridgeHandle::new(events_tx);
    info!("Transport mode: {:?}", bridge.mode());

    tokio::spawn(print_upward(upward_rx));

    if matches!(bridge.mode(), TransportMode::StdioPipe | TransportMode::ExternalWriter) {
        tokio::spawn(read_candump_stdin(handle.clone()));
    }

    if let Some(address) = config.outbound.udp_listen.as_deref() {
        match UdpIngress::bind(address, handle.clone()).await {
            Ok(ingress) => {
                tokio::spawn(ingress.run());
            }
            Err(e) => error!("Failed to bind UDP listener on {}: {}", address, e),
        }
    }

    let shutdown = handle.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Interrupted, shutting down");
                shutdown.shutdown();
            }
            Err(e) => warn!("Unable to listen for Ctrl-C: {}", e),
        }
    });

    bridge::run(bridge, events_rx).await;
    info!("NMEA2000 CAN bridge stopped");
    Ok(())
}
