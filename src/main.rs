//! Binary entrypoint for the beaconmesh CLI.
//!
//! Commands:
//! - `init` - create a starter `config.toml` with a generated callsign
//! - `status` - print node identity and log store summary as JSON
//! - `split --to <dest> <text>` - show the parcels a message would be sent as
//! - `replay <file>` - feed captured advertisement payloads through ingestion
//! - `simulate <text>` - two nodes on an in-memory medium exchange a message
//! - `log query|count|clear|roll` - inspect and maintain the message log
//!
//! See the library crate docs for module-level details: `beaconmesh::`.
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use log::{info, warn};

use beaconmesh::config::{generate_callsign, Config};
use beaconmesh::events::Event;
use beaconmesh::metrics;
use beaconmesh::node::{BeaconNode, BROADCAST_DESTINATION};
use beaconmesh::parcel::OutboundMessage;
use beaconmesh::radio::loopback::LoopbackMedium;
use beaconmesh::radio::{Address, ScanResult};
use beaconmesh::recorder::start_recorder;
use beaconmesh::storage::{LogStore, RecordFilter};

#[derive(Parser)]
#[command(name = "beaconmesh")]
#[command(about = "Offline messaging over short-range radio advertisements")]
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
    /// Write a default configuration with a fresh callsign
    Init,
    /// Show node identity and log store statistics
    Status,
    /// Print the parcels a message would be broadcast as
    Split {
        /// Sender callsign (defaults to the configured one)
        #[arg(long)]
        from: Option<String>,
        /// Destination callsign
        #[arg(long, default_value = BROADCAST_DESTINATION)]
        to: String,
        /// Message text
        text: String,
    },
    /// Feed a capture file (one raw payload per line) through ingestion
    Replay {
        /// Capture file; blank lines and lines starting with '#' are skipped
        file: String,
        /// Synthetic time between consecutive lines
        #[arg(long, default_value_t = 100)]
        interval_ms: u32,
        /// Persist completed messages and texts to the log store
        #[arg(long)]
        record: bool,
    },
    /// Exchange a message between two nodes on an in-memory medium
    Simulate {
        /// Message text
        text: String,
        /// Destination callsign
        #[arg(long, default_value = BROADCAST_DESTINATION)]
        to: String,
    },
    /// Inspect or maintain the message log
    Log {
        #[command(subcommand)]
        action: LogAction,
    },
}

#[derive(Subcommand)]
enum LogAction {
    /// List records, newest first
    Query {
        /// Record type (RCV, TXT, SNT)
        #[arg(long = "type")]
        kind: Option<String>,
        /// Content substring
        #[arg(long)]
        contains: Option<String>,
        /// Earliest timestamp, inclusive (YYYY-MM-DD_HH:MM_SS)
        #[arg(long)]
        from: Option<String>,
        /// Latest timestamp, inclusive (YYYY-MM-DD_HH:MM_SS)
        #[arg(long)]
        to: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: usize,
        /// Emit JSON lines
        #[arg(long)]
        json: bool,
    },
    /// Count records across all segments
    Count,
    /// Delete every segment
    Clear {
        /// Restart segment numbering at 1
        #[arg(long)]
        reset_seq: bool,
    },
    /// Start a new segment now
    Roll,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let pre_config = match cli.command {
        Commands::Init => None,
        _ => Config::load(&cli.config).await.ok(),
    };
    init_logging(&pre_config, cli.verbose);

    match cli.command {
        Commands::Init => {
            info!("Initializing new node configuration");
            Config::create_default(&cli.config).await?;
            let config = Config::load(&cli.config).await?;
            info!("Configuration file created at {}", cli.config);
            println!("Callsign: {}", config.node.callsign);
        }
        Commands::Status => {
            let config = load_config(pre_config, &cli.config).await?;
            let mut status = serde_json::json!({
                "callsign": config.node.callsign,
                "version": env!("CARGO_PKG_VERSION"),
                "store": null,
            });
            if config.store.enabled {
                let store = LogStore::open(config.store_options()).await?;
                status["store"] = serde_json::json!({
                    "dir": config.store.dir,
                    "seq": store.current_seq(),
                    "tail_bytes": store.current_bytes(),
                    "records": store.count_total().await?,
                });
                store.close().await?;
            }
            status["metrics"] = serde_json::to_value(metrics::snapshot())?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Commands::Split { from, to, text } => {
            let config = load_config(pre_config, &cli.config).await?;
            let sender = from.unwrap_or_else(|| config.node.callsign.clone());
            let marker = config.radio.marker_byte()? as char;
            let message = OutboundMessage::new(&sender, &to, &text, config.radio.parcel_text_len);
            for parcel in message.parcels() {
                let fits = if parcel.len() <= config.radio.adv_text_max { "" } else { "  (too long)" };
                println!("{}{}{}", marker, parcel, fits);
            }
        }
        Commands::Replay {
            file,
            interval_ms,
            record,
        } => {
            let config = load_config(pre_config, &cli.config).await?;
            replay(&config, &file, interval_ms, record).await?;
        }
        Commands::Simulate { text, to } => {
            let config = load_config(pre_config, &cli.config).await?;
            simulate(&config, text, to).await?;
        }
        Commands::Log { action } => {
            let config = load_config(pre_config, &cli.config).await?;
            log_command(&config, action).await?;
        }
    }

    Ok(())
}

/// Load (or reuse) the configuration, filling in a callsign for this run
/// if the file still carries a placeholder.
async fn load_config(pre: Option<Config>, path: &str) -> Result<Config> {
    let mut config = match pre {
        Some(c) => c,
        None => Config::load(path).await?,
    };
    if config.ensure_callsign() {
        warn!(
            "No callsign configured; using {} for this run (run `beaconmesh init` to persist one)",
            config.node.callsign
        );
    }
    config.validate()?;
    Ok(config)
}

fn print_event(who: &str, event: &Event) {
    match event {
        Event::SingleText { text, rssi, origin } => {
            println!("[{}] text from {} ({} dBm): {}", who, origin, rssi, text);
        }
        Event::MessageDone {
            id,
            sender,
            destination,
            checksum,
            length,
            preview,
        } => {
            let more = if *length > preview.len() { "…" } else { "" };
            println!(
                "[{}] message {} {} -> {} [{}] {} bytes: {}{}",
                who, id, sender, destination, checksum, length, preview, more
            );
        }
    }
}

async fn replay(config: &Config, file: &str, interval_ms: u32, record: bool) -> Result<()> {
    let content = tokio::fs::read_to_string(file)
        .await
        .map_err(|e| anyhow!("Failed to read capture file {}: {}", file, e))?;

    let medium = LoopbackMedium::new();
    let mut node = BeaconNode::new(config.node_config()?, medium.radio());
    let recorder = if record {
        let store = LogStore::open(config.store_options()).await?;
        let handle = start_recorder(store);
        node.attach_recorder(handle.clone());
        Some(handle)
    } else {
        None
    };
    node.subscribe(|e| print_event("replay", e))
        .ok_or_else(|| anyhow!("no free event subscriber slot"))?;

    let origin = Address([0x02, 0, 0, 0, 0, 0xFF]);
    let mut now: u32 = 0;
    let mut lines = 0usize;
    for line in content.lines() {
        if line.trim().is_empty() || line.starts_with('#') {
            continue;
        }
        let outcome = node.ingest_at(&ScanResult::new(line.as_bytes().to_vec(), -60, origin), now);
        log::debug!("line {}: {:?}", lines + 1, outcome);
        while node.drain_events() > 0 {}
        now = now.wrapping_add(interval_ms);
        lines += 1;
    }
    info!(
        "Replayed {} payloads ({} in flight, {} events dropped)",
        lines,
        node.ingest().inflight().active(),
        node.bus().dropped()
    );

    if let Some(recorder) = recorder {
        if let Some(stats) = recorder.snapshot().await {
            info!(
                "Recorded {} entries ({} duplicates, {} failures)",
                stats.appended, stats.duplicates, stats.failures
            );
        }
        recorder.shutdown().await;
    }
    Ok(())
}

async fn simulate(config: &Config, text: String, to: String) -> Result<()> {
    let medium = LoopbackMedium::new().with_copies(3);

    let sender = Arc::new(BeaconNode::new(config.node_config()?, medium.radio()));
    let mut peer_config = config.node_config()?;
    peer_config.callsign = generate_callsign();
    peer_config.send_jitter_ms = 0;
    let mut peer = BeaconNode::new(peer_config, medium.radio());

    let recorder = if config.store.enabled {
        let store = LogStore::open(config.store_options()).await?;
        let handle = start_recorder(store);
        peer.attach_recorder(handle.clone());
        Some(handle)
    } else {
        None
    };
    let peer_name = peer.callsign().to_string();
    peer.subscribe(move |e| print_event(&peer_name, e))
        .ok_or_else(|| anyhow!("no free event subscriber slot"))?;

    sender.start()?;
    peer.start()?;
    info!("{} -> {} over loopback", sender.callsign(), peer.callsign());

    let tx = sender.clone();
    let beacon = config.beacon.clone();
    let message = tokio::task::spawn_blocking(move || -> Result<OutboundMessage> {
        if beacon.enabled {
            tx.send_ping()?;
            // the beacon schedule compressed to simulation time
            std::thread::sleep(beacon.next_delay().min(Duration::from_millis(250)));
        }
        Ok(tx.send_message(&to, &text)?)
    })
    .await??;
    println!(
        "[{}] sent {} as {} parcels (checksum {})",
        sender.callsign(),
        message.id,
        message.parcels().len(),
        message.checksum
    );

    while peer.drain_events() > 0 {}

    if let Some(recorder) = recorder {
        recorder.shutdown().await;
    }
    Ok(())
}

async fn log_command(config: &Config, action: LogAction) -> Result<()> {
    let mut store = LogStore::open(config.store_options()).await?;
    match action {
        LogAction::Query {
            kind,
            contains,
            from,
            to,
            limit,
            json,
        } => {
            let filter = RecordFilter {
                kind,
                contains,
                from,
                to,
            };
            for rec in store.query(&filter, limit).await? {
                if json {
                    let line = serde_json::json!({
                        "timestamp": rec.timestamp,
                        "type": rec.kind,
                        "checksum": rec.checksum,
                        "content": rec.content_lossy(),
                    });
                    println!("{}", line);
                } else {
                    println!("{} {} {} {}", rec.timestamp, rec.kind, rec.checksum, rec.content_lossy());
                }
            }
        }
        LogAction::Count => {
            println!("{}", store.count_total().await?);
        }
        LogAction::Clear { reset_seq } => {
            store.delete_all(reset_seq).await?;
            println!("Log cleared; now on segment {}", store.current_seq());
        }
        LogAction::Roll => {
            let seq = store.roll_segment().await?;
            println!("Now on segment {}", seq);
        }
    }
    store.close().await?;
    Ok(())
}

fn init_logging(config: &Option<Config>, verbosity: u8) {
    use std::io::Write;
    let mut builder = env_logger::Builder::new();
    // CLI verbosity overrides the configured level
    let base_level = match verbosity {
        0 => config
            .as_ref()
            .and_then(|c| c.logging.level.parse().ok())
            .unwrap_or(log::LevelFilter::Info),
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    builder.filter_level(base_level);

    let log_file = config
        .as_ref()
        .and_then(|c| c.logging.file.as_ref())
        .and_then(|path| {
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .ok()
        });

    if let Some(f) = log_file {
        let write_mutex = std::sync::Arc::new(std::sync::Mutex::new(f));
        // Echo to the console only when attached to a terminal
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
