//! pose-ingest CLI - runs the ingestion server or sends test poses.
//!
//! This is the main binary entry point. See the `pose_ingest` library
//! for the core functionality.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mimalloc::MiMalloc;
use pose_ingest::ws::{self, WsMessage};
use pose_ingest::{
    encode, BackpressurePolicy, ChannelSink, Config, Orientation, Pose, PoseServer, WireFormat,
};

/// Global allocator configured per M-MIMALLOC-APPS guideline.
/// mimalloc provides better multi-threaded performance than the system allocator.
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

// CLI
#[derive(Parser)]
#[command(name = "pose-ingest")]
#[command(version)]
#[command(about = "WebSocket pose-stream ingestion service")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the ingestion server until Ctrl-C
    Serve {
        /// Config file (defaults to the platform config dir)
        #[arg(long)]
        config: Option<PathBuf>,
        /// Listen address, e.g. 0.0.0.0:8765
        #[arg(long)]
        bind: Option<String>,
        /// Capacity of the pose queue
        #[arg(long)]
        sink_capacity: Option<usize>,
        /// Behaviour when the pose queue is full
        #[arg(long, value_enum)]
        backpressure: Option<BackpressurePolicy>,
        /// Close connections idle for this many seconds (0 disables)
        #[arg(long)]
        idle_timeout: Option<u64>,
    },
    /// Send pose updates to a running server
    Send {
        /// Server URL, e.g. ws://127.0.0.1:8765
        url: String,
        /// Position x,y,z
        #[arg(long, value_delimiter = ',', allow_hyphen_values = true, default_values_t = [0.0, 0.0, 0.0])]
        pos: Vec<f64>,
        /// Orientation: quaternion x,y,z,w or Euler roll,pitch,yaw
        #[arg(long, value_delimiter = ',', allow_hyphen_values = true, default_values_t = [0.0, 0.0, 0.0, 1.0])]
        rot: Vec<f64>,
        /// Wire encoding
        #[arg(long, value_enum, default_value_t = WireFormat::Json)]
        format: WireFormat,
        /// Number of updates to send
        #[arg(long, default_value_t = 1)]
        count: u32,
        /// Delay between updates in milliseconds
        #[arg(long, default_value_t = 0)]
        interval_ms: u64,
    },
    /// Print the effective configuration as JSON
    Config {
        /// Config file (defaults to the platform config dir)
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

/// Run the server, draining the sink into the log, until Ctrl-C.
async fn serve(config: Config) -> Result<()> {
    config.check()?;

    let (sink, mut poses) = ChannelSink::new(config.sink_capacity);
    let server = PoseServer::start(&config, Arc::new(sink))?;

    let consumer = tokio::spawn(async move {
        while let Some(pose) = poses.recv().await {
            log::info!("Received pose: {pose}");
        }
    });

    log::info!("pose-ingest v{} running", env!("CARGO_PKG_VERSION"));

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    log::info!("Shutting down...");
    server.shutdown().await;
    // All sink handles are gone once the server has stopped.
    consumer.await.context("Pose consumer panicked")?;

    Ok(())
}

/// Connect to `url` and send `count` copies of `pose`.
async fn send(url: &str, pose: Pose, format: WireFormat, count: u32, interval: Duration) -> Result<()> {
    let (mut writer, mut reader) = ws::connect(url).await?;

    for i in 0..count {
        if i > 0 && !interval.is_zero() {
            tokio::time::sleep(interval).await;
        }
        writer.send_frame(encode(&pose, format)).await?;
    }

    writer.send_close().await?;
    // Wait for the server to acknowledge the close.
    while let Some(msg) = reader.recv().await {
        if let WsMessage::Close { .. } = msg? {
            break;
        }
    }

    println!("Sent {count} pose(s) to {url}");
    Ok(())
}

/// Pretty JSON of an effective config, refusing one the server would reject.
fn render_config(config: &Config) -> Result<String> {
    config.check().context("Configuration is invalid")?;
    Ok(serde_json::to_string_pretty(config)?)
}

fn pose_from_args(pos: &[f64], rot: &[f64]) -> Result<Pose> {
    let position: [f64; 3] = pos
        .try_into()
        .with_context(|| format!("--pos needs 3 values, got {}", pos.len()))?;
    let orientation = match *rot {
        [x, y, z, w] => Orientation::Quaternion([x, y, z, w]),
        [roll, pitch, yaw] => Orientation::Euler([roll, pitch, yaw]),
        _ => anyhow::bail!("--rot needs 3 (Euler) or 4 (quaternion) values, got {}", rot.len()),
    };
    Ok(Pose::new(position, orientation))
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_secs()
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            config,
            bind,
            sink_capacity,
            backpressure,
            idle_timeout,
        } => {
            let mut config = Config::load_with(config.as_deref())?;
            if let Some(bind) = bind {
                config.bind = bind;
            }
            if let Some(capacity) = sink_capacity {
                config.sink_capacity = capacity;
            }
            if let Some(policy) = backpressure {
                config.backpressure = policy;
            }
            if let Some(secs) = idle_timeout {
                config.idle_timeout_secs = secs;
            }
            serve(config).await?;
        }
        Commands::Send {
            url,
            pos,
            rot,
            format,
            count,
            interval_ms,
        } => {
            let pose = pose_from_args(&pos, &rot)?;
            send(&url, pose, format, count, Duration::from_millis(interval_ms)).await?;
        }
        Commands::Config { config } => {
            let config = Config::load_with(config.as_deref())?;
            println!("{}", render_config(&config)?);
        }
    }

    Ok(())
}
