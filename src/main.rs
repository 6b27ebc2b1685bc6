//! harmonic-bus - Main Entry Point
//!
//! Runs an orchestrator with a single echo node. Every stdin line is sent to
//! `echo.in` as a text message and every `echo.out` message is printed. On
//! EOF the orchestrator is stopped and a snapshot is written next to the
//! store.
//!
//! Usage: `harmonic-bus [config.toml|config.json]`

use anyhow::Context;
use harmonic_bus::{
    config::{self, BusConfig},
    EchoNode, FileStore, Metadata, Orchestrator, PortDirection, PortOptions, TypeTag,
};
use serde_json::Value;
use std::io::BufRead;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const LOG_FILE_PREFIX: &str = "harmonic-bus.log";
const SNAPSHOT_FILE: &str = "snapshot.json";

fn main() -> anyhow::Result<()> {
    let config = match std::env::args().nth(1) {
        Some(path) => BusConfig::load(&path).with_context(|| format!("loading {}", path))?,
        None => config::default_config_path()
            .map(BusConfig::load_or_default)
            .unwrap_or_default(),
    };

    // Initialize logging; the guard flushes the file writer on exit
    let (file_layer, _guard) = match &config.logging.directory {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.filter)),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();

    tracing::info!("Starting harmonic-bus '{}'", config.name);

    let store_dir = config.persistence.resolve_directory()?;
    let store = FileStore::open(&store_dir, config.persistence.namespace.clone())?;
    tracing::info!("Using store at {:?}", store_dir);

    let mut orch = Orchestrator::new(config, store)?;
    orch.declare_port(
        "echo.in",
        PortDirection::In,
        PortOptions::new(TypeTag::Text).persistent(),
    );
    orch.register_node(EchoNode::new("echo", "echo.in", "echo.out"))?;
    orch.on("echo.out", |msg| println!("{}", msg.data()));

    let mut handle = orch.start()?;

    for line in std::io::stdin().lock().lines() {
        let line = line.context("reading stdin")?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Err(e) = handle.send("echo.in", Value::String(line.to_string()), Metadata::new()) {
            tracing::warn!("Rejected input: {}", e);
        }
    }

    let snapshot_path = store_dir.join(SNAPSHOT_FILE);
    handle.export_snapshot(&snapshot_path)?;
    handle.stop();

    tracing::info!("Snapshot written to {:?}", snapshot_path);
    Ok(())
}
