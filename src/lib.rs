//! # harmonic-bus: typed message-bus orchestration
//!
//! An in-process message bus that hosts independent "nodes" (assistants,
//! transformers, driver adapters) communicating over typed, named ports. A
//! harmonic scheduler picks which ready node runs next from four signals:
//! demand (queued input), freshness (time since last run), priority and
//! resonance with the current intent tags.
//!
//! ## Architecture
//!
//! - **Bus**: ports, messages, the type registry and the node abstraction
//! - **Scheduler**: weighted scoring and one-node-per-tick selection
//! - **Orchestrator**: owns every table and runs the tick loop on its own thread
//! - **Store**: durable key-value persistence of port queues and the event log
//!
//! ## Configuration
//!
//! Configuration (`config.toml`) and the default store live in the
//! platform-appropriate data directory under `dev.harmonic-bus`:
//!
//! - **Linux**: `~/.local/share/dev.harmonic-bus/`
//! - **macOS**: `~/Library/Application Support/dev.harmonic-bus/`
//! - **Windows**: `%APPDATA%\dev.harmonic-bus\`
//!
//! ## Example
//!
//! ```no_run
//! use harmonic_bus::{BusConfig, EchoNode, MemoryStore, Metadata, Orchestrator};
//! use serde_json::json;
//!
//! fn main() -> harmonic_bus::Result<()> {
//!     let mut orch = Orchestrator::new(BusConfig::default(), MemoryStore::new("demo"))?;
//!     orch.register_node(EchoNode::new("echo", "p.in", "p.out"))?;
//!     orch.on("p.out", |msg| println!("{}", msg.data()));
//!
//!     let mut handle = orch.start()?;
//!     handle.send("p.in", json!(42), Metadata::new())?;
//!     handle.stop();
//!     Ok(())
//! }
//! ```

pub mod bus;
pub mod config;
pub mod error;
pub mod store;

// Re-export commonly used types
pub use bus::{
    AnyNode, DriverNode, EchoNode, Message, Metadata, Node, NodeInfo, Orchestrator,
    OrchestratorHandle, PortDirection, PortOptions, Snapshot, TickOutcome, TypeTag, Weights,
};
pub use config::BusConfig;
pub use error::{BusError, Result, ResultExt};
pub use store::{DurableStore, FileStore, MemoryStore};
