//! Typed message bus with a harmonic scheduler.
//!
//! External callers and nodes exchange JSON messages over named ports. In-ports
//! queue messages; out-ports broadcast them to subscribers. On every tick the
//! orchestrator scores the nodes that are ready and runs exactly one of them.
//!
//! # Architecture
//!
//! ```text
//!  send("p.in") ──► [p.in queue] ──► Node.tick ──► [p.out] ──► on("p.out") callbacks
//!                        ▲                │
//!                        │                └─► TickContext::send ─► other in-ports
//!                 restored from                                    drivers (by name)
//!                 DurableStore
//! ```
//!
//! # Design
//!
//! - **Enum dispatch for built-ins** — `BuiltinNode` for shipped nodes,
//!   `Box<dyn Node>` for user nodes, both behind `AnyNode`.
//! - **Injected scheduler** — scoring state lives in a `Scheduler` value.
//! - **Dedicated thread** — the orchestrator owns every table; handles talk to
//!   it over a crossbeam channel.
//! - **Serialized ticks** — one node tick runs to completion before the next
//!   cycle is scored.

pub mod bridge;
pub mod driver;
pub mod executor;
pub mod log;
pub mod message;
pub mod node;
pub mod nodes;
pub mod port;
pub mod scheduler;
pub mod snapshot;
pub mod types;

pub use bridge::{OrchestratorCommand, OrchestratorHandle};
pub use driver::{driver_fn, Driver, DriverRegistry, FnDriver};
pub use executor::{Orchestrator, PersistedState, TickOutcome, STATE_KEY};
pub use log::{EventLog, LogEntry, LogKind};
pub use message::{Message, Metadata, QueuedMessage};
pub use node::{AnyNode, BuiltinNode, Node, NodeInfo, NodeStats, PortBindings, PortDeclarer, TickContext};
pub use nodes::{DriverNode, EchoNode};
pub use port::{Port, PortDirection, PortHandle, PortOptions, PortTable, Subscriber, Subscription};
pub use scheduler::{NodeView, ScoreBreakdown, Scheduler, Weights};
pub use snapshot::{NodeSnapshot, PortSnapshot, Snapshot, SnapshotMeta};
pub use types::{schema, Schema, TypeRegistry, TypeRule, TypeTag};
