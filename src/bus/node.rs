//! Node abstraction for the orchestrator.
//!
//! Two-layer design:
//! - **`Node` trait** — for user-defined nodes (trait objects).
//! - **`BuiltinNode` enum** — for the nodes shipped with the crate, dispatched
//!   with a plain `match`.
//!
//! `AnyNode` wraps either variant so the orchestrator can handle both uniformly.
//!
//! Nodes never create ports themselves. At registration the orchestrator hands
//! them a [`PortDeclarer`] that get-or-creates ports on its own table and
//! records the bindings used for readiness and demand.

use crate::bus::driver::{Driver, DriverRegistry};
use crate::bus::log::{EventLog, LogKind};
use crate::bus::message::{Message, Metadata};
use crate::bus::nodes::{DriverNode, EchoNode};
use crate::bus::port::{PortDirection, PortHandle, PortOptions, PortTable};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Identity and scheduling attributes of a node, fixed at registration.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeInfo {
    /// Unique id. Left empty, the orchestrator generates one.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Non-negative priority weight.
    pub priority: f64,
    pub tags: BTreeSet<String>,
}

impl NodeInfo {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            priority: 1.0,
            tags: BTreeSet::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_priority(mut self, priority: f64) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }
}

/// Counters maintained by the tick loop.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeStats {
    pub processed: u64,
    pub errors: u64,
    pub last_run: Option<DateTime<Utc>>,
}

/// Ports a node declared, keyed by the node's logical names.
#[derive(Debug, Clone, Default)]
pub struct PortBindings {
    inputs: BTreeMap<String, PortHandle>,
    outputs: BTreeMap<String, PortHandle>,
}

impl PortBindings {
    pub fn input(&self, key: &str) -> Option<&PortHandle> {
        self.inputs.get(key)
    }

    pub fn output(&self, key: &str) -> Option<&PortHandle> {
        self.outputs.get(key)
    }

    pub fn inputs(&self) -> impl Iterator<Item = (&str, &PortHandle)> {
        self.inputs.iter().map(|(k, p)| (k.as_str(), p))
    }

    pub fn outputs(&self) -> impl Iterator<Item = (&str, &PortHandle)> {
        self.outputs.iter().map(|(k, p)| (k.as_str(), p))
    }

    /// Total queued messages across all inputs.
    pub fn queued(&self) -> usize {
        self.inputs.values().map(|p| p.len()).sum()
    }

    pub fn any_input_pending(&self) -> bool {
        self.inputs.values().any(|p| !p.is_empty())
    }
}

/// Factory handed to [`Node::declare`].
pub struct PortDeclarer<'a> {
    ports: &'a mut PortTable,
    bindings: &'a mut PortBindings,
}

impl<'a> PortDeclarer<'a> {
    pub(crate) fn new(ports: &'a mut PortTable, bindings: &'a mut PortBindings) -> Self {
        Self { ports, bindings }
    }

    /// Get-or-create an in-port named `port` and bind it under `key`.
    pub fn declare_in(&mut self, key: &str, port: &str, options: PortOptions) -> PortHandle {
        let handle = self.ports.get_or_create(port, PortDirection::In, options);
        self.bindings
            .inputs
            .insert(key.to_string(), Arc::clone(&handle));
        handle
    }

    /// Get-or-create an out-port named `port` and bind it under `key`.
    pub fn declare_out(&mut self, key: &str, port: &str, options: PortOptions) -> PortHandle {
        let handle = self.ports.get_or_create(port, PortDirection::Out, options);
        self.bindings
            .outputs
            .insert(key.to_string(), Arc::clone(&handle));
        handle
    }
}

/// Context passed to a node for one tick.
pub struct TickContext<'a> {
    ports: &'a mut PortTable,
    drivers: &'a DriverRegistry,
    log: &'a mut EventLog,
    node_id: &'a str,
    now: DateTime<Utc>,
    tick: u64,
}

impl<'a> TickContext<'a> {
    pub(crate) fn new(
        ports: &'a mut PortTable,
        drivers: &'a DriverRegistry,
        log: &'a mut EventLog,
        node_id: &'a str,
        now: DateTime<Utc>,
        tick: u64,
    ) -> Self {
        Self {
            ports,
            drivers,
            log,
            node_id,
            now,
            tick,
        }
    }

    /// Resolve a driver by name.
    pub fn driver(&self, name: &str) -> Option<Arc<dyn Driver>> {
        self.drivers.get(name)
    }

    pub fn drivers(&self) -> &DriverRegistry {
        self.drivers
    }

    /// Enqueue into any named in-port, creating it if needed.
    pub fn send(&mut self, port: &str, data: Value, metadata: Metadata) -> Result<Message> {
        let handle = self
            .ports
            .get_or_create(port, PortDirection::In, PortOptions::any());
        let msg = handle.enqueue(data, metadata)?;
        self.log.record(
            LogKind::Send,
            port,
            serde_json::json!({ "id": msg.id(), "from": self.node_id }),
        );
        Ok(msg)
    }

    /// Append an entry to the orchestrator's event log.
    pub fn log(&mut self, subject: impl Into<String>, payload: Value) {
        self.log.record(LogKind::Node, subject, payload);
    }

    pub fn node_id(&self) -> &str {
        self.node_id
    }

    /// Time the tick started.
    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    /// Monotonic tick counter.
    pub fn tick(&self) -> u64 {
        self.tick
    }
}

/// Trait for user-defined nodes.
#[async_trait]
pub trait Node: Send {
    /// Identity and scheduling attributes.
    fn info(&self) -> NodeInfo;

    /// Declare ports. Called once, at registration.
    fn declare(&mut self, ports: &mut PortDeclarer<'_>) -> Result<()>;

    /// Whether the node wants to run. Defaults to "any input has a message".
    fn ready(&self, bindings: &PortBindings) -> bool {
        bindings.any_input_pending()
    }

    /// Do one unit of work. Returns whether any work was done.
    async fn tick(&mut self, ctx: &mut TickContext<'_>) -> anyhow::Result<bool>;
}

/// Enum dispatch for built-in nodes.
pub enum BuiltinNode {
    Echo(EchoNode),
    Driver(DriverNode),
}

impl BuiltinNode {
    pub fn info(&self) -> NodeInfo {
        match self {
            BuiltinNode::Echo(n) => n.info(),
            BuiltinNode::Driver(n) => n.info(),
        }
    }

    pub fn declare(&mut self, ports: &mut PortDeclarer<'_>) -> Result<()> {
        match self {
            BuiltinNode::Echo(n) => n.declare(ports),
            BuiltinNode::Driver(n) => n.declare(ports),
        }
    }

    pub fn ready(&self, bindings: &PortBindings) -> bool {
        match self {
            BuiltinNode::Echo(n) => n.ready(bindings),
            BuiltinNode::Driver(n) => n.ready(bindings),
        }
    }

    pub async fn tick(&mut self, ctx: &mut TickContext<'_>) -> anyhow::Result<bool> {
        match self {
            BuiltinNode::Echo(n) => n.tick(ctx),
            BuiltinNode::Driver(n) => n.tick(ctx).await,
        }
    }
}

/// Wrapper that holds either a built-in node (enum dispatch) or a plugin (trait object).
pub enum AnyNode {
    Builtin(BuiltinNode),
    Plugin(Box<dyn Node>),
}

impl AnyNode {
    pub fn info(&self) -> NodeInfo {
        match self {
            AnyNode::Builtin(n) => n.info(),
            AnyNode::Plugin(n) => n.info(),
        }
    }

    pub fn declare(&mut self, ports: &mut PortDeclarer<'_>) -> Result<()> {
        match self {
            AnyNode::Builtin(n) => n.declare(ports),
            AnyNode::Plugin(n) => n.declare(ports),
        }
    }

    pub fn ready(&self, bindings: &PortBindings) -> bool {
        match self {
            AnyNode::Builtin(n) => n.ready(bindings),
            AnyNode::Plugin(n) => n.ready(bindings),
        }
    }

    pub async fn tick(&mut self, ctx: &mut TickContext<'_>) -> anyhow::Result<bool> {
        match self {
            AnyNode::Builtin(n) => n.tick(ctx).await,
            AnyNode::Plugin(n) => n.tick(ctx).await,
        }
    }
}

impl From<EchoNode> for AnyNode {
    fn from(node: EchoNode) -> Self {
        AnyNode::Builtin(BuiltinNode::Echo(node))
    }
}

impl From<DriverNode> for AnyNode {
    fn from(node: DriverNode) -> Self {
        AnyNode::Builtin(BuiltinNode::Driver(node))
    }
}

impl From<Box<dyn Node>> for AnyNode {
    fn from(node: Box<dyn Node>) -> Self {
        AnyNode::Plugin(node)
    }
}
