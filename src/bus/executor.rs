//! Orchestrator — owns ports, nodes and drivers and runs the tick loop.
//!
//! Each cycle ([`Orchestrator::step`]):
//! 1. Collect nodes whose `ready` returns true.
//! 2. Score them with the [`Scheduler`] and pick one.
//! 3. Run that node's tick to completion on the embedded current-thread
//!    runtime (optionally under a deadline), containing errors and panics.
//! 4. Update stats, log the outcome and flush persistence if due.
//!
//! The orchestrator can be driven directly (`step`, `run_until_idle`) or moved
//! onto a dedicated thread with [`Orchestrator::start`], after which it is
//! reached only through an [`OrchestratorHandle`].
//!
//! # Persistence
//!
//! A single record is kept under [`STATE_KEY`]:
//!
//! ```json
//! { "log": [...], "portQueues": { "<port>": [{ "id", "timestamp", "data", "metadata" }] } }
//! ```
//!
//! Only persistent in-ports are written. Writes are debounced: the first
//! change after a flush arms a deadline `debounce_ms` ahead and every change
//! until then rides along. `flush()` writes immediately.

use crate::bus::bridge::{OrchestratorCommand, OrchestratorHandle};
use crate::bus::driver::{Driver, DriverRegistry};
use crate::bus::log::{EventLog, LogEntry, LogKind};
use crate::bus::message::{Message, Metadata, QueuedMessage};
use crate::bus::node::{AnyNode, Node, NodeInfo, NodeStats, PortBindings, PortDeclarer, TickContext};
use crate::bus::port::{PortDirection, PortHandle, PortOptions, PortTable, Subscriber, Subscription};
use crate::bus::scheduler::{NodeView, Scheduler, Weights};
use crate::bus::snapshot::{NodeSnapshot, PortSnapshot, Snapshot, SnapshotMeta};
use crate::bus::types::TypeRegistry;
use crate::config::BusConfig;
use crate::error::{BusError, Result, ResultExt};
use crate::store::DurableStore;
use chrono::Utc;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Store key of the persisted record.
pub const STATE_KEY: &str = "state";

/// Channel capacity for commands (handle → orchestrator thread).
const CMD_CHANNEL_CAPACITY: usize = 256;

/// Deadline used when `debounce_ms` is too large to add to the clock.
const MAX_FLUSH_DELAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Shape of the persisted record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedState {
    #[serde(default)]
    pub log: Vec<LogEntry>,
    #[serde(default)]
    pub port_queues: BTreeMap<String, Vec<QueuedMessage>>,
}

/// A registered node with its bookkeeping.
struct NodeSlot {
    node: AnyNode,
    info: NodeInfo,
    stats: NodeStats,
    bindings: PortBindings,
}

/// Result of one scheduling cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// No node was ready.
    Idle,
    /// A node ticked successfully.
    Ran { node_id: String, did_work: bool },
    /// A node's tick returned an error, panicked or timed out.
    Failed { node_id: String, error: String },
}

impl TickOutcome {
    pub fn is_idle(&self) -> bool {
        matches!(self, TickOutcome::Idle)
    }

    /// The node that ran, if any.
    pub fn node_id(&self) -> Option<&str> {
        match self {
            TickOutcome::Idle => None,
            TickOutcome::Ran { node_id, .. } | TickOutcome::Failed { node_id, .. } => Some(node_id),
        }
    }
}

pub struct Orchestrator {
    config: BusConfig,
    ports: PortTable,
    nodes: Vec<NodeSlot>,
    scheduler: Scheduler,
    drivers: DriverRegistry,
    log: EventLog,
    store: Box<dyn DurableStore>,
    runtime: tokio::runtime::Runtime,
    tick: u64,
    flush_deadline: Option<Instant>,
}

impl Orchestrator {
    /// Create an orchestrator with the built-in type registry and restore
    /// whatever `store` holds.
    pub fn new(config: BusConfig, store: impl DurableStore + 'static) -> Result<Self> {
        Self::with_registry(config, TypeRegistry::builtin(), store)
    }

    pub fn with_registry(
        config: BusConfig,
        registry: TypeRegistry,
        store: impl DurableStore + 'static,
    ) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .map_err(|e| BusError::Io(e).with_context("Failed to build tick runtime"))?;

        let mut orch = Self {
            ports: PortTable::new(registry),
            nodes: Vec::new(),
            scheduler: config.scheduler.build(),
            drivers: DriverRegistry::new(),
            log: EventLog::new(config.log.capacity),
            store: Box::new(store),
            runtime,
            tick: 0,
            flush_deadline: None,
            config,
        };
        orch.restore()?;
        Ok(orch)
    }

    fn restore(&mut self) -> Result<()> {
        let Some(value) = self
            .store
            .get(STATE_KEY)
            .context("Failed to read persisted state")?
        else {
            return Ok(());
        };

        let state: PersistedState = match serde_json::from_value(value) {
            Ok(state) => state,
            Err(e) => {
                tracing::warn!("Ignoring unreadable persisted state: {}", e);
                return Ok(());
            }
        };

        let entries = state.log.len();
        let ports = state.port_queues.len();
        let messages: usize = state.port_queues.values().map(Vec::len).sum();
        for entry in state.log {
            self.log.push(entry);
        }
        self.ports.stage_restore(state.port_queues);

        tracing::info!(
            "Restored {} log entries and {} message(s) across {} port(s)",
            entries,
            messages,
            ports
        );
        self.log.record(
            LogKind::Restore,
            self.config.name.clone(),
            json!({ "logEntries": entries, "ports": ports, "messages": messages }),
        );
        Ok(())
    }

    // ── Ports ──

    /// Get-or-create a port with explicit options (type, schema, persistence).
    pub fn declare_port(
        &mut self,
        name: &str,
        direction: PortDirection,
        options: PortOptions,
    ) -> PortHandle {
        self.ports.get_or_create(name, direction, options)
    }

    /// Enqueue `data` on the named in-port, creating it if needed.
    pub fn send(&mut self, port: &str, data: Value, metadata: Metadata) -> Result<Message> {
        let handle = self
            .ports
            .get_or_create(port, PortDirection::In, PortOptions::any());
        let msg = handle.enqueue(data, metadata)?;
        self.log
            .record(LogKind::Send, port, json!({ "id": msg.id(), "from": "external" }));
        if handle.is_persistent() {
            self.schedule_flush();
            self.maybe_flush();
        }
        Ok(msg)
    }

    /// Subscribe to the named out-port, creating it if needed.
    pub fn on<F>(&mut self, port: &str, callback: F) -> Subscription
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        self.subscribe(port, Arc::new(callback))
    }

    pub fn subscribe(&mut self, port: &str, callback: Subscriber) -> Subscription {
        self.ports
            .get_or_create(port, PortDirection::Out, PortOptions::any())
            .subscribe(callback)
    }

    pub fn port(&self, name: &str) -> Option<PortHandle> {
        self.ports.get(name).cloned()
    }

    // ── Nodes ──

    /// Register a node and let it declare its ports. Returns the node id,
    /// generated when the node reports an empty one.
    pub fn register_node(&mut self, node: impl Into<AnyNode>) -> Result<String> {
        let mut node = node.into();
        let mut info = node.info();
        if info.id.is_empty() {
            info.id = format!("node-{}", Uuid::new_v4());
        }
        if self.nodes.iter().any(|slot| slot.info.id == info.id) {
            return Err(BusError::Registration(format!(
                "Node '{}' is already registered",
                info.id
            )));
        }
        if !info.priority.is_finite() || info.priority < 0.0 {
            return Err(BusError::Registration(format!(
                "Node '{}' has invalid priority {}",
                info.id, info.priority
            )));
        }

        let mut bindings = PortBindings::default();
        node.declare(&mut PortDeclarer::new(&mut self.ports, &mut bindings))
            .with_context(|| format!("Failed to declare ports for '{}'", info.id))?;

        let inputs: Vec<&str> = bindings.inputs().map(|(_, p)| p.name()).collect();
        let outputs: Vec<&str> = bindings.outputs().map(|(_, p)| p.name()).collect();
        self.log.record(
            LogKind::Register,
            info.id.clone(),
            json!({
                "name": info.name,
                "priority": info.priority,
                "tags": info.tags,
                "inputs": inputs,
                "outputs": outputs,
            }),
        );
        tracing::info!("Registered node '{}' ({})", info.id, info.name);

        let id = info.id.clone();
        self.nodes.push(NodeSlot {
            node,
            info,
            stats: NodeStats::default(),
            bindings,
        });
        Ok(id)
    }

    /// Register a user-defined [`Node`].
    pub fn register_plugin<N: Node + 'static>(&mut self, node: N) -> Result<String> {
        self.register_node(Box::new(node) as Box<dyn Node>)
    }

    /// Remove a node. Its ports and their queues stay.
    pub fn remove_node(&mut self, id: &str) -> bool {
        let Some(idx) = self.nodes.iter().position(|slot| slot.info.id == id) else {
            return false;
        };
        let slot = self.nodes.remove(idx);
        self.log.record(
            LogKind::Remove,
            id,
            json!({ "processed": slot.stats.processed, "errors": slot.stats.errors }),
        );
        tracing::info!("Removed node '{}'", id);
        true
    }

    pub fn node_ids(&self) -> Vec<String> {
        self.nodes.iter().map(|slot| slot.info.id.clone()).collect()
    }

    pub fn stats(&self, id: &str) -> Option<NodeStats> {
        self.nodes
            .iter()
            .find(|slot| slot.info.id == id)
            .map(|slot| slot.stats.clone())
    }

    // ── Drivers ──

    pub fn register_driver(&mut self, name: impl Into<String>, driver: Arc<dyn Driver>) {
        let name = name.into();
        let replaced = self.drivers.register(name.clone(), driver).is_some();
        self.log.record(
            LogKind::Driver,
            name.clone(),
            json!({ "action": "register", "replaced": replaced }),
        );
        tracing::debug!("Registered driver '{}' (replaced: {})", name, replaced);
    }

    pub fn remove_driver(&mut self, name: &str) -> bool {
        let removed = self.drivers.remove(name).is_some();
        if removed {
            self.log
                .record(LogKind::Driver, name, json!({ "action": "remove" }));
        }
        removed
    }

    pub fn drivers(&self) -> &DriverRegistry {
        &self.drivers
    }

    // ── Scheduling ──

    pub fn set_intent_tags<I, S>(&mut self, tags: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scheduler.set_intent_tags(tags);
        let tags = self.scheduler.intent_tags().clone();
        self.log.record(LogKind::Intent, "intent", json!({ "tags": tags }));
    }

    pub fn set_weights(&mut self, weights: Weights) {
        self.scheduler.set_weights(weights);
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Ticks run so far.
    pub fn tick_count(&self) -> u64 {
        self.tick
    }

    /// Run one scheduling cycle.
    pub fn step(&mut self) -> TickOutcome {
        let now = Utc::now();
        let candidates = self
            .nodes
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.node.ready(&slot.bindings))
            .map(|(idx, slot)| {
                (
                    idx,
                    NodeView {
                        queued: slot.bindings.queued(),
                        last_run: slot.stats.last_run,
                        priority: slot.info.priority,
                        tags: &slot.info.tags,
                    },
                )
            });
        let Some((idx, breakdown)) = self.scheduler.select(candidates, now) else {
            self.maybe_flush();
            return TickOutcome::Idle;
        };

        self.tick += 1;
        let tick = self.tick;
        let timeout = self.config.runtime.tick_timeout();
        let slot = &mut self.nodes[idx];
        let node_id = slot.info.id.clone();
        tracing::trace!(node = %node_id, tick, ?breakdown, "Selected node");

        let result = {
            let mut ctx = TickContext::new(
                &mut self.ports,
                &self.drivers,
                &mut self.log,
                &node_id,
                now,
                tick,
            );
            let fut = slot.node.tick(&mut ctx);
            let runtime = &self.runtime;
            catch_unwind(AssertUnwindSafe(|| {
                runtime.block_on(async {
                    match timeout {
                        Some(limit) => tokio::time::timeout(limit, fut)
                            .await
                            .unwrap_or_else(|_| Err(anyhow::anyhow!("tick timed out after {:?}", limit))),
                        None => fut.await,
                    }
                })
            }))
        };

        // Stamped on failed ticks too.
        slot.stats.last_run = Some(now);
        let outcome = match result {
            Ok(Ok(did_work)) => {
                if did_work {
                    slot.stats.processed += 1;
                }
                self.log.record(
                    LogKind::Tick,
                    node_id.clone(),
                    json!({ "tick": tick, "didWork": did_work, "score": breakdown.total }),
                );
                TickOutcome::Ran { node_id, did_work }
            }
            Ok(Err(e)) => {
                slot.stats.errors += 1;
                let error = format!("{:#}", e);
                tracing::warn!("Node '{}' tick {} failed: {}", node_id, tick, error);
                self.log.record(
                    LogKind::TickError,
                    node_id.clone(),
                    json!({ "tick": tick, "error": error }),
                );
                TickOutcome::Failed { node_id, error }
            }
            Err(panic) => {
                slot.stats.errors += 1;
                let error = format!("panicked: {}", panic_message(panic.as_ref()));
                tracing::error!("Node '{}' tick {} {}", node_id, tick, error);
                self.log.record(
                    LogKind::TickError,
                    node_id.clone(),
                    json!({ "tick": tick, "error": error }),
                );
                TickOutcome::Failed { node_id, error }
            }
        };

        if self.ports.has_persistent() {
            self.schedule_flush();
        }
        self.maybe_flush();
        outcome
    }

    /// Step until no node is ready or `max_steps` cycles ran. Returns the
    /// number of cycles that ran a node.
    pub fn run_until_idle(&mut self, max_steps: usize) -> usize {
        let mut ran = 0;
        while ran < max_steps {
            if self.step().is_idle() {
                break;
            }
            ran += 1;
        }
        ran
    }

    // ── Observation ──

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            meta: SnapshotMeta {
                name: self.config.name.clone(),
                timestamp: Utc::now(),
            },
            nodes: self
                .nodes
                .iter()
                .map(|slot| NodeSnapshot {
                    id: slot.info.id.clone(),
                    name: slot.info.name.clone(),
                    priority: slot.info.priority,
                    tags: slot.info.tags.clone(),
                    stats: slot.stats.clone(),
                })
                .collect(),
            ports: self
                .ports
                .iter()
                .map(|port| PortSnapshot {
                    name: port.name().to_string(),
                    direction: port.direction(),
                    type_tag: port.type_tag(),
                    persistent: port.is_persistent(),
                    queue_length: port.len(),
                })
                .collect(),
            log: self.log.tail(self.config.log.snapshot_tail),
        }
    }

    /// Write a snapshot to `path` as JSON.
    pub fn export_snapshot(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        self.snapshot().save(path)?;
        tracing::info!("Exported snapshot to {:?}", path);
        Ok(())
    }

    pub fn log(&self) -> &EventLog {
        &self.log
    }

    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    // ── Persistence ──

    /// Write the persisted record now.
    pub fn flush(&mut self) -> Result<()> {
        self.flush_deadline = None;
        let state = PersistedState {
            log: self.log.tail(self.config.log.persist_tail),
            port_queues: self.ports.persisted_queues(),
        };
        let value = serde_json::to_value(&state)?;
        self.store
            .set(STATE_KEY, &value)
            .context("Failed to persist orchestrator state")?;
        tracing::debug!(
            "Persisted {} port queue(s), {} log entries",
            state.port_queues.len(),
            state.log.len()
        );
        Ok(())
    }

    /// Whether a debounced write is armed.
    pub fn flush_pending(&self) -> bool {
        self.flush_deadline.is_some()
    }

    fn schedule_flush(&mut self) {
        if self.flush_deadline.is_none() {
            let now = Instant::now();
            let deadline = now
                .checked_add(self.config.persistence.debounce())
                .unwrap_or(now + MAX_FLUSH_DELAY);
            self.flush_deadline = Some(deadline);
        }
    }

    fn maybe_flush(&mut self) {
        let Some(deadline) = self.flush_deadline else {
            return;
        };
        if Instant::now() < deadline {
            return;
        }
        if let Err(e) = self.flush() {
            tracing::warn!("{}", e);
            self.log
                .record(LogKind::Persist, STATE_KEY, json!({ "error": e.to_string() }));
        }
    }

    // ── Threaded run loop ──

    /// Move the orchestrator onto its own thread.
    pub fn start(self) -> Result<OrchestratorHandle> {
        let (cmd_tx, cmd_rx) = bounded(CMD_CHANNEL_CAPACITY);
        let running = Arc::new(AtomicBool::new(true));
        let thread_running = Arc::clone(&running);
        let thread = std::thread::Builder::new()
            .name(format!("bus-{}", self.config.name))
            .spawn(move || {
                let mut orch = self;
                orch.run(cmd_rx, thread_running);
            })
            .map_err(|e| BusError::Io(e).with_context("Failed to spawn orchestrator thread"))?;
        Ok(OrchestratorHandle::new(cmd_tx, running, thread))
    }

    /// Run until `running` is cleared, Shutdown is received or every handle is
    /// gone. Idle waits block on the command channel and back off
    /// exponentially up to `max_idle_interval_ms`.
    fn run(&mut self, cmd_rx: Receiver<OrchestratorCommand>, running: Arc<AtomicBool>) {
        tracing::info!("Orchestrator '{}' started", self.config.name);
        self.log.record(
            LogKind::Lifecycle,
            self.config.name.clone(),
            json!({ "event": "start" }),
        );

        let first_idle = self.config.runtime.idle_interval();
        let max_idle = self.config.runtime.max_idle_interval();
        let tick_interval = self.config.runtime.tick_interval();
        let mut idle = first_idle;

        while running.load(Ordering::Relaxed) {
            while let Ok(cmd) = cmd_rx.try_recv() {
                self.handle_command(cmd, &running);
            }
            if !running.load(Ordering::Relaxed) {
                break;
            }

            if !self.step().is_idle() {
                idle = first_idle;
                if !tick_interval.is_zero() {
                    std::thread::sleep(tick_interval);
                }
                continue;
            }

            let wait = match self.flush_deadline {
                Some(deadline) => idle.min(deadline.saturating_duration_since(Instant::now())),
                None => idle,
            };
            match cmd_rx.recv_timeout(wait) {
                Ok(cmd) => {
                    idle = first_idle;
                    self.handle_command(cmd, &running);
                }
                Err(RecvTimeoutError::Timeout) => {
                    idle = (idle * 2).min(max_idle);
                }
                Err(RecvTimeoutError::Disconnected) => {
                    tracing::debug!("All orchestrator handles dropped");
                    running.store(false, Ordering::Relaxed);
                }
            }
        }

        self.log.record(
            LogKind::Lifecycle,
            self.config.name.clone(),
            json!({ "event": "stop", "ticks": self.tick }),
        );
        if let Err(e) = self.flush() {
            tracing::warn!("Final flush failed: {}", e);
        }
        tracing::info!("Orchestrator '{}' stopped after {} tick(s)", self.config.name, self.tick);
    }

    fn handle_command(&mut self, cmd: OrchestratorCommand, running: &AtomicBool) {
        match cmd {
            OrchestratorCommand::Send {
                port,
                data,
                metadata,
                reply,
            } => {
                let result = self.send(&port, data, metadata);
                match reply {
                    Some(reply) => {
                        let _ = reply.send(result);
                    }
                    None => {
                        if let Err(e) = result {
                            tracing::warn!("Dropped message for '{}': {}", port, e);
                        }
                    }
                }
            }
            OrchestratorCommand::Subscribe {
                port,
                callback,
                reply,
            } => {
                let _ = reply.send(self.subscribe(&port, callback));
            }
            OrchestratorCommand::DeclarePort {
                name,
                direction,
                options,
                reply,
            } => {
                self.declare_port(&name, direction, options);
                let _ = reply.send(());
            }
            OrchestratorCommand::RegisterNode { node, reply } => {
                let _ = reply.send(self.register_node(node));
            }
            OrchestratorCommand::RemoveNode { id, reply } => {
                let _ = reply.send(self.remove_node(&id));
            }
            OrchestratorCommand::RegisterDriver { name, driver } => {
                self.register_driver(name, driver);
            }
            OrchestratorCommand::RemoveDriver { name, reply } => {
                let _ = reply.send(self.remove_driver(&name));
            }
            OrchestratorCommand::SetIntentTags(tags) => {
                self.set_intent_tags(tags);
            }
            OrchestratorCommand::SetWeights(weights) => {
                self.set_weights(weights);
            }
            OrchestratorCommand::Stats { id, reply } => {
                let _ = reply.send(self.stats(&id));
            }
            OrchestratorCommand::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
            OrchestratorCommand::ExportSnapshot { path, reply } => {
                let _ = reply.send(self.export_snapshot(&path));
            }
            OrchestratorCommand::Flush { reply } => {
                let _ = reply.send(self.flush());
            }
            OrchestratorCommand::Shutdown => {
                running.store(false, Ordering::Relaxed);
            }
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
