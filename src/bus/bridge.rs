//! Thread boundary between callers and a running orchestrator.
//!
//! [`Orchestrator::start`](crate::bus::Orchestrator::start) moves the
//! orchestrator onto its own thread and returns an [`OrchestratorHandle`].
//! Every handle call becomes an [`OrchestratorCommand`] on a bounded
//! crossbeam channel; requests that need an answer carry a one-shot reply
//! channel and block until the loop has processed them.
//!
//! Subscriber callbacks run on the orchestrator thread. From inside one, use
//! [`OrchestratorHandle::post`] (fire-and-forget) rather than the blocking
//! calls, which would wait on the thread that is running the callback.

use crate::bus::driver::Driver;
use crate::bus::message::{Message, Metadata};
use crate::bus::node::{AnyNode, Node, NodeStats};
use crate::bus::port::{PortDirection, PortOptions, Subscriber, Subscription};
use crate::bus::scheduler::Weights;
use crate::bus::snapshot::Snapshot;
use crate::error::{BusError, Result};
use crossbeam_channel::{bounded, Sender};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

/// Commands sent from handles to the orchestrator thread.
pub enum OrchestratorCommand {
    /// Enqueue on an in-port. `reply` is `None` for fire-and-forget posts.
    Send {
        port: String,
        data: Value,
        metadata: Metadata,
        reply: Option<Sender<Result<Message>>>,
    },
    /// Subscribe to an out-port.
    Subscribe {
        port: String,
        callback: Subscriber,
        reply: Sender<Subscription>,
    },
    /// Get-or-create a port with explicit options. The port itself stays on
    /// the orchestrator thread.
    DeclarePort {
        name: String,
        direction: PortDirection,
        options: PortOptions,
        reply: Sender<()>,
    },
    RegisterNode {
        node: AnyNode,
        reply: Sender<Result<String>>,
    },
    RemoveNode {
        id: String,
        reply: Sender<bool>,
    },
    RegisterDriver {
        name: String,
        driver: Arc<dyn Driver>,
    },
    RemoveDriver {
        name: String,
        reply: Sender<bool>,
    },
    SetIntentTags(Vec<String>),
    SetWeights(Weights),
    Stats {
        id: String,
        reply: Sender<Option<NodeStats>>,
    },
    Snapshot {
        reply: Sender<Snapshot>,
    },
    ExportSnapshot {
        path: PathBuf,
        reply: Sender<Result<()>>,
    },
    /// Force a persistence write.
    Flush {
        reply: Sender<Result<()>>,
    },
    /// Stop the loop. Pending commands behind it are dropped.
    Shutdown,
}

/// Caller-side handle to an orchestrator running on its own thread.
///
/// Dropping the handle stops the loop and joins the thread.
pub struct OrchestratorHandle {
    cmd_tx: Sender<OrchestratorCommand>,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

fn closed() -> BusError {
    BusError::Channel("orchestrator is not running".to_string())
}

impl OrchestratorHandle {
    pub(crate) fn new(
        cmd_tx: Sender<OrchestratorCommand>,
        running: Arc<AtomicBool>,
        thread: JoinHandle<()>,
    ) -> Self {
        Self {
            cmd_tx,
            running,
            thread: Some(thread),
        }
    }

    fn command(&self, cmd: OrchestratorCommand) -> Result<()> {
        self.cmd_tx.send(cmd).map_err(|_| closed())
    }

    fn request<T>(&self, make: impl FnOnce(Sender<T>) -> OrchestratorCommand) -> Result<T> {
        let (tx, rx) = bounded(1);
        self.command(make(tx))?;
        rx.recv().map_err(|_| closed())
    }

    /// Enqueue on an in-port and wait for validation.
    pub fn send(&self, port: impl Into<String>, data: Value, metadata: Metadata) -> Result<Message> {
        self.request(|reply| OrchestratorCommand::Send {
            port: port.into(),
            data,
            metadata,
            reply: Some(reply),
        })?
    }

    /// Enqueue without waiting. Validation failures are only logged.
    pub fn post(&self, port: impl Into<String>, data: Value, metadata: Metadata) -> Result<()> {
        self.command(OrchestratorCommand::Send {
            port: port.into(),
            data,
            metadata,
            reply: None,
        })
    }

    /// Subscribe to an out-port. The callback runs on the orchestrator thread.
    pub fn on<F>(&self, port: impl Into<String>, callback: F) -> Result<Subscription>
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        let callback: Subscriber = Arc::new(callback);
        self.request(|reply| OrchestratorCommand::Subscribe {
            port: port.into(),
            callback,
            reply,
        })
    }

    /// Declare a port's type and persistence ahead of use. Messages still go
    /// through [`send`](Self::send) or [`post`](Self::post).
    pub fn declare_port(
        &self,
        name: impl Into<String>,
        direction: PortDirection,
        options: PortOptions,
    ) -> Result<()> {
        self.request(|reply| OrchestratorCommand::DeclarePort {
            name: name.into(),
            direction,
            options,
            reply,
        })
    }

    pub fn register_node(&self, node: impl Into<AnyNode>) -> Result<String> {
        let node = node.into();
        self.request(|reply| OrchestratorCommand::RegisterNode { node, reply })?
    }

    pub fn register_plugin<N: Node + 'static>(&self, node: N) -> Result<String> {
        self.register_node(Box::new(node) as Box<dyn Node>)
    }

    pub fn remove_node(&self, id: impl Into<String>) -> Result<bool> {
        self.request(|reply| OrchestratorCommand::RemoveNode {
            id: id.into(),
            reply,
        })
    }

    pub fn register_driver(&self, name: impl Into<String>, driver: Arc<dyn Driver>) -> Result<()> {
        self.command(OrchestratorCommand::RegisterDriver {
            name: name.into(),
            driver,
        })
    }

    pub fn remove_driver(&self, name: impl Into<String>) -> Result<bool> {
        self.request(|reply| OrchestratorCommand::RemoveDriver {
            name: name.into(),
            reply,
        })
    }

    pub fn set_intent_tags<I, S>(&self, tags: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.command(OrchestratorCommand::SetIntentTags(
            tags.into_iter().map(Into::into).collect(),
        ))
    }

    pub fn set_weights(&self, weights: Weights) -> Result<()> {
        self.command(OrchestratorCommand::SetWeights(weights))
    }

    pub fn stats(&self, id: impl Into<String>) -> Result<Option<NodeStats>> {
        self.request(|reply| OrchestratorCommand::Stats {
            id: id.into(),
            reply,
        })
    }

    pub fn snapshot(&self) -> Result<Snapshot> {
        self.request(|reply| OrchestratorCommand::Snapshot { reply })
    }

    pub fn export_snapshot(&self, path: impl Into<PathBuf>) -> Result<()> {
        self.request(|reply| OrchestratorCommand::ExportSnapshot {
            path: path.into(),
            reply,
        })?
    }

    pub fn flush(&self) -> Result<()> {
        self.request(|reply| OrchestratorCommand::Flush { reply })?
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
            && self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Stop the loop and wait for its final flush. Idempotent.
    pub fn stop(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        let _ = self.cmd_tx.send(OrchestratorCommand::Shutdown);
        if thread.join().is_err() {
            tracing::error!("Orchestrator thread panicked");
        }
        self.running.store(false, Ordering::Relaxed);
    }
}

impl Drop for OrchestratorHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
