//! Test node builders

use async_trait::async_trait;
use harmonic_bus::bus::{Node, NodeInfo, PortDeclarer, PortHandle, TickContext};
use harmonic_bus::{Metadata, PortOptions};
use std::sync::{Arc, Mutex};

/// Shared record of which node ran, in tick order.
pub type RunLog = Arc<Mutex<Vec<String>>>;

pub fn run_log() -> RunLog {
    Arc::new(Mutex::new(Vec::new()))
}

/// Plugin node that consumes one message per tick and records the run.
pub struct RecordingNode {
    info: NodeInfo,
    input_port: String,
    forward_to: Option<String>,
    fail: bool,
    runs: RunLog,
    input: Option<PortHandle>,
}

#[async_trait]
impl Node for RecordingNode {
    fn info(&self) -> NodeInfo {
        self.info.clone()
    }

    fn declare(&mut self, ports: &mut PortDeclarer<'_>) -> harmonic_bus::Result<()> {
        self.input = Some(ports.declare_in("in", &self.input_port, PortOptions::any()));
        Ok(())
    }

    async fn tick(&mut self, ctx: &mut TickContext<'_>) -> anyhow::Result<bool> {
        self.runs.lock().unwrap().push(self.info.id.clone());
        if self.fail {
            anyhow::bail!("node '{}' always fails", self.info.id);
        }
        let Some(msg) = self.input.as_ref().and_then(|p| p.dequeue()) else {
            return Ok(false);
        };
        if let Some(target) = &self.forward_to {
            ctx.send(target, msg.data().clone(), Metadata::new())?;
        }
        Ok(true)
    }
}

/// Builder for [`RecordingNode`]
pub struct RecordingNodeBuilder {
    info: NodeInfo,
    input_port: String,
    forward_to: Option<String>,
    fail: bool,
}

impl RecordingNodeBuilder {
    pub fn new(id: &str) -> Self {
        Self {
            info: NodeInfo::new(id),
            input_port: format!("{}.in", id),
            forward_to: None,
            fail: false,
        }
    }

    pub fn input(mut self, port: &str) -> Self {
        self.input_port = port.to_string();
        self
    }

    pub fn priority(mut self, priority: f64) -> Self {
        self.info.priority = priority;
        self
    }

    pub fn tags(mut self, tags: &[&str]) -> Self {
        self.info = self.info.with_tags(tags.iter().copied());
        self
    }

    /// Re-send each consumed payload to another in-port.
    pub fn forward_to(mut self, port: &str) -> Self {
        self.forward_to = Some(port.to_string());
        self
    }

    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    pub fn build(self, runs: &RunLog) -> RecordingNode {
        RecordingNode {
            info: self.info,
            input_port: self.input_port,
            forward_to: self.forward_to,
            fail: self.fail,
            runs: Arc::clone(runs),
            input: None,
        }
    }
}
