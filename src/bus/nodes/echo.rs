//! EchoNode — smallest useful node.
//!
//! Dequeues one message from its input per tick and publishes
//! `{"echo": <data>, "node": <id>, "tick": <n>}` on its output.

use crate::bus::message::Metadata;
use crate::bus::node::{NodeInfo, PortBindings, PortDeclarer, TickContext};
use crate::bus::port::{PortHandle, PortOptions};
use crate::error::Result;
use serde_json::json;

/// Echo node bound to one in-port and one out-port.
pub struct EchoNode {
    info: NodeInfo,
    input_port: String,
    output_port: String,
    input: Option<PortHandle>,
    output: Option<PortHandle>,
}

impl EchoNode {
    pub fn new(
        id: impl Into<String>,
        input_port: impl Into<String>,
        output_port: impl Into<String>,
    ) -> Self {
        Self {
            info: NodeInfo::new(id).with_name("Echo"),
            input_port: input_port.into(),
            output_port: output_port.into(),
            input: None,
            output: None,
        }
    }

    pub fn with_info(mut self, info: NodeInfo) -> Self {
        self.info = info;
        self
    }

    pub fn with_priority(mut self, priority: f64) -> Self {
        self.info.priority = priority;
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.info = self.info.with_tags(tags);
        self
    }

    pub fn info(&self) -> NodeInfo {
        self.info.clone()
    }

    pub fn declare(&mut self, ports: &mut PortDeclarer<'_>) -> Result<()> {
        self.input = Some(ports.declare_in("in", &self.input_port, PortOptions::any()));
        self.output = Some(ports.declare_out("out", &self.output_port, PortOptions::any()));
        Ok(())
    }

    pub fn ready(&self, bindings: &PortBindings) -> bool {
        bindings.any_input_pending()
    }

    pub fn tick(&mut self, ctx: &mut TickContext<'_>) -> anyhow::Result<bool> {
        let (Some(input), Some(output)) = (&self.input, &self.output) else {
            anyhow::bail!("echo node '{}' ticked before declaring ports", self.info.id);
        };
        let Some(msg) = input.dequeue() else {
            return Ok(false);
        };

        let mut meta = Metadata::new();
        meta.insert("in_reply_to".to_string(), json!(msg.id()));
        output.send(
            json!({
                "echo": msg.data(),
                "node": ctx.node_id(),
                "tick": ctx.tick(),
            }),
            meta,
        )?;
        Ok(true)
    }
}
