//! DriverNode — forwards requests to a named driver.
//!
//! Each tick dequeues one request, resolves the driver by name and publishes
//! the driver's response. A missing or failing driver is reported in the
//! output (`{"error": ..., "driver": ...}`) instead of failing the tick, so
//! downstream consumers always get an answer for every request.

use crate::bus::message::{Message, Metadata};
use crate::bus::node::{NodeInfo, PortBindings, PortDeclarer, TickContext};
use crate::bus::port::{PortHandle, PortOptions};
use crate::bus::types::TypeTag;
use crate::error::Result;
use serde_json::{json, Value};

/// Logical key of the request input.
pub const REQUEST_KEY: &str = "request";
/// Logical key of the response output.
pub const RESPONSE_KEY: &str = "response";

pub struct DriverNode {
    info: NodeInfo,
    driver: String,
    request_port: String,
    response_port: String,
    request_type: TypeTag,
    persistent: bool,
    request: Option<PortHandle>,
    response: Option<PortHandle>,
}

impl DriverNode {
    pub fn new(
        id: impl Into<String>,
        driver: impl Into<String>,
        request_port: impl Into<String>,
        response_port: impl Into<String>,
    ) -> Self {
        Self {
            info: NodeInfo::new(id).with_name("Driver"),
            driver: driver.into(),
            request_port: request_port.into(),
            response_port: response_port.into(),
            request_type: TypeTag::Any,
            persistent: false,
            request: None,
            response: None,
        }
    }

    pub fn with_info(mut self, info: NodeInfo) -> Self {
        self.info = info;
        self
    }

    /// Type tag for the request port, applied if this node creates it.
    pub fn with_request_type(mut self, tag: TypeTag) -> Self {
        self.request_type = tag;
        self
    }

    /// Keep pending requests across restarts.
    pub fn persistent(mut self) -> Self {
        self.persistent = true;
        self
    }

    pub fn driver_name(&self) -> &str {
        &self.driver
    }

    pub fn info(&self) -> NodeInfo {
        self.info.clone()
    }

    pub fn declare(&mut self, ports: &mut PortDeclarer<'_>) -> Result<()> {
        let mut opts = PortOptions::new(self.request_type);
        if self.persistent {
            opts = opts.persistent();
        }
        self.request = Some(ports.declare_in(REQUEST_KEY, &self.request_port, opts));
        self.response = Some(ports.declare_out(
            RESPONSE_KEY,
            &self.response_port,
            PortOptions::any(),
        ));
        Ok(())
    }

    /// Only the request port counts, not any other input bound later.
    pub fn ready(&self, bindings: &PortBindings) -> bool {
        bindings
            .input(REQUEST_KEY)
            .map(|p| !p.is_empty())
            .unwrap_or(false)
    }

    pub async fn tick(&mut self, ctx: &mut TickContext<'_>) -> anyhow::Result<bool> {
        let (Some(request), Some(response)) = (&self.request, &self.response) else {
            anyhow::bail!("driver node '{}' ticked before declaring ports", self.info.id);
        };
        let Some(msg) = request.dequeue() else {
            return Ok(false);
        };

        let output = match ctx.driver(&self.driver) {
            None => {
                tracing::warn!(
                    "Node '{}': no driver registered as '{}'",
                    self.info.id,
                    self.driver
                );
                ctx.log(
                    &self.info.id,
                    json!({ "error": "no driver", "driver": self.driver }),
                );
                json!({ "error": "no driver", "driver": self.driver })
            }
            Some(driver) => match driver.call(msg.data().clone()).await {
                Ok(value) => value,
                Err(e) => {
                    tracing::warn!(
                        "Node '{}': driver '{}' failed: {:#}",
                        self.info.id,
                        self.driver,
                        e
                    );
                    json!({ "error": format!("{:#}", e), "driver": self.driver })
                }
            },
        };

        response.send(output, reply_metadata(&msg, &self.driver))?;
        Ok(true)
    }
}

fn reply_metadata(request: &Message, driver: &str) -> Metadata {
    let mut meta = request.metadata().clone();
    meta.insert("in_reply_to".to_string(), Value::String(request.id().to_string()));
    meta.insert("driver".to_string(), Value::String(driver.to_string()));
    meta
}
