//! Drivers: named external capabilities invoked by nodes.
//!
//! The orchestrator never calls drivers itself. Nodes resolve them by name at
//! tick time through [`DriverRegistry::get`]; a missing driver is not an error
//! until a node needs it, and the node decides how to report it.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// An injected async capability.
#[async_trait]
pub trait Driver: Send + Sync {
    async fn call(&self, request: Value) -> anyhow::Result<Value>;
}

/// Adapter turning an async closure into a [`Driver`].
pub struct FnDriver<F> {
    f: F,
}

impl<F> FnDriver<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> Driver for FnDriver<F>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    async fn call(&self, request: Value) -> anyhow::Result<Value> {
        (self.f)(request).await
    }
}

/// Shorthand for `Arc::new(FnDriver::new(f))`.
pub fn driver_fn<F, Fut>(f: F) -> Arc<dyn Driver>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    Arc::new(FnDriver::new(f))
}

/// Name → driver table.
#[derive(Default, Clone)]
pub struct DriverRegistry {
    drivers: HashMap<String, Arc<dyn Driver>>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a driver. Returns the previous one, if any.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        driver: Arc<dyn Driver>,
    ) -> Option<Arc<dyn Driver>> {
        self.drivers.insert(name.into(), driver)
    }

    pub fn remove(&mut self, name: &str) -> Option<Arc<dyn Driver>> {
        self.drivers.remove(name)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Driver>> {
        self.drivers.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.drivers.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.drivers.keys().cloned().collect();
        names.sort();
        names
    }
}

impl fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriverRegistry")
            .field("drivers", &self.names())
            .finish()
    }
}
