//! Common test utilities and helpers

#![allow(dead_code)] // Test utilities may not all be used in every test file

pub mod builders;

use harmonic_bus::{BusConfig, Message};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Config tuned for tests: immediate flushes and short idle waits.
pub fn test_config() -> BusConfig {
    let mut config = BusConfig::default();
    config.name = "test-bus".to_string();
    config.runtime.idle_interval_ms = 1;
    config.runtime.max_idle_interval_ms = 5;
    config.persistence.debounce_ms = 0;
    config
}

/// Default wait for threaded tests
pub fn test_timeout() -> Duration {
    Duration::from_secs(2)
}

/// Poll `cond` until it holds or `timeout` elapses.
pub fn wait_for(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    cond()
}

/// Records every message delivered to a subscriber.
#[derive(Clone, Default)]
pub struct Collector {
    seen: Arc<Mutex<Vec<Message>>>,
}

impl Collector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Callback suitable for `Orchestrator::on` / `OrchestratorHandle::on`.
    pub fn callback(&self) -> impl Fn(&Message) + Send + Sync + 'static {
        let seen = Arc::clone(&self.seen);
        move |msg: &Message| seen.lock().unwrap().push(msg.clone())
    }

    pub fn messages(&self) -> Vec<Message> {
        self.seen.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.seen.lock().unwrap().len()
    }
}
