//! Typed, named ports.
//!
//! In-ports buffer messages in a FIFO queue; out-ports broadcast each message
//! synchronously to their subscribers, in subscription order, before `send`
//! returns. Ports are shared as [`PortHandle`]s: the orchestrator's
//! [`PortTable`] owns naming and lifetime, nodes keep handles to the ports they
//! declared.

use crate::bus::message::{Message, Metadata, QueuedMessage};
use crate::bus::types::{self, Schema, TypeRegistry, TypeRule, TypeTag};
use crate::error::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

/// Whether a port is an input or output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortDirection {
    In,
    Out,
}

impl fmt::Display for PortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortDirection::In => write!(f, "in"),
            PortDirection::Out => write!(f, "out"),
        }
    }
}

/// Options applied when a port is first created. Ignored for existing ports.
#[derive(Clone, Default)]
pub struct PortOptions {
    pub type_tag: TypeTag,
    pub schema: Option<Schema>,
    pub persistent: bool,
}

impl PortOptions {
    pub fn new(type_tag: TypeTag) -> Self {
        Self {
            type_tag,
            ..Default::default()
        }
    }

    pub fn any() -> Self {
        Self::default()
    }

    pub fn with_schema(mut self, schema: Schema) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn persistent(mut self) -> Self {
        self.persistent = true;
        self
    }
}

impl fmt::Debug for PortOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PortOptions")
            .field("type_tag", &self.type_tag)
            .field("schema", &self.schema.is_some())
            .field("persistent", &self.persistent)
            .finish()
    }
}

/// Subscriber callback for out-ports.
pub type Subscriber = Arc<dyn Fn(&Message) + Send + Sync>;

/// Shared handle to a port.
pub type PortHandle = Arc<Port>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A named, typed channel.
pub struct Port {
    name: String,
    direction: PortDirection,
    type_tag: TypeTag,
    rule: TypeRule,
    schema: Option<Schema>,
    persistent: bool,
    queue: Mutex<VecDeque<Message>>,
    subscribers: Mutex<Vec<(u64, Subscriber)>>,
    next_subscriber: AtomicU64,
}

impl Port {
    pub fn new(
        name: impl Into<String>,
        direction: PortDirection,
        options: PortOptions,
        registry: &TypeRegistry,
    ) -> Self {
        Self {
            name: name.into(),
            direction,
            type_tag: options.type_tag,
            rule: registry.rule(options.type_tag),
            schema: options.schema,
            persistent: options.persistent,
            queue: Mutex::new(VecDeque::new()),
            subscribers: Mutex::new(Vec::new()),
            next_subscriber: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn direction(&self) -> PortDirection {
        self.direction
    }

    pub fn type_tag(&self) -> TypeTag {
        self.type_tag
    }

    pub fn is_persistent(&self) -> bool {
        self.persistent
    }

    /// Check a payload without constructing a message.
    pub fn validate(&self, data: &Value) -> Result<()> {
        types::check(self.type_tag, self.rule, self.schema.as_ref(), data)
    }

    /// Validate and broadcast to every current subscriber.
    pub fn send(&self, data: Value, metadata: Metadata) -> Result<Message> {
        self.validate(&data)?;
        let msg = Message::create(&self.name, data, metadata);
        // Snapshot so (un)subscribing during delivery doesn't affect this broadcast.
        let subscribers: Vec<Subscriber> = lock(&self.subscribers)
            .iter()
            .map(|(_, s)| Arc::clone(s))
            .collect();
        for subscriber in subscribers {
            subscriber(&msg);
        }
        Ok(msg)
    }

    /// Validate and append to the tail of the queue.
    pub fn enqueue(&self, data: Value, metadata: Metadata) -> Result<Message> {
        self.validate(&data)?;
        let msg = Message::create(&self.name, data, metadata);
        lock(&self.queue).push_back(msg.clone());
        Ok(msg)
    }

    /// Remove and return the head of the queue, or `None` when empty.
    pub fn dequeue(&self) -> Option<Message> {
        lock(&self.queue).pop_front()
    }

    /// Clone of the head of the queue.
    pub fn peek(&self) -> Option<Message> {
        lock(&self.queue).front().cloned()
    }

    pub fn len(&self) -> usize {
        lock(&self.queue).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.queue).is_empty()
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.subscribers).len()
    }

    /// Persisted form of the queue, head first.
    pub fn queued(&self) -> Vec<QueuedMessage> {
        lock(&self.queue).iter().map(Message::to_queued).collect()
    }

    /// Append rehydrated messages behind whatever is already queued.
    pub fn restore(&self, stored: Vec<QueuedMessage>) {
        let mut queue = lock(&self.queue);
        for entry in stored {
            queue.push_back(Message::rehydrate(&self.name, entry));
        }
    }

    /// Register a subscriber. The returned handle removes it again.
    pub fn subscribe(self: &Arc<Self>, callback: Subscriber) -> Subscription {
        let id = self.next_subscriber.fetch_add(1, Ordering::Relaxed);
        lock(&self.subscribers).push((id, callback));
        Subscription {
            port: Arc::downgrade(self),
            id,
        }
    }

    fn unsubscribe(&self, id: u64) -> bool {
        let mut subs = lock(&self.subscribers);
        let before = subs.len();
        subs.retain(|(sid, _)| *sid != id);
        subs.len() != before
    }
}

impl fmt::Debug for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Port")
            .field("name", &self.name)
            .field("direction", &self.direction)
            .field("type_tag", &self.type_tag)
            .field("persistent", &self.persistent)
            .field("queued", &self.len())
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

/// Handle returned by `subscribe`; call [`Subscription::unsubscribe`] to detach.
///
/// Dropping the handle leaves the subscriber attached.
#[derive(Debug)]
pub struct Subscription {
    port: Weak<Port>,
    id: u64,
}

impl Subscription {
    /// Detach the subscriber. Returns `false` if it was already gone.
    pub fn unsubscribe(self) -> bool {
        self.port
            .upgrade()
            .map(|port| port.unsubscribe(self.id))
            .unwrap_or(false)
    }
}

/// The orchestrator's name → port table.
#[derive(Debug)]
pub struct PortTable {
    ports: BTreeMap<String, PortHandle>,
    registry: TypeRegistry,
    /// Restored queues whose port has not been declared yet.
    pending_restore: BTreeMap<String, Vec<QueuedMessage>>,
}

impl PortTable {
    pub fn new(registry: TypeRegistry) -> Self {
        Self {
            ports: BTreeMap::new(),
            registry,
            pending_restore: BTreeMap::new(),
        }
    }

    /// Get the named port, creating it with `direction`/`options` if absent.
    ///
    /// An existing port is returned unchanged: direction, type and persistence
    /// are fixed at first creation. An in-port created over a restored queue
    /// is always persistent, whoever creates it first.
    pub fn get_or_create(
        &mut self,
        name: &str,
        direction: PortDirection,
        mut options: PortOptions,
    ) -> PortHandle {
        if let Some(port) = self.ports.get(name) {
            if port.direction() != direction {
                tracing::debug!(
                    "Port '{}' already exists as {}, requested {}",
                    name,
                    port.direction(),
                    direction
                );
            }
            return Arc::clone(port);
        }

        let stored = self.pending_restore.remove(name);
        if stored.is_some() && direction == PortDirection::In {
            options.persistent = true;
        }
        let port = Arc::new(Port::new(name, direction, options, &self.registry));
        if let Some(stored) = stored {
            match direction {
                PortDirection::In => {
                    tracing::info!("Restored {} queued message(s) into '{}'", stored.len(), name);
                    port.restore(stored);
                }
                PortDirection::Out => {
                    tracing::warn!(
                        "Dropping {} restored message(s) for '{}': port is now an out-port",
                        stored.len(),
                        name
                    );
                }
            }
        }
        self.ports.insert(name.to_string(), Arc::clone(&port));
        port
    }

    pub fn get(&self, name: &str) -> Option<&PortHandle> {
        self.ports.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PortHandle> {
        self.ports.values()
    }

    pub fn len(&self) -> usize {
        self.ports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    /// Whether anything would be written by a persistence flush.
    pub fn has_persistent(&self) -> bool {
        !self.pending_restore.is_empty() || self.ports.values().any(|p| p.is_persistent())
    }

    /// Queue restored state; applied as matching ports get created.
    pub fn stage_restore(&mut self, queues: BTreeMap<String, Vec<QueuedMessage>>) {
        for (name, stored) in queues {
            match self.ports.get(&name) {
                Some(port) if port.direction() == PortDirection::In => port.restore(stored),
                Some(_) => tracing::warn!("Ignoring restored queue for out-port '{}'", name),
                None => {
                    self.pending_restore.insert(name, stored);
                }
            }
        }
    }

    pub fn pending_restore_len(&self) -> usize {
        self.pending_restore.len()
    }

    /// Queues to persist: persistent in-ports plus restored queues still
    /// waiting for their port.
    pub fn persisted_queues(&self) -> BTreeMap<String, Vec<QueuedMessage>> {
        let mut out = self.pending_restore.clone();
        for port in self.ports.values() {
            if port.is_persistent() && port.direction() == PortDirection::In {
                out.insert(port.name().to_string(), port.queued());
            }
        }
        out
    }
}
