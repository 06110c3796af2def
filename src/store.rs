//! Named result store.
//!
//! Holds values produced by invocations under user-chosen names. Inserting
//! an existing name replaces the value. Changes are delivered to callback
//! listeners registered with [`ResultStore::on_change`] and to async
//! receivers from [`ResultStore::subscribe`].

use crate::error::{Error, Result};
use crate::image::HostImage;
use crate::observability::record_store_size;
use crate::value::Value;
use indexmap::IndexMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::broadcast;

const EVENT_CAPACITY: usize = 64;

/// A stored value.
#[derive(Debug, Clone)]
pub enum StoredValue {
    /// A host image, already open in the image registry.
    Image(Arc<HostImage>),
    /// A library value.
    Value(Value),
}

impl StoredValue {
    /// Simple type name: `ImagePlus` for host images, else the value's type.
    pub fn type_name(&self) -> &str {
        match self {
            StoredValue::Image(_) => "ImagePlus",
            StoredValue::Value(v) => v.type_name(),
        }
    }

    /// The host image, if this is one.
    pub fn as_image(&self) -> Option<&Arc<HostImage>> {
        match self {
            StoredValue::Image(image) => Some(image),
            StoredValue::Value(_) => None,
        }
    }

    /// The library value, if this is one.
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            StoredValue::Value(v) => Some(v),
            StoredValue::Image(_) => None,
        }
    }
}

impl From<Value> for StoredValue {
    fn from(value: Value) -> Self {
        StoredValue::Value(value)
    }
}

impl From<Arc<HostImage>> for StoredValue {
    fn from(image: Arc<HostImage>) -> Self {
        StoredValue::Image(image)
    }
}

/// Store change notification.
#[derive(Debug, Clone)]
pub enum StoreEvent {
    /// A new name was added.
    Inserted {
        /// Entry name.
        name: String,
    },
    /// An existing name got a new value.
    Replaced {
        /// Entry name.
        name: String,
    },
    /// A name was removed.
    Removed {
        /// Entry name.
        name: String,
    },
    /// Every entry was removed.
    Cleared,
}

impl fmt::Display for StoreEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreEvent::Inserted { name } => write!(f, "'{}' inserted", name),
            StoreEvent::Replaced { name } => write!(f, "'{}' replaced", name),
            StoreEvent::Removed { name } => write!(f, "'{}' removed", name),
            StoreEvent::Cleared => write!(f, "store cleared"),
        }
    }
}

type Listener = Arc<dyn Fn(&StoreEvent) + Send + Sync>;

/// Handle returned by [`ResultStore::on_change`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subscription(u64);

/// Named values produced by invocations.
pub struct ResultStore {
    entries: RwLock<IndexMap<String, StoredValue>>,
    listeners: Mutex<Vec<(Subscription, Listener)>>,
    next_subscription: AtomicU64,
    events: broadcast::Sender<StoreEvent>,
}

impl Default for ResultStore {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ResultStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultStore")
            .field("names", &self.names())
            .finish()
    }
}

impl ResultStore {
    /// Create an empty store.
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            entries: RwLock::new(IndexMap::new()),
            listeners: Mutex::new(Vec::new()),
            next_subscription: AtomicU64::new(1),
            events,
        }
    }

    fn notify(&self, event: StoreEvent) {
        tracing::debug!(%event, "result store changed");
        let listeners: Vec<Listener> = self
            .listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        for listener in listeners {
            listener(&event);
        }
        // No receivers is fine.
        let _ = self.events.send(event);
    }

    /// Store `value` under `name`. Returns the value it replaced.
    pub fn put(&self, name: impl Into<String>, value: impl Into<StoredValue>) -> Option<StoredValue> {
        let name = name.into();
        let (previous, len) = {
            let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
            let previous = entries.insert(name.clone(), value.into());
            (previous, entries.len())
        };
        record_store_size(len);
        let event = if previous.is_some() {
            StoreEvent::Replaced { name }
        } else {
            StoreEvent::Inserted { name }
        };
        self.notify(event);
        previous
    }

    /// Value stored under `name`.
    pub fn get(&self, name: &str) -> Result<StoredValue> {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
            .ok_or_else(|| Error::NotFound(name.to_string()))
    }

    /// Remove `name`. Returns the removed value.
    pub fn remove(&self, name: &str) -> Option<StoredValue> {
        let (removed, len) = {
            let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
            let removed = entries.shift_remove(name);
            (removed, entries.len())
        };
        if removed.is_some() {
            record_store_size(len);
            self.notify(StoreEvent::Removed {
                name: name.to_string(),
            });
        }
        removed
    }

    /// Remove every entry.
    pub fn clear(&self) {
        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        record_store_size(0);
        self.notify(StoreEvent::Cleared);
    }

    /// Returns true if `name` is stored.
    pub fn contains(&self, name: &str) -> bool {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(name)
    }

    /// Names in insertion order.
    pub fn names(&self) -> Vec<String> {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect()
    }

    /// Names whose value has the simple type name `type_name`.
    pub fn names_of_type(&self, type_name: &str) -> Vec<String> {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|(_, v)| v.type_name() == type_name)
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Returns true if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Call `listener` after every change, outside the store lock.
    pub fn on_change<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&StoreEvent) + Send + Sync + 'static,
    {
        let id = Subscription(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, Arc::new(listener)));
        id
    }

    /// Drop a listener. Returns false if it was not registered.
    pub fn unsubscribe(&self, subscription: Subscription) -> bool {
        let mut listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
        let before = listeners.len();
        listeners.retain(|(id, _)| *id != subscription);
        listeners.len() != before
    }

    /// Receive change events asynchronously.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }
}
