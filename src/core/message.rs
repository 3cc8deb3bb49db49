//! Messages travelling between units.
//!
//! A [`Message`] is a handle with object identity: cloning the handle yields the
//! *same* message (both handles observe each other's writes), while
//! [`Message::deep_clone`] produces a structurally equal copy that can be mutated
//! independently. Fields hold either plain data ([`NodeValue`]) or an opaque
//! [`Handle`] to a resource that must never be duplicated.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// The Alias for serde_json::Value, the data carried inside message fields.
pub type NodeValue = serde_json::Value;

type Resource = Arc<dyn Any + Send + Sync>;
type Duplicate = fn(&(dyn Any + Send + Sync)) -> Option<Resource>;

fn duplicate_as<T: Any + Clone + Send + Sync>(value: &(dyn Any + Send + Sync)) -> Option<Resource> {
    value
        .downcast_ref::<T>()
        .map(|value| Arc::new(value.clone()) as Resource)
}

/// An opaque reference to something that cannot be copied (a live request, a socket...).
///
/// Cloning a `Handle` only bumps a reference count, so every copy of a message
/// carrying it talks to the same underlying resource.
#[derive(Clone)]
pub struct Handle {
    value: Resource,
    duplicate: Option<Duplicate>,
}

impl Handle {
    /// Wraps a resource that message copies must always share.
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Handle {
            value: Arc::new(value),
            duplicate: None,
        }
    }

    /// Wraps a resource that a message copy duplicates unless it sits under a
    /// reserved key.
    pub fn duplicable<T: Any + Clone + Send + Sync>(value: T) -> Self {
        Handle {
            value: Arc::new(value),
            duplicate: Some(duplicate_as::<T>),
        }
    }

    /// Wraps a resource that is already shared elsewhere.
    pub fn from_arc(value: Resource) -> Self {
        Handle {
            value,
            duplicate: None,
        }
    }

    /// Borrows the resource as a `T`, if that is what it holds.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }

    /// True when both handles point at the same resource.
    pub fn ptr_eq(&self, other: &Handle) -> bool {
        Arc::ptr_eq(&self.value, &other.value)
    }

    /// True when [`Handle::try_duplicate`] can produce a separate resource.
    pub fn is_duplicable(&self) -> bool {
        self.duplicate.is_some()
    }

    /// A handle to a fresh copy of the resource, or `None` if it cannot be copied.
    pub fn try_duplicate(&self) -> Option<Handle> {
        let duplicate = self.duplicate?;
        duplicate(self.value.as_ref()).map(|value| Handle {
            value,
            duplicate: self.duplicate,
        })
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({:p})", Arc::as_ptr(&self.value) as *const ())
    }
}

/// A snapshot of a single top-level message field.
#[derive(Debug, Clone)]
pub enum Field {
    /// Ordinary data.
    Data(NodeValue),
    /// A resource reference.
    Handle(Handle),
}

impl Field {
    /// The data, if this field is data.
    pub fn as_data(&self) -> Option<&NodeValue> {
        match self {
            Field::Data(value) => Some(value),
            Field::Handle(_) => None,
        }
    }

    /// The handle, if this field is a handle.
    pub fn as_handle(&self) -> Option<&Handle> {
        match self {
            Field::Handle(handle) => Some(handle),
            Field::Data(_) => None,
        }
    }
}

/// Data compares by value, handles by identity.
impl PartialEq for Field {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Field::Data(a), Field::Data(b)) => a == b,
            (Field::Handle(a), Field::Handle(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl From<NodeValue> for Field {
    fn from(value: NodeValue) -> Self {
        Field::Data(value)
    }
}

impl From<Handle> for Field {
    fn from(handle: Handle) -> Self {
        Field::Handle(handle)
    }
}

type Cell = Arc<RwLock<NodeValue>>;

fn read_cell(cell: &Cell) -> RwLockReadGuard<'_, NodeValue> {
    cell.read().unwrap_or_else(PoisonError::into_inner)
}

fn write_cell(cell: &Cell) -> RwLockWriteGuard<'_, NodeValue> {
    cell.write().unwrap_or_else(PoisonError::into_inner)
}

/// Storage behind a field. Data lives in its own cell so that a copy can
/// share it with the original.
#[derive(Clone)]
enum Slot {
    Data(Cell),
    Handle(Handle),
}

impl Slot {
    fn data(value: NodeValue) -> Self {
        Slot::Data(Arc::new(RwLock::new(value)))
    }

    fn snapshot(&self) -> Field {
        match self {
            Slot::Data(cell) => Field::Data(read_cell(cell).clone()),
            Slot::Handle(handle) => Field::Handle(handle.clone()),
        }
    }

    fn duplicate(&self, key: &str) -> Slot {
        match self {
            Slot::Data(cell) => Slot::data(read_cell(cell).clone()),
            Slot::Handle(handle) => match handle.try_duplicate() {
                Some(copy) => Slot::Handle(copy),
                None => {
                    log::warn!(
                        "Message field '{}' holds a handle that cannot be duplicated; sharing it with the copy.",
                        key
                    );
                    Slot::Handle(handle.clone())
                }
            },
        }
    }
}

type Body = BTreeMap<String, Slot>;

/// A message flowing through the graph.
///
/// `Message::clone` copies the *reference*; use [`deep_clone`](Message::deep_clone)
/// (or let the [`Dispatcher`](crate::Dispatcher) decide) for an isolated copy.
#[derive(Clone, Default)]
pub struct Message {
    inner: Arc<RwLock<Body>>,
}

impl Message {
    /// Creates an empty message.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a message from JSON.
    ///
    /// Every key of an object becomes a data field. Any other value is wrapped
    /// as `{"payload": value}`.
    pub fn from_json(value: NodeValue) -> Self {
        let body: Body = match value {
            NodeValue::Object(map) => map.into_iter().map(|(k, v)| (k, Slot::data(v))).collect(),
            other => BTreeMap::from([("payload".to_string(), Slot::data(other))]),
        };
        Message {
            inner: Arc::new(RwLock::new(body)),
        }
    }

    /// Builder-style data insert.
    pub fn with(self, key: impl Into<String>, value: impl Into<NodeValue>) -> Self {
        self.set(key, value);
        self
    }

    /// Builder-style handle insert.
    pub fn with_handle(self, key: impl Into<String>, handle: Handle) -> Self {
        self.insert_handle(key, handle);
        self
    }

    /// Returns a copy of the data stored under `key`, if it is data.
    pub fn get(&self, key: &str) -> Option<NodeValue> {
        match self.slot(key)? {
            Slot::Data(cell) => Some(read_cell(&cell).clone()),
            Slot::Handle(_) => None,
        }
    }

    /// Returns the handle stored under `key`, if it is a handle.
    pub fn handle(&self, key: &str) -> Option<Handle> {
        match self.slot(key)? {
            Slot::Handle(handle) => Some(handle),
            Slot::Data(_) => None,
        }
    }

    /// Snapshot of whatever is stored under `key`.
    pub fn field(&self, key: &str) -> Option<Field> {
        self.slot(key).map(|slot| slot.snapshot())
    }

    /// Stores data under `key`, returning whatever was there before.
    ///
    /// This replaces the field in this message only; a copy that shared the
    /// old value keeps it.
    pub fn set(&self, key: impl Into<String>, value: impl Into<NodeValue>) -> Option<Field> {
        let previous = self.write().insert(key.into(), Slot::data(value.into()));
        previous.map(|slot| slot.snapshot())
    }

    /// Stores a handle under `key`, returning whatever was there before.
    pub fn insert_handle(&self, key: impl Into<String>, handle: Handle) -> Option<Field> {
        let previous = self.write().insert(key.into(), Slot::Handle(handle));
        previous.map(|slot| slot.snapshot())
    }

    /// Removes the field under `key`.
    pub fn remove(&self, key: &str) -> Option<Field> {
        let previous = self.write().remove(key);
        previous.map(|slot| slot.snapshot())
    }

    /// Mutates the data under `key` in place. Returns `None` when the key is
    /// missing or holds a handle.
    ///
    /// `f` works on a copy of the value with no lock held, so it may read or
    /// write this message; the result is stored back once `f` returns. Copies
    /// sharing the field see the new value.
    pub fn modify<R>(&self, key: &str, f: impl FnOnce(&mut NodeValue) -> R) -> Option<R> {
        let Slot::Data(cell) = self.slot(key)? else {
            return None;
        };
        let mut value = read_cell(&cell).clone();
        let result = f(&mut value);
        *write_cell(&cell) = value;
        Some(result)
    }

    /// True when a field is stored under `key`.
    pub fn contains_key(&self, key: &str) -> bool {
        self.read().contains_key(key)
    }

    /// Field names in sorted order.
    pub fn keys(&self) -> Vec<String> {
        self.read().keys().cloned().collect()
    }

    /// Number of top-level fields.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// True when the message has no fields.
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Renders the data fields as a JSON object. Handles are left out.
    pub fn to_json(&self) -> NodeValue {
        let map: serde_json::Map<String, NodeValue> = self
            .snapshot()
            .into_iter()
            .filter_map(|(k, field)| match field {
                Field::Data(value) => Some((k, value)),
                Field::Handle(_) => None,
            })
            .collect();
        NodeValue::Object(map)
    }

    /// True when both handles refer to the very same message object.
    pub fn ptr_eq(&self, other: &Message) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Produces a copy of this message.
    ///
    /// Fields under keys for which `is_reserved` returns true are shared with
    /// the copy, data and handles alike: a change made through one message is
    /// seen by the other. Every other data field is copied recursively, and
    /// every other handle is duplicated when it was built with
    /// [`Handle::duplicable`]. A handle that cannot be duplicated is shared
    /// anyway and a warning is logged.
    pub fn deep_clone(&self, is_reserved: impl Fn(&str) -> bool) -> Message {
        let body: Body = self
            .read()
            .iter()
            .map(|(key, slot)| {
                let slot = if is_reserved(key) {
                    slot.clone()
                } else {
                    slot.duplicate(key)
                };
                (key.clone(), slot)
            })
            .collect();
        Message {
            inner: Arc::new(RwLock::new(body)),
        }
    }

    pub(crate) fn identity(&self) -> *const () {
        Arc::as_ptr(&self.inner) as *const ()
    }

    fn slot(&self, key: &str) -> Option<Slot> {
        self.read().get(key).cloned()
    }

    fn snapshot(&self) -> BTreeMap<String, Field> {
        self.read()
            .iter()
            .map(|(key, slot)| (key.clone(), slot.snapshot()))
            .collect()
    }

    fn read(&self) -> RwLockReadGuard<'_, Body> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Body> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Structural equality: same keys, equal data, identical handles.
impl PartialEq for Message {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other) || self.snapshot() == other.snapshot()
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.snapshot()).finish()
    }
}

impl From<NodeValue> for Message {
    fn from(value: NodeValue) -> Self {
        Message::from_json(value)
    }
}
