//! Object instances

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::{Value, ValueHash};

static NEXT_OBJECT_ID: AtomicU64 = AtomicU64::new(1);

/// An object instance.
///
/// Objects are shared by handle, never copied. Members live behind their
/// own lock, which is one of the gates an lvalue chain may pass through.
pub struct ObjectValue {
    class_name: String,
    id: u64,
    members: Arc<Mutex<Value>>,
}

impl ObjectValue {
    /// Create an object with no members
    pub fn new(class_name: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            id: NEXT_OBJECT_ID.fetch_add(1, Ordering::Relaxed),
            members: Arc::new(Mutex::new(Value::hash(ValueHash::new()))),
        }
    }

    /// Add a member (builder pattern)
    pub fn with_member(self, name: &str, value: Value) -> Self {
        self.set_member(name, value);
        self
    }

    /// Class name
    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    /// Process-unique object id
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Copy of a member, NOTHING if absent
    pub fn get_member(&self, name: &str) -> Value {
        match &*self.members.lock() {
            Value::Hash(h) => h.get_value(name),
            _ => Value::Nothing,
        }
    }

    /// Set a member. The previous value is dropped after the member lock is released.
    pub fn set_member(&self, name: &str, value: Value) {
        let old = {
            let mut guard = self.members.lock();
            guard.hash_mut().and_then(|h| h.set(name, value))
        };
        drop(old);
    }

    /// Member names in insertion order
    pub fn member_names(&self) -> Vec<String> {
        match &*self.members.lock() {
            Value::Hash(h) => h.keys().map(str::to_string).collect(),
            _ => Vec::new(),
        }
    }

    /// True while some thread holds the member lock
    pub fn is_locked(&self) -> bool {
        self.members.is_locked()
    }

    pub(crate) fn members_lock(&self) -> &Arc<Mutex<Value>> {
        &self.members
    }
}

impl fmt::Debug for ObjectValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectValue")
            .field("class_name", &self.class_name)
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}
