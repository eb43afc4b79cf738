//! Insertion-ordered string-keyed hash

use indexmap::IndexMap;

use super::Value;
use crate::context::EvalContext;
use crate::error::Result;

/// Hash of values keyed by string, iterated in insertion order.
///
/// Like [`ValueList`](super::ValueList) it keeps a count of members that
/// need cycle scanning.
#[derive(Debug, Clone, Default)]
pub struct ValueHash {
    members: IndexMap<String, Value>,
    scan_count: usize,
}

impl ValueHash {
    /// Create an empty hash
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty hash with room for `n` members
    pub fn with_capacity(n: usize) -> Self {
        Self {
            members: IndexMap::with_capacity(n),
            scan_count: 0,
        }
    }

    /// Number of members
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// True if there are no members
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Number of members that need cycle scanning
    pub fn scan_count(&self) -> usize {
        self.scan_count
    }

    /// True if any member needs evaluation
    pub fn needs_eval(&self) -> bool {
        self.members.values().any(Value::needs_eval)
    }

    /// Borrow a member
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.members.get(key)
    }

    /// Copy of a member, NOTHING if absent
    pub fn get_value(&self, key: &str) -> Value {
        self.members.get(key).cloned().unwrap_or_default()
    }

    /// True if the key exists
    pub fn contains_key(&self, key: &str) -> bool {
        self.members.contains_key(key)
    }

    /// Set a member, returning the previous value
    pub fn set(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        if value.needs_scan() {
            self.scan_count += 1;
        }
        let old = self.members.insert(key.into(), value);
        if old.as_ref().is_some_and(Value::needs_scan) {
            self.scan_count -= 1;
        }
        old
    }

    /// Remove a member, keeping the order of the others
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let old = self.members.shift_remove(key);
        if old.as_ref().is_some_and(Value::needs_scan) {
            self.scan_count -= 1;
        }
        old
    }

    /// Run `f` on the member slot for `key`, creating it as NOTHING if absent.
    pub fn with_value_mut<R>(&mut self, key: &str, f: impl FnOnce(&mut Value) -> R) -> R {
        let slot = self.members.entry(key.to_string()).or_default();
        let before = slot.needs_scan();
        let result = f(slot);
        let after = slot.needs_scan();
        match (before, after) {
            (false, true) => self.scan_count += 1,
            (true, false) => self.scan_count -= 1,
            _ => {}
        }
        result
    }

    /// Keys in insertion order
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.members.keys().map(String::as_str)
    }

    /// Members in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.members.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Copy all members of `other` into this hash, overwriting duplicates
    pub fn merge(&mut self, other: &ValueHash) {
        for (k, v) in other.iter() {
            self.set(k, v.clone());
        }
    }

    /// Evaluate every member, stopping at the first failure
    pub fn eval(&self, ctx: &EvalContext) -> Result<ValueHash> {
        let mut out = ValueHash::with_capacity(self.len());
        for (k, v) in self.iter() {
            ctx.check_interrupt()?;
            out.set(k, v.eval(ctx)?);
        }
        Ok(out)
    }
}

impl<K: Into<String>> FromIterator<(K, Value)> for ValueHash {
    fn from_iter<I: IntoIterator<Item = (K, Value)>>(iter: I) -> Self {
        let mut h = ValueHash::new();
        for (k, v) in iter {
            h.set(k, v);
        }
        h
    }
}
