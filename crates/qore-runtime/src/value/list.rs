//! Growable list of values

use std::cmp::max;

use super::{TypeInfo, Value};
use crate::context::EvalContext;
use crate::error::{QoreError, Result};

/// Minimum number of extra slots reserved when a list grows.
pub const LIST_PAD: usize = 15;

/// Ordered, growable sequence of values.
///
/// The list keeps a count of elements that need cycle scanning (see
/// [`Value::needs_scan`]); every mutator below keeps that count exact.
/// Capacity grows geometrically: reaching `n` elements reserves room for
/// `n + max(n / 4, LIST_PAD)`.
#[derive(Debug, Clone, Default)]
pub struct ValueList {
    entries: Vec<Value>,
    scan_count: usize,
    element_type: Option<TypeInfo>,
    finalized: bool,
    variable_args: bool,
}

/// Map a possibly negative offset onto `0..=len`.
fn normalize_offset(offset: i64, len: usize) -> usize {
    if offset < 0 {
        let from_end = len as i64 + offset;
        if from_end < 0 {
            0
        } else {
            from_end as usize
        }
    } else {
        (offset as usize).min(len)
    }
}

/// Map a possibly negative length onto `0..=remaining`.
fn normalize_length(length: i64, remaining: usize) -> usize {
    if length < 0 {
        let keep = remaining as i64 + length;
        if keep < 0 {
            0
        } else {
            keep as usize
        }
    } else {
        (length as usize).min(remaining)
    }
}

impl ValueList {
    /// Create an empty list
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty list whose elements must satisfy `element_type`
    pub fn with_element_type(element_type: TypeInfo) -> Self {
        Self {
            element_type: Some(element_type),
            ..Default::default()
        }
    }

    /// Build a list from owned values
    pub fn from_values(entries: Vec<Value>) -> Self {
        let scan_count = entries.iter().filter(|v| v.needs_scan()).count();
        Self {
            entries,
            scan_count,
            ..Default::default()
        }
    }

    // ═══════════════════════════════════════════════════════════════════
    // Accessors
    // ═══════════════════════════════════════════════════════════════════

    /// Number of elements
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if the list has no elements
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Reserved slots
    pub fn capacity(&self) -> usize {
        self.entries.capacity()
    }

    /// Number of elements that need cycle scanning
    pub fn scan_count(&self) -> usize {
        self.scan_count
    }

    /// Element type constraint, if any
    pub fn element_type(&self) -> Option<TypeInfo> {
        self.element_type
    }

    /// True once the list was marked as a finished argument list
    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Mark the list as a finished argument list
    pub fn finalize(&mut self) {
        self.finalized = true;
    }

    /// True if the list carries variadic call arguments
    pub fn is_variable_args(&self) -> bool {
        self.variable_args
    }

    /// Flag the list as carrying variadic call arguments
    pub fn set_variable_args(&mut self, on: bool) {
        self.variable_args = on;
    }

    /// True if any element needs evaluation
    pub fn needs_eval(&self) -> bool {
        self.entries.iter().any(Value::needs_eval)
    }

    /// Elements as a slice
    pub fn as_slice(&self) -> &[Value] {
        &self.entries
    }

    /// Iterate over elements
    pub fn iter(&self) -> std::slice::Iter<'_, Value> {
        self.entries.iter()
    }

    /// Borrow an element
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.entries.get(index)
    }

    /// Copy of the element at `index`; negative indexes count from the end.
    /// Out-of-range access yields NOTHING.
    pub fn get_value(&self, index: i64) -> Value {
        let idx = if index < 0 {
            self.entries.len() as i64 + index
        } else {
            index
        };
        usize::try_from(idx)
            .ok()
            .and_then(|i| self.entries.get(i))
            .cloned()
            .unwrap_or_default()
    }

    /// Position of the first element softly equal to `value`
    pub fn index_of(&self, value: &Value) -> Option<usize> {
        self.entries.iter().position(|v| v.is_equal_soft(value))
    }

    // ═══════════════════════════════════════════════════════════════════
    // Growth
    // ═══════════════════════════════════════════════════════════════════

    /// Make room for at least `num` elements.
    ///
    /// Fails with [`QoreError::ResourceExhausted`] if the allocation cannot
    /// be satisfied; the list is unchanged in that case.
    pub fn reserve(&mut self, num: usize) -> Result<()> {
        if num <= self.entries.capacity() {
            return Ok(());
        }
        let target = num
            .checked_add(max(num >> 2, LIST_PAD))
            .ok_or(QoreError::ResourceExhausted { requested: num })?;
        self.entries
            .try_reserve_exact(target - self.entries.len())
            .map_err(|_| QoreError::ResourceExhausted { requested: target })
    }

    fn check_element(&self, value: &Value) -> Result<()> {
        match self.element_type {
            Some(ti) if !ti.accepts(value) => Err(QoreError::type_error(ti.name(), value)),
            _ => Ok(()),
        }
    }

    fn track_added(&mut self, value: &Value) {
        if value.needs_scan() {
            self.scan_count += 1;
        }
    }

    fn track_removed(&mut self, value: &Value) {
        if value.needs_scan() {
            self.scan_count -= 1;
        }
    }

    // ═══════════════════════════════════════════════════════════════════
    // Mutation
    // ═══════════════════════════════════════════════════════════════════

    /// Append a value
    pub fn push(&mut self, value: Value) -> Result<()> {
        self.check_element(&value)?;
        self.reserve(self.entries.len() + 1)?;
        self.track_added(&value);
        self.entries.push(value);
        Ok(())
    }

    /// Insert a value at `index` (clamped to the end)
    pub fn insert(&mut self, index: usize, value: Value) -> Result<()> {
        self.check_element(&value)?;
        self.reserve(self.entries.len() + 1)?;
        self.track_added(&value);
        let index = index.min(self.entries.len());
        self.entries.insert(index, value);
        Ok(())
    }

    /// Remove and return the last element, NOTHING if empty
    pub fn pop(&mut self) -> Value {
        match self.entries.pop() {
            Some(v) => {
                self.track_removed(&v);
                v
            }
            None => Value::Nothing,
        }
    }

    /// Remove and return the first element, NOTHING if empty
    pub fn shift(&mut self) -> Value {
        if self.entries.is_empty() {
            return Value::Nothing;
        }
        let v = self.entries.remove(0);
        self.track_removed(&v);
        v
    }

    /// Replace the element at `index`, extending with NOTHING as needed.
    /// Returns the previous element.
    pub fn set(&mut self, index: usize, value: Value) -> Result<Value> {
        self.check_element(&value)?;
        self.with_entry_mut(index, |slot| Ok(std::mem::replace(slot, value)))
    }

    /// Run `f` on the slot at `index`, extending the list with NOTHING if
    /// it is too short. The scan count is adjusted for whatever `f` leaves
    /// in the slot.
    pub fn with_entry_mut<R>(
        &mut self,
        index: usize,
        f: impl FnOnce(&mut Value) -> Result<R>,
    ) -> Result<R> {
        if index >= self.entries.len() {
            let needed = index
                .checked_add(1)
                .ok_or(QoreError::ResourceExhausted { requested: index })?;
            self.resize(needed)?;
        }
        let slot = &mut self.entries[index];
        let before = slot.needs_scan();
        let result = f(slot);
        let after = self.entries[index].needs_scan();
        match (before, after) {
            (false, true) => self.scan_count += 1,
            (true, false) => self.scan_count -= 1,
            _ => {}
        }
        result
    }

    /// Truncate or extend (with NOTHING) to exactly `len` elements
    pub fn resize(&mut self, len: usize) -> Result<()> {
        if len < self.entries.len() {
            let removed: Vec<Value> = self.entries.drain(len..).collect();
            for v in &removed {
                self.track_removed(v);
            }
        } else if len > self.entries.len() {
            self.reserve(len)?;
            self.entries.resize_with(len, Value::default);
        }
        Ok(())
    }

    /// Take the element at `index`, leaving NOTHING in its place
    pub fn get_and_clear(&mut self, index: usize) -> Value {
        match self.entries.get_mut(index) {
            Some(slot) => {
                let v = std::mem::take(slot);
                self.track_removed(&v);
                v
            }
            None => Value::Nothing,
        }
    }

    /// Append every element of `other`
    pub fn extend_from(&mut self, other: &ValueList) -> Result<()> {
        self.reserve(self.entries.len() + other.len())?;
        for v in other.iter() {
            self.push(v.clone())?;
        }
        Ok(())
    }

    /// Reverse element order in place
    pub fn reverse(&mut self) {
        self.entries.reverse();
    }

    // ═══════════════════════════════════════════════════════════════════
    // Splice
    // ═══════════════════════════════════════════════════════════════════

    /// Core splice operation.
    ///
    /// `offset` and `length` may be negative (counted from the end) and are
    /// clamped to the list. A list `replacement` is inserted element-wise,
    /// any other value as a single element, NOTHING inserts nothing. When
    /// `extract` is set the removed elements are returned as a new list.
    pub fn splice_intern(
        &mut self,
        offset: i64,
        length: Option<i64>,
        replacement: Option<&Value>,
        extract: bool,
    ) -> Result<Option<ValueList>> {
        let len = self.entries.len();
        let start = normalize_offset(offset, len);
        let count = match length {
            Some(l) => normalize_length(l, len - start),
            None => len - start,
        };

        let insert: Vec<Value> = match replacement {
            None | Some(Value::Nothing) => Vec::new(),
            Some(Value::List(l)) => l.entries.clone(),
            Some(v) => vec![v.clone()],
        };
        for v in &insert {
            self.check_element(v)?;
        }

        let new_len = len - count + insert.len();
        if new_len > len {
            self.reserve(new_len)?;
        }
        for v in &insert {
            self.track_added(v);
        }
        let removed: Vec<Value> = self.entries.splice(start..start + count, insert).collect();
        for v in &removed {
            self.track_removed(v);
        }

        Ok(extract.then(|| ValueList::from_values(removed)))
    }

    /// Remove `length` elements at `offset` and insert `replacement`
    pub fn splice(&mut self, offset: i64, length: Option<i64>, replacement: Option<&Value>) -> Result<()> {
        self.splice_intern(offset, length, replacement, false).map(drop)
    }

    /// Like [`splice`](Self::splice), returning the removed elements
    pub fn extract(
        &mut self,
        offset: i64,
        length: Option<i64>,
        replacement: Option<&Value>,
    ) -> Result<ValueList> {
        Ok(self
            .splice_intern(offset, length, replacement, true)?
            .unwrap_or_default())
    }

    // ═══════════════════════════════════════════════════════════════════
    // Copying and Evaluation
    // ═══════════════════════════════════════════════════════════════════

    /// Copy the list. Elements are shared; `strip_type` drops the element
    /// type constraint.
    pub fn copy(&self, strip_type: bool) -> ValueList {
        let mut out = self.clone();
        if strip_type {
            out.element_type = None;
        }
        out.finalized = false;
        out
    }

    /// Copy of a sub-range, with the same offset rules as splice
    pub fn copy_range(&self, offset: i64, length: Option<i64>) -> ValueList {
        let len = self.entries.len();
        let start = normalize_offset(offset, len);
        let count = match length {
            Some(l) => normalize_length(l, len - start),
            None => len - start,
        };
        ValueList::from_values(self.entries[start..start + count].to_vec())
    }

    /// Evaluate every element, stopping at the first failure
    pub fn eval(&self, ctx: &EvalContext) -> Result<ValueList> {
        let mut out = ValueList {
            element_type: self.element_type,
            ..Default::default()
        };
        out.reserve(self.entries.len())?;
        for v in &self.entries {
            ctx.check_interrupt()?;
            out.push(v.eval(ctx)?)?;
        }
        Ok(out)
    }

    pub(super) fn entries_mut(&mut self) -> &mut Vec<Value> {
        &mut self.entries
    }
}

impl FromIterator<Value> for ValueList {
    fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
        ValueList::from_values(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a ValueList {
    type Item = &'a Value;
    type IntoIter = std::slice::Iter<'a, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}
