//! Lvalue resolution
//!
//! An [`LValueExpr`] names a storage slot: a variable, optionally followed
//! by object members, hash keys and list indexes. [`LValueHelper`] resolves
//! the expression to that slot, locking each gate it passes (variables and
//! objects) in chain order, and keeps the locks until it is dropped or
//! [`LValueHelper::release_all`] is called.

mod vlock;

pub use vlock::VLock;

use std::fmt;
use std::sync::Arc;

use crate::context::EvalContext;
use crate::error::{QoreError, Result};
use crate::eval::Evaluate;
use crate::value::{BaseType, ReferenceValue, TypeInfo, Value, ValueHash, ValueList};
use crate::var::Var;

/// Expression naming a storage slot
#[derive(Debug, Clone)]
pub enum LValueExpr {
    /// A variable
    Var(Arc<Var>),
    /// Member of the object stored in `base`
    Member {
        /// Expression yielding the object
        base: Box<LValueExpr>,
        /// Member name
        member: String,
    },
    /// Key of the hash stored in `base`
    Key {
        /// Expression yielding the hash
        base: Box<LValueExpr>,
        /// Hash key
        key: String,
    },
    /// Element of the list stored in `base`
    Index {
        /// Expression yielding the list
        base: Box<LValueExpr>,
        /// Element index; negative counts from the end
        index: i64,
    },
}

impl LValueExpr {
    /// Slot of a variable
    pub fn var(var: &Arc<Var>) -> Self {
        LValueExpr::Var(Arc::clone(var))
    }

    /// Object member of this slot
    pub fn member(self, member: impl Into<String>) -> Self {
        LValueExpr::Member {
            base: Box::new(self),
            member: member.into(),
        }
    }

    /// Hash key of this slot
    pub fn key(self, key: impl Into<String>) -> Self {
        LValueExpr::Key {
            base: Box::new(self),
            key: key.into(),
        }
    }

    /// List element of this slot
    pub fn index(self, index: i64) -> Self {
        LValueExpr::Index {
            base: Box::new(self),
            index,
        }
    }

    /// A reference value pointing at this slot
    pub fn reference(self) -> Value {
        Value::Reference(Arc::new(ReferenceValue::new(self)))
    }

    /// Readable rendering, e.g. `obj.items[2]{name}`
    pub fn name(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for LValueExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LValueExpr::Var(v) => write!(f, "{}", v.name()),
            LValueExpr::Member { base, member } => write!(f, "{}.{}", base, member),
            LValueExpr::Key { base, key } => write!(f, "{}{{{}}}", base, key),
            LValueExpr::Index { base, index } => write!(f, "{}[{}]", base, index),
        }
    }
}

impl Evaluate for LValueExpr {
    fn eval(&self, ctx: &EvalContext) -> Result<Value> {
        LValueHelper::for_read(self, ctx)?.get_value()
    }
}

#[derive(Debug, Clone, PartialEq)]
enum PathStep {
    Key(String),
    Index(i64),
}

struct Target {
    gate: usize,
    path: Vec<PathStep>,
    type_info: TypeInfo,
}

/// Lock a variable, following imports. Only the final (inline) variable
/// stays locked.
fn lock_var(vl: &mut VLock, var: &Arc<Var>, for_write: bool, ctx: &EvalContext) -> Result<usize> {
    let mut current = Arc::clone(var);
    for _ in 0..=ctx.max_reference_depth {
        if for_write && current.is_readonly() {
            return Err(QoreError::ReadOnlyVariable {
                name: current.name().to_string(),
            });
        }
        let gate = vl.lock_var(current.name(), current.state())?;
        let (target, readonly) = match vl.import_target(gate) {
            None => return Ok(gate),
            Some(import) => import,
        };
        vl.release_last();
        if for_write && readonly {
            return Err(QoreError::ReadOnlyVariable {
                name: current.name().to_string(),
            });
        }
        current = target;
    }
    Err(QoreError::CircularReference {
        name: var.name().to_string(),
    })
}

/// Copy of the value at `path` below `root`; missing slots read as NOTHING
fn read_at(root: &Value, path: &[PathStep]) -> Value {
    let mut cur = root.clone();
    for step in path {
        cur = match (step, &cur) {
            (PathStep::Key(k), Value::Hash(h)) => h.get_value(k),
            (PathStep::Index(i), Value::List(l)) => l.get_value(*i),
            _ => return Value::Nothing,
        };
    }
    cur
}

fn write_index(len: usize, index: i64) -> Result<usize> {
    let idx = if index < 0 { len as i64 + index } else { index };
    usize::try_from(idx).map_err(|_| QoreError::ValueError(format!("list index {} is out of range", index)))
}

/// Run `f` on the slot at `path` below `slot`, creating intermediate
/// containers and unsharing them on the way down.
fn apply_at<R, F>(slot: &mut Value, path: &[PathStep], f: F) -> Result<R>
where
    F: FnOnce(&mut Value) -> Result<R>,
{
    match path.split_first() {
        None => f(slot),
        Some((PathStep::Key(k), rest)) => {
            if slot.is_nothing() {
                *slot = Value::hash(ValueHash::new());
            }
            match slot {
                Value::Hash(h) => Arc::make_mut(h).with_value_mut(k, |child| apply_at(child, rest, f)),
                other => Err(QoreError::type_error("hash", other)),
            }
        }
        Some((PathStep::Index(i), rest)) => {
            if slot.is_nothing() {
                *slot = Value::list(ValueList::new());
            }
            match slot {
                Value::List(l) => {
                    let list = Arc::make_mut(l);
                    let idx = write_index(list.len(), *i)?;
                    list.with_entry_mut(idx, |child| apply_at(child, rest, f))
                }
                other => Err(QoreError::type_error("list", other)),
            }
        }
    }
}

fn resolve(expr: &LValueExpr, vl: &mut VLock, for_write: bool, ctx: &EvalContext, depth: usize) -> Result<Target> {
    if depth > ctx.max_reference_depth {
        return Err(QoreError::CircularReference { name: expr.name() });
    }
    ctx.check_interrupt()?;

    let mut target = match expr {
        LValueExpr::Var(var) => {
            let gate = lock_var(vl, var, for_write, ctx)?;
            Target {
                gate,
                path: Vec::new(),
                type_info: vl.type_info(gate),
            }
        }
        LValueExpr::Key { base, key } => {
            let mut t = resolve(base, vl, for_write, ctx, depth + 1)?;
            t.path.push(PathStep::Key(key.clone()));
            t.type_info = TypeInfo::ANY;
            t
        }
        LValueExpr::Index { base, index } => {
            let mut t = resolve(base, vl, for_write, ctx, depth + 1)?;
            t.path.push(PathStep::Index(*index));
            t.type_info = TypeInfo::ANY;
            t
        }
        LValueExpr::Member { base, member } => {
            let t = resolve(base, vl, for_write, ctx, depth + 1)?;
            let obj = match read_at(vl.root(t.gate)?, &t.path) {
                Value::Object(o) => o,
                other => return Err(QoreError::type_error("object", &other)),
            };
            let gate_name = format!("{}.{}", obj.class_name(), member);
            let gate = vl.lock_object(&gate_name, obj.members_lock())?;
            Target {
                gate,
                path: vec![PathStep::Key(member.clone())],
                type_info: TypeInfo::ANY,
            }
        }
    };

    // a slot holding a reference forwards to the referenced lvalue
    if let Value::Reference(r) = read_at(vl.root(target.gate)?, &target.path) {
        target = resolve(r.target(), vl, for_write, ctx, depth + 1)?;
    }
    Ok(target)
}

/// Resolved, locked lvalue.
///
/// Holds every gate lock acquired while resolving. Values displaced by
/// writes are parked and dropped only after the locks are released, so no
/// teardown runs while a gate is held.
pub struct LValueHelper {
    vlock: VLock,
    gate: usize,
    path: Vec<PathStep>,
    type_info: TypeInfo,
    for_write: bool,
    saved: Vec<Value>,
    name: String,
}

impl LValueHelper {
    /// Resolve `expr` for writing
    pub fn new(expr: &LValueExpr, ctx: &EvalContext) -> Result<Self> {
        Self::open(expr, ctx, true)
    }

    /// Resolve `expr` for reading; read-only imports are allowed
    pub fn for_read(expr: &LValueExpr, ctx: &EvalContext) -> Result<Self> {
        Self::open(expr, ctx, false)
    }

    fn open(expr: &LValueExpr, ctx: &EvalContext, for_write: bool) -> Result<Self> {
        let mut vlock = VLock::new();
        // on failure `vlock` is dropped here, releasing what was acquired
        let target = resolve(expr, &mut vlock, for_write, ctx, 0)?;
        Ok(Self {
            vlock,
            gate: target.gate,
            path: target.path,
            type_info: target.type_info,
            for_write,
            saved: Vec::new(),
            name: expr.name(),
        })
    }

    /// Rendering of the resolved expression
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared type of the slot (ANY below the variable level)
    pub fn type_info(&self) -> TypeInfo {
        self.type_info
    }

    /// Number of locks currently held
    pub fn lock_depth(&self) -> usize {
        self.vlock.len()
    }

    /// Names of the held gates in acquisition order
    pub fn gate_names(&self) -> Vec<&str> {
        self.vlock.names()
    }

    /// Copy of the slot's value
    pub fn get_value(&self) -> Result<Value> {
        Ok(read_at(self.vlock.root(self.gate)?, &self.path))
    }

    fn check_write(&self) -> Result<()> {
        if !self.for_write {
            return Err(QoreError::ValueError(format!(
                "lvalue '{}' was resolved for reading",
                self.name
            )));
        }
        Ok(())
    }

    fn apply<R>(&mut self, f: impl FnOnce(&mut Value) -> Result<R>) -> Result<R> {
        self.check_write()?;
        let root = self.vlock.root_mut(self.gate)?;
        apply_at(root, &self.path, f)
    }

    /// Store a value, enforcing the declared type
    pub fn assign(&mut self, value: Value) -> Result<()> {
        if !self.type_info.accepts(&value) {
            return Err(QoreError::type_error(self.type_info.name(), &value));
        }
        let old = self.apply(|slot| Ok(std::mem::replace(slot, value)))?;
        self.saved.push(old);
        Ok(())
    }

    /// Take the value out of the slot, leaving NOTHING
    pub fn remove(&mut self) -> Result<Value> {
        self.apply(|slot| Ok(std::mem::take(slot)))
    }

    /// Append to the list in the slot, creating the list if the slot is empty
    pub fn push(&mut self, value: Value) -> Result<()> {
        let type_info = self.type_info;
        self.apply(|slot| {
            if slot.is_nothing() {
                if !type_info.allows(BaseType::List) {
                    return Err(QoreError::type_error(type_info.name(), &Value::list(ValueList::new())));
                }
                *slot = Value::list(ValueList::new());
            }
            if !slot.is_list() {
                return Err(QoreError::type_error("list", slot));
            }
            slot.list_mut().map_or(Ok(()), |list| list.push(value))
        })
    }

    /// Numeric `+=`; NOTHING counts as zero. Returns the new value.
    pub fn plus_equals(&mut self, rhs: &Value) -> Result<Value> {
        let type_info = self.type_info;
        let name = self.name.clone();
        self.apply(|slot| {
            let sum = match (&*slot, rhs) {
                (Value::Float(_), _) | (_, Value::Float(_)) => Value::Float(slot.get_as_float() + rhs.get_as_float()),
                (Value::Nothing | Value::Int(_) | Value::Bool(_), _) => {
                    Value::Int(slot.get_as_int().checked_add(rhs.get_as_int()).ok_or_else(|| {
                        QoreError::ValueError(format!("integer overflow in '{}' += {}", name, rhs.get_as_int()))
                    })?)
                }
                (Value::String(s), _) => Value::string(format!("{}{}", s, rhs.get_as_string())),
                (other, _) => return Err(QoreError::type_error("number", other)),
            };
            if !type_info.accepts(&sum) {
                return Err(QoreError::type_error(type_info.name(), &sum));
            }
            *slot = sum.clone();
            Ok(sum)
        })
    }

    /// Release every lock in reverse order, then drop displaced values.
    ///
    /// Returns the gate names in release order. The helper cannot access
    /// the slot afterwards.
    pub fn release_all(&mut self) -> Vec<String> {
        let released = self.vlock.release_all();
        self.saved.clear();
        released
    }
}

impl Drop for LValueHelper {
    fn drop(&mut self) {
        self.vlock.release_all();
        self.saved.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::ObjectValue;

    #[test]
    fn test_assign_creates_nested_containers() {
        let ctx = EvalContext::new();
        let v = Var::new("data");
        let expr = LValueExpr::var(&v).key("items").index(2);
        LValueHelper::new(&expr, &ctx).unwrap().assign(Value::Int(7)).unwrap();

        let items = v.get_value().unwrap().as_hash().unwrap().get_value("items");
        let list = items.as_list().unwrap();
        assert_eq!(list.len(), 3);
        assert_eq!(list.get_value(2), Value::Int(7));
    }

    #[test]
    fn test_write_does_not_touch_shared_copy() {
        let ctx = EvalContext::new();
        let original = Value::from(vec![1i64, 2, 3]);
        let v = Var::with_value("l", original.clone());
        LValueHelper::new(&LValueExpr::var(&v).index(0), &ctx)
            .unwrap()
            .assign(Value::Int(100))
            .unwrap();
        assert_eq!(original, Value::from(vec![1i64, 2, 3]));
        assert_eq!(v.get_value().unwrap(), Value::from(vec![100i64, 2, 3]));
    }

    #[test]
    fn test_member_access_locks_object() {
        let ctx = EvalContext::new();
        let obj = Arc::new(ObjectValue::new("Counter").with_member("n", Value::Int(1)));
        let v = Var::with_value("c", Value::Object(Arc::clone(&obj)));
        let mut lv = LValueHelper::new(&LValueExpr::var(&v).member("n"), &ctx).unwrap();
        assert_eq!(lv.lock_depth(), 2);
        assert!(obj.is_locked());
        assert_eq!(lv.plus_equals(&Value::Int(4)).unwrap(), Value::Int(5));
        assert_eq!(lv.release_all(), vec!["Counter.n".to_string(), "c".to_string()]);
        assert!(!obj.is_locked());
        assert_eq!(obj.get_member("n"), Value::Int(5));
    }

    #[test]
    fn test_member_on_non_object_fails() {
        let ctx = EvalContext::new();
        let v = Var::with_value("x", Value::Int(1));
        let err = LValueHelper::new(&LValueExpr::var(&v).member("m"), &ctx).err().unwrap();
        assert!(matches!(err, QoreError::TypeError { .. }));
        assert!(!v.is_locked());
    }

    #[test]
    fn test_reference_forwards_writes() {
        let ctx = EvalContext::new();
        let target = Var::with_value("target", Value::Int(1));
        let alias = Var::with_value("alias", LValueExpr::var(&target).reference());
        let mut lv = LValueHelper::new(&LValueExpr::var(&alias), &ctx).unwrap();
        assert_eq!(lv.gate_names(), vec!["alias", "target"]);
        lv.assign(Value::Int(2)).unwrap();
        drop(lv);
        assert_eq!(target.get_value().unwrap(), Value::Int(2));
        assert!(alias.get_value().unwrap().is_reference());
    }

    #[test]
    fn test_self_reference_is_circular() {
        let ctx = EvalContext::new();
        let v = Var::new("loop");
        v.set_value(LValueExpr::var(&v).reference()).unwrap();
        let err = LValueHelper::new(&LValueExpr::var(&v), &ctx).err().unwrap();
        assert!(matches!(err, QoreError::CircularReference { .. }));
        assert!(!v.is_locked());
    }

    #[test]
    fn test_push_and_remove() {
        let ctx = EvalContext::new();
        let v = Var::new("q");
        let expr = LValueExpr::var(&v);
        {
            let mut lv = LValueHelper::new(&expr, &ctx).unwrap();
            lv.push(Value::Int(1)).unwrap();
            lv.push(Value::Int(2)).unwrap();
        }
        assert_eq!(expr.eval(&ctx).unwrap(), Value::from(vec![1i64, 2]));
        let removed = LValueHelper::new(&expr.clone().index(0), &ctx).unwrap().remove().unwrap();
        assert_eq!(removed, Value::Int(1));
    }

    #[test]
    fn test_read_helper_rejects_writes() {
        let ctx = EvalContext::new();
        let v = Var::new("r");
        let mut lv = LValueHelper::for_read(&LValueExpr::var(&v), &ctx).unwrap();
        assert!(lv.assign(Value::Int(1)).is_err());
    }

    #[test]
    fn test_typed_variable_enforced() {
        let ctx = EvalContext::new();
        let v = Var::declare("n", TypeInfo::INT, None);
        let mut lv = LValueHelper::new(&LValueExpr::var(&v), &ctx).unwrap();
        assert!(lv.assign(Value::string("x")).is_err());
        assert!(lv.push(Value::Int(1)).is_err());
        lv.assign(Value::Int(3)).unwrap();
        assert_eq!(lv.plus_equals(&Value::Int(1)).unwrap(), Value::Int(4));
    }

    #[test]
    fn test_readonly_import_rejected_without_locking_alias() {
        use std::sync::mpsc;
        use std::time::Duration;

        let source = Var::with_value("limit", Value::Int(5));
        let alias = Var::new("limit");
        alias.make_reference(&source, true).unwrap();

        // while the alias lock is taken elsewhere, the write still fails fast
        let held = alias.state().lock();
        let (tx, rx) = mpsc::channel();
        let writer = Arc::clone(&alias);
        std::thread::spawn(move || {
            let ctx = EvalContext::new();
            let res = LValueHelper::new(&LValueExpr::var(&writer), &ctx).map(|_| ());
            tx.send(res.map_err(|e| e.code())).unwrap();
        });
        let res = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        drop(held);
        assert_eq!(res, Err("ACCESS-ERROR"));
        assert_eq!(source.get_value().unwrap(), Value::Int(5));
    }
}
