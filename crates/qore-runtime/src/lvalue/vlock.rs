//! Ordered set of locks held while an lvalue chain is resolved

use std::sync::Arc;

use lock_api::ArcMutexGuard;
use parking_lot::{Mutex, RawMutex};

use crate::error::{QoreError, Result};
use crate::value::{TypeInfo, Value};
use crate::var::{Var, VarState};

enum GateGuard {
    Var(ArcMutexGuard<RawMutex, VarState>),
    Object(ArcMutexGuard<RawMutex, Value>),
}

struct Gate {
    name: String,
    key: usize,
    guard: GateGuard,
}

fn lock_key<T>(m: &Arc<Mutex<T>>) -> usize {
    Arc::as_ptr(m) as *const () as usize
}

/// Locks acquired along an lvalue chain, in acquisition order.
///
/// Gates are released strictly in reverse order, either explicitly with
/// [`VLock::release_all`] or when the `VLock` is dropped, so an error at
/// any depth of a chain releases exactly the locks taken before it.
#[derive(Default)]
pub struct VLock {
    gates: Vec<Gate>,
}

impl VLock {
    /// Create an empty lock set
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of held locks
    pub fn len(&self) -> usize {
        self.gates.len()
    }

    /// True if no lock is held
    pub fn is_empty(&self) -> bool {
        self.gates.is_empty()
    }

    /// Names of the held gates in acquisition order
    pub fn names(&self) -> Vec<&str> {
        self.gates.iter().map(|g| g.name.as_str()).collect()
    }

    fn check_not_held(&self, name: &str, key: usize) -> Result<()> {
        if self.gates.iter().any(|g| g.key == key) {
            return Err(QoreError::CircularReference {
                name: name.to_string(),
            });
        }
        Ok(())
    }

    pub(crate) fn lock_var(&mut self, name: &str, state: &Arc<Mutex<VarState>>) -> Result<usize> {
        let key = lock_key(state);
        self.check_not_held(name, key)?;
        let guard = state.lock_arc();
        Ok(self.push(name, key, GateGuard::Var(guard)))
    }

    /// Target of the import held at `gate`, if the gate is an imported variable
    pub(crate) fn import_target(&self, gate: usize) -> Option<(Arc<Var>, bool)> {
        match self.gates.get(gate).map(|g| &g.guard) {
            Some(GateGuard::Var(guard)) => match &**guard {
                VarState::Imported { target, readonly } => Some((Arc::clone(target), *readonly)),
                VarState::Inline { .. } => None,
            },
            _ => None,
        }
    }

    /// Release the most recently acquired lock
    pub(crate) fn release_last(&mut self) {
        if let Some(gate) = self.gates.pop() {
            drop(gate.guard);
            tracing::trace!(gate = %gate.name, "lvalue lock released");
        }
    }

    pub(crate) fn lock_object(&mut self, name: &str, members: &Arc<Mutex<Value>>) -> Result<usize> {
        let key = lock_key(members);
        self.check_not_held(name, key)?;
        let guard = members.lock_arc();
        Ok(self.push(name, key, GateGuard::Object(guard)))
    }

    fn push(&mut self, name: &str, key: usize, guard: GateGuard) -> usize {
        tracing::trace!(gate = name, depth = self.gates.len() + 1, "lvalue lock acquired");
        self.gates.push(Gate {
            name: name.to_string(),
            key,
            guard,
        });
        self.gates.len() - 1
    }

    fn released(gate: usize) -> QoreError {
        QoreError::ValueError(format!("lvalue gate {} is no longer held", gate))
    }

    pub(crate) fn root(&self, gate: usize) -> Result<&Value> {
        match self.gates.get(gate).map(|g| &g.guard) {
            Some(GateGuard::Var(guard)) => match &**guard {
                VarState::Inline { value, .. } => Ok(value),
                VarState::Imported { .. } => Err(Self::released(gate)),
            },
            Some(GateGuard::Object(guard)) => Ok(&**guard),
            None => Err(Self::released(gate)),
        }
    }

    pub(crate) fn root_mut(&mut self, gate: usize) -> Result<&mut Value> {
        match self.gates.get_mut(gate).map(|g| &mut g.guard) {
            Some(GateGuard::Var(guard)) => match &mut **guard {
                VarState::Inline { value, .. } => Ok(value),
                VarState::Imported { .. } => Err(Self::released(gate)),
            },
            Some(GateGuard::Object(guard)) => Ok(&mut **guard),
            None => Err(Self::released(gate)),
        }
    }

    pub(crate) fn type_info(&self, gate: usize) -> TypeInfo {
        match self.gates.get(gate).map(|g| &g.guard) {
            Some(GateGuard::Var(guard)) => match &**guard {
                VarState::Inline { type_info, .. } => *type_info,
                VarState::Imported { .. } => TypeInfo::ANY,
            },
            _ => TypeInfo::ANY,
        }
    }

    /// Release every held lock in reverse acquisition order.
    ///
    /// Returns the gate names in the order they were released.
    pub fn release_all(&mut self) -> Vec<String> {
        let mut released = Vec::with_capacity(self.gates.len());
        while let Some(gate) = self.gates.pop() {
            drop(gate.guard);
            tracing::trace!(gate = %gate.name, "lvalue lock released");
            released.push(gate.name);
        }
        released
    }
}

impl Drop for VLock {
    fn drop(&mut self) {
        self.release_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_release_in_reverse_order() {
        let a = Var::new("a");
        let b = Var::new("b");
        let mut vl = VLock::new();
        vl.lock_var("a", a.state()).unwrap();
        vl.lock_var("b", b.state()).unwrap();
        assert!(a.is_locked() && b.is_locked());
        assert_eq!(vl.names(), vec!["a", "b"]);
        assert_eq!(vl.release_all(), vec!["b", "a"]);
        assert!(!a.is_locked() && !b.is_locked());
    }

    #[test]
    fn test_relock_is_circular() {
        let a = Var::new("a");
        let mut vl = VLock::new();
        vl.lock_var("a", a.state()).unwrap();
        assert!(matches!(
            vl.lock_var("a", a.state()),
            Err(QoreError::CircularReference { .. })
        ));
        assert_eq!(vl.len(), 1);
    }

    #[test]
    fn test_drop_releases() {
        let a = Var::new("a");
        {
            let mut vl = VLock::new();
            vl.lock_var("a", a.state()).unwrap();
            assert!(a.is_locked());
        }
        assert!(!a.is_locked());
    }
}
