//! Variables: global and local storage cells
//!
//! A [`Var`] either holds its value inline or forwards to a variable
//! imported from another registry. Each variable carries its own lock;
//! lvalue resolution acquires those locks in chain order (see
//! [`crate::lvalue`]).

mod frame;
mod global;
mod local;

pub use frame::ScopeGuard;
pub use global::GlobalVariables;
pub use local::LocalVarStack;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{QoreError, Result};
use crate::value::{TypeInfo, Value};

/// Upper bound on import-forwarding hops when reading without an lvalue chain
const MAX_IMPORT_DEPTH: usize = 64;

/// Where a variable was declared (for error messages)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLocation {
    /// Source file, if known
    pub file: Option<String>,
    /// 1-based line
    pub line: u32,
}

impl SourceLocation {
    /// Location in a named file
    pub fn new(file: impl Into<String>, line: u32) -> Self {
        Self {
            file: Some(file.into()),
            line,
        }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.file {
            Some(file) => write!(f, "{}:{}", file, self.line),
            None => write!(f, "<unknown>:{}", self.line),
        }
    }
}

/// Storage of a variable, guarded by the variable's lock
#[derive(Debug)]
pub(crate) enum VarState {
    /// Value stored in this variable
    Inline { value: Value, type_info: TypeInfo },
    /// Alias of a variable in another registry
    Imported { target: Arc<Var>, readonly: bool },
}

/// A named storage cell.
pub struct Var {
    name: String,
    location: Option<SourceLocation>,
    state: Arc<Mutex<VarState>>,
    public: AtomicBool,
    readonly: AtomicBool,
    local: bool,
}

impl Var {
    fn build(name: String, type_info: TypeInfo, value: Value, location: Option<SourceLocation>, local: bool) -> Arc<Var> {
        Arc::new(Var {
            name,
            location,
            state: Arc::new(Mutex::new(VarState::Inline { value, type_info })),
            public: AtomicBool::new(false),
            readonly: AtomicBool::new(false),
            local,
        })
    }

    /// Create an untyped global variable holding NOTHING
    pub fn new(name: impl Into<String>) -> Arc<Var> {
        Var::build(name.into(), TypeInfo::ANY, Value::Nothing, None, false)
    }

    /// Create an untyped global variable holding `value`
    pub fn with_value(name: impl Into<String>, value: Value) -> Arc<Var> {
        Var::build(name.into(), TypeInfo::ANY, value, None, false)
    }

    /// Create a typed global variable holding NOTHING
    pub fn declare(name: impl Into<String>, type_info: TypeInfo, location: Option<SourceLocation>) -> Arc<Var> {
        Var::build(name.into(), type_info, Value::Nothing, location, false)
    }

    pub(crate) fn new_local(name: String, type_info: TypeInfo, value: Value) -> Arc<Var> {
        Var::build(name, type_info, value, None, true)
    }

    /// Variable name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declaration site, if recorded
    pub fn location(&self) -> Option<&SourceLocation> {
        self.location.as_ref()
    }

    /// True for stack-scoped variables
    pub fn is_local(&self) -> bool {
        self.local
    }

    /// True if the variable may be imported by other registries
    pub fn is_public(&self) -> bool {
        self.public.load(Ordering::Acquire)
    }

    /// Mark the variable as exportable
    pub fn set_public(&self, public: bool) {
        self.public.store(public, Ordering::Release);
    }

    /// True if the variable forwards to another variable
    pub fn is_imported(&self) -> bool {
        matches!(&*self.state.lock(), VarState::Imported { .. })
    }

    /// True if the variable is a read-only import.
    ///
    /// Does not take the variable's lock.
    pub fn is_readonly(&self) -> bool {
        self.readonly.load(Ordering::Acquire)
    }

    /// True while some thread holds this variable's lock
    pub fn is_locked(&self) -> bool {
        self.state.is_locked()
    }

    pub(crate) fn state(&self) -> &Arc<Mutex<VarState>> {
        &self.state
    }

    /// Run `f` on the inline storage this variable resolves to, following
    /// imports. Each variable's lock is held only while it is inspected.
    fn with_storage<R>(&self, for_write: bool, f: impl FnOnce(&mut Value, &mut TypeInfo) -> Result<R>) -> Result<R> {
        let mut next = {
            let mut guard = self.state.lock();
            match &mut *guard {
                VarState::Inline { value, type_info } => return f(value, type_info),
                VarState::Imported { target, readonly } => {
                    if for_write && *readonly {
                        return Err(QoreError::ReadOnlyVariable {
                            name: self.name.clone(),
                        });
                    }
                    Arc::clone(target)
                }
            }
        };
        for _ in 0..MAX_IMPORT_DEPTH {
            let mut guard = next.state.lock();
            let follow = match &mut *guard {
                VarState::Inline { value, type_info } => return f(value, type_info),
                VarState::Imported { target, readonly } => {
                    if for_write && *readonly {
                        return Err(QoreError::ReadOnlyVariable {
                            name: next.name.clone(),
                        });
                    }
                    Arc::clone(target)
                }
            };
            drop(guard);
            next = follow;
        }
        Err(QoreError::CircularReference {
            name: self.name.clone(),
        })
    }

    /// Declared type, following imports
    pub fn type_info(&self) -> TypeInfo {
        self.with_storage(false, |_, ti| Ok(*ti)).unwrap_or_default()
    }

    /// Copy of the current value, following imports
    pub fn get_value(&self) -> Result<Value> {
        self.with_storage(false, |value, _| Ok(value.clone()))
    }

    /// Replace the value. The old value is dropped after the lock is released.
    pub fn set_value(&self, value: Value) -> Result<()> {
        let old = self.with_storage(true, |slot, ti| {
            if !ti.accepts(&value) {
                return Err(QoreError::type_error(ti.name(), &value));
            }
            Ok(std::mem::replace(slot, value))
        })?;
        drop(old);
        Ok(())
    }

    /// Take the value out, leaving NOTHING
    pub fn remove(&self) -> Result<Value> {
        self.with_storage(true, |slot, _| Ok(std::mem::take(slot)))
    }

    /// Fix the declared type.
    ///
    /// An untyped declaration never changes an existing type; a typed one
    /// may only be repeated with the same type. An import only accepts the
    /// type its target already has.
    pub fn declare_type(&self, type_info: TypeInfo) -> Result<()> {
        if type_info.is_any() {
            return Ok(());
        }
        if self.is_imported() {
            let current = self.type_info();
            if current != type_info {
                return Err(QoreError::TypeConflict {
                    name: self.name.clone(),
                    declared: current.name(),
                    attempted: type_info.name(),
                });
            }
            return Ok(());
        }
        self.with_storage(false, |value, ti| {
            if *ti == type_info {
                return Ok(());
            }
            if !ti.is_any() {
                return Err(QoreError::TypeConflict {
                    name: self.name.clone(),
                    declared: ti.name(),
                    attempted: type_info.name(),
                });
            }
            if !value.is_nothing() && !type_info.accepts(value) {
                return Err(QoreError::type_error(type_info.name(), value));
            }
            *ti = type_info;
            Ok(())
        })
    }

    /// Turn this variable into an alias of `target`.
    ///
    /// Fails if `target` already forwards (directly or indirectly) to this
    /// variable, or if this variable was declared with a different type.
    pub fn make_reference(&self, target: &Arc<Var>, readonly: bool) -> Result<()> {
        let me: *const Var = self;
        let mut cursor = Arc::clone(target);
        for _ in 0..MAX_IMPORT_DEPTH {
            if std::ptr::eq(Arc::as_ptr(&cursor), me) {
                return Err(QoreError::CircularReference {
                    name: self.name.clone(),
                });
            }
            let follow = match &*cursor.state.lock() {
                VarState::Imported { target, .. } => Arc::clone(target),
                VarState::Inline { .. } => break,
            };
            cursor = follow;
        }

        let target_type = target.type_info();
        let old = {
            let mut guard = self.state.lock();
            if let VarState::Inline { type_info, .. } = &*guard {
                if !type_info.is_any() && *type_info != target_type {
                    return Err(QoreError::TypeConflict {
                        name: self.name.clone(),
                        declared: type_info.name(),
                        attempted: target_type.name(),
                    });
                }
            }
            self.readonly.store(readonly, Ordering::Release);
            std::mem::replace(
                &mut *guard,
                VarState::Imported {
                    target: Arc::clone(target),
                    readonly,
                },
            )
        };
        tracing::debug!(var = %self.name, target = %target.name, readonly, "variable imported");
        drop(old);
        Ok(())
    }
}

impl fmt::Debug for Var {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Var")
            .field("name", &self.name)
            .field("local", &self.local)
            .field("public", &self.is_public())
            .finish_non_exhaustive()
    }
}
