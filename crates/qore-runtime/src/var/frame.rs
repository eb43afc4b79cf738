//! RAII scope guard for automatic frame cleanup

use super::LocalVarStack;

/// RAII guard that pops a frame when dropped.
///
/// # Example
///
/// ```
/// use qore_runtime::{LocalVarStack, Value};
///
/// let mut locals = LocalVarStack::new();
/// locals.define("x", Value::Int(1));
///
/// {
///     let mut guard = locals.scope_guard();
///     guard.define("y", Value::Int(2));
/// }
/// assert!(!locals.contains("y"));
/// assert!(locals.contains("x"));
/// ```
pub struct ScopeGuard<'a> {
    locals: &'a mut LocalVarStack,
}

impl LocalVarStack {
    /// Push a frame now and pop it when the guard is dropped.
    pub fn scope_guard(&mut self) -> ScopeGuard<'_> {
        self.push_frame();
        ScopeGuard { locals: self }
    }
}

impl<'a> Drop for ScopeGuard<'a> {
    fn drop(&mut self) {
        self.locals.pop_frame();
    }
}

impl<'a> std::ops::Deref for ScopeGuard<'a> {
    type Target = LocalVarStack;

    fn deref(&self) -> &Self::Target {
        self.locals
    }
}

impl<'a> std::ops::DerefMut for ScopeGuard<'a> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.locals
    }
}
