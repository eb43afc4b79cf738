//! Stack of local variables with frame boundaries

use std::sync::Arc;

use super::Var;
use crate::error::{QoreError, Result};
use crate::lvalue::LValueExpr;
use crate::value::{TypeInfo, Value};

/// Local variables of one thread of execution.
///
/// Uses a flat stack with frame boundaries, so entering and leaving a
/// scope is a push and a truncate. Variables are `Arc`-shared so a
/// reference taken to a local stays valid for as long as someone holds it.
///
/// # Example
///
/// ```
/// use qore_runtime::{LocalVarStack, Value};
///
/// let mut locals = LocalVarStack::new();
/// locals.define("x", Value::Int(1));
///
/// locals.push_frame();
/// locals.define("x", Value::Int(10)); // Shadows outer x
/// assert_eq!(locals.get_value("x").unwrap(), Value::Int(10));
/// locals.pop_frame();
///
/// assert_eq!(locals.get_value("x").unwrap(), Value::Int(1));
/// ```
#[derive(Debug, Clone)]
pub struct LocalVarStack {
    /// All variables, most recent at the end
    vars: Vec<Arc<Var>>,

    /// Indices into `vars` where each scope begins
    frames: Vec<usize>,
}

impl Default for LocalVarStack {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalVarStack {
    /// Create an empty stack with one (outermost) frame
    pub fn new() -> Self {
        Self {
            vars: Vec::new(),
            frames: vec![0],
        }
    }

    // ═══════════════════════════════════════════════════════════════════
    // Frame Management (Scope Entry/Exit)
    // ═══════════════════════════════════════════════════════════════════

    /// Enter a new scope
    pub fn push_frame(&mut self) {
        self.frames.push(self.vars.len());
    }

    /// Leave the current scope, dropping its variables.
    /// The outermost frame is never popped.
    pub fn pop_frame(&mut self) {
        if self.frames.len() > 1 {
            if let Some(boundary) = self.frames.pop() {
                self.vars.truncate(boundary);
            }
        }
    }

    /// Number of frames
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// True in the outermost frame
    pub fn is_outermost(&self) -> bool {
        self.frames.len() == 1
    }

    // ═══════════════════════════════════════════════════════════════════
    // Definition and Lookup
    // ═══════════════════════════════════════════════════════════════════

    /// Define an untyped variable in the current scope (shadowing is allowed)
    pub fn define(&mut self, name: impl Into<String>, value: Value) -> Arc<Var> {
        let var = Var::new_local(name.into(), TypeInfo::ANY, value);
        self.vars.push(Arc::clone(&var));
        var
    }

    /// Define a typed variable in the current scope
    pub fn define_typed(&mut self, name: impl Into<String>, type_info: TypeInfo, value: Value) -> Result<Arc<Var>> {
        if !type_info.accepts(&value) {
            return Err(QoreError::type_error(type_info.name(), &value));
        }
        let var = Var::new_local(name.into(), type_info, value);
        self.vars.push(Arc::clone(&var));
        Ok(var)
    }

    /// Innermost variable named `name`
    pub fn get(&self, name: &str) -> Option<Arc<Var>> {
        self.vars.iter().rev().find(|v| v.name() == name).cloned()
    }

    /// Innermost variable named `name`, failing if there is none
    pub fn lookup(&self, name: &str) -> Result<Arc<Var>> {
        self.get(name).ok_or_else(|| QoreError::UndefinedVariable {
            name: name.to_string(),
        })
    }

    /// Copy of a variable's value
    pub fn get_value(&self, name: &str) -> Result<Value> {
        self.lookup(name)?.get_value()
    }

    /// Assign to an existing variable
    pub fn assign(&self, name: &str, value: Value) -> Result<()> {
        self.lookup(name)?.set_value(value)
    }

    /// Reference to a local, for pass-by-reference arguments
    pub fn reference(&self, name: &str) -> Result<Value> {
        let var = self.lookup(name)?;
        Ok(LValueExpr::var(&var).reference())
    }

    /// True if any scope defines `name`
    pub fn contains(&self, name: &str) -> bool {
        self.vars.iter().any(|v| v.name() == name)
    }

    /// True if the current scope defines `name`
    pub fn contains_in_current_scope(&self, name: &str) -> bool {
        let start = self.frames.last().copied().unwrap_or(0);
        self.vars[start..].iter().any(|v| v.name() == name)
    }

    /// Names defined in the current scope, in definition order
    pub fn names_in_current_scope(&self) -> Vec<&str> {
        let start = self.frames.last().copied().unwrap_or(0);
        self.vars[start..].iter().map(|v| v.name()).collect()
    }

    /// Total number of variables across all scopes
    pub fn len(&self) -> usize {
        self.vars.len()
    }

    /// True if no variable is defined
    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// Drop every variable and frame
    pub fn clear(&mut self) {
        self.vars.clear();
        self.frames.truncate(1);
    }
}
