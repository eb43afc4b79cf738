//! Registry of global variables for one program

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::{SourceLocation, Var};
use crate::error::{ExceptionSink, QoreError, Result};
use crate::value::TypeInfo;

/// Global variables of one program, shared by all of its threads.
#[derive(Debug, Default)]
pub struct GlobalVariables {
    vars: DashMap<String, Arc<Var>>,
}

impl GlobalVariables {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a variable, or re-declare an existing one.
    ///
    /// The first typed declaration fixes the variable's type; a later
    /// declaration with a different type fails with
    /// [`QoreError::TypeConflict`].
    pub fn declare(&self, name: &str, type_info: TypeInfo, location: Option<SourceLocation>) -> Result<Arc<Var>> {
        match self.vars.entry(name.to_string()) {
            Entry::Occupied(e) => {
                e.get().declare_type(type_info)?;
                Ok(Arc::clone(e.get()))
            }
            Entry::Vacant(e) => {
                let var = Var::declare(name, type_info, location);
                e.insert(Arc::clone(&var));
                tracing::trace!(var = name, ty = %type_info, "global declared");
                Ok(var)
            }
        }
    }

    /// Look up a variable
    pub fn get(&self, name: &str) -> Option<Arc<Var>> {
        self.vars.get(name).map(|r| Arc::clone(r.value()))
    }

    /// Look up a variable, failing if it was never declared
    pub fn lookup(&self, name: &str) -> Result<Arc<Var>> {
        self.get(name).ok_or_else(|| QoreError::UndefinedVariable {
            name: name.to_string(),
        })
    }

    /// Allow other registries to import `name`
    pub fn export(&self, name: &str) -> Result<()> {
        self.lookup(name)?.set_public(true);
        Ok(())
    }

    /// Import an exported variable from another program's registry.
    ///
    /// The local variable becomes an alias: reads and writes go to the
    /// source. A read-only import rejects writes with an access error.
    pub fn import_from(&self, source: &GlobalVariables, name: &str, readonly: bool) -> Result<Arc<Var>> {
        let target = source.lookup(name)?;
        if !target.is_public() {
            return Err(QoreError::NotPublic {
                name: name.to_string(),
            });
        }
        let local = self.declare(name, TypeInfo::ANY, None)?;
        local.make_reference(&target, readonly)?;
        Ok(local)
    }

    /// Variable names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.vars.iter().map(|r| r.key().clone()).collect();
        names.sort();
        names
    }

    /// Number of variables
    pub fn len(&self) -> usize {
        self.vars.len()
    }

    /// True if no variable was declared
    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// Release every value and forget all variables.
    ///
    /// Values are released outside the registry lock; failures are
    /// recorded in `sink` and do not stop the sweep.
    pub fn clear(&self, sink: &mut ExceptionSink) {
        let vars: Vec<Arc<Var>> = self.vars.iter().map(|r| Arc::clone(r.value())).collect();
        self.vars.clear();
        let mut released = Vec::with_capacity(vars.len());
        for var in &vars {
            if var.is_imported() {
                continue;
            }
            if let Some(value) = sink.check(var.remove()) {
                released.push(value);
            }
        }
        tracing::debug!(count = vars.len(), "global variables cleared");
        drop(released);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    #[test]
    fn test_declare_is_idempotent() {
        let globals = GlobalVariables::new();
        let a = globals.declare("x", TypeInfo::INT, None).unwrap();
        let b = globals.declare("x", TypeInfo::ANY, None).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(globals.len(), 1);
    }

    #[test]
    fn test_redeclare_with_other_type_fails() {
        let globals = GlobalVariables::new();
        globals.declare("x", TypeInfo::INT, None).unwrap();
        let err = globals.declare("x", TypeInfo::STRING, None).unwrap_err();
        assert_eq!(err.code(), "PARSE-TYPE-ERROR");
    }

    #[test]
    fn test_import_requires_export() {
        let lib = GlobalVariables::new();
        lib.declare("config", TypeInfo::ANY, None).unwrap();
        let app = GlobalVariables::new();
        assert!(matches!(
            app.import_from(&lib, "config", false),
            Err(QoreError::NotPublic { .. })
        ));
        lib.export("config").unwrap();
        let alias = app.import_from(&lib, "config", false).unwrap();
        alias.set_value(Value::Int(9)).unwrap();
        assert_eq!(lib.lookup("config").unwrap().get_value().unwrap(), Value::Int(9));
    }

    #[test]
    fn test_lookup_undefined() {
        let globals = GlobalVariables::new();
        assert!(matches!(globals.lookup("nope"), Err(QoreError::UndefinedVariable { .. })));
    }

    #[test]
    fn test_clear_releases_values() {
        let globals = GlobalVariables::new();
        let shared = Value::string("payload");
        globals.declare("a", TypeInfo::ANY, None).unwrap().set_value(shared.clone()).unwrap();
        assert_eq!(shared.ref_count(), 2);
        let mut sink = ExceptionSink::new();
        globals.clear(&mut sink);
        assert!(globals.is_empty());
        assert!(sink.is_empty());
        assert!(shared.is_unique());
    }
}
