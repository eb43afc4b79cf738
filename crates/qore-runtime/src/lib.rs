//! # qore-runtime
//!
//! Core runtime of an embeddable scripting language.
//!
//! The crate provides the pieces a script interpreter shares between its
//! threads: reference-counted values, global and local variables, lvalue
//! resolution under nested locks, and database access through managed and
//! pooled datasources.
//!
//! ## Architecture
//!
//! - **Values**: [`Value`] with copy-on-write containers ([`ValueList`], [`ValueHash`])
//! - **Variables**: [`Var`] slots in [`GlobalVariables`] and [`LocalVarStack`]
//! - **LValues**: [`LValueHelper`] resolves [`LValueExpr`] chains while holding a [`VLock`]
//! - **SQL**: [`sql::ManagedDatasource`], [`sql::DatasourcePool`] and [`sql::SqlStatement`]
//! - **Thread resources**: cleanup of locks and connections when a thread ends
//!
//! Parsing, drivers and the script-level builtins live outside this crate.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod context;
pub mod error;
pub mod eval;
pub mod lvalue;
pub mod sql;
pub mod thread_resources;
pub mod value;
pub mod var;

// Re-export main types
pub use context::EvalContext;
pub use error::{ErrorCategory, ExceptionSink, QoreError, Result};
pub use eval::{Constant, Evaluate};
pub use lvalue::{LValueExpr, LValueHelper, VLock};
pub use thread_resources::{ThreadResource, ThreadResourceList};
pub use value::{
    BaseType, DateValue, ObjectValue, ReferenceValue, RelativeDate, TypeInfo, Value, ValueHash,
    ValueList, ValueType,
};
pub use var::{GlobalVariables, LocalVarStack, ScopeGuard, SourceLocation, Var};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_exists() {
        assert!(!VERSION.is_empty());
    }
}
