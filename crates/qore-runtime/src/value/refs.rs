//! Reference values

use crate::lvalue::LValueExpr;

/// A reference to an lvalue.
///
/// Storing a reference in a variable makes every write through that
/// variable land on the referenced lvalue instead.
#[derive(Debug, Clone)]
pub struct ReferenceValue {
    target: LValueExpr,
}

impl ReferenceValue {
    /// Create a reference to `target`
    pub fn new(target: LValueExpr) -> Self {
        Self { target }
    }

    /// Referenced lvalue
    pub fn target(&self) -> &LValueExpr {
        &self.target
    }
}
