//! Expression evaluation

use std::fmt;

use crate::{EvalContext, Result, Value};

/// Trait for nodes that produce a value when evaluated.
///
/// Unevaluated nodes can be stored in lists and hashes as
/// [`Value::Node`]; evaluating the container evaluates them in order.
pub trait Evaluate: Send + Sync + fmt::Debug {
    /// Evaluate this node in the given context.
    fn eval(&self, ctx: &EvalContext) -> Result<Value>;
}

impl Value {
    /// Evaluate the value.
    ///
    /// Nodes are evaluated, containers holding nodes are evaluated
    /// element-wise into new containers, everything else is returned as a
    /// copy of the handle.
    pub fn eval(&self, ctx: &EvalContext) -> Result<Value> {
        ctx.check_interrupt()?;
        match self {
            Value::Node(node) => node.eval(ctx),
            Value::List(l) if l.needs_eval() => Ok(Value::list(l.eval(ctx)?)),
            Value::Hash(h) if h.needs_eval() => Ok(Value::hash(h.eval(ctx)?)),
            other => Ok(other.clone()),
        }
    }
}

/// A node that always evaluates to the same value
#[derive(Debug, Clone)]
pub struct Constant(pub Value);

impl Evaluate for Constant {
    fn eval(&self, _ctx: &EvalContext) -> Result<Value> {
        Ok(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::error::QoreError;
    use crate::value::ValueList;

    #[derive(Debug)]
    struct Failing;

    impl Evaluate for Failing {
        fn eval(&self, _ctx: &EvalContext) -> Result<Value> {
            Err(QoreError::ValueError("boom".into()))
        }
    }

    #[derive(Debug, Default)]
    struct Counting(AtomicUsize);

    impl Evaluate for Counting {
        fn eval(&self, _ctx: &EvalContext) -> Result<Value> {
            Ok(Value::Int(self.0.fetch_add(1, Ordering::SeqCst) as i64))
        }
    }

    #[test]
    fn test_list_eval_resolves_nodes() {
        let list = ValueList::from_values(vec![
            Value::Int(1),
            Value::Node(Arc::new(Constant(Value::string("x")))),
        ]);
        let v = Value::list(list);
        assert!(v.needs_eval());
        let out = v.eval(&EvalContext::new()).unwrap();
        assert_eq!(out, Value::from(vec![Value::Int(1), Value::string("x")]));
        assert!(!out.needs_eval());
    }

    #[test]
    fn test_list_eval_stops_at_first_failure() {
        let counter = Arc::new(Counting::default());
        let list = ValueList::from_values(vec![
            Value::Node(counter.clone()),
            Value::Node(Arc::new(Failing)),
            Value::Node(counter.clone()),
        ]);
        let err = Value::list(list).eval(&EvalContext::new()).unwrap_err();
        assert!(matches!(err, QoreError::ValueError(_)));
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_eval_honours_interrupt() {
        let ctx = EvalContext::new();
        ctx.interrupt();
        assert!(matches!(Value::Int(1).eval(&ctx), Err(QoreError::Interrupted)));
    }
}
