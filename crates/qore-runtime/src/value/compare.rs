//! Soft and hard comparison of values
//!
//! Soft comparison converts between scalar types the way script operators
//! do (`"1" == 1`); hard comparison requires identical types.

use std::cmp::Ordering;
use std::sync::Arc;

use super::*;
use crate::context::EvalContext;
use crate::error::Result;
use crate::eval::Evaluate;

fn node_ptr(n: &Arc<dyn Evaluate>) -> *const () {
    Arc::as_ptr(n) as *const ()
}

impl Value {
    /// Equality with scalar conversion
    pub fn is_equal_soft(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Nothing | Value::Null, Value::Nothing | Value::Null) => true,
            (Value::Nothing | Value::Null, _) | (_, Value::Nothing | Value::Null) => false,

            (Value::String(a), Value::String(b)) => a == b,
            (Value::Binary(a), Value::Binary(b)) => a == b,
            (Value::Binary(a), Value::String(b)) | (Value::String(b), Value::Binary(a)) => {
                a.as_slice() == b.as_bytes()
            }

            (Value::List(a), Value::List(b)) => {
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.is_equal_soft(y))
            }
            (Value::Hash(a), Value::Hash(b)) => {
                a.len() == b.len()
                    && a.iter().all(|(k, v)| b.get(k).is_some_and(|w| v.is_equal_soft(w)))
            }
            (Value::Object(a), Value::Object(b)) => Arc::ptr_eq(a, b),
            (Value::Reference(a), Value::Reference(b)) => Arc::ptr_eq(a, b),
            (Value::Node(a), Value::Node(b)) => node_ptr(a) == node_ptr(b),
            (
                Value::List(_) | Value::Hash(_) | Value::Object(_) | Value::Reference(_) | Value::Node(_),
                _,
            )
            | (
                _,
                Value::List(_) | Value::Hash(_) | Value::Object(_) | Value::Reference(_) | Value::Node(_),
            ) => false,

            (Value::Date(_), _) | (_, Value::Date(_)) => {
                self.get_as_date().epoch_micros() == other.get_as_date().epoch_micros()
            }
            (Value::Float(_), _) | (_, Value::Float(_)) => self.get_as_float() == other.get_as_float(),
            _ => self.get_as_int() == other.get_as_int(),
        }
    }

    /// Equality requiring identical types
    pub fn is_equal_hard(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Nothing, Value::Nothing) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Date(a), Value::Date(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Binary(a), Value::Binary(b)) => a == b,
            (Value::List(a), Value::List(b)) => {
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.is_equal_hard(y))
            }
            (Value::Hash(a), Value::Hash(b)) => {
                a.len() == b.len()
                    && a.iter().all(|(k, v)| b.get(k).is_some_and(|w| v.is_equal_hard(w)))
            }
            (Value::Object(a), Value::Object(b)) => Arc::ptr_eq(a, b),
            (Value::Reference(a), Value::Reference(b)) => Arc::ptr_eq(a, b),
            (Value::Node(a), Value::Node(b)) => node_ptr(a) == node_ptr(b),
            _ => false,
        }
    }

    /// Natural ordering used by the default sorts.
    ///
    /// This is a total order. NOTHING and NULL sort first, then numbers
    /// (bools, ints, floats and strings that parse as a number), then dates,
    /// then other strings, binaries, lists, hashes and objects. Values of the
    /// remaining types are ordered by type tag. NaN sorts above every other
    /// number, or below when its sign bit is set.
    pub fn compare_soft(&self, other: &Value) -> Ordering {
        SortKey::of(self).compare(&SortKey::of(other))
    }

    /// Soft equality after evaluating both sides
    pub fn is_equal_soft_eval(&self, other: &Value, ctx: &EvalContext) -> Result<bool> {
        let a = self.eval(ctx)?;
        let b = other.eval(ctx)?;
        Ok(a.is_equal_soft(&b))
    }

}

#[derive(Debug, Clone, Copy)]
enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    /// Numeric value of a string holding nothing but a number
    fn parse(s: &str) -> Option<Number> {
        let t = s.trim();
        if let Ok(n) = t.parse::<i64>() {
            return Some(Number::Int(n));
        }
        match t.parse::<f64>() {
            Ok(f) if f.is_finite() => Some(Number::Float(f)),
            _ => None,
        }
    }

    fn compare(self, other: Number) -> Ordering {
        match (self, other) {
            (Number::Int(a), Number::Int(b)) => a.cmp(&b),
            (Number::Float(a), Number::Float(b)) => cmp_floats(a, b),
            (Number::Int(a), Number::Float(b)) => cmp_int_float(a, b),
            (Number::Float(a), Number::Int(b)) => cmp_int_float(b, a).reverse(),
        }
    }
}

/// Zeros of either sign are equal; NaNs sit at the ends, ordered by bits
fn cmp_floats(a: f64, b: f64) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (false, false) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
        (true, true) => a.total_cmp(&b),
        (true, false) if a.is_sign_negative() => Ordering::Less,
        (true, false) => Ordering::Greater,
        (false, true) if b.is_sign_negative() => Ordering::Greater,
        (false, true) => Ordering::Less,
    }
}

/// Exact comparison without rounding the integer through `f64`
fn cmp_int_float(i: i64, f: f64) -> Ordering {
    // 2^63
    const LIMIT: f64 = 9_223_372_036_854_775_808.0;
    if f.is_nan() {
        return if f.is_sign_negative() {
            Ordering::Greater
        } else {
            Ordering::Less
        };
    }
    if f >= LIMIT {
        return Ordering::Less;
    }
    if f < -LIMIT {
        return Ordering::Greater;
    }
    let whole = f.trunc();
    match i.cmp(&(whole as i64)) {
        Ordering::Equal => 0.0f64.partial_cmp(&(f - whole)).unwrap_or(Ordering::Equal),
        ord => ord,
    }
}

/// Position of a value in the natural order; classes never interleave
enum SortKey<'a> {
    Empty,
    Number(Number),
    Date(i64),
    Text(&'a str),
    Bytes(&'a [u8]),
    List(&'a ValueList),
    Hash(usize),
    Object(u64),
    Other(ValueType),
}

impl<'a> SortKey<'a> {
    fn of(v: &'a Value) -> Self {
        match v {
            Value::Nothing | Value::Null => SortKey::Empty,
            Value::Bool(b) => SortKey::Number(Number::Int(i64::from(*b))),
            Value::Int(n) => SortKey::Number(Number::Int(*n)),
            Value::Float(f) => SortKey::Number(Number::Float(*f)),
            Value::Date(d) => SortKey::Date(d.epoch_micros()),
            Value::String(s) => match Number::parse(s) {
                Some(n) => SortKey::Number(n),
                None => SortKey::Text(s.as_str()),
            },
            Value::Binary(b) => SortKey::Bytes(b.as_slice()),
            Value::List(l) => SortKey::List(&**l),
            Value::Hash(h) => SortKey::Hash(h.len()),
            Value::Object(o) => SortKey::Object(o.id()),
            other => SortKey::Other(other.value_type()),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            SortKey::Empty => 0,
            SortKey::Number(_) => 1,
            SortKey::Date(_) => 2,
            SortKey::Text(_) => 3,
            SortKey::Bytes(_) => 4,
            SortKey::List(_) => 5,
            SortKey::Hash(_) => 6,
            SortKey::Object(_) => 7,
            SortKey::Other(_) => 8,
        }
    }

    fn compare(&self, other: &SortKey<'_>) -> Ordering {
        match (self, other) {
            (SortKey::Number(a), SortKey::Number(b)) => a.compare(*b),
            (SortKey::Date(a), SortKey::Date(b)) => a.cmp(b),
            (SortKey::Text(a), SortKey::Text(b)) => a.cmp(b),
            (SortKey::Bytes(a), SortKey::Bytes(b)) => a.cmp(b),
            (SortKey::List(a), SortKey::List(b)) => {
                for (x, y) in a.iter().zip(b.iter()) {
                    match x.compare_soft(y) {
                        Ordering::Equal => {}
                        ord => return ord,
                    }
                }
                a.len().cmp(&b.len())
            }
            (SortKey::Hash(a), SortKey::Hash(b)) => a.cmp(b),
            (SortKey::Object(a), SortKey::Object(b)) => a.cmp(b),
            (SortKey::Other(a), SortKey::Other(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_soft_equality_converts_scalars() {
        assert!(Value::string("1").is_equal_soft(&Value::Int(1)));
        assert!(Value::Int(1).is_equal_soft(&Value::Float(1.0)));
        assert!(Value::Bool(true).is_equal_soft(&Value::Int(1)));
        assert!(!Value::Nothing.is_equal_soft(&Value::Int(0)));
        assert!(Value::Nothing.is_equal_soft(&Value::Null));
    }

    #[test]
    fn test_hard_equality_requires_type() {
        assert!(!Value::string("1").is_equal_hard(&Value::Int(1)));
        assert!(!Value::Nothing.is_equal_hard(&Value::Null));
        assert_eq!(Value::from(vec![1i64, 2]), Value::from(vec![1i64, 2]));
    }

    #[test]
    fn test_objects_compare_by_identity() {
        let a = Value::object(ObjectValue::new("T"));
        let b = Value::object(ObjectValue::new("T"));
        assert!(a.is_equal_soft(&a.clone()));
        assert!(!a.is_equal_soft(&b));
    }

    #[test]
    fn test_compare_soft_ordering() {
        assert_eq!(Value::Nothing.compare_soft(&Value::Int(-5)), Ordering::Less);
        assert_eq!(Value::string("10").compare_soft(&Value::Int(9)), Ordering::Greater);
        assert_eq!(Value::string("a").compare_soft(&Value::string("b")), Ordering::Less);
        assert_eq!(Value::Float(1.5).compare_soft(&Value::Int(1)), Ordering::Greater);
    }

    #[test]
    fn test_compare_soft_is_consistent_across_types() {
        // numeric strings compare as numbers, so "10" sorts after "9"
        assert_eq!(Value::string("10").compare_soft(&Value::string("9")), Ordering::Greater);
        assert_eq!(Value::string("1").compare_soft(&Value::Int(1)), Ordering::Equal);
        assert_eq!(Value::string("abc").compare_soft(&Value::Int(i64::MAX)), Ordering::Greater);
        assert_eq!(Value::Bool(true).compare_soft(&Value::Float(1.0)), Ordering::Equal);
        assert_eq!(Value::Float(-0.0).compare_soft(&Value::Int(0)), Ordering::Equal);
    }

    #[test]
    fn test_compare_soft_nan_and_large_ints() {
        let nan = Value::Float(f64::NAN);
        assert_eq!(nan.compare_soft(&Value::Int(i64::MAX)), Ordering::Greater);
        assert_eq!(nan.compare_soft(&Value::Float(f64::INFINITY)), Ordering::Greater);
        assert_eq!(Value::Float(-f64::NAN).compare_soft(&Value::Int(i64::MIN)), Ordering::Less);
        assert_eq!(nan.compare_soft(&nan.clone()), Ordering::Equal);

        // 2^53 and 2^53 + 1 are distinct even though they round to the same float
        let big = 1i64 << 53;
        let as_float = Value::Float(big as f64);
        assert_eq!(Value::Int(big).compare_soft(&as_float), Ordering::Equal);
        assert_eq!(Value::Int(big + 1).compare_soft(&as_float), Ordering::Greater);
        assert_eq!(Value::Float(1e19).compare_soft(&Value::Int(i64::MAX)), Ordering::Greater);
        assert_eq!(Value::Float(2.5).compare_soft(&Value::Int(2)), Ordering::Greater);
        assert_eq!(Value::Float(-2.5).compare_soft(&Value::Int(-2)), Ordering::Less);
    }
}
