//! Value trait implementations: constructors, predicates, extractors, coercions, From traits, PartialEq

use std::sync::Arc;

use super::*;

// ═══════════════════════════════════════════════════════════════════
// Convenience Constructors
// ═══════════════════════════════════════════════════════════════════

impl Value {
    /// Create a string value
    pub fn string(s: impl Into<String>) -> Self {
        Value::String(Arc::new(s.into()))
    }

    /// Create a binary value
    pub fn binary(b: impl Into<Vec<u8>>) -> Self {
        Value::Binary(Arc::new(b.into()))
    }

    /// Create a list value
    pub fn list(l: ValueList) -> Self {
        Value::List(Arc::new(l))
    }

    /// Create a hash value
    pub fn hash(h: ValueHash) -> Self {
        Value::Hash(Arc::new(h))
    }

    /// Create an object value
    pub fn object(o: ObjectValue) -> Self {
        Value::Object(Arc::new(o))
    }

    /// Create a date value
    pub fn date(d: DateValue) -> Self {
        Value::Date(d)
    }

    // ═══════════════════════════════════════════════════════════════════
    // Type Predicates
    // ═══════════════════════════════════════════════════════════════════
    /// Check if value is NOTHING
    pub fn is_nothing(&self) -> bool {
        matches!(self, Value::Nothing)
    }

    /// Check if value is NOTHING or NULL
    pub fn is_null_or_nothing(&self) -> bool {
        matches!(self, Value::Nothing | Value::Null)
    }

    /// Check if value is int or float
    pub fn is_numeric(&self) -> bool {
        matches!(self, Value::Int(_) | Value::Float(_))
    }

    /// Check if value is a string
    pub fn is_string(&self) -> bool {
        matches!(self, Value::String(_))
    }

    /// Check if value is a list
    pub fn is_list(&self) -> bool {
        matches!(self, Value::List(_))
    }

    /// Check if value is a hash
    pub fn is_hash(&self) -> bool {
        matches!(self, Value::Hash(_))
    }

    /// Check if value is a reference
    pub fn is_reference(&self) -> bool {
        matches!(self, Value::Reference(_))
    }

    // ═══════════════════════════════════════════════════════════════════
    // Extractors (return Option for safe access)
    // ═══════════════════════════════════════════════════════════════════
    /// Extract boolean value
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Extract integer value
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Extract float value
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(n) => Some(*n),
            _ => None,
        }
    }

    /// Extract string slice
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Extract list
    pub fn as_list(&self) -> Option<&ValueList> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    /// Extract hash
    pub fn as_hash(&self) -> Option<&ValueHash> {
        match self {
            Value::Hash(h) => Some(h),
            _ => None,
        }
    }

    /// Extract object
    pub fn as_object(&self) -> Option<&Arc<ObjectValue>> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    /// Extract date
    pub fn as_date(&self) -> Option<&DateValue> {
        match self {
            Value::Date(d) => Some(d),
            _ => None,
        }
    }

    // ═══════════════════════════════════════════════════════════════════
    // Soft Coercions
    // ═══════════════════════════════════════════════════════════════════

    /// Truth value used by conditionals
    pub fn get_as_bool(&self) -> bool {
        match self {
            Value::Nothing | Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(n) => *n != 0,
            Value::Float(n) => *n != 0.0,
            Value::String(s) => parse_leading_float(s) != 0.0,
            Value::Binary(b) => !b.is_empty(),
            Value::Date(d) => d.epoch_micros() != 0,
            Value::List(l) => !l.is_empty(),
            Value::Hash(h) => !h.is_empty(),
            Value::Object(_) | Value::Reference(_) | Value::Node(_) => true,
        }
    }

    /// Integer conversion; strings are parsed from their leading digits
    pub fn get_as_int(&self) -> i64 {
        match self {
            Value::Bool(b) => i64::from(*b),
            Value::Int(n) => *n,
            Value::Float(n) => *n as i64,
            Value::String(s) => parse_leading_int(s),
            Value::Date(d) => d.epoch_seconds(),
            _ => 0,
        }
    }

    /// Float conversion; strings are parsed from their leading number
    pub fn get_as_float(&self) -> f64 {
        match self {
            Value::Bool(b) => f64::from(u8::from(*b)),
            Value::Int(n) => *n as f64,
            Value::Float(n) => *n,
            Value::String(s) => parse_leading_float(s),
            Value::Date(d) => d.epoch_micros() as f64 / 1_000_000.0,
            _ => 0.0,
        }
    }

    /// String conversion
    pub fn get_as_string(&self) -> String {
        match self {
            Value::Nothing | Value::Null => String::new(),
            Value::Bool(b) => (if *b { "1" } else { "0" }).to_string(),
            Value::Int(n) => n.to_string(),
            Value::Float(n) => n.to_string(),
            Value::String(s) => String::clone(s),
            Value::Binary(b) => String::from_utf8_lossy(b).into_owned(),
            Value::Date(d) => d.to_string(),
            other => format!("{:?}", other),
        }
    }

    /// Date conversion; numbers are taken as seconds since the epoch
    pub fn get_as_date(&self) -> DateValue {
        match self {
            Value::Date(d) => *d,
            Value::Float(n) => DateValue::from_epoch_micros((*n * 1_000_000.0) as i64),
            other => DateValue::from_epoch_seconds(other.get_as_int()),
        }
    }
}

/// Parse an optional sign and the leading run of digits; anything else yields 0
pub(crate) fn parse_leading_int(s: &str) -> i64 {
    let t = s.trim_start();
    let (negative, digits) = match t.as_bytes().first() {
        Some(b'-') => (true, &t[1..]),
        Some(b'+') => (false, &t[1..]),
        _ => (false, t),
    };
    let mut n: i64 = 0;
    for b in digits.bytes().take_while(u8::is_ascii_digit) {
        n = n.saturating_mul(10).saturating_add(i64::from(b - b'0'));
    }
    if negative {
        -n
    } else {
        n
    }
}

/// Parse the longest numeric prefix as a float; anything else yields 0
pub(crate) fn parse_leading_float(s: &str) -> f64 {
    let t = s.trim_start();
    let bytes = t.as_bytes();
    let mut end = 0;
    if matches!(bytes.first(), Some(b'-' | b'+')) {
        end = 1;
    }
    let mut seen_dot = false;
    let mut seen_exp = false;
    let mut best = 0;
    while end < bytes.len() {
        match bytes[end] {
            b'0'..=b'9' => best = end + 1,
            b'.' if !seen_dot && !seen_exp => seen_dot = true,
            b'e' | b'E' if !seen_exp && best > 0 => {
                seen_exp = true;
                if matches!(bytes.get(end + 1), Some(b'-' | b'+')) {
                    end += 1;
                }
            }
            _ => break,
        }
        end += 1;
    }
    t[..best].parse().unwrap_or(0.0)
}

// ═══════════════════════════════════════════════════════════════════
// PartialEq Implementation
// ═══════════════════════════════════════════════════════════════════

impl PartialEq for Value {
    /// Hard equality: same type and same contents
    fn eq(&self, other: &Self) -> bool {
        self.is_equal_hard(other)
    }
}

// ═══════════════════════════════════════════════════════════════════
// From Trait Implementations
// ═══════════════════════════════════════════════════════════════════

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Value::Nothing
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Int(i64::from(n))
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Float(n)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::string(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::string(s)
    }
}

impl From<DateValue> for Value {
    fn from(d: DateValue) -> Self {
        Value::Date(d)
    }
}

impl From<ValueList> for Value {
    fn from(l: ValueList) -> Self {
        Value::list(l)
    }
}

impl From<ValueHash> for Value {
    fn from(h: ValueHash) -> Self {
        Value::hash(h)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::list(v.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(opt: Option<T>) -> Self {
        opt.map_or(Value::Nothing, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_predicates() {
        assert!(Value::Nothing.is_nothing());
        assert!(Value::Null.is_null_or_nothing());
        assert!(!Value::Null.is_nothing());
        assert!(Value::Float(1.5).is_numeric());
        assert!(Value::string("x").is_string());
    }

    #[test]
    fn test_extractors() {
        assert_eq!(Value::Int(42).as_int(), Some(42));
        assert_eq!(Value::string("hi").as_int(), None);
        assert_eq!(Value::string("hi").as_str(), Some("hi"));
        assert!(Value::from(vec![1i64, 2]).as_list().is_some());
    }

    #[test]
    fn test_string_coercion() {
        assert_eq!(Value::string("  42abc").get_as_int(), 42);
        assert_eq!(Value::string("-7").get_as_int(), -7);
        assert_eq!(Value::string("abc").get_as_int(), 0);
        assert_eq!(Value::string("2.5e1x").get_as_float(), 25.0);
        assert_eq!(Value::string("1e").get_as_float(), 1.0);
        assert!(!Value::string("0").get_as_bool());
        assert!(Value::string("0.1").get_as_bool());
    }

    #[test]
    fn test_scalar_coercion() {
        assert_eq!(Value::Bool(true).get_as_int(), 1);
        assert_eq!(Value::Float(3.9).get_as_int(), 3);
        assert_eq!(Value::Int(3).get_as_string(), "3");
        assert_eq!(Value::Nothing.get_as_string(), "");
        assert!(!Value::Null.get_as_bool());
    }

    #[test]
    fn test_from_option() {
        assert_eq!(Value::from(None::<i64>), Value::Nothing);
        assert_eq!(Value::from(Some(3i64)), Value::Int(3));
    }

    #[test]
    fn test_from_vec() {
        let v: Value = vec!["a", "b"].into();
        assert_eq!(v.as_list().map(ValueList::len), Some(2));
    }
}
