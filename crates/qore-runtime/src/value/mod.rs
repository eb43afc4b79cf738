//! Value representation for runtime values

mod compare;
mod date;
mod display;
mod hash;
mod impls;
mod list;
mod object;
mod refs;
mod sort;
mod types;

pub use date::{DateValue, RelativeDate};
pub use hash::ValueHash;
pub use list::ValueList;
pub use object::ObjectValue;
pub use refs::ReferenceValue;
pub use types::{BaseType, TypeInfo};

use std::sync::Arc;

use crate::eval::Evaluate;

/// Runtime value representation.
///
/// Values are organized into three tiers:
/// - Tier 1: Inline scalars (no allocation)
/// - Tier 2: Reference-counted heap values (`Arc`-wrapped, copy-on-write)
/// - Tier 3: Shared handles (objects, references, unevaluated nodes)
///
/// The `Arc` strong count is the value's reference count: cloning a
/// `Value` is `ref()`, dropping it is `deref()`, and the payload is torn
/// down exactly once when the last handle goes away. Containers are
/// mutated in place only while uniquely owned (see [`Value::list_mut`]).
#[derive(Clone, Default)]
pub enum Value {
    // ═══════════════════════════════════════════════════════════════════
    // Tier 1: Inline Scalars
    // ═══════════════════════════════════════════════════════════════════
    /// No value
    #[default]
    Nothing,

    /// SQL-style NULL
    Null,

    /// Boolean
    Bool(bool),

    /// 64-bit signed integer
    Int(i64),

    /// 64-bit floating point
    Float(f64),

    /// Absolute or relative date
    Date(DateValue),

    // ═══════════════════════════════════════════════════════════════════
    // Tier 2: Reference-Counted Heap Values
    // ═══════════════════════════════════════════════════════════════════
    /// String
    String(Arc<String>),

    /// Binary blob
    Binary(Arc<Vec<u8>>),

    /// Growable list
    List(Arc<ValueList>),

    /// Insertion-ordered hash
    Hash(Arc<ValueHash>),

    // ═══════════════════════════════════════════════════════════════════
    // Tier 3: Shared Handles
    // ═══════════════════════════════════════════════════════════════════
    /// Object instance (shared, never copied)
    Object(Arc<ObjectValue>),

    /// Reference to an lvalue
    Reference(Arc<ReferenceValue>),

    /// Expression that still has to be evaluated
    Node(Arc<dyn Evaluate>),
}

/// Type tag of a [`Value`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ValueType {
    /// [`Value::Nothing`]
    Nothing,
    /// [`Value::Null`]
    Null,
    /// [`Value::Bool`]
    Bool,
    /// [`Value::Int`]
    Int,
    /// [`Value::Float`]
    Float,
    /// [`Value::Date`]
    Date,
    /// [`Value::String`]
    String,
    /// [`Value::Binary`]
    Binary,
    /// [`Value::List`]
    List,
    /// [`Value::Hash`]
    Hash,
    /// [`Value::Object`]
    Object,
    /// [`Value::Reference`]
    Reference,
    /// [`Value::Node`]
    Node,
}

impl ValueType {
    /// Script-visible type name
    pub fn name(self) -> &'static str {
        match self {
            ValueType::Nothing => "nothing",
            ValueType::Null => "NULL",
            ValueType::Bool => "bool",
            ValueType::Int => "int",
            ValueType::Float => "float",
            ValueType::Date => "date",
            ValueType::String => "string",
            ValueType::Binary => "binary",
            ValueType::List => "list",
            ValueType::Hash => "hash",
            ValueType::Object => "object",
            ValueType::Reference => "reference",
            ValueType::Node => "expression",
        }
    }
}

impl Value {
    /// Type tag of this value
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Nothing => ValueType::Nothing,
            Value::Null => ValueType::Null,
            Value::Bool(_) => ValueType::Bool,
            Value::Int(_) => ValueType::Int,
            Value::Float(_) => ValueType::Float,
            Value::Date(_) => ValueType::Date,
            Value::String(_) => ValueType::String,
            Value::Binary(_) => ValueType::Binary,
            Value::List(_) => ValueType::List,
            Value::Hash(_) => ValueType::Hash,
            Value::Object(_) => ValueType::Object,
            Value::Reference(_) => ValueType::Reference,
            Value::Node(_) => ValueType::Node,
        }
    }

    /// Script-visible type name
    pub fn type_name(&self) -> &'static str {
        self.value_type().name()
    }

    // ═══════════════════════════════════════════════════════════════════
    // Reference Counting
    // ═══════════════════════════════════════════════════════════════════

    /// Current reference count; inline scalars always report 1.
    pub fn ref_count(&self) -> usize {
        match self {
            Value::String(s) => Arc::strong_count(s),
            Value::Binary(b) => Arc::strong_count(b),
            Value::List(l) => Arc::strong_count(l),
            Value::Hash(h) => Arc::strong_count(h),
            Value::Object(o) => Arc::strong_count(o),
            Value::Reference(r) => Arc::strong_count(r),
            Value::Node(n) => Arc::strong_count(n),
            _ => 1,
        }
    }

    /// True if no other handle shares this value's payload
    pub fn is_unique(&self) -> bool {
        self.ref_count() == 1
    }

    /// Produce an independently owned copy.
    ///
    /// Lists and hashes get a fresh container whose elements are shared
    /// until either side writes to them. Objects, references and nodes are
    /// handles and are shared.
    pub fn real_copy(&self) -> Value {
        match self {
            Value::List(l) => Value::List(Arc::new(ValueList::clone(l))),
            Value::Hash(h) => Value::Hash(Arc::new(ValueHash::clone(h))),
            Value::String(s) => Value::String(Arc::new(String::clone(s))),
            Value::Binary(b) => Value::Binary(Arc::new(Vec::clone(b))),
            other => other.clone(),
        }
    }

    /// Mutable access to a list payload, copying it first if shared
    pub fn list_mut(&mut self) -> Option<&mut ValueList> {
        match self {
            Value::List(l) => Some(Arc::make_mut(l)),
            _ => None,
        }
    }

    /// Mutable access to a hash payload, copying it first if shared
    pub fn hash_mut(&mut self) -> Option<&mut ValueHash> {
        match self {
            Value::Hash(h) => Some(Arc::make_mut(h)),
            _ => None,
        }
    }

    /// Mutable access to a string payload, copying it first if shared
    pub fn string_mut(&mut self) -> Option<&mut String> {
        match self {
            Value::String(s) => Some(Arc::make_mut(s)),
            _ => None,
        }
    }

    // ═══════════════════════════════════════════════════════════════════
    // Scan and Evaluation Flags
    // ═══════════════════════════════════════════════════════════════════

    /// True if the value may take part in a reference cycle.
    ///
    /// Objects, references and nodes always need scanning; containers need
    /// it while they hold at least one element that does.
    pub fn needs_scan(&self) -> bool {
        match self {
            Value::Object(_) | Value::Reference(_) | Value::Node(_) => true,
            Value::List(l) => l.scan_count() > 0,
            Value::Hash(h) => h.scan_count() > 0,
            _ => false,
        }
    }

    /// True if evaluating the value does more than return a copy of it
    pub fn needs_eval(&self) -> bool {
        match self {
            Value::Node(_) => true,
            Value::List(l) => l.needs_eval(),
            Value::Hash(h) => h.needs_eval(),
            _ => false,
        }
    }
}
