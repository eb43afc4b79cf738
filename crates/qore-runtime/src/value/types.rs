//! Declared type constraints for variables and list elements

use std::fmt;

use super::Value;

/// Base type of a declaration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BaseType {
    /// No constraint
    Any,
    /// bool
    Bool,
    /// int
    Int,
    /// float
    Float,
    /// int or float
    Number,
    /// string
    String,
    /// binary
    Binary,
    /// date
    Date,
    /// list
    List,
    /// hash
    Hash,
    /// object
    Object,
    /// reference
    Reference,
}

impl BaseType {
    fn name(self) -> &'static str {
        match self {
            BaseType::Any => "any",
            BaseType::Bool => "bool",
            BaseType::Int => "int",
            BaseType::Float => "float",
            BaseType::Number => "number",
            BaseType::String => "string",
            BaseType::Binary => "binary",
            BaseType::Date => "date",
            BaseType::List => "list",
            BaseType::Hash => "hash",
            BaseType::Object => "object",
            BaseType::Reference => "reference",
        }
    }
}

/// A type constraint: a base type, optionally also admitting NOTHING.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeInfo {
    base: BaseType,
    or_nothing: bool,
}

impl Default for TypeInfo {
    fn default() -> Self {
        TypeInfo::ANY
    }
}

impl TypeInfo {
    /// Unconstrained
    pub const ANY: TypeInfo = TypeInfo::new(BaseType::Any);
    /// int
    pub const INT: TypeInfo = TypeInfo::new(BaseType::Int);
    /// float
    pub const FLOAT: TypeInfo = TypeInfo::new(BaseType::Float);
    /// string
    pub const STRING: TypeInfo = TypeInfo::new(BaseType::String);
    /// list
    pub const LIST: TypeInfo = TypeInfo::new(BaseType::List);
    /// hash
    pub const HASH: TypeInfo = TypeInfo::new(BaseType::Hash);

    /// Constraint on a base type
    pub const fn new(base: BaseType) -> Self {
        Self {
            base,
            or_nothing: false,
        }
    }

    /// Same constraint, also admitting NOTHING
    pub const fn or_nothing(self) -> Self {
        Self {
            base: self.base,
            or_nothing: true,
        }
    }

    /// Base type
    pub fn base(&self) -> BaseType {
        self.base
    }

    /// True for the unconstrained type
    pub fn is_any(&self) -> bool {
        self.base == BaseType::Any
    }

    /// True if values of `base` can be stored under this constraint
    pub fn allows(&self, base: BaseType) -> bool {
        match self.base {
            BaseType::Any => true,
            BaseType::Number => matches!(base, BaseType::Int | BaseType::Float | BaseType::Number),
            own => own == base,
        }
    }

    /// True if the value can be stored under this constraint
    pub fn accepts(&self, value: &Value) -> bool {
        let base = match value {
            Value::Nothing => return self.or_nothing || self.is_any(),
            Value::Null => return self.is_any(),
            Value::Node(_) => return self.is_any(),
            Value::Bool(_) => BaseType::Bool,
            Value::Int(_) => BaseType::Int,
            Value::Float(_) => BaseType::Float,
            Value::String(_) => BaseType::String,
            Value::Binary(_) => BaseType::Binary,
            Value::Date(_) => BaseType::Date,
            Value::List(_) => BaseType::List,
            Value::Hash(_) => BaseType::Hash,
            Value::Object(_) => BaseType::Object,
            Value::Reference(_) => BaseType::Reference,
        };
        self.allows(base)
    }

    /// Parse a declaration such as `int`, `*string` or `any`
    pub fn parse(decl: &str) -> Option<Self> {
        let decl = decl.trim();
        let (or_nothing, name) = match decl.strip_prefix('*') {
            Some(rest) => (true, rest),
            None => (false, decl),
        };
        let base = match name {
            "any" => BaseType::Any,
            "bool" => BaseType::Bool,
            "int" => BaseType::Int,
            "float" => BaseType::Float,
            "number" => BaseType::Number,
            "string" => BaseType::String,
            "binary" => BaseType::Binary,
            "date" => BaseType::Date,
            "list" => BaseType::List,
            "hash" => BaseType::Hash,
            "object" => BaseType::Object,
            "reference" => BaseType::Reference,
            _ => return None,
        };
        let ti = TypeInfo::new(base);
        Some(if or_nothing { ti.or_nothing() } else { ti })
    }

    /// Declaration name
    pub fn name(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for TypeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.or_nothing && !self.is_any() {
            write!(f, "*")?;
        }
        write!(f, "{}", self.base.name())
    }
}
