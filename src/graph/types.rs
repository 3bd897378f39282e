//! # Pin Type Lattice
//!
//! Semantic pin types, literal values and the numeric promotion rules used by
//! connection validation.
//!
//! ## Compatibility Rules
//!
//! ### Exact Match
//! Identical types always connect.
//!
//! ### Numeric Promotion
//! - `byte` → `int` → `int64` → `double`
//! - `int` → `float` → `double`
//!
//! ### Containers
//! Arrays, sets and maps require identical element types. No promotion happens
//! inside a container.
//!
//! ### Wildcards
//! A type containing [`PinType::Wildcard`] is a pattern. [`PinType::bind`]
//! matches a pattern against a concrete type and yields the type the wildcard
//! stands for.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PinType {
    Exec,
    Boolean,
    Byte,
    Integer,
    Integer64,
    Float,
    Double,
    Name,
    String,
    /// Object reference of the named class (or any subclass)
    Object(String),
    Struct(String),
    Array(Box<PinType>),
    Set(Box<PinType>),
    Map(Box<PinType>, Box<PinType>),
    /// Resolved from connections at compile time
    Wildcard,
}

/// Result of matching a wildcard pattern against a concrete type
#[derive(Debug, Clone, PartialEq)]
pub enum Binding {
    /// The shapes agree but nothing was learned about the wildcard
    Unbound,
    /// The wildcard stands for this type
    Bound(PinType),
    /// The shapes disagree
    Mismatch,
}

impl PinType {
    pub fn object(class: impl Into<String>) -> Self {
        PinType::Object(class.into())
    }

    pub fn array_of(element: PinType) -> Self {
        PinType::Array(Box::new(element))
    }

    pub fn set_of(element: PinType) -> Self {
        PinType::Set(Box::new(element))
    }

    pub fn map_of(key: PinType, value: PinType) -> Self {
        PinType::Map(Box::new(key), Box::new(value))
    }

    pub fn is_exec(&self) -> bool {
        matches!(self, PinType::Exec)
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            PinType::Byte | PinType::Integer | PinType::Integer64 | PinType::Float | PinType::Double
        )
    }

    /// Whether a wildcard appears anywhere in this type
    pub fn contains_wildcard(&self) -> bool {
        match self {
            PinType::Wildcard => true,
            PinType::Array(inner) | PinType::Set(inner) => inner.contains_wildcard(),
            PinType::Map(key, value) => key.contains_wildcard() || value.contains_wildcard(),
            _ => false,
        }
    }

    /// Strict numeric widening from `self` to `target`.
    ///
    /// The table is already transitively closed.
    pub fn widens_to(&self, target: &PinType) -> bool {
        use PinType::*;
        matches!(
            (self, target),
            (Byte, Integer | Integer64 | Float | Double)
                | (Integer, Integer64 | Float | Double)
                | (Integer64, Double)
                | (Float, Double)
        )
    }

    /// Match `self` (a pattern that may contain wildcards) against `concrete`
    pub fn bind(&self, concrete: &PinType) -> Binding {
        match (self, concrete) {
            (PinType::Wildcard, PinType::Exec) => Binding::Mismatch,
            (PinType::Wildcard, other) if other.contains_wildcard() => Binding::Unbound,
            (PinType::Wildcard, other) => Binding::Bound(other.clone()),
            (PinType::Array(p), PinType::Array(c)) | (PinType::Set(p), PinType::Set(c)) => p.bind(c),
            (PinType::Map(pk, pv), PinType::Map(ck, cv)) => merge_bindings(pk.bind(ck), pv.bind(cv)),
            (pattern, other) if !pattern.contains_wildcard() => {
                if other.contains_wildcard() {
                    // Flip the match so a concrete pattern still agrees with a wildcard neighbour
                    match other.bind(pattern) {
                        Binding::Mismatch => Binding::Mismatch,
                        _ => Binding::Unbound,
                    }
                } else if pattern == other {
                    Binding::Unbound
                } else {
                    Binding::Mismatch
                }
            }
            (_, PinType::Wildcard) => Binding::Unbound,
            _ => Binding::Mismatch,
        }
    }

    /// Replace every wildcard with `binding`
    pub fn substitute(&self, binding: &PinType) -> PinType {
        match self {
            PinType::Wildcard => binding.clone(),
            PinType::Array(inner) => PinType::Array(Box::new(inner.substitute(binding))),
            PinType::Set(inner) => PinType::Set(Box::new(inner.substitute(binding))),
            PinType::Map(key, value) => {
                PinType::Map(Box::new(key.substitute(binding)), Box::new(value.substitute(binding)))
            }
            other => other.clone(),
        }
    }

    /// The value an unconnected, non-required input of this type reads
    pub fn implicit_default(&self) -> Option<LiteralValue> {
        match self {
            PinType::Exec | PinType::Wildcard => None,
            PinType::Boolean => Some(LiteralValue::Bool(false)),
            PinType::Byte => Some(LiteralValue::Byte(0)),
            PinType::Integer => Some(LiteralValue::Int(0)),
            PinType::Integer64 => Some(LiteralValue::Int64(0)),
            PinType::Float => Some(LiteralValue::Float(0.0)),
            PinType::Double => Some(LiteralValue::Double(0.0)),
            PinType::Name => Some(LiteralValue::Name(String::new())),
            PinType::String => Some(LiteralValue::String(String::new())),
            PinType::Object(_) => Some(LiteralValue::Null),
            PinType::Struct(_) | PinType::Array(_) | PinType::Set(_) | PinType::Map(_, _) => {
                Some(LiteralValue::Empty)
            }
        }
    }

    /// Short identifier used when naming library intrinsics (`Add_IntegerInteger`)
    pub fn intrinsic_name(&self) -> String {
        match self {
            PinType::Exec => "Exec".to_string(),
            PinType::Boolean => "Bool".to_string(),
            PinType::Byte => "Byte".to_string(),
            PinType::Integer => "Integer".to_string(),
            PinType::Integer64 => "Integer64".to_string(),
            PinType::Float => "Float".to_string(),
            PinType::Double => "Double".to_string(),
            PinType::Name => "Name".to_string(),
            PinType::String => "String".to_string(),
            PinType::Object(_) => "Object".to_string(),
            PinType::Struct(name) => name.clone(),
            PinType::Array(_) => "Array".to_string(),
            PinType::Set(_) => "Set".to_string(),
            PinType::Map(_, _) => "Map".to_string(),
            PinType::Wildcard => "Wildcard".to_string(),
        }
    }
}

fn merge_bindings(a: Binding, b: Binding) -> Binding {
    match (a, b) {
        (Binding::Mismatch, _) | (_, Binding::Mismatch) => Binding::Mismatch,
        (Binding::Unbound, other) | (other, Binding::Unbound) => other,
        (Binding::Bound(x), Binding::Bound(y)) => {
            if x == y {
                Binding::Bound(x)
            } else {
                Binding::Mismatch
            }
        }
    }
}

impl fmt::Display for PinType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PinType::Exec => write!(f, "exec"),
            PinType::Boolean => write!(f, "bool"),
            PinType::Byte => write!(f, "byte"),
            PinType::Integer => write!(f, "int"),
            PinType::Integer64 => write!(f, "int64"),
            PinType::Float => write!(f, "float"),
            PinType::Double => write!(f, "double"),
            PinType::Name => write!(f, "name"),
            PinType::String => write!(f, "string"),
            PinType::Object(class) => write!(f, "object<{}>", class),
            PinType::Struct(name) => write!(f, "struct<{}>", name),
            PinType::Array(inner) => write!(f, "array<{}>", inner),
            PinType::Set(inner) => write!(f, "set<{}>", inner),
            PinType::Map(key, value) => write!(f, "map<{}, {}>", key, value),
            PinType::Wildcard => write!(f, "wildcard"),
        }
    }
}

/// A compile-time constant stored in a literal terminal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LiteralValue {
    Bool(bool),
    Byte(u8),
    Int(i32),
    Int64(i64),
    Float(f32),
    Double(f64),
    Name(String),
    String(String),
    Null,
    /// The object executing the function
    SelfRef,
    Class(String),
    /// Zero-initialised struct or container
    Empty,
}

impl fmt::Display for LiteralValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LiteralValue::Bool(v) => write!(f, "{}", v),
            LiteralValue::Byte(v) => write!(f, "{}u8", v),
            LiteralValue::Int(v) => write!(f, "{}", v),
            LiteralValue::Int64(v) => write!(f, "{}i64", v),
            LiteralValue::Float(v) => write!(f, "{:?}f32", v),
            LiteralValue::Double(v) => write!(f, "{:?}f64", v),
            LiteralValue::Name(v) => write!(f, "name({:?})", v),
            LiteralValue::String(v) => write!(f, "{:?}", v),
            LiteralValue::Null => write!(f, "null"),
            LiteralValue::SelfRef => write!(f, "self"),
            LiteralValue::Class(name) => write!(f, "class({})", name),
            LiteralValue::Empty => write!(f, "empty"),
        }
    }
}
