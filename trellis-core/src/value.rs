//! Declared and resolved value models.
//!
//! A [`Value`] is what a definition declares: a literal, a reference to
//! another named component, an inline nested definition, or a collection of
//! these. A [`Resolved`] is what the container produces at wiring time once
//! references have been followed and nested definitions created.

use crate::definition::ComponentDefinition;
use crate::error::CoreError;
use crate::types::ComponentRef;

/// Type identity used by definitions, property accessors and autowiring.
///
/// Component types are named; scalar and collection kinds are built in. A
/// descriptor's assignability set decides which `Component` keys it
/// satisfies beyond its own name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeKey {
    Bool,
    Int,
    Float,
    Str,
    List,
    Map,
    Component(&'static str),
}

impl TypeKey {
    /// Simple types are excluded from by-name/by-type autowiring.
    pub fn is_simple(&self) -> bool {
        !matches!(self, TypeKey::Component(_))
    }
}

impl std::fmt::Display for TypeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TypeKey::Bool => write!(f, "bool"),
            TypeKey::Int => write!(f, "int"),
            TypeKey::Float => write!(f, "float"),
            TypeKey::Str => write!(f, "string"),
            TypeKey::List => write!(f, "list"),
            TypeKey::Map => write!(f, "map"),
            TypeKey::Component(name) => write!(f, "{name}"),
        }
    }
}

/// A declared value inside a definition.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    /// Runtime reference to another named component.
    Ref(String),
    /// Inline nested definition, created fresh whenever the outer value is
    /// resolved and never reachable by name.
    Inner(Box<ComponentDefinition>),
    /// Ordered collection; elements may themselves be references or nested
    /// definitions.
    List(Vec<Value>),
    /// Keyed collection, insertion-ordered.
    Map(Vec<(String, Value)>),
}

impl Value {
    pub fn str(s: impl Into<String>) -> Self {
        Value::Str(s.into())
    }

    pub fn reference(name: impl Into<String>) -> Self {
        Value::Ref(name.into())
    }
}

/// A fully resolved runtime value, ready for coercion and assignment.
#[derive(Debug, Clone)]
pub enum Resolved {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Component(ComponentRef),
    List(Vec<Resolved>),
    Map(Vec<(String, Resolved)>),
}

impl Resolved {
    /// Human-readable kind, for diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Resolved::Null => "null",
            Resolved::Bool(_) => "bool",
            Resolved::Int(_) => "int",
            Resolved::Float(_) => "float",
            Resolved::Str(_) => "string",
            Resolved::Component(_) => "component",
            Resolved::List(_) => "list",
            Resolved::Map(_) => "map",
        }
    }

    pub fn into_bool(self) -> Result<bool, CoreError> {
        match self {
            Resolved::Bool(b) => Ok(b),
            other => Err(conversion(TypeKey::Bool, &other)),
        }
    }

    pub fn into_int(self) -> Result<i64, CoreError> {
        match self {
            Resolved::Int(i) => Ok(i),
            other => Err(conversion(TypeKey::Int, &other)),
        }
    }

    pub fn into_float(self) -> Result<f64, CoreError> {
        match self {
            Resolved::Float(x) => Ok(x),
            Resolved::Int(i) => Ok(i as f64),
            other => Err(conversion(TypeKey::Float, &other)),
        }
    }

    pub fn into_string(self) -> Result<String, CoreError> {
        match self {
            Resolved::Str(s) => Ok(s),
            other => Err(conversion(TypeKey::Str, &other)),
        }
    }

    pub fn into_component(self) -> Result<ComponentRef, CoreError> {
        match self {
            Resolved::Component(c) => Ok(c),
            other => Err(CoreError::Conversion {
                target: TypeKey::Component("<component>"),
                message: format!("expected a component reference, found {}", other.kind()),
            }),
        }
    }

    pub fn into_list(self) -> Result<Vec<Resolved>, CoreError> {
        match self {
            Resolved::List(xs) => Ok(xs),
            other => Err(conversion(TypeKey::List, &other)),
        }
    }

    pub fn into_map(self) -> Result<Vec<(String, Resolved)>, CoreError> {
        match self {
            Resolved::Map(kvs) => Ok(kvs),
            other => Err(conversion(TypeKey::Map, &other)),
        }
    }
}

fn conversion(target: TypeKey, found: &Resolved) -> CoreError {
    CoreError::Conversion {
        target,
        message: format!("found {} value", found.kind()),
    }
}
