//! Value conversion applied before assignment.
//!
//! Every resolved value passes through a [`Converter`] on its way into a
//! constructor parameter or property setter. The built-in
//! [`SimpleConverter`] covers scalar coercions; custom converters can be
//! registered per target type or, more specifically, per
//! `TypeName.property` path.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::CoreError;
use crate::value::{Resolved, TypeKey};

/// Converts a resolved value to the required target type.
pub trait Converter: Send + Sync {
    fn convert(&self, value: Resolved, target: TypeKey) -> Result<Resolved, CoreError>;
}

/// Built-in scalar coercions.
///
/// Null passes through any target unchanged. Strings parse into numbers and
/// booleans; integers widen to floats; scalars render to strings. Anything
/// else must already match the target kind.
#[derive(Debug, Default)]
pub struct SimpleConverter;

impl Converter for SimpleConverter {
    fn convert(&self, value: Resolved, target: TypeKey) -> Result<Resolved, CoreError> {
        match (target, value) {
            (_, Resolved::Null) => Ok(Resolved::Null),

            (TypeKey::Bool, v @ Resolved::Bool(_)) => Ok(v),
            (TypeKey::Bool, Resolved::Str(s)) => match s.trim() {
                "true" | "yes" | "on" | "1" => Ok(Resolved::Bool(true)),
                "false" | "no" | "off" | "0" => Ok(Resolved::Bool(false)),
                other => Err(fail(target, format!("'{other}' is not a boolean"))),
            },

            (TypeKey::Int, v @ Resolved::Int(_)) => Ok(v),
            (TypeKey::Int, Resolved::Str(s)) => s
                .trim()
                .parse::<i64>()
                .map(Resolved::Int)
                .map_err(|e| fail(target, format!("'{s}': {e}"))),

            (TypeKey::Float, v @ Resolved::Float(_)) => Ok(v),
            (TypeKey::Float, Resolved::Int(i)) => Ok(Resolved::Float(i as f64)),
            (TypeKey::Float, Resolved::Str(s)) => s
                .trim()
                .parse::<f64>()
                .map(Resolved::Float)
                .map_err(|e| fail(target, format!("'{s}': {e}"))),

            (TypeKey::Str, v @ Resolved::Str(_)) => Ok(v),
            (TypeKey::Str, Resolved::Bool(b)) => Ok(Resolved::Str(b.to_string())),
            (TypeKey::Str, Resolved::Int(i)) => Ok(Resolved::Str(i.to_string())),
            (TypeKey::Str, Resolved::Float(x)) => Ok(Resolved::Str(x.to_string())),

            (TypeKey::List, v @ Resolved::List(_)) => Ok(v),
            (TypeKey::Map, v @ Resolved::Map(_)) => Ok(v),
            (TypeKey::Component(_), v @ Resolved::Component(_)) => Ok(v),

            (target, other) => Err(fail(target, format!("found {} value", other.kind()))),
        }
    }
}

fn fail(target: TypeKey, message: String) -> CoreError {
    CoreError::Conversion { target, message }
}

/// Converter lookup: per-path beats per-type beats the built-in default.
pub struct ConverterRegistry {
    default: Arc<dyn Converter>,
    by_type: HashMap<TypeKey, Arc<dyn Converter>>,
    by_path: HashMap<String, Arc<dyn Converter>>,
}

impl Default for ConverterRegistry {
    fn default() -> Self {
        Self {
            default: Arc::new(SimpleConverter),
            by_type: HashMap::new(),
            by_path: HashMap::new(),
        }
    }
}

impl ConverterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_for_type(&mut self, target: TypeKey, converter: Arc<dyn Converter>) {
        self.by_type.insert(target, converter);
    }

    /// Register a converter for one property of one type, addressed as
    /// `TypeName.property`.
    pub fn register_for_path(&mut self, path: impl Into<String>, converter: Arc<dyn Converter>) {
        self.by_path.insert(path.into(), converter);
    }

    pub fn convert(
        &self,
        type_name: &str,
        property: Option<&str>,
        value: Resolved,
        target: TypeKey,
    ) -> Result<Resolved, CoreError> {
        if let Some(property) = property {
            let path = format!("{type_name}.{property}");
            if let Some(converter) = self.by_path.get(&path) {
                return converter.convert(value, target);
            }
        }
        if let Some(converter) = self.by_type.get(&target) {
            return converter.convert(value, target);
        }
        self.default.convert(value, target)
    }
}

/// Key extracted from an indexed/keyed property path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum PathKey {
    Index(usize),
    Key(String),
}

/// Split `urls[0]` into `("urls", Index(0))` and `env[KEY]` into
/// `("env", Key("KEY"))`. Plain names return no key.
pub(crate) fn split_indexed(name: &str) -> (&str, Option<PathKey>) {
    let Some(open) = name.find('[') else {
        return (name, None);
    };
    let Some(rest) = name[open + 1..].strip_suffix(']') else {
        return (name, None);
    };
    let key = match rest.parse::<usize>() {
        Ok(index) => PathKey::Index(index),
        Err(_) => PathKey::Key(rest.to_string()),
    };
    (&name[..open], Some(key))
}
