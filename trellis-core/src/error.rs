// Error types for the Trellis container core

use crate::value::TypeKey;
use thiserror::Error;

/// Errors raised by the definition store, the resolver and the lifecycle
/// orchestrator.
///
/// Creation failures carry the component name they refer to; wrapped causes
/// are preserved through `#[source]` so callers can walk the chain for
/// diagnostics.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("no definition found for component '{0}'")]
    DefinitionNotFound(String),

    #[error("definition store inconsistency for '{name}': {message}")]
    StoreInconsistency { name: String, message: String },

    #[error("component '{0}' is an abstract template and cannot be instantiated")]
    AbstractDefinition(String),

    #[error("instantiation of component '{name}' failed: {message}")]
    InstantiationFailed {
        name: String,
        message: String,
        #[source]
        source: Option<Box<CoreError>>,
    },

    #[error("unsatisfied dependency for {at} of component '{name}': {message}")]
    UnsatisfiedDependency {
        name: String,
        at: String,
        message: String,
        #[source]
        source: Option<Box<CoreError>>,
    },

    #[error(
        "ambiguous dependency for {at} of component '{name}': {} candidates ({})",
        candidates.len(),
        candidates.join(", ")
    )]
    AmbiguousDependency {
        name: String,
        at: String,
        candidates: Vec<String>,
    },

    #[error(
        "failed to apply {} property value(s) on component '{name}': [{}]",
        failures.len(),
        failures.iter().map(|f| f.to_string()).collect::<Vec<_>>().join("; ")
    )]
    PropertyAccess {
        name: String,
        failures: Vec<PropertyFailure>,
    },

    #[error("property '{property}' is not writable on type '{type_name}'")]
    NotWritable {
        type_name: String,
        property: String,
    },

    #[error("cannot convert value to {target}: {message}")]
    Conversion { target: TypeKey, message: String },

    #[error("component '{0}' is currently in creation (circular reference?)")]
    CurrentlyInCreation(String),

    #[error("post-processing of component '{name}' failed: {message}")]
    PostProcessing { name: String, message: String },

    #[error("init method '{method}' not found on component '{name}'")]
    InitMethodNotFound { name: String, method: String },

    #[error("component '{name}' is of type '{actual}', required '{required}'")]
    TypeMismatch {
        name: String,
        required: String,
        actual: String,
    },
}

impl CoreError {
    /// Whether this error, or any wrapped cause, is a circular-creation
    /// failure. Autowire candidate collection uses this to skip names that
    /// are mid-construction instead of aborting the whole resolution.
    pub fn involves_in_creation(&self) -> bool {
        match self {
            CoreError::CurrentlyInCreation(_) => true,
            CoreError::InstantiationFailed {
                source: Some(inner),
                ..
            }
            | CoreError::UnsatisfiedDependency {
                source: Some(inner),
                ..
            } => inner.involves_in_creation(),
            CoreError::PropertyAccess { failures, .. } => {
                failures.iter().any(|f| f.error.involves_in_creation())
            }
            _ => false,
        }
    }
}

/// A single failed property assignment, collected into
/// [`CoreError::PropertyAccess`] so that one bad property does not hide the
/// others.
#[derive(Debug)]
pub struct PropertyFailure {
    pub property: String,
    pub error: CoreError,
}

impl std::fmt::Display for PropertyFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "property '{}': {}", self.property, self.error)
    }
}
