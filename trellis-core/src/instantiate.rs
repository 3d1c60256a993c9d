//! Instance production, separated behind a strategy seam.
//!
//! The orchestrator decides *which* constructor or factory method to call
//! and with what arguments; the strategy performs the call and normalizes
//! failures into [`CoreError::InstantiationFailed`] carrying the component
//! name and, where present, the origin descriptor of its definition.

use tracing::trace;

use crate::definition::MergedDefinition;
use crate::error::CoreError;
use crate::types::{AnyInstance, ComponentRef, ConstructorSpec, FactoryMethodSpec};
use crate::value::Resolved;

pub trait InstantiationStrategy: Send + Sync {
    fn instantiate(
        &self,
        name: &str,
        merged: &MergedDefinition,
        constructor: &ConstructorSpec,
        args: &[Resolved],
    ) -> Result<AnyInstance, CoreError>;

    fn instantiate_with_factory(
        &self,
        name: &str,
        merged: &MergedDefinition,
        factory: Option<&ComponentRef>,
        method: &FactoryMethodSpec,
        args: &[Resolved],
    ) -> Result<AnyInstance, CoreError>;
}

/// Direct invocation of the registered closures.
#[derive(Debug, Default)]
pub struct SimpleInstantiationStrategy;

impl InstantiationStrategy for SimpleInstantiationStrategy {
    fn instantiate(
        &self,
        name: &str,
        merged: &MergedDefinition,
        constructor: &ConstructorSpec,
        args: &[Resolved],
    ) -> Result<AnyInstance, CoreError> {
        trace!(
            component = name,
            type_name = merged.type_name(),
            arity = constructor.params().len(),
            "invoking constructor"
        );
        constructor
            .invoke(args)
            .map_err(|e| wrap(name, merged, "constructor invocation failed", e))
    }

    fn instantiate_with_factory(
        &self,
        name: &str,
        merged: &MergedDefinition,
        factory: Option<&ComponentRef>,
        method: &FactoryMethodSpec,
        args: &[Resolved],
    ) -> Result<AnyInstance, CoreError> {
        trace!(
            component = name,
            type_name = merged.type_name(),
            method = method.name(),
            is_static = method.is_static(),
            "invoking factory method"
        );
        method
            .invoke(factory, args)
            .map_err(|e| wrap(name, merged, "factory method invocation failed", e))
    }
}

fn wrap(name: &str, merged: &MergedDefinition, what: &str, cause: CoreError) -> CoreError {
    let message = match merged.origin_descriptor() {
        Some(origin) => format!("{what} (defined in {origin})"),
        None => what.to_string(),
    };
    CoreError::InstantiationFailed {
        name: name.to_string(),
        message,
        source: Some(Box::new(cause)),
    }
}
