// Core library for the Trellis dependency-injection container
// This module contains the definition model, the resolver and the
// lifecycle orchestrator

mod autowire;

pub mod convert;
pub mod definition;
pub mod error;
pub mod factory;
pub mod instantiate;
pub mod lifecycle;
pub mod logging;
pub mod processor;
pub mod registry;
pub mod singleton;
pub mod types;
pub mod value;

// Re-export commonly used types
pub use convert::{Converter, ConverterRegistry, SimpleConverter};
pub use definition::{
    ArgValue, AutowireMode, ComponentDefinition, ConstructorArgs, DependencyCheck,
    MergedDefinition, PropertyValue, PropertyValues, Scope,
};
pub use error::{CoreError, PropertyFailure};
pub use factory::ComponentFactory;
pub use instantiate::{InstantiationStrategy, SimpleInstantiationStrategy};
pub use lifecycle::{ComponentNameAware, Disposable, Initializing};
pub use processor::ComponentPostProcessor;
pub use registry::DefinitionRegistry;
pub use singleton::SingletonRegistry;
pub use types::{
    AnyInstance, ComponentCell, ComponentRef, ConstructorSpec, FactoryMethodSpec, PropertySpec,
    TypeDescriptor, TypeRegistry,
};
pub use value::{Resolved, TypeKey, Value};
