//! Lifecycle callbacks a managed type can opt into.
//!
//! These are bridged through the type descriptor
//! ([`crate::types::TypeDescriptor::initializing`] and friends) so the
//! container can invoke them on type-erased instances.

use crate::error::CoreError;

/// Invoked after all properties have been applied, before any custom init
/// method named by the definition.
pub trait Initializing {
    fn after_properties_set(&mut self) -> Result<(), CoreError>;
}

/// Invoked during container teardown, before any custom destroy method
/// named by the definition. Only singletons are tracked for destruction.
pub trait Disposable {
    fn destroy(&mut self) -> Result<(), CoreError>;
}

/// Receives the component's registered name before initialization runs.
pub trait ComponentNameAware {
    fn set_component_name(&mut self, name: &str);
}
