//! Hooks around component initialization and destruction.

use crate::error::CoreError;
use crate::types::ComponentRef;

/// Container-wide hook applied to every component as it is created.
///
/// The `before` hook runs after properties are applied but before any init
/// callback; the `after` hook runs once initialization has completed.
/// Returning a different handle replaces the component for all subsequent
/// processing and for the requester. Returning `Ok(None)` short-circuits
/// the remaining processors and fails the creation, since the container
/// would otherwise hand out a component that skipped part of the chain.
pub trait ComponentPostProcessor: Send + Sync {
    fn before_initialization(
        &self,
        component: ComponentRef,
        _name: &str,
    ) -> Result<Option<ComponentRef>, CoreError> {
        Ok(Some(component))
    }

    fn after_initialization(
        &self,
        component: ComponentRef,
        _name: &str,
    ) -> Result<Option<ComponentRef>, CoreError> {
        Ok(Some(component))
    }

    /// Whether this processor wants [`before_destruction`] callbacks.
    ///
    /// [`before_destruction`]: Self::before_destruction
    fn destruction_aware(&self) -> bool {
        false
    }

    /// Invoked for each tracked singleton before its disposal callbacks.
    fn before_destruction(&self, _component: &ComponentRef, _name: &str) {}
}
