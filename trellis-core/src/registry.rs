//! The definition store: named definitions, aliases and the merger.
//!
//! Stores form a chain through an optional parent. Lookup falls through to
//! the parent when a name is unknown locally; registration always targets
//! the local store. Merging collapses a child definition chain into a
//! [`MergedDefinition`] without mutating any stored definition, so merging
//! the same name twice yields equal results.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::definition::{ComponentDefinition, MergedDefinition};
use crate::error::CoreError;

#[derive(Default)]
struct Store {
    definitions: HashMap<String, ComponentDefinition>,
    /// Registration order, preserved for pre-instantiation and teardown.
    order: Vec<String>,
    /// alias -> canonical target (which may itself be an alias).
    aliases: HashMap<String, String>,
    allow_overriding: bool,
}

/// Parent-linked store of component definitions.
pub struct DefinitionRegistry {
    parent: Option<Arc<DefinitionRegistry>>,
    store: RwLock<Store>,
}

impl Default for DefinitionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl DefinitionRegistry {
    pub fn new() -> Self {
        Self {
            parent: None,
            store: RwLock::new(Store {
                allow_overriding: true,
                ..Store::default()
            }),
        }
    }

    pub fn with_parent(parent: Arc<DefinitionRegistry>) -> Self {
        Self {
            parent: Some(parent),
            ..Self::new()
        }
    }

    pub fn parent(&self) -> Option<&Arc<DefinitionRegistry>> {
        self.parent.as_ref()
    }

    /// When disabled, registering a definition under an existing name fails
    /// instead of replacing it.
    pub fn set_allow_overriding(&self, allow: bool) {
        self.store.write().allow_overriding = allow;
    }

    /// Register a definition under `name` in the local store.
    ///
    /// Returns the definition it replaced, if any; callers use that signal
    /// to evict a stale singleton built from the old definition.
    pub fn register(
        &self,
        name: impl Into<String>,
        definition: ComponentDefinition,
    ) -> Result<Option<ComponentDefinition>, CoreError> {
        let name = name.into();
        definition.validate(&name)?;
        let mut store = self.store.write();
        if store.definitions.contains_key(&name) && !store.allow_overriding {
            return Err(CoreError::StoreInconsistency {
                name: name.clone(),
                message: "a definition is already registered under this name and overriding is disabled"
                    .into(),
            });
        }
        let previous = store.definitions.insert(name.clone(), definition);
        if previous.is_none() {
            store.order.push(name.clone());
        } else {
            debug!(component = %name, "definition overridden");
        }
        Ok(previous)
    }

    /// Remove the local definition for `name`. Does not touch aliases.
    pub fn remove(&self, name: &str) -> Result<ComponentDefinition, CoreError> {
        let mut store = self.store.write();
        let removed = store
            .definitions
            .remove(name)
            .ok_or_else(|| CoreError::DefinitionNotFound(name.to_string()))?;
        store.order.retain(|n| n != name);
        Ok(removed)
    }

    /// Register `alias` for the component registered under `name`. An alias
    /// equal to the name is ignored; pointing an existing alias at a
    /// different target is an error.
    pub fn register_alias(
        &self,
        name: impl Into<String>,
        alias: impl Into<String>,
    ) -> Result<(), CoreError> {
        let name = name.into();
        let alias = alias.into();
        if alias == name {
            return Ok(());
        }
        let mut store = self.store.write();
        match store.aliases.get(&alias) {
            Some(existing) if *existing != name => Err(CoreError::StoreInconsistency {
                name: alias.clone(),
                message: format!(
                    "alias already points at '{existing}', cannot repoint at '{name}'"
                ),
            }),
            _ => {
                store.aliases.insert(alias, name);
                Ok(())
            }
        }
    }

    /// Follow the alias chain from `name` to the canonical component name.
    pub fn canonical_name(&self, name: &str) -> String {
        let store = self.store.read();
        let mut current = name;
        // Alias chains are short; the bound guards against a manually
        // constructed cycle.
        for _ in 0..store.aliases.len() {
            match store.aliases.get(current) {
                Some(next) => current = next,
                None => break,
            }
        }
        let current = current.to_string();
        drop(store);
        if let Some(parent) = &self.parent {
            let local = self.store.read();
            if !local.definitions.contains_key(&current) {
                return parent.canonical_name(&current);
            }
        }
        current
    }

    /// Aliases registered locally for `name` (direct or transitive).
    pub fn aliases_of(&self, name: &str) -> Vec<String> {
        let store = self.store.read();
        store
            .aliases
            .keys()
            .filter(|alias| {
                let mut current = alias.as_str();
                for _ in 0..store.aliases.len() {
                    match store.aliases.get(current) {
                        Some(next) => current = next,
                        None => break,
                    }
                }
                current == name
            })
            .cloned()
            .collect()
    }

    pub fn contains_local(&self, name: &str) -> bool {
        self.store.read().definitions.contains_key(name)
    }

    /// Whether `name` (after alias resolution) is known here or in any
    /// ancestor store.
    pub fn contains(&self, name: &str) -> bool {
        let canonical = self.canonical_name(name);
        self.contains_local(&canonical)
            || self
                .parent
                .as_ref()
                .is_some_and(|p| p.contains(&canonical))
    }

    pub fn definition(&self, name: &str) -> Result<ComponentDefinition, CoreError> {
        self.store
            .read()
            .definitions
            .get(name)
            .cloned()
            .ok_or_else(|| CoreError::DefinitionNotFound(name.to_string()))
    }

    /// Locally registered names in registration order.
    pub fn names(&self) -> Vec<String> {
        self.store.read().order.clone()
    }

    pub fn len(&self) -> usize {
        self.store.read().definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.read().definitions.is_empty()
    }

    /// Local names followed by ancestor names not shadowed locally.
    pub fn names_including_ancestors(&self) -> Vec<String> {
        let mut names = self.names();
        if let Some(parent) = &self.parent {
            for name in parent.names_including_ancestors() {
                if !names.contains(&name) {
                    names.push(name);
                }
            }
        }
        names
    }

    /// Collapse the inheritance chain for `name` into a merged definition.
    ///
    /// A definition whose parent has the same name is resolved against the
    /// ancestor store only, which is how a child store specializes a
    /// definition it inherits. Unknown local names fall through to the
    /// parent store wholesale.
    pub fn merged(&self, name: &str) -> Result<MergedDefinition, CoreError> {
        let canonical = self.canonical_name(name);
        let local = self.store.read().definitions.get(&canonical).cloned();
        match local {
            Some(def) => self.merge(&canonical, &def),
            None => match &self.parent {
                Some(parent) => parent.merged(&canonical),
                None => Err(CoreError::DefinitionNotFound(canonical)),
            },
        }
    }

    fn merge(&self, name: &str, def: &ComponentDefinition) -> Result<MergedDefinition, CoreError> {
        let Some(parent_name) = def.parent_name() else {
            return MergedDefinition::new(name, def.clone());
        };
        let parent_canonical = self.canonical_name(parent_name);
        let base = if parent_canonical == name {
            let ancestor = self.parent.as_ref().ok_or_else(|| CoreError::StoreInconsistency {
                name: name.to_string(),
                message: "definition names itself as parent but no ancestor store exists".into(),
            })?;
            ancestor.merged(&parent_canonical)?
        } else {
            self.merged(&parent_canonical)?
        };
        let mut merged = base.into_definition();
        merged.override_from(def);
        MergedDefinition::new(name, merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::Scope;
    use crate::value::Value;

    #[test]
    fn merge_collapses_chain_without_touching_store() {
        let registry = DefinitionRegistry::new();
        registry
            .register(
                "template",
                ComponentDefinition::of("DataSource")
                    .abstract_template()
                    .prop("pool", Value::Int(4))
                    .prop("url", Value::str("jdbc:default")),
            )
            .unwrap();
        registry
            .register(
                "primary",
                ComponentDefinition::child_of("template").prop("url", Value::str("jdbc:primary")),
            )
            .unwrap();

        let merged = registry.merged("primary").unwrap();
        assert_eq!(merged.type_name(), "DataSource");
        assert!(!merged.is_abstract());
        assert_eq!(merged.property_values().get("pool"), Some(&Value::Int(4)));
        assert_eq!(
            merged.property_values().get("url"),
            Some(&Value::str("jdbc:primary"))
        );

        // Stored definitions are untouched and re-merging is idempotent.
        assert!(registry.definition("template").unwrap().is_abstract());
        assert!(registry.definition("primary").unwrap().parent_name().is_some());
        assert_eq!(registry.merged("primary").unwrap(), merged);
    }

    #[test]
    fn same_name_parent_resolves_in_ancestor_store_only() {
        let parent = Arc::new(DefinitionRegistry::new());
        parent
            .register(
                "mailer",
                ComponentDefinition::of("Mailer").prop("host", Value::str("mx.corp")),
            )
            .unwrap();
        let child = DefinitionRegistry::with_parent(parent);
        child
            .register(
                "mailer",
                ComponentDefinition::child_of("mailer").prop("port", Value::Int(2525)),
            )
            .unwrap();

        let merged = child.merged("mailer").unwrap();
        assert_eq!(merged.type_name(), "Mailer");
        assert_eq!(merged.property_values().get("host"), Some(&Value::str("mx.corp")));
        assert_eq!(merged.property_values().get("port"), Some(&Value::Int(2525)));

        // Without an ancestor store the self-parent is unresolvable.
        let orphan = DefinitionRegistry::new();
        orphan
            .register("mailer", ComponentDefinition::child_of("mailer"))
            .unwrap();
        assert!(orphan.merged("mailer").is_err());
    }

    #[test]
    fn lookup_falls_through_to_parent() {
        let parent = Arc::new(DefinitionRegistry::new());
        parent
            .register("shared", ComponentDefinition::of("Clock"))
            .unwrap();
        let child = DefinitionRegistry::with_parent(parent);

        assert!(child.contains("shared"));
        assert!(!child.contains_local("shared"));
        assert_eq!(child.merged("shared").unwrap().type_name(), "Clock");
        assert_eq!(child.names_including_ancestors(), vec!["shared".to_string()]);
    }

    #[test]
    fn alias_chain_and_collision() {
        let registry = DefinitionRegistry::new();
        registry
            .register("dataSource", ComponentDefinition::of("DataSource"))
            .unwrap();
        registry.register_alias("dataSource", "ds").unwrap();
        registry.register_alias("ds", "db").unwrap();

        assert_eq!(registry.canonical_name("db"), "dataSource");
        let mut aliases = registry.aliases_of("dataSource");
        aliases.sort();
        assert_eq!(aliases, vec!["db".to_string(), "ds".to_string()]);

        // Re-registering the same mapping is fine; repointing is not.
        registry.register_alias("dataSource", "ds").unwrap();
        registry
            .register("other", ComponentDefinition::of("Other"))
            .unwrap();
        assert!(registry.register_alias("other", "ds").is_err());
    }

    #[test]
    fn overriding_can_be_disabled() {
        let registry = DefinitionRegistry::new();
        registry
            .register("svc", ComponentDefinition::of("ServiceA"))
            .unwrap();
        let replaced = registry
            .register("svc", ComponentDefinition::of("ServiceB").prototype())
            .unwrap();
        assert!(replaced.is_some());
        assert_eq!(registry.merged("svc").unwrap().scope(), Scope::Prototype);

        registry.set_allow_overriding(false);
        assert!(registry
            .register("svc", ComponentDefinition::of("ServiceC"))
            .is_err());
        // Order keeps one entry per name across overrides.
        assert_eq!(registry.names(), vec!["svc".to_string()]);
    }
}
