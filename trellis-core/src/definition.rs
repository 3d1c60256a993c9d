//! The in-memory definition model.
//!
//! A [`ComponentDefinition`] declares how to build and configure one named
//! component: target type, scope, constructor arguments, property values,
//! lifecycle method names and wiring mode. Definitions come in two forms:
//! *root* form (carries a target type, fully self-contained) and *child*
//! form (names a parent definition whose settings it inherits and
//! overrides). The merger in [`crate::registry`] collapses a child chain
//! into a [`MergedDefinition`], an immutable fully-resolved copy.

use std::collections::BTreeMap;

use crate::error::CoreError;
use crate::types::TypeDescriptor;
use crate::value::{TypeKey, Value};

/// Whether one shared instance is kept per container, or a fresh instance
/// is produced per request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Scope {
    #[default]
    Singleton,
    Prototype,
}

/// Wiring mode for dependencies the definition does not set explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AutowireMode {
    /// No autowiring; only declared values are applied.
    #[default]
    No,
    /// Unset component-typed properties are wired to components with the
    /// same name, when one exists.
    ByName,
    /// Unset component-typed properties are wired when exactly one
    /// registered component satisfies the property type.
    ByType,
    /// Constructor parameters without declared values are wired by type.
    Constructor,
    /// `ByType` when the target type has a no-argument constructor,
    /// `Constructor` otherwise.
    AutoDetect,
}

/// Policy applied after autowiring: which still-unset writable properties
/// constitute an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DependencyCheck {
    #[default]
    None,
    /// Component-typed properties must be set.
    Objects,
    /// Simple-typed properties must be set.
    Simple,
    /// Every writable property must be set.
    All,
}

/// A single named property assignment.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyValue {
    pub name: String,
    pub value: Value,
}

/// Ordered set of property assignments; adding a value for an existing name
/// replaces it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PropertyValues {
    values: Vec<PropertyValue>,
}

impl PropertyValues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, name: impl Into<String>, value: Value) {
        let name = name.into();
        if let Some(existing) = self.values.iter_mut().find(|pv| pv.name == name) {
            existing.value = value;
        } else {
            self.values.push(PropertyValue { name, value });
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.iter().any(|pv| pv.name == name)
    }

    /// Whether any entry addresses `root` either directly or through an
    /// indexed/keyed path such as `root[0]`.
    pub fn contains_root(&self, root: &str) -> bool {
        self.values.iter().any(|pv| {
            pv.name == root
                || (pv.name.starts_with(root) && pv.name[root.len()..].starts_with('['))
        })
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values
            .iter()
            .find(|pv| pv.name == name)
            .map(|pv| &pv.value)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PropertyValue> {
        self.values.iter()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Union with `other`; entries from `other` win on name collision.
    pub fn merge_from(&mut self, other: &PropertyValues) {
        for pv in &other.values {
            self.add(pv.name.clone(), pv.value.clone());
        }
    }
}

/// A declared constructor/factory-method argument, optionally annotated
/// with the parameter type it is intended for.
#[derive(Debug, Clone, PartialEq)]
pub struct ArgValue {
    pub value: Value,
    pub declared_type: Option<TypeKey>,
}

/// Constructor argument specification: values bound to an explicit
/// parameter index, plus generic values matched to parameters by
/// assignability.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConstructorArgs {
    indexed: BTreeMap<usize, ArgValue>,
    generic: Vec<ArgValue>,
}

impl ConstructorArgs {
    pub fn add_indexed(&mut self, index: usize, value: Value, declared_type: Option<TypeKey>) {
        self.indexed.insert(
            index,
            ArgValue {
                value,
                declared_type,
            },
        );
    }

    pub fn add_generic(&mut self, value: Value, declared_type: Option<TypeKey>) {
        self.generic.push(ArgValue {
            value,
            declared_type,
        });
    }

    pub fn indexed(&self) -> &BTreeMap<usize, ArgValue> {
        &self.indexed
    }

    pub fn generic(&self) -> &[ArgValue] {
        &self.generic
    }

    pub fn count(&self) -> usize {
        self.indexed.len() + self.generic.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indexed.is_empty() && self.generic.is_empty()
    }

    /// Union with `other`; indexed entries from `other` replace entries at
    /// the same index, generic entries are appended.
    pub fn merge_from(&mut self, other: &ConstructorArgs) {
        for (index, arg) in &other.indexed {
            self.indexed.insert(*index, arg.clone());
        }
        self.generic.extend(other.generic.iter().cloned());
    }
}

/// Declarative description of how to build and configure one named
/// component. Produced by an external definition source; consumed by the
/// merger and the lifecycle orchestrator.
#[derive(Debug, Clone, PartialEq)]
pub struct ComponentDefinition {
    type_name: Option<&'static str>,
    parent: Option<String>,
    abstract_flag: bool,
    scope: Option<Scope>,
    lazy_init: Option<bool>,
    constructor_args: ConstructorArgs,
    property_values: PropertyValues,
    init_method: Option<String>,
    destroy_method: Option<String>,
    factory_method: Option<String>,
    factory_component: Option<String>,
    autowire: AutowireMode,
    dependency_check: DependencyCheck,
    depends_on: Vec<String>,
    origin: Option<String>,
}

impl ComponentDefinition {
    /// Root-form definition for the given target type.
    pub fn of(type_name: &'static str) -> Self {
        Self {
            type_name: Some(type_name),
            parent: None,
            abstract_flag: false,
            scope: None,
            lazy_init: None,
            constructor_args: ConstructorArgs::default(),
            property_values: PropertyValues::default(),
            init_method: None,
            destroy_method: None,
            factory_method: None,
            factory_component: None,
            autowire: AutowireMode::No,
            dependency_check: DependencyCheck::None,
            depends_on: Vec::new(),
            origin: None,
        }
    }

    /// Child-form definition inheriting from the named parent definition.
    pub fn child_of(parent: impl Into<String>) -> Self {
        let mut def = Self::of("");
        def.type_name = None;
        def.parent = Some(parent.into());
        def
    }

    pub fn with_type(mut self, type_name: &'static str) -> Self {
        self.type_name = Some(type_name);
        self
    }

    pub fn prototype(mut self) -> Self {
        self.scope = Some(Scope::Prototype);
        self
    }

    pub fn singleton(mut self) -> Self {
        self.scope = Some(Scope::Singleton);
        self
    }

    pub fn lazy(mut self) -> Self {
        self.lazy_init = Some(true);
        self
    }

    /// Mark this definition as a pure template: mergeable into children but
    /// never instantiated itself.
    pub fn abstract_template(mut self) -> Self {
        self.abstract_flag = true;
        self
    }

    pub fn prop(mut self, name: impl Into<String>, value: Value) -> Self {
        self.property_values.add(name, value);
        self
    }

    pub fn prop_ref(mut self, name: impl Into<String>, target: impl Into<String>) -> Self {
        self.property_values.add(name, Value::Ref(target.into()));
        self
    }

    pub fn ctor(mut self, value: Value) -> Self {
        self.constructor_args.add_generic(value, None);
        self
    }

    pub fn ctor_typed(mut self, value: Value, declared_type: TypeKey) -> Self {
        self.constructor_args.add_generic(value, Some(declared_type));
        self
    }

    pub fn ctor_at(mut self, index: usize, value: Value) -> Self {
        self.constructor_args.add_indexed(index, value, None);
        self
    }

    pub fn autowire(mut self, mode: AutowireMode) -> Self {
        self.autowire = mode;
        self
    }

    pub fn dependency_check(mut self, check: DependencyCheck) -> Self {
        self.dependency_check = check;
        self
    }

    pub fn depends_on<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn init_method(mut self, name: impl Into<String>) -> Self {
        self.init_method = Some(name.into());
        self
    }

    pub fn destroy_method(mut self, name: impl Into<String>) -> Self {
        self.destroy_method = Some(name.into());
        self
    }

    pub fn factory_method(mut self, name: impl Into<String>) -> Self {
        self.factory_method = Some(name.into());
        self
    }

    pub fn factory_component(mut self, name: impl Into<String>) -> Self {
        self.factory_component = Some(name.into());
        self
    }

    /// Human-readable origin descriptor (file, line, test name) carried
    /// into error messages.
    pub fn origin(mut self, descriptor: impl Into<String>) -> Self {
        self.origin = Some(descriptor.into());
        self
    }

    // Accessors.

    pub fn type_name(&self) -> Option<&'static str> {
        self.type_name
    }

    pub fn parent_name(&self) -> Option<&str> {
        self.parent.as_deref()
    }

    pub fn is_abstract(&self) -> bool {
        self.abstract_flag
    }

    pub fn scope(&self) -> Scope {
        self.scope.unwrap_or_default()
    }

    pub fn is_singleton(&self) -> bool {
        self.scope() == Scope::Singleton
    }

    pub fn is_lazy(&self) -> bool {
        self.lazy_init.unwrap_or(false)
    }

    pub fn constructor_args(&self) -> &ConstructorArgs {
        &self.constructor_args
    }

    pub fn property_values(&self) -> &PropertyValues {
        &self.property_values
    }

    pub fn init_method_name(&self) -> Option<&str> {
        self.init_method.as_deref()
    }

    pub fn destroy_method_name(&self) -> Option<&str> {
        self.destroy_method.as_deref()
    }

    pub fn factory_method_name(&self) -> Option<&str> {
        self.factory_method.as_deref()
    }

    pub fn factory_component_name(&self) -> Option<&str> {
        self.factory_component.as_deref()
    }

    pub fn autowire_mode(&self) -> AutowireMode {
        self.autowire
    }

    pub fn dependency_check_mode(&self) -> DependencyCheck {
        self.dependency_check
    }

    pub fn depends_on_names(&self) -> &[String] {
        &self.depends_on
    }

    pub fn origin_descriptor(&self) -> Option<&str> {
        self.origin.as_deref()
    }

    /// Structural validation performed at registration time.
    pub fn validate(&self, name: &str) -> Result<(), CoreError> {
        if self.lazy_init == Some(true) && self.scope() == Scope::Prototype {
            return Err(CoreError::StoreInconsistency {
                name: name.to_string(),
                message: "lazy initialization is applicable only to singleton components".into(),
            });
        }
        Ok(())
    }

    /// Apply a child definition's overrides onto `self` (which must be a
    /// fully-resolved copy of the parent). Explicitly-set child settings
    /// replace; constructor arguments and properties are unioned with the
    /// child winning per index/name; init/destroy/factory names and
    /// `depends-on` only replace when present on the child.
    pub(crate) fn override_from(&mut self, child: &ComponentDefinition) {
        if child.type_name.is_some() {
            self.type_name = child.type_name;
        }
        if child.scope.is_some() {
            self.scope = child.scope;
        }
        if child.lazy_init.is_some() {
            self.lazy_init = child.lazy_init;
        }
        self.abstract_flag = child.abstract_flag;
        self.constructor_args.merge_from(&child.constructor_args);
        self.property_values.merge_from(&child.property_values);
        if child.init_method.is_some() {
            self.init_method = child.init_method.clone();
        }
        if child.destroy_method.is_some() {
            self.destroy_method = child.destroy_method.clone();
        }
        if child.factory_method.is_some() {
            self.factory_method = child.factory_method.clone();
        }
        if child.factory_component.is_some() {
            self.factory_component = child.factory_component.clone();
        }
        self.autowire = child.autowire;
        self.dependency_check = child.dependency_check;
        if !child.depends_on.is_empty() {
            self.depends_on = child.depends_on.clone();
        }
        if child.origin.is_some() {
            self.origin = child.origin.clone();
        }
        self.parent = None;
    }
}

/// A fully materialized definition: the inheritance chain has been
/// collapsed and the target type is known. Never mutated after creation.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedDefinition {
    def: ComponentDefinition,
    type_name: &'static str,
}

impl MergedDefinition {
    pub(crate) fn new(name: &str, def: ComponentDefinition) -> Result<Self, CoreError> {
        match def.type_name {
            Some(type_name) if !type_name.is_empty() => Ok(Self { def, type_name }),
            _ => Err(CoreError::StoreInconsistency {
                name: name.to_string(),
                message: "definition is neither root-form (with a target type) nor child-form"
                    .into(),
            }),
        }
    }

    pub(crate) fn into_definition(self) -> ComponentDefinition {
        self.def
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn is_abstract(&self) -> bool {
        self.def.is_abstract()
    }

    pub fn scope(&self) -> Scope {
        self.def.scope()
    }

    pub fn is_singleton(&self) -> bool {
        self.def.is_singleton()
    }

    pub fn is_lazy(&self) -> bool {
        self.def.is_lazy()
    }

    pub fn constructor_args(&self) -> &ConstructorArgs {
        self.def.constructor_args()
    }

    pub fn property_values(&self) -> &PropertyValues {
        self.def.property_values()
    }

    pub fn init_method_name(&self) -> Option<&str> {
        self.def.init_method_name()
    }

    pub fn destroy_method_name(&self) -> Option<&str> {
        self.def.destroy_method_name()
    }

    pub fn factory_method_name(&self) -> Option<&str> {
        self.def.factory_method_name()
    }

    pub fn factory_component_name(&self) -> Option<&str> {
        self.def.factory_component_name()
    }

    pub fn autowire_mode(&self) -> AutowireMode {
        self.def.autowire_mode()
    }

    pub fn dependency_check_mode(&self) -> DependencyCheck {
        self.def.dependency_check_mode()
    }

    pub fn depends_on_names(&self) -> &[String] {
        self.def.depends_on_names()
    }

    pub fn origin_descriptor(&self) -> Option<&str> {
        self.def.origin_descriptor()
    }

    /// `AutoDetect` resolves against the target type: setter wiring when a
    /// no-argument constructor exists, constructor wiring otherwise.
    pub fn resolved_autowire_mode(&self, descriptor: &TypeDescriptor) -> AutowireMode {
        match self.def.autowire_mode() {
            AutowireMode::AutoDetect => {
                if descriptor.has_no_arg_constructor() {
                    AutowireMode::ByType
                } else {
                    AutowireMode::Constructor
                }
            }
            mode => mode,
        }
    }
}
