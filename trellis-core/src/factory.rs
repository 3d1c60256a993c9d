//! The container: definition lookup, creation, wiring and teardown.
//!
//! [`ComponentFactory`] ties the pieces together. A request for a named
//! component merges its definition chain, instantiates the target type
//! through a constructor or factory method, applies declared and autowired
//! property values, runs the initialization protocol and, for singletons,
//! registers teardown callbacks. Factories form a chain: lookups fall
//! through to the parent factory when a name has no local definition.

use std::cell::RefCell;
use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info, trace, warn};

use crate::autowire::{match_slot, viable_arities, ArgUsage, SlotMatch, WEIGHT_ASSIGNABLE};
use crate::convert::{split_indexed, Converter, ConverterRegistry, PathKey};
use crate::definition::{
    AutowireMode, ComponentDefinition, DependencyCheck, MergedDefinition, PropertyValues,
};
use crate::error::{CoreError, PropertyFailure};
use crate::instantiate::{InstantiationStrategy, SimpleInstantiationStrategy};
use crate::processor::ComponentPostProcessor;
use crate::registry::DefinitionRegistry;
use crate::singleton::SingletonRegistry;
use crate::types::{ComponentCell, ComponentRef, TypeDescriptor, TypeRegistry};
use crate::value::{Resolved, TypeKey, Value};

thread_local! {
    static PROTOTYPES_IN_CREATION: RefCell<HashSet<String>> = RefCell::new(HashSet::new());
}

/// One selected constructor or factory-method overload with its resolved
/// arguments.
struct ResolvedCall {
    index: usize,
    args: Vec<Resolved>,
    wired: Vec<String>,
}

pub struct ComponentFactory {
    parent: Option<Arc<ComponentFactory>>,
    definitions: Arc<DefinitionRegistry>,
    types: Arc<TypeRegistry>,
    singletons: SingletonRegistry,
    converters: RwLock<ConverterRegistry>,
    processors: RwLock<Vec<Arc<dyn ComponentPostProcessor>>>,
    ignored_types: RwLock<HashSet<&'static str>>,
    strategy: Box<dyn InstantiationStrategy>,
}

impl Default for ComponentFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl ComponentFactory {
    pub fn new() -> Self {
        Self {
            parent: None,
            definitions: Arc::new(DefinitionRegistry::new()),
            types: Arc::new(TypeRegistry::new()),
            singletons: SingletonRegistry::new(),
            converters: RwLock::new(ConverterRegistry::new()),
            processors: RwLock::new(Vec::new()),
            ignored_types: RwLock::new(HashSet::new()),
            strategy: Box::new(SimpleInstantiationStrategy),
        }
    }

    /// A child factory: local definitions shadow the parent's, lookups for
    /// unknown names fall through. Type descriptors are shared.
    pub fn with_parent(parent: Arc<ComponentFactory>) -> Self {
        Self {
            definitions: Arc::new(DefinitionRegistry::with_parent(parent.definitions.clone())),
            types: parent.types.clone(),
            parent: Some(parent),
            singletons: SingletonRegistry::new(),
            converters: RwLock::new(ConverterRegistry::new()),
            processors: RwLock::new(Vec::new()),
            ignored_types: RwLock::new(HashSet::new()),
            strategy: Box::new(SimpleInstantiationStrategy),
        }
    }

    pub fn parent(&self) -> Option<&Arc<ComponentFactory>> {
        self.parent.as_ref()
    }

    // --- registration -----------------------------------------------------

    pub fn register_type(&self, descriptor: TypeDescriptor) {
        self.types.register(descriptor);
    }

    /// Register a definition. Replacing an existing definition destroys any
    /// singleton already built from it, so the next request observes the
    /// new definition.
    pub fn register_definition(
        &self,
        name: impl Into<String>,
        definition: ComponentDefinition,
    ) -> Result<(), CoreError> {
        let name = name.into();
        let replaced = self.definitions.register(name.clone(), definition)?;
        if replaced.is_some() && self.singletons.contains(&name) {
            debug!(component = %name, "evicting singleton built from replaced definition");
            self.singletons.destroy_singleton(&name);
        }
        Ok(())
    }

    pub fn set_allow_definition_overriding(&self, allow: bool) {
        self.definitions.set_allow_overriding(allow);
    }

    pub fn register_alias(
        &self,
        name: impl Into<String>,
        alias: impl Into<String>,
    ) -> Result<(), CoreError> {
        self.definitions.register_alias(name, alias)
    }

    pub fn aliases_of(&self, name: &str) -> Vec<String> {
        self.definitions.aliases_of(name)
    }

    /// Register a ready-made instance as a singleton, outside the normal
    /// creation path. It participates in lookups and by-type matching but
    /// receives no lifecycle callbacks.
    pub fn register_singleton(
        &self,
        name: impl Into<String>,
        instance: ComponentRef,
    ) -> Result<(), CoreError> {
        self.singletons.add(name, instance)
    }

    pub fn add_post_processor(&self, processor: Arc<dyn ComponentPostProcessor>) {
        self.processors.write().push(processor);
    }

    pub fn register_converter_for_type(&self, target: TypeKey, converter: Arc<dyn Converter>) {
        self.converters.write().register_for_type(target, converter);
    }

    /// Register a converter for one `TypeName.property` path.
    pub fn register_converter_for_path(
        &self,
        path: impl Into<String>,
        converter: Arc<dyn Converter>,
    ) {
        self.converters.write().register_for_path(path, converter);
    }

    /// Exclude a component type key from by-type autowiring. Used for
    /// infrastructure interfaces that many components implement without
    /// wanting them injected.
    pub fn ignore_dependency_type(&self, key: &'static str) {
        self.ignored_types.write().insert(key);
    }

    // --- introspection ----------------------------------------------------

    pub fn contains_definition(&self, name: &str) -> bool {
        self.definitions.contains(name)
    }

    pub fn definition_names(&self) -> Vec<String> {
        self.definitions.names()
    }

    pub fn singleton_names(&self) -> Vec<String> {
        self.singletons.names()
    }

    pub fn singleton_count(&self) -> usize {
        self.singletons.count()
    }

    /// Whether `name` resolves to a definition or a manually registered
    /// singleton, here or in an ancestor factory.
    pub fn contains_component(&self, name: &str) -> bool {
        let canonical = self.definitions.canonical_name(name);
        self.singletons.contains(&canonical)
            || self.definitions.contains(&canonical)
            || self
                .parent
                .as_ref()
                .is_some_and(|p| p.contains_component(&canonical))
    }

    pub fn is_singleton_scoped(&self, name: &str) -> Result<bool, CoreError> {
        let canonical = self.definitions.canonical_name(name);
        if self.definitions.contains_local(&canonical) {
            return Ok(self.definitions.merged(&canonical)?.is_singleton());
        }
        if let Some(parent) = &self.parent {
            if parent.contains_component(&canonical) {
                return parent.is_singleton_scoped(&canonical);
            }
        }
        if self.singletons.contains(&canonical) {
            return Ok(true);
        }
        Err(CoreError::DefinitionNotFound(canonical))
    }

    /// The target type key of `name`, without creating it.
    pub fn component_type(&self, name: &str) -> Result<&'static str, CoreError> {
        let canonical = self.definitions.canonical_name(name);
        if self.definitions.contains_local(&canonical) {
            return Ok(self.definitions.merged(&canonical)?.type_name());
        }
        if let Some(cell) = self.singletons.get(&canonical) {
            return Ok(cell.type_name());
        }
        if let Some(parent) = &self.parent {
            return parent.component_type(&canonical);
        }
        Err(CoreError::DefinitionNotFound(canonical))
    }

    pub fn merged_definition(&self, name: &str) -> Result<MergedDefinition, CoreError> {
        self.definitions.merged(name)
    }

    /// Names of registered components whose type satisfies `required`,
    /// including ancestor definitions and manual singletons. Abstract
    /// templates are excluded; lazy singletons are included without being
    /// created.
    pub fn component_names_of_type(&self, required: &'static str) -> Vec<String> {
        self.component_names_matching(required, None)
    }

    /// Instances of every component satisfying `required`. Components that
    /// are mid-creation are skipped rather than failing the whole query.
    pub fn components_of_type(
        &self,
        required: &'static str,
    ) -> Result<Vec<(String, ComponentRef)>, CoreError> {
        let mut out = Vec::new();
        for name in self.component_names_matching(required, None) {
            match self.get_component(&name) {
                Ok(component) => out.push((name, component)),
                Err(e) if e.involves_in_creation() => {
                    trace!(component = %name, "skipping in-creation component in by-type query");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(out)
    }

    // --- retrieval --------------------------------------------------------

    /// The component registered under `name` (or an alias of it), creating
    /// it first if necessary. Singletons are cached; prototypes are built
    /// fresh per call.
    pub fn get_component(&self, name: &str) -> Result<ComponentRef, CoreError> {
        let canonical = self.definitions.canonical_name(name);
        if let Some(existing) = self.singletons.get(&canonical) {
            return Ok(existing);
        }
        if !self.definitions.contains_local(&canonical) {
            if let Some(parent) = &self.parent {
                return parent.get_component(&canonical);
            }
        }
        let merged = self.definitions.merged(&canonical)?;
        if merged.is_abstract() {
            return Err(CoreError::AbstractDefinition(canonical));
        }
        if merged.is_singleton() {
            self.singletons
                .get_or_create(&canonical, || self.create_component(&canonical, &merged, true))
        } else {
            let first_entry = PROTOTYPES_IN_CREATION
                .with(|set| set.borrow_mut().insert(canonical.clone()));
            if !first_entry {
                return Err(CoreError::CurrentlyInCreation(canonical));
            }
            let result = self.create_component(&canonical, &merged, false);
            PROTOTYPES_IN_CREATION.with(|set| {
                set.borrow_mut().remove(&canonical);
            });
            result
        }
    }

    /// Like [`get_component`](Self::get_component), additionally checking
    /// that the instance satisfies the `required` type key.
    pub fn get_component_typed(
        &self,
        name: &str,
        required: &'static str,
    ) -> Result<ComponentRef, CoreError> {
        let component = self.get_component(name)?;
        if self
            .types
            .is_assignable(component.type_name(), TypeKey::Component(required))
        {
            Ok(component)
        } else {
            Err(CoreError::TypeMismatch {
                name: name.to_string(),
                required: required.to_string(),
                actual: component.type_name().to_string(),
            })
        }
    }

    // --- lifecycle --------------------------------------------------------

    /// Eagerly create every non-lazy singleton, in registration order. On
    /// failure all singletons created so far are destroyed before the error
    /// is returned, so the factory is never left half-started.
    pub fn pre_instantiate_singletons(&self) -> Result<(), CoreError> {
        let names = self.definitions.names();
        info!(definitions = names.len(), "pre-instantiating singletons");
        for name in names {
            let merged = self.definitions.merged(&name)?;
            if merged.is_abstract() || !merged.is_singleton() || merged.is_lazy() {
                continue;
            }
            if let Err(e) = self.get_component(&name) {
                warn!(component = %name, error = %e, "pre-instantiation failed, rolling back");
                self.destroy_singletons();
                return Err(e);
            }
        }
        Ok(())
    }

    /// Destroy all cached singletons: dependents before their dependencies,
    /// otherwise newest first. Disposal failures are logged, not raised.
    pub fn destroy_singletons(&self) {
        let destroyed = self.singletons.destroy_all();
        info!(singletons = destroyed, "destroyed singletons");
    }

    // --- creation ---------------------------------------------------------

    fn create_component(
        &self,
        name: &str,
        merged: &MergedDefinition,
        allow_eager: bool,
    ) -> Result<ComponentRef, CoreError> {
        debug!(component = name, type_name = merged.type_name(), "creating component");
        for dep in merged.depends_on_names() {
            self.singletons.register_dependent(dep, name);
            self.get_component(dep).map_err(|e| CoreError::UnsatisfiedDependency {
                name: name.to_string(),
                at: format!("depends-on '{dep}'"),
                message: "declared dependency could not be created".into(),
                source: Some(Box::new(e)),
            })?;
        }
        let descriptor = self.types.descriptor(merged.type_name())?;

        let cell = self.instantiate_component(name, merged, &descriptor)?;
        if allow_eager {
            // Expose the unpopulated handle so reference cycles back to
            // this component resolve to the same instance.
            self.singletons.store_partial(name, cell.clone());
        }
        self.populate(name, merged, &descriptor, &cell)?;
        let cell = self.initialize(name, merged, &descriptor, cell)?;
        if merged.is_singleton() {
            self.register_disposal(name, merged, &descriptor, &cell);
        }
        Ok(cell)
    }

    fn instantiate_component(
        &self,
        name: &str,
        merged: &MergedDefinition,
        descriptor: &TypeDescriptor,
    ) -> Result<ComponentRef, CoreError> {
        let autowiring = matches!(
            merged.resolved_autowire_mode(descriptor),
            AutowireMode::Constructor
        );

        if let Some(method_name) = merged.factory_method_name() {
            return self.instantiate_with_factory_method(name, merged, descriptor, method_name, autowiring);
        }

        let args = merged.constructor_args();
        let instance = if args.is_empty() && !autowiring {
            let constructor = descriptor.no_arg_constructor().ok_or_else(|| {
                CoreError::InstantiationFailed {
                    name: name.to_string(),
                    message: format!(
                        "type '{}' has no no-argument constructor and the definition declares no constructor arguments",
                        merged.type_name()
                    ),
                    source: None,
                }
            })?;
            self.strategy.instantiate(name, merged, constructor, &[])?
        } else {
            let param_sets: Vec<(usize, Vec<TypeKey>)> = descriptor
                .constructors()
                .iter()
                .enumerate()
                .map(|(i, c)| (i, c.params().to_vec()))
                .collect();
            let call = self.select_overload(name, merged, &param_sets, autowiring)?;
            for dep in &call.wired {
                self.singletons.register_dependent(dep, name);
            }
            self.strategy.instantiate(
                name,
                merged,
                &descriptor.constructors()[call.index],
                &call.args,
            )?
        };
        Ok(ComponentCell::new(merged.type_name(), instance))
    }

    fn instantiate_with_factory_method(
        &self,
        name: &str,
        merged: &MergedDefinition,
        descriptor: &TypeDescriptor,
        method_name: &str,
        autowiring: bool,
    ) -> Result<ComponentRef, CoreError> {
        let (factory, owner) = match merged.factory_component_name() {
            Some(factory_name) => {
                let factory = self.get_component(factory_name).map_err(|e| {
                    CoreError::UnsatisfiedDependency {
                        name: name.to_string(),
                        at: format!("factory component '{factory_name}'"),
                        message: "factory component could not be created".into(),
                        source: Some(Box::new(e)),
                    }
                })?;
                self.singletons.register_dependent(factory_name, name);
                let owner = self.types.descriptor(factory.type_name())?;
                (Some(factory), owner)
            }
            None => (None, self.types.descriptor(merged.type_name())?),
        };

        let want_static = factory.is_none();
        let candidates: Vec<(usize, Vec<TypeKey>)> = owner
            .factory_methods()
            .iter()
            .enumerate()
            .filter(|(_, m)| m.name() == method_name && m.is_static() == want_static)
            .map(|(i, m)| (i, m.params().to_vec()))
            .collect();
        if candidates.is_empty() {
            return Err(CoreError::InstantiationFailed {
                name: name.to_string(),
                message: format!(
                    "no {} factory method '{method_name}' on type '{}'",
                    if want_static { "static" } else { "instance" },
                    owner.name()
                ),
                source: None,
            });
        }
        let call = self.select_overload(name, merged, &candidates, autowiring)?;
        for dep in &call.wired {
            self.singletons.register_dependent(dep, name);
        }
        let instance = self.strategy.instantiate_with_factory(
            name,
            merged,
            factory.as_ref(),
            &owner.factory_methods()[call.index],
            &call.args,
        )?;
        Ok(ComponentCell::new(merged.type_name(), instance))
    }

    /// Pick the overload to invoke: greediest arity first, then lowest
    /// total type-distance weight among same-arity candidates.
    fn select_overload(
        &self,
        name: &str,
        merged: &MergedDefinition,
        param_sets: &[(usize, Vec<TypeKey>)],
        autowiring: bool,
    ) -> Result<ResolvedCall, CoreError> {
        let args = merged.constructor_args();
        let arities = viable_arities(param_sets.iter().map(|(_, p)| p.len()), args);
        let mut last_failure: Option<CoreError> = None;

        for arity in arities {
            let mut best: Option<(ResolvedCall, u32)> = None;
            for (index, params) in param_sets.iter().filter(|(_, p)| p.len() == arity) {
                match self.try_overload(name, merged, *index, params, autowiring) {
                    Ok((call, weight)) => {
                        if best.as_ref().is_none_or(|(_, w)| weight < *w) {
                            best = Some((call, weight));
                        }
                    }
                    Err(e @ CoreError::AmbiguousDependency { .. }) => return Err(e),
                    Err(e) => last_failure = Some(e),
                }
            }
            if let Some((call, _)) = best {
                return Ok(call);
            }
        }

        // The last rejection names the candidate and the unmet slot, which
        // is the most useful diagnostic to surface.
        Err(last_failure.unwrap_or_else(|| CoreError::InstantiationFailed {
            name: name.to_string(),
            message: format!(
                "no constructor or factory method of type '{}' accepts the declared arguments",
                merged.type_name()
            ),
            source: None,
        }))
    }

    fn try_overload(
        &self,
        name: &str,
        merged: &MergedDefinition,
        index: usize,
        params: &[TypeKey],
        autowiring: bool,
    ) -> Result<(ResolvedCall, u32), CoreError> {
        let args = merged.constructor_args();
        let mut usage = ArgUsage::new(args);
        let mut resolved = Vec::with_capacity(params.len());
        let mut wired = Vec::new();
        let mut total_weight = 0u32;

        for (slot, &param) in params.iter().enumerate() {
            let at = format!("parameter {slot}");
            match match_slot(slot, param, args, &mut usage, &self.types) {
                SlotMatch::Taken { arg, weight } => {
                    let mut deps = Vec::new();
                    let value = self
                        .resolve_value(name, &at, &arg.value, &mut deps)
                        .and_then(|v| self.convert_for(merged.type_name(), None, v, param))
                        .map_err(|e| CoreError::UnsatisfiedDependency {
                            name: name.to_string(),
                            at: at.clone(),
                            message: format!("declared value does not fit parameter type {param}"),
                            source: Some(Box::new(e)),
                        })?;
                    total_weight += weight;
                    resolved.push(value);
                    wired.extend(deps);
                }
                SlotMatch::Open => {
                    let TypeKey::Component(required) = param else {
                        return Err(CoreError::UnsatisfiedDependency {
                            name: name.to_string(),
                            at,
                            message: format!("no declared value for parameter type {param}"),
                            source: None,
                        });
                    };
                    if !autowiring || self.ignored_types.read().contains(required) {
                        return Err(CoreError::UnsatisfiedDependency {
                            name: name.to_string(),
                            at,
                            message: format!("no declared value for parameter type {param}"),
                            source: None,
                        });
                    }
                    let (value, dep) = self.autowire_slot(name, &at, required)?;
                    total_weight += WEIGHT_ASSIGNABLE;
                    resolved.push(value);
                    wired.push(dep);
                }
                SlotMatch::Reject => {
                    return Err(CoreError::UnsatisfiedDependency {
                        name: name.to_string(),
                        at,
                        message: "explicitly indexed value cannot satisfy parameter type".into(),
                        source: None,
                    });
                }
            }
        }

        if !usage.all_generics_consumed() {
            return Err(CoreError::UnsatisfiedDependency {
                name: name.to_string(),
                at: format!("arity {}", params.len()),
                message: "declared argument values left over after matching".into(),
                source: None,
            });
        }

        Ok((
            ResolvedCall {
                index,
                args: resolved,
                wired,
            },
            total_weight,
        ))
    }

    /// Fill one open constructor slot by type: exactly one candidate must
    /// satisfy it. More than one is a hard ambiguity error.
    fn autowire_slot(
        &self,
        name: &str,
        at: &str,
        required: &'static str,
    ) -> Result<(Resolved, String), CoreError> {
        let candidates = self.component_names_matching(required, Some(name));
        match candidates.len() {
            0 => Err(CoreError::UnsatisfiedDependency {
                name: name.to_string(),
                at: at.to_string(),
                message: format!("no component satisfies type '{required}'"),
                source: None,
            }),
            1 => {
                let dep = candidates.into_iter().next().unwrap_or_default();
                let component =
                    self.get_component(&dep)
                        .map_err(|e| CoreError::UnsatisfiedDependency {
                            name: name.to_string(),
                            at: at.to_string(),
                            message: format!("autowire candidate '{dep}' could not be created"),
                            source: Some(Box::new(e)),
                        })?;
                Ok((Resolved::Component(component), dep))
            }
            _ => Err(CoreError::AmbiguousDependency {
                name: name.to_string(),
                at: at.to_string(),
                candidates,
            }),
        }
    }

    // --- population -------------------------------------------------------

    fn populate(
        &self,
        name: &str,
        merged: &MergedDefinition,
        descriptor: &TypeDescriptor,
        cell: &ComponentRef,
    ) -> Result<(), CoreError> {
        let pvs = merged.property_values();
        let mode = merged.resolved_autowire_mode(descriptor);

        // (property name, component name) pairs added by autowiring.
        let mut autowired: Vec<(&'static str, String)> = Vec::new();
        match mode {
            AutowireMode::ByName => {
                for prop in descriptor.properties() {
                    let TypeKey::Component(required) = prop.key() else {
                        continue;
                    };
                    if pvs.contains_root(prop.name())
                        || self.ignored_types.read().contains(required)
                    {
                        continue;
                    }
                    if self.contains_component(prop.name()) {
                        trace!(component = name, property = prop.name(), "autowiring by name");
                        autowired.push((prop.name(), prop.name().to_string()));
                    }
                }
            }
            AutowireMode::ByType => {
                for prop in descriptor.properties() {
                    let TypeKey::Component(required) = prop.key() else {
                        continue;
                    };
                    if pvs.contains_root(prop.name())
                        || self.ignored_types.read().contains(required)
                    {
                        continue;
                    }
                    let matches = self.component_names_matching(required, Some(name));
                    match matches.len() {
                        0 => {}
                        1 => {
                            trace!(component = name, property = prop.name(), "autowiring by type");
                            autowired.push((
                                prop.name(),
                                matches.into_iter().next().unwrap_or_default(),
                            ));
                        }
                        _ => {
                            return Err(CoreError::AmbiguousDependency {
                                name: name.to_string(),
                                at: format!("property '{}'", prop.name()),
                                candidates: matches,
                            });
                        }
                    }
                }
            }
            _ => {}
        }

        self.check_dependencies(name, merged, descriptor, &autowired)?;

        let mut failures = Vec::new();
        let mut done_roots: HashSet<&str> = HashSet::new();
        for pv in pvs.iter() {
            let (root, key) = split_indexed(&pv.name);
            if !done_roots.insert(root) {
                continue;
            }
            let resolved = if key.is_none() || pvs.get(root).is_some() {
                // A direct assignment wins over indexed entries for the
                // same root.
                let value = pvs.get(root).unwrap_or(&pv.value);
                self.resolve_declared(name, root, value)
            } else {
                self.fold_indexed(name, root, pvs)
            };
            match resolved {
                Ok(value) => self.apply_property(descriptor, cell, root, value, &mut failures),
                Err(error) => failures.push(PropertyFailure {
                    property: root.to_string(),
                    error,
                }),
            }
        }

        for (prop_name, dep) in autowired {
            self.singletons.register_dependent(&dep, name);
            match self.get_component(&dep) {
                Ok(component) => self.apply_property(
                    descriptor,
                    cell,
                    prop_name,
                    Resolved::Component(component),
                    &mut failures,
                ),
                Err(e) => failures.push(PropertyFailure {
                    property: prop_name.to_string(),
                    error: CoreError::UnsatisfiedDependency {
                        name: name.to_string(),
                        at: format!("property '{prop_name}'"),
                        message: format!("autowire candidate '{dep}' could not be created"),
                        source: Some(Box::new(e)),
                    },
                }),
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(CoreError::PropertyAccess {
                name: name.to_string(),
                failures,
            })
        }
    }

    fn check_dependencies(
        &self,
        name: &str,
        merged: &MergedDefinition,
        descriptor: &TypeDescriptor,
        autowired: &[(&'static str, String)],
    ) -> Result<(), CoreError> {
        let check = merged.dependency_check_mode();
        if check == DependencyCheck::None {
            return Ok(());
        }
        let pvs = merged.property_values();
        for prop in descriptor.properties() {
            if pvs.contains_root(prop.name()) || autowired.iter().any(|(p, _)| *p == prop.name()) {
                continue;
            }
            if let TypeKey::Component(required) = prop.key() {
                if self.ignored_types.read().contains(required) {
                    continue;
                }
            }
            let applies = match check {
                DependencyCheck::Objects => !prop.key().is_simple(),
                DependencyCheck::Simple => prop.key().is_simple(),
                DependencyCheck::All => true,
                DependencyCheck::None => false,
            };
            if applies {
                return Err(CoreError::UnsatisfiedDependency {
                    name: name.to_string(),
                    at: format!("property '{}'", prop.name()),
                    message: "dependency check found no value for this property".into(),
                    source: None,
                });
            }
        }
        Ok(())
    }

    fn resolve_declared(&self, name: &str, at: &str, value: &Value) -> Result<Resolved, CoreError> {
        let mut deps = Vec::new();
        let resolved = self.resolve_value(name, at, value, &mut deps)?;
        for dep in deps {
            self.singletons.register_dependent(&dep, name);
        }
        Ok(resolved)
    }

    /// Collect `root[...]` entries into a single list or map value.
    fn fold_indexed(
        &self,
        name: &str,
        root: &str,
        pvs: &PropertyValues,
    ) -> Result<Resolved, CoreError> {
        let mut indexed: Vec<(usize, Resolved)> = Vec::new();
        let mut keyed: Vec<(String, Resolved)> = Vec::new();
        for pv in pvs.iter() {
            let (r, key) = split_indexed(&pv.name);
            if r != root {
                continue;
            }
            let Some(key) = key else { continue };
            let value = self.resolve_declared(name, &pv.name, &pv.value)?;
            match key {
                PathKey::Index(i) => indexed.push((i, value)),
                PathKey::Key(k) => keyed.push((k, value)),
            }
        }
        match (indexed.is_empty(), keyed.is_empty()) {
            (false, true) => {
                indexed.sort_by_key(|(i, _)| *i);
                Ok(Resolved::List(indexed.into_iter().map(|(_, v)| v).collect()))
            }
            (true, false) => Ok(Resolved::Map(keyed)),
            _ => Err(CoreError::Conversion {
                target: TypeKey::List,
                message: format!("property '{root}' mixes indexed and keyed entries"),
            }),
        }
    }

    fn apply_property(
        &self,
        descriptor: &TypeDescriptor,
        cell: &ComponentRef,
        property: &str,
        value: Resolved,
        failures: &mut Vec<PropertyFailure>,
    ) {
        let Some(spec) = descriptor.property_spec(property) else {
            failures.push(PropertyFailure {
                property: property.to_string(),
                error: CoreError::NotWritable {
                    type_name: descriptor.name().to_string(),
                    property: property.to_string(),
                },
            });
            return;
        };
        let converted =
            match self.convert_for(descriptor.name(), Some(property), value, spec.key()) {
                Ok(v) => v,
                Err(error) => {
                    failures.push(PropertyFailure {
                        property: property.to_string(),
                        error,
                    });
                    return;
                }
            };
        if let Err(error) = cell.with_raw_mut(|target| spec.set(target, converted)) {
            failures.push(PropertyFailure {
                property: property.to_string(),
                error,
            });
        }
    }

    /// Resolve a declared value: follow references, create inline nested
    /// definitions, recurse into collections. Names of components this
    /// resolution pulled in are appended to `deps`.
    fn resolve_value(
        &self,
        name: &str,
        at: &str,
        value: &Value,
        deps: &mut Vec<String>,
    ) -> Result<Resolved, CoreError> {
        match value {
            Value::Null => Ok(Resolved::Null),
            Value::Bool(b) => Ok(Resolved::Bool(*b)),
            Value::Int(i) => Ok(Resolved::Int(*i)),
            Value::Float(x) => Ok(Resolved::Float(*x)),
            Value::Str(s) => Ok(Resolved::Str(s.clone())),
            Value::Ref(target) => {
                deps.push(target.clone());
                self.get_component(target)
                    .map(Resolved::Component)
            }
            Value::Inner(def) => {
                let inner_name = format!("(inner component of '{name}' at {at})");
                let merged = self.merge_inline(&inner_name, def)?;
                if merged.is_abstract() {
                    return Err(CoreError::AbstractDefinition(inner_name));
                }
                let component = self.create_component(&inner_name, &merged, false)?;
                // Inline singletons of a singleton owner are torn down
                // with the owner.
                if merged.is_singleton() {
                    self.singletons.register_dependent(name, inner_name);
                }
                Ok(Resolved::Component(component))
            }
            Value::List(items) => {
                let mut out = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    out.push(self.resolve_value(name, &format!("{at}[{i}]"), item, deps)?);
                }
                Ok(Resolved::List(out))
            }
            Value::Map(entries) => {
                let mut out = Vec::with_capacity(entries.len());
                for (key, item) in entries {
                    out.push((
                        key.clone(),
                        self.resolve_value(name, &format!("{at}[{key}]"), item, deps)?,
                    ));
                }
                Ok(Resolved::Map(out))
            }
        }
    }

    fn merge_inline(
        &self,
        inner_name: &str,
        def: &ComponentDefinition,
    ) -> Result<MergedDefinition, CoreError> {
        match def.parent_name() {
            None => MergedDefinition::new(inner_name, def.clone()),
            Some(parent) => {
                let base = self.definitions.merged(parent)?;
                let mut merged = base.into_definition();
                merged.override_from(def);
                MergedDefinition::new(inner_name, merged)
            }
        }
    }

    /// Convert a resolved value for a parameter or property slot, also
    /// enforcing component assignability.
    fn convert_for(
        &self,
        type_name: &str,
        property: Option<&str>,
        value: Resolved,
        target: TypeKey,
    ) -> Result<Resolved, CoreError> {
        if let (TypeKey::Component(required), Resolved::Component(component)) = (target, &value) {
            return if self
                .types
                .is_assignable(component.type_name(), TypeKey::Component(required))
            {
                Ok(value)
            } else {
                Err(CoreError::Conversion {
                    target,
                    message: format!(
                        "component of type '{}' is not assignable to '{required}'",
                        component.type_name()
                    ),
                })
            };
        }
        self.converters.read().convert(type_name, property, value, target)
    }

    // --- initialization and teardown --------------------------------------

    fn initialize(
        &self,
        name: &str,
        merged: &MergedDefinition,
        descriptor: &TypeDescriptor,
        cell: ComponentRef,
    ) -> Result<ComponentRef, CoreError> {
        if let Some(bridge) = descriptor.name_aware_bridge() {
            cell.with_raw_mut(|target| bridge(target, name));
        }

        let processors: Vec<Arc<dyn ComponentPostProcessor>> =
            self.processors.read().iter().cloned().collect();

        let mut current = cell;
        for processor in &processors {
            current = processor
                .before_initialization(current, name)?
                .ok_or_else(|| CoreError::PostProcessing {
                    name: name.to_string(),
                    message: "post-processor returned no component before initialization".into(),
                })?;
        }

        if let Some(init) = descriptor.init_bridge() {
            current
                .with_raw_mut(|target| init(target))
                .map_err(|e| CoreError::InstantiationFailed {
                    name: name.to_string(),
                    message: "initialization callback failed".into(),
                    source: Some(Box::new(e)),
                })?;
        }
        if let Some(method_name) = merged.init_method_name() {
            let method =
                descriptor
                    .named_method(method_name)
                    .ok_or_else(|| CoreError::InitMethodNotFound {
                        name: name.to_string(),
                        method: method_name.to_string(),
                    })?;
            current
                .with_raw_mut(|target| method(target))
                .map_err(|e| CoreError::InstantiationFailed {
                    name: name.to_string(),
                    message: format!("init method '{method_name}' failed"),
                    source: Some(Box::new(e)),
                })?;
        }

        for processor in &processors {
            current = processor
                .after_initialization(current, name)?
                .ok_or_else(|| CoreError::PostProcessing {
                    name: name.to_string(),
                    message: "post-processor returned no component after initialization".into(),
                })?;
        }
        Ok(current)
    }

    /// Register the composite disposal action for a completed singleton:
    /// destruction-aware processors, the lifecycle callback, then the
    /// custom destroy method.
    fn register_disposal(
        &self,
        name: &str,
        merged: &MergedDefinition,
        descriptor: &TypeDescriptor,
        cell: &ComponentRef,
    ) {
        let dispose_bridge = descriptor.dispose_bridge();
        let custom = merged.destroy_method_name().and_then(|method_name| {
            let found = descriptor.named_method(method_name);
            if found.is_none() {
                warn!(
                    component = name,
                    method = method_name,
                    "destroy method not found, skipping"
                );
            }
            found
        });
        let aware: Vec<Arc<dyn ComponentPostProcessor>> = self
            .processors
            .read()
            .iter()
            .filter(|p| p.destruction_aware())
            .cloned()
            .collect();

        if dispose_bridge.is_none() && custom.is_none() && aware.is_empty() {
            return;
        }

        let cell = cell.clone();
        let owner = name.to_string();
        self.singletons.register_disposable(
            name,
            Box::new(move || {
                for processor in &aware {
                    processor.before_destruction(&cell, &owner);
                }
                let mut first_error = None;
                if let Some(bridge) = dispose_bridge {
                    if let Err(e) = cell.with_raw_mut(|target| bridge(target)) {
                        first_error = Some(e);
                    }
                }
                if let Some(method) = custom {
                    if let Err(e) = cell.with_raw_mut(|target| method(target)) {
                        first_error.get_or_insert(e);
                    }
                }
                match first_error {
                    Some(e) => Err(e),
                    None => Ok(()),
                }
            }),
        );
    }

    // --- by-type matching -------------------------------------------------

    fn component_names_matching(
        &self,
        required: &'static str,
        exclude: Option<&str>,
    ) -> Vec<String> {
        let mut out = Vec::new();
        for candidate in self.definitions.names_including_ancestors() {
            if exclude == Some(candidate.as_str()) {
                continue;
            }
            let Ok(merged) = self.definitions.merged(&candidate) else {
                continue;
            };
            if merged.is_abstract() {
                continue;
            }
            if self
                .types
                .is_assignable(merged.type_name(), TypeKey::Component(required))
            {
                out.push(candidate);
            }
        }
        // Manually registered singletons, here and up the chain.
        let mut factory: &ComponentFactory = self;
        loop {
            for candidate in factory.singletons.names() {
                if exclude == Some(candidate.as_str()) || out.contains(&candidate) {
                    continue;
                }
                if factory.definitions.contains(&candidate) {
                    continue;
                }
                if let Some(cell) = factory.singletons.get(&candidate) {
                    if self
                        .types
                        .is_assignable(cell.type_name(), TypeKey::Component(required))
                    {
                        out.push(candidate);
                    }
                }
            }
            match &factory.parent {
                Some(parent) => factory = parent,
                None => break,
            }
        }
        out
    }
}
