//! Explicit type metadata, replacing runtime reflection.
//!
//! Systems languages have no bean introspection, so every instantiable
//! type is registered up front as a [`TypeDescriptor`]: its constructors,
//! factory methods, writable property accessors, named methods and
//! lifecycle bridges, plus the set of component keys it is assignable to.
//! The registry is owned by the container instance; nothing here is
//! process-global.
//!
//! Instances live behind a [`ComponentRef`]: an `Arc` around an
//! interior-locked type-erased box. The handle is shareable before the
//! instance is fully populated, which is what lets the eager singleton
//! cache break reference cycles — holders see the completed contents once
//! construction finishes.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::{
    MappedRwLockReadGuard, MappedRwLockWriteGuard, RwLock, RwLockReadGuard, RwLockWriteGuard,
};

use crate::error::CoreError;
use crate::lifecycle::{ComponentNameAware, Disposable, Initializing};
use crate::value::{Resolved, TypeKey};

/// A type-erased, thread-safe instance.
pub type AnyInstance = Box<dyn Any + Send + Sync>;

type CtorFn = dyn Fn(&[Resolved]) -> Result<AnyInstance, CoreError> + Send + Sync;
type FactoryFn =
    dyn Fn(Option<&ComponentRef>, &[Resolved]) -> Result<AnyInstance, CoreError> + Send + Sync;
type SetFn = dyn Fn(&mut (dyn Any + Send + Sync), Resolved) -> Result<(), CoreError> + Send + Sync;
pub(crate) type MethodFn =
    dyn Fn(&mut (dyn Any + Send + Sync)) -> Result<(), CoreError> + Send + Sync;
pub(crate) type NameAwareFn = dyn Fn(&mut (dyn Any + Send + Sync), &str) + Send + Sync;

/// Shared handle to a managed instance.
///
/// Identity is handle identity: two [`ComponentRef`]s compare equal as the
/// same instance via [`Arc::ptr_eq`].
pub type ComponentRef = Arc<ComponentCell>;

/// The cell behind a [`ComponentRef`]: the produced type's key plus the
/// erased instance under a read/write lock.
pub struct ComponentCell {
    type_name: &'static str,
    body: RwLock<AnyInstance>,
}

impl ComponentCell {
    pub fn new(type_name: &'static str, body: AnyInstance) -> ComponentRef {
        Arc::new(Self {
            type_name,
            body: RwLock::new(body),
        })
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Typed read access. Returns `None` when `T` is not the concrete type
    /// behind this handle.
    pub fn read<T: 'static>(&self) -> Option<MappedRwLockReadGuard<'_, T>> {
        RwLockReadGuard::try_map(self.body.read(), |body| (**body).downcast_ref::<T>()).ok()
    }

    /// Typed write access.
    pub fn write<T: 'static>(&self) -> Option<MappedRwLockWriteGuard<'_, T>> {
        RwLockWriteGuard::try_map(self.body.write(), |body| (**body).downcast_mut::<T>()).ok()
    }

    pub(crate) fn with_raw_mut<R>(&self, f: impl FnOnce(&mut (dyn Any + Send + Sync)) -> R) -> R {
        let mut guard = self.body.write();
        f(&mut **guard)
    }
}

impl fmt::Debug for ComponentCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentCell")
            .field("type_name", &self.type_name)
            .finish()
    }
}

/// One registered constructor: parameter types plus the invocation closure.
#[derive(Clone)]
pub struct ConstructorSpec {
    params: Vec<TypeKey>,
    invoke: Arc<CtorFn>,
}

impl ConstructorSpec {
    pub fn params(&self) -> &[TypeKey] {
        &self.params
    }

    pub fn invoke(&self, args: &[Resolved]) -> Result<AnyInstance, CoreError> {
        (self.invoke)(args)
    }
}

impl fmt::Debug for ConstructorSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConstructorSpec")
            .field("params", &self.params)
            .finish()
    }
}

/// A named factory method, static (no factory instance) or instance-bound.
#[derive(Clone)]
pub struct FactoryMethodSpec {
    name: &'static str,
    is_static: bool,
    params: Vec<TypeKey>,
    invoke: Arc<FactoryFn>,
}

impl FactoryMethodSpec {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_static(&self) -> bool {
        self.is_static
    }

    pub fn params(&self) -> &[TypeKey] {
        &self.params
    }

    pub fn invoke(
        &self,
        factory: Option<&ComponentRef>,
        args: &[Resolved],
    ) -> Result<AnyInstance, CoreError> {
        (self.invoke)(factory, args)
    }
}

/// A writable property: required value type plus the setter bridge.
#[derive(Clone)]
pub struct PropertySpec {
    name: &'static str,
    key: TypeKey,
    set: Arc<SetFn>,
}

impl PropertySpec {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn key(&self) -> TypeKey {
        self.key
    }

    pub fn set(
        &self,
        target: &mut (dyn Any + Send + Sync),
        value: Resolved,
    ) -> Result<(), CoreError> {
        (self.set)(target, value)
    }
}

/// Everything the container knows about one component type.
pub struct TypeDescriptor {
    name: &'static str,
    assignable: Vec<&'static str>,
    constructors: Vec<ConstructorSpec>,
    factory_methods: Vec<FactoryMethodSpec>,
    properties: BTreeMap<&'static str, PropertySpec>,
    methods: BTreeMap<&'static str, Arc<MethodFn>>,
    init: Option<Arc<MethodFn>>,
    dispose: Option<Arc<MethodFn>>,
    name_aware: Option<Arc<NameAwareFn>>,
}

impl TypeDescriptor {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            assignable: Vec::new(),
            constructors: Vec::new(),
            factory_methods: Vec::new(),
            properties: BTreeMap::new(),
            methods: BTreeMap::new(),
            init: None,
            dispose: None,
            name_aware: None,
        }
    }

    /// Declare that instances of this type also satisfy `key` for by-type
    /// matching (the Rust stand-in for "implements interface").
    pub fn implements(mut self, key: &'static str) -> Self {
        self.assignable.push(key);
        self
    }

    /// Register a constructor. The closure receives arguments already
    /// resolved and coerced to `params`.
    pub fn constructor<T, F>(mut self, params: &[TypeKey], f: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(&[Resolved]) -> Result<T, CoreError> + Send + Sync + 'static,
    {
        self.constructors.push(ConstructorSpec {
            params: params.to_vec(),
            invoke: Arc::new(move |args| f(args).map(|t| Box::new(t) as AnyInstance)),
        });
        self
    }

    /// Register the no-argument construction path.
    pub fn default_constructor<T, F>(self, f: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn() -> T + Send + Sync + 'static,
    {
        self.constructor(&[], move |_| Ok(f()))
    }

    /// Register a static factory method producing this type.
    pub fn factory_method<T, F>(mut self, name: &'static str, params: &[TypeKey], f: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(&[Resolved]) -> Result<T, CoreError> + Send + Sync + 'static,
    {
        self.factory_methods.push(FactoryMethodSpec {
            name,
            is_static: true,
            params: params.to_vec(),
            invoke: Arc::new(move |_, args| f(args).map(|t| Box::new(t) as AnyInstance)),
        });
        self
    }

    /// Register an instance factory method: invoked on an instance of this
    /// descriptor's type, producing some other component.
    pub fn instance_factory_method<Prod, F>(
        mut self,
        name: &'static str,
        params: &[TypeKey],
        f: F,
    ) -> Self
    where
        Prod: Send + Sync + 'static,
        F: Fn(&ComponentRef, &[Resolved]) -> Result<Prod, CoreError> + Send + Sync + 'static,
    {
        let type_name = self.name;
        self.factory_methods.push(FactoryMethodSpec {
            name,
            is_static: false,
            params: params.to_vec(),
            invoke: Arc::new(move |factory, args| {
                let factory = factory.ok_or_else(|| CoreError::InstantiationFailed {
                    name: name.to_string(),
                    message: format!(
                        "instance factory method '{name}' on '{type_name}' invoked without a factory component"
                    ),
                    source: None,
                })?;
                f(factory, args).map(|t| Box::new(t) as AnyInstance)
            }),
        });
        self
    }

    /// Register a writable property with its setter.
    pub fn property<T, F>(mut self, name: &'static str, key: TypeKey, f: F) -> Self
    where
        T: 'static,
        F: Fn(&mut T, Resolved) -> Result<(), CoreError> + Send + Sync + 'static,
    {
        let type_name = self.name;
        self.properties.insert(
            name,
            PropertySpec {
                name,
                key,
                set: Arc::new(move |target, value| {
                    let target =
                        target
                            .downcast_mut::<T>()
                            .ok_or_else(|| CoreError::TypeMismatch {
                                name: name.to_string(),
                                required: type_name.to_string(),
                                actual: "<foreign instance>".to_string(),
                            })?;
                    f(target, value)
                }),
            },
        );
        self
    }

    /// Register a named method, addressable as an init or destroy method.
    pub fn method<T, F>(mut self, name: &'static str, f: F) -> Self
    where
        T: 'static,
        F: Fn(&mut T) -> Result<(), CoreError> + Send + Sync + 'static,
    {
        let type_name = self.name;
        self.methods.insert(
            name,
            Arc::new(move |target| {
                let target = target
                    .downcast_mut::<T>()
                    .ok_or_else(|| CoreError::TypeMismatch {
                        name: name.to_string(),
                        required: type_name.to_string(),
                        actual: "<foreign instance>".to_string(),
                    })?;
                f(target)
            }),
        );
        self
    }

    /// Bridge the [`Initializing`] lifecycle callback for this type.
    pub fn initializing<T>(mut self) -> Self
    where
        T: Initializing + 'static,
    {
        self.init = Some(bridge::<T>(self.name, |t| t.after_properties_set()));
        self
    }

    /// Bridge the [`Disposable`] teardown callback for this type.
    pub fn disposable<T>(mut self) -> Self
    where
        T: Disposable + 'static,
    {
        self.dispose = Some(bridge::<T>(self.name, |t| t.destroy()));
        self
    }

    /// Bridge the [`ComponentNameAware`] callback for this type.
    pub fn name_aware<T>(mut self) -> Self
    where
        T: ComponentNameAware + 'static,
    {
        self.name_aware = Some(Arc::new(move |target, name| {
            if let Some(t) = target.downcast_mut::<T>() {
                t.set_component_name(name);
            }
        }));
        self
    }

    // Queries.

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn assignable_to(&self) -> &[&'static str] {
        &self.assignable
    }

    pub fn constructors(&self) -> &[ConstructorSpec] {
        &self.constructors
    }

    pub fn factory_methods(&self) -> &[FactoryMethodSpec] {
        &self.factory_methods
    }

    pub fn has_no_arg_constructor(&self) -> bool {
        self.constructors.iter().any(|c| c.params.is_empty())
    }

    pub fn no_arg_constructor(&self) -> Option<&ConstructorSpec> {
        self.constructors.iter().find(|c| c.params.is_empty())
    }

    pub fn property_spec(&self, name: &str) -> Option<&PropertySpec> {
        self.properties.get(name)
    }

    /// Writable properties in stable (alphabetical) order.
    pub fn properties(&self) -> impl Iterator<Item = &PropertySpec> {
        self.properties.values()
    }

    pub(crate) fn named_method(&self, name: &str) -> Option<Arc<MethodFn>> {
        self.methods.get(name).cloned()
    }

    pub(crate) fn init_bridge(&self) -> Option<Arc<MethodFn>> {
        self.init.clone()
    }

    pub(crate) fn dispose_bridge(&self) -> Option<Arc<MethodFn>> {
        self.dispose.clone()
    }

    pub fn has_dispose_bridge(&self) -> bool {
        self.dispose.is_some()
    }

    pub(crate) fn name_aware_bridge(&self) -> Option<Arc<NameAwareFn>> {
        self.name_aware.clone()
    }
}

impl fmt::Debug for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeDescriptor")
            .field("name", &self.name)
            .field("assignable", &self.assignable)
            .field("constructors", &self.constructors.len())
            .field("factory_methods", &self.factory_methods.len())
            .field("properties", &self.properties.len())
            .finish()
    }
}

fn bridge<T: 'static>(
    type_name: &'static str,
    f: impl Fn(&mut T) -> Result<(), CoreError> + Send + Sync + 'static,
) -> Arc<MethodFn> {
    Arc::new(move |target| {
        let target = target
            .downcast_mut::<T>()
            .ok_or_else(|| CoreError::TypeMismatch {
                name: type_name.to_string(),
                required: type_name.to_string(),
                actual: "<foreign instance>".to_string(),
            })?;
        f(target)
    })
}

/// Container-owned registry of type descriptors.
#[derive(Default)]
pub struct TypeRegistry {
    inner: RwLock<std::collections::HashMap<&'static str, Arc<TypeDescriptor>>>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, descriptor: TypeDescriptor) {
        let mut inner = self.inner.write();
        inner.insert(descriptor.name(), Arc::new(descriptor));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.read().contains_key(name)
    }

    pub fn descriptor(&self, name: &str) -> Result<Arc<TypeDescriptor>, CoreError> {
        self.inner
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| CoreError::StoreInconsistency {
                name: name.to_string(),
                message: format!("type '{name}' has no registered descriptor"),
            })
    }

    /// Whether instances of type `actual` satisfy `required`: exact name
    /// match or membership in the descriptor's assignability set. Scalar
    /// keys never match a component type.
    pub fn is_assignable(&self, actual: &str, required: TypeKey) -> bool {
        match required {
            TypeKey::Component(name) => {
                if actual == name {
                    return true;
                }
                self.inner
                    .read()
                    .get(actual)
                    .is_some_and(|d| d.assignable.contains(&name))
            }
            _ => false,
        }
    }
}
