//! Shared-instance cache and teardown bookkeeping.
//!
//! Each singleton name owns a slot. While a creation is running the slot
//! holds an in-creation sentinel recording the creating thread: re-entry
//! from that same thread (a reference cycle) receives the eagerly cached
//! partial handle if one has been exposed; any other caller fails fast
//! with `CurrentlyInCreation` instead of blocking, since blocking on a
//! reference cycle would deadlock. The creation closure itself runs
//! outside the slot lock, so recursive sub-creations never deadlock.
//!
//! Teardown runs registered disposal callbacks in reverse registration
//! order, destroying components that depend on a component before the
//! component itself. Disposal failures are logged and do not stop the
//! sweep.

use std::collections::{HashMap, HashSet};
use std::thread::{self, ThreadId};

use parking_lot::Mutex;
use tracing::{debug, error};

use crate::error::CoreError;
use crate::types::ComponentRef;

/// Disposal callback registered for one fully-created singleton.
pub(crate) type DisposeFn = Box<dyn FnOnce() -> Result<(), CoreError> + Send>;

enum Slot {
    Ready(ComponentRef),
    InCreation {
        thread: ThreadId,
        partial: Option<ComponentRef>,
    },
}

struct DisposableEntry {
    id: String,
    component: String,
    dispose: DisposeFn,
}

#[derive(Default)]
struct Teardown {
    /// Registration order; drained LIFO.
    disposables: Vec<DisposableEntry>,
    /// name -> components that depend on it and must be destroyed first.
    dependents: HashMap<String, Vec<String>>,
}

/// Cache of shared instances plus the disposal and dependent graphs.
pub struct SingletonRegistry {
    slots: Mutex<HashMap<String, Slot>>,
    order: Mutex<Vec<String>>,
    teardown: Mutex<Teardown>,
}

impl Default for SingletonRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SingletonRegistry {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            order: Mutex::new(Vec::new()),
            teardown: Mutex::new(Teardown::default()),
        }
    }

    /// The cached instance, if creation has completed.
    pub fn get(&self, name: &str) -> Option<ComponentRef> {
        match self.slots.lock().get(name) {
            Some(Slot::Ready(r)) => Some(r.clone()),
            _ => None,
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        matches!(self.slots.lock().get(name), Some(Slot::Ready(_)))
    }

    pub fn is_in_creation(&self, name: &str) -> bool {
        matches!(self.slots.lock().get(name), Some(Slot::InCreation { .. }))
    }

    /// Names of completed singletons in registration order.
    pub fn names(&self) -> Vec<String> {
        self.order.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.order.lock().len()
    }

    /// Manually register a completed instance, outside any creation.
    pub fn add(&self, name: impl Into<String>, instance: ComponentRef) -> Result<(), CoreError> {
        let name = name.into();
        let mut slots = self.slots.lock();
        if slots.contains_key(&name) {
            return Err(CoreError::StoreInconsistency {
                name: name.clone(),
                message: "a singleton is already registered or in creation under this name".into(),
            });
        }
        slots.insert(name.clone(), Slot::Ready(instance));
        self.order.lock().push(name);
        Ok(())
    }

    /// Return the cached instance or run `create` to produce it.
    ///
    /// Re-entry from the creating thread yields the partial handle exposed
    /// through [`store_partial`](Self::store_partial), or
    /// [`CoreError::CurrentlyInCreation`] when none has been exposed yet
    /// (a constructor-level cycle, which has no partial to hand out). Any
    /// other thread arriving mid-creation fails fast with the same error.
    pub fn get_or_create(
        &self,
        name: &str,
        create: impl FnOnce() -> Result<ComponentRef, CoreError>,
    ) -> Result<ComponentRef, CoreError> {
        {
            let mut slots = self.slots.lock();
            match slots.get(name) {
                Some(Slot::Ready(r)) => return Ok(r.clone()),
                Some(Slot::InCreation { thread, partial }) => {
                    if *thread == thread::current().id() {
                        return match partial {
                            Some(p) => Ok(p.clone()),
                            None => Err(CoreError::CurrentlyInCreation(name.to_string())),
                        };
                    }
                    return Err(CoreError::CurrentlyInCreation(name.to_string()));
                }
                None => {
                    slots.insert(
                        name.to_string(),
                        Slot::InCreation {
                            thread: thread::current().id(),
                            partial: None,
                        },
                    );
                }
            }
        }

        let result = create();

        let mut slots = self.slots.lock();
        match result {
            Ok(instance) => {
                slots.insert(name.to_string(), Slot::Ready(instance.clone()));
                self.order.lock().push(name.to_string());
                Ok(instance)
            }
            Err(e) => {
                slots.remove(name);
                Err(e)
            }
        }
    }

    /// Expose the not-yet-populated handle of the singleton this thread is
    /// currently creating, so that cycles back to it resolve.
    pub fn store_partial(&self, name: &str, partial: ComponentRef) {
        if let Some(Slot::InCreation {
            thread,
            partial: slot,
        }) = self.slots.lock().get_mut(name)
        {
            if *thread == thread::current().id() {
                *slot = Some(partial);
            }
        }
    }

    /// Record that `dependent` must be destroyed before `name`.
    pub fn register_dependent(&self, name: impl Into<String>, dependent: impl Into<String>) {
        let name = name.into();
        let dependent = dependent.into();
        if name == dependent {
            return;
        }
        let mut teardown = self.teardown.lock();
        let entry = teardown.dependents.entry(name).or_default();
        if !entry.contains(&dependent) {
            entry.push(dependent);
        }
    }

    pub fn dependents_of(&self, name: &str) -> Vec<String> {
        self.teardown
            .lock()
            .dependents
            .get(name)
            .cloned()
            .unwrap_or_default()
    }

    /// Register a disposal callback for `component`. Returns the entry id,
    /// suffixed `#2`, `#3`, ... when the component already has entries.
    pub fn register_disposable(&self, component: impl Into<String>, dispose: DisposeFn) -> String {
        let component = component.into();
        let mut teardown = self.teardown.lock();
        let existing = teardown
            .disposables
            .iter()
            .filter(|e| e.component == component)
            .count();
        let id = if existing == 0 {
            component.clone()
        } else {
            format!("{component}#{}", existing + 1)
        };
        teardown.disposables.push(DisposableEntry {
            id: id.clone(),
            component,
            dispose,
        });
        id
    }

    /// Destroy one singleton: its dependents first, then its own disposal
    /// entries, then drop it from the cache.
    pub fn destroy_singleton(&self, name: &str) {
        let (mut disposables, mut dependents) = {
            let mut teardown = self.teardown.lock();
            (
                std::mem::take(&mut teardown.disposables),
                std::mem::take(&mut teardown.dependents),
            )
        };
        let mut destroyed = HashSet::new();
        drain_component(&mut disposables, &dependents, name, &mut destroyed);
        // Edges and entries among survivors stay in force.
        for done in &destroyed {
            dependents.remove(done);
        }
        {
            let mut teardown = self.teardown.lock();
            disposables.append(&mut teardown.disposables);
            teardown.disposables = disposables;
            teardown.dependents.extend(dependents);
        }

        let mut slots = self.slots.lock();
        let mut order = self.order.lock();
        for done in &destroyed {
            slots.remove(done);
            order.retain(|n| n != done);
        }
    }

    /// Destroy every singleton, newest first.
    pub fn destroy_all(&self) -> usize {
        let mut teardown = self.teardown.lock();
        let mut disposables = std::mem::take(&mut teardown.disposables);
        let dependents = std::mem::take(&mut teardown.dependents);
        drop(teardown);

        let snapshot: Vec<String> = {
            let mut slots = self.slots.lock();
            let mut order = self.order.lock();
            slots.clear();
            std::mem::take(&mut *order)
        };
        let destroyed_count = snapshot.len();
        debug!(singletons = destroyed_count, "destroying singletons");

        let mut destroyed = HashSet::new();
        while let Some(entry) = disposables.last() {
            let component = entry.component.clone();
            drain_component(&mut disposables, &dependents, &component, &mut destroyed);
        }
        destroyed_count
    }
}

/// Run the disposal entries for `component`, dependents first. Recursion
/// depth is bounded by the dependent graph, which creation keeps acyclic
/// for constructor edges and shallow in practice.
fn drain_component(
    entries: &mut Vec<DisposableEntry>,
    dependents: &HashMap<String, Vec<String>>,
    component: &str,
    destroyed: &mut HashSet<String>,
) {
    if !destroyed.insert(component.to_string()) {
        return;
    }
    if let Some(deps) = dependents.get(component) {
        for dependent in deps {
            drain_component(entries, dependents, dependent, destroyed);
        }
    }
    let mut i = entries.len();
    while i > 0 {
        i -= 1;
        if entries[i].component == component {
            let entry = entries.remove(i);
            debug!(component = %entry.component, id = %entry.id, "disposing");
            if let Err(e) = (entry.dispose)() {
                error!(component = %entry.component, id = %entry.id, error = %e, "disposal failed");
            }
        }
    }
}
