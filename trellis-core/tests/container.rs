//! End-to-end container behavior: creation, wiring, lifecycle, teardown.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};

use parking_lot::Mutex;
use trellis_core::{
    AutowireMode, ComponentCell, ComponentDefinition, ComponentFactory, ComponentNameAware,
    ComponentPostProcessor, ComponentRef, Converter, CoreError, DependencyCheck, Disposable,
    Initializing, Resolved, TypeDescriptor, TypeKey, Value,
};

#[derive(Default)]
struct ConnectionPool {
    url: String,
    size: i64,
    open: bool,
}

impl Initializing for ConnectionPool {
    fn after_properties_set(&mut self) -> Result<(), CoreError> {
        self.open = true;
        Ok(())
    }
}

fn pool_descriptor() -> TypeDescriptor {
    TypeDescriptor::new("ConnectionPool")
        .default_constructor(ConnectionPool::default)
        .constructor::<ConnectionPool, _>(&[TypeKey::Str, TypeKey::Int], |args| {
            Ok(ConnectionPool {
                url: args[0].clone().into_string()?,
                size: args[1].clone().into_int()?,
                open: false,
            })
        })
        .property::<ConnectionPool, _>("url", TypeKey::Str, |p, v| {
            p.url = v.into_string()?;
            Ok(())
        })
        .property::<ConnectionPool, _>("size", TypeKey::Int, |p, v| {
            p.size = v.into_int()?;
            Ok(())
        })
        .initializing::<ConnectionPool>()
}

struct Repository {
    pool: Option<ComponentRef>,
}

fn repository_descriptor() -> TypeDescriptor {
    TypeDescriptor::new("Repository")
        .default_constructor(|| Repository { pool: None })
        .property::<Repository, _>("pool", TypeKey::Component("ConnectionPool"), |r, v| {
            r.pool = Some(v.into_component()?);
            Ok(())
        })
}

#[test]
fn singleton_identity_and_prototype_freshness() {
    let factory = ComponentFactory::new();
    factory.register_type(pool_descriptor());
    factory
        .register_definition("pool", ComponentDefinition::of("ConnectionPool"))
        .unwrap();
    factory
        .register_definition(
            "scratch",
            ComponentDefinition::of("ConnectionPool").prototype(),
        )
        .unwrap();

    let a = factory.get_component("pool").unwrap();
    let b = factory.get_component("pool").unwrap();
    assert!(Arc::ptr_eq(&a, &b));
    assert!(factory.is_singleton_scoped("pool").unwrap());

    let p1 = factory.get_component("scratch").unwrap();
    let p2 = factory.get_component("scratch").unwrap();
    assert!(!Arc::ptr_eq(&p1, &p2));
    assert!(!factory.is_singleton_scoped("scratch").unwrap());
}

#[test]
fn properties_are_converted_and_init_runs() {
    let factory = ComponentFactory::new();
    factory.register_type(pool_descriptor());
    factory
        .register_definition(
            "pool",
            ComponentDefinition::of("ConnectionPool")
                .prop("url", Value::str("postgres://db"))
                .prop("size", Value::str("12")),
        )
        .unwrap();

    let cell = factory.get_component("pool").unwrap();
    let pool = cell.read::<ConnectionPool>().unwrap();
    assert_eq!(pool.url, "postgres://db");
    assert_eq!(pool.size, 12);
    assert!(pool.open);
}

#[test]
fn setter_reference_cycle_resolves_to_same_instances() {
    struct Node {
        peer: Option<ComponentRef>,
    }

    let factory = ComponentFactory::new();
    factory.register_type(
        TypeDescriptor::new("Node")
            .default_constructor(|| Node { peer: None })
            .property::<Node, _>("peer", TypeKey::Component("Node"), |n, v| {
                n.peer = Some(v.into_component()?);
                Ok(())
            }),
    );
    factory
        .register_definition("a", ComponentDefinition::of("Node").prop_ref("peer", "b"))
        .unwrap();
    factory
        .register_definition("b", ComponentDefinition::of("Node").prop_ref("peer", "a"))
        .unwrap();

    let a = factory.get_component("a").unwrap();
    let b = factory.get_component("b").unwrap();

    let a_peer = a.read::<Node>().unwrap().peer.clone().unwrap();
    let b_peer = b.read::<Node>().unwrap().peer.clone().unwrap();
    assert!(Arc::ptr_eq(&a_peer, &b));
    assert!(Arc::ptr_eq(&b_peer, &a));
}

#[test]
fn constructor_cycle_fails_fast() {
    struct Node {
        #[allow(dead_code)]
        peer: ComponentRef,
    }

    let factory = ComponentFactory::new();
    factory.register_type(
        TypeDescriptor::new("NodeA").constructor::<Node, _>(
            &[TypeKey::Component("NodeB")],
            |args| {
                Ok(Node {
                    peer: args[0].clone().into_component()?,
                })
            },
        ),
    );
    factory.register_type(
        TypeDescriptor::new("NodeB").constructor::<Node, _>(
            &[TypeKey::Component("NodeA")],
            |args| {
                Ok(Node {
                    peer: args[0].clone().into_component()?,
                })
            },
        ),
    );
    factory
        .register_definition("a", ComponentDefinition::of("NodeA").ctor(Value::reference("b")))
        .unwrap();
    factory
        .register_definition("b", ComponentDefinition::of("NodeB").ctor(Value::reference("a")))
        .unwrap();

    let err = factory.get_component("a").unwrap_err();
    assert!(err.involves_in_creation(), "unexpected error: {err}");
    // The failed attempt leaves no residue; fixing the cycle is possible.
    assert_eq!(factory.singleton_count(), 0);
}

#[test]
fn concurrent_requests_create_the_singleton_once() {
    let factory = Arc::new(ComponentFactory::new());
    let constructions = Arc::new(AtomicUsize::new(0));
    {
        let constructions = constructions.clone();
        factory.register_type(TypeDescriptor::new("Slow").constructor::<i64, _>(&[], move |_| {
            constructions.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(std::time::Duration::from_millis(25));
            Ok(7)
        }));
    }
    factory
        .register_definition("slow", ComponentDefinition::of("Slow"))
        .unwrap();

    let barrier = Arc::new(Barrier::new(3));
    let handles: Vec<_> = (0..3)
        .map(|_| {
            let factory = factory.clone();
            let barrier = barrier.clone();
            std::thread::spawn(move || {
                barrier.wait();
                factory.get_component("slow")
            })
        })
        .collect();
    let results: Vec<Result<ComponentRef, CoreError>> =
        handles.into_iter().map(|h| h.join().unwrap()).collect();

    // Exactly one thread constructs; losers of the race fail fast rather
    // than block, and every winner sees the same instance.
    assert_eq!(constructions.load(Ordering::SeqCst), 1);
    let ok: Vec<&ComponentRef> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    assert!(!ok.is_empty());
    for instance in &ok {
        assert!(Arc::ptr_eq(*instance, ok[0]));
    }
    for err in results.iter().filter_map(|r| r.as_ref().err()) {
        assert!(matches!(err, CoreError::CurrentlyInCreation(_)));
    }
    // After the race settles the cache serves everyone.
    let settled = factory.get_component("slow").unwrap();
    assert!(Arc::ptr_eq(&settled, ok[0]));
    assert_eq!(constructions.load(Ordering::SeqCst), 1);
}

#[derive(Default)]
struct Server {
    host: String,
    port: i64,
    secure: bool,
}

fn server_descriptor() -> TypeDescriptor {
    TypeDescriptor::new("Server")
        .constructor::<Server, _>(&[TypeKey::Str], |args| {
            Ok(Server {
                host: args[0].clone().into_string()?,
                ..Server::default()
            })
        })
        .constructor::<Server, _>(&[TypeKey::Str, TypeKey::Int], |args| {
            Ok(Server {
                host: args[0].clone().into_string()?,
                port: args[1].clone().into_int()?,
                secure: false,
            })
        })
        .constructor::<Server, _>(&[TypeKey::Str, TypeKey::Int, TypeKey::Bool], |args| {
            Ok(Server {
                host: args[0].clone().into_string()?,
                port: args[1].clone().into_int()?,
                secure: args[2].clone().into_bool()?,
            })
        })
}

#[test]
fn greediest_overload_wins_with_scalar_coercion() {
    let factory = ComponentFactory::new();
    factory.register_type(server_descriptor());
    factory
        .register_definition(
            "server",
            ComponentDefinition::of("Server")
                .ctor(Value::str("example.org"))
                .ctor(Value::str("8443"))
                .ctor(Value::str("true")),
        )
        .unwrap();

    let cell = factory.get_component("server").unwrap();
    let server = cell.read::<Server>().unwrap();
    assert_eq!(server.host, "example.org");
    assert_eq!(server.port, 8443);
    assert!(server.secure);
}

#[test]
fn indexed_arguments_pin_their_slots() {
    let factory = ComponentFactory::new();
    factory.register_type(server_descriptor());
    factory
        .register_definition(
            "server",
            ComponentDefinition::of("Server")
                .ctor_at(0, Value::str("internal"))
                .ctor_at(1, Value::Int(9090)),
        )
        .unwrap();

    let cell = factory.get_component("server").unwrap();
    let server = cell.read::<Server>().unwrap();
    assert_eq!(server.host, "internal");
    assert_eq!(server.port, 9090);
    assert!(!server.secure);
}

struct Service {
    sink: Option<ComponentRef>,
}

fn service_descriptor() -> TypeDescriptor {
    TypeDescriptor::new("Service")
        .default_constructor(|| Service { sink: None })
        .property::<Service, _>("sink", TypeKey::Component("AuditSink"), |s, v| {
            s.sink = Some(v.into_component()?);
            Ok(())
        })
}

#[test]
fn autowire_by_type_requires_a_unique_candidate() {
    let factory = ComponentFactory::new();
    factory.register_type(service_descriptor());
    factory.register_type(
        TypeDescriptor::new("ConsoleSink")
            .implements("AuditSink")
            .default_constructor(|| 0i64),
    );
    factory.register_type(
        TypeDescriptor::new("FileSink")
            .implements("AuditSink")
            .default_constructor(|| 0i64),
    );
    factory
        .register_definition("console", ComponentDefinition::of("ConsoleSink"))
        .unwrap();
    factory
        .register_definition(
            "svc",
            ComponentDefinition::of("Service").autowire(AutowireMode::ByType),
        )
        .unwrap();

    let cell = factory.get_component("svc").unwrap();
    let wired = cell.read::<Service>().unwrap().sink.clone().unwrap();
    assert!(Arc::ptr_eq(&wired, &factory.get_component("console").unwrap()));

    // A second candidate makes the same wiring ambiguous.
    factory
        .register_definition("file", ComponentDefinition::of("FileSink"))
        .unwrap();
    factory
        .register_definition(
            "svc2",
            ComponentDefinition::of("Service").autowire(AutowireMode::ByType),
        )
        .unwrap();
    match factory.get_component("svc2").unwrap_err() {
        CoreError::AmbiguousDependency { candidates, .. } => {
            assert!(candidates.contains(&"console".to_string()));
            assert!(candidates.contains(&"file".to_string()));
        }
        other => panic!("expected ambiguity, got: {other}"),
    }
}

#[test]
fn autowire_by_name_matches_property_to_component_name() {
    struct Mailer;
    struct Notifier {
        mailer: Option<ComponentRef>,
    }

    let factory = ComponentFactory::new();
    factory.register_type(TypeDescriptor::new("Mailer").default_constructor(|| Mailer));
    factory.register_type(
        TypeDescriptor::new("Notifier")
            .default_constructor(|| Notifier { mailer: None })
            .property::<Notifier, _>("mailer", TypeKey::Component("Mailer"), |n, v| {
                n.mailer = Some(v.into_component()?);
                Ok(())
            }),
    );
    factory
        .register_definition("mailer", ComponentDefinition::of("Mailer"))
        .unwrap();
    factory
        .register_definition(
            "notifier",
            ComponentDefinition::of("Notifier").autowire(AutowireMode::ByName),
        )
        .unwrap();

    let cell = factory.get_component("notifier").unwrap();
    let wired = cell.read::<Notifier>().unwrap().mailer.clone().unwrap();
    assert!(Arc::ptr_eq(&wired, &factory.get_component("mailer").unwrap()));
}

#[test]
fn constructor_autowiring_fills_open_slots() {
    struct Consumer {
        pool: ComponentRef,
        label: String,
    }

    let factory = ComponentFactory::new();
    factory.register_type(pool_descriptor());
    factory.register_type(TypeDescriptor::new("Consumer").constructor::<Consumer, _>(
        &[TypeKey::Str, TypeKey::Component("ConnectionPool")],
        |args| {
            Ok(Consumer {
                label: args[0].clone().into_string()?,
                pool: args[1].clone().into_component()?,
            })
        },
    ));
    factory
        .register_definition("pool", ComponentDefinition::of("ConnectionPool"))
        .unwrap();
    factory
        .register_definition(
            "consumer",
            ComponentDefinition::of("Consumer")
                .ctor(Value::str("primary"))
                .autowire(AutowireMode::Constructor),
        )
        .unwrap();

    let cell = factory.get_component("consumer").unwrap();
    let consumer = cell.read::<Consumer>().unwrap();
    assert_eq!(consumer.label, "primary");
    assert!(Arc::ptr_eq(&consumer.pool, &factory.get_component("pool").unwrap()));
}

#[test]
fn child_definition_inherits_and_overrides_parent_template() {
    let factory = ComponentFactory::new();
    factory.register_type(pool_descriptor());
    factory
        .register_definition(
            "base-pool",
            ComponentDefinition::of("ConnectionPool")
                .abstract_template()
                .prop("url", Value::str("postgres://default"))
                .prop("size", Value::Int(4)),
        )
        .unwrap();
    factory
        .register_definition(
            "reporting",
            ComponentDefinition::child_of("base-pool").prop("size", Value::Int(32)),
        )
        .unwrap();

    assert!(matches!(
        factory.get_component("base-pool").unwrap_err(),
        CoreError::AbstractDefinition(_)
    ));

    let cell = factory.get_component("reporting").unwrap();
    let pool = cell.read::<ConnectionPool>().unwrap();
    assert_eq!(pool.url, "postgres://default");
    assert_eq!(pool.size, 32);

    // The stored definitions are untouched by merging.
    let stored = factory.merged_definition("reporting").unwrap();
    assert_eq!(factory.merged_definition("reporting").unwrap(), stored);
}

#[test]
fn child_factory_falls_through_to_parent() {
    let parent = Arc::new(ComponentFactory::new());
    parent.register_type(pool_descriptor());
    parent
        .register_definition(
            "pool",
            ComponentDefinition::of("ConnectionPool").prop("url", Value::str("parent://")),
        )
        .unwrap();

    let child = ComponentFactory::with_parent(parent.clone());
    let via_child = child.get_component("pool").unwrap();
    let via_parent = parent.get_component("pool").unwrap();
    assert!(Arc::ptr_eq(&via_child, &via_parent));

    // A local definition shadows the parent's without replacing it.
    child
        .register_definition(
            "pool",
            ComponentDefinition::of("ConnectionPool").prop("url", Value::str("child://")),
        )
        .unwrap();
    let shadowed = child.get_component("pool").unwrap();
    assert!(!Arc::ptr_eq(&shadowed, &via_parent));
    assert_eq!(shadowed.read::<ConnectionPool>().unwrap().url, "child://");
    assert_eq!(via_parent.read::<ConnectionPool>().unwrap().url, "parent://");
}

#[test]
fn static_and_instance_factory_methods() {
    struct PoolManager {
        leases: i64,
    }

    let factory = ComponentFactory::new();
    factory.register_type(
        TypeDescriptor::new("ConnectionPool")
            .default_constructor(ConnectionPool::default)
            .factory_method::<ConnectionPool, _>("standard", &[TypeKey::Str], |args| {
                Ok(ConnectionPool {
                    url: args[0].clone().into_string()?,
                    size: 8,
                    open: false,
                })
            }),
    );
    factory.register_type(
        TypeDescriptor::new("PoolManager")
            .default_constructor(|| PoolManager { leases: 0 })
            .instance_factory_method::<ConnectionPool, _>("lease", &[], |manager, _| {
                let mut m = manager.write::<PoolManager>().ok_or_else(|| {
                    CoreError::PostProcessing {
                        name: "manager".into(),
                        message: "wrong factory type".into(),
                    }
                })?;
                m.leases += 1;
                Ok(ConnectionPool {
                    url: format!("leased-{}", m.leases),
                    size: 1,
                    open: false,
                })
            }),
    );

    factory
        .register_definition(
            "standard-pool",
            ComponentDefinition::of("ConnectionPool")
                .factory_method("standard")
                .ctor(Value::str("postgres://static")),
        )
        .unwrap();
    factory
        .register_definition("manager", ComponentDefinition::of("PoolManager"))
        .unwrap();
    factory
        .register_definition(
            "leased-pool",
            ComponentDefinition::of("ConnectionPool")
                .factory_method("lease")
                .factory_component("manager"),
        )
        .unwrap();

    let standard = factory.get_component("standard-pool").unwrap();
    assert_eq!(
        standard.read::<ConnectionPool>().unwrap().url,
        "postgres://static"
    );

    let leased = factory.get_component("leased-pool").unwrap();
    assert_eq!(leased.read::<ConnectionPool>().unwrap().url, "leased-1");
    let manager = factory.get_component("manager").unwrap();
    assert_eq!(manager.read::<PoolManager>().unwrap().leases, 1);
}

#[test]
fn dependency_check_flags_unset_properties() {
    let factory = ComponentFactory::new();
    factory.register_type(pool_descriptor());
    factory
        .register_definition(
            "pool",
            ComponentDefinition::of("ConnectionPool")
                .prop("url", Value::str("x"))
                .dependency_check(DependencyCheck::All),
        )
        .unwrap();

    match factory.get_component("pool").unwrap_err() {
        CoreError::UnsatisfiedDependency { at, .. } => assert!(at.contains("size")),
        other => panic!("expected unsatisfied dependency, got: {other}"),
    }
}

#[test]
fn property_failures_are_aggregated() {
    let factory = ComponentFactory::new();
    factory.register_type(pool_descriptor());
    factory
        .register_definition(
            "pool",
            ComponentDefinition::of("ConnectionPool")
                .prop("size", Value::str("not-a-number"))
                .prop("missing", Value::Int(1)),
        )
        .unwrap();

    match factory.get_component("pool").unwrap_err() {
        CoreError::PropertyAccess { failures, .. } => {
            assert_eq!(failures.len(), 2);
            let properties: Vec<&str> =
                failures.iter().map(|f| f.property.as_str()).collect();
            assert!(properties.contains(&"size"));
            assert!(properties.contains(&"missing"));
        }
        other => panic!("expected property failures, got: {other}"),
    }
}

#[test]
fn indexed_entries_fold_into_one_assignment() {
    struct Endpoints {
        urls: Vec<String>,
        env: Vec<(String, String)>,
    }

    let factory = ComponentFactory::new();
    factory.register_type(
        TypeDescriptor::new("Endpoints")
            .default_constructor(|| Endpoints {
                urls: Vec::new(),
                env: Vec::new(),
            })
            .property::<Endpoints, _>("urls", TypeKey::List, |e, v| {
                e.urls = v
                    .into_list()?
                    .into_iter()
                    .map(|item| item.into_string())
                    .collect::<Result<_, _>>()?;
                Ok(())
            })
            .property::<Endpoints, _>("env", TypeKey::Map, |e, v| {
                e.env = v
                    .into_map()?
                    .into_iter()
                    .map(|(k, item)| item.into_string().map(|s| (k, s)))
                    .collect::<Result<_, _>>()?;
                Ok(())
            }),
    );
    factory
        .register_definition(
            "endpoints",
            ComponentDefinition::of("Endpoints")
                .prop("urls[1]", Value::str("https://b"))
                .prop("urls[0]", Value::str("https://a"))
                .prop("env[MODE]", Value::str("prod"))
                .prop("env[REGION]", Value::str("eu-1")),
        )
        .unwrap();

    let cell = factory.get_component("endpoints").unwrap();
    let endpoints = cell.read::<Endpoints>().unwrap();
    assert_eq!(endpoints.urls, vec!["https://a", "https://b"]);
    assert_eq!(
        endpoints.env,
        vec![
            ("MODE".to_string(), "prod".to_string()),
            ("REGION".to_string(), "eu-1".to_string())
        ]
    );
}

#[test]
fn inline_definitions_create_fresh_unnamed_components() {
    let factory = ComponentFactory::new();
    factory.register_type(pool_descriptor());
    factory.register_type(repository_descriptor());
    factory
        .register_definition(
            "repo",
            ComponentDefinition::of("Repository").prop(
                "pool",
                Value::Inner(Box::new(
                    ComponentDefinition::of("ConnectionPool").prop("url", Value::str("inner://")),
                )),
            ),
        )
        .unwrap();

    let cell = factory.get_component("repo").unwrap();
    let inner = cell.read::<Repository>().unwrap().pool.clone().unwrap();
    assert_eq!(inner.read::<ConnectionPool>().unwrap().url, "inner://");
    // The inline component is not reachable by any name.
    assert_eq!(factory.component_names_of_type("ConnectionPool"), Vec::<String>::new());
}

#[test]
fn lifecycle_order_name_aware_then_init_then_custom_method() {
    struct Staged {
        events: Vec<String>,
    }
    impl ComponentNameAware for Staged {
        fn set_component_name(&mut self, name: &str) {
            self.events.push(format!("named:{name}"));
        }
    }
    impl Initializing for Staged {
        fn after_properties_set(&mut self) -> Result<(), CoreError> {
            self.events.push("init".into());
            Ok(())
        }
    }

    let factory = ComponentFactory::new();
    factory.register_type(
        TypeDescriptor::new("Staged")
            .default_constructor(|| Staged { events: Vec::new() })
            .name_aware::<Staged>()
            .initializing::<Staged>()
            .method::<Staged, _>("warm_up", |s| {
                s.events.push("warm_up".into());
                Ok(())
            }),
    );
    factory
        .register_definition(
            "staged",
            ComponentDefinition::of("Staged").init_method("warm_up"),
        )
        .unwrap();

    let cell = factory.get_component("staged").unwrap();
    assert_eq!(
        cell.read::<Staged>().unwrap().events,
        vec!["named:staged", "init", "warm_up"]
    );
}

#[test]
fn missing_init_method_is_reported() {
    let factory = ComponentFactory::new();
    factory.register_type(pool_descriptor());
    factory
        .register_definition(
            "pool",
            ComponentDefinition::of("ConnectionPool").init_method("does_not_exist"),
        )
        .unwrap();
    assert!(matches!(
        factory.get_component("pool").unwrap_err(),
        CoreError::InitMethodNotFound { .. }
    ));
}

#[test]
fn post_processor_can_replace_and_none_fails_creation() {
    struct Replacer {
        replacement: ComponentRef,
    }
    impl ComponentPostProcessor for Replacer {
        fn after_initialization(
            &self,
            component: ComponentRef,
            name: &str,
        ) -> Result<Option<ComponentRef>, CoreError> {
            if name == "target" {
                Ok(Some(self.replacement.clone()))
            } else {
                Ok(Some(component))
            }
        }
    }
    struct Swallower;
    impl ComponentPostProcessor for Swallower {
        fn before_initialization(
            &self,
            _component: ComponentRef,
            _name: &str,
        ) -> Result<Option<ComponentRef>, CoreError> {
            Ok(None)
        }
    }

    let factory = ComponentFactory::new();
    factory.register_type(pool_descriptor());
    factory
        .register_definition("target", ComponentDefinition::of("ConnectionPool"))
        .unwrap();
    let replacement = ComponentCell::new("ConnectionPool", Box::new(ConnectionPool::default()));
    factory.add_post_processor(Arc::new(Replacer {
        replacement: replacement.clone(),
    }));

    let got = factory.get_component("target").unwrap();
    assert!(Arc::ptr_eq(&got, &replacement));

    let failing = ComponentFactory::new();
    failing.register_type(pool_descriptor());
    failing
        .register_definition("target", ComponentDefinition::of("ConnectionPool"))
        .unwrap();
    failing.add_post_processor(Arc::new(Swallower));
    assert!(matches!(
        failing.get_component("target").unwrap_err(),
        CoreError::PostProcessing { .. }
    ));
}

#[test]
fn teardown_runs_dependents_first_and_survives_failures() {
    static LOG: Mutex<Vec<&'static str>> = Mutex::new(Vec::new());

    struct Store;
    impl Disposable for Store {
        fn destroy(&mut self) -> Result<(), CoreError> {
            LOG.lock().push("store");
            Ok(())
        }
    }
    struct Cache;
    impl Disposable for Cache {
        fn destroy(&mut self) -> Result<(), CoreError> {
            LOG.lock().push("cache");
            Ok(())
        }
    }
    struct Flaky;
    impl Disposable for Flaky {
        fn destroy(&mut self) -> Result<(), CoreError> {
            LOG.lock().push("flaky");
            Err(CoreError::PostProcessing {
                name: "flaky".into(),
                message: "disposal failed".into(),
            })
        }
    }

    let factory = ComponentFactory::new();
    factory.register_type(
        TypeDescriptor::new("Store")
            .default_constructor(|| Store)
            .disposable::<Store>(),
    );
    factory.register_type(
        TypeDescriptor::new("Cache")
            .default_constructor(|| Cache)
            .disposable::<Cache>(),
    );
    factory.register_type(
        TypeDescriptor::new("Flaky")
            .default_constructor(|| Flaky)
            .disposable::<Flaky>(),
    );

    factory
        .register_definition("store", ComponentDefinition::of("Store"))
        .unwrap();
    factory
        .register_definition(
            "cache",
            ComponentDefinition::of("Cache").depends_on(["store"]),
        )
        .unwrap();
    factory
        .register_definition("flaky", ComponentDefinition::of("Flaky"))
        .unwrap();

    factory.get_component("flaky").unwrap();
    factory.get_component("cache").unwrap();
    factory.destroy_singletons();

    // The cache depends on the store, so it is disposed first; the flaky
    // component's failure does not stop the sweep.
    let log = LOG.lock();
    let store_at = log.iter().position(|&e| e == "store").unwrap();
    let cache_at = log.iter().position(|&e| e == "cache").unwrap();
    assert!(cache_at < store_at);
    assert!(log.contains(&"flaky"));
    assert_eq!(factory.singleton_count(), 0);
}

#[test]
fn prototypes_are_not_tracked_for_teardown() {
    static LOG: Mutex<Vec<&'static str>> = Mutex::new(Vec::new());

    struct Job;
    impl Disposable for Job {
        fn destroy(&mut self) -> Result<(), CoreError> {
            LOG.lock().push("job");
            Ok(())
        }
    }

    let factory = ComponentFactory::new();
    factory.register_type(
        TypeDescriptor::new("Job")
            .default_constructor(|| Job)
            .disposable::<Job>(),
    );
    factory
        .register_definition("job", ComponentDefinition::of("Job").prototype())
        .unwrap();

    factory.get_component("job").unwrap();
    factory.get_component("job").unwrap();
    factory.destroy_singletons();
    assert!(LOG.lock().is_empty());
}

#[test]
fn custom_destroy_method_runs_after_lifecycle_callback() {
    static LOG: Mutex<Vec<&'static str>> = Mutex::new(Vec::new());

    struct Conn;
    impl Disposable for Conn {
        fn destroy(&mut self) -> Result<(), CoreError> {
            LOG.lock().push("callback");
            Ok(())
        }
    }

    let factory = ComponentFactory::new();
    factory.register_type(
        TypeDescriptor::new("Conn")
            .default_constructor(|| Conn)
            .disposable::<Conn>()
            .method::<Conn, _>("close", |_| {
                LOG.lock().push("close");
                Ok(())
            }),
    );
    factory
        .register_definition(
            "conn",
            ComponentDefinition::of("Conn").destroy_method("close"),
        )
        .unwrap();

    factory.get_component("conn").unwrap();
    factory.destroy_singletons();
    assert_eq!(*LOG.lock(), vec!["callback", "close"]);
}

#[test]
fn pre_instantiation_rolls_back_on_failure() {
    static LOG: Mutex<Vec<&'static str>> = Mutex::new(Vec::new());

    struct Good;
    impl Disposable for Good {
        fn destroy(&mut self) -> Result<(), CoreError> {
            LOG.lock().push("good");
            Ok(())
        }
    }

    let factory = ComponentFactory::new();
    factory.register_type(
        TypeDescriptor::new("Good")
            .default_constructor(|| Good)
            .disposable::<Good>(),
    );
    factory.register_type(TypeDescriptor::new("Broken").constructor::<i64, _>(&[], |_| {
        Err(CoreError::PostProcessing {
            name: "broken".into(),
            message: "cannot construct".into(),
        })
    }));
    factory
        .register_definition("good", ComponentDefinition::of("Good"))
        .unwrap();
    factory
        .register_definition("broken", ComponentDefinition::of("Broken"))
        .unwrap();

    assert!(factory.pre_instantiate_singletons().is_err());
    assert_eq!(*LOG.lock(), vec!["good"]);
    assert_eq!(factory.singleton_count(), 0);
}

#[test]
fn lazy_singletons_wait_for_first_request() {
    let factory = ComponentFactory::new();
    let constructions = Arc::new(AtomicUsize::new(0));
    {
        let constructions = constructions.clone();
        factory.register_type(TypeDescriptor::new("Lazy").constructor::<i64, _>(&[], move |_| {
            constructions.fetch_add(1, Ordering::SeqCst);
            Ok(0)
        }));
    }
    factory
        .register_definition("lazy", ComponentDefinition::of("Lazy").lazy())
        .unwrap();

    factory.pre_instantiate_singletons().unwrap();
    assert_eq!(constructions.load(Ordering::SeqCst), 0);
    factory.get_component("lazy").unwrap();
    assert_eq!(constructions.load(Ordering::SeqCst), 1);
}

#[test]
fn replacing_a_definition_evicts_its_singleton() {
    let factory = ComponentFactory::new();
    factory.register_type(pool_descriptor());
    factory
        .register_definition(
            "pool",
            ComponentDefinition::of("ConnectionPool").prop("url", Value::str("old://")),
        )
        .unwrap();
    let old = factory.get_component("pool").unwrap();

    factory
        .register_definition(
            "pool",
            ComponentDefinition::of("ConnectionPool").prop("url", Value::str("new://")),
        )
        .unwrap();
    let new = factory.get_component("pool").unwrap();
    assert!(!Arc::ptr_eq(&old, &new));
    assert_eq!(new.read::<ConnectionPool>().unwrap().url, "new://");
}

#[test]
fn aliases_resolve_to_the_canonical_component() {
    let factory = ComponentFactory::new();
    factory.register_type(pool_descriptor());
    factory
        .register_definition("pool", ComponentDefinition::of("ConnectionPool"))
        .unwrap();
    factory.register_alias("pool", "db").unwrap();
    factory.register_alias("db", "main-db").unwrap();

    let by_alias = factory.get_component("main-db").unwrap();
    assert!(Arc::ptr_eq(&by_alias, &factory.get_component("pool").unwrap()));
    assert!(factory.contains_component("db"));

    factory
        .register_definition("other", ComponentDefinition::of("ConnectionPool"))
        .unwrap();
    assert!(factory.register_alias("other", "db").is_err());
}

#[test]
fn manual_singletons_participate_in_lookups_and_matching() {
    let factory = ComponentFactory::new();
    factory.register_type(pool_descriptor());
    factory.register_type(repository_descriptor());

    let pool = ComponentCell::new(
        "ConnectionPool",
        Box::new(ConnectionPool {
            url: "manual://".into(),
            size: 1,
            open: true,
        }),
    );
    factory.register_singleton("pool", pool.clone()).unwrap();
    factory
        .register_definition(
            "repo",
            ComponentDefinition::of("Repository").autowire(AutowireMode::ByType),
        )
        .unwrap();

    assert!(factory.contains_component("pool"));
    assert_eq!(factory.component_type("pool").unwrap(), "ConnectionPool");
    assert_eq!(
        factory.component_names_of_type("ConnectionPool"),
        vec!["pool".to_string()]
    );

    // ByType wiring needs an assignability declaration for the key the
    // property asks for; Repository asks for "ConnectionPool" directly.
    let cell = factory.get_component("repo").unwrap();
    let wired = cell.read::<Repository>().unwrap().pool.clone().unwrap();
    assert!(Arc::ptr_eq(&wired, &pool));
}

#[test]
fn custom_converter_applies_per_property_path() {
    struct KibiConverter;
    impl Converter for KibiConverter {
        fn convert(&self, value: Resolved, target: TypeKey) -> Result<Resolved, CoreError> {
            match (value, target) {
                (Resolved::Str(s), TypeKey::Int) if s.ends_with('k') => {
                    let base: i64 = s[..s.len() - 1].parse().map_err(|_| {
                        CoreError::Conversion {
                            target,
                            message: s.clone(),
                        }
                    })?;
                    Ok(Resolved::Int(base * 1024))
                }
                (value, target) => trellis_core::SimpleConverter.convert(value, target),
            }
        }
    }

    let factory = ComponentFactory::new();
    factory.register_type(pool_descriptor());
    factory.register_converter_for_path("ConnectionPool.size", Arc::new(KibiConverter));
    factory
        .register_definition(
            "pool",
            ComponentDefinition::of("ConnectionPool").prop("size", Value::str("4k")),
        )
        .unwrap();

    let cell = factory.get_component("pool").unwrap();
    assert_eq!(cell.read::<ConnectionPool>().unwrap().size, 4096);
}

#[test]
fn typed_retrieval_checks_assignability() {
    let factory = ComponentFactory::new();
    factory.register_type(pool_descriptor());
    factory
        .register_definition("pool", ComponentDefinition::of("ConnectionPool"))
        .unwrap();

    assert!(factory.get_component_typed("pool", "ConnectionPool").is_ok());
    assert!(matches!(
        factory.get_component_typed("pool", "Repository").unwrap_err(),
        CoreError::TypeMismatch { .. }
    ));
}

#[test]
fn ignored_types_are_skipped_by_autowiring() {
    let factory = ComponentFactory::new();
    factory.register_type(service_descriptor());
    factory.register_type(
        TypeDescriptor::new("ConsoleSink")
            .implements("AuditSink")
            .default_constructor(|| 0i64),
    );
    factory.ignore_dependency_type("AuditSink");
    factory
        .register_definition("console", ComponentDefinition::of("ConsoleSink"))
        .unwrap();
    factory
        .register_definition(
            "svc",
            ComponentDefinition::of("Service").autowire(AutowireMode::ByType),
        )
        .unwrap();

    let cell = factory.get_component("svc").unwrap();
    assert!(cell.read::<Service>().unwrap().sink.is_none());
}
