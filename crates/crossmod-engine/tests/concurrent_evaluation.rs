//! Concurrent graph builds and evaluations sharing one engine

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossmod_engine::{
    Engine, EngineConfig, ExportDecl, ImportDecl, LoadError, Loader, MapResolver, MemoryLoader,
    ModuleRecord, ScriptBody, Value,
};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

const ENTRIES: usize = 8;

/// Shared module whose body counts its executions
fn shared_records(runs: Arc<AtomicUsize>) -> MemoryLoader {
    let loader = MemoryLoader::new().with(
        "/shared.js",
        ModuleRecord::script(ScriptBody::new(move |env| {
            runs.fetch_add(1, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(5));
            env.set("value", 42.0)
        }))
        .export(ExportDecl::local("value")),
    );
    for i in 0..ENTRIES {
        loader.insert(
            &format!("/main{}.js", i),
            ModuleRecord::script(ScriptBody::new(|env| {
                let value = env.import("value")?;
                env.set("copy", value)
            }))
            .import(ImportDecl::value("./shared.js", "value"))
            .export(ExportDecl::local("copy")),
        );
    }
    loader
}

#[test]
fn test_shared_module_evaluates_once() {
    let runs = Arc::new(AtomicUsize::new(0));
    let engine = Arc::new(Engine::new(MapResolver::new(), shared_records(runs.clone())));

    let handles: Vec<_> = (0..ENTRIES)
        .map(|i| {
            let engine = engine.clone();
            thread::spawn(move || {
                let ns = engine.run(&format!("./main{}.js", i)).unwrap();
                ns.get("copy").unwrap()
            })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.join().unwrap(), Value::Number(42.0));
    }
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert!(engine.module_state("/shared.js").unwrap().is_completed());
}

#[test]
fn test_concurrent_evaluations_of_one_linked_graph() {
    let runs = Arc::new(AtomicUsize::new(0));
    let engine = Arc::new(Engine::new(MapResolver::new(), shared_records(runs.clone())));
    let graph = engine.build_graph("./main0.js").unwrap();
    let linked = Arc::new(engine.link(&graph).unwrap());

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let engine = engine.clone();
            let linked = linked.clone();
            thread::spawn(move || engine.evaluate(&linked).map(|ns| ns.get("copy").ok()))
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.join().unwrap().unwrap(), Some(Value::Number(42.0)));
    }
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

/// Loader that counts how often each identity is fetched
struct CountingLoader {
    inner: MemoryLoader,
    loads: Arc<Mutex<FxHashMap<String, usize>>>,
}

impl Loader for CountingLoader {
    fn load(&self, identity: &str) -> Result<ModuleRecord, LoadError> {
        *self.loads.lock().entry(identity.to_string()).or_default() += 1;
        thread::sleep(Duration::from_millis(5));
        self.inner.load(identity)
    }
}

#[test]
fn test_concurrent_builds_load_each_module_once() {
    let loads = Arc::new(Mutex::new(FxHashMap::default()));
    let loader = CountingLoader {
        inner: shared_records(Arc::new(AtomicUsize::new(0))),
        loads: loads.clone(),
    };
    let engine = Arc::new(Engine::new(MapResolver::new(), loader));

    let handles: Vec<_> = (0..ENTRIES)
        .map(|i| {
            let engine = engine.clone();
            thread::spawn(move || engine.build_graph(&format!("./main{}.js", i)).map(|g| g.len()))
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.join().unwrap().unwrap(), 2);
    }

    assert_eq!(engine.registry().len(), ENTRIES + 1);
    let loads = loads.lock();
    assert_eq!(loads.len(), ENTRIES + 1);
    assert!(loads.values().all(|&count| count == 1));
    let id = engine.registry().lookup("/shared.js").unwrap();
    assert_eq!(engine.registry().get(id).unwrap().identity(), "/shared.js");
}

#[test]
fn test_closure_loader_with_parallel_frontier() {
    let fetches = Arc::new(AtomicUsize::new(0));
    let counter = fetches.clone();
    let records = shared_records(Arc::new(AtomicUsize::new(0)));
    let hub = (0..ENTRIES).fold(ModuleRecord::script(ScriptBody::empty()), |record, i| {
        record.request(&format!("./main{}.js", i))
    });
    records.insert("/hub.js", hub);

    let loader = move |identity: &str| -> Result<ModuleRecord, LoadError> {
        counter.fetch_add(1, Ordering::SeqCst);
        records.load(identity)
    };
    let mut config = EngineConfig::default();
    config.loader.concurrency = 3;
    let engine = Engine::with_config(config, MapResolver::new(), loader);

    let graph = engine.build_graph("./hub.js").unwrap();
    assert_eq!(graph.len(), ENTRIES + 2);
    assert_eq!(fetches.load(Ordering::SeqCst), ENTRIES + 2);

    engine.run("./hub.js").unwrap();
    assert_eq!(fetches.load(Ordering::SeqCst), ENTRIES + 2);
}
