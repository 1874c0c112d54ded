//! Engine facade
//!
//! Owns the module registry and drives the three strictly staged phases:
//! build the graph, link it, evaluate it. An `Engine` is `Send + Sync`;
//! builds, links and evaluations may run from many threads at once.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::instrument;

use crate::config::EngineConfig;
use crate::env::ModuleEnvironment;
use crate::error::{Error, EvalError, GraphError, LinkError};
use crate::eval::{EvaluationState, Evaluator, ModuleNamespace};
use crate::link::{LinkedGraph, Linker};
use crate::module::{GraphBuilder, Loader, ModuleGraph, ModuleRegistry, Resolver};

/// A module linking and evaluation engine
pub struct Engine {
    config: EngineConfig,
    resolver: Arc<dyn Resolver>,
    loader: Arc<dyn Loader>,
    registry: ModuleRegistry,
    /// Serializes links against the registry
    link_lock: Mutex<()>,
    next_traversal: AtomicU64,
}

impl Engine {
    pub fn new(resolver: impl Resolver + 'static, loader: impl Loader + 'static) -> Self {
        Self::with_config(EngineConfig::default(), resolver, loader)
    }

    pub fn with_config(
        config: EngineConfig,
        resolver: impl Resolver + 'static,
        loader: impl Loader + 'static,
    ) -> Self {
        Self {
            config,
            resolver: Arc::new(resolver),
            loader: Arc::new(loader),
            registry: ModuleRegistry::new(),
            link_lock: Mutex::new(()),
            next_traversal: AtomicU64::new(1),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &ModuleRegistry {
        &self.registry
    }

    /// Resolve and load everything reachable from `entry`
    #[instrument(level = "debug", skip(self))]
    pub fn build_graph(&self, entry: &str) -> Result<ModuleGraph, GraphError> {
        let resolver = self.resolver.as_ref();
        GraphBuilder::new(&self.registry, resolver, self.loader.as_ref(), &self.config).build(entry)
    }

    /// Allocate slots and resolve imports for every module in `graph`
    #[instrument(level = "debug", skip(self, graph), fields(modules = graph.len()))]
    pub fn link(&self, graph: &ModuleGraph) -> Result<LinkedGraph, LinkError> {
        let _guard = self.link_lock.lock();
        Linker::new(&self.registry).link(graph)
    }

    /// Evaluate the linked graph from its entry and return the entry's exports
    #[instrument(level = "debug", skip(self, linked), fields(entry = %linked.entry()))]
    pub fn evaluate(&self, linked: &LinkedGraph) -> Result<ModuleNamespace, EvalError> {
        let traversal = self.next_traversal.fetch_add(1, Ordering::Relaxed);
        Evaluator::new(&self.registry, traversal).evaluate(linked)
    }

    /// Build, link and evaluate `entry`
    pub fn run(&self, entry: &str) -> Result<ModuleNamespace, Error> {
        let graph = self.build_graph(entry)?;
        let linked = self.link(&graph)?;
        Ok(self.evaluate(&linked)?)
    }

    /// Evaluation state of a loaded module
    pub fn module_state(&self, identity: &str) -> Option<EvaluationState> {
        let id = self.registry.lookup(identity)?;
        Some(self.registry.get(id)?.state())
    }

    /// Environment of a linked module
    pub fn environment(&self, identity: &str) -> Option<Arc<ModuleEnvironment>> {
        let id = self.registry.lookup(identity)?;
        self.registry.get(id)?.environment().cloned()
    }
}
