//! Module graph construction
//!
//! Walks requested modules breadth-first from the entry. Every module of one
//! frontier has its requests resolved and loaded on a scoped worker thread;
//! the registry coalesces loads of the same identity across workers and
//! across concurrent builds.

use std::sync::Arc;

use tracing::{debug, trace};

use super::graph::ModuleGraph;
use super::loader::Loader;
use super::registry::{ModuleId, ModuleInstance, ModuleRegistry};
use super::resolver::Resolver;
use crate::config::EngineConfig;
use crate::error::GraphError;

type Dependencies = Vec<(String, ModuleId)>;

/// Builds closed module graphs against one registry
pub struct GraphBuilder<'a> {
    registry: &'a ModuleRegistry,
    resolver: &'a dyn Resolver,
    loader: &'a dyn Loader,
    concurrency: usize,
    max_modules: usize,
}

impl<'a> GraphBuilder<'a> {
    pub fn new(
        registry: &'a ModuleRegistry,
        resolver: &'a dyn Resolver,
        loader: &'a dyn Loader,
        config: &EngineConfig,
    ) -> Self {
        Self {
            registry,
            resolver,
            loader,
            concurrency: config.loader.concurrency.max(1),
            max_modules: config.graph.max_modules,
        }
    }

    /// Resolve, load and connect everything reachable from `entry`
    pub fn build(&self, entry: &str) -> Result<ModuleGraph, GraphError> {
        let identity = self
            .resolver
            .resolve(entry, None)
            .map_err(|source| GraphError::Resolution {
                specifier: entry.to_string(),
                referrer: None,
                source,
            })?;
        let entry_id = self.registry.get_or_load(&identity, self.loader)?;
        let entry_instance = self.instance(entry_id)?;
        let mut graph = ModuleGraph::new(entry_id, &identity, entry_instance.kind());

        let mut frontier = vec![entry_id];
        while !frontier.is_empty() {
            trace!(modules = frontier.len(), "expanding frontier");
            let expanded = self.expand_all(&frontier)?;

            let mut next = Vec::new();
            for (from, deps) in frontier.iter().zip(expanded) {
                for (_, to) in deps {
                    if !graph.contains(to) {
                        if graph.len() >= self.max_modules {
                            return Err(GraphError::GraphTooLarge {
                                limit: self.max_modules,
                            });
                        }
                        let instance = self.instance(to)?;
                        graph.add_module(to, instance.identity(), instance.kind());
                        next.push(to);
                    }
                    graph.add_dependency(*from, to);
                }
            }
            frontier = next;
        }

        debug!(entry = %identity, modules = graph.len(), "module graph built");
        Ok(graph)
    }

    /// Expand a frontier, in frontier order, using up to `concurrency` workers
    fn expand_all(&self, frontier: &[ModuleId]) -> Result<Vec<Dependencies>, GraphError> {
        if self.concurrency == 1 || frontier.len() == 1 {
            return frontier.iter().map(|&id| self.expand(id)).collect();
        }

        let mut results = Vec::with_capacity(frontier.len());
        for chunk in frontier.chunks(self.concurrency) {
            let joined = crossbeam::scope(|scope| {
                let handles: Vec<_> = chunk
                    .iter()
                    .map(|&id| (id, scope.spawn(move |_| self.expand(id))))
                    .collect();
                handles
                    .into_iter()
                    .map(|(id, handle)| {
                        handle.join().unwrap_or_else(|_| {
                            Err(GraphError::Fetch {
                                identity: self.identity_of(id),
                                message: "loader worker panicked".to_string(),
                            })
                        })
                    })
                    .collect::<Vec<_>>()
            })
            .map_err(|_| GraphError::Fetch {
                identity: String::new(),
                message: "loader worker panicked".to_string(),
            })?;
            for result in joined {
                results.push(result?);
            }
        }
        Ok(results)
    }

    /// Resolve and load the requested modules of one module
    fn expand(&self, id: ModuleId) -> Result<Dependencies, GraphError> {
        let instance = self.instance(id)?;
        if let Some(deps) = instance.dependencies() {
            return Ok(deps.to_vec());
        }

        let referrer = instance.identity();
        let mut deps = Vec::with_capacity(instance.record().requested_modules.len());
        for specifier in &instance.record().requested_modules {
            let identity = self
                .resolver
                .resolve(specifier, Some(referrer))
                .map_err(|source| GraphError::Resolution {
                    specifier: specifier.clone(),
                    referrer: Some(referrer.to_string()),
                    source,
                })?;
            trace!(referrer, specifier = %specifier, identity = %identity, "resolved");
            deps.push((specifier.clone(), self.registry.get_or_load(&identity, self.loader)?));
        }
        instance.set_dependencies(deps.clone());
        Ok(deps)
    }

    fn instance(&self, id: ModuleId) -> Result<Arc<ModuleInstance>, GraphError> {
        self.registry.get(id).ok_or_else(|| GraphError::Fetch {
            identity: id.to_string(),
            message: "module vanished from the registry".to_string(),
        })
    }

    fn identity_of(&self, id: ModuleId) -> String {
        self.registry
            .get(id)
            .map(|m| m.identity().to_string())
            .unwrap_or_else(|| id.to_string())
    }
}
