//! Module linking and export resolution
//!
//! Allocates every module's slots, resolves every import to the slot that
//! ultimately provides it and checks Binary-to-Binary imports against their
//! exports. Nothing is executed and no slot value is read. All work is
//! staged and committed only once the whole graph linked.

use std::collections::BTreeMap;
use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, trace};

use crate::coerce;
use crate::env::{BindingMode, BindingSlot, ImportBinding, ModuleEnvironment};
use crate::error::{LinkError, LinkTypeError};
use crate::eval::Component;
use crate::module::{ModuleGraph, ModuleId, ModuleInstance, ModuleRegistry};
use crate::record::{ExportSource, ImportDecl, ModuleKind};

/// A graph whose modules all have environments
#[derive(Debug, Clone)]
pub struct LinkedGraph {
    graph: ModuleGraph,
}

impl LinkedGraph {
    pub fn entry(&self) -> ModuleId {
        self.graph.entry()
    }

    pub fn graph(&self) -> &ModuleGraph {
        &self.graph
    }
}

/// Outcome of resolving an export name
#[derive(Debug, Clone)]
pub enum Resolution {
    Found { module: ModuleId, slot: Arc<BindingSlot> },
    NotFound,
    Ambiguous,
}

/// Resolves export names over committed and staged environments
struct ExportResolver<'a> {
    registry: &'a ModuleRegistry,
    staged: &'a FxHashMap<ModuleId, Arc<ModuleEnvironment>>,
}

impl ExportResolver<'_> {
    fn environment(&self, instance: &ModuleInstance) -> Option<Arc<ModuleEnvironment>> {
        self.staged
            .get(&instance.id())
            .or_else(|| instance.environment())
            .cloned()
    }

    /// ResolveExport: follow indirect and star re-exports to an origin slot
    fn resolve(
        &self,
        module: ModuleId,
        name: &str,
        resolve_set: &mut Vec<(ModuleId, String)>,
    ) -> Resolution {
        if resolve_set.iter().any(|(m, n)| *m == module && n == name) {
            // Circular re-export chain
            return Resolution::NotFound;
        }
        resolve_set.push((module, name.to_string()));

        let Some(instance) = self.registry.get(module) else {
            return Resolution::NotFound;
        };
        let record = instance.record();

        if let Some(export) = record.exports.iter().find(|e| e.name == name) {
            return match &export.source {
                ExportSource::Indirect { module: specifier, name: imported } => {
                    match instance.dependency(specifier) {
                        Some(target) => self.resolve(target, imported, resolve_set),
                        None => Resolution::NotFound,
                    }
                }
                _ => {
                    let env = self.environment(&instance);
                    match env.and_then(|env| env.export_slot(name).cloned()) {
                        Some(slot) => Resolution::Found { module, slot },
                        None => Resolution::NotFound,
                    }
                }
            };
        }

        if name == "default" {
            return Resolution::NotFound;
        }

        let mut star: Option<(ModuleId, Arc<BindingSlot>)> = None;
        for specifier in &record.star_exports {
            let Some(target) = instance.dependency(specifier) else {
                continue;
            };
            match self.resolve(target, name, resolve_set) {
                Resolution::Ambiguous => return Resolution::Ambiguous,
                Resolution::NotFound => {}
                Resolution::Found { module, slot } => match &star {
                    None => star = Some((module, slot)),
                    Some((_, existing)) if existing.ptr_eq(&slot) => {}
                    Some(_) => return Resolution::Ambiguous,
                },
            }
        }
        match star {
            Some((module, slot)) => Resolution::Found { module, slot },
            None => Resolution::NotFound,
        }
    }

    /// GetExportedNames: local and indirect names, then star names
    fn exported_names(&self, module: ModuleId, visited: &mut FxHashSet<ModuleId>) -> Vec<String> {
        if !visited.insert(module) {
            return Vec::new();
        }
        let Some(instance) = self.registry.get(module) else {
            return Vec::new();
        };
        let record = instance.record();
        let mut names: Vec<String> = record.exports.iter().map(|e| e.name.clone()).collect();
        for specifier in &record.star_exports {
            let Some(target) = instance.dependency(specifier) else {
                continue;
            };
            for name in self.exported_names(target, visited) {
                if name != "default" && !names.contains(&name) {
                    names.push(name);
                }
            }
        }
        names
    }
}

/// Export names of a linked module mapped to the slots providing them
///
/// Ambiguous star names are left out.
pub(crate) fn namespace_bindings(
    registry: &ModuleRegistry,
    module: ModuleId,
) -> BTreeMap<String, Arc<BindingSlot>> {
    let staged = FxHashMap::default();
    let resolver = ExportResolver {
        registry,
        staged: &staged,
    };
    let mut bindings = BTreeMap::new();
    for name in resolver.exported_names(module, &mut FxHashSet::default()) {
        if let Resolution::Found { slot, .. } = resolver.resolve(module, &name, &mut Vec::new()) {
            bindings.insert(name, slot);
        }
    }
    bindings
}

/// Links built graphs against one registry
pub struct Linker<'a> {
    registry: &'a ModuleRegistry,
}

impl<'a> Linker<'a> {
    pub fn new(registry: &'a ModuleRegistry) -> Self {
        Self { registry }
    }

    /// Link every module of `graph` not linked by an earlier call
    ///
    /// Callers serialize links on one registry.
    pub fn link(&self, graph: &ModuleGraph) -> Result<LinkedGraph, LinkError> {
        if let Some(cycle) = graph.detect_binary_cycle() {
            return Err(LinkError::UnsupportedCycle { cycle });
        }

        let mut pending = Vec::new();
        let mut staged = FxHashMap::default();
        for id in graph.modules() {
            let Some(instance) = self.registry.get(id) else {
                continue;
            };
            if !instance.is_linked() {
                let env = ModuleEnvironment::new(id, instance.identity(), instance.record());
                staged.insert(id, env);
                pending.push(instance);
            }
        }

        let resolver = ExportResolver {
            registry: self.registry,
            staged: &staged,
        };
        let mut imports = Vec::with_capacity(pending.len());
        for instance in &pending {
            imports.push(self.resolve_imports(&resolver, instance)?);
        }

        // Every import resolved; commit
        let include: FxHashSet<ModuleId> = staged.keys().copied().collect();
        let mut components: FxHashMap<ModuleId, Arc<Component>> = FxHashMap::default();
        for members in graph.strongly_connected_components(&include) {
            let component = Arc::new(Component::new(members.clone()));
            for member in members {
                components.insert(member, component.clone());
            }
        }
        for (instance, bindings) in pending.iter().zip(imports) {
            let id = instance.id();
            let (Some(env), Some(component)) = (staged.get(&id), components.get(&id)) else {
                continue;
            };
            env.set_imports(bindings);
            instance.commit_link(env.clone(), component.clone());
        }

        debug!(
            entry = graph.identity(graph.entry()).unwrap_or_default(),
            linked = pending.len(),
            "module graph linked"
        );
        Ok(LinkedGraph { graph: graph.clone() })
    }

    fn resolve_imports(
        &self,
        resolver: &ExportResolver<'_>,
        instance: &ModuleInstance,
    ) -> Result<FxHashMap<String, ImportBinding>, LinkError> {
        let mut bindings = FxHashMap::default();
        for decl in &instance.record().imports {
            let binding = self.resolve_import(resolver, instance, decl)?;
            bindings.insert(decl.local.clone(), binding);
        }
        Ok(bindings)
    }

    fn resolve_import(
        &self,
        resolver: &ExportResolver<'_>,
        importer: &ModuleInstance,
        decl: &ImportDecl,
    ) -> Result<ImportBinding, LinkError> {
        let unresolved = |module: String| LinkError::UnresolvedExport {
            module,
            name: decl.name.clone(),
            importer: importer.identity().to_string(),
        };
        let target = importer
            .dependency(&decl.module)
            .ok_or_else(|| unresolved(decl.module.clone()))?;
        let target_identity = self
            .registry
            .get(target)
            .map(|m| m.identity().to_string())
            .unwrap_or_else(|| decl.module.clone());

        let (origin, slot) = match resolver.resolve(target, &decl.name, &mut Vec::new()) {
            Resolution::Found { module, slot } => (module, slot),
            Resolution::NotFound => return Err(unresolved(target_identity)),
            Resolution::Ambiguous => {
                return Err(LinkError::AmbiguousExport {
                    module: target_identity,
                    name: decl.name.clone(),
                    importer: importer.identity().to_string(),
                })
            }
        };
        let origin_kind = self
            .registry
            .get(origin)
            .map(|m| m.kind())
            .ok_or_else(|| unresolved(slot.module().to_string()))?;

        if importer.kind() == ModuleKind::Binary && origin_kind == ModuleKind::Binary {
            coerce::check_link(decl.kind, &decl.ty, slot.kind(), slot.ty()).map_err(|reason| {
                LinkTypeError {
                    module: importer.identity().to_string(),
                    name: decl.local.clone(),
                    from: slot.module().to_string(),
                    reason,
                }
            })?;
        }

        let mode = if importer.kind() == origin_kind {
            BindingMode::Live
        } else {
            BindingMode::Snapshot
        };
        trace!(
            importer = importer.identity(),
            local = %decl.local,
            origin = slot.module(),
            export = slot.name(),
            ?mode,
            "import resolved"
        );
        Ok(ImportBinding {
            decl: decl.clone(),
            origin,
            origin_kind,
            local: BindingSlot::new(importer.identity(), &decl.local, decl.kind, decl.ty.clone()),
            target: slot,
            mode,
        })
    }
}
