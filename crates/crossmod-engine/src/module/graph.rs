//! Module dependency graph
//!
//! Built once per `build_graph` call, then frozen. Provides:
//! - Detection of cycles made only of Binary modules
//! - Strongly connected components for the evaluator, dependencies first

use rustc_hash::{FxHashMap, FxHashSet};

use super::registry::ModuleId;
use crate::record::ModuleKind;

/// A node in the module graph
#[derive(Debug, Clone)]
pub struct ModuleNode {
    pub id: ModuleId,
    /// Canonical identity of the module
    pub identity: String,
    pub kind: ModuleKind,
    /// Modules this module imports (dependencies)
    pub imports: Vec<ModuleId>,
}

impl ModuleNode {
    pub fn new(id: ModuleId, identity: &str, kind: ModuleKind) -> Self {
        Self {
            id,
            identity: identity.to_string(),
            kind,
            imports: Vec::new(),
        }
    }
}

/// Closed dependency graph rooted at an entry module
#[derive(Debug, Clone)]
pub struct ModuleGraph {
    entry: ModuleId,
    nodes: FxHashMap<ModuleId, ModuleNode>,
    /// Insertion order, which is breadth-first from the entry
    order: Vec<ModuleId>,
}

impl ModuleGraph {
    /// Create a graph holding only its entry module
    pub fn new(entry: ModuleId, identity: &str, kind: ModuleKind) -> Self {
        let mut graph = Self {
            entry,
            nodes: FxHashMap::default(),
            order: Vec::new(),
        };
        graph.add_module(entry, identity, kind);
        graph
    }

    /// Add a module to the graph
    pub fn add_module(&mut self, id: ModuleId, identity: &str, kind: ModuleKind) {
        if !self.nodes.contains_key(&id) {
            self.nodes.insert(id, ModuleNode::new(id, identity, kind));
            self.order.push(id);
        }
    }

    /// Add a dependency edge from a module already present
    pub fn add_dependency(&mut self, from: ModuleId, to: ModuleId) {
        if let Some(node) = self.nodes.get_mut(&from) {
            if !node.imports.contains(&to) {
                node.imports.push(to);
            }
        }
    }

    pub fn entry(&self) -> ModuleId {
        self.entry
    }

    pub fn get(&self, id: ModuleId) -> Option<&ModuleNode> {
        self.nodes.get(&id)
    }

    pub fn contains(&self, id: ModuleId) -> bool {
        self.nodes.contains_key(&id)
    }

    /// Modules in breadth-first order from the entry
    pub fn modules(&self) -> impl Iterator<Item = ModuleId> + '_ {
        self.order.iter().copied()
    }

    pub fn identity(&self, id: ModuleId) -> Option<&str> {
        self.nodes.get(&id).map(|n| n.identity.as_str())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Find a cycle whose every edge runs from a Binary module to a Binary
    /// module, returned as identities with the first repeated at the end
    pub fn detect_binary_cycle(&self) -> Option<Vec<String>> {
        let mut visited = FxHashSet::default();
        let mut rec_stack = FxHashSet::default();
        let mut path = Vec::new();

        for &start in &self.order {
            if self.nodes[&start].kind != ModuleKind::Binary || visited.contains(&start) {
                continue;
            }
            let found = self.dfs_binary_cycle(start, &mut visited, &mut rec_stack, &mut path);
            if let Some(cycle) = found {
                return Some(
                    cycle
                        .into_iter()
                        .map(|id| self.nodes[&id].identity.clone())
                        .collect(),
                );
            }
        }
        None
    }

    fn dfs_binary_cycle(
        &self,
        node: ModuleId,
        visited: &mut FxHashSet<ModuleId>,
        rec_stack: &mut FxHashSet<ModuleId>,
        path: &mut Vec<ModuleId>,
    ) -> Option<Vec<ModuleId>> {
        visited.insert(node);
        rec_stack.insert(node);
        path.push(node);

        for &dep in &self.nodes[&node].imports {
            if self.nodes[&dep].kind != ModuleKind::Binary {
                continue;
            }
            if !visited.contains(&dep) {
                if let Some(cycle) = self.dfs_binary_cycle(dep, visited, rec_stack, path) {
                    return Some(cycle);
                }
            } else if rec_stack.contains(&dep) {
                if let Some(start) = path.iter().position(|&p| p == dep) {
                    let mut cycle = path[start..].to_vec();
                    cycle.push(dep);
                    return Some(cycle);
                }
            }
        }

        path.pop();
        rec_stack.remove(&node);
        None
    }

    /// Strongly connected components (Tarjan), restricted to `include`
    ///
    /// Components come out dependencies-first; edges leaving `include` are
    /// ignored.
    pub fn strongly_connected_components(
        &self,
        include: &FxHashSet<ModuleId>,
    ) -> Vec<Vec<ModuleId>> {
        let mut tarjan = Tarjan {
            graph: self,
            include,
            index: 0,
            indices: FxHashMap::default(),
            lowlinks: FxHashMap::default(),
            stack: Vec::new(),
            on_stack: FxHashSet::default(),
            components: Vec::new(),
        };
        for &id in &self.order {
            if include.contains(&id) && !tarjan.indices.contains_key(&id) {
                tarjan.visit(id);
            }
        }
        tarjan.components
    }
}

struct Tarjan<'a> {
    graph: &'a ModuleGraph,
    include: &'a FxHashSet<ModuleId>,
    index: usize,
    indices: FxHashMap<ModuleId, usize>,
    lowlinks: FxHashMap<ModuleId, usize>,
    stack: Vec<ModuleId>,
    on_stack: FxHashSet<ModuleId>,
    components: Vec<Vec<ModuleId>>,
}

impl Tarjan<'_> {
    fn visit(&mut self, id: ModuleId) {
        self.indices.insert(id, self.index);
        self.lowlinks.insert(id, self.index);
        self.index += 1;
        self.stack.push(id);
        self.on_stack.insert(id);

        let graph = self.graph;
        for &dep in &graph.nodes[&id].imports {
            if !self.include.contains(&dep) {
                continue;
            }
            if !self.indices.contains_key(&dep) {
                self.visit(dep);
                let low = self.lowlinks[&id].min(self.lowlinks[&dep]);
                self.lowlinks.insert(id, low);
            } else if self.on_stack.contains(&dep) {
                let low = self.lowlinks[&id].min(self.indices[&dep]);
                self.lowlinks.insert(id, low);
            }
        }

        if self.lowlinks[&id] == self.indices[&id] {
            let mut component = Vec::new();
            while let Some(member) = self.stack.pop() {
                self.on_stack.remove(&member);
                component.push(member);
                if member == id {
                    break;
                }
            }
            component.reverse();
            self.components.push(component);
        }
    }
}
