//! Module evaluation
//!
//! A post-order depth-first traversal from the entry module. Each module
//! first resolves its imports (capturing snapshots for cross-kind imports),
//! then runs its body. Strongly connected components are claimed by the
//! first traversal that reaches them, so a module shared by concurrent
//! evaluations runs exactly once and later traversals wait for its outcome.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace, warn};

use crate::coerce;
use crate::env::{BindingMode, BindingSlot, ModuleEnvironment};
use crate::error::{EvalError, LinkTypeError};
use crate::link::{namespace_bindings, LinkedGraph};
use crate::module::{ModuleId, ModuleInstance, ModuleRegistry};
use crate::record::{BinaryBody, ExportSource, GlobalInit, ModuleBody, ModuleKind, ModuleRecord};
use crate::value::{Function, Global, Memory, Table, Value};

/// Evaluation progress of one module
#[derive(Debug, Clone)]
pub enum EvaluationState {
    NotStarted,
    InProgress,
    Completed,
    /// Evaluation failed; later evaluations replay the error
    Errored(EvalError),
}

impl EvaluationState {
    pub fn is_completed(&self) -> bool {
        matches!(self, EvaluationState::Completed)
    }

    pub fn is_errored(&self) -> bool {
        matches!(self, EvaluationState::Errored(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Claim {
    Open,
    Held { traversal: u64 },
    Released,
}

enum Acquired {
    /// This traversal now owns the component
    Root,
    /// This traversal already owns the component
    Reentered,
    /// Another traversal finished the component
    Released,
}

/// A strongly connected component of the module graph
///
/// Exactly one traversal evaluates a component. The claim is released once
/// the module through which it was entered finishes.
pub struct Component {
    members: Vec<ModuleId>,
    claim: Mutex<Claim>,
    released: Condvar,
}

impl Component {
    pub(crate) fn new(members: Vec<ModuleId>) -> Self {
        Self {
            members,
            claim: Mutex::new(Claim::Open),
            released: Condvar::new(),
        }
    }

    pub fn members(&self) -> &[ModuleId] {
        &self.members
    }

    fn acquire(&self, traversal: u64) -> Acquired {
        let mut claim = self.claim.lock();
        loop {
            match *claim {
                Claim::Open => {
                    *claim = Claim::Held { traversal };
                    return Acquired::Root;
                }
                Claim::Held { traversal: holder } if holder == traversal => {
                    return Acquired::Reentered
                }
                Claim::Held { .. } => self.released.wait(&mut claim),
                Claim::Released => return Acquired::Released,
            }
        }
    }

    fn release(&self) {
        *self.claim.lock() = Claim::Released;
        self.released.notify_all();
    }
}

impl fmt::Debug for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Component")
            .field("members", &self.members)
            .field("claim", &*self.claim.lock())
            .finish()
    }
}

/// Exports of an evaluated module
#[derive(Debug, Clone)]
pub struct ModuleNamespace {
    module: String,
    bindings: BTreeMap<String, Arc<BindingSlot>>,
}

impl ModuleNamespace {
    /// Identity of the module
    pub fn module(&self) -> &str {
        &self.module
    }

    /// Current value of an export
    pub fn get(&self, name: &str) -> Result<Value, EvalError> {
        self.bindings
            .get(name)
            .ok_or_else(|| EvalError::Unbound {
                module: self.module.clone(),
                name: name.to_string(),
            })?
            .read()
    }

    /// Sorted export names
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.bindings.keys().map(String::as_str)
    }

    pub fn slot(&self, name: &str) -> Option<&Arc<BindingSlot>> {
        self.bindings.get(name)
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

/// One traversal over linked modules
pub struct Evaluator<'a> {
    registry: &'a ModuleRegistry,
    traversal: u64,
}

impl<'a> Evaluator<'a> {
    /// `traversal` must be unique among concurrent evaluations
    pub fn new(registry: &'a ModuleRegistry, traversal: u64) -> Self {
        Self { registry, traversal }
    }

    pub fn evaluate(&self, linked: &LinkedGraph) -> Result<ModuleNamespace, EvalError> {
        let entry = self.instance(linked.entry())?;
        self.visit(&entry)?;
        Ok(ModuleNamespace {
            module: entry.identity().to_string(),
            bindings: namespace_bindings(self.registry, entry.id()),
        })
    }

    fn instance(&self, id: ModuleId) -> Result<Arc<ModuleInstance>, EvalError> {
        self.registry
            .get(id)
            .ok_or_else(|| EvalError::NotLinked(id.to_string()))
    }

    fn visit(&self, instance: &ModuleInstance) -> Result<(), EvalError> {
        let component = instance
            .component()
            .ok_or_else(|| EvalError::NotLinked(instance.identity().to_string()))?;

        match component.acquire(self.traversal) {
            Acquired::Released => match instance.state() {
                EvaluationState::Errored(err) => Err(err),
                _ => Ok(()),
            },
            Acquired::Reentered => match instance.state() {
                EvaluationState::NotStarted => self.evaluate_module(instance),
                EvaluationState::InProgress | EvaluationState::Completed => Ok(()),
                EvaluationState::Errored(err) => Err(err),
            },
            Acquired::Root => {
                let result = self.evaluate_module(instance);
                if let Err(err) = &result {
                    for &member in component.members() {
                        if let Some(module) = self.registry.get(member) {
                            let mut state = module.state.write();
                            if !state.is_completed() {
                                *state = EvaluationState::Errored(err.clone());
                            }
                        }
                    }
                }
                component.release();
                result
            }
        }
    }

    fn evaluate_module(&self, instance: &ModuleInstance) -> Result<(), EvalError> {
        *instance.state.write() = EvaluationState::InProgress;
        let result = self.evaluate_dependencies(instance).and_then(|()| self.execute(instance));
        match &result {
            Ok(()) => {
                debug!(module = instance.identity(), "module evaluated");
                *instance.state.write() = EvaluationState::Completed;
            }
            Err(err) => {
                warn!(module = instance.identity(), error = %err, "module evaluation failed");
                *instance.state.write() = EvaluationState::Errored(err.clone());
            }
        }
        result
    }

    fn evaluate_dependencies(&self, instance: &ModuleInstance) -> Result<(), EvalError> {
        for &(_, dep) in instance.dependencies().unwrap_or_default() {
            let dep = self.instance(dep)?;
            self.visit(&dep)?;
        }
        Ok(())
    }

    fn execute(&self, instance: &ModuleInstance) -> Result<(), EvalError> {
        let env = instance
            .environment()
            .ok_or_else(|| EvalError::NotLinked(instance.identity().to_string()))?;
        trace!(module = instance.identity(), kind = %instance.kind(), "running module body");

        self.resolve_imports(env)?;
        match &instance.record().body {
            ModuleBody::Script(body) => {
                for slot in env.local_slots() {
                    slot.enter_tdz();
                }
                body.run(env)
            }
            ModuleBody::Binary(body) => self.instantiate(instance.record(), body, env),
        }
    }

    /// Step 1: observe every import
    fn resolve_imports(&self, env: &Arc<ModuleEnvironment>) -> Result<(), EvalError> {
        for binding in env.imports() {
            match (binding.mode, env.kind()) {
                // Script reads same-kind imports through the origin slot on demand
                (BindingMode::Live, ModuleKind::Script) => {}
                (BindingMode::Live, ModuleKind::Binary) => {
                    env.install(&binding.decl.local, binding.target.read()?);
                }
                (BindingMode::Snapshot, kind) => {
                    let value = binding.target.read()?;
                    let observed = match kind {
                        ModuleKind::Binary => {
                            let decl = &binding.decl;
                            coerce::to_binary(decl.kind, &decl.ty, &value).map_err(|reason| {
                                LinkTypeError {
                                    module: env.identity().to_string(),
                                    name: decl.local.clone(),
                                    from: binding.target.module().to_string(),
                                    reason,
                                }
                            })?
                        }
                        ModuleKind::Script => coerce::to_script(&value),
                    };
                    trace!(
                        module = env.identity(),
                        local = %binding.decl.local,
                        from = binding.target.module(),
                        "import snapshot taken"
                    );
                    binding.local.snapshot(observed.clone());
                    if kind == ModuleKind::Binary {
                        env.install(&binding.decl.local, observed);
                    }
                }
            }
        }
        Ok(())
    }

    /// Step 2 for Binary modules
    fn instantiate(
        &self,
        record: &ModuleRecord,
        body: &BinaryBody,
        env: &Arc<ModuleEnvironment>,
    ) -> Result<(), EvalError> {
        let identity = env.identity();

        for def in &body.globals {
            let init = match &def.init {
                GlobalInit::Const(value) => *value,
                GlobalInit::Import(local) => env.global(local)?.get(),
            };
            env.install(&def.name, Value::Global(Global::new(def.ty, init)?));
        }
        for def in &body.memories {
            env.install(&def.name, Value::Memory(Memory::new(def.limits)?));
        }
        for def in &body.tables {
            env.install(&def.name, Value::Table(Table::new(def.limits)?));
        }
        for def in &body.functions {
            let function =
                Function::binary(&def.name, def.ty.clone(), def.code.clone(), Arc::downgrade(env));
            env.install(&def.name, Value::Function(function));
        }

        for segment in &body.data {
            env.memory(&segment.memory)?
                .write(segment.offset, &segment.bytes)
                .map_err(|err| {
                    let message =
                        format!("data segment for '{}' does not fit: {}", segment.memory, err);
                    EvalError::trap(identity, message)
                })?;
        }
        for segment in &body.elements {
            let table = env.table(&segment.table)?;
            for (i, name) in segment.functions.iter().enumerate() {
                let index = segment.offset.checked_add(i as u32).ok_or_else(|| {
                    let message = format!("element segment for '{}' overflows", segment.table);
                    EvalError::trap(identity, message)
                })?;
                table.set(index, Some(env.func(name)?)).map_err(|err| {
                    let message =
                        format!("element segment for '{}' does not fit: {}", segment.table, err);
                    EvalError::trap(identity, message)
                })?;
            }
        }

        if let Some(start) = &body.start {
            trace!(module = identity, start = %start, "running start function");
            env.invoke(start, &[])?;
        }

        // Every export becomes available at once
        for export in &record.exports {
            let source = match &export.source {
                ExportSource::Local(name) | ExportSource::Import(name) => name,
                ExportSource::FunctionDeclaration(_) | ExportSource::Indirect { .. } => continue,
            };
            let value = env.entity(source)?;
            if let Some(slot) = env.export_slot(&export.name) {
                slot.initialize_live(value);
            }
        }
        Ok(())
    }
}
