//! Binding environments
//!
//! Every linked module owns a [`ModuleEnvironment`]: its export slots, the
//! import bindings the linker resolved for it, and (for Binary modules) the
//! entities its body instantiated. Importers hold `Arc` clones of the slots
//! they read; a slot is only ever written by its owning module.

use std::fmt;
use std::sync::{Arc, Weak};

use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::error::EvalError;
use crate::module::ModuleId;
use crate::record::{BindingKind, ExportSource, ImportDecl, ModuleKind, ModuleRecord, TypeSig};
use crate::value::{Function, Global, Memory, RawNum, Table, Value};

/// Lifecycle of a binding slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// Allocated at link, owner not yet evaluating
    Uninitialized,
    /// Owner is evaluating but has not assigned the binding
    Tdz,
    /// Holds a value captured once across module kinds
    Snapshot,
    /// Holds the binding's current value
    Live,
}

#[derive(Debug)]
struct SlotCell {
    state: SlotState,
    value: Option<Value>,
}

/// A named binding owned by exactly one module
pub struct BindingSlot {
    module: String,
    name: String,
    kind: BindingKind,
    ty: TypeSig,
    cell: RwLock<SlotCell>,
}

impl BindingSlot {
    pub(crate) fn new(module: &str, name: &str, kind: BindingKind, ty: TypeSig) -> Arc<Self> {
        Self::with_cell(module, name, kind, ty, SlotState::Uninitialized, None)
    }

    pub(crate) fn live(module: &str, name: &str, value: Value) -> Arc<Self> {
        let (kind, ty) = (BindingKind::Value, TypeSig::None);
        Self::with_cell(module, name, kind, ty, SlotState::Live, Some(value))
    }

    fn with_cell(
        module: &str,
        name: &str,
        kind: BindingKind,
        ty: TypeSig,
        state: SlotState,
        value: Option<Value>,
    ) -> Arc<Self> {
        Arc::new(Self {
            module: module.to_string(),
            name: name.to_string(),
            kind,
            ty,
            cell: RwLock::new(SlotCell { state, value }),
        })
    }

    /// Identity of the owning module
    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> BindingKind {
        self.kind
    }

    pub fn ty(&self) -> &TypeSig {
        &self.ty
    }

    pub fn state(&self) -> SlotState {
        self.cell.read().state
    }

    /// Current value, if the slot holds one
    pub fn value(&self) -> Option<Value> {
        self.cell.read().value.clone()
    }

    /// Read the value, failing if the owner has not produced it yet
    pub fn read(&self) -> Result<Value, EvalError> {
        self.value().ok_or_else(|| EvalError::Reference {
            module: self.module.clone(),
            name: self.name.clone(),
        })
    }

    pub(crate) fn enter_tdz(&self) {
        let mut cell = self.cell.write();
        if cell.state == SlotState::Uninitialized {
            cell.state = SlotState::Tdz;
        }
    }

    pub(crate) fn initialize_live(&self, value: Value) {
        let mut cell = self.cell.write();
        cell.state = SlotState::Live;
        cell.value = Some(value);
    }

    pub(crate) fn snapshot(&self, value: Value) {
        let mut cell = self.cell.write();
        cell.state = SlotState::Snapshot;
        cell.value = Some(value);
    }

    pub fn ptr_eq(&self, other: &BindingSlot) -> bool {
        std::ptr::eq(self, other)
    }
}

impl fmt::Debug for BindingSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cell = self.cell.read();
        f.debug_struct("BindingSlot")
            .field("module", &self.module)
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("state", &cell.state)
            .field("value", &cell.value)
            .finish()
    }
}

/// How an import observes its target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingMode {
    /// Reads go to the origin slot (same module kind)
    Live,
    /// The value is captured once when the importer starts evaluating
    Snapshot,
}

/// An import resolved to the slot that ultimately provides it
#[derive(Debug, Clone)]
pub struct ImportBinding {
    pub decl: ImportDecl,
    /// Module owning `target`, after re-export chains collapse
    pub origin: ModuleId,
    pub origin_kind: ModuleKind,
    pub target: Arc<BindingSlot>,
    /// Importer-owned slot holding the observed value
    pub local: Arc<BindingSlot>,
    pub mode: BindingMode,
}

impl ImportBinding {
    /// The value the importing module currently observes
    pub fn read(&self) -> Result<Value, EvalError> {
        match self.mode {
            BindingMode::Live => self.target.read(),
            BindingMode::Snapshot => self.local.read(),
        }
    }
}

/// The scope of one linked module
pub struct ModuleEnvironment {
    id: ModuleId,
    identity: String,
    kind: ModuleKind,
    this: Weak<ModuleEnvironment>,
    /// Own bindings by local name (Script variables and hoisted functions)
    locals: FxHashMap<String, Arc<BindingSlot>>,
    /// Own export slots by export name
    exports: FxHashMap<String, Arc<BindingSlot>>,
    imports: OnceCell<FxHashMap<String, ImportBinding>>,
    /// Binary entities (instantiated definitions and observed imports)
    entities: RwLock<FxHashMap<String, Value>>,
}

impl ModuleEnvironment {
    /// Allocate the module's own slots
    ///
    /// Hoisted function declarations are live immediately; every other slot
    /// starts uninitialized.
    pub(crate) fn new(id: ModuleId, identity: &str, record: &ModuleRecord) -> Arc<Self> {
        Arc::new_cyclic(|this| {
            let kind = record.kind();
            let mut locals: FxHashMap<String, Arc<BindingSlot>> = FxHashMap::default();
            let mut exports = FxHashMap::default();

            // Hoisted functions first; a Local alias may precede its declaration
            for export in &record.exports {
                if let ExportSource::FunctionDeclaration(code) = &export.source {
                    let function = Function::script(&export.name, code.clone(), this.clone());
                    let slot = BindingSlot::live(identity, &export.name, Value::Function(function));
                    locals.insert(export.name.clone(), slot);
                }
            }

            for export in &record.exports {
                let slot = match (&export.source, kind) {
                    (ExportSource::Local(local), ModuleKind::Script) => locals
                        .entry(local.clone())
                        .or_insert_with(|| {
                            BindingSlot::new(identity, local, BindingKind::Value, TypeSig::None)
                        })
                        .clone(),
                    (ExportSource::FunctionDeclaration(_), _) => match locals.get(&export.name) {
                        Some(slot) => slot.clone(),
                        None => continue,
                    },
                    (ExportSource::Indirect { .. }, _) => continue,
                    _ => BindingSlot::new(identity, &export.name, export.kind, export.ty.clone()),
                };
                exports.insert(export.name.clone(), slot);
            }

            Self {
                id,
                identity: identity.to_string(),
                kind,
                this: this.clone(),
                locals,
                exports,
                imports: OnceCell::new(),
                entities: RwLock::new(FxHashMap::default()),
            }
        })
    }

    pub fn id(&self) -> ModuleId {
        self.id
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn kind(&self) -> ModuleKind {
        self.kind
    }

    /// Own export slot by export name
    pub fn export_slot(&self, name: &str) -> Option<&Arc<BindingSlot>> {
        self.exports.get(name)
    }

    pub(crate) fn local_slots(&self) -> impl Iterator<Item = &Arc<BindingSlot>> {
        self.locals.values()
    }

    pub(crate) fn set_imports(&self, imports: FxHashMap<String, ImportBinding>) {
        let _ = self.imports.set(imports);
    }

    pub fn imports(&self) -> impl Iterator<Item = &ImportBinding> {
        self.imports.get().into_iter().flat_map(|m| m.values())
    }

    pub fn import_binding(&self, local: &str) -> Option<&ImportBinding> {
        self.imports.get()?.get(local)
    }

    fn unbound(&self, name: &str) -> EvalError {
        EvalError::Unbound {
            module: self.identity.clone(),
            name: name.to_string(),
        }
    }

    /// Read an imported binding
    pub fn import(&self, local: &str) -> Result<Value, EvalError> {
        self.import_binding(local)
            .ok_or_else(|| self.unbound(local))?
            .read()
    }

    /// Read a name in module scope: own bindings first, then imports
    pub fn get(&self, name: &str) -> Result<Value, EvalError> {
        match self.locals.get(name) {
            Some(slot) => slot.read(),
            None => self.import(name),
        }
    }

    /// Assign an own Script binding
    pub fn set(&self, local: &str, value: impl Into<Value>) -> Result<(), EvalError> {
        if self.import_binding(local).is_some() {
            return Err(EvalError::type_error(format!(
                "assignment to imported binding '{}' in '{}'",
                local, self.identity
            )));
        }
        let slot = self.locals.get(local).ok_or_else(|| self.unbound(local))?;
        slot.initialize_live(value.into());
        Ok(())
    }

    /// Call a function visible in module scope with Script arguments
    pub fn call(&self, name: &str, args: &[Value]) -> Result<Value, EvalError> {
        let callee = match self.kind {
            ModuleKind::Script => self.get(name)?,
            ModuleKind::Binary => self.entity(name)?,
        };
        match callee {
            Value::Function(f) => f.call(args),
            other => Err(EvalError::type_error(format!(
                "'{}' is a {}, not a function",
                name,
                other.type_name()
            ))),
        }
    }

    /// Create a Script function closed over this module
    pub fn function<F>(&self, name: &str, code: F) -> Function
    where
        F: Fn(&Arc<ModuleEnvironment>, &[Value]) -> Result<Value, EvalError>
            + Send
            + Sync
            + 'static,
    {
        Function::script(name, Arc::new(code), self.this.clone())
    }

    pub(crate) fn install(&self, name: &str, value: Value) {
        self.entities.write().insert(name.to_string(), value);
    }

    /// A Binary entity: a definition or an observed import
    pub fn entity(&self, name: &str) -> Result<Value, EvalError> {
        self.entities
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| self.unbound(name))
    }

    fn typed_entity<T>(
        &self,
        name: &str,
        what: &str,
        pick: impl FnOnce(&Value) -> Option<&T>,
    ) -> Result<T, EvalError>
    where
        T: Clone,
    {
        let value = self.entity(name)?;
        pick(&value).cloned().ok_or_else(|| {
            EvalError::type_error(format!("'{}' in '{}' is not a {}", name, self.identity, what))
        })
    }

    pub fn global(&self, name: &str) -> Result<Global, EvalError> {
        self.typed_entity(name, "global", Value::as_global)
    }

    pub fn memory(&self, name: &str) -> Result<Memory, EvalError> {
        self.typed_entity(name, "memory", Value::as_memory)
    }

    pub fn table(&self, name: &str) -> Result<Table, EvalError> {
        self.typed_entity(name, "table", Value::as_table)
    }

    pub fn func(&self, name: &str) -> Result<Function, EvalError> {
        self.typed_entity(name, "function", Value::as_function)
    }

    /// Invoke a Binary-callable entity with raw numbers
    pub fn invoke(&self, name: &str, args: &[RawNum]) -> Result<Vec<RawNum>, EvalError> {
        self.func(name)?.invoke(args)
    }
}

impl fmt::Debug for ModuleEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleEnvironment")
            .field("id", &self.id)
            .field("identity", &self.identity)
            .field("kind", &self.kind)
            .field("exports", &self.exports.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{ExportDecl, ScriptBody};

    fn script_env() -> Arc<ModuleEnvironment> {
        let record = ModuleRecord::script(ScriptBody::empty())
            .export(ExportDecl::local("count"))
            .export(ExportDecl::local("total").with_source(ExportSource::Local("count".into())))
            .export(ExportDecl::function_declaration("answer", |_, _| Ok(Value::Number(42.0))));
        ModuleEnvironment::new(ModuleId(0), "/a.js", &record)
    }

    #[test]
    fn test_slots_allocated_at_link() {
        let env = script_env();
        let count = env.export_slot("count").unwrap();
        assert_eq!(count.state(), SlotState::Uninitialized);
        // Both export names share the local binding
        assert!(count.ptr_eq(env.export_slot("total").unwrap()));
        // Hoisted functions are live immediately
        assert_eq!(env.export_slot("answer").unwrap().state(), SlotState::Live);
        assert_eq!(env.call("answer", &[]).unwrap(), Value::Number(42.0));
    }

    #[test]
    fn test_alias_declared_before_hoisted_function() {
        // export { f as alias, f }
        let record = ModuleRecord::script(ScriptBody::empty())
            .export(ExportDecl::local("alias").with_source(ExportSource::Local("f".into())))
            .export(ExportDecl::function_declaration("f", |_, _| Ok(Value::Number(7.0))));
        let env = ModuleEnvironment::new(ModuleId(0), "/a.js", &record);

        let alias = env.export_slot("alias").unwrap();
        assert!(alias.ptr_eq(env.export_slot("f").unwrap()));
        assert_eq!(alias.state(), SlotState::Live);
        let function = alias.read().unwrap();
        assert_eq!(function.as_function().unwrap().call(&[]).unwrap(), Value::Number(7.0));
    }

    #[test]
    fn test_tdz_then_live() {
        let env = script_env();
        let slot = env.export_slot("count").unwrap().clone();
        slot.enter_tdz();
        assert_eq!(slot.state(), SlotState::Tdz);
        assert!(matches!(env.get("count"), Err(EvalError::Reference { .. })));

        env.set("count", 1.0).unwrap();
        assert_eq!(slot.state(), SlotState::Live);
        assert_eq!(env.get("count").unwrap(), Value::Number(1.0));

        // Live slots are reassignable; enter_tdz never regresses them
        env.set("count", 2.0).unwrap();
        slot.enter_tdz();
        assert_eq!(slot.read().unwrap(), Value::Number(2.0));
        assert!(matches!(env.set("missing", 0.0), Err(EvalError::Unbound { .. })));
    }

    #[test]
    fn test_function_closes_over_env() {
        let env = script_env();
        env.set("count", 5.0).unwrap();
        let f = env.function("read", |env, _| env.get("count"));
        assert_eq!(f.call(&[]).unwrap(), Value::Number(5.0));
    }
}
