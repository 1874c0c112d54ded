//! Module registry
//!
//! Owns every module instance an engine has loaded. Each canonical identity
//! is loaded once; concurrent requests for an identity that is still loading
//! wait on the same in-flight cell and observe the same outcome.

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use once_cell::sync::OnceCell;
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use tracing::{debug, trace};

use super::loader::Loader;
use crate::env::ModuleEnvironment;
use crate::error::GraphError;
use crate::eval::{Component, EvaluationState};
use crate::record::{ModuleKind, ModuleRecord};

/// Index of a module within its engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleId(pub(crate) u32);

impl ModuleId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

type LoadCell = Arc<OnceCell<Result<ModuleId, GraphError>>>;

/// A loaded module and everything later stages attach to it
pub struct ModuleInstance {
    id: ModuleId,
    identity: String,
    record: Arc<ModuleRecord>,
    /// Resolved requested modules, in request order
    dependencies: OnceCell<Vec<(String, ModuleId)>>,
    environment: OnceCell<Arc<ModuleEnvironment>>,
    component: OnceCell<Arc<Component>>,
    pub(crate) state: RwLock<EvaluationState>,
}

impl ModuleInstance {
    pub fn id(&self) -> ModuleId {
        self.id
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn kind(&self) -> ModuleKind {
        self.record.kind()
    }

    pub fn record(&self) -> &Arc<ModuleRecord> {
        &self.record
    }

    pub fn dependencies(&self) -> Option<&[(String, ModuleId)]> {
        self.dependencies.get().map(Vec::as_slice)
    }

    /// Module a requested specifier resolved to
    pub fn dependency(&self, specifier: &str) -> Option<ModuleId> {
        self.dependencies()?
            .iter()
            .find(|(s, _)| s == specifier)
            .map(|(_, id)| *id)
    }

    pub fn environment(&self) -> Option<&Arc<ModuleEnvironment>> {
        self.environment.get()
    }

    pub fn is_linked(&self) -> bool {
        self.environment.get().is_some()
    }

    pub fn state(&self) -> EvaluationState {
        self.state.read().clone()
    }

    pub(crate) fn component(&self) -> Option<&Arc<Component>> {
        self.component.get()
    }

    /// Record resolved dependencies; a concurrent build may have done it first
    pub(crate) fn set_dependencies(&self, deps: Vec<(String, ModuleId)>) {
        let _ = self.dependencies.set(deps);
    }

    pub(crate) fn commit_link(&self, env: Arc<ModuleEnvironment>, component: Arc<Component>) {
        let _ = self.environment.set(env);
        let _ = self.component.set(component);
    }
}

impl fmt::Debug for ModuleInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleInstance")
            .field("id", &self.id)
            .field("identity", &self.identity)
            .field("kind", &self.kind())
            .field("state", &*self.state.read())
            .finish()
    }
}

/// All modules an engine knows about
#[derive(Default)]
pub struct ModuleRegistry {
    modules: RwLock<Vec<Arc<ModuleInstance>>>,
    by_identity: DashMap<String, ModuleId>,
    in_flight: Mutex<FxHashMap<String, LoadCell>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: ModuleId) -> Option<Arc<ModuleInstance>> {
        self.modules.read().get(id.index()).cloned()
    }

    pub fn lookup(&self, identity: &str) -> Option<ModuleId> {
        self.by_identity.get(identity).map(|id| *id)
    }

    pub fn len(&self) -> usize {
        self.modules.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.read().is_empty()
    }

    /// Return the module for `identity`, loading it if this engine has not
    ///
    /// Failures are shared by every caller waiting on the same load but are
    /// not remembered afterwards.
    pub fn get_or_load(&self, identity: &str, loader: &dyn Loader) -> Result<ModuleId, GraphError> {
        if let Some(id) = self.lookup(identity) {
            return Ok(id);
        }

        let cell = {
            let mut in_flight = self.in_flight.lock();
            if let Some(id) = self.lookup(identity) {
                return Ok(id);
            }
            in_flight
                .entry(identity.to_string())
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone()
        };

        let result = cell
            .get_or_init(|| self.load(identity, loader))
            .clone();

        let mut in_flight = self.in_flight.lock();
        if in_flight.get(identity).map_or(false, |c| Arc::ptr_eq(c, &cell)) {
            in_flight.remove(identity);
        }
        result
    }

    fn load(&self, identity: &str, loader: &dyn Loader) -> Result<ModuleId, GraphError> {
        trace!(identity, "loading module");
        let record = loader
            .load(identity)
            .map_err(|e| GraphError::from_load(identity, e))?;
        record.validate().map_err(|message| GraphError::Syntax {
            identity: identity.to_string(),
            message,
        })?;

        let mut modules = self.modules.write();
        let id = ModuleId(modules.len() as u32);
        debug!(identity, %id, kind = %record.kind(), "module loaded");
        modules.push(Arc::new(ModuleInstance {
            id,
            identity: identity.to_string(),
            record: Arc::new(record),
            dependencies: OnceCell::new(),
            environment: OnceCell::new(),
            component: OnceCell::new(),
            state: RwLock::new(EvaluationState::NotStarted),
        }));
        self.by_identity.insert(identity.to_string(), id);
        Ok(id)
    }
}
