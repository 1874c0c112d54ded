//! Crossmod Engine - Linking and Lifecycle for Mixed Module Graphs
//!
//! This crate links and evaluates dependency graphs mixing two module kinds:
//! - Script modules: dynamically typed, live reassignable bindings,
//!   hoisted function declarations
//! - Binary modules: typed imports and exports, fixed export identity,
//!   instantiation followed by a start function
//!
//! Either kind may import from the other. Work is staged strictly across the
//! whole graph: build, then link, then evaluate.
//!
//! # Usage
//!
//! ```ignore
//! use crossmod_engine::{Engine, MapResolver, MemoryLoader};
//!
//! let engine = Engine::new(MapResolver::new(), loader);
//! let graph = engine.build_graph("./main.js")?;
//! let linked = engine.link(&graph)?;
//! let exports = engine.evaluate(&linked)?;
//! ```

#![warn(rust_2018_idioms)]

pub mod coerce;
pub mod config;
pub mod engine;
pub mod env;
pub mod error;
pub mod eval;
pub mod link;
pub mod module;
pub mod record;
pub mod value;

pub use config::{ConfigError, EngineConfig};
pub use engine::Engine;
pub use env::{BindingMode, BindingSlot, ImportBinding, ModuleEnvironment, SlotState};
pub use error::{Error, EvalError, GraphError, Incompatibility, LinkError, LinkTypeError};
pub use eval::{EvaluationState, ModuleNamespace};
pub use link::LinkedGraph;
pub use module::{
    FsResolver, LoadError, Loader, MapResolver, MemoryLoader, ModuleGraph, ModuleId, ResolveError,
    Resolver,
};
pub use record::{
    BinaryBody, BindingKind, ExportDecl, ExportSource, GlobalInit, ImportDecl, ModuleKind,
    ModuleRecord, ScriptBody, TypeSig,
};
pub use value::{
    FuncType, Function, Global, GlobalType, Limits, Memory, NumType, RawNum, ResourceKind, Table,
    Value,
};
