//! Module graph construction
//!
//! Resolution, loading, the per-engine module registry and the frozen
//! dependency graph handed to the linker.

mod builder;
mod graph;
mod loader;
mod registry;
mod resolver;

pub use builder::GraphBuilder;
pub use graph::{ModuleGraph, ModuleNode};
pub use loader::{LoadError, Loader, MemoryLoader};
pub use registry::{ModuleId, ModuleInstance, ModuleRegistry};
pub use resolver::{FsResolver, MapResolver, ResolveError, Resolver};
