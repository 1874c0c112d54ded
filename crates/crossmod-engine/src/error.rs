//! Error taxonomy for graph construction, linking and evaluation
//!
//! Construction and linking errors abort the whole graph before any module
//! body runs. Evaluation errors abort the remaining traversal; modules that
//! already completed keep their state.

use std::fmt;

use thiserror::Error;

use crate::module::{LoadError, ResolveError};
use crate::record::BindingKind;
use crate::value::{FuncType, GlobalType, Limits, NumType, ResourceKind};

/// Errors raised while building a module graph
#[derive(Debug, Error, Clone)]
pub enum GraphError {
    /// A specifier could not be mapped to a canonical identity
    #[error(
        "ResolutionError: cannot resolve '{specifier}'{}: {source}",
        format_referrer(.referrer)
    )]
    Resolution {
        specifier: String,
        referrer: Option<String>,
        #[source]
        source: ResolveError,
    },

    /// The loader could not produce the module's bytes
    #[error("FetchError: cannot load '{identity}': {message}")]
    Fetch { identity: String, message: String },

    /// The module could not be parsed or its record is malformed
    #[error("SyntaxError in '{identity}': {message}")]
    Syntax { identity: String, message: String },

    /// The graph grew beyond the configured limit
    #[error("Module graph exceeds the limit of {limit} modules")]
    GraphTooLarge { limit: usize },
}

fn format_referrer(referrer: &Option<String>) -> String {
    match referrer {
        Some(r) => format!(" from '{}'", r),
        None => String::new(),
    }
}

impl GraphError {
    pub(crate) fn from_load(identity: &str, err: LoadError) -> Self {
        match err {
            LoadError::Fetch(message) => GraphError::Fetch {
                identity: identity.to_string(),
                message,
            },
            LoadError::Syntax(message) => GraphError::Syntax {
                identity: identity.to_string(),
                message,
            },
        }
    }
}

/// Why an import cannot be satisfied by the export it resolved to
#[derive(Debug, Clone, PartialEq)]
pub enum Incompatibility {
    /// Import and export declare different binding kinds
    KindMismatch {
        expected: BindingKind,
        actual: BindingKind,
    },
    /// Global value type or mutability differ
    GlobalType {
        expected: GlobalType,
        actual: GlobalType,
    },
    /// A plain Script value cannot satisfy a mutable global import
    MutableFromPlainValue { expected: GlobalType },
    /// A plain Script value is not convertible to the declared numeric type
    NotNumeric {
        expected: NumType,
        actual: &'static str,
    },
    /// Memory or table bounds are not compatible
    Limits {
        kind: ResourceKind,
        expected: Limits,
        actual: Limits,
    },
    /// A memory or table import got something else
    NotResource {
        kind: ResourceKind,
        actual: &'static str,
    },
    /// Function signatures differ
    Signature { expected: FuncType, actual: FuncType },
    /// A function import got a non-callable value
    NotCallable { actual: &'static str },
}

impl fmt::Display for Incompatibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Incompatibility::KindMismatch { expected, actual } => {
                write!(f, "expected a {} export, found a {}", expected, actual)
            }
            Incompatibility::GlobalType { expected, actual } => {
                write!(f, "expected global {}, found global {}", expected, actual)
            }
            Incompatibility::MutableFromPlainValue { expected } => write!(
                f,
                "a plain value cannot satisfy a {} import; a global object is required",
                expected
            ),
            Incompatibility::NotNumeric { expected, actual } => {
                write!(f, "cannot convert {} to {}", actual, expected)
            }
            Incompatibility::Limits {
                kind,
                expected,
                actual,
            } => write!(
                f,
                "{} limits {} do not satisfy required {}",
                kind, actual, expected
            ),
            Incompatibility::NotResource { kind, actual } => {
                write!(f, "expected a {} object, found {}", kind, actual)
            }
            Incompatibility::Signature { expected, actual } => {
                write!(f, "expected function {}, found function {}", expected, actual)
            }
            Incompatibility::NotCallable { actual } => {
                write!(f, "expected a callable, found {}", actual)
            }
        }
    }
}

/// An import whose type cannot be satisfied
#[derive(Debug, Error, Clone, PartialEq)]
#[error("LinkTypeError: import '{name}' of '{module}' from '{from}': {reason}")]
pub struct LinkTypeError {
    /// Identity of the importing module
    pub module: String,
    /// Local name of the import
    pub name: String,
    /// Identity of the module the import resolved to
    pub from: String,
    pub reason: Incompatibility,
}

/// Errors raised while linking a built graph
#[derive(Debug, Error, Clone)]
pub enum LinkError {
    /// The requested name is not exported anywhere along the chain
    #[error(
        "UnresolvedExportError: '{module}' has no export named '{name}' (imported by '{importer}')"
    )]
    UnresolvedExport {
        module: String,
        name: String,
        importer: String,
    },

    /// Two star re-exports provide the name from different bindings
    #[error(
        "AmbiguousExportError: '{name}' is ambiguous in '{module}' (imported by '{importer}')"
    )]
    AmbiguousExport {
        module: String,
        name: String,
        importer: String,
    },

    /// Static type check between two Binary modules failed
    #[error(transparent)]
    LinkType(#[from] LinkTypeError),

    /// Binary modules depend on each other directly
    #[error(
        "UnsupportedCycleError: Binary modules depend on each other directly: {}",
        .cycle.join(" -> ")
    )]
    UnsupportedCycle { cycle: Vec<String> },
}

/// Errors raised while evaluating a linked graph
#[derive(Debug, Error, Clone)]
pub enum EvalError {
    /// A binding was read before its producer initialized it
    #[error("ReferenceError: cannot access '{name}' in '{module}' before initialization")]
    Reference { module: String, name: String },

    /// A name has no binding in the module's scope
    #[error("ReferenceError: '{name}' is not defined in '{module}'")]
    Unbound { module: String, name: String },

    /// A cross-kind import failed its deferred type check
    #[error(transparent)]
    LinkType(#[from] LinkTypeError),

    /// A value had the wrong type for an operation
    #[error("TypeError: {0}")]
    Type(String),

    /// A Binary module faulted (out-of-bounds access, bad segment, ...)
    #[error("RuntimeError in '{module}': {message}")]
    Trap { module: String, message: String },

    /// An error raised by a module body or a function it defined
    #[error("Uncaught error: {0}")]
    Thrown(String),

    /// The module was never linked
    #[error("Module '{0}' has not been linked")]
    NotLinked(String),
}

impl EvalError {
    /// Raise an opaque error from a module body or function
    pub fn thrown(message: impl Into<String>) -> Self {
        EvalError::Thrown(message.into())
    }

    pub(crate) fn type_error(message: impl Into<String>) -> Self {
        EvalError::Type(message.into())
    }

    pub(crate) fn trap(module: &str, message: impl Into<String>) -> Self {
        EvalError::Trap {
            module: module.to_string(),
            message: message.into(),
        }
    }
}

/// Any error from the build → link → evaluate pipeline
#[derive(Debug, Error, Clone)]
pub enum Error {
    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Link(#[from] LinkError),

    #[error(transparent)]
    Eval(#[from] EvalError),
}
