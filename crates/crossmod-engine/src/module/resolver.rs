//! Specifier resolution
//!
//! Maps import specifiers to canonical module identities. Two resolvers
//! ship with the engine: [`MapResolver`] for in-memory graphs and
//! [`FsResolver`] for modules laid out on disk.

use std::path::{Component, Path, PathBuf};

use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::config::ResolverConfig;

/// Errors that can occur during module resolution
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ResolveError {
    /// Local file not found
    #[error("Module not found: {path} (tried: {tried:?})")]
    ModuleNotFound { path: String, tried: Vec<PathBuf> },

    /// Bare specifier with no mapping
    #[error("Unknown module specifier: {0}")]
    UnknownSpecifier(String),

    /// Relative specifier climbs above the root
    #[error("Specifier escapes the module root: {0}")]
    OutsideRoot(String),

    /// IO error during resolution
    #[error("IO error: {0}")]
    IoError(String),

    /// URL imports are not supported
    #[error("URL imports not supported: {0}")]
    UrlNotSupported(String),
}

/// Resolves a specifier, relative to the identity of the module requesting it
pub trait Resolver: Send + Sync {
    /// `referrer` is `None` for the entry specifier
    fn resolve(&self, specifier: &str, referrer: Option<&str>) -> Result<String, ResolveError>;
}

fn is_relative(specifier: &str) -> bool {
    specifier.starts_with("./") || specifier.starts_with("../")
}

fn is_url(specifier: &str) -> bool {
    specifier.starts_with("http://") || specifier.starts_with("https://")
}

/// Join `specifier` onto the directory of `referrer` and normalize `.`/`..`
/// without touching the filesystem
fn join_lexically(base: &Path, specifier: &str) -> Result<PathBuf, ResolveError> {
    let mut out = PathBuf::new();
    for component in base.join(specifier).components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() || out.as_os_str().is_empty() {
                    return Err(ResolveError::OutsideRoot(specifier.to_string()));
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    Ok(out)
}

/// In-memory resolver
///
/// Bare specifiers go through an alias table; `./` and `../` specifiers are
/// joined to the referrer's directory (`/` for the entry) and `/`-prefixed
/// specifiers are taken as identities.
#[derive(Debug, Clone, Default)]
pub struct MapResolver {
    aliases: FxHashMap<String, String>,
}

impl MapResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map a bare specifier to an identity
    pub fn alias(mut self, specifier: &str, identity: &str) -> Self {
        self.aliases.insert(specifier.to_string(), identity.to_string());
        self
    }
}

impl Resolver for MapResolver {
    fn resolve(&self, specifier: &str, referrer: Option<&str>) -> Result<String, ResolveError> {
        if let Some(identity) = self.aliases.get(specifier) {
            return Ok(identity.clone());
        }
        if is_url(specifier) {
            return Err(ResolveError::UrlNotSupported(specifier.to_string()));
        }
        if specifier.starts_with('/') {
            let path = join_lexically(Path::new("/"), &specifier[1..])?;
            return Ok(path.to_string_lossy().into_owned());
        }
        if is_relative(specifier) {
            let base = referrer
                .and_then(|r| Path::new(r).parent())
                .unwrap_or_else(|| Path::new("/"));
            return Ok(join_lexically(base, specifier)?.to_string_lossy().into_owned());
        }
        Err(ResolveError::UnknownSpecifier(specifier.to_string()))
    }
}

/// Filesystem resolver
///
/// For `import { x } from "./utils"`:
/// 1. Try `./utils` as written, if it names a file
/// 2. Try `./utils.<ext>` for each configured extension
/// 3. Try `./utils/<index>.<ext>`
#[derive(Debug, Clone)]
pub struct FsResolver {
    /// Directory the entry specifier is resolved against
    root: PathBuf,
    extensions: Vec<String>,
    index_file: String,
}

impl FsResolver {
    pub fn new(root: PathBuf) -> Self {
        Self::with_config(root, &ResolverConfig::default())
    }

    pub fn with_config(root: PathBuf, config: &ResolverConfig) -> Self {
        Self {
            root,
            extensions: config.extensions.clone(),
            index_file: config.index_file.clone(),
        }
    }

    /// Create a resolver with the current directory as root
    pub fn current_dir() -> Result<Self, ResolveError> {
        let root = std::env::current_dir().map_err(|e| ResolveError::IoError(e.to_string()))?;
        Ok(Self::new(root))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn candidates(&self, base: &Path) -> Vec<PathBuf> {
        let mut tried = vec![base.to_path_buf()];
        for ext in &self.extensions {
            let mut name = base.as_os_str().to_os_string();
            name.push(".");
            name.push(ext);
            tried.push(PathBuf::from(name));
        }
        for ext in &self.extensions {
            tried.push(base.join(format!("{}.{}", self.index_file, ext)));
        }
        tried
    }

    fn canonicalize(&self, path: &Path) -> Result<String, ResolveError> {
        path.canonicalize()
            .map(|p| p.to_string_lossy().into_owned())
            .map_err(|e| {
                ResolveError::IoError(format!("Failed to canonicalize {}: {}", path.display(), e))
            })
    }
}

impl Resolver for FsResolver {
    fn resolve(&self, specifier: &str, referrer: Option<&str>) -> Result<String, ResolveError> {
        if is_url(specifier) {
            return Err(ResolveError::UrlNotSupported(specifier.to_string()));
        }

        let base = if Path::new(specifier).is_absolute() {
            PathBuf::from(specifier)
        } else if is_relative(specifier) || referrer.is_none() {
            let dir = referrer
                .and_then(|r| Path::new(r).parent())
                .unwrap_or(self.root.as_path());
            dir.join(specifier)
        } else {
            return Err(ResolveError::UnknownSpecifier(specifier.to_string()));
        };

        let tried = self.candidates(&base);
        match tried.iter().find(|p| p.is_file()) {
            Some(found) => self.canonicalize(found),
            None => Err(ResolveError::ModuleNotFound {
                path: specifier.to_string(),
                tried,
            }),
        }
    }
}
