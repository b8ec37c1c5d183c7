//! Script sources and the loaders that resolve them.
//!
//! | Loader            | Resolves identifiers against             |
//! |-------------------|------------------------------------------|
//! | [`DirLoader`]     | files under a root directory (`.lua`)    |
//! | [`MemoryLoader`]  | an in-memory name → source map           |
//! | [`EmbeddedLoader`]| demo scripts compiled into the binary    |
//!
//! Loaders never cache; loading the same identifier twice re-reads it.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, RwLock};

use crate::embedded::EMBEDDED_SCRIPTS;
use crate::error::LoadError;

/// File extension appended to identifiers that have none.
pub const SCRIPT_EXTENSION: &str = "lua";

// ── Script ────────────────────────────────────────────────────────────────────

/// A loaded script: a name plus its source text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Script {
    name: String,
    source: Arc<str>,
}

impl Script {
    pub fn new(name: impl Into<String>, source: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            source: source.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> &str {
        &self.source
    }
}

// ── ScriptLoader ──────────────────────────────────────────────────────────────

/// Resolves a script identifier to its source.
pub trait ScriptLoader: Send + Sync {
    fn load(&self, identifier: &str) -> Result<Script, LoadError>;
}

impl<L: ScriptLoader + ?Sized> ScriptLoader for Arc<L> {
    fn load(&self, identifier: &str) -> Result<Script, LoadError> {
        (**self).load(identifier)
    }
}

// ── DirLoader ─────────────────────────────────────────────────────────────────

/// Loads scripts from files below a root directory.
#[derive(Debug, Clone)]
pub struct DirLoader {
    root: PathBuf,
}

impl DirLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map an identifier to a path under the root, or `None` if it would
    /// escape the root.
    fn resolve(&self, identifier: &str) -> Option<PathBuf> {
        let rel = Path::new(identifier);
        if identifier.is_empty()
            || !rel
                .components()
                .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return None;
        }
        let mut path = self.root.join(rel);
        if path.extension().is_none() {
            path.set_extension(SCRIPT_EXTENSION);
        }
        Some(path)
    }
}

impl ScriptLoader for DirLoader {
    fn load(&self, identifier: &str) -> Result<Script, LoadError> {
        let not_found = || LoadError::NotFound {
            name: identifier.to_owned(),
        };
        let path = self.resolve(identifier).ok_or_else(not_found)?;
        if !path.is_file() {
            return Err(not_found());
        }
        let bytes = std::fs::read(&path).map_err(|e| LoadError::Unreadable {
            name: identifier.to_owned(),
            reason: e.to_string(),
        })?;
        let source = String::from_utf8(bytes).map_err(|_| LoadError::Unreadable {
            name: identifier.to_owned(),
            reason: "source is not valid UTF-8".to_owned(),
        })?;
        tracing::trace!(path = %path.display(), "loaded script");
        Ok(Script::new(identifier, source))
    }
}

// ── MemoryLoader ──────────────────────────────────────────────────────────────

/// Loads scripts from an in-memory table.
#[derive(Debug, Default)]
pub struct MemoryLoader {
    scripts: RwLock<HashMap<String, Arc<str>>>,
}

impl MemoryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(self, name: impl Into<String>, source: impl Into<Arc<str>>) -> Self {
        self.insert(name, source);
        self
    }

    /// Add or replace a script.
    pub fn insert(&self, name: impl Into<String>, source: impl Into<Arc<str>>) {
        self.scripts
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name.into(), source.into());
    }

    pub fn remove(&self, name: &str) -> bool {
        self.scripts
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(name)
            .is_some()
    }
}

impl ScriptLoader for MemoryLoader {
    fn load(&self, identifier: &str) -> Result<Script, LoadError> {
        let scripts = self.scripts.read().unwrap_or_else(|e| e.into_inner());
        scripts
            .get(identifier)
            .map(|src| Script::new(identifier, Arc::clone(src)))
            .ok_or_else(|| LoadError::NotFound {
                name: identifier.to_owned(),
            })
    }
}

// ── EmbeddedLoader ────────────────────────────────────────────────────────────

/// Loads the demo scripts compiled into the binary.
///
/// Identifiers may be given with or without the `.lua` extension.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmbeddedLoader;

impl EmbeddedLoader {
    /// Names of all embedded scripts, without extension.
    pub fn names(&self) -> impl Iterator<Item = &'static str> {
        EMBEDDED_SCRIPTS.iter().map(|f| f.stem())
    }
}

impl ScriptLoader for EmbeddedLoader {
    fn load(&self, identifier: &str) -> Result<Script, LoadError> {
        let stem = identifier
            .strip_suffix(".lua")
            .unwrap_or(identifier);
        let file = EMBEDDED_SCRIPTS
            .iter()
            .find(|f| f.stem() == stem)
            .ok_or_else(|| LoadError::NotFound {
                name: identifier.to_owned(),
            })?;
        let source = std::str::from_utf8(file.content).map_err(|_| LoadError::Unreadable {
            name: identifier.to_owned(),
            reason: "source is not valid UTF-8".to_owned(),
        })?;
        Ok(Script::new(stem, source))
    }
}
