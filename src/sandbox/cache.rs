//! Engine sharing and interpreter module caching.
//!
//! A compiled [`Module`] belongs to the [`Engine`] that compiled it, so the
//! cache lives inside the [`SharedEngine`] rather than in a global.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};

use sha2::{Digest, Sha256};
use wasmtime::{Engine, Module};

use crate::error::{PreviewError, Result};
use crate::sandbox::config::InterpreterSource;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum ModuleKey {
    Path(PathBuf),
    Digest([u8; 32]),
}

/// Compiled interpreter modules keyed by canonical path or content digest.
#[derive(Debug, Default)]
pub struct ModuleCache {
    modules: RwLock<HashMap<ModuleKey, Module>>,
}

impl ModuleCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached module for `source`, compiling it on first use.
    ///
    /// Accepts binary wasm or WAT text.
    pub fn get_or_compile(&self, engine: &Engine, source: &InterpreterSource) -> Result<Module> {
        let key = match source {
            InterpreterSource::Path(path) => {
                let canonical = std::fs::canonicalize(path).map_err(|e| {
                    if e.kind() == std::io::ErrorKind::NotFound {
                        PreviewError::InterpreterNotFound(path.display().to_string())
                    } else {
                        PreviewError::Io(e)
                    }
                })?;
                ModuleKey::Path(canonical)
            }
            InterpreterSource::Bytes(bytes) => ModuleKey::Digest(Sha256::digest(bytes).into()),
        };

        if let Some(module) = self
            .modules
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
        {
            return Ok(module.clone());
        }

        // Compile outside the lock; a racing compile of the same key is harmless.
        let module = match (source, &key) {
            (InterpreterSource::Bytes(bytes), _) => Module::new(engine, bytes),
            (InterpreterSource::Path(_), ModuleKey::Path(canonical)) => {
                Module::from_file(engine, canonical)
            }
            (InterpreterSource::Path(path), _) => Module::from_file(engine, path),
        }
        .map_err(|e| PreviewError::ModuleLoad(e.context("failed to compile interpreter")))?;
        tracing::info!(source = ?key, "compiled script interpreter");

        let mut modules = self.modules.write().unwrap_or_else(PoisonError::into_inner);
        Ok(modules.entry(key).or_insert(module).clone())
    }

    pub fn len(&self) -> usize {
        self.modules.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.modules.write().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

/// An engine configured for guest evaluation, with its module cache.
///
/// Cloning is cheap; clones share the engine and the cache.
#[derive(Clone)]
pub struct SharedEngine {
    engine: Engine,
    modules: Arc<ModuleCache>,
}

impl std::fmt::Debug for SharedEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedEngine")
            .field("engine", &"<wasmtime::Engine>")
            .field("modules", &self.modules.len())
            .finish()
    }
}

impl SharedEngine {
    /// Create an engine with epoch interruption, and fuel metering when
    /// `enable_fuel` is set.
    pub fn new(enable_fuel: bool) -> Result<Self> {
        let mut config = wasmtime::Config::new();
        config.epoch_interruption(true);
        config.consume_fuel(enable_fuel);
        Self::from_config(&config)
    }

    /// Create a shared engine from a caller-provided configuration.
    ///
    /// The configuration must enable epoch interruption or the watchdog
    /// cannot stop runaway guests.
    pub fn from_config(config: &wasmtime::Config) -> Result<Self> {
        let engine = Engine::new(config)
            .map_err(|e| PreviewError::RuntimeInit(e.context("failed to create engine")))?;
        Ok(Self {
            engine,
            modules: Arc::new(ModuleCache::new()),
        })
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn modules(&self) -> &ModuleCache {
        &self.modules
    }

    /// Compiled module for `source`, from this engine's cache.
    pub fn module(&self, source: &InterpreterSource) -> Result<Module> {
        self.modules.get_or_compile(&self.engine, source)
    }
}

impl std::ops::Deref for SharedEngine {
    type Target = Engine;

    fn deref(&self) -> &Self::Target {
        &self.engine
    }
}
