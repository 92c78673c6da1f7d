//! Factory for sandbox instances.

use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;
use crate::model::ContentKind;
use crate::sandbox::config::SandboxConfig;
use crate::sandbox::instance::SandboxInstance;
use crate::sandbox::isolate::{Isolate, WasmIsolate};

/// Creates [`SandboxInstance`]s over one isolate backend.
///
/// Cloning shares the backend.
#[derive(Clone)]
pub struct SandboxHost {
    isolate: Arc<dyn Isolate>,
    watchdog: Duration,
}

impl std::fmt::Debug for SandboxHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SandboxHost")
            .field("watchdog", &self.watchdog)
            .finish_non_exhaustive()
    }
}

impl SandboxHost {
    /// Host instances on a custom backend with the given watchdog.
    pub fn new(isolate: Arc<dyn Isolate>, watchdog: Duration) -> Self {
        Self { isolate, watchdog }
    }

    /// Host instances on the WebAssembly script interpreter.
    ///
    /// Must be called inside a tokio runtime.
    pub fn wasm(config: SandboxConfig) -> Result<Self> {
        let watchdog = config.watchdog_timeout;
        let isolate = WasmIsolate::new(config)?;
        Ok(Self::new(Arc::new(isolate), watchdog))
    }

    /// How long a render may take before it is reported as `Timeout`.
    pub fn watchdog(&self) -> Duration {
        self.watchdog
    }

    /// Start a fresh execution context for `kind`.
    pub fn spawn(&self, kind: ContentKind) -> Arc<SandboxInstance> {
        let instance = SandboxInstance::spawn(kind, Arc::clone(&self.isolate));
        tracing::info!(instance = %instance.id(), %kind, "sandbox instance spawned");
        instance
    }
}
