//! Guest evaluation backends.

use std::time::Duration;

use tokio::task::JoinHandle;
use wasmtime::{Linker, Store, Trap};
use wasmtime_wasi::preview1;
use wasmtime_wasi::{I32Exit, WasiCtxBuilder};

use crate::bridge::protocol::{self, GuestMessage, HostMessage};
use crate::error::{PreviewError, Result};
use crate::sandbox::cache::SharedEngine;
use crate::sandbox::config::SandboxConfig;
use crate::sandbox::io::GuestIo;
use crate::sandbox::limits::{GuestState, StoreLimiterExt};

/// The guest runtime script, evaluated by the interpreter before anything else.
pub const BOOTSTRAP_SCRIPT: &str = include_str!("bootstrap.js");

/// An isolated execution context.
///
/// Every call to [`evaluate`](Isolate::evaluate) starts from a clean state;
/// nothing from one evaluation is visible to the next.
pub trait Isolate: Send + Sync + 'static {
    /// Load whatever the context needs before its first evaluation.
    fn prepare(&self) -> Result<()> {
        Ok(())
    }

    /// Evaluate one inject message and return the guest's answer.
    ///
    /// Blocks the calling thread; callers run it on a blocking pool.
    fn evaluate(&self, message: &HostMessage) -> Result<GuestMessage>;
}

/// Increments the engine epoch until dropped.
struct EpochTicker {
    handle: JoinHandle<()>,
}

impl EpochTicker {
    fn start(engine: wasmtime::Engine, interval: Duration) -> Result<Self> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
            PreviewError::Config("the wasm isolate must be created inside a tokio runtime".into())
        })?;
        let handle = runtime.spawn(async move {
            let mut ticks = tokio::time::interval(interval);
            ticks.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticks.tick().await;
                engine.increment_epoch();
            }
        });
        Ok(Self { handle })
    }
}

impl Drop for EpochTicker {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Runs the script interpreter as a WASI command in a fresh store per evaluation.
///
/// The guest gets no preopened directories, no environment and no sockets.
/// Its only input is the inject message on stdin.
pub struct WasmIsolate {
    engine: SharedEngine,
    config: SandboxConfig,
    _ticker: EpochTicker,
}

impl std::fmt::Debug for WasmIsolate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WasmIsolate")
            .field("engine", &self.engine)
            .field("config", &self.config)
            .finish()
    }
}

impl WasmIsolate {
    /// Create an isolate with its own engine.
    pub fn new(config: SandboxConfig) -> Result<Self> {
        let engine = SharedEngine::new(config.max_fuel.is_some())?;
        Self::with_engine(engine, config)
    }

    /// Create an isolate on an existing engine.
    ///
    /// The isolate drives the engine's epoch; the engine must not be ticked
    /// by anyone else or deadlines arrive early.
    pub fn with_engine(engine: SharedEngine, config: SandboxConfig) -> Result<Self> {
        config.validate()?;
        let ticker = EpochTicker::start(engine.engine().clone(), config.epoch_tick_interval)?;
        Ok(Self {
            engine,
            config,
            _ticker: ticker,
        })
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Run the interpreter with `io` attached and return its exit code.
    fn run(&self, io: &GuestIo) -> Result<i32> {
        let module = self.engine.module(&self.config.interpreter)?;

        let mut args = self.config.interpreter_args.clone();
        args.push(BOOTSTRAP_SCRIPT.to_string());
        let wasi = WasiCtxBuilder::new()
            .args(args.as_slice())
            .stdin(io.stdin())
            .stdout(io.stdout())
            .stderr(io.stderr())
            .build_p1();

        let mut store = Store::new(&self.engine, GuestState::new(self.config.max_memory, wasi));
        store.configure_limiter();
        store.epoch_deadline_trap();
        store.set_epoch_deadline(self.config.epoch_deadline_ticks());
        if let Some(fuel) = self.config.max_fuel {
            store
                .set_fuel(fuel)
                .map_err(|e| PreviewError::RuntimeInit(e.context("failed to set fuel")))?;
        }

        let mut linker = Linker::new(&self.engine);
        preview1::add_to_linker_sync(&mut linker, |state: &mut GuestState| &mut state.wasi)
            .map_err(|e| PreviewError::RuntimeInit(e.context("failed to link WASI")))?;

        let instance = linker.instantiate(&mut store, &module).map_err(|e| {
            if store.data().limiter.limit_exceeded() {
                PreviewError::MemoryLimitExceeded("during instantiation".to_string())
            } else {
                PreviewError::ModuleLoad(e.context("failed to instantiate interpreter"))
            }
        })?;
        let start = instance
            .get_typed_func::<(), ()>(&mut store, "_start")
            .map_err(|e| PreviewError::ModuleLoad(e.context("interpreter has no _start")))?;

        let Err(error) = start.call(&mut store, ()) else {
            return Ok(0);
        };
        if let Some(exit) = error.downcast_ref::<I32Exit>() {
            return Ok(exit.0);
        }
        match error.downcast_ref::<Trap>() {
            Some(Trap::Interrupt) => Err(PreviewError::Timeout(
                self.config.watchdog_timeout + self.config.teardown_grace,
            )),
            Some(Trap::OutOfFuel) => Err(PreviewError::OutOfFuel {
                consumed: self.config.max_fuel,
            }),
            _ if store.data().limiter.limit_exceeded() => Err(PreviewError::MemoryLimitExceeded(
                format!("guest asked for more than {} bytes", self.config.max_memory),
            )),
            _ => Err(PreviewError::GuestException {
                name: "Trap".to_string(),
                message: error.root_cause().to_string(),
                stack: None,
            }),
        }
    }
}

impl Isolate for WasmIsolate {
    fn prepare(&self) -> Result<()> {
        self.engine.module(&self.config.interpreter).map(drop)
    }

    fn evaluate(&self, message: &HostMessage) -> Result<GuestMessage> {
        let revision = message.revision();
        let io = GuestIo::new(message.to_line()?, self.config.max_output_bytes);
        let exit_code = self.run(&io)?;

        let stderr = io.stderr_str();
        if !stderr.trim().is_empty() {
            tracing::debug!(revision, exit_code, stderr = %stderr.trim_end(), "guest stderr");
        }

        match protocol::decode_output(&io.stdout_str()) {
            Some(outcome) if outcome.revision() == revision => Ok(outcome),
            Some(outcome) => Err(PreviewError::MalformedMessage(format!(
                "guest answered revision {} to revision {revision}",
                outcome.revision()
            ))),
            None => Err(PreviewError::from_guest_stderr(&stderr).unwrap_or_else(|| {
                PreviewError::MalformedMessage(format!(
                    "guest exited with code {exit_code} without reporting an outcome"
                ))
            })),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::config::InterpreterSource;

    #[test]
    fn bootstrap_reads_stdin_and_reports() {
        assert!(BOOTSTRAP_SCRIPT.contains("std.in"));
        assert!(BOOTSTRAP_SCRIPT.contains("__preview"));
        assert!(BOOTSTRAP_SCRIPT.contains("\"rendered\""));
    }

    #[test]
    fn bootstrap_drops_event_handler_attributes_in_any_case() {
        assert!(BOOTSTRAP_SCRIPT.contains("/^on/i.test(key)"));
        assert!(!BOOTSTRAP_SCRIPT.contains("/^on[A-Z]/"));
    }

    #[test]
    fn creating_outside_a_runtime_is_a_config_error() {
        let config = SandboxConfig::builder()
            .interpreter(InterpreterSource::wat("(module)"))
            .build();
        assert!(matches!(WasmIsolate::new(config), Err(PreviewError::Config(_))));
    }

    #[tokio::test]
    async fn prepare_compiles_the_interpreter() {
        let config = SandboxConfig::builder()
            .interpreter(InterpreterSource::wat("(module (func (export \"_start\")))"))
            .build();
        let isolate = WasmIsolate::new(config).unwrap();
        isolate.prepare().unwrap();
        assert_eq!(isolate.engine.modules().len(), 1);
    }
}
