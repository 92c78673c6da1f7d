//! Sandbox configuration with builder pattern.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{PreviewError, Result};

/// Where the script interpreter module comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InterpreterSource {
    /// A `.wasm` (or `.wat`) file on disk.
    Path(PathBuf),
    /// Module bytes or WAT text held in memory.
    Bytes(Arc<[u8]>),
}

impl InterpreterSource {
    /// Build a source from WAT text, mostly useful for tests.
    pub fn wat(text: impl AsRef<str>) -> Self {
        InterpreterSource::Bytes(Arc::from(text.as_ref().as_bytes()))
    }
}

/// Configuration for sandbox instances.
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// How long a render may take before the watchdog reports `Timeout`.
    pub watchdog_timeout: Duration,
    /// Extra time after the watchdog before the guest is forcibly trapped.
    pub teardown_grace: Duration,
    /// Maximum guest linear memory in bytes.
    pub max_memory: u64,
    /// Maximum fuel (instruction count limit).
    pub max_fuel: Option<u64>,
    /// The interpreter module.
    pub interpreter: InterpreterSource,
    /// argv passed to the interpreter; the bootstrap script is appended.
    pub interpreter_args: Vec<String>,
    /// Epoch interruption interval for the hard deadline.
    pub epoch_tick_interval: Duration,
    /// Cap on captured guest stdout/stderr, in bytes.
    pub max_output_bytes: usize,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            watchdog_timeout: Duration::from_secs(2),
            teardown_grace: Duration::from_millis(500),
            max_memory: 64 * 1024 * 1024, // 64MB
            max_fuel: None,
            interpreter: InterpreterSource::Path(PathBuf::from("assets/qjs.wasm")),
            interpreter_args: vec!["qjs".to_string(), "--std".to_string(), "-e".to_string()],
            epoch_tick_interval: Duration::from_millis(10),
            max_output_bytes: 1024 * 1024,
        }
    }
}

impl SandboxConfig {
    /// Create a new builder for SandboxConfig.
    pub fn builder() -> SandboxConfigBuilder {
        SandboxConfigBuilder::default()
    }

    /// Reject settings that would make every render fail.
    pub fn validate(&self) -> Result<()> {
        if self.watchdog_timeout.is_zero() {
            return Err(PreviewError::Config("watchdog timeout must be non-zero".into()));
        }
        if self.epoch_tick_interval.is_zero() {
            return Err(PreviewError::Config("epoch tick interval must be non-zero".into()));
        }
        if self.epoch_tick_interval > self.watchdog_timeout {
            return Err(PreviewError::Config(
                "epoch tick interval must not exceed the watchdog timeout".into(),
            ));
        }
        if self.max_output_bytes == 0 {
            return Err(PreviewError::Config("output cap must be non-zero".into()));
        }
        Ok(())
    }

    /// Epoch ticks until the guest is trapped: watchdog plus grace, rounded up.
    pub fn epoch_deadline_ticks(&self) -> u64 {
        let budget = self.watchdog_timeout + self.teardown_grace;
        let tick = self.epoch_tick_interval.as_nanos().max(1);
        budget.as_nanos().div_ceil(tick) as u64 + 1
    }
}

/// Builder for creating SandboxConfig instances.
#[derive(Debug, Clone, Default)]
pub struct SandboxConfigBuilder {
    watchdog_timeout: Option<Duration>,
    teardown_grace: Option<Duration>,
    max_memory: Option<u64>,
    max_fuel: Option<u64>,
    interpreter: Option<InterpreterSource>,
    interpreter_args: Option<Vec<String>>,
    epoch_tick_interval: Option<Duration>,
    max_output_bytes: Option<usize>,
}

impl SandboxConfigBuilder {
    /// Set the watchdog timeout for a single render.
    pub fn watchdog_timeout(mut self, timeout: Duration) -> Self {
        self.watchdog_timeout = Some(timeout);
        self
    }

    /// Set the grace period between the watchdog and the hard trap.
    pub fn teardown_grace(mut self, grace: Duration) -> Self {
        self.teardown_grace = Some(grace);
        self
    }

    /// Set the maximum memory limit in bytes.
    pub fn max_memory(mut self, bytes: u64) -> Self {
        self.max_memory = Some(bytes);
        self
    }

    /// Set the maximum fuel (instruction count).
    pub fn max_fuel(mut self, fuel: u64) -> Self {
        self.max_fuel = Some(fuel);
        self
    }

    /// Load the interpreter from a file.
    pub fn interpreter_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.interpreter = Some(InterpreterSource::Path(path.into()));
        self
    }

    /// Use an interpreter module held in memory.
    pub fn interpreter(mut self, source: InterpreterSource) -> Self {
        self.interpreter = Some(source);
        self
    }

    /// Set the argv the interpreter is started with.
    pub fn interpreter_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.interpreter_args = Some(args.into_iter().map(Into::into).collect());
        self
    }

    /// Set the epoch tick interval for the hard deadline.
    pub fn epoch_tick_interval(mut self, interval: Duration) -> Self {
        self.epoch_tick_interval = Some(interval);
        self
    }

    /// Set the cap on captured guest output.
    pub fn max_output_bytes(mut self, bytes: usize) -> Self {
        self.max_output_bytes = Some(bytes);
        self
    }

    /// Build the SandboxConfig.
    pub fn build(self) -> SandboxConfig {
        let default = SandboxConfig::default();
        SandboxConfig {
            watchdog_timeout: self.watchdog_timeout.unwrap_or(default.watchdog_timeout),
            teardown_grace: self.teardown_grace.unwrap_or(default.teardown_grace),
            max_memory: self.max_memory.unwrap_or(default.max_memory),
            max_fuel: self.max_fuel.or(default.max_fuel),
            interpreter: self.interpreter.unwrap_or(default.interpreter),
            interpreter_args: self.interpreter_args.unwrap_or(default.interpreter_args),
            epoch_tick_interval: self.epoch_tick_interval.unwrap_or(default.epoch_tick_interval),
            max_output_bytes: self.max_output_bytes.unwrap_or(default.max_output_bytes),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SandboxConfig::default();
        assert_eq!(config.watchdog_timeout, Duration::from_secs(2));
        assert_eq!(config.max_memory, 64 * 1024 * 1024);
        assert_eq!(config.interpreter_args.last().map(String::as_str), Some("-e"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = SandboxConfig::builder()
            .watchdog_timeout(Duration::from_millis(500))
            .max_memory(32 * 1024 * 1024)
            .max_fuel(1_000_000)
            .interpreter(InterpreterSource::wat("(module)"))
            .build();

        assert_eq!(config.watchdog_timeout, Duration::from_millis(500));
        assert_eq!(config.max_memory, 32 * 1024 * 1024);
        assert_eq!(config.max_fuel, Some(1_000_000));
        assert!(matches!(config.interpreter, InterpreterSource::Bytes(_)));
    }

    #[test]
    fn test_deadline_ticks_cover_watchdog_and_grace() {
        let config = SandboxConfig::builder()
            .watchdog_timeout(Duration::from_millis(100))
            .teardown_grace(Duration::from_millis(50))
            .epoch_tick_interval(Duration::from_millis(10))
            .build();
        assert_eq!(config.epoch_deadline_ticks(), 16);
    }

    #[test]
    fn test_validate_rejects_zero_watchdog() {
        let config = SandboxConfig::builder()
            .watchdog_timeout(Duration::ZERO)
            .build();
        assert!(matches!(config.validate(), Err(PreviewError::Config(_))));
    }
}
