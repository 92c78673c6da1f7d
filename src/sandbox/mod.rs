//! Sandbox host: isolated execution contexts and their lifecycle.

pub mod cache;
pub mod config;
pub mod host;
pub mod instance;
pub mod io;
pub mod isolate;
pub mod limits;

pub use config::{InterpreterSource, SandboxConfig, SandboxConfigBuilder};
pub use host::SandboxHost;
pub use instance::{InstanceState, SandboxInstance};
pub use isolate::{Isolate, WasmIsolate};
