//! # Preview Sandbox
//!
//! A live preview engine for untrusted, user-authored snippets: utility-class
//! HTML markup, components written with JSX, and markdown documentation.
//!
//! Script-bearing sources are evaluated by a JavaScript interpreter compiled
//! to WebAssembly, running in Wasmtime with no host capabilities. The pipeline:
//!
//! - **Normalizer**: classifies raw text and wraps it in a document shell or
//!   a component harness; markdown becomes safe HTML on the host.
//! - **Transpiler**: lowers JSX and module syntax to plain script, with
//!   line/column diagnostics and a fingerprint-keyed artifact cache.
//! - **Sandbox host**: one isolated context per preview, re-evaluated from a
//!   clean state on every injection, bounded in memory and time.
//! - **Render bridge**: the message protocol across the boundary, matching
//!   answers to requests by revision.
//! - **Session manager**: debounces edits, discards stale outcomes and keeps
//!   the number of live contexts under a cap with LRU eviction.
//!
//! ## Example
//!
//! ```rust,ignore
//! use wasm_preview_sandbox_rs::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let sessions = PreviewSessions::wasm(SandboxConfig::default(), SessionConfig::default())?;
//!     let mut outcome = sessions.observe("card-1");
//!
//!     sessions.update("card-1", "<div class='p-4'>Hi</div>", "html-tailwind")?;
//!     outcome.changed().await.ok();
//!
//!     let rendered = outcome.borrow().clone();
//!     assert_eq!(rendered.map(|o| o.status), Some(OutcomeStatus::Ok));
//!     Ok(())
//! }
//! ```
//!
//! ## Isolation
//!
//! 1. **WebAssembly sandboxing**: guest code has no direct host access
//! 2. **WASI restrictions**: no preopened directories, environment or sockets
//! 3. **Message-only boundary**: the inject message on stdin is the only input
//! 4. **Resource limits**: linear memory, optional fuel, and an epoch deadline
//! 5. **Surface policy**: rendered documents carry a CSP that only admits the
//!    style engine

pub mod bridge;
pub mod error;
pub mod model;
pub mod normalize;
pub mod prelude;
pub mod sandbox;
pub mod session;
pub mod transpile;

pub use error::{PreviewError, Result};
pub use model::{
    CompileDiagnostic, CompiledArtifact, ContentKind, DocumentId, OutcomeStatus, RenderOutcome,
    Revision, SnippetRecord, SourceDocument,
};
pub use normalize::{normalize, NormalizedSource};
pub use sandbox::{SandboxConfig, SandboxConfigBuilder, SandboxHost};
pub use session::{PreviewSessions, SessionConfig, SessionConfigBuilder, SessionStats};
pub use transpile::{compile, Transpiler};
