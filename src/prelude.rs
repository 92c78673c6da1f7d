//! Prelude module for convenient imports.

pub use crate::error::{PreviewError, Result};
pub use crate::model::{ContentKind, DocumentId, OutcomeStatus, RenderOutcome, SnippetRecord};
pub use crate::sandbox::{SandboxConfig, SandboxHost};
pub use crate::session::{PreviewSessions, SessionConfig};
