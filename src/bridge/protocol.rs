//! Messages crossing the isolation boundary, one JSON object per line.

use serde::{Deserialize, Serialize};

use crate::error::{PreviewError, Result};
use crate::model::{CompiledArtifact, ContentKind, Revision};

/// Host to guest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum HostMessage {
    /// Evaluate `executable_text` from a clean state and report one outcome.
    #[serde(rename_all = "camelCase")]
    Inject {
        revision: Revision,
        kind: ContentKind,
        executable_text: String,
    },
}

impl HostMessage {
    pub fn inject(artifact: &CompiledArtifact) -> Self {
        HostMessage::Inject {
            revision: artifact.revision,
            kind: artifact.kind,
            executable_text: artifact.executable_text.to_string(),
        }
    }

    pub fn revision(&self) -> Revision {
        match self {
            HostMessage::Inject { revision, .. } => *revision,
        }
    }

    /// Serialize as a single newline-terminated line.
    pub fn to_line(&self) -> Result<String> {
        let mut line = serde_json::to_string(self)
            .map_err(|e| PreviewError::MalformedMessage(e.to_string()))?;
        line.push('\n');
        Ok(line)
    }
}

/// The error kinds a guest may report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GuestErrorKind {
    RuntimeError,
    CompileError,
    Timeout,
}

/// Guest to host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum GuestMessage {
    #[serde(rename_all = "camelCase")]
    Rendered {
        revision: Revision,
        #[serde(default)]
        measured_height: Option<f64>,
        /// Rendered HTML; a fragment for components.
        #[serde(default)]
        surface: String,
    },
    Error {
        revision: Revision,
        kind: GuestErrorKind,
        message: String,
    },
}

impl GuestMessage {
    pub fn revision(&self) -> Revision {
        match self {
            GuestMessage::Rendered { revision, .. } | GuestMessage::Error { revision, .. } => {
                *revision
            }
        }
    }

    /// Host-side failure for `revision`, reported in place of a guest answer.
    pub fn failure(revision: Revision, error: &PreviewError) -> Self {
        let kind = if error.is_timeout() {
            GuestErrorKind::Timeout
        } else {
            GuestErrorKind::RuntimeError
        };
        GuestMessage::Error {
            revision,
            kind,
            message: error.to_string(),
        }
    }
}

/// Find the outcome in guest stdout.
///
/// Console output from the guest shares the stream, so lines that are not
/// protocol messages are skipped. The last protocol line wins.
pub fn decode_output(stdout: &str) -> Option<GuestMessage> {
    let mut outcome = None;
    for line in stdout.lines().map(str::trim).filter(|l| !l.is_empty()) {
        match serde_json::from_str::<GuestMessage>(line) {
            Ok(message) => outcome = Some(message),
            Err(_) => tracing::debug!(line, "guest console output"),
        }
    }
    outcome
}
