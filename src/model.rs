//! Data model shared by every stage of the preview pipeline.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::PreviewError;

/// Monotonic per-document content version.
pub type Revision = u64;

/// Identifies one preview surface (a feed card, the composer, the playground).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocumentId(String);

impl DocumentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DocumentId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for DocumentId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// The execution shape of a piece of source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    /// HTML with utility classes, rendered as a document.
    Markup,
    /// Component source with script logic, evaluated in the sandbox.
    Component,
    /// Markdown documentation, converted to safe HTML on the host.
    Prose,
}

impl ContentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentKind::Markup => "markup",
            ContentKind::Component => "component",
            ContentKind::Prose => "prose",
        }
    }

    /// The language label the editor widget uses for this kind.
    pub fn editor_language(&self) -> &'static str {
        match self {
            ContentKind::Markup => "html",
            ContentKind::Component => "typescript",
            ContentKind::Prose => "markdown",
        }
    }

    /// Whether previews of this kind need a sandbox instance.
    pub fn needs_sandbox(&self) -> bool {
        !matches!(self, ContentKind::Prose)
    }
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentKind {
    type Err = PreviewError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "markup" | "html" | "html-tailwind" => Ok(ContentKind::Markup),
            "component" | "react" | "react-tailwind" | "jsx" | "tsx" | "typescript" => {
                Ok(ContentKind::Component)
            }
            "prose" | "markdown" | "md" | "documentation" => Ok(ContentKind::Prose),
            _ => Err(PreviewError::UnsupportedContentKind(s.to_string())),
        }
    }
}

/// A snippet as the feed layer stores it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnippetRecord {
    pub code: String,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub component_type: Option<String>,
    /// `snippet` or `documentation`.
    #[serde(default, rename = "type")]
    pub post_type: Option<String>,
}

impl SnippetRecord {
    /// Resolve the content kind: documentation posts are prose, then
    /// `componentType` wins over `language`.
    pub fn content_kind(&self) -> crate::Result<ContentKind> {
        if self.post_type.as_deref() == Some("documentation") {
            return Ok(ContentKind::Prose);
        }
        match (&self.component_type, &self.language) {
            (Some(component_type), _) => component_type.parse(),
            (None, Some(language)) => language.parse(),
            (None, None) => Err(PreviewError::UnsupportedContentKind(String::new())),
        }
    }
}

/// The latest issued content of a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDocument {
    pub raw_text: String,
    pub kind: ContentKind,
    pub revision: Revision,
}

impl SourceDocument {
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::of(&self.raw_text, self.kind)
    }
}

/// SHA-256 of `(kind, raw text)`; equal fingerprints compile identically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    pub fn of(raw_text: &str, kind: ContentKind) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(kind.as_str().as_bytes());
        hasher.update([0u8]);
        hasher.update(raw_text.as_bytes());
        Self(hasher.finalize().into())
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0[..8] {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// A compile problem located in the author's raw text (1-based).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompileDiagnostic {
    pub line: u32,
    pub column: u32,
    pub message: String,
}

impl CompileDiagnostic {
    pub fn new(line: u32, column: u32, message: impl Into<String>) -> Self {
        Self {
            line,
            column,
            message: message.into(),
        }
    }
}

impl fmt::Display for CompileDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}: {}", self.line, self.column, self.message)
    }
}

/// Output of the transpiler, immutable once produced.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledArtifact {
    pub revision: Revision,
    pub kind: ContentKind,
    /// Empty when `diagnostics` is non-empty.
    pub executable_text: Arc<str>,
    pub source_map_hint: Option<String>,
    pub diagnostics: Vec<CompileDiagnostic>,
}

impl CompiledArtifact {
    /// An artifact is executable when compilation produced no diagnostics.
    pub fn is_executable(&self) -> bool {
        self.diagnostics.is_empty()
    }
}

/// How a render attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutcomeStatus {
    Ok,
    CompileError,
    RuntimeError,
    Timeout,
}

impl OutcomeStatus {
    pub fn is_error(&self) -> bool {
        !matches!(self, OutcomeStatus::Ok)
    }
}

impl fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            OutcomeStatus::Ok => "Ok",
            OutcomeStatus::CompileError => "CompileError",
            OutcomeStatus::RuntimeError => "RuntimeError",
            OutcomeStatus::Timeout => "Timeout",
        };
        f.write_str(label)
    }
}

/// The result of one compile+render cycle, forwarded to the UI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderOutcome {
    pub revision: Revision,
    pub status: OutcomeStatus,
    pub message: Option<String>,
    pub measured_height: Option<f64>,
    /// The HTML document the UI mounts into its isolated view on `Ok`.
    pub surface: Option<String>,
    pub diagnostics: Vec<CompileDiagnostic>,
}

impl RenderOutcome {
    pub fn ok(revision: Revision, surface: String, measured_height: Option<f64>) -> Self {
        Self {
            revision,
            status: OutcomeStatus::Ok,
            message: None,
            measured_height,
            surface: Some(surface),
            diagnostics: Vec::new(),
        }
    }

    pub fn compile_error(revision: Revision, diagnostics: Vec<CompileDiagnostic>) -> Self {
        let message = diagnostics.first().map(ToString::to_string);
        Self {
            revision,
            status: OutcomeStatus::CompileError,
            message,
            measured_height: None,
            surface: None,
            diagnostics,
        }
    }

    pub fn runtime_error(revision: Revision, message: impl Into<String>) -> Self {
        Self {
            revision,
            status: OutcomeStatus::RuntimeError,
            message: Some(message.into()),
            measured_height: None,
            surface: None,
            diagnostics: Vec::new(),
        }
    }

    pub fn timeout(revision: Revision, after: std::time::Duration) -> Self {
        Self {
            revision,
            status: OutcomeStatus::Timeout,
            message: Some(format!("preview did not finish within {}ms", after.as_millis())),
            measured_height: None,
            surface: None,
            diagnostics: Vec::new(),
        }
    }

    /// Compact "kind: message" line for the inline error panel.
    pub fn summary(&self) -> String {
        match &self.message {
            Some(message) => format!("{}: {}", self.status, message),
            None => self.status.to_string(),
        }
    }
}
