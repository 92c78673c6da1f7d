//! Source normalization: classify raw text by content kind and prepare it
//! for the transpiler.
//!
//! Normalization never rejects malformed input. Broken markup is passed
//! through and broken components surface later as compile or runtime errors.

pub mod prose;
pub mod shell;

use crate::model::ContentKind;

/// Raw source prepared for compilation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NormalizedSource {
    /// A complete document: the raw markup inside the fixed shell.
    Markup { document: String },
    /// Component source plus the export the harness will mount.
    Component(ComponentHarness),
    /// Already-safe HTML; this path never touches the sandbox.
    Prose { document: String },
}

impl NormalizedSource {
    pub fn kind(&self) -> ContentKind {
        match self {
            NormalizedSource::Markup { .. } => ContentKind::Markup,
            NormalizedSource::Component(_) => ContentKind::Component,
            NormalizedSource::Prose { .. } => ContentKind::Prose,
        }
    }
}

/// The top-level binding a component harness mounts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportBinding {
    /// `export default <expr>`.
    Default,
    /// No default export; the last top-level capitalized declaration.
    Named(String),
    /// Nothing mountable was declared.
    Missing,
}

/// Component source wrapped with its expected export. Nothing is evaluated here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentHarness {
    pub body: String,
    pub export: ExportBinding,
}

impl ComponentHarness {
    pub fn new(raw: &str) -> Self {
        Self {
            body: raw.to_string(),
            export: detect_export(raw),
        }
    }

    /// Script evaluated before the body.
    pub fn prologue(&self) -> &'static str {
        "\"use strict\";\nvar __exports = {};\n"
    }

    /// Script evaluated after the body; hands the component to the runtime.
    pub fn epilogue(&self) -> String {
        match &self.export {
            ExportBinding::Default => "\n;__preview.mount(__exports.default);\n".to_string(),
            ExportBinding::Named(name) => format!(
                "\n;__preview.mount(typeof {name} !== \"undefined\" ? {name} : undefined);\n"
            ),
            ExportBinding::Missing => "\n;__preview.mount(undefined);\n".to_string(),
        }
    }
}

/// Prepare raw text of the given kind for compilation.
///
/// Unknown kinds are rejected when the kind is parsed (see
/// [`ContentKind::from_str`](std::str::FromStr)), so this is total.
pub fn normalize(raw: &str, kind: ContentKind) -> NormalizedSource {
    match kind {
        ContentKind::Markup => NormalizedSource::Markup {
            document: shell::document(raw),
        },
        ContentKind::Component => NormalizedSource::Component(ComponentHarness::new(raw)),
        ContentKind::Prose => {
            let body = format!(
                "<article class=\"prose max-w-none p-4\">\n{}</article>",
                prose::markdown_to_safe_html(raw)
            );
            NormalizedSource::Prose {
                document: shell::document(&body),
            }
        }
    }
}

/// Find the export a component snippet expects to be mounted.
///
/// Only unindented lines are considered top level.
fn detect_export(raw: &str) -> ExportBinding {
    let mut last_named = None;

    for line in raw.lines() {
        if line.starts_with(char::is_whitespace) {
            continue;
        }
        if let Some(rest) = line.strip_prefix("export default") {
            if rest.is_empty() || rest.starts_with(|c: char| c.is_whitespace() || c == '(') {
                return ExportBinding::Default;
            }
        }
        let decl = line.strip_prefix("export ").unwrap_or(line);
        if let Some(name) = declared_name(decl) {
            if name.starts_with(|c: char| c.is_ascii_uppercase()) {
                last_named = Some(name.to_string());
            }
        }
    }

    last_named.map_or(ExportBinding::Missing, ExportBinding::Named)
}

fn declared_name(decl: &str) -> Option<&str> {
    const KEYWORDS: [&str; 5] = ["function ", "const ", "let ", "var ", "class "];

    let decl = decl.strip_prefix("async ").unwrap_or(decl);
    let rest = KEYWORDS
        .iter()
        .find_map(|keyword| decl.strip_prefix(keyword))?
        .trim_start();
    let end = rest
        .find(|c: char| !(c.is_alphanumeric() || c == '_' || c == '$'))
        .unwrap_or(rest.len());
    let name = &rest[..end];
    (!name.is_empty()).then_some(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn markup_is_wrapped_in_shell() {
        match normalize("<div class='p-4'>Hi</div>", ContentKind::Markup) {
            NormalizedSource::Markup { document } => {
                assert!(document.starts_with("<!DOCTYPE html>"));
                assert!(document.contains("<div class='p-4'>Hi</div>"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn prose_is_converted_not_sandboxed() {
        let normalized = normalize("# Title\n<script>x()</script>", ContentKind::Prose);
        assert_eq!(normalized.kind(), ContentKind::Prose);
        match normalized {
            NormalizedSource::Prose { document } => {
                assert!(document.contains("<h1>Title</h1>"));
                assert_eq!(document.matches("<script").count(), 1, "only the style engine");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn default_export_wins() {
        let harness = ComponentHarness::new(
            "const Button = () => <button/>;\nconst Card = () => <div/>;\nexport default Button;",
        );
        assert_eq!(harness.export, ExportBinding::Default);
        assert!(harness.epilogue().contains("__exports.default"));
    }

    #[test]
    fn falls_back_to_last_capitalized_declaration() {
        let harness = ComponentHarness::new(
            "function helper() {}\nfunction Card() {\n  const Inner = 1;\n}\nexport function Badge() {}\nconst lower = 2;",
        );
        assert_eq!(harness.export, ExportBinding::Named("Badge".to_string()));
        assert!(harness.epilogue().contains("typeof Badge !== \"undefined\""));
    }

    #[test]
    fn missing_export_is_not_an_error() {
        let harness = ComponentHarness::new("while(true){}");
        assert_eq!(harness.export, ExportBinding::Missing);
        assert_eq!(harness.body, "while(true){}");
    }

    #[test]
    fn declared_names() {
        assert_eq!(declared_name("async function Load() {"), Some("Load"));
        assert_eq!(declared_name("class Widget extends X {"), Some("Widget"));
        assert_eq!(declared_name("const  Spaced = 1"), Some("Spaced"));
        assert_eq!(declared_name("return x"), None);
    }
}
