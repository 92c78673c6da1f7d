//! Compilation of normalized sources into executable artifacts.
//!
//! Components are lowered to plain script and wrapped in their harness;
//! markup and prose compile to themselves. No optimization passes run, and
//! output depends only on the input text, so artifacts can be cached by
//! content fingerprint.

pub mod jsx;

use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;

use crate::model::{CompileDiagnostic, CompiledArtifact, ContentKind, Fingerprint, Revision};
use crate::normalize::{self, ComponentHarness, NormalizedSource};

/// Compile a normalized source for the given revision.
pub fn compile(normalized: &NormalizedSource, revision: Revision) -> CompiledArtifact {
    let kind = normalized.kind();
    let (executable_text, source_map_hint, diagnostics) = match normalized {
        NormalizedSource::Markup { document } | NormalizedSource::Prose { document } => {
            (Arc::from(document.as_str()), None, Vec::new())
        }
        NormalizedSource::Component(harness) => match compile_component(harness) {
            Ok(script) => {
                let hint = format!("line-offset:{}", harness.prologue().lines().count());
                (Arc::from(script), Some(hint), Vec::new())
            }
            Err(diagnostics) => (Arc::from(""), None, diagnostics),
        },
    };

    CompiledArtifact {
        revision,
        kind,
        executable_text,
        source_map_hint,
        diagnostics,
    }
}

fn compile_component(harness: &ComponentHarness) -> Result<String, Vec<CompileDiagnostic>> {
    let body = jsx::lower(&harness.body)?;
    let prologue = harness.prologue();
    let epilogue = harness.epilogue();

    let mut script = String::with_capacity(prologue.len() + body.len() + epilogue.len());
    script.push_str(prologue);
    script.push_str(&body);
    script.push_str(&epilogue);
    Ok(script)
}

/// What the cache keeps per fingerprint; the revision is stamped on reuse.
#[derive(Debug, Clone)]
struct Compiled {
    executable_text: Arc<str>,
    source_map_hint: Option<String>,
    diagnostics: Vec<CompileDiagnostic>,
}

/// Normalizes and compiles raw text, reusing artifacts for identical input.
pub struct Transpiler {
    cache: LruCache<Fingerprint, Compiled>,
    hits: u64,
    misses: u64,
}

impl std::fmt::Debug for Transpiler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transpiler")
            .field("cached", &self.cache.len())
            .field("hits", &self.hits)
            .field("misses", &self.misses)
            .finish()
    }
}

impl Transpiler {
    /// Create a transpiler caching up to `capacity` artifacts.
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            cache: LruCache::new(capacity),
            hits: 0,
            misses: 0,
        }
    }

    /// Normalize and compile `raw` as `kind` for `revision`.
    pub fn compile_source(&mut self, raw: &str, kind: ContentKind, revision: Revision) -> CompiledArtifact {
        let fingerprint = Fingerprint::of(raw, kind);

        if let Some(compiled) = self.cache.get(&fingerprint) {
            self.hits += 1;
            tracing::debug!(%fingerprint, revision, "compile cache hit");
            return CompiledArtifact {
                revision,
                kind,
                executable_text: Arc::clone(&compiled.executable_text),
                source_map_hint: compiled.source_map_hint.clone(),
                diagnostics: compiled.diagnostics.clone(),
            };
        }

        self.misses += 1;
        let artifact = compile(&normalize::normalize(raw, kind), revision);
        tracing::debug!(
            %fingerprint,
            revision,
            kind = %kind,
            diagnostics = artifact.diagnostics.len(),
            "compiled source"
        );
        self.cache.put(
            fingerprint,
            Compiled {
                executable_text: Arc::clone(&artifact.executable_text),
                source_map_hint: artifact.source_map_hint.clone(),
                diagnostics: artifact.diagnostics.clone(),
            },
        );
        artifact
    }

    /// Number of compiles served from the cache.
    pub fn cache_hits(&self) -> u64 {
        self.hits
    }

    /// Number of compiles that ran the full pipeline.
    pub fn cache_misses(&self) -> u64 {
        self.misses
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::normalize;

    #[test]
    fn markup_compiles_to_itself() {
        let normalized = normalize("<div class='p-4'>Hi</div>", ContentKind::Markup);
        let artifact = compile(&normalized, 1);
        assert!(artifact.is_executable());
        assert_eq!(artifact.kind, ContentKind::Markup);
        match normalized {
            NormalizedSource::Markup { document } => {
                assert_eq!(&*artifact.executable_text, document.as_str())
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn component_gets_prologue_and_mount() {
        let normalized = normalize(
            "const Hello = () => <p>Hi</p>;\nexport default Hello;",
            ContentKind::Component,
        );
        let artifact = compile(&normalized, 2);
        let text = &*artifact.executable_text;
        assert!(text.starts_with("\"use strict\";\nvar __exports = {};\n"));
        assert!(text.contains("__jsx(\"p\", null, \"Hi\")"));
        assert!(text.contains("__exports.default = Hello;"));
        assert!(text.trim_end().ends_with("__preview.mount(__exports.default);"));
        assert_eq!(artifact.source_map_hint.as_deref(), Some("line-offset:2"));
    }

    #[test]
    fn syntax_failure_has_empty_text_and_diagnostics() {
        let artifact = compile(&normalize("function Broken(", ContentKind::Component), 3);
        assert!(!artifact.is_executable());
        assert!(artifact.executable_text.is_empty());
        assert_eq!(artifact.diagnostics.len(), 1);
        assert_eq!(artifact.diagnostics[0].line, 1);
    }

    #[test]
    fn compilation_is_deterministic() {
        let source = "function Card({ title }) {\n  return <div className=\"rounded\">{title}</div>;\n}";
        let a = compile(&normalize(source, ContentKind::Component), 1);
        let b = compile(&normalize(source, ContentKind::Component), 9);
        assert_eq!(a.executable_text, b.executable_text);
    }

    #[test]
    fn transpiler_reuses_cached_artifacts() {
        let mut transpiler = Transpiler::new(NonZeroUsize::new(4).unwrap());
        let first = transpiler.compile_source("<b>x</b>", ContentKind::Markup, 1);
        let second = transpiler.compile_source("<b>x</b>", ContentKind::Markup, 2);
        assert_eq!(second.revision, 2);
        assert!(Arc::ptr_eq(&first.executable_text, &second.executable_text));
        assert_eq!((transpiler.cache_hits(), transpiler.cache_misses()), (1, 1));

        transpiler.compile_source("<b>x</b>", ContentKind::Component, 3);
        assert_eq!(transpiler.cache_misses(), 2);
    }
}
