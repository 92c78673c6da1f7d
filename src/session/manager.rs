//! The preview session manager: the single surface UI components talk to.
//!
//! All bookkeeping lives in one actor task. Callers send it commands and
//! read outcomes from per-document watch channels, so no public operation
//! ever waits on a sandbox.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError};

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use uuid::Uuid;

use crate::bridge::{OutcomeReport, RenderBridge};
use crate::error::{PreviewError, Result};
use crate::model::{
    ContentKind, DocumentId, OutcomeStatus, RenderOutcome, Revision, SnippetRecord, SourceDocument,
};
use crate::sandbox::{InstanceState, SandboxConfig, SandboxHost, SandboxInstance};
use crate::session::config::SessionConfig;
use crate::session::lru::LruIndex;
use crate::transpile::Transpiler;

type Observers = Arc<std::sync::Mutex<HashMap<DocumentId, watch::Sender<Option<RenderOutcome>>>>>;

enum Command {
    Update {
        document: DocumentId,
        raw_text: String,
        kind: ContentKind,
        immediate: bool,
    },
    Dispose {
        document: DocumentId,
    },
    Source {
        document: DocumentId,
        reply: oneshot::Sender<Option<SourceDocument>>,
    },
    Stats {
        reply: oneshot::Sender<SessionStats>,
    },
}

/// A live sandbox instance as seen by [`PreviewSessions::stats`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveInstance {
    pub document: DocumentId,
    pub instance: Uuid,
    pub kind: ContentKind,
    pub state: InstanceState,
    pub bound_revision: Revision,
    pub created_at: DateTime<Utc>,
}

/// Snapshot of the manager's bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStats {
    /// Documents with a session, mounted or edited and not yet disposed.
    pub documents: usize,
    /// Live instances, least recently interacted first.
    pub live_instances: Vec<LiveInstance>,
    pub cache_hits: u64,
    pub cache_misses: u64,
}

/// Handle to the preview session manager.
///
/// Dropping the handle stops the manager and disposes every instance.
#[derive(Debug)]
pub struct PreviewSessions {
    commands: mpsc::UnboundedSender<Command>,
    observers: Observers,
    actor: JoinHandle<()>,
}

impl PreviewSessions {
    /// Start a manager hosting instances on `host`.
    ///
    /// Must be called inside a tokio runtime.
    pub fn new(host: SandboxHost, config: SessionConfig) -> Result<Self> {
        config.validate()?;
        let transpiler = Transpiler::new(config.cache_capacity()?);
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (report_tx, report_rx) = mpsc::unbounded_channel();
        let observers = Observers::default();

        let actor = Actor {
            bridge: RenderBridge::new(host.watchdog(), report_tx),
            host,
            config,
            transpiler,
            documents: HashMap::new(),
            lru: LruIndex::new(),
            observers: Arc::clone(&observers),
        };
        let actor = tokio::spawn(actor.run(command_rx, report_rx));

        Ok(Self {
            commands,
            observers,
            actor,
        })
    }

    /// Start a manager on the WebAssembly script interpreter.
    pub fn wasm(sandbox: SandboxConfig, config: SessionConfig) -> Result<Self> {
        Self::new(SandboxHost::wasm(sandbox)?, config)
    }

    /// Record an edit. The document is recompiled once edits pause for the
    /// debounce period.
    ///
    /// Fails with [`PreviewError::UnsupportedContentKind`] before anything
    /// is queued if `kind` is not recognized.
    pub fn update(
        &self,
        document: impl Into<DocumentId>,
        raw_text: impl Into<String>,
        kind: &str,
    ) -> Result<()> {
        let kind = kind.parse::<ContentKind>()?;
        self.update_kind(document, raw_text, kind)
    }

    /// [`update`](Self::update) with an already-resolved kind.
    pub fn update_kind(
        &self,
        document: impl Into<DocumentId>,
        raw_text: impl Into<String>,
        kind: ContentKind,
    ) -> Result<()> {
        self.send(Command::Update {
            document: document.into(),
            raw_text: raw_text.into(),
            kind,
            immediate: false,
        })
    }

    /// Preview a feed record.
    pub fn update_snippet(&self, document: impl Into<DocumentId>, record: &SnippetRecord) -> Result<()> {
        let kind = record.content_kind()?;
        self.update_kind(document, record.code.clone(), kind)
    }

    /// Show existing content right away, skipping the debounce.
    pub fn mount(
        &self,
        document: impl Into<DocumentId>,
        raw_text: impl Into<String>,
        kind: &str,
    ) -> Result<()> {
        let kind = kind.parse::<ContentKind>()?;
        self.send(Command::Update {
            document: document.into(),
            raw_text: raw_text.into(),
            kind,
            immediate: true,
        })
    }

    /// Latest outcome for `document`; `None` until the first one arrives.
    pub fn observe(&self, document: impl Into<DocumentId>) -> watch::Receiver<Option<RenderOutcome>> {
        let mut observers = self.observers.lock().unwrap_or_else(PoisonError::into_inner);
        observers
            .entry(document.into())
            .or_insert_with(|| watch::channel(None).0)
            .subscribe()
    }

    /// Forget `document` and tear down its instance. Existing observers see
    /// their channel close.
    pub fn dispose(&self, document: impl Into<DocumentId>) -> Result<()> {
        self.send(Command::Dispose {
            document: document.into(),
        })
    }

    /// The latest issued source, for copy and playground actions.
    pub async fn source(&self, document: impl Into<DocumentId>) -> Result<Option<SourceDocument>> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Source {
            document: document.into(),
            reply,
        })?;
        rx.await.map_err(|_| stopped())
    }

    pub async fn stats(&self) -> Result<SessionStats> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Stats { reply })?;
        rx.await.map_err(|_| stopped())
    }

    fn send(&self, command: Command) -> Result<()> {
        self.commands.send(command).map_err(|_| stopped())
    }
}

impl Drop for PreviewSessions {
    fn drop(&mut self) {
        self.actor.abort();
    }
}

fn stopped() -> PreviewError {
    PreviewError::Disposed("preview session manager".to_string())
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::Update { document, kind, immediate, .. } => f
                .debug_struct("Update")
                .field("document", document)
                .field("kind", kind)
                .field("immediate", immediate)
                .finish_non_exhaustive(),
            Command::Dispose { document } => f.debug_struct("Dispose").field("document", document).finish(),
            Command::Source { document, .. } => f.debug_struct("Source").field("document", document).finish(),
            Command::Stats { .. } => f.write_str("Stats"),
        }
    }
}

struct PendingEdit {
    raw_text: String,
    kind: ContentKind,
    due: Instant,
}

#[derive(Default)]
struct DocumentSession {
    /// Latest issued revision; outcomes for anything older are stale.
    revision: Revision,
    issued: Option<SourceDocument>,
    pending: Option<PendingEdit>,
    instance: Option<Arc<SandboxInstance>>,
    cycle: Option<JoinHandle<()>>,
}

impl DocumentSession {
    fn holds(&self, raw_text: &str, kind: ContentKind) -> (bool, bool) {
        let pending = self
            .pending
            .as_ref()
            .is_some_and(|edit| edit.kind == kind && edit.raw_text == raw_text);
        let issued = self
            .issued
            .as_ref()
            .is_some_and(|doc| doc.kind == kind && doc.raw_text == raw_text);
        (pending, issued)
    }
}

struct Actor {
    host: SandboxHost,
    bridge: RenderBridge,
    config: SessionConfig,
    transpiler: Transpiler,
    documents: HashMap<DocumentId, DocumentSession>,
    lru: LruIndex,
    observers: Observers,
}

impl Actor {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut reports: mpsc::UnboundedReceiver<OutcomeReport>,
    ) {
        loop {
            let next_due = self.next_due();
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle(command),
                    None => break,
                },
                Some(report) = reports.recv() => self.apply(report),
                _ = sleep_until_due(next_due) => self.flush_due(),
            }
        }
        tracing::debug!("preview session manager stopped");
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Update {
                document,
                raw_text,
                kind,
                immediate,
            } => self.record_edit(document, raw_text, kind, immediate),
            Command::Dispose { document } => self.dispose(&document),
            Command::Source { document, reply } => {
                let source = self.documents.get(&document).and_then(|s| s.issued.clone());
                let _ = reply.send(source);
            }
            Command::Stats { reply } => {
                let _ = reply.send(self.stats());
            }
        }
    }

    fn record_edit(&mut self, document: DocumentId, raw_text: String, kind: ContentKind, immediate: bool) {
        let session = self.documents.entry(document.clone()).or_default();
        self.lru.refresh(&document);

        match session.holds(&raw_text, kind) {
            (true, _) => {}
            (false, true) => {
                if session.pending.take().is_some() {
                    tracing::debug!(document = %document, "edit reverted to issued source");
                } else {
                    tracing::trace!(document = %document, "unchanged source ignored");
                }
                return;
            }
            (false, false) => {
                let due = if immediate {
                    Instant::now()
                } else {
                    Instant::now() + self.config.debounce
                };
                session.pending = Some(PendingEdit { raw_text, kind, due });
            }
        }

        if immediate {
            self.flush(&document);
        }
    }

    fn next_due(&self) -> Option<Instant> {
        self.documents
            .values()
            .filter_map(|session| session.pending.as_ref().map(|edit| edit.due))
            .min()
    }

    fn flush_due(&mut self) {
        let now = Instant::now();
        let due: Vec<DocumentId> = self
            .documents
            .iter()
            .filter(|(_, session)| session.pending.as_ref().is_some_and(|edit| edit.due <= now))
            .map(|(document, _)| document.clone())
            .collect();
        for document in due {
            self.flush(&document);
        }
    }

    /// Issue a revision for the pending edit and start its render cycle.
    ///
    /// A cycle still in flight is abandoned together with its instance.
    fn flush(&mut self, document: &DocumentId) {
        let Some(session) = self.documents.get_mut(document) else {
            return;
        };
        let Some(edit) = session.pending.take() else {
            return;
        };

        session.revision += 1;
        let revision = session.revision;
        if session.cycle.is_some() {
            // Its worker may still be evaluating the old revision and would
            // hold the new one behind it. Start over on a fresh context.
            tracing::debug!(document = %document, superseded_by = revision, "in-flight render superseded");
            self.release_instance(document);
        }

        let artifact = self.transpiler.compile_source(&edit.raw_text, edit.kind, revision);
        if let Some(session) = self.documents.get_mut(document) {
            session.issued = Some(SourceDocument {
                raw_text: edit.raw_text,
                kind: edit.kind,
                revision,
            });
        }
        tracing::debug!(document = %document, revision, kind = %edit.kind, "revision issued");

        if !artifact.is_executable() {
            self.publish(document, RenderOutcome::compile_error(revision, artifact.diagnostics));
            return;
        }
        if !edit.kind.needs_sandbox() {
            self.release_instance(document);
            let surface = artifact.executable_text.to_string();
            self.publish(document, RenderOutcome::ok(revision, surface, None));
            return;
        }

        let instance = self.ensure_instance(document, edit.kind);
        let cycle = self.bridge.spawn_submit(document.clone(), instance, artifact);
        if let Some(session) = self.documents.get_mut(document) {
            session.cycle = Some(cycle);
        }
    }

    /// The document's instance, recreated if the kind changed or it was
    /// disposed. Spawning evicts least recently interacted instances to
    /// stay under the cap.
    fn ensure_instance(&mut self, document: &DocumentId, kind: ContentKind) -> Arc<SandboxInstance> {
        let reusable = self
            .documents
            .get(document)
            .and_then(|session| session.instance.as_ref())
            .filter(|instance| instance.kind() == kind && !instance.is_disposed())
            .map(Arc::clone);
        if let Some(instance) = reusable {
            self.lru.touch(document);
            return instance;
        }

        self.release_instance(document);
        while self.lru.len() >= self.config.max_live_instances {
            let Some(victim) = self.lru.pop_oldest() else {
                break;
            };
            tracing::info!(document = %victim, "evicting least recently used preview");
            self.release_instance(&victim);
        }

        let instance = self.host.spawn(kind);
        tracing::debug!(document = %document, instance = %instance.id(), "instance bound");
        self.lru.touch(document);
        if let Some(session) = self.documents.get_mut(document) {
            session.instance = Some(Arc::clone(&instance));
        }
        instance
    }

    fn release_instance(&mut self, document: &DocumentId) {
        self.lru.remove(document);
        if let Some(session) = self.documents.get_mut(document) {
            if let Some(cycle) = session.cycle.take() {
                cycle.abort();
            }
            if let Some(instance) = session.instance.take() {
                instance.dispose();
            }
        }
    }

    fn apply(&mut self, report: OutcomeReport) {
        let Some(session) = self.documents.get_mut(&report.document) else {
            tracing::debug!(document = %report.document, "outcome for disposed document dropped");
            return;
        };
        let revision = report.outcome.revision;
        if revision != session.revision {
            tracing::debug!(
                document = %report.document,
                revision,
                latest = session.revision,
                "stale outcome discarded"
            );
            return;
        }
        if !session
            .instance
            .as_ref()
            .is_some_and(|instance| instance.id() == report.instance)
        {
            tracing::debug!(document = %report.document, revision, "outcome from replaced instance dropped");
            return;
        }

        session.cycle = None;
        if report.outcome.status == OutcomeStatus::Timeout {
            // The context may be stuck; the next revision gets a fresh one.
            if let Some(instance) = session.instance.take() {
                instance.dispose();
            }
            self.lru.remove(&report.document);
            tracing::warn!(document = %report.document, revision, "preview timed out; instance disposed");
        }
        self.publish(&report.document, report.outcome);
    }

    fn dispose(&mut self, document: &DocumentId) {
        self.release_instance(document);
        if self.documents.remove(document).is_some() {
            tracing::info!(document = %document, "preview session disposed");
        }
        self.observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(document);
    }

    fn publish(&self, document: &DocumentId, outcome: RenderOutcome) {
        tracing::debug!(
            document = %document,
            revision = outcome.revision,
            status = %outcome.status,
            "outcome published"
        );
        self.observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(document.clone())
            .or_insert_with(|| watch::channel(None).0)
            .send_replace(Some(outcome));
    }

    fn stats(&self) -> SessionStats {
        let live_instances = self
            .lru
            .iter()
            .filter_map(|document| {
                let instance = self.documents.get(document)?.instance.as_ref()?;
                Some(LiveInstance {
                    document: document.clone(),
                    instance: instance.id(),
                    kind: instance.kind(),
                    state: instance.state(),
                    bound_revision: instance.bound_revision(),
                    created_at: instance.created_at(),
                })
            })
            .collect();
        SessionStats {
            documents: self.documents.len(),
            live_instances,
            cache_hits: self.transpiler.cache_hits(),
            cache_misses: self.transpiler.cache_misses(),
        }
    }
}

impl Drop for Actor {
    fn drop(&mut self) {
        for session in self.documents.values_mut() {
            if let Some(cycle) = session.cycle.take() {
                cycle.abort();
            }
            if let Some(instance) = session.instance.take() {
                instance.dispose();
            }
        }
    }
}

async fn sleep_until_due(due: Option<Instant>) {
    match due {
        Some(due) => tokio::time::sleep_until(due).await,
        None => std::future::pending().await,
    }
}
