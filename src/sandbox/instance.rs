//! One live execution context and its lifecycle.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::bridge::protocol::{GuestErrorKind, GuestMessage, HostMessage};
use crate::error::{PreviewError, Result};
use crate::model::{ContentKind, Revision};
use crate::sandbox::isolate::Isolate;

const INBOX_CAPACITY: usize = 4;

/// Lifecycle of a [`SandboxInstance`].
///
/// `Initializing -> Ready -> Rendering -> {Ready | Errored}`; `Disposed` is
/// terminal and reachable from any state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstanceState {
    Initializing,
    Ready,
    Rendering,
    Errored,
    Disposed,
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A sandboxed execution context bound to one preview surface.
///
/// The instance only talks to its worker through messages: injections go
/// into the inbox, guest answers come out of the outbox. The worker holds
/// the isolate, never any host state.
pub struct SandboxInstance {
    id: Uuid,
    kind: ContentKind,
    created_at: DateTime<Utc>,
    state: Arc<watch::Sender<InstanceState>>,
    bound_revision: AtomicU64,
    inbox: mpsc::Sender<HostMessage>,
    outbox: Mutex<mpsc::Receiver<GuestMessage>>,
    worker: JoinHandle<()>,
}

impl fmt::Debug for SandboxInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SandboxInstance")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("state", &self.state())
            .field("bound_revision", &self.bound_revision())
            .field("created_at", &self.created_at)
            .finish()
    }
}

impl SandboxInstance {
    /// Start a worker for `isolate` and return the instance in `Initializing`.
    ///
    /// Must be called inside a tokio runtime.
    pub fn spawn(kind: ContentKind, isolate: Arc<dyn Isolate>) -> Arc<Self> {
        let id = Uuid::new_v4();
        let state = Arc::new(watch::channel(InstanceState::Initializing).0);
        let (inbox, inbox_rx) = mpsc::channel(INBOX_CAPACITY);
        let (outbox_tx, outbox) = mpsc::channel(INBOX_CAPACITY);

        let worker = tokio::spawn(run_worker(id, Arc::clone(&state), isolate, inbox_rx, outbox_tx));
        Arc::new(Self {
            id,
            kind,
            created_at: Utc::now(),
            state,
            bound_revision: AtomicU64::new(0),
            inbox,
            outbox: Mutex::new(outbox),
            worker,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn kind(&self) -> ContentKind {
        self.kind
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn state(&self) -> InstanceState {
        *self.state.borrow()
    }

    /// Watch state transitions.
    pub fn subscribe(&self) -> watch::Receiver<InstanceState> {
        self.state.subscribe()
    }

    /// The revision of the most recent injection.
    pub fn bound_revision(&self) -> Revision {
        self.bound_revision.load(Ordering::Acquire)
    }

    pub fn is_disposed(&self) -> bool {
        self.state() == InstanceState::Disposed
    }

    /// Move to `next`. Returns `false` if the instance is already disposed.
    pub fn transition(&self, next: InstanceState) -> bool {
        self.state.send_if_modified(|state| {
            if *state == InstanceState::Disposed || *state == next {
                return false;
            }
            tracing::trace!(instance = %self.id, from = %state, to = %next, "instance state");
            *state = next;
            true
        }) || self.state() == next
    }

    /// Queue an injection and mark the instance `Rendering` for its revision.
    pub async fn inject(&self, message: HostMessage) -> Result<()> {
        if !self.transition(InstanceState::Rendering) {
            return Err(PreviewError::Disposed(self.id.to_string()));
        }
        self.bound_revision.store(message.revision(), Ordering::Release);
        self.inbox
            .send(message)
            .await
            .map_err(|_| PreviewError::Disposed(self.id.to_string()))
    }

    /// Exclusive access to guest answers.
    pub async fn outcomes(&self) -> MutexGuard<'_, mpsc::Receiver<GuestMessage>> {
        self.outbox.lock().await
    }

    /// Tear the context down. Irreversible; in-flight answers are dropped.
    pub fn dispose(&self) {
        let previous = self.state.send_replace(InstanceState::Disposed);
        self.worker.abort();
        if previous != InstanceState::Disposed {
            tracing::info!(instance = %self.id, kind = %self.kind, "sandbox instance disposed");
        }
    }
}

impl Drop for SandboxInstance {
    fn drop(&mut self) {
        self.worker.abort();
    }
}

/// Leave `Initializing`, unless an injection or disposal got there first.
fn initialized(state: &watch::Sender<InstanceState>, next: InstanceState) {
    state.send_if_modified(|state| {
        if *state != InstanceState::Initializing {
            return false;
        }
        *state = next;
        true
    });
}

async fn run_worker(
    id: Uuid,
    state: Arc<watch::Sender<InstanceState>>,
    isolate: Arc<dyn Isolate>,
    mut inbox: mpsc::Receiver<HostMessage>,
    outbox: mpsc::Sender<GuestMessage>,
) {
    let prepared = {
        let isolate = Arc::clone(&isolate);
        match tokio::task::spawn_blocking(move || isolate.prepare()).await {
            Ok(result) => result.map_err(|e| e.to_string()),
            Err(e) => Err(format!("sandbox preparation panicked: {e}")),
        }
    };
    match &prepared {
        Ok(()) => initialized(&state, InstanceState::Ready),
        Err(reason) => {
            tracing::warn!(instance = %id, %reason, "sandbox failed to initialize");
            initialized(&state, InstanceState::Errored);
        }
    }

    while let Some(message) = inbox.recv().await {
        let revision = message.revision();
        let answer = match &prepared {
            Err(reason) => GuestMessage::Error {
                revision,
                kind: GuestErrorKind::RuntimeError,
                message: reason.clone(),
            },
            Ok(()) => {
                let isolate = Arc::clone(&isolate);
                let evaluation = tokio::task::spawn_blocking(move || isolate.evaluate(&message));
                match evaluation.await {
                    Ok(Ok(answer)) => answer,
                    Ok(Err(error)) => {
                        tracing::debug!(instance = %id, revision, %error, "evaluation failed");
                        GuestMessage::failure(revision, &error)
                    }
                    Err(e) => GuestMessage::failure(
                        revision,
                        &PreviewError::MalformedMessage(format!("evaluation panicked: {e}")),
                    ),
                }
            }
        };
        if outbox.send(answer).await.is_err() {
            break;
        }
    }
}
