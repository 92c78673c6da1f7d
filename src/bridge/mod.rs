//! Render bridge: submits artifacts to sandbox instances and turns guest
//! answers into [`RenderOutcome`]s.
//!
//! Answers are matched to requests by revision. Anything the guest sends
//! for another revision is dropped, and anything that is not a well-formed
//! answer becomes a `RuntimeError` for the submitted revision.

pub mod protocol;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use uuid::Uuid;

use crate::model::{CompiledArtifact, ContentKind, DocumentId, OutcomeStatus, RenderOutcome};
use crate::normalize::shell;
use crate::sandbox::{InstanceState, SandboxInstance};

use self::protocol::{GuestErrorKind, GuestMessage, HostMessage};

/// An outcome delivered back to whoever owns the document.
#[derive(Debug, Clone)]
pub struct OutcomeReport {
    pub document: DocumentId,
    pub instance: Uuid,
    pub outcome: RenderOutcome,
}

/// Sends artifacts across the boundary and waits for the matching answer.
#[derive(Debug, Clone)]
pub struct RenderBridge {
    watchdog: Duration,
    on_outcome: mpsc::UnboundedSender<OutcomeReport>,
}

impl RenderBridge {
    /// Outcomes of [`spawn_submit`](Self::spawn_submit) are reported on `on_outcome`.
    pub fn new(watchdog: Duration, on_outcome: mpsc::UnboundedSender<OutcomeReport>) -> Self {
        Self {
            watchdog,
            on_outcome,
        }
    }

    pub fn watchdog(&self) -> Duration {
        self.watchdog
    }

    /// Inject `artifact` into `instance` and wait for its outcome or the watchdog.
    ///
    /// Never fails: every failure mode is an outcome for `artifact.revision`.
    pub async fn submit(&self, instance: &SandboxInstance, artifact: &CompiledArtifact) -> RenderOutcome {
        let revision = artifact.revision;
        if !artifact.is_executable() {
            return RenderOutcome::compile_error(revision, artifact.diagnostics.clone());
        }

        let deadline = Instant::now() + self.watchdog;
        let mut outcomes = instance.outcomes().await;

        if let Err(error) = instance.inject(HostMessage::inject(artifact)).await {
            return RenderOutcome::runtime_error(revision, error.to_string());
        }
        tracing::debug!(instance = %instance.id(), revision, "artifact injected");

        loop {
            match tokio::time::timeout_at(deadline, outcomes.recv()).await {
                Err(_) => {
                    instance.transition(InstanceState::Errored);
                    tracing::warn!(
                        instance = %instance.id(),
                        revision,
                        watchdog = ?self.watchdog,
                        "render watchdog fired"
                    );
                    return RenderOutcome::timeout(revision, self.watchdog);
                }
                Ok(None) => {
                    return RenderOutcome::runtime_error(
                        revision,
                        format!("sandbox instance {} is disposed", instance.id()),
                    );
                }
                Ok(Some(answer)) if answer.revision() != revision => {
                    tracing::debug!(
                        instance = %instance.id(),
                        revision,
                        stale = answer.revision(),
                        "discarding answer for superseded revision"
                    );
                }
                Ok(Some(answer)) => return self.accept(instance, artifact, answer),
            }
        }
    }

    fn accept(
        &self,
        instance: &SandboxInstance,
        artifact: &CompiledArtifact,
        answer: GuestMessage,
    ) -> RenderOutcome {
        let revision = artifact.revision;
        match answer {
            GuestMessage::Rendered {
                measured_height,
                surface,
                ..
            } => {
                instance.transition(InstanceState::Ready);
                // The host owns the document shell; a markup guest only measures.
                let surface = match artifact.kind {
                    ContentKind::Component => shell::document(&surface),
                    ContentKind::Markup | ContentKind::Prose => artifact.executable_text.to_string(),
                };
                RenderOutcome::ok(revision, surface, measured_height)
            }
            GuestMessage::Error { kind, message, .. } => {
                instance.transition(InstanceState::Errored);
                tracing::debug!(instance = %instance.id(), revision, ?kind, %message, "guest reported error");
                match kind {
                    GuestErrorKind::RuntimeError => RenderOutcome::runtime_error(revision, message),
                    GuestErrorKind::CompileError => RenderOutcome {
                        status: OutcomeStatus::CompileError,
                        ..RenderOutcome::runtime_error(revision, message)
                    },
                    GuestErrorKind::Timeout => RenderOutcome {
                        message: Some(message),
                        ..RenderOutcome::timeout(revision, self.watchdog)
                    },
                }
            }
        }
    }

    /// Run [`submit`](Self::submit) in the background and report the outcome
    /// for `document` on the bridge's outcome channel.
    pub fn spawn_submit(
        &self,
        document: DocumentId,
        instance: Arc<SandboxInstance>,
        artifact: CompiledArtifact,
    ) -> JoinHandle<()> {
        let bridge = self.clone();
        tokio::spawn(async move {
            let outcome = bridge.submit(&instance, &artifact).await;
            let report = OutcomeReport {
                document,
                instance: instance.id(),
                outcome,
            };
            if bridge.on_outcome.send(report).is_err() {
                tracing::debug!("outcome receiver is gone");
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{PreviewError, Result};
    use crate::model::CompileDiagnostic;
    use crate::sandbox::Isolate;

    /// Answers according to the first word of the artifact.
    struct Scripted;

    impl Isolate for Scripted {
        fn evaluate(&self, message: &HostMessage) -> Result<GuestMessage> {
            let HostMessage::Inject {
                revision,
                executable_text,
                ..
            } = message;
            let revision = *revision;
            match executable_text.split_whitespace().next() {
                Some("throw") => Ok(GuestMessage::Error {
                    revision,
                    kind: GuestErrorKind::RuntimeError,
                    message: "TypeError: boom".into(),
                }),
                Some("hang") => {
                    std::thread::sleep(Duration::from_millis(300));
                    Err(PreviewError::Timeout(Duration::from_millis(300)))
                }
                Some("stale") => Ok(GuestMessage::Rendered {
                    revision: revision + 100,
                    measured_height: None,
                    surface: String::new(),
                }),
                _ => Ok(GuestMessage::Rendered {
                    revision,
                    measured_height: Some(48.0),
                    surface: "<p>Hi</p>".into(),
                }),
            }
        }
    }

    fn artifact(revision: u64, kind: ContentKind, text: &str) -> CompiledArtifact {
        CompiledArtifact {
            revision,
            kind,
            executable_text: Arc::from(text),
            source_map_hint: None,
            diagnostics: Vec::new(),
        }
    }

    fn bridge(watchdog: Duration) -> (RenderBridge, mpsc::UnboundedReceiver<OutcomeReport>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (RenderBridge::new(watchdog, tx), rx)
    }

    #[tokio::test]
    async fn component_fragment_is_wrapped_in_shell() {
        let (bridge, _rx) = bridge(Duration::from_secs(1));
        let instance = SandboxInstance::spawn(ContentKind::Component, Arc::new(Scripted));
        let outcome = bridge
            .submit(&instance, &artifact(1, ContentKind::Component, "ok"))
            .await;
        assert_eq!(outcome.status, OutcomeStatus::Ok);
        assert_eq!(outcome.measured_height, Some(48.0));
        let surface = outcome.surface.unwrap();
        assert!(surface.starts_with("<!DOCTYPE html>"));
        assert!(surface.contains("<p>Hi</p>"));
        assert_eq!(instance.state(), InstanceState::Ready);
    }

    #[tokio::test]
    async fn runtime_errors_leave_instance_errored() {
        let (bridge, _rx) = bridge(Duration::from_secs(1));
        let instance = SandboxInstance::spawn(ContentKind::Component, Arc::new(Scripted));
        let outcome = bridge
            .submit(&instance, &artifact(2, ContentKind::Component, "throw"))
            .await;
        assert_eq!(outcome.status, OutcomeStatus::RuntimeError);
        assert_eq!(outcome.summary(), "RuntimeError: TypeError: boom");
        assert_eq!(instance.state(), InstanceState::Errored);
    }

    #[tokio::test]
    async fn watchdog_reports_timeout() {
        let (bridge, _rx) = bridge(Duration::from_millis(50));
        let instance = SandboxInstance::spawn(ContentKind::Component, Arc::new(Scripted));
        let started = std::time::Instant::now();
        let outcome = bridge
            .submit(&instance, &artifact(3, ContentKind::Component, "hang"))
            .await;
        assert_eq!(outcome.status, OutcomeStatus::Timeout);
        assert!(started.elapsed() < Duration::from_millis(250));
    }

    #[tokio::test]
    async fn answers_for_other_revisions_are_discarded() {
        let (bridge, _rx) = bridge(Duration::from_millis(100));
        let instance = SandboxInstance::spawn(ContentKind::Component, Arc::new(Scripted));
        let outcome = bridge
            .submit(&instance, &artifact(4, ContentKind::Component, "stale"))
            .await;
        assert_eq!(outcome.status, OutcomeStatus::Timeout);
        assert_eq!(outcome.revision, 4);
    }

    #[tokio::test]
    async fn non_executable_artifacts_never_reach_the_instance() {
        let (bridge, _rx) = bridge(Duration::from_secs(1));
        let instance = SandboxInstance::spawn(ContentKind::Component, Arc::new(Scripted));
        let mut broken = artifact(5, ContentKind::Component, "");
        broken.diagnostics.push(CompileDiagnostic::new(1, 16, "unclosed '('"));
        let outcome = bridge.submit(&instance, &broken).await;
        assert_eq!(outcome.status, OutcomeStatus::CompileError);
        assert_eq!(instance.bound_revision(), 0);
    }

    #[tokio::test]
    async fn disposed_instances_yield_runtime_errors() {
        let (bridge, _rx) = bridge(Duration::from_secs(1));
        let instance = SandboxInstance::spawn(ContentKind::Markup, Arc::new(Scripted));
        instance.dispose();
        let outcome = bridge
            .submit(&instance, &artifact(6, ContentKind::Markup, "<p>x</p>"))
            .await;
        assert_eq!(outcome.status, OutcomeStatus::RuntimeError);
    }

    #[tokio::test]
    async fn spawned_submissions_report_back() {
        let (bridge, mut rx) = bridge(Duration::from_secs(1));
        let instance = SandboxInstance::spawn(ContentKind::Markup, Arc::new(Scripted));
        let doc = artifact(7, ContentKind::Markup, "<html>doc</html>");
        bridge.spawn_submit(DocumentId::from("d1"), Arc::clone(&instance), doc);

        let report = rx.recv().await.unwrap();
        assert_eq!(report.document, DocumentId::from("d1"));
        assert_eq!(report.instance, instance.id());
        assert_eq!(report.outcome.surface.as_deref(), Some("<html>doc</html>"));
    }
}
