//! Runs the conversation controller on its own task so the UI keeps drawing
//! while a reply streams in.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use sidechat_core::transcript::Status;
use sidechat_core::{
    ConversationController, InFlight, RequestState, SendOutcome, SharedTranscript, TranscriptView,
};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug)]
pub enum SessionCommand {
    Send(String),
    Clear,
    SetModel(String),
    /// Render the whole conversation again, e.g. once markdown is available.
    Rerender,
}

pub struct SessionHandle {
    commands: mpsc::UnboundedSender<SessionCommand>,
    in_flight: InFlight,
    state: watch::Receiver<RequestState>,
    awaiting_reply: Arc<AtomicBool>,
    session: CancellationToken,
    task: JoinHandle<()>,
}

impl SessionHandle {
    pub fn spawn(controller: ConversationController, transcript: SharedTranscript) -> Self {
        let (commands, rx) = mpsc::unbounded_channel();
        let in_flight = controller.in_flight();
        let state = controller.subscribe();
        let session = controller.session_token();
        let awaiting_reply = Arc::new(AtomicBool::new(false));

        let task = tokio::spawn(run(
            controller,
            transcript,
            rx,
            awaiting_reply.clone(),
            session.clone(),
        ));

        Self {
            commands,
            in_flight,
            state,
            awaiting_reply,
            session,
            task,
        }
    }

    /// Queues a message. Returns false while the previous reply is still
    /// outstanding.
    pub fn send(&self, text: String) -> bool {
        if self.is_busy() {
            return false;
        }
        self.awaiting_reply.store(true, Ordering::SeqCst);
        if self.commands.send(SessionCommand::Send(text)).is_err() {
            self.awaiting_reply.store(false, Ordering::SeqCst);
            return false;
        }
        true
    }

    pub fn command(&self, command: SessionCommand) {
        if self.commands.send(command).is_err() {
            tracing::warn!("conversation session has stopped");
        }
    }

    pub fn is_busy(&self) -> bool {
        self.awaiting_reply.load(Ordering::SeqCst) || self.in_flight.is_busy()
    }

    /// Stops the reply being streamed, if any.
    pub fn cancel(&self) -> bool {
        self.in_flight.cancel()
    }

    pub fn state(&self) -> RequestState {
        *self.state.borrow()
    }

    /// Ends the session. Cancelling the session token also stops a message
    /// that is queued or still being saved, not just a reply already
    /// streaming.
    pub async fn shutdown(self) {
        self.session.cancel();
        drop(self.commands);
        if let Err(e) = self.task.await {
            tracing::error!("conversation session ended abnormally: {}", e);
        }
    }
}

/// Status line shown for a finished send, if any.
fn outcome_status(outcome: &SendOutcome) -> Option<Status> {
    match outcome {
        SendOutcome::Busy => Some(Status::info("Still answering the previous message")),
        SendOutcome::Cancelled(_) => Some(Status::info("Response stopped")),
        SendOutcome::Completed(_) | SendOutcome::Failed(_) | SendOutcome::Ignored => None,
    }
}

async fn run(
    mut controller: ConversationController,
    mut transcript: SharedTranscript,
    mut commands: mpsc::UnboundedReceiver<SessionCommand>,
    awaiting_reply: Arc<AtomicBool>,
    session: CancellationToken,
) {
    while let Some(command) = commands.recv().await {
        match command {
            SessionCommand::Send(text) => {
                if session.is_cancelled() {
                    tracing::debug!("dropping message queued after shutdown");
                    awaiting_reply.store(false, Ordering::SeqCst);
                    continue;
                }
                let outcome = controller.send_message(&text).await;
                awaiting_reply.store(false, Ordering::SeqCst);
                if let Some(status) = outcome_status(&outcome) {
                    transcript.set_status(status);
                }
            }
            SessionCommand::Clear => controller.clear_conversation().await,
            SessionCommand::SetModel(model) => {
                if let Err(e) = controller.set_model(&model).await {
                    tracing::error!("failed to save model: {}", e);
                    transcript.set_status(Status::error(e.status_text()));
                }
            }
            SessionCommand::Rerender => controller.display_conversation(),
        }
    }

    tracing::debug!("conversation session closing");
    controller.teardown();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use async_trait::async_trait;
    use bytes::Bytes;
    use futures_util::stream::{self, StreamExt};
    use sidechat_core::ai::{CompletionRequest, CompletionResponse};
    use sidechat_core::render::{Capabilities, CapabilityLoader, MarkdownRenderer};
    use sidechat_core::settings::save_settings;
    use sidechat_core::store::{initialize_storage, save_conversation, MemoryStore};
    use sidechat_core::transcript::StatusKind;
    use sidechat_core::{
        ChatError, ChatMessage, CompletionBackend, ControllerOptions, KeyValueStore, RenderingAdapter,
    };

    const PARTIAL: &str = "data: {\"choices\":[{\"delta\":{\"content\":\"partial\"}}]}\n\n";

    /// Streams its chunks, then keeps the body open forever.
    struct StalledBackend {
        chunks: Vec<&'static str>,
    }

    #[async_trait]
    impl CompletionBackend for StalledBackend {
        async fn complete(
            &self,
            _request: &CompletionRequest,
            _api_key: &str,
        ) -> sidechat_core::Result<CompletionResponse> {
            let chunks: Vec<sidechat_core::Result<Bytes>> = self
                .chunks
                .iter()
                .map(|chunk| Ok(Bytes::from_static(chunk.as_bytes())))
                .collect();
            Ok(CompletionResponse::Stream(Box::pin(
                stream::iter(chunks).chain(stream::pending()),
            )))
        }
    }

    struct MarkdownLoader;

    #[async_trait]
    impl CapabilityLoader for MarkdownLoader {
        async fn load(&self) -> Capabilities {
            Capabilities {
                preferred: Some(Arc::new(MarkdownRenderer::new(None))),
                highlighter: None,
            }
        }
    }

    async fn spawn_session(
        chunks: Vec<&'static str>,
        history: Vec<ChatMessage>,
        renderer: RenderingAdapter,
    ) -> (SessionHandle, SharedTranscript) {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        initialize_storage(store.as_ref()).await.unwrap();
        save_settings(store.as_ref(), "sk-test", "gpt-4o").await.unwrap();
        save_conversation(store.as_ref(), &history).await.unwrap();

        let transcript = SharedTranscript::new();
        let controller = ConversationController::init(
            store,
            Arc::new(StalledBackend { chunks }),
            Box::new(transcript.clone()),
            renderer,
            ControllerOptions::default(),
        )
        .await;
        (SessionHandle::spawn(controller, transcript.clone()), transcript)
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(3), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[tokio::test]
    async fn test_shutdown_ends_queued_message() {
        let (session, _transcript) = spawn_session(vec![], vec![], RenderingAdapter::new()).await;
        assert!(session.send("hello".to_string()));

        let finished = tokio::time::timeout(Duration::from_secs(3), session.shutdown()).await;
        assert!(finished.is_ok());
    }

    #[tokio::test]
    async fn test_shutdown_ends_stalled_stream() {
        let (session, transcript) = spawn_session(vec![], vec![], RenderingAdapter::new()).await;
        assert!(session.send("hello".to_string()));
        wait_until(|| transcript.lock().is_typing()).await;

        let finished = tokio::time::timeout(Duration::from_secs(3), session.shutdown()).await;
        assert!(finished.is_ok());
    }

    #[tokio::test]
    async fn test_second_send_refused_while_awaiting_reply() {
        let (session, _transcript) = spawn_session(vec![], vec![], RenderingAdapter::new()).await;

        assert!(session.send("first".to_string()));
        assert!(session.is_busy());
        assert!(!session.send("second".to_string()));

        session.shutdown().await;
    }

    #[tokio::test]
    async fn test_stopping_reply_sets_status() {
        let (session, transcript) =
            spawn_session(vec![PARTIAL], vec![], RenderingAdapter::new()).await;
        assert!(session.send("tell me".to_string()));
        wait_until(|| transcript.lock().nodes().len() == 2).await;

        assert!(session.cancel());
        wait_until(|| {
            transcript
                .lock()
                .status()
                .is_some_and(|status| status.text == "Response stopped")
        })
        .await;
        wait_until(|| !session.is_busy()).await;
        assert_eq!(session.state(), RequestState::Idle);

        session.shutdown().await;
    }

    #[tokio::test]
    async fn test_rerender_uses_resolved_renderer() {
        let renderer = RenderingAdapter::new();
        let history = vec![ChatMessage::user("hi"), ChatMessage::assistant("**bold**")];
        let (session, transcript) = spawn_session(vec![], history, renderer.clone()).await;
        assert!(!transcript.lock().nodes()[1].markup.html.contains("<strong>"));

        renderer.resolve(&MarkdownLoader).await;
        session.command(SessionCommand::Rerender);

        wait_until(|| {
            let transcript = transcript.lock();
            transcript.nodes().len() == 2
                && transcript.nodes()[1].markup.html.contains("<strong>bold</strong>")
        })
        .await;

        session.shutdown().await;
    }

    #[test]
    fn test_outcome_status() {
        let busy = outcome_status(&SendOutcome::Busy).unwrap();
        assert_eq!(busy.kind, StatusKind::Info);
        assert_eq!(busy.text, "Still answering the previous message");

        let stopped = outcome_status(&SendOutcome::Cancelled(None)).unwrap();
        assert_eq!(stopped.text, "Response stopped");

        assert!(outcome_status(&SendOutcome::Completed(ChatMessage::assistant("ok"))).is_none());
        assert!(outcome_status(&SendOutcome::Failed(ChatError::MissingApiKey)).is_none());
    }
}
