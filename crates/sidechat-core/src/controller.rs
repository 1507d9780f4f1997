//! Conversation controller: owns the message list, drives one completion
//! request at a time and keeps the transcript and the store in step.

use std::sync::{Arc, Mutex};

use futures_util::StreamExt;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::ai::{
    parse_completion, parse_delta, ChunkStream, CompletionBackend, CompletionOptions,
    CompletionRequest, CompletionResponse, SseLine, SseLineDecoder,
};
use crate::config::Config;
use crate::error::{ChatError, Result};
use crate::render::RenderingAdapter;
use crate::settings::{self, Settings};
use crate::state::{ChatMessage, ChatRole};
use crate::store::{self, KeyValueStore};
use crate::transcript::{NodeId, Status, TranscriptView};

/// Lifecycle of the current completion request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Idle,
    Requesting,
    Streaming,
    Finalizing,
    Errored,
}

#[derive(Debug)]
pub enum SendOutcome {
    /// Blank input; nothing happened.
    Ignored,
    /// Another request is still outstanding.
    Busy,
    Completed(ChatMessage),
    /// Stopped before the stream finished; carries the partial reply if any.
    Cancelled(Option<ChatMessage>),
    Failed(ChatError),
}

/// Cancellation handle of the request in flight. Clones are handed to the
/// front end so a stop key can end a stream while the controller is busy.
#[derive(Debug, Clone, Default)]
pub struct InFlight(Arc<Mutex<Option<CancellationToken>>>);

impl InFlight {
    fn slot(&self) -> std::sync::MutexGuard<'_, Option<CancellationToken>> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Claims the slot, or returns `None` when a request is already running.
    fn begin(&self, session: &CancellationToken) -> Option<CancellationToken> {
        let mut slot = self.slot();
        if slot.is_some() {
            return None;
        }
        let token = session.child_token();
        *slot = Some(token.clone());
        Some(token)
    }

    fn finish(&self) {
        *self.slot() = None;
    }

    pub fn is_busy(&self) -> bool {
        self.slot().is_some()
    }

    /// Returns whether there was a request to cancel.
    pub fn cancel(&self) -> bool {
        match self.slot().as_ref() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerOptions {
    pub completion: CompletionOptions,
    pub scroll_threshold: u16,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            completion: CompletionOptions::default(),
            scroll_threshold: 2,
        }
    }
}

impl From<&Config> for ControllerOptions {
    fn from(config: &Config) -> Self {
        Self {
            completion: CompletionOptions::from(config),
            scroll_threshold: config.scroll_threshold,
        }
    }
}

/// Text received so far for the in-flight reply and the node showing it.
#[derive(Default)]
struct StreamAccumulator {
    buffer: String,
    node: Option<NodeId>,
}

pub struct ConversationController {
    messages: Vec<ChatMessage>,
    store: Arc<dyn KeyValueStore>,
    backend: Arc<dyn CompletionBackend>,
    view: Box<dyn TranscriptView>,
    renderer: RenderingAdapter,
    options: ControllerOptions,
    state: watch::Sender<RequestState>,
    in_flight: InFlight,
    session: CancellationToken,
}

impl ConversationController {
    /// Loads the saved conversation and renders it into `view`.
    pub async fn init(
        store: Arc<dyn KeyValueStore>,
        backend: Arc<dyn CompletionBackend>,
        view: Box<dyn TranscriptView>,
        renderer: RenderingAdapter,
        options: ControllerOptions,
    ) -> Self {
        let messages = match store::load_conversation(store.as_ref()).await {
            Ok(messages) => messages,
            Err(e) => {
                tracing::warn!("could not load saved conversation, starting empty: {}", e);
                Vec::new()
            }
        };
        tracing::debug!(messages = messages.len(), "conversation loaded");

        let (state, _) = watch::channel(RequestState::Idle);
        let mut controller = Self {
            messages,
            store,
            backend,
            view,
            renderer,
            options,
            state,
            in_flight: InFlight::default(),
            session: CancellationToken::new(),
        };
        controller.display_conversation();
        controller
    }

    /// Ends the session; a request still streaming is cancelled.
    pub fn teardown(self) {
        self.session.cancel();
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn state(&self) -> RequestState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<RequestState> {
        self.state.subscribe()
    }

    pub fn in_flight(&self) -> InFlight {
        self.in_flight.clone()
    }

    /// Token every request is derived from; cancelling it ends the session's
    /// current and future requests.
    pub fn session_token(&self) -> CancellationToken {
        self.session.clone()
    }

    /// Re-renders every message, e.g. after the markdown tier became available.
    pub fn display_conversation(&mut self) {
        self.view.clear();
        for message in &self.messages {
            let markup = self.renderer.render(&message.content);
            self.view.append(message.role, markup);
        }
        self.view.scroll_to_bottom();
    }

    pub async fn send_message(&mut self, text: &str) -> SendOutcome {
        let text = text.trim();
        if text.is_empty() {
            return SendOutcome::Ignored;
        }
        if self.in_flight.is_busy() {
            tracing::debug!("send rejected, a response is still in flight");
            return SendOutcome::Busy;
        }

        self.view.clear_status();
        let message = ChatMessage::user(text);
        self.display_message(&message);
        self.messages.push(message);
        self.persist().await;

        self.view.show_typing();
        self.request_completion().await
    }

    /// Requests a reply to the current conversation.
    pub async fn request_completion(&mut self) -> SendOutcome {
        let Some(token) = self.in_flight.begin(&self.session) else {
            return SendOutcome::Busy;
        };

        let result = self.run_request(&token).await;
        self.in_flight.finish();

        match result {
            Ok(outcome) => {
                self.set_state(RequestState::Idle);
                outcome
            }
            Err(err) => {
                tracing::error!("completion request failed: {}", err);
                self.view.hide_typing();
                self.view.set_status(Status::error(err.status_text()));
                self.set_state(RequestState::Errored);
                SendOutcome::Failed(err)
            }
        }
    }

    pub async fn clear_conversation(&mut self) {
        self.messages.clear();
        self.view.clear();
        self.persist().await;
    }

    pub async fn set_model(&mut self, model: &str) -> Result<()> {
        settings::save_model(self.store.as_ref(), model).await
    }

    async fn run_request(&mut self, token: &CancellationToken) -> Result<SendOutcome> {
        self.set_state(RequestState::Requesting);

        let settings = Settings::load(self.store.as_ref()).await?;
        if !settings.is_configured() {
            return Err(ChatError::MissingApiKey);
        }

        let request = CompletionRequest::new(&settings.model, &self.messages, &self.options.completion);
        let backend = Arc::clone(&self.backend);

        let response = tokio::select! {
            response = backend.complete(&request, &settings.api_key) => response?,
            _ = token.cancelled() => {
                tracing::debug!("request cancelled before the response arrived");
                self.view.hide_typing();
                return Ok(SendOutcome::Cancelled(None));
            }
        };

        match response {
            CompletionResponse::Json(body) => {
                let content = parse_completion(&body)?;
                self.set_state(RequestState::Finalizing);
                self.view.hide_typing();

                let message = ChatMessage::assistant(content);
                self.display_message(&message);
                self.messages.push(message.clone());
                self.persist().await;
                Ok(SendOutcome::Completed(message))
            }
            CompletionResponse::Stream(chunks) => self.consume_stream(chunks, token).await,
        }
    }

    async fn consume_stream(
        &mut self,
        mut chunks: ChunkStream,
        token: &CancellationToken,
    ) -> Result<SendOutcome> {
        self.set_state(RequestState::Streaming);

        let mut accumulator = StreamAccumulator::default();
        let mut decoder = SseLineDecoder::new();

        loop {
            let next = tokio::select! {
                chunk = chunks.next() => chunk,
                _ = token.cancelled() => {
                    tracing::debug!(received = accumulator.buffer.len(), "stream cancelled");
                    return Ok(self.finalize(accumulator, true).await);
                }
            };

            match next {
                Some(Ok(bytes)) => {
                    for line in decoder.feed(&bytes) {
                        if self.apply_line(line, &mut accumulator) {
                            return Ok(self.finalize(accumulator, false).await);
                        }
                    }
                }
                Some(Err(e)) => return Err(e),
                None => {
                    if let Some(line) = decoder.flush() {
                        self.apply_line(line, &mut accumulator);
                    }
                    return Ok(self.finalize(accumulator, false).await);
                }
            }
        }
    }

    /// Returns true once the termination sentinel is seen.
    fn apply_line(&mut self, line: SseLine, accumulator: &mut StreamAccumulator) -> bool {
        match line {
            SseLine::Done => true,
            SseLine::Data(payload) => {
                match parse_delta(&payload) {
                    Ok(Some(fragment)) => self.append_fragment(accumulator, &fragment),
                    Ok(None) => {}
                    Err(e) => tracing::warn!(error = %e, "skipping malformed stream fragment"),
                }
                false
            }
        }
    }

    fn append_fragment(&mut self, accumulator: &mut StreamAccumulator, fragment: &str) {
        accumulator.buffer.push_str(fragment);

        let follow = self.view.distance_from_bottom() < self.options.scroll_threshold;
        // Partial markdown can't be patched, so the whole reply is rendered again.
        let markup = self.renderer.render(&accumulator.buffer);

        match accumulator.node {
            Some(node) => self.view.update(node, markup),
            None => {
                self.view.hide_typing();
                accumulator.node = Some(self.view.append(ChatRole::Assistant, markup));
            }
        }

        if follow {
            self.view.scroll_to_bottom();
        }
    }

    async fn finalize(&mut self, accumulator: StreamAccumulator, cancelled: bool) -> SendOutcome {
        self.set_state(RequestState::Finalizing);
        self.view.hide_typing();

        if cancelled && accumulator.buffer.is_empty() {
            return SendOutcome::Cancelled(None);
        }

        let message = ChatMessage::assistant(accumulator.buffer);
        self.messages.push(message.clone());
        self.persist().await;

        if cancelled {
            SendOutcome::Cancelled(Some(message))
        } else {
            SendOutcome::Completed(message)
        }
    }

    fn display_message(&mut self, message: &ChatMessage) {
        let markup = self.renderer.render(&message.content);
        self.view.append(message.role, markup);
        self.view.scroll_to_bottom();
    }

    async fn persist(&mut self) {
        if let Err(e) = store::save_conversation(self.store.as_ref(), &self.messages).await {
            tracing::warn!("failed to persist conversation: {}", e);
        }
    }

    fn set_state(&self, state: RequestState) {
        self.state.send_replace(state);
    }
}
