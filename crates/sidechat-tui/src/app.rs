use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use ratatui::layout::Rect;
use ratatui::widgets::ListState;
use sidechat_core::model::list_models;
use sidechat_core::render::CopyButton;
use sidechat_core::settings::{save_settings, SAVED_MESSAGE};
use sidechat_core::transcript::{NodeId, Status};
use sidechat_core::{KeyValueStore, PanelAction, PanelCoordinator, Settings, SharedTranscript, TabId, TranscriptView};

use crate::markup::CopyControl;
use crate::session::{SessionCommand, SessionHandle};

/// Settings form messages disappear after this long.
pub const FORM_STATUS_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    Normal,
    Editing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingsField {
    ApiKey,
    Model,
}

pub struct SettingsForm {
    pub api_key: String,
    pub cursor: usize,
    pub field: SettingsField,
    pub models: ListState,
    pub status: Option<(Status, Instant)>,
}

/// One code block in the transcript: the message node and its position in it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CodeRef {
    pub node: NodeId,
    pub index: usize,
}

pub struct App {
    // Core state
    pub should_quit: bool,
    pub input_mode: InputMode,

    // Message input
    pub input: String,
    pub input_cursor: usize, // cursor position in chars

    // Conversation
    pub transcript: SharedTranscript,
    pub session: SessionHandle,
    pub store: Arc<dyn KeyValueStore>,
    pub settings: Settings,
    pub available_models: Vec<String>,

    // Panel visibility
    pub panels: PanelCoordinator,
    pub tab: TabId,

    // Popups
    pub settings_form: Option<SettingsForm>,
    pub model_picker: Option<ListState>,

    // Code block copy controls
    pub copy_buttons: HashMap<CodeRef, CopyButton>,
    pub selected_code: Option<CodeRef>,
    clipboard: Option<arboard::Clipboard>,

    // Animation state
    pub animation_frame: u8,

    // Layout, for mouse hit-testing
    pub transcript_area: Rect,
}

impl App {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        session: SessionHandle,
        transcript: SharedTranscript,
        settings: Settings,
        tab: TabId,
    ) -> Self {
        Self {
            should_quit: false,
            input_mode: InputMode::Editing,
            input: String::new(),
            input_cursor: 0,
            transcript,
            session,
            store,
            settings,
            available_models: list_models(),
            panels: PanelCoordinator::new(),
            tab,
            settings_form: None,
            model_picker: None,
            copy_buttons: HashMap::new(),
            selected_code: None,
            clipboard: None,
            animation_frame: 0,
            transcript_area: Rect::default(),
        }
    }

    /// Hands the session back for shutdown when the UI exits.
    pub fn into_session(self) -> SessionHandle {
        self.session
    }

    pub fn panel_open(&self) -> bool {
        self.panels.is_open(self.tab)
    }

    /// Panel shortcut: toggles the panel, or routes to settings when no key
    /// is configured.
    pub fn activate_panel(&mut self) {
        match self.panels.activate(self.tab, self.settings.is_configured()) {
            PanelAction::Open => {
                tracing::debug!("panel opened");
                self.input_mode = InputMode::Editing;
            }
            PanelAction::Close => {
                tracing::debug!("panel closed");
                self.input_mode = InputMode::Normal;
            }
            PanelAction::ShowSettings => self.open_settings(),
        }
    }

    pub fn open_settings(&mut self) {
        let mut models = ListState::default();
        let selected = self
            .available_models
            .iter()
            .position(|m| *m == self.settings.model)
            .unwrap_or(0);
        models.select(Some(selected));

        self.settings_form = Some(SettingsForm {
            api_key: self.settings.api_key.clone(),
            cursor: self.settings.api_key.chars().count(),
            field: SettingsField::ApiKey,
            models,
            status: None,
        });
    }

    pub fn close_settings(&mut self) {
        self.settings_form = None;
        if self.settings.is_configured() && !self.panel_open() {
            self.activate_panel();
        }
    }

    pub async fn save_settings(&mut self) {
        let Some(form) = self.settings_form.as_mut() else {
            return;
        };
        let model = form
            .models
            .selected()
            .and_then(|i| self.available_models.get(i))
            .cloned()
            .unwrap_or_else(|| self.settings.model.clone());

        let status = match save_settings(self.store.as_ref(), &form.api_key, &model).await {
            Ok(settings) => {
                tracing::info!(model = %settings.model, "settings saved");
                form.api_key = settings.api_key.clone();
                form.cursor = form.api_key.chars().count();
                self.settings = settings;
                Status::success(SAVED_MESSAGE)
            }
            Err(e) => Status::error(e.to_string()),
        };
        form.status = Some((status, Instant::now()));
    }

    pub fn submit_input(&mut self) {
        let text = self.input.trim().to_string();
        if text.is_empty() {
            return;
        }
        if self.session.send(text) {
            self.input.clear();
            self.input_cursor = 0;
        } else {
            self.transcript
                .set_status(Status::info("Still answering, press Esc to stop the reply"));
        }
    }

    pub fn cancel_reply(&mut self) -> bool {
        self.session.cancel()
    }

    pub fn clear_conversation(&mut self) {
        self.session.command(SessionCommand::Clear);
        self.copy_buttons.clear();
        self.selected_code = None;
    }

    pub fn open_model_picker(&mut self) {
        let mut state = ListState::default();
        let selected = self
            .available_models
            .iter()
            .position(|m| *m == self.settings.model)
            .unwrap_or(0);
        state.select(Some(selected));
        self.model_picker = Some(state);
    }

    pub fn select_model(&mut self) {
        let Some(picker) = self.model_picker.take() else {
            return;
        };
        if let Some(model) = picker.selected().and_then(|i| self.available_models.get(i)) {
            self.settings.model = model.clone();
            self.session.command(SessionCommand::SetModel(model.clone()));
        }
    }

    /// Every code block currently in the transcript, in display order.
    pub fn code_blocks(&self) -> Vec<(CodeRef, String)> {
        let transcript = self.transcript.lock();
        let blocks = transcript
            .nodes()
            .iter()
            .flat_map(|node| {
                node.markup.code_blocks.iter().map(move |block| {
                    (
                        CodeRef {
                            node: node.id,
                            index: block.index,
                        },
                        block.text.clone(),
                    )
                })
            })
            .collect();
        blocks
    }

    pub fn select_code(&mut self, forward: bool) {
        let blocks = self.code_blocks();
        if blocks.is_empty() {
            self.selected_code = None;
            return;
        }

        let current = self
            .selected_code
            .and_then(|selected| blocks.iter().position(|(code, _)| *code == selected));
        let next = match (current, forward) {
            (None, true) => 0,
            (None, false) => blocks.len() - 1,
            (Some(i), true) => (i + 1) % blocks.len(),
            (Some(i), false) => (i + blocks.len() - 1) % blocks.len(),
        };
        self.selected_code = Some(blocks[next].0);
    }

    pub fn copy_selected_code(&mut self) {
        let Some(selected) = self.selected_code else {
            return;
        };
        let Some((_, text)) = self.code_blocks().into_iter().find(|(code, _)| *code == selected) else {
            self.selected_code = None;
            return;
        };

        match self.copy_to_clipboard(&text) {
            Ok(()) => {
                self.copy_buttons
                    .entry(selected)
                    .or_default()
                    .activate(Instant::now());
            }
            Err(e) => {
                tracing::warn!("clipboard unavailable: {}", e);
                self.transcript
                    .set_status(Status::error(format!("Could not copy: {}", e)));
            }
        }
    }

    fn copy_to_clipboard(&mut self, text: &str) -> Result<(), arboard::Error> {
        if self.clipboard.is_none() {
            self.clipboard = Some(arboard::Clipboard::new()?);
        }
        match self.clipboard.as_mut() {
            Some(clipboard) => clipboard.set_text(text.to_string()),
            None => Ok(()),
        }
    }

    pub fn copy_control(&self, node: NodeId, index: usize, now: Instant) -> CopyControl {
        let code = CodeRef { node, index };
        CopyControl {
            label: self
                .copy_buttons
                .get(&code)
                .copied()
                .unwrap_or_default()
                .label(now),
            selected: self.selected_code == Some(code),
        }
    }

    /// Drops copy state for code blocks that are no longer displayed, e.g.
    /// after the conversation was rendered again with new node ids.
    pub fn prune_code_refs(&mut self) {
        let live: HashSet<CodeRef> = self.code_blocks().into_iter().map(|(code, _)| code).collect();
        self.copy_buttons.retain(|code, _| live.contains(code));
        if self.selected_code.is_some_and(|code| !live.contains(&code)) {
            self.selected_code = None;
        }
    }

    pub fn tick(&mut self) {
        self.prune_code_refs();
        if self.transcript.lock().is_typing() {
            self.animation_frame = self.animation_frame.wrapping_add(1);
        }
        if let Some(form) = self.settings_form.as_mut() {
            if form
                .status
                .as_ref()
                .is_some_and(|(_, shown)| shown.elapsed() >= FORM_STATUS_TIMEOUT)
            {
                form.status = None;
            }
        }
    }

    pub fn scroll_up(&mut self, rows: u16) {
        self.transcript.lock().scroll_up(rows);
    }

    pub fn scroll_down(&mut self, rows: u16) {
        self.transcript.lock().scroll_down(rows);
    }

    pub fn scroll_to_bottom(&mut self) {
        self.transcript.scroll_to_bottom();
    }

    pub fn page_rows(&self) -> u16 {
        (self.transcript_area.height / 2).max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use sidechat_core::render::RenderingAdapter;
    use sidechat_core::store::{initialize_storage, MemoryStore};
    use sidechat_core::{ChatRole, ControllerOptions, ConversationController, OpenAIClient};

    async fn configured_app() -> App {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        initialize_storage(store.as_ref()).await.unwrap();
        save_settings(store.as_ref(), "sk-test", "gpt-4o").await.unwrap();
        let settings = Settings::load(store.as_ref()).await.unwrap();

        let transcript = SharedTranscript::new();
        let controller = ConversationController::init(
            store.clone(),
            Arc::new(OpenAIClient::new("http://127.0.0.1:9/v1/chat/completions")),
            Box::new(transcript.clone()),
            RenderingAdapter::new(),
            ControllerOptions::default(),
        )
        .await;
        let session = SessionHandle::spawn(controller, transcript.clone());
        App::new(store, session, transcript, settings, TabId(0))
    }

    fn show_code_reply(app: &App) {
        let markup = RenderingAdapter::new().render("```rust\nfn main() {}\n```");
        app.transcript.clone().append(ChatRole::Assistant, markup);
    }

    #[tokio::test]
    async fn test_submit_while_awaiting_reply_keeps_input() {
        let mut app = configured_app().await;

        app.input = "first".to_string();
        app.submit_input();
        assert!(app.input.is_empty());

        app.input = "second".to_string();
        app.submit_input();
        assert_eq!(app.input, "second");
        assert_eq!(
            app.transcript.lock().status().map(|status| status.text.clone()).as_deref(),
            Some("Still answering, press Esc to stop the reply")
        );

        app.into_session().shutdown().await;
    }

    #[tokio::test]
    async fn test_rerender_drops_stale_copy_state() {
        let mut app = configured_app().await;
        show_code_reply(&app);

        app.select_code(true);
        let selected = app.selected_code.unwrap();
        app.copy_buttons.entry(selected).or_default().activate(Instant::now());

        // a re-render replaces every node with a fresh id
        app.transcript.clone().clear();
        show_code_reply(&app);
        app.tick();

        assert!(app.copy_buttons.is_empty());
        assert!(app.selected_code.is_none());

        app.select_code(true);
        assert_ne!(app.selected_code, Some(selected));
        assert!(app.selected_code.is_some());

        app.into_session().shutdown().await;
    }
}
