use thiserror::Error;

pub type Result<T> = std::result::Result<T, ChatError>;

/// Failures surfaced by the conversation pipeline.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("API key not set. Please set your OpenAI API key in settings.")]
    MissingApiKey,

    #[error("API error: {status}")]
    Api { status: u16, body: String },

    #[error("network error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("stream error: {0}")]
    Stream(String),

    #[error("response contained no choices")]
    EmptyResponse,

    #[error("unexpected response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("storage error: {0}")]
    Store(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ChatError {
    /// Text shown in the panel status line.
    pub fn status_text(&self) -> String {
        match self {
            ChatError::MissingApiKey => self.to_string(),
            other => format!("Error: {}", other),
        }
    }
}

/// A renderer tier failed; the adapter downgrades instead of surfacing this.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("unknown language: {0}")]
    UnknownLanguage(String),

    #[error("highlighting failed: {0}")]
    Highlight(String),

    #[error("rendering failed: {0}")]
    Render(String),
}
