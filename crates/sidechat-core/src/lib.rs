pub mod ai;
pub mod config;
pub mod controller;
pub mod error;
pub mod model;
pub mod panel;
pub mod render;
pub mod settings;
pub mod state;
pub mod store;
pub mod transcript;

// Re-export main types for convenience
pub use ai::{CompletionBackend, OpenAIClient};
pub use config::Config;
pub use controller::{ConversationController, ControllerOptions, InFlight, RequestState, SendOutcome};
pub use error::{ChatError, RenderError, Result};
pub use panel::{PanelAction, PanelCoordinator, TabId};
pub use render::{BundledLoader, RenderedMarkup, RenderingAdapter};
pub use settings::Settings;
pub use state::{ChatMessage, ChatRole};
pub use store::{JsonFileStore, KeyValueStore};
pub use transcript::{SharedTranscript, Transcript, TranscriptView};
