use std::sync::Arc;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use sidechat_core::model::{display_name, list_models};
use sidechat_core::render::CapabilityLoader;
use sidechat_core::settings::{save_model, save_settings, SAVED_MESSAGE};
use sidechat_core::store::{initialize_storage, load_conversation, save_conversation};
use sidechat_core::{
    BundledLoader, ChatRole, Config, ControllerOptions, ConversationController, JsonFileStore,
    KeyValueStore, OpenAIClient, RenderingAdapter, Settings, SharedTranscript, TabId,
};
use tokio::task::JoinHandle;

mod app;
mod handler;
mod logging;
mod markup;
mod session;
mod tui;
mod ui;

use app::App;
use session::{SessionCommand, SessionHandle};
use tui::{EventHandler, Tui, TICK_RATE};

#[derive(Parser)]
#[command(name = "sidechat")]
#[command(version, about = "Chat with OpenAI models in a terminal side panel")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show or change the API key and model
    Config {
        /// OpenAI API key
        #[arg(long)]
        api_key: Option<String>,
        /// Model to use for new replies
        #[arg(short, long)]
        model: Option<String>,
    },
    /// Print the saved conversation
    History,
    /// Delete the saved conversation
    Clear,
    /// List the models that can be selected
    Models,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load()?;
    let _log_guard = logging::init(&Config::config_dir()?)?;

    let storage_path = config.resolve_storage_path()?;
    tracing::debug!(path = %storage_path.display(), "using storage file");
    let store: Arc<dyn KeyValueStore> = Arc::new(JsonFileStore::new(storage_path));
    initialize_storage(store.as_ref()).await?;

    match cli.command {
        None => run_panel(config, store).await,
        Some(Commands::Config { api_key, model }) => configure(store, api_key, model).await,
        Some(Commands::History) => print_history(store).await,
        Some(Commands::Clear) => {
            save_conversation(store.as_ref(), &[]).await?;
            println!("Conversation cleared");
            Ok(())
        }
        Some(Commands::Models) => print_models(store).await,
    }
}

async fn run_panel(config: Config, store: Arc<dyn KeyValueStore>) -> Result<()> {
    let settings = Settings::load(store.as_ref()).await?;
    let transcript = SharedTranscript::new();
    let renderer = RenderingAdapter::new();

    let controller = ConversationController::init(
        store.clone(),
        Arc::new(OpenAIClient::new(&config.endpoint)),
        Box::new(transcript.clone()),
        renderer.clone(),
        ControllerOptions::from(&config),
    )
    .await;
    let session = SessionHandle::spawn(controller, transcript.clone());

    // Messages render with the fallback formatter until the bundled
    // markdown renderer and grammars have loaded.
    let loader: Arc<dyn CapabilityLoader> = Arc::new(BundledLoader);
    let resolving = renderer.spawn_resolve(loader);

    let mut app = App::new(store, session, transcript, settings, TabId(0));
    app.activate_panel();

    tui::install_panic_hook();
    let mut terminal = tui::init()?;
    let mut events = EventHandler::new(TICK_RATE);

    let result = run_loop(&mut terminal, &mut app, &mut events, Some(resolving)).await;

    tui::restore()?;
    app.into_session().shutdown().await;
    result
}

async fn run_loop(
    terminal: &mut Tui,
    app: &mut App,
    events: &mut EventHandler,
    mut resolving: Option<JoinHandle<()>>,
) -> Result<()> {
    while !app.should_quit {
        if resolving.as_ref().is_some_and(|task| task.is_finished()) {
            resolving = None;
            app.session.command(SessionCommand::Rerender);
        }

        terminal.draw(|frame| ui::render(app, frame))?;

        match events.next().await {
            Some(event) => handler::handle_event(app, event).await?,
            None => break,
        }
    }
    Ok(())
}

async fn configure(
    store: Arc<dyn KeyValueStore>,
    api_key: Option<String>,
    model: Option<String>,
) -> Result<()> {
    let current = Settings::load(store.as_ref()).await?;

    if let Some(model) = model.as_deref() {
        if !list_models().iter().any(|m| m == model) {
            eprintln!("Note: {} is not in the model list, saving it anyway", model);
        }
    }

    match (api_key, model) {
        (Some(api_key), model) => {
            let model = model.unwrap_or(current.model);
            match save_settings(store.as_ref(), &api_key, &model).await {
                Ok(_) => println!("{}", SAVED_MESSAGE),
                Err(e) => bail!("{}", e),
            }
        }
        (None, Some(model)) => {
            save_model(store.as_ref(), &model).await?;
            println!("{}", SAVED_MESSAGE);
        }
        (None, None) => {
            let key = if current.is_configured() {
                current.masked_key()
            } else {
                "(not set)".to_string()
            };
            println!("API key: {}", key);
            println!("Model:   {}", display_name(&current.model));
        }
    }
    Ok(())
}

async fn print_history(store: Arc<dyn KeyValueStore>) -> Result<()> {
    let messages = load_conversation(store.as_ref()).await?;
    if messages.is_empty() {
        println!("No saved conversation");
        return Ok(());
    }

    for message in messages {
        let speaker = match message.role {
            ChatRole::User => "You",
            ChatRole::Assistant => "Assistant",
        };
        println!("{}:\n{}\n", speaker, message.content);
    }
    Ok(())
}

async fn print_models(store: Arc<dyn KeyValueStore>) -> Result<()> {
    let current = Settings::load(store.as_ref()).await?;
    for model in list_models() {
        let marker = if model == current.model { "*" } else { " " };
        println!("{} {}", marker, display_name(&model));
    }
    Ok(())
}
