use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use studysphere_core::{
    Attachments, CameraDevice, Config, Controller, FileBlobStore, GeminiClient, ResponseClient,
};

mod app;
mod handler;
mod logging;
mod tui;
mod ui;

use app::App;
use tui::{EventHandler, TerminalSession};

#[derive(Parser)]
#[command(name = "studysphere")]
#[command(version, about = "StudySphere AI: a study tutor for your terminal")]
struct Cli {
    /// Gemini model to use (overrides the config file)
    #[arg(short, long, global = true)]
    model: Option<String>,

    /// Directory for conversation history and logs
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Ask one question and print the answer
    Ask {
        /// Your question
        question: String,
        /// Image to include (repeatable)
        #[arg(short, long)]
        image: Vec<PathBuf>,
    },
    /// List saved conversations
    History,
    /// List Gemini models, or save NAME as the default model
    Model {
        /// Model to store in the config file
        name: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load().unwrap_or_else(|e| {
        eprintln!("Warning: ignoring unreadable config file: {}", e);
        Config::new()
    });
    if let Some(model) = cli.model {
        config.model = Some(model);
    }
    if let Some(dir) = cli.data_dir {
        config.data_dir = Some(dir);
    }

    let data_dir = config.data_dir()?;
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("Could not create data directory {}", data_dir.display()))?;
    let _log_guard = logging::init(&data_dir)?;

    let blobs = Arc::new(FileBlobStore::new(&data_dir));

    match &cli.command {
        Some(Commands::History) => {
            print_history(&Controller::new(blobs));
            return Ok(());
        }
        Some(Commands::Model { name }) => return choose_model(&config, name.as_deref()),
        _ => {}
    }

    let api_key = config.resolve_api_key()?;
    let gemini = GeminiClient::new(
        &api_key,
        config.api_base(),
        config.model(),
        config.request_timeout(),
    )?;
    tracing::info!(model = %gemini.model(), "Gemini client ready");

    let model_name = gemini.model().to_string();
    let client = ResponseClient::new(Arc::new(gemini));
    let controller = Controller::new(blobs);

    match cli.command {
        Some(Commands::Ask { question, image }) => ask(controller, &client, question, image).await,
        _ => {
            let camera: Arc<dyn CameraDevice> = Arc::new(config.camera());
            run_tui(App::new(controller, client, camera, model_name)).await
        }
    }
}

async fn run_tui(mut app: App) -> Result<()> {
    tui::install_panic_hook();
    let mut session = TerminalSession::enter()?;
    let mut events = EventHandler::new(tui::TICK_RATE);

    while !app.should_quit {
        session.draw(|frame| ui::render(&mut app, frame))?;

        match events.next().await {
            Some(event) => handler::handle_event(&mut app, event).await?,
            None => break,
        }
    }

    tracing::info!("Exiting");
    Ok(())
}

async fn ask(
    mut controller: Controller,
    client: &ResponseClient,
    question: String,
    images: Vec<PathBuf>,
) -> Result<()> {
    let mut attachments = Attachments::new();
    for path in images {
        attachments.begin_encode(path);
    }

    loop {
        if let Some(failure) = attachments.poll().into_iter().next() {
            bail!(failure);
        }
        if !attachments.has_pending() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let images = attachments
        .ready_images()
        .context("Attachments still encoding")?;

    let id = controller
        .send(question, images, client)
        .await
        .map_err(|rejected| anyhow::anyhow!("Could not send: {}", rejected))?;

    let reply = controller
        .store()
        .get(&id)
        .and_then(|conversation| conversation.messages.last())
        .map(|message| message.text.as_str())
        .unwrap_or_default();
    println!("{}", reply);
    Ok(())
}

fn choose_model(config: &Config, name: Option<&str>) -> Result<()> {
    let known = GeminiClient::list_models();

    let Some(name) = name else {
        for model in &known {
            let marker = if model == config.model() { "*" } else { " " };
            println!("{} {}", marker, model);
        }
        return Ok(());
    };

    if !known.iter().any(|model| model == name) {
        eprintln!("Warning: {} is not a known Gemini model; saving it anyway", name);
    }
    Config::save_default_model(name)?;
    tracing::info!(model = %name, "Default model saved");
    println!("Default model set to {}", name);
    Ok(())
}

fn print_history(controller: &Controller) {
    let conversations = controller.store().conversations();
    if conversations.is_empty() {
        println!("No saved conversations.");
        return;
    }
    for conversation in conversations {
        println!(
            "{}  {} ({} messages)",
            conversation.id,
            conversation.title,
            conversation.messages.len()
        );
    }
}
