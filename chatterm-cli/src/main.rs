mod app;
mod commands;
mod editor;
mod event;
mod input;
mod markdown;
mod message;
mod producer;
mod session;
#[cfg(test)]
mod test_support;
mod theme;
mod ui;

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::Context;
use chatterm_core::chat::{Chat, Message};
use chatterm_core::config::Config;
use chatterm_core::files;
use chatterm_core::generator::{Generator, ReasoningEffort};
use chatterm_core::history::InputHistory;
use chatterm_core::store::{ChatStore, DEFAULT_PAGE_SIZE, Store};
use chatterm_core::summary::SummaryGenerator;
use chatterm_core::tools::ToolRegistry;
use chatterm_core::HttpGenerator;
use clap::{Args, Parser, Subcommand};
use ratatui::DefaultTerminal;
use tokio::sync::mpsc;

use app::{App, KeyOutcome};
use event::AppEvent;
use session::{Session, SessionDeps};

/// Terminal chat client for OpenAI-compatible endpoints.
#[derive(Parser)]
#[command(name = "chatterm", version)]
struct Cli {
    /// Config file (defaults to <config_dir>/chatterm/config.json)
    #[arg(long, global = true, env = "CHATTERM_CONFIG")]
    config: Option<PathBuf>,

    /// API key for the endpoint
    #[arg(long, global = true, env = "CHATTERM_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// OpenAI-compatible base URL
    #[arg(long, global = true, env = "CHATTERM_BASE_URL")]
    base_url: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    chat: ChatArgs,
}

#[derive(Subcommand)]
enum Command {
    /// Start or resume an interactive chat (the default)
    Chat(ChatArgs),
    /// List chats, most recently updated first
    Ls {
        #[arg(long, default_value_t = DEFAULT_PAGE_SIZE)]
        limit: usize,
        /// Only chats carrying this tag
        #[arg(long)]
        tag: Option<String>,
        /// Only favorites
        #[arg(long)]
        favorites: bool,
        #[arg(long)]
        page_token: Option<String>,
    },
    /// Full-text search over titles, messages and tags
    Search {
        query: String,
        #[arg(long, default_value_t = DEFAULT_PAGE_SIZE)]
        limit: usize,
        #[arg(long)]
        page_token: Option<String>,
    },
    /// Print a chat transcript
    Show { id: String },
    /// Delete a chat
    Rm { id: String },
    /// Mark a chat as favorite
    Fav {
        id: String,
        /// Clear the flag instead
        #[arg(long)]
        off: bool,
    },
    /// Add tags to a chat
    Tag {
        id: String,
        #[arg(required = true)]
        tags: Vec<String>,
    },
}

#[derive(Args, Clone, Default)]
struct ChatArgs {
    /// Model name
    #[arg(short, long)]
    model: Option<String>,

    #[arg(long)]
    max_tokens: Option<u32>,

    #[arg(long)]
    temperature: Option<f32>,

    /// Open an existing chat
    #[arg(long, conflicts_with = "continue_latest")]
    id: Option<String>,

    /// Resume the most recently updated chat
    #[arg(short = 'c', long = "continue")]
    continue_latest: bool,

    /// Reasoning effort: low|l, medium|m, high|h; bare flag means medium
    #[arg(
        short = 't',
        long = "think",
        num_args = 0..=1,
        default_missing_value = "",
        value_parser = ReasoningEffort::parse_flag
    )]
    think: Option<ReasoningEffort>,

    /// Let the model run shell commands (each call is confirmed)
    #[arg(long)]
    tools: bool,

    /// Inject a file; a trailing /... walks a directory recursively
    #[arg(short, long = "file")]
    files: Vec<String>,

    /// Only inject files with these extensions
    #[arg(long = "ext")]
    exts: Vec<String>,

    /// System prompt: a role name from the config, or literal text
    #[arg(short, long)]
    role: Option<String>,

    /// Tag the chat
    #[arg(long = "tag")]
    tags: Vec<String>,
}

fn init_logging(config: &Config) -> anyhow::Result<()> {
    let path = config.log_path();
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    }
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("opening {}", path.display()))?;

    use tracing_subscriber::EnvFilter;
    let filter =
        EnvFilter::try_from_env("CHATTERM_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(log_file)
        .with_ansi(false)
        .init();
    Ok(())
}

fn cleanup_terminal() {
    let _ = crossterm::execute!(
        std::io::stdout(),
        crossterm::event::DisableBracketedPaste,
        crossterm::event::PopKeyboardEnhancementFlags
    );
    ratatui::restore();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    if let Some(key) = cli.api_key {
        config.api_key = Some(key);
    }
    if let Some(url) = cli.base_url {
        config.base_url = url;
    }
    init_logging(&config)?;

    let store = Arc::new(
        Store::open(&config.db_path())
            .with_context(|| format!("opening chat store {}", config.db_path().display()))?,
    );
    let mut out = std::io::stdout();
    match cli.command {
        None => run_chat(config, store, cli.chat).await,
        Some(Command::Chat(args)) => run_chat(config, store, args).await,
        Some(Command::Ls {
            limit,
            tag,
            favorites,
            page_token,
        }) => commands::list(store.as_ref(), limit, tag, favorites, page_token, &mut out),
        Some(Command::Search {
            query,
            limit,
            page_token,
        }) => commands::search(store.as_ref(), query, limit, page_token, &mut out),
        Some(Command::Show { id }) => commands::show(store.as_ref(), &id, &mut out),
        Some(Command::Rm { id }) => commands::remove(store.as_ref(), &id, &mut out),
        Some(Command::Fav { id, off }) => commands::favorite(store.as_ref(), &id, !off, &mut out),
        Some(Command::Tag { id, tags }) => commands::tag(store.as_ref(), &id, &tags, &mut out),
    }
}

/// Open the requested chat. Returns it with whether it came from the store.
fn resolve_chat(store: &dyn ChatStore, args: &ChatArgs) -> anyhow::Result<(Chat, bool)> {
    if let Some(id) = &args.id {
        let chat = store
            .get_chat(id)
            .with_context(|| format!("opening chat {id}"))?;
        return Ok((chat, true));
    }
    if args.continue_latest
        && let Some(chat) = store.latest_chat()?
    {
        return Ok((chat, true));
    }
    Ok((Chat::new(), false))
}

/// Role prompt first, then every injected file. Injected paths are recorded on the chat.
fn build_prefix(config: &Config, args: &ChatArgs, chat: &mut Chat) -> Vec<Message> {
    let mut prefix = Vec::new();
    if let Some(role) = &args.role {
        prefix.push(Message::system(config.role_prompt(role)));
    }
    let mut specs = chat.files.clone();
    for spec in &args.files {
        if !specs.contains(spec) {
            specs.push(spec.clone());
        }
    }
    let injection = files::inject(&specs, &args.exts);
    tracing::info!(
        files = injection.messages.len(),
        specs = injection.recorded.len(),
        "injected files"
    );
    chat.add_files(injection.recorded);
    prefix.extend(injection.messages);
    prefix
}

async fn run_chat(mut config: Config, store: Arc<Store>, args: ChatArgs) -> anyhow::Result<()> {
    if let Some(model) = &args.model {
        config.model = model.clone();
    }
    if args.max_tokens.is_some() {
        config.max_tokens = args.max_tokens;
    }
    if args.temperature.is_some() {
        config.temperature = args.temperature;
    }
    if let Some(effort) = args.think {
        config.reasoning_effort = effort;
    }

    let (mut chat, persisted) = resolve_chat(store.as_ref(), &args)?;
    chat.add_tags(args.tags.iter().cloned());
    let prefix = build_prefix(&config, &args, &mut chat);

    let generator: Arc<dyn Generator> = Arc::new(
        HttpGenerator::new(config.base_url.clone(), config.api_key.clone())
            .context("creating HTTP client")?,
    );
    let tools = if args.tools {
        ToolRegistry::builtin()
    } else {
        ToolRegistry::new()
    };
    let deps = SessionDeps {
        generator: generator.clone(),
        store: store.clone(),
        tools: Arc::new(tools),
        summary: Some(SummaryGenerator::new(
            generator,
            config.summary_model.clone(),
        )),
    };
    let history = match InputHistory::load(config.history_path()) {
        Ok(history) => history,
        Err(e) => {
            tracing::warn!(error = %e, "input history unavailable");
            InputHistory::in_memory()
        }
    };
    tracing::info!(chat = %chat.id, persisted, model = %config.model, "starting session");

    // The mailbox exists before anything that posts into it.
    let (tx, rx) = mpsc::unbounded_channel::<AppEvent>();
    let session = Session::new(
        chat,
        persisted,
        prefix,
        config.request_config(),
        deps,
        tx.clone(),
    );
    let mut app = App::new(session, history);

    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        cleanup_terminal();
        default_hook(info);
    }));

    let terminal = ratatui::init();
    crossterm::execute!(std::io::stdout(), crossterm::event::EnableBracketedPaste)?;
    let _ = crossterm::execute!(
        std::io::stdout(),
        crossterm::event::PushKeyboardEnhancementFlags(
            crossterm::event::KeyboardEnhancementFlags::DISAMBIGUATE_ESCAPE_CODES
        )
    );

    let result = run_app(terminal, &mut app, tx, rx).await;
    cleanup_terminal();

    if let Some(task) = app.session.take_title_task() {
        let _ = tokio::time::timeout(Duration::from_secs(5), task).await;
    }
    if app.session.is_persisted() {
        println!("chat {}", app.session.chat().id);
    }
    result
}

async fn run_app(
    mut terminal: DefaultTerminal,
    app: &mut App,
    tx: mpsc::UnboundedSender<AppEvent>,
    mut rx: mpsc::UnboundedReceiver<AppEvent>,
) -> anyhow::Result<()> {
    let stop = Arc::new(AtomicBool::new(false));
    let paused = Arc::new(AtomicBool::new(false));

    // Terminal reader polls with a timeout so it can observe the flags.
    let term_tx = tx.clone();
    let stop_reader = Arc::clone(&stop);
    let paused_reader = Arc::clone(&paused);
    tokio::task::spawn_blocking(move || {
        while !stop_reader.load(Ordering::Relaxed) {
            if paused_reader.load(Ordering::Relaxed) {
                std::thread::sleep(Duration::from_millis(50));
                continue;
            }
            if crossterm::event::poll(Duration::from_millis(50)).unwrap_or(false) {
                match crossterm::event::read() {
                    Ok(ev) => {
                        if term_tx.send(AppEvent::Terminal(ev)).is_err() {
                            break;
                        }
                    }
                    Err(_) => break,
                }
            }
        }
    });

    // Tick drives the spinner and toast expiry.
    let tick_tx = tx.clone();
    let stop_tick = Arc::clone(&stop);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_millis(100));
        loop {
            interval.tick().await;
            if stop_tick.load(Ordering::Relaxed) {
                break;
            }
            if tick_tx.send(AppEvent::Tick).is_err() {
                break;
            }
        }
    });

    let sigterm_tx = tx.clone();
    tokio::spawn(async move {
        use tokio::signal::unix::{SignalKind, signal};
        if let Ok(mut sig) = signal(SignalKind::terminate()) {
            sig.recv().await;
            let _ = sigterm_tx.send(AppEvent::Quit);
        }
    });
    drop(tx);

    let result = loop {
        if app.dirty {
            let size = terminal.size()?;
            app.prepare(size.width, size.height);
            terminal.draw(|frame| ui::draw(frame, app))?;
            app.dirty = false;
        }

        let Some(event) = rx.recv().await else {
            break Ok(());
        };
        match app.handle_event(event) {
            KeyOutcome::Continue => {}
            KeyOutcome::Quit => break Ok(()),
            KeyOutcome::OpenEditor(text) => {
                paused.store(true, Ordering::Relaxed);
                // Let an in-flight poll finish before the editor takes the tty.
                tokio::time::sleep(Duration::from_millis(100)).await;
                if let Err(e) = editor::open(&mut terminal, &text) {
                    tracing::warn!(error = %e, "editor failed");
                    app.show_toast(format!("Editor failed: {e}"), true);
                }
                paused.store(false, Ordering::Relaxed);
                app.dirty = true;
            }
        }
    };

    stop.store(true, Ordering::Relaxed);
    result
}
