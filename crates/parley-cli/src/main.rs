//! parley - terminal client for streaming chat sessions

mod commands;
mod config;
mod ui;
mod utils;

use anyhow::Context;
use clap::Parser;
use parley_proto::{ConversationMode, GenerationConfig, HttpBackend, NewSession, Session, StreamMode};
use parley_session::{ReconcilerConfig, SessionEvent, SessionStore, SettingsReconciler};
use std::io::{IsTerminal, Stdout, Write};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};

use commands::CommandResult;

/// parley - chat with a streaming session server
#[derive(Parser, Debug)]
#[command(name = "parley")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server base URL (default: from config, or http://localhost:8000/api)
    #[arg(long)]
    base_url: Option<String>,

    /// Bearer token (default: from config, or PARLEY_TOKEN)
    #[arg(long)]
    token: Option<String>,

    /// Resume a session by ID
    #[arg(short, long)]
    session: Option<String>,

    /// Persona for new sessions
    #[arg(long)]
    persona: Option<String>,

    /// Title for a new session (default: the first message)
    #[arg(long)]
    title: Option<String>,

    /// Conversation mode for new sessions (quick, task)
    #[arg(long)]
    mode: Option<ConversationMode>,

    /// Start in deep mode (stream reasoning steps)
    #[arg(long)]
    deep: bool,

    /// Send a single message, print the reply and exit
    #[arg(short = 'c', long)]
    command: Option<String>,

    /// List sessions and exit
    #[arg(long)]
    sessions: bool,

    /// Initialize config file
    #[arg(long)]
    init_config: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if args.verbose {
        tracing_subscriber::fmt()
            .with_env_filter("parley=debug")
            .with_writer(std::io::stderr)
            .init();
    }

    if args.init_config {
        match config::Config::init() {
            Ok(path) => {
                println!("Config file created at: {}", path.display());
                println!("\nExample config:\n{}", config::example_config());
            }
            Err(e) => {
                eprintln!("Error creating config: {}", e);
                std::process::exit(1);
            }
        }
        return Ok(());
    }

    let cfg = config::Config::load();

    let base_url = args
        .base_url
        .clone()
        .unwrap_or_else(|| cfg.base_url().to_string());
    let mut backend = HttpBackend::new(&base_url)
        .with_context(|| format!("invalid base URL '{}'", base_url))?;
    if let Some(token) = args.token.clone().or_else(|| cfg.token()) {
        backend = backend.with_token(token);
    }
    let store = SessionStore::new(Arc::new(backend));

    if args.sessions {
        let sessions = store.list_sessions().await?;
        println!("{}", commands::format_sessions(&sessions, None));
        return Ok(());
    }

    let reconciler = SettingsReconciler::new(
        store.clone(),
        ReconcilerConfig {
            quiet_period: cfg
                .settings_debounce()
                .unwrap_or(ReconcilerConfig::default().quiet_period),
        },
    );

    let template = NewSession {
        persona_id: args.persona.clone().or_else(|| cfg.persona_id.clone()),
        title: String::new(),
        mode: args.mode.unwrap_or_else(|| cfg.conversation_mode()),
        config: cfg.generation.clone(),
    };
    let mode = if args.deep {
        StreamMode::Deep
    } else {
        StreamMode::Normal
    };

    let mut app = App::new(store, reconciler, template, args.title.clone(), mode);

    if let Some(ref session_id) = args.session {
        app.open(session_id).await?;
    }

    if let Some(command) = args.command {
        app.send(&command).await?;
        app.shutdown().await;
        if let Some(error) = app.store.error() {
            anyhow::bail!(error);
        }
        return Ok(());
    }

    run_interactive(&mut app).await
}

/// Interactive state on top of the session store
struct App {
    store: SessionStore,
    reconciler: SettingsReconciler,
    events: broadcast::Receiver<SessionEvent>,
    printer: ui::Printer<Stdout>,
    /// Template for sessions created from here
    template: NewSession,
    /// Title for the first session created by sending a message
    first_title: Option<String>,
    /// Editable generation settings of the current session
    settings: GenerationConfig,
    mode: StreamMode,
}

impl App {
    fn new(
        store: SessionStore,
        reconciler: SettingsReconciler,
        template: NewSession,
        first_title: Option<String>,
        mode: StreamMode,
    ) -> Self {
        let events = store.subscribe();
        let color = std::io::stdout().is_terminal();
        let settings = template.config.clone();
        Self {
            store,
            reconciler,
            events,
            printer: ui::Printer::new(std::io::stdout(), color),
            template,
            first_title,
            settings,
            mode,
        }
    }

    /// Make `session` the one whose settings are edited
    fn adopt(&mut self, session: &Session) {
        self.settings = session.config.clone();
        self.reconciler.switch_session(session);
    }

    async fn open(&mut self, session_id: &str) -> anyhow::Result<()> {
        let session = self.store.load_session(session_id).await?;
        self.adopt(&session);

        let snapshot = self.store.snapshot();
        println!(
            "Opened {} ({} messages)",
            describe(&session),
            snapshot.messages.len()
        );
        Ok(())
    }

    async fn create(&mut self, title: String) -> anyhow::Result<Session> {
        let request = NewSession {
            title,
            ..self.template.clone()
        };
        let session = self.store.create_session(request).await?;
        self.adopt(&session);
        Ok(session)
    }

    fn current_id(&self) -> anyhow::Result<String> {
        self.store
            .current_session_id()
            .ok_or_else(|| parley_session::Error::NoCurrentSession.into())
    }

    /// Send a message, creating a session first if none is selected
    async fn send(&mut self, text: &str) -> anyhow::Result<()> {
        if self.store.current_session_id().is_none() {
            let title = self
                .first_title
                .take()
                .unwrap_or_else(|| utils::title_from_message(text));
            self.create(title).await?;
        }

        self.drain_events();
        self.store.send(text, self.mode)?;
        self.follow_stream().await;
        Ok(())
    }

    /// Print events until the stream ends. Ctrl-C cancels it.
    async fn follow_stream(&mut self) {
        self.printer.begin();
        loop {
            tokio::select! {
                event = self.events.recv() => match event {
                    Ok(event) => {
                        if let Err(e) = self.printer.handle(&event) {
                            tracing::warn!("Failed to write output: {}", e);
                        }
                        if event.is_terminal() {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(n)) => {
                        tracing::warn!("Skipped {} session events", n);
                    }
                    Err(RecvError::Closed) => break,
                },
                _ = tokio::signal::ctrl_c() => {
                    self.store.cancel_stream();
                }
            }
        }

        // Nothing streamed: show what the placeholder ended up as
        if !self.printer.streamed_answer() {
            if let Some(content) = self.store.snapshot().last_content() {
                if !content.is_empty() {
                    let _ = self.printer.line(content);
                }
            }
        }
    }

    /// Report background events that arrived between streams
    fn drain_events(&mut self) {
        loop {
            match self.events.try_recv() {
                Ok(event @ SessionEvent::ConfigSaveFailed { .. }) => {
                    let _ = self.printer.handle(&event);
                }
                Ok(_) | Err(TryRecvError::Lagged(_)) => continue,
                Err(_) => break,
            }
        }
    }

    /// Apply a slash command. Returns `false` when the loop should exit.
    async fn apply(&mut self, result: CommandResult) -> anyhow::Result<bool> {
        match result {
            CommandResult::Exit => return Ok(false),
            CommandResult::Message(msg) => println!("{}", msg),
            CommandResult::Unknown(cmd) => {
                println!("Unknown command: /{}", cmd);
                println!("Type /help for available commands.");
            }
            CommandResult::SetMode(mode) => {
                self.mode = mode;
                match mode {
                    StreamMode::Deep => println!("Deep mode: reasoning steps are shown."),
                    StreamMode::Normal => println!("Normal mode."),
                }
            }
            CommandResult::Retry => {
                self.drain_events();
                match self.store.retry_last_stream()? {
                    Some(_) => self.follow_stream().await,
                    None => println!("Nothing to retry."),
                }
            }
            CommandResult::ClearError => {
                if !self.store.clear_error() {
                    println!("No error to clear.");
                }
            }
            CommandResult::ListSessions => {
                let sessions = self.store.list_sessions().await?;
                let current = self.store.current_session_id();
                println!("{}", commands::format_sessions(&sessions, current.as_deref()));
            }
            CommandResult::Open(id) => self.open(&id).await?,
            CommandResult::New(title) => {
                let session = self.create(title.unwrap_or_default()).await?;
                println!("Started {}", describe(&session));
            }
            CommandResult::Rename(title) => {
                let id = self.current_id()?;
                let session = self.store.rename_session(&id, &title).await?;
                println!("Renamed to \"{}\"", session.title);
            }
            CommandResult::Archive => {
                let id = self.current_id()?;
                self.store.archive_session(&id).await?;
                println!("Archived.");
            }
            CommandResult::Unarchive => {
                let id = self.current_id()?;
                self.store.unarchive_session(&id).await?;
                println!("Restored from archive.");
            }
            CommandResult::Delete => {
                let id = self.current_id()?;
                // No settings save may target the session while it is deleted
                self.reconciler.detach();
                if let Err(e) = self.store.delete_session(&id).await {
                    // Still current: track it again and keep unsaved edits
                    if let Some(session) = self.store.current_session() {
                        let settings = self.settings.clone();
                        self.adopt(&session);
                        self.settings = settings;
                        self.reconciler.observe(self.settings.clone());
                    }
                    return Err(e.into());
                }
                self.settings = self.template.config.clone();
                println!("Deleted session {}. Your next message starts a new one.", id);
            }
            CommandResult::UpdateSettings(settings) => {
                self.settings = settings;
                if self.store.current_session_id().is_some() {
                    self.reconciler.observe(self.settings.clone());
                } else {
                    // Applied when the next session is created
                    self.template.config = self.settings.clone();
                }
                println!("Settings updated.");
            }
        }
        Ok(true)
    }

    /// Save pending settings and stop any stream
    async fn shutdown(&self) {
        if self.reconciler.is_pending() {
            if let Err(e) = self.reconciler.flush().await {
                eprintln!("Warning: settings not saved: {}", e);
            }
        }
        self.store.cancel_stream();
    }
}

fn describe(session: &Session) -> String {
    if session.title.trim().is_empty() {
        format!("session {}", session.id)
    } else {
        format!("\"{}\" ({})", session.title, session.id)
    }
}

async fn run_interactive(app: &mut App) -> anyhow::Result<()> {
    if std::io::stderr().is_terminal() {
        match app.store.current_session() {
            Some(session) => eprintln!("parley {}", describe(&session)),
            None => eprintln!("parley (new session on first message)"),
        }
        eprintln!("Type /help for commands.");
        eprintln!();
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        app.drain_events();
        print!("> ");
        std::io::stdout().flush()?;

        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        // EOF or Ctrl-C at the prompt
        let Some(line) = line else {
            println!();
            break;
        };

        let input = line.trim();
        if input.is_empty() {
            continue;
        }

        let outcome = match commands::execute_command(input, &app.settings) {
            Some(result) => app.apply(result).await,
            None => app.send(input).await.map(|()| true),
        };
        match outcome {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) => eprintln!("Error: {}", e),
        }
        println!();
    }

    app.shutdown().await;
    Ok(())
}
