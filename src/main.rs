use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use supportchat::api::{ChatBackend, HttpBackend, UploadFile};
use supportchat::core::{ConversationDirectory, Message, Sender};
use supportchat::identity::StaticIdentity;
use supportchat::session::{ChatError, ChatEvent, ChatSessionController, RejectReason, SendOutcome};
use supportchat::uploads::{UploadEvent, UploadStatus, UploadTracker};
use supportchat::Config;

#[derive(Parser)]
#[command(name = "supportchat")]
#[command(
    author,
    version = concat!(env!("CARGO_PKG_VERSION"), env!("SUPPORTCHAT_VERSION_SUFFIX")),
    about = "Support chat client - talk to the help desk from a terminal",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Support server base URL (overrides config)
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// User id to act as (overrides config)
    #[arg(short, long, global = true)]
    user: Option<String>,

    /// Path to a config file (default: platform config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Chat with support; reads messages from stdin when no message is given
    Chat {
        /// Message to send
        message: Option<String>,

        /// Continue an existing conversation
        #[arg(short, long)]
        conversation: Option<String>,
    },

    /// List past conversations, most recent first
    History {
        /// Page to show (1-based)
        #[arg(short, long, default_value = "1")]
        page: u32,
    },

    /// Print the messages of one conversation
    Show {
        /// Conversation id
        id: String,
    },

    /// Upload files to the support team
    Upload {
        /// Files to upload (uploaded concurrently)
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        "supportchat=debug"
    } else {
        "supportchat=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    if let Some(base_url) = cli.base_url {
        config.api.base_url = base_url;
    }
    if let Some(user) = cli.user {
        config.identity.user_id = Some(user);
    }

    let backend: Arc<dyn ChatBackend> =
        Arc::new(HttpBackend::new(&config.api).context("Failed to create HTTP client")?);
    let identity = Arc::new(match &config.identity.user_id {
        Some(id) => StaticIdentity::new(id.clone()),
        None => StaticIdentity::anonymous(),
    });

    match cli.command {
        Commands::Chat {
            message,
            conversation,
        } => run_chat(backend, identity, &config, message, conversation).await,
        Commands::History { page } => {
            let user_id = require_user(&config)?;
            run_history(backend, &user_id, page, config.api.history_page_size).await
        }
        Commands::Show { id } => run_show(backend, &id).await,
        Commands::Upload { files } => run_upload(backend, identity, &config, files).await,
    }
}

fn require_user(config: &Config) -> Result<String> {
    config
        .identity
        .user_id
        .clone()
        .filter(|id| !id.trim().is_empty())
        .context("No user id configured; pass --user or set identity.user_id in config")
}

async fn run_chat(
    backend: Arc<dyn ChatBackend>,
    identity: Arc<StaticIdentity>,
    config: &Config,
    message: Option<String>,
    conversation: Option<String>,
) -> Result<()> {
    require_user(config)?;
    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let controller = ChatSessionController::from_config(backend, identity, config, event_tx);

    if let Some(id) = conversation {
        controller.switch_conversation(Some(id)).await?;
        for message in controller.messages().await {
            print_message(&message);
        }
        // History events were rendered above
        while event_rx.try_recv().is_ok() {}
    }

    if let Some(text) = message {
        send_and_render(&controller, &mut event_rx, text).await?;
        return Ok(());
    }

    println!(
        "{}",
        "Type a message and press Enter. /new starts a new chat, /retry resends, /quit exits."
            .dimmed()
    );
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("{} ", "you>".green().bold());
        std::io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        match line.trim() {
            "" => continue,
            "/quit" | "/exit" => break,
            "/new" => {
                controller.switch_conversation(None).await?;
                while event_rx.try_recv().is_ok() {}
                println!("{}", "Started a new conversation.".dimmed());
            }
            "/retry" => retry_and_render(&controller, &mut event_rx).await?,
            text => send_and_render(&controller, &mut event_rx, text.to_string()).await?,
        }
    }
    Ok(())
}

/// Prints the streamed reply as it grows
#[derive(Default)]
struct ReplyRenderer {
    printed: usize,
    started: bool,
}

impl ReplyRenderer {
    fn handle(&mut self, event: ChatEvent) {
        match event {
            ChatEvent::DraftUpdated(text) => {
                if !self.started {
                    print!("{} ", "support>".cyan().bold());
                    self.started = true;
                }
                if let Some(new_text) = text.get(self.printed..) {
                    print!("{}", new_text);
                    let _ = std::io::stdout().flush();
                }
                self.printed = text.len();
            }
            ChatEvent::SendFailed(error) => {
                if self.started {
                    println!();
                }
                eprintln!("{} {}", "error:".red().bold(), error);
                eprintln!("{}", "Type /retry to send again.".dimmed());
            }
            ChatEvent::ConversationCreated(id) => {
                tracing::debug!(conversation_id = %id, "conversation created");
            }
            _ => {}
        }
    }

    fn finish(&self) {
        if self.started {
            println!();
        }
    }
}

async fn send_and_render(
    controller: &ChatSessionController,
    event_rx: &mut mpsc::UnboundedReceiver<ChatEvent>,
    text: String,
) -> Result<()> {
    let task = {
        let controller = controller.clone();
        tokio::spawn(async move { controller.send(&text).await })
    };
    render_until_done(task, event_rx).await
}

async fn retry_and_render(
    controller: &ChatSessionController,
    event_rx: &mut mpsc::UnboundedReceiver<ChatEvent>,
) -> Result<()> {
    let task = {
        let controller = controller.clone();
        tokio::spawn(async move { controller.retry_last().await })
    };
    render_until_done(task, event_rx).await
}

async fn render_until_done(
    mut task: tokio::task::JoinHandle<Result<SendOutcome, ChatError>>,
    event_rx: &mut mpsc::UnboundedReceiver<ChatEvent>,
) -> Result<()> {
    let mut renderer = ReplyRenderer::default();
    let outcome = loop {
        tokio::select! {
            Some(event) = event_rx.recv() => renderer.handle(event),
            joined = &mut task => break joined?,
        }
    };
    while let Ok(event) = event_rx.try_recv() {
        renderer.handle(event);
    }

    match outcome {
        Ok(SendOutcome::Completed { message, .. }) => {
            if message.is_none() {
                println!("{}", "(empty reply)".dimmed());
            } else {
                renderer.finish();
            }
        }
        Ok(SendOutcome::Rejected(reason)) => {
            let hint = match reason {
                RejectReason::EmptyMessage => "Nothing to send.",
                RejectReason::NoIdentity => "No user id configured.",
                RejectReason::Busy => "Still waiting for the previous reply.",
                RejectReason::NothingToRetry => "Nothing to retry.",
            };
            println!("{}", hint.dimmed());
        }
        Ok(SendOutcome::Abandoned) => renderer.finish(),
        // Already reported through SendFailed
        Err(_) => {}
    }
    Ok(())
}

async fn run_history(
    backend: Arc<dyn ChatBackend>,
    user_id: &str,
    page: u32,
    page_size: u32,
) -> Result<()> {
    let directory = ConversationDirectory::new(backend, page_size);
    directory.refresh(user_id).await?;
    for _ in 1..page.max(1) {
        if directory.load_more(user_id).await? == 0 {
            break;
        }
    }

    let items = directory.by_recency().await;
    if items.is_empty() {
        println!("{}", "No conversations yet.".dimmed());
        return Ok(());
    }
    for item in items {
        let title = item
            .title
            .as_deref()
            .or(item.last_message.as_deref())
            .unwrap_or("(untitled)");
        println!(
            "{}  {}  {}",
            item.id.yellow(),
            item.updated_at.format("%Y-%m-%d %H:%M").to_string().dimmed(),
            title
        );
    }
    if directory.has_more().await {
        println!("{}", "More conversations available; use --page.".dimmed());
    }
    Ok(())
}

async fn run_show(backend: Arc<dyn ChatBackend>, id: &str) -> Result<()> {
    let conversation = backend
        .get_conversation(id)
        .await
        .with_context(|| format!("Failed to load conversation {}", id))?;
    for message in &conversation.messages {
        print_message(message);
    }
    Ok(())
}

fn print_message(message: &Message) {
    let who = match message.sender {
        Sender::User => "you>".green().bold(),
        Sender::Assistant => "support>".cyan().bold(),
    };
    println!("{} {}", who, message.text);
}

async fn run_upload(
    backend: Arc<dyn ChatBackend>,
    identity: Arc<StaticIdentity>,
    config: &Config,
    files: Vec<PathBuf>,
) -> Result<()> {
    require_user(config)?;
    let mut picked = Vec::with_capacity(files.len());
    for path in &files {
        let file = UploadFile::from_path(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        picked.push(file);
    }

    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let tracker = UploadTracker::with_events(backend, identity, &config.uploads, event_tx);
    let job_ids = tracker.start_many(picked);

    let mut names = std::collections::HashMap::new();
    let mut finished = 0;
    while finished < job_ids.len() {
        let Some(event) = event_rx.recv().await else {
            break;
        };
        match event {
            UploadEvent::Started { job_id, file_name } => {
                println!("{} {}", "uploading".dimmed(), file_name);
                names.insert(job_id, file_name);
            }
            UploadEvent::Finished {
                job_id,
                status,
                error,
            } => {
                finished += 1;
                let name = names.get(&job_id).map(String::as_str).unwrap_or("?");
                match status {
                    UploadStatus::Success => println!("{} {}", "done".green(), name),
                    UploadStatus::Aborted => println!("{} {}", "aborted".yellow(), name),
                    _ => println!(
                        "{} {}: {}",
                        "failed".red(),
                        name,
                        error.unwrap_or_default()
                    ),
                }
            }
            UploadEvent::Progress { .. } | UploadEvent::Evicted { .. } => {}
        }
    }
    Ok(())
}
