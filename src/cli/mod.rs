//! Command-line interface parsing and runtime bootstrap.
//!
//! This is glue: it connects the socket, walks the login flow, then wires
//! the protocol event loop to a line-based terminal front-end (stdin in,
//! rendered events out). Everything with real ordering or failure-handling
//! concerns lives in [`crate::core::chat_loop`] and [`crate::proto`].

use std::error::Error;
use std::io::Write as _;
use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, AsyncWrite, BufReader, Lines, Stdin};
use tokio::sync::Mutex;
use tracing_subscriber::EnvFilter;

use crate::api::AiClient;
use crate::auth::{self, AuthError, AuthMode};
use crate::core::chat_loop::{EventLoop, LoopHandle, SharedSender};
use crate::core::config::Config;
use crate::core::constants::MENU;
use crate::core::session::{SessionEvent, SessionStateMachine};
use crate::logging::ChatLogger;
use crate::proto::actions::WireAction;
use crate::proto::framing::FrameSender;
use crate::proto::parser::ChatEvent;
use crate::proto::transport::{self, ChatTransport};
use crate::ui;

#[derive(Parser)]
#[command(name = "causerie")]
#[command(about = "A terminal chat-system client with AI assistance")]
#[command(
    long_about = "Causerie connects to a chat-system server over a simple \
length-prefixed TCP protocol and runs a line-based chat session.\n\n\
Environment Variables:\n\
  OPENAI_API_KEY    API key for the AI features (optional)\n\
  OPENAI_BASE_URL   OpenAI-compatible endpoint (optional)\n\n\
In-chat commands:\n\
  /time             calendar time in the system\n\
  /who              find out who else is there\n\
  /connect <user>   connect to the user and chat\n\
  /search <term>    search your chat logs\n\
  /poem <#>         get sonnet number <#>\n\
  /summary          AI summary of the visible conversation\n\
  /keywords         AI keywords for the visible conversation\n\
  /aipic <prompt>   generate and share an AI image\n\
  /sendimage <path> share a local image file\n\
  /clear            clear this screen (local only)\n\
  /log              pause or resume transcript logging\n\
  /quit             leave the chat system\n\
  @ai <query>       ask the AI assistant"
)]
pub struct Args {
    /// Chat server host
    #[arg(long)]
    pub host: Option<String>,

    /// Chat server port
    #[arg(short = 'P', long)]
    pub port: Option<u16>,

    /// AI model for summaries, keywords, sentiment and queries
    #[arg(short, long)]
    pub model: Option<String>,

    /// Append a transcript of the session to this file
    #[arg(short, long)]
    pub log: Option<String>,

    /// Annotate incoming messages with AI sentiment
    #[arg(long)]
    pub sentiment: bool,
}

pub fn main() -> Result<(), Box<dyn Error>> {
    tokio::runtime::Runtime::new()?.block_on(async_main())
}

async fn async_main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = Config::load().unwrap_or_default();
    let host = args.host.clone().unwrap_or_else(|| config.host().to_string());
    let port = args.port.unwrap_or_else(|| config.port());

    let mut session = SessionStateMachine::new();
    let (mut transport, mut sender) = transport::connect(&host, port).await?;
    session.apply(SessionEvent::Connect)?;
    eprintln!("Connected to {host}:{port}");

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let name = login_flow(&mut stdin, &mut transport, &mut sender).await?;
    session.apply(SessionEvent::AuthenticateOk)?;
    session.set_my_name(&name);

    println!("Welcome to the Chat!\n{MENU}");

    let logger = Arc::new(std::sync::Mutex::new(ChatLogger::new(args.log.clone())?));
    let ai = Arc::new(AiClient::from_config(&config, args.model.clone()));
    let shared_sender: SharedSender<_> = Arc::new(Mutex::new(sender));
    let (event_loop, handle) = EventLoop::new(
        transport,
        Arc::clone(&shared_sender),
        session,
        Arc::clone(&ai),
    );
    let LoopHandle {
        pending,
        mut events,
        directory,
        active: _active,
    } = handle;
    let mut loop_task = tokio::spawn(event_loop.run());
    let mut loop_done = false;

    // The printer is the sole consumer of dispatched events. It also keeps
    // the rolling transcript the AI digest commands summarize.
    let transcript: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let printer = {
        let transcript = Arc::clone(&transcript);
        let ai = Arc::clone(&ai);
        let logger = Arc::clone(&logger);
        let my_name = name.clone();
        let annotate = args.sentiment;
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let Some(mut line) = ui::render_event(&event, &my_name) else {
                    continue;
                };
                if annotate && ai.is_enabled() {
                    if let ChatEvent::Text { sender, body, .. } = &event {
                        if sender != &my_name {
                            line = format!("{line}  {}", ai.sentiment(body).await);
                        }
                    }
                }
                println!("{line}");
                if let Ok(logger) = logger.lock() {
                    if let Err(e) = logger.log_line(&line) {
                        tracing::debug!("transcript log failed: {e}");
                    }
                }
                let mut lines = transcript.lock().await;
                lines.push(line);
                if lines.len() > 500 {
                    lines.remove(0);
                }
            }
        })
    };

    loop {
        tokio::select! {
            _ = &mut loop_task, if !loop_done => {
                loop_done = true;
                break;
            }
            line = stdin.next_line() => {
                let Some(line) = line? else {
                    // stdin closed: leave cleanly.
                    pending.submit("/quit".into()).await;
                    break;
                };
                let input = line.trim().to_string();
                if input.is_empty() {
                    continue;
                }
                if input == "/clear" {
                    ui::clear_screen();
                    continue;
                }
                if input == "/log" {
                    if let Ok(mut logger) = logger.lock() {
                        logger.toggle();
                        println!("Transcript logging: {}", logger.status_string());
                    }
                    continue;
                }
                if input == "/summary" {
                    spawn_digest(Digest::Summary, &ai, &transcript, &shared_sender);
                    continue;
                }
                if input == "/keywords" {
                    spawn_digest(Digest::Keywords, &ai, &transcript, &shared_sender);
                    continue;
                }
                if let Some(partial) = input.strip_prefix("/connect ") {
                    let partial = partial.trim();
                    let dir = directory.lock().await;
                    if !dir.contains(partial) {
                        let matches = dir.suggest(partial, true);
                        if !matches.is_empty() {
                            println!("Users: {}", matches.join(", "));
                        }
                    }
                }
                pending.submit(input).await;
            }
        }
    }

    if !loop_done {
        let _ = loop_task.await;
    }
    drop(pending);
    drop(shared_sender);
    let _ = printer.await;
    Ok(())
}

/// Interactive login/signup over the not-yet-multiplexed connection. Loops
/// until the server accepts a login; signup success drops back to login,
/// mirroring the server-side flow.
async fn login_flow<T, W>(
    stdin: &mut Lines<BufReader<Stdin>>,
    transport: &mut T,
    sender: &mut FrameSender<W>,
) -> Result<String, Box<dyn Error>>
where
    T: ChatTransport,
    W: AsyncWrite + Unpin,
{
    loop {
        let mode = match prompt_line(stdin, "login or signup? [login]: ").await? {
            ref s if s.eq_ignore_ascii_case("signup") => AuthMode::Signup,
            _ => AuthMode::Login,
        };
        let name = prompt_line(stdin, "username: ").await?;
        if name.is_empty() {
            println!("Username and password required");
            continue;
        }
        let password = prompt_line(stdin, "password: ").await?;
        if password.is_empty() {
            println!("Username and password required");
            continue;
        }

        match auth::authenticate(transport, sender, mode, &name, &password).await {
            Ok(()) if mode == AuthMode::Signup => {
                println!("Signup successful! Please login.");
            }
            Ok(()) => return Ok(name),
            Err(AuthError::Rejected(message)) => println!("{message}"),
            Err(e) => return Err(e.into()),
        }
    }
}

async fn prompt_line(
    stdin: &mut Lines<BufReader<Stdin>>,
    prompt: &str,
) -> Result<String, Box<dyn Error>> {
    print!("{prompt}");
    std::io::stdout().flush()?;
    match stdin.next_line().await? {
        Some(line) => Ok(line.trim().to_string()),
        None => Err("stdin closed during login".into()),
    }
}

#[derive(Clone, Copy)]
enum Digest {
    Summary,
    Keywords,
}

/// Compute an AI digest of the visible conversation off-loop and broadcast
/// it as an exchange message; fall back to local display if the send fails.
fn spawn_digest<W>(
    kind: Digest,
    ai: &Arc<AiClient>,
    transcript: &Arc<Mutex<Vec<String>>>,
    sender: &SharedSender<W>,
) where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let ai = Arc::clone(ai);
    let transcript = Arc::clone(transcript);
    let sender = Arc::clone(sender);
    tokio::spawn(async move {
        let history = transcript.lock().await.join("\n");
        if history.trim().is_empty() {
            println!("Nothing to digest yet.");
            return;
        }
        let tail = char_tail(&history, 2000);
        let (label, content) = match kind {
            Digest::Summary => ("[AI Summary]", ai.summarize(tail).await),
            Digest::Keywords => ("[AI Keywords]", ai.keywords(tail).await),
        };
        let message = format!("--- {label} ---\n{content}");
        let payload = WireAction::Exchange {
            from: label.to_string(),
            message: message.clone(),
        }
        .to_payload();
        if sender.lock().await.send(&payload).await.is_err() {
            // Could not broadcast; show it locally instead.
            println!("{message}");
        }
    });
}

/// Last `max_chars` characters of `text`, on a char boundary.
fn char_tail(text: &str, max_chars: usize) -> &str {
    match text.char_indices().rev().nth(max_chars.saturating_sub(1)) {
        Some((idx, _)) => &text[idx..],
        None => text,
    }
}
