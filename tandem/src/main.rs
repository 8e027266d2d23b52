//! `tandem`: line-oriented terminal client for one conversation.
//!
//! Configuration via CLI flags, environment variables, or config file
//! (`~/.config/tandem/config.toml`).
//!
//! ```bash
//! # Against a local dev server
//! cargo run --bin tandem -- --api-url http://127.0.0.1:8080 \
//!     --ws-url ws://127.0.0.1:8080/ws --user ana --conversation c-1
//! ```
//!
//! Lines typed on stdin are sent as messages. Commands:
//! `/unsend [id]`, `/typing`, `/history`, `/who`, `/quit`.

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tracing_appender::non_blocking::WorkerGuard;

use tandem::config::{CliArgs, ClientConfig};
use tandem::session::{ConversationSession, RemovalReason, SessionEvent};
use tandem::status::visibility::VisibilityEntry;
use tandem::store::http::HttpMessageStore;
use tandem::transport::websocket::WsChannel;
use tandem::typing::typing_label;
use tandem::unsend::UnsendEvent;
use tandem_proto::message::{ConversationId, Message, MessageId, UserId};

type Session = ConversationSession<HttpMessageStore, WsChannel>;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = CliArgs::parse();

    let config = match ClientConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::from(2);
        }
    };

    // Logs go to a file so they never interleave with the conversation.
    let _log_guard = init_logging(&cli.log_level, cli.log_file.as_deref());
    tracing::info!("tandem starting");

    let (Some(user), Some(conversation), Some(api_url)) = (
        config.user.clone(),
        config.conversation.clone(),
        config.api_url.clone(),
    ) else {
        eprintln!("error: --user, --conversation and --api-url are required");
        return ExitCode::from(2);
    };
    let Some(channel_config) = config.to_channel_config() else {
        eprintln!("error: --ws-url is required");
        return ExitCode::from(2);
    };

    let store = match HttpMessageStore::new(
        &api_url,
        Arc::new(config.effective_token()),
        config.request_timeout,
    ) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };

    let (channel, channel_events) = WsChannel::new(channel_config);
    let channel = Arc::new(channel);
    channel.connect();

    let session = Arc::new(ConversationSession::start(
        ConversationId::new(conversation),
        UserId::new(user),
        store,
        Arc::clone(&channel),
        channel_events,
        config.session.clone(),
    ));

    match session.refresh().await {
        Ok(page) => {
            for message in &page {
                print_message(&session, message);
            }
            mark_seen(&session, &page).await;
        }
        Err(e) => eprintln!("! could not load history: {e}"),
    }

    let printer = tokio::spawn(print_events(Arc::clone(&session), session.subscribe()));
    let result = read_input(&session, config.session.page_size).await;

    printer.abort();
    session.close();
    channel.disconnect();
    tracing::info!("tandem exiting");

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Initialize file-based logging.
///
/// Returns a [`WorkerGuard`] that must be held until shutdown to ensure all
/// buffered log entries are flushed.
fn init_logging(level: &str, file_path: Option<&Path>) -> Option<WorkerGuard> {
    let default_path = std::env::temp_dir().join("tandem.log");
    let log_path = file_path.unwrap_or(&default_path);

    let log_dir = log_path.parent()?;
    let file_name = log_path.file_name()?.to_str()?;

    let file_appender = tracing_appender::rolling::never(log_dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(env_filter)
        .with_ansi(false)
        .init();

    Some(guard)
}

/// Reads stdin until EOF or `/quit`.
async fn read_input(session: &Session, page_size: usize) -> std::io::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        let (command, arg) = line.split_once(' ').unwrap_or((line, ""));
        match command {
            "" => {}
            "/quit" => break,
            "/typing" => session.keystroke(),
            "/who" => print_who(session),
            "/history" => {
                let offset = session.messages().len();
                match session.load_history(page_size, offset).await {
                    Ok(page) if page.is_empty() => println!("- no older messages"),
                    Ok(page) => {
                        for message in &page {
                            print_message(session, message);
                        }
                    }
                    Err(e) => println!("! {e}"),
                }
            }
            "/unsend" => {
                let target = if arg.is_empty() {
                    session.newest_retractable()
                } else {
                    Some(MessageId::new(arg.trim()))
                };
                match target {
                    Some(id) if session.unsend(&id).await => {}
                    Some(id) => println!("! {id} can no longer be unsent"),
                    None => println!("! nothing to unsend"),
                }
            }
            _ if command.starts_with('/') => {
                println!("! commands: /unsend [id], /typing, /history, /who, /quit");
            }
            _ => {
                if let Err(e) = session.send_message(line).await {
                    println!("! not sent: {e}");
                }
            }
        }
    }
    Ok(())
}

/// Prints session events as they happen.
async fn print_events(session: Arc<Session>, mut events: broadcast::Receiver<SessionEvent>) {
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::warn!(skipped = n, "printer lagged");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };
        match event {
            SessionEvent::MessageAdded(message) => {
                print_message(&session, &message);
                mark_seen(&session, std::slice::from_ref(&message)).await;
            }
            SessionEvent::MessageRemoved { message_id, reason } => match reason {
                RemovalReason::Unsent => println!("- you unsent {message_id}"),
                RemovalReason::Deleted => println!("- {message_id} was deleted"),
            },
            SessionEvent::StatusChanged(change) => {
                println!("  {} {}", change.message_id, change.status);
            }
            SessionEvent::TypingChanged(users) => {
                let names: Vec<String> = users.iter().map(ToString::to_string).collect();
                let label = typing_label(&names);
                if !label.is_empty() {
                    println!("  {label}");
                }
            }
            SessionEvent::Unsend(UnsendEvent::RolledBack { message_id, reason }) => {
                println!("! unsend of {message_id} failed: {reason}");
            }
            SessionEvent::Presence { user_id, status } => println!("- {user_id} is {status}"),
            SessionEvent::Connection(state) => println!("- connection {state}"),
            SessionEvent::ReconnectGaveUp => println!("! gave up reconnecting"),
            SessionEvent::Error(e) => tracing::debug!(err = %e, "channel error"),
            SessionEvent::LocalTyping(_) | SessionEvent::Unsend(_) => {}
        }
    }
}

fn print_message(session: &Session, message: &Message) {
    let who = if message.is_from(session.current_user()) {
        "you"
    } else {
        message.sender_id.as_str()
    };
    println!(
        "[{}] {who}: {}  ({})",
        message.created_at.format("%H:%M"),
        message.content,
        message.id
    );
}

fn print_who(session: &Session) {
    let typing = session.typing_users();
    let names: Vec<String> = typing.iter().map(ToString::to_string).collect();
    println!("- connection {}", session.connection_state());
    if !names.is_empty() {
        println!("  {}", typing_label(&names));
    }
    for (id, left) in session.retractable() {
        println!("  {id} can be unsent for {:.1}s", left.as_secs_f64());
    }
}

/// Everything printed is on screen, so printed peer messages count as seen.
async fn mark_seen(session: &Session, messages: &[Message]) {
    let entries: Vec<VisibilityEntry> = messages
        .iter()
        .filter(|m| !m.is_from(session.current_user()))
        .map(|m| VisibilityEntry::new(m.id.clone(), 1.0))
        .collect();
    if !entries.is_empty() {
        session.observe_visibility(&entries).await;
    }
}
