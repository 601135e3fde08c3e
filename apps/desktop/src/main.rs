use std::{path::PathBuf, sync::Arc};

use anyhow::{anyhow, Result};
use clap::Parser;
use client_core::{
    ChatEngine, ChatState, ClientEvent, Draft, HttpChatApi, MediaAttachment, RealtimeConnection,
};
use shared::domain::{MessageId, UserId};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::broadcast::error::RecvError,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
struct Args {
    #[arg(long, default_value = "http://127.0.0.1:8443")]
    server_url: String,
    #[arg(long)]
    username: String,
    #[arg(long)]
    full_name: Option<String>,
}

#[derive(Debug, PartialEq, Eq)]
enum Command {
    List,
    Open(String),
    Close,
    Show,
    Send(String),
    Reply(MessageId, String),
    Attach(PathBuf, Option<String>),
    Edit(MessageId, String),
    Delete(MessageId),
    React(MessageId, String),
    DeleteChat,
    Help,
    Quit,
}

impl Command {
    /// Lines that carry message text count as typing in the open conversation.
    fn composes(&self) -> bool {
        matches!(self, Self::Send(_) | Self::Reply(..) | Self::Attach(..))
    }
}

const HELP: &str = "\
/list                    conversations, unread counts and presence
/open <username>         open a conversation
/close                   close it
/show                    print the open transcript
/reply <id> <text>       reply to a message
/attach <path> [text]    send an image or video
/edit <id> <text>        edit one of your messages
/delete <id>             delete one of your messages for both sides
/react <id> <emoji>      toggle a reaction
/delete-chat             delete the whole open conversation
/quit
anything else is sent as a message";

fn parse_line(line: &str) -> Result<Option<Command>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Ok(Some(Command::Send(line.to_string())));
    };
    let (name, args) = rest.split_once(' ').unwrap_or((rest, ""));
    let args = args.trim();
    let (first, tail) = args.split_once(' ').unwrap_or((args, ""));
    let tail = tail.trim();
    let id = || -> Result<MessageId> {
        if first.is_empty() {
            Err(anyhow!("/{name} needs a message id"))
        } else {
            Ok(MessageId::from(first))
        }
    };
    let required = |value: &str, what: &str| -> Result<String> {
        if value.is_empty() {
            Err(anyhow!("/{name} needs {what}"))
        } else {
            Ok(value.to_string())
        }
    };

    let command = match name {
        "list" => Command::List,
        "open" => Command::Open(required(args, "a username")?),
        "close" => Command::Close,
        "show" => Command::Show,
        "reply" => Command::Reply(id()?, required(tail, "text")?),
        "attach" => Command::Attach(
            PathBuf::from(required(first, "a file path")?),
            Some(tail.to_string()).filter(|text| !text.is_empty()),
        ),
        "edit" => Command::Edit(id()?, required(tail, "text")?),
        "delete" => Command::Delete(id()?),
        "react" => Command::React(id()?, required(tail, "an emoji")?),
        "delete-chat" => Command::DeleteChat,
        "help" => Command::Help,
        "quit" | "exit" => Command::Quit,
        other => return Err(anyhow!("unknown command /{other}, try /help")),
    };
    Ok(Some(command))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();
    let args = Args::parse();

    let (api, me) =
        HttpChatApi::login(args.server_url.as_str(), &args.username, args.full_name.as_deref())
            .await?;
    println!("logged in as {} ({})", me.username, me.id);

    let connection = RealtimeConnection::connect(&args.server_url, &me.id).await?;
    let engine = ChatEngine::new(me.id.clone(), Arc::new(api));
    let _subscription = engine.attach(&connection);
    engine.load_conversations(None).await?;
    print_sidebar(&engine.snapshot().await);

    tokio::spawn(render_events(engine.clone()));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let command = match parse_line(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(err) => {
                println!("! {err}");
                continue;
            }
        };
        if command == Command::Quit {
            break;
        }
        // Failures already reach the user as notices.
        let _ = handle(&engine, command).await;
    }

    engine.close_conversation().await;
    Ok(())
}

async fn handle(engine: &ChatEngine, command: Command) -> Result<()> {
    if command.composes() {
        engine.input_changed().await;
    }
    run(engine, command).await
}

async fn run(engine: &ChatEngine, command: Command) -> Result<()> {
    match command {
        Command::List => {
            engine.load_conversations(None).await?;
            print_sidebar(&engine.snapshot().await);
        }
        Command::Open(username) => {
            let state = engine.snapshot().await;
            let partner = state
                .sidebar
                .entries()
                .iter()
                .find(|entry| entry.partner.username == username)
                .map(|entry| entry.partner.id.clone());
            let Some(partner) = partner else {
                println!("! no conversation with '{username}', try /list");
                return Ok(());
            };
            engine.open_conversation(&partner).await?;
            print_transcript(&engine.snapshot().await);
        }
        Command::Close => engine.close_conversation().await,
        Command::Show => print_transcript(&engine.snapshot().await),
        Command::Send(text) => {
            engine.send(Draft::text(text)).await?;
        }
        Command::Reply(message_id, text) => {
            engine.send(Draft::text(text).replying_to(message_id)).await?;
        }
        Command::Attach(path, text) => {
            let attachment = match MediaAttachment::from_path(&path) {
                Ok(attachment) => attachment,
                Err(err) => {
                    println!("! {err}");
                    return Ok(());
                }
            };
            let draft = Draft {
                text,
                ..Draft::default()
            };
            engine.send(draft.with_attachment(attachment)).await?;
        }
        Command::Edit(message_id, text) => {
            engine.edit(&message_id, &text).await?;
        }
        Command::Delete(message_id) => engine.delete(&message_id).await?,
        Command::React(message_id, emoji) => engine.react(&message_id, &emoji).await?,
        Command::DeleteChat => {
            let Some(partner) = engine.snapshot().await.open_partner else {
                println!("! open a conversation first");
                return Ok(());
            };
            let removed = engine.delete_chat(&partner).await?;
            println!("deleted {removed} messages");
        }
        Command::Help => println!("{HELP}"),
        Command::Quit => {}
    }
    Ok(())
}

async fn render_events(engine: Arc<ChatEngine>) {
    let mut events = engine.subscribe();
    let mut partner_typing = false;
    loop {
        match events.recv().await {
            Ok(ClientEvent::Notice(text)) => println!("! {text}"),
            Ok(ClientEvent::IncomingMessage(message)) => {
                let state = engine.snapshot().await;
                let from = display_name(&state, &message.sender_id);
                println!("[{}] {from}: {}", message.id, message.summary().text);
            }
            Ok(ClientEvent::StateChanged) => {
                let state = engine.snapshot().await;
                if state.partner_typing != partner_typing {
                    partner_typing = state.partner_typing;
                    if let (true, Some(partner)) = (partner_typing, &state.open_partner) {
                        println!("... {} is typing", display_name(&state, partner));
                    }
                }
            }
            Err(RecvError::Lagged(_)) => {}
            Err(RecvError::Closed) => break,
        }
    }
}

fn display_name(state: &ChatState, user_id: &UserId) -> String {
    if user_id == &state.me {
        return "you".to_string();
    }
    state
        .sidebar
        .get(user_id)
        .map(|entry| entry.partner.username.clone())
        .unwrap_or_else(|| user_id.to_string())
}

fn print_sidebar(state: &ChatState) {
    if state.sidebar.entries().is_empty() {
        println!("no other users yet");
    }
    for entry in state.sidebar.entries() {
        let presence = if state.is_online(&entry.partner.id) { "*" } else { " " };
        let unseen = match state.unseen_from(&entry.partner.id) {
            0 => String::new(),
            n => format!(" ({n} new)"),
        };
        let last = entry
            .last_message
            .as_ref()
            .map(|summary| summary.text.as_str())
            .unwrap_or("");
        println!("{presence} {}{unseen}  {last}", entry.partner.username);
    }
}

fn print_transcript(state: &ChatState) {
    let Some(partner) = &state.open_partner else {
        println!("no conversation is open");
        return;
    };
    println!("--- {} ---", display_name(state, partner));
    for entry in state.store.entries() {
        let message = &entry.message;
        let mut flags = Vec::new();
        if message.is_edited {
            flags.push("edited".to_string());
        }
        if message.sender_id == state.me && message.seen {
            flags.push("seen".to_string());
        }
        if entry.is_uploading {
            flags.push("uploading".to_string());
        }
        flags.extend(message.reactions.iter().map(|r| r.emoji.clone()));
        let flags = if flags.is_empty() {
            String::new()
        } else {
            format!(" ({})", flags.join(", "))
        };
        if let Some(reply) = &message.reply_to {
            println!("    > {}", reply.text.as_deref().unwrap_or("media"));
        }
        println!(
            "[{}] {}: {}{flags}",
            message.id,
            display_name(state, &message.sender_id),
            message.summary().text
        );
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use client_core::{ChatApi, ClientError, ClientResult};
    use shared::{
        domain::Message,
        protocol::{
            ChatDeleted, ClientSignal, ConversationList, MessageDeleted, SeenReceipt,
            SendMessageRequest,
        },
    };
    use tokio::sync::{broadcast, mpsc};

    use super::*;

    /// Serves empty history and refuses everything else.
    struct OfflineApi;

    fn offline<T>() -> ClientResult<T> {
        Err(ClientError::Transport("offline".into()))
    }

    #[async_trait]
    impl ChatApi for OfflineApi {
        async fn list_conversations(&self, _: Option<usize>) -> ClientResult<ConversationList> {
            offline()
        }

        async fn list_messages(&self, _: &UserId) -> ClientResult<Vec<Message>> {
            Ok(Vec::new())
        }

        async fn send_message(&self, _: &UserId, _: &SendMessageRequest) -> ClientResult<Message> {
            offline()
        }

        async fn edit_message(&self, _: &MessageId, _: &str) -> ClientResult<Message> {
            offline()
        }

        async fn delete_message(&self, _: &MessageId) -> ClientResult<MessageDeleted> {
            offline()
        }

        async fn delete_chat(&self, _: &UserId) -> ClientResult<ChatDeleted> {
            offline()
        }

        async fn react(&self, _: &MessageId, _: &str) -> ClientResult<Message> {
            offline()
        }

        async fn mark_seen(&self, _: &MessageId) -> ClientResult<SeenReceipt> {
            offline()
        }
    }

    #[tokio::test]
    async fn composed_lines_signal_typing_before_sending() {
        let (events, _) = broadcast::channel(8);
        let (tx, mut signals) = mpsc::unbounded_channel();
        let connection = RealtimeConnection::from_channels(events, tx);
        let engine = ChatEngine::new(UserId::from("alice"), Arc::new(OfflineApi));
        let _subscription = engine.attach(&connection);
        let bob = UserId::from("bob");
        engine.open_conversation(&bob).await.expect("open");

        handle(&engine, Command::Show).await.expect("show");
        assert!(handle(&engine, Command::Send("hi".into())).await.is_err());

        assert_eq!(
            signals.recv().await,
            Some(ClientSignal::Typing {
                receiver_id: bob.clone()
            })
        );
        assert_eq!(
            signals.recv().await,
            Some(ClientSignal::StopTyping { receiver_id: bob })
        );
    }

    #[test]
    fn plain_lines_are_messages() {
        assert_eq!(
            parse_line("  hello there ").unwrap(),
            Some(Command::Send("hello there".into()))
        );
        assert_eq!(parse_line("   ").unwrap(), None);
    }

    #[test]
    fn commands_take_ids_and_text() {
        assert_eq!(
            parse_line("/edit m1 new text").unwrap(),
            Some(Command::Edit(MessageId::from("m1"), "new text".into()))
        );
        assert_eq!(
            parse_line("/react m1 👍").unwrap(),
            Some(Command::React(MessageId::from("m1"), "👍".into()))
        );
        assert_eq!(
            parse_line("/attach cat.png look").unwrap(),
            Some(Command::Attach(PathBuf::from("cat.png"), Some("look".into())))
        );
        assert_eq!(
            parse_line("/attach cat.png").unwrap(),
            Some(Command::Attach(PathBuf::from("cat.png"), None))
        );
        assert_eq!(parse_line("/open bob").unwrap(), Some(Command::Open("bob".into())));
    }

    #[test]
    fn malformed_commands_are_rejected() {
        assert!(parse_line("/edit").is_err());
        assert!(parse_line("/react m1").is_err());
        assert!(parse_line("/open").is_err());
        assert!(parse_line("/frobnicate").is_err());
    }

    #[test]
    fn only_text_carrying_commands_compose() {
        assert!(Command::Send("hi".into()).composes());
        assert!(Command::Attach(PathBuf::from("cat.png"), None).composes());
        assert!(!Command::Edit(MessageId::from("m1"), "fix".into()).composes());
        assert!(!Command::List.composes());
    }
}
