use anyhow::{Context, Result};
use chat_pipeline::client::{ChatClient, ChatRequest, StaticTokenProvider, StreamingCallback};
use chat_pipeline::history::{
    self, Conversation, ConversationStore, FileConversationStore, StoredMessage,
};
use chat_pipeline::types::{FramePayload, Role};
use chat_pipeline::{logging, reducer};
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::io::Write;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "chat-pipeline")]
#[command(about = "Streaming client for the assistant backend")]
struct Cli {
    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Send a message and stream the reply
    Send {
        message: String,
        /// Continue an existing conversation
        #[arg(short, long)]
        conversation: Option<String>,
        /// Backend base URL
        #[arg(long, env = "CHAT_BASE_URL", default_value = "http://localhost:8080")]
        url: String,
        /// Bearer token for the backend
        #[arg(long, env = "CHAT_TOKEN", hide_env_values = true)]
        token: String,
    },
    /// List stored conversations
    List,
    /// Show a stored conversation, replayed through extraction
    Show { id: String },
    /// Rename a stored conversation
    Rename { id: String, title: String },
    /// Delete a stored conversation
    Delete { id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::setup_logging(cli.verbose);

    match cli.command {
        Command::Send {
            message,
            conversation,
            url,
            token,
        } => send(message, conversation, url, token).await,
        Command::List => list(),
        Command::Show { id } => show(&id),
        Command::Rename { id, title } => {
            let mut store = FileConversationStore::new();
            if store.rename(&id, &title)? {
                println!("Renamed {id}");
            } else {
                println!("No conversation {id}");
            }
            Ok(())
        }
        Command::Delete { id } => {
            let mut store = FileConversationStore::new();
            if store.delete(&id)? {
                println!("Deleted {id}");
            } else {
                println!("No conversation {id}");
            }
            Ok(())
        }
    }
}

async fn send(
    message: String,
    conversation: Option<String>,
    url: String,
    token: String,
) -> Result<()> {
    let client = ChatClient::new(url, Arc::new(StaticTokenProvider::new(token)));
    let request = ChatRequest {
        message: message.clone(),
        conversation_id: conversation.clone(),
    };

    // Print chunk text as it arrives.
    let callback: StreamingCallback = Box::new(|_state, frame| {
        if matches!(frame.event.as_str(), "chunk" | "token") {
            if let Some(text) = reducer::chunk_text(&frame.payload) {
                print!("{text}");
                let _ = std::io::stdout().flush();
            }
        } else if frame.event == "tool_call" {
            if let FramePayload::Json(v) = &frame.payload {
                if let Some(name) = v.get("name").or_else(|| v.get("tool")) {
                    eprintln!("[tool: {name}]");
                }
            }
        }
        Ok(())
    });

    let state = client.send_message(&request, Some(&callback)).await?;
    println!();

    let reply = reducer::finalize(&state, "live");
    for media in &reply.media {
        println!("  {:?}: {} -> {}", media.kind, media.title, media.display_url);
    }
    for doc in &reply.documents {
        println!("  [{}] {} -> {}", doc.kind, doc.title, doc.source_link);
    }

    // Persist the turn so `show` replays it identically later.
    let conversation_id = state
        .conversation_id
        .clone()
        .or(conversation)
        .unwrap_or_else(history::generate_conversation_id);
    let mut store = FileConversationStore::new();
    let now = Utc::now();
    let mut stored = store.get(&conversation_id)?.unwrap_or(Conversation {
        id: conversation_id.clone(),
        title: message.chars().take(48).collect(),
        created_at: now,
        updated_at: now,
        messages: Vec::new(),
    });
    stored.messages.push(StoredMessage {
        role: Role::User,
        content: message,
        tool_results: Vec::new(),
        attachments: Vec::new(),
        timestamp: now,
    });
    stored.messages.push(StoredMessage {
        role: Role::Assistant,
        content: reducer::display_text(&state),
        tool_results: state.tool_results.clone(),
        attachments: Vec::new(),
        timestamp: Utc::now(),
    });
    stored.updated_at = Utc::now();
    store.save(&stored).context("persisting conversation")?;
    println!("conversation: {conversation_id}");
    Ok(())
}

fn list() -> Result<()> {
    let store = FileConversationStore::new();
    for summary in store.list()? {
        println!(
            "{}  {}  ({} messages, updated {})",
            summary.id,
            summary.title,
            summary.message_count,
            summary.updated_at.format("%Y-%m-%d %H:%M")
        );
    }
    Ok(())
}

fn show(id: &str) -> Result<()> {
    let store = FileConversationStore::new();
    let Some(conversation) = store.get(id)? else {
        println!("No conversation {id}");
        return Ok(());
    };
    for message in history::hydrate(&conversation) {
        let who = match message.role {
            Role::User => "you",
            Role::Assistant => "assistant",
        };
        println!("[{who}] {}", message.raw_content);
        for media in &message.media {
            println!("  {:?}: {} -> {}", media.kind, media.title, media.display_url);
        }
        for doc in &message.documents {
            println!("  [{}] {} -> {}", doc.kind, doc.title, doc.source_link);
        }
    }
    Ok(())
}
