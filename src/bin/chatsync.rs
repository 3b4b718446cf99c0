//! ChatSync command line client
//!
//! Joins a room and sends every stdin line as a text message, or prints the
//! chat list. `/reconnect` reopens a connection that has given up.

use std::path::PathBuf;

use chatsync_core::{ChatClient, ClientConfig, Identity, Notification};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// ChatSync CLI
#[derive(Parser)]
#[command(name = "chatsync")]
#[command(about = "Realtime chat sync client")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, default_value = "chatsync.toml")]
    config: PathBuf,

    /// User to act as
    #[arg(long)]
    user_id: String,

    /// Bearer token for the user
    #[arg(long, env = "CHATSYNC_TOKEN")]
    token: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the chat list
    Rooms,

    /// Join a room and send stdin lines to it
    Chat {
        /// Room to join
        #[arg(long, required_unless_present = "with", conflicts_with = "with")]
        room: Option<String>,

        /// Chat with this user, starting a room if needed
        #[arg(long)]
        with: Option<String>,
    },
}

/// One turn of the chat loop.
enum Input {
    Line(Option<String>),
    Notification(Notification),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "chatsync_core=info,chatsync=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = ClientConfig::load(&cli.config)?;
    let mut client = ChatClient::from_config(&config)?;

    if !client.connect(Some(Identity::new(&cli.user_id, &cli.token))) {
        anyhow::bail!("Missing user id or token");
    }

    match cli.command {
        Commands::Rooms => list_rooms(&mut client).await?,
        Commands::Chat { room, with } => {
            let room = match (room, with) {
                (Some(room), _) => room,
                (None, Some(user)) => {
                    client.load_chat_list().await?;
                    client.start_chat(&user).await?
                }
                (None, None) => anyhow::bail!("Either --room or --with is required"),
            };
            chat(&mut client, &room).await?
        }
    }

    client.disconnect();
    Ok(())
}

async fn list_rooms(client: &mut ChatClient) -> anyhow::Result<()> {
    client.load_chat_list().await?;

    for row in client.chat_list() {
        let unread = if row.unread > 0 {
            format!(" ({})", row.unread)
        } else {
            String::new()
        };
        println!("{}{}: {}", row.chat_room_id, unread, row.preview);
    }
    Ok(())
}

async fn chat(client: &mut ChatClient, room: &str) -> anyhow::Result<()> {
    client.open_room(room);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let input = tokio::select! {
            line = lines.next_line() => Input::Line(line?),
            notification = client.next_notification() => Input::Notification(notification),
        };

        match input {
            Input::Line(None) => break,
            Input::Line(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                if line.trim() == "/reconnect" {
                    if !client.reconnect() {
                        tracing::warn!("Could not reopen the connection");
                    }
                    continue;
                }
                if let Err(e) = client.send_text(room, &line) {
                    tracing::warn!("Not sent: {}", e);
                }
            }
            Input::Notification(Notification::MessagesChanged { chat_room_id }) if chat_room_id == room => {
                if let Some(last) = client.messages(room).last() {
                    let marker = if last.pending { " …" } else { "" };
                    println!("[{}] {}{}", last.sender_id, last.content, marker);
                }
            }
            Input::Notification(Notification::TypingChanged { chat_room_id }) if chat_room_id == room => {
                let typing = client.typing_users(room);
                if !typing.is_empty() {
                    println!("{} typing...", typing.join(", "));
                }
            }
            Input::Notification(Notification::SendFailed(failure)) => {
                println!("! could not send {:?}: {}", failure.message.content, failure.reason);
            }
            Input::Notification(Notification::ConnectionLost) => {
                tracing::warn!("Connection lost, messages will be sent over HTTP until /reconnect");
            }
            Input::Notification(other) => tracing::debug!("{:?}", other),
        }
    }

    client.close_room(room);
    Ok(())
}
