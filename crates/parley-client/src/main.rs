//! `parley`: a minimal terminal chat on top of the client SDK.
//!
//! Credentials come from `PARLEY_USERNAME` / `PARLEY_PASSWORD` when no
//! session is stored. Lines typed on stdin are sent to the active channel;
//! `/join <id>`, `/history`, `/who`, `/delete <id>` and `/quit` are commands.

use anyhow::{bail, Context};
use chrono::{FixedOffset, Local, Utc};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;

use parley_client::{init_tracing, ChatClient, ClientConfig, ClientEvent, TimelineEntry};
use parley_shared::time::format_relative;
use parley_shared::{ChannelId, MessageId};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = ClientConfig::from_env();
    tracing::info!(api_base = %config.api_base, "Starting Parley terminal client");
    let client = ChatClient::open(config).context("Failed to open client")?;

    if !client.start().await? {
        let username = std::env::var("PARLEY_USERNAME").context("PARLEY_USERNAME not set")?;
        let password = std::env::var("PARLEY_PASSWORD").context("PARLEY_PASSWORD not set")?;
        client
            .login(&username, &password)
            .await
            .context("Login failed")?;
    }
    println!("Signed in as {}", client.session().display_name());

    let channels = client.channels().fetch_channels().await?;
    if channels.is_empty() {
        bail!("No channels available");
    }
    for channel in &channels {
        println!("  #{} {}", channel.id, channel.name);
    }

    if !client.connect()? {
        bail!("Session is no longer valid");
    }

    let printer = tokio::spawn(print_events(client.clone()));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Err(e) = handle_line(&client, line).await {
            match e.downcast_ref::<Quit>() {
                Some(_) => break,
                None => eprintln!("! {e}"),
            }
        }
    }

    printer.abort();
    client.dispose();
    Ok(())
}

#[derive(Debug, thiserror::Error)]
#[error("quit")]
struct Quit;

async fn handle_line(client: &ChatClient, line: &str) -> anyhow::Result<()> {
    let mut parts = line.splitn(2, ' ');
    match (parts.next(), parts.next()) {
        (Some("/quit"), _) => return Err(Quit.into()),
        (Some("/join"), Some(id)) => {
            let id: i64 = id.trim().parse().context("channel id must be a number")?;
            client.channels().switch_channel(ChannelId(id)).await?;
            let channel = client.channels().current_channel();
            println!("-- now in #{}", channel.map(|c| c.name).unwrap_or_default());
            for entry in client.channels().current_messages() {
                print_entry(&entry);
            }
        }
        (Some("/history"), _) => {
            let Some(channel) = client.channels().current_channel_id() else {
                bail!("no active channel");
            };
            let page = client.channels().load_history(channel, None, None).await?;
            println!("-- {} older messages (more: {})", page.added, page.has_more);
        }
        (Some("/who"), _) => {
            client.chat().fetch_online_users().await?;
            for user in client.chat().online_users() {
                println!("  * {}", user.name());
            }
        }
        (Some("/delete"), Some(id)) => {
            let id: i64 = id.trim().parse().context("message id must be a number")?;
            client.channels().delete_message(MessageId(id)).await?;
        }
        (Some(cmd), _) if cmd.starts_with('/') => bail!("unknown command {cmd}"),
        _ => {
            client.channels().send_message(line, None, None).await?;
        }
    }
    Ok(())
}

async fn print_events(client: ChatClient) {
    let mut rx = client.subscribe();
    loop {
        match rx.recv().await {
            Ok(ClientEvent::MessageAdded { channel_id, message_id }) => {
                if client.channels().current_channel_id() != Some(channel_id) {
                    continue;
                }
                if let Some(entry) = client
                    .channels()
                    .messages(channel_id)
                    .into_iter()
                    .find(|e| e.message_id() == Some(message_id))
                {
                    print_entry(&entry);
                }
            }
            Ok(ClientEvent::MessageFailed { error, .. }) => eprintln!("! message not sent: {error}"),
            Ok(ClientEvent::ConnectionChanged { connected }) => {
                println!("-- {}", if connected { "connected" } else { "disconnected" });
            }
            Ok(ClientEvent::Reconnecting { attempt, delay }) => {
                println!("-- reconnecting (attempt {attempt}, in {} ms)", delay.as_millis());
            }
            Ok(ClientEvent::TypingChanged { names, .. }) if !names.is_empty() => {
                println!("-- {} typing", names.join(", "));
            }
            Ok(ClientEvent::SystemNotice { text }) => println!("-- {text}"),
            Ok(ClientEvent::Error { message }) => eprintln!("! {message}"),
            Ok(ClientEvent::AuthRequired) => {
                eprintln!("! session expired, please sign in again");
                break;
            }
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => tracing::warn!(skipped, "Event printer lagged"),
            Err(RecvError::Closed) => break,
        }
    }
}

fn print_entry(entry: &TimelineEntry) {
    let offset: FixedOffset = *Local::now().offset();
    let when = format_relative(entry.created_on(), Utc::now(), offset);
    let marker = if entry.is_pending() { " (sending)" } else { "" };
    println!("[{when}] {}: {}{marker}", entry.sender_name(), entry.content());
}
