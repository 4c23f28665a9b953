use crate::client::ChatClient;
use crate::config::Config;
use crate::identity::Credentials;
use crate::messenger_types::{ChatEvent, Message, MessageStatus, User};
use colored::*;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::timeout;

const PRESENCE_WAIT: Duration = Duration::from_secs(2);

/// Terminal front end over `ChatClient`
pub async fn run(args: Vec<String>) -> anyhow::Result<()> {
    let (config, rest) = Config::from_args(&args)?;

    let Some(command) = rest.first() else {
        print_usage();
        return Ok(());
    };
    if command == "help" {
        print_usage();
        return Ok(());
    }

    let credentials = Credentials::from_env()?;
    let client = ChatClient::login(&config, credentials)?;

    let outcome = match command.as_str() {
        "users" => list_users(&client).await,
        "history" => match rest.get(1) {
            Some(peer) => show_history(&client, peer).await,
            None => usage_hint("history <peer_id>"),
        },
        "send" => {
            if rest.len() < 3 {
                usage_hint("send <peer_id> <message>")
            } else {
                send_message(&client, &rest[1], &rest[2..].join(" ")).await
            }
        }
        "status" => match (rest.get(1), rest.get(2)) {
            (Some(id), Some(status)) => update_status(&client, id, status).await,
            _ => usage_hint("status <message_id> <sent|delivered|read>"),
        },
        "watch" => watch(&client, rest.get(1).map(String::as_str)).await,
        other => {
            eprintln!("{} Unknown command: {}", "✗".red().bold(), other.red());
            print_usage();
            Ok(())
        }
    };

    client.logout().await;
    outcome
}

fn print_usage() {
    println!("{}", "💬 Parley".bright_cyan().bold());
    println!();
    println!("{}", "Usage:".bright_white().bold());
    println!("  {} [flags] <command> [args]", "parley".cyan());
    println!();
    println!("{}", "Commands:".bright_white().bold());
    println!("  {}                        List users and who is online", "users".cyan());
    println!("  {} <peer_id>            Show the conversation with a peer", "history".cyan());
    println!("  {} <peer_id> <message>     Send a message", "send".cyan());
    println!("  {} <message_id> <status> Mark a message delivered or read", "status".cyan());
    println!("  {} [peer_id]              Follow live events", "watch".cyan());
    println!();
    println!("{}", "Flags:".bright_white().bold());
    println!("  --api-url <url>  --realtime-url <url>  --no-reconnect");
    println!("  --max-attempts <n>  --connect-timeout-ms <ms>");
    println!();
    println!("{}", "Environment:".bright_white().bold());
    println!("  PARLEY_TOKEN, PARLEY_USER_ID, PARLEY_USERNAME, PARLEY_API_URL");
}

fn usage_hint(usage: &str) -> anyhow::Result<()> {
    eprintln!("{}", format!("Usage: parley {}", usage).yellow());
    Ok(())
}

async fn connect_best_effort(client: &ChatClient) {
    if let Err(e) = client.wait_until_connected().await {
        eprintln!("{} {}", "⚠".yellow(), e.to_string().yellow());
    }
}

async fn list_users(client: &ChatClient) -> anyhow::Result<()> {
    let mut events = client.subscribe();
    connect_best_effort(client).await;
    if client.channel().is_connected() {
        let _ = timeout(PRESENCE_WAIT, async {
            loop {
                match events.recv().await {
                    Ok(ChatEvent::PresenceUpdated { .. }) | Err(RecvError::Closed) => break,
                    _ => continue,
                }
            }
        })
        .await;
    }

    let users = client.users().await?;
    let active = client.active_users().await;
    if users.is_empty() {
        println!("{}", "No users found".dimmed());
        return Ok(());
    }

    println!("{} ({}):", "Users".bright_white().bold(), users.len());
    println!("{:-<60}", "");
    for user in users {
        let online = active.iter().any(|a| a.user_id == user.id);
        println!("  {}", format_user(&user, online));
    }
    Ok(())
}

fn format_user(user: &User, online: bool) -> String {
    let marker = if online { "●".green() } else { "○".dimmed() };
    let name = if user.username.is_empty() {
        "Anonymous User".to_string()
    } else {
        user.username.clone()
    };
    format!(
        "{} {} {} {}",
        marker,
        name.bright_white(),
        user.id.dimmed(),
        user.email.as_deref().unwrap_or("").dimmed()
    )
}

async fn show_history(client: &ChatClient, peer_id: &str) -> anyhow::Result<()> {
    client.select(peer_id).await?;
    print_conversation(client).await;
    Ok(())
}

async fn print_conversation(client: &ChatClient) {
    let messages = client.messages().await;
    if messages.is_empty() {
        println!("{}", "No messages yet. Start the conversation!".dimmed());
        return;
    }
    for message in &messages {
        println!("{}", format_message(message, &client.identity().id));
    }
}

async fn send_message(client: &ChatClient, peer_id: &str, content: &str) -> anyhow::Result<()> {
    connect_best_effort(client).await;
    client.select(peer_id).await?;

    match client.send_to(Some(peer_id), content).await? {
        Some(dispatched) => {
            println!(
                "{} Message sent! ID: {}",
                "✓".green(),
                dispatched.message.id.cyan()
            );
            if !dispatched.announced {
                println!(
                    "  {}",
                    "Realtime channel unavailable: the peer will see it on next load".yellow()
                );
            }
        }
        None => println!("{}", "Nothing to send".yellow()),
    }
    Ok(())
}

async fn update_status(client: &ChatClient, message_id: &str, status: &str) -> anyhow::Result<()> {
    let status: MessageStatus = status.parse()?;
    client.update_message_status(message_id, status).await?;
    println!("{} {} marked {}", "✓".green(), message_id.cyan(), status);
    Ok(())
}

async fn watch(client: &ChatClient, peer_id: Option<&str>) -> anyhow::Result<()> {
    let mut events = client.subscribe();
    if let Some(peer_id) = peer_id {
        client.select(peer_id).await?;
        print_conversation(client).await;
    }

    println!("{}", "Watching for events, Ctrl+C to stop".dimmed());
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(event) => print_event(&event, &client.identity().id),
                Err(RecvError::Lagged(n)) => {
                    eprintln!("{}", format!("Skipped {} events", n).yellow());
                }
                Err(RecvError::Closed) => break,
            },
        }
    }
    Ok(())
}

fn print_event(event: &ChatEvent, local_id: &str) {
    match event {
        ChatEvent::ConnectionChanged { state } => {
            println!("{} connection {:?}", "⇄".cyan(), state);
        }
        ChatEvent::PresenceUpdated { users } => {
            let names: Vec<&str> = users.iter().map(|u| u.username.as_str()).collect();
            println!("{} online: {}", "●".green(), names.join(", "));
        }
        ChatEvent::ConversationLoaded { peer_id, count } => {
            println!("{} loaded {} messages with {}", "↺".cyan(), count, peer_id);
        }
        ChatEvent::MessageAppended { message } => {
            println!("{}", format_message(message, local_id));
        }
        ChatEvent::MessageReceived { message } => {
            println!(
                "{} new message from {}",
                "✉".bright_yellow(),
                message.sender_id.bright_white()
            );
        }
        ChatEvent::StatusUpdated { message_id, status } => {
            println!("{} {} is now {}", "✓".green(), message_id.dimmed(), status);
        }
        ChatEvent::Error { message, .. } => {
            eprintln!("{} {}", "✗".red().bold(), message.red());
        }
    }
}

fn status_marks(status: MessageStatus) -> &'static str {
    match status {
        MessageStatus::Sent => "✓",
        MessageStatus::Delivered | MessageStatus::Read => "✓✓",
    }
}

fn format_message(message: &Message, local_id: &str) -> String {
    let time = message.created_at.format("%H:%M").to_string();
    if message.sender_id == local_id {
        format!(
            "  {} {} {} {}",
            time.dimmed(),
            "me".bright_cyan(),
            message.content,
            status_marks(message.status).dimmed()
        )
    } else {
        format!(
            "  {} {} {}",
            time.dimmed(),
            message.sender_id.bright_white(),
            message.content
        )
    }
}
