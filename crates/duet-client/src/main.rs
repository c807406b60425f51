mod command;
mod config;
mod render;
mod seed;

use std::sync::Arc;

use duet_store::{DiskBlobStore, RecordStore, SqliteStore};
use duet_sync::{ChatSession, ConversationContext, Draft, OutgoingFile, SyncConfig, SyncError, SystemClock};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};

use crate::command::Command;
use crate::config::ClientConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "duet=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    // Config
    let config = ClientConfig::from_env()?;
    let sync_config = SyncConfig::from_env()?;

    // Stores
    let sqlite = SqliteStore::open(&config.db_path)?;
    let watcher = sqlite.spawn_change_watcher(config.watch_interval);
    let blobs = DiskBlobStore::new(config.blob_dir.clone(), config.blob_base_url.clone()).await?;
    info!("Record store: {}", config.db_path.display());

    seed::ensure_user(&sqlite, &config.user_id).await?;
    seed::ensure_user(&sqlite, &config.partner_id).await?;
    let conversation_id = seed::resolve_conversation(
        &sqlite,
        &config.user_id,
        &config.partner_id,
        config.conversation_id.as_deref(),
    )
    .await?;

    let store: Arc<dyn RecordStore> = Arc::new(sqlite.clone());
    let context = ConversationContext::new(conversation_id, &config.user_id, &config.partner_id);
    let (session, mut views) = ChatSession::open(
        store,
        Arc::new(blobs),
        Arc::new(SystemClock),
        context,
        sync_config,
    )
    .await?;
    let mut events = session.events();

    println!("{}", command::HELP);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            Some(view) = views.recv() => {
                print!("{}", render::render(&view, &config.user_id, &config.partner_id));
            }
            Ok(event) = events.recv() => debug!("Lifecycle event: {:?}", event),
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if !handle_line(&session, &line).await {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!("Failed to read stdin: {}", e);
                    break;
                }
            },
        }
    }

    session.close().await;
    sqlite.shutdown();
    if let Err(e) = watcher.await {
        warn!("Change watcher ended abnormally: {}", e);
    }
    info!("Bye");
    Ok(())
}

/// Run one prompt line. Returns false when the user asked to quit.
async fn handle_line(session: &ChatSession, line: &str) -> bool {
    let command = match command::parse(line) {
        Ok(Some(command)) => command,
        Ok(None) => return true,
        Err(message) => {
            println!("{}", message);
            return true;
        }
    };

    match command {
        Command::Send(text) => report(session.send(Draft::text(text)).await),
        Command::File { path, caption } => match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "file".into());
                let file = OutgoingFile::new(name, command::guess_mime(&path), bytes);
                report(session.send(Draft::text(caption).with_file(file)).await);
            }
            Err(e) => println!("cannot read {}: {}", path.display(), e),
        },
        Command::Typing(text) => session.on_input(&text),
        Command::DeleteForMe(index) => report(session.delete(index, false).await),
        Command::DeleteForEveryone(index) => report(session.delete(index, true).await),
        Command::MarkSeen => report(session.mark_seen().await),
        Command::Foreground(foreground) => session.presence().set_foreground(foreground),
        Command::Block(blocked) => report(session.set_blocked(blocked).await),
        Command::Help => println!("{}", command::HELP),
        Command::Quit => return false,
    }
    true
}

fn report<T: std::fmt::Debug>(result: Result<T, SyncError>) {
    match result {
        Ok(outcome) => debug!("ok: {:?}", outcome),
        Err(e) => {
            println!("error: {}", e);
            if let Some(restored) = e.restored_draft() {
                let file = restored.draft.file.as_ref().map(|f| f.name.as_str());
                println!(
                    "draft kept: {:?}{}",
                    restored.draft.text,
                    file.map(|f| format!(" + {}", f)).unwrap_or_default()
                );
            }
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
                }
            }
            Err(e) => {
                warn!("Could not install SIGTERM handler: {}", e);
                ctrl_c.await.ok();
                info!("Received Ctrl+C, shutting down...");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
