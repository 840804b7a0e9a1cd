use std::path::Path;
use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use chatty_client::config::ClientConfig;
use chatty_client::conversations::ConversationStore;
use chatty_client::session::{self, SessionEvent};
use chatty_client::transport::WebSocketConnector;
use chatty_crypto::identity::generate_or_load_identity;
use chatty_crypto::storage::{KeyValueStore, SqliteStore};
use chatty_crypto::trust::TrustStore;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    let config = ClientConfig::load()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .init();

    let store: Arc<dyn KeyValueStore> = Arc::new(SqliteStore::open(Path::new(&config.db_path))?);
    let identity = generate_or_load_identity(store.clone(), config.rsa_key_bits).await?;
    let trust = TrustStore::load(store.clone()).await?;
    let conversations = ConversationStore::load(store).await?;

    tracing::info!(
        user_id = %identity.user_id(),
        fingerprint = %identity.fingerprint(),
        relay = %config.relay_url,
        "starting session"
    );

    let connector = Arc::new(WebSocketConnector::new(config.relay_url.clone()));
    let (handle, mut events, task) =
        session::spawn(config.timing(), identity, trust, conversations, connector);

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => log_event(&event),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupt received, shutting down");
                handle.shutdown().await;
                break;
            }
        }
    }

    task.await?;
    Ok(())
}

fn log_event(event: &SessionEvent) {
    match event {
        SessionEvent::ConversationCreated { conversation, peer } => {
            tracing::info!(conversation = %conversation, peer = %peer, "new conversation");
        }
        SessionEvent::MessageReceived { conversation, entry } => {
            tracing::info!(
                conversation = %conversation,
                sender = %entry.sender,
                at = %entry.at,
                "message received"
            );
        }
        SessionEvent::VerificationRequested { peer, fingerprint } => {
            tracing::warn!(peer = %peer, fingerprint = %fingerprint, "verify this safety number with the peer");
        }
        SessionEvent::DeliveryFailed {
            conversation,
            sender,
            reason,
        } => {
            tracing::warn!(conversation = %conversation, sender = %sender, reason = ?reason, "message could not be delivered");
        }
        SessionEvent::SendFailed {
            conversation,
            recipient,
            reason,
        } => {
            tracing::warn!(conversation = %conversation, recipient = %recipient, reason = ?reason, "message could not be sent");
        }
    }
}
