//! Tails the debate platform's metrics stream.
//!
//! Logs every status change and received payload until interrupted.
//!
//! ```sh
//! DEBATE_WS_URL=ws://localhost:8000/ws RUST_LOG=info cargo run --example tail --features tracing
//! ```

use debate_ws_client::ws::config::Config;
use debate_ws_client::ws::{ConnectionManager, JsonParser};
use debate_ws_client::{DEFAULT_ENDPOINT, ENDPOINT_VAR};
use futures::StreamExt as _;
use serde_json::Value;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let endpoint = std::env::var(ENDPOINT_VAR).unwrap_or_else(|_| DEFAULT_ENDPOINT.to_owned());
    let connection = ConnectionManager::new(&endpoint, Config::default(), JsonParser::<Value>::new())?;

    let mut status = connection.status_receiver();
    let mut messages = Box::pin(connection.messages());

    loop {
        tokio::select! {
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = *status.borrow_and_update();
                info!(status = %current, "connection");
                if current.is_failed() {
                    warn!("giving up; press Ctrl-C to exit or restart to retry");
                }
            }
            message = messages.next() => {
                match message {
                    Some(Ok(payload)) => info!(%payload, "message"),
                    Some(Err(e)) => warn!(error = %e, "stream error"),
                    None => break,
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                break;
            }
        }
    }

    drop(messages);
    connection.shutdown().await?;

    Ok(())
}
