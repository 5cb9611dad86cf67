//! ws-hub command-line client.
//!
//! Connects to the resolved backend endpoint, prints every inbound message
//! as one JSON line on stdout, and sends each stdin line as a prediction
//! request. Logs go to stderr.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing_subscriber::EnvFilter;

use ws_hub::config::LogFormat;
use ws_hub::domain::LifecycleEvent;
use ws_hub::{ConnectionHub, ConnectionState, EndpointResolver, HubConfig, TungsteniteFactory, subscriber};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = HubConfig::from_env()?;

    // Initialize tracing
    init_tracing(config.log_format);

    // Resolve the endpoint
    let resolver = EndpointResolver::new(config.location()?)
        .with_policy(config.local_policy())
        .with_fallback(config.fallback_url.clone());
    let base_url = resolver.resolve_url();
    tracing::info!(url = %base_url, "starting ws-hub");

    // Open the shared connection
    let hub = ConnectionHub::with_options(Arc::new(TungsteniteFactory::new()), config.hub_options());
    let mut events = hub.events();
    hub.connect(&base_url, None)?;
    wait_until_connected(&mut events).await?;

    hub.subscribe(
        subscriber(|message| {
            println!("{message}");
            Ok(())
        }),
        config.replay_last,
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line? {
                    Some(line) if line.trim().is_empty() => {}
                    Some(line) => {
                        // Refusals are already logged by the hub.
                        let _ = hub.send_text(&line, &config.additional_context);
                    }
                    None => break,
                }
            }
            event = events.recv() => {
                match event {
                    Ok(LifecycleEvent::Disconnected { .. }) | Err(RecvError::Closed) => return Ok(()),
                    Ok(_) => {}
                    Err(RecvError::Lagged(n)) => tracing::warn!(lagged = n, "lifecycle events lagged"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted");
                break;
            }
        }
    }

    if hub.connection_state() != ConnectionState::Absent {
        hub.close();
        wait_until_disconnected(&mut events).await;
    }
    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

async fn wait_until_connected(
    events: &mut broadcast::Receiver<LifecycleEvent>,
) -> Result<(), Box<dyn std::error::Error>> {
    loop {
        match events.recv().await {
            Ok(LifecycleEvent::Connected { .. }) => return Ok(()),
            Ok(LifecycleEvent::Disconnected { code, reason, .. }) => {
                return Err(format!("connection closed before opening (code {code:?}) {reason}").into());
            }
            Ok(LifecycleEvent::TransportError { .. }) => {}
            Err(RecvError::Lagged(n)) => tracing::warn!(lagged = n, "lifecycle events lagged"),
            Err(RecvError::Closed) => return Err("lifecycle event bus closed".into()),
        }
    }
}

async fn wait_until_disconnected(events: &mut broadcast::Receiver<LifecycleEvent>) {
    loop {
        match events.recv().await {
            Ok(LifecycleEvent::Disconnected { .. }) | Err(RecvError::Closed) => return,
            Ok(_) | Err(RecvError::Lagged(_)) => {}
        }
    }
}
