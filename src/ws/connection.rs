//! WebSocket client transport built on `tokio-tungstenite`.
//!
//! [`TungsteniteFactory::open`] spawns one task per connection. The task
//! performs the handshake, then runs the read/write loop: inbound frames
//! are forwarded to the hub's [`EventSink`], outbound frames queued by
//! [`Transport::send_text`] are written to the socket.
//!
//! `wss://` endpoints go through rustls with the webpki root set. The ring
//! crypto provider is installed as the process default on first use.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Once};
use std::time::Duration;

use futures_util::{SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use super::transport::{EventSink, ReadyState, Transport, TransportEvent, TransportFactory};
use crate::error::HubError;

/// Close code reported when the connection ends without a close frame.
const ABNORMAL_CLOSURE: u16 = 1006;

/// Close code sent when the client closes on purpose.
const NORMAL_CLOSURE: u16 = 1000;

/// How long the peer gets to finish the closing handshake.
const CLOSE_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(2);

static CRYPTO_PROVIDER: Once = Once::new();

/// Installs ring as the rustls provider unless the process already chose one.
fn install_crypto_provider() {
    CRYPTO_PROVIDER.call_once(|| {
        if rustls::crypto::ring::default_provider()
            .install_default()
            .is_err()
        {
            tracing::debug!("rustls crypto provider already installed");
        }
    });
}

/// Opens tungstenite-backed transports on the current tokio runtime.
#[derive(Debug, Clone, Copy, Default)]
pub struct TungsteniteFactory;

impl TungsteniteFactory {
    /// Creates the factory.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl TransportFactory for TungsteniteFactory {
    fn open(&self, url: &str, sink: EventSink) -> Result<Arc<dyn Transport>, HubError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| HubError::Transport(format!("no tokio runtime available: {e}")))?;
        install_crypto_provider();

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let state = Arc::new(AtomicU8::new(ReadyState::Connecting.as_u8()));
        let transport = TungsteniteTransport {
            state: Arc::clone(&state),
            outbound: outbound_tx,
        };

        runtime.spawn(run_connection(url.to_owned(), state, outbound_rx, sink));

        Ok(Arc::new(transport) as Arc<dyn Transport>)
    }
}

/// Frames queued for the connection task.
#[derive(Debug)]
enum Outbound {
    Text(String),
    Close,
}

/// Handle to a socket driven by a background task.
#[derive(Debug)]
struct TungsteniteTransport {
    state: Arc<AtomicU8>,
    outbound: mpsc::UnboundedSender<Outbound>,
}

impl Transport for TungsteniteTransport {
    fn ready_state(&self) -> ReadyState {
        ReadyState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn send_text(&self, text: String) -> Result<(), HubError> {
        if self.ready_state() != ReadyState::Open {
            return Err(HubError::NotConnected);
        }
        self.outbound
            .send(Outbound::Text(text))
            .map_err(|_| HubError::Transport("connection task has stopped".to_string()))
    }

    fn close(&self) {
        if matches!(self.ready_state(), ReadyState::Closing | ReadyState::Closed) {
            return;
        }
        self.state
            .store(ReadyState::Closing.as_u8(), Ordering::Release);
        // A stopped task has already reported its close.
        let _ = self.outbound.send(Outbound::Close);
    }
}

/// Runs the handshake and the read/write loop for one connection.
///
/// Always finishes by storing [`ReadyState::Closed`] and emitting exactly
/// one [`TransportEvent::Close`].
async fn run_connection(
    url: String,
    state: Arc<AtomicU8>,
    mut outbound_rx: mpsc::UnboundedReceiver<Outbound>,
    sink: EventSink,
) {
    let set_state = |s: ReadyState| state.store(s.as_u8(), Ordering::Release);

    let stream = match connect_async(url.as_str()).await {
        Ok((stream, _response)) => stream,
        Err(e) => {
            tracing::debug!(url = %url, error = %e, "websocket handshake failed");
            set_state(ReadyState::Closed);
            sink.emit(TransportEvent::Error(e.to_string()));
            sink.emit(TransportEvent::Close {
                code: Some(ABNORMAL_CLOSURE),
                reason: String::new(),
            });
            return;
        }
    };

    // close() may have raced the handshake.
    if ReadyState::from_u8(state.load(Ordering::Acquire)) == ReadyState::Connecting {
        set_state(ReadyState::Open);
    }
    sink.emit(TransportEvent::Open);

    let (mut ws_tx, mut ws_rx) = stream.split();

    let (code, reason) = loop {
        tokio::select! {
            // Incoming frame from the server
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        sink.emit(TransportEvent::Message(text.as_str().to_owned()));
                    }
                    Some(Ok(Message::Binary(bytes))) => {
                        tracing::warn!(len = bytes.len(), "dropping binary websocket frame");
                    }
                    Some(Ok(Message::Close(frame))) => {
                        set_state(ReadyState::Closing);
                        // Reading on flushes the queued close reply.
                        finish_close_handshake(&mut ws_rx).await;
                        break match frame {
                            Some(frame) => (Some(u16::from(frame.code)), frame.reason.as_str().to_owned()),
                            None => (None, String::new()),
                        };
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        sink.emit(TransportEvent::Error(e.to_string()));
                        break (Some(ABNORMAL_CLOSURE), String::new());
                    }
                    None => break (Some(ABNORMAL_CLOSURE), String::new()),
                }
            }
            // Frame queued by the hub
            cmd = outbound_rx.recv() => {
                match cmd {
                    Some(Outbound::Text(text)) => {
                        if let Err(e) = ws_tx.send(Message::text(text)).await {
                            sink.emit(TransportEvent::Error(e.to_string()));
                            break (Some(ABNORMAL_CLOSURE), String::new());
                        }
                    }
                    Some(Outbound::Close) | None => {
                        set_state(ReadyState::Closing);
                        match ws_tx.send(Message::Close(None)).await {
                            Ok(()) => finish_close_handshake(&mut ws_rx).await,
                            Err(e) => tracing::debug!(error = %e, "close frame not delivered"),
                        }
                        break (Some(NORMAL_CLOSURE), String::new());
                    }
                }
            }
        }
    };

    set_state(ReadyState::Closed);
    tracing::debug!(url = %url, code = ?code, "websocket connection task finished");
    sink.emit(TransportEvent::Close { code, reason });
}

/// Reads until the peer ends the stream, bounded by
/// [`CLOSE_HANDSHAKE_TIMEOUT`]. Frames arriving after the close are dropped.
async fn finish_close_handshake<S, E>(ws_rx: &mut S)
where
    S: Stream<Item = Result<Message, E>> + Unpin,
{
    let drain = async { while let Some(Ok(_)) = ws_rx.next().await {} };
    if tokio::time::timeout(CLOSE_HANDSHAKE_TIMEOUT, drain)
        .await
        .is_err()
    {
        tracing::debug!("peer did not finish the closing handshake in time");
    }
}
