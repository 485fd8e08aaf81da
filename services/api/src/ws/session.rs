//! Manages the lifecycle of one bridged WebSocket session.
//!
//! A session moves through handshaking, connecting, active and closing. The
//! handshake reads the client's init frame to pick the namespace, connecting
//! opens the upstream socket and sends the session configuration, and the
//! active phase runs the two pumps until either ends. Teardown consumes the
//! bridge, so it runs once per session.

use super::protocol::{ErrorNotice, InitMessage};
use super::pump;
use super::upstream::{UpstreamSink, UpstreamSource};
use crate::error::BridgeError;
use crate::state::AppState;
use axum::{
    extract::{
        State,
        ws::{CloseFrame, Message, Utf8Bytes, WebSocket, WebSocketUpgrade, close_code},
    },
    response::Response,
};
use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use kbvoice_core::{Conversation, Session};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tracing::{Instrument, debug, error, info, info_span, warn};

pub type ClientSink = SplitSink<WebSocket, Message>;
pub type ClientSource = SplitStream<WebSocket>;

/// Axum handler to upgrade an HTTP connection to a WebSocket.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let span = info_span!(
        "ws_session",
        session_id = tracing::field::Empty,
        namespace = tracing::field::Empty
    );
    run_session(socket, state).instrument(span).await;
}

async fn run_session(socket: WebSocket, state: Arc<AppState>) {
    state.metrics.increment("ws_connections");
    info!("Client connected, awaiting init message");
    let (mut client_tx, mut client_rx) = socket.split();

    // --- handshaking ---
    let namespace = match handshake(&mut client_rx, &state).await {
        Ok(Some(namespace)) => namespace,
        Ok(None) => {
            info!("Client disconnected before sending init message");
            return;
        }
        Err(e) => {
            warn!(error = %e, "Handshake failed");
            if matches!(e, BridgeError::HandshakeTimeout) {
                state.metrics.record_error("client_init_timeout");
            }
            report_error(&mut client_tx, &e).await;
            return;
        }
    };

    let session = Session::new(namespace.clone());
    let span = tracing::Span::current();
    span.record("session_id", tracing::field::display(session.id));
    span.record("namespace", namespace.as_str());
    info!("Session started");
    let conversation = Conversation::new(session, state.recorder.clone());

    // --- connecting ---
    let upstream = match open_upstream(&state, &namespace).await {
        Ok(upstream) => upstream,
        Err(e) => {
            error!(error = %e, "Upstream connection failed");
            state.metrics.record_error("upstream_connection_error");
            report_error(&mut client_tx, &e).await;
            finish(&state, conversation).await;
            return;
        }
    };

    // --- active ---
    let (upstream_tx, upstream_rx) = upstream;
    let mut bridge = SessionBridge {
        state,
        client_tx,
        client_rx,
        upstream_tx: Mutex::new(upstream_tx),
        upstream_rx,
        conversation,
    };
    let outcome = bridge.run().await;
    bridge.teardown(outcome).await;
}

/// Reads the init frame and resolves the namespace. `Ok(None)` means the
/// client went away first.
async fn handshake(
    client_rx: &mut ClientSource,
    state: &AppState,
) -> Result<Option<String>, BridgeError> {
    let timeout = state.session.client_init_timeout;
    let init = match tokio::time::timeout(timeout, next_init_frame(client_rx)).await {
        Err(_) => return Err(BridgeError::HandshakeTimeout),
        Ok(None) => return Ok(None),
        Ok(Some(init)) => init?,
    };
    Ok(Some(init.namespace(&state.session.default_kb_id)))
}

async fn next_init_frame(
    client_rx: &mut ClientSource,
) -> Option<Result<InitMessage, BridgeError>> {
    while let Some(frame) = client_rx.next().await {
        let parsed = match frame {
            Ok(Message::Text(text)) => InitMessage::from_text(text.as_str()),
            Ok(Message::Binary(data)) => InitMessage::from_slice(&data),
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => continue,
            Ok(Message::Close(_)) => return None,
            Err(e) => {
                debug!(error = %e, "Client socket error during handshake");
                return None;
            }
        };
        return Some(parsed.map_err(|e| BridgeError::InvalidInit(e.to_string())));
    }
    None
}

/// Connects upstream and sends the session configuration.
async fn open_upstream(
    state: &AppState,
    namespace: &str,
) -> Result<(UpstreamSink, UpstreamSource), BridgeError> {
    let stream = state.connector.connect(namespace).await?;
    let (mut sink, source) = stream.split();
    send_session_update(&mut sink, state).await?;
    Ok((sink, source))
}

pub(crate) async fn send_session_update(
    sink: &mut UpstreamSink,
    state: &AppState,
) -> Result<(), BridgeError> {
    let payload = state.profile.to_json()?;
    match tokio::time::timeout(state.session.send_timeout, sink.send(WsMessage::Text(payload.into())))
        .await
    {
        Ok(Ok(())) => {
            debug!("Session configuration sent upstream");
            Ok(())
        }
        Ok(Err(e)) => {
            warn!(error = %e, "Failed to send session configuration");
            Err(BridgeError::UpstreamDisconnected)
        }
        Err(_) => Err(BridgeError::SendTimeout),
    }
}

/// Sends `{"error": ...}` followed by a close frame. Best-effort.
async fn report_error(client_tx: &mut ClientSink, err: &BridgeError) {
    let notice = ErrorNotice {
        error: err.to_string(),
    };
    match serde_json::to_string(&notice) {
        Ok(text) => {
            if let Err(e) = client_tx.send(Message::Text(text.into())).await {
                debug!(error = %e, "Could not deliver error notice to client");
            }
        }
        Err(e) => error!(error = %e, "Failed to serialize error notice"),
    }
    let code = err.close_code();
    let reason = if code == close_code::AGAIN {
        Utf8Bytes::from_static("upstream unavailable")
    } else {
        Utf8Bytes::from_static("internal error")
    };
    let _ = client_tx
        .send(Message::Close(Some(CloseFrame { code, reason })))
        .await;
}

/// Hands the transcript and usage summary to the recorder.
async fn finish(state: &AppState, conversation: Conversation) {
    let summary = conversation.summary(&state.pricing);
    info!(
        duration_seconds = summary.duration_seconds,
        total_tokens = summary.tokens.total(),
        cost_usd = summary.cost_usd,
        "Session usage"
    );
    conversation.save(&summary).await;
}

/// One active client/upstream pairing.
pub struct SessionBridge {
    state: Arc<AppState>,
    client_tx: ClientSink,
    client_rx: ClientSource,
    /// Shared by both pumps; replaced in place on reconnection.
    upstream_tx: Mutex<UpstreamSink>,
    upstream_rx: UpstreamSource,
    conversation: Conversation,
}

impl SessionBridge {
    /// Runs both pumps until the first one finishes. The other is dropped.
    async fn run(&mut self) -> Result<(), BridgeError> {
        let SessionBridge {
            state,
            client_tx,
            client_rx,
            upstream_tx,
            upstream_rx,
            conversation,
        } = self;
        let state: &AppState = state;
        let upstream_tx: &Mutex<UpstreamSink> = upstream_tx;

        let inbound = pump::inbound(client_rx, upstream_tx, state);
        let outbound = pump::outbound(upstream_rx, upstream_tx, client_tx, conversation, state);

        tokio::select! {
            result = inbound => {
                debug!("Inbound pump finished");
                result
            }
            result = outbound => {
                debug!("Outbound pump finished");
                result
            }
        }
    }

    async fn teardown(self, outcome: Result<(), BridgeError>) {
        let SessionBridge {
            state,
            mut client_tx,
            client_rx,
            upstream_tx,
            upstream_rx,
            conversation,
        } = self;

        // Client transport.
        match &outcome {
            Ok(()) => {
                if let Err(e) = client_tx.close().await {
                    debug!(error = %e, "Client socket already closed");
                }
            }
            Err(e) => {
                warn!(error = %e, "Session ended with error");
                report_error(&mut client_tx, e).await;
            }
        }
        drop(client_rx);

        // Upstream transport, bounded so a stalled peer cannot hold up the save.
        let mut upstream_tx = upstream_tx.into_inner();
        match tokio::time::timeout(state.session.send_timeout, upstream_tx.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(error = %e, "Upstream socket already closed"),
            Err(_) => warn!("Timed out closing upstream socket"),
        }
        drop(upstream_rx);

        finish(&state, conversation).await;
        info!("Session closed");
    }
}
