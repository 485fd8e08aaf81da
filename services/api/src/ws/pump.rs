//! The two directions of an active session.
//!
//! `inbound` relays client frames upstream untouched. `outbound` decodes each
//! upstream frame, applies side effects (tool calls, usage, transcript) and
//! then forwards the original frame to the client. Upstream writes from both
//! pumps go through the same `Mutex<UpstreamSink>`, so tool results and
//! relayed client frames never interleave mid-message.

use super::session::{ClientSink, ClientSource, send_session_update};
use super::upstream::{UpstreamSink, UpstreamSource};
use crate::error::BridgeError;
use crate::state::AppState;
use axum::extract::ws::Message;
use futures_util::{SinkExt, StreamExt};
use kbvoice_core::{Conversation, Message as TranscriptMessage, OutboundEvent, UpstreamEvent};
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tracing::{debug, error, info, warn};

/// Outcome of one upstream write.
enum Sent {
    Ok,
    /// The upstream socket rejected the frame.
    Failed,
}

async fn send_upstream(
    upstream_tx: &Mutex<UpstreamSink>,
    frame: WsMessage,
    state: &AppState,
) -> Result<Sent, BridgeError> {
    let send = async { upstream_tx.lock().await.send(frame).await };
    match tokio::time::timeout(state.session.send_timeout, send).await {
        Ok(Ok(())) => Ok(Sent::Ok),
        Ok(Err(e)) => {
            warn!(error = %e, "Upstream rejected frame, dropping it");
            Ok(Sent::Failed)
        }
        Err(_) => {
            state.metrics.record_error("upstream_send_timeout");
            Err(BridgeError::SendTimeout)
        }
    }
}

/// Client → upstream. Ends when the client goes away or an upstream send
/// times out.
pub(crate) async fn inbound(
    client_rx: &mut ClientSource,
    upstream_tx: &Mutex<UpstreamSink>,
    state: &AppState,
) -> Result<(), BridgeError> {
    while let Some(frame) = client_rx.next().await {
        let frame = match frame {
            Ok(Message::Text(text)) => WsMessage::Text(text.as_str().to_owned().into()),
            Ok(Message::Binary(data)) => WsMessage::Binary(data),
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => continue,
            Ok(Message::Close(_)) => {
                info!("Client sent close frame");
                return Ok(());
            }
            Err(e) => {
                debug!(error = %e, "Client socket error");
                return Ok(());
            }
        };
        send_upstream(upstream_tx, frame, state).await?;
    }
    info!("Client stream ended");
    Ok(())
}

/// Upstream → client. Reconnects upstream when it drops, up to the
/// configured number of times per session.
pub(crate) async fn outbound(
    upstream_rx: &mut UpstreamSource,
    upstream_tx: &Mutex<UpstreamSink>,
    client_tx: &mut ClientSink,
    conversation: &mut Conversation,
    state: &AppState,
) -> Result<(), BridgeError> {
    let mut reconnects_left = state.session.max_upstream_reconnects;
    loop {
        let frame = match upstream_rx.next().await {
            Some(Ok(frame)) => Some(frame),
            Some(Err(e)) => {
                warn!(error = %e, "Upstream socket error");
                None
            }
            None => None,
        };

        let forwarded = match frame {
            Some(WsMessage::Text(text)) => {
                let event = UpstreamEvent::decode(text.as_str());
                apply_event(&event, upstream_tx, conversation, state).await?;
                Message::Text(text.as_str().to_owned().into())
            }
            Some(WsMessage::Binary(data)) => Message::Binary(data),
            Some(WsMessage::Ping(_)) | Some(WsMessage::Pong(_)) | Some(WsMessage::Frame(_)) => {
                continue;
            }
            Some(WsMessage::Close(_)) | None => {
                state.metrics.record_error("upstream_disconnected");
                if reconnects_left == 0 {
                    warn!("Upstream disconnected, no reconnection left");
                    return Err(BridgeError::UpstreamDisconnected);
                }
                reconnects_left -= 1;
                reconnect(upstream_rx, upstream_tx, conversation.namespace(), state).await?;
                continue;
            }
        };

        if let Err(e) = client_tx.send(forwarded).await {
            info!(error = %e, "Client socket closed while forwarding");
            return Ok(());
        }
    }
}

/// Side effects of one decoded upstream event.
async fn apply_event(
    event: &UpstreamEvent,
    upstream_tx: &Mutex<UpstreamSink>,
    conversation: &mut Conversation,
    state: &AppState,
) -> Result<(), BridgeError> {
    match event {
        UpstreamEvent::FunctionCallArgumentsDone { .. } => {
            for outbound in state.interceptor.handle(event, conversation).await {
                send_outbound(upstream_tx, &outbound, state).await?;
            }
        }
        UpstreamEvent::ResponseDone { response } => {
            if let Some(usage) = &response.usage {
                conversation.record_usage(usage);
            }
        }
        UpstreamEvent::ConversationItemCreated { item } => {
            for message in TranscriptMessage::from_item(item) {
                conversation.log(message).await;
            }
        }
        UpstreamEvent::Passthrough => {}
    }
    Ok(())
}

async fn send_outbound(
    upstream_tx: &Mutex<UpstreamSink>,
    event: &OutboundEvent,
    state: &AppState,
) -> Result<(), BridgeError> {
    let payload = match event.to_json() {
        Ok(payload) => payload,
        Err(e) => {
            error!(error = %e, "Failed to encode outbound event");
            return Ok(());
        }
    };
    send_upstream(upstream_tx, WsMessage::Text(payload.into()), state).await?;
    Ok(())
}

/// Opens a new upstream socket, configures it and swaps it in for the old one.
async fn reconnect(
    upstream_rx: &mut UpstreamSource,
    upstream_tx: &Mutex<UpstreamSink>,
    namespace: &str,
    state: &AppState,
) -> Result<(), BridgeError> {
    info!("Upstream disconnected, reconnecting");
    state.metrics.increment("upstream_reconnections");
    let stream = state.connector.connect(namespace).await?;
    let (mut sink, source) = stream.split();
    send_session_update(&mut sink, state).await?;

    let stale = std::mem::replace(&mut *upstream_tx.lock().await, sink);
    *upstream_rx = source;
    drop(stale);
    info!("Upstream reconnected");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConnectError;

    #[test]
    fn test_reconnect_failure_keeps_connect_close_code() {
        let err = BridgeError::RetryExhausted {
            attempts: 1,
            source: ConnectError::Refused("closed".into()),
        };
        assert_eq!(err.close_code(), 1013);
        assert_eq!(BridgeError::UpstreamDisconnected.close_code(), 1011);
    }
}
