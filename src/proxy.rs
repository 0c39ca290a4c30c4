//! Reverse proxy from an upgraded client WebSocket onto the browser's own
//! control-protocol endpoint.
//!
//! A split reader/writer pair over `tokio-tungstenite`, one task per
//! direction, the familiar shape for a CDP connection's
//! `connect`/`read_loop`/`write_loop` — generalized here into a frame
//! splice between two live sockets instead of a request/response
//! multiplexer: handshake the upstream directly, then splice frames in
//! both directions.

use axum::extract::ws::{Message as AxumMessage, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::Message as UpstreamMessage;
use tracing::{debug, info, warn};

/// Bridges an already-upgraded client socket to the browser's control
/// protocol endpoint. `browser_gone` fires when any driver-side cleanup
/// trigger lands (browser close, process exit, disconnect); the socket's
/// own close/error ends the splice on its own without needing a separate
/// listener, since each direction is just a stream that terminates.
pub async fn proxy_websocket(client: WebSocket, ws_endpoint: String, mut browser_gone: watch::Receiver<bool>) {
    let (upstream, _) = match tokio_tungstenite::connect_async(&ws_endpoint).await {
        Ok(pair) => pair,
        Err(e) => {
            warn!("proxy: failed to dial browser endpoint {ws_endpoint}: {e}");
            return;
        }
    };

    let (mut upstream_tx, mut upstream_rx) = upstream.split();
    let (mut client_tx, mut client_rx) = client.split();

    let client_to_upstream = async {
        loop {
            tokio::select! {
                biased;
                changed = browser_gone.changed() => {
                    if changed.is_err() || *browser_gone.borrow() {
                        break;
                    }
                }
                msg = client_rx.next() => {
                    match msg {
                        Some(Ok(msg)) => {
                            let Some(upstream_msg) = to_upstream(msg) else { break };
                            if upstream_tx.send(upstream_msg).await.is_err() {
                                break;
                            }
                        }
                        Some(Err(e)) => {
                            debug!("proxy: client socket error: {e}");
                            break;
                        }
                        None => break,
                    }
                }
            }
        }
        let _ = upstream_tx.close().await;
    };

    let upstream_to_client = async {
        while let Some(msg) = upstream_rx.next().await {
            match msg {
                Ok(msg) => {
                    let Some(client_msg) = to_client(msg) else { break };
                    if client_tx.send(client_msg).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    debug!("proxy: upstream socket error: {e}");
                    break;
                }
            }
        }
        let _ = client_tx.close().await;
    };

    tokio::join!(client_to_upstream, upstream_to_client);
    info!("proxy: websocket bridge to {ws_endpoint} closed");
}

fn to_upstream(msg: AxumMessage) -> Option<UpstreamMessage> {
    match msg {
        AxumMessage::Text(t) => Some(UpstreamMessage::Text(t.as_str().to_owned().into())),
        AxumMessage::Binary(b) => Some(UpstreamMessage::Binary(b)),
        AxumMessage::Ping(p) => Some(UpstreamMessage::Ping(p)),
        AxumMessage::Pong(p) => Some(UpstreamMessage::Pong(p)),
        AxumMessage::Close(_) => None,
    }
}

fn to_client(msg: UpstreamMessage) -> Option<AxumMessage> {
    match msg {
        UpstreamMessage::Text(t) => Some(AxumMessage::Text(t.as_str().to_owned().into())),
        UpstreamMessage::Binary(b) => Some(AxumMessage::Binary(b)),
        UpstreamMessage::Ping(p) => Some(AxumMessage::Ping(p)),
        UpstreamMessage::Pong(p) => Some(AxumMessage::Pong(p)),
        UpstreamMessage::Close(_) | UpstreamMessage::Frame(_) => None,
    }
}
