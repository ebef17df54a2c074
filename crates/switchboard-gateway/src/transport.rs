//! `WebSocket` transport at `GET /ws`.
//!
//! Each upgraded socket is split into a reader and a writer. Neither touches
//! gateway state: the reader posts inbound frames to the reactor, the writer
//! drains the connection's outbound queue and obeys [`Control`] messages.
//! The connection id assigned by the reactor tags every event either side
//! posts.

use std::net::SocketAddr;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message as WsMessage, Utf8Bytes, WebSocket, close_code};
use axum::extract::{ConnectInfo, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use switchboard_types::ConnectionId;
use tokio::sync::{mpsc, oneshot};

use crate::connection::{CloseReason, Control, LinkEnds, TransportLink};
use crate::gateway::Event;
use crate::reactor::ReactorHandle;
use crate::state::AppState;

/// Longest a writer waits to get a close frame out.
const CLOSE_FRAME_TIMEOUT: Duration = Duration::from_secs(1);

/// Socket message ceiling as a multiple of the frame limit. The decoder
/// enforces the frame limit itself and answers with 1009; this only bounds
/// what a single message can make the socket buffer.
const SOCKET_LIMIT_FACTOR: usize = 4;

/// Upgrade to a `WebSocket` and hand the connection to the gateway.
///
/// # Route
///
/// `GET /ws`
pub async fn ws_upgrade(
    ws: WebSocketUpgrade,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.max_message_size(state.max_frame_bytes.saturating_mul(SOCKET_LIMIT_FACTOR))
        .on_upgrade(move |socket| run_connection(socket, state, peer))
}

async fn run_connection(mut socket: WebSocket, state: AppState, peer: SocketAddr) {
    let (link, ends) = TransportLink::pair(state.queue_capacity, Some(peer));
    let (ack_tx, ack_rx) = oneshot::channel();
    // A stopped reactor drops the event, and with it the ack sender.
    state.reactor.post(Event::Accepted { link, ack: ack_tx });

    let id = match ack_rx.await {
        Ok(Some(id)) => id,
        _ => {
            tracing::debug!(%peer, "Upgrade refused");
            let refuse = CloseReason::new(close_code::AWAY, "unavailable");
            let _ = tokio::time::timeout(CLOSE_FRAME_TIMEOUT, socket.send(close_frame(refuse))).await;
            return;
        }
    };

    let (sink, stream) = socket.split();
    let mut writer = tokio::spawn(write_loop(id, sink, ends, state.reactor.clone()));
    tokio::select! {
        () = read_loop(id, stream, &state.reactor) => {}
        _ = &mut writer => {}
    }
}

/// Forward inbound frames to the reactor until the peer goes away.
async fn read_loop(
    id: ConnectionId,
    mut stream: SplitStream<WebSocket>,
    reactor: &ReactorHandle<Event>,
) {
    while let Some(frame) = stream.next().await {
        let event = match frame {
            Ok(WsMessage::Text(text)) => Event::Inbound {
                id,
                bytes: text.as_str().as_bytes().to_vec(),
            },
            Ok(WsMessage::Binary(bytes)) => Event::Inbound {
                id,
                bytes: bytes.to_vec(),
            },
            Ok(WsMessage::Ping(_) | WsMessage::Pong(_)) => Event::Activity { id },
            Ok(WsMessage::Close(_)) => break,
            Err(e) => {
                reactor.post(Event::TransportFailed {
                    id,
                    error: e.to_string(),
                });
                return;
            }
        };
        if !reactor.post(event) {
            return;
        }
    }
    reactor.post(Event::PeerClosed { id });
}

/// Write queued frames until told to close or the connection is dropped.
async fn write_loop(
    id: ConnectionId,
    mut sink: SplitSink<WebSocket, WsMessage>,
    mut ends: LinkEnds,
    reactor: ReactorHandle<Event>,
) {
    loop {
        tokio::select! {
            biased;
            control = ends.control.recv() => match control {
                Some(Control::Close(reason)) => {
                    // The drain deadline arrives as an abort and cuts the flush short.
                    let flushed = tokio::select! {
                        result = flush(&mut sink, &mut ends.messages) => result,
                        Some(Control::Abort(_)) = ends.control.recv() => {
                            Err("flush aborted".to_owned())
                        }
                    };
                    match flushed {
                        Ok(()) => {
                            let _ = tokio::time::timeout(
                                CLOSE_FRAME_TIMEOUT,
                                sink.send(close_frame(reason)),
                            )
                            .await;
                            reactor.post(Event::Drained { id });
                        }
                        Err(error) => {
                            reactor.post(Event::TransportFailed { id, error });
                        }
                    }
                    return;
                }
                Some(Control::Abort(reason)) => {
                    let _ = tokio::time::timeout(CLOSE_FRAME_TIMEOUT, sink.send(close_frame(reason)))
                        .await;
                    return;
                }
                None => return,
            },
            frame = ends.messages.recv() => match frame {
                Some(frame) => {
                    if let Err(e) = sink.send(WsMessage::Text(frame.into())).await {
                        reactor.post(Event::TransportFailed {
                            id,
                            error: e.to_string(),
                        });
                        return;
                    }
                }
                None => return,
            },
        }
    }
}

/// Write everything already queued.
async fn flush(
    sink: &mut SplitSink<WebSocket, WsMessage>,
    messages: &mut mpsc::Receiver<String>,
) -> Result<(), String> {
    while let Ok(frame) = messages.try_recv() {
        sink.send(WsMessage::Text(frame.into()))
            .await
            .map_err(|e| e.to_string())?;
    }
    Ok(())
}

fn close_frame(reason: CloseReason) -> WsMessage {
    WsMessage::Close(Some(CloseFrame {
        code: reason.code,
        reason: Utf8Bytes::from_static(reason.reason),
    }))
}
