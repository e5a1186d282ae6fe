//! WebSocket frame pump for a single editor connection.

use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, instrument, warn};

use super::bridge::EditorBridge;
use super::connection::{EditorConnection, Outbound};

/// Pump frames between the raw socket and the connection's channels until
/// the editor goes away, the outbound channel closes, or the kill token
/// fires.
#[instrument(skip_all, fields(cid = %connection.cid))]
pub(crate) async fn run_socket(
    socket: WebSocket,
    mut outbound_rx: mpsc::Receiver<Outbound>,
    connection: Arc<EditorConnection>,
    bridge: Arc<EditorBridge>,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let kill = connection.kill_token();

    // Writer owns the sink. A queued close frame ends the pump only after
    // it has been flushed, so the editor sees the code and reason.
    let writer_kill = kill.clone();
    let writer = tokio::spawn(async move {
        loop {
            tokio::select! {
                frame = outbound_rx.recv() => match frame {
                    Some(Outbound::Text(text)) => {
                        if ws_tx.send(Message::Text(text.as_str().into())).await.is_err() {
                            break;
                        }
                    }
                    Some(Outbound::Close { code, reason }) => {
                        let _ = ws_tx
                            .send(Message::Close(Some(CloseFrame {
                                code,
                                reason: reason.into(),
                            })))
                            .await;
                        break;
                    }
                    None => break,
                },
                () = writer_kill.cancelled() => break,
            }
        }
    });

    // Reader runs in the current task so the caller's cleanup starts the
    // moment the editor disappears.
    loop {
        tokio::select! {
            () = kill.cancelled() => {
                debug!("connection terminated");
                break;
            }
            msg = ws_rx.next() => match msg {
                Some(Ok(Message::Text(text))) => bridge.handle_inbound(&connection, &text),
                Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                    Ok(text) => bridge.handle_inbound(&connection, text),
                    Err(_) => warn!("ignoring non-UTF8 binary frame"),
                },
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => connection.update_seen(),
                Some(Ok(Message::Close(_))) => {
                    debug!("editor closed the socket");
                    break;
                }
                Some(Err(err)) => {
                    debug!(error = %err, "socket error");
                    break;
                }
                None => break,
            },
        }
    }

    writer.abort();
}
