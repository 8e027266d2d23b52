//! Per-socket handler: forwards pushed frames out and relays typing frames in.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};

use tandem_proto::codec;
use tandem_proto::message::UserId;

use crate::state::DevState;

/// Drives one authenticated socket until either side closes it.
pub async fn handle_socket(socket: WebSocket, state: Arc<DevState>, user: UserId) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (connection, mut rx) = state.connect(&user).await;

    let writer_user = user.clone();
    let mut write_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if ws_sender.send(msg).await.is_err() {
                tracing::warn!(user = %writer_user, "socket write failed");
                break;
            }
            if closing {
                break;
            }
        }
    });

    let reader_user = user.clone();
    let reader_state = Arc::clone(&state);
    let mut read_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_receiver.next().await {
            match msg {
                Message::Text(text) => match codec::decode_outbound(text.as_str()) {
                    Ok(frame) => reader_state.relay_typing(&reader_user, &frame).await,
                    Err(e) => {
                        tracing::warn!(user = %reader_user, err = %e, "dropping malformed frame");
                    }
                },
                Message::Close(_) => {
                    tracing::info!(user = %reader_user, "received close frame");
                    break;
                }
                _ => {}
            }
        }
    });

    // The writer ends on a server-initiated close; give the reader a moment
    // to see the client's close reply before tearing down.
    tokio::select! {
        _ = &mut read_task => {
            write_task.abort();
        }
        _ = &mut write_task => {
            if tokio::time::timeout(std::time::Duration::from_secs(1), &mut read_task)
                .await
                .is_err()
            {
                read_task.abort();
            }
        }
    }

    state.disconnect(&user, connection).await;
}
