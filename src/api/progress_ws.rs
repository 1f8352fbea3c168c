//! `GET /jobs/{id}/ws`: the progress channel's WebSocket transport. The
//! first client frame must be a `{op:"subscribe", job_id, token}` message
//! naming the same job as the path; everything the server sends after that
//! is a `ProgressEvent` serialized as-is, so the wire shape here is just
//! the channel's own JSON plus the one-time subscribe handshake.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::Response;
use serde::Deserialize;
use tracing::{debug, warn};

use pageforge_engine::StoreSnapshotSource;

use crate::state::AppState;

#[derive(Debug, Deserialize)]
struct SubscribeFrame {
    #[allow(dead_code)]
    op: String,
    job_id: i64,
    #[allow(dead_code)]
    token: Option<String>,
}

pub async fn subscribe(ws: WebSocketUpgrade, State(state): State<AppState>, Path(path_job_id): Path<i64>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state, path_job_id))
}

async fn handle_socket(mut socket: WebSocket, state: AppState, path_job_id: i64) {
    let Some(Ok(Message::Text(raw))) = socket.recv().await else {
        let _ = socket.send(Message::Close(None)).await;
        return;
    };
    let frame: SubscribeFrame = match serde_json::from_str(&raw) {
        Ok(frame) => frame,
        Err(err) => {
            let _ = socket.send(Message::Text(format!(r#"{{"event":"error","message":"{err}"}}"#))).await;
            return;
        }
    };
    if frame.job_id != path_job_id {
        let _ = socket
            .send(Message::Text(r#"{"event":"error","message":"job_id in subscribe frame does not match path"}"#.to_string()))
            .await;
        return;
    }

    let source = StoreSnapshotSource(state.store.clone());
    let (snapshot, mut receiver) = state.progress.subscribe(path_job_id, &source).await;

    if let Some(snapshot) = snapshot {
        if send_event(&mut socket, &snapshot).await.is_err() {
            return;
        }
    }

    loop {
        tokio::select! {
            event = receiver.recv() => {
                match event {
                    Ok(event) => {
                        if send_event(&mut socket, &event).await.is_err() {
                            break;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(job_id = path_job_id, skipped, "progress subscriber lagged, events dropped");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        debug!(job_id = path_job_id, %err, "websocket read error");
                        break;
                    }
                }
            }
        }
    }

    state.progress.release(path_job_id).await;
}

async fn send_event(socket: &mut WebSocket, event: &pageforge_progress::ProgressEvent) -> Result<(), axum::Error> {
    let payload = serde_json::to_string(event).unwrap_or_else(|_| r#"{"event":"error","message":"serialization failure"}"#.to_string());
    socket.send(Message::Text(payload)).await
}
