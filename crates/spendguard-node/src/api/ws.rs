//! WebSocket endpoints.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::Response,
};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use spendguard_core::{PurchaseRecord, User};
use spendguard_store::RecordQuery;
use spendguard_workflow::{IntakeView, SharedSession};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::auth::CurrentUser;
use crate::error::ApiResult;
use crate::state::AppState;

/// Message pushed on the record stream.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RecordStreamMessage {
    /// Full view of the caller's visible records.
    Snapshot {
        version: u64,
        records: Vec<PurchaseRecord>,
    },
    /// The subscription could not be opened or ended.
    Error { message: String },
}

/// Message pushed on an intake stream.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IntakeStreamMessage {
    Update { view: IntakeView },
    Error { message: String },
}

async fn send_json<T: Serialize>(socket: &mut WebSocket, msg: &T) -> bool {
    match serde_json::to_string(msg) {
        Ok(json) => socket.send(Message::Text(json)).await.is_ok(),
        Err(e) => {
            warn!(error = %e, "failed to encode stream message");
            false
        }
    }
}

/// Live snapshots of the records the caller may see.
pub async fn records_stream(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Response {
    ws.on_upgrade(move |socket| handle_records_stream(socket, state, user))
}

async fn handle_records_stream(mut socket: WebSocket, state: AppState, user: User) {
    let mut snapshots = match state.store.subscribe(RecordQuery::visible_to(&user)).await {
        Ok(stream) => stream,
        Err(e) => {
            let msg = RecordStreamMessage::Error {
                message: e.to_string(),
            };
            let _ = send_json(&mut socket, &msg).await;
            return;
        }
    };
    debug!(user = %user.id, "record stream opened");

    loop {
        tokio::select! {
            snapshot = snapshots.next() => {
                let Some(snapshot) = snapshot else {
                    let msg = RecordStreamMessage::Error {
                        message: "record subscription ended".to_string(),
                    };
                    let _ = send_json(&mut socket, &msg).await;
                    break;
                };
                let msg = RecordStreamMessage::Snapshot {
                    version: snapshot.version,
                    records: snapshot.records,
                };
                if !send_json(&mut socket, &msg).await {
                    break;
                }
            }
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                    Some(Ok(Message::Ping(data))) => {
                        let _ = socket.send(Message::Pong(data)).await;
                    }
                    _ => {}
                }
            }
        }
    }
    debug!(user = %user.id, "record stream closed");
}

/// Progress of one intake session: analysis, enrichment and submission.
pub async fn intake_stream(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Response> {
    let session = state.session(id, &user).await?;
    Ok(ws.on_upgrade(move |socket| handle_intake_stream(socket, session)))
}

async fn handle_intake_stream(mut socket: WebSocket, session: SharedSession) {
    let (initial, mut updates) = {
        let session = session.read().await;
        (session.view(), session.subscribe())
    };

    let closed = initial.state.is_closed();
    if !send_json(&mut socket, &IntakeStreamMessage::Update { view: initial }).await || closed {
        return;
    }

    loop {
        tokio::select! {
            update = updates.recv() => {
                match update {
                    Ok(view) => {
                        let closed = view.state.is_closed();
                        if !send_json(&mut socket, &IntakeStreamMessage::Update { view }).await || closed {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        debug!(skipped, "intake stream lagged; sending current view");
                        let view = session.read().await.view();
                        if !send_json(&mut socket, &IntakeStreamMessage::Update { view }).await {
                            break;
                        }
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                    Some(Ok(Message::Ping(data))) => {
                        let _ = socket.send(Message::Pong(data)).await;
                    }
                    _ => {}
                }
            }
        }
    }
}
