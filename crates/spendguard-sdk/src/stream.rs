//! WebSocket streams for live updates.

use futures::StreamExt;
use serde::{de::DeserializeOwned, Deserialize};
use spendguard_core::PurchaseRecord;
use spendguard_workflow::IntakeView;
use tokio::sync::mpsc;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{client::IntoClientRequest, http::HeaderValue, Message},
};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::client::USER_HEADER;
use crate::error::{ClientError, ClientResult};

/// Event on the record stream.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RecordEvent {
    /// Full view of the visible records.
    Snapshot {
        version: u64,
        records: Vec<PurchaseRecord>,
    },
    /// The node could not serve the subscription.
    Error { message: String },
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum IntakeMessage {
    Update { view: IntakeView },
    Error { message: String },
}

async fn open<T>(url: &str, user_id: &str) -> ClientResult<(mpsc::Receiver<T>, tokio::task::JoinHandle<()>)>
where
    T: DeserializeOwned + Send + 'static,
{
    let mut request = url.into_client_request()?;
    let user = HeaderValue::from_str(user_id)
        .map_err(|e| ClientError::Connection(format!("invalid user id: {e}")))?;
    request.headers_mut().insert(USER_HEADER, user);

    let (ws_stream, _) = connect_async(request).await?;
    let (tx, rx) = mpsc::channel(100);

    let handle = tokio::spawn(async move {
        let (_, mut read) = ws_stream.split();

        while let Some(msg) = read.next().await {
            match msg {
                Ok(Message::Text(text)) => match serde_json::from_str::<T>(&text) {
                    Ok(event) => {
                        if tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!(error = %e, "ignoring unreadable stream message"),
                },
                Ok(Message::Close(_)) | Err(_) => break,
                _ => {}
            }
        }
        debug!("stream closed");
    });

    Ok((rx, handle))
}

/// Stream of record snapshots.
pub struct RecordStream {
    receiver: mpsc::Receiver<RecordEvent>,
    _handle: tokio::task::JoinHandle<()>,
}

impl RecordStream {
    /// Connect to a node's record stream as `user_id`.
    pub async fn connect(ws_url: &str, user_id: &str) -> ClientResult<Self> {
        let (receiver, handle) = open(ws_url, user_id).await?;
        Ok(Self {
            receiver,
            _handle: handle,
        })
    }

    /// Get the next event. `None` once the node closes the stream.
    pub async fn next(&mut self) -> Option<RecordEvent> {
        self.receiver.recv().await
    }
}

/// Stream of views of one intake session. Ends after the session closes.
pub struct IntakeStream {
    session_id: Uuid,
    receiver: mpsc::Receiver<IntakeMessage>,
    _handle: tokio::task::JoinHandle<()>,
}

impl IntakeStream {
    pub async fn connect(ws_url: &str, user_id: &str, session_id: Uuid) -> ClientResult<Self> {
        let (receiver, handle) = open(ws_url, user_id).await?;
        Ok(Self {
            session_id,
            receiver,
            _handle: handle,
        })
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Get the next view, or the node's error message.
    pub async fn next(&mut self) -> Option<Result<IntakeView, String>> {
        self.receiver.recv().await.map(|msg| match msg {
            IntakeMessage::Update { view } => Ok(view),
            IntakeMessage::Error { message } => Err(message),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_event_decoding() {
        let event: RecordEvent =
            serde_json::from_str(r#"{"type":"snapshot","version":3,"records":[]}"#).unwrap();
        assert!(matches!(event, RecordEvent::Snapshot { version: 3, .. }));

        let event: RecordEvent =
            serde_json::from_str(r#"{"type":"error","message":"offline"}"#).unwrap();
        assert!(matches!(event, RecordEvent::Error { message } if message == "offline"));
    }

    #[tokio::test]
    async fn test_connect_failure_is_a_connection_error() {
        let err = RecordStream::connect("ws://127.0.0.1:1/ws/records", "u1")
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ClientError::Connection(_)));
        assert!(err.is_retryable());
    }
}
