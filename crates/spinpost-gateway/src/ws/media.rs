use axum::{
    extract::{ws::Message, ws::WebSocket, State, WebSocketUpgrade},
    response::IntoResponse,
};
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use spinpost_protocol::{ClientMediaFrame, DownloadFrame};
use spinpost_transfer::{Ack, CreditGate, FrameSink, TransferError};
use std::sync::{atomic::Ordering, Arc};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::app::AppState;

/// Depth of the per-session download request queue.
const REQUEST_QUEUE: usize = 16;

/// Outbound half of the socket. Shared by the streamer and the reader, which
/// answers refused requests itself; each frame takes the lock on its own.
#[derive(Clone)]
struct WsFrameSink {
    tx: Arc<Mutex<SplitSink<WebSocket, Message>>>,
}

#[async_trait::async_trait]
impl FrameSink for WsFrameSink {
    async fn send(&mut self, frame: DownloadFrame) -> spinpost_transfer::Result<()> {
        let json = serde_json::to_string(&frame).unwrap_or_default();
        self.tx
            .lock()
            .await
            .send(Message::Text(json.into()))
            .await
            .map_err(|_| TransferError::ChannelClosed)
    }
}

/// Axum handler — upgrades HTTP to WebSocket at GET /ws/media.
pub async fn media_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| run_media_session(socket, state))
}

enum Enqueued {
    Accepted,
    /// Queue full; the frame tells the client to ask again later.
    Refused(DownloadFrame),
    Closed,
}

/// Hand a request to the streamer without waiting. The reader must keep
/// draining acks, so a full queue refuses instead of blocking.
fn enqueue(queue: &mpsc::Sender<Vec<String>>, ids: Vec<String>) -> Enqueued {
    match queue.try_send(ids) {
        Ok(()) => Enqueued::Accepted,
        Err(mpsc::error::TrySendError::Full(ids)) => Enqueued::Refused(DownloadFrame::Error {
            id: ids.first().cloned().unwrap_or_default(),
            message: format!("download queue full ({REQUEST_QUEUE} pending), retry later"),
        }),
        Err(mpsc::error::TrySendError::Closed(_)) => Enqueued::Closed,
    }
}

/// One long-lived download channel.
///
/// The reader half routes `request` frames to the streamer task and `ack`
/// frames to its credit gate. The streamer sends one chunk, then blocks for
/// the matching ack before sending the next.
async fn run_media_session(socket: WebSocket, state: Arc<AppState>) {
    let session_id = uuid::Uuid::new_v4().to_string();
    state.media_sessions.fetch_add(1, Ordering::Relaxed);
    info!(session_id = %session_id, "media session opened");

    let (tx, mut rx) = socket.split();
    let outbound = WsFrameSink {
        tx: Arc::new(Mutex::new(tx)),
    };
    let (ack_tx, ack_rx) = mpsc::channel::<Ack>(64);
    let (req_tx, mut req_rx) = mpsc::channel::<Vec<String>>(REQUEST_QUEUE);
    let cancel = CancellationToken::new();

    let ack_timeout = Duration::from_secs(state.config.transfer.ack_timeout_secs);
    let streamer_state = state.clone();
    let streamer_cancel = cancel.clone();
    let mut sink = outbound.clone();
    let streamer = tokio::spawn(async move {
        let mut gate = CreditGate::new(ack_rx, ack_timeout);
        loop {
            let ids = tokio::select! {
                _ = streamer_cancel.cancelled() => break,
                queued = req_rx.recv() => match queued {
                    Some(ids) => ids,
                    None => break,
                },
            };
            let outcome = tokio::select! {
                _ = streamer_cancel.cancelled() => break,
                r = streamer_state.streamer.stream(&ids, &mut sink, &mut gate) => r,
            };
            match outcome {
                Ok(summary) => debug!(
                    delivered = summary.delivered.len(),
                    not_found = summary.not_found.len(),
                    "download batch finished"
                ),
                Err(TransferError::ChannelClosed) => break,
                Err(e) => {
                    warn!(error = %e, "download aborted");
                    let id = match &e {
                        TransferError::AckTimeout { id, .. } => id.clone(),
                        _ => ids.first().cloned().unwrap_or_default(),
                    };
                    let frame = DownloadFrame::Error {
                        id,
                        message: e.to_string(),
                    };
                    if sink.send(frame).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    while let Some(msg) = rx.next().await {
        match msg {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientMediaFrame>(&text) {
                Ok(ClientMediaFrame::Request { ids }) => match enqueue(&req_tx, ids) {
                    Enqueued::Accepted => {}
                    Enqueued::Refused(frame) => {
                        warn!(session_id = %session_id, "download queue full, request refused");
                        let mut reply = outbound.clone();
                        if reply.send(frame).await.is_err() {
                            break;
                        }
                    }
                    Enqueued::Closed => break,
                },
                Ok(ClientMediaFrame::Ack { id, index }) => {
                    if ack_tx.send(Ack { id, index }).await.is_err() {
                        break;
                    }
                }
                Err(e) => warn!(session_id = %session_id, error = %e, "bad media frame"),
            },
            Ok(Message::Close(_)) | Err(_) => break,
            _ => {}
        }
    }

    cancel.cancel();
    let _ = streamer.await;
    state.media_sessions.fetch_sub(1, Ordering::Relaxed);
    info!(session_id = %session_id, "media session closed");
}
