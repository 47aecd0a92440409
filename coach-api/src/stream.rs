//! Observer channel over WebSocket.
//!
//! Each connection registers with the hub (`Connecting`), gets a
//! `connected` frame, is opened, and from then on receives every booking
//! event as a JSON text frame. Nothing the client sends is acted on.

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    response::Response,
};
use coach_core::RunId;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::error::AppError;
use crate::hub::NotificationHub;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamParams {
    /// Limit the stream to one run; all runs when absent.
    pub run_id: Option<String>,
}

/// GET /v1/stream
pub async fn stream_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(params): Query<StreamParams>,
) -> Result<Response, AppError> {
    let filter = params
        .run_id
        .map(|raw| RunId::parse(raw))
        .transpose()
        .map_err(|e| AppError::ValidationError(e.to_string()))?;

    let hub = state.hub.clone();
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, hub, filter)))
}

async fn handle_socket(socket: WebSocket, hub: Arc<NotificationHub>, filter: Option<RunId>) {
    let (mut sender, mut receiver) = socket.split();

    let mut observer = hub.register(filter.clone()).await;
    let observer_id = observer.id();

    let connected = json!({
        "type": "connected",
        "observerId": observer_id,
        "runId": filter,
    });
    if sender.send(Message::Text(connected.to_string().into())).await.is_err() {
        warn!(observer_id = %observer_id, "Failed to send connection confirmation");
        hub.unsubscribe(observer_id).await;
        return;
    }
    hub.open(observer_id).await;

    let mut send_task = tokio::spawn(async move {
        // Ends when the hub drops this observer or the peer stops accepting frames.
        while let Some(event) = observer.recv().await {
            match serde_json::to_string(&*event) {
                Ok(json) => {
                    if sender.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
                Err(e) => error!(?e, "Failed to serialize booking event"),
            }
        }
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(msg) = receiver.next().await {
            match msg {
                Ok(Message::Close(_)) => {
                    debug!("Observer sent close frame");
                    break;
                }
                Ok(Message::Text(_) | Message::Binary(_)) => {
                    debug!("Ignoring message from observer");
                }
                Ok(Message::Ping(_) | Message::Pong(_)) => {}
                Err(e) => {
                    debug!(?e, "Observer receive error");
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    hub.unsubscribe(observer_id).await;
}
