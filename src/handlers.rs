// handlers.rs

use crate::{docs, metrics::MALFORMED_REQUESTS, models::AppState};
use axum::{
    Json, Router,
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, broadcast::error::RecvError};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;
use uuid::Uuid;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ws", get(handle_client_ws_upgrade))
        .route("/api/control", post(publish_control))
        .merge(SwaggerUi::new("/docs").url("/api-doc/openapi.json", docs::ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Publish a control request for a device.
#[utoipa::path(
    post,
    path = "/api/control",
    request_body = crate::models::ControlRequest,
    responses(
        (status = 202, description = "Request published on the control topic")
    )
)]
pub async fn publish_control(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<serde_json::Value>,
) -> StatusCode {
    state.bus.publish(&state.control_topic, payload);
    StatusCode::ACCEPTED
}

pub async fn handle_client_ws_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> Response {
    let Ok(permit) = Arc::clone(&state.client_slots).try_acquire_owned() else {
        warn!("Client limit reached, refusing connection");
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    };
    info!("Client connection attempt");
    ws.on_upgrade(move |socket| handle_client(socket, state, permit))
}

async fn handle_client(socket: WebSocket, state: Arc<AppState>, _permit: OwnedSemaphorePermit) {
    let (mut sender, mut receiver) = socket.split();
    let client_id = Uuid::new_v4();
    let mut statuses = state.statuses.subscribe();
    info!(%client_id, "Client connected");

    let send_task = tokio::spawn(async move {
        loop {
            match statuses.recv().await {
                Ok(status) => {
                    if sender
                        .send(Message::Text(status.to_string().into()))
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(%client_id, skipped, "Client too slow, statuses skipped");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    let recv_task = tokio::spawn({
        let state = Arc::clone(&state);
        async move {
            while let Some(Ok(msg)) = receiver.next().await {
                match msg {
                    Message::Text(text) => match serde_json::from_str(text.as_str()) {
                        Ok(payload) => state.bus.publish(&state.control_topic, payload),
                        Err(e) => {
                            ::metrics::counter!(MALFORMED_REQUESTS).increment(1);
                            warn!(%client_id, error = %e, "Failed to parse payload JSON");
                        }
                    },
                    Message::Close(_) => break,
                    _ => {}
                }
            }
        }
    });

    tokio::pin!(send_task, recv_task);
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    };

    info!(%client_id, "Client disconnected");
}
