//! Media stream WebSocket
//!
//! Bridges one provider connection to one [`TurnController`]. Text frames
//! are parsed into transport events; outbound messages from the controller
//! and its playback jobs are serialized back onto the socket.

use std::sync::Arc;

use axum::{
    Router,
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
    routing::get,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use super::ApiState;
use crate::call::{SessionEvent, TurnController};
use crate::transport::{InboundEvent, OutboundMessage};

/// Outbound messages buffered ahead of the socket (about one second of audio)
const OUTBOUND_QUEUE_DEPTH: usize = 64;

/// Build media stream router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/media", get(media_upgrade))
        .with_state(state)
}

/// Handle WebSocket upgrade request
async fn media_upgrade(
    State(state): State<Arc<ApiState>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle one media stream connection
async fn handle_socket(socket: WebSocket, state: Arc<ApiState>) {
    let (mut sender, mut receiver) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<OutboundMessage>(OUTBOUND_QUEUE_DEPTH);

    let (controller, events_rx) = TurnController::new(
        state.services.clone(),
        outbound_tx,
        Some(state.registry.clone()),
    );
    let events = controller.events();
    let controller_task = tokio::spawn(controller.run(events_rx));

    tracing::info!("media stream connected");

    // Forward controller output to the socket
    let mut send_task = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            match message.to_json() {
                Ok(text) => {
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Err(e) => tracing::warn!(error = %e, "failed to encode outbound message"),
            }
        }
    });

    // Feed socket input to the controller
    let recv_events = events.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            let event = match msg {
                Message::Text(text) => match InboundEvent::parse(text.as_str()) {
                    Ok(event) => SessionEvent::Transport(event),
                    Err(e) => SessionEvent::Malformed(e.to_string()),
                },
                Message::Binary(data) => {
                    SessionEvent::Malformed(format!("unexpected binary frame ({} bytes)", data.len()))
                }
                Message::Close(_) => {
                    tracing::info!("media stream closed by provider");
                    break;
                }
                Message::Ping(_) | Message::Pong(_) => continue,
            };

            let stopped = matches!(event, SessionEvent::Transport(InboundEvent::Stop { .. }));
            if recv_events.send(event).is_err() || stopped {
                break;
            }
        }
    });

    // Wait for either task to complete
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    let _ = events.send(SessionEvent::Disconnected("media socket closed".to_string()));
    drop(events);

    if let Err(e) = controller_task.await {
        tracing::warn!(error = %e, "turn controller task failed");
    }
}
