//! The per-connection real-time channel: events out, control messages in.

use crate::control::ControlMessage;
use crate::event::EventKind;
use crate::session::Session;
use crate::web::api::AppState;
use axum::{
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct SocketQuery {
    session: Option<String>,
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<SocketQuery>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state, query.session))
}

async fn handle_socket(socket: WebSocket, state: AppState, session_id: Option<String>) {
    let session = state.open(session_id).await;
    let (subscriber, mut events) = session.model().lock().await.events_mut().subscribe();
    tracing::info!("Client {} joined session {}", subscriber, session.id());

    let (mut sender, mut receiver) = socket.split();
    let mut send_task = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            if sender.send(Message::Text(event.to_json().into())).await.is_err() {
                break;
            }
        }
    });

    let inbound = session.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(message)) = receiver.next().await {
            match message {
                Message::Text(text) => on_text(&inbound, text.as_str()).await,
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    let remaining = {
        let mut model = session.model().lock().await;
        model.events_mut().unsubscribe(subscriber);
        model.events().subscriber_count()
    };
    tracing::info!("Client {} left session {}", subscriber, session.id());
    if remaining == 0 {
        state.teardown(session.id()).await;
    }
}

async fn on_text(session: &Arc<Session>, text: &str) {
    match serde_json::from_str::<ControlMessage>(text) {
        Ok(message) => session.handle_control(message).await,
        Err(e) => {
            tracing::debug!("Rejected control message: {}", e);
            session
                .model()
                .lock()
                .await
                .emit("", EventKind::error(format!("Invalid message: {e}")));
        }
    }
}
