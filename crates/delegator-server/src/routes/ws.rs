//! `/api/v1/ws` — broadcasts [`Event`]s to connected clients as JSON frames,
//! with a periodic heartbeat and a ping/pong echo (§4.7).

use axum::Router;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use tracing::warn;

use crate::broadcaster::Event;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/ws", get(upgrade))
}

async fn upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| async move {
        if let Err(err) = handle_socket(socket, state).await {
            warn!(%err, "websocket connection closed");
        }
    })
}

async fn handle_socket(mut socket: WebSocket, state: crate::state::AppState) -> anyhow::Result<()> {
    let mut events = state.broadcaster.subscribe();
    let mut heartbeat = tokio::time::interval(state.config.heartbeat_interval);
    heartbeat.tick().await; // first tick fires immediately; discard it

    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Ok(event) => {
                        let payload = serde_json::to_string(&event)?;
                        if socket.send(Message::Text(payload.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "websocket client lagged, dropping missed events");
                        continue;
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
            _ = heartbeat.tick() => {
                let payload = serde_json::to_string(&Event::Heartbeat)?;
                if socket.send(Message::Text(payload.into())).await.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        if text.trim() == r#"{"type":"ping"}"# {
                            let _ = socket.send(Message::Text(r#"{"type":"pong"}"#.into())).await;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        warn!(%err, "error reading websocket frame");
                        break;
                    }
                }
            }
        }
    }

    Ok(())
}
