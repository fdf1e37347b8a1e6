use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use osprey_core::error::CoreError;
use osprey_core::types::Seq;
use osprey_notify::hub::SubscriptionStream;
use osprey_notify::NotifyHub;
use serde::Deserialize;

use crate::auth::jwt::validate_token;
use crate::error::{AppError, AppResult};
use crate::state::AppState;

/// Interval between heartbeat pings on an event stream.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Query parameters for `GET /api/v1/events/subscribe`.
#[derive(Debug, Deserialize)]
pub struct SubscribeParams {
    /// Comma-separated channel names; defaults to `jobs`.
    pub channels: Option<String>,
    /// Resume after this sequence. `Last-Event-ID` is the header form.
    pub resume_from: Option<Seq>,
    /// Bearer token fallback for clients that cannot set headers on a
    /// WebSocket handshake.
    pub token: Option<String>,
}

/// GET /api/v1/events/subscribe
///
/// Authenticates, opens the hub subscription (replay included), and only
/// then upgrades. A resume older than the replay window is a 410 before
/// any upgrade happens.
pub async fn events_subscribe(
    ws: WebSocketUpgrade,
    Query(params): Query<SubscribeParams>,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> AppResult<impl IntoResponse> {
    let claims = authenticate(&state, &headers, params.token.as_deref())?;

    let channels: Vec<String> = params
        .channels
        .as_deref()
        .unwrap_or(osprey_notify::event::CHANNEL_JOBS)
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();

    let resume_from = params.resume_from.or_else(|| {
        headers
            .get("last-event-id")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
    });

    let client_id = format!("user-{}", claims.sub);
    let stream = state
        .hub
        .subscribe(&client_id, channels, resume_from)
        .await?;

    tracing::info!(
        client_id = %client_id,
        subscription_id = %stream.id(),
        resume_from,
        "Event subscription opened",
    );

    let hub = Arc::clone(&state.hub);
    Ok(ws.on_upgrade(move |socket| drive_socket(socket, hub, stream)))
}

/// Validate the bearer token from the `Authorization` header or the
/// `token` query parameter.
fn authenticate(
    state: &AppState,
    headers: &HeaderMap,
    query_token: Option<&str>,
) -> Result<crate::auth::jwt::Claims, AppError> {
    let header_token = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    let token = header_token.or(query_token).ok_or_else(|| {
        AppError::Core(CoreError::Unauthorized("Missing bearer token".into()))
    })?;

    validate_token(token, &state.config.jwt)
        .map_err(|_| AppError::Core(CoreError::Unauthorized("Invalid or expired token".into())))
}

/// Pump events to the socket until either side disconnects.
///
/// The hub pushes into this subscription's bounded queue; this task is the
/// dedicated drain. When the hub drops the subscription (slow consumer or
/// shutdown) the stream ends and the socket is closed.
async fn drive_socket(socket: WebSocket, hub: Arc<NotifyHub>, mut stream: SubscriptionStream) {
    let subscription_id = stream.id();
    let (mut sink, mut inbound) = socket.split();
    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);

    loop {
        tokio::select! {
            event = stream.next() => {
                match event {
                    Some(event) => {
                        let json = serde_json::to_string(&event)
                            .expect("ChangeEvent is always serialisable");
                        if sink.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                    None => {
                        // Hub dropped us; tell the client and stop.
                        let _ = sink.send(Message::Close(None)).await;
                        break;
                    }
                }
            }
            _ = heartbeat.tick() => {
                if sink.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }
            msg = inbound.next() => {
                match msg {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(Message::Pong(_))) => {
                        tracing::trace!(subscription_id = %subscription_id, "Pong received");
                    }
                    Some(Ok(_)) => {
                        // Inbound data frames are not part of the protocol.
                    }
                }
            }
        }
    }

    hub.unsubscribe(subscription_id).await;
    tracing::info!(subscription_id = %subscription_id, "Event subscription closed");
}
