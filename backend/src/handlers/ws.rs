//! WebSocket entry point for a call participant.
//!
//! The handshake authorizes through the same join path as the REST endpoint,
//! then attaches the live transport to the connection registry. One task per
//! connection reads inbound frames into the relay; a second pumps the
//! bounded outbound queue into the socket. Disconnecting unregisters the
//! participant and announces `participant_left`, but never changes session
//! status: a transient drop must not destroy session state.

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{stream::SplitSink, SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::{
    models::session::parse_participant_key,
    realtime::protocol::ServerEnvelope,
    state::AppState,
};

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Path((session_id, participant_key)): Path<(String, String)>,
    State(state): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state, session_id, participant_key))
}

async fn handle_socket(
    socket: WebSocket,
    state: AppState,
    session_id: String,
    participant_key: String,
) {
    let (mut sink, mut stream) = socket.split();

    let Some((role, participant_id)) = parse_participant_key(&participant_key) else {
        send_error(&mut sink, "Invalid participant key").await;
        return;
    };

    let sessions = state.session_service();

    // Authorization and state handling are the same as a REST join; the
    // socket only adds the transport.
    if let Err(err) = sessions.join(&session_id, role, participant_id).await {
        send_error(&mut sink, &err.public_message()).await;
        return;
    }

    let (tx, mut rx) = mpsc::channel::<ServerEnvelope>(state.config.outbound_queue_size);
    let key = match sessions
        .attach_connection(&session_id, role, participant_id, tx)
        .await
    {
        Ok(key) => key,
        Err(err) => {
            send_error(&mut sink, &err.public_message()).await;
            return;
        }
    };
    tracing::info!(session_id = %session_id, participant_key = %key, "Participant connected");

    // Outbound pump. It ends when the registry drops our sender (overflow
    // disconnect) or the socket dies.
    let mut pump = tokio::spawn(async move {
        while let Some(envelope) = rx.recv().await {
            let Ok(text) = serde_json::to_string(&envelope) else {
                continue;
            };
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    let relay = state.signaling_relay();
    loop {
        tokio::select! {
            inbound = stream.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        relay.handle_raw(&session_id, &key, text.as_str()).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    // Media never flows here; binary frames are ignored.
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
            _ = &mut pump => break,
        }
    }

    pump.abort();
    if let Err(err) = sessions.detach_connection(&session_id, &key).await {
        tracing::warn!(
            session_id = %session_id,
            participant_key = %key,
            error = ?err,
            "Error while detaching connection"
        );
    }
    tracing::info!(session_id = %session_id, participant_key = %key, "Participant disconnected");
}

async fn send_error(sink: &mut SplitSink<WebSocket, Message>, message: &str) {
    let envelope = ServerEnvelope::Error {
        message: message.to_string(),
    };
    if let Ok(text) = serde_json::to_string(&envelope) {
        let _ = sink.send(Message::Text(text.into())).await;
    }
}
