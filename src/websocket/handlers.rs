//! Inbound event routing and connection lifecycle
//!
//! Every handler failure is turned into an `error` event for the originating
//! connection; nothing propagates out of `dispatch`.

use crate::error::{AppError, AppResult};
use crate::state::AppState;
use crate::websocket::message_types::{WsInboundEvent, WsOutboundEvent};
use crate::websocket::ConnectionId;
use tokio::sync::mpsc::UnboundedReceiver;

/// Context reported when a frame is too malformed to name its type
const UNKNOWN_CONTEXT: &str = "unknown";

/// Register a freshly accepted socket; frames for it arrive on the receiver
pub async fn connection_opened(state: &AppState, conn: ConnectionId) -> UnboundedReceiver<String> {
    let rx = state.connections.register(conn).await;
    tracing::info!(connection_id = %conn, "connection opened");
    rx
}

/// Tear down everything tied to a closed socket
///
/// The registry entry goes first so a bind still in flight sees the
/// connection as closed and reverts itself.
pub async fn connection_closed(state: &AppState, conn: ConnectionId) {
    state.connections.deregister(conn).await;
    state.presence.unbind(conn).await;
    state.auth.release_connection(conn).await;
    tracing::info!(connection_id = %conn, "connection closed");
}

/// Parse and dispatch one text frame
pub async fn handle_text_frame(state: &AppState, conn: ConnectionId, text: &str) {
    match serde_json::from_str::<WsInboundEvent>(text) {
        Ok(event) => dispatch(state, conn, event).await,
        Err(e) => {
            let context = frame_type(text).unwrap_or_else(|| UNKNOWN_CONTEXT.to_string());
            tracing::warn!(connection_id = %conn, context = %context, error = %e, "failed to parse WS message");
            report(state, conn, &context, &AppError::from(e)).await;
        }
    }
}

fn frame_type(text: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(text).ok()?;
    value.get("type")?.as_str().map(str::to_string)
}

pub async fn dispatch(state: &AppState, conn: ConnectionId, event: WsInboundEvent) {
    let context = event.name();
    if let Err(e) = route(state, conn, event).await {
        report(state, conn, context, &e).await;
    }
}

async fn route(state: &AppState, conn: ConnectionId, event: WsInboundEvent) -> AppResult<()> {
    match event {
        WsInboundEvent::Join { username } => {
            state.auth.join(conn, &username).await?;
        }
        WsInboundEvent::ResumeSession { token } => {
            state.auth.resume_session(conn, &token).await?;
        }
        WsInboundEvent::Register {
            username,
            email,
            password,
        } => {
            state.auth.register(conn, &username, &email, &password).await?;
        }
        WsInboundEvent::Login { email, password } => {
            state.auth.login(conn, &email, &password).await?;
        }
        WsInboundEvent::VerifyCode { code, email } => {
            state.auth.verify_code(conn, &code, email.as_deref()).await?;
        }
        WsInboundEvent::Disconnect => {
            state.presence.unbind(conn).await;
        }
        WsInboundEvent::SendMessage {
            recipient_id,
            content,
        } => {
            state.messages.send(conn, recipient_id, &content).await?;
        }
        WsInboundEvent::LoadHistory {
            partner_id,
            page,
            limit,
        } => {
            state
                .messages
                .load_history(conn, partner_id, page, limit)
                .await?;
        }
        WsInboundEvent::Typing {
            recipient_id,
            is_typing,
        } => {
            let sender_id = state.presence.require(conn).await?;
            state
                .typing
                .set_typing(sender_id, recipient_id, is_typing)
                .await;
        }
        WsInboundEvent::MessageSeen { message_id } => {
            state.messages.mark_read(conn, message_id).await?;
        }
        WsInboundEvent::MessageDelivered { message_id } => {
            state.messages.mark_delivered(conn, message_id).await?;
        }
        WsInboundEvent::GetAllContacts => {
            state.contacts.all_contacts(conn).await?;
        }
        WsInboundEvent::GetChatContacts => {
            state.contacts.chat_contacts(conn).await?;
        }
    }
    Ok(())
}

async fn report(state: &AppState, conn: ConnectionId, context: &str, err: &AppError) {
    if err.is_server_fault() {
        tracing::error!(
            connection_id = %conn,
            context,
            retryable = err.is_retryable(),
            error = %err,
            "event handler failed"
        );
    } else {
        tracing::debug!(connection_id = %conn, context, error = %err, "event rejected");
    }

    state
        .connections
        .send_to_connection(
            conn,
            &WsOutboundEvent::Error {
                context: context.to_string(),
                kind: err.kind().to_string(),
                message: err.client_message(),
            },
        )
        .await;
}
