use crate::error::{AppError, AppResult};
use crate::models::{Account, Message, MessageView, Pagination};
use crate::services::conversation_service::ConversationLedger;
use crate::services::presence::PresenceRegistry;
use crate::store::{AccountStore, MessageStore};
use crate::websocket::message_types::WsOutboundEvent;
use crate::websocket::{ConnectionId, ConnectionRegistry};
use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

pub const MAX_HISTORY_LIMIT: u32 = 100;

/// Message persistence plus fan-out to live connections
pub struct MessageService {
    accounts: Arc<dyn AccountStore>,
    messages: Arc<dyn MessageStore>,
    ledger: Arc<ConversationLedger>,
    presence: Arc<PresenceRegistry>,
    connections: ConnectionRegistry,
}

impl MessageService {
    pub fn new(
        accounts: Arc<dyn AccountStore>,
        messages: Arc<dyn MessageStore>,
        ledger: Arc<ConversationLedger>,
        presence: Arc<PresenceRegistry>,
        connections: ConnectionRegistry,
    ) -> Self {
        Self {
            accounts,
            messages,
            ledger,
            presence,
            connections,
        }
    }

    async fn account(&self, id: Uuid, what: &str) -> AppResult<Account> {
        self.accounts
            .find_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound(what.to_string()))
    }

    /// Persist a direct message and deliver it
    ///
    /// The message is stored undelivered/unread, pushed to every connection
    /// of both parties, then recorded on the conversation. A conversation
    /// failure is logged only; the message is already durable.
    pub async fn send(
        &self,
        conn: ConnectionId,
        recipient_id: Uuid,
        content: &str,
    ) -> AppResult<MessageView> {
        if content.trim().is_empty() {
            return Err(AppError::Validation("message content is required".into()));
        }

        let sender_id = self.presence.require(conn).await?;
        let sender = self
            .accounts
            .find_by_id(sender_id)
            .await?
            .ok_or(AppError::SenderUnresolved)?;
        let recipient = self.account(recipient_id, "recipient").await?;

        let message = Message::new(sender.id, recipient.id, content.to_string(), Utc::now());
        self.messages.insert(&message).await?;

        let view = MessageView::new(&message, &sender.username, &recipient.username);
        let delivery = WsOutboundEvent::ReceiveMessage {
            message: view.clone(),
        };
        self.connections.send_to_account(recipient.id, &delivery).await;
        if sender.id != recipient.id {
            self.connections.send_to_account(sender.id, &delivery).await;
        }

        if let Err(e) = self.ledger.upsert(sender.id, recipient.id, content).await {
            tracing::error!(
                message_id = %message.id,
                sender_id = %sender.id,
                recipient_id = %recipient.id,
                error = %e,
                "failed to update conversation after send"
            );
        }

        self.connections
            .send_to_connection(
                conn,
                &WsOutboundEvent::MessageSent {
                    message: view.clone(),
                },
            )
            .await;

        tracing::debug!(message_id = %message.id, sender_id = %sender.id, "message delivered");
        Ok(view)
    }

    /// One page of the conversation with `partner_id`, oldest first
    ///
    /// Afterwards every unread message from the partner is marked read and
    /// the partner is told so.
    pub async fn load_history(
        &self,
        conn: ConnectionId,
        partner_id: Uuid,
        page: u32,
        limit: u32,
    ) -> AppResult<(Vec<MessageView>, Pagination)> {
        if page == 0 {
            return Err(AppError::Validation("page must be at least 1".into()));
        }
        if limit == 0 || limit > MAX_HISTORY_LIMIT {
            return Err(AppError::Validation(format!(
                "limit must be between 1 and {MAX_HISTORY_LIMIT}"
            )));
        }

        let me = self.presence.require(conn).await?;
        let me_account = self.account(me, "user").await?;
        let partner = self.account(partner_id, "partner").await?;

        let total = self.messages.count_between(me, partner.id).await?;
        let pagination = Pagination::new(page, limit, total);
        let mut rows = self
            .messages
            .page_between(me, partner.id, pagination.offset(), limit)
            .await?;
        rows.reverse();

        let views: Vec<MessageView> = rows
            .iter()
            .map(|m| {
                let (sender, recipient) = if m.sender_id == me {
                    (&me_account.username, &partner.username)
                } else {
                    (&partner.username, &me_account.username)
                };
                MessageView::new(m, sender, recipient)
            })
            .collect();

        self.connections
            .send_to_connection(
                conn,
                &WsOutboundEvent::ChatHistory {
                    partner_id: partner.id,
                    messages: views.clone(),
                    pagination: pagination.clone(),
                },
            )
            .await;

        let now = Utc::now();
        let read_ids = self.messages.mark_read_from(partner.id, me, now).await?;
        if !read_ids.is_empty() {
            self.connections
                .send_to_account(
                    partner.id,
                    &WsOutboundEvent::MessagesRead {
                        reader_id: me,
                        message_ids: read_ids,
                        read_at: now,
                    },
                )
                .await;
        }

        Ok((views, pagination))
    }

    /// Mark a message read; only its recipient may do so
    pub async fn mark_read(&self, conn: ConnectionId, message_id: Uuid) -> AppResult<Message> {
        let me = self.presence.require(conn).await?;
        let message = self
            .messages
            .find_by_id(message_id)
            .await?
            .ok_or_else(|| AppError::NotFound("message".into()))?;
        if message.recipient_id != me {
            return Err(AppError::Conflict(
                "only the recipient can mark a message as read".into(),
            ));
        }

        let updated = self
            .messages
            .mark_read(message_id, Utc::now())
            .await?
            .ok_or_else(|| AppError::NotFound("message".into()))?;
        let read_at = updated.read_at.unwrap_or_else(Utc::now);

        self.connections
            .send_to_account(
                updated.sender_id,
                &WsOutboundEvent::MessageSeenAck {
                    message_id,
                    reader_id: me,
                    read_at,
                },
            )
            .await;
        self.connections
            .send_to_connection(conn, &WsOutboundEvent::MessageSeenSuccess { message_id })
            .await;

        Ok(updated)
    }

    /// Mark a message delivered; only its recipient may do so
    pub async fn mark_delivered(&self, conn: ConnectionId, message_id: Uuid) -> AppResult<Message> {
        let me = self.presence.require(conn).await?;
        let message = self
            .messages
            .find_by_id(message_id)
            .await?
            .ok_or_else(|| AppError::NotFound("message".into()))?;
        if message.recipient_id != me {
            return Err(AppError::Conflict(
                "only the recipient can mark a message as delivered".into(),
            ));
        }

        let updated = self
            .messages
            .mark_delivered(message_id, Utc::now())
            .await?
            .ok_or_else(|| AppError::NotFound("message".into()))?;
        let delivered_at = updated.delivered_at.unwrap_or_else(Utc::now);

        self.connections
            .send_to_account(
                updated.sender_id,
                &WsOutboundEvent::MessageDeliveredAck {
                    message_id,
                    recipient_id: me,
                    delivered_at,
                },
            )
            .await;
        self.connections
            .send_to_connection(conn, &WsOutboundEvent::MessageDeliveredSuccess { message_id })
            .await;

        Ok(updated)
    }
}
