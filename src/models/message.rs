use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Direct message record
///
/// Content and parties are immutable; `delivered` and `read` only move
/// from false to true and keep the timestamp of the first transition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub id: Uuid,
    pub sender_id: Uuid,
    pub recipient_id: Uuid,
    pub content: String,
    pub delivered: bool,
    pub delivered_at: Option<DateTime<Utc>>,
    pub read: bool,
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn new(sender_id: Uuid, recipient_id: Uuid, content: String, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            sender_id,
            recipient_id,
            content,
            delivered: false,
            delivered_at: None,
            read: false,
            read_at: None,
            created_at: now,
        }
    }

    /// Returns false when the flag was already set
    pub fn mark_delivered(&mut self, now: DateTime<Utc>) -> bool {
        if self.delivered {
            return false;
        }
        self.delivered = true;
        self.delivered_at = Some(now);
        true
    }

    /// Returns false when the flag was already set
    pub fn mark_read(&mut self, now: DateTime<Utc>) -> bool {
        if self.read {
            return false;
        }
        self.read = true;
        self.read_at = Some(now);
        true
    }

    pub fn is_between(&self, a: Uuid, b: Uuid) -> bool {
        (self.sender_id == a && self.recipient_id == b)
            || (self.sender_id == b && self.recipient_id == a)
    }
}

/// Message as delivered to clients, with party usernames resolved
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageView {
    pub id: Uuid,
    pub sender_id: Uuid,
    pub sender: String,
    pub recipient_id: Uuid,
    pub recipient: String,
    pub content: String,
    pub delivered: bool,
    pub delivered_at: Option<DateTime<Utc>>,
    pub read: bool,
    pub read_at: Option<DateTime<Utc>>,
    pub timestamp: DateTime<Utc>,
}

impl MessageView {
    pub fn new(message: &Message, sender: &str, recipient: &str) -> Self {
        Self {
            id: message.id,
            sender_id: message.sender_id,
            sender: sender.to_string(),
            recipient_id: message.recipient_id,
            recipient: recipient.to_string(),
            content: message.content.clone(),
            delivered: message.delivered,
            delivered_at: message.delivered_at,
            read: message.read,
            read_at: message.read_at,
            timestamp: message.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
    pub total_messages: u64,
    pub total_pages: u64,
}

impl Pagination {
    pub fn new(page: u32, limit: u32, total_messages: u64) -> Self {
        let total_pages = if limit == 0 {
            0
        } else {
            total_messages.div_ceil(u64::from(limit))
        };
        Self {
            page,
            limit,
            total_messages,
            total_pages,
        }
    }

    /// Rows to skip for this page (pages are 1-based)
    pub fn offset(&self) -> u64 {
        u64::from(self.page.saturating_sub(1)) * u64::from(self.limit)
    }
}
