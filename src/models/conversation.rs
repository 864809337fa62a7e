use crate::models::AccountSummary;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const HASH_SEPARATOR: char = '_';

/// Order-independent key for the conversation between two accounts
pub fn canonical_hash(a: Uuid, b: Uuid) -> String {
    let (first, second) = if a.to_string() <= b.to_string() {
        (a, b)
    } else {
        (b, a)
    };
    format!("{first}{HASH_SEPARATOR}{second}")
}

/// Pairwise conversation summary
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Conversation {
    pub id: Uuid,
    pub conversation_hash: String,
    /// Stored in canonical (sorted) order
    pub participants: [Uuid; 2],
    pub last_message: String,
    pub last_updated: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Conversation {
    pub fn new(a: Uuid, b: Uuid, last_message: String, now: DateTime<Utc>) -> Self {
        let hash = canonical_hash(a, b);
        let participants = if a.to_string() <= b.to_string() {
            [a, b]
        } else {
            [b, a]
        };
        Self {
            id: Uuid::new_v4(),
            conversation_hash: hash,
            participants,
            last_message,
            last_updated: now,
            created_at: now,
        }
    }

    pub fn involves(&self, account_id: Uuid) -> bool {
        self.participants.contains(&account_id)
    }

    /// The participant that is not `me`
    pub fn other_participant(&self, me: Uuid) -> Option<Uuid> {
        match self.participants {
            [a, b] if a == me => Some(b),
            [a, b] if b == me => Some(a),
            _ => None,
        }
    }
}

/// A conversation seen from one participant's side
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatContact {
    pub user: AccountSummary,
    pub last_message: String,
    pub last_updated: DateTime<Utc>,
}
