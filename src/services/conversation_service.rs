use crate::error::AppResult;
use crate::models::{AccountSummary, ChatContact, Conversation};
use crate::store::{AccountStore, ConversationStore};
use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

/// Pairwise conversation summaries keyed by canonical hash
pub struct ConversationLedger {
    conversations: Arc<dyn ConversationStore>,
    accounts: Arc<dyn AccountStore>,
}

impl ConversationLedger {
    pub fn new(conversations: Arc<dyn ConversationStore>, accounts: Arc<dyn AccountStore>) -> Self {
        Self {
            conversations,
            accounts,
        }
    }

    /// Record `content` as the latest message between `a` and `b`
    pub async fn upsert(&self, a: Uuid, b: Uuid, content: &str) -> AppResult<Conversation> {
        self.conversations.upsert(a, b, content, Utc::now()).await
    }

    pub async fn find(&self, a: Uuid, b: Uuid) -> AppResult<Option<Conversation>> {
        self.conversations.find(a, b).await
    }

    /// Conversations of an account reduced to the other participant, newest first
    pub async fn list_for_account(&self, account_id: Uuid) -> AppResult<Vec<ChatContact>> {
        let conversations = self.conversations.list_for_account(account_id).await?;
        let mut contacts = Vec::with_capacity(conversations.len());

        for conversation in conversations {
            let Some(other_id) = conversation.other_participant(account_id) else {
                continue;
            };
            match self.accounts.find_by_id(other_id).await? {
                Some(other) => contacts.push(ChatContact {
                    user: AccountSummary::from(&other),
                    last_message: conversation.last_message,
                    last_updated: conversation.last_updated,
                }),
                None => {
                    tracing::warn!(
                        conversation_id = %conversation.id,
                        user_id = %other_id,
                        "conversation references a missing account"
                    );
                }
            }
        }

        Ok(contacts)
    }
}
