use crate::error::AppResult;
use crate::models::account::sort_by_presence_then_name;
use crate::models::{AccountSummary, ChatContact};
use crate::services::conversation_service::ConversationLedger;
use crate::services::presence::PresenceRegistry;
use crate::store::AccountStore;
use crate::websocket::message_types::WsOutboundEvent;
use crate::websocket::{ConnectionId, ConnectionRegistry};
use std::sync::Arc;

pub struct ContactService {
    accounts: Arc<dyn AccountStore>,
    ledger: Arc<ConversationLedger>,
    presence: Arc<PresenceRegistry>,
    connections: ConnectionRegistry,
}

impl ContactService {
    pub fn new(
        accounts: Arc<dyn AccountStore>,
        ledger: Arc<ConversationLedger>,
        presence: Arc<PresenceRegistry>,
        connections: ConnectionRegistry,
    ) -> Self {
        Self {
            accounts,
            ledger,
            presence,
            connections,
        }
    }

    /// Every account except the caller, online first then by username
    pub async fn all_contacts(&self, conn: ConnectionId) -> AppResult<Vec<AccountSummary>> {
        let me = self.presence.require(conn).await?;
        let mut accounts = self.accounts.list_all().await?;
        accounts.retain(|a| a.id != me);
        sort_by_presence_then_name(&mut accounts);

        let contacts: Vec<AccountSummary> = accounts.iter().map(AccountSummary::from).collect();
        self.connections
            .send_to_connection(
                conn,
                &WsOutboundEvent::AllContacts {
                    contacts: contacts.clone(),
                },
            )
            .await;
        Ok(contacts)
    }

    /// Accounts the caller has a conversation with, most recent first
    pub async fn chat_contacts(&self, conn: ConnectionId) -> AppResult<Vec<ChatContact>> {
        let me = self.presence.require(conn).await?;
        let contacts = self.ledger.list_for_account(me).await?;
        self.connections
            .send_to_connection(
                conn,
                &WsOutboundEvent::ChatContacts {
                    contacts: contacts.clone(),
                },
            )
            .await;
        Ok(contacts)
    }
}
