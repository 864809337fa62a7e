use crate::models::{AccountSummary, ChatContact, MessageView, Pagination};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ConnectionId;

pub const DEFAULT_HISTORY_PAGE: u32 = 1;
pub const DEFAULT_HISTORY_LIMIT: u32 = 20;

fn default_page() -> u32 {
    DEFAULT_HISTORY_PAGE
}

fn default_limit() -> u32 {
    DEFAULT_HISTORY_LIMIT
}

/// Inbound WebSocket events from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WsInboundEvent {
    // ============================================================
    // Session & Identity
    // ============================================================
    #[serde(rename = "join")]
    Join { username: String },

    /// Re-attach an identity with a previously issued session token
    #[serde(rename = "resume_session")]
    ResumeSession { token: String },

    #[serde(rename = "register")]
    Register {
        username: String,
        email: String,
        password: String,
    },

    #[serde(rename = "login")]
    Login { email: String, password: String },

    /// `email` enables the lookup-by-code fallback for login challenges
    #[serde(rename = "verify_code")]
    VerifyCode {
        code: String,
        #[serde(default)]
        email: Option<String>,
    },

    #[serde(rename = "disconnect")]
    Disconnect,

    // ============================================================
    // Messaging
    // ============================================================
    #[serde(rename = "send_message")]
    SendMessage { recipient_id: Uuid, content: String },

    #[serde(rename = "load_history")]
    LoadHistory {
        partner_id: Uuid,
        #[serde(default = "default_page")]
        page: u32,
        #[serde(default = "default_limit")]
        limit: u32,
    },

    #[serde(rename = "typing")]
    Typing { recipient_id: Uuid, is_typing: bool },

    #[serde(rename = "message_seen")]
    MessageSeen { message_id: Uuid },

    #[serde(rename = "message_delivered")]
    MessageDelivered { message_id: Uuid },

    // ============================================================
    // Contacts
    // ============================================================
    #[serde(rename = "get_all_contacts")]
    GetAllContacts,

    #[serde(rename = "get_chat_contacts")]
    GetChatContacts,
}

impl WsInboundEvent {
    /// Wire name, used as the `context` of error replies
    pub fn name(&self) -> &'static str {
        match self {
            Self::Join { .. } => "join",
            Self::ResumeSession { .. } => "resume_session",
            Self::Register { .. } => "register",
            Self::Login { .. } => "login",
            Self::VerifyCode { .. } => "verify_code",
            Self::Disconnect => "disconnect",
            Self::SendMessage { .. } => "send_message",
            Self::LoadHistory { .. } => "load_history",
            Self::Typing { .. } => "typing",
            Self::MessageSeen { .. } => "message_seen",
            Self::MessageDelivered { .. } => "message_delivered",
            Self::GetAllContacts => "get_all_contacts",
            Self::GetChatContacts => "get_chat_contacts",
        }
    }
}

/// Outbound WebSocket events from server to client
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum WsOutboundEvent {
    // ============================================================
    // Session & Roster
    // ============================================================
    #[serde(rename = "join_success")]
    JoinSuccess {
        user: AccountSummary,
        users: Vec<AccountSummary>,
    },

    #[serde(rename = "session_resumed")]
    SessionResumed {
        user: AccountSummary,
        users: Vec<AccountSummary>,
    },

    #[serde(rename = "user_joined")]
    UserJoined {
        connection_id: ConnectionId,
        user_id: Uuid,
        username: String,
        timestamp: DateTime<Utc>,
    },

    #[serde(rename = "user_left")]
    UserLeft {
        connection_id: ConnectionId,
        user_id: Uuid,
        username: String,
        timestamp: DateTime<Utc>,
    },

    /// Full online roster; sent to every connection after a presence change
    #[serde(rename = "users_list")]
    UsersList { users: Vec<AccountSummary> },

    #[serde(rename = "new_user_registered")]
    NewUserRegistered { user: AccountSummary },

    // ============================================================
    // Verification
    // ============================================================
    #[serde(rename = "register_success")]
    RegisterSuccess { message: String, email: String },

    #[serde(rename = "login_success")]
    LoginSuccess { message: String, email: String },

    #[serde(rename = "verify_code_success")]
    VerifyCodeSuccess {
        user: AccountSummary,
        token: String,
        users: Vec<AccountSummary>,
    },

    // ============================================================
    // Messaging
    // ============================================================
    #[serde(rename = "receive_message")]
    ReceiveMessage { message: MessageView },

    /// Acknowledgement to the sending connection
    #[serde(rename = "message_sent")]
    MessageSent { message: MessageView },

    #[serde(rename = "chat_history")]
    ChatHistory {
        partner_id: Uuid,
        messages: Vec<MessageView>,
        pagination: Pagination,
    },

    /// Tells a sender that `reader_id` has read their messages
    #[serde(rename = "messages_read")]
    MessagesRead {
        reader_id: Uuid,
        message_ids: Vec<Uuid>,
        read_at: DateTime<Utc>,
    },

    #[serde(rename = "user_typing")]
    UserTyping { sender_id: Uuid, is_typing: bool },

    #[serde(rename = "message_seen_ack")]
    MessageSeenAck {
        message_id: Uuid,
        reader_id: Uuid,
        read_at: DateTime<Utc>,
    },

    #[serde(rename = "message_seen_success")]
    MessageSeenSuccess { message_id: Uuid },

    #[serde(rename = "message_delivered_ack")]
    MessageDeliveredAck {
        message_id: Uuid,
        recipient_id: Uuid,
        delivered_at: DateTime<Utc>,
    },

    #[serde(rename = "message_delivered_success")]
    MessageDeliveredSuccess { message_id: Uuid },

    // ============================================================
    // Contacts
    // ============================================================
    #[serde(rename = "all_contacts")]
    AllContacts { contacts: Vec<AccountSummary> },

    #[serde(rename = "chat_contacts")]
    ChatContacts { contacts: Vec<ChatContact> },

    /// `context` is the wire name of the inbound event that failed
    #[serde(rename = "error")]
    Error {
        context: String,
        kind: String,
        message: String,
    },
}

impl WsOutboundEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::JoinSuccess { .. } => "join_success",
            Self::SessionResumed { .. } => "session_resumed",
            Self::UserJoined { .. } => "user_joined",
            Self::UserLeft { .. } => "user_left",
            Self::UsersList { .. } => "users_list",
            Self::NewUserRegistered { .. } => "new_user_registered",
            Self::RegisterSuccess { .. } => "register_success",
            Self::LoginSuccess { .. } => "login_success",
            Self::VerifyCodeSuccess { .. } => "verify_code_success",
            Self::ReceiveMessage { .. } => "receive_message",
            Self::MessageSent { .. } => "message_sent",
            Self::ChatHistory { .. } => "chat_history",
            Self::MessagesRead { .. } => "messages_read",
            Self::UserTyping { .. } => "user_typing",
            Self::MessageSeenAck { .. } => "message_seen_ack",
            Self::MessageSeenSuccess { .. } => "message_seen_success",
            Self::MessageDeliveredAck { .. } => "message_delivered_ack",
            Self::MessageDeliveredSuccess { .. } => "message_delivered_success",
            Self::AllContacts { .. } => "all_contacts",
            Self::ChatContacts { .. } => "chat_contacts",
            Self::Error { .. } => "error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_inbound_history_defaults() {
        let partner = Uuid::new_v4();
        let raw = json!({ "type": "load_history", "partner_id": partner });
        let event: WsInboundEvent = serde_json::from_value(raw).unwrap();
        match event {
            WsInboundEvent::LoadHistory {
                partner_id,
                page,
                limit,
            } => {
                assert_eq!(partner_id, partner);
                assert_eq!(page, 1);
                assert_eq!(limit, 20);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_unit_variants_parse() {
        let event: WsInboundEvent =
            serde_json::from_str(r#"{"type":"get_chat_contacts"}"#).unwrap();
        assert_eq!(event.name(), "get_chat_contacts");
    }

    #[test]
    fn test_missing_field_is_rejected() {
        let result: Result<WsInboundEvent, _> =
            serde_json::from_str(r#"{"type":"send_message","content":"hi"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_error_event_shape() {
        let event = WsOutboundEvent::Error {
            context: "send_message".into(),
            kind: "not_found".into(),
            message: "recipient not found".into(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "error");
        assert_eq!(value["context"], "send_message");
        assert_eq!(value["kind"], "not_found");
    }
}
