use super::{AccountStore, ConversationStore, MessageStore};
use crate::error::{AppError, AppResult};
use crate::models::{canonical_hash, Account, Conversation, Message, NewAccount, OtpChallenge};
use crate::websocket::ConnectionId;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::Pool;
use tokio_postgres::error::SqlState;
use tokio_postgres::Row;
use uuid::Uuid;

const ACCOUNT_COLUMNS: &str = "id, username, email, password_hash, provider_id, is_online, \
     last_seen, otp_code, otp_expires_at, otp_connection_id, connection_id, created_at";

const MESSAGE_COLUMNS: &str =
    "id, sender_id, recipient_id, content, delivered, delivered_at, read, read_at, created_at";

const CONVERSATION_COLUMNS: &str =
    "id, conversation_hash, participant_a, participant_b, last_message, last_updated, created_at";

/// PostgreSQL-backed store
pub struct PgStore {
    db: Pool,
}

impl PgStore {
    pub fn new(db: Pool) -> Self {
        Self { db }
    }

    async fn account_where(
        &self,
        clause: &str,
        param: &(dyn tokio_postgres::types::ToSql + Sync),
    ) -> AppResult<Option<Account>> {
        let client = self.db.get().await?;
        let sql = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE {clause} LIMIT 1");
        let row = client.query_opt(sql.as_str(), &[param]).await?;
        Ok(row.as_ref().map(account_from_row))
    }
}

fn account_from_row(row: &Row) -> Account {
    let otp_code: Option<String> = row.get("otp_code");
    let otp_expires_at: Option<DateTime<Utc>> = row.get("otp_expires_at");
    let otp_connection_id: Option<Uuid> = row.get("otp_connection_id");
    let login_challenge = match (otp_code, otp_expires_at, otp_connection_id) {
        (Some(code), Some(expires_at), Some(conn)) => Some(OtpChallenge {
            code,
            expires_at,
            requested_by: ConnectionId::from_uuid(conn),
        }),
        _ => None,
    };
    let connection_id: Option<Uuid> = row.get("connection_id");

    Account {
        id: row.get("id"),
        username: row.get("username"),
        email: row.get("email"),
        password_hash: row.get("password_hash"),
        provider_id: row.get("provider_id"),
        is_online: row.get("is_online"),
        last_seen: row.get("last_seen"),
        login_challenge,
        connection_id: connection_id.map(ConnectionId::from_uuid),
        created_at: row.get("created_at"),
    }
}

fn message_from_row(row: &Row) -> Message {
    Message {
        id: row.get("id"),
        sender_id: row.get("sender_id"),
        recipient_id: row.get("recipient_id"),
        content: row.get("content"),
        delivered: row.get("delivered"),
        delivered_at: row.get("delivered_at"),
        read: row.get("read"),
        read_at: row.get("read_at"),
        created_at: row.get("created_at"),
    }
}

fn conversation_from_row(row: &Row) -> Conversation {
    Conversation {
        id: row.get("id"),
        conversation_hash: row.get("conversation_hash"),
        participants: [row.get("participant_a"), row.get("participant_b")],
        last_message: row.get("last_message"),
        last_updated: row.get("last_updated"),
        created_at: row.get("created_at"),
    }
}

fn map_unique_violation(e: tokio_postgres::Error) -> AppError {
    if e.code() != Some(&SqlState::UNIQUE_VIOLATION) {
        return e.into();
    }
    let constraint = e.as_db_error().and_then(|db| db.constraint());
    match constraint {
        Some("accounts_username_key") => AppError::Conflict("username already taken".into()),
        Some("accounts_email_key") => AppError::Conflict("email already registered".into()),
        _ => AppError::Conflict("account already exists".into()),
    }
}

#[async_trait]
impl AccountStore for PgStore {
    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<Account>> {
        self.account_where("id = $1", &id).await
    }

    async fn find_by_username(&self, username: &str) -> AppResult<Option<Account>> {
        self.account_where("username = $1", &username).await
    }

    async fn find_by_email(&self, email: &str) -> AppResult<Option<Account>> {
        self.account_where("email = $1", &email).await
    }

    async fn find_by_challenge_connection(
        &self,
        conn: ConnectionId,
    ) -> AppResult<Option<Account>> {
        let conn = conn.as_uuid();
        self.account_where("otp_connection_id = $1 AND otp_code IS NOT NULL", &conn)
            .await
    }

    async fn create(&self, new: NewAccount) -> AppResult<Account> {
        let client = self.db.get().await?;
        let sql = format!(
            "INSERT INTO accounts (id, username, email, password_hash, provider_id) \
             VALUES ($1, $2, $3, $4, $5) RETURNING {ACCOUNT_COLUMNS}"
        );
        let row = client
            .query_one(
                sql.as_str(),
                &[
                    &Uuid::new_v4(),
                    &new.username,
                    &new.email,
                    &new.password_hash,
                    &new.provider_id,
                ],
            )
            .await
            .map_err(map_unique_violation)?;
        Ok(account_from_row(&row))
    }

    async fn set_presence(
        &self,
        id: Uuid,
        is_online: bool,
        connection_id: Option<ConnectionId>,
        last_seen: DateTime<Utc>,
    ) -> AppResult<()> {
        let client = self.db.get().await?;
        let conn = connection_id.map(|c| c.as_uuid());
        let updated = client
            .execute(
                "UPDATE accounts SET is_online = $2, connection_id = $3, last_seen = $4 \
                 WHERE id = $1",
                &[&id, &is_online, &conn, &last_seen],
            )
            .await?;
        if updated == 0 {
            return Err(AppError::NotFound("account".into()));
        }
        Ok(())
    }

    async fn set_login_challenge(
        &self,
        id: Uuid,
        challenge: Option<OtpChallenge>,
    ) -> AppResult<()> {
        let client = self.db.get().await?;
        let code = challenge.as_ref().map(|c| c.code.clone());
        let expires_at = challenge.as_ref().map(|c| c.expires_at);
        let conn = challenge.as_ref().map(|c| c.requested_by.as_uuid());
        let updated = client
            .execute(
                "UPDATE accounts SET otp_code = $2, otp_expires_at = $3, otp_connection_id = $4 \
                 WHERE id = $1",
                &[&id, &code, &expires_at, &conn],
            )
            .await?;
        if updated == 0 {
            return Err(AppError::NotFound("account".into()));
        }
        Ok(())
    }

    async fn take_login_challenge(
        &self,
        id: Uuid,
        code: &str,
    ) -> AppResult<Option<OtpChallenge>> {
        let client = self.db.get().await?;
        // The row lock makes concurrent takes of the same code see the cleared row
        let row = client
            .query_opt(
                "UPDATE accounts a \
                 SET otp_code = NULL, otp_expires_at = NULL, otp_connection_id = NULL \
                 FROM (SELECT id, otp_code, otp_expires_at, otp_connection_id FROM accounts \
                       WHERE id = $1 AND otp_code = $2 FOR UPDATE) old \
                 WHERE a.id = old.id \
                 RETURNING old.otp_code, old.otp_expires_at, old.otp_connection_id",
                &[&id, &code],
            )
            .await?;

        Ok(row.and_then(|row| {
            let code: Option<String> = row.get("otp_code");
            let expires_at: Option<DateTime<Utc>> = row.get("otp_expires_at");
            let conn: Option<Uuid> = row.get("otp_connection_id");
            match (code, expires_at, conn) {
                (Some(code), Some(expires_at), Some(conn)) => Some(OtpChallenge {
                    code,
                    expires_at,
                    requested_by: ConnectionId::from_uuid(conn),
                }),
                _ => None,
            }
        }))
    }

    async fn list_online(&self) -> AppResult<Vec<Account>> {
        let client = self.db.get().await?;
        let sql = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE is_online");
        let rows = client.query(sql.as_str(), &[]).await?;
        Ok(rows.iter().map(account_from_row).collect())
    }

    async fn list_all(&self) -> AppResult<Vec<Account>> {
        let client = self.db.get().await?;
        let sql = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts");
        let rows = client.query(sql.as_str(), &[]).await?;
        Ok(rows.iter().map(account_from_row).collect())
    }

    async fn reset_presence(&self, now: DateTime<Utc>) -> AppResult<u64> {
        let client = self.db.get().await?;
        let changed = client
            .execute(
                "UPDATE accounts SET is_online = FALSE, connection_id = NULL, last_seen = $1 \
                 WHERE is_online",
                &[&now],
            )
            .await?;
        Ok(changed)
    }
}

#[async_trait]
impl MessageStore for PgStore {
    async fn insert(&self, message: &Message) -> AppResult<()> {
        let client = self.db.get().await?;
        client
            .execute(
                "INSERT INTO messages (id, sender_id, recipient_id, content, delivered, read, created_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7)",
                &[
                    &message.id,
                    &message.sender_id,
                    &message.recipient_id,
                    &message.content,
                    &message.delivered,
                    &message.read,
                    &message.created_at,
                ],
            )
            .await?;
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<Message>> {
        let client = self.db.get().await?;
        let sql = format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = $1");
        let row = client.query_opt(sql.as_str(), &[&id]).await?;
        Ok(row.as_ref().map(message_from_row))
    }

    async fn count_between(&self, a: Uuid, b: Uuid) -> AppResult<u64> {
        let client = self.db.get().await?;
        let row = client
            .query_one(
                "SELECT COUNT(*) FROM messages \
                 WHERE (sender_id = $1 AND recipient_id = $2) \
                    OR (sender_id = $2 AND recipient_id = $1)",
                &[&a, &b],
            )
            .await?;
        let count: i64 = row.get(0);
        Ok(count.max(0) as u64)
    }

    async fn page_between(
        &self,
        a: Uuid,
        b: Uuid,
        offset: u64,
        limit: u32,
    ) -> AppResult<Vec<Message>> {
        let client = self.db.get().await?;
        let sql = format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages \
             WHERE (sender_id = $1 AND recipient_id = $2) \
                OR (sender_id = $2 AND recipient_id = $1) \
             ORDER BY created_at DESC, id DESC \
             LIMIT $3 OFFSET $4"
        );
        let limit = i64::from(limit);
        let offset = i64::try_from(offset).unwrap_or(i64::MAX);
        let rows = client
            .query(sql.as_str(), &[&a, &b, &limit, &offset])
            .await?;
        Ok(rows.iter().map(message_from_row).collect())
    }

    async fn mark_read(&self, id: Uuid, now: DateTime<Utc>) -> AppResult<Option<Message>> {
        let client = self.db.get().await?;
        let sql = format!(
            "UPDATE messages SET read = TRUE, read_at = COALESCE(read_at, $2) \
             WHERE id = $1 RETURNING {MESSAGE_COLUMNS}"
        );
        let row = client.query_opt(sql.as_str(), &[&id, &now]).await?;
        Ok(row.as_ref().map(message_from_row))
    }

    async fn mark_delivered(&self, id: Uuid, now: DateTime<Utc>) -> AppResult<Option<Message>> {
        let client = self.db.get().await?;
        let sql = format!(
            "UPDATE messages SET delivered = TRUE, delivered_at = COALESCE(delivered_at, $2) \
             WHERE id = $1 RETURNING {MESSAGE_COLUMNS}"
        );
        let row = client.query_opt(sql.as_str(), &[&id, &now]).await?;
        Ok(row.as_ref().map(message_from_row))
    }

    async fn mark_read_from(
        &self,
        sender: Uuid,
        recipient: Uuid,
        now: DateTime<Utc>,
    ) -> AppResult<Vec<Uuid>> {
        let client = self.db.get().await?;
        let rows = client
            .query(
                "UPDATE messages SET read = TRUE, read_at = $3 \
                 WHERE sender_id = $1 AND recipient_id = $2 AND NOT read \
                 RETURNING id",
                &[&sender, &recipient, &now],
            )
            .await?;
        Ok(rows.iter().map(|r| r.get(0)).collect())
    }
}

#[async_trait]
impl ConversationStore for PgStore {
    async fn upsert(
        &self,
        a: Uuid,
        b: Uuid,
        last_message: &str,
        now: DateTime<Utc>,
    ) -> AppResult<Conversation> {
        let seed = Conversation::new(a, b, last_message.to_string(), now);
        let client = self.db.get().await?;
        let sql = format!(
            "INSERT INTO conversations \
                 (id, conversation_hash, participant_a, participant_b, last_message, last_updated, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $6) \
             ON CONFLICT (conversation_hash) \
             DO UPDATE SET last_message = EXCLUDED.last_message, \
                           last_updated = EXCLUDED.last_updated \
             RETURNING {CONVERSATION_COLUMNS}"
        );
        let row = client
            .query_one(
                sql.as_str(),
                &[
                    &seed.id,
                    &seed.conversation_hash,
                    &seed.participants[0],
                    &seed.participants[1],
                    &seed.last_message,
                    &now,
                ],
            )
            .await?;
        Ok(conversation_from_row(&row))
    }

    async fn find(&self, a: Uuid, b: Uuid) -> AppResult<Option<Conversation>> {
        let client = self.db.get().await?;
        let sql =
            format!("SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE conversation_hash = $1");
        let row = client
            .query_opt(sql.as_str(), &[&canonical_hash(a, b)])
            .await?;
        Ok(row.as_ref().map(conversation_from_row))
    }

    async fn list_for_account(&self, account_id: Uuid) -> AppResult<Vec<Conversation>> {
        let client = self.db.get().await?;
        let sql = format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations \
             WHERE participant_a = $1 OR participant_b = $1 \
             ORDER BY last_updated DESC"
        );
        let rows = client.query(sql.as_str(), &[&account_id]).await?;
        Ok(rows.iter().map(conversation_from_row).collect())
    }
}
