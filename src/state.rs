use crate::{
    config::Config,
    error::AppResult,
    services::{
        AuthService, CodeDispatcher, ContactService, ConversationLedger, EmailService,
        MessageService, PendingVerificationStore, PresenceRegistry, TypingDebouncer,
    },
    store::Stores,
    websocket::ConnectionRegistry,
};
use crypto_core::jwt::SessionKeys;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub stores: Stores,
    pub connections: ConnectionRegistry,
    pub presence: Arc<PresenceRegistry>,
    pub typing: Arc<TypingDebouncer>,
    pub pending: Arc<PendingVerificationStore>,
    pub ledger: Arc<ConversationLedger>,
    pub messages: Arc<MessageService>,
    pub auth: Arc<AuthService>,
    pub contacts: Arc<ContactService>,
}

impl AppState {
    /// Wire every service over the given stores and code dispatcher
    pub fn new(config: Arc<Config>, stores: Stores, dispatcher: Arc<dyn CodeDispatcher>) -> Self {
        let connections = ConnectionRegistry::new();
        let presence = Arc::new(PresenceRegistry::new(
            stores.accounts.clone(),
            connections.clone(),
        ));
        let typing = Arc::new(TypingDebouncer::new(
            connections.clone(),
            config.typing_timeout(),
        ));
        let pending = Arc::new(PendingVerificationStore::new());
        let ledger = Arc::new(ConversationLedger::new(
            stores.conversations.clone(),
            stores.accounts.clone(),
        ));
        let messages = Arc::new(MessageService::new(
            stores.accounts.clone(),
            stores.messages.clone(),
            ledger.clone(),
            presence.clone(),
            connections.clone(),
        ));
        let keys = SessionKeys::from_secret(&config.jwt_secret, config.session_ttl_hours);
        let auth = Arc::new(AuthService::new(
            stores.accounts.clone(),
            pending.clone(),
            presence.clone(),
            connections.clone(),
            dispatcher,
            keys,
            config.otp_ttl(),
        ));
        let contacts = Arc::new(ContactService::new(
            stores.accounts.clone(),
            ledger.clone(),
            presence.clone(),
            connections.clone(),
        ));

        Self {
            config,
            stores,
            connections,
            presence,
            typing,
            pending,
            ledger,
            messages,
            auth,
            contacts,
        }
    }

    /// In-memory stores and the configured mailer
    pub fn in_memory(config: Arc<Config>) -> AppResult<Self> {
        let mailer = EmailService::new(&config.email, config.otp_ttl_secs)?;
        Ok(Self::new(config, Stores::memory(), Arc::new(mailer)))
    }

    /// PostgreSQL stores and the configured mailer
    pub fn with_pool(config: Arc<Config>, pool: deadpool_postgres::Pool) -> AppResult<Self> {
        let mailer = EmailService::new(&config.email, config.otp_ttl_secs)?;
        Ok(Self::new(config, Stores::postgres(pool), Arc::new(mailer)))
    }

    /// Periodically drop expired pending registrations
    pub fn spawn_pending_sweep(&self) -> JoinHandle<()> {
        let auth = self.auth.clone();
        let period = Duration::from_secs(self.config.pending_sweep_interval_secs.max(1));

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let dropped = auth.sweep_expired().await;
                if dropped > 0 {
                    tracing::debug!(dropped, "expired pending registrations purged");
                }
            }
        })
    }

    /// Clear every ephemeral table and mark all accounts offline
    pub async fn shutdown(&self) {
        self.typing.shutdown().await;
        self.pending.clear().await;
        if let Err(e) = self.presence.clear().await {
            tracing::error!(error = %e, "failed to reset presence on shutdown");
        }
        self.connections.clear().await;
        tracing::info!("ephemeral state cleared");
    }
}
