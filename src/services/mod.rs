pub mod auth_service;
pub mod contact_service;
pub mod conversation_service;
pub mod email;
pub mod message_service;
pub mod pending_verification;
pub mod presence;
pub mod typing;

// Re-export key types for convenience
pub use auth_service::{AuthService, VerifiedSession};
pub use contact_service::ContactService;
pub use conversation_service::ConversationLedger;
pub use email::{CodeDispatcher, EmailService};
pub use message_service::MessageService;
pub use pending_verification::{PendingRegistration, PendingVerificationStore};
pub use presence::PresenceRegistry;
pub use typing::TypingDebouncer;
