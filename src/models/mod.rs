pub mod account;
pub mod conversation;
pub mod message;
pub mod verification;

pub use account::{Account, AccountSummary, NewAccount};
pub use conversation::{canonical_hash, ChatContact, Conversation};
pub use message::{Message, MessageView, Pagination};
pub use verification::{OtpChallenge, VerificationState};
