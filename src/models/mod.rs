pub mod character;
pub mod effect;
pub mod emotion;
pub mod gift;
pub mod message;
pub mod session;
pub mod subscription;
pub mod user_state;
pub mod wallet;

pub use character::{CharacterPersonality, CharacterProfile};
pub use effect::ActiveEffect;
pub use emotion::EmotionHistoryEntry;
pub use gift::{Gift, GiftCatalogEntry, GiftStatus, GiftTier, IdempotencyRecord, StatusEffectSpec};
pub use message::{Message, MessageRole};
pub use session::Session;
pub use subscription::Subscription;
pub use user_state::UserState;
pub use wallet::{LedgerEntry, Stamina, Wallet};
