// Billing core: credits + stamina with an append-only ledger, idempotent
// gift transactions, and per-user rate limiting.

pub mod catalog;
pub mod gifts;
pub mod rate_limit;
pub mod stamina;
pub mod wallet;

pub use catalog::{gift_catalog, gift_catalog_entry, purchase_package, PurchasePackage};
pub use gifts::{GiftSendResult, GiftService};
pub use rate_limit::RateLimiter;
pub use stamina::StaminaService;
pub use wallet::{chat_cost, WalletService, CHAT_COST_UPPER_BOUND};
