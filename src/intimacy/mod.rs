// Intimacy progression: XP math, level/stage derivation, action gating,
// streaks and feature unlocks.

pub mod actions;
pub mod levels;
pub mod service;

pub use actions::ActionKind;
pub use levels::{
    celebration_message, level_for_xp, level_progress, level_to_affinity, newly_unlocked_features,
    unlocked_features, xp_threshold, FeatureUnlock, DAILY_XP_CAP, MAX_LEVEL,
};
pub use service::{AwardOutcome, CheckinResult, IntimacyService, IntimacyStatus};
