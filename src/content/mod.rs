// Progressive content rating: tier computation with consent gating, and
// the output filter enforcing banned/restricted token tables.

pub mod filter;
pub mod rating;

pub use filter::{filter_reply, prefilter_user_input, FilterOutcome, FilterSeverity};
pub use rating::{level_config, ContentLevelConfig, ContentRating, UserContentIntent};
