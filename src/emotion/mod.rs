// Emotion state machine: rule-based scoring with buffering, cold-war
// lockout, gift-mediated recovery and natural decay.

pub mod classifier;
pub mod engine;

pub use classifier::{quick_detect, rule_analysis, EmotionAnalysis, PatternKind, QuickDetection};
pub use engine::{DeltaApplication, EmotionEngine};
