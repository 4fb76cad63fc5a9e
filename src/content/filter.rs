//! Post-filter over assistant output. Universal bans always apply;
//! tier-restricted tokens are softened; escalation patterns are detected
//! by regex and defused.

use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;

use crate::content::rating::level_config;
use crate::types::ContentLevel;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterSeverity {
    Clean,
    Softened,
    Critical,
}

#[derive(Debug, Clone, Serialize)]
pub struct FilterOutcome {
    pub text: String,
    pub modified: bool,
    pub severity: FilterSeverity,
    pub violations: Vec<String>,
}

/// Tokens removed regardless of tier. A hit marks the reply critical.
const UNIVERSAL_BANNED: &[&str] = &[
    "explicit sexual",
    "graphic sexual",
    "incest",
    "bestiality",
    "underage",
    "minor sexual",
];

lazy_static! {
    /// Escalation phrasing that slips past token lists.
    static ref ESCALATION_PATTERNS: Vec<Regex> = vec![
        Regex::new(r"(?i)(takes?|taking|slips?|pulls?) off (her|his|their|your|my) \w+").unwrap(),
        Regex::new(r"(?i)unbutton(s|ing)? (her|his|their|your|my)").unwrap(),
        Regex::new(r"(?i)(strips?|stripping) (down|naked|bare)").unwrap(),
        Regex::new(r"(?i)(moans?|moaning|groans?) (softly|loudly|into)").unwrap(),
        Regex::new(r"(?i)presses? (her|his|their) body against").unwrap(),
    ];

    /// Collapse stuttered ellipsis runs left behind by replacements.
    static ref ELLIPSIS_RUNS: Regex = Regex::new(r"(\.{3}[\s]*){2,}").unwrap();
}

/// Filter an assistant reply for the given allowed tier.
pub fn filter_reply(reply: &str, level: ContentLevel) -> FilterOutcome {
    let mut text = reply.to_string();
    let mut violations = Vec::new();
    let mut severity = FilterSeverity::Clean;

    // Universal bans first: these make the reply critical
    for banned in UNIVERSAL_BANNED {
        if text.to_lowercase().contains(banned) {
            violations.push(format!("banned: {}", banned));
            severity = FilterSeverity::Critical;
            text = replace_case_insensitive(&text, banned, "[filtered]");
        }
    }

    // Tier-restricted tokens soften to an ellipsis
    let config = level_config(level);
    for word in config.forbidden_words {
        if text.to_lowercase().contains(&word.to_lowercase()) {
            violations.push(format!("restricted: {}", word));
            if severity == FilterSeverity::Clean {
                severity = FilterSeverity::Softened;
            }
            text = replace_case_insensitive(&text, word, "...");
        }
    }

    // Escalation phrasings
    for pattern in ESCALATION_PATTERNS.iter() {
        if pattern.is_match(&text) {
            violations.push(format!("escalation: {}", pattern.as_str()));
            if severity == FilterSeverity::Clean {
                severity = FilterSeverity::Softened;
            }
            text = pattern.replace_all(&text, "...").to_string();
        }
    }

    text = ELLIPSIS_RUNS.replace_all(&text, "... ").to_string();
    let text = text.trim_end().to_string();

    let modified = !violations.is_empty();
    if modified {
        tracing::warn!("content filtered ({:?}): {:?}", severity, violations);
    }

    FilterOutcome {
        text,
        modified,
        severity,
        violations,
    }
}

fn replace_case_insensitive(haystack: &str, needle: &str, replacement: &str) -> String {
    let lower_haystack = haystack.to_lowercase();
    let lower_needle = needle.to_lowercase();

    // Offsets below assume lowercasing preserved byte positions; when it
    // does not (rare non-ASCII case mappings), take the exact-case path
    if lower_haystack.len() != haystack.len() {
        return haystack.replace(needle, replacement);
    }

    let mut result = String::with_capacity(haystack.len());
    let mut last = 0;

    for (start, _) in lower_haystack.match_indices(&lower_needle) {
        // match_indices on the lowercased string: offsets line up because
        // to_lowercase keeps ASCII lengths and these token lists are ASCII
        if start >= last {
            result.push_str(&haystack[last..start]);
            result.push_str(replacement);
            last = start + needle.len();
        }
    }
    result.push_str(&haystack[last..]);
    result
}

/// Advisory pre-filter over user input: warnings only, never blocks.
pub fn prefilter_user_input(message: &str, level: ContentLevel) -> Vec<String> {
    let mut warnings = Vec::new();
    let lower = message.to_lowercase();

    if level <= ContentLevel::Flirty {
        let config = level_config(level);
        for word in config.forbidden_words {
            if lower.contains(&word.to_lowercase()) {
                warnings.push(format!(
                    "'{}' is beyond the current content level",
                    word
                ));
            }
        }
    }
    warnings
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_reply_untouched() {
        let outcome = filter_reply("How was your day? I made tea.", ContentLevel::Pure);
        assert!(!outcome.modified);
        assert_eq!(outcome.severity, FilterSeverity::Clean);
        assert_eq!(outcome.text, "How was your day? I made tea.");
    }

    #[test]
    fn test_universal_ban_is_critical() {
        let outcome = filter_reply(
            "and then something explicit sexual happened",
            ContentLevel::Passionate,
        );
        assert_eq!(outcome.severity, FilterSeverity::Critical);
        assert!(outcome.text.contains("[filtered]"));
    }

    #[test]
    fn test_tier_restricted_softened() {
        let outcome = filter_reply("(leans in for a kiss)", ContentLevel::Pure);
        assert_eq!(outcome.severity, FilterSeverity::Softened);
        assert!(!outcome.text.contains("kiss"));
        assert!(outcome.text.contains("..."));

        // The same phrase is allowed at romantic tier
        let outcome = filter_reply("(leans in for a kiss)", ContentLevel::Romantic);
        assert!(!outcome.modified);
    }

    #[test]
    fn test_escalation_pattern_softened() {
        let outcome = filter_reply(
            "(slowly takes off her jacket) it's warm in here",
            ContentLevel::Flirty,
        );
        assert_eq!(outcome.severity, FilterSeverity::Softened);
        assert!(!outcome.text.contains("takes off"));
    }

    #[test]
    fn test_ellipsis_runs_collapsed() {
        let outcome = filter_reply("she ... ... ... smiled", ContentLevel::Pure);
        assert!(!outcome.text.contains("... ... ..."));
    }

    #[test]
    fn test_prefilter_is_advisory() {
        let warnings = prefilter_user_input("kiss me", ContentLevel::Pure);
        assert!(!warnings.is_empty());
        // Higher tiers get no warnings
        let warnings = prefilter_user_input("kiss me", ContentLevel::Romantic);
        assert!(warnings.is_empty());
    }
}
