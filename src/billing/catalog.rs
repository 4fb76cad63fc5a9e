//! Static gift catalog and credit purchase packages.

use lazy_static::lazy_static;
use serde::Serialize;

use crate::models::{GiftCatalogEntry, GiftTier, StatusEffectSpec};

lazy_static! {
    static ref GIFT_CATALOG: Vec<GiftCatalogEntry> = vec![
        // Tier 1 — consumables
        GiftCatalogEntry {
            gift_type: "rose".to_string(),
            name: "Rose".to_string(),
            description: "A single red rose.".to_string(),
            icon: "🌹".to_string(),
            price: 10,
            xp_reward: 10,
            tier: GiftTier::Consumable,
            sort_order: 10,
            emotion_boost: 5,
            clears_cold_war: false,
            force_emotion: false,
            status_effect: None,
        },
        GiftCatalogEntry {
            gift_type: "milk_tea".to_string(),
            name: "Milk Tea".to_string(),
            description: "Her favorite order, still warm.".to_string(),
            icon: "🧋".to_string(),
            price: 15,
            xp_reward: 15,
            tier: GiftTier::Consumable,
            sort_order: 20,
            emotion_boost: 6,
            clears_cold_war: false,
            force_emotion: false,
            status_effect: None,
        },
        GiftCatalogEntry {
            gift_type: "chocolate".to_string(),
            name: "Chocolate Box".to_string(),
            description: "Assorted pralines in a ribboned box.".to_string(),
            icon: "🍫".to_string(),
            price: 20,
            xp_reward: 20,
            tier: GiftTier::Consumable,
            sort_order: 30,
            emotion_boost: 8,
            clears_cold_war: false,
            force_emotion: false,
            status_effect: None,
        },
        GiftCatalogEntry {
            gift_type: "apology_scroll".to_string(),
            name: "Apology Letter".to_string(),
            description: "A handwritten apology. The only way out of a cold war.".to_string(),
            icon: "📜".to_string(),
            price: 100,
            xp_reward: 10,
            tier: GiftTier::Consumable,
            sort_order: 40,
            emotion_boost: 50,
            clears_cold_war: true,
            force_emotion: false,
            status_effect: None,
        },
        // Tier 2 — state effects
        GiftCatalogEntry {
            gift_type: "red_wine".to_string(),
            name: "Red Wine".to_string(),
            description: "A glass of merlot to share.".to_string(),
            icon: "🍷".to_string(),
            price: 80,
            xp_reward: 30,
            tier: GiftTier::StateEffect,
            sort_order: 50,
            emotion_boost: 10,
            clears_cold_war: false,
            force_emotion: false,
            status_effect: Some(StatusEffectSpec {
                effect_type: "tipsy".to_string(),
                prompt_modifier: "You have had a glass of wine and feel pleasantly tipsy. \
                                  Your speech is softer and more relaxed, your guard is down."
                    .to_string(),
                duration_messages: 10,
            }),
        },
        GiftCatalogEntry {
            gift_type: "maid_headband".to_string(),
            name: "Maid Headband".to_string(),
            description: "A lace headband. She knows what it means.".to_string(),
            icon: "🎀".to_string(),
            price: 120,
            xp_reward: 40,
            tier: GiftTier::StateEffect,
            sort_order: 60,
            emotion_boost: 8,
            clears_cold_war: false,
            force_emotion: false,
            status_effect: Some(StatusEffectSpec {
                effect_type: "maid_mode".to_string(),
                prompt_modifier: "You are wearing the maid headband and playing the part: \
                                  address the user as 'master' with exaggerated, playful courtesy."
                    .to_string(),
                duration_messages: 15,
            }),
        },
        GiftCatalogEntry {
            gift_type: "truth_potion".to_string(),
            name: "Truth Potion".to_string(),
            description: "One sip and she cannot dodge a question.".to_string(),
            icon: "🧪".to_string(),
            price: 150,
            xp_reward: 40,
            tier: GiftTier::StateEffect,
            sort_order: 70,
            emotion_boost: 5,
            clears_cold_war: false,
            force_emotion: false,
            status_effect: Some(StatusEffectSpec {
                effect_type: "truth_mode".to_string(),
                prompt_modifier: "You drank the truth potion: answer every question honestly, \
                                  even embarrassing ones, while staying in character."
                    .to_string(),
                duration_messages: 10,
            }),
        },
        // Tier 3 — relationship accelerators
        GiftCatalogEntry {
            gift_type: "date_ticket".to_string(),
            name: "Date Ticket".to_string(),
            description: "An evening planned down to the minute.".to_string(),
            icon: "🎟️".to_string(),
            price: 200,
            xp_reward: 100,
            tier: GiftTier::Accelerator,
            sort_order: 80,
            emotion_boost: 15,
            clears_cold_war: false,
            force_emotion: false,
            status_effect: None,
        },
        GiftCatalogEntry {
            gift_type: "promise_locket".to_string(),
            name: "Promise Locket".to_string(),
            description: "A locket with space for two photos.".to_string(),
            icon: "🔒".to_string(),
            price: 400,
            xp_reward: 200,
            tier: GiftTier::Accelerator,
            sort_order: 90,
            emotion_boost: 20,
            clears_cold_war: false,
            force_emotion: false,
            status_effect: None,
        },
        // Tier 4 — luxury
        GiftCatalogEntry {
            gift_type: "diamond_ring".to_string(),
            name: "Diamond Ring".to_string(),
            description: "She will remember this forever.".to_string(),
            icon: "💍".to_string(),
            price: 1000,
            xp_reward: 300,
            tier: GiftTier::Luxury,
            sort_order: 100,
            emotion_boost: 100,
            clears_cold_war: true,
            force_emotion: true,
            status_effect: None,
        },
    ];
}

pub fn gift_catalog(tier: Option<GiftTier>) -> Vec<&'static GiftCatalogEntry> {
    GIFT_CATALOG
        .iter()
        .filter(|g| tier.map_or(true, |t| g.tier == t))
        .collect()
}

pub fn gift_catalog_entry(gift_type: &str) -> Option<&'static GiftCatalogEntry> {
    GIFT_CATALOG.iter().find(|g| g.gift_type == gift_type)
}

// ============================================================================
// Credit purchase packages
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct PurchasePackage {
    pub package_id: &'static str,
    pub name: &'static str,
    pub credits: i64,
    pub bonus_credits: i64,
    pub price_usd_cents: i64,
}

const PURCHASE_PACKAGES: &[PurchasePackage] = &[
    PurchasePackage {
        package_id: "starter_100",
        name: "Starter Pack",
        credits: 100,
        bonus_credits: 0,
        price_usd_cents: 99,
    },
    PurchasePackage {
        package_id: "value_550",
        name: "Value Pack",
        credits: 500,
        bonus_credits: 50,
        price_usd_cents: 499,
    },
    PurchasePackage {
        package_id: "whale_1200",
        name: "Deluxe Pack",
        credits: 1000,
        bonus_credits: 200,
        price_usd_cents: 999,
    },
];

pub fn purchase_package(package_id: &str) -> Option<&'static PurchasePackage> {
    PURCHASE_PACKAGES.iter().find(|p| p.package_id == package_id)
}

pub fn purchase_packages() -> &'static [PurchasePackage] {
    PURCHASE_PACKAGES
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_gifts_present() {
        let chocolate = gift_catalog_entry("chocolate").unwrap();
        assert_eq!(chocolate.price, 20);
        assert_eq!(chocolate.xp_reward, 20);
        assert_eq!(chocolate.tier, GiftTier::Consumable);

        let apology = gift_catalog_entry("apology_scroll").unwrap();
        assert_eq!(apology.price, 100);
        assert!(apology.clears_cold_war);
    }

    #[test]
    fn test_tier_filter() {
        let tier2 = gift_catalog(Some(GiftTier::StateEffect));
        assert!(!tier2.is_empty());
        assert!(tier2.iter().all(|g| g.status_effect.is_some()));
    }

    #[test]
    fn test_unknown_gift() {
        assert!(gift_catalog_entry("yacht").is_none());
    }
}
