use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Per-user credit wallet. `total_credits()` is always the sum of the three
/// buckets; deduction order is daily → purchased → bonus.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Wallet {
    pub user_id: String,
    pub daily_free_credits: i64,
    pub purchased_credits: i64,
    pub bonus_credits: i64,
    pub daily_refreshed_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Wallet {
    pub fn new(user_id: String) -> Self {
        let now = Utc::now();
        Self {
            user_id,
            daily_free_credits: 0,
            purchased_credits: 0,
            bonus_credits: 0,
            daily_refreshed_at: now,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn total_credits(&self) -> i64 {
        self.daily_free_credits + self.purchased_credits + self.bonus_credits
    }

    /// Deduct `amount` in priority order. Returns false (wallet untouched)
    /// if the balance is insufficient.
    pub fn deduct(&mut self, amount: i64) -> bool {
        if amount < 0 || self.total_credits() < amount {
            return false;
        }

        let from_daily = self.daily_free_credits.min(amount);
        self.daily_free_credits -= from_daily;
        let mut remaining = amount - from_daily;

        let from_purchased = self.purchased_credits.min(remaining);
        self.purchased_credits -= from_purchased;
        remaining -= from_purchased;

        self.bonus_credits -= remaining;
        true
    }
}

/// Stamina gates free-tier chat volume: `max` per UTC day, 1 per message.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Stamina {
    pub user_id: String,
    pub current: i32,
    pub max: i32,
    pub last_reset_at: DateTime<Utc>,
}

pub const DAILY_FREE_STAMINA: i32 = 50;

impl Stamina {
    pub fn new(user_id: String) -> Self {
        Self {
            user_id,
            current: DAILY_FREE_STAMINA,
            max: DAILY_FREE_STAMINA,
            last_reset_at: Utc::now(),
        }
    }

    /// Reset to max on the first touch after a UTC-date rollover.
    pub fn maybe_reset(&mut self, now: DateTime<Utc>) -> bool {
        if now.date_naive() > self.last_reset_at.date_naive() {
            self.current = self.max;
            self.last_reset_at = now;
            true
        } else {
            false
        }
    }
}

/// Append-only record of a wallet balance change, stamped with the balance
/// that resulted from it.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub user_id: String,
    pub entry_type: String,
    pub amount: i64,
    pub balance_after: i64,
    pub description: String,
    #[sqlx(json(nullable))]
    pub extra_data: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    pub fn new(
        user_id: &str,
        entry_type: &str,
        amount: i64,
        balance_after: i64,
        description: String,
        extra_data: Option<serde_json::Value>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            entry_type: entry_type.to_string(),
            amount,
            balance_after,
            description,
            extra_data,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deduction_priority() {
        let mut wallet = Wallet::new("u1".into());
        wallet.daily_free_credits = 5;
        wallet.purchased_credits = 10;
        wallet.bonus_credits = 3;

        assert!(wallet.deduct(12));
        assert_eq!(wallet.daily_free_credits, 0);
        assert_eq!(wallet.purchased_credits, 3);
        assert_eq!(wallet.bonus_credits, 3);
        assert_eq!(wallet.total_credits(), 6);
    }

    #[test]
    fn test_deduct_never_goes_negative() {
        let mut wallet = Wallet::new("u1".into());
        wallet.daily_free_credits = 2;
        assert!(!wallet.deduct(3));
        assert_eq!(wallet.total_credits(), 2);
        assert!(!wallet.deduct(-1));
    }

    #[test]
    fn test_stamina_utc_rollover() {
        let mut stamina = Stamina::new("u1".into());
        stamina.current = 7;
        stamina.last_reset_at = Utc::now() - chrono::Duration::days(1);
        assert!(stamina.maybe_reset(Utc::now()));
        assert_eq!(stamina.current, stamina.max);

        // Same day: no reset
        stamina.current = 3;
        assert!(!stamina.maybe_reset(Utc::now()));
        assert_eq!(stamina.current, 3);
    }
}
