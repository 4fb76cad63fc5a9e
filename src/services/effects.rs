//! Active-effect lifecycle. Effects are created inside the gift
//! transaction; this service reads them for prompt assembly and winds them
//! down after each successful reply.

use std::sync::Arc;

use crate::db::EffectRepository;
use crate::error::EngineResult;
use crate::models::ActiveEffect;

pub struct EffectService {
    effects: Arc<dyn EffectRepository>,
}

impl EffectService {
    pub fn new(effects: Arc<dyn EffectRepository>) -> Self {
        Self { effects }
    }

    pub async fn active(&self, user_id: &str, character_id: &str) -> EngineResult<Vec<ActiveEffect>> {
        self.effects.list_active(user_id, character_id).await
    }

    /// Combined prompt rider for a set of active effects, in application
    /// order.
    pub fn modifier_of(effects: &[ActiveEffect]) -> Option<String> {
        if effects.is_empty() {
            return None;
        }
        Some(
            effects
                .iter()
                .map(|e| e.prompt_modifier.as_str())
                .collect::<Vec<_>>()
                .join("\n"),
        )
    }

    pub async fn combined_prompt_modifier(
        &self,
        user_id: &str,
        character_id: &str,
    ) -> EngineResult<Option<String>> {
        let effects = self.active(user_id, character_id).await?;
        Ok(Self::modifier_of(&effects))
    }

    /// Consume one message from every active effect; returns a user-facing
    /// notice when effects wore off.
    pub async fn wind_down(
        &self,
        user_id: &str,
        character_id: &str,
    ) -> EngineResult<Option<String>> {
        let expired = self.effects.decrement_and_expire(user_id, character_id).await?;
        Ok(Self::expiry_notice(&expired))
    }

    fn expiry_notice(expired: &[ActiveEffect]) -> Option<String> {
        if expired.is_empty() {
            return None;
        }
        let names: Vec<&str> = expired.iter().map(|e| e.effect_type.as_str()).collect();
        Some(format!("Effect worn off: {}", names.join(", ")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{MemoryStore, TxOps, UnitOfWork};
    use uuid::Uuid;

    #[tokio::test]
    async fn test_wind_down_and_notice() {
        let store = Arc::new(MemoryStore::new());
        let service = EffectService::new(store.clone());

        let effect = ActiveEffect::new("u1", "luna", "tipsy", "feeling tipsy", 1, Uuid::new_v4());
        {
            let mut tx = UnitOfWork::begin(store.as_ref()).await.unwrap();
            tx.replace_effect(&effect).await.unwrap();
            tx.commit().await.unwrap();
        }

        let modifier = service.combined_prompt_modifier("u1", "luna").await.unwrap();
        assert_eq!(modifier.as_deref(), Some("feeling tipsy"));

        let notice = service.wind_down("u1", "luna").await.unwrap();
        assert_eq!(notice.as_deref(), Some("Effect worn off: tipsy"));

        assert!(service.active("u1", "luna").await.unwrap().is_empty());
        assert!(service.wind_down("u1", "luna").await.unwrap().is_none());
    }
}
