//! User profile facts and episodic memories feeding the prompt builder,
//! plus the vector-store adapter contract. The production deployment binds
//! `VectorIndex` to a real store; the in-memory index here keeps ranking
//! behavior identical.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::error::EngineResult;
use crate::types::ContentLevel;

// ============================================================================
// Vector adapter contract
// ============================================================================

#[derive(Debug, Clone)]
pub struct VectorHit {
    pub id: String,
    pub score: f32,
    pub metadata: serde_json::Value,
}

/// The core's only contract with the vector store. The similarity metric
/// is implementation-defined but must be stable across calls.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn upsert(
        &self,
        id: &str,
        vector: Vec<f32>,
        metadata: serde_json::Value,
    ) -> EngineResult<()>;

    async fn search(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: Option<&serde_json::Value>,
    ) -> EngineResult<Vec<VectorHit>>;
}

/// Cosine-similarity index held in process memory.
pub struct InMemoryVectorIndex {
    entries: Mutex<HashMap<String, (Vec<f32>, serde_json::Value)>>,
}

impl InMemoryVectorIndex {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryVectorIndex {
    fn default() -> Self {
        Self::new()
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

fn matches_filter(metadata: &serde_json::Value, filter: Option<&serde_json::Value>) -> bool {
    let Some(filter) = filter.and_then(|f| f.as_object()) else {
        return true;
    };
    filter.iter().all(|(key, value)| metadata.get(key) == Some(value))
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn upsert(
        &self,
        id: &str,
        vector: Vec<f32>,
        metadata: serde_json::Value,
    ) -> EngineResult<()> {
        let mut entries = self.entries.lock().await;
        entries.insert(id.to_string(), (vector, metadata));
        Ok(())
    }

    async fn search(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: Option<&serde_json::Value>,
    ) -> EngineResult<Vec<VectorHit>> {
        let entries = self.entries.lock().await;
        let mut hits: Vec<VectorHit> = entries
            .iter()
            .filter(|(_, (_, metadata))| matches_filter(metadata, filter))
            .map(|(id, (v, metadata))| VectorHit {
                id: id.clone(),
                score: cosine(vector, v),
                metadata: metadata.clone(),
            })
            .collect();
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(top_k);
        Ok(hits)
    }
}

// ============================================================================
// Profile facts and episodic memories
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserProfile {
    pub name: Option<String>,
    pub birthday: Option<String>,
    pub likes: Vec<String>,
    pub relationship_status: Option<String>,
    pub important_dates: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpisodicMemory {
    pub id: String,
    pub content: String,
    /// 0–10 how much this mattered
    pub importance: f64,
    /// 0–10 how vividly it is retained
    pub strength: f64,
    pub keywords: Vec<String>,
    pub intimate: bool,
    pub created_at: DateTime<Utc>,
}

impl EpisodicMemory {
    /// Ranking = importance·10 + strength·5 + keyword-match·15 + recency.
    fn rank_score(&self, query: &str, now: DateTime<Utc>) -> f64 {
        let query_lower = query.to_lowercase();
        let keyword_hit = self
            .keywords
            .iter()
            .any(|k| query_lower.contains(&k.to_lowercase()));

        let age_days = (now - self.created_at).num_days() as f64;
        let recency_bonus = (10.0 - age_days).max(0.0);

        self.importance * 10.0
            + self.strength * 5.0
            + if keyword_hit { 15.0 } else { 0.0 }
            + recency_bonus
    }
}

const MAX_RANKED_MEMORIES: usize = 5;

pub struct MemoryService {
    profiles: Mutex<HashMap<String, UserProfile>>,
    episodes: Mutex<HashMap<(String, String), Vec<EpisodicMemory>>>,
    #[allow(dead_code)]
    index: Arc<dyn VectorIndex>,
}

impl MemoryService {
    pub fn new(index: Arc<dyn VectorIndex>) -> Self {
        Self {
            profiles: Mutex::new(HashMap::new()),
            episodes: Mutex::new(HashMap::new()),
            index,
        }
    }

    pub async fn profile(&self, user_id: &str) -> UserProfile {
        self.profiles
            .lock()
            .await
            .get(user_id)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn set_profile(&self, user_id: &str, profile: UserProfile) {
        self.profiles
            .lock()
            .await
            .insert(user_id.to_string(), profile);
    }

    pub async fn remember(&self, user_id: &str, character_id: &str, memory: EpisodicMemory) {
        let mut episodes = self.episodes.lock().await;
        episodes
            .entry((user_id.to_string(), character_id.to_string()))
            .or_default()
            .push(memory);
    }

    /// Up to five memories ranked for this query. In pure or flirty tiers,
    /// intimate memories are withheld.
    pub async fn ranked_memories(
        &self,
        user_id: &str,
        character_id: &str,
        query: &str,
        content_level: ContentLevel,
    ) -> Vec<EpisodicMemory> {
        let now = Utc::now();
        let episodes = self.episodes.lock().await;
        let Some(all) = episodes.get(&(user_id.to_string(), character_id.to_string())) else {
            return Vec::new();
        };

        let withhold_intimate = content_level <= ContentLevel::Flirty;
        let mut candidates: Vec<&EpisodicMemory> = all
            .iter()
            .filter(|m| !(withhold_intimate && m.intimate))
            .collect();
        candidates.sort_by(|a, b| {
            b.rank_score(query, now)
                .partial_cmp(&a.rank_score(query, now))
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        candidates
            .into_iter()
            .take(MAX_RANKED_MEMORIES)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory(id: &str, importance: f64, keywords: &[&str], intimate: bool) -> EpisodicMemory {
        EpisodicMemory {
            id: id.to_string(),
            content: format!("memory {}", id),
            importance,
            strength: 5.0,
            keywords: keywords.iter().map(|s| s.to_string()).collect(),
            intimate,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_keyword_match_outranks_importance() {
        let service = MemoryService::new(Arc::new(InMemoryVectorIndex::new()));
        service.remember("u1", "luna", memory("a", 6.0, &[], false)).await;
        service
            .remember("u1", "luna", memory("b", 5.0, &["birthday"], false))
            .await;

        let ranked = service
            .ranked_memories("u1", "luna", "when is my birthday?", ContentLevel::Pure)
            .await;
        assert_eq!(ranked[0].id, "b");
    }

    #[tokio::test]
    async fn test_intimate_memories_withheld_at_low_tiers() {
        let service = MemoryService::new(Arc::new(InMemoryVectorIndex::new()));
        service.remember("u1", "luna", memory("a", 9.0, &[], true)).await;
        service.remember("u1", "luna", memory("b", 1.0, &[], false)).await;

        let pure = service
            .ranked_memories("u1", "luna", "hi", ContentLevel::Pure)
            .await;
        assert_eq!(pure.len(), 1);
        assert_eq!(pure[0].id, "b");

        let intimate = service
            .ranked_memories("u1", "luna", "hi", ContentLevel::Intimate)
            .await;
        assert_eq!(intimate.len(), 2);
    }

    #[tokio::test]
    async fn test_ranked_memories_capped_at_five() {
        let service = MemoryService::new(Arc::new(InMemoryVectorIndex::new()));
        for i in 0..8 {
            service
                .remember("u1", "luna", memory(&format!("m{}", i), i as f64, &[], false))
                .await;
        }
        let ranked = service
            .ranked_memories("u1", "luna", "hi", ContentLevel::Pure)
            .await;
        assert_eq!(ranked.len(), 5);
        assert_eq!(ranked[0].id, "m7");
    }

    #[tokio::test]
    async fn test_vector_index_round_trip() {
        let index = InMemoryVectorIndex::new();
        index
            .upsert("a", vec![1.0, 0.0], serde_json::json!({"kind": "episode"}))
            .await
            .unwrap();
        index
            .upsert("b", vec![0.0, 1.0], serde_json::json!({"kind": "fact"}))
            .await
            .unwrap();

        let hits = index.search(&[1.0, 0.1], 2, None).await.unwrap();
        assert_eq!(hits[0].id, "a");

        let filtered = index
            .search(&[1.0, 0.1], 2, Some(&serde_json::json!({"kind": "fact"})))
            .await
            .unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].id, "b");
    }
}
