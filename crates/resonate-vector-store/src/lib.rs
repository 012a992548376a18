//! Vector store adapter.
//!
//! The core talks to the vector database through the [`VectorStore`] trait;
//! [`SledVectorStore`] is the one embedded implementation, doing a brute-force
//! cosine-similarity scan with metadata filtering. Acceptable at this scale —
//! DFRE's candidate pool is bounded by the active-user count, not the full
//! corpus.

use async_trait::async_trait;
use parking_lot::RwLock;
use resonate_errors::VectorStoreError;
use resonate_types::VectorMetadata;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// A single clause in a metadata filter: equal or not-equal to a JSON value.
#[derive(Debug, Clone)]
pub enum FilterOp {
    Eq(JsonValue),
    Ne(JsonValue),
}

/// A metadata filter: every clause must hold for a candidate to match.
#[derive(Debug, Clone, Default)]
pub struct Filter {
    clauses: HashMap<String, FilterOp>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, field: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.clauses.insert(field.into(), FilterOp::Eq(value.into()));
        self
    }

    pub fn ne(mut self, field: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.clauses.insert(field.into(), FilterOp::Ne(value.into()));
        self
    }

    fn matches(&self, metadata: &JsonValue) -> bool {
        self.clauses.iter().all(|(field, op)| {
            let actual = metadata.get(field);
            match op {
                FilterOp::Eq(expected) => actual == Some(expected),
                FilterOp::Ne(expected) => actual != Some(expected),
            }
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredVector {
    embedding: Vec<f32>,
    metadata: VectorMetadata,
}

#[derive(Debug, Clone)]
pub struct ScoredVector {
    pub user_id: Uuid,
    pub score: f32,
    pub metadata: VectorMetadata,
}

fn l2_normalize(v: &mut [f32]) {
    let sum: f32 = v.iter().map(|x| x * x).sum();
    let norm = sum.sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

/// Cosine similarity rescaled to `[0, 1]` for UI-friendly scoring.
pub fn cosine_sim(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    let cos = dot / (norm_a * norm_b);
    ((cos + 1.0) / 2.0).clamp(0.0, 1.0)
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn upsert(
        &self,
        user_id: Uuid,
        embedding: Vec<f32>,
        metadata: VectorMetadata,
    ) -> Result<(), VectorStoreError>;

    async fn get(&self, user_id: Uuid) -> Result<Option<(Vec<f32>, VectorMetadata)>, VectorStoreError>;

    /// Top-`top_k` nearest neighbors by cosine similarity, restricted to
    /// entries matching `filter`.
    async fn query(
        &self,
        embedding: &[f32],
        top_k: usize,
        filter: &Filter,
    ) -> Result<Vec<ScoredVector>, VectorStoreError>;

    async fn delete(&self, user_id: Uuid) -> Result<(), VectorStoreError>;
}

pub struct SledVectorStore {
    inner: Arc<RwLock<sled::Tree>>,
    dim: usize,
}

impl SledVectorStore {
    pub fn open(path: &str, dim: usize) -> Result<Self, VectorStoreError> {
        let db = sled::open(path)?;
        let tree = db.open_tree("vectors")?;
        Ok(Self {
            inner: Arc::new(RwLock::new(tree)),
            dim,
        })
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    fn all(&self) -> Result<Vec<(Uuid, StoredVector)>, VectorStoreError> {
        let tree = self.inner.read();
        let mut out = Vec::new();
        for kv in tree.iter() {
            let (k, v) = kv?;
            let id_str = String::from_utf8_lossy(&k);
            let Ok(user_id) = Uuid::parse_str(&id_str) else {
                continue;
            };
            if let Ok(sv) = serde_json::from_slice::<StoredVector>(&v) {
                out.push((user_id, sv));
            }
        }
        Ok(out)
    }
}

#[async_trait]
impl VectorStore for SledVectorStore {
    async fn upsert(
        &self,
        user_id: Uuid,
        mut embedding: Vec<f32>,
        metadata: VectorMetadata,
    ) -> Result<(), VectorStoreError> {
        l2_normalize(&mut embedding);
        let sv = StoredVector { embedding, metadata };
        let bytes = serde_json::to_vec(&sv)?;
        let tree = self.inner.read();
        tree.insert(user_id.to_string().as_bytes(), bytes)?;
        Ok(())
    }

    async fn get(&self, user_id: Uuid) -> Result<Option<(Vec<f32>, VectorMetadata)>, VectorStoreError> {
        let tree = self.inner.read();
        let Some(bytes) = tree.get(user_id.to_string().as_bytes())? else {
            return Ok(None);
        };
        let sv: StoredVector = serde_json::from_slice(&bytes)?;
        Ok(Some((sv.embedding, sv.metadata)))
    }

    async fn query(
        &self,
        embedding: &[f32],
        top_k: usize,
        filter: &Filter,
    ) -> Result<Vec<ScoredVector>, VectorStoreError> {
        let top_k = top_k.clamp(1, 1000);
        let all = self.all()?;
        let mut scored = Vec::with_capacity(all.len());
        for (user_id, sv) in all {
            let metadata_json = serde_json::to_value(&sv.metadata)?;
            if !filter.matches(&metadata_json) {
                continue;
            }
            let score = cosine_sim(embedding, &sv.embedding);
            scored.push(ScoredVector {
                user_id,
                score,
                metadata: sv.metadata,
            });
        }
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);
        Ok(scored)
    }

    async fn delete(&self, user_id: Uuid) -> Result<(), VectorStoreError> {
        let tree = self.inner.read();
        tree.remove(user_id.to_string().as_bytes())?;
        Ok(())
    }
}
