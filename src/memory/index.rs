//! Bounded top-K similarity search over stored memory embeddings
//!
//! A full scan keeps at most `limit` candidates and replaces the current
//! worst one whenever a closer vector shows up, so memory use stays
//! `O(limit)` regardless of how many memories exist.

use std::sync::Arc;

use super::Embedder;
use crate::db::{Memory, MemoryStore};
use crate::{Error, Result};

/// Distance below which a new memory counts as a duplicate
pub const DEFAULT_DEDUPE_THRESHOLD: f64 = 0.7;

/// Neighbours inspected when deduplicating
pub const DEFAULT_DEDUPE_LIMIT: usize = 10;

/// Euclidean distance, accumulated in `f64`
///
/// # Errors
///
/// Returns `Error::DimensionMismatch` if the vectors differ in length
pub fn l2_distance(a: &[f32], b: &[f32]) -> Result<f64> {
    if a.len() != b.len() {
        return Err(Error::DimensionMismatch {
            expected: a.len(),
            actual: b.len(),
        });
    }

    let sum: f64 = a
        .iter()
        .zip(b)
        .map(|(x, y)| {
            let d = f64::from(*x) - f64::from(*y);
            d * d
        })
        .sum();
    Ok(sum.sqrt())
}

/// Embedding computation plus nearest-neighbour search over a memory store
pub struct EmbeddingIndex {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn MemoryStore>,
    dedupe_limit: usize,
    dedupe_threshold: f64,
}

impl EmbeddingIndex {
    #[must_use]
    pub fn new(embedder: Arc<dyn Embedder>, store: Arc<dyn MemoryStore>) -> Self {
        Self {
            embedder,
            store,
            dedupe_limit: DEFAULT_DEDUPE_LIMIT,
            dedupe_threshold: DEFAULT_DEDUPE_THRESHOLD,
        }
    }

    /// Override the duplicate detection window
    #[must_use]
    pub const fn with_dedupe(mut self, limit: usize, threshold: f64) -> Self {
        self.dedupe_limit = limit;
        self.dedupe_threshold = threshold;
        self
    }

    /// Underlying store
    #[must_use]
    pub fn store(&self) -> &Arc<dyn MemoryStore> {
        &self.store
    }

    /// Compute the embedding for `text`
    ///
    /// # Errors
    ///
    /// Returns `Error::Embedding` if the embedder fails
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embedder.embed(text).await.map_err(|e| match e {
            Error::Embedding(_) => e,
            other => Error::Embedding(other.to_string()),
        })
    }

    /// Up to `limit` `(id, distance)` pairs closer than `threshold`, nearest first
    ///
    /// Scans every stored memory regardless of owner.
    ///
    /// # Errors
    ///
    /// Returns error if the store cannot be read or a stored vector has a
    /// different dimension than `target`
    pub fn search(&self, target: &[f32], limit: usize, threshold: f64) -> Result<Vec<(String, f64)>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        nearest(self.store.list_embeddings()?, target, limit, threshold)
    }

    /// Like [`search`](Self::search), restricted to one user/character pair
    ///
    /// # Errors
    ///
    /// Returns error if the store cannot be read or a stored vector has a
    /// different dimension than `target`
    pub fn search_for(
        &self,
        user_id: &str,
        character_id: &str,
        target: &[f32],
        limit: usize,
        threshold: f64,
    ) -> Result<Vec<(String, f64)>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        nearest(
            self.store.list_embeddings_for(user_id, character_id)?,
            target,
            limit,
            threshold,
        )
    }

    /// Resolve search hits to memories, nearest first, and mark them accessed
    fn resolve(&self, hits: Vec<(String, f64)>) -> Result<Vec<(Memory, f64)>> {
        if hits.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<String> = hits.iter().map(|(id, _)| id.clone()).collect();
        let mut memories = self.store.get_by_ids(&ids)?;

        let mut ordered = Vec::with_capacity(hits.len());
        for (id, distance) in hits {
            if let Some(pos) = memories.iter().position(|m| m.id == id) {
                ordered.push((memories.swap_remove(pos), distance));
            }
        }

        if let Err(e) = self.store.touch(&ids) {
            tracing::warn!(error = %e, "failed to update memory access time");
        }

        Ok(ordered)
    }

    /// Memories of one user/character pair nearest to `target`, nearest first
    ///
    /// # Errors
    ///
    /// Returns error if search or lookup fails
    pub fn similar_memories(
        &self,
        user_id: &str,
        character_id: &str,
        target: &[f32],
        limit: usize,
        threshold: f64,
    ) -> Result<Vec<(Memory, f64)>> {
        let hits = self.search_for(user_id, character_id, target, limit, threshold)?;
        self.resolve(hits)
    }

    /// Embed `query` and return the pair's memories nearest to it
    ///
    /// # Errors
    ///
    /// Returns error if embedding or search fails
    pub async fn recall(
        &self,
        user_id: &str,
        character_id: &str,
        query: &str,
        limit: usize,
        threshold: f64,
    ) -> Result<Vec<Memory>> {
        let target = self.embed(query).await?;
        Ok(self
            .similar_memories(user_id, character_id, &target, limit, threshold)?
            .into_iter()
            .map(|(memory, _)| memory)
            .collect())
    }

    /// Store `memory` unless its owner already has a near-duplicate
    ///
    /// The embedding is computed from the content when empty.
    ///
    /// # Errors
    ///
    /// Returns `Error::DuplicateMemory` when a memory of the same
    /// user/character pair lies within the dedupe threshold; nothing is
    /// written in that case
    pub async fn add_memory(&self, mut memory: Memory) -> Result<Memory> {
        if memory.embedding.is_empty() {
            memory.embedding = self.embed(&memory.content).await?;
        }

        let hits = self.search_for(
            &memory.user_id,
            &memory.character_id,
            &memory.embedding,
            self.dedupe_limit,
            self.dedupe_threshold,
        )?;
        if let Some((existing_id, distance)) = hits.into_iter().next() {
            return Err(Error::DuplicateMemory {
                existing_id,
                distance,
            });
        }

        self.store.create(&memory)?;
        tracing::debug!(memory_id = %memory.id, "stored memory");
        Ok(memory)
    }
}

/// Bounded top-K scan: keep at most `limit` hits, replacing the worst
fn nearest(
    candidates: Vec<(String, Vec<f32>)>,
    target: &[f32],
    limit: usize,
    threshold: f64,
) -> Result<Vec<(String, f64)>> {
    let mut best: Vec<(String, f64)> = Vec::with_capacity(limit);
    for (id, embedding) in candidates {
        let distance = l2_distance(target, &embedding)?;
        if distance >= threshold {
            continue;
        }

        if best.len() < limit {
            best.push((id, distance));
            continue;
        }

        let worst = best
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.1.total_cmp(&b.1.1))
            .map(|(idx, (_, d))| (idx, *d))
            .filter(|(_, worst_distance)| distance < *worst_distance);
        if let Some((idx, _)) = worst {
            best[idx] = (id, distance);
        }
    }

    best.sort_by(|a, b| a.1.total_cmp(&b.1));
    Ok(best)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use async_trait::async_trait;

    use super::*;
    use crate::db::{self, MemoryRepo};

    /// Maps known texts to fixed vectors
    struct TableEmbedder(HashMap<&'static str, Vec<f32>>);

    #[async_trait]
    impl Embedder for TableEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            self.0
                .get(text)
                .cloned()
                .ok_or_else(|| Error::Embedding(format!("unknown text: {text}")))
        }
    }

    fn index_with(vectors: &[(&str, Vec<f32>)]) -> EmbeddingIndex {
        let repo = MemoryRepo::new(db::init_memory().unwrap());
        for (content, embedding) in vectors {
            let mut memory = Memory::new("u", "c", *content, embedding.clone());
            memory.id = (*content).to_string();
            repo.create(&memory).unwrap();
        }
        EmbeddingIndex::new(Arc::new(TableEmbedder(HashMap::new())), Arc::new(repo))
    }

    #[test]
    fn distance_is_euclidean() {
        let d = l2_distance(&[0.0, 0.0], &[3.0, 4.0]).unwrap();
        assert!((d - 5.0).abs() < 1e-9);
        assert!(matches!(
            l2_distance(&[1.0], &[1.0, 2.0]),
            Err(Error::DimensionMismatch {
                expected: 1,
                actual: 2
            })
        ));
    }

    #[test]
    fn search_returns_nearest_under_threshold() {
        let index = index_with(&[
            ("far", vec![5.0, 0.0]),
            ("d05", vec![0.5, 0.0]),
            ("d01", vec![0.1, 0.0]),
            ("d06", vec![0.0, 0.6]),
            ("d03", vec![0.3, 0.0]),
            ("d069", vec![0.69, 0.0]),
        ]);

        let hits = index.search(&[0.0, 0.0], 3, 0.7).unwrap();
        let ids: Vec<&str> = hits.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["d01", "d03", "d05"]);
        assert!(hits.windows(2).all(|w| w[0].1 <= w[1].1));
        assert!(hits.iter().all(|(_, d)| *d < 0.7));
    }

    #[test]
    fn threshold_is_exclusive() {
        let index = index_with(&[("edge", vec![0.5, 0.0])]);
        assert!(index.search(&[0.0, 0.0], 5, 0.5).unwrap().is_empty());
    }

    #[test]
    fn zero_limit_is_empty() {
        let index = index_with(&[("a", vec![0.0, 0.0])]);
        assert!(index.search(&[0.0, 0.0], 0, 10.0).unwrap().is_empty());
    }

    #[test]
    fn mismatched_dimensions_fail() {
        let index = index_with(&[("a", vec![0.0, 0.0, 0.0])]);
        assert!(matches!(
            index.search(&[0.0, 0.0], 3, 0.7),
            Err(Error::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn similar_memories_preserve_distance_order() {
        let index = index_with(&[("second", vec![0.4]), ("first", vec![0.1])]);
        let memories = index.similar_memories("u", "c", &[0.0], 5, 1.0).unwrap();
        let contents: Vec<&str> = memories.iter().map(|(m, _)| m.content.as_str()).collect();
        assert_eq!(contents, vec!["first", "second"]);
    }

    #[tokio::test]
    async fn add_memory_rejects_near_duplicates() {
        let repo = MemoryRepo::new(db::init_memory().unwrap());
        let embedder = TableEmbedder(HashMap::from([
            ("Hoang loves cats", vec![1.0, 0.0]),
            ("Hoang adores cats", vec![1.0, 0.1]),
            ("Hoang moved to Hanoi", vec![-1.0, 3.0]),
        ]));
        let index = EmbeddingIndex::new(Arc::new(embedder), Arc::new(repo.clone()));

        index
            .add_memory(Memory::new("u", "c", "Hoang loves cats", Vec::new()))
            .await
            .unwrap();

        let duplicate = index
            .add_memory(Memory::new("u", "c", "Hoang adores cats", Vec::new()))
            .await;
        assert!(matches!(duplicate, Err(Error::DuplicateMemory { .. })));

        index
            .add_memory(Memory::new("u", "c", "Hoang moved to Hanoi", Vec::new()))
            .await
            .unwrap();

        assert_eq!(repo.count().unwrap(), 2);
    }

    #[tokio::test]
    async fn dedupe_is_scoped_to_the_pair() {
        let repo = MemoryRepo::new(db::init_memory().unwrap());
        let embedder = TableEmbedder(HashMap::from([("Her sister is in hospital", vec![2.0, 2.0])]));
        let index = EmbeddingIndex::new(Arc::new(embedder), Arc::new(repo.clone()));

        index
            .add_memory(Memory::new("linh", "ene", "Her sister is in hospital", Vec::new()))
            .await
            .unwrap();
        index
            .add_memory(Memory::new("hoang", "miku", "Her sister is in hospital", Vec::new()))
            .await
            .unwrap();
        let again = index
            .add_memory(Memory::new("linh", "ene", "Her sister is in hospital", Vec::new()))
            .await;

        assert!(matches!(again, Err(Error::DuplicateMemory { .. })));
        assert_eq!(repo.count().unwrap(), 2);
    }

    #[test]
    fn search_for_ignores_other_pairs() {
        let repo = MemoryRepo::new(db::init_memory().unwrap());
        for (user, content) in [("linh", "theirs"), ("hoang", "mine")] {
            let mut memory = Memory::new(user, "ene", content, vec![0.0, 0.1]);
            memory.id = content.to_string();
            repo.create(&memory).unwrap();
        }
        let index = EmbeddingIndex::new(Arc::new(TableEmbedder(HashMap::new())), Arc::new(repo));

        let hits = index.search_for("hoang", "ene", &[0.0, 0.0], 5, 1.0).unwrap();
        let ids: Vec<&str> = hits.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["mine"]);
        assert_eq!(index.search(&[0.0, 0.0], 5, 1.0).unwrap().len(), 2);
        assert!(index.search_for("hoang", "miku", &[0.0, 0.0], 5, 1.0).unwrap().is_empty());
    }
}
