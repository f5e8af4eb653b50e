//! In-memory vector index with brute-force cosine similarity search.
//!
//! Search is O(n) per query, which is fine for knowledge bases of a few
//! thousand entries such as a shop FAQ.

use std::sync::{Arc, RwLock};

use uuid::Uuid;

use parley_core::error::ParleyError;

use crate::similarity::cosine_similarity;

/// A single hit returned from a vector search.
#[derive(Debug, Clone)]
pub struct SearchHit<T> {
    pub id: Uuid,
    /// Cosine similarity score (-1.0 to 1.0).
    pub score: f64,
    pub payload: T,
}

#[derive(Debug, Clone)]
struct VectorEntry<T> {
    id: Uuid,
    embedding: Vec<f32>,
    payload: T,
}

/// In-memory vector index keyed by UUID, carrying a typed payload per entry.
///
/// Entries keep insertion order so equal scores come back in the order
/// they were added. Thread-safe via an interior `RwLock`; clones share
/// the same storage.
#[derive(Debug, Clone)]
pub struct VectorIndex<T> {
    entries: Arc<RwLock<Vec<VectorEntry<T>>>>,
}

impl<T: Clone> VectorIndex<T> {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Insert a vector with its payload. Replaces an existing entry with the same ID.
    pub fn insert(&self, id: Uuid, embedding: Vec<f32>, payload: T) -> Result<(), ParleyError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|e| ParleyError::Storage(format!("Lock poisoned: {}", e)))?;
        let entry = VectorEntry {
            id,
            embedding,
            payload,
        };
        match entries.iter_mut().find(|e| e.id == id) {
            Some(existing) => *existing = entry,
            None => entries.push(entry),
        }
        Ok(())
    }

    /// Return the `k` entries most similar to `query`, best first.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit<T>>, ParleyError> {
        let entries = self
            .entries
            .read()
            .map_err(|e| ParleyError::Storage(format!("Lock poisoned: {}", e)))?;

        let mut scored: Vec<(f64, &VectorEntry<T>)> = entries
            .iter()
            .map(|entry| (cosine_similarity(query, &entry.embedding), entry))
            .collect();

        // Stable sort keeps insertion order among equal scores.
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

        Ok(scored
            .into_iter()
            .take(k)
            .map(|(score, entry)| SearchHit {
                id: entry.id,
                score,
                payload: entry.payload.clone(),
            })
            .collect())
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Clone> Default for VectorIndex<T> {
    fn default() -> Self {
        Self::new()
    }
}
