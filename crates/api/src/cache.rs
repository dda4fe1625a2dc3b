use dashmap::DashMap;
use extract::GraphResult;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Normalized graphs keyed by strategy fingerprint, rendered instruction and source text.
pub struct GraphCache {
    graphs: DashMap<String, Arc<GraphResult>>,
    max_entries: usize,
    hits: AtomicUsize,
    misses: AtomicUsize,
}

impl GraphCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            graphs: DashMap::new(),
            max_entries,
            hits: AtomicUsize::new(0),
            misses: AtomicUsize::new(0),
        }
    }

    pub fn key(strategy: &str, instruction: &str, text: &str) -> String {
        let mut hasher = Sha256::new();
        for part in [strategy, instruction, text] {
            hasher.update((part.len() as u64).to_le_bytes());
            hasher.update(part.as_bytes());
        }
        hex::encode(hasher.finalize())
    }

    pub fn get(&self, key: &str) -> Option<Arc<GraphResult>> {
        match self.graphs.get(key) {
            Some(entry) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(Arc::clone(entry.value()))
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn insert(&self, key: String, graph: Arc<GraphResult>) {
        if self.max_entries == 0 {
            return;
        }
        if self.graphs.len() >= self.max_entries {
            // Simple eviction: clear 25% when full
            let to_remove: Vec<_> = self
                .graphs
                .iter()
                .take((self.max_entries / 4).max(1))
                .map(|r| r.key().clone())
                .collect();
            for key in to_remove {
                self.graphs.remove(&key);
            }
        }
        self.graphs.insert(key, graph);
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            graphs_cached: self.graphs.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    pub fn clear(&self) {
        self.graphs.clear();
    }
}

#[derive(Debug, Serialize)]
pub struct CacheStats {
    pub graphs_cached: usize,
    pub hits: usize,
    pub misses: usize,
}
