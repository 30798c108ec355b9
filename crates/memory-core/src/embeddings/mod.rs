//! Embedding pipeline
//!
//! Turns text into a fixed-length, unit-norm vector. Two backends implement
//! [`EmbeddingProvider`]: [`neural`] (fastembed/ONNX, the default) and
//! [`portable`] (a downloaded quantised archive, selected by
//! `USE_PORTABLE_RUNTIME=1`). Both are wrapped in a [`CachedProvider`] that
//! memoises results by a hash of the input text.

pub mod neural;
#[cfg(feature = "portable-runtime")]
pub mod portable;

use std::hash::{Hash, Hasher};
use std::num::NonZeroUsize;
use std::sync::Mutex;

use lru::LruCache;

pub use neural::NeuralEmbeddingProvider;
#[cfg(feature = "portable-runtime")]
pub use portable::PortableEmbeddingProvider;

/// Default capacity of the in-process embedding-result cache.
pub const DEFAULT_CACHE_CAPACITY: usize = 1_000;

/// Errors a backend can raise while loading a model or embedding text.
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("failed to initialize embedding model: {0}")]
    ModelInit(String),
    #[error("failed to generate embedding: {0}")]
    Generation(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

/// A backend that turns text into a fixed-length, unit-norm vector.
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a single piece of text.
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// Dimension of vectors this provider produces.
    fn dimension(&self) -> usize;

    /// Identifier used in stats output and model-cache keys.
    fn model_name(&self) -> &str;
}

/// Wraps an [`EmbeddingProvider`] with a bounded LRU cache keyed by a hash
/// of the input text, so repeated queries skip re-embedding entirely.
pub struct CachedProvider<P> {
    inner: P,
    cache: Mutex<LruCache<u64, Vec<f32>>>,
}

impl<P: EmbeddingProvider> CachedProvider<P> {
    pub fn new(inner: P) -> Self {
        Self::with_capacity(inner, DEFAULT_CACHE_CAPACITY)
    }

    pub fn with_capacity(inner: P, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::new(1).unwrap());
        Self {
            inner,
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    fn cache_key(text: &str) -> u64 {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        text.hash(&mut hasher);
        hasher.finish()
    }
}

impl<P: EmbeddingProvider> EmbeddingProvider for CachedProvider<P> {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let key = Self::cache_key(text);

        if let Some(hit) = self.cache.lock().expect("cache mutex poisoned").get(&key) {
            return Ok(hit.clone());
        }

        let vector = self.inner.embed(text)?;
        self.cache
            .lock()
            .expect("cache mutex poisoned")
            .put(key, vector.clone());
        Ok(vector)
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }
}

/// L2-normalise `vector` in place.
pub fn l2_normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in vector {
            *x /= norm;
        }
    }
}

/// Cosine similarity between two equal-length vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let mut dot = 0.0_f32;
    let mut norm_a = 0.0_f32;
    let mut norm_b = 0.0_f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = (norm_a * norm_b).sqrt();
    if denom > 0.0 {
        dot / denom
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingProvider {
        calls: AtomicUsize,
    }

    impl EmbeddingProvider for CountingProvider {
        fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![1.0, 0.0, 0.0])
        }

        fn dimension(&self) -> usize {
            3
        }

        fn model_name(&self) -> &str {
            "counting-test-provider"
        }
    }

    #[test]
    fn cache_hit_avoids_calling_inner_provider_again() {
        let cached = CachedProvider::new(CountingProvider { calls: AtomicUsize::new(0) });

        cached.embed("hello").unwrap();
        cached.embed("hello").unwrap();
        cached.embed("hello").unwrap();

        assert_eq!(cached.inner.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn distinct_text_calls_inner_provider_again() {
        let cached = CachedProvider::new(CountingProvider { calls: AtomicUsize::new(0) });

        cached.embed("hello").unwrap();
        cached.embed("world").unwrap();

        assert_eq!(cached.inner.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn cosine_similarity_of_identical_vectors_is_one() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }
}
