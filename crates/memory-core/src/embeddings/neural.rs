//! Neural-framework embedding backend
//!
//! Loads a pretrained sentence-embedding model via `fastembed` (ONNX
//! inference). A process-wide cache keyed by `(model name, device, batch
//! size)` ensures the model is loaded at most once per process lifetime,
//! even if several [`NeuralEmbeddingProvider`]s are constructed.

use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};

use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};

use super::{l2_normalize, EmbeddingError, EmbeddingProvider};

/// Default model: a 384-dimension MiniLM-class sentence embedder.
pub const DEFAULT_MODEL_NAME: &str = "sentence-transformers/all-MiniLM-L6-v2";
pub const DEFAULT_DIMENSION: usize = 384;

/// Text longer than this is truncated before embedding.
const MAX_TEXT_LENGTH: usize = 8192;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ModelKey {
    model_name: String,
    device: String,
    batch_size: usize,
}

type ModelCache = Mutex<HashMap<ModelKey, &'static Mutex<TextEmbedding>>>;

fn model_cache() -> &'static ModelCache {
    static CACHE: OnceLock<ModelCache> = OnceLock::new();
    CACHE.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Picks the best available accelerator. `fastembed`'s ONNX execution
/// provider selection is automatic; this only affects the cache key and
/// the batch size heuristic below.
fn detect_device() -> String {
    if std::env::var_os("CUDA_VISIBLE_DEVICES").is_some() {
        "cuda".to_string()
    } else if cfg!(target_os = "macos") {
        "metal".to_string()
    } else {
        "cpu".to_string()
    }
}

fn default_batch_size(device: &str) -> usize {
    match device {
        "cuda" | "metal" => 64,
        _ => 16,
    }
}

fn cache_dir() -> std::path::PathBuf {
    if let Ok(path) = std::env::var("EMBEDDING_MODEL_CACHE") {
        return std::path::PathBuf::from(path);
    }

    if let Some(proj_dirs) = directories::ProjectDirs::from("", "", "mcp_memory") {
        return proj_dirs.cache_dir().join("fastembed");
    }

    std::path::PathBuf::from(".cache/mcp_memory/fastembed")
}

fn load_model(key: &ModelKey) -> Result<TextEmbedding, EmbeddingError> {
    let dir = cache_dir();
    if let Err(e) = std::fs::create_dir_all(&dir) {
        tracing::warn!("failed to create embedding cache dir {:?}: {}", dir, e);
    }

    let options = InitOptions::new(EmbeddingModel::AllMiniLML6V2)
        .with_cache_dir(dir)
        .with_show_download_progress(false);

    TextEmbedding::try_new(options).map_err(|e| {
        EmbeddingError::ModelInit(format!(
            "failed to initialize {} on {} (batch {}): {e}",
            key.model_name, key.device, key.batch_size
        ))
    })
}

/// `EmbeddingProvider` backed by a locally-loaded neural sentence-embedding
/// model.
pub struct NeuralEmbeddingProvider {
    key: ModelKey,
}

impl NeuralEmbeddingProvider {
    /// Initialise (or reuse) the process-wide model for the default model
    /// name, auto-detected device, and device-appropriate batch size.
    pub fn new() -> Result<Self, EmbeddingError> {
        let device = detect_device();
        let batch_size = default_batch_size(&device);
        Self::with_model(DEFAULT_MODEL_NAME, device, batch_size)
    }

    pub fn with_model(
        model_name: impl Into<String>,
        device: impl Into<String>,
        batch_size: usize,
    ) -> Result<Self, EmbeddingError> {
        let key = ModelKey {
            model_name: model_name.into(),
            device: device.into(),
            batch_size,
        };

        let mut cache = model_cache().lock().expect("model cache mutex poisoned");
        if !cache.contains_key(&key) {
            let model = load_model(&key)?;
            let leaked: &'static Mutex<TextEmbedding> = Box::leak(Box::new(Mutex::new(model)));
            cache.insert(key.clone(), leaked);
        }

        Ok(Self { key })
    }

    fn model(&self) -> &'static Mutex<TextEmbedding> {
        model_cache()
            .lock()
            .expect("model cache mutex poisoned")
            .get(&self.key)
            .expect("model was inserted by with_model before this provider was constructed")
    }
}

impl EmbeddingProvider for NeuralEmbeddingProvider {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if text.is_empty() {
            return Err(EmbeddingError::InvalidInput("text must not be empty".into()));
        }

        let truncated = if text.len() > MAX_TEXT_LENGTH {
            // Truncate on the last char boundary at or before MAX_TEXT_LENGTH;
            // a raw byte slice there could split a multi-byte character.
            let end = text
                .char_indices()
                .map(|(i, c)| i + c.len_utf8())
                .take_while(|&end| end <= MAX_TEXT_LENGTH)
                .last()
                .unwrap_or(0);
            &text[..end]
        } else {
            text
        };

        let mut model = self.model().lock().expect("model instance mutex poisoned");
        let mut embeddings = model
            .embed(vec![truncated], None)
            .map_err(|e| EmbeddingError::Generation(e.to_string()))?;

        let mut vector = embeddings
            .pop()
            .ok_or_else(|| EmbeddingError::Generation("model returned no embeddings".into()))?;
        l2_normalize(&mut vector);
        Ok(vector)
    }

    fn dimension(&self) -> usize {
        DEFAULT_DIMENSION
    }

    fn model_name(&self) -> &str {
        &self.key.model_name
    }
}
