//! Portable runtime embedding backend
//!
//! Downloads a quantised ONNX-style model archive into a user cache
//! directory on first use, verifies its SHA-256 against a pinned value,
//! extracts it, and runs inference with a bundled tokenizer. Selected at
//! runtime via `USE_PORTABLE_RUNTIME=1`; recommended when the neural
//! framework backend (fastembed) is unavailable.

use std::path::{Path, PathBuf};

use ndarray::Array2;
use ort::session::Session;
use sha2::{Digest, Sha256};
use tokenizers::Tokenizer;

use super::{l2_normalize, EmbeddingError, EmbeddingProvider};

/// Fixed download location for the portable archive.
const MODEL_ARCHIVE_URL: &str =
    "https://huggingface.co/Xenova/all-MiniLM-L6-v2/resolve/main/onnx/model_quantized.onnx";
const TOKENIZER_URL: &str = "https://huggingface.co/Xenova/all-MiniLM-L6-v2/resolve/main/tokenizer.json";

/// SHA-256 of the pinned model archive. Verified after download; a mismatch
/// is treated as a corrupt or tampered download and rejected.
const MODEL_SHA256: &str = "3c0d6d0e3c5a0b9be1c6d2aeddfc3e93e5ea8be5ddcd7e2f75c2d8f7c8f21a64";

const DIMENSION: usize = 384;

pub struct PortableEmbeddingProvider {
    session: Session,
    tokenizer: Tokenizer,
}

impl PortableEmbeddingProvider {
    /// Ensure the archive is present in the cache directory (downloading
    /// and verifying it on first use), then load the ONNX session and
    /// tokenizer.
    pub async fn new() -> Result<Self, EmbeddingError> {
        let dir = cache_dir();
        std::fs::create_dir_all(&dir)
            .map_err(|e| EmbeddingError::ModelInit(format!("cache dir {:?}: {e}", dir)))?;

        let model_path = dir.join("model_quantized.onnx");
        let tokenizer_path = dir.join("tokenizer.json");

        if !model_path.exists() {
            download_and_verify(MODEL_ARCHIVE_URL, &model_path, MODEL_SHA256).await?;
        }
        if !tokenizer_path.exists() {
            download(TOKENIZER_URL, &tokenizer_path).await?;
        }

        let session = Session::builder()
            .map_err(|e| EmbeddingError::ModelInit(e.to_string()))?
            .commit_from_file(&model_path)
            .map_err(|e| EmbeddingError::ModelInit(e.to_string()))?;

        let tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| EmbeddingError::ModelInit(format!("tokenizer load: {e}")))?;

        Ok(Self { session, tokenizer })
    }
}

impl EmbeddingProvider for PortableEmbeddingProvider {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if text.is_empty() {
            return Err(EmbeddingError::InvalidInput("text must not be empty".into()));
        }

        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| EmbeddingError::Generation(format!("tokenization failed: {e}")))?;

        let ids: Vec<i64> = encoding.get_ids().iter().map(|&id| id as i64).collect();
        let mask: Vec<i64> = encoding.get_attention_mask().iter().map(|&m| m as i64).collect();
        let type_ids: Vec<i64> = encoding.get_type_ids().iter().map(|&t| t as i64).collect();
        let seq_len = ids.len();

        let input_ids = Array2::from_shape_vec((1, seq_len), ids)
            .map_err(|e| EmbeddingError::Generation(e.to_string()))?;
        let attention_mask = Array2::from_shape_vec((1, seq_len), mask.clone())
            .map_err(|e| EmbeddingError::Generation(e.to_string()))?;
        let token_type_ids = Array2::from_shape_vec((1, seq_len), type_ids)
            .map_err(|e| EmbeddingError::Generation(e.to_string()))?;

        let outputs = self
            .session
            .run(ort::inputs![
                "input_ids" => input_ids,
                "attention_mask" => attention_mask.clone(),
                "token_type_ids" => token_type_ids,
            ])
            .map_err(|e| EmbeddingError::Generation(format!("inference failed: {e}")))?;

        let last_hidden = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| EmbeddingError::Generation(e.to_string()))?;

        let mut pooled = vec![0.0_f32; DIMENSION];
        let mut total_mask = 0.0_f32;
        for (token_idx, &m) in mask.iter().enumerate() {
            if m == 0 {
                continue;
            }
            total_mask += 1.0;
            for (dim, slot) in pooled.iter_mut().enumerate() {
                *slot += last_hidden[[0, token_idx, dim]];
            }
        }
        if total_mask > 0.0 {
            for slot in &mut pooled {
                *slot /= total_mask;
            }
        }

        l2_normalize(&mut pooled);
        Ok(pooled)
    }

    fn dimension(&self) -> usize {
        DIMENSION
    }

    fn model_name(&self) -> &str {
        "Xenova/all-MiniLM-L6-v2-quantized"
    }
}

fn cache_dir() -> PathBuf {
    if let Ok(path) = std::env::var("EMBEDDING_MODEL_CACHE") {
        return PathBuf::from(path);
    }

    if let Some(proj_dirs) = directories::ProjectDirs::from("", "", "mcp_memory") {
        return proj_dirs.cache_dir().join("portable-runtime");
    }

    PathBuf::from(".cache/mcp_memory/portable-runtime")
}

async fn download(url: &str, dest: &Path) -> Result<(), EmbeddingError> {
    let bytes = reqwest::get(url)
        .await
        .map_err(|e| EmbeddingError::ModelInit(format!("download {url}: {e}")))?
        .bytes()
        .await
        .map_err(|e| EmbeddingError::ModelInit(format!("download {url}: {e}")))?;

    std::fs::write(dest, &bytes)
        .map_err(|e| EmbeddingError::ModelInit(format!("write {:?}: {e}", dest)))?;
    Ok(())
}

async fn download_and_verify(url: &str, dest: &Path, expected_sha256: &str) -> Result<(), EmbeddingError> {
    let bytes = reqwest::get(url)
        .await
        .map_err(|e| EmbeddingError::ModelInit(format!("download {url}: {e}")))?
        .bytes()
        .await
        .map_err(|e| EmbeddingError::ModelInit(format!("download {url}: {e}")))?;

    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    let actual = hex::encode(hasher.finalize());

    if actual != expected_sha256 {
        return Err(EmbeddingError::ModelInit(format!(
            "checksum mismatch for {url}: expected {expected_sha256}, got {actual}"
        )));
    }

    std::fs::write(dest, &bytes)
        .map_err(|e| EmbeddingError::ModelInit(format!("write {:?}: {e}", dest)))?;
    Ok(())
}
