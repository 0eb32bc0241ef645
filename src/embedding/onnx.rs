//! In-process sentence-transformer embeddings
//!
//! Runs all-MiniLM-L6-v2 (or another 384-dim sentence-transformer exported
//! to ONNX) on CPU. Model and tokenizer are fetched from the Hugging Face
//! hub on first start and cached under the model directory.

use async_trait::async_trait;
use ndarray::Array2;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::info;

use super::{normalize, EmbeddingProvider, EMBEDDING_DIM};
use crate::error::RagError;
use crate::Result;

const HUB_URL: &str = "https://huggingface.co";

/// Local cache layout and download of one hub model
#[derive(Debug, Clone)]
pub struct ModelFiles {
    model: String,
    root: PathBuf,
}

impl ModelFiles {
    pub fn new(model: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            model: model.into(),
            root: root.into(),
        }
    }

    /// `<root>/<owner>--<name>`
    pub fn model_dir(&self) -> PathBuf {
        self.root.join(self.model.replace('/', "--"))
    }

    pub fn model_path(&self) -> PathBuf {
        self.model_dir().join("model.onnx")
    }

    pub fn tokenizer_path(&self) -> PathBuf {
        self.model_dir().join("tokenizer.json")
    }

    pub fn is_available(&self) -> bool {
        self.model_path().exists() && self.tokenizer_path().exists()
    }

    fn remote_urls(&self) -> [(PathBuf, String); 2] {
        [
            (
                self.model_path(),
                format!("{}/{}/resolve/main/onnx/model.onnx", HUB_URL, self.model),
            ),
            (
                self.tokenizer_path(),
                format!("{}/{}/resolve/main/tokenizer.json", HUB_URL, self.model),
            ),
        ]
    }

    /// Download whichever files are missing.
    pub async fn ensure(&self) -> Result<()> {
        if self.is_available() {
            return Ok(());
        }

        info!(model = %self.model, "Embedding model not cached, downloading");
        tokio::fs::create_dir_all(self.model_dir()).await?;

        for (dest, url) in self.remote_urls() {
            if dest.exists() {
                continue;
            }
            match download(&url, &dest).await {
                Ok(size) => info!("Downloaded {} ({} bytes)", dest.display(), size),
                Err(e) => {
                    let _ = tokio::fs::remove_file(&dest).await;
                    return Err(e);
                }
            }
        }

        Ok(())
    }
}

async fn download(url: &str, dest: &Path) -> Result<usize> {
    let response = reqwest::get(url).await?;

    if !response.status().is_success() {
        return Err(RagError::Embedding(format!(
            "download of {} failed: HTTP {}",
            url,
            response.status()
        )));
    }

    let bytes = response.bytes().await?;
    tokio::fs::write(dest, &bytes).await?;
    Ok(bytes.len())
}

pub struct OnnxEmbedder {
    model: String,
    // ort sessions need exclusive access to run
    session: Mutex<Session>,
    tokenizer: tokenizers::Tokenizer,
}

impl OnnxEmbedder {
    /// Fetch (if needed) and load `files`, then check the output dimension.
    pub async fn load(files: &ModelFiles) -> Result<Self> {
        files.ensure().await?;

        let embedder = Self::from_files(&files.model, &files.model_path(), &files.tokenizer_path())?;

        let sample = embedder.embed_text("ping")?;
        if sample.len() != EMBEDDING_DIM {
            return Err(RagError::Embedding(format!(
                "{} produces {}-dim vectors, expected {}",
                files.model,
                sample.len(),
                EMBEDDING_DIM
            )));
        }

        info!(model = %files.model, "Loaded ONNX embedding model");
        Ok(embedder)
    }

    pub fn from_files(model: &str, model_path: &Path, tokenizer_path: &Path) -> Result<Self> {
        let tokenizer = tokenizers::Tokenizer::from_file(tokenizer_path).map_err(|e| {
            RagError::Embedding(format!(
                "failed to load tokenizer from {}: {}",
                tokenizer_path.display(),
                e
            ))
        })?;

        let session = Session::builder()
            .map_err(ort_error)?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(ort_error)?
            .with_intra_threads(1)
            .map_err(ort_error)?
            .commit_from_file(model_path)
            .map_err(|e| {
                RagError::Embedding(format!(
                    "failed to load ONNX model from {}: {}",
                    model_path.display(),
                    e
                ))
            })?;

        Ok(Self {
            model: model.to_string(),
            session: Mutex::new(session),
            tokenizer,
        })
    }

    /// Tokenize, run the encoder, mean-pool over the attention mask and
    /// L2-normalize.
    pub fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| RagError::Embedding(format!("tokenization failed: {}", e)))?;

        let input_ids: Vec<i64> = encoding.get_ids().iter().map(|&id| id as i64).collect();
        let attention_mask: Vec<i64> = encoding
            .get_attention_mask()
            .iter()
            .map(|&m| m as i64)
            .collect();
        let token_type_ids: Vec<i64> = encoding.get_type_ids().iter().map(|&t| t as i64).collect();
        let seq_len = input_ids.len();

        let input_ids = Array2::from_shape_vec((1, seq_len), input_ids).map_err(shape_error)?;
        let mask = Array2::from_shape_vec((1, seq_len), attention_mask.clone()).map_err(shape_error)?;
        let token_type_ids =
            Array2::from_shape_vec((1, seq_len), token_type_ids).map_err(shape_error)?;

        let mut session = self
            .session
            .lock()
            .map_err(|e| RagError::Embedding(format!("ONNX session lock poisoned: {}", e)))?;

        let outputs = session
            .run(ort::inputs![
                "input_ids" => TensorRef::from_array_view(&input_ids).map_err(ort_error)?,
                "attention_mask" => TensorRef::from_array_view(&mask).map_err(ort_error)?,
                "token_type_ids" => TensorRef::from_array_view(&token_type_ids).map_err(ort_error)?
            ])
            .map_err(|e| RagError::Embedding(format!("ONNX inference failed: {}", e)))?;

        // [1, seq_len, hidden]
        let (shape, data) = outputs[0].try_extract_tensor::<f32>().map_err(ort_error)?;
        let hidden_size = shape[shape.len() - 1] as usize;

        let mut pooled = mean_pool(data, &attention_mask, seq_len, hidden_size);
        normalize(&mut pooled);
        Ok(pooled)
    }
}

fn ort_error(e: impl std::fmt::Display) -> RagError {
    RagError::Embedding(format!("ONNX runtime error: {}", e))
}

fn shape_error(e: ndarray::ShapeError) -> RagError {
    RagError::Embedding(format!("bad input shape: {}", e))
}

/// Average token embeddings over positions where the mask is set.
fn mean_pool(embeddings: &[f32], attention_mask: &[i64], seq_len: usize, hidden_size: usize) -> Vec<f32> {
    let mut sum = vec![0.0f32; hidden_size];
    let mut count = 0.0f32;

    for (i, mask) in attention_mask.iter().enumerate().take(seq_len) {
        if *mask > 0 {
            let token = &embeddings[i * hidden_size..(i + 1) * hidden_size];
            for (acc, value) in sum.iter_mut().zip(token) {
                *acc += value;
            }
            count += 1.0;
        }
    }

    if count > 0.0 {
        for value in &mut sum {
            *value /= count;
        }
    }
    sum
}

// SAFETY: the session is only reached through the Mutex and the tokenizer
// is read-only after construction.
unsafe impl Send for OnnxEmbedder {}
unsafe impl Sync for OnnxEmbedder {}

#[async_trait]
impl EmbeddingProvider for OnnxEmbedder {
    fn dimension(&self) -> usize {
        EMBEDDING_DIM
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_text(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_layout() {
        let files = ModelFiles::new("sentence-transformers/all-MiniLM-L6-v2", "/data/models");
        assert_eq!(
            files.model_dir(),
            PathBuf::from("/data/models/sentence-transformers--all-MiniLM-L6-v2")
        );
        assert_eq!(
            files.tokenizer_path(),
            PathBuf::from("/data/models/sentence-transformers--all-MiniLM-L6-v2/tokenizer.json")
        );
        assert!(!files.is_available());
    }

    #[test]
    fn test_hub_urls_follow_model_id() {
        let files = ModelFiles::new("sentence-transformers/all-MiniLM-L6-v2", "/m");
        let urls: Vec<String> = files.remote_urls().into_iter().map(|(_, url)| url).collect();
        assert_eq!(
            urls,
            vec![
                "https://huggingface.co/sentence-transformers/all-MiniLM-L6-v2/resolve/main/onnx/model.onnx",
                "https://huggingface.co/sentence-transformers/all-MiniLM-L6-v2/resolve/main/tokenizer.json",
            ]
        );
    }

    #[test]
    fn test_mean_pool_skips_padding() {
        // two tokens of hidden size 2, second is padding
        let embeddings = [1.0, 3.0, 100.0, 100.0];
        assert_eq!(mean_pool(&embeddings, &[1, 0], 2, 2), vec![1.0, 3.0]);

        let embeddings = [1.0, 3.0, 3.0, 5.0];
        assert_eq!(mean_pool(&embeddings, &[1, 1], 2, 2), vec![2.0, 4.0]);
    }

    #[test]
    fn test_mean_pool_all_masked_is_zero() {
        assert_eq!(mean_pool(&[1.0, 2.0], &[0], 1, 2), vec![0.0, 0.0]);
    }

    #[test]
    fn test_missing_files_fail_to_load() {
        let dir = tempfile::TempDir::new().unwrap();
        let result = OnnxEmbedder::from_files(
            "m",
            &dir.path().join("model.onnx"),
            &dir.path().join("tokenizer.json"),
        );
        assert!(matches!(result, Err(RagError::Embedding(_))));
    }
}
