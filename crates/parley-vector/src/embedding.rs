//! Embedding service trait and implementations.
//!
//! - `OnnxEmbeddingService` runs a sentence-transformer ONNX export (e.g.
//!   all-MiniLM-L6-v2) through ort, tokenizing with HuggingFace tokenizers.
//! - `LexicalEmbedding` is a bag-of-words embedding over a vocabulary fitted
//!   from known text (route utterances, FAQ questions). It needs no model
//!   files and is fully deterministic.
//! - `MockEmbedding` provides hash-based vectors for tests.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::path::Path;
use std::sync::{Arc, Mutex};

use ort::session::Session;
use ort::value::TensorRef;
use parley_core::error::ParleyError;
use tokenizers::Tokenizer;
use tracing::info;

use crate::similarity::l2_normalize;

/// Service for generating text embeddings.
///
/// Identical input must always produce the identical vector; the router
/// relies on this to cache utterance embeddings at startup.
pub trait EmbeddingService: Send + Sync {
    /// Generate an embedding vector for the given text.
    fn embed(
        &self,
        text: &str,
    ) -> impl std::future::Future<Output = Result<Vec<f32>, ParleyError>> + Send;

    /// Return the dimensionality of vectors produced by this service.
    fn dimensions(&self) -> usize;
}

/// Object-safe version of [`EmbeddingService`] for dynamic dispatch.
///
/// `EmbeddingService::embed` returns `impl Future` and so cannot sit behind
/// `dyn`. Every `EmbeddingService` gets this trait through the blanket impl.
pub trait DynEmbeddingService: Send + Sync {
    fn embed_boxed<'a>(
        &'a self,
        text: &'a str,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Vec<f32>, ParleyError>> + Send + 'a>>;

    fn dimensions(&self) -> usize;
}

impl<T: EmbeddingService> DynEmbeddingService for T {
    fn embed_boxed<'a>(
        &'a self,
        text: &'a str,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Vec<f32>, ParleyError>> + Send + 'a>>
    {
        Box::pin(self.embed(text))
    }

    fn dimensions(&self) -> usize {
        EmbeddingService::dimensions(self)
    }
}

fn embed_err<E: std::fmt::Display>(stage: &'static str) -> impl FnOnce(E) -> ParleyError {
    move |e| ParleyError::Embedding(format!("{}: {}", stage, e))
}

fn reject_blank(text: &str) -> Result<(), ParleyError> {
    if text.trim().is_empty() {
        return Err(ParleyError::Embedding("Cannot embed empty text".to_string()));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// OnnxEmbeddingService
// ---------------------------------------------------------------------------

/// ONNX Runtime-backed sentence-transformer embeddings.
///
/// The model directory must contain `model.onnx` and `tokenizer.json`. The
/// model takes `input_ids`, `attention_mask` and `token_type_ids` and yields
/// token embeddings, which are mean-pooled under the attention mask and
/// L2-normalized.
pub struct OnnxEmbeddingService {
    session: Arc<Mutex<Session>>,
    tokenizer: Arc<Tokenizer>,
    dimensions: usize,
}

// SAFETY: the ort session is only reached through the Mutex, and the
// tokenizer is read-only after load.
unsafe impl Send for OnnxEmbeddingService {}
unsafe impl Sync for OnnxEmbeddingService {}

impl std::fmt::Debug for OnnxEmbeddingService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnnxEmbeddingService")
            .field("dimensions", &self.dimensions)
            .finish()
    }
}

impl Clone for OnnxEmbeddingService {
    fn clone(&self) -> Self {
        Self {
            session: Arc::clone(&self.session),
            tokenizer: Arc::clone(&self.tokenizer),
            dimensions: self.dimensions,
        }
    }
}

impl OnnxEmbeddingService {
    /// Load a sentence-transformer model from the given directory.
    pub fn from_directory(model_dir: &Path) -> Result<Self, ParleyError> {
        let model_path = model_dir.join("model.onnx");
        let tokenizer_path = model_dir.join("tokenizer.json");
        for required in [&model_path, &tokenizer_path] {
            if !required.exists() {
                return Err(ParleyError::Embedding(format!(
                    "missing model file {}",
                    required.display()
                )));
            }
        }

        let session = Session::builder()
            .map_err(embed_err("ONNX session builder"))?
            .with_intra_threads(1)
            .map_err(embed_err("ONNX set threads"))?
            .commit_from_file(&model_path)
            .map_err(embed_err("ONNX load model"))?;

        // Output is [batch, seq_len, hidden]; MiniLM's hidden size is 384.
        let dimensions = session
            .outputs()
            .first()
            .and_then(|out| out.dtype().tensor_shape())
            .and_then(|shape| shape.last().copied())
            .filter(|d| *d > 0)
            .map(|d| d as usize)
            .unwrap_or(384);

        let tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(embed_err("load tokenizer"))?;

        info!(
            model = %model_path.display(),
            dimensions,
            "Loaded ONNX embedding model"
        );

        Ok(Self {
            session: Arc::new(Mutex::new(session)),
            tokenizer: Arc::new(tokenizer),
            dimensions,
        })
    }

    fn embed_blocking(&self, text: &str) -> Result<Vec<f32>, ParleyError> {
        reject_blank(text)?;

        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(embed_err("tokenization failed"))?;

        let widen = |xs: &[u32]| xs.iter().map(|&x| x as i64).collect::<Vec<i64>>();
        let input_ids = widen(encoding.get_ids());
        let attention_mask = widen(encoding.get_attention_mask());
        let token_type_ids = widen(encoding.get_type_ids());
        let seq_len = input_ids.len();

        let to_array = |name: &str, data: Vec<i64>| {
            ndarray::Array2::from_shape_vec((1, seq_len), data)
                .map_err(|e| ParleyError::Embedding(format!("{} array: {}", name, e)))
        };
        let ids_array = to_array("input_ids", input_ids)?;
        let mask_array = to_array("attention_mask", attention_mask.clone())?;
        let type_array = to_array("token_type_ids", token_type_ids)?;

        let ids_ref = TensorRef::from_array_view(&ids_array).map_err(embed_err("input_ids tensor"))?;
        let mask_ref =
            TensorRef::from_array_view(&mask_array).map_err(embed_err("attention_mask tensor"))?;
        let type_ref =
            TensorRef::from_array_view(&type_array).map_err(embed_err("token_type_ids tensor"))?;

        let mut session = self
            .session
            .lock()
            .map_err(|e| ParleyError::Embedding(format!("session lock poisoned: {}", e)))?;
        let outputs = session
            .run(ort::inputs![ids_ref, mask_ref, type_ref])
            .map_err(embed_err("inference failed"))?;

        let (shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(embed_err("extract embeddings"))?;

        let hidden_dim = match shape.iter().copied().collect::<Vec<i64>>().as_slice() {
            [.., _, last] if *last > 0 => *last as usize,
            other => {
                return Err(ParleyError::Embedding(format!(
                    "unexpected output shape: {:?}",
                    other
                )))
            }
        };

        let mut pooled = mean_pool(data, &attention_mask, hidden_dim);
        l2_normalize(&mut pooled);
        Ok(pooled)
    }
}

/// Average token embeddings over positions whose mask value is non-zero.
fn mean_pool(token_embeddings: &[f32], mask: &[i64], hidden_dim: usize) -> Vec<f32> {
    let mut pooled = vec![0.0f32; hidden_dim];
    let mut count = 0usize;
    for (tok_idx, _) in mask.iter().enumerate().filter(|(_, m)| **m > 0) {
        let offset = tok_idx * hidden_dim;
        let Some(row) = token_embeddings.get(offset..offset + hidden_dim) else {
            break;
        };
        for (acc, v) in pooled.iter_mut().zip(row) {
            *acc += v;
        }
        count += 1;
    }
    if count > 0 {
        for val in &mut pooled {
            *val /= count as f32;
        }
    }
    pooled
}

impl EmbeddingService for OnnxEmbeddingService {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ParleyError> {
        // Inference is CPU-bound; keep it off the async workers.
        let svc = self.clone();
        let text = text.to_string();
        tokio::task::spawn_blocking(move || svc.embed_blocking(&text))
            .await
            .map_err(|e| ParleyError::Embedding(format!("embedding task panicked: {}", e)))?
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

// ---------------------------------------------------------------------------
// LexicalEmbedding
// ---------------------------------------------------------------------------

/// Bag-of-words embedding over a fixed vocabulary.
///
/// Each vocabulary term owns one dimension holding its count in the text; a
/// final dimension collects every out-of-vocabulary token. Vectors are
/// L2-normalized, so cosine similarity reduces to normalized term overlap.
/// Tokens are lowercase alphanumeric runs of at least two characters.
#[derive(Debug, Clone)]
pub struct LexicalEmbedding {
    vocabulary: Arc<HashMap<String, usize>>,
}

impl LexicalEmbedding {
    /// Fit the vocabulary from a corpus. Term order follows first appearance.
    pub fn fit<I, S>(corpus: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut vocabulary = HashMap::new();
        for text in corpus {
            for token in Self::tokenize(text.as_ref()) {
                let next = vocabulary.len();
                vocabulary.entry(token).or_insert(next);
            }
        }
        Self {
            vocabulary: Arc::new(vocabulary),
        }
    }

    /// Split text into lowercase alphanumeric tokens, dropping one-letter ones.
    pub fn tokenize(text: &str) -> Vec<String> {
        text.split(|c: char| !c.is_alphanumeric())
            .filter(|t| t.chars().count() >= 2)
            .map(|t| t.to_lowercase())
            .collect()
    }

    pub fn vocabulary_len(&self) -> usize {
        self.vocabulary.len()
    }

    fn vectorize(&self, text: &str) -> Vec<f32> {
        let oov_slot = self.vocabulary.len();
        let mut vector = vec![0.0f32; oov_slot + 1];
        for token in Self::tokenize(text) {
            let slot = self.vocabulary.get(&token).copied().unwrap_or(oov_slot);
            vector[slot] += 1.0;
        }
        l2_normalize(&mut vector);
        vector
    }
}

impl EmbeddingService for LexicalEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ParleyError> {
        reject_blank(text)?;
        Ok(self.vectorize(text))
    }

    fn dimensions(&self) -> usize {
        self.vocabulary.len() + 1
    }
}

// ---------------------------------------------------------------------------
// MockEmbedding
// ---------------------------------------------------------------------------

/// Mock embedding service returning deterministic 384-dimensional vectors
/// derived from a hash of the input text.
#[derive(Debug, Clone, Default)]
pub struct MockEmbedding;

impl MockEmbedding {
    pub fn new() -> Self {
        Self
    }

    fn hash_to_vector(text: &str) -> Vec<f32> {
        let mut result: Vec<f32> = (0..384u32)
            .map(|i| {
                let mut hasher = DefaultHasher::new();
                text.hash(&mut hasher);
                i.hash(&mut hasher);
                let h = hasher.finish();
                (((h as f64) / (u64::MAX as f64)) * 2.0 - 1.0) as f32
            })
            .collect();
        l2_normalize(&mut result);
        result
    }
}

impl EmbeddingService for MockEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ParleyError> {
        reject_blank(text)?;
        Ok(Self::hash_to_vector(text))
    }

    fn dimensions(&self) -> usize {
        384
    }
}
