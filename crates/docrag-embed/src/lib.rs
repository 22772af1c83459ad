//! docrag-embed
//!
//! Embedding providers behind `docrag_core::Embedder`: the local BGE-M3 model
//! (candle), a deterministic hash embedder for tests and offline development,
//! and a retrying wrapper owning the backoff policy.

use anyhow::{Result, anyhow};
use std::path::{Path, PathBuf};
use std::time::Instant;

use candle_core::{Device, DType, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::xlm_roberta::{XLMRobertaModel, Config as XLMRobertaConfig};
use tokenizers::Tokenizer;
use tracing::{debug, info, warn};

use docrag_core::config::EmbeddingSettings;
use docrag_core::traits::Embedder;

pub mod device;
pub mod pool;
pub mod retry;
pub mod tokenize;

pub use pool::masked_mean_l2;
pub use retry::{RetryPolicy, RetryingEmbedder};

/// BGE-M3 output dimensionality.
pub const BGE_M3_DIM: usize = 1024;

/// Provider-side failure classes. Only `Transient` is worth retrying.
#[derive(Debug, thiserror::Error)]
pub enum EmbedError {
    #[error("cannot embed empty text (input #{0})")]
    EmptyInput(usize),
    #[error("transient provider failure: {0}")]
    Transient(String),
}

fn reject_empty(texts: &[String]) -> Result<()> {
    match texts.iter().position(|t| t.trim().is_empty()) {
        Some(i) => Err(EmbedError::EmptyInput(i).into()),
        None => Ok(()),
    }
}

/// BGE-M3 (XLM-RoBERTa) loaded from local files: `tokenizer.json`,
/// `config.json` and `pytorch_model.bin`.
pub struct BgeM3Embedder { model: XLMRobertaModel, tokenizer: Tokenizer, device: Device, max_len: usize }

impl BgeM3Embedder {
    pub fn new(model_dir: &Path, max_len: usize) -> Result<Self> {
        let device = device::select_device();
        info!(dir = %model_dir.display(), "loading BGE-M3 model");
        let tokenizer_path = model_dir.join("tokenizer.json");
        let tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| anyhow!("Failed to load tokenizer from {}: {}", tokenizer_path.display(), e))?;
        let config_path = model_dir.join("config.json");
        let config: XLMRobertaConfig = serde_json::from_str(&std::fs::read_to_string(&config_path)?)?;
        let weights_path = model_dir.join("pytorch_model.bin");
        let weights = candle_core::pickle::read_all(&weights_path)?;
        let weights_map: std::collections::HashMap<String, Tensor> = weights.into_iter().collect();
        let vb = VarBuilder::from_tensors(weights_map, DType::F32, &device);
        let model = XLMRobertaModel::new(&config, vb)?;
        info!("BGE-M3 model loaded");
        Ok(Self { model, tokenizer, device, max_len })
    }

    fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        let start = Instant::now();
        let (input_ids, attention_mask) = tokenize::tokenize_on_device(&self.tokenizer, text, self.max_len, &self.device)?;
        let token_type_ids = input_ids.zeros_like()?;
        let hidden = self.model.forward(&input_ids, &attention_mask, &token_type_ids, None, None, None)?;
        let pooled = masked_mean_l2(&hidden, &attention_mask)?;
        let emb = pooled.to_device(&Device::Cpu)?.squeeze(0)?.to_vec1::<f32>()?;
        if emb.len() != BGE_M3_DIM {
            return Err(anyhow!("model produced {} dims, expected {}", emb.len(), BGE_M3_DIM));
        }
        let elapsed = start.elapsed();
        if elapsed.as_millis() > 100 { debug!(?elapsed, "slow embedding"); }
        Ok(emb)
    }
}

impl Embedder for BgeM3Embedder {
    fn dim(&self) -> usize { BGE_M3_DIM }
    fn max_len(&self) -> usize { self.max_len }
    fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        reject_empty(texts)?;
        texts.iter().map(|t| self.embed_one(t)).collect()
    }
}

/// Deterministic bag-of-tokens embedder: each whitespace token is hashed
/// (xxHash64, seed 0) into a bucket, then the vector is L2-normalized.
pub struct HashEmbedder { dim: usize }

impl HashEmbedder {
    pub fn new(dim: usize) -> Self { Self { dim: dim.max(1) } }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        use std::hash::{Hash, Hasher};
        use twox_hash::XxHash64;
        let mut v = vec![0f32; self.dim];
        for (i, token) in text.split_whitespace().enumerate() {
            let mut hasher = XxHash64::with_seed(0);
            token.to_lowercase().hash(&mut hasher);
            let h = hasher.finish();
            let idx = usize::try_from(h % self.dim as u64).unwrap_or(0);
            let val = f32::from(u16::try_from(h >> 48).unwrap_or(u16::MAX)) / f32::from(u16::MAX);
            v[idx] += val + (i % 3) as f32 * 0.01;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt().max(1e-6);
        for x in &mut v { *x /= norm; }
        v
    }
}

impl Embedder for HashEmbedder {
    fn dim(&self) -> usize { self.dim }
    fn max_len(&self) -> usize { usize::MAX }
    fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        reject_empty(texts)?;
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

/// Builds the provider selected by `settings`. `APP_USE_FAKE_EMBEDDINGS=1`
/// forces the hash embedder regardless of configuration.
pub fn get_default_embedder(settings: &EmbeddingSettings) -> Result<Box<dyn Embedder>> {
    let forced = std::env::var("APP_USE_FAKE_EMBEDDINGS")
        .ok()
        .is_some_and(|v| v == "1" || v.eq_ignore_ascii_case("true"));
    if forced || settings.use_fake {
        info!(dim = settings.dimension, "using hash embedder");
        return Ok(Box::new(HashEmbedder::new(settings.dimension)));
    }
    if settings.dimension != BGE_M3_DIM {
        return Err(anyhow!(
            "embedding.dimension is {} but BGE-M3 produces {} dims; vectors from different models are not interchangeable",
            settings.dimension, BGE_M3_DIM
        ));
    }
    let dir = resolve_model_dir(settings.model_dir.as_deref())?;
    Ok(Box::new(BgeM3Embedder::new(&dir, settings.max_len)?))
}

fn resolve_model_dir(configured: Option<&str>) -> Result<PathBuf> {
    let candidates = configured
        .map(docrag_core::config::expand_path)
        .into_iter()
        .chain(std::env::var("MODEL_DIR").ok().map(PathBuf::from))
        .chain([PathBuf::from("../models/bge-m3"), PathBuf::from("models/bge-m3")]);
    for dir in candidates {
        if dir.exists() {
            info!(dir = %dir.display(), "using model dir");
            return Ok(dir);
        }
        warn!(dir = %dir.display(), "model dir does not exist");
    }
    Err(anyhow!("Could not locate BGE-M3 model directory"))
}
