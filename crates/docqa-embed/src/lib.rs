//! docqa-embed
//!
//! Candle-backed models: a BERT sentence encoder implementing
//! [`Embedder`], a cross-encoder implementing `RelevanceScorer` (see
//! [`rerank`]), and a deterministic hashing embedder for tests and
//! development.

use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config as BertConfig};
use tokenizers::Tokenizer;
use tracing::{debug, info, warn};

use docqa_core::config::EmbeddingSettings;
use docqa_core::traits::Embedder;

pub mod device;
pub mod pool;
pub mod rerank;
pub mod tokenize;

pub use pool::masked_mean_l2;
pub use rerank::{load_reranker, CrossEncoder};

const EMBED_BATCH: usize = 32;

/// Sentence encoder (all-MiniLM-L6-v2 layout by default): BERT hidden states,
/// masked mean pooling, L2 normalisation.
pub struct EmbeddingModel { model: BertModel, tokenizer: Tokenizer, device: Device, dim: usize, max_len: usize }

impl EmbeddingModel {
    pub fn load(model_dir: &Path, max_len: usize) -> Result<Self> {
        let device = device::select_device();
        info!("Loading embedding model from {}", model_dir.display());
        let tokenizer = tokenize::truncating(load_tokenizer(model_dir)?, max_len)?;
        let (config, hidden_size) = load_bert_config(model_dir)?;
        let vb = load_weights(model_dir, &device)?;
        let model = BertModel::load(vb, &config)?;
        info!("Embedding model loaded (dim={})", hidden_size);
        Ok(Self { model, tokenizer, device, dim: hidden_size, max_len })
    }

    fn embed_chunk(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let inputs: Vec<&str> = texts.iter().map(String::as_str).collect();
        let batch = tokenize::tokenize_batch(&self.tokenizer, inputs, &self.device)?;
        let hidden = self.model.forward(&batch.input_ids, &batch.token_type_ids, Some(&batch.attention_mask))?;
        let pooled = masked_mean_l2(&hidden, &batch.attention_mask)?;
        Ok(pooled.to_device(&Device::Cpu)?.to_dtype(DType::F32)?.to_vec2()?)
    }
}

impl Embedder for EmbeddingModel {
    fn dim(&self) -> usize { self.dim }

    fn max_len(&self) -> usize { self.max_len }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let start = Instant::now();
        let mut out = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(EMBED_BATCH) { out.extend(self.embed_chunk(chunk)?); }
        debug!("Embedded {} texts in {:?}", texts.len(), start.elapsed());
        Ok(out)
    }
}

/// Hashes whitespace tokens into buckets; identical text gives identical
/// vectors and shared words give positive similarity. No model files needed.
pub struct FakeEmbedder { dim: usize }

impl FakeEmbedder {
    pub fn new(dim: usize) -> Self { Self { dim: dim.max(1) } }

    fn embed_text(&self, text: &str) -> Vec<f32> {
        use std::hash::{Hash, Hasher};
        use twox_hash::XxHash64;
        let mut v = vec![0f32; self.dim];
        for token in text.split_whitespace() {
            let token = token.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase();
            if token.is_empty() { continue; }
            let mut hasher = XxHash64::with_seed(0);
            token.hash(&mut hasher);
            let h = hasher.finish();
            let idx = (h as usize) % self.dim;
            v[idx] += 0.5 + (((h >> 32) as u32) as f32) / (u32::MAX as f32);
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 { for x in &mut v { *x /= norm; } }
        v
    }
}

impl Embedder for FakeEmbedder {
    fn dim(&self) -> usize { self.dim }

    fn max_len(&self) -> usize { usize::MAX }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> { Ok(texts.iter().map(|t| self.embed_text(t)).collect()) }
}

/// `APP_USE_FAKE_EMBEDDINGS=1` or `embedding.fake` selects [`FakeEmbedder`];
/// otherwise the model is loaded from the resolved model directory.
pub fn get_default_embedder(settings: &EmbeddingSettings) -> Result<Arc<dyn Embedder>> {
    let use_fake = std::env::var("APP_USE_FAKE_EMBEDDINGS").ok().map(|v| v == "1" || v.eq_ignore_ascii_case("true")).unwrap_or(settings.fake);
    if use_fake {
        info!("Using FakeEmbedder (dim={})", settings.dim);
        return Ok(Arc::new(FakeEmbedder::new(settings.dim)));
    }
    let model_dir = resolve_model_dir(settings.model_dir.as_deref())?;
    Ok(Arc::new(EmbeddingModel::load(&model_dir, settings.max_len)?))
}

fn resolve_model_dir(configured: Option<&str>) -> Result<PathBuf> {
    if let Some(dir) = configured {
        let p = docqa_core::config::expand_path(dir);
        if p.exists() { return Ok(p); }
        warn!("Configured embedding.model_dir {} does not exist", p.display());
    }
    for var in ["APP_MODEL_DIR", "MODEL_DIR"] {
        if let Ok(dir) = std::env::var(var) { let p = PathBuf::from(&dir); if p.exists() { info!("Using {}: {}", var, p.display()); return Ok(p); } }
    }
    let local = Path::new("models/all-MiniLM-L6-v2");
    if local.exists() { return Ok(local.to_path_buf()); }
    Err(anyhow!("Could not locate embedding model directory"))
}

pub(crate) fn load_tokenizer(model_dir: &Path) -> Result<Tokenizer> {
    let tokenizer_path = model_dir.join("tokenizer.json");
    Tokenizer::from_file(&tokenizer_path).map_err(|e| anyhow!("Failed to load tokenizer from {}: {}", tokenizer_path.display(), e))
}

/// Parse `config.json`, returning the BERT config and its hidden size.
pub(crate) fn load_bert_config(model_dir: &Path) -> Result<(BertConfig, usize)> {
    let raw = std::fs::read_to_string(model_dir.join("config.json"))?;
    let config: BertConfig = serde_json::from_str(&raw)?;
    let value: serde_json::Value = serde_json::from_str(&raw)?;
    let hidden_size = value.get("hidden_size").and_then(|v| v.as_u64()).ok_or_else(|| anyhow!("config.json has no hidden_size"))? as usize;
    Ok((config, hidden_size))
}

/// Prefer `model.safetensors`; fall back to the pickled `pytorch_model.bin`.
pub(crate) fn load_weights(model_dir: &Path, device: &Device) -> Result<VarBuilder<'static>> {
    let safetensors = model_dir.join("model.safetensors");
    let tensors: HashMap<String, Tensor> = if safetensors.exists() {
        candle_core::safetensors::load(&safetensors, device)?
    } else {
        let weights = candle_core::pickle::read_all(model_dir.join("pytorch_model.bin"))?;
        weights
            .into_iter()
            .map(|(name, t)| -> Result<(String, Tensor)> { Ok((name, t.to_device(device)?)) })
            .collect::<Result<_>>()?
    };
    Ok(VarBuilder::from_tensors(tensors, DType::F32, device))
}
