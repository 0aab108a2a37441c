//! Cross-encoder relevance scoring (ms-marco-MiniLM-L-6-v2 layout).
//!
//! BERT encoder, tanh pooler over `[CLS]`, single-logit classifier, sigmoid.

use anyhow::Result;
use std::path::Path;
use std::sync::Arc;

use candle_core::{Device, IndexOp};
use candle_nn::{linear, Linear, Module};
use candle_transformers::models::bert::BertModel;
use tokenizers::Tokenizer;
use tracing::{info, warn};

use docqa_core::config::RerankSettings;
use docqa_core::traits::RelevanceScorer;

use crate::{device, load_bert_config, load_tokenizer, load_weights, tokenize};

const MAX_PAIR_LEN: usize = 512;

pub struct CrossEncoder { bert: BertModel, pooler: Linear, classifier: Linear, tokenizer: Tokenizer, device: Device }

impl CrossEncoder {
    pub fn load(model_dir: &Path) -> Result<Self> {
        let device = device::select_device();
        info!("Loading cross-encoder from {}", model_dir.display());
        let tokenizer = tokenize::truncating(load_tokenizer(model_dir)?, MAX_PAIR_LEN)?;
        let (config, hidden_size) = load_bert_config(model_dir)?;
        let vb = load_weights(model_dir, &device)?;
        let bert = BertModel::load(vb.clone(), &config)?;
        let pooler = linear(hidden_size, hidden_size, vb.pp("bert.pooler.dense"))?;
        let classifier = linear(hidden_size, 1, vb.pp("classifier"))?;
        Ok(Self { bert, pooler, classifier, tokenizer, device })
    }
}

impl RelevanceScorer for CrossEncoder {
    fn predict(&self, pairs: &[(String, String)]) -> Result<Vec<f32>> {
        if pairs.is_empty() { return Ok(Vec::new()); }
        let inputs: Vec<(&str, &str)> = pairs.iter().map(|(q, p)| (q.as_str(), p.as_str())).collect();
        let batch = tokenize::tokenize_batch(&self.tokenizer, inputs, &self.device)?;
        let hidden = self.bert.forward(&batch.input_ids, &batch.token_type_ids, Some(&batch.attention_mask))?;
        let cls = hidden.i((.., 0))?.contiguous()?;
        let pooled = self.pooler.forward(&cls)?.tanh()?;
        let logits = self.classifier.forward(&pooled)?.squeeze(1)?;
        let probs = candle_nn::ops::sigmoid(&logits)?;
        Ok(probs.to_device(&Device::Cpu)?.to_vec1()?)
    }
}

/// `None` when `rerank.model_dir` is unset or the model fails to load; the
/// reranker then passes candidates through unchanged.
pub fn load_reranker(settings: &RerankSettings) -> Option<Arc<dyn RelevanceScorer>> {
    let dir = settings.model_dir.as_deref()?;
    let dir = docqa_core::config::expand_path(dir);
    match CrossEncoder::load(&dir) {
        Ok(model) => Some(Arc::new(model)),
        Err(e) => {
            warn!("Reranker failed to load from {}: {}", dir.display(), e);
            None
        }
    }
}
