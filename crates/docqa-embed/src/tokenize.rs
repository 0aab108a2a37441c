use anyhow::{anyhow, Result};
use candle_core::{Device, Tensor};
use tokenizers::{EncodeInput, Encoding, Tokenizer, TruncationParams, TruncationStrategy};

/// Model inputs for one padded batch: `(input_ids, attention_mask, token_type_ids)`,
/// each `[B, T]` u32 where `T` is the longest sequence after truncation.
pub struct BatchInputs {
    pub input_ids: Tensor,
    pub attention_mask: Tensor,
    pub token_type_ids: Tensor,
}

/// Make `tokenizer` cap encodings at `max_len` tokens, special tokens included.
/// Pairs lose tokens from the longer side first.
pub fn truncating(mut tokenizer: Tokenizer, max_len: usize) -> Result<Tokenizer> {
    let params = TruncationParams { max_length: max_len.max(8), strategy: TruncationStrategy::LongestFirst, ..Default::default() };
    tokenizer.with_truncation(Some(params)).map_err(|e| anyhow!("Invalid truncation length {}: {}", max_len, e))?;
    Ok(tokenizer)
}

/// Encode `inputs` (single texts or text pairs) and right-pad to the longest
/// sequence in the batch. Length limits come from the tokenizer's truncation.
pub fn tokenize_batch<'s, E>(tokenizer: &Tokenizer, inputs: Vec<E>, device: &Device) -> Result<BatchInputs>
where
    E: Into<EncodeInput<'s>>,
{
    let batch = inputs.len();
    let encodings: Vec<Encoding> = inputs
        .into_iter()
        .map(|input| tokenizer.encode(input, true).map_err(|e| anyhow!("Tokenization failed: {}", e)))
        .collect::<Result<_>>()?;
    let seq_len = encodings.iter().map(|e| e.get_ids().len()).max().unwrap_or(0).max(1);
    let pad_id = tokenizer.token_to_id("[PAD]").unwrap_or(0);

    let mut ids = Vec::with_capacity(batch * seq_len);
    let mut mask = Vec::with_capacity(batch * seq_len);
    let mut type_ids = Vec::with_capacity(batch * seq_len);
    for enc in &encodings {
        ids.extend_from_slice(enc.get_ids());
        mask.extend_from_slice(enc.get_attention_mask());
        type_ids.extend_from_slice(enc.get_type_ids());
        let pad = seq_len - enc.get_ids().len();
        ids.extend(std::iter::repeat(pad_id).take(pad));
        mask.extend(std::iter::repeat(0u32).take(pad));
        type_ids.extend(std::iter::repeat(0u32).take(pad));
    }

    Ok(BatchInputs {
        input_ids: Tensor::from_vec(ids, (batch, seq_len), device)?,
        attention_mask: Tensor::from_vec(mask, (batch, seq_len), device)?,
        token_type_ids: Tensor::from_vec(type_ids, (batch, seq_len), device)?,
    })
}
