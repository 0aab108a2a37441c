use anyhow::{bail, Result};
use candle_core::{DType, Tensor};

/// Mean of the unmasked token states of each sequence, L2-normalised.
///
/// `hidden` is `[B, T, H]`, `attention_mask` is `[B, T]` with 1 for real
/// tokens. Returns `[B, H]`.
pub fn masked_mean_l2(hidden: &Tensor, attention_mask: &Tensor) -> Result<Tensor> {
    let (batch, _seq, hidden_dim) = match hidden.dims() {
        [b, t, h] => (*b, *t, *h),
        other => bail!("hidden shape must be [B,T,H], got {:?}", other),
    };

    let mask = attention_mask.to_device(hidden.device())?.to_dtype(hidden.dtype())?;
    let mask_3d = mask.unsqueeze(2)?.broadcast_as(hidden.shape())?;
    let summed = (hidden * &mask_3d)?.sum(1)?;
    // All-padding rows would divide by zero; clamp the token count to 1.
    let lengths = mask.sum_keepdim(1)?.clamp(1.0, f64::MAX)?;
    let mean = summed.broadcast_div(&lengths)?;

    let eps = match hidden.dtype() { DType::F16 | DType::BF16 => 1e-6, _ => 1e-12 };
    let norm = (mean.sqr()?.sum_keepdim(1)?.sqrt()? + eps)?;
    let out = mean.broadcast_div(&norm)?;
    if out.dims() != [batch, hidden_dim].as_slice() {
        bail!("pooled shape {:?} != [{}, {}]", out.dims(), batch, hidden_dim);
    }
    Ok(out)
}
