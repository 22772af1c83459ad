//! Sentence pooling over token states.

use anyhow::{ensure, Context, Result};
use candle_core::{DType, Tensor};

/// Mean over unmasked tokens, then L2 normalization.
/// `hidden` is `[B, T, H]`, `attention_mask` is `[B, T]` in any numeric
/// dtype; returns `[B, H]`.
pub fn masked_mean_l2(hidden: &Tensor, attention_mask: &Tensor) -> Result<Tensor> {
    let (batch, tokens, _) = hidden.dims3().context("hidden states must be [B, T, H]")?;
    ensure!(
        attention_mask.dims() == [batch, tokens],
        "attention mask shape {:?} does not match [{batch}, {tokens}]",
        attention_mask.dims()
    );
    let mask = attention_mask.to_device(hidden.device())?.to_dtype(hidden.dtype())?;
    let summed = hidden.broadcast_mul(&mask.unsqueeze(2)?)?.sum(1)?;
    // an all-padding row keeps a zero sum instead of dividing by zero
    let counts = mask.sum_keepdim(1)?.maximum(1f64)?;
    l2_normalize(&summed.broadcast_div(&counts)?)
}

fn l2_normalize(rows: &Tensor) -> Result<Tensor> {
    let eps = if rows.dtype() == DType::F16 { 1e-6 } else { 1e-12 };
    let norm = (rows.sqr()?.sum_keepdim(1)?.sqrt()? + eps)?;
    Ok(rows.broadcast_div(&norm)?)
}
