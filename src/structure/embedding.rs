//! Domain tables: embedded objects and integer-indexed elements.
//!
//! Objects are represented as unit vectors in a `dim`-dimensional space, so
//! similarity predicates see comparable norms from the first step.

use candle_core::{DType, Device, Tensor, Var};

use crate::error::Result;

/// Random unit-norm embeddings: `[num_objects, dim]`.
pub fn random_unit_embeddings(num_objects: usize, dim: usize, device: &Device) -> Result<Tensor> {
    let emb = Tensor::randn(0.0f32, 1.0, (num_objects, dim), device)?;
    // Normalize to unit vectors: emb / ||emb||
    let norms = emb.sqr()?.sum(1)?.sqrt()?.unsqueeze(1)?;
    Ok(emb.broadcast_div(&norms)?)
}

/// Learnable embedding table, initialised as [`random_unit_embeddings`].
pub fn trainable_embeddings(num_objects: usize, dim: usize, device: &Device) -> Result<Var> {
    Ok(Var::from_tensor(&random_unit_embeddings(num_objects, dim, device)?)?)
}

/// Scalar domain `{0, 1, .., n-1}` as an f32 vector, for table predicates.
pub fn index_domain(n: usize, device: &Device) -> Result<Tensor> {
    Ok(Tensor::arange(0u32, n as u32, device)?.to_dtype(DType::F32)?)
}

/// Scalar domain from explicit element values.
pub fn scalar_domain(values: &[f32], device: &Device) -> Result<Tensor> {
    Ok(Tensor::from_slice(values, values.len(), device)?)
}
