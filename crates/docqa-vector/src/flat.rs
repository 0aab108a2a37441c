//! Exhaustive squared-L2 index over a contiguous row-major buffer.

use anyhow::{anyhow, bail, Result};
use std::path::Path;

use candle_core::{DType, Device, Tensor};

use docqa_core::traits::VectorIndex;

const TENSOR_NAME: &str = "vectors";

#[derive(Debug, Clone)]
pub struct FlatL2Index {
    dim: usize,
    data: Vec<f32>,
}

impl FlatL2Index {
    pub fn new(dim: usize) -> Self { Self { dim, data: Vec::new() } }

    /// Write the index as a single `[rows, dim]` f32 tensor.
    pub fn save(&self, path: &Path) -> Result<()> {
        let tensor = Tensor::from_slice(&self.data, (self.row_count(), self.dim), &Device::Cpu)?;
        tensor.save_safetensors(TENSOR_NAME, path)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let mut tensors = candle_core::safetensors::load(path, &Device::Cpu)?;
        let tensor = tensors.remove(TENSOR_NAME).ok_or_else(|| anyhow!("{} has no '{}' tensor", path.display(), TENSOR_NAME))?;
        let (_rows, dim) = tensor.dims2()?;
        let data = tensor.to_dtype(DType::F32)?.flatten_all()?.to_vec1::<f32>()?;
        Ok(Self { dim, data })
    }

    /// Keep only the first `rows` rows.
    pub fn truncate(&mut self, rows: usize) { self.data.truncate(rows * self.dim); }
}

fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

impl VectorIndex for FlatL2Index {
    fn dim(&self) -> usize { self.dim }

    fn row_count(&self) -> usize {
        if self.dim == 0 { 0 } else { self.data.len() / self.dim }
    }

    fn add(&mut self, vectors: &[Vec<f32>]) -> Result<()> {
        if let Some(bad) = vectors.iter().find(|v| v.len() != self.dim) {
            bail!("vector has dimension {}, index expects {}", bad.len(), self.dim);
        }
        self.data.reserve(vectors.len() * self.dim);
        for v in vectors { self.data.extend_from_slice(v); }
        Ok(())
    }

    /// Ties on distance resolve to the lower row id.
    fn search(&self, query: &[f32], k: usize) -> Result<(Vec<f32>, Vec<usize>)> {
        if query.len() != self.dim {
            bail!("query has dimension {}, index expects {}", query.len(), self.dim);
        }
        let mut scored: Vec<(f32, usize)> = self
            .data
            .chunks_exact(self.dim)
            .enumerate()
            .map(|(id, row)| (squared_l2(query, row), id))
            .collect();
        scored.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        scored.truncate(k);
        Ok(scored.into_iter().unzip())
    }
}
