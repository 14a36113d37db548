//! Vector quantization for latent-space backends.
//!
//! Each stage of the residual quantizer picks the nearest entry of its own
//! codebook for what the earlier stages left over. Decoding sums the per-stage embeddings of the
//! active stages.

use candle_core::{DType, IndexOp, Tensor, D};
use candle_nn::{Init, VarBuilder};

use crate::audio::codebook::CodebookPolicy;
use crate::audio::model::QuantizedResult;
use crate::{CodecError, Result};

/// Quantizer stage of a latent-space compression model.
pub trait Quantizer: Send + Sync {
    /// Quantize a latent `(batch, dim, frames)` into codes `(batch, n_q, frames)`.
    fn encode(&self, x: &Tensor) -> Result<Tensor>;

    /// Map codes `(batch, k, frames)` back to a latent `(batch, dim, frames)`.
    fn decode(&self, codes: &Tensor) -> Result<Tensor>;

    /// Quantize and reconstruct in one pass.
    fn forward(&self, x: &Tensor, frame_rate: f64) -> Result<QuantizedResult> {
        let codes = self.encode(x)?;
        let quantized = self.decode(&codes)?;
        let bandwidth = self.num_codebooks() as f64 * (self.bins() as f64).log2() * frame_rate / 1000.0;
        Ok(QuantizedResult {
            x: quantized,
            codes,
            bandwidth,
        })
    }

    fn total_codebooks(&self) -> usize;

    fn num_codebooks(&self) -> usize;

    fn set_num_codebooks(&mut self, n: usize) -> Result<()>;

    /// Codebook size.
    fn bins(&self) -> usize;
}

/// Index of the closest row of `entries` `(bins, dim)` for every row of `x` `(N, dim)`.
///
/// `|x - e|² = |x|² - 2 x·e + |e|²` and `|x|²` is the same for every entry of a
/// row, so the nearest entry minimizes `|e|² - 2 x·e`.
fn nearest_entry(x: &Tensor, entries: &Tensor) -> Result<Tensor> {
    let cross = x.matmul(&entries.t()?)?; // (N, bins)
    let norms = entries.sqr()?.sum(D::Minus1)?.unsqueeze(0)?; // (1, bins)
    let cost = norms.broadcast_sub(&(cross * 2.0)?)?;
    Ok(cost.argmin(D::Minus1)?)
}

/// Residual vector quantizer over `n_q` stacked codebooks.
#[derive(Debug, Clone)]
pub struct ResidualVectorQuantizer {
    dim: usize,
    /// Stacked embeddings: `(n_q, bins, dim)`
    embed: Tensor,
    policy: CodebookPolicy,
}

impl ResidualVectorQuantizer {
    /// Load (or, from a `VarMap`, randomly initialize) `n_q` codebooks.
    pub fn new(dim: usize, bins: usize, n_q: usize, vb: VarBuilder) -> Result<Self> {
        let embed = vb.get_with_hints(
            (n_q, bins, dim),
            "embed",
            Init::Randn {
                mean: 0.0,
                stdev: 1.0,
            },
        )?;
        Self::from_embeddings(embed)
    }

    /// Build from an explicit `(n_q, bins, dim)` embedding stack.
    pub fn from_embeddings(embed: Tensor) -> Result<Self> {
        let (n_q, bins, dim) = embed.dims3()?;
        Ok(Self {
            dim,
            embed,
            policy: CodebookPolicy::new(n_q, bins)?,
        })
    }

    pub fn dimension(&self) -> usize {
        self.dim
    }

    fn check_code_range(&self, codes: &Tensor) -> Result<()> {
        let flat = codes.flatten_all()?;
        if flat.elem_count() == 0 {
            return Ok(());
        }
        let bins = self.policy.cardinality() as i64;
        for code in [flat.min(0)?.to_scalar::<i64>()?, flat.max(0)?.to_scalar::<i64>()?] {
            if !(0..bins).contains(&code) {
                return Err(CodecError::OutOfRange {
                    code,
                    cardinality: bins as u64,
                });
            }
        }
        Ok(())
    }
}

impl Quantizer for ResidualVectorQuantizer {
    fn encode(&self, x: &Tensor) -> Result<Tensor> {
        let (batch, dim, frames) = x.dims3()?;
        if dim != self.dim {
            return Err(CodecError::ShapeMismatch(format!(
                "quantizer expects latent dim {}, got {dim}",
                self.dim
            )));
        }
        // (batch, dim, frames) -> (batch * frames, dim)
        let mut residual = x.transpose(1, 2)?.contiguous()?.reshape((batch * frames, dim))?;
        let mut all_indices = Vec::with_capacity(self.num_codebooks());

        for i in 0..self.num_codebooks() {
            let embed_i = self.embed.i(i)?;
            let indices = nearest_entry(&residual, &embed_i)?;
            let quantized = embed_i.embedding(&indices)?;
            residual = (&residual - &quantized)?;
            all_indices.push(indices.reshape((batch, frames))?);
        }

        Ok(Tensor::stack(&all_indices, 1)?.to_dtype(DType::I64)?)
    }

    fn decode(&self, codes: &Tensor) -> Result<Tensor> {
        let (batch, n_q, frames) = codes.dims3()?;
        if n_q == 0 || n_q > self.total_codebooks() {
            return Err(CodecError::ShapeMismatch(format!(
                "expected between 1 and {} codebooks, got {n_q}",
                self.total_codebooks()
            )));
        }
        let codes = codes.to_dtype(DType::I64)?;
        self.check_code_range(&codes)?;

        let mut quantized_out: Option<Tensor> = None;
        for i in 0..n_q {
            let embed_i = self.embed.i(i)?;
            // (batch, frames) -> (batch * frames, dim)
            let q = embed_i.embedding(&codes.i((.., i))?.flatten_all()?)?;
            quantized_out = Some(match quantized_out {
                Some(acc) => (acc + q)?,
                None => q,
            });
        }

        match quantized_out {
            // (batch, frames, dim) -> (batch, dim, frames)
            Some(q) => Ok(q.reshape((batch, frames, self.dim))?.transpose(1, 2)?.contiguous()?),
            None => Err(CodecError::ShapeMismatch("no codebooks to decode".to_string())),
        }
    }

    fn total_codebooks(&self) -> usize {
        self.policy.total_codebooks()
    }

    fn num_codebooks(&self) -> usize {
        self.policy.active_codebooks()
    }

    fn set_num_codebooks(&mut self, n: usize) -> Result<()> {
        self.policy.set_active_codebooks(n)
    }

    fn bins(&self) -> usize {
        self.policy.cardinality()
    }
}
