//! Stereo support for mono compression models.
//!
//! The wrapped model encodes left and right channels independently and the
//! two code streams are interleaved, left first:
//! - per codebook: `(B, K, T)` x 2 → `(B, 2K, T)`, row `2k` left, `2k + 1` right
//! - per timestep: `(B, K, T)` x 2 → `(B, K, 2T)`, even steps left, odd right

use candle_core::{IndexOp, Tensor};

use crate::audio::model::{check_audio, check_codes, CompressionModel};
use crate::{CodecError, Result};

/// Wraps a mono [`CompressionModel`] to encode and decode stereo audio.
pub struct InterleaveStereoCompressionModel {
    model: Box<dyn CompressionModel>,
    per_timestep: bool,
}

impl InterleaveStereoCompressionModel {
    /// Wrap `model`, interleaving on the time axis when `per_timestep`.
    pub fn new(model: Box<dyn CompressionModel>, per_timestep: bool) -> Result<Self> {
        if model.channels() != 1 {
            return Err(CodecError::UnsupportedChannelCount {
                expected: 1,
                actual: model.channels(),
            });
        }
        Ok(Self { model, per_timestep })
    }

    pub fn per_timestep(&self) -> bool {
        self.per_timestep
    }

    /// Code steps per real frame of the wrapped model.
    pub fn num_virtual_steps(&self) -> usize {
        if self.per_timestep {
            2
        } else {
            1
        }
    }

    pub fn inner(&self) -> &dyn CompressionModel {
        self.model.as_ref()
    }

    /// Merge left/right codes `(B, K, T)` into one interleaved code tensor.
    pub fn interleave(&self, left: &Tensor, right: &Tensor) -> Result<Tensor> {
        if left.dims() != right.dims() {
            return Err(CodecError::ShapeMismatch(format!(
                "left codes {:?} and right codes {:?} differ",
                left.dims(),
                right.dims()
            )));
        }
        let (b, k, t) = left.dims3()?;
        // (2, B, K, T)
        let stacked = Tensor::stack(&[left, right], 0)?;
        let merged = if self.per_timestep {
            stacked.permute((1, 2, 3, 0))?.contiguous()?.reshape((b, k, 2 * t))?
        } else {
            stacked.permute((1, 2, 0, 3))?.contiguous()?.reshape((b, 2 * k, t))?
        };
        Ok(merged)
    }

    /// Split interleaved codes back into left and right `(B, K, T)` codes.
    pub fn get_left_right_codes(&self, codes: &Tensor) -> Result<(Tensor, Tensor)> {
        let (b, k, t) = codes.dims3()?;
        let split = if self.per_timestep {
            if t % 2 != 0 {
                return Err(CodecError::ShapeMismatch(format!(
                    "per-timestep codes need an even number of steps, got {t}"
                )));
            }
            codes.reshape((b, k, t / 2, 2))?.permute((3, 0, 1, 2))?
        } else {
            if k % 2 != 0 {
                return Err(CodecError::ShapeMismatch(format!(
                    "per-codebook codes need an even number of codebooks, got {k}"
                )));
            }
            codes.reshape((b, k / 2, 2, t))?.permute((2, 0, 1, 3))?
        };
        Ok((split.i(0)?.contiguous()?, split.i(1)?.contiguous()?))
    }
}

impl CompressionModel for InterleaveStereoCompressionModel {
    fn encode(&self, x: &Tensor) -> Result<(Tensor, Option<Tensor>)> {
        check_audio(x, self.channels())?;

        let (indices_c0, scales_c0) = self.model.encode(&x.narrow(1, 0, 1)?)?;
        let (indices_c1, scales_c1) = self.model.encode(&x.narrow(1, 1, 1)?)?;
        let indices = self.interleave(&indices_c0, &indices_c1)?;

        let scales = match (scales_c0, scales_c1) {
            (Some(s0), Some(s1)) => Some(Tensor::stack(&[s0, s1], 0)?),
            (None, None) => None,
            _ => {
                return Err(CodecError::InconsistentScale(
                    "wrapped model returned a scale for only one channel".to_string(),
                ))
            }
        };
        tracing::debug!("Interleaved stereo codes {:?}", indices.dims());
        Ok((indices, scales))
    }

    fn decode(&self, codes: &Tensor, scale: Option<&Tensor>) -> Result<Tensor> {
        let (b, _, t) = check_codes(codes, self.num_codebooks())?;
        if t % self.num_virtual_steps() != 0 {
            return Err(CodecError::ShapeMismatch(format!(
                "{t} code steps is not a multiple of {} virtual steps",
                self.num_virtual_steps()
            )));
        }

        let (scale_c0, scale_c1) = match scale {
            Some(scale) => {
                if scale.rank() < 2 || scale.dim(0)? != 2 || scale.dim(1)? != b {
                    return Err(CodecError::ShapeMismatch(format!(
                        "expected scale of shape (2, {b}, ..), got {:?}",
                        scale.dims()
                    )));
                }
                (Some(scale.i(0)?), Some(scale.i(1)?))
            }
            None => (None, None),
        };

        let (codes_c0, codes_c1) = self.get_left_right_codes(codes)?;
        let audio_c0 = self.model.decode(&codes_c0, scale_c0.as_ref())?;
        let audio_c1 = self.model.decode(&codes_c1, scale_c1.as_ref())?;
        Ok(Tensor::cat(&[audio_c0, audio_c1], 1)?)
    }

    fn decode_latent(&self, _codes: &Tensor) -> Result<Tensor> {
        Err(CodecError::UnsupportedOperation(
            "decode_latent is not supported by interleaved stereo models".to_string(),
        ))
    }

    fn channels(&self) -> usize {
        2
    }

    fn frame_rate(&self) -> f64 {
        self.model.frame_rate() * self.num_virtual_steps() as f64
    }

    fn sample_rate(&self) -> usize {
        self.model.sample_rate()
    }

    fn cardinality(&self) -> usize {
        self.model.cardinality()
    }

    /// Codebooks after interleaving.
    fn num_codebooks(&self) -> usize {
        if self.per_timestep {
            self.model.num_codebooks()
        } else {
            self.model.num_codebooks() * 2
        }
    }

    fn total_codebooks(&self) -> usize {
        self.model.total_codebooks()
    }

    /// Sets the per-channel count, before interleaving.
    fn set_num_codebooks(&mut self, n: usize) -> Result<()> {
        self.model.set_num_codebooks(n)
    }
}
