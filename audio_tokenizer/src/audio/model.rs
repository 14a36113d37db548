//! The contract every audio tokenizer backend satisfies.

use candle_core::Tensor;

use crate::{CodecError, Result};

/// Output of a combined quantize/reconstruct pass.
#[derive(Debug, Clone)]
pub struct QuantizedResult {
    /// Reconstruction: the quantized latent inside a quantizer, the decoded
    /// audio `(batch, channels, samples)` out of a full model.
    pub x: Tensor,
    /// Codes `(batch, codebooks, frames)`.
    pub codes: Tensor,
    /// Bandwidth in kbps for the active codebooks.
    pub bandwidth: f64,
}

/// Compression model usable as an audio tokenizer by a sequence model.
///
/// Audio is `(batch, channels, samples)` float, codes are
/// `(batch, codebooks, frames)` i64 with values in `[0, cardinality)`.
///
/// Implementations are deterministic for a fixed input and configuration.
/// `set_num_codebooks` takes `&mut self`, so changing the active count while
/// another call is in flight is ruled out by the borrow checker on a single
/// owner; shared owners must serialize it themselves.
pub trait CompressionModel: Send + Sync {
    /// Encode then decode, for training. Inference-only backends refuse it.
    fn forward(&self, _x: &Tensor) -> Result<QuantizedResult> {
        Err(CodecError::UnsupportedOperation(
            "forward is not supported by this compression model, use encode and decode".to_string(),
        ))
    }

    /// Encode audio into codes and an optional renormalization scale.
    fn encode(&self, x: &Tensor) -> Result<(Tensor, Option<Tensor>)>;

    /// Decode codes back to audio, denormalizing with `scale` when given.
    fn decode(&self, codes: &Tensor, scale: Option<&Tensor>) -> Result<Tensor>;

    /// Decode codes to the continuous latent, without the decoder network.
    fn decode_latent(&self, codes: &Tensor) -> Result<Tensor>;

    fn channels(&self) -> usize;

    /// Code frames per second.
    fn frame_rate(&self) -> f64;

    fn sample_rate(&self) -> usize;

    /// Number of distinct values per codebook.
    fn cardinality(&self) -> usize;

    /// Active number of codebooks.
    fn num_codebooks(&self) -> usize;

    /// Total number of codebooks available.
    fn total_codebooks(&self) -> usize;

    /// Set the active number of codebooks.
    fn set_num_codebooks(&mut self, n: usize) -> Result<()>;
}

/// Check that `x` is `(batch, channels, samples)` with the expected channels.
pub(crate) fn check_audio(x: &Tensor, channels: usize) -> Result<(usize, usize, usize)> {
    let dims = x.dims3().map_err(|_| {
        CodecError::ShapeMismatch(format!(
            "expected audio of shape (batch, channels, samples), got {:?}",
            x.dims()
        ))
    })?;
    if dims.1 != channels {
        return Err(CodecError::UnsupportedChannelCount {
            expected: channels,
            actual: dims.1,
        });
    }
    Ok(dims)
}

/// Check that `codes` is `(batch, codebooks, frames)` with the expected codebooks.
pub(crate) fn check_codes(codes: &Tensor, codebooks: usize) -> Result<(usize, usize, usize)> {
    let dims = codes.dims3().map_err(|_| {
        CodecError::ShapeMismatch(format!(
            "expected codes of shape (batch, codebooks, frames), got {:?}",
            codes.dims()
        ))
    })?;
    if dims.1 != codebooks {
        return Err(CodecError::ShapeMismatch(format!(
            "expected {codebooks} codebooks, got {}",
            dims.1
        )));
    }
    Ok(dims)
}

/// Reject a scale handed to a backend that never produces one.
pub(crate) fn reject_scale(scale: Option<&Tensor>, backend: &str) -> Result<()> {
    match scale {
        Some(_) => Err(CodecError::InconsistentScale(format!(
            "{backend} does not renormalize audio, got a scale"
        ))),
        None => Ok(()),
    }
}
