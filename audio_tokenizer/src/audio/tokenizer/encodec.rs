//! Encodec-style backend: encoder → residual quantizer → decoder.
//!
//! The encoder and decoder are opaque networks (any [`Module`]); this type
//! owns the renormalization, trimming and codebook plumbing around them.

use candle_core::{Module, Tensor};
use candle_nn::{
    conv1d, conv_transpose1d, Conv1d, Conv1dConfig, ConvTranspose1d, ConvTranspose1dConfig,
    VarBuilder,
};

use crate::audio::model::{check_audio, CompressionModel, QuantizedResult};
use crate::audio::quantizer::{Quantizer, ResidualVectorQuantizer};
use crate::audio::tokenizer::config::EncodecConfig;
use crate::{CodecError, Result};

/// Floor added to the volume before dividing by it.
const VOLUME_EPSILON: f64 = 1e-8;

pub type Network = Box<dyn Module + Send + Sync>;

/// Compression model operating on the raw waveform.
pub struct EncodecModel {
    encoder: Network,
    decoder: Network,
    quantizer: Box<dyn Quantizer>,
    frame_rate: f64,
    sample_rate: usize,
    channels: usize,
    causal: bool,
    renormalize: bool,
}

impl EncodecModel {
    pub fn new(
        encoder: Network,
        decoder: Network,
        quantizer: Box<dyn Quantizer>,
        config: &EncodecConfig,
    ) -> Result<Self> {
        if config.causal && config.renormalize {
            return Err(CodecError::InvalidConfig(
                "causal model does not support renormalize".to_string(),
            ));
        }
        if config.channels == 0 || config.hop_length == 0 {
            return Err(CodecError::InvalidConfig(format!(
                "channels and hop_length must be positive, got {} and {}",
                config.channels, config.hop_length
            )));
        }
        Ok(Self {
            encoder,
            decoder,
            quantizer,
            frame_rate: config.frame_rate(),
            sample_rate: config.sample_rate,
            channels: config.channels,
            causal: config.causal,
            renormalize: config.renormalize,
        })
    }

    /// Strided convolutional encoder/decoder around a residual quantizer.
    ///
    /// Weights live under `encoder.*`, `decoder.*` and `quantizer.embed`.
    pub fn conv(config: &EncodecConfig, vb: VarBuilder) -> Result<Self> {
        let encoder = ConvEncoder::new(config, vb.pp("encoder"))?;
        let decoder = ConvDecoder::new(config, vb.pp("decoder"))?;
        let quantizer =
            ResidualVectorQuantizer::new(config.dimension, config.bins, config.n_q, vb.pp("quantizer"))?;
        tracing::debug!(
            "Built conv encodec: {} Hz, hop {}, {} x {} codebooks",
            config.sample_rate,
            config.hop_length,
            config.n_q,
            config.bins
        );
        Self::new(Box::new(encoder), Box::new(decoder), Box::new(quantizer), config)
    }

    pub fn is_causal(&self) -> bool {
        self.causal
    }

    pub fn renormalizes(&self) -> bool {
        self.renormalize
    }

    /// Normalize each item by its RMS volume.
    ///
    /// Returns the normalized audio and the scale `(batch, 1)` when enabled.
    pub fn preprocess(&self, x: &Tensor) -> Result<(Tensor, Option<Tensor>)> {
        if !self.renormalize {
            return Ok((x.clone(), None));
        }
        let mono = x.mean_keepdim(1)?; // (B, 1, T)
        let volume = mono.sqr()?.mean_keepdim(2)?.sqrt()?; // (B, 1, 1)
        let scale = (volume + VOLUME_EPSILON)?;
        let x = x.broadcast_div(&scale)?;
        let batch = scale.dim(0)?;
        Ok((x, Some(scale.reshape((batch, 1))?)))
    }

    /// Undo [`Self::preprocess`].
    pub fn postprocess(&self, x: Tensor, scale: Option<&Tensor>) -> Result<Tensor> {
        match (scale, self.renormalize) {
            (None, false) => Ok(x),
            (Some(scale), true) => {
                let batch = x.dim(0)?;
                if scale.elem_count() != batch {
                    return Err(CodecError::ShapeMismatch(format!(
                        "expected one scale per item ({batch}), got {:?}",
                        scale.dims()
                    )));
                }
                Ok(x.broadcast_mul(&scale.reshape((batch, 1, 1))?)?)
            }
            (Some(_), false) => Err(CodecError::InconsistentScale(
                "model does not renormalize audio, got a scale".to_string(),
            )),
            (None, true) => Err(CodecError::InconsistentScale(
                "model renormalizes audio, decode needs its scale".to_string(),
            )),
        }
    }
}

impl CompressionModel for EncodecModel {
    fn forward(&self, x: &Tensor) -> Result<QuantizedResult> {
        let (_, _, length) = check_audio(x, self.channels)?;
        let (x, scale) = self.preprocess(x)?;

        let emb = self.encoder.forward(&x)?;
        let q_res = self.quantizer.forward(&emb, self.frame_rate)?;
        let out = self.decoder.forward(&q_res.x)?;

        // Encoder and decoder may pad; never lose samples.
        let produced = out.dim(2)?;
        if produced < length {
            return Err(CodecError::ShapeMismatch(format!(
                "decoder produced {produced} samples for {length} input samples"
            )));
        }
        let out = out.narrow(2, 0, length)?;

        Ok(QuantizedResult {
            x: self.postprocess(out, scale.as_ref())?,
            codes: q_res.codes,
            bandwidth: q_res.bandwidth,
        })
    }

    fn encode(&self, x: &Tensor) -> Result<(Tensor, Option<Tensor>)> {
        check_audio(x, self.channels)?;
        let (x, scale) = self.preprocess(x)?;
        let emb = self.encoder.forward(&x)?;
        let codes = self.quantizer.encode(&emb)?;
        tracing::debug!("Encoded {:?} audio to {:?} codes", x.dims(), codes.dims());
        Ok((codes, scale))
    }

    fn decode(&self, codes: &Tensor, scale: Option<&Tensor>) -> Result<Tensor> {
        let emb = self.decode_latent(codes)?;
        let out = self.decoder.forward(&emb)?;
        // out keeps any padding added by the encoder and decoder
        self.postprocess(out, scale)
    }

    fn decode_latent(&self, codes: &Tensor) -> Result<Tensor> {
        self.quantizer.decode(codes)
    }

    fn channels(&self) -> usize {
        self.channels
    }

    fn frame_rate(&self) -> f64 {
        self.frame_rate
    }

    fn sample_rate(&self) -> usize {
        self.sample_rate
    }

    fn cardinality(&self) -> usize {
        self.quantizer.bins()
    }

    fn num_codebooks(&self) -> usize {
        self.quantizer.num_codebooks()
    }

    fn total_codebooks(&self) -> usize {
        self.quantizer.total_codebooks()
    }

    fn set_num_codebooks(&mut self, n: usize) -> Result<()> {
        self.quantizer.set_num_codebooks(n)
    }
}

/// One strided convolution, `hop_length` samples per latent frame.
///
/// Input is right-padded with zeros to a whole number of frames.
#[derive(Debug, Clone)]
pub struct ConvEncoder {
    conv: Conv1d,
    hop_length: usize,
}

impl ConvEncoder {
    pub fn new(config: &EncodecConfig, vb: VarBuilder) -> Result<Self> {
        let cfg = Conv1dConfig {
            stride: config.hop_length,
            ..Default::default()
        };
        let conv = conv1d(config.channels, config.dimension, config.hop_length, cfg, vb.pp("conv"))?;
        Ok(Self {
            conv,
            hop_length: config.hop_length,
        })
    }
}

impl Module for ConvEncoder {
    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        let len = xs.dim(2)?;
        let pad = (self.hop_length - len % self.hop_length) % self.hop_length;
        let xs = if pad > 0 { xs.pad_with_zeros(2, 0, pad)? } else { xs.clone() };
        self.conv.forward(&xs)
    }
}

/// Transposed convolution mirroring [`ConvEncoder`].
#[derive(Debug, Clone)]
pub struct ConvDecoder {
    conv: ConvTranspose1d,
}

impl ConvDecoder {
    pub fn new(config: &EncodecConfig, vb: VarBuilder) -> Result<Self> {
        let cfg = ConvTranspose1dConfig {
            stride: config.hop_length,
            ..Default::default()
        };
        let conv = conv_transpose1d(config.dimension, config.channels, config.hop_length, cfg, vb.pp("conv"))?;
        Ok(Self { conv })
    }
}

impl Module for ConvDecoder {
    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        self.conv.forward(xs)
    }
}
