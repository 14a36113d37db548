//! Ternary scalar-quantized backend.
//!
//! The external scalar codec maps audio to a latent `(batch, K * D, frames)`
//! whose values are the balanced-ternary digits `{-1, 0, 1}`. The latent is
//! cut into `K` groups of `D` digits along the channel axis (group `k` owns
//! dims `k * D .. (k + 1) * D`), and each group is packed into one code with
//! [`RadixCodec`]. In raw-digit mode every dim is its own codebook of
//! cardinality 3.

use candle_core::{DType, IndexOp, Module, Tensor};
use candle_nn::{linear, Linear, VarBuilder};

use crate::audio::codebook::CodebookPolicy;
use crate::audio::model::{check_audio, check_codes, reject_scale, CompressionModel};
use crate::audio::radix::RadixCodec;
use crate::audio::tokenizer::config::TernaryCodecConfig;
use crate::audio::tokenizer::encodec::Network;
use crate::{CodecError, Result};

pub struct TernaryCodec {
    encoder: Network,
    decoder: Network,
    radix: RadixCodec,
    policy: CodebookPolicy,
    sample_rate: usize,
    frame_rate: f64,
    hidden_dim: Option<usize>,
    projection: Option<Linear>,
}

impl TernaryCodec {
    /// Wrap a scalar encoder/decoder pair.
    ///
    /// `encoder`: audio `(batch, 1, samples)` → latent `(batch, K * D, frames)`
    /// `decoder`: latent → audio
    pub fn new(encoder: Network, decoder: Network, config: &TernaryCodecConfig) -> Result<Self> {
        let (digits, codebooks) = if config.raw_digits {
            (1, config.latent_dim())
        } else {
            (config.digits_per_group, config.num_codebooks)
        };
        let radix = RadixCodec::new(digits)?;
        let policy = CodebookPolicy::new(codebooks, radix.cardinality() as usize)?;
        tracing::info!(
            "Ternary codec: {} codebooks of {} digits (cardinality {})",
            codebooks,
            digits,
            radix.cardinality()
        );
        Ok(Self {
            encoder,
            decoder,
            radix,
            policy,
            sample_rate: config.sample_rate,
            frame_rate: config.frame_rate,
            hidden_dim: config.hidden_dim,
            projection: None,
        })
    }

    /// Load the `encode_embedding` projection (`D → hidden_dim`) when configured.
    pub fn with_projection(mut self, vb: VarBuilder) -> Result<Self> {
        if let Some(hidden) = self.hidden_dim.filter(|&h| h != self.radix.digits()) {
            self.projection = Some(linear(self.radix.digits(), hidden, vb.pp("proj_layer"))?);
        }
        Ok(self)
    }

    /// Digits per code.
    pub fn digits_per_group(&self) -> usize {
        self.radix.digits()
    }

    /// Latent width the scalar codec works with.
    pub fn latent_dim(&self) -> usize {
        self.policy.total_codebooks() * self.radix.digits()
    }

    /// Token id above every real code, reserved for masking.
    ///
    /// Equals `cardinality * total_codebooks`, so it depends on the layout:
    /// `3^D * K` for packed groups, `3 * K * D` with `raw_digits`. Vocabularies
    /// built against the packed id (19683 * 4 by default) must use the packed
    /// layout.
    pub fn mask_id(&self) -> usize {
        self.cardinality() * self.total_codebooks()
    }

    /// Signed digit embedding of codes for a downstream sequence model.
    ///
    /// `codes`: `(batch, K, frames)` → `(batch, frames, K, D)` float in
    /// `{-1, 0, 1}`, or `(batch, frames, K, hidden_dim)` when projected.
    pub fn encode_embedding(&self, codes: &Tensor) -> Result<Tensor> {
        let (_, k, _) = codes.dims3()?;
        let groups = (0..k)
            .map(|i| -> Result<Tensor> { self.signed_digits(&codes.i((.., i))?.contiguous()?) })
            .collect::<Result<Vec<_>>>()?;
        // (batch, K, D, frames) -> (batch, frames, K, D)
        let emb = Tensor::stack(&groups, 1)?.permute((0, 3, 1, 2))?.contiguous()?;
        match &self.projection {
            Some(proj) => Ok(proj.forward(&emb)?),
            None => Ok(emb),
        }
    }

    /// Unpack one codebook `(batch, frames)` into signed digits `(batch, D, frames)`.
    fn signed_digits(&self, codes: &Tensor) -> Result<Tensor> {
        let digits = self.radix.unpack_tensor(codes)?;
        Ok(digits.to_dtype(DType::F32)?.affine(1.0, -1.0)?)
    }
}

impl CompressionModel for TernaryCodec {
    fn encode(&self, x: &Tensor) -> Result<(Tensor, Option<Tensor>)> {
        check_audio(x, 1)?;
        let latent = self.encoder.forward(x)?;
        let (_, dim, _) = latent.dims3()?;
        if dim != self.latent_dim() {
            return Err(CodecError::ShapeMismatch(format!(
                "scalar codec produced latent dim {dim}, expected {}",
                self.latent_dim()
            )));
        }
        let rounded = latent.round()?;
        // NaN is the only value unequal to itself; the integer cast would hide both
        let non_finite = (rounded.ne(&rounded)?.to_dtype(DType::U32)?
            + rounded.abs()?.ge(f64::INFINITY)?.to_dtype(DType::U32)?)?
            .sum_all()?
            .to_scalar::<u32>()?;
        if non_finite > 0 {
            return Err(CodecError::NonFiniteLatent(format!(
                "scalar codec produced {non_finite} NaN or infinite values"
            )));
        }
        // {-1, 0, 1} -> {0, 1, 2}
        let digits = rounded.affine(1.0, 1.0)?.to_dtype(DType::I64)?;
        let d = self.radix.digits();
        let codes = (0..self.num_codebooks())
            .map(|k| -> Result<Tensor> { self.radix.pack_tensor(&digits.narrow(1, k * d, d)?) })
            .collect::<Result<Vec<_>>>()?;
        Ok((Tensor::stack(&codes, 1)?, None))
    }

    fn decode(&self, codes: &Tensor, scale: Option<&Tensor>) -> Result<Tensor> {
        reject_scale(scale, "ternary codec")?;
        let latent = self.decode_latent(codes)?;
        Ok(self.decoder.forward(&latent)?)
    }

    /// Codes `(batch, K_active, frames)` → signed latent `(batch, K * D, frames)`.
    ///
    /// Groups past the active count are filled with the neutral digit 0.
    fn decode_latent(&self, codes: &Tensor) -> Result<Tensor> {
        let (batch, active, frames) = check_codes(codes, self.num_codebooks())?;
        let mut groups = (0..active)
            .map(|k| -> Result<Tensor> { self.signed_digits(&codes.i((.., k))?.contiguous()?) })
            .collect::<Result<Vec<_>>>()?;
        let missing = self.total_codebooks() - active;
        if missing > 0 {
            let d = self.radix.digits();
            groups.push(Tensor::zeros((batch, missing * d, frames), DType::F32, codes.device())?);
        }
        Ok(Tensor::cat(&groups, 1)?)
    }

    fn channels(&self) -> usize {
        1
    }

    fn frame_rate(&self) -> f64 {
        self.frame_rate
    }

    fn sample_rate(&self) -> usize {
        self.sample_rate
    }

    fn cardinality(&self) -> usize {
        self.policy.cardinality()
    }

    fn num_codebooks(&self) -> usize {
        self.policy.active_codebooks()
    }

    fn total_codebooks(&self) -> usize {
        self.policy.total_codebooks()
    }

    fn set_num_codebooks(&mut self, n: usize) -> Result<()> {
        self.policy.set_active_codebooks(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;
    use candle_nn::VarMap;

    fn dev() -> Device {
        Device::Cpu
    }

    fn small_config() -> TernaryCodecConfig {
        TernaryCodecConfig {
            num_codebooks: 2,
            digits_per_group: 4,
            ..TernaryCodecConfig::default()
        }
    }

    /// Scalar codec whose encoder always emits `latent` and whose decoder
    /// returns the first latent dim as audio.
    fn fixed_latent(latent: Tensor, config: &TernaryCodecConfig) -> Result<TernaryCodec> {
        let encoder = move |_: &Tensor| -> candle_core::Result<Tensor> { Ok(latent.clone()) };
        let decoder = |z: &Tensor| -> candle_core::Result<Tensor> { z.narrow(1, 0, 1) };
        TernaryCodec::new(Box::new(encoder), Box::new(decoder), config)
    }

    /// One frame: group 0 = [0, -1, 1, 0] (code 34), group 1 = [1, 1, 1, 1] (code 80).
    fn sample_latent() -> Result<Tensor> {
        let column = [0f32, -1., 1., 0., 1., 1., 1., 1.];
        Ok(Tensor::new(&column, &dev())?.reshape((1, 8, 1))?)
    }

    fn audio(samples: usize) -> Result<Tensor> {
        Ok(Tensor::zeros((1, 1, samples), DType::F32, &dev())?)
    }

    #[test]
    fn test_encode_packs_groups() -> Result<()> {
        let codec = fixed_latent(sample_latent()?, &small_config())?;
        assert_eq!(codec.cardinality(), 81);
        assert_eq!(codec.latent_dim(), 8);

        let (codes, scale) = codec.encode(&audio(320)?)?;
        assert!(scale.is_none());
        assert_eq!(codes.to_vec3::<i64>()?, vec![vec![vec![34], vec![80]]]);
        Ok(())
    }

    #[test]
    fn test_decode_latent_inverts_encode() -> Result<()> {
        let latent = sample_latent()?;
        let codec = fixed_latent(latent.clone(), &small_config())?;
        let (codes, _) = codec.encode(&audio(320)?)?;
        let back = codec.decode_latent(&codes)?;
        assert_eq!(back.to_vec3::<f32>()?, latent.to_vec3::<f32>()?);

        let wav = codec.decode(&codes, None)?;
        assert_eq!(wav.dims(), &[1, 1, 1]);
        Ok(())
    }

    #[test]
    fn test_fewer_active_codebooks() -> Result<()> {
        let mut codec = fixed_latent(sample_latent()?, &small_config())?;
        codec.set_num_codebooks(1)?;
        let (codes, _) = codec.encode(&audio(320)?)?;
        assert_eq!(codes.to_vec3::<i64>()?, vec![vec![vec![34]]]);

        let back = codec.decode_latent(&codes)?.flatten_all()?.to_vec1::<f32>()?;
        assert_eq!(back, vec![0., -1., 1., 0., 0., 0., 0., 0.]);

        let both = Tensor::new(&[[[34i64], [80]]], &dev())?;
        assert!(matches!(codec.decode_latent(&both), Err(CodecError::ShapeMismatch(_))));
        assert!(codec.set_num_codebooks(3).is_err());
        Ok(())
    }

    #[test]
    fn test_raw_digit_layout() -> Result<()> {
        let config = TernaryCodecConfig {
            raw_digits: true,
            ..small_config()
        };
        let codec = fixed_latent(sample_latent()?, &config)?;
        assert_eq!(codec.cardinality(), 3);
        assert_eq!(codec.total_codebooks(), 8);
        let (codes, _) = codec.encode(&audio(320)?)?;
        let flat = codes.flatten_all()?.to_vec1::<i64>()?;
        assert_eq!(flat, vec![1, 0, 2, 1, 2, 2, 2, 2]);
        Ok(())
    }

    #[test]
    fn test_non_ternary_latent_is_rejected() -> Result<()> {
        let latent = Tensor::new(&[0f32, 0., 2., 0., 0., 0., 0., 0.], &dev())?.reshape((1, 8, 1))?;
        let codec = fixed_latent(latent, &small_config())?;
        assert!(matches!(
            codec.encode(&audio(320)?),
            Err(CodecError::InvalidDigit { digit: 3, position: 2 })
        ));

        let narrow = Tensor::zeros((1, 6, 1), DType::F32, &dev())?;
        let codec = fixed_latent(narrow, &small_config())?;
        assert!(matches!(codec.encode(&audio(320)?), Err(CodecError::ShapeMismatch(_))));
        Ok(())
    }

    #[test]
    fn test_non_finite_latent_is_rejected() -> Result<()> {
        for bad in [f32::NAN, f32::INFINITY, f32::NEG_INFINITY] {
            let latent = Tensor::new(&[0f32, 0., 0., bad, 0., 0., 0., 0.], &dev())?.reshape((1, 8, 1))?;
            let codec = fixed_latent(latent, &small_config())?;
            assert!(
                matches!(codec.encode(&audio(320)?), Err(CodecError::NonFiniteLatent(_))),
                "latent value {bad} was accepted"
            );
        }
        Ok(())
    }

    #[test]
    fn test_mask_id_follows_layout() -> Result<()> {
        let packed = fixed_latent(sample_latent()?, &small_config())?;
        assert_eq!(packed.mask_id(), 81 * 2);
        let raw = fixed_latent(
            sample_latent()?,
            &TernaryCodecConfig {
                raw_digits: true,
                ..small_config()
            },
        )?;
        assert_eq!(raw.mask_id(), 3 * 8);
        Ok(())
    }

    #[test]
    fn test_scale_and_forward_are_refused() -> Result<()> {
        let codec = fixed_latent(sample_latent()?, &small_config())?;
        let codes = Tensor::new(&[[[34i64], [80]]], &dev())?;
        let scale = Tensor::ones((1, 1), DType::F32, &dev())?;
        assert!(matches!(
            codec.decode(&codes, Some(&scale)),
            Err(CodecError::InconsistentScale(_))
        ));
        assert!(matches!(
            codec.forward(&audio(320)?),
            Err(CodecError::UnsupportedOperation(_))
        ));
        Ok(())
    }

    #[test]
    fn test_encode_embedding() -> Result<()> {
        let codec = fixed_latent(sample_latent()?, &small_config())?;
        let codes = Tensor::new(&[[[34i64], [80]]], &dev())?;
        let emb = codec.encode_embedding(&codes)?;
        assert_eq!(emb.dims(), &[1, 1, 2, 4]);
        assert_eq!(
            emb.flatten_all()?.to_vec1::<f32>()?,
            vec![0., -1., 1., 0., 1., 1., 1., 1.]
        );

        let config = TernaryCodecConfig {
            hidden_dim: Some(16),
            ..small_config()
        };
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &dev());
        let codec = fixed_latent(sample_latent()?, &config)?.with_projection(vb)?;
        assert_eq!(codec.encode_embedding(&codes)?.dims(), &[1, 1, 2, 16]);
        Ok(())
    }

    #[test]
    fn test_default_layout_and_mask_id() -> Result<()> {
        let latent = Tensor::zeros((2, 36, 3), DType::F32, &dev())?;
        let codec = fixed_latent(latent, &TernaryCodecConfig::default())?;
        assert_eq!(codec.cardinality(), 19683);
        assert_eq!(codec.mask_id(), 19683 * 4);
        assert_eq!(codec.frame_rate(), 50.0);
        assert_eq!(codec.sample_rate(), 16000);

        let (codes, _) = codec.encode(&audio(960)?)?;
        assert_eq!(codes.dims(), &[2, 4, 3]);
        // all-zero signed digits are the middle code 1111_1111_1 in base 3
        assert_eq!(codes.flatten_all()?.to_vec1::<i64>()?, vec![9841; 24]);
        Ok(())
    }
}
