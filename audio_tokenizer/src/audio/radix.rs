//! Balanced-ternary radix codec.
//!
//! A group of `D` ternary digits is read as a base-3 number, most significant
//! digit first, and stored as a single code in `[0, 3^D)`. This is how a
//! ternary latent slice becomes one vocabulary index for a sequence model.
//!
//! The codec itself works on `{0, 1, 2}`. Signed latents `{-1, 0, 1}` go
//! through [`RadixCodec::pack_signed`] / [`RadixCodec::unpack_signed`], which
//! apply the `+1` / `-1` shift.

use candle_core::{DType, Tensor};

use crate::{CodecError, Result};

/// Number base of the codec.
pub const RADIX: u64 = 3;

/// Widest digit group whose codes still fit an `i64` code tensor.
pub const MAX_DIGITS: usize = 39;

/// Packs and unpacks fixed-length ternary digit groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RadixCodec {
    digits: usize,
    cardinality: u64,
}

impl RadixCodec {
    /// Create a codec for groups of `digits` ternary digits.
    pub fn new(digits: usize) -> Result<Self> {
        if digits == 0 || digits > MAX_DIGITS {
            return Err(CodecError::InvalidConfig(format!(
                "digit group length must be in 1..={MAX_DIGITS}, got {digits}"
            )));
        }
        Ok(Self {
            digits,
            cardinality: RADIX.pow(digits as u32),
        })
    }

    /// Group length `D`.
    pub fn digits(&self) -> usize {
        self.digits
    }

    /// Number of distinct codes, `3^D`.
    pub fn cardinality(&self) -> u64 {
        self.cardinality
    }

    /// Pack one group of `{0, 1, 2}` digits, most significant first.
    pub fn pack(&self, digits: &[i64]) -> Result<i64> {
        self.check_group_len(digits.len())?;
        let mut code: u64 = 0;
        for (position, &digit) in digits.iter().enumerate() {
            if !(0..RADIX as i64).contains(&digit) {
                return Err(CodecError::InvalidDigit { digit, position });
            }
            code = code * RADIX + digit as u64;
        }
        // code < 3^MAX_DIGITS < i64::MAX
        Ok(code as i64)
    }

    /// Unpack a code into `D` digits, most significant first.
    pub fn unpack(&self, code: i64) -> Result<Vec<i64>> {
        let mut digits = vec![0; self.digits];
        self.unpack_into(code, &mut digits)?;
        Ok(digits)
    }

    /// Unpack a code into a caller-provided group buffer of length `D`.
    ///
    /// Short codes come out left-padded with zero digits.
    pub fn unpack_into(&self, code: i64, out: &mut [i64]) -> Result<()> {
        self.check_group_len(out.len())?;
        if code < 0 || code as u64 >= self.cardinality {
            return Err(CodecError::OutOfRange {
                code,
                cardinality: self.cardinality,
            });
        }
        let mut rest = code as u64;
        for slot in out.iter_mut().rev() {
            *slot = (rest % RADIX) as i64;
            rest /= RADIX;
        }
        Ok(())
    }

    /// Pack a group of signed `{-1, 0, 1}` digits.
    pub fn pack_signed(&self, digits: &[i64]) -> Result<i64> {
        self.check_group_len(digits.len())?;
        let mut shifted = Vec::with_capacity(digits.len());
        for (position, &digit) in digits.iter().enumerate() {
            if !(-1..=1).contains(&digit) {
                return Err(CodecError::InvalidDigit { digit, position });
            }
            shifted.push(digit + 1);
        }
        self.pack(&shifted)
    }

    /// Unpack a code into signed `{-1, 0, 1}` digits.
    pub fn unpack_signed(&self, code: i64) -> Result<Vec<i64>> {
        let mut digits = self.unpack(code)?;
        digits.iter_mut().for_each(|d| *d -= 1);
        Ok(digits)
    }

    /// Pack a digit tensor `(batch, D, time)` into codes `(batch, time)`.
    ///
    /// Each `(batch, time)` column is an independent group. Any integer dtype
    /// is accepted; float input is truncated, so round it first.
    pub fn pack_tensor(&self, digits: &Tensor) -> Result<Tensor> {
        let (batch, d, time) = digits.dims3()?;
        if d != self.digits {
            return Err(CodecError::ShapeMismatch(format!(
                "expected {} digits per group, got {d}",
                self.digits
            )));
        }
        let rows = digits.to_dtype(DType::I64)?.to_vec3::<i64>()?;
        let mut codes = Vec::with_capacity(batch * time);
        let mut group = vec![0i64; d];
        for item in &rows {
            for step in 0..time {
                for (slot, row) in group.iter_mut().zip(item.iter()) {
                    *slot = row[step];
                }
                codes.push(self.pack(&group)?);
            }
        }
        Ok(Tensor::from_vec(codes, (batch, time), digits.device())?)
    }

    /// Unpack codes `(batch, time)` into a digit tensor `(batch, D, time)`.
    pub fn unpack_tensor(&self, codes: &Tensor) -> Result<Tensor> {
        let (batch, time) = codes.dims2()?;
        let rows = codes.to_dtype(DType::I64)?.to_vec2::<i64>()?;
        let d = self.digits;
        let mut out = vec![0i64; batch * d * time];
        let mut group = vec![0i64; d];
        for (b, row) in rows.iter().enumerate() {
            for (t, &code) in row.iter().enumerate() {
                self.unpack_into(code, &mut group)?;
                for (k, &digit) in group.iter().enumerate() {
                    out[(b * d + k) * time + t] = digit;
                }
            }
        }
        Ok(Tensor::from_vec(out, (batch, d, time), codes.device())?)
    }

    fn check_group_len(&self, len: usize) -> Result<()> {
        if len != self.digits {
            return Err(CodecError::ShapeMismatch(format!(
                "digit group has length {len}, codec expects {}",
                self.digits
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn test_pack_most_significant_first() -> Result<()> {
        let codec = RadixCodec::new(4)?;
        assert_eq!(codec.pack(&[1, 0, 2, 1])?, 34);
        assert_eq!(codec.unpack(34)?, vec![1, 0, 2, 1]);
        Ok(())
    }

    #[test]
    fn test_boundaries() -> Result<()> {
        let codec = RadixCodec::new(9)?;
        assert_eq!(codec.cardinality(), 19683);
        assert_eq!(codec.pack(&[0; 9])?, 0);
        assert_eq!(codec.pack(&[2; 9])?, 19682);
        // Small codes are left-padded with zeros
        assert_eq!(codec.unpack(1)?, vec![0, 0, 0, 0, 0, 0, 0, 0, 1]);
        Ok(())
    }

    #[test]
    fn test_every_group_round_trips_in_order() -> Result<()> {
        let codec = RadixCodec::new(4)?;
        let mut previous = -1;
        for code in 0..codec.cardinality() as i64 {
            let digits = codec.unpack(code)?;
            let packed = codec.pack(&digits)?;
            assert_eq!(packed, code);
            assert!(packed > previous);
            previous = packed;
        }
        Ok(())
    }

    #[test]
    fn test_widest_group_fits_i64() -> Result<()> {
        let codec = RadixCodec::new(MAX_DIGITS)?;
        let top = codec.pack(&[2; MAX_DIGITS])?;
        assert_eq!(top as u64, codec.cardinality() - 1);
        assert_eq!(codec.unpack(top)?, vec![2; MAX_DIGITS]);
        assert!(RadixCodec::new(MAX_DIGITS + 1).is_err());
        assert!(RadixCodec::new(0).is_err());
        Ok(())
    }

    #[test]
    fn test_invalid_digit() -> Result<()> {
        let codec = RadixCodec::new(3)?;
        match codec.pack(&[0, 3, 1]) {
            Err(CodecError::InvalidDigit { digit: 3, position: 1 }) => {}
            other => panic!("expected InvalidDigit, got {other:?}"),
        }
        assert!(matches!(
            codec.pack(&[-1, 0, 0]),
            Err(CodecError::InvalidDigit { digit: -1, position: 0 })
        ));
        assert!(matches!(codec.pack(&[0, 1]), Err(CodecError::ShapeMismatch(_))));
        Ok(())
    }

    #[test]
    fn test_out_of_range() -> Result<()> {
        let codec = RadixCodec::new(3)?;
        assert!(matches!(codec.unpack(27), Err(CodecError::OutOfRange { code: 27, .. })));
        assert!(matches!(codec.unpack(-1), Err(CodecError::OutOfRange { .. })));
        assert_eq!(codec.unpack(26)?, vec![2, 2, 2]);
        Ok(())
    }

    #[test]
    fn test_signed_shift() -> Result<()> {
        let codec = RadixCodec::new(4)?;
        // [0, -1, 1, 0] shifts to [1, 0, 2, 1]
        assert_eq!(codec.pack_signed(&[0, -1, 1, 0])?, 34);
        assert_eq!(codec.unpack_signed(34)?, vec![0, -1, 1, 0]);
        assert!(matches!(
            codec.pack_signed(&[0, 2, 0, 0]),
            Err(CodecError::InvalidDigit { digit: 2, position: 1 })
        ));
        Ok(())
    }

    #[test]
    fn test_signed_extremes_are_invalid_digits() -> Result<()> {
        let codec = RadixCodec::new(2)?;
        assert!(matches!(
            codec.pack_signed(&[i64::MAX, 0]),
            Err(CodecError::InvalidDigit { digit: i64::MAX, position: 0 })
        ));
        assert!(matches!(
            codec.pack_signed(&[0, i64::MIN]),
            Err(CodecError::InvalidDigit { digit: i64::MIN, position: 1 })
        ));
        assert!(matches!(
            codec.pack_signed(&[i64::MIN, 0]),
            Err(CodecError::InvalidDigit { digit: i64::MIN, position: 0 })
        ));
        Ok(())
    }

    #[test]
    fn test_tensor_pack_per_column() -> Result<()> {
        let dev = Device::Cpu;
        let codec = RadixCodec::new(4)?;
        // (batch=1, D=4, time=2): column 0 = [1,0,2,1], column 1 = [2,2,2,2]
        let digits = Tensor::new(&[[[1i64, 2], [0, 2], [2, 2], [1, 2]]], &dev)?;
        let codes = codec.pack_tensor(&digits)?;
        assert_eq!(codes.to_vec2::<i64>()?, vec![vec![34, 80]]);

        let back = codec.unpack_tensor(&codes)?;
        assert_eq!(back.dims(), &[1, 4, 2]);
        assert_eq!(back.to_vec3::<i64>()?, digits.to_vec3::<i64>()?);
        Ok(())
    }

    #[test]
    fn test_tensor_pack_rejects_wrong_group_width() -> Result<()> {
        let codec = RadixCodec::new(4)?;
        let digits = Tensor::zeros((2, 3, 5), DType::I64, &Device::Cpu)?;
        assert!(matches!(codec.pack_tensor(&digits), Err(CodecError::ShapeMismatch(_))));
        Ok(())
    }
}
