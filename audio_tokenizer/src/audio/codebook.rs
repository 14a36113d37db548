//! Active codebook selection.
//!
//! A backend exposes `total_codebooks` quantizer stages of fixed
//! `cardinality`; callers may use only the first `active_codebooks` of them.
//! Bandwidth-tier backends restrict the active count to a discrete set.

use crate::{CodecError, Result};

/// Tolerance when deriving integral codebook counts from bandwidths.
const BANDWIDTH_TOLERANCE: f64 = 1e-3;

#[derive(Debug, Clone, PartialEq)]
pub struct CodebookPolicy {
    total: usize,
    active: usize,
    cardinality: usize,
    /// Allowed active counts, ascending. `None` means any of `1..=total`.
    allowed: Option<Vec<usize>>,
    /// Target bandwidth (kbps) per allowed count, same order as `allowed`.
    bandwidths: Option<Vec<f64>>,
}

impl CodebookPolicy {
    /// Policy allowing any active count in `1..=total`. Starts fully active.
    pub fn new(total: usize, cardinality: usize) -> Result<Self> {
        if total == 0 || cardinality == 0 {
            return Err(CodecError::InvalidConfig(format!(
                "codebook policy needs at least one codebook and one bin, got {total} x {cardinality}"
            )));
        }
        Ok(Self {
            total,
            active: total,
            cardinality,
            allowed: None,
            bandwidths: None,
        })
    }

    /// Policy restricted to a discrete set of counts. Starts at the largest.
    pub fn with_allowed(allowed: &[usize], cardinality: usize) -> Result<Self> {
        let mut allowed = allowed.to_vec();
        allowed.sort_unstable();
        allowed.dedup();
        let total = match allowed.last() {
            Some(&max) if allowed[0] >= 1 => max,
            _ => {
                return Err(CodecError::InvalidConfig(format!(
                    "allowed codebook counts must be non-empty and positive, got {allowed:?}"
                )))
            }
        };
        let mut policy = Self::new(total, cardinality)?;
        policy.allowed = Some(allowed);
        Ok(policy)
    }

    /// Policy for a bandwidth-tier backend.
    ///
    /// Each target bandwidth `bw` (kbps) maps to
    /// `bw * 1000 / (frame_rate * log2(cardinality))` codebooks, which must be
    /// integral.
    pub fn from_bandwidths(
        target_bandwidths: &[f64],
        frame_rate: f64,
        cardinality: usize,
    ) -> Result<Self> {
        if cardinality < 2 || frame_rate <= 0.0 {
            return Err(CodecError::InvalidConfig(format!(
                "cannot derive codebook counts at frame rate {frame_rate} with cardinality {cardinality}"
            )));
        }
        let bits_per_step = frame_rate * (cardinality as f64).log2();
        let mut tiers = Vec::with_capacity(target_bandwidths.len());
        for &bw in target_bandwidths {
            let exact = bw * 1000.0 / bits_per_step;
            let rounded = exact.round();
            if (exact - rounded).abs() > BANDWIDTH_TOLERANCE || rounded < 1.0 {
                return Err(CodecError::InvalidConfig(format!(
                    "bandwidth {bw} kbps gives a non-integral codebook count {exact}"
                )));
            }
            tiers.push((rounded as usize, bw));
        }
        tiers.sort_by_key(|&(n, _)| n);
        tiers.dedup_by_key(|&mut (n, _)| n);

        let counts: Vec<usize> = tiers.iter().map(|&(n, _)| n).collect();
        let mut policy = Self::with_allowed(&counts, cardinality)?;
        policy.bandwidths = Some(tiers.iter().map(|&(_, bw)| bw).collect());
        Ok(policy)
    }

    /// Change the active codebook count.
    ///
    /// Fails without side effect when `n` is outside `1..=total` or not in
    /// the allowed set.
    pub fn set_active_codebooks(&mut self, n: usize) -> Result<()> {
        let ok = match &self.allowed {
            Some(allowed) => allowed.contains(&n),
            None => (1..=self.total).contains(&n),
        };
        if !ok {
            return Err(CodecError::InvalidCodebookCount {
                requested: n,
                allowed: self.describe_allowed(),
            });
        }
        self.active = n;
        Ok(())
    }

    pub fn active_codebooks(&self) -> usize {
        self.active
    }

    pub fn total_codebooks(&self) -> usize {
        self.total
    }

    pub fn cardinality(&self) -> usize {
        self.cardinality
    }

    pub fn allowed_codebooks(&self) -> Option<&[usize]> {
        self.allowed.as_deref()
    }

    /// Target bandwidth (kbps) of the active tier, for bandwidth-tier policies.
    pub fn bandwidth_for_active(&self) -> Option<f64> {
        let allowed = self.allowed.as_ref()?;
        let bandwidths = self.bandwidths.as_ref()?;
        let index = allowed.iter().position(|&n| n == self.active)?;
        bandwidths.get(index).copied()
    }

    fn describe_allowed(&self) -> String {
        match &self.allowed {
            Some(allowed) => format!("{allowed:?}"),
            None => format!("1..={}", self.total),
        }
    }
}
