use serde::Deserialize;

// ---------------------------------------------------------------------------
// Encodec (convolutional encoder + RVQ + decoder)
// ---------------------------------------------------------------------------

fn default_sample_rate() -> usize { 32000 }
fn default_channels() -> usize { 1 }
fn default_hop_length() -> usize { 1280 }
fn default_dimension() -> usize { 32 }
fn default_n_q() -> usize { 4 }
fn default_bins() -> usize { 400 }

#[derive(Debug, Clone, Deserialize)]
pub struct EncodecConfig {
    #[serde(default = "default_sample_rate")]
    pub sample_rate: usize,
    #[serde(default = "default_channels")]
    pub channels: usize,
    /// Samples per code frame.
    #[serde(default = "default_hop_length")]
    pub hop_length: usize,
    /// Latent dimension.
    #[serde(default = "default_dimension")]
    pub dimension: usize,
    #[serde(default = "default_n_q")]
    pub n_q: usize,
    #[serde(default = "default_bins")]
    pub bins: usize,
    #[serde(default)]
    pub causal: bool,
    #[serde(default)]
    pub renormalize: bool,
}

impl EncodecConfig {
    pub fn frame_rate(&self) -> f64 {
        self.sample_rate as f64 / self.hop_length as f64
    }
}

impl Default for EncodecConfig {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
            channels: default_channels(),
            hop_length: default_hop_length(),
            dimension: default_dimension(),
            n_q: default_n_q(),
            bins: default_bins(),
            causal: false,
            renormalize: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Ternary scalar codec
// ---------------------------------------------------------------------------

fn default_ternary_sample_rate() -> usize { 16000 }
fn default_ternary_frame_rate() -> f64 { 50.0 }
fn default_num_codebooks() -> usize { 4 }
fn default_digits_per_group() -> usize { 9 }

#[derive(Debug, Clone, Deserialize)]
pub struct TernaryCodecConfig {
    #[serde(default = "default_ternary_sample_rate")]
    pub sample_rate: usize,
    #[serde(default = "default_ternary_frame_rate")]
    pub frame_rate: f64,
    /// Digit groups per frame; the latent has `num_codebooks * digits_per_group` dims.
    #[serde(default = "default_num_codebooks")]
    pub num_codebooks: usize,
    /// Ternary digits packed into one code (cardinality `3^digits_per_group`).
    #[serde(default = "default_digits_per_group")]
    pub digits_per_group: usize,
    /// Emit one code per latent dim (cardinality 3) instead of packed groups.
    #[serde(default)]
    pub raw_digits: bool,
    /// Width of the projection applied by `encode_embedding`, if any.
    #[serde(default)]
    pub hidden_dim: Option<usize>,
}

impl TernaryCodecConfig {
    pub fn latent_dim(&self) -> usize {
        self.num_codebooks * self.digits_per_group
    }
}

impl Default for TernaryCodecConfig {
    fn default() -> Self {
        Self {
            sample_rate: default_ternary_sample_rate(),
            frame_rate: default_ternary_frame_rate(),
            num_codebooks: default_num_codebooks(),
            digits_per_group: default_digits_per_group(),
            raw_digits: false,
            hidden_dim: None,
        }
    }
}
