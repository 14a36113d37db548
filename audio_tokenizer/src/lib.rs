//! Audio tokenizers for token-based sequence models.
//!
//! Every backend implements [`CompressionModel`]: audio `[B, C, T]` goes in,
//! integer codes `[B, K, T']` come out, and decoding reverses the trip.
//!
//! - [`audio::radix`]: balanced-ternary digit groups ↔ decimal codes
//! - [`audio::codebook`]: active codebook count and cardinality policy
//! - [`audio::tokenizer::encodec`]: encoder + quantizer + decoder backend
//! - [`audio::tokenizer::ternary`]: scalar ternary backend
//! - [`audio::tokenizer::interleave`]: stereo lifting of mono backends
//! - [`audio::tokenizer::pretrained`]: name/path → backend factory

pub mod audio;
mod error;

pub use audio::codebook::CodebookPolicy;
pub use audio::model::{CompressionModel, QuantizedResult};
pub use audio::quantizer::{Quantizer, ResidualVectorQuantizer};
pub use audio::radix::RadixCodec;
pub use audio::tokenizer::encodec::EncodecModel;
pub use audio::tokenizer::interleave::InterleaveStereoCompressionModel;
pub use audio::tokenizer::pretrained::{get_pretrained, ModelRegistry};
pub use audio::tokenizer::ternary::TernaryCodec;
pub use error::CodecError;

/// Result type for tokenizer operations.
pub type Result<T> = std::result::Result<T, CodecError>;
