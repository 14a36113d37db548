//! Audio tokenizer components.
//!
//! This module contains:
//! - `radix`: ternary digit groups ↔ decimal codes
//! - `codebook`: active codebook count policy
//! - `model`: the `CompressionModel` contract
//! - `quantizer`: residual vector quantization
//! - `tokenizer`: concrete backends and the pretrained factory

pub mod codebook;
pub mod model;
pub mod quantizer;
pub mod radix;
pub mod tokenizer;
