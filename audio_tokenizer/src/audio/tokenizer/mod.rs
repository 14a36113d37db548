//! Compression model backends.
//!
//! - `encodec`: encoder → residual quantizer → decoder, optional renormalization
//! - `ternary`: scalar ternary latents packed into radix-3 codes
//! - `interleave`: stereo wrapper for any mono backend
//! - `pretrained`: resolves names and checkpoint directories to backends

pub mod config;
pub mod encodec;
pub mod interleave;
pub mod pretrained;
pub mod ternary;
