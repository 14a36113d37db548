//! Pretrained compression model resolution.
//!
//! A name resolves, in order, to:
//! 1. a loader registered under that name (external backends such as
//!    `dac_44khz`, `sqcodec` or `wavtokenizer`)
//! 2. the built-in `debug_compression_model`
//! 3. a checkpoint directory holding `config.json` and `model.safetensors`
//! 4. the hub fallback loader, if one is set (repository ids)

use std::collections::HashMap;
use std::path::Path;

use candle_core::{DType, Device};
use candle_nn::{VarBuilder, VarMap};

use crate::audio::model::CompressionModel;
use crate::audio::tokenizer::config::EncodecConfig;
use crate::audio::tokenizer::encodec::EncodecModel;
use crate::{CodecError, Result};

pub const DEBUG_COMPRESSION_MODEL: &str = "debug_compression_model";
pub const CONFIG_FILE: &str = "config.json";
pub const WEIGHTS_FILE: &str = "model.safetensors";

/// Builds a backend on a device, loading its weights eagerly.
pub type ModelLoader = Box<dyn Fn(&Device) -> Result<Box<dyn CompressionModel>> + Send + Sync>;

/// Builds a backend from a repository id.
pub type HubLoader = Box<dyn Fn(&str, &Device) -> Result<Box<dyn CompressionModel>> + Send + Sync>;

/// Name → loader table used by [`get_pretrained`].
#[derive(Default)]
pub struct ModelRegistry {
    loaders: HashMap<String, ModelLoader>,
    hub: Option<HubLoader>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a loader under `name`, replacing any previous one.
    pub fn register(&mut self, name: impl Into<String>, loader: ModelLoader) {
        self.loaders.insert(name.into(), loader);
    }

    /// Loader for names that match nothing else.
    pub fn set_hub_loader(&mut self, loader: HubLoader) {
        self.hub = Some(loader);
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.loaders.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Resolve `name` to a ready-to-use backend.
    pub fn load(&self, name: &str, device: &Device) -> Result<Box<dyn CompressionModel>> {
        if let Some(loader) = self.loaders.get(name) {
            tracing::info!("Getting pretrained compression model {}", name);
            return loader(device);
        }
        if name == DEBUG_COMPRESSION_MODEL {
            tracing::info!("Getting pretrained compression model for debug");
            return Ok(Box::new(debug_compression_model(device)?));
        }
        let path = Path::new(name);
        if path.is_dir() {
            tracing::info!("Loading compression model checkpoint from {}", path.display());
            return Ok(Box::new(load_checkpoint_dir(path, device)?));
        }
        if let Some(hub) = &self.hub {
            tracing::info!("Getting pretrained compression model from hub {}", name);
            return hub(name, device);
        }
        Err(CodecError::UnknownModel(name.to_string()))
    }
}

/// Resolve a model with the built-in table (debug model and checkpoint dirs).
pub fn get_pretrained(name: &str, device: &Device) -> Result<Box<dyn CompressionModel>> {
    ModelRegistry::new().load(name, device)
}

/// Small randomly initialized conv model: 32 kHz, 25 Hz frames, 4 x 400 codebooks.
pub fn debug_compression_model(device: &Device) -> Result<EncodecModel> {
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
    EncodecModel::conv(&EncodecConfig::default(), vb)
}

/// Load a conv model from `dir/config.json` and `dir/model.safetensors`.
pub fn load_checkpoint_dir(dir: &Path, device: &Device) -> Result<EncodecModel> {
    let config: EncodecConfig = serde_json::from_str(&std::fs::read_to_string(dir.join(CONFIG_FILE))?)?;
    let weights = dir.join(WEIGHTS_FILE);
    if !weights.is_file() {
        return Err(CodecError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("missing weights {}", weights.display()),
        )));
    }
    let vb = unsafe { VarBuilder::from_mmaped_safetensors(&[weights], DType::F32, device)? };
    let model = EncodecModel::conv(&config, vb)?;
    tracing::info!(
        "Compression model loaded: {} Hz, {} channel(s), {} codebooks",
        config.sample_rate,
        config.channels,
        config.n_q
    );
    Ok(model)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::tokenizer::interleave::InterleaveStereoCompressionModel;
    use candle_core::Tensor;

    fn dev() -> Device {
        Device::Cpu
    }

    #[test]
    fn test_debug_model() -> Result<()> {
        let model = get_pretrained(DEBUG_COMPRESSION_MODEL, &dev())?;
        assert_eq!(model.sample_rate(), 32000);
        assert_eq!(model.frame_rate(), 25.0);
        assert_eq!(model.channels(), 1);
        assert_eq!(model.cardinality(), 400);
        assert_eq!(model.num_codebooks(), 4);

        let x = Tensor::randn(0f32, 1.0, (1, 1, 2560), &dev())?;
        let (codes, _) = model.encode(&x)?;
        assert_eq!(codes.dims(), &[1, 4, 2]);
        Ok(())
    }

    #[test]
    fn test_unknown_name() {
        match get_pretrained("dac_44khz", &dev()) {
            Err(CodecError::UnknownModel(name)) => assert_eq!(name, "dac_44khz"),
            Err(other) => panic!("expected UnknownModel, got {other}"),
            Ok(_) => panic!("dac_44khz has no built-in loader"),
        }
    }

    #[test]
    fn test_registered_loader_takes_precedence() -> Result<()> {
        let mut registry = ModelRegistry::new();
        registry.register(
            "wavtokenizer",
            Box::new(|device: &Device| -> Result<Box<dyn CompressionModel>> {
                Ok(Box::new(debug_compression_model(device)?))
            }),
        );
        assert_eq!(registry.names(), vec!["wavtokenizer"]);

        let model = registry.load("wavtokenizer", &dev())?;
        let stereo = InterleaveStereoCompressionModel::new(model, true)?;
        assert_eq!(stereo.frame_rate(), 50.0);
        assert_eq!(stereo.channels(), 2);
        Ok(())
    }

    #[test]
    fn test_hub_fallback() -> Result<()> {
        let mut registry = ModelRegistry::new();
        registry.set_hub_loader(Box::new(|repo: &str, device: &Device| -> Result<Box<dyn CompressionModel>> {
            assert_eq!(repo, "facebook/encodec_32khz");
            Ok(Box::new(debug_compression_model(device)?))
        }));
        let model = registry.load("facebook/encodec_32khz", &dev())?;
        assert_eq!(model.total_codebooks(), 4);
        Ok(())
    }

    #[test]
    fn test_checkpoint_dir_round_trip() -> Result<()> {
        let dir = tempfile::tempdir()?;
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            r#"{"sample_rate": 16000, "hop_length": 8, "dimension": 4, "n_q": 2, "bins": 16}"#,
        )?;

        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &dev());
        let config: EncodecConfig = serde_json::from_str(&std::fs::read_to_string(dir.path().join(CONFIG_FILE))?)?;
        let saved = EncodecModel::conv(&config, vb)?;
        varmap.save(dir.path().join(WEIGHTS_FILE))?;

        let name = dir.path().to_str().expect("utf-8 temp path");
        let loaded = get_pretrained(name, &dev())?;
        assert_eq!(loaded.frame_rate(), 2000.0);
        assert_eq!(loaded.cardinality(), 16);

        let x = Tensor::randn(0f32, 1.0, (2, 1, 64), &dev())?;
        let (want, _) = saved.encode(&x)?;
        let (got, _) = loaded.encode(&x)?;
        assert_eq!(got.to_vec3::<i64>()?, want.to_vec3::<i64>()?);
        Ok(())
    }

    #[test]
    fn test_checkpoint_dir_without_weights() -> Result<()> {
        let dir = tempfile::tempdir()?;
        std::fs::write(dir.path().join(CONFIG_FILE), "{}")?;
        let name = dir.path().to_str().expect("utf-8 temp path");
        assert!(matches!(get_pretrained(name, &dev()), Err(CodecError::Io(_))));
        Ok(())
    }
}
