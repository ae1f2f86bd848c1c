//! GGUF backend on boostr
//!
//! Loads a GGUF file (weights, metadata, and embedded tokenizer) and runs
//! a KV-cached decode loop. Runtime selection is compile-time: CUDA with
//! the `cuda` feature, CPU otherwise.

use std::path::Path;

use boostr::format::gguf_tokenizer::GgufTokenizer;
use boostr::format::Gguf;
use boostr::inference::LayeredKvCache;
use boostr::model::{AttentionConfig, LoadedModel, UniversalConfig};
use boostr::{DType, Tensor, VarBuilder, VarMap};

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};

use super::backend::{BackendLoader, DeviceInfo, InferenceBackend};
use super::locate::resolve_model_path;
use super::request::SamplingParams;
use super::sampling::sample_next;

#[cfg(feature = "cuda")]
type BackendRuntime = boostr::CudaRuntime;
#[cfg(not(feature = "cuda"))]
type BackendRuntime = boostr::CpuRuntime;

#[cfg(feature = "cuda")]
type BackendDevice = boostr::CudaDevice;
#[cfg(not(feature = "cuda"))]
type BackendDevice = boostr::CpuDevice;

fn load_err(e: impl std::fmt::Display) -> EngineError {
    EngineError::Load(e.to_string())
}

fn gen_err(e: impl std::fmt::Display) -> EngineError {
    EngineError::Generation(e.to_string())
}

/// Loads [`GgufBackend`] from an [`EngineConfig`]
pub struct GgufLoader {
    config: EngineConfig,
}

impl GgufLoader {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    fn device(&self) -> Result<(BackendDevice, DeviceInfo)> {
        #[cfg(feature = "cuda")]
        {
            if !self.config.device.is_cuda() {
                return Err(EngineError::Load(
                    "this build runs on CUDA; set engine.device to cuda:<id>".to_string(),
                ));
            }
            let id = self.config.device.device_id();
            Ok((
                boostr::CudaDevice::new(id),
                DeviceInfo {
                    descriptor: format!("cuda:{}", id),
                    accelerator_available: true,
                    accelerator_memory_gb: None,
                },
            ))
        }
        #[cfg(not(feature = "cuda"))]
        {
            if self.config.device.is_cuda() {
                return Err(EngineError::Load(
                    "CUDA support is not enabled; rebuild with --features cuda or use device: cpu"
                        .to_string(),
                ));
            }
            Ok((boostr::CpuDevice::new(), DeviceInfo::cpu()))
        }
    }
}

impl BackendLoader for GgufLoader {
    fn model_id(&self) -> &str {
        &self.config.model
    }

    fn load(&self) -> Result<Box<dyn InferenceBackend>> {
        let (device, device_info) = self.device()?;
        let path = resolve_model_path(&self.config)?;
        let backend = GgufBackend::load(&path, device, device_info, self.config.num_ctx)?;
        backend.warmup()?;
        Ok(Box::new(backend))
    }
}

/// A llama-family model loaded from GGUF
pub struct GgufBackend {
    model: LoadedModel<BackendRuntime>,
    tokenizer: GgufTokenizer,
    device: BackendDevice,
    device_info: DeviceInfo,
    num_ctx: usize,
    max_seq_len: usize,
}

impl GgufBackend {
    fn load(
        path: &Path,
        device: BackendDevice,
        device_info: DeviceInfo,
        num_ctx: usize,
    ) -> Result<Self> {
        let gguf = Gguf::open_with_mmap(path, false)
            .map_err(|e| load_err(format!("failed to open GGUF file: {}", e)))?;

        let config = config_from_metadata(&gguf)?;
        if config.model_type != "llama" && config.model_type != "mistral" {
            return Err(EngineError::Load(format!(
                "unsupported architecture: {}",
                config.model_type
            )));
        }

        let tokenizer = GgufTokenizer::from_gguf(&gguf).map_err(load_err)?;

        let var_map = VarMap::<BackendRuntime>::from_gguf(path, &device)
            .map_err(|e| load_err(format!("failed to load GGUF tensors: {}", e)))?;
        tracing::info!("Loaded {} tensors from {}", var_map.len(), path.display());

        // Weights stay resident for the life of the process.
        let var_map: &'static mut VarMap<BackendRuntime> = Box::leak(Box::new(var_map));
        let mut vb = VarBuilder::new(var_map, &device);

        let model = LoadedModel::load(&config, &mut vb)
            .map_err(|e| load_err(format!("failed to build model: {}", e)))?;

        Ok(Self {
            model,
            tokenizer,
            device,
            device_info,
            num_ctx,
            max_seq_len: config.max_seq_len,
        })
    }

    fn new_cache(&self, initial_capacity: usize, max_len: usize) -> Result<LayeredKvCache<BackendRuntime>> {
        LayeredKvCache::new_positional(
            self.model.num_layers(),
            1,
            self.model.num_kv_heads().unwrap_or(8),
            initial_capacity,
            max_len,
            self.model.head_dim().unwrap_or(64),
            DType::F32,
            &self.device,
        )
        .map_err(gen_err)
    }

    /// One forward pass so kernel setup cost is not charged to the first request
    fn warmup(&self) -> Result<()> {
        let start = std::time::Instant::now();
        let input = Tensor::<BackendRuntime>::from_slice(&[1u32], &[1, 1], &self.device);
        let mut cache = self.new_cache(16, 16).map_err(load_err)?;
        self.model
            .forward_with_kv_cache(&input, &mut cache, 0)
            .map_err(|e| load_err(format!("warmup forward pass failed: {}", e)))?;
        tracing::debug!("Model warmup complete in {:?}", start.elapsed());
        Ok(())
    }

    /// Logits at the final sequence position, as a flat vector
    fn last_logits(logits: &Tensor<BackendRuntime>) -> Result<Vec<f32>> {
        let seq_len = logits.dim(1).map_err(gen_err)?;
        let last = logits
            .narrow(1, seq_len - 1, 1)
            .map_err(gen_err)?
            .squeeze(Some(1))
            .contiguous();
        Ok(last.to_vec())
    }
}

impl InferenceBackend for GgufBackend {
    fn tokenize(&self, text: &str) -> Result<Vec<u32>> {
        Ok(self.tokenizer.encode(text))
    }

    fn generate(
        &mut self,
        prompt: &[u32],
        params: &SamplingParams,
        max_new_tokens: usize,
    ) -> Result<Vec<u32>> {
        let budget = max_new_tokens.min(self.max_seq_len.saturating_sub(prompt.len()));
        if budget == 0 {
            return Ok(Vec::new());
        }

        let mut cache = self.new_cache(self.num_ctx.max(prompt.len() + 1), self.max_seq_len)?;

        let input = Tensor::<BackendRuntime>::from_slice(prompt, &[1, prompt.len()], &self.device);
        let mut logits = self
            .model
            .forward_with_kv_cache(&input, &mut cache, 0)
            .map_err(gen_err)?;

        let mut rng = rand::thread_rng();
        let mut context = prompt.to_vec();
        let mut generated = Vec::with_capacity(budget);

        while generated.len() < budget {
            let mut last = Self::last_logits(&logits)?;
            let next = sample_next(&mut last, &context, params, &mut rng);

            if self.tokenizer.is_eos(next) {
                tracing::debug!("Hit EOS after {} tokens", generated.len());
                break;
            }

            generated.push(next);
            context.push(next);
            if generated.len() == budget {
                break;
            }

            let next_input = Tensor::<BackendRuntime>::from_slice(&[next], &[1, 1], &self.device);
            let position = cache.seq_len();
            logits = self
                .model
                .forward_with_kv_cache(&next_input, &mut cache, position)
                .map_err(gen_err)?;
        }

        Ok(generated)
    }

    fn detokenize(&self, tokens: &[u32]) -> Result<String> {
        self.tokenizer
            .decode(tokens)
            .map_err(|e| gen_err(format!("decode failed: {}", e)))
    }

    fn device(&self) -> DeviceInfo {
        self.device_info.clone()
    }
}

/// Build the model config from GGUF metadata (llama-family keys)
fn config_from_metadata(gguf: &Gguf) -> Result<UniversalConfig> {
    let metadata = gguf.metadata();
    let arch = metadata.architecture().unwrap_or("llama");

    let vocab_size: usize = if let Some(vs) = metadata.get_u32("general.vocab_size") {
        vs as usize
    } else if let Some(tokens) = metadata.get_array("tokenizer.ggml.tokens") {
        tokens.len()
    } else {
        32000
    };

    let hidden_size = metadata
        .embedding_length()
        .ok_or_else(|| load_err(format!("GGUF missing {}.embedding_length", arch)))?
        as usize;
    let num_layers = metadata
        .block_count()
        .ok_or_else(|| load_err(format!("GGUF missing {}.block_count", arch)))?
        as usize;
    let max_seq_len = metadata
        .context_length()
        .map(|v| v as usize)
        .unwrap_or(4096);

    let model_type = match arch {
        "llama" | "llama2" | "llama3" => "llama",
        "mistral" => "mistral",
        other => other,
    };

    let num_heads = metadata
        .get_u32(&format!("{}.attention.head_count", arch))
        .map(|v| v as usize)
        .unwrap_or(32);
    let num_kv_heads = metadata
        .get_u32(&format!("{}.attention.head_count_kv", arch))
        .map(|v| v as usize);
    let rope_theta = metadata
        .get_f32(&format!("{}.rope.freq_base", arch))
        .unwrap_or(10000.0);
    let intermediate_size = metadata
        .get_u32(&format!("{}.feed_forward_length", arch))
        .map(|v| v as usize);
    let rms_norm_eps = metadata
        .get_f32(&format!("{}.attention.layer_norm_rms_epsilon", arch))
        .map(|v| v as f64)
        .unwrap_or(1e-5);

    Ok(UniversalConfig {
        model_type: model_type.to_string(),
        vocab_size,
        hidden_size,
        num_layers,
        max_seq_len,
        intermediate_size,
        rms_norm_eps,
        attention: Some(AttentionConfig {
            num_heads,
            num_kv_heads,
            head_dim: (num_heads > 0).then(|| hidden_size / num_heads),
            rope_theta: rope_theta as f32,
            rope_scaling: None,
            kv_latent_dim: None,
            q_latent_dim: None,
            d_rope: None,
            sliding_window: None,
            use_alibi: false,
        }),
        ssm: None,
        moe: None,
        hybrid_layers: None,
        tie_word_embeddings: false,
        vision: None,
        audio: None,
    })
}
