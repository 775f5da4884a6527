//! Causal language models behind one trait.
//!
//! The base checkpoint's `config.json` names its architecture in
//! `model_type`; [`load_causal_lm`] builds the matching candle-transformers
//! model from an in-memory weight map (so a merged adapter can be applied
//! before the weights reach the model).

use std::collections::HashMap;
use std::path::Path;

use anyhow::Context;
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::{llama, qwen2};
use persona_common::Precision;
use serde::Deserialize;

/// One forward step of a decoder-only model with an internal KV cache.
pub trait CausalLm {
    /// `input` is `(1, seq_len)`; `offset` is the number of positions already
    /// in the cache. Returns the f32 logits of the last position, shape `(vocab,)`.
    fn forward(&mut self, input: &Tensor, offset: usize) -> candle_core::Result<Tensor>;

    /// Drop cached keys/values before a new sequence.
    fn clear_cache(&mut self) -> candle_core::Result<()>;
}

// ── Architectures ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Architecture {
    Llama,
    Qwen2,
}

impl Architecture {
    pub fn from_model_type(model_type: &str) -> anyhow::Result<Self> {
        match model_type {
            "llama" | "mistral" => Ok(Self::Llama),
            "qwen2" => Ok(Self::Qwen2),
            other => anyhow::bail!("unsupported model_type '{other}' (expected llama or qwen2)"),
        }
    }
}

#[derive(Deserialize)]
struct ModelTypeProbe {
    model_type: String,
}

pub struct LlamaLm {
    model: llama::Llama,
    cache: llama::Cache,
    config: llama::Config,
    dtype: DType,
    device: Device,
}

impl CausalLm for LlamaLm {
    fn forward(&mut self, input: &Tensor, offset: usize) -> candle_core::Result<Tensor> {
        let logits = self.model.forward(input, offset, &mut self.cache)?;
        logits.flatten_all()?.to_dtype(DType::F32)
    }

    fn clear_cache(&mut self) -> candle_core::Result<()> {
        self.cache = llama::Cache::new(true, self.dtype, &self.config, &self.device)?;
        Ok(())
    }
}

pub struct Qwen2Lm {
    model: qwen2::ModelForCausalLM,
}

impl CausalLm for Qwen2Lm {
    fn forward(&mut self, input: &Tensor, offset: usize) -> candle_core::Result<Tensor> {
        let logits = self.model.forward(input, offset)?;
        logits.flatten_all()?.to_dtype(DType::F32)
    }

    fn clear_cache(&mut self) -> candle_core::Result<()> {
        self.model.clear_kv_cache();
        Ok(())
    }
}

// ── Loading ────────────────────────────────────────────────────────────────

/// Weight dtype for a precision request on a device.
pub fn resolve_dtype(precision: Precision, device: &Device) -> DType {
    match precision {
        Precision::F32 => DType::F32,
        Precision::F16 => DType::F16,
        Precision::Bf16 => DType::BF16,
        Precision::Auto if device.is_cpu() => DType::F32,
        Precision::Auto => DType::F16,
    }
}

/// Build the model named by `config_path` from already-loaded weights.
pub fn load_causal_lm(
    config_path: &Path,
    weights: HashMap<String, Tensor>,
    dtype: DType,
    device: &Device,
) -> anyhow::Result<Box<dyn CausalLm>> {
    let raw = std::fs::read(config_path)
        .with_context(|| format!("read {}", config_path.display()))?;
    let probe: ModelTypeProbe = serde_json::from_slice(&raw)
        .with_context(|| format!("{}: missing model_type", config_path.display()))?;
    let arch = Architecture::from_model_type(&probe.model_type)?;
    let vb = VarBuilder::from_tensors(weights, dtype, device);

    tracing::info!(?arch, ?dtype, "building model");
    let model: Box<dyn CausalLm> = match arch {
        Architecture::Llama => {
            let cfg: llama::LlamaConfig = serde_json::from_slice(&raw)
                .with_context(|| format!("parse llama config {}", config_path.display()))?;
            let config = cfg.into_config(false);
            let cache = llama::Cache::new(true, dtype, &config, device)?;
            let model = llama::Llama::load(vb, &config)?;
            Box::new(LlamaLm {
                model,
                cache,
                config,
                dtype,
                device: device.clone(),
            })
        }
        Architecture::Qwen2 => {
            let config: qwen2::Config = serde_json::from_slice(&raw)
                .with_context(|| format!("parse qwen2 config {}", config_path.display()))?;
            let model = qwen2::ModelForCausalLM::new(&config, vb)?;
            Box::new(Qwen2Lm { model })
        }
    };
    Ok(model)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn architecture_from_model_type() {
        assert_eq!(Architecture::from_model_type("llama").unwrap(), Architecture::Llama);
        assert_eq!(Architecture::from_model_type("qwen2").unwrap(), Architecture::Qwen2);
        let err = Architecture::from_model_type("gpt2").unwrap_err();
        assert!(err.to_string().contains("gpt2"));
    }

    #[test]
    fn auto_precision_is_f32_on_cpu() {
        assert_eq!(resolve_dtype(Precision::Auto, &Device::Cpu), DType::F32);
        assert_eq!(resolve_dtype(Precision::Bf16, &Device::Cpu), DType::BF16);
    }
}
