//! LoRA adapters in the PEFT on-disk layout, merged into base weights.
//!
//! An adapter directory holds `adapter_config.json` (rank, alpha, target
//! modules) and `adapter_model.safetensors` with one `lora_A` / `lora_B`
//! pair per adapted linear layer. Merging folds each pair into the matching
//! base weight as `W += (alpha / r) · B·A`, computed in f32 and cast back.

use std::collections::HashMap;
use std::path::Path;

use anyhow::Context;
use candle_core::{DType, Device, Tensor};
use serde::Deserialize;

const CONFIG_FILE: &str = "adapter_config.json";
const WEIGHTS_FILE: &str = "adapter_model.safetensors";
const PEFT_PREFIX: &str = "base_model.model.";

/// The subset of `adapter_config.json` the merge needs.
#[derive(Debug, Clone, Deserialize)]
pub struct LoraConfig {
    pub r: usize,
    pub lora_alpha: f64,
    #[serde(default)]
    pub target_modules: Vec<String>,
    #[serde(default)]
    pub base_model_name_or_path: Option<String>,
    #[serde(default)]
    pub use_rslora: bool,
}

impl LoraConfig {
    /// Multiplier applied to `B·A`.
    pub fn scale(&self) -> f64 {
        if self.use_rslora {
            self.lora_alpha / (self.r as f64).sqrt()
        } else {
            self.lora_alpha / self.r as f64
        }
    }
}

/// Low-rank factors for one base weight: `a` is `(r, in)`, `b` is `(out, r)`.
#[derive(Debug, Clone)]
pub struct LoraPair {
    pub a: Tensor,
    pub b: Tensor,
}

#[derive(Debug, Clone)]
pub struct LoraAdapter {
    pub config: LoraConfig,
    /// Base weight name (e.g. `model.layers.0.self_attn.q_proj.weight`) → factors.
    pairs: HashMap<String, LoraPair>,
}

impl LoraAdapter {
    pub fn load(dir: &Path, device: &Device) -> anyhow::Result<Self> {
        if !dir.is_dir() {
            anyhow::bail!("adapter directory not found: {}", dir.display());
        }
        let config_path = dir.join(CONFIG_FILE);
        let json = std::fs::read_to_string(&config_path)
            .with_context(|| format!("read {}", config_path.display()))?;
        let config: LoraConfig = serde_json::from_str(&json)
            .with_context(|| format!("parse {}", config_path.display()))?;
        if config.r == 0 {
            anyhow::bail!("{}: rank r must be positive", config_path.display());
        }

        let weights_path = dir.join(WEIGHTS_FILE);
        if !weights_path.is_file() {
            anyhow::bail!("{} not found in {}", WEIGHTS_FILE, dir.display());
        }
        let tensors = candle_core::safetensors::load(&weights_path, device)
            .with_context(|| format!("load {}", weights_path.display()))?;
        let pairs = pair_tensors(tensors)?;

        tracing::info!(
            dir = %dir.display(),
            rank = config.r,
            alpha = config.lora_alpha,
            layers = pairs.len(),
            "loaded LoRA adapter"
        );
        Ok(Self { config, pairs })
    }

    pub fn from_parts(config: LoraConfig, pairs: HashMap<String, LoraPair>) -> Self {
        Self { config, pairs }
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Add every low-rank delta to its base weight, in place.
    pub fn merge_into(&self, weights: &mut HashMap<String, Tensor>) -> anyhow::Result<()> {
        let scale = self.config.scale();
        let mut names: Vec<&String> = self.pairs.keys().collect();
        names.sort();
        for name in names {
            let pair = &self.pairs[name];
            let base = weights
                .get(name)
                .with_context(|| format!("adapter targets {name}, which the base model lacks"))?;
            let delta = pair
                .b
                .to_dtype(DType::F32)?
                .matmul(&pair.a.to_dtype(DType::F32)?)?;
            if delta.dims() != base.dims() {
                anyhow::bail!(
                    "adapter delta for {name} has shape {:?}, base weight is {:?}",
                    delta.dims(),
                    base.dims()
                );
            }
            let merged = (base.to_dtype(DType::F32)? + (delta * scale)?)?.to_dtype(base.dtype())?;
            weights.insert(name.clone(), merged);
        }
        tracing::debug!(layers = self.pairs.len(), scale, "merged adapter into base weights");
        Ok(())
    }
}

// ── Key mapping ─────────────────────────────────────────────────────────────

#[derive(Clone, Copy, PartialEq, Eq)]
enum Factor {
    A,
    B,
}

/// `base_model.model.X.lora_A[.default].weight` → (`X.weight`, A).
fn split_key(key: &str) -> Option<(String, Factor)> {
    let key = key.strip_prefix(PEFT_PREFIX).unwrap_or(key);
    for (tag, factor) in [("lora_A", Factor::A), ("lora_B", Factor::B)] {
        for suffix in [format!(".{tag}.weight"), format!(".{tag}.default.weight")] {
            if let Some(module) = key.strip_suffix(suffix.as_str()) {
                return Some((format!("{module}.weight"), factor));
            }
        }
    }
    None
}

fn pair_tensors(tensors: HashMap<String, Tensor>) -> anyhow::Result<HashMap<String, LoraPair>> {
    let mut halves: HashMap<String, (Option<Tensor>, Option<Tensor>)> = HashMap::new();
    for (key, tensor) in tensors {
        let Some((target, factor)) = split_key(&key) else {
            tracing::debug!(key = key.as_str(), "ignoring non-LoRA tensor in adapter");
            continue;
        };
        let slot = halves.entry(target).or_default();
        match factor {
            Factor::A => slot.0 = Some(tensor),
            Factor::B => slot.1 = Some(tensor),
        }
    }

    let mut pairs = HashMap::with_capacity(halves.len());
    for (target, halves) in halves {
        match halves {
            (Some(a), Some(b)) => {
                pairs.insert(target, LoraPair { a, b });
            }
            (Some(_), None) => anyhow::bail!("adapter has lora_A but no lora_B for {target}"),
            (None, Some(_)) => anyhow::bail!("adapter has lora_B but no lora_A for {target}"),
            (None, None) => {}
        }
    }
    if pairs.is_empty() {
        anyhow::bail!("adapter contains no LoRA weights");
    }
    Ok(pairs)
}
