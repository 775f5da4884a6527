//! Chat profiles: everything that differs between the two model variants.
//!
//! Serialised as JSON. Every field except `name` and `base_model` has a
//! serde default, so a profile file only needs the values it overrides.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::template::PromptTemplate;

// ── Generation ──────────────────────────────────────────────────────────────

/// Sampling and budget knobs for one chat turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Upper bound on generated tokens per turn.
    #[serde(default = "default_max_new_tokens")]
    pub max_new_tokens: usize,
    /// Softmax temperature. Values ≤ 1e-6 select greedy decoding.
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    /// Nucleus threshold; `1.0` disables the filter.
    #[serde(default = "default_top_p")]
    pub top_p: f64,
    /// Keep only the `top_k` most likely tokens; `0` disables the filter.
    #[serde(default)]
    pub top_k: usize,
    /// Divides positive (multiplies negative) logits of already-seen tokens.
    #[serde(default = "default_repetition_penalty")]
    pub repetition_penalty: f64,
    /// How many trailing context tokens the penalty looks at; `0` = all.
    #[serde(default)]
    pub repetition_window: usize,
    /// Forbid repeating any n-gram of this size; `0` disables.
    #[serde(default)]
    pub no_repeat_ngram_size: usize,
    /// Seed for the sampling RNG.
    #[serde(default = "default_seed")]
    pub seed: u64,
}

fn default_max_new_tokens() -> usize {
    256
}
fn default_temperature() -> f64 {
    0.7
}
fn default_top_p() -> f64 {
    0.9
}
fn default_repetition_penalty() -> f64 {
    1.2
}
fn default_seed() -> u64 {
    299_792_458
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_new_tokens: default_max_new_tokens(),
            temperature: default_temperature(),
            top_p: default_top_p(),
            top_k: 0,
            repetition_penalty: default_repetition_penalty(),
            repetition_window: 0,
            no_repeat_ngram_size: 0,
            seed: default_seed(),
        }
    }
}

impl GenerationConfig {
    pub fn is_greedy(&self) -> bool {
        self.temperature <= 1e-6
    }
}

// ── Precision ───────────────────────────────────────────────────────────────

/// Floating-point precision the base weights are loaded in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    /// f16 on an accelerator, f32 on CPU.
    #[default]
    Auto,
    F32,
    F16,
    Bf16,
}

// ── Profile ─────────────────────────────────────────────────────────────────

/// One (base model, adapter, template, sampling) variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatProfile {
    pub name: String,
    /// Hugging Face repo id or a local directory holding `config.json`,
    /// `tokenizer.json` and safetensors weights.
    pub base_model: String,
    #[serde(default = "default_revision")]
    pub revision: String,
    /// PEFT-style LoRA adapter directory; `None` runs the bare base model.
    #[serde(default)]
    pub adapter_dir: Option<PathBuf>,
    #[serde(default)]
    pub precision: Precision,
    #[serde(default)]
    pub template: PromptTemplate,
    /// Vocabulary entry of the tokenizer's end-of-sequence token.
    #[serde(default = "default_eos_token")]
    pub eos_token: String,
    /// Marker appended to every training example.
    #[serde(default = "default_eos_token")]
    pub training_eos_marker: String,
    /// Literal markers that halt generation when they map to a single token.
    #[serde(default = "default_stop_markers")]
    pub stop_markers: Vec<String>,
    #[serde(default)]
    pub generation: GenerationConfig,
}

fn default_revision() -> String {
    "main".to_string()
}
fn default_eos_token() -> String {
    "</s>".to_string()
}
fn default_stop_markers() -> Vec<String> {
    vec!["###".to_string()]
}

/// Names accepted by [`ChatProfile::builtin`].
pub const BUILTIN_PROFILES: [&str; 2] = ["deepseek", "tinyllama"];

impl ChatProfile {
    /// DeepSeek-R1 distilled Qwen 1.5B with the `sidharth_backup_lora` adapter.
    pub fn deepseek() -> Self {
        Self {
            name: "deepseek".to_string(),
            base_model: "deepseek-ai/DeepSeek-R1-Distill-Qwen-1.5B".to_string(),
            revision: default_revision(),
            adapter_dir: Some(PathBuf::from("sidharth_backup_lora")),
            precision: Precision::Auto,
            template: PromptTemplate::alpaca(),
            eos_token: "<｜end▁of▁sentence｜>".to_string(),
            training_eos_marker: "<｜end▁of▁sentence｜>".to_string(),
            stop_markers: default_stop_markers(),
            generation: GenerationConfig::default(),
        }
    }

    /// TinyLlama 1.1B chat with the `Sidharth_AI_Model` adapter and tighter
    /// sampling.
    pub fn tinyllama() -> Self {
        Self {
            name: "tinyllama".to_string(),
            base_model: "TinyLlama/TinyLlama-1.1B-Chat-v1.0".to_string(),
            revision: default_revision(),
            adapter_dir: Some(PathBuf::from("Sidharth_AI_Model")),
            precision: Precision::Auto,
            template: PromptTemplate::alpaca(),
            eos_token: "</s>".to_string(),
            training_eos_marker: "<|end▁of▁sentence|>".to_string(),
            stop_markers: default_stop_markers(),
            generation: GenerationConfig {
                max_new_tokens: 150,
                temperature: 0.3,
                top_p: 0.9,
                top_k: 50,
                repetition_penalty: 1.2,
                repetition_window: 0,
                no_repeat_ngram_size: 3,
                seed: default_seed(),
            },
        }
    }

    /// Look up a built-in profile by name (case-insensitive).
    pub fn builtin(name: &str) -> anyhow::Result<Self> {
        match name.to_ascii_lowercase().as_str() {
            "deepseek" => Ok(Self::deepseek()),
            "tinyllama" => Ok(Self::tinyllama()),
            other => anyhow::bail!(
                "unknown profile `{other}` (expected one of: {})",
                BUILTIN_PROFILES.join(", ")
            ),
        }
    }

    /// Save profile to a JSON file.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).with_context(|| format!("write profile {}", path.display()))?;
        Ok(())
    }

    /// Load profile from a JSON file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("read profile {}", path.display()))?;
        let profile = serde_json::from_str(&json)
            .with_context(|| format!("parse profile {}", path.display()))?;
        Ok(profile)
    }
}

impl Default for ChatProfile {
    fn default() -> Self {
        Self::deepseek()
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_json_round_trip() {
        let profile = ChatProfile::tinyllama();
        let json = serde_json::to_string(&profile).unwrap();
        let loaded: ChatProfile = serde_json::from_str(&json).unwrap();
        assert_eq!(loaded, profile);
    }

    #[test]
    fn minimal_profile_fills_defaults() {
        let json = r#"{ "name": "local", "base_model": "./models/tiny" }"#;
        let loaded: ChatProfile = serde_json::from_str(json).unwrap();
        assert_eq!(loaded.revision, "main");
        assert_eq!(loaded.adapter_dir, None);
        assert_eq!(loaded.precision, Precision::Auto);
        assert_eq!(loaded.template, PromptTemplate::alpaca());
        assert_eq!(loaded.stop_markers, vec!["###".to_string()]);
        assert_eq!(loaded.generation, GenerationConfig::default());
    }

    #[test]
    fn partial_generation_block_keeps_other_defaults() {
        let json = r#"{
            "name": "x",
            "base_model": "y",
            "precision": "bf16",
            "generation": { "temperature": 0.0, "top_k": 40 }
        }"#;
        let loaded: ChatProfile = serde_json::from_str(json).unwrap();
        assert_eq!(loaded.precision, Precision::Bf16);
        assert!(loaded.generation.is_greedy());
        assert_eq!(loaded.generation.top_k, 40);
        assert_eq!(loaded.generation.max_new_tokens, 256);
        assert_eq!(loaded.generation.repetition_penalty, 1.2);
    }

    #[test]
    fn builtin_lookup() {
        assert_eq!(ChatProfile::builtin("DeepSeek").unwrap().name, "deepseek");
        assert_eq!(ChatProfile::builtin("tinyllama").unwrap().generation.max_new_tokens, 150);
        assert!(ChatProfile::builtin("gpt2").is_err());
    }

    #[test]
    fn variants_differ_only_in_data() {
        let a = ChatProfile::deepseek();
        let b = ChatProfile::tinyllama();
        assert_eq!(a.template, b.template);
        assert_ne!(a.base_model, b.base_model);
        assert_ne!(a.generation, b.generation);
    }

    #[test]
    fn save_and_load_file() {
        let path = std::env::temp_dir().join(format!("persona-profile-{}.json", std::process::id()));
        let profile = ChatProfile::deepseek();
        profile.save(&path).unwrap();
        let loaded = ChatProfile::load(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(loaded, profile);
    }
}
