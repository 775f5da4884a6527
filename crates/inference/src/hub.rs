//! Locating base-model files: a local directory or a Hugging Face Hub repo.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use anyhow::Context;
use candle_core::{Device, Tensor};
use hf_hub::api::sync::Api;
use hf_hub::{Repo, RepoType};
use serde::Deserialize;

const CONFIG_FILE: &str = "config.json";
const TOKENIZER_FILE: &str = "tokenizer.json";
const SINGLE_WEIGHTS: &str = "model.safetensors";
const SHARD_INDEX: &str = "model.safetensors.index.json";

/// Paths of everything needed to build a model and its tokenizer.
#[derive(Debug, Clone)]
pub struct ModelFiles {
    pub config: PathBuf,
    pub tokenizer: PathBuf,
    pub weights: Vec<PathBuf>,
}

#[derive(Deserialize)]
struct ShardIndex {
    weight_map: HashMap<String, String>,
}

impl ModelFiles {
    /// `base_model` is either an existing directory or a Hub repo id.
    pub fn resolve(base_model: &str, revision: &str) -> anyhow::Result<Self> {
        let local = Path::new(base_model);
        if local.is_dir() {
            tracing::info!(dir = %local.display(), "using local model directory");
            return Self::from_dir(local);
        }

        tracing::info!(repo = base_model, revision, "fetching model from hub");
        let api = Api::new()?;
        let repo = api.repo(Repo::with_revision(
            base_model.to_string(),
            RepoType::Model,
            revision.to_string(),
        ));
        let config = repo.get(CONFIG_FILE).with_context(|| format!("{base_model}: {CONFIG_FILE}"))?;
        let tokenizer = repo
            .get(TOKENIZER_FILE)
            .with_context(|| format!("{base_model}: {TOKENIZER_FILE}"))?;
        let weights = match repo.get(SINGLE_WEIGHTS) {
            Ok(path) => vec![path],
            Err(_) => {
                let index = repo
                    .get(SHARD_INDEX)
                    .with_context(|| format!("{base_model}: no {SINGLE_WEIGHTS} or {SHARD_INDEX}"))?;
                shard_names(&index)?
                    .iter()
                    .map(|name| repo.get(name).with_context(|| format!("{base_model}: {name}")))
                    .collect::<anyhow::Result<Vec<_>>>()?
            }
        };
        Ok(Self {
            config,
            tokenizer,
            weights,
        })
    }

    pub fn from_dir(dir: &Path) -> anyhow::Result<Self> {
        let require = |name: &str| -> anyhow::Result<PathBuf> {
            let path = dir.join(name);
            if !path.is_file() {
                anyhow::bail!("{} not found in {}", name, dir.display());
            }
            Ok(path)
        };
        let config = require(CONFIG_FILE)?;
        let tokenizer = require(TOKENIZER_FILE)?;
        let weights = if dir.join(SINGLE_WEIGHTS).is_file() {
            vec![dir.join(SINGLE_WEIGHTS)]
        } else {
            let index = require(SHARD_INDEX)?;
            shard_names(&index)?.iter().map(|name| require(name)).collect::<anyhow::Result<_>>()?
        };
        Ok(Self {
            config,
            tokenizer,
            weights,
        })
    }

    /// Read every weight file into one name → tensor map.
    pub fn load_weights(&self, device: &Device) -> anyhow::Result<HashMap<String, Tensor>> {
        let mut all = HashMap::new();
        for path in &self.weights {
            let tensors = candle_core::safetensors::load(path, device)
                .with_context(|| format!("load weights {}", path.display()))?;
            all.extend(tensors);
        }
        tracing::info!(tensors = all.len(), files = self.weights.len(), "weights loaded");
        Ok(all)
    }
}

/// Distinct shard file names listed in a safetensors index, sorted.
fn shard_names(index_path: &Path) -> anyhow::Result<Vec<String>> {
    let json = std::fs::read_to_string(index_path)
        .with_context(|| format!("read {}", index_path.display()))?;
    let index: ShardIndex = serde_json::from_str(&json)
        .with_context(|| format!("parse {}", index_path.display()))?;
    let names: BTreeSet<String> = index.weight_map.into_values().collect();
    if names.is_empty() {
        anyhow::bail!("{} lists no shards", index_path.display());
    }
    Ok(names.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("persona-hub-{}-{name}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn local_dir_with_single_weights() {
        let dir = scratch("single");
        for f in [CONFIG_FILE, TOKENIZER_FILE, SINGLE_WEIGHTS] {
            std::fs::write(dir.join(f), "{}").unwrap();
        }
        let files = ModelFiles::resolve(dir.to_str().unwrap(), "main").unwrap();
        std::fs::remove_dir_all(&dir).ok();
        assert_eq!(files.weights.len(), 1);
        assert!(files.config.ends_with(CONFIG_FILE));
    }

    #[test]
    fn local_dir_with_shards() {
        let dir = scratch("sharded");
        std::fs::write(dir.join(CONFIG_FILE), "{}").unwrap();
        std::fs::write(dir.join(TOKENIZER_FILE), "{}").unwrap();
        std::fs::write(
            dir.join(SHARD_INDEX),
            r#"{"weight_map": {"a": "model-00002.safetensors", "b": "model-00001.safetensors", "c": "model-00001.safetensors"}}"#,
        )
        .unwrap();
        std::fs::write(dir.join("model-00001.safetensors"), "").unwrap();
        std::fs::write(dir.join("model-00002.safetensors"), "").unwrap();
        let files = ModelFiles::from_dir(&dir).unwrap();
        std::fs::remove_dir_all(&dir).ok();
        let names: Vec<_> = files
            .weights
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, ["model-00001.safetensors", "model-00002.safetensors"]);
    }

    #[test]
    fn local_dir_missing_tokenizer_is_an_error() {
        let dir = scratch("incomplete");
        std::fs::write(dir.join(CONFIG_FILE), "{}").unwrap();
        let err = ModelFiles::from_dir(&dir).unwrap_err();
        std::fs::remove_dir_all(&dir).ok();
        assert!(err.to_string().contains(TOKENIZER_FILE));
    }
}
