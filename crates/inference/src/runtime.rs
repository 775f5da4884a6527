//! Inference runtime: load model + adapter, answer questions, run the chat loop.

use std::io::{BufRead, Write};
use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::Context;
use candle_core::Device;
use indicatif::{ProgressBar, ProgressStyle};
use tokenizers::Tokenizer;

use persona_common::ChatProfile;

use crate::adapter::LoraAdapter;
use crate::codec::TokenCodec;
use crate::generate::{CandleGenerator, GenerateRequest, TextGenerator};
use crate::hub::ModelFiles;
use crate::model::{load_causal_lm, resolve_dtype};
use crate::sanitize::ResponseSanitizer;
use crate::stop::{StopPredicate, StopTokenSet};

/// Lines that end the chat loop (compared case-insensitively, trimmed).
pub const EXIT_COMMANDS: [&str; 3] = ["exit", "quit", "q"];

const USER_PROMPT: &str = "\x1b[1;32mYou:\x1b[0m ";
const AI_PROMPT: &str = "\x1b[1;36mAI:\x1b[0m ";

pub fn is_exit_command(line: &str) -> bool {
    let line = line.trim();
    EXIT_COMMANDS.iter().any(|c| line.eq_ignore_ascii_case(c))
}

/// High-level inference runtime.
pub struct InferenceRuntime<G, T> {
    generator: G,
    codec: T,
    profile: ChatProfile,
    stop: StopPredicate,
    eos_token_id: Option<u32>,
    sanitizer: ResponseSanitizer,
}

impl InferenceRuntime<CandleGenerator, Tokenizer> {
    /// Resolve the base model, merge the profile's adapter (if any), and
    /// build the tokenizer-backed runtime.
    pub fn load(profile: ChatProfile, device: Device) -> anyhow::Result<Self> {
        let pb = ProgressBar::new_spinner();
        pb.set_style(ProgressStyle::default_spinner().template("{spinner} [{elapsed}] {msg}")?);
        pb.enable_steady_tick(Duration::from_millis(120));

        pb.set_message(format!("resolving {}", profile.base_model));
        let files = ModelFiles::resolve(&profile.base_model, &profile.revision)?;
        let tokenizer = Tokenizer::from_file(&files.tokenizer)
            .map_err(|e| anyhow::anyhow!("load tokenizer: {e}"))?;

        pb.set_message("loading weights");
        let dtype = resolve_dtype(profile.precision, &device);
        let mut weights = files.load_weights(&device)?;

        if let Some(dir) = &profile.adapter_dir {
            pb.set_message(format!("merging adapter {}", dir.display()));
            merge_adapter(dir, &profile.base_model, &mut weights, &device)
                .context("load adapter")?;
        }

        pb.set_message("building model");
        let model = load_causal_lm(&files.config, weights, dtype, &device)?;
        pb.finish_and_clear();

        tracing::info!(
            profile = profile.name.as_str(),
            base_model = profile.base_model.as_str(),
            device = ?device,
            "model ready"
        );
        Ok(Self::new(CandleGenerator::new(model, device), tokenizer, profile))
    }
}

fn merge_adapter(
    dir: &Path,
    base_model: &str,
    weights: &mut std::collections::HashMap<String, candle_core::Tensor>,
    device: &Device,
) -> anyhow::Result<()> {
    let adapter = LoraAdapter::load(dir, device)?;
    if let Some(trained_on) = &adapter.config.base_model_name_or_path {
        if trained_on != base_model {
            tracing::warn!(
                adapter_base = trained_on.as_str(),
                base_model,
                "adapter was trained on a different base model id"
            );
        }
    }
    adapter.merge_into(weights)
}

impl<G: TextGenerator, T: TokenCodec> InferenceRuntime<G, T> {
    pub fn new(generator: G, codec: T, profile: ChatProfile) -> Self {
        let stop_tokens =
            StopTokenSet::resolve(&codec, Some(profile.eos_token.as_str()), &profile.stop_markers);
        let eos_token_id = codec.token_to_id(&profile.eos_token);
        Self {
            generator,
            codec,
            profile,
            stop: StopPredicate::new(stop_tokens),
            eos_token_id,
            sanitizer: ResponseSanitizer::default(),
        }
    }

    pub fn profile(&self) -> &ChatProfile {
        &self.profile
    }

    pub fn generator(&self) -> &G {
        &self.generator
    }

    pub fn stop_predicate(&self) -> &StopPredicate {
        &self.stop
    }

    /// One question in, one cleaned single-paragraph answer out.
    pub fn respond(&mut self, question: &str) -> anyhow::Result<String> {
        let started = Instant::now();
        let prompt = self.profile.template.format(question);
        let input_ids = self.codec.encode(&prompt, true)?;

        let output = self.generator.generate(&GenerateRequest {
            input_ids: &input_ids,
            max_new_tokens: self.profile.generation.max_new_tokens,
            config: &self.profile.generation,
            eos_token_id: self.eos_token_id,
            stop: &self.stop,
        })?;

        let new_ids = output.get(input_ids.len()..).unwrap_or_default();
        let raw = self.codec.decode(new_ids, true)?;
        let answer = self.sanitizer.clean(&raw);

        tracing::debug!(
            prompt_tokens = input_ids.len(),
            new_tokens = new_ids.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "turn complete"
        );
        Ok(answer)
    }

    /// Interactive chat loop. Returns on an exit command or end of input.
    pub fn chat_loop<R: BufRead, W: Write>(
        &mut self,
        mut reader: R,
        mut writer: W,
    ) -> anyhow::Result<()> {
        let rule = "=".repeat(50);
        writeln!(writer, "\n{rule}")?;
        writeln!(writer, "{} ready. Type 'exit' to quit.", self.profile.name)?;
        writeln!(writer, "{rule}\n")?;

        loop {
            write!(writer, "{USER_PROMPT}")?;
            writer.flush()?;
            let mut line = String::new();
            if reader.read_line(&mut line)? == 0 {
                break;
            }
            if is_exit_command(&line) {
                break;
            }
            let question = line.trim_end_matches(['\r', '\n']);
            let answer = self.respond(question)?;
            writeln!(writer, "{AI_PROMPT}{answer}\n")?;
        }
        writer.flush()?;
        Ok(())
    }
}
