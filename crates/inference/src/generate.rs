//! Token generation seam and its candle-backed implementation.
//!
//! Uses a KV cache for O(1) per-token decoding after an initial prefill pass.

use candle_core::{Device, Tensor};
use persona_common::GenerationConfig;

use crate::model::CausalLm;
use crate::sampler::Sampler;
use crate::stop::StoppingCriteria;

/// One generation call.
pub struct GenerateRequest<'a> {
    pub input_ids: &'a [u32],
    pub max_new_tokens: usize,
    pub config: &'a GenerationConfig,
    pub eos_token_id: Option<u32>,
    pub stop: &'a dyn StoppingCriteria,
}

/// Produces continuations of a token sequence.
pub trait TextGenerator {
    /// Returns the prompt ids followed by the generated ids. Stops after
    /// emitting eos, after `stop` fires (the firing token is kept), or once
    /// `max_new_tokens` ids have been added.
    fn generate(&mut self, request: &GenerateRequest<'_>) -> anyhow::Result<Vec<u32>>;
}

/// [`TextGenerator`] over any [`CausalLm`].
pub struct CandleGenerator {
    model: Box<dyn CausalLm>,
    device: Device,
}

impl CandleGenerator {
    pub fn new(model: Box<dyn CausalLm>, device: Device) -> Self {
        Self { model, device }
    }
}

impl TextGenerator for CandleGenerator {
    /// Prefill: run the whole prompt once and fill the KV cache.
    /// Decode: each new token is run with seq_len 1, reusing the cache.
    fn generate(&mut self, request: &GenerateRequest<'_>) -> anyhow::Result<Vec<u32>> {
        let mut tokens = request.input_ids.to_vec();
        if tokens.is_empty() || request.max_new_tokens == 0 {
            return Ok(tokens);
        }
        let mut sampler = Sampler::new(request.config);
        self.model.clear_cache()?;

        let mut input = Tensor::new(tokens.as_slice(), &self.device)?.unsqueeze(0)?;
        let mut offset = 0;
        for _ in 0..request.max_new_tokens {
            let logits = self.model.forward(&input, offset)?;
            offset += input.dim(1)?;
            let next_token = sampler.sample(&logits, &tokens)?;
            tokens.push(next_token);

            if request.eos_token_id == Some(next_token) || request.stop.should_stop(&tokens) {
                break;
            }
            // Single token: shape (1, 1) for (batch=1, seq_len=1)
            input = Tensor::new(&[next_token], &self.device)?.unsqueeze(0)?;
        }
        Ok(tokens)
    }
}
