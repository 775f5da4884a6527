//! Decoding strategies: greedy, top-k, top-p, temperature, repetition penalty,
//! and the no-repeat n-gram ban.

use candle_core::{Result, Tensor};
use persona_common::GenerationConfig;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub struct Sampler {
    config: GenerationConfig,
    rng: StdRng,
}

impl Sampler {
    pub fn new(config: &GenerationConfig) -> Self {
        Self {
            config: config.clone(),
            rng: StdRng::seed_from_u64(config.seed),
        }
    }

    /// Sample one token from logits (1-D tensor of vocab_size). `context` is
    /// the full sequence so far; it drives the repetition penalty and n-gram ban.
    pub fn sample(&mut self, logits: &Tensor, context: &[u32]) -> Result<u32> {
        let mut logits_vec: Vec<f32> = logits.to_vec1()?;

        // Repetition penalty over the trailing window (0 = whole context)
        if self.config.repetition_penalty != 1.0 {
            let window = match self.config.repetition_window {
                0 => context.len(),
                w => w,
            };
            let recent = &context[context.len().saturating_sub(window)..];
            apply_repetition_penalty(&mut logits_vec, recent, self.config.repetition_penalty as f32);
        }

        for tok in banned_ngram_tokens(context, self.config.no_repeat_ngram_size) {
            if let Some(v) = logits_vec.get_mut(tok as usize) {
                *v = f32::NEG_INFINITY;
            }
        }

        if self.config.is_greedy() {
            return Ok(argmax(&logits_vec));
        }

        // Temperature scaling
        let temp = self.config.temperature as f32;
        for v in &mut logits_vec {
            *v /= temp;
        }

        // Top-k filter
        if self.config.top_k > 0 && self.config.top_k < logits_vec.len() {
            let mut sorted = logits_vec.clone();
            sorted.sort_unstable_by(|a, b| b.total_cmp(a));
            let threshold = sorted[self.config.top_k - 1];
            for v in &mut logits_vec {
                if *v < threshold {
                    *v = f32::NEG_INFINITY;
                }
            }
        }

        let mut probs = softmax(&logits_vec);

        // Top-p (nucleus) filter
        if self.config.top_p < 1.0 {
            let mut order: Vec<usize> = (0..probs.len()).collect();
            order.sort_unstable_by(|&a, &b| probs[b].total_cmp(&probs[a]));
            let mut cumsum = 0.0;
            let mut cut = order.len();
            for (rank, &idx) in order.iter().enumerate() {
                cumsum += probs[idx];
                if cumsum >= self.config.top_p as f32 {
                    cut = rank + 1;
                    break;
                }
            }
            for &idx in &order[cut..] {
                probs[idx] = 0.0;
            }
            normalize(&mut probs);
        }

        // Every candidate masked out: fall back to the raw argmax.
        if probs.iter().all(|&p| p <= 0.0 || p.is_nan()) {
            return Ok(argmax(&logits_vec));
        }

        let r: f32 = self.rng.gen();
        Ok(weighted_sample(&probs, r))
    }
}

fn apply_repetition_penalty(logits: &mut [f32], recent: &[u32], penalty: f32) {
    let mut seen = std::collections::HashSet::new();
    for &tok in recent {
        let idx = tok as usize;
        if idx >= logits.len() || !seen.insert(idx) {
            continue;
        }
        if logits[idx] > 0.0 {
            logits[idx] /= penalty;
        } else {
            logits[idx] *= penalty;
        }
    }
}

/// Tokens that would complete an n-gram already present in `ids`.
fn banned_ngram_tokens(ids: &[u32], n: usize) -> Vec<u32> {
    if n == 0 || ids.len() + 1 < n {
        return Vec::new();
    }
    if n == 1 {
        return ids.to_vec();
    }
    let prefix = &ids[ids.len() + 1 - n..];
    ids.windows(n)
        .filter(|w| &w[..n - 1] == prefix)
        .map(|w| w[n - 1])
        .collect()
}

fn softmax(logits: &[f32]) -> Vec<f32> {
    let max_val = logits.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    if max_val == f32::NEG_INFINITY {
        return vec![0.0; logits.len()];
    }
    let mut probs: Vec<f32> = logits.iter().map(|&v| (v - max_val).exp()).collect();
    normalize(&mut probs);
    probs
}

fn normalize(probs: &mut [f32]) {
    let sum: f32 = probs.iter().sum();
    if sum > 0.0 {
        for p in probs {
            *p /= sum;
        }
    }
}

fn argmax(v: &[f32]) -> u32 {
    v.iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map(|(i, _)| i as u32)
        .unwrap_or(0)
}

fn weighted_sample(probs: &[f32], r: f32) -> u32 {
    let mut cumsum = 0.0;
    let mut last = 0;
    for (i, &p) in probs.iter().enumerate() {
        if p <= 0.0 {
            continue;
        }
        last = i;
        cumsum += p;
        if cumsum >= r {
            return i as u32;
        }
    }
    last as u32
}
