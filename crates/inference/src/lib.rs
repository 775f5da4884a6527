//! # persona-infer — Chat Inference Runtime
//!
//! * **[`StopPredicate`]** — halts generation when the newest token is a stop token.
//! * **[`ResponseSanitizer`]** — strips leaked template/marker text from an answer.
//! * **[`Sampler`]** — top-k, top-p, temperature, repetition penalty, n-gram ban.
//! * **[`CandleGenerator`]** — KV-cached decoding over llama / qwen2 models.
//! * **[`LoraAdapter`]** — PEFT adapter loading and merge into base weights.
//! * **[`InferenceRuntime`]** — template → generate → decode → sanitize, plus the chat loop.

pub mod adapter;
pub mod codec;
pub mod generate;
pub mod hub;
pub mod model;
pub mod runtime;
pub mod sampler;
pub mod sanitize;
pub mod stop;

pub use adapter::{LoraAdapter, LoraConfig};
pub use codec::TokenCodec;
pub use generate::{CandleGenerator, GenerateRequest, TextGenerator};
pub use hub::ModelFiles;
pub use model::{Architecture, CausalLm};
pub use runtime::{is_exit_command, InferenceRuntime, EXIT_COMMANDS};
pub use sampler::Sampler;
pub use sanitize::{CleanupRule, ResponseSanitizer};
pub use stop::{StopPredicate, StopTokenSet, StoppingCriteria};
