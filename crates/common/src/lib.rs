//! # persona-common — Shared Data
//!
//! Types shared by every crate in the workspace:
//!
//! * **[`PromptTemplate`]** — the instruction/response frame used for both
//!   training text and inference prompts.
//! * **[`ChatProfile`]** / **[`GenerationConfig`]** — per-variant model,
//!   adapter, and sampling settings (serialised as JSON).
//! * **[`QaDataset`]** — the hand-written question/answer pairs.

pub mod config;
pub mod data;
pub mod template;

pub use config::{ChatProfile, GenerationConfig, Precision, BUILTIN_PROFILES};
pub use data::{QaDataset, QaPair};
pub use template::{PromptTemplate, RESPONSE_MARKER};
