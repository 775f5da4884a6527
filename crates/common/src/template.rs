//! Prompt template: a fixed preamble with exactly one instruction slot.
//!
//! The same template frames both the training examples and the inference
//! prompt. Training text is built as `format(instruction) + response + eos`,
//! so the two agree byte for byte up to the instruction/response boundary.

use serde::{Deserialize, Serialize};

/// Placeholder for the instruction text.
pub const SLOT: &str = "{}";

/// Marker that opens the answer section of the Alpaca layout.
pub const RESPONSE_MARKER: &str = "### Response:";

const ALPACA: &str = "Below is an instruction that describes a task. \
Write a response that appropriately completes the request.\n\n\
### Instruction:\n{}\n\n### Response:\n";

/// Immutable format string with a single `{}` slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PromptTemplate {
    text: String,
    slot_at: usize,
}

impl PromptTemplate {
    /// Validate and wrap a template string. Exactly one `{}` is required.
    pub fn new(text: impl Into<String>) -> anyhow::Result<Self> {
        let text = text.into();
        let slots = text.matches(SLOT).count();
        if slots != 1 {
            anyhow::bail!("prompt template must contain exactly one `{SLOT}` slot, found {slots}");
        }
        let slot_at = text.find(SLOT).unwrap_or_default();
        Ok(Self { text, slot_at })
    }

    /// The Alpaca instruction/response layout used by both profiles.
    pub fn alpaca() -> Self {
        Self {
            text: ALPACA.to_string(),
            slot_at: ALPACA.find(SLOT).unwrap_or_default(),
        }
    }

    /// Fill the slot with the user's instruction.
    pub fn format(&self, instruction: &str) -> String {
        let mut out = String::with_capacity(self.text.len() + instruction.len());
        out.push_str(self.preamble());
        out.push_str(instruction);
        out.push_str(self.postamble());
        out
    }

    /// One flat training example: the inference prompt followed by the answer
    /// and the end-of-sequence marker the model should learn to emit.
    pub fn format_training(&self, instruction: &str, response: &str, eos_marker: &str) -> String {
        let mut out = self.format(instruction);
        out.push_str(response);
        out.push_str(eos_marker);
        out
    }

    /// Text before the slot.
    pub fn preamble(&self) -> &str {
        &self.text[..self.slot_at]
    }

    /// Text after the slot; the instruction/response boundary.
    pub fn postamble(&self) -> &str {
        &self.text[self.slot_at + SLOT.len()..]
    }

    /// Marker that ends the prompt and opens the answer.
    pub fn response_marker(&self) -> &'static str {
        RESPONSE_MARKER
    }
}

impl Default for PromptTemplate {
    fn default() -> Self {
        Self::alpaca()
    }
}

impl TryFrom<String> for PromptTemplate {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<PromptTemplate> for String {
    fn from(value: PromptTemplate) -> Self {
        value.text
    }
}
