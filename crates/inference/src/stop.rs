//! Early-stop check run after every generated token.
//!
//! The model can emit a delimiter (`###`) that the runtime does not treat as
//! end-of-sequence. [`StopPredicate`] halts as soon as the newest token is in
//! the precomputed [`StopTokenSet`].

use std::collections::HashSet;

use crate::codec::TokenCodec;

/// Capability the generation loop consults after each step.
pub trait StoppingCriteria {
    /// `ids` is the whole sequence so far (prompt + generated tail).
    fn should_stop(&self, ids: &[u32]) -> bool;
}

impl<F> StoppingCriteria for F
where
    F: Fn(&[u32]) -> bool,
{
    fn should_stop(&self, ids: &[u32]) -> bool {
        self(ids)
    }
}

/// Token ids that end a turn. Resolved once per session, then read-only.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StopTokenSet {
    ids: HashSet<u32>,
}

impl StopTokenSet {
    pub fn new(ids: impl IntoIterator<Item = u32>) -> Self {
        Self {
            ids: ids.into_iter().collect(),
        }
    }

    /// Resolve the end-of-sequence id and every marker that the tokenizer maps
    /// to exactly one id. Unresolvable entries are skipped, never an error.
    pub fn resolve(codec: &dyn TokenCodec, eos_token: Option<&str>, markers: &[String]) -> Self {
        let mut ids = HashSet::new();
        if let Some(eos) = eos_token {
            match codec.token_to_id(eos) {
                Some(id) => {
                    ids.insert(id);
                }
                None => tracing::warn!(token = eos, "eos token not in vocabulary"),
            }
        }
        for marker in markers {
            match codec.encode(marker, false) {
                Ok(enc) if enc.len() == 1 => {
                    ids.insert(enc[0]);
                }
                Ok(enc) => tracing::debug!(
                    marker = marker.as_str(),
                    pieces = enc.len(),
                    "stop marker is not a single token; skipped"
                ),
                Err(e) => tracing::debug!(
                    marker = marker.as_str(),
                    error = %e,
                    "stop marker failed to encode; skipped"
                ),
            }
        }
        tracing::info!(stop_ids = ?ids, "resolved stop tokens");
        Self { ids }
    }

    pub fn contains(&self, id: u32) -> bool {
        self.ids.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Halts iff the last id is a stop token.
#[derive(Debug, Clone, Default)]
pub struct StopPredicate {
    stop: StopTokenSet,
}

impl StopPredicate {
    pub fn new(stop: StopTokenSet) -> Self {
        Self { stop }
    }

    pub fn stop_tokens(&self) -> &StopTokenSet {
        &self.stop
    }
}

impl StoppingCriteria for StopPredicate {
    fn should_stop(&self, ids: &[u32]) -> bool {
        ids.last().is_some_and(|id| self.stop.contains(*id))
    }
}
