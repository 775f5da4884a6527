//! Tokenizer seam: text ↔ token ids.

use tokenizers::Tokenizer;

/// What the runtime needs from a tokenizer.
pub trait TokenCodec {
    fn encode(&self, text: &str, add_special_tokens: bool) -> anyhow::Result<Vec<u32>>;
    fn decode(&self, ids: &[u32], skip_special_tokens: bool) -> anyhow::Result<String>;
    /// Direct vocabulary lookup (no normalisation or splitting).
    fn token_to_id(&self, token: &str) -> Option<u32>;
}

// `Tokenizer` derefs to `TokenizerImpl`, which owns the inherent methods.
impl TokenCodec for Tokenizer {
    fn encode(&self, text: &str, add_special_tokens: bool) -> anyhow::Result<Vec<u32>> {
        let enc = (**self)
            .encode(text, add_special_tokens)
            .map_err(|e| anyhow::anyhow!("encode: {e}"))?;
        Ok(enc.get_ids().to_vec())
    }

    fn decode(&self, ids: &[u32], skip_special_tokens: bool) -> anyhow::Result<String> {
        (**self)
            .decode(ids, skip_special_tokens)
            .map_err(|e| anyhow::anyhow!("decode: {e}"))
    }

    fn token_to_id(&self, token: &str) -> Option<u32> {
        (**self).token_to_id(token)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// First id handed to special tokens; above every Unicode scalar value.
    const SPECIAL_BASE: u32 = 0x11_0000;

    /// One id per `char`, plus whole-token ids for the given specials.
    pub(crate) struct CharCodec {
        specials: Vec<String>,
    }

    impl CharCodec {
        pub(crate) fn with_specials(specials: &[&str]) -> Self {
            Self {
                specials: specials.iter().map(|s| s.to_string()).collect(),
            }
        }
    }

    impl TokenCodec for CharCodec {
        fn encode(&self, text: &str, _add_special_tokens: bool) -> anyhow::Result<Vec<u32>> {
            let mut ids = Vec::new();
            let mut rest = text;
            'outer: while let Some(c) = rest.chars().next() {
                for (i, s) in self.specials.iter().enumerate() {
                    if let Some(tail) = rest.strip_prefix(s.as_str()) {
                        ids.push(SPECIAL_BASE + i as u32);
                        rest = tail;
                        continue 'outer;
                    }
                }
                ids.push(c as u32);
                rest = &rest[c.len_utf8()..];
            }
            Ok(ids)
        }

        fn decode(&self, ids: &[u32], skip_special_tokens: bool) -> anyhow::Result<String> {
            let mut out = String::new();
            for &id in ids {
                if id >= SPECIAL_BASE {
                    let s = self
                        .specials
                        .get((id - SPECIAL_BASE) as usize)
                        .ok_or_else(|| anyhow::anyhow!("unknown id {id}"))?;
                    if !skip_special_tokens {
                        out.push_str(s);
                    }
                } else {
                    out.push(char::from_u32(id).ok_or_else(|| anyhow::anyhow!("bad id {id}"))?);
                }
            }
            Ok(out)
        }

        fn token_to_id(&self, token: &str) -> Option<u32> {
            self.specials
                .iter()
                .position(|s| s == token)
                .map(|i| SPECIAL_BASE + i as u32)
        }
    }

    #[test]
    fn char_codec_round_trips_specials() {
        let codec = CharCodec::with_specials(&["</s>"]);
        let ids = codec.encode("hi</s>", false).unwrap();
        assert_eq!(ids.len(), 3);
        assert_eq!(codec.decode(&ids, false).unwrap(), "hi</s>");
        assert_eq!(codec.decode(&ids, true).unwrap(), "hi");
    }
}
