//! Post-generation cleanup of the decoded answer span.
//!
//! Raw generations leak training structure: end-of-sequence markers spelled
//! as text, a fresh `### Instruction:` block, `[INST]` wrappers, or a copy of
//! the prompt preamble. [`ResponseSanitizer`] removes those with an ordered
//! list of [`CleanupRule`]s, keeps the first paragraph, and flattens
//! whitespace so the answer prints on one line.
//!
//! Order of operations in [`ResponseSanitizer::clean`]:
//!
//! 1. every rule, in list order, repeated until the text stops changing;
//! 2. trim;
//! 3. keep the text before the first blank line;
//! 4. collapse whitespace runs to a single space;
//! 5. trim.
//!
//! Paragraph truncation runs before the collapse: once newlines are folded
//! into spaces there is no blank line left to split on.

use std::borrow::Cow;

use lazy_static::lazy_static;
use regex::Regex;

/// Cap on rule passes for custom lists with non-empty replacements.
const MAX_PASSES: usize = 8;

lazy_static! {
    static ref STANDARD_RULES: Vec<CleanupRule> = vec![
        CleanupRule::compiled(
            "sequence-markers",
            r"(?is)<[|｜]\s*(?:begin|end)[_▁ ]?of[_▁ ]?sentence\s*[|｜]>|<[|｜]\s*endoftext\s*[|｜]>|</?s>",
        ),
        CleanupRule::compiled(
            "template-block",
            r"(?is)###\s*(?:instruction|response|input).*",
        ),
        CleanupRule::compiled("bare-delimiter", r"(?s)###.*"),
        CleanupRule::compiled("inst-block", r"(?is)\[INST\].*?\[/INST\]"),
        CleanupRule::compiled("prompt-echo", r"(?s)Below is an instruction.*?Response:"),
    ];
    static ref PARAGRAPH_BREAK: Regex = Regex::new(r"\n[ \t\r]*\n").unwrap();
    static ref WHITESPACE: Regex = Regex::new(r"\s+").unwrap();
}

/// One `(pattern, replacement)` step. The replacement may use `$1`-style
/// capture references.
#[derive(Debug, Clone)]
pub struct CleanupRule {
    name: String,
    pattern: Regex,
    replacement: String,
}

impl CleanupRule {
    pub fn new(name: &str, pattern: &str, replacement: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            name: name.to_string(),
            pattern: Regex::new(pattern)?,
            replacement: replacement.to_string(),
        })
    }

    /// Deletion rule from a pattern known to be valid.
    fn compiled(name: &str, pattern: &str) -> Self {
        Self {
            name: name.to_string(),
            pattern: Regex::new(pattern).unwrap(),
            replacement: String::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn apply<'t>(&self, text: &'t str) -> Cow<'t, str> {
        self.pattern.replace_all(text, self.replacement.as_str())
    }
}

/// Turns a raw decoded span into a single clean, trimmed paragraph.
#[derive(Debug, Clone)]
pub struct ResponseSanitizer {
    rules: Vec<CleanupRule>,
}

impl ResponseSanitizer {
    /// Sanitizer with a custom rule list, applied in the given order.
    pub fn new(rules: Vec<CleanupRule>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[CleanupRule] {
        &self.rules
    }

    pub fn clean(&self, raw: &str) -> String {
        // Deletion-only lists shrink the text on every changing pass, so they
        // run to a fixed point; lists that insert text are capped.
        let capped = self.rules.iter().any(|r| !r.replacement.is_empty());
        let mut text = raw.to_string();
        for pass in 0.. {
            if capped && pass == MAX_PASSES {
                break;
            }
            let mut next = text.clone();
            for rule in &self.rules {
                next = rule.apply(&next).into_owned();
            }
            if next == text {
                break;
            }
            text = next;
        }

        let first = PARAGRAPH_BREAK.split(text.trim()).next().unwrap_or_default();
        WHITESPACE.replace_all(first, " ").trim().to_string()
    }
}

impl Default for ResponseSanitizer {
    fn default() -> Self {
        Self::new(STANDARD_RULES.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clean(s: &str) -> String {
        ResponseSanitizer::default().clean(s)
    }

    #[test]
    fn strips_ascii_end_marker() {
        assert_eq!(clean("Hello<|end_of_sentence|>"), "Hello");
    }

    #[test]
    fn strips_glyph_end_markers() {
        assert_eq!(clean("Hi there<｜end▁of▁sentence｜>"), "Hi there");
        assert_eq!(clean("Hi there<|end▁of▁sentence|>"), "Hi there");
        assert_eq!(clean("<s> Hi </s>"), "Hi");
        assert_eq!(clean("Done<|endoftext|>"), "Done");
        assert_eq!(clean("<|BEGIN_OF_SENTENCE|>Yes"), "Yes");
    }

    #[test]
    fn drops_leaked_template_and_second_paragraph() {
        assert_eq!(
            clean("Answer text\n\n### Instruction:\nNext fake question"),
            "Answer text"
        );
        assert_eq!(clean("Yes.\n### response: again"), "Yes.");
        assert_eq!(clean("Sure ###Input: x"), "Sure");
    }

    #[test]
    fn bare_delimiter_truncates() {
        assert_eq!(clean("He uses Git. ### and more"), "He uses Git.");
        assert_eq!(clean("###"), "");
    }

    #[test]
    fn removes_inst_blocks_non_greedily() {
        assert_eq!(
            clean("A [INST] q1 [/INST] B [inst]\nq2\n[/INST] C"),
            "A B C"
        );
    }

    #[test]
    fn removes_prompt_echo() {
        assert_eq!(
            clean("Below is an instruction that describes a task. Response: He is a developer."),
            "He is a developer."
        );
    }

    #[test]
    fn collapses_whitespace_and_trims() {
        assert_eq!(
            clean("  multiple   spaces\nand newline  "),
            "multiple spaces and newline"
        );
        assert_eq!(clean("a\t\tb"), "a b");
    }

    #[test]
    fn keeps_first_paragraph_only() {
        assert_eq!(clean("First part.\n\nSecond part."), "First part.");
        assert_eq!(clean("First.\r\n  \r\nSecond."), "First.");
        assert_eq!(clean("\n\n  Leading blank lines.\n\nTail"), "Leading blank lines.");
    }

    #[test]
    fn empty_stays_empty() {
        assert_eq!(clean(""), "");
        assert_eq!(clean("   \n\n  "), "");
        assert_eq!(clean("<|end_of_sentence|>"), "");
    }

    #[test]
    fn delimiter_reformed_by_later_rule_is_still_removed() {
        // Deleting the [INST] span joins "#" and "##" into "###".
        assert_eq!(clean("ok #[INST]x[/INST]## tail"), "ok");
        assert!(!clean("a##[INST][/INST]#b").contains("###"));
    }

    /// `[IN` + inner + `ST]x[/INST]`: one `[INST]` span appears per pass.
    fn nested_inst(depth: usize) -> String {
        (1..depth).fold("[INST]x[/INST]".to_string(), |inner, _| {
            format!("[IN{inner}ST]x[/INST]")
        })
    }

    #[test]
    fn deeply_nested_inst_blocks_are_fully_removed() {
        for depth in [1, 7, 8, 9, 20] {
            let out = clean(&format!("ok #{}## tail", nested_inst(depth)));
            assert_eq!(out, "ok", "depth {depth}");
        }
        let out = clean(&format!("start {} end", nested_inst(12)));
        assert_eq!(out, "start end");
    }

    #[test]
    fn never_emits_delimiter() {
        let inputs = [
            "###",
            "x ### y",
            "#### Response",
            "a\n\n###",
            "[INST]###[/INST]",
            "#\n##",
            "Below is an instruction ### Response: z",
        ];
        for raw in inputs {
            assert!(!clean(raw).contains("###"), "{raw:?}");
        }
    }

    #[test]
    fn idempotent_on_own_output() {
        let inputs = [
            "  multiple   spaces\nand newline  ",
            "Answer text\n\n### Instruction:\nNext",
            "plain",
            "tabs\tand\nnewlines  ",
        ];
        for raw in inputs {
            let once = clean(raw);
            assert_eq!(clean(&once), once, "{raw:?}");
        }
    }

    #[test]
    fn custom_rules_run_in_order() {
        let rules = vec![
            CleanupRule::new("think", r"(?s)<think>.*?</think>", "").unwrap(),
            CleanupRule::new("name", r"Sid\b", "Sidharth").unwrap(),
        ];
        let s = ResponseSanitizer::new(rules);
        assert_eq!(s.rules()[0].name(), "think");
        assert_eq!(s.clean("<think>\nhmm\n</think>\nSid is here."), "Sidharth is here.");
    }

    #[test]
    fn standard_rule_order() {
        let names: Vec<_> = ResponseSanitizer::default()
            .rules()
            .iter()
            .map(|r| r.name().to_string())
            .collect();
        assert_eq!(
            names,
            ["sequence-markers", "template-block", "bare-delimiter", "inst-block", "prompt-echo"]
        );
    }
}
