//! Question/answer dataset: the fixed pairs the adapter is fine-tuned on.
//!
//! Records are JSON objects with a `"text"` (question) and `"output"`
//! (answer) field, read from JSONL (one object per line) or a JSON array.
//! [`QaDataset::formatted`] turns each pair into one flat training string
//! using the same [`PromptTemplate`] the chat loop uses at inference time.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::template::PromptTemplate;

/// Built-in pairs, embedded at compile time.
const BUILTIN_JSONL: &str = include_str!("../data/sidharth_qa.jsonl");

/// One hand-written training example.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QaPair {
    /// The question.
    pub text: String,
    /// The answer the model should give.
    pub output: String,
}

#[derive(Serialize)]
struct TrainingRecord<'a> {
    text: &'a str,
}

/// An ordered list of [`QaPair`]s.
#[derive(Debug, Clone, Default)]
pub struct QaDataset {
    pairs: Vec<QaPair>,
}

impl QaDataset {
    pub fn new(pairs: Vec<QaPair>) -> Self {
        Self { pairs }
    }

    /// The built-in pairs describing Sidharth E.
    pub fn builtin() -> anyhow::Result<Self> {
        let pairs = parse_jsonl(BUILTIN_JSONL.lines(), "built-in dataset")?;
        Ok(Self { pairs })
    }

    /// Load pairs from a `.jsonl` / `.json` file or a directory of them.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut pairs = Vec::new();
        for file in collect_files(path)? {
            pairs.extend(load_file(&file)?);
        }
        Ok(Self { pairs })
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn pairs(&self) -> &[QaPair] {
        &self.pairs
    }

    pub fn iter(&self) -> impl Iterator<Item = &QaPair> + '_ {
        self.pairs.iter()
    }

    /// One flat training string per pair.
    pub fn formatted(&self, template: &PromptTemplate, eos_marker: &str) -> Vec<String> {
        self.pairs
            .iter()
            .map(|p| template.format_training(&p.text, &p.output, eos_marker))
            .collect()
    }

    /// Write `{"text": ...}` training records, one per line. Returns the count.
    pub fn write_training_jsonl(
        &self,
        path: &Path,
        template: &PromptTemplate,
        eos_marker: &str,
    ) -> anyhow::Result<usize> {
        let file = File::create(path).with_context(|| format!("create {}", path.display()))?;
        let mut w = BufWriter::new(file);
        let formatted = self.formatted(template, eos_marker);
        for text in &formatted {
            serde_json::to_writer(&mut w, &TrainingRecord { text })?;
            w.write_all(b"\n")?;
        }
        w.flush()?;
        Ok(formatted.len())
    }
}

// ── Helpers ─────────────────────────────────────────────────────────────────

fn load_file(path: &Path) -> anyhow::Result<Vec<QaPair>> {
    let origin = path.display().to_string();
    if path.extension().is_some_and(|e| e == "json") {
        let json = std::fs::read_to_string(path).with_context(|| format!("read {origin}"))?;
        let pairs = serde_json::from_str(&json).with_context(|| format!("parse {origin}"))?;
        return Ok(pairs);
    }
    let reader = BufReader::new(File::open(path).with_context(|| format!("open {origin}"))?);
    let lines = reader
        .lines()
        .collect::<std::io::Result<Vec<_>>>()
        .with_context(|| format!("read {origin}"))?;
    parse_jsonl(lines.iter().map(String::as_str), &origin)
}

fn parse_jsonl<'a>(
    lines: impl Iterator<Item = &'a str>,
    origin: &str,
) -> anyhow::Result<Vec<QaPair>> {
    let mut pairs = Vec::new();
    for (i, line) in lines.enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let pair: QaPair = serde_json::from_str(line)
            .with_context(|| format!("{origin}: line {} is not a text/output record", i + 1))?;
        pairs.push(pair);
    }
    Ok(pairs)
}

/// Collect `.jsonl` / `.json` files from a path (file or directory), sorted.
fn collect_files(path: &Path) -> anyhow::Result<Vec<PathBuf>> {
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }
    if !path.is_dir() {
        anyhow::bail!("path is neither file nor directory: {}", path.display());
    }
    let mut entries: Vec<_> = std::fs::read_dir(path)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file() && p.extension().is_some_and(|e| e == "jsonl" || e == "json"))
        .collect();
    entries.sort();
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("persona-data-{}-{name}", std::process::id()))
    }

    #[test]
    fn builtin_dataset_parses() {
        let ds = QaDataset::builtin().unwrap();
        assert_eq!(ds.len(), 197);
        assert_eq!(ds.pairs()[0].text, "Who is Sidharth E?");
        assert!(ds.iter().all(|p| !p.text.is_empty() && !p.output.is_empty()));
    }

    #[test]
    fn formatted_examples_end_with_marker() {
        let ds = QaDataset::new(vec![QaPair {
            text: "Does Sidharth use Git?".into(),
            output: "Yes.".into(),
        }]);
        let t = PromptTemplate::alpaca();
        let out = ds.formatted(&t, "</s>");
        assert_eq!(out.len(), 1);
        assert!(out[0].starts_with(&t.format("Does Sidharth use Git?")));
        assert!(out[0].ends_with("Yes.</s>"));
    }

    #[test]
    fn bad_line_reports_line_number() {
        let lines = ["{\"text\": \"a\", \"output\": \"b\"}", "", "{\"text\": \"only\"}"];
        let err = parse_jsonl(lines.into_iter(), "mem").unwrap_err();
        assert!(format!("{err:#}").contains("line 3"));
    }

    #[test]
    fn load_json_array_and_jsonl_directory() {
        let dir = scratch("dir");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("a.jsonl"), "{\"text\":\"q1\",\"output\":\"a1\"}\n\n").unwrap();
        std::fs::write(dir.join("b.json"), "[{\"text\":\"q2\",\"output\":\"a2\"}]").unwrap();
        std::fs::write(dir.join("notes.txt"), "ignored").unwrap();
        let ds = QaDataset::load(&dir).unwrap();
        std::fs::remove_dir_all(&dir).ok();
        let questions: Vec<_> = ds.iter().map(|p| p.text.as_str()).collect();
        assert_eq!(questions, ["q1", "q2"]);
    }

    #[test]
    fn training_jsonl_has_one_record_per_pair() {
        let path = scratch("train.jsonl");
        let ds = QaDataset::builtin().unwrap();
        let n = ds
            .write_training_jsonl(&path, &PromptTemplate::alpaca(), "</s>")
            .unwrap();
        let written = std::fs::read_to_string(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(n, ds.len());
        assert_eq!(written.lines().count(), n);
        let first: serde_json::Value = serde_json::from_str(written.lines().next().unwrap()).unwrap();
        assert!(first["text"].as_str().unwrap().contains("### Response:\nSidharth E is"));
    }
}
