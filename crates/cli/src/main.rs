use std::path::{Path, PathBuf};

use anyhow::Result;
use candle_core::Device;
use clap::{Args, Parser, Subcommand};
use tokenizers::Tokenizer;

use persona_common::{ChatProfile, QaDataset, BUILTIN_PROFILES};
use persona_infer::{CandleGenerator, InferenceRuntime, TokenCodec};

#[derive(Parser, Debug)]
#[command(name = "persona", about = "Unified CLI for the persona chatbot")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Interactive chat with the base model + adapter of a profile.
    Chat(ChatArgs),
    /// Answer one or more questions and exit.
    Ask(AskArgs),
    /// Export the Q&A pairs as templated training records.
    Dataset(DatasetArgs),
    /// Print or save a built-in profile as JSON.
    Profile(ProfileArgs),
}

// ── Chat / Ask ─────────────────────────────────────────────────────────────────

#[derive(Args, Debug)]
struct ModelArgs {
    /// Built-in profile name or a profile JSON file.
    #[arg(long, default_value = "deepseek")]
    profile: String,
    /// Override the profile's adapter directory.
    #[arg(long)]
    adapter_dir: Option<PathBuf>,
    /// Skip the adapter and chat with the bare base model.
    #[arg(long, conflicts_with = "adapter_dir")]
    no_adapter: bool,
    #[arg(long)]
    max_new_tokens: Option<usize>,
    #[arg(long)]
    temperature: Option<f64>,
    #[arg(long)]
    top_k: Option<usize>,
    #[arg(long)]
    top_p: Option<f64>,
    #[arg(long)]
    repetition_penalty: Option<f64>,
    #[arg(long)]
    seed: Option<u64>,
    #[arg(long)]
    cpu: bool,
}

#[derive(Parser, Debug)]
struct ChatArgs {
    #[command(flatten)]
    model: ModelArgs,
}

#[derive(Parser, Debug)]
struct AskArgs {
    #[command(flatten)]
    model: ModelArgs,
    /// Questions to answer, in order.
    #[arg(required = true)]
    questions: Vec<String>,
}

// ── Dataset / Profile ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
struct DatasetArgs {
    /// `.jsonl` / `.json` file or directory of them (default: built-in pairs).
    #[arg(long)]
    data: Option<PathBuf>,
    /// Profile whose template and end-of-sequence marker frame each record.
    #[arg(long, default_value = "deepseek")]
    profile: String,
    #[arg(long, default_value = "train.jsonl")]
    output: PathBuf,
    /// tokenizer.json used to report record lengths.
    #[arg(long)]
    tokenizer: Option<PathBuf>,
    /// Records longer than this many tokens are reported as truncated.
    #[arg(long, default_value_t = 512)]
    max_length: usize,
}

#[derive(Parser, Debug)]
struct ProfileArgs {
    #[arg(value_parser = BUILTIN_PROFILES)]
    name: String,
    /// Write to this file instead of stdout.
    #[arg(long)]
    output: Option<PathBuf>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Chat(args) => cmd_chat(args),
        Command::Ask(args) => cmd_ask(args),
        Command::Dataset(args) => cmd_dataset(args),
        Command::Profile(args) => cmd_profile(args),
    }
}

// ── Command implementations ────────────────────────────────────────────────────

fn load_profile(name_or_path: &str) -> Result<ChatProfile> {
    let path = Path::new(name_or_path);
    if path.is_file() {
        ChatProfile::load(path)
    } else {
        ChatProfile::builtin(name_or_path)
    }
}

/// Profile with command-line overrides applied.
fn build_profile(args: &ModelArgs) -> Result<ChatProfile> {
    let mut profile = load_profile(&args.profile)?;
    if args.no_adapter {
        profile.adapter_dir = None;
    } else if let Some(dir) = &args.adapter_dir {
        profile.adapter_dir = Some(dir.clone());
    }
    let g = &mut profile.generation;
    if let Some(v) = args.max_new_tokens {
        g.max_new_tokens = v;
    }
    if let Some(v) = args.temperature {
        g.temperature = v;
    }
    if let Some(v) = args.top_k {
        g.top_k = v;
    }
    if let Some(v) = args.top_p {
        g.top_p = v;
    }
    if let Some(v) = args.repetition_penalty {
        g.repetition_penalty = v;
    }
    if let Some(v) = args.seed {
        g.seed = v;
    }
    Ok(profile)
}

fn load_runtime(args: &ModelArgs) -> Result<InferenceRuntime<CandleGenerator, Tokenizer>> {
    let profile = build_profile(args)?;
    let device = if args.cpu {
        Device::Cpu
    } else {
        Device::cuda_if_available(0)?
    };

    eprintln!("Loading base model: {} ...", profile.base_model);
    match &profile.adapter_dir {
        Some(dir) => eprintln!("Loading adapter from: {} ...", dir.display()),
        None => eprintln!("No adapter; using the base model as is."),
    }
    match InferenceRuntime::load(profile, device) {
        Ok(rt) => Ok(rt),
        Err(e) => {
            eprintln!("Error loading model: {e:#}");
            std::process::exit(1);
        }
    }
}

fn cmd_chat(args: ChatArgs) -> Result<()> {
    let mut runtime = load_runtime(&args.model)?;
    let stdin = std::io::stdin();
    runtime.chat_loop(stdin.lock(), std::io::stdout())
}

fn cmd_ask(args: AskArgs) -> Result<()> {
    let mut runtime = load_runtime(&args.model)?;
    for question in &args.questions {
        eprintln!("--- Q: \"{question}\" ---");
        let answer = runtime.respond(question)?;
        println!("{answer}\n");
    }
    Ok(())
}

fn cmd_dataset(args: DatasetArgs) -> Result<()> {
    let profile = load_profile(&args.profile)?;
    let dataset = match &args.data {
        Some(path) => QaDataset::load(path)?,
        None => QaDataset::builtin()?,
    };
    if dataset.is_empty() {
        anyhow::bail!("no question/answer pairs found");
    }

    let n = dataset.write_training_jsonl(
        &args.output,
        &profile.template,
        &profile.training_eos_marker,
    )?;
    eprintln!("Wrote {} training records to {}", n, args.output.display());

    if let Some(path) = &args.tokenizer {
        let tokenizer =
            Tokenizer::from_file(path).map_err(|e| anyhow::anyhow!("load tokenizer: {e}"))?;
        let texts = dataset.formatted(&profile.template, &profile.training_eos_marker);
        let stats = token_stats(&tokenizer, &texts, args.max_length)?;
        eprintln!(
            "Tokens per record: min {} / mean {:.1} / max {}",
            stats.min, stats.mean, stats.max
        );
        if stats.over_limit > 0 {
            eprintln!(
                "{} record(s) exceed {} tokens and would be truncated",
                stats.over_limit, args.max_length
            );
        }
    }
    Ok(())
}

struct TokenStats {
    min: usize,
    max: usize,
    mean: f64,
    over_limit: usize,
}

fn token_stats(codec: &dyn TokenCodec, texts: &[String], limit: usize) -> Result<TokenStats> {
    let mut lengths = Vec::with_capacity(texts.len());
    for text in texts {
        lengths.push(codec.encode(text, true)?.len());
    }
    let total: usize = lengths.iter().sum();
    Ok(TokenStats {
        min: lengths.iter().copied().min().unwrap_or(0),
        max: lengths.iter().copied().max().unwrap_or(0),
        mean: if lengths.is_empty() {
            0.0
        } else {
            total as f64 / lengths.len() as f64
        },
        over_limit: lengths.iter().filter(|&&l| l > limit).count(),
    })
}

fn cmd_profile(args: ProfileArgs) -> Result<()> {
    let profile = ChatProfile::builtin(&args.name)?;
    match &args.output {
        Some(path) => {
            profile.save(path)?;
            eprintln!("Saved {} profile to {}", profile.name, path.display());
        }
        None => println!("{}", serde_json::to_string_pretty(&profile)?),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model_args(argv: &[&str]) -> ModelArgs {
        let argv = ["persona", "chat"].iter().chain(argv).copied();
        match Cli::parse_from(argv).command {
            Command::Chat(args) => args.model,
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn overrides_apply_to_profile() {
        let args = model_args(&["--profile", "TinyLlama", "--temperature", "0", "--top-k", "5"]);
        let profile = build_profile(&args).unwrap();
        assert_eq!(profile.name, "tinyllama");
        assert_eq!(profile.generation.temperature, 0.0);
        assert_eq!(profile.generation.top_k, 5);
        assert_eq!(profile.generation.max_new_tokens, 150);
    }

    #[test]
    fn no_adapter_clears_adapter_dir() {
        let profile = build_profile(&model_args(&["--no-adapter"])).unwrap();
        assert!(profile.adapter_dir.is_none());
        let profile = build_profile(&model_args(&["--adapter-dir", "outputs/ckpt"])).unwrap();
        assert_eq!(profile.adapter_dir, Some(PathBuf::from("outputs/ckpt")));
    }

    #[test]
    fn unknown_profile_is_an_error() {
        assert!(build_profile(&model_args(&["--profile", "gpt-j"])).is_err());
    }
}
