//! Interactive chat CLI.

use std::path::PathBuf;

use candle_core::Device;
use clap::Parser;

use persona_common::ChatProfile;
use persona_infer::InferenceRuntime;

#[derive(Parser)]
#[command(name = "persona-chat", about = "Chat with the fine-tuned persona model")]
struct Args {
    /// Built-in profile name (deepseek, tinyllama) or a profile JSON file.
    #[arg(long, default_value = "deepseek")]
    profile: String,
    /// Override the profile's adapter directory.
    #[arg(long)]
    adapter_dir: Option<PathBuf>,
    #[arg(long)]
    max_new_tokens: Option<usize>,
    /// Run on CPU even when an accelerator is available.
    #[arg(long)]
    cpu: bool,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let mut profile = load_profile(&args.profile)?;
    if let Some(dir) = args.adapter_dir {
        profile.adapter_dir = Some(dir);
    }
    if let Some(n) = args.max_new_tokens {
        profile.generation.max_new_tokens = n;
    }
    let device = if args.cpu {
        Device::Cpu
    } else {
        Device::cuda_if_available(0)?
    };

    eprintln!("Loading base model: {} ...", profile.base_model);
    if let Some(dir) = &profile.adapter_dir {
        eprintln!("Loading adapter from: {} ...", dir.display());
    }
    let mut runtime = match InferenceRuntime::load(profile, device) {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Error loading model: {e:#}");
            std::process::exit(1);
        }
    };

    let stdin = std::io::stdin();
    runtime.chat_loop(stdin.lock(), std::io::stdout())?;
    Ok(())
}

fn load_profile(name_or_path: &str) -> anyhow::Result<ChatProfile> {
    let path = PathBuf::from(name_or_path);
    if path.is_file() {
        ChatProfile::load(&path)
    } else {
        ChatProfile::builtin(name_or_path)
    }
}
