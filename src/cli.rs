use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use riddle_eval::{DEFAULT_ANSWER_MARKER, PromptMode};
use riddle_eval::generate::DEFAULT_MAX_NEW_TOKENS;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Parser, Debug)]
#[command(
    name = "riddle-eval",
    version,
    about = "Resolve generated riddle answers onto their choices and score them"
)]
pub struct Cli {
    /// MiniLM weights (.safetensors). Requires --tokenizer-path; without both
    /// a hashing embedder is used.
    #[arg(long, global = true)]
    pub model_path: Option<PathBuf>,

    /// tokenizer.json matching --model-path.
    #[arg(long, global = true)]
    pub tokenizer_path: Option<PathBuf>,

    #[arg(long, global = true, value_enum, default_value = "text")]
    pub output: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Resolve one generated text against a set of choices.
    Resolve {
        #[arg(long)]
        text: String,
        #[arg(long = "choice", required = true)]
        choices: Vec<String>,
        #[arg(long, default_value = DEFAULT_ANSWER_MARKER)]
        marker: String,
    },
    /// Generate, resolve and score a question corpus.
    Evaluate {
        #[arg(long)]
        corpus: PathBuf,
        /// JSON Lines of recorded generations ({"id", "mode", "text"}).
        #[arg(long, conflicts_with = "generator", required_unless_present = "generator")]
        generations: Option<PathBuf>,
        /// Command reading a prompt on stdin and printing the generation.
        #[arg(long)]
        generator: Option<String>,
        #[arg(long = "mode", value_enum)]
        modes: Vec<PromptMode>,
        /// CSV file for per-question rows.
        #[arg(long)]
        results: Option<PathBuf>,
        #[arg(long, default_value_t = DEFAULT_MAX_NEW_TOKENS)]
        max_new_tokens: usize,
        #[arg(long, default_value_t = 0)]
        jobs: usize,
        #[arg(long)]
        generation_timeout: Option<humantime::Duration>,
        #[arg(long, default_value = DEFAULT_ANSWER_MARKER)]
        marker: String,
    },
    /// Evaluate every checkpoint of a learning-rate x weight-decay grid.
    Sweep {
        #[arg(long)]
        config: PathBuf,
    },
}

impl Cli {
    pub fn validate(&self) -> Result<(), String> {
        if self.model_path.is_some() != self.tokenizer_path.is_some() {
            return Err("--model-path and --tokenizer-path must both be provided".to_string());
        }

        if let Commands::Evaluate {
            max_new_tokens,
            generation_timeout,
            ..
        } = &self.command
        {
            if *max_new_tokens == 0 {
                return Err("max-new-tokens must be > 0".to_string());
            }
            if generation_timeout.as_ref().is_some_and(|t| t.as_ref().is_zero()) {
                return Err("generation-timeout must be > 0".to_string());
            }
        }

        Ok(())
    }
}
