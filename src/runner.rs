use std::path::Path;
use std::time::Duration;

use riddle_eval::generate::{CommandGenerator, RecordedGenerator, TextGenerator};
use riddle_eval::report::save_csv;
use riddle_eval::sweep::{SweepRun, command_generators, run_sweep};
use riddle_eval::{
    AnswerResolver, Embedder, EvalError, EvalOptions, EvalReport, HashEmbedder, MiniLmEmbedder,
    PromptMode, Resolution, Result, SweepConfig, evaluate, load_questions,
};
use tracing::info;

use crate::cli::{Cli, Commands};

pub enum Outcome {
    Resolved(Resolution),
    Evaluated {
        report: EvalReport,
        results: Option<String>,
    },
    Swept(Vec<SweepRun>),
}

pub fn run(cli: &Cli) -> Result<Outcome> {
    cli.validate().map_err(EvalError::InvalidArg)?;
    let embedder = make_embedder(cli)?;

    match &cli.command {
        Commands::Resolve {
            text,
            choices,
            marker,
        } => {
            let resolver = AnswerResolver::new(embedder).with_marker(marker.as_str());
            Ok(Outcome::Resolved(resolver.resolve(text, choices)?))
        }
        Commands::Evaluate {
            corpus,
            generations,
            generator,
            modes,
            results,
            max_new_tokens,
            jobs,
            generation_timeout,
            marker,
        } => {
            let questions = load_questions(corpus)?;
            info!(questions = questions.len(), corpus = %corpus.display(), "loaded corpus");

            let timeout: Option<Duration> = generation_timeout.as_ref().map(|t| *t.as_ref());
            let generator: Box<dyn TextGenerator> = match (generations, generator) {
                (Some(path), _) => Box::new(RecordedGenerator::load(path)?),
                (None, Some(command)) => Box::new(
                    CommandGenerator::parse(command)?.with_timeout(timeout),
                ),
                (None, None) => {
                    return Err(EvalError::InvalidArg(
                        "either --generations or --generator is required".to_string(),
                    ));
                }
            };

            let options = EvalOptions {
                modes: if modes.is_empty() {
                    PromptMode::ALL.to_vec()
                } else {
                    modes.clone()
                },
                max_new_tokens: *max_new_tokens,
                jobs: *jobs,
            };
            let resolver = AnswerResolver::new(embedder).with_marker(marker.as_str());
            let report = evaluate(&questions, generator.as_ref(), &resolver, &options)?;

            if let Some(path) = results {
                save_csv(path, &report)?;
                info!(results = %path.display(), "results saved");
            }
            Ok(Outcome::Evaluated {
                report,
                results: results.as_ref().map(|p| p.display().to_string()),
            })
        }
        Commands::Sweep { config } => {
            let config = SweepConfig::load(config)?;
            let questions = load_questions(&config.corpus)?;
            info!(
                questions = questions.len(),
                configurations = config.grid().len(),
                "starting sweep"
            );

            let resolver =
                AnswerResolver::new(embedder).with_marker(config.answer_marker.as_str());
            let factory = command_generators(&config)?;
            Ok(Outcome::Swept(run_sweep(&config, &questions, &resolver, factory)))
        }
    }
}

fn make_embedder(cli: &Cli) -> Result<Box<dyn Embedder>> {
    match (&cli.model_path, &cli.tokenizer_path) {
        (Some(model), Some(tokenizer)) => {
            info!(model = %model.display(), "loading MiniLM embedder");
            let embedder = MiniLmEmbedder::load(model, tokenizer)
                .map_err(|e| EvalError::Embedder(format!("{e:#}")))?;
            Ok(Box::new(embedder))
        }
        (None, None) => Ok(Box::new(HashEmbedder::default())),
        _ => Err(EvalError::InvalidArg(
            "--model-path and --tokenizer-path must both be provided".to_string(),
        )),
    }
}

/// File name shown for the embedder in summaries.
pub fn embedder_name(cli: &Cli) -> String {
    cli.model_path
        .as_deref()
        .and_then(Path::file_name)
        .map(|f| f.to_string_lossy().into_owned())
        .unwrap_or_else(|| "hash".to_string())
}
