//! Learning-rate x weight-decay sweep over fine-tuned checkpoints.
//!
//! Each grid point is evaluated independently; a missing checkpoint or a
//! failing sink marks that point failed and the sweep moves on.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::config::SweepConfig;
use crate::dataset::Question;
use crate::embed::Embedder;
use crate::error::{EvalError, Result};
use crate::eval::{EvalOptions, EvalReport, ModeSummary, evaluate};
use crate::generate::{CommandGenerator, TextGenerator};
use crate::report::save_csv;
use crate::resolver::AnswerResolver;

const CHECKPOINT_SEARCH_DEPTH: usize = 3;

pub type GeneratorFactory = dyn FnMut(&Path) -> Result<Box<dyn TextGenerator>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Evaluating,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepRun {
    pub run_id: String,
    pub learning_rate: f64,
    pub weight_decay: f64,
    pub status: RunStatus,
    pub checkpoint: Option<PathBuf>,
    pub results: Option<PathBuf>,
    pub requested_at: DateTime<Utc>,
    pub started_eval_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub summaries: Vec<ModeSummary>,
    pub error: Option<String>,
}

impl SweepRun {
    pub fn start(learning_rate: f64, weight_decay: f64, run_id: String) -> Self {
        Self {
            run_id,
            learning_rate,
            weight_decay,
            status: RunStatus::Pending,
            checkpoint: None,
            results: None,
            requested_at: Utc::now(),
            started_eval_at: None,
            completed_at: None,
            summaries: Vec::new(),
            error: None,
        }
    }

    pub fn on_checkpoint_found(&mut self, checkpoint: PathBuf) {
        if self.status != RunStatus::Pending {
            return;
        }
        self.status = RunStatus::Evaluating;
        self.checkpoint = Some(checkpoint);
        self.started_eval_at = Some(Utc::now());
    }

    pub fn on_eval_completed(&mut self, report: &EvalReport, results: PathBuf) {
        if self.status != RunStatus::Evaluating {
            return;
        }
        self.status = RunStatus::Completed;
        self.summaries = report.summaries.clone();
        self.results = Some(results);
        self.completed_at = Some(Utc::now());
    }

    pub fn on_failed(&mut self, reason: impl Into<String>) {
        if matches!(self.status, RunStatus::Completed | RunStatus::Failed) {
            return;
        }
        self.status = RunStatus::Failed;
        self.error = Some(reason.into());
        self.completed_at = Some(Utc::now());
    }
}

/// Renders a hyperparameter the way Python's `str(float)` does, so names
/// line up with checkpoints written by the training scripts.
pub fn format_hparam(value: f64) -> String {
    if value != 0.0 && value.abs() < 1e-4 {
        let sci = format!("{value:e}");
        if let Some((mantissa, exponent)) = sci.split_once('e') {
            if let Ok(exp) = exponent.parse::<i32>() {
                let sign = if exp < 0 { '-' } else { '+' };
                return format!("{mantissa}e{sign}{:02}", exp.abs());
            }
        }
        return sci;
    }
    let plain = format!("{value}");
    if plain.contains('.') {
        plain
    } else {
        format!("{plain}.0")
    }
}

pub fn expand_pattern(pattern: &str, learning_rate: f64, weight_decay: f64) -> String {
    pattern
        .replace("{lr}", &format_hparam(learning_rate))
        .replace("{wd}", &format_hparam(weight_decay))
}

/// Finds a directory called `name` at most a few levels below `root`.
pub fn locate_checkpoint(root: &Path, name: &str) -> Option<PathBuf> {
    let direct = root.join(name);
    if direct.is_dir() {
        return Some(direct);
    }
    WalkDir::new(root)
        .min_depth(1)
        .max_depth(CHECKPOINT_SEARCH_DEPTH)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .find(|e| e.file_type().is_dir() && e.file_name() == name)
        .map(|e| e.into_path())
}

/// Runs every grid point with `make_generator` supplying the generator for
/// a checkpoint. Per-point failures end up in the returned runs.
pub fn run_sweep<E, F>(
    config: &SweepConfig,
    questions: &[Question],
    resolver: &AnswerResolver<E>,
    mut make_generator: F,
) -> Vec<SweepRun>
where
    E: Embedder,
    F: FnMut(&Path) -> Result<Box<dyn TextGenerator>>,
{
    let options = EvalOptions {
        modes: config.modes.clone(),
        max_new_tokens: config.max_new_tokens,
        jobs: config.jobs,
    };

    config
        .grid()
        .into_iter()
        .map(|(lr, wd)| {
            let checkpoint_name = expand_pattern(&config.checkpoint_pattern, lr, wd);
            let mut run = SweepRun::start(lr, wd, checkpoint_name);
            info!(run_id = %run.run_id, lr, wd, "evaluating configuration");

            if let Err(err) = run_point(config, questions, resolver, &options, &mut make_generator, &mut run) {
                warn!(run_id = %run.run_id, error = %err, "configuration failed");
                run.on_failed(err.to_string());
            }
            run
        })
        .collect()
}

fn run_point<E, F>(
    config: &SweepConfig,
    questions: &[Question],
    resolver: &AnswerResolver<E>,
    options: &EvalOptions,
    make_generator: &mut F,
    run: &mut SweepRun,
) -> Result<()>
where
    E: Embedder,
    F: FnMut(&Path) -> Result<Box<dyn TextGenerator>>,
{
    let checkpoint = locate_checkpoint(&config.checkpoint_root, &run.run_id).ok_or_else(|| {
        EvalError::InvalidArg(format!(
            "checkpoint {} not found under {}",
            run.run_id,
            config.checkpoint_root.display()
        ))
    })?;
    run.on_checkpoint_found(checkpoint.clone());

    let generator = make_generator(&checkpoint)?;
    let report = evaluate(questions, generator.as_ref(), resolver, options)?;

    let results = config.results_dir.join(expand_pattern(
        &config.results_pattern,
        run.learning_rate,
        run.weight_decay,
    ));
    save_csv(&results, &report)?;
    info!(run_id = %run.run_id, results = %results.display(), "results saved");

    run.on_eval_completed(&report, results);
    Ok(())
}

/// Generator factory for a config: the configured command bound to each
/// checkpoint.
pub fn command_generators(config: &SweepConfig) -> Result<Box<GeneratorFactory>> {
    let base = CommandGenerator::parse(&config.generator)?.with_timeout(config.timeout()?);
    Ok(Box::new(move |checkpoint: &Path| {
        Ok(Box::new(base.clone().with_checkpoint(checkpoint)) as Box<dyn TextGenerator>)
    }))
}
