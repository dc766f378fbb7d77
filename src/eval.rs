use std::time::Instant;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::dataset::{Question, QuestionId};
use crate::embed::Embedder;
use crate::error::{EvalError, Result};
use crate::generate::{DEFAULT_MAX_NEW_TOKENS, GenerationRequest, TextGenerator};
use crate::prompt::{PromptMode, build_prompt};
use crate::resolver::{AnswerResolver, Resolution, is_correct};

#[derive(Debug, Clone)]
pub struct EvalOptions {
    pub modes: Vec<PromptMode>,
    pub max_new_tokens: usize,
    /// Worker threads; 0 lets rayon decide.
    pub jobs: usize,
}

impl Default for EvalOptions {
    fn default() -> Self {
        Self {
            modes: PromptMode::ALL.to_vec(),
            max_new_tokens: DEFAULT_MAX_NEW_TOKENS,
            jobs: 0,
        }
    }
}

/// Result of one (question, prompting mode) pair. A failure leaves
/// `resolution` empty and sets `error`, so it never reads as a wrong answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModeOutcome {
    pub mode: PromptMode,
    pub generated: Option<String>,
    pub resolution: Option<Resolution>,
    pub correct: bool,
    pub error: Option<String>,
}

impl ModeOutcome {
    pub fn failed(&self) -> bool {
        self.error.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionRecord {
    pub id: QuestionId,
    pub question: String,
    pub answer: String,
    pub choices: Vec<String>,
    pub outcomes: Vec<ModeOutcome>,
}

impl QuestionRecord {
    pub fn outcome(&self, mode: PromptMode) -> Option<&ModeOutcome> {
        self.outcomes.iter().find(|o| o.mode == mode)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModeSummary {
    pub mode: PromptMode,
    pub total: usize,
    pub correct: usize,
    pub failed: usize,
    pub accuracy: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalReport {
    pub modes: Vec<PromptMode>,
    pub records: Vec<QuestionRecord>,
    pub summaries: Vec<ModeSummary>,
    pub elapsed_ms: f64,
}

impl EvalReport {
    pub fn summary(&self, mode: PromptMode) -> Option<&ModeSummary> {
        self.summaries.iter().find(|s| s.mode == mode)
    }
}

/// Generates, resolves and scores every question under every mode.
///
/// Item failures are recorded on their outcome and never abort the run.
/// Records come back in corpus order.
pub fn evaluate<G, E>(
    questions: &[Question],
    generator: &G,
    resolver: &AnswerResolver<E>,
    options: &EvalOptions,
) -> Result<EvalReport>
where
    G: TextGenerator + ?Sized,
    E: Embedder,
{
    // Repeated modes collapse to their first occurrence.
    let mut modes: Vec<PromptMode> = Vec::with_capacity(options.modes.len());
    for mode in &options.modes {
        if !modes.contains(mode) {
            modes.push(*mode);
        }
    }
    if modes.is_empty() {
        return Err(EvalError::InvalidArg(
            "at least one prompting mode is required".to_string(),
        ));
    }
    let options = &EvalOptions {
        modes,
        ..options.clone()
    };

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(options.jobs)
        .build()
        .map_err(|e| EvalError::InvalidArg(format!("worker pool: {e}")))?;

    let start = Instant::now();
    let records: Vec<QuestionRecord> = pool.install(|| {
        questions
            .par_iter()
            .map(|q| evaluate_question(q, generator, resolver, options))
            .collect()
    });

    let summaries = options
        .modes
        .iter()
        .map(|mode| summarize(&records, *mode))
        .collect::<Vec<_>>();
    for s in &summaries {
        info!(
            mode = %s.mode,
            total = s.total,
            correct = s.correct,
            failed = s.failed,
            accuracy = s.accuracy,
            "evaluation summary"
        );
    }

    Ok(EvalReport {
        modes: options.modes.clone(),
        records,
        summaries,
        elapsed_ms: start.elapsed().as_secs_f64() * 1000.0,
    })
}

fn evaluate_question<G, E>(
    question: &Question,
    generator: &G,
    resolver: &AnswerResolver<E>,
    options: &EvalOptions,
) -> QuestionRecord
where
    G: TextGenerator + ?Sized,
    E: Embedder,
{
    let correct_answer = question.correct_answer();
    let outcomes = options
        .modes
        .iter()
        .map(|&mode| {
            let prompt = build_prompt(question, mode);
            let request = GenerationRequest {
                question_id: &question.id,
                mode,
                prompt: &prompt,
                max_new_tokens: options.max_new_tokens,
            };

            let generated = match generator.generate(&request) {
                Ok(text) => text,
                Err(err) => {
                    warn!(id = %question.id, %mode, error = %err, "generation failed");
                    return ModeOutcome {
                        mode,
                        generated: None,
                        resolution: None,
                        correct: false,
                        error: Some(err.to_string()),
                    };
                }
            };

            match resolver.resolve(&generated, &question.choices) {
                Ok(resolution) => {
                    let correct = is_correct(&resolution.answer, correct_answer);
                    debug!(id = %question.id, %mode, answer = %resolution.answer, correct, "resolved");
                    ModeOutcome {
                        mode,
                        generated: Some(generated),
                        resolution: Some(resolution),
                        correct,
                        error: None,
                    }
                }
                Err(err) => {
                    warn!(id = %question.id, %mode, error = %err, "resolution failed");
                    ModeOutcome {
                        mode,
                        generated: Some(generated),
                        resolution: None,
                        correct: false,
                        error: Some(err.to_string()),
                    }
                }
            }
        })
        .collect();

    QuestionRecord {
        id: question.id.clone(),
        question: question.question.clone(),
        answer: correct_answer.to_string(),
        choices: question.choices.clone(),
        outcomes,
    }
}

fn summarize(records: &[QuestionRecord], mode: PromptMode) -> ModeSummary {
    let outcomes: Vec<&ModeOutcome> = records.iter().filter_map(|r| r.outcome(mode)).collect();
    let total = outcomes.len();
    let correct = outcomes.iter().filter(|o| o.correct).count();
    let failed = outcomes.iter().filter(|o| o.failed()).count();
    let accuracy = if total == 0 {
        0.0
    } else {
        correct as f32 / total as f32
    };

    ModeSummary {
        mode,
        total,
        correct,
        failed,
        accuracy,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embed::HashEmbedder;
    use crate::error::GenerationError;
    use crate::generate::RecordedGenerator;

    fn question(id: i64, choices: &[&str], label: usize) -> Question {
        Question {
            id: QuestionId::Int(id),
            question: format!("riddle {id}"),
            choices: choices.iter().map(|c| c.to_string()).collect(),
            label,
        }
    }

    fn corpus() -> Vec<Question> {
        vec![
            question(1, &["Coke.", "Punch.", "Sprite.", "None of above."], 1),
            question(2, &["Soap operas.", "Sports live.", "Talk show.", "None of above."], 0),
            question(3, &["Ice.", "Steam.", "None of above."], 0),
        ]
    }

    fn resolver() -> AnswerResolver<HashEmbedder> {
        AnswerResolver::new(HashEmbedder::default())
    }

    #[test]
    fn scores_each_mode_and_isolates_failures() {
        let mut generator = RecordedGenerator::default();
        generator.insert(QuestionId::Int(1), PromptMode::ZeroShot, "Question: riddle 1\nAnswer: Punch.");
        generator.insert(QuestionId::Int(1), PromptMode::FewShot, "Answer: Sprite.");
        generator.insert(QuestionId::Int(2), PromptMode::ZeroShot, "Answer: I would say soap operas");
        generator.insert(QuestionId::Int(2), PromptMode::FewShot, "Answer: Soap operas.");
        generator.insert(QuestionId::Int(3), PromptMode::ZeroShot, "Answer: Steam.");

        let report = evaluate(&corpus(), &generator, &resolver(), &EvalOptions::default()).unwrap();

        let ids: Vec<String> = report.records.iter().map(|r| r.id.to_string()).collect();
        assert_eq!(ids, vec!["1", "2", "3"]);

        let zero = report.summary(PromptMode::ZeroShot).unwrap();
        assert_eq!((zero.total, zero.correct, zero.failed), (3, 2, 0));

        let few = report.summary(PromptMode::FewShot).unwrap();
        assert_eq!((few.total, few.correct, few.failed), (3, 1, 1));
        assert!((few.accuracy - 1.0 / 3.0).abs() < 1e-6);

        let missing = report.records[2].outcome(PromptMode::FewShot).unwrap();
        assert!(missing.failed());
        assert!(!missing.correct);
        assert!(missing.resolution.is_none());
        assert!(missing.generated.is_none());

        let wrong = report.records[0].outcome(PromptMode::FewShot).unwrap();
        assert!(!wrong.failed());
        assert!(!wrong.correct);
        assert_eq!(wrong.resolution.as_ref().unwrap().answer, "Sprite.");
    }

    #[test]
    fn resolution_errors_are_recorded() {
        struct Offline;
        impl Embedder for Offline {
            fn embed_batch(&self, _texts: &[&str]) -> anyhow::Result<Vec<Vec<f32>>> {
                anyhow::bail!("offline")
            }
        }

        let mut generator = RecordedGenerator::default();
        generator.insert(QuestionId::Int(1), PromptMode::ZeroShot, "Answer: Punch.");
        generator.insert(QuestionId::Int(2), PromptMode::ZeroShot, "something vague");
        let questions = corpus()[..2].to_vec();
        let options = EvalOptions {
            modes: vec![PromptMode::ZeroShot],
            ..EvalOptions::default()
        };

        let report = evaluate(&questions, &generator, &AnswerResolver::new(Offline), &options).unwrap();

        assert!(report.records[0].outcomes[0].correct);
        let failed = &report.records[1].outcomes[0];
        assert_eq!(failed.generated.as_deref(), Some("something vague"));
        assert!(failed.error.as_deref().unwrap().contains("offline"));
        assert_eq!(report.summaries.len(), 1);
    }

    #[test]
    fn generator_sees_prompt_and_token_budget() {
        struct Echo;
        impl TextGenerator for Echo {
            fn generate(&self, request: &GenerationRequest<'_>) -> std::result::Result<String, GenerationError> {
                assert_eq!(request.max_new_tokens, 12);
                Ok(request.prompt.to_string())
            }
        }

        let options = EvalOptions {
            modes: vec![PromptMode::FewShot],
            max_new_tokens: 12,
            jobs: 2,
        };
        let report = evaluate(&corpus(), &Echo, &resolver(), &options).unwrap();

        for record in &report.records {
            let outcome = &record.outcomes[0];
            assert!(outcome.generated.as_deref().unwrap().ends_with("Answer:"));
            assert!(outcome.resolution.is_some());
        }
    }

    #[test]
    fn empty_corpus_has_zero_accuracy() {
        let report = evaluate(&[], &RecordedGenerator::default(), &resolver(), &EvalOptions::default()).unwrap();
        assert!(report.records.is_empty());
        assert_eq!(report.summaries[0].accuracy, 0.0);
    }

    #[test]
    fn repeated_modes_are_evaluated_once() {
        let mut generator = RecordedGenerator::default();
        generator.insert(QuestionId::Int(1), PromptMode::FewShot, "Answer: Punch.");
        generator.insert(QuestionId::Int(1), PromptMode::ZeroShot, "Answer: Coke.");
        let options = EvalOptions {
            modes: vec![PromptMode::FewShot, PromptMode::ZeroShot, PromptMode::FewShot],
            ..EvalOptions::default()
        };

        let report = evaluate(&corpus()[..1], &generator, &resolver(), &options).unwrap();

        assert_eq!(report.modes, vec![PromptMode::FewShot, PromptMode::ZeroShot]);
        assert_eq!(report.summaries.len(), 2);
        assert_eq!(report.records[0].outcomes.len(), 2);
        assert_eq!(report.summary(PromptMode::FewShot).unwrap().correct, 1);
    }

    #[test]
    fn requires_a_mode() {
        let options = EvalOptions {
            modes: Vec::new(),
            ..EvalOptions::default()
        };
        let err = evaluate(&corpus(), &RecordedGenerator::default(), &resolver(), &options).unwrap_err();
        assert!(matches!(err, EvalError::InvalidArg(_)));
    }
}
