pub mod cleanup;
pub mod config;
pub mod dataset;
pub mod embed;
pub mod error;
pub mod eval;
pub mod generate;
pub mod minilm;
pub mod prompt;
pub mod report;
pub mod resolver;
pub mod similarity;
pub mod sweep;

pub use cleanup::{DEFAULT_ANSWER_MARKER, DEFAULT_SPECIAL_TOKENS, clean_generated_text};
pub use config::SweepConfig;
pub use dataset::{Question, QuestionId, load_questions};
pub use embed::{DEFAULT_EMBEDDING_DIM, Embedder, HashEmbedder};
pub use error::{EvalError, GenerationError, ResolveError, Result};
pub use eval::{EvalOptions, EvalReport, ModeOutcome, ModeSummary, QuestionRecord, evaluate};
pub use generate::{CommandGenerator, GenerationRequest, RecordedGenerator, TextGenerator};
pub use minilm::MiniLmEmbedder;
pub use prompt::{PromptMode, build_prompt};
pub use resolver::{AnswerResolver, MatchMethod, Resolution, is_correct};
pub use similarity::{best_match, cosine_similarity};
pub use sweep::{RunStatus, SweepRun, run_sweep};
