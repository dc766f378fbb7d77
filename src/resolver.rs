//! Maps free-form generated text onto one of a question's answer choices.
//!
//! Resolution runs in two phases. The cleaned text is first compared
//! verbatim against every candidate; only when nothing matches is the
//! embedder consulted, and the most similar candidate wins. The result is
//! always a member of the candidate list.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cleanup::{DEFAULT_ANSWER_MARKER, DEFAULT_SPECIAL_TOKENS, clean_generated_text};
use crate::embed::Embedder;
use crate::error::ResolveError;
use crate::similarity::best_match;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMethod {
    Exact,
    Similarity,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    pub answer: String,
    pub index: usize,
    pub method: MatchMethod,
    /// Winning cosine similarity; absent for exact matches.
    pub score: Option<f32>,
    /// Generated text after cleanup.
    pub cleaned: String,
}

pub struct AnswerResolver<E> {
    embedder: E,
    marker: String,
    special_tokens: Vec<String>,
}

impl<E: Embedder> AnswerResolver<E> {
    pub fn new(embedder: E) -> Self {
        Self {
            embedder,
            marker: DEFAULT_ANSWER_MARKER.to_string(),
            special_tokens: DEFAULT_SPECIAL_TOKENS.iter().map(|t| t.to_string()).collect(),
        }
    }

    pub fn with_marker(mut self, marker: impl Into<String>) -> Self {
        self.marker = marker.into();
        self
    }

    pub fn with_special_tokens<I, S>(mut self, tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.special_tokens = tokens.into_iter().map(Into::into).collect();
        self
    }

    pub fn marker(&self) -> &str {
        &self.marker
    }

    pub fn clean(&self, generated: &str) -> String {
        let tokens: Vec<&str> = self.special_tokens.iter().map(String::as_str).collect();
        clean_generated_text(generated, &self.marker, &tokens)
    }

    pub fn resolve<S: AsRef<str>>(
        &self,
        generated: &str,
        candidates: &[S],
    ) -> Result<Resolution, ResolveError> {
        validate_candidates(candidates)?;
        let cleaned = self.clean(generated);

        if let Some(index) = candidates.iter().position(|c| c.as_ref() == cleaned) {
            debug!(index, "exact answer match");
            return Ok(Resolution {
                answer: candidates[index].as_ref().to_string(),
                index,
                method: MatchMethod::Exact,
                score: None,
                cleaned,
            });
        }

        let mut texts: Vec<&str> = Vec::with_capacity(candidates.len() + 1);
        texts.push(&cleaned);
        texts.extend(candidates.iter().map(|c| c.as_ref()));

        let mut vectors = self
            .embedder
            .embed_batch(&texts)
            .map_err(|err| ResolveError::EmbeddingUnavailable(format!("{err:#}")))?;
        check_vectors(&vectors, texts.len())?;

        let choice_vectors = vectors.split_off(1);
        let (index, score) = best_match(&vectors[0], &choice_vectors).ok_or_else(|| {
            ResolveError::EmbeddingUnavailable("no candidate vectors returned".to_string())
        })?;

        debug!(index, score, "similarity answer match");
        Ok(Resolution {
            answer: candidates[index].as_ref().to_string(),
            index,
            method: MatchMethod::Similarity,
            score: Some(score),
            cleaned,
        })
    }
}

/// Correctness compares answer strings, never positions, so per-item
/// reordering of the choices cannot skew the score.
pub fn is_correct(resolved: &str, correct: &str) -> bool {
    resolved == correct
}

fn validate_candidates<S: AsRef<str>>(candidates: &[S]) -> Result<(), ResolveError> {
    if candidates.is_empty() {
        return Err(ResolveError::InvalidInput(
            "candidate list is empty".to_string(),
        ));
    }
    let mut seen = HashSet::with_capacity(candidates.len());
    for candidate in candidates {
        if !seen.insert(candidate.as_ref()) {
            return Err(ResolveError::InvalidInput(format!(
                "duplicate candidate {:?}",
                candidate.as_ref()
            )));
        }
    }
    Ok(())
}

fn check_vectors(vectors: &[Vec<f32>], expected: usize) -> Result<(), ResolveError> {
    if vectors.len() != expected {
        return Err(ResolveError::EmbeddingUnavailable(format!(
            "expected {expected} vectors, got {}",
            vectors.len()
        )));
    }
    let dim = vectors[0].len();
    if dim == 0 {
        return Err(ResolveError::EmbeddingUnavailable(
            "embedder returned empty vectors".to_string(),
        ));
    }
    if let Some(bad) = vectors.iter().position(|v| v.len() != dim) {
        return Err(ResolveError::EmbeddingUnavailable(format!(
            "vector {bad} has length {}, expected {dim}",
            vectors[bad].len()
        )));
    }
    if vectors.iter().flatten().any(|x| !x.is_finite()) {
        return Err(ResolveError::EmbeddingUnavailable(
            "embedder returned non-finite values".to_string(),
        ));
    }
    Ok(())
}
