//! BrainTeaser question corpus.

use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{EvalError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QuestionId {
    Int(i64),
    Text(String),
}

impl fmt::Display for QuestionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    pub id: QuestionId,
    pub question: String,
    pub choices: Vec<String>,
    pub label: usize,
}

impl Question {
    pub fn correct_answer(&self) -> &str {
        &self.choices[self.label]
    }
}

/// On-disk record; fields beyond these (answer, distractors, choice_order)
/// are ignored.
#[derive(Debug, Deserialize)]
struct RawQuestion {
    id: Option<QuestionId>,
    question: String,
    choice_list: Vec<String>,
    label: usize,
}

/// Loads a JSON array or JSON Lines corpus.
pub fn load_questions(path: &Path) -> Result<Vec<Question>> {
    let raw = fs::read_to_string(path)?;
    parse_questions(&raw).map_err(|err| match err {
        EvalError::Dataset(msg) => EvalError::Dataset(format!("{}: {msg}", path.display())),
        other => other,
    })
}

pub fn parse_questions(raw: &str) -> Result<Vec<Question>> {
    let records: Vec<RawQuestion> = if raw.trim_start().starts_with('[') {
        serde_json::from_str(raw).map_err(|e| EvalError::Dataset(e.to_string()))?
    } else {
        raw.lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(n, line)| {
                serde_json::from_str(line)
                    .map_err(|e| EvalError::Dataset(format!("line {}: {e}", n + 1)))
            })
            .collect::<Result<_>>()?
    };

    records
        .into_iter()
        .enumerate()
        .map(|(pos, record)| into_question(pos, record))
        .collect()
}

fn into_question(pos: usize, record: RawQuestion) -> Result<Question> {
    let id = record.id.unwrap_or(QuestionId::Int(pos as i64 + 1));

    if record.choice_list.len() < 2 {
        return Err(EvalError::Dataset(format!(
            "record {} ({id}): needs at least 2 choices, got {}",
            pos + 1,
            record.choice_list.len()
        )));
    }
    if record.label >= record.choice_list.len() {
        return Err(EvalError::Dataset(format!(
            "record {} ({id}): label {} out of range for {} choices",
            pos + 1,
            record.label,
            record.choice_list.len()
        )));
    }
    let mut seen = HashSet::new();
    if let Some(dup) = record.choice_list.iter().find(|c| !seen.insert(c.as_str())) {
        return Err(EvalError::Dataset(format!(
            "record {} ({id}): duplicate choice {dup:?}",
            pos + 1
        )));
    }

    Ok(Question {
        id,
        question: record.question,
        choices: record.choice_list,
        label: record.label,
    })
}
