use std::fmt;

use serde::{Deserialize, Serialize};

use crate::dataset::Question;

const SYSTEM_MESSAGE: &str = "You are an assistant answering riddle questions for a test. \
Choose the correct answer from the choices provided. Output only the answer.";

const FEW_SHOT_EXAMPLES: &str = "Example 1:
Question: Mr. and Mrs. Mustard have six daughters and each daughter has one brother. But there are only 9 people in the family, how is that possible?
Choices: ['Each daughter shares the same brother.', 'Some daughters get married.', 'Some brothers were not loved by family.', 'None of above.']
Answer: Each daughter shares the same brother.

Example 2:
Question: What TV program should you watch in the bathtub?
Choices: ['Soap operas.', 'Sports live.', 'Talk show.', 'None of above.']
Answer: Soap operas.

---
";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum PromptMode {
    ZeroShot,
    FewShot,
}

impl PromptMode {
    pub const ALL: [PromptMode; 2] = [PromptMode::ZeroShot, PromptMode::FewShot];

    pub fn name(&self) -> &'static str {
        match self {
            Self::ZeroShot => "zero_shot",
            Self::FewShot => "few_shot",
        }
    }

    /// Column label used in result tables.
    pub fn label(&self) -> &'static str {
        match self {
            Self::ZeroShot => "Zero-Shot",
            Self::FewShot => "Few-Shot",
        }
    }
}

impl fmt::Display for PromptMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Prompt ending in the answer marker, so the answer is whatever the model
/// writes after the last `Answer:`.
pub fn build_prompt(question: &Question, mode: PromptMode) -> String {
    let examples = match mode {
        PromptMode::ZeroShot => "",
        PromptMode::FewShot => FEW_SHOT_EXAMPLES,
    };
    format!(
        "{SYSTEM_MESSAGE}\n\n{examples}Question: {}\nChoices: {}\nAnswer:",
        question.question,
        question.choices.join(", ")
    )
}
