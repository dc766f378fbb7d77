//! Removal of generation artifacts ahead of answer matching.

/// Marker the prompts end with; the model's answer follows its last occurrence.
pub const DEFAULT_ANSWER_MARKER: &str = "Answer:";

/// Special tokens that leak into decoded generations.
pub const DEFAULT_SPECIAL_TOKENS: &[&str] = &[
    "[INST]",
    "[/INST]",
    "</s>",
    "<s>",
    "<|begin_of_text|>",
    "<|end_of_text|>",
    "<|eot_id|>",
];

/// Strips special tokens, then keeps only the text after the last `marker`,
/// trimmed. Without a marker the token-free text is returned trimmed.
///
/// Token removal runs to a fixed point, so stripping one token can never
/// leave another behind and the function is idempotent.
pub fn clean_generated_text(text: &str, marker: &str, special_tokens: &[&str]) -> String {
    let mut cleaned = text.to_string();
    loop {
        let before = cleaned.len();
        for token in special_tokens.iter().filter(|t| !t.is_empty()) {
            if cleaned.contains(token) {
                cleaned = cleaned.replace(token, "");
            }
        }
        if cleaned.len() == before {
            break;
        }
    }

    if !marker.is_empty() {
        if let Some(pos) = cleaned.rfind(marker) {
            return cleaned[pos + marker.len()..].trim().to_string();
        }
    }

    cleaned.trim().to_string()
}
