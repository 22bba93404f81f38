use serde::{Deserialize, Serialize};

/// Rewrite task derived from the user's instruction string.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumIter,
)]
pub enum TaskType {
    Professional,
    Formal,
    Casual,
    Warm,
    Love,
    Concise,
    Grammar,
    Emojify,
    Refine,
}

impl TaskType {
    /// Classify an instruction by case-insensitive keyword. First match wins;
    /// anything unrecognized falls back to `Refine`.
    pub fn classify(instruction: &str) -> Self {
        let lower = instruction.to_lowercase();
        if lower.contains("professional") {
            TaskType::Professional
        } else if lower.contains("formal") {
            TaskType::Formal
        } else if lower.contains("casual") {
            TaskType::Casual
        } else if lower.contains("warm") {
            TaskType::Warm
        } else if lower.contains("love") {
            TaskType::Love
        } else if lower.contains("concise") {
            TaskType::Concise
        } else if lower.contains("grammar") {
            TaskType::Grammar
        } else if lower.contains("emojify") {
            TaskType::Emojify
        } else {
            TaskType::Refine
        }
    }

    fn task_description(self) -> &'static str {
        match self {
            TaskType::Professional => "Rewrite the following text in a formal, professional tone. Strictly output ONLY the rewritten text. Do not include 'Sure', 'Here is', or any conversational filler.",
            TaskType::Formal => "Rewrite the following text in a formal tone. Strictly output ONLY the rewritten text. Do not include 'Sure', 'Here is', or any conversational filler.",
            TaskType::Casual => "Rewrite the following text in a casual, friendly tone. Strictly output ONLY the rewritten text. Do not include 'Sure', 'Here is', or any conversational filler.",
            TaskType::Warm => "Rewrite the following text in a warm, caring tone. Strictly output ONLY the rewritten text. Do not include 'Sure', 'Here is', or any conversational filler.",
            TaskType::Love => "Rewrite the following text in an affectionate, loving tone. Strictly output ONLY the rewritten text. Do not include 'Sure', 'Here is', or any conversational filler.",
            TaskType::Concise => "Summarize the following text to be more concise. Strictly output ONLY the summary. Do not include 'Sure', 'Here is', or any conversational filler.",
            TaskType::Grammar => "Fix all grammar and spelling errors in the following text. Strictly output ONLY the corrected text. Do not include 'Sure', 'Here is', or any conversational filler.",
            TaskType::Emojify => "Rewrite the following text and insert relevant emojis throughout. You MUST include emojis. Strictly output ONLY the text with emojis. do not include any preamble.",
            TaskType::Refine => "Improve the following text to be clearer and more readable. Strictly output ONLY the improved text. Do NOT include 'Sure', 'Here is', or any conversational filler.",
        }
    }
}

/// Build a Gemma instruction-tuned chat prompt for the given input and
/// instruction, using the model's `<start_of_turn>`/`<end_of_turn>` template.
pub fn build_prompt(input: &str, instruction: &str) -> String {
    let task = TaskType::classify(instruction);
    format!(
        "<start_of_turn>user\n{}\n\nText: {}\n<end_of_turn>\n<start_of_turn>model\n",
        task.task_description(),
        input
    )
}
