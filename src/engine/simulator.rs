use crate::prompt::TaskType;

/// Marker prefixed to every simulated rewrite so callers and tests can tell
/// simulation output apart from genuine model output.
pub const DEMO_MARKER: &str = "[Demo]";

const CONCISE_LIMIT: usize = 50;

/// Deterministic fallback rewrite used when no model artifact is available or
/// the caller chooses to degrade instead of surfacing an engine failure.
pub fn simulate(task: TaskType, text: &str) -> String {
    format!("{} {}", DEMO_MARKER, fake_rewrite(task, text))
}

fn fake_rewrite(task: TaskType, text: &str) -> String {
    match task {
        TaskType::Professional | TaskType::Formal => format!("Dear recipient, {}", text),
        TaskType::Casual => format!("Hey! {}", text),
        TaskType::Warm => format!("{} (warmly)", text),
        TaskType::Love => format!("My dearest, {}", text),
        TaskType::Concise => {
            let truncated: String = text.chars().take(CONCISE_LIMIT).collect();
            if text.chars().count() > CONCISE_LIMIT {
                format!("{}...", truncated)
            } else {
                truncated
            }
        }
        TaskType::Grammar => {
            let mut chars = text.chars();
            let capitalized = match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            };
            if capitalized.ends_with(['.', '!', '?']) {
                capitalized
            } else {
                format!("{}.", capitalized)
            }
        }
        TaskType::Emojify => format!("{} [with emojis]", text),
        TaskType::Refine => text.to_string(),
    }
}
