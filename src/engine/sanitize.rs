use once_cell::sync::Lazy;
use regex::Regex;

/// Conversational openers the model emits despite being told not to. The
/// non-greedy span stops at the first separator, so only the preamble is cut.
static PREAMBLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)^(sure|here is|here's|okay|certainly|here are).{0,100}?(:|\n|\.)\s*")
        .expect("preamble regex is valid")
});

/// Clean raw model output: strip chat-template control markers, leading
/// conversational preambles, and symmetric wrapping quotes.
///
/// Runs to a fixpoint, so sanitizing already-sanitized text is a no-op.
pub fn clean_model_output(output: &str) -> String {
    let mut current = output.to_string();
    loop {
        let next = clean_once(&current);
        if next == current {
            return current;
        }
        current = next;
    }
}

fn clean_once(text: &str) -> String {
    let mut cleaned = text
        .replace("<start_of_turn>model", "")
        .replace("<start_of_turn>", "")
        .replace("<end_of_turn>", "");

    cleaned = cleaned.trim().to_string();
    cleaned = PREAMBLE.replace(&cleaned, "").trim().to_string();

    // One layer of wrapping quotes per pass; the fixpoint loop peels the rest.
    if cleaned.len() >= 2 && cleaned.starts_with('"') && cleaned.ends_with('"') {
        cleaned = cleaned[1..cleaned.len() - 1].trim().to_string();
    }

    cleaned
}
