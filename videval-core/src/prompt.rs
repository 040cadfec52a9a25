//! Prompt assembly for the two evaluation tasks.
//!
//! The wording is part of the benchmark definition: downstream scores are
//! only comparable if the model sees exactly these strings.

use crate::options::parse_options;

/// Build a recognition prompt: the question followed by an `Options:` block.
///
/// When the sample carries no parseable options the question is sent alone.
pub fn recognition_prompt(question: &str, options: Option<&str>) -> String {
    let parsed = options.map(parse_options).unwrap_or_default();
    if parsed.is_empty() {
        return question.to_string();
    }
    let options_text = parsed
        .iter()
        .map(|(key, phrases)| format!("{key}. {}", phrases.join(", ")))
        .collect::<Vec<_>>()
        .join("\n");
    format!("{question}\n\nOptions:\n{options_text}")
}

/// Build a forecasting prompt: the question plus the fixed choice instruction
/// and the space-joined choice list.
pub fn forecasting_prompt(question: &str, choices: &[String]) -> String {
    format!(
        "{question}. The output should be the choice among one of the following choices. Choices are {}",
        choices.join(" ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn recognition_prompt_formats_options_block() {
        let prompt = recognition_prompt(
            "What is the person doing?",
            Some("1. ['wash dishes', 'dry hands'] 2. ['open door']"),
        );
        assert_eq!(
            prompt,
            "What is the person doing?\n\nOptions:\n1. wash dishes, dry hands\n2. open door"
        );
    }

    #[test]
    fn recognition_prompt_without_options_is_bare_question() {
        assert_eq!(
            recognition_prompt("What happens?", None),
            "What happens?"
        );
        assert_eq!(
            recognition_prompt("What happens?", Some("unparseable")),
            "What happens?"
        );
    }

    #[test]
    fn forecasting_prompt_joins_choices_with_spaces() {
        let choices = vec!["open the fridge".to_string(), "close the fridge".to_string()];
        assert_eq!(
            forecasting_prompt("What will the person do next?", &choices),
            "What will the person do next?. The output should be the choice among one of the \
             following choices. Choices are open the fridge close the fridge"
        );
    }
}
