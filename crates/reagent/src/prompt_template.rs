use serde::Serialize;
use tera::{Context, Error as TeraError, Tera};

/// Instructions for the request that compacts old history
pub const SUMMARIZE_PROMPT: &str = include_str!("prompts/summarize.md");

pub fn load_prompt<T: Serialize>(template: &str, context_data: &T) -> Result<String, TeraError> {
    let mut tera = Tera::default();
    tera.add_raw_template("inline_template", template)?;
    let context = Context::from_serialize(context_data)?;
    let rendered = tera.render("inline_template", &context)?;
    Ok(rendered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    #[test]
    fn test_load_prompt() {
        let template = "Hello, {{ name }}! You are {{ age }} years old.";
        let mut context = HashMap::new();
        context.insert("name".to_string(), "Alice".to_string());
        context.insert("age".to_string(), 30.to_string());

        let result = load_prompt(template, &context).unwrap();
        assert_eq!(result, "Hello, Alice! You are 30 years old.");
    }

    #[test]
    fn test_load_prompt_missing_variable() {
        let template = "Hello, {{ name }}! You are {{ age }} years old.";
        let mut context = HashMap::new();
        context.insert("name".to_string(), "Alice".to_string());
        // 'age' is missing from context
        let result = load_prompt(template, &context);
        assert!(result.is_err());
    }

    #[test]
    fn test_summarize_prompt_renders_transcript() {
        let context = json!({
            "previous_summary": "The user is planning a trip.",
            "transcript": [
                {"speaker": "User", "text": "Book the 9am train"},
                {"speaker": "Assistant", "text": "Booked."}
            ]
        });
        let rendered = load_prompt(SUMMARIZE_PROMPT, &context).unwrap();
        assert!(rendered.contains("The user is planning a trip."));
        assert!(rendered.contains("User: Book the 9am train\nAssistant: Booked."));
    }

    #[test]
    fn test_summarize_prompt_without_previous_summary() {
        let context = json!({
            "previous_summary": null,
            "transcript": [{"speaker": "User", "text": "hi"}]
        });
        let rendered = load_prompt(SUMMARIZE_PROMPT, &context).unwrap();
        assert!(!rendered.contains("before this transcript"));
        assert!(rendered.contains("User: hi"));
    }
}
