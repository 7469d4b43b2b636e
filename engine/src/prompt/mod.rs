mod huggingface;
mod openai;

pub use huggingface::HuggingFaceSentiment;
pub use openai::OpenAiCategorizer;

use indoc::{formatdoc, indoc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
pub struct PromptUsage {
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub total_tokens: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatChoice {
    pub index: i32,
    pub message: ChatMessage,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatApiResponse {
    pub choices: Vec<ChatChoice>,
    pub usage: Option<PromptUsage>,
}

#[derive(Debug, Deserialize)]
struct CategoryAnswer {
    category: String,
}

/// Category named by the model's JSON answer, e.g. `{"category": "Spam & Unwanted"}`.
pub fn parse_category_answer(content: &str) -> Option<String> {
    serde_json::from_str::<CategoryAnswer>(content.trim())
        .ok()
        .map(|answer| answer.category)
}

const CATEGORY_INSTRUCTIONS: &str = indoc! {r#"
    Your task is to analyze the following email data and output ONLY the category as a JSON object
    with a single field "category" containing the exact category name from the list above."#
};

pub fn system_prompt(labels: &[String]) -> String {
    let taxonomy = labels
        .iter()
        .enumerate()
        .map(|(i, label)| format!("{}. {}", i + 1, label))
        .collect::<Vec<_>>()
        .join("\n");

    formatdoc! {r#"
        You are an email categorization expert. Analyze the email content and categorize it into exactly ONE of the following categories:

        {taxonomy}

        {CATEGORY_INSTRUCTIONS}"#
    }
}

pub fn categorization_user_prompt(sender: &str, subject: &str, body: &str, sentiment: &str) -> String {
    formatdoc!(
        r#"EMAIL FROM: {}
            EMAIL SUBJECT: {}
            EMAIL CONTENT: {}
            SENTIMENT: {}

            Output only a JSON with the category, for example:
            {{"category": "Client Communication"}}"#,
        sender,
        subject,
        body,
        sentiment
    )
}
