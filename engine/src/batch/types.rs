use lib_utils::text::truncate_chars;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Chars of body that take part in the exact-match key.
const EXACT_MATCH_BODY_CHARS: usize = 100;

/// A message to triage, as handed over by the parsing layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: String,
    #[serde(alias = "from")]
    pub sender: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default, alias = "content")]
    pub body: String,
    /// Plain-text rendering when the message had an HTML part.
    #[serde(default)]
    pub text_content: Option<String>,
    #[serde(default)]
    pub has_html: bool,
    #[serde(default)]
    pub attachments_count: usize,
}

impl WorkItem {
    pub fn new(
        id: impl Into<String>,
        sender: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            sender: sender.into(),
            subject: subject.into(),
            body: body.into(),
            text_content: None,
            has_html: false,
            attachments_count: 0,
        }
    }

    /// Text sent for sentiment analysis: the plain-text rendering if present.
    pub fn sentiment_text(&self) -> &str {
        match self.text_content.as_deref() {
            Some(text) if !text.is_empty() => text,
            _ => &self.body,
        }
    }

    /// `sender|subject|first 100 chars of body`, compared byte for byte.
    pub fn exact_match_key(&self) -> String {
        format!(
            "{}|{}|{}",
            self.sender,
            self.subject,
            truncate_chars(&self.body, EXACT_MATCH_BODY_CHARS)
        )
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
#[serde(rename_all = "UPPERCASE")]
pub enum Sentiment {
    Positive,
    Negative,
    #[default]
    Neutral,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_exact_match_key_uses_body_prefix() {
        let body = "a".repeat(100);
        let a = WorkItem::new("1", "bob@shop.com", "Order", format!("{}tail one", body));
        let b = WorkItem::new("2", "bob@shop.com", "Order", format!("{}tail two", body));
        assert_eq!(a.exact_match_key(), b.exact_match_key());

        let c = WorkItem::new("3", "Bob@shop.com", "Order", format!("{}tail one", body));
        assert_ne!(a.exact_match_key(), c.exact_match_key());
    }

    #[test]
    fn test_sentiment_text_prefers_plain_text() {
        let mut item = WorkItem::new("1", "a@b.c", "Hi", "<p>hello</p>");
        assert_eq!(item.sentiment_text(), "<p>hello</p>");

        item.text_content = Some(String::new());
        assert_eq!(item.sentiment_text(), "<p>hello</p>");

        item.text_content = Some("hello".to_string());
        assert_eq!(item.sentiment_text(), "hello");
    }

    #[test]
    fn test_deserialize_accepts_mail_field_names() {
        let item: WorkItem = serde_json::from_str(
            r#"{"id": "42", "from": "ann@x.org", "subject": "Hi", "content": "Body", "has_html": true}"#,
        )
        .unwrap();
        assert_eq!(item.sender, "ann@x.org");
        assert_eq!(item.body, "Body");
        assert!(item.has_html);
        assert_eq!(item.attachments_count, 0);
    }

    #[test]
    fn test_sentiment_labels() {
        assert_eq!(Sentiment::from_str("positive").unwrap(), Sentiment::Positive);
        assert_eq!(Sentiment::Negative.to_string(), "NEGATIVE");
        assert_eq!(Sentiment::default(), Sentiment::Neutral);
        assert!(Sentiment::from_str("LABEL_0").is_err());
    }
}
