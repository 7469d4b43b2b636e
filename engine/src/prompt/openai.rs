use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use lib_utils::text::truncate_chars;
use serde_json::json;
use tracing::{debug, warn};
use url::Url;

use crate::{
    batch::{Categorizer, Sentiment, WorkItem},
    engine_config::{CategoryConfig, OpenAiConfig, OPENAI_SERVICE},
    error::{EngineError, EngineResult},
    throttle::ThrottledCaller,
    upstream::HttpReply,
    HttpClient,
};

use super::{categorization_user_prompt, parse_category_answer, system_prompt, ChatApiResponse};

const CATEGORIZATION_OPERATION: &str = "categorization";
const PROMPT_BODY_CHARS: usize = 1000;
const CACHE_BODY_CHARS: usize = 500;

/// Folder categorization through the OpenAI chat completions API.
pub struct OpenAiCategorizer {
    http_client: HttpClient,
    caller: Arc<ThrottledCaller<HttpReply>>,
    endpoint: Url,
    api_key: String,
    model: String,
    temperature: f64,
    timeout: Duration,
    categories: CategoryConfig,
    system_prompt: String,
}

impl OpenAiCategorizer {
    pub fn new(
        http_client: HttpClient,
        caller: Arc<ThrottledCaller<HttpReply>>,
        config: &OpenAiConfig,
        categories: CategoryConfig,
    ) -> EngineResult<Self> {
        Ok(Self {
            http_client,
            caller,
            endpoint: config.endpoint()?,
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            temperature: config.temperature,
            timeout: Duration::from_secs(config.timeout_secs),
            system_prompt: system_prompt(&categories.labels),
            categories,
        })
    }

    pub async fn category(&self, item: &WorkItem, sentiment: Sentiment) -> EngineResult<String> {
        let sentiment = sentiment.to_string();
        let request_body = json!({
            "model": &self.model,
            "temperature": self.temperature,
            "messages": [
                {
                    "role": "system",
                    "content": &self.system_prompt
                },
                {
                    "role": "user",
                    "content": categorization_user_prompt(
                        &item.sender,
                        &item.subject,
                        truncate_chars(&item.body, PROMPT_BODY_CHARS),
                        &sentiment,
                    )
                }
            ]
        });

        let response = self
            .caller
            .call(
                OPENAI_SERVICE,
                CATEGORIZATION_OPERATION,
                &cache_content(item, &sentiment),
                || self.send(&request_body),
            )
            .await?;

        if response.cached {
            debug!("Using cached categorization result");
        }
        Ok(self.parse_category(&response.data))
    }

    async fn send(&self, request_body: &serde_json::Value) -> anyhow::Result<HttpReply> {
        let response = self
            .http_client
            .post(self.endpoint.clone())
            .bearer_auth(&self.api_key)
            .timeout(self.timeout)
            .json(request_body)
            .send()
            .await?;

        Ok(HttpReply::from_response(response).await?)
    }

    /// Known category from the reply, or the default category.
    fn parse_category(&self, reply: &HttpReply) -> String {
        let default = || self.categories.default_label.clone();

        if !reply.is_success() {
            warn!("Error from OpenAI API ({}): {}", reply.status, reply.body);
            return default();
        }

        let content = match assistant_content(&reply.body) {
            Ok(content) => content,
            Err(e) => {
                warn!("{}", e);
                return default();
            }
        };

        match parse_category_answer(&content) {
            Some(category) if self.categories.contains(&category) => category,
            Some(category) => {
                warn!(
                    "Category '{}' not in predefined categories, defaulting to {}",
                    category, self.categories.default_label
                );
                default()
            }
            None => {
                warn!("Error parsing OpenAI response: {}", content);
                default()
            }
        }
    }
}

#[async_trait]
impl Categorizer for OpenAiCategorizer {
    async fn categorize(&self, item: &WorkItem, sentiment: Sentiment) -> anyhow::Result<String> {
        Ok(self.category(item, sentiment).await?)
    }
}

fn assistant_content(body: &serde_json::Value) -> EngineResult<String> {
    let parsed = serde_json::from_value::<ChatApiResponse>(body.clone())
        .map_err(|e| EngineError::InvalidResponse(format!("chat response {}: {}", body, e)))?;
    parsed
        .choices
        .into_iter()
        .next()
        .map(|choice| choice.message.content)
        .ok_or_else(|| EngineError::InvalidResponse("no choices in OpenAI response".to_string()))
}

/// `sender|subject|first 500 chars of body|sentiment`
fn cache_content(item: &WorkItem, sentiment: &str) -> String {
    format!(
        "{}|{}|{}|{}",
        item.sender,
        item.subject,
        truncate_chars(&item.body, CACHE_BODY_CHARS),
        sentiment
    )
}
