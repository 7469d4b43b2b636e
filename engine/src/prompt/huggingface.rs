use std::{str::FromStr, sync::Arc, time::Duration};

use async_trait::async_trait;
use lib_utils::text::truncate_chars;
use serde_json::{json, Value};
use tracing::{debug, warn};
use url::Url;

use crate::{
    batch::{Sentiment, SentimentAnalyzer},
    engine_config::{HuggingFaceConfig, HUGGINGFACE_SERVICE},
    error::{EngineError, EngineResult},
    throttle::ThrottledCaller,
    upstream::HttpReply,
    HttpClient,
};

const SENTIMENT_OPERATION: &str = "sentiment";
const MAX_INPUT_CHARS: usize = 1000;

/// Text classification through the Hugging Face inference API.
pub struct HuggingFaceSentiment {
    http_client: HttpClient,
    caller: Arc<ThrottledCaller<HttpReply>>,
    endpoint: Url,
    api_key: String,
    timeout: Duration,
}

impl HuggingFaceSentiment {
    pub fn new(
        http_client: HttpClient,
        caller: Arc<ThrottledCaller<HttpReply>>,
        config: &HuggingFaceConfig,
    ) -> EngineResult<Self> {
        Ok(Self {
            http_client,
            caller,
            endpoint: config.endpoint()?,
            api_key: config.api_key.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
        })
    }

    pub async fn sentiment(&self, text: &str) -> EngineResult<Sentiment> {
        let text = truncate_chars(text, MAX_INPUT_CHARS);
        let response = self
            .caller
            .call(HUGGINGFACE_SERVICE, SENTIMENT_OPERATION, text, || self.send(text))
            .await?;

        if response.cached {
            debug!("Using cached sentiment analysis result");
        }
        Ok(parse_sentiment(&response.data))
    }

    async fn send(&self, text: &str) -> anyhow::Result<HttpReply> {
        let response = self
            .http_client
            .post(self.endpoint.clone())
            .bearer_auth(&self.api_key)
            .timeout(self.timeout)
            .json(&json!({ "inputs": text }))
            .send()
            .await?;

        Ok(HttpReply::from_response(response).await?)
    }
}

#[async_trait]
impl SentimentAnalyzer for HuggingFaceSentiment {
    async fn analyze(&self, text: &str) -> anyhow::Result<Sentiment> {
        Ok(self.sentiment(text).await?)
    }
}

/// First predicted label. The API answers either `[{label, score}, ...]`
/// or the same list wrapped in another list.
fn first_label(body: &Value) -> EngineResult<&str> {
    let prediction = match body.as_array().and_then(|list| list.first()) {
        Some(Value::Array(inner)) => inner.first(),
        other => other,
    };
    prediction
        .and_then(|p| p.get("label"))
        .and_then(Value::as_str)
        .ok_or_else(|| EngineError::InvalidResponse(format!("no sentiment label in {}", body)))
}

fn parse_sentiment(reply: &HttpReply) -> Sentiment {
    if !reply.is_success() {
        warn!("Error from Hugging Face API ({}): {}", reply.status, reply.body);
        return Sentiment::Neutral;
    }

    match first_label(&reply.body) {
        Ok(label) => Sentiment::from_str(label).unwrap_or_else(|_| {
            debug!("Unrecognized sentiment label {}", label);
            Sentiment::Neutral
        }),
        Err(e) => {
            warn!("{}", e);
            Sentiment::Neutral
        }
    }
}
