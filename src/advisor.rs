use crate::config::Settings;
use crate::context::build_prompt;
use crate::error::AdvisorError;
use crate::types::MetricRecord;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, warn};

/// Reply shown when the advisor cannot be reached.
pub const FALLBACK_REPLY: &str = "The assistant is unavailable right now, please try again.";

/// Anything that can turn a prompt into an answer.
pub trait Advisor {
    fn ask(&self, prompt: &str) -> Result<String, AdvisorError>;
}

/// Answer a question about the record. Advisor failures are logged and
/// replaced by [`FALLBACK_REPLY`]; the answer text is otherwise returned verbatim.
pub fn answer(advisor: &dyn Advisor, record: &MetricRecord, question: &str) -> String {
    let prompt = build_prompt(record, question);
    match advisor.ask(&prompt) {
        Ok(reply) => reply,
        Err(e) => {
            warn!("advisor request failed: {}", e);
            FALLBACK_REPLY.to_string()
        }
    }
}

/// Client for an OpenAI-compatible `/chat/completions` endpoint.
pub struct OpenAiAdvisor {
    client: reqwest::blocking::Client,
    api_key: String,
    base_url: String,
    model: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

impl OpenAiAdvisor {
    pub fn from_settings(settings: &Settings) -> Result<Self, AdvisorError> {
        let api_key = settings.api_key.clone().ok_or_else(|| {
            AdvisorError::NotConfigured(
                "set SALES_INSIGHT_API_KEY or OPENAI_API_KEY".to_string(),
            )
        })?;
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            api_key,
            base_url: settings.base_url.clone(),
            model: settings.model.clone(),
        })
    }
}

impl Advisor for OpenAiAdvisor {
    fn ask(&self, prompt: &str) -> Result<String, AdvisorError> {
        let url = format!("{}/chat/completions", self.base_url);
        debug!("asking {} ({} prompt chars)", self.model, prompt.len());
        let body = json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
            "temperature": 0.2,
        });
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().unwrap_or_default();
            return Err(AdvisorError::Status {
                status: status.as_u16(),
                body,
            });
        }
        reply_content(resp.json()?)
    }
}

/// The first choice's content, untouched.
fn reply_content(parsed: ChatResponse) -> Result<String, AdvisorError> {
    parsed
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| AdvisorError::Malformed("no message content in reply".to_string()))
}
