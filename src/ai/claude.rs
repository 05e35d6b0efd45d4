//! Anthropic API provider.

use serde_json::{json, Value};

use super::{
    decision_from_text, format_email, map_http_error, AiError, AiProvider, DECISION_SCHEMA,
};
use crate::autopilot::types::Decision;
use crate::bridge::mail::EmailMessage;

const DEFAULT_API_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";

pub struct ClaudeProvider {
    api_key: String,
    model: String,
    api_url: String,
}

impl ClaudeProvider {
    pub fn new(api_key: String, model: String) -> Self {
        Self {
            api_key,
            model,
            api_url: DEFAULT_API_URL.to_string(),
        }
    }

    /// Override the endpoint (tests).
    pub fn with_api_url(mut self, url: String) -> Self {
        self.api_url = url;
        self
    }

    fn complete(&self, system: &str, user: &str) -> Result<String, AiError> {
        if self.api_key.is_empty() {
            return Err(AiError::Unavailable("no Anthropic API key".to_string()));
        }
        let response: Value = ureq::post(&self.api_url)
            .set("x-api-key", &self.api_key)
            .set("anthropic-version", API_VERSION)
            .set("content-type", "application/json")
            .send_json(json!({
                "model": self.model,
                "max_tokens": 1024,
                "system": system,
                "messages": [{"role": "user", "content": user}],
            }))
            .map_err(map_http_error)?
            .into_json()
            .map_err(|e| AiError::MalformedResponse(e.to_string()))?;

        response["content"][0]["text"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| AiError::MalformedResponse("no content in response".to_string()))
    }
}

impl AiProvider for ClaudeProvider {
    fn name(&self) -> &'static str {
        "claude"
    }

    fn is_available(&self) -> bool {
        !self.api_key.is_empty()
    }

    fn autopilot_classify(
        &self,
        email: &EmailMessage,
        instructions: &str,
    ) -> Result<Decision, AiError> {
        let system = format!(
            "You triage email on the user's behalf, following their preferences exactly.\n\n{}",
            DECISION_SCHEMA
        );
        let user = format!(
            "Preferences:\n{}\n\nEmail:\n{}",
            instructions,
            format_email(email)
        );
        let text = self.complete(&system, &user)?;
        decision_from_text(&text)
    }

    fn classify(&self, email: &EmailMessage, context: Option<&str>) -> Result<Decision, AiError> {
        let system = format!("You classify a single email.\n\n{}", DECISION_SCHEMA);
        let mut user = format_email(email);
        if let Some(context) = context {
            user = format!("Context:\n{}\n\n{}", context, user);
        }
        let text = self.complete(&system, &user)?;
        decision_from_text(&text)
    }

    fn generate_reply(
        &self,
        email: &EmailMessage,
        template: &str,
        context: Option<&str>,
    ) -> Result<String, AiError> {
        let system = "Write a short, polite email reply. Return only the reply body.";
        let mut user = format!("Template:\n{}\n\nEmail:\n{}", template, format_email(email));
        if let Some(context) = context {
            user = format!("Context:\n{}\n\n{}", context, user);
        }
        self.complete(system, &user)
    }
}
