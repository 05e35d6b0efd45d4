//! Ollama local-model provider.

use serde_json::{json, Value};

use super::{
    decision_from_text, format_email, map_http_error, AiError, AiProvider, DECISION_SCHEMA,
};
use crate::autopilot::types::Decision;
use crate::bridge::mail::EmailMessage;

pub struct OllamaProvider {
    host: String,
    model: String,
}

impl OllamaProvider {
    pub fn new(host: String, model: String) -> Self {
        Self {
            host: host.trim_end_matches('/').to_string(),
            model,
        }
    }

    fn complete(&self, system: &str, user: &str) -> Result<String, AiError> {
        let response: Value = ureq::post(&format!("{}/api/chat", self.host))
            .send_json(json!({
                "model": self.model,
                "stream": false,
                "messages": [
                    {"role": "system", "content": system},
                    {"role": "user", "content": user},
                ],
            }))
            .map_err(map_http_error)?
            .into_json()
            .map_err(|e| AiError::MalformedResponse(e.to_string()))?;

        response["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| AiError::MalformedResponse("no message in response".to_string()))
    }
}

impl AiProvider for OllamaProvider {
    fn name(&self) -> &'static str {
        "ollama"
    }

    fn is_available(&self) -> bool {
        ureq::get(&format!("{}/api/tags", self.host))
            .timeout(std::time::Duration::from_secs(3))
            .call()
            .is_ok()
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
