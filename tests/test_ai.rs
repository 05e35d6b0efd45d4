//! Provider HTTP tests against a mock server, plus error mapping.

mod common;

use pretty_assertions::assert_eq;

use common::make_email;
use mailpilot::ai::{AiError, AiProvider, ClaudeProvider, OllamaProvider, OpenAiProvider};

const DECISION_JSON: &str = r#"{"action":"move","confidence":0.85,"reasoning":"ci noise","target_folder":"GitHub"}"#;

#[test]
fn test_ollama_classify_parses_decision() {
    let mut server = mockito::Server::new();
    let mock = server
        .mock("POST", "/api/chat")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(format!(
            r#"{{"message":{{"role":"assistant","content":"{}"}}}}"#,
            DECISION_JSON.replace('"', "\\\"")
        ))
        .create();

    let provider = OllamaProvider::new(server.url(), "llama3.2".to_string());
    let email = make_email("1", "bot@ci.example.com", "Build failed");
    let decision = provider.autopilot_classify(&email, "sort my mail").unwrap();

    assert_eq!(decision.target_folder(), Some("GitHub"));
    assert_eq!(decision.confidence, 0.85);
    mock.assert();
}

#[test]
fn test_openai_classify_parses_decision() {
    let mut server = mockito::Server::new();
    let mock = server
        .mock("POST", "/v1/chat/completions")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(format!(
            r#"{{"choices":[{{"message":{{"role":"assistant","content":"{}"}}}}]}}"#,
            DECISION_JSON.replace('"', "\\\"")
        ))
        .create();

    let provider = OpenAiProvider::new("test-key".to_string(), "gpt-4o".to_string())
        .with_api_url(format!("{}/v1/chat/completions", server.url()));
    let email = make_email("1", "bot@ci.example.com", "Build failed");
    let decision = provider.autopilot_classify(&email, "sort my mail").unwrap();

    assert_eq!(decision.target_folder(), Some("GitHub"));
    mock.assert();
}

#[test]
fn test_claude_rate_limit_maps_to_rate_limited() {
    let mut server = mockito::Server::new();
    server
        .mock("POST", "/v1/messages")
        .with_status(429)
        .with_body(r#"{"error":{"type":"rate_limit_error"}}"#)
        .create();

    let provider = ClaudeProvider::new("test-key".to_string(), "claude-haiku".to_string())
        .with_api_url(format!("{}/v1/messages", server.url()));
    let email = make_email("1", "a@b.c", "x");
    let err = provider.autopilot_classify(&email, "sort").unwrap_err();
    assert!(matches!(err, AiError::RateLimited));
}

#[test]
fn test_auth_failure_maps_to_auth_failed() {
    let mut server = mockito::Server::new();
    server
        .mock("POST", "/v1/chat/completions")
        .with_status(401)
        .with_body(r#"{"error":"bad key"}"#)
        .create();

    let provider = OpenAiProvider::new("bad-key".to_string(), "gpt-4o".to_string())
        .with_api_url(format!("{}/v1/chat/completions", server.url()));
    let email = make_email("1", "a@b.c", "x");
    let err = provider.autopilot_classify(&email, "sort").unwrap_err();
    assert!(matches!(err, AiError::AuthFailed));
}

#[test]
fn test_prose_response_is_malformed() {
    let mut server = mockito::Server::new();
    server
        .mock("POST", "/api/chat")
        .with_status(200)
        .with_body(r#"{"message":{"content":"I think you should archive this one."}}"#)
        .create();

    let provider = OllamaProvider::new(server.url(), "llama3.2".to_string());
    let email = make_email("1", "a@b.c", "x");
    let err = provider.autopilot_classify(&email, "sort").unwrap_err();
    assert!(matches!(err, AiError::MalformedResponse(_)));
}

#[test]
fn test_missing_key_is_unavailable() {
    let provider = ClaudeProvider::new(String::new(), "claude-haiku".to_string());
    assert!(!provider.is_available());
    let email = make_email("1", "a@b.c", "x");
    let err = provider.autopilot_classify(&email, "sort").unwrap_err();
    assert!(matches!(err, AiError::Unavailable(_)));
}
