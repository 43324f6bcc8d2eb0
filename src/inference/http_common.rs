use serde_json::{Value, json};

use crate::inference::{
    error::{InferenceError, InferenceErrorKind},
    types::{ChatMessage, ChatRole, FinishReason, UsageStats},
};

pub fn role_to_wire(role: &ChatRole) -> &'static str {
    match role {
        ChatRole::System => "system",
        ChatRole::User => "user",
        ChatRole::Assistant => "assistant",
    }
}

pub fn messages_to_openai(messages: &[ChatMessage]) -> Vec<Value> {
    messages
        .iter()
        .map(|message| {
            json!({
                "role": role_to_wire(&message.role),
                "content": message.content,
            })
        })
        .collect()
}

pub fn parse_finish_reason(value: Option<&str>) -> FinishReason {
    match value.unwrap_or("stop") {
        "stop" => FinishReason::Stop,
        "length" => FinishReason::Length,
        other => FinishReason::Other(other.to_string()),
    }
}

pub fn parse_usage(payload: &Value) -> Option<UsageStats> {
    payload
        .get("usage")
        .and_then(|usage| serde_json::from_value::<UsageStats>(usage.clone()).ok())
}

/// Extracts the first choice text from an OpenAI-compatible completion body.
/// Accepts both chat (`message.content`) and legacy completion (`text`) shapes.
pub fn first_choice_text(payload: &Value) -> Option<(String, Option<String>)> {
    let choice = payload.get("choices")?.as_array()?.first()?;
    let text = choice
        .get("message")
        .and_then(|message| message.get("content"))
        .and_then(Value::as_str)
        .or_else(|| choice.get("text").and_then(Value::as_str))?;
    let finish_reason = choice
        .get("finish_reason")
        .and_then(Value::as_str)
        .map(str::to_string);
    Some((text.to_string(), finish_reason))
}

pub fn map_http_error(status: u16, service_id: &str, body: &str) -> InferenceError {
    let normalized_body = body.chars().take(240).collect::<String>();

    let mut err = if status == 401 {
        InferenceError::new(InferenceErrorKind::Authentication, "authentication failed")
            .with_retryable(false)
    } else if status == 403 {
        InferenceError::new(InferenceErrorKind::Authorization, "authorization failed")
            .with_retryable(false)
    } else if status == 408 || status == 504 {
        InferenceError::new(
            InferenceErrorKind::Timeout,
            format!("service returned status {}", status),
        )
        .with_retryable(true)
    } else if status == 429 {
        InferenceError::new(
            InferenceErrorKind::RateLimited,
            format!("service returned status {}", status),
        )
        .with_retryable(true)
    } else if (400..500).contains(&status) {
        InferenceError::new(
            InferenceErrorKind::InvalidRequest,
            format!("service returned status {}", status),
        )
        .with_retryable(false)
    } else {
        InferenceError::new(
            InferenceErrorKind::BackendTransient,
            format!("service returned status {}", status),
        )
        .with_retryable(true)
    };

    err = err
        .with_service_id(service_id.to_string())
        .with_provider_http_status(status);

    if !normalized_body.is_empty() {
        err.message = format!("{}: {}", err.message, normalized_body);
    }

    err
}

pub fn map_transport_error(err: &reqwest::Error, service_id: &str) -> InferenceError {
    let kind = if err.is_timeout() {
        InferenceErrorKind::Timeout
    } else if err.is_builder() {
        InferenceErrorKind::InvalidRequest
    } else {
        InferenceErrorKind::BackendTransient
    };
    InferenceError::new(kind, format!("request to {} failed: {}", service_id, err))
        .with_service_id(service_id.to_string())
}
