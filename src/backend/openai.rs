// Copyright 2025 Tomoki Hayashi
// MIT License (https://opensource.org/licenses/MIT)

//! OpenAI-compatible chat completions protocol.

use serde::Deserialize;
use serde_json::json;

use super::encode::EncodedImage;
use super::{CaptionError, ensure_success};
use crate::config::Config;

const MAX_TOKENS: u32 = 2000;

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Option<Message>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Message {
    content: Option<String>,
}

/// Resolve the chat completions URL from a user-supplied base URL.
///
/// `.../chat/completions` is used as is, `.../v1` gets `/chat/completions`
/// and anything else gets `/v1/chat/completions`.
pub fn resolve_endpoint(base_url: &str) -> String {
    let base = base_url.trim().trim_end_matches('/');
    if base.ends_with("/chat/completions") {
        base.to_string()
    } else if base.ends_with("/v1") {
        format!("{base}/chat/completions")
    } else {
        format!("{base}/v1/chat/completions")
    }
}

fn request_body(image: &EncodedImage, model: &str, prompt: &str) -> serde_json::Value {
    json!({
        "model": model,
        "messages": [{
            "role": "user",
            "content": [
                { "type": "text", "text": prompt },
                { "type": "image_url", "image_url": { "url": image.data_url() } }
            ]
        }],
        "max_tokens": MAX_TOKENS
    })
}

fn extract_text(response: ChatResponse) -> Result<String, CaptionError> {
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or(CaptionError::NoChoices)?;
    match choice.finish_reason.as_deref() {
        Some("length") => return Err(CaptionError::Truncated),
        Some("content_filter") => return Err(CaptionError::ContentFiltered),
        _ => {}
    }
    choice
        .message
        .and_then(|m| m.content)
        .ok_or(CaptionError::EmptyResponse)
}

pub async fn generate(
    client: &reqwest::Client,
    image: &EncodedImage,
    settings: &Config,
) -> Result<String, CaptionError> {
    let url = resolve_endpoint(&settings.base_url);
    tracing::debug!(%url, provider = %settings.provider_name, "chat completions request");
    let body = request_body(image, settings.effective_model(), &settings.active_prompt);
    let response = client
        .post(&url)
        .bearer_auth(settings.api_key.trim())
        .json(&body)
        .send()
        .await
        .map_err(|e| CaptionError::from_request(e, &url))?;
    let response = ensure_success(response).await?;
    let parsed: ChatResponse = response
        .json()
        .await
        .map_err(|e| CaptionError::InvalidResponse(e.to_string()))?;
    extract_text(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> Result<String, CaptionError> {
        extract_text(serde_json::from_str(json).unwrap())
    }

    #[test]
    fn test_resolve_endpoint() {
        assert_eq!(
            resolve_endpoint("https://api.openai.com"),
            "https://api.openai.com/v1/chat/completions"
        );
        assert_eq!(
            resolve_endpoint("http://localhost:1234/v1/"),
            "http://localhost:1234/v1/chat/completions"
        );
        assert_eq!(
            resolve_endpoint(" https://x.ai/api/chat/completions "),
            "https://x.ai/api/chat/completions"
        );
    }

    #[test]
    fn test_extract_text() {
        assert_eq!(
            parse(r#"{"choices":[{"message":{"content":"a cat"},"finish_reason":"stop"}]}"#).unwrap(),
            "a cat"
        );
        assert_eq!(
            parse(r#"{"choices":[{"message":{"content":""},"finish_reason":"stop"}]}"#).unwrap(),
            ""
        );
    }

    #[test]
    fn test_extract_failures() {
        assert!(matches!(parse(r#"{"choices":[]}"#), Err(CaptionError::NoChoices)));
        assert!(matches!(
            parse(r#"{"choices":[{"finish_reason":"length"}]}"#),
            Err(CaptionError::Truncated)
        ));
        assert!(matches!(
            parse(r#"{"choices":[{"finish_reason":"content_filter"}]}"#),
            Err(CaptionError::ContentFiltered)
        ));
        assert!(matches!(
            parse(r#"{"choices":[{"message":{"content":null}}]}"#),
            Err(CaptionError::EmptyResponse)
        ));
    }

    #[test]
    fn test_request_body_uses_data_url() {
        let image = EncodedImage {
            base64: "QUJD".into(),
            mime: "image/jpeg",
            width: 1,
            height: 1,
        };
        let body = request_body(&image, "gpt-4o", "describe");
        assert_eq!(body["model"], "gpt-4o");
        assert_eq!(body["max_tokens"], 2000);
        let content = &body["messages"][0]["content"];
        assert_eq!(content[0]["text"], "describe");
        assert_eq!(content[1]["image_url"]["url"], "data:image/jpeg;base64,QUJD");
    }
}
