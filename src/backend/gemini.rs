// Copyright 2025 Tomoki Hayashi
// MIT License (https://opensource.org/licenses/MIT)

//! Gemini `generateContent` protocol.

use serde::Deserialize;
use serde_json::json;

use super::encode::EncodedImage;
use super::{CaptionError, ensure_success};
use crate::config::Config;

pub const API_BASE: &str = "https://generativelanguage.googleapis.com";

const FILTER_REASONS: &[&str] = &["SAFETY", "PROHIBITED_CONTENT", "BLOCKLIST", "SPII"];

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<Content>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    text: Option<String>,
}

pub fn endpoint(model: &str) -> String {
    format!("{API_BASE}/v1beta/models/{model}:generateContent")
}

fn request_body(image: &EncodedImage, prompt: &str) -> serde_json::Value {
    json!({
        "contents": [{
            "parts": [
                { "inline_data": { "mime_type": image.mime, "data": image.base64 } },
                { "text": prompt }
            ]
        }]
    })
}

fn extract_text(response: GenerateResponse) -> Result<String, CaptionError> {
    if response
        .prompt_feedback
        .and_then(|f| f.block_reason)
        .is_some()
    {
        return Err(CaptionError::ContentFiltered);
    }
    let candidate = response
        .candidates
        .into_iter()
        .next()
        .ok_or(CaptionError::NoCandidates)?;
    match candidate.finish_reason.as_deref() {
        Some("MAX_TOKENS") => return Err(CaptionError::Truncated),
        Some(reason) if FILTER_REASONS.contains(&reason) => {
            return Err(CaptionError::ContentFiltered);
        }
        _ => {}
    }
    let texts: Vec<String> = candidate
        .content
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();
    if texts.is_empty() {
        return Err(CaptionError::EmptyResponse);
    }
    Ok(texts.concat())
}

pub async fn generate(
    client: &reqwest::Client,
    image: &EncodedImage,
    settings: &Config,
) -> Result<String, CaptionError> {
    let url = endpoint(settings.effective_model());
    tracing::debug!(%url, "gemini request");
    let response = client
        .post(&url)
        .header("x-goog-api-key", settings.api_key.trim())
        .json(&request_body(image, &settings.active_prompt))
        .send()
        .await
        .map_err(|e| CaptionError::from_request(e, &url))?;
    let response = ensure_success(response).await?;
    let parsed: GenerateResponse = response
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
    fn test_endpoint() {
        assert_eq!(
            endpoint("gemini-2.5-flash"),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.5-flash:generateContent"
        );
    }

    #[test]
    fn test_extract_joins_parts() {
        let text = parse(
            r#"{"candidates":[{"content":{"parts":[{"text":"1girl, "},{"text":"smile"}]},"finishReason":"STOP"}]}"#,
        )
        .unwrap();
        assert_eq!(text, "1girl, smile");
    }

    #[test]
    fn test_extract_failures() {
        assert!(matches!(parse(r#"{"candidates":[]}"#), Err(CaptionError::NoCandidates)));
        assert!(matches!(
            parse(r#"{"candidates":[{"finishReason":"MAX_TOKENS"}]}"#),
            Err(CaptionError::Truncated)
        ));
        assert!(matches!(
            parse(r#"{"candidates":[{"finishReason":"SAFETY"}]}"#),
            Err(CaptionError::ContentFiltered)
        ));
        assert!(matches!(
            parse(r#"{"promptFeedback":{"blockReason":"OTHER"}}"#),
            Err(CaptionError::ContentFiltered)
        ));
        assert!(matches!(
            parse(r#"{"candidates":[{"content":{"parts":[]},"finishReason":"STOP"}]}"#),
            Err(CaptionError::EmptyResponse)
        ));
    }

    #[test]
    fn test_request_body_shape() {
        let image = EncodedImage {
            base64: "AAAA".into(),
            mime: "image/jpeg",
            width: 1,
            height: 1,
        };
        let body = request_body(&image, "tag it");
        let parts = &body["contents"][0]["parts"];
        assert_eq!(parts[0]["inline_data"]["data"], "AAAA");
        assert_eq!(parts[0]["inline_data"]["mime_type"], "image/jpeg");
        assert_eq!(parts[1]["text"], "tag it");
    }
}
