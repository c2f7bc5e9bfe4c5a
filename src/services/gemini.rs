use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use crate::core::config::GeminiConfig;
use crate::core::error::RemoteError;
use crate::core::state::AspectRatio;
use crate::utils::data_uri::{to_data_uri, InlineImage};

#[cfg(target_arch = "wasm32")]
pub trait ClientBounds {}
#[cfg(target_arch = "wasm32")]
impl<T> ClientBounds for T {}

#[cfg(not(target_arch = "wasm32"))]
pub trait ClientBounds: Send + Sync {}
#[cfg(not(target_arch = "wasm32"))]
impl<T: Send + Sync> ClientBounds for T {}

/// What the image edit model answered with.
#[derive(Debug, Clone, PartialEq)]
pub enum EditOutcome {
    Image(String),
    /// The model replied with text only, usually a refusal.
    Text(String),
}

/// The remote generative capabilities, each call made with one API key.
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
pub trait GenerativeClient: ClientBounds {
    /// Renders one image and returns it as a data URI.
    async fn generate_image(
        &self,
        api_key: &str,
        prompt: &str,
        aspect_ratio: AspectRatio,
    ) -> Result<String, RemoteError>;

    async fn edit_image(
        &self,
        api_key: &str,
        image: &InlineImage,
        instruction: &str,
    ) -> Result<EditOutcome, RemoteError>;

    /// Plain text generation, or JSON constrained by `schema` when given.
    async fn generate_text(
        &self,
        api_key: &str,
        prompt: &str,
        schema: Option<&Value>,
    ) -> Result<String, RemoteError>;
}

pub struct GeminiClient {
    config: GeminiConfig,
    client: reqwest::Client,
}

impl GeminiClient {
    pub fn new(config: GeminiConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    fn endpoint(&self, model: &str, method: &str) -> Result<Url, RemoteError> {
        let mut url = Url::parse(&self.config.base_url)
            .map_err(|e| RemoteError::other(format!("Invalid Gemini base URL: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| RemoteError::other("Gemini base URL cannot be a base"))?
            .pop_if_empty()
            .push("models")
            .push(&format!("{}:{}", model, method));
        Ok(url)
    }

    async fn post<B: Serialize + ?Sized>(
        &self,
        api_key: &str,
        url: Url,
        body: &B,
    ) -> Result<String, RemoteError> {
        let resp = self
            .client
            .post(url)
            .header("x-goog-api-key", api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| RemoteError::other(format!("Gemini request failed: {}", e)))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| RemoteError::other(format!("Failed to read Gemini response: {}", e)))?;

        if !status.is_success() {
            return Err(RemoteError::from_status(status.as_u16(), &text));
        }
        Ok(text)
    }
}

// --- Imagen :predict ---

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PredictRequest<'a> {
    instances: Vec<PredictInstance<'a>>,
    parameters: PredictParameters<'a>,
}

#[derive(Serialize)]
struct PredictInstance<'a> {
    prompt: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PredictParameters<'a> {
    sample_count: u32,
    aspect_ratio: &'a str,
    output_mime_type: &'a str,
}

#[derive(Deserialize)]
struct PredictResponse {
    #[serde(default)]
    predictions: Vec<Prediction>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Prediction {
    bytes_base64_encoded: Option<String>,
    mime_type: Option<String>,
}

// --- :generateContent ---

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ContentRequest<'a> {
    contents: Vec<RequestContent<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig<'a>>,
}

#[derive(Serialize)]
struct RequestContent<'a> {
    role: &'a str,
    parts: Vec<RequestPart<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
enum RequestPart<'a> {
    Text(&'a str),
    InlineData(InlineData),
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Serialize, Default)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_schema: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_modalities: Option<Vec<&'a str>>,
}

#[derive(Deserialize)]
struct ContentResponse {
    candidates: Option<Vec<Candidate>>,
    error: Option<ApiError>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponsePart {
    text: Option<String>,
    inline_data: Option<InlineData>,
}

#[derive(Deserialize, Debug)]
struct ApiError {
    message: String,
}

fn parse_predict_response(body: &str) -> Result<String, RemoteError> {
    let result: PredictResponse = serde_json::from_str(body).map_err(|e| {
        RemoteError::other(format!("Failed to parse Imagen response: {}. Body: {}", e, body))
    })?;
    result
        .predictions
        .into_iter()
        .find_map(|p| {
            let data = p.bytes_base64_encoded.filter(|d| !d.is_empty())?;
            let mime = p.mime_type.unwrap_or_else(|| "image/jpeg".to_string());
            Some(to_data_uri(&mime, &data))
        })
        .ok_or_else(|| RemoteError::other("Failed to generate image: no image returned"))
}

fn first_parts(body: &str) -> Result<Vec<ResponsePart>, RemoteError> {
    let result: ContentResponse = serde_json::from_str(body).map_err(|e| {
        RemoteError::other(format!("Failed to parse Gemini response: {}. Body: {}", e, body))
    })?;

    if let Some(err) = result.error {
        return Err(RemoteError::from_status(0, &err.message));
    }

    let first = result
        .candidates
        .and_then(|c| c.into_iter().next())
        .ok_or_else(|| RemoteError::other(format!("Gemini response empty. Body: {}", body)))?;

    match first.content {
        Some(content) if !content.parts.is_empty() => Ok(content.parts),
        _ => {
            let reason = first.finish_reason.as_deref().unwrap_or("UNKNOWN");
            Err(RemoteError::other(format!(
                "Gemini response empty. Finish reason: {}",
                reason
            )))
        }
    }
}

fn parse_text_response(body: &str) -> Result<String, RemoteError> {
    let text: String = first_parts(body)?
        .into_iter()
        .filter_map(|p| p.text)
        .collect();
    if text.is_empty() {
        return Err(RemoteError::other("Gemini response contained no text"));
    }
    Ok(text)
}

fn parse_edit_response(body: &str) -> Result<EditOutcome, RemoteError> {
    let parts = first_parts(body)?;
    if let Some(data) = parts.iter().find_map(|p| p.inline_data.as_ref()) {
        return Ok(EditOutcome::Image(to_data_uri(&data.mime_type, &data.data)));
    }
    if let Some(text) = parts.into_iter().find_map(|p| p.text.filter(|t| !t.is_empty())) {
        return Ok(EditOutcome::Text(text));
    }
    Err(RemoteError::other(
        "Failed to edit image: the model did not return an image",
    ))
}

#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
impl GenerativeClient for GeminiClient {
    async fn generate_image(
        &self,
        api_key: &str,
        prompt: &str,
        aspect_ratio: AspectRatio,
    ) -> Result<String, RemoteError> {
        let url = self.endpoint(&self.config.image_model, "predict")?;
        let body = PredictRequest {
            instances: vec![PredictInstance { prompt }],
            parameters: PredictParameters {
                sample_count: 1,
                aspect_ratio: aspect_ratio.as_str(),
                output_mime_type: "image/jpeg",
            },
        };
        let text = self.post(api_key, url, &body).await?;
        parse_predict_response(&text)
    }

    async fn edit_image(
        &self,
        api_key: &str,
        image: &InlineImage,
        instruction: &str,
    ) -> Result<EditOutcome, RemoteError> {
        let url = self.endpoint(&self.config.edit_model, "generateContent")?;
        let body = ContentRequest {
            contents: vec![RequestContent {
                role: "user",
                parts: vec![
                    RequestPart::InlineData(InlineData {
                        mime_type: image.mime_type.clone(),
                        data: image.data.clone(),
                    }),
                    RequestPart::Text(instruction),
                ],
            }],
            generation_config: Some(GenerationConfig {
                response_modalities: Some(vec!["IMAGE", "TEXT"]),
                ..Default::default()
            }),
        };
        let text = self.post(api_key, url, &body).await?;
        parse_edit_response(&text)
    }

    async fn generate_text(
        &self,
        api_key: &str,
        prompt: &str,
        schema: Option<&Value>,
    ) -> Result<String, RemoteError> {
        let url = self.endpoint(&self.config.text_model, "generateContent")?;
        let body = ContentRequest {
            contents: vec![RequestContent {
                role: "user",
                parts: vec![RequestPart::Text(prompt)],
            }],
            generation_config: schema.map(|schema| GenerationConfig {
                response_mime_type: Some("application/json"),
                response_schema: Some(schema),
                ..Default::default()
            }),
        };
        let text = self.post(api_key, url, &body).await?;
        parse_text_response(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::RemoteErrorKind;

    #[test]
    fn test_endpoint_joins_model_and_method() {
        let client = GeminiClient::new(GeminiConfig::default());
        let url = client.endpoint("imagen-4.0-generate-001", "predict").unwrap();
        assert_eq!(
            url.as_str(),
            "https://generativelanguage.googleapis.com/v1beta/models/imagen-4.0-generate-001:predict"
        );
    }

    #[test]
    fn test_content_request_shape() {
        let schema = serde_json::json!({"type": "ARRAY"});
        let body = ContentRequest {
            contents: vec![RequestContent {
                role: "user",
                parts: vec![
                    RequestPart::InlineData(InlineData {
                        mime_type: "image/png".to_string(),
                        data: "AAAA".to_string(),
                    }),
                    RequestPart::Text("make it blue"),
                ],
            }],
            generation_config: Some(GenerationConfig {
                response_mime_type: Some("application/json"),
                response_schema: Some(&schema),
                ..Default::default()
            }),
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["contents"][0]["parts"][0]["inlineData"]["mimeType"], "image/png");
        assert_eq!(json["contents"][0]["parts"][1]["text"], "make it blue");
        assert_eq!(json["generationConfig"]["responseMimeType"], "application/json");
        assert_eq!(json["generationConfig"]["responseSchema"]["type"], "ARRAY");
        assert!(json["generationConfig"].get("responseModalities").is_none());
    }

    #[test]
    fn test_predict_response_parsing() {
        let json = r#"{"predictions": [{"bytesBase64Encoded": "aGVsbG8=", "mimeType": "image/png"}]}"#;
        assert_eq!(
            parse_predict_response(json).unwrap(),
            "data:image/png;base64,aGVsbG8="
        );

        let err = parse_predict_response(r#"{"predictions": []}"#).unwrap_err();
        assert_eq!(err.kind, RemoteErrorKind::Other);
        // Filtered prompts come back without any predictions field.
        assert!(parse_predict_response("{}").is_err());
    }

    #[test]
    fn test_text_response_parsing() {
        let json = r#"{
            "candidates": [
                {
                    "content": {
                        "parts": [{ "text": "[\"a\"," }, { "text": " \"b\"]" }],
                        "role": "model"
                    },
                    "finishReason": "STOP"
                }
            ]
        }"#;
        assert_eq!(parse_text_response(json).unwrap(), "[\"a\", \"b\"]");
    }

    #[test]
    fn test_text_response_safety_block() {
        let json = r#"{"candidates": [{"finishReason": "SAFETY", "index": 0}]}"#;
        let err = parse_text_response(json).unwrap_err();
        assert!(err.message.contains("SAFETY"));
    }

    #[test]
    fn test_edit_response_prefers_image() {
        let json = r#"{
            "candidates": [{
                "content": {"parts": [
                    {"text": "Here you go"},
                    {"inlineData": {"mimeType": "image/png", "data": "AAAA"}}
                ]}
            }]
        }"#;
        assert_eq!(
            parse_edit_response(json).unwrap(),
            EditOutcome::Image("data:image/png;base64,AAAA".to_string())
        );
    }

    #[test]
    fn test_edit_response_text_only() {
        let json = r#"{"candidates": [{"content": {"parts": [{"text": "I can't edit that"}]}}]}"#;
        assert_eq!(
            parse_edit_response(json).unwrap(),
            EditOutcome::Text("I can't edit that".to_string())
        );
    }

    #[test]
    fn test_error_body_with_exhausted_quota() {
        let json = r#"{"error": {"message": "RESOURCE_EXHAUSTED: quota"}}"#;
        let err = parse_text_response(json).unwrap_err();
        assert_eq!(err.kind, RemoteErrorKind::RateLimited);
    }
}
