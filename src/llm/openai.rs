use anyhow::{anyhow, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::config::Config;
use crate::llm::media::{detect_mime_type, image_data_url};
use crate::llm::{
    Embedder, GenerationError, ImageGenerator, ImageOutput, TextCompleter, VisionDescriber,
};
use crate::utils::http::get_http_client;
use crate::utils::json::parse_llm_json;
use crate::utils::text::truncate_for_log;
use crate::utils::timing::log_llm_timing;

const PROVIDER: &str = "openai";

#[derive(Debug, Clone)]
pub struct OpenAiClient {
    api_key: String,
    base_url: String,
    image_model: String,
    image_size: String,
    image_quality: String,
    vision_model: String,
    text_model: String,
    embedding_model: String,
    text_temperature: f32,
    text_max_tokens: u32,
}

fn summarize_error_body(body: &str) -> (Option<String>, String) {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return (None, "empty response body".to_string());
    }

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        let message = value
            .pointer("/error/message")
            .and_then(|v| v.as_str())
            .map(|v| v.to_string())
            .or_else(|| {
                value
                    .get("message")
                    .and_then(|v| v.as_str())
                    .map(|v| v.to_string())
            });
        return (message, truncate_for_log(&value.to_string(), 2000));
    }

    (None, truncate_for_log(trimmed, 2000))
}

fn extract_message_content(response: &Value) -> String {
    response
        .pointer("/choices/0/message/content")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .trim()
        .to_string()
}

fn extract_image_output(response: &Value) -> Option<ImageOutput> {
    let item = response.pointer("/data/0")?;
    if let Some(url) = item.get("url").and_then(|v| v.as_str()) {
        if !url.trim().is_empty() {
            return Some(ImageOutput::Url(url.to_string()));
        }
    }
    let encoded = item.get("b64_json").and_then(|v| v.as_str())?;
    general_purpose::STANDARD
        .decode(encoded.trim())
        .ok()
        .map(ImageOutput::Bytes)
}

fn extract_embedding(response: &Value) -> Option<Vec<f32>> {
    let values = response.pointer("/data/0/embedding")?.as_array()?;
    values
        .iter()
        .map(|value| value.as_f64().map(|number| number as f32))
        .collect()
}

impl OpenAiClient {
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(OpenAiClient {
            api_key: config.require_openai_api_key()?.to_string(),
            base_url: config.openai_base_url.trim_end_matches('/').to_string(),
            image_model: config.openai_image_model.clone(),
            image_size: config.openai_image_size.clone(),
            image_quality: config.openai_image_quality.clone(),
            vision_model: config.openai_vision_model.clone(),
            text_model: config.openai_text_model.clone(),
            embedding_model: config.openai_embedding_model.clone(),
            text_temperature: config.text_temperature,
            text_max_tokens: config.text_max_tokens,
        })
    }

    fn supports_reference_edits(&self) -> bool {
        self.image_model.starts_with("gpt-image")
    }

    async fn handle_response(&self, path: &str, response: reqwest::Response) -> Result<Value> {
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let (message, body_summary) = summarize_error_body(&body);
            warn!(
                "OpenAI API error: path={}, status={}, body={}",
                path, status, body_summary
            );
            let detail = message.unwrap_or(body_summary);
            return Err(anyhow!(
                "OpenAI request to {} failed with status {}: {}",
                path,
                status,
                detail
            ));
        }

        let value = response.json::<Value>().await?;
        debug!("OpenAI response received for {}", path);
        Ok(value)
    }

    async fn post_json(&self, path: &str, payload: &Value) -> Result<Value> {
        debug!(
            "OpenAI request: path={}, model={}",
            path,
            payload
                .get("model")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown")
        );
        let response = get_http_client()
            .post(format!("{}{}", self.base_url, path))
            .bearer_auth(&self.api_key)
            .json(payload)
            .send()
            .await?;
        self.handle_response(path, response).await
    }

    async fn post_image_edit(&self, prompt: &str, reference: &[u8]) -> Result<Value> {
        let mime_type = detect_mime_type(reference).unwrap_or_else(|| "image/png".to_string());
        let extension = mime_type.rsplit('/').next().unwrap_or("png").to_string();
        let image_part = reqwest::multipart::Part::bytes(reference.to_vec())
            .file_name(format!("reference.{extension}"))
            .mime_str(&mime_type)?;
        let form = reqwest::multipart::Form::new()
            .text("model", self.image_model.clone())
            .text("prompt", prompt.to_string())
            .text("size", self.image_size.clone())
            .text("n", "1")
            .part("image", image_part);

        let response = get_http_client()
            .post(format!("{}/images/edits", self.base_url))
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await?;
        self.handle_response("/images/edits", response).await
    }

    async fn chat(
        &self,
        model: &str,
        messages: Vec<Value>,
        max_tokens: u32,
        json_mode: bool,
    ) -> Result<String> {
        let mut payload = json!({
            "model": model,
            "messages": messages,
            "max_tokens": max_tokens,
        });
        if json_mode {
            payload["response_format"] = json!({ "type": "json_object" });
        }
        let response = self.post_json("/chat/completions", &payload).await?;
        let content = extract_message_content(&response);
        if content.is_empty() {
            warn!(
                "OpenAI chat response had empty content: {}",
                truncate_for_log(&response.to_string(), 2000)
            );
        }
        Ok(content)
    }

    fn vision_messages(image: &[u8], instructions: &str) -> Vec<Value> {
        vec![json!({
            "role": "user",
            "content": [
                { "type": "text", "text": instructions },
                { "type": "image_url", "image_url": { "url": image_data_url(image) } }
            ]
        })]
    }
}

#[async_trait]
impl ImageGenerator for OpenAiClient {
    async fn generate(
        &self,
        prompt: &str,
        reference: Option<&[u8]>,
    ) -> Result<ImageOutput, GenerationError> {
        let use_edit = reference.is_some() && self.supports_reference_edits();
        if reference.is_some() && !use_edit {
            debug!(
                "Model {} cannot condition on a reference image; relying on prompt text",
                self.image_model
            );
        }
        let operation = if use_edit { "image_edit" } else { "image_generation" };
        let metadata = json!({ "prompt_chars": prompt.chars().count(), "reference": use_edit });

        let response = log_llm_timing(
            PROVIDER,
            &self.image_model,
            operation,
            Some(metadata),
            || async {
                match reference {
                    Some(reference) if use_edit => self.post_image_edit(prompt, reference).await,
                    _ => {
                        let payload = json!({
                            "model": self.image_model,
                            "prompt": prompt,
                            "size": self.image_size,
                            "quality": self.image_quality,
                            "n": 1,
                        });
                        self.post_json("/images/generations", &payload).await
                    }
                }
            },
        )
        .await
        .map_err(|err| GenerationError(err.to_string()))?;

        extract_image_output(&response).ok_or_else(|| {
            GenerationError(format!(
                "No image returned by OpenAI (model: {})",
                self.image_model
            ))
        })
    }
}

#[async_trait]
impl VisionDescriber for OpenAiClient {
    async fn describe(&self, image: &[u8], instructions: &str, max_tokens: u32) -> Result<String> {
        let messages = Self::vision_messages(image, instructions);
        log_llm_timing(PROVIDER, &self.vision_model, "vision_describe", None, || {
            self.chat(&self.vision_model, messages, max_tokens, false)
        })
        .await
    }

    async fn describe_structured(
        &self,
        image: &[u8],
        instructions: &str,
        max_tokens: u32,
    ) -> Result<Value> {
        let messages = Self::vision_messages(image, instructions);
        let text = log_llm_timing(PROVIDER, &self.vision_model, "vision_structured", None, || {
            self.chat(&self.vision_model, messages, max_tokens, true)
        })
        .await?;
        Ok(parse_llm_json(&text).unwrap_or(Value::String(text)))
    }
}

#[async_trait]
impl Embedder for OpenAiClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let payload = json!({ "model": self.embedding_model, "input": text });
        let response = log_llm_timing(PROVIDER, &self.embedding_model, "embedding", None, || {
            self.post_json("/embeddings", &payload)
        })
        .await?;
        extract_embedding(&response)
            .filter(|embedding| !embedding.is_empty())
            .ok_or_else(|| anyhow!("Embedding response did not contain a vector"))
    }
}

#[async_trait]
impl TextCompleter for OpenAiClient {
    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<String> {
        let payload = json!({
            "model": self.text_model,
            "messages": [
                { "role": "system", "content": system_prompt },
                { "role": "user", "content": user_prompt }
            ],
            "max_tokens": self.text_max_tokens,
            "temperature": self.text_temperature,
        });
        let response = log_llm_timing(PROVIDER, &self.text_model, "page_text", None, || {
            self.post_json("/chat/completions", &payload)
        })
        .await?;
        Ok(extract_message_content(&response))
    }
}
