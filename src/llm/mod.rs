pub mod media;
pub mod openai;
#[cfg(test)]
pub mod testing;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use crate::utils::json::parse_llm_json;

pub use media::HttpImageFetcher;
pub use openai::OpenAiClient;

#[derive(Debug, thiserror::Error)]
#[error("Image generation failed: {0}")]
pub struct GenerationError(pub String);

#[derive(Debug, Clone)]
pub enum ImageOutput {
    Url(String),
    Bytes(Vec<u8>),
}

#[async_trait]
pub trait ImageGenerator: Send + Sync {
    async fn generate(
        &self,
        prompt: &str,
        reference: Option<&[u8]>,
    ) -> Result<ImageOutput, GenerationError>;
}

#[async_trait]
pub trait VisionDescriber: Send + Sync {
    async fn describe(&self, image: &[u8], instructions: &str, max_tokens: u32) -> Result<String>;

    async fn describe_structured(
        &self,
        image: &[u8],
        instructions: &str,
        max_tokens: u32,
    ) -> Result<Value> {
        let text = self.describe(image, instructions, max_tokens).await?;
        Ok(parse_llm_json(&text).unwrap_or(Value::String(text)))
    }
}

#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

#[async_trait]
pub trait TextCompleter: Send + Sync {
    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<String>;
}

#[async_trait]
pub trait ImageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

#[derive(Clone)]
pub struct Services {
    pub images: Arc<dyn ImageGenerator>,
    pub vision: Arc<dyn VisionDescriber>,
    pub text: Arc<dyn TextCompleter>,
    pub embeddings: Option<Arc<dyn Embedder>>,
    pub fetcher: Arc<dyn ImageFetcher>,
}

impl Services {
    pub fn openai(client: OpenAiClient, fetcher: HttpImageFetcher, enable_embeddings: bool) -> Self {
        let client = Arc::new(client);
        let embeddings: Option<Arc<dyn Embedder>> = if enable_embeddings {
            Some(client.clone() as Arc<dyn Embedder>)
        } else {
            None
        };
        Services {
            images: client.clone(),
            vision: client.clone(),
            text: client,
            embeddings,
            fetcher: Arc::new(fetcher),
        }
    }

    pub async fn resolve_image(&self, output: ImageOutput) -> Result<Vec<u8>> {
        match output {
            ImageOutput::Bytes(bytes) => Ok(bytes),
            ImageOutput::Url(url) => self.fetcher.fetch(&url).await,
        }
    }
}
