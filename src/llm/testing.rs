use std::collections::HashSet;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use image::{ImageBuffer, ImageFormat, Rgb};
use parking_lot::Mutex;

use crate::llm::{
    Embedder, GenerationError, ImageFetcher, ImageGenerator, ImageOutput, Services,
    TextCompleter, VisionDescriber,
};

pub fn png_bytes(width: u32, height: u32, rgb: [u8; 3]) -> Vec<u8> {
    let buffer = ImageBuffer::from_pixel(width, height, Rgb(rgb));
    let mut cursor = Cursor::new(Vec::new());
    buffer
        .write_to(&mut cursor, ImageFormat::Png)
        .expect("encode png");
    cursor.into_inner()
}

#[derive(Debug, Clone)]
pub struct RecordedGeneration {
    pub prompt: String,
    pub had_reference: bool,
}

#[derive(Default)]
pub struct FakeImageGenerator {
    calls: AtomicUsize,
    pub fail_always: bool,
    pub fail_on_calls: HashSet<usize>,
    pub return_urls: bool,
    pub recorded: Mutex<Vec<RecordedGeneration>>,
}

impl FakeImageGenerator {
    pub fn failing_on(calls: &[usize]) -> Self {
        FakeImageGenerator {
            fail_on_calls: calls.iter().copied().collect(),
            ..Default::default()
        }
    }

    pub fn always_failing() -> Self {
        FakeImageGenerator {
            fail_always: true,
            ..Default::default()
        }
    }

    pub fn returning_urls() -> Self {
        FakeImageGenerator {
            return_urls: true,
            ..Default::default()
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImageGenerator for FakeImageGenerator {
    async fn generate(
        &self,
        prompt: &str,
        reference: Option<&[u8]>,
    ) -> Result<ImageOutput, GenerationError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        self.recorded.lock().push(RecordedGeneration {
            prompt: prompt.to_string(),
            had_reference: reference.is_some(),
        });
        if self.fail_always || self.fail_on_calls.contains(&call) {
            return Err(GenerationError(format!("simulated failure on call {call}")));
        }
        if self.return_urls {
            return Ok(ImageOutput::Url(format!("https://images.test/{call}.png")));
        }
        let shade = (call * 17 % 255) as u8;
        Ok(ImageOutput::Bytes(png_bytes(8, 8, [shade, 120, 200])))
    }
}

#[derive(Default)]
pub struct FakeVision {
    pub fail: bool,
    pub mismatch: bool,
    pub calls: AtomicUsize,
}

#[async_trait]
impl VisionDescriber for FakeVision {
    async fn describe(&self, _image: &[u8], instructions: &str, _max_tokens: u32) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(anyhow!("vision service unavailable"));
        }
        if instructions.contains("\"matches\"") {
            return Ok(format!(
                "{{\"matches\": {}, \"feedback\": \"compared\"}}",
                !self.mismatch
            ));
        }
        if instructions.contains("character_features, objects, style") {
            return Ok("```json\n{\"character_features\": {\"hair\": \"brown curls\"}, \"objects\": \"wicker basket with bread\", \"style\": \"soft watercolor\"}\n```".to_string());
        }
        if instructions.contains("artistic style") {
            return Ok("Soft watercolor with warm pastel palette.".to_string());
        }
        Ok("A child with brown curly hair and green eyes.".to_string())
    }
}

#[derive(Default)]
pub struct FakeEmbedder {
    pub fail: bool,
}

pub fn bag_of_words(text: &str) -> Vec<f32> {
    let mut vector = vec![0.0f32; 32];
    for word in text
        .split(|ch: char| !ch.is_alphanumeric())
        .filter(|word| word.len() > 3)
    {
        let slot = word
            .to_lowercase()
            .bytes()
            .fold(7usize, |acc, byte| acc.wrapping_mul(31).wrapping_add(byte as usize))
            % vector.len();
        vector[slot] += 1.0;
    }
    vector
}

#[async_trait]
impl Embedder for FakeEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if self.fail {
            return Err(anyhow!("embedding service unavailable"));
        }
        Ok(bag_of_words(text))
    }
}

pub struct FakeText {
    pub reply: Result<String, String>,
    pub prompts: Mutex<Vec<String>>,
}

impl FakeText {
    pub fn replying(reply: &str) -> Self {
        FakeText {
            reply: Ok(reply.to_string()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        FakeText {
            reply: Err("text service unavailable".to_string()),
            prompts: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl TextCompleter for FakeText {
    async fn complete(&self, _system_prompt: &str, user_prompt: &str) -> Result<String> {
        self.prompts.lock().push(user_prompt.to_string());
        self.reply.clone().map_err(|err| anyhow!(err))
    }
}

#[derive(Default)]
pub struct FakeFetcher {
    pub fetched: Mutex<Vec<String>>,
}

#[async_trait]
impl ImageFetcher for FakeFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        self.fetched.lock().push(url.to_string());
        Ok(png_bytes(8, 8, [200, 30, 30]))
    }
}

pub struct FakeServices {
    pub images: Arc<FakeImageGenerator>,
    pub vision: Arc<FakeVision>,
    pub text: Arc<FakeText>,
    pub embeddings: Option<Arc<FakeEmbedder>>,
    pub fetcher: Arc<FakeFetcher>,
}

impl FakeServices {
    pub fn new(images: FakeImageGenerator, text: FakeText) -> Self {
        FakeServices {
            images: Arc::new(images),
            vision: Arc::new(FakeVision::default()),
            text: Arc::new(text),
            embeddings: Some(Arc::new(FakeEmbedder::default())),
            fetcher: Arc::new(FakeFetcher::default()),
        }
    }

    pub fn services(&self) -> Services {
        Services {
            images: self.images.clone(),
            vision: self.vision.clone(),
            text: self.text.clone(),
            embeddings: self
                .embeddings
                .clone()
                .map(|embedder| embedder as Arc<dyn Embedder>),
            fetcher: self.fetcher.clone(),
        }
    }
}
