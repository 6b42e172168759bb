use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use image::{DynamicImage, GenericImageView};
use reqwest::StatusCode;
use tracing::{error, warn};

use crate::llm::ImageFetcher;
use crate::utils::http::get_http_client;
use crate::utils::text::truncate_for_log;

pub fn detect_mime_type(data: &[u8]) -> Option<String> {
    infer::get(data).map(|kind| kind.mime_type().to_string())
}

pub fn image_data_url(data: &[u8]) -> String {
    use base64::{engine::general_purpose, Engine as _};

    let mime_type = detect_mime_type(data)
        .filter(|mime| mime.starts_with("image/"))
        .unwrap_or_else(|| "image/png".to_string());
    let encoded = general_purpose::STANDARD.encode(data);
    format!("data:{};base64,{}", mime_type, encoded)
}

#[derive(Debug, Clone)]
pub struct DecodedImage {
    pub image: DynamicImage,
    pub width: u32,
    pub height: u32,
}

pub fn decode_image(data: &[u8]) -> Result<DecodedImage> {
    let image =
        image::load_from_memory(data).map_err(|err| anyhow!("Failed to decode image: {err}"))?;
    let (width, height) = image.dimensions();
    Ok(DecodedImage {
        image,
        width,
        height,
    })
}

const MEDIA_DOWNLOAD_MAX_ATTEMPTS: usize = 3;
const MEDIA_DOWNLOAD_BASE_DELAY_MS: u64 = 400;
const MEDIA_DOWNLOAD_ERROR_BODY_LIMIT: usize = 800;

fn should_retry_status(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
}

fn should_retry_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect()
}

fn retry_delay(attempt: usize) -> Duration {
    Duration::from_millis(MEDIA_DOWNLOAD_BASE_DELAY_MS << attempt)
}

pub async fn download_media(url: &str, timeout: Duration) -> Result<Vec<u8>> {
    let parsed = url::Url::parse(url).map_err(|err| anyhow!("Invalid media URL: {err}"))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(anyhow!("Unsupported media URL scheme: {}", parsed.scheme()));
    }

    let client = get_http_client();
    let mut last_error = anyhow!("Media download did not run");
    for attempt in 0..MEDIA_DOWNLOAD_MAX_ATTEMPTS {
        let response = match client.get(parsed.clone()).timeout(timeout).send().await {
            Ok(resp) => resp,
            Err(err) => {
                warn!(
                    "Failed to fetch media: {err} (timeout={}, connect={}, status={:?}, attempt={}/{})",
                    err.is_timeout(),
                    err.is_connect(),
                    err.status(),
                    attempt + 1,
                    MEDIA_DOWNLOAD_MAX_ATTEMPTS
                );
                let retry = should_retry_error(&err);
                last_error = anyhow!("Media download failed: {err}");
                if !retry || attempt + 1 == MEDIA_DOWNLOAD_MAX_ATTEMPTS {
                    return Err(last_error);
                }
                tokio::time::sleep(retry_delay(attempt)).await;
                continue;
            }
        };

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!(
                "Media download failed with status {}: {}",
                status,
                truncate_for_log(&body, MEDIA_DOWNLOAD_ERROR_BODY_LIMIT)
            );
            last_error = anyhow!("Media download failed with status {}", status);
            if !should_retry_status(status) || attempt + 1 == MEDIA_DOWNLOAD_MAX_ATTEMPTS {
                return Err(last_error);
            }
            tokio::time::sleep(retry_delay(attempt)).await;
            continue;
        }

        match response.bytes().await {
            Ok(bytes) => return Ok(bytes.to_vec()),
            Err(err) => {
                error!(
                    "Failed to read media bytes: {err} (attempt={}/{})",
                    attempt + 1,
                    MEDIA_DOWNLOAD_MAX_ATTEMPTS
                );
                last_error = anyhow!("Failed to read media bytes: {err}");
                if attempt + 1 < MEDIA_DOWNLOAD_MAX_ATTEMPTS {
                    tokio::time::sleep(retry_delay(attempt)).await;
                }
            }
        }
    }

    Err(last_error)
}

#[derive(Debug, Clone)]
pub struct HttpImageFetcher {
    timeout: Duration,
}

impl HttpImageFetcher {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl ImageFetcher for HttpImageFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let bytes = download_media(url, self.timeout).await?;
        decode_image(&bytes)?;
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::png_bytes;

    #[test]
    fn data_url_uses_sniffed_mime_type() {
        let png = png_bytes(4, 4, [10, 20, 30]);
        assert!(image_data_url(&png).starts_with("data:image/png;base64,"));
    }

    #[test]
    fn decode_reports_dimensions() {
        let decoded = decode_image(&png_bytes(7, 3, [0, 0, 0])).expect("decode");
        assert_eq!((decoded.width, decoded.height), (7, 3));
    }

    #[test]
    fn decode_rejects_non_images() {
        assert!(decode_image(b"definitely not an image").is_err());
    }

    #[tokio::test]
    async fn download_rejects_non_http_urls() {
        let err = download_media("file:///etc/passwd", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Unsupported media URL scheme"));
    }
}
