use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::pipeline::narrative::MAX_NARRATIVE_SENTENCES;
use crate::pipeline::GenerationOutcome;

const COVER_FALLBACK: &str = "Once upon a time...";
const PAGE_FALLBACK: &str = "And so the story continued...";

#[async_trait]
pub trait BookAssembler: Send + Sync {
    async fn assemble(&self, job_id: &str, outcome: &GenerationOutcome) -> Result<PathBuf>;
}

#[derive(Debug, Clone, Serialize)]
pub struct ManifestPage {
    pub page_number: u32,
    pub description: String,
    pub image: PathBuf,
    pub width: u32,
    pub height: u32,
    pub narrative: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BookManifest {
    pub job_id: String,
    pub title: String,
    pub story_title: String,
    pub character_name: String,
    pub generated_at: DateTime<Utc>,
    pub pages: Vec<ManifestPage>,
    pub failed_pages: usize,
    pub errors: Vec<String>,
}

fn page_narrative(narrative: &[String], is_cover: bool) -> Vec<String> {
    let sentences: Vec<String> = narrative
        .iter()
        .map(|sentence| sentence.trim())
        .filter(|sentence| !sentence.is_empty())
        .take(MAX_NARRATIVE_SENTENCES)
        .map(str::to_string)
        .collect();
    if !sentences.is_empty() {
        return sentences;
    }
    let fallback = if is_cover { COVER_FALLBACK } else { PAGE_FALLBACK };
    vec![fallback.to_string()]
}

pub async fn build_manifest(job_id: &str, outcome: &GenerationOutcome) -> Result<BookManifest> {
    let mut pages = Vec::with_capacity(outcome.pages.len());
    for page in &outcome.pages {
        let Some(image) = &page.image else {
            continue;
        };
        let exists = tokio::fs::try_exists(&image.path).await.unwrap_or(false);
        if !exists {
            return Err(anyhow!(
                "Image for page {} is missing: {}",
                page.page_number,
                image.path.display()
            ));
        }
        pages.push(ManifestPage {
            page_number: page.page_number,
            description: page.description.clone(),
            image: image.path.clone(),
            width: image.width,
            height: image.height,
            narrative: page_narrative(&page.narrative, page.page_number == 0),
        });
    }
    if pages.is_empty() {
        return Err(anyhow!("No page images to assemble"));
    }

    Ok(BookManifest {
        job_id: job_id.to_string(),
        title: format!("{} featuring {}", outcome.story_title, outcome.character_name),
        story_title: outcome.story_title.clone(),
        character_name: outcome.character_name.clone(),
        generated_at: Utc::now(),
        pages,
        failed_pages: outcome.failed_pages,
        errors: outcome.errors.clone(),
    })
}

#[derive(Debug, Clone)]
pub struct ManifestAssembler {
    output_dir: PathBuf,
}

impl ManifestAssembler {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        ManifestAssembler {
            output_dir: output_dir.into(),
        }
    }
}

#[async_trait]
impl BookAssembler for ManifestAssembler {
    async fn assemble(&self, job_id: &str, outcome: &GenerationOutcome) -> Result<PathBuf> {
        let manifest = build_manifest(job_id, outcome).await?;
        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .with_context(|| format!("Failed to create {}", self.output_dir.display()))?;
        let path = self.output_dir.join(format!("storybook_{job_id}.json"));
        let body = serde_json::to_vec_pretty(&manifest)?;
        tokio::fs::write(&path, body)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        info!(
            "Assembled storybook '{}' with {} pages: {}",
            manifest.title,
            manifest.pages.len(),
            path.display()
        );
        Ok(path)
    }
}
