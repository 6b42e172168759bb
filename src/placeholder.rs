use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use futures_util::stream::{self, StreamExt, TryStreamExt};
use image::{ImageBuffer, Rgb};
use tracing::info;

use crate::pipeline::narrative::{fallback_narrative, NarrativeRequest};
use crate::stories::{validate_character_name, PageTemplate, StoryId, LIBRARY};

const PAGE_SIZE: u32 = 512;
const BORDER: u32 = 16;

#[derive(Debug, Clone)]
pub struct PlaceholderPage {
    pub page_number: u32,
    pub path: PathBuf,
    pub narrative: String,
}

fn page_colour(page_number: u32) -> Rgb<u8> {
    let step = page_number.wrapping_mul(37) as u8;
    Rgb([
        120u8.wrapping_add(step),
        170u8.wrapping_add(step / 2),
        210u8.wrapping_sub(step / 3),
    ])
}

fn render_page(path: &Path, page_number: u32) -> Result<()> {
    let fill = page_colour(page_number);
    let edge = Rgb([fill[0] / 2, fill[1] / 2, fill[2] / 2]);
    let buffer = ImageBuffer::from_fn(PAGE_SIZE, PAGE_SIZE, |x, y| {
        let inner = BORDER..PAGE_SIZE - BORDER;
        if !inner.contains(&x) || !inner.contains(&y) {
            edge
        } else {
            fill
        }
    });
    buffer
        .save(path)
        .with_context(|| format!("Failed to write {}", path.display()))
}

async fn render_template(
    template: PageTemplate,
    story: StoryId,
    story_title: String,
    character_name: String,
    total_pages: usize,
    output_dir: PathBuf,
) -> Result<PlaceholderPage> {
    let path = output_dir.join(format!(
        "placeholder_{}_{:02}.png",
        story, template.page_number
    ));
    let page_number = template.page_number;
    let target = path.clone();
    tokio::task::spawn_blocking(move || render_page(&target, page_number)).await??;

    let narrative = fallback_narrative(&NarrativeRequest {
        template: &template,
        story_title: &story_title,
        character_name: &character_name,
        page_number: page_number as usize + 1,
        total_pages,
    });
    Ok(PlaceholderPage {
        page_number,
        path,
        narrative,
    })
}

pub async fn generate_placeholder_book(
    story: StoryId,
    character_name: &str,
    output_dir: &Path,
    workers: usize,
) -> Result<Vec<PlaceholderPage>> {
    let character_name = validate_character_name(character_name)?;
    let definition = LIBRARY.story(story);
    let templates = LIBRARY.templates(story, &definition.default_gender);
    let total_pages = templates.len();
    tokio::fs::create_dir_all(output_dir)
        .await
        .with_context(|| format!("Failed to create {}", output_dir.display()))?;

    let mut pages: Vec<PlaceholderPage> = stream::iter(templates)
        .map(|template| {
            render_template(
                template,
                story,
                definition.title.clone(),
                character_name.clone(),
                total_pages,
                output_dir.to_path_buf(),
            )
        })
        .buffer_unordered(workers.max(1))
        .try_collect()
        .await?;
    pages.sort_by_key(|page| page.page_number);

    info!(
        "Rendered {} placeholder pages for {} into {}",
        pages.len(),
        story,
        output_dir.display()
    );
    Ok(pages)
}
