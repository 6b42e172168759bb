use std::path::PathBuf;

use anyhow::Result;
use tracing::{error, info, warn};

use crate::jobs::{JobError, JobHandle, JobStage};
use crate::llm::Services;
use crate::pipeline::analyzer::{
    describe_face, describe_master_character, describe_photo, describe_style,
    extract_consistency, verify_against_master,
};
use crate::pipeline::memory::{ConsistencyMemory, ConsistencyRecord};
use crate::pipeline::narrative::{generate_page_text, NarrativeRequest};
use crate::pipeline::prompt::{cover_prompt, rag_notes, retrieval_query, DependentPrompt};
use crate::pipeline::storage::{ImageStore, PageImage};
use crate::pipeline::PipelineSettings;
use crate::stories::{PageTemplate, StoryDefinition, StoryId, LIBRARY};
use crate::utils::text::{char_prefix, truncate_for_log};

#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub job_id: String,
    pub story: StoryId,
    pub gender: String,
    pub character_name: String,
    pub photo: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct MasterReference {
    pub image: PageImage,
    pub description: String,
    pub style: String,
}

#[derive(Debug, Clone)]
pub struct PageResult {
    pub page_number: u32,
    pub description: String,
    pub image: Option<PageImage>,
    pub narrative: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct GenerationOutcome {
    pub story_title: String,
    pub character_name: String,
    pub pages: Vec<PageResult>,
    pub success: bool,
    pub completed_pages: usize,
    pub failed_pages: usize,
    pub errors: Vec<String>,
}

impl GenerationOutcome {
    pub fn image_count(&self) -> usize {
        self.pages.iter().filter(|page| page.image.is_some()).count()
    }
}

struct JobContext<'a> {
    story: &'a StoryDefinition,
    character_name: &'a str,
    total_pages: usize,
    master: MasterReference,
    memory: ConsistencyMemory,
    previous_face: Option<String>,
    store: ImageStore,
}

pub struct Orchestrator {
    services: Services,
    settings: PipelineSettings,
    work_dir: PathBuf,
}

impl Orchestrator {
    pub fn new(
        services: Services,
        settings: PipelineSettings,
        work_dir: impl Into<PathBuf>,
    ) -> Self {
        Orchestrator {
            services,
            settings,
            work_dir: work_dir.into(),
        }
    }

    pub async fn run(
        &self,
        request: &GenerationRequest,
        progress: &JobHandle,
    ) -> Result<GenerationOutcome, JobError> {
        let story = LIBRARY.story(request.story);
        let templates = LIBRARY.templates(request.story, &request.gender);
        let total_pages = templates.len();
        let store = ImageStore::new(&self.work_dir, &request.job_id);

        progress.advance(JobStage::Analyzing, "Analyzing your photo...");
        let photo_appearance = describe_photo(self.services.vision.as_ref(), &request.photo).await;
        info!(
            "Photo appearance: {}",
            truncate_for_log(&photo_appearance, 200)
        );

        progress.advance(JobStage::GeneratingReference, "Generating cover page...");
        let master_image = self
            .establish_reference(
                story,
                &templates[0],
                &photo_appearance,
                &request.photo,
                &store,
            )
            .await
            .map_err(|err| {
                error!("Master reference generation failed: {:#}", err);
                JobError::ReferenceGeneration(format!("{err:#}"))
            })?;

        progress.advance(
            JobStage::ExtractingReferenceDetails,
            "Extracting master reference details...",
        );
        let master = self.describe_reference(master_image, &photo_appearance).await;

        let mut ctx = JobContext {
            story,
            character_name: &request.character_name,
            total_pages,
            master,
            memory: ConsistencyMemory::new(),
            previous_face: None,
            store,
        };

        let cover_narrative = self.narrative_for(&ctx, &templates[0], 0).await;
        let mut pages = vec![PageResult {
            page_number: templates[0].page_number,
            description: templates[0].scene_description.clone(),
            image: Some(ctx.master.image.clone()),
            narrative: cover_narrative,
        }];
        let mut completed_pages = 1;
        let mut errors = Vec::new();

        progress.advance(JobStage::GeneratingPages, "Generating story pages...");
        progress.set_progress(completed_pages, total_pages, "Cover page completed");

        for (index, template) in templates.iter().enumerate().skip(1) {
            progress.set_progress(
                completed_pages,
                total_pages,
                format!(
                    "Generating page {}: {}",
                    index + 1,
                    template.scene_description
                ),
            );
            match self.generate_page(&mut ctx, index, template).await {
                Ok(page) => {
                    completed_pages += 1;
                    pages.push(page);
                    info!(
                        "Completed image {}/{} for job {}",
                        index + 1,
                        total_pages,
                        request.job_id
                    );
                }
                Err(err) => {
                    error!("Error generating page {}/{}: {:#}", index + 1, total_pages, err);
                    errors.push(format!("Page {}: {err:#}", index + 1));
                    pages.push(PageResult {
                        page_number: template.page_number,
                        description: template.scene_description.clone(),
                        image: None,
                        narrative: Vec::new(),
                    });
                }
            }
            progress.set_progress(
                completed_pages,
                total_pages,
                format!("Page {} of {} processed", index + 1, total_pages),
            );
        }

        let failed_pages = total_pages - completed_pages;
        Ok(GenerationOutcome {
            story_title: story.title.clone(),
            character_name: request.character_name.clone(),
            pages,
            success: failed_pages == 0,
            completed_pages,
            failed_pages,
            errors,
        })
    }

    async fn establish_reference(
        &self,
        story: &StoryDefinition,
        cover: &PageTemplate,
        photo_appearance: &str,
        photo: &[u8],
        store: &ImageStore,
    ) -> Result<PageImage> {
        let prompt = cover_prompt(story, cover, photo_appearance, self.settings.max_prompt_chars);
        let output = self.services.images.generate(&prompt, Some(photo)).await?;
        let bytes = self.services.resolve_image(output).await?;
        let image = store.save_master(bytes).await?;
        info!("Master reference image saved: {}", image.path.display());
        Ok(image)
    }

    async fn describe_reference(&self, image: PageImage, photo_appearance: &str) -> MasterReference {
        let vision = self.services.vision.as_ref();
        let description = match describe_master_character(vision, &image.bytes).await {
            Some(description) => description,
            None => {
                warn!("Using photo appearance as the master reference description");
                photo_appearance.to_string()
            }
        };
        let style = match describe_style(vision, &image.bytes).await {
            Ok(style) => style,
            Err(err) => {
                warn!("Style extraction failed, using default style: {}", err);
                self.settings.default_style.clone()
            }
        };
        MasterReference {
            image,
            description,
            style,
        }
    }

    async fn narrative_for(
        &self,
        ctx: &JobContext<'_>,
        template: &PageTemplate,
        index: usize,
    ) -> Vec<String> {
        let request = NarrativeRequest {
            template,
            story_title: &ctx.story.title,
            character_name: ctx.character_name,
            page_number: index + 1,
            total_pages: ctx.total_pages,
        };
        generate_page_text(self.services.text.as_ref(), &request).await
    }

    async fn generate_page(
        &self,
        ctx: &mut JobContext<'_>,
        index: usize,
        template: &PageTemplate,
    ) -> Result<PageResult> {
        let query = retrieval_query(template);
        let notes = {
            let records = ctx
                .memory
                .retrieve_relevant_context(
                    self.services.embeddings.as_deref(),
                    &query,
                    self.settings.rag_top_k,
                )
                .await;
            rag_notes(&records)
        };

        let prompt = DependentPrompt {
            story: ctx.story,
            template,
            master_description: Some(ctx.master.description.as_str()),
            style_description: &ctx.master.style,
            rag_notes: notes.as_deref(),
            previous_page: ctx.previous_face.as_deref(),
        }
        .render(self.settings.max_prompt_chars);
        info!(
            "Generating page {}/{} ({} prompt chars)",
            index + 1,
            ctx.total_pages,
            prompt.chars().count()
        );

        let output = self.services.images.generate(&prompt, None).await?;
        let bytes = self.services.resolve_image(output).await?;
        let image = ctx.store.save_page(index, bytes).await?;

        let vision = self.services.vision.as_ref();
        // Verdict is logged only; a mismatched page is still kept.
        if self.settings.enable_page_verification {
            let verdict =
                verify_against_master(vision, &image.bytes, &ctx.master.description).await;
            if verdict.matches {
                info!(
                    "Page {} matches the master reference: {}",
                    index + 1,
                    verdict.feedback
                );
            } else {
                warn!(
                    "Page {} may not match the master reference (accepted): {}",
                    index + 1,
                    verdict.feedback
                );
            }
        }

        self.record_consistency(ctx, template, &query, &image).await;

        let has_next_page = index + 1 < ctx.total_pages;
        if self.settings.enable_previous_page_continuity && has_next_page {
            ctx.previous_face = describe_face(vision, &image.bytes).await;
        }

        let narrative = self.narrative_for(ctx, template, index).await;
        Ok(PageResult {
            page_number: template.page_number,
            description: template.scene_description.clone(),
            image: Some(image),
            narrative,
        })
    }

    async fn record_consistency(
        &self,
        ctx: &mut JobContext<'_>,
        template: &PageTemplate,
        query: &str,
        image: &PageImage,
    ) {
        let details = match extract_consistency(
            self.services.vision.as_ref(),
            &image.bytes,
            &template.scene_description,
            ctx.story,
        )
        .await
        {
            Ok(details) => details,
            Err(err) => {
                warn!(
                    "Skipping consistency record for page {}: {:#}",
                    template.page_number, err
                );
                return;
            }
        };

        let mut context_text = query.to_string();
        for extra in [&details.character_features, &details.objects] {
            if !extra.is_empty() {
                context_text.push(' ');
                context_text.push_str(extra);
            }
        }

        let embedding = match &self.services.embeddings {
            Some(embedder) => match embedder.embed(&context_text).await {
                Ok(embedding) => embedding,
                Err(err) => {
                    warn!(
                        "Embedding failed for page {}, storing unranked: {}",
                        template.page_number, err
                    );
                    Vec::new()
                }
            },
            None => Vec::new(),
        };

        info!(
            "Storing consistency record for page {}: {}",
            template.page_number,
            char_prefix(&context_text, 80)
        );
        ctx.memory.append(ConsistencyRecord {
            page_number: template.page_number,
            character_features: details.character_features,
            objects: details.objects,
            style: details.style,
            embedding,
            source_page_description: template.scene_description.clone(),
            context_text,
        });
    }
}
