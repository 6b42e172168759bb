use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::assembly::BookAssembler;
use crate::llm::media::decode_image;
use crate::pipeline::{GenerationRequest, Orchestrator};
use crate::stories::{validate_character_name, StoryError, StoryId, LIBRARY};
use crate::utils::timing::JobTimer;

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum JobError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Failed to generate the master reference image: {0}")]
    ReferenceGeneration(String),
    #[error("No images were generated")]
    NoImages,
    #[error("Failed to assemble the storybook: {0}")]
    Assembly(String),
}

impl From<StoryError> for JobError {
    fn from(err: StoryError) -> Self {
        JobError::InvalidRequest(err.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStage {
    Analyzing,
    GeneratingReference,
    ExtractingReferenceDetails,
    GeneratingPages,
    Assembling,
    Complete,
    Error,
}

impl JobStage {
    fn position(self) -> u8 {
        match self {
            JobStage::Analyzing => 0,
            JobStage::GeneratingReference => 1,
            JobStage::ExtractingReferenceDetails => 2,
            JobStage::GeneratingPages => 3,
            JobStage::Assembling => 4,
            JobStage::Complete => 5,
            JobStage::Error => u8::MAX,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStage::Complete | JobStage::Error)
    }

    pub fn can_advance_to(self, next: JobStage) -> bool {
        if self.is_terminal() {
            return false;
        }
        if next == JobStage::Error {
            return true;
        }
        next.position() == self.position() || next.position() == self.position() + 1
    }

    pub fn status(self) -> JobStatus {
        match self {
            JobStage::Analyzing => JobStatus::Analyzing,
            JobStage::Complete => JobStatus::Complete,
            JobStage::Error => JobStatus::Error,
            _ => JobStatus::Generating,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Analyzing,
    Generating,
    Complete,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobSnapshot {
    pub id: String,
    pub status: JobStatus,
    pub stage: JobStage,
    pub progress: usize,
    pub total: usize,
    pub current_step: String,
    pub error: Option<String>,
    pub artifact: Option<PathBuf>,
    pub updated_at: DateTime<Utc>,
}

impl JobSnapshot {
    fn new(id: &str, total: usize) -> Self {
        JobSnapshot {
            id: id.to_string(),
            status: JobStatus::Analyzing,
            stage: JobStage::Analyzing,
            progress: 0,
            total,
            current_step: "Starting...".to_string(),
            error: None,
            artifact: None,
            updated_at: Utc::now(),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.stage.is_terminal()
    }
}

#[derive(Debug)]
pub struct JobHandle {
    id: String,
    sender: watch::Sender<JobSnapshot>,
}

impl JobHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    fn transition(
        &self,
        stage: JobStage,
        step: String,
        payload: impl FnOnce(&mut JobSnapshot),
    ) -> bool {
        let accepted = self.sender.send_if_modified(|snapshot| {
            if !snapshot.stage.can_advance_to(stage) {
                return false;
            }
            snapshot.stage = stage;
            snapshot.status = stage.status();
            snapshot.current_step = step;
            payload(snapshot);
            snapshot.updated_at = Utc::now();
            true
        });
        if !accepted {
            warn!("Job {} rejected transition to {:?}", self.id, stage);
        }
        accepted
    }

    pub fn advance(&self, stage: JobStage, step: impl Into<String>) -> bool {
        self.transition(stage, step.into(), |_| {})
    }

    pub fn set_progress(&self, progress: usize, total: usize, step: impl Into<String>) {
        let step = step.into();
        self.sender.send_if_modified(|snapshot| {
            if snapshot.stage.is_terminal() {
                return false;
            }
            snapshot.progress = progress.min(total);
            snapshot.total = total;
            snapshot.current_step = step;
            snapshot.updated_at = Utc::now();
            true
        });
    }

    pub fn complete(&self, artifact: PathBuf) -> bool {
        self.transition(JobStage::Complete, "Storybook ready".to_string(), |snapshot| {
            snapshot.progress = snapshot.total;
            snapshot.artifact = Some(artifact);
        })
    }

    pub fn fail(&self, message: impl Into<String>) -> bool {
        let message = message.into();
        let step = format!("Error: {message}");
        self.transition(JobStage::Error, step, |snapshot| {
            snapshot.error = Some(message);
        })
    }
}

impl Drop for JobHandle {
    fn drop(&mut self) {
        let finished = self.sender.borrow().stage.is_terminal();
        if !finished {
            self.fail("worker stopped unexpectedly");
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct JobRegistry {
    jobs: Arc<RwLock<HashMap<String, watch::Receiver<JobSnapshot>>>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, total: usize) -> JobHandle {
        let id = Uuid::new_v4().to_string();
        let (sender, receiver) = watch::channel(JobSnapshot::new(&id, total));
        self.jobs.write().insert(id.clone(), receiver);
        JobHandle { id, sender }
    }

    pub fn snapshot(&self, id: &str) -> Option<JobSnapshot> {
        self.jobs
            .read()
            .get(id)
            .map(|receiver| receiver.borrow().clone())
    }

    pub fn subscribe(&self, id: &str) -> Option<watch::Receiver<JobSnapshot>> {
        self.jobs.read().get(id).cloned()
    }

    pub fn remove(&self, id: &str) -> bool {
        self.jobs.write().remove(id).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.read().is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct StartRequest {
    pub story: String,
    pub gender: String,
    pub character_name: String,
    pub photo: Vec<u8>,
}

impl StartRequest {
    fn validate(self, job_id: &str) -> Result<GenerationRequest, JobError> {
        let story: StoryId = self.story.parse()?;
        let character_name = validate_character_name(&self.character_name)?;
        decode_image(&self.photo)
            .map_err(|err| JobError::InvalidRequest(format!("photo is not a readable image: {err}")))?;
        Ok(GenerationRequest {
            job_id: job_id.to_string(),
            story,
            gender: self.gender.trim().to_string(),
            character_name,
            photo: self.photo,
        })
    }
}

pub async fn run_job(
    orchestrator: &Orchestrator,
    assembler: &dyn BookAssembler,
    request: GenerationRequest,
    handle: JobHandle,
) -> Result<PathBuf, JobError> {
    let mut timer = JobTimer::start(handle.id(), request.story.as_str());

    let result = async {
        let outcome = orchestrator.run(&request, &handle).await?;
        if outcome.image_count() == 0 {
            return Err(JobError::NoImages);
        }
        info!(
            "Job {} generated {}/{} pages ({} failed)",
            handle.id(),
            outcome.completed_pages,
            outcome.pages.len(),
            outcome.failed_pages
        );
        handle.advance(JobStage::Assembling, "Creating your storybook...");
        let artifact = assembler
            .assemble(handle.id(), &outcome)
            .await
            .map_err(|err| JobError::Assembly(format!("{err:#}")))?;
        Ok((artifact, outcome.completed_pages, outcome.failed_pages))
    }
    .await;

    match result {
        Ok((artifact, completed, failed)) => {
            handle.complete(artifact.clone());
            timer.complete(
                if failed == 0 { "success" } else { "partial" },
                Some(format!("completed_pages={completed} failed_pages={failed}")),
            );
            Ok(artifact)
        }
        Err(err) => {
            error!("Job {} failed: {}", handle.id(), err);
            handle.fail(err.to_string());
            timer.complete("error", Some(err.to_string()));
            Err(err)
        }
    }
}

pub fn spawn_generation_job(
    registry: &JobRegistry,
    orchestrator: Arc<Orchestrator>,
    assembler: Arc<dyn BookAssembler>,
    request: StartRequest,
) -> Result<(String, JoinHandle<Result<PathBuf, JobError>>), JobError> {
    let story: StoryId = request.story.parse()?;
    let total = LIBRARY.templates(story, &request.gender).len();
    let handle = registry.register(total);
    let job_id = handle.id().to_string();

    let request = match request.validate(&job_id) {
        Ok(request) => request,
        Err(err) => {
            registry.remove(&job_id);
            return Err(err);
        }
    };

    info!(
        "Starting job {} (story={}, pages={})",
        job_id, request.story, total
    );
    let worker = tokio::spawn(async move {
        run_job(&orchestrator, assembler.as_ref(), request, handle).await
    });
    Ok((job_id, worker))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembly::ManifestAssembler;
    use crate::llm::testing::{png_bytes, FakeImageGenerator, FakeServices, FakeText};
    use crate::pipeline::PipelineSettings;

    #[test]
    fn stages_only_move_forward_one_step() {
        use JobStage::*;
        assert!(Analyzing.can_advance_to(Analyzing));
        assert!(Analyzing.can_advance_to(GeneratingReference));
        assert!(!Analyzing.can_advance_to(GeneratingPages));
        assert!(!GeneratingPages.can_advance_to(ExtractingReferenceDetails));
        assert!(GeneratingPages.can_advance_to(Assembling));
        assert!(Assembling.can_advance_to(Complete));
        for stage in [Analyzing, GeneratingReference, ExtractingReferenceDetails, GeneratingPages, Assembling] {
            assert!(stage.can_advance_to(Error));
        }
        assert!(!Complete.can_advance_to(Error));
        assert!(!Error.can_advance_to(Analyzing));
    }

    #[tokio::test]
    async fn handle_publishes_to_registry_readers() {
        let registry = JobRegistry::new();
        let handle = registry.register(13);
        let id = handle.id().to_string();
        let mut updates = registry.subscribe(&id).expect("receiver");

        assert!(handle.advance(JobStage::GeneratingReference, "Generating cover page..."));
        updates.changed().await.expect("update");
        assert_eq!(updates.borrow().stage, JobStage::GeneratingReference);

        handle.set_progress(20, 13, "overflow");
        let snapshot = registry.snapshot(&id).expect("snapshot");
        assert_eq!(snapshot.progress, 13);
        assert_eq!(snapshot.status, JobStatus::Generating);

        assert!(!handle.advance(JobStage::Complete, "skipping ahead"));
        assert!(handle.fail("quota exceeded"));
        let snapshot = registry.snapshot(&id).expect("snapshot");
        assert_eq!(snapshot.status, JobStatus::Error);
        assert_eq!(snapshot.error.as_deref(), Some("quota exceeded"));
        assert!(!handle.complete(PathBuf::from("late.json")));

        assert!(registry.remove(&id));
        assert!(registry.snapshot(&id).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn terminal_snapshots_always_carry_their_payload() {
        use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

        let registry = JobRegistry::new();
        let current = Arc::new(RwLock::new(String::new()));
        let stop = Arc::new(AtomicBool::new(false));
        let inconsistent = Arc::new(AtomicUsize::new(0));

        let reader = {
            let registry = registry.clone();
            let current = current.clone();
            let stop = stop.clone();
            let inconsistent = inconsistent.clone();
            std::thread::spawn(move || {
                while !stop.load(Ordering::Relaxed) {
                    let id = current.read().clone();
                    let Some(snapshot) = registry.snapshot(&id) else {
                        continue;
                    };
                    let missing = match snapshot.stage {
                        JobStage::Complete => snapshot.artifact.is_none(),
                        JobStage::Error => snapshot.error.is_none(),
                        _ => false,
                    };
                    if missing {
                        inconsistent.fetch_add(1, Ordering::Relaxed);
                    }
                }
            })
        };

        for round in 0..20_000 {
            let handle = registry.register(13);
            *current.write() = handle.id().to_string();
            if round % 2 == 0 {
                assert!(handle.fail("quota exceeded"));
            } else {
                for stage in [
                    JobStage::GeneratingReference,
                    JobStage::ExtractingReferenceDetails,
                    JobStage::GeneratingPages,
                    JobStage::Assembling,
                ] {
                    handle.advance(stage, "working");
                }
                assert!(handle.complete(PathBuf::from("book.json")));
            }
            registry.remove(handle.id());
        }
        stop.store(true, Ordering::Relaxed);
        reader.join().expect("reader");
        assert_eq!(inconsistent.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn first_terminal_notification_includes_the_error() {
        let registry = JobRegistry::new();
        let handle = registry.register(13);
        let mut updates = registry.subscribe(handle.id()).expect("receiver");

        assert!(handle.fail("assembly failed"));
        updates.changed().await.expect("update");
        let snapshot = updates.borrow_and_update().clone();
        assert_eq!(snapshot.status, JobStatus::Error);
        assert_eq!(snapshot.error.as_deref(), Some("assembly failed"));
        assert!(!updates.has_changed().expect("sender alive"));
    }

    #[test]
    fn dropped_handle_marks_job_failed() {
        let registry = JobRegistry::new();
        let handle = registry.register(13);
        let id = handle.id().to_string();
        handle.advance(JobStage::GeneratingReference, "Generating cover page...");
        drop(handle);

        let snapshot = registry.snapshot(&id).expect("snapshot");
        assert_eq!(snapshot.status, JobStatus::Error);
        assert_eq!(snapshot.error.as_deref(), Some("worker stopped unexpectedly"));
    }

    #[test]
    fn dropping_a_finished_handle_keeps_its_state() {
        let registry = JobRegistry::new();
        let handle = registry.register(13);
        let id = handle.id().to_string();
        assert!(handle.fail("quota exceeded"));
        drop(handle);

        let snapshot = registry.snapshot(&id).expect("snapshot");
        assert_eq!(snapshot.error.as_deref(), Some("quota exceeded"));
    }

    fn start_request(story: &str, name: &str) -> StartRequest {
        StartRequest {
            story: story.to_string(),
            gender: "girl".to_string(),
            character_name: name.to_string(),
            photo: png_bytes(8, 8, [200, 170, 150]),
        }
    }

    #[tokio::test]
    async fn invalid_requests_are_rejected_before_registration() {
        let registry = JobRegistry::new();
        let fakes = FakeServices::new(FakeImageGenerator::default(), FakeText::failing());
        let dir = tempfile::tempdir().expect("tempdir");
        let orchestrator = Arc::new(Orchestrator::new(
            fakes.services(),
            PipelineSettings::default(),
            dir.path(),
        ));
        let assembler: Arc<dyn BookAssembler> = Arc::new(ManifestAssembler::new(dir.path()));

        for request in [
            start_request("cinderella", "Emma"),
            start_request("red", ""),
            StartRequest {
                photo: b"not a photo".to_vec(),
                ..start_request("red", "Emma")
            },
        ] {
            let result =
                spawn_generation_job(&registry, orchestrator.clone(), assembler.clone(), request);
            assert!(matches!(result, Err(JobError::InvalidRequest(_))));
        }
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn successful_job_completes_with_artifact() {
        let registry = JobRegistry::new();
        let fakes = FakeServices::new(FakeImageGenerator::failing_on(&[7]), FakeText::failing());
        let dir = tempfile::tempdir().expect("tempdir");
        let orchestrator = Arc::new(Orchestrator::new(
            fakes.services(),
            PipelineSettings::default(),
            dir.path().join("work"),
        ));
        let assembler: Arc<dyn BookAssembler> =
            Arc::new(ManifestAssembler::new(dir.path().join("out")));

        let (job_id, worker) = spawn_generation_job(
            &registry,
            orchestrator,
            assembler,
            start_request("RED", "Emma"),
        )
        .expect("spawned");
        let artifact = worker.await.expect("join").expect("job succeeded");

        let snapshot = registry.snapshot(&job_id).expect("snapshot");
        assert_eq!(snapshot.status, JobStatus::Complete);
        assert_eq!(snapshot.progress, 13);
        assert_eq!(snapshot.artifact.as_deref(), Some(artifact.as_path()));
        assert!(artifact.exists());
    }

    #[tokio::test]
    async fn reference_failure_ends_in_error_state() {
        let registry = JobRegistry::new();
        let images = FakeImageGenerator::always_failing();
        let fakes = FakeServices::new(images, FakeText::failing());
        let dir = tempfile::tempdir().expect("tempdir");
        let orchestrator = Arc::new(Orchestrator::new(
            fakes.services(),
            PipelineSettings::default(),
            dir.path(),
        ));
        let assembler: Arc<dyn BookAssembler> = Arc::new(ManifestAssembler::new(dir.path()));

        let (job_id, worker) =
            spawn_generation_job(&registry, orchestrator, assembler, start_request("jack", "Leo"))
                .expect("spawned");
        let err = worker.await.expect("join").expect_err("job failed");
        assert!(matches!(err, JobError::ReferenceGeneration(_)));

        let snapshot = registry.snapshot(&job_id).expect("snapshot");
        assert_eq!(snapshot.status, JobStatus::Error);
        assert!(snapshot.error.as_deref().is_some_and(|message| !message.is_empty()));
        assert!(snapshot.artifact.is_none());
    }
}
