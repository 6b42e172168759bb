use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use dotenvy::dotenv;
use tracing::{info, warn};

mod assembly;
mod config;
mod jobs;
mod llm;
mod pipeline;
mod placeholder;
mod stories;
mod utils;

use assembly::{BookAssembler, ManifestAssembler};
use config::CONFIG;
use jobs::{spawn_generation_job, JobRegistry, StartRequest};
use llm::{HttpImageFetcher, OpenAiClient, Services};
use pipeline::{Orchestrator, PipelineSettings};
use placeholder::generate_placeholder_book;
use stories::{StoryId, LIBRARY};
use utils::logging::init_logging;

#[derive(Debug)]
struct GenerateArgs {
    story: String,
    gender: String,
    name: String,
    photo: PathBuf,
    output: PathBuf,
}

#[derive(Debug)]
struct PlaceholderArgs {
    story: StoryId,
    name: String,
    output: PathBuf,
    workers: usize,
}

#[derive(Debug)]
enum Command {
    Generate(GenerateArgs),
    Placeholder(PlaceholderArgs),
    Stories,
    Help,
}

fn usage() -> &'static str {
    "Usage:\n  storybook generate --story <red|jack> --name <name> --photo <path> [--gender <label>] [--output <dir>]\n  storybook placeholder --story <red|jack> --name <name> [--output <dir>] [--workers <n>]\n  storybook stories"
}

fn flag_value<'a>(args: &'a [String], index: usize, flag: &str) -> anyhow::Result<&'a String> {
    args.get(index)
        .ok_or_else(|| anyhow!("Missing value for {flag}"))
}

fn parse_generate_args(args: &[String]) -> anyhow::Result<GenerateArgs> {
    let mut story: Option<String> = None;
    let mut gender = String::new();
    let mut name: Option<String> = None;
    let mut photo: Option<PathBuf> = None;
    let mut output = CONFIG.output_dir.clone();

    let mut index = 2;
    while index < args.len() {
        match args[index].as_str() {
            "--story" => {
                index += 1;
                story = Some(flag_value(args, index, "--story")?.clone());
            }
            "--gender" => {
                index += 1;
                gender = flag_value(args, index, "--gender")?.clone();
            }
            "--name" => {
                index += 1;
                name = Some(flag_value(args, index, "--name")?.clone());
            }
            "--photo" => {
                index += 1;
                photo = Some(PathBuf::from(flag_value(args, index, "--photo")?));
            }
            "--output" => {
                index += 1;
                output = PathBuf::from(flag_value(args, index, "--output")?);
            }
            other => {
                return Err(anyhow!("Unknown generate argument: {other}\n{}", usage()));
            }
        }
        index += 1;
    }

    Ok(GenerateArgs {
        story: story.ok_or_else(|| anyhow!("--story is required"))?,
        gender,
        name: name.ok_or_else(|| anyhow!("--name is required"))?,
        photo: photo.ok_or_else(|| anyhow!("--photo is required"))?,
        output,
    })
}

fn parse_placeholder_args(args: &[String]) -> anyhow::Result<PlaceholderArgs> {
    let mut story: Option<StoryId> = None;
    let mut name: Option<String> = None;
    let mut output = CONFIG.output_dir.join("placeholder");
    let mut workers = CONFIG.placeholder_workers;

    let mut index = 2;
    while index < args.len() {
        match args[index].as_str() {
            "--story" => {
                index += 1;
                story = Some(flag_value(args, index, "--story")?.parse()?);
            }
            "--name" => {
                index += 1;
                name = Some(flag_value(args, index, "--name")?.clone());
            }
            "--output" => {
                index += 1;
                output = PathBuf::from(flag_value(args, index, "--output")?);
            }
            "--workers" => {
                index += 1;
                let value = flag_value(args, index, "--workers")?;
                workers = value
                    .parse::<usize>()
                    .map_err(|_| anyhow!("Invalid --workers value: {value}"))?
                    .max(1);
            }
            other => {
                return Err(anyhow!(
                    "Unknown placeholder argument: {other}\n{}",
                    usage()
                ));
            }
        }
        index += 1;
    }

    Ok(PlaceholderArgs {
        story: story.ok_or_else(|| anyhow!("--story is required"))?,
        name: name.ok_or_else(|| anyhow!("--name is required"))?,
        output,
        workers,
    })
}

fn parse_args(args: &[String]) -> anyhow::Result<Command> {
    match args.get(1).map(|value| value.as_str()) {
        Some("generate") => Ok(Command::Generate(parse_generate_args(args)?)),
        Some("placeholder") => Ok(Command::Placeholder(parse_placeholder_args(args)?)),
        Some("stories") => Ok(Command::Stories),
        Some("--help" | "-h" | "help") | None => Ok(Command::Help),
        Some(other) => Err(anyhow!("Unknown command: {other}\n{}", usage())),
    }
}

fn list_stories() {
    for story in LIBRARY.stories() {
        println!(
            "{:<5} {} (default: {}, {} pages)",
            story.id,
            story.title,
            story.default_gender,
            LIBRARY.templates(story.id, "").len()
        );
    }
}

async fn run_generate(args: GenerateArgs) -> anyhow::Result<()> {
    let photo = tokio::fs::read(&args.photo)
        .await
        .with_context(|| format!("Failed to read photo {}", args.photo.display()))?;

    let client = OpenAiClient::from_config(&CONFIG)?;
    let fetcher = HttpImageFetcher::new(Duration::from_secs(CONFIG.image_download_timeout_seconds));
    let services = Services::openai(client, fetcher, CONFIG.enable_embeddings);
    let orchestrator = Arc::new(Orchestrator::new(
        services,
        PipelineSettings::from_config(&CONFIG),
        CONFIG.work_dir.clone(),
    ));
    let assembler: Arc<dyn BookAssembler> = Arc::new(ManifestAssembler::new(args.output));

    let registry = JobRegistry::new();
    let (job_id, worker) = spawn_generation_job(
        &registry,
        orchestrator,
        assembler,
        StartRequest {
            story: args.story,
            gender: args.gender,
            character_name: args.name,
            photo,
        },
    )?;
    info!("Started storybook job {}", job_id);

    let mut updates = registry
        .subscribe(&job_id)
        .ok_or_else(|| anyhow!("Job {job_id} disappeared from the registry"))?;
    let abort = worker.abort_handle();
    loop {
        let snapshot = updates.borrow_and_update().clone();
        println!(
            "[{}/{}] {}",
            snapshot.progress, snapshot.total, snapshot.current_step
        );
        if snapshot.is_finished() {
            break;
        }
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                warn!("Interrupted; abandoning job {}", job_id);
                abort.abort();
                registry.remove(&job_id);
                return Err(anyhow!("Interrupted"));
            }
        }
    }

    let result = worker.await.context("Generation worker panicked")?;
    registry.remove(&job_id);
    let artifact = result?;
    println!("Storybook manifest written to {}", artifact.display());
    Ok(())
}

async fn run_placeholder(args: PlaceholderArgs) -> anyhow::Result<()> {
    let pages =
        generate_placeholder_book(args.story, &args.name, &args.output, args.workers).await?;
    for page in &pages {
        println!("{:>2}  {}  {}", page.page_number, page.path.display(), page.narrative);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    let _guards = init_logging(&CONFIG.log_level);

    let args: Vec<String> = std::env::args().collect();
    match parse_args(&args)? {
        Command::Generate(generate_args) => run_generate(generate_args).await,
        Command::Placeholder(placeholder_args) => run_placeholder(placeholder_args).await,
        Command::Stories => {
            list_stories();
            Ok(())
        }
        Command::Help => {
            println!("{}", usage());
            Ok(())
        }
    }
}
