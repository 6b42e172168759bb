pub mod analyzer;
pub mod memory;
pub mod narrative;
pub mod orchestrator;
pub mod prompt;
pub mod storage;
pub mod truncate;

use crate::config::{Config, DEFAULT_STYLE_DESCRIPTION};

pub use orchestrator::{GenerationOutcome, GenerationRequest, Orchestrator, PageResult};

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub max_prompt_chars: usize,
    pub rag_top_k: usize,
    pub enable_page_verification: bool,
    pub enable_previous_page_continuity: bool,
    pub default_style: String,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        PipelineSettings {
            max_prompt_chars: 4000,
            rag_top_k: 3,
            enable_page_verification: true,
            enable_previous_page_continuity: true,
            default_style: DEFAULT_STYLE_DESCRIPTION.to_string(),
        }
    }
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Self {
        PipelineSettings {
            max_prompt_chars: config.image_prompt_max_length,
            rag_top_k: config.rag_top_k,
            enable_page_verification: config.enable_page_verification,
            enable_previous_page_continuity: config.enable_previous_page_continuity,
            ..Self::default()
        }
    }
}
