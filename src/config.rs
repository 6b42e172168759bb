use std::env;
use std::path::PathBuf;

use anyhow::Result;
use once_cell::sync::Lazy;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub openai_api_key: String,
    pub openai_base_url: String,
    pub openai_image_model: String,
    pub openai_image_size: String,
    pub openai_image_quality: String,
    pub openai_vision_model: String,
    pub openai_text_model: String,
    pub openai_embedding_model: String,
    pub enable_embeddings: bool,
    pub text_temperature: f32,
    pub text_max_tokens: u32,
    pub image_prompt_max_length: usize,
    pub rag_top_k: usize,
    pub enable_page_verification: bool,
    pub enable_previous_page_continuity: bool,
    pub image_download_timeout_seconds: u64,
    pub http_timeout_seconds: u64,
    pub work_dir: PathBuf,
    pub output_dir: PathBuf,
    pub placeholder_workers: usize,
}

pub static CONFIG: Lazy<Config> =
    Lazy::new(|| Config::load().expect("Failed to load configuration"));

fn env_bool(name: &str, default: bool) -> bool {
    env::var(name)
        .ok()
        .map(|value| value.trim().eq_ignore_ascii_case("true"))
        .unwrap_or(default)
}

fn env_string(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_f32(name: &str, default: f32) -> f32 {
    env::var(name)
        .ok()
        .and_then(|value| value.parse::<f32>().ok())
        .unwrap_or(default)
}

fn env_u32(name: &str, default: u32) -> u32 {
    env::var(name)
        .ok()
        .and_then(|value| value.parse::<u32>().ok())
        .unwrap_or(default)
}

fn env_u64(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_usize(name: &str, default: usize) -> usize {
    env::var(name)
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
        .unwrap_or(default)
}

fn env_path(name: &str, default: PathBuf) -> PathBuf {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
        .unwrap_or(default)
}

fn normalize_image_quality(value: String) -> String {
    let lowered = value.trim().to_lowercase();
    match lowered.as_str() {
        "standard" | "hd" | "low" | "medium" | "high" | "auto" => lowered,
        _ => {
            warn!(
                "Unknown OPENAI_IMAGE_QUALITY value '{}'; defaulting to standard.",
                value
            );
            "standard".to_string()
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let openai_api_key = env::var("OPENAI_API_KEY")
            .map(|value| value.trim().to_string())
            .unwrap_or_default();

        let prompt_max_length = env_usize("IMAGE_PROMPT_MAX_LENGTH", 4000);
        if prompt_max_length < 500 {
            warn!(
                "IMAGE_PROMPT_MAX_LENGTH={} is very small; prompts will lose most consistency rules.",
                prompt_max_length
            );
        }

        Ok(Config {
            log_level: env_string("LOG_LEVEL", "info").to_lowercase(),
            openai_api_key,
            openai_base_url: env_string("OPENAI_BASE_URL", "https://api.openai.com/v1"),
            openai_image_model: env_string("OPENAI_IMAGE_MODEL", "dall-e-3"),
            openai_image_size: env_string("OPENAI_IMAGE_SIZE", "1024x1024"),
            openai_image_quality: normalize_image_quality(env_string(
                "OPENAI_IMAGE_QUALITY",
                "standard",
            )),
            openai_vision_model: env_string("OPENAI_VISION_MODEL", "gpt-4o"),
            openai_text_model: env_string("OPENAI_TEXT_MODEL", "gpt-4"),
            openai_embedding_model: env_string("OPENAI_EMBEDDING_MODEL", "text-embedding-3-small"),
            enable_embeddings: env_bool("ENABLE_EMBEDDINGS", true),
            text_temperature: env_f32("TEXT_TEMPERATURE", 0.7),
            text_max_tokens: env_u32("TEXT_MAX_TOKENS", 200),
            image_prompt_max_length: prompt_max_length,
            rag_top_k: env_usize("RAG_TOP_K", 3).max(1),
            enable_page_verification: env_bool("ENABLE_PAGE_VERIFICATION", true),
            enable_previous_page_continuity: env_bool("ENABLE_PREVIOUS_PAGE_CONTINUITY", true),
            image_download_timeout_seconds: env_u64("IMAGE_DOWNLOAD_TIMEOUT_SECONDS", 30),
            http_timeout_seconds: env_u64("HTTP_TIMEOUT_SECONDS", 120),
            work_dir: env_path("WORK_DIR", env::temp_dir().join("storybooks")),
            output_dir: env_path("OUTPUT_DIR", PathBuf::from("output")),
            placeholder_workers: env_usize("PLACEHOLDER_WORKERS", 4).max(1),
        })
    }

    pub fn require_openai_api_key(&self) -> Result<&str> {
        if self.openai_api_key.is_empty() {
            return Err(anyhow::anyhow!("OPENAI_API_KEY is required"));
        }
        Ok(&self.openai_api_key)
    }
}

pub const DEFAULT_PHOTO_APPEARANCE: &str =
    "a child with distinct features matching the uploaded photo";

pub const DEFAULT_STYLE_DESCRIPTION: &str = "watercolor/painterly style with soft, artistic brushstrokes, gentle color blending, and an emotional, gentle feel";

pub const NARRATIVE_SYSTEM_PROMPT: &str = "You are a children's book writer who creates simple, engaging text for picture books. Always provide narrative text - it is required.";

pub const PHOTO_APPEARANCE_PROMPT: &str = r#"Analyze this photo of a child and provide an EXTREMELY detailed description for consistent illustration generation.

CRITICAL - Extract these EXACT features that must remain identical across all pages:
1. Age: Exact age appearance
2. Ethnicity: Specific ethnic features
3. Hair: EXACT color (e.g., "dark brown", "blonde", "black"), EXACT style (e.g., "short straight", "long curly", "braided"), length, texture
4. Eyes: EXACT color (e.g., "brown", "blue", "green"), shape (e.g., "almond", "round"), size
5. Face shape: EXACT shape (e.g., "round", "oval", "square")
6. Skin tone: EXACT tone description
7. Nose: Shape and size
8. Mouth: Shape and size
9. Distinctive features: Freckles, dimples, birthmarks, etc. - be specific
10. Overall facial proportions

This description will be used to recreate the EXACT same child in every illustration. Be extremely specific - the child must look identical across all 13 pages of the storybook."#;

pub const ILLUSTRATION_STYLE_PROMPT: &str = "Analyze this children's book illustration and provide a detailed description of its artistic style. Focus on:\n1. Color palette (specific colors, saturation, warmth/coolness)\n2. Brushwork/technique (watercolor, painterly, digital, etc.)\n3. Lighting style (soft, dramatic, warm, cool)\n4. Edge quality (soft, crisp, blended)\n5. Overall mood and atmosphere\n\nBe specific so the same style can be reproduced on every page of the book.";

pub const MASTER_REFERENCE_PROMPT: &str = r#"This is the MASTER REFERENCE IMAGE - the first illustration of the child character.

You MUST extract EVERY detail about the child's appearance that will be used to recreate this EXACT child in all subsequent illustrations.

Provide an EXTREMELY detailed description including:

1. FACE SHAPE: Exact shape (round, oval, square, etc.) and proportions
2. EYE COLOR: Exact color (brown, blue, green, etc.)
3. EYE SHAPE: Exact shape (almond, round, etc.) and size
4. SKIN TONE: Exact tone description
5. HAIR COLOR: Exact color (e.g., "dark brown", "blonde", "black")
6. HAIR STYLE: Exact style (short straight, long curly, braided, etc.), length, texture
7. HAIR TEXTURE: Straight, wavy, curly, etc.
8. AGE APPEARANCE: Exact age appearance
9. ETHNICITY: Specific ethnic features visible
10. NOSE: Shape and size
11. MOUTH: Shape and size
12. DISTINCTIVE FEATURES: Freckles, dimples, birthmarks, etc. - be extremely specific
13. OVERALL FACIAL PROPORTIONS: How features relate to each other
14. FACIAL STRUCTURE: Bone structure, cheekbones, jawline

This description will be the MASTER REFERENCE for ALL subsequent pages. The child in every page MUST match this description exactly - same face, same age, same hair, same everything. Be extremely precise and detailed."#;

pub const FACE_DESCRIPTION_PROMPT: &str = "Analyze this children's book illustration and focus specifically on the child character's face and appearance. Provide a detailed description of:\n1. Hair color and exact style/texture\n2. Eye color and shape\n3. Face shape and structure\n4. Skin tone\n5. Nose shape\n6. Distinctive features\n\nKeep the description concise and factual.";

pub const VERIFY_MASTER_PROMPT: &str = r#"Compare this generated illustration against the FIRST GENERATED ILLUSTRATION character description:

FIRST GENERATED ILLUSTRATION (must match exactly):
{master_description}

Analyze if the child character in this NEW illustration matches the FIRST generated illustration in:
1. Face shape - EXACT match required
2. Eye color and shape - EXACT match required
3. Skin tone - EXACT match required
4. Hair style and color - EXACT match required
5. Overall identity and features - EXACT match required
6. Same ethnicity and age appearance - EXACT match required

Respond with JSON:
{
    "matches": true/false,
    "feedback": "Brief explanation of match or mismatch"
}

If the face does NOT match the FIRST illustration, respond with matches: false and explain what differs."#;

pub const CONSISTENCY_EXTRACTION_PROMPT: &str = r#"Analyze this children's book illustration (page: {page_description}) and extract EXACT details for consistency:

1. CHARACTER FEATURES (must be identical across all pages):
   - Hair: color, style, length, texture
   - Eyes: color, shape, size
   - Face: shape, skin tone, age
   - Distinctive features: freckles, dimples, etc.

2. OBJECTS AND ITEMS (must match previous pages):
{object_hints}

3. STYLE: color palette, brushwork, lighting

Format as JSON with keys: character_features, objects, style. Be extremely specific - these details must match exactly across all pages."#;

pub const NARRATIVE_USER_PROMPT: &str = r#"Create storybook text for page {page_number} of {total_pages} in the children's storybook "{story_title}".

Page description: {page_description}
Page scene: {page_scene}

CRITICAL: The main character's name is "{character_name}". Use this name throughout the text instead of "the child" or generic terms.

Write 2-3 simple sentences that tell the story for this page. The text should:
- Use the character's name "{character_name}" when referring to the main character
- Be written in third person, simple past tense
- Be age-appropriate for 4-8 year olds
- Match what's happening in the illustration
- Be engaging and easy to read
- Each sentence should be 8-15 words maximum

Format as JSON:
{
  "narrative": ["sentence 1", "sentence 2", "sentence 3"]
}

IMPORTANT:
- You MUST provide at least 2 narrative sentences. The narrative cannot be empty.
- Always use the character's name "{character_name}" instead of "the child" or generic pronouns when referring to the main character."#;
