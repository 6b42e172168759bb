use anyhow::{anyhow, Result};
use serde_json::Value;
use tracing::{info, warn};

use crate::config::{
    CONSISTENCY_EXTRACTION_PROMPT, DEFAULT_PHOTO_APPEARANCE, FACE_DESCRIPTION_PROMPT,
    ILLUSTRATION_STYLE_PROMPT, MASTER_REFERENCE_PROMPT, PHOTO_APPEARANCE_PROMPT,
    VERIFY_MASTER_PROMPT,
};
use crate::llm::VisionDescriber;
use crate::stories::StoryDefinition;
use crate::utils::json::{bool_field, value_to_text};
use crate::utils::text::{char_prefix, truncate_for_log};

const PHOTO_MAX_TOKENS: u32 = 400;
const STYLE_MAX_TOKENS: u32 = 400;
const MASTER_MAX_TOKENS: u32 = 500;
const FACE_MAX_TOKENS: u32 = 300;
const VERIFY_MAX_TOKENS: u32 = 200;
const EXTRACTION_MAX_TOKENS: u32 = 500;
const RAW_FEATURES_LIMIT: usize = 200;

fn non_empty(text: String) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

pub async fn describe_photo(vision: &dyn VisionDescriber, photo: &[u8]) -> String {
    match vision
        .describe(photo, PHOTO_APPEARANCE_PROMPT, PHOTO_MAX_TOKENS)
        .await
    {
        Ok(text) => non_empty(text).unwrap_or_else(|| DEFAULT_PHOTO_APPEARANCE.to_string()),
        Err(err) => {
            warn!("Photo analysis failed, using default appearance: {}", err);
            DEFAULT_PHOTO_APPEARANCE.to_string()
        }
    }
}

pub async fn describe_master_character(
    vision: &dyn VisionDescriber,
    image: &[u8],
) -> Option<String> {
    match vision
        .describe(image, MASTER_REFERENCE_PROMPT, MASTER_MAX_TOKENS)
        .await
    {
        Ok(text) => non_empty(text),
        Err(err) => {
            warn!("Master reference extraction failed: {}", err);
            None
        }
    }
}

pub async fn describe_style(vision: &dyn VisionDescriber, image: &[u8]) -> Result<String> {
    let text = vision
        .describe(image, ILLUSTRATION_STYLE_PROMPT, STYLE_MAX_TOKENS)
        .await?;
    non_empty(text).ok_or_else(|| anyhow!("Style description was empty"))
}

pub async fn describe_face(vision: &dyn VisionDescriber, image: &[u8]) -> Option<String> {
    match vision
        .describe(image, FACE_DESCRIPTION_PROMPT, FACE_MAX_TOKENS)
        .await
    {
        Ok(text) => non_empty(text),
        Err(err) => {
            warn!("Face description failed: {}", err);
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub matches: bool,
    pub feedback: String,
}

pub async fn verify_against_master(
    vision: &dyn VisionDescriber,
    image: &[u8],
    master_description: &str,
) -> Verdict {
    let instructions = VERIFY_MASTER_PROMPT.replace("{master_description}", master_description);
    match vision
        .describe_structured(image, &instructions, VERIFY_MAX_TOKENS)
        .await
    {
        Ok(value) => Verdict {
            matches: bool_field(&value, "matches").unwrap_or(false),
            feedback: value
                .get("feedback")
                .map(value_to_text)
                .filter(|text| !text.is_empty())
                .unwrap_or_else(|| "No feedback provided".to_string()),
        },
        Err(err) => {
            warn!("Verification call failed: {}", err);
            Verdict {
                matches: true,
                feedback: "Verification error - assuming match".to_string(),
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsistencyDetails {
    pub character_features: String,
    pub objects: String,
    pub style: String,
}

impl ConsistencyDetails {
    fn from_value(value: Value) -> Self {
        if !value.is_object() {
            let raw = value_to_text(&value);
            return ConsistencyDetails {
                character_features: char_prefix(&raw, RAW_FEATURES_LIMIT).to_string(),
                ..Default::default()
            };
        }
        let field = |key: &str| value.get(key).map(value_to_text).unwrap_or_default();
        ConsistencyDetails {
            character_features: field("character_features"),
            objects: field("objects"),
            style: field("style"),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.character_features.is_empty() && self.objects.is_empty() && self.style.is_empty()
    }
}

fn object_hints(story: &StoryDefinition) -> String {
    if story.extraction_hints.is_empty() {
        return "   - Any story items the child carries or interacts with".to_string();
    }
    story
        .extraction_hints
        .iter()
        .map(|hint| format!("   - {hint}"))
        .collect::<Vec<_>>()
        .join("\n")
}

pub async fn extract_consistency(
    vision: &dyn VisionDescriber,
    image: &[u8],
    page_description: &str,
    story: &StoryDefinition,
) -> Result<ConsistencyDetails> {
    let instructions = CONSISTENCY_EXTRACTION_PROMPT
        .replace("{page_description}", page_description)
        .replace("{object_hints}", &object_hints(story));
    let value = vision
        .describe_structured(image, &instructions, EXTRACTION_MAX_TOKENS)
        .await?;
    let details = ConsistencyDetails::from_value(value);
    if details.is_empty() {
        return Err(anyhow!("Consistency extraction returned no details"));
    }
    info!(
        "Extracted consistency details: {}",
        truncate_for_log(&details.character_features, 120)
    );
    Ok(details)
}
