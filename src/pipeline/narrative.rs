use serde_json::Value;
use tracing::warn;

use crate::config::{NARRATIVE_SYSTEM_PROMPT, NARRATIVE_USER_PROMPT};
use crate::llm::TextCompleter;
use crate::stories::PageTemplate;
use crate::utils::json::{parse_llm_json, string_list};
use crate::utils::text::{char_prefix, contains_any, truncate_for_log};

const SCENE_PREFIX_CHARS: usize = 200;
pub const MAX_NARRATIVE_SENTENCES: usize = 3;

#[derive(Debug, Clone, Copy)]
pub struct NarrativeRequest<'a> {
    pub template: &'a PageTemplate,
    pub story_title: &'a str,
    pub character_name: &'a str,
    pub page_number: usize,
    pub total_pages: usize,
}

pub fn fallback_narrative(request: &NarrativeRequest<'_>) -> String {
    let name = request.character_name;
    let description = request.template.scene_description.to_lowercase();
    if request.template.is_cover() || description.contains("cover") {
        format!(
            "Welcome to the story of {}, featuring {}.",
            request.story_title, name
        )
    } else if contains_any(&description, &["walking", "forest"]) {
        format!("{name} walked through the magical forest.")
    } else if contains_any(&description, &["mother", "home"]) {
        format!("{name} was at home with their mother.")
    } else if description.contains("beanstalk") {
        format!("{name} looked up at the enormous beanstalk.")
    } else if contains_any(&description, &["castle", "giant"]) {
        format!("{name} discovered a magnificent castle in the clouds.")
    } else {
        format!("{name}'s adventure continues on page {}.", request.page_number)
    }
}

fn narrative_sentences(reply: &str) -> Vec<String> {
    match parse_llm_json(reply) {
        Some(value @ Value::Object(_)) => string_list(value.get("narrative")),
        Some(value @ Value::Array(_)) => string_list(Some(&value)),
        _ => Vec::new(),
    }
}

fn user_prompt(request: &NarrativeRequest<'_>) -> String {
    NARRATIVE_USER_PROMPT
        .replace("{page_number}", &request.page_number.to_string())
        .replace("{total_pages}", &request.total_pages.to_string())
        .replace("{story_title}", request.story_title)
        .replace("{page_description}", &request.template.scene_description)
        .replace(
            "{page_scene}",
            char_prefix(&request.template.base_prompt, SCENE_PREFIX_CHARS),
        )
        .replace("{character_name}", request.character_name)
}

pub async fn generate_page_text(
    text: &dyn TextCompleter,
    request: &NarrativeRequest<'_>,
) -> Vec<String> {
    let reply = match text
        .complete(NARRATIVE_SYSTEM_PROMPT, &user_prompt(request))
        .await
    {
        Ok(reply) => reply,
        Err(err) => {
            warn!(
                "Narrative generation failed for page {}: {}",
                request.page_number, err
            );
            return vec![fallback_narrative(request)];
        }
    };

    let mut sentences = narrative_sentences(&reply);
    if sentences.is_empty() {
        warn!(
            "No usable narrative for page {}: {}",
            request.page_number,
            truncate_for_log(&reply, 200)
        );
        return vec![fallback_narrative(request)];
    }
    sentences.truncate(MAX_NARRATIVE_SENTENCES);
    sentences
}
