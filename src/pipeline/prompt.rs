use crate::pipeline::memory::ConsistencyRecord;
use crate::pipeline::truncate::{fit_prompt, truncate_at_sentence};
use crate::stories::{PageTemplate, StoryDefinition};
use crate::utils::text::char_prefix;

const MASTER_DESCRIPTION_BUDGET: usize = 400;
const PHOTO_APPEARANCE_BUDGET: usize = 250;
const RAG_CHARACTER_BUDGET: usize = 200;
const RAG_OBJECTS_BUDGET: usize = 150;
const RAG_NOTES_BUDGET: usize = 300;
const RAG_MAX_PARTS: usize = 2;
const OBJECT_NOTES_BUDGET: usize = 150;
const STYLE_BUDGET: usize = 200;
const CONTINUITY_BUDGET: usize = 200;
const QUERY_PROMPT_PREFIX: usize = 200;

const STYLE_LEAD_IN: &str = "Create a children's book illustration page in a watercolor/painterly style with a soft, artistic feel that is gentle and emotional.";

pub fn retrieval_query(template: &PageTemplate) -> String {
    format!(
        "{} {}",
        template.scene_description,
        char_prefix(&template.base_prompt, QUERY_PROMPT_PREFIX)
    )
}

fn title_case(text: &str) -> String {
    text.split(' ')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn cover_prompt(
    story: &StoryDefinition,
    template: &PageTemplate,
    photo_appearance: &str,
    max_chars: usize,
) -> String {
    let mut outfit = title_case(&story.outfit);
    if !story.items.is_empty() {
        outfit = format!("{outfit}, {}", story.items);
    }
    let base = format!(
        "Create a children's storybook illustration of the uploaded child as {}.\n\n{}",
        story.protagonist, template.base_prompt
    );
    let sections = vec![
        "The child must look EXACTLY like the uploaded photo - same face, same age, same ethnicity, same hair, same features.".to_string(),
        format!(
            "CHILD APPEARANCE (from the photo): {}",
            truncate_at_sentence(photo_appearance, PHOTO_APPEARANCE_BUDGET)
        ),
        format!("OUTFIT AND ITEMS: {outfit}."),
        "STYLE: Soft watercolor fairy-tale storybook illustration style. Gentle, magical, warm lighting.".to_string(),
        "This is the FIRST and MASTER REFERENCE illustration. All subsequent pages will match this exact child character, outfit, and art style.".to_string(),
    ];
    fit_prompt(&base, &sections, max_chars)
}

pub fn rag_notes(records: &[&ConsistencyRecord]) -> Option<String> {
    let mut parts = Vec::new();
    for record in records {
        if !record.character_features.is_empty() {
            parts.push(format!(
                "Character (match exactly): {}",
                char_prefix(&record.character_features, RAG_CHARACTER_BUDGET)
            ));
        }
        if !record.objects.is_empty() {
            parts.push(format!(
                "Objects (match exactly): {}",
                char_prefix(&record.objects, RAG_OBJECTS_BUDGET)
            ));
        }
        if parts.len() >= RAG_MAX_PARTS {
            break;
        }
    }
    parts.truncate(RAG_MAX_PARTS);
    if parts.is_empty() {
        return None;
    }
    Some(truncate_at_sentence(&parts.join(". "), RAG_NOTES_BUDGET))
}

fn with_style_lead_in(base_prompt: &str) -> String {
    let lowered = base_prompt.to_lowercase();
    if lowered.contains("watercolor") || lowered.contains("painterly") {
        base_prompt.to_string()
    } else {
        format!("{STYLE_LEAD_IN} {base_prompt}")
    }
}

fn bullet_list(lines: &[String]) -> String {
    lines
        .iter()
        .map(|line| format!("- {line}"))
        .collect::<Vec<_>>()
        .join("\n")
}

#[derive(Debug)]
pub struct DependentPrompt<'a> {
    pub story: &'a StoryDefinition,
    pub template: &'a PageTemplate,
    pub master_description: Option<&'a str>,
    pub style_description: &'a str,
    pub rag_notes: Option<&'a str>,
    pub previous_page: Option<&'a str>,
}

impl DependentPrompt<'_> {
    fn consistency_lock(&self) -> String {
        let master = match self.master_description {
            Some(description) => truncate_at_sentence(description, MASTER_DESCRIPTION_BUDGET),
            None => "Match the FIRST generated illustration character exactly.".to_string(),
        };
        let mut lock = format!(
            "CONSISTENCY LOCK - MANDATORY FOR ALL PAGES AFTER THE FIRST:\n\
Use the FIRST illustration as the face reference. Match the reference child's face EXACTLY: identical facial features, proportions, eyes, nose, mouth, cheeks, skin tone, hair color and length, and age. Do NOT alter, stylize, or reinterpret the child's face or age. SAME hairstyle, {}, SAME art style, SAME brush texture, SAME lighting and color palette.\n\n\
MASTER REFERENCE (FIRST ILLUSTRATION) CHARACTER DETAILS:\n{}",
            self.story.outfit_lock, master
        );
        if let Some(previous) = self.previous_page {
            lock.push_str(&format!(
                "\nPREVIOUS PAGE REFERENCE: Also match the style and facial identity from the previous page. {}",
                char_prefix(previous, CONTINUITY_BUDGET)
            ));
        }
        lock
    }

    fn object_consistency(&self) -> Option<String> {
        let notes = self.story.object_notes_for(&self.template.base_prompt);
        let mut lines = Vec::new();
        if !notes.is_empty() {
            lines.push(truncate_at_sentence(&notes.join(" "), OBJECT_NOTES_BUDGET));
        }
        if let Some(rag) = self.rag_notes {
            lines.push(format!("RAG-RETRIEVED CONSISTENCY (from previous pages):\n{rag}"));
        }
        if lines.is_empty() {
            None
        } else {
            Some(format!("OBJECT CONSISTENCY:\n{}", lines.join("\n")))
        }
    }

    fn character_rules(&self) -> String {
        format!("CHARACTER RULES:\n{}", bullet_list(&self.story.character_rules))
    }

    fn outfit_and_style_rules(&self) -> String {
        let mut rules = self.story.outfit_rules.clone();
        rules.push(format!(
            "Use the EXACT same style as the first illustration: {}",
            truncate_at_sentence(self.style_description, STYLE_BUDGET)
        ));
        rules.push("Soft watercolor storybook style.".to_string());
        rules.push("No realism, no anime, no style changes.".to_string());
        format!("OUTFIT & STYLE RULES:\n{}", bullet_list(&rules))
    }

    pub fn sections(&self) -> Vec<String> {
        let mut sections = vec![self.consistency_lock()];
        sections.extend(self.object_consistency());
        sections.push(self.character_rules());
        sections.push(self.outfit_and_style_rules());
        sections.push(
            "QUALITY CHECK:\nPrioritize facial identity match before style variation. The child MUST look EXACTLY like the FIRST illustration in EVERY image."
                .to_string(),
        );
        sections
    }

    pub fn render(&self, max_chars: usize) -> String {
        let base = with_style_lead_in(&self.template.base_prompt);
        fit_prompt(&base, &self.sections(), max_chars)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stories::{StoryId, LIBRARY};

    fn record(features: &str, objects: &str) -> ConsistencyRecord {
        ConsistencyRecord {
            page_number: 1,
            character_features: features.to_string(),
            objects: objects.to_string(),
            style: String::new(),
            embedding: Vec::new(),
            source_page_description: String::new(),
            context_text: String::new(),
        }
    }

    #[test]
    fn cover_prompt_names_protagonist_and_outfit() {
        let story = LIBRARY.story(StoryId::Red);
        let templates = LIBRARY.templates(StoryId::Red, "girl");
        let prompt = cover_prompt(story, &templates[0], "A girl with red curls.", 4000);
        assert!(prompt.starts_with(
            "Create a children's storybook illustration of the uploaded child as Little Red Riding Hood."
        ));
        assert!(prompt.contains("OUTFIT AND ITEMS: Red Hooded Cape, basket."));
        assert!(prompt.contains("MASTER REFERENCE"));
        assert!(prompt.contains("A girl with red curls."));
        assert!(prompt.contains("magical forest clearing"));
        assert!(prompt.chars().count() <= 4000);
    }

    #[test]
    fn tight_cover_budget_keeps_scene_over_boilerplate() {
        let story = LIBRARY.story(StoryId::Red);
        let templates = LIBRARY.templates(StoryId::Red, "girl");
        let appearance = "A girl with red curls and a gap-toothed smile. ".repeat(10);
        let prompt = cover_prompt(story, &templates[0], &appearance, 1000);
        assert!(prompt.chars().count() <= 1000);
        assert!(prompt.contains("magical forest clearing"));
        assert!(!prompt.contains("FIRST and MASTER REFERENCE"));
    }

    #[test]
    fn rag_notes_keep_two_parts_within_budget() {
        let first = record(&"curly brown hair ".repeat(5), &"basket ".repeat(40));
        let second = record("should not appear", "");
        let notes = rag_notes(&[&first, &second]).expect("notes");
        assert!(notes.starts_with("Character (match exactly): curly brown hair"));
        assert!(notes.contains("Objects (match exactly): basket"));
        assert!(!notes.contains("should not appear"));
        assert!(notes.chars().count() <= RAG_NOTES_BUDGET);

        let long = record(&"freckled ".repeat(60), &"golden harp ".repeat(40));
        let notes = rag_notes(&[&long]).expect("notes");
        assert!(notes.chars().count() <= RAG_NOTES_BUDGET);

        let empty = record("", "");
        assert!(rag_notes(&[&empty]).is_none());
        assert!(rag_notes(&[]).is_none());
    }

    #[test]
    fn dependent_prompt_carries_master_rules_and_object_notes() {
        let story = LIBRARY.story(StoryId::Red);
        let templates = LIBRARY.templates(StoryId::Red, "girl");
        let page = templates
            .iter()
            .find(|t| t.base_prompt.to_lowercase().contains("basket") && !t.is_cover())
            .expect("basket page");
        let prompt = DependentPrompt {
            story,
            template: page,
            master_description: Some("Round face, green eyes, brown curly hair."),
            style_description: "Soft watercolor, warm palette.",
            rag_notes: Some("Objects (match exactly): wicker basket"),
            previous_page: Some("Freckles on both cheeks."),
        }
        .render(4000);

        assert!(prompt.contains("CONSISTENCY LOCK"));
        assert!(prompt.contains("SAME red cloak, SAME basket"));
        assert!(prompt.contains("Round face, green eyes, brown curly hair."));
        assert!(prompt.contains("PREVIOUS PAGE REFERENCE"));
        assert!(prompt.contains("bread, cakes, bottle of wine"));
        assert!(prompt.contains("RAG-RETRIEVED CONSISTENCY"));
        assert!(prompt.contains("Wolf is always a wolf (not human)."));
        assert!(prompt.contains("Soft watercolor, warm palette."));
        assert!(prompt.chars().count() <= 4000);
    }

    #[test]
    fn tight_budget_drops_rules_before_scene() {
        let story = LIBRARY.story(StoryId::Jack);
        let templates = LIBRARY.templates(StoryId::Jack, "boy");
        let page = &templates[5];
        let prompt = DependentPrompt {
            story,
            template: page,
            master_description: None,
            style_description: "watercolor",
            rag_notes: None,
            previous_page: None,
        }
        .render(900);
        assert!(prompt.chars().count() <= 900);
        assert!(!prompt.contains("QUALITY CHECK"));
        let scene_start = char_prefix(&page.base_prompt, 60);
        assert!(prompt.contains(scene_start));
    }

    #[test]
    fn style_lead_in_only_when_template_lacks_style_words() {
        assert!(with_style_lead_in("A castle in the clouds.").starts_with(STYLE_LEAD_IN));
        assert_eq!(
            with_style_lead_in("A painterly castle in the clouds."),
            "A painterly castle in the clouds."
        );
    }

    #[test]
    fn retrieval_query_joins_description_and_prompt_prefix() {
        let template = PageTemplate {
            page_number: 3,
            base_prompt: "p".repeat(500),
            scene_description: "Forest walk".to_string(),
        };
        let query = retrieval_query(&template);
        assert!(query.starts_with("Forest walk "));
        assert_eq!(query.chars().count(), "Forest walk ".len() + 200);
    }
}
