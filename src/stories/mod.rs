use std::fmt;
use std::str::FromStr;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

const LIBRARY_SOURCE: &str = include_str!("../../data/stories.yaml");
const PAGES_PER_STORY: usize = 12;
const MAX_NAME_CHARS: usize = 40;

pub static LIBRARY: Lazy<StoryLibrary> = Lazy::new(|| {
    StoryLibrary::from_yaml(LIBRARY_SOURCE).expect("embedded story library is valid")
});

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum StoryError {
    #[error("Unknown story '{0}'. Available stories: red, jack")]
    UnknownStory(String),
    #[error("Invalid character name: {0}")]
    InvalidName(String),
    #[error("Story library is invalid: {0}")]
    Library(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoryId {
    Red,
    Jack,
}

impl StoryId {
    pub const ALL: [StoryId; 2] = [StoryId::Red, StoryId::Jack];

    pub const fn as_str(self) -> &'static str {
        match self {
            StoryId::Red => "red",
            StoryId::Jack => "jack",
        }
    }
}

impl FromStr for StoryId {
    type Err = StoryError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "red" => Ok(StoryId::Red),
            "jack" => Ok(StoryId::Jack),
            other => Err(StoryError::UnknownStory(other.to_string())),
        }
    }
}

impl fmt::Display for StoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObjectNote {
    pub keywords: Vec<String>,
    pub note: String,
}

impl ObjectNote {
    pub fn applies_to(&self, lowered_text: &str) -> bool {
        self.keywords
            .iter()
            .any(|keyword| lowered_text.contains(&keyword.to_lowercase()))
    }
}

#[derive(Debug, Clone, Deserialize)]
struct CoverEntry {
    prompt: String,
    description: String,
}

#[derive(Debug, Clone, Deserialize)]
struct PageEntry {
    page: u32,
    prompt: String,
    description: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoryDefinition {
    pub id: StoryId,
    pub title: String,
    pub default_gender: String,
    pub protagonist: String,
    pub outfit: String,
    pub items: String,
    pub outfit_lock: String,
    pub outfit_rules: Vec<String>,
    pub character_rules: Vec<String>,
    pub object_notes: Vec<ObjectNote>,
    pub extraction_hints: Vec<String>,
    cover: CoverEntry,
    pages: Vec<PageEntry>,
}

impl StoryDefinition {
    pub fn object_notes_for(&self, text: &str) -> Vec<&str> {
        let lowered = text.to_lowercase();
        self.object_notes
            .iter()
            .filter(|note| note.applies_to(&lowered))
            .map(|note| note.note.as_str())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageTemplate {
    pub page_number: u32,
    pub base_prompt: String,
    pub scene_description: String,
}

impl PageTemplate {
    pub fn is_cover(&self) -> bool {
        self.page_number == 0
    }
}

#[derive(Debug, Deserialize)]
struct StoryFile {
    stories: Vec<StoryDefinition>,
}

#[derive(Debug)]
pub struct StoryLibrary {
    stories: Vec<StoryDefinition>,
}

impl StoryLibrary {
    pub fn from_yaml(source: &str) -> Result<Self, StoryError> {
        let parsed: StoryFile =
            serde_yaml::from_str(source).map_err(|err| StoryError::Library(err.to_string()))?;

        for id in StoryId::ALL {
            let count = parsed.stories.iter().filter(|story| story.id == id).count();
            if count != 1 {
                return Err(StoryError::Library(format!(
                    "expected exactly one '{}' story, found {}",
                    id, count
                )));
            }
        }
        for story in &parsed.stories {
            if story.pages.len() != PAGES_PER_STORY {
                return Err(StoryError::Library(format!(
                    "story '{}' has {} pages, expected {}",
                    story.id,
                    story.pages.len(),
                    PAGES_PER_STORY
                )));
            }
            let ordered = story
                .pages
                .iter()
                .enumerate()
                .all(|(index, page)| page.page as usize == index + 1);
            if !ordered {
                return Err(StoryError::Library(format!(
                    "story '{}' pages must be numbered 1..={} in order",
                    story.id, PAGES_PER_STORY
                )));
            }
        }

        Ok(StoryLibrary {
            stories: parsed.stories,
        })
    }

    pub fn story(&self, id: StoryId) -> &StoryDefinition {
        self.stories
            .iter()
            .find(|story| story.id == id)
            .expect("library validated to contain every story id")
    }

    pub fn stories(&self) -> impl Iterator<Item = &StoryDefinition> {
        self.stories.iter()
    }

    pub fn templates(&self, id: StoryId, gender: &str) -> Vec<PageTemplate> {
        let story = self.story(id);
        let gender = match gender.trim() {
            "" => story.default_gender.as_str(),
            label => label,
        };

        let mut templates = Vec::with_capacity(story.pages.len() + 1);
        templates.push(PageTemplate {
            page_number: 0,
            base_prompt: story.cover.prompt.replace("{gender}", gender),
            scene_description: story.cover.description.clone(),
        });
        templates.extend(story.pages.iter().map(|page| PageTemplate {
            page_number: page.page,
            base_prompt: page.prompt.replace("{gender}", gender),
            scene_description: page.description.clone(),
        }));
        templates
    }
}

pub fn validate_character_name(name: &str) -> Result<String, StoryError> {
    let trimmed = name.split_whitespace().collect::<Vec<_>>().join(" ");
    if trimmed.is_empty() {
        return Err(StoryError::InvalidName("name cannot be empty".to_string()));
    }
    if trimmed.chars().count() > MAX_NAME_CHARS {
        return Err(StoryError::InvalidName(format!(
            "name must be at most {MAX_NAME_CHARS} characters"
        )));
    }
    if !trimmed
        .chars()
        .all(|ch| ch.is_alphabetic() || ch == ' ' || ch == '\'' || ch == '-')
    {
        return Err(StoryError::InvalidName(
            "only letters, spaces, apostrophes and hyphens are allowed".to_string(),
        ));
    }
    if !trimmed.chars().any(|ch| ch.is_alphabetic()) {
        return Err(StoryError::InvalidName("name must contain a letter".to_string()));
    }
    Ok(trimmed)
}
