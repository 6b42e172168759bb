use crate::utils::text::char_prefix;

const SECTION_SEPARATOR: &str = "\n\n";
const MAX_BASE_RESERVE: usize = 800;
const MIN_SECTION_FRAGMENT: usize = 40;

pub fn truncate_at_sentence(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let prefix = char_prefix(text, max_chars);
    if let Some(end) = prefix.rfind('.') {
        if end > 0 {
            return prefix[..=end].to_string();
        }
    }
    if let Some(end) = prefix.rfind(char::is_whitespace) {
        if end > 0 {
            return prefix[..end].trim_end().to_string();
        }
    }
    prefix.to_string()
}

fn base_reserve(max_chars: usize) -> usize {
    MAX_BASE_RESERVE.min(max_chars / 5)
}

pub fn fit_prompt(base: &str, sections: &[String], max_chars: usize) -> String {
    let sections: Vec<&str> = sections
        .iter()
        .map(|section| section.trim())
        .filter(|section| !section.is_empty())
        .collect();

    // Up to 800 chars stay free for the consistency sections.
    let base_limit = if sections.is_empty() {
        max_chars
    } else {
        max_chars.saturating_sub(base_reserve(max_chars))
    };
    let mut prompt = truncate_at_sentence(base.trim(), base_limit);
    let mut used = prompt.chars().count();
    let separator_len = SECTION_SEPARATOR.chars().count();

    for section in sections {
        let remaining = max_chars.saturating_sub(used + separator_len);
        let length = section.chars().count();
        if length <= remaining {
            prompt.push_str(SECTION_SEPARATOR);
            prompt.push_str(section);
            used += separator_len + length;
            continue;
        }
        if remaining >= MIN_SECTION_FRAGMENT {
            let fragment = truncate_at_sentence(section, remaining);
            if fragment.chars().count() >= MIN_SECTION_FRAGMENT {
                prompt.push_str(SECTION_SEPARATOR);
                prompt.push_str(&fragment);
            }
        }
        break;
    }
    prompt
}
