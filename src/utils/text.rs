pub fn truncate_for_log(value: &str, limit: usize) -> String {
    if value.chars().count() <= limit {
        return value.to_string();
    }
    let truncated: String = value.chars().take(limit).collect();
    format!("{truncated}... (truncated)")
}

pub fn char_prefix(value: &str, limit: usize) -> &str {
    match value.char_indices().nth(limit) {
        Some((byte_index, _)) => &value[..byte_index],
        None => value,
    }
}

pub fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|needle| haystack.contains(needle))
}
