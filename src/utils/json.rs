use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

static FENCE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```[A-Za-z]*\s*(.*?)```").expect("valid code fence regex"));

pub fn strip_code_fences(text: &str) -> &str {
    match FENCE_RE.captures(text).and_then(|caps| caps.get(1)) {
        Some(body) => body.as_str().trim(),
        None => text.trim(),
    }
}

pub fn parse_llm_json(text: &str) -> Option<Value> {
    let candidate = strip_code_fences(text);
    if candidate.is_empty() {
        return None;
    }
    if let Ok(value) = serde_json::from_str::<Value>(candidate) {
        return Some(value);
    }

    // Prose around a bare object: take the outermost braces.
    let start = candidate.find('{')?;
    let end = candidate.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str::<Value>(&candidate[start..=end]).ok()
}

pub fn value_to_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.trim().to_string(),
        Value::Bool(flag) => flag.to_string(),
        Value::Number(number) => number.to_string(),
        Value::Array(items) => items
            .iter()
            .map(value_to_text)
            .filter(|item| !item.is_empty())
            .collect::<Vec<_>>()
            .join(", "),
        Value::Object(map) => map
            .iter()
            .map(|(key, item)| (key, value_to_text(item)))
            .filter(|(_, item)| !item.is_empty())
            .map(|(key, item)| format!("{}: {}", key.replace('_', " "), item))
            .collect::<Vec<_>>()
            .join("; "),
    }
}

pub fn string_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| item.as_str())
            .map(|item| item.trim().to_string())
            .filter(|item| !item.is_empty())
            .collect(),
        Some(Value::String(text)) if !text.trim().is_empty() => vec![text.trim().to_string()],
        _ => Vec::new(),
    }
}

pub fn bool_field(value: &Value, key: &str) -> Option<bool> {
    match value.get(key)? {
        Value::Bool(flag) => Some(*flag),
        Value::String(text) => match text.trim().to_lowercase().as_str() {
            "true" | "yes" => Some(true),
            "false" | "no" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_json_inside_code_fence() {
        let raw = "Here you go:\n```json\n{\"narrative\": [\"Emma ran.\"]}\n```\nEnjoy!";
        let value = parse_llm_json(raw).expect("json");
        assert_eq!(value["narrative"][0], "Emma ran.");
    }

    #[test]
    fn parses_json_inside_unlabelled_fence() {
        let raw = "```\n{\"matches\": false}\n```";
        assert_eq!(parse_llm_json(raw), Some(json!({"matches": false})));
    }

    #[test]
    fn recovers_object_surrounded_by_prose() {
        let raw = "Sure! {\"objects\": \"basket\"} Hope this helps.";
        assert_eq!(parse_llm_json(raw), Some(json!({"objects": "basket"})));
    }

    #[test]
    fn rejects_plain_prose() {
        assert_eq!(parse_llm_json("Emma walked into the forest."), None);
        assert_eq!(parse_llm_json("   "), None);
    }

    #[test]
    fn flattens_nested_values() {
        let value = json!({"hair": "brown curls", "eyes": {"color": "green"}, "extra": null});
        assert_eq!(value_to_text(&value), "eyes: color: green; hair: brown curls");
    }

    #[test]
    fn string_list_skips_blank_and_non_string_items() {
        let value = json!(["One.", "  ", 3, "Two."]);
        assert_eq!(string_list(Some(&value)), vec!["One.", "Two."]);
        assert_eq!(string_list(Some(&json!("Solo."))), vec!["Solo."]);
        assert!(string_list(Some(&json!(42))).is_empty());
        assert!(string_list(None).is_empty());
    }

    #[test]
    fn bool_field_accepts_string_booleans() {
        let value = json!({"matches": "Yes", "other": 1});
        assert_eq!(bool_field(&value, "matches"), Some(true));
        assert_eq!(bool_field(&value, "other"), None);
        assert_eq!(bool_field(&value, "missing"), None);
    }
}
