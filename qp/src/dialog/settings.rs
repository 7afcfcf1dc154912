//! Generation configuration carried in conversation metadata

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value, json};

use super::keys;
use crate::domain::Metadata;

/// Flat key/value generation settings (`questions`, `difficulty`, `type`, ...)
pub type GenerationConfig = Map<String, Value>;

/// Keys shown first, in this order, when echoing a config
const KNOWN_KEYS: [&str; 3] = ["questions", "difficulty", "type"];

static SEPARATOR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[,，、\s]+").expect("valid regex"));

/// `questions=10, difficulty=middle, type=mcq`
pub fn default_config() -> GenerationConfig {
    let mut config = GenerationConfig::new();
    config.insert("questions".to_string(), json!(10));
    config.insert("difficulty".to_string(), json!("middle"));
    config.insert("type".to_string(), json!("mcq"));
    config
}

/// Defaults overlaid with whatever the conversation already stored
pub fn current_config(metadata: &Metadata) -> GenerationConfig {
    let mut config = default_config();
    if let Some(Value::Object(stored)) = metadata.get(keys::QG_CONFIG) {
        config.extend(stored.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
    config
}

/// Parse `key=value[, key=value ...]`
///
/// Pairs are separated by commas or whitespace and split on the first `=`.
/// Keys are lower-cased; integer values become JSON numbers. Fragments
/// without `=` or with an empty key/value are dropped.
pub fn parse_assignments(body: &str) -> Vec<(String, Value)> {
    SEPARATOR
        .split(body.trim())
        .filter_map(|fragment| {
            let (key, value) = fragment.split_once('=')?;
            let key = key.trim().to_lowercase();
            let value = value.trim();
            if key.is_empty() || value.is_empty() {
                return None;
            }
            let value = match value.parse::<i64>() {
                Ok(n) => json!(n),
                Err(_) => json!(value),
            };
            Some((key, value))
        })
        .collect()
}

/// Apply parsed pairs onto a config; later pairs win
pub fn merge_config(mut config: GenerationConfig, pairs: Vec<(String, Value)>) -> GenerationConfig {
    config.extend(pairs);
    config
}

/// Render as `questions=10, difficulty=middle, type=mcq[, extra=...]`
pub fn describe_config(config: &GenerationConfig) -> String {
    let known = KNOWN_KEYS
        .iter()
        .filter_map(|key| config.get(*key).map(|value| (*key, value)));
    let extra = config
        .iter()
        .filter(|(key, _)| !KNOWN_KEYS.contains(&key.as_str()))
        .map(|(key, value)| (key.as_str(), value));

    known
        .chain(extra)
        .map(|(key, value)| match value {
            Value::String(s) => format!("{}={}", key, s),
            other => format!("{}={}", key, other),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        assert_eq!(
            describe_config(&default_config()),
            "questions=10, difficulty=middle, type=mcq"
        );
    }

    #[test]
    fn test_parse_assignments_commas_and_whitespace() {
        let pairs = parse_assignments("Questions=20, difficulty=hard type=essay");
        assert_eq!(
            pairs,
            vec![
                ("questions".to_string(), json!(20)),
                ("difficulty".to_string(), json!("hard")),
                ("type".to_string(), json!("essay")),
            ]
        );
    }

    #[test]
    fn test_parse_assignments_splits_on_first_equals() {
        let pairs = parse_assignments("note=a=b");
        assert_eq!(pairs, vec![("note".to_string(), json!("a=b"))]);
    }

    #[test]
    fn test_parse_assignments_drops_garbage() {
        assert!(parse_assignments("").is_empty());
        assert!(parse_assignments("questions").is_empty());
        assert!(parse_assignments("=5, difficulty=").is_empty());
    }

    #[test]
    fn test_parse_assignments_full_width_comma() {
        let pairs = parse_assignments("questions=5，difficulty=easy");
        assert_eq!(pairs.len(), 2);
    }

    #[test]
    fn test_current_config_overlays_stored_values() {
        let mut metadata = Metadata::new();
        metadata.insert(keys::QG_CONFIG.to_string(), json!({"questions": 3, "lang": "ja"}));

        let config = current_config(&metadata);
        assert_eq!(config["questions"], json!(3));
        assert_eq!(config["difficulty"], json!("middle"));
        assert_eq!(describe_config(&config), "questions=3, difficulty=middle, type=mcq, lang=ja");
    }

    #[test]
    fn test_current_config_ignores_non_object() {
        let mut metadata = Metadata::new();
        metadata.insert(keys::QG_CONFIG.to_string(), json!("garbage"));
        assert_eq!(current_config(&metadata), default_config());
    }
}
