use serde::{Deserialize, Serialize};

/// Model used when nothing has been selected yet.
pub const DEFAULT_MODEL: &str = "gpt-4o";

/// Models offered by the model selector.
pub fn list_models() -> Vec<String> {
    vec![
        "gpt-4o".to_string(),
        "gpt-4o-mini".to_string(),
        "gpt-4-turbo".to_string(),
        "gpt-3.5-turbo".to_string(),
        "o1".to_string(),
        "o1-mini".to_string(),
        "o3".to_string(),
        "o3-mini".to_string(),
    ]
}

/// Reasoning models reject `max_tokens` and take an effort hint instead.
pub fn is_reasoning_model(model: &str) -> bool {
    matches!(model, "o1" | "o1-mini" | "o3" | "o3-mini")
}

pub fn display_name(model: &str) -> String {
    if is_reasoning_model(model) {
        format!("{} (reasoning)", model)
    } else {
        model.to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningEffort {
    Low,
    #[default]
    Medium,
    High,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reasoning_family_is_exact() {
        assert!(is_reasoning_model("o1"));
        assert!(is_reasoning_model("o3-mini"));
        assert!(!is_reasoning_model("o1-preview"));
        assert!(!is_reasoning_model("gpt-4o"));
        assert!(!is_reasoning_model("O1"));
    }

    #[test]
    fn test_default_model_is_listed() {
        assert!(list_models().iter().any(|m| m == DEFAULT_MODEL));
    }

    #[test]
    fn test_reasoning_effort_serializes_lowercase() {
        assert_eq!(serde_json::to_value(ReasoningEffort::default()).unwrap(), "medium");
        let effort: ReasoningEffort = serde_json::from_str("\"high\"").unwrap();
        assert_eq!(effort, ReasoningEffort::High);
    }
}
