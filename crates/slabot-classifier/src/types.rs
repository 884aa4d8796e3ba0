use serde::{Deserialize, Serialize};

use slabot_core::types::Category;

/// The classifier contract: every step of the cascade produces one of
/// these, tagged with the model that decided.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub category: Category,
    /// Confidence in `[0, 1]`.
    pub confidence: f64,
    /// Producing step: `cache`, `keyword`, or the AI model name.
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

impl Classification {
    pub fn new(category: Category, confidence: f64, model: impl Into<String>) -> Self {
        Self {
            category,
            confidence,
            model: model.into(),
            reasoning: None,
        }
    }

    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = Some(reasoning.into());
        self
    }
}
