//! AI classification step — an OpenAI-compatible chat-completions call
//! that returns a strict JSON verdict.

use std::time::Duration;

use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use slabot_core::config::AiConfig;
use slabot_core::types::Category;

use crate::error::{ClassifierError, Result};
use crate::types::Classification;

const SYSTEM_PROMPT: &str = "\
Ты — классификатор сообщений клиентов бухгалтерской компании. \
Отнеси сообщение к одной из категорий: REQUEST (вопрос или задача, требующая \
ответа бухгалтера), SPAM (реклама, нерелевантные ссылки), GRATITUDE \
(благодарность без вопроса), CLARIFICATION (уточнение, подтверждение, \
приветствие без вопроса). \
Ответь строго JSON-объектом вида \
{\"category\":\"REQUEST\",\"confidence\":0.95,\"reasoning\":\"...\"} без \
какого-либо текста вокруг.";

pub struct AiClassifier {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl AiClassifier {
    /// Returns `None` when no API key is configured; the cascade then
    /// runs cache + keyword only.
    pub fn from_config(config: &AiConfig) -> Option<Self> {
        let api_key = config.api_key.clone()?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .ok()?;
        Some(Self {
            client,
            api_key,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub async fn classify(&self, text: &str) -> Result<Classification> {
        let body = json!({
            "model": self.model,
            "temperature": 0,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": text},
            ],
        });
        let url = format!("{}/v1/chat/completions", self.base_url);

        debug!(model = %self.model, "sending classification request");

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = resp.status().as_u16();
        if status == 429 {
            return Err(ClassifierError::RateLimited);
        }
        if !resp.status().is_success() {
            let message = resp.text().await.unwrap_or_default();
            warn!(status, body = %message, "AI classifier API error");
            return Err(ClassifierError::Api { status, message });
        }

        let api_resp: ApiResponse = resp
            .json()
            .await
            .map_err(|e| ClassifierError::Parse(e.to_string()))?;

        let content = api_resp
            .choices
            .first()
            .map(|c| c.message.content.as_str())
            .ok_or_else(|| ClassifierError::Parse("empty choices".to_string()))?;

        parse_verdict(content, &self.model)
    }
}

/// Parse the model's JSON verdict. Tolerates a fenced code block around
/// the object, which some models insist on emitting.
fn parse_verdict(content: &str, model: &str) -> Result<Classification> {
    let trimmed = content
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    let verdict: Verdict = serde_json::from_str(trimmed)
        .map_err(|e| ClassifierError::Parse(format!("bad verdict JSON: {e}")))?;

    let category: Category = verdict
        .category
        .parse()
        .map_err(|e: String| ClassifierError::Parse(e))?;

    Ok(Classification {
        category,
        confidence: verdict.confidence.clamp(0.0, 1.0),
        model: model.to_string(),
        reasoning: verdict.reasoning,
    })
}

#[derive(Deserialize)]
struct Verdict {
    category: String,
    confidence: f64,
    reasoning: Option<String>,
}

#[derive(Deserialize)]
struct ApiResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_plain_verdict() {
        let c = parse_verdict(
            r#"{"category":"REQUEST","confidence":0.92,"reasoning":"question about invoice"}"#,
            "gpt-4o-mini",
        )
        .unwrap();
        assert_eq!(c.category, Category::Request);
        assert!((c.confidence - 0.92).abs() < f64::EPSILON);
        assert_eq!(c.model, "gpt-4o-mini");
    }

    #[test]
    fn parses_a_fenced_verdict() {
        let c = parse_verdict(
            "```json\n{\"category\":\"SPAM\",\"confidence\":0.8,\"reasoning\":null}\n```",
            "m",
        )
        .unwrap();
        assert_eq!(c.category, Category::Spam);
    }

    #[test]
    fn confidence_is_clamped() {
        let c = parse_verdict(r#"{"category":"REQUEST","confidence":1.7}"#, "m").unwrap();
        assert!((c.confidence - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn garbage_is_a_parse_error() {
        let err = parse_verdict("I think this is a request", "m").unwrap_err();
        assert_eq!(err.kind(), "parse_error");
    }

    #[test]
    fn unknown_category_is_a_parse_error() {
        let err = parse_verdict(r#"{"category":"URGENT","confidence":0.9}"#, "m").unwrap_err();
        assert_eq!(err.kind(), "parse_error");
    }
}
