//! LLM-backed insight capabilities: sentiment, summarization, decomposition.
//!
//! Each handler renders a fixed prompt template, sends it through the
//! configured `ChatProvider`, and parses the reply. Upstream transport
//! failures surface as retryable errors; an unparseable reply is permanent.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use gridpulse_core::error::{GridPulseError, Result};
use gridpulse_providers::ChatProvider;

use crate::registry::CapabilityProvider;
use crate::task::Capability;

const DEFAULT_SUMMARY_WORDS: u64 = 120;
const DEFAULT_MAX_SUBTASKS: u64 = 5;

/// Insight provider — available iff the chat backend has credentials.
pub struct InsightProvider {
    chat: Box<dyn ChatProvider>,
}

const CAPABILITIES: [Capability; 3] = [
    Capability::SentimentAnalysis,
    Capability::Summarization,
    Capability::TaskDecomposition,
];

impl InsightProvider {
    pub fn new(chat: Box<dyn ChatProvider>) -> Self {
        Self { chat }
    }

    async fn sentiment(&self, params: &Value) -> Result<Value> {
        let text = require_str(params, "text")?;
        let prompt = format!(
            "Classify the sentiment of the following operator note or report.\n\
             Reply with ONLY a JSON object: \
             {{\"label\": \"positive\"|\"negative\"|\"neutral\", \
             \"confidence\": <0.0-1.0>, \"rationale\": \"<one sentence>\"}}\n\n\
             Text:\n{text}"
        );
        let reply = self
            .chat
            .chat(&prompt, Some("You are a precise sentiment classifier."))
            .await?;

        #[derive(Deserialize)]
        struct SentimentReply {
            label: String,
            confidence: f64,
            #[serde(default)]
            rationale: Option<String>,
        }

        let parsed: SentimentReply =
            serde_json::from_str(extract_json(&reply)).map_err(|e| {
                GridPulseError::Execution(format!("unparseable sentiment reply: {e}"))
            })?;

        Ok(json!({
            "label": parsed.label,
            "confidence": parsed.confidence,
            "rationale": parsed.rationale,
        }))
    }

    async fn summarize(&self, params: &Value) -> Result<Value> {
        let text = require_str(params, "text")?;
        let max_words = params
            .get("max_words")
            .and_then(|v| v.as_u64())
            .unwrap_or(DEFAULT_SUMMARY_WORDS);
        let prompt = format!(
            "Summarize the following report in at most {max_words} words. \
             Reply with the summary text only.\n\n{text}"
        );
        let reply = self.chat.chat(&prompt, None).await?;
        let summary = reply.trim().to_string();
        if summary.is_empty() {
            return Err(GridPulseError::Execution("empty summary reply".into()));
        }
        Ok(json!({
            "summary": summary,
            "max_words": max_words,
        }))
    }

    async fn decompose(&self, params: &Value) -> Result<Value> {
        let goal = require_str(params, "goal")?;
        let max_subtasks = params
            .get("max_subtasks")
            .and_then(|v| v.as_u64())
            .unwrap_or(DEFAULT_MAX_SUBTASKS);
        let prompt = format!(
            "Break the following goal into at most {max_subtasks} concrete subtasks.\n\
             Reply with ONLY a JSON array of objects: \
             [{{\"title\": \"...\", \"description\": \"...\"}}]\n\n\
             Goal: {goal}"
        );
        let reply = self.chat.chat(&prompt, None).await?;

        #[derive(Deserialize)]
        struct Subtask {
            title: String,
            #[serde(default)]
            description: String,
        }

        let subtasks: Vec<Subtask> =
            serde_json::from_str(extract_json(&reply)).map_err(|e| {
                GridPulseError::Execution(format!("unparseable decomposition reply: {e}"))
            })?;
        if subtasks.is_empty() {
            return Err(GridPulseError::Execution(
                "decomposition reply contained no subtasks".into(),
            ));
        }

        Ok(json!({
            "goal": goal,
            "subtasks": subtasks
                .iter()
                .map(|s| json!({"title": s.title, "description": s.description}))
                .collect::<Vec<_>>(),
        }))
    }
}

#[async_trait]
impl CapabilityProvider for InsightProvider {
    fn name(&self) -> &str {
        "insight"
    }

    fn description(&self) -> &str {
        "Language-model analysis: sentiment, summarization, goal decomposition"
    }

    fn capabilities(&self) -> &[Capability] {
        &CAPABILITIES
    }

    async fn is_available(&self) -> bool {
        self.chat.health_check().await
    }

    async fn execute(&self, capability: Capability, params: &Value) -> Result<Value> {
        match capability {
            Capability::SentimentAnalysis => self.sentiment(params).await,
            Capability::Summarization => self.summarize(params).await,
            Capability::TaskDecomposition => self.decompose(params).await,
            other => Err(GridPulseError::NotFound(format!(
                "capability '{other}' on provider 'insight'"
            ))),
        }
    }
}

fn require_str<'a>(params: &'a Value, key: &str) -> Result<&'a str> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| GridPulseError::Validation(format!("'{key}' must be a non-empty string")))
}

/// Peel a code fence or surrounding prose off a model reply, leaving the
/// JSON payload.
fn extract_json(reply: &str) -> &str {
    let trimmed = reply.trim();
    if let Some(inner) = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
    {
        return inner.strip_suffix("```").unwrap_or(inner).trim();
    }
    // Fall back to the outermost bracket pair
    let start = trimmed.find(['{', '[']);
    let end = trimmed.rfind(['}', ']']);
    match (start, end) {
        (Some(s), Some(e)) if e >= s => &trimmed[s..=e],
        _ => trimmed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Chat stub returning a canned reply (or failing like a dead upstream).
    struct FakeChat {
        reply: std::result::Result<&'static str, &'static str>,
        healthy: bool,
    }

    #[async_trait]
    impl ChatProvider for FakeChat {
        fn name(&self) -> &str {
            "fake"
        }
        async fn chat(&self, _prompt: &str, _system: Option<&str>) -> Result<String> {
            match self.reply {
                Ok(r) => Ok(r.to_string()),
                Err(e) => Err(GridPulseError::Http(e.to_string())),
            }
        }
        async fn health_check(&self) -> bool {
            self.healthy
        }
    }

    fn provider(reply: std::result::Result<&'static str, &'static str>) -> InsightProvider {
        InsightProvider::new(Box::new(FakeChat {
            reply,
            healthy: true,
        }))
    }

    #[tokio::test]
    async fn test_sentiment_parses_json_reply() {
        let p = provider(Ok(
            r#"{"label": "negative", "confidence": 0.92, "rationale": "reports an outage"}"#,
        ));
        let out = p
            .execute(
                Capability::SentimentAnalysis,
                &json!({"text": "Transformer 4 tripped again overnight."}),
            )
            .await
            .unwrap();
        assert_eq!(out["label"], json!("negative"));
        assert_eq!(out["confidence"], json!(0.92));
    }

    #[tokio::test]
    async fn test_sentiment_accepts_fenced_reply() {
        let p = provider(Ok(
            "```json\n{\"label\": \"positive\", \"confidence\": 0.8}\n```",
        ));
        let out = p
            .execute(Capability::SentimentAnalysis, &json!({"text": "All clear."}))
            .await
            .unwrap();
        assert_eq!(out["label"], json!("positive"));
    }

    #[tokio::test]
    async fn test_non_json_reply_is_permanent_execution_error() {
        let p = provider(Ok("The sentiment is probably negative, I think."));
        let err = p
            .execute(Capability::SentimentAnalysis, &json!({"text": "hmm"}))
            .await
            .unwrap_err();
        assert!(matches!(err, GridPulseError::Execution(_)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_upstream_failure_is_retryable() {
        let p = provider(Err("502 bad gateway"));
        let err = p
            .execute(Capability::Summarization, &json!({"text": "long report"}))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_decompose_parses_subtask_array() {
        let p = provider(Ok(
            r#"[{"title": "Audit feeders", "description": "Check feeder load"},
                {"title": "Schedule maintenance"}]"#,
        ));
        let out = p
            .execute(
                Capability::TaskDecomposition,
                &json!({"goal": "Reduce peak load on substation 7"}),
            )
            .await
            .unwrap();
        assert_eq!(out["subtasks"].as_array().unwrap().len(), 2);
        assert_eq!(out["subtasks"][0]["title"], json!("Audit feeders"));
        assert_eq!(out["subtasks"][1]["description"], json!(""));
    }

    #[tokio::test]
    async fn test_missing_params_rejected() {
        let p = provider(Ok("unused"));
        let err = p
            .execute(Capability::Summarization, &json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, GridPulseError::Validation(_)));
        let err = p
            .execute(Capability::SentimentAnalysis, &json!({"text": "   "}))
            .await
            .unwrap_err();
        assert!(matches!(err, GridPulseError::Validation(_)));
    }

    #[tokio::test]
    async fn test_availability_follows_health_check() {
        let p = InsightProvider::new(Box::new(FakeChat {
            reply: Ok("x"),
            healthy: false,
        }));
        assert!(!p.is_available().await);
    }

    use serde_json::json;
}
