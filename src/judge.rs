//! Client for the external evaluator service.
//!
//! Two sequential chat-completion calls: a structured pass that must return
//! the verdict JSON, then a narration pass that turns it into a paragraph for
//! the `Judge` message. Only the structured result is persisted.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::error::JudgeError;
use crate::prompts::{
    build_narration_prompt, build_verdict_prompt, NARRATION_SYSTEM, VERDICT_SYSTEM,
};
use crate::types::SideVerdict;

/// Structured verdict exactly as the evaluator produced it: the winner is
/// still the side token (`"agree"` / `"disagree"`); the engine resolves it to
/// a user id.
#[derive(Debug, Clone, Deserialize)]
pub struct RawVerdict {
    pub agree: SideVerdict,
    pub disagree: SideVerdict,
    pub winner: String,
}

#[async_trait]
pub trait Judge: Send + Sync {
    async fn evaluate(
        &self,
        subject_title: &str,
        agree_turns: &[String],
        disagree_turns: &[String],
    ) -> Result<(RawVerdict, String), JudgeError>;
}

#[derive(Debug, Clone)]
pub struct JudgeConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
}

pub struct HttpJudge {
    http: reqwest::Client,
    config: JudgeConfig,
}

impl HttpJudge {
    pub fn new(config: JudgeConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }

    async fn chat(
        &self,
        system: &str,
        user: &str,
        temperature: f64,
    ) -> Result<String, JudgeError> {
        let url = format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        );
        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&json!({
                "model": self.config.model,
                "messages": [
                    {"role": "system", "content": system},
                    {"role": "user", "content": user},
                ],
                "temperature": temperature,
                "max_tokens": 1024,
            }))
            .send()
            .await
            .map_err(|e| JudgeError::Transport(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(JudgeError::Transport(format!(
                "evaluator returned status {}",
                resp.status()
            )));
        }

        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| JudgeError::Transport(e.to_string()))?;

        let content = body["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or_default()
            .trim()
            .to_string();
        if content.is_empty() {
            return Err(JudgeError::Empty);
        }
        Ok(content)
    }
}

/// Models habitually wrap JSON answers in markdown fences.
fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let inner = inner.strip_prefix("json").unwrap_or(inner);
    inner.strip_suffix("```").unwrap_or(inner).trim()
}

pub fn parse_verdict(content: &str) -> Result<RawVerdict, JudgeError> {
    let cleaned = strip_code_fence(content);
    let mut verdict: RawVerdict =
        serde_json::from_str(cleaned).map_err(|e| JudgeError::Malformed(e.to_string()))?;
    verdict.agree.score = verdict.agree.score.min(100);
    verdict.disagree.score = verdict.disagree.score.min(100);
    let winner = verdict.winner.to_ascii_lowercase();
    if winner != "agree" && winner != "disagree" {
        return Err(JudgeError::Malformed(format!(
            "unknown winner token {:?}",
            verdict.winner
        )));
    }
    verdict.winner = winner;
    Ok(verdict)
}

#[async_trait]
impl Judge for HttpJudge {
    async fn evaluate(
        &self,
        subject_title: &str,
        agree_turns: &[String],
        disagree_turns: &[String],
    ) -> Result<(RawVerdict, String), JudgeError> {
        let prompt = build_verdict_prompt(subject_title, agree_turns, disagree_turns);
        let structured = self.chat(VERDICT_SYSTEM, &prompt, 0.3).await?;
        debug!(len = structured.len(), "structured verdict received");
        let verdict = parse_verdict(&structured)?;

        let narration_prompt =
            build_narration_prompt(&verdict.agree, &verdict.disagree, &verdict.winner);
        let narration = self.chat(NARRATION_SYSTEM, &narration_prompt, 0.7).await?;

        Ok((verdict, narration))
    }
}
