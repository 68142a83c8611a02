//! services/judge_service.rs
//! Juez semantico externo (opcional): decide si un diff es contenido o ruido tecnico.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;

use crate::{config::channel_config::JudgeConfig, services::classifier_service::TokenDiff};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JudgeVerdict {
    Content,
    Technical,
    Ambiguous,
}

impl JudgeVerdict {
    /// Contrato binario estricto: solo "CONTENT" o "TECHNICAL" son respuestas validas.
    pub fn from_reply(reply: &str) -> Self {
        let cleaned = reply
            .trim()
            .trim_matches(|c: char| c == '"' || c == '.' || c == '\'')
            .to_uppercase();
        match cleaned.as_str() {
            "CONTENT" => JudgeVerdict::Content,
            "TECHNICAL" => JudgeVerdict::Technical,
            _ => JudgeVerdict::Ambiguous,
        }
    }
}

#[async_trait]
pub trait SemanticJudge: Send + Sync {
    async fn classify(&self, diff: &TokenDiff) -> Result<JudgeVerdict>;
}

const SYSTEM_PROMPT: &str = "You are a web content analyzer. Determine if the changes between two \
webpage versions represent actual content/data changes or just technical/structural changes \
(like HTML attributes, loading states, scripts, etc.). Respond with only \"CONTENT\" if it's a \
real content change, or \"TECHNICAL\" if it's just technical/structural changes.";

/// Juez sobre la API de chat completions de OpenAI.
#[derive(Clone)]
pub struct OpenAiJudge {
    config: JudgeConfig,
    http_client: Client,
}

impl OpenAiJudge {
    pub fn new(config: JudgeConfig) -> Self {
        Self {
            config,
            http_client: Client::new(),
        }
    }
}

#[async_trait]
impl SemanticJudge for OpenAiJudge {
    async fn classify(&self, diff: &TokenDiff) -> Result<JudgeVerdict> {
        let payload = serde_json::json!({
            "model": self.config.model,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                {
                    "role": "user",
                    "content": format!(
                        "Analyze these webpage changes:\n\nChanges detected:\n{}\n\nIs this a real \
                         content/data change or just technical/structural changes? Respond with only \
                         \"CONTENT\" or \"TECHNICAL\".",
                        diff.summary()
                    )
                }
            ],
            "max_tokens": 10,
            "temperature": 0
        });

        let resp = self
            .http_client
            .post(&self.config.endpoint)
            .bearer_auth(&self.config.api_key)
            .json(&payload)
            .send()
            .await
            .context("(OpenAiJudge) Fallo al hacer POST a chat/completions")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body_txt = resp.text().await.unwrap_or_default();
            return Err(anyhow!("(OpenAiJudge) status={} body='{}'", status, body_txt));
        }

        let json_val = resp.json::<serde_json::Value>().await?;
        let reply = json_val
            .pointer("/choices/0/message/content")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow!("(OpenAiJudge) Respuesta sin choices[0].message.content"))?;

        Ok(JudgeVerdict::from_reply(reply))
    }
}
