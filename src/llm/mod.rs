pub mod models;
pub mod providers;

use crate::config::LlmConfig;
use async_trait::async_trait;
use std::error::Error;
use std::fmt;

use models::{Clarification, LlmReply, RawReply, SqlDraft};

#[derive(Debug)]
pub enum LlmError {
    Connection(String),
    Response(String),
    Config(String),
}

impl fmt::Display for LlmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LlmError::Connection(msg) => write!(f, "LLM connection error: {}", msg),
            LlmError::Response(msg) => write!(f, "LLM response error: {}", msg),
            LlmError::Config(msg) => write!(f, "LLM configuration error: {}", msg),
        }
    }
}

impl Error for LlmError {}

/// One completion round-trip against a model backend. Implementations
/// must use deterministic decoding (temperature 0, bounded max-tokens).
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, LlmError>;
}

pub struct LlmManager {
    provider: Box<dyn CompletionProvider + Send + Sync>,
}

impl LlmManager {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let provider: Box<dyn CompletionProvider + Send + Sync> = match config.backend.as_str() {
            "anthropic" => Box::new(providers::anthropic::AnthropicProvider::new(config)?),
            "ollama" => Box::new(providers::ollama::OllamaProvider::new(config)?),
            _ => {
                return Err(LlmError::Config(format!(
                    "Unsupported LLM backend: {}",
                    config.backend
                )))
            }
        };

        Ok(Self { provider })
    }

    /// Build a manager around an explicit provider (used by tests).
    pub fn with_provider(provider: Box<dyn CompletionProvider + Send + Sync>) -> Self {
        Self { provider }
    }

    /// Invoke the model and parse its reply into the typed contract.
    pub async fn invoke(&self, prompt: &str) -> Result<LlmReply, LlmError> {
        let text = self.provider.complete(prompt).await?;
        parse_reply(&text)
    }
}

/// Parse untrusted model output. The only accepted shape is a single
/// top-level JSON object carrying the reply contract.
pub fn parse_reply(text: &str) -> Result<LlmReply, LlmError> {
    let text = strip_code_fences(text);
    let json = extract_first_json_object(text)
        .ok_or_else(|| LlmError::Response("model did not return a JSON object".to_string()))?;

    let raw: RawReply = serde_json::from_str(json).map_err(|e| {
        LlmError::Response(format!(
            "reply JSON parse failed: {}; raw={}",
            e,
            truncate(json, 800)
        ))
    })?;

    if raw.needs_clarification {
        let question = raw
            .clarifying_question
            .map(|q| q.trim().to_string())
            .unwrap_or_default();
        return Ok(LlmReply::Clarification(Clarification {
            question,
            confidence: raw.confidence,
            assumptions: raw.assumptions,
        }));
    }

    let sql = raw.sql.map(|s| s.trim().to_string()).unwrap_or_default();
    if sql.is_empty() {
        return Err(LlmError::Response(
            "reply carries neither sql nor a clarification".to_string(),
        ));
    }

    Ok(LlmReply::Sql(SqlDraft {
        sql,
        confidence: raw.confidence,
        assumptions: raw.assumptions,
    }))
}

/// Strip markdown code fences some models wrap around JSON output.
fn strip_code_fences(s: &str) -> &str {
    let s = s.trim();
    if let Some(rest) = s.strip_prefix("```json") {
        rest.strip_suffix("```").unwrap_or(rest).trim()
    } else if let Some(rest) = s.strip_prefix("```") {
        rest.strip_suffix("```").unwrap_or(rest).trim()
    } else {
        s
    }
}

/// Find the first balanced `{...}` block, skipping braces inside string
/// literals.
fn extract_first_json_object(s: &str) -> Option<&str> {
    let start = s.find('{')?;
    let bytes = s.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for i in start..bytes.len() {
        let b = bytes[i];
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&s[start..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

fn truncate(s: &str, n: usize) -> &str {
    if s.len() <= n {
        s
    } else {
        &s[..n]
    }
}
