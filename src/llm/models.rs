use serde::{Deserialize, Serialize};

/// JSON object the model is instructed to emit. Fields are defaulted so a
/// sparse-but-valid object still parses; the contract invariants are
/// checked when converting to [`LlmReply`].
#[derive(Debug, Deserialize)]
pub struct RawReply {
    #[serde(default)]
    pub sql: Option<String>,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub assumptions: Vec<String>,
    #[serde(default)]
    pub needs_clarification: bool,
    #[serde(default)]
    pub clarifying_question: Option<String>,
}

/// A candidate query produced by the model.
#[derive(Debug, Clone, Serialize)]
pub struct SqlDraft {
    pub sql: String,
    pub confidence: f64,
    pub assumptions: Vec<String>,
}

/// The model asked for more information instead of emitting SQL.
#[derive(Debug, Clone, Serialize)]
pub struct Clarification {
    pub question: String,
    pub confidence: f64,
    pub assumptions: Vec<String>,
}

/// Typed outcome of one model invocation.
#[derive(Debug, Clone)]
pub enum LlmReply {
    Sql(SqlDraft),
    Clarification(Clarification),
}

impl LlmReply {
    pub fn confidence(&self) -> f64 {
        match self {
            LlmReply::Sql(d) => d.confidence,
            LlmReply::Clarification(c) => c.confidence,
        }
    }

    pub fn assumptions(&self) -> &[String] {
        match self {
            LlmReply::Sql(d) => &d.assumptions,
            LlmReply::Clarification(c) => &c.assumptions,
        }
    }
}
