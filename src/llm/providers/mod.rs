pub mod anthropic;
pub mod ollama;
