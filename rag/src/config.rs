use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::RagError;

/// Upper bound on conversation turns handed to the prompt.
pub const MAX_HISTORY_TURNS: usize = 5;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EmbedBackend {
    Ollama,
    Hashing,
}

impl FromStr for EmbedBackend {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ollama" => Ok(EmbedBackend::Ollama),
            "hashing" => Ok(EmbedBackend::Hashing),
            other => Err(RagError::Config(format!(
                "unknown RAG_EMBED_BACKEND '{}' (expected ollama or hashing)",
                other
            ))),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub client: String,
    pub data_dir: PathBuf,
    pub index_dir: PathBuf,
    pub feedback_path: PathBuf,
    pub log_dir: PathBuf,
    pub embed_backend: EmbedBackend,
    pub hashing_dims: usize,
    pub embed_batch_size: usize,
    pub ollama_url: String,
    pub embed_model: String,
    pub chat_model: String,
    pub top_k: usize,
    pub max_new_tokens: usize,
    pub history_turns: usize,
    /// Requests per window per identity; 0 turns the limiter off.
    pub rate_limit: u32,
    pub rate_window: Duration,
    pub embed_timeout: Duration,
    pub generate_timeout: Duration,
    pub system_prompt: String,
    /// Take the caller identity from the `x-user` header. Only for a server
    /// behind a proxy that sets it; otherwise callers are keyed by address.
    pub trust_user_header: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            client: "default".to_string(),
            data_dir: PathBuf::from("./data"),
            index_dir: PathBuf::from("./rag_index"),
            feedback_path: PathBuf::from("./rag_feedback.jsonl"),
            log_dir: PathBuf::from("./logs"),
            embed_backend: EmbedBackend::Ollama,
            hashing_dims: 256,
            embed_batch_size: 64,
            ollama_url: "http://localhost:11434".to_string(),
            embed_model: "all-minilm".to_string(),
            chat_model: "llama3".to_string(),
            top_k: 5,
            max_new_tokens: 256,
            history_turns: MAX_HISTORY_TURNS,
            rate_limit: 5,
            rate_window: Duration::from_secs(60),
            embed_timeout: Duration::from_secs(30),
            generate_timeout: Duration::from_secs(120),
            system_prompt: "You are a helpful analytics assistant. Use the provided context and \
                conversation history to answer the user's question. If the answer is not in the \
                context, say you don't know."
                .to_string(),
            trust_user_header: false,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, RagError> {
        // Load .env if present so model and path settings work without manual `source .env`.
        let _ = dotenvy::dotenv();
        let d = Self::default();
        let cfg = Self {
            client: env::var("RAG_CLIENT").unwrap_or(d.client),
            data_dir: env::var("RAG_DATA_DIR").map(PathBuf::from).unwrap_or(d.data_dir),
            index_dir: env::var("RAG_INDEX_DIR").map(PathBuf::from).unwrap_or(d.index_dir),
            feedback_path: env::var("RAG_FEEDBACK_PATH")
                .map(PathBuf::from)
                .unwrap_or(d.feedback_path),
            log_dir: env::var("RAG_LOG_DIR").map(PathBuf::from).unwrap_or(d.log_dir),
            embed_backend: match env::var("RAG_EMBED_BACKEND") {
                Ok(v) => v.parse()?,
                Err(_) => d.embed_backend,
            },
            hashing_dims: parse_var("RAG_HASHING_DIMS")?.unwrap_or(d.hashing_dims),
            embed_batch_size: parse_var("RAG_EMBED_BATCH")?.unwrap_or(d.embed_batch_size),
            ollama_url: env::var("OLLAMA_URL").unwrap_or(d.ollama_url),
            embed_model: env::var("OLLAMA_EMBED_MODEL").unwrap_or(d.embed_model),
            chat_model: env::var("OLLAMA_CHAT_MODEL").unwrap_or(d.chat_model),
            top_k: parse_var("RAG_TOP_K")?.unwrap_or(d.top_k),
            max_new_tokens: parse_var("RAG_MAX_NEW_TOKENS")?.unwrap_or(d.max_new_tokens),
            history_turns: parse_var::<usize>("RAG_HISTORY_TURNS")?
                .unwrap_or(d.history_turns)
                .min(MAX_HISTORY_TURNS),
            rate_limit: parse_var("RAG_RATE_LIMIT")?.unwrap_or(d.rate_limit),
            rate_window: parse_var("RAG_RATE_WINDOW_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(d.rate_window),
            embed_timeout: parse_var("RAG_EMBED_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(d.embed_timeout),
            generate_timeout: parse_var("RAG_GENERATE_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(d.generate_timeout),
            system_prompt: env::var("RAG_SYSTEM_PROMPT").unwrap_or(d.system_prompt),
            trust_user_header: parse_var("RAG_TRUST_USER_HEADER")?.unwrap_or(d.trust_user_header),
        };
        cfg.validate()?;
        Ok(cfg)
    }

    /// Rejects settings that would make every query silently retrieve
    /// nothing or never throttle.
    pub fn validate(&self) -> Result<(), RagError> {
        if self.top_k == 0 {
            return Err(RagError::Config("RAG_TOP_K must be at least 1".to_string()));
        }
        if self.rate_limit > 0 && self.rate_window.is_zero() {
            return Err(RagError::Config(
                "RAG_RATE_WINDOW_SECS must be at least 1 when RAG_RATE_LIMIT is set".to_string(),
            ));
        }
        if self.max_new_tokens == 0 {
            return Err(RagError::Config("RAG_MAX_NEW_TOKENS must be at least 1".to_string()));
        }
        Ok(())
    }

    /// Directory holding the published snapshots of the configured client.
    pub fn client_index_dir(&self) -> PathBuf {
        self.index_dir.join(sanitize_client_name(&self.client))
    }

    /// Directory holding the per-platform exports of the configured client.
    pub fn client_data_dir(&self) -> PathBuf {
        self.data_dir.join(sanitize_client_name(&self.client))
    }
}

fn parse_var<T: FromStr>(key: &str) -> Result<Option<T>, RagError> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| RagError::Config(format!("{} has an invalid value: '{}'", key, raw))),
        Err(_) => Ok(None),
    }
}

fn sanitize_client_name(name: &str) -> String {
    let mut out = String::new();
    for c in name.chars() {
        if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
            out.push(c);
        } else if c.is_ascii_whitespace() || c == '.' {
            out.push('_');
        }
    }
    if out.is_empty() { "default".to_string() } else { out }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_names_are_made_path_safe() {
        assert_eq!(sanitize_client_name("TechFlow Solutions"), "TechFlow_Solutions");
        assert_eq!(sanitize_client_name("../etc"), "__etc");
        assert_eq!(sanitize_client_name("///"), "default");
    }

    #[test]
    fn zero_top_k_and_zero_window_are_rejected() {
        assert!(Config::default().validate().is_ok());

        let cfg = Config { top_k: 0, ..Config::default() };
        assert!(matches!(cfg.validate(), Err(RagError::Config(msg)) if msg.contains("RAG_TOP_K")));

        let cfg = Config { rate_window: Duration::ZERO, ..Config::default() };
        assert!(matches!(cfg.validate(), Err(RagError::Config(msg)) if msg.contains("RAG_RATE_WINDOW_SECS")));

        // A zero window is harmless once the limiter is off.
        let cfg = Config { rate_window: Duration::ZERO, rate_limit: 0, ..Config::default() };
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn backend_names_parse_case_insensitively() {
        assert_eq!("Hashing".parse::<EmbedBackend>().unwrap(), EmbedBackend::Hashing);
        assert_eq!(" ollama ".parse::<EmbedBackend>().unwrap(), EmbedBackend::Ollama);
        assert!("faiss".parse::<EmbedBackend>().is_err());
    }
}
