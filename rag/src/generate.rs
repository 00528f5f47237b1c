use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::RagError;
use crate::http::JsonClient;

const SERVICE: &str = "generation backend";

/// Produces an answer for a fully composed prompt. Implementations make one
/// attempt; retrying is up to the caller.
pub trait Generator: Send + Sync {
    fn generate(&self, prompt: &str, max_tokens: usize) -> Result<String, RagError>;
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Serialize)]
struct GenerateOptions {
    num_predict: usize,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: Option<String>,
}

#[derive(Debug)]
pub struct OllamaGenerator {
    http: JsonClient,
    base_url: String,
    model: String,
}

#[derive(Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelTag>,
}

#[derive(Deserialize)]
struct ModelTag {
    name: String,
}

impl OllamaGenerator {
    pub fn new(cfg: &Config) -> Result<Self, RagError> {
        Ok(Self {
            http: JsonClient::new(SERVICE, cfg.generate_timeout)?,
            base_url: cfg.ollama_url.trim_end_matches('/').to_string(),
            model: cfg.chat_model.clone(),
        })
    }

    /// Builds the generator and checks the backend lists the chat model, so a
    /// missing model fails at startup instead of on the first question.
    pub fn load(cfg: &Config) -> Result<Self, RagError> {
        let generator = Self::new(cfg)?;
        let tags_client = JsonClient::new(SERVICE, cfg.embed_timeout)?;
        let url = format!("{}/api/tags", generator.base_url);
        let tags = tags_client.get_json::<TagsResponse>(&url)?;
        let names: Vec<&str> = tags.models.iter().map(|m| m.name.as_str()).collect();
        if !model_listed(&names, &generator.model) {
            return Err(RagError::unavailable(
                SERVICE,
                format!("model '{}' is not available; run `ollama pull {}`", generator.model, generator.model),
            ));
        }
        tracing::info!(model = %generator.model, "generation model available");
        Ok(generator)
    }
}

/// An untagged model name matches its `:latest` tag.
fn model_listed(names: &[&str], model: &str) -> bool {
    names.iter().any(|name| {
        *name == model || (!model.contains(':') && name.strip_suffix(":latest") == Some(model))
    })
}

impl Generator for OllamaGenerator {
    fn generate(&self, prompt: &str, max_tokens: usize) -> Result<String, RagError> {
        let url = format!("{}/api/generate", self.base_url);
        let req = GenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
            options: GenerateOptions {
                num_predict: max_tokens,
            },
        };
        let res = self.http.post_json::<GenerateResponse, _>(&url, &req)?;
        match res.response.map(|r| r.trim().to_string()) {
            Some(answer) if !answer.is_empty() => Ok(answer),
            _ => Err(RagError::unavailable(
                SERVICE,
                format!("model '{}' returned no text", self.model),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn untagged_model_matches_latest_tag() {
        let names = ["llama3:latest", "mistral:7b"];
        assert!(model_listed(&names, "llama3"));
        assert!(model_listed(&names, "llama3:latest"));
        assert!(model_listed(&names, "mistral:7b"));
        assert!(!model_listed(&names, "mistral"));
        assert!(!model_listed(&names, "llama3:8b"));
        assert!(!model_listed(&[], "llama3"));
    }
}
