//! Text encoders. One encoder is built at startup and shared by the index
//! build and the query path.

use serde::Serialize;
use serde_json::Value;

use crate::config::Config;
use crate::error::RagError;
use crate::http::JsonClient;

const SERVICE: &str = "embedding backend";

pub trait Embedder: Send + Sync {
    /// Name of the loaded model; recorded with each snapshot.
    fn model(&self) -> &str;

    fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RagError>;

    fn embed_query(&self, text: &str) -> Result<Vec<f32>, RagError> {
        let vecs = self.embed_texts(&[text.to_string()])?;
        vecs.into_iter()
            .next()
            .ok_or_else(|| RagError::unavailable(SERVICE, "no embedding returned for query"))
    }
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Serialize)]
struct EmbedLegacyRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

/// Encoder backed by an Ollama server.
#[derive(Debug)]
pub struct OllamaEmbedder {
    http: JsonClient,
    base_url: String,
    model: String,
    batch_size: usize,
    dimension: usize,
}

impl OllamaEmbedder {
    /// Connects and embeds a test string so a missing model or unreachable
    /// server fails here rather than on the first question.
    pub fn load(cfg: &Config) -> Result<Self, RagError> {
        let mut embedder = Self {
            http: JsonClient::new(SERVICE, cfg.embed_timeout)?,
            base_url: cfg.ollama_url.trim_end_matches('/').to_string(),
            model: cfg.embed_model.clone(),
            batch_size: cfg.embed_batch_size.max(1),
            dimension: 0,
        };
        let sample = embedder.embed_batch(&["dimension check".to_string()])?;
        embedder.dimension = sample.first().map(Vec::len).unwrap_or(0);
        if embedder.dimension == 0 {
            return Err(RagError::unavailable(SERVICE, format!("model '{}' returned an empty embedding", embedder.model)));
        }
        tracing::info!(model = %embedder.model, dimension = embedder.dimension, "[RAG] Embedding model loaded");
        Ok(embedder)
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RagError> {
        let url = format!("{}/api/embed", self.base_url);
        let req = EmbedRequest {
            model: &self.model,
            input: texts,
        };
        match self.http.post_json::<Value, _>(&url, &req) {
            Ok(res) => parse_embeddings(res),
            Err(RagError::UpstreamTimeout { service, message }) => {
                Err(RagError::UpstreamTimeout { service, message })
            }
            Err(_) => {
                // Older servers only expose the one-prompt-per-call endpoint.
                let url = format!("{}/api/embeddings", self.base_url);
                let mut out = Vec::with_capacity(texts.len());
                for text in texts {
                    let req = EmbedLegacyRequest {
                        model: &self.model,
                        prompt: text,
                    };
                    let res = self.http.post_json::<Value, _>(&url, &req)?;
                    out.extend(parse_embeddings(res)?);
                }
                Ok(out)
            }
        }
    }
}

impl Embedder for OllamaEmbedder {
    fn model(&self) -> &str {
        &self.model
    }

    fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RagError> {
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            let vectors = self.embed_batch(batch)?;
            if vectors.len() != batch.len() {
                return Err(RagError::unavailable(
                    SERVICE,
                    format!("expected {} embeddings, got {}", batch.len(), vectors.len()),
                ));
            }
            for v in &vectors {
                if v.len() != self.dimension {
                    return Err(RagError::DimensionMismatch {
                        expected: self.dimension,
                        found: v.len(),
                    });
                }
            }
            out.extend(vectors);
        }
        Ok(out)
    }
}

fn parse_embeddings(value: Value) -> Result<Vec<Vec<f32>>, RagError> {
    if let Some(embeddings) = value.get("embeddings") {
        return parse_embeddings_value(embeddings);
    }
    if let Some(embedding) = value.get("embedding") {
        return parse_embeddings_value(embedding);
    }
    Err(RagError::unavailable(SERVICE, "no embeddings in response"))
}

fn parse_embeddings_value(value: &Value) -> Result<Vec<Vec<f32>>, RagError> {
    let arr = value
        .as_array()
        .ok_or_else(|| RagError::unavailable(SERVICE, "invalid embeddings format"))?;
    if arr.is_empty() {
        return Ok(vec![]);
    }
    if arr[0].is_array() {
        return arr.iter().map(parse_vec).collect();
    }
    Ok(vec![parse_vec(value)?])
}

fn parse_vec(value: &Value) -> Result<Vec<f32>, RagError> {
    let arr = value
        .as_array()
        .ok_or_else(|| RagError::unavailable(SERVICE, "embedding is not an array"))?;
    arr.iter()
        .map(|v| {
            v.as_f64()
                .map(|n| n as f32)
                .ok_or_else(|| RagError::unavailable(SERVICE, "embedding value is not a number"))
        })
        .collect()
}

/// Offline encoder: signed feature hashing of lowercase word tokens, L2
/// normalized. Texts sharing words land close together.
#[derive(Clone, Debug)]
pub struct HashingEmbedder {
    dims: usize,
    name: String,
}

impl HashingEmbedder {
    pub fn new(dims: usize) -> Self {
        let dims = dims.max(1);
        Self {
            dims,
            name: format!("hashing-{}", dims),
        }
    }

    pub fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dims];
        let lower = text.to_lowercase();
        for token in lower
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let h = fnv1a(token.as_bytes());
            let slot = (h % self.dims as u64) as usize;
            let sign = if (h >> 63) == 0 { 1.0 } else { -1.0 };
            v[slot] += sign;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut v {
                *x /= norm;
            }
        }
        v
    }
}

impl Embedder for HashingEmbedder {
    fn model(&self) -> &str {
        &self.name
    }

    fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RagError> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for b in bytes {
        hash ^= u64::from(*b);
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    hash
}
