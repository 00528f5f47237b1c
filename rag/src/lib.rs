mod api;
mod build_prompt;
mod config;
mod deadline;
mod embed_chunks;
mod error;
mod extract_records;
mod feedback;
mod generate;
mod http;
mod hybrid_search;
mod metadata;
mod rate_limit;
mod store_snapshot;
mod vector_index;

use std::sync::Arc;

use serde::Serialize;

pub use api::{public_message, ErrorBody, FeedbackRequest, QueryAnswer, QueryRequest};
pub use build_prompt::{build_prompt, recent_turns, Role, Turn};
pub use config::{Config, EmbedBackend, MAX_HISTORY_TURNS};
pub use embed_chunks::{Embedder, HashingEmbedder, OllamaEmbedder};
pub use error::{ErrorKind, RagError, Result};
pub use extract_records::{extract_chunks, load_tables, Chunk, Extraction, PlatformTable};
pub use feedback::{FeedbackRecord, FeedbackStats, FeedbackStore, Rating};
pub use generate::{Generator, OllamaGenerator};
pub use hybrid_search::{hybrid_search, parse_query_filters, Hit, SearchPath, SearchResult, DEFAULT_TOP_K};
pub use metadata::{ChunkMeta, MetadataStore, Platform, QueryFilters};
pub use rate_limit::{Decision, RateLimiter};
pub use store_snapshot::{BuildGuard, IndexSnapshot, SnapshotStore};
pub use vector_index::{Neighbor, VectorIndex};

use deadline::call_with_timeout;

/// Outcome of an index build.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum IndexReport {
    Indexed {
        generation: String,
        chunks: usize,
        skipped: usize,
    },
    /// Nothing to index; the previous snapshot, if any, is left in place.
    Empty { skipped: usize, message: String },
}

/// The RAG subsystem for one client: encoder, generator, published
/// snapshots, rate limiter and feedback log.
pub struct Rag {
    cfg: Config,
    embedder: Arc<dyn Embedder>,
    generator: Arc<dyn Generator>,
    snapshots: SnapshotStore,
    limiter: Option<RateLimiter>,
    feedback: FeedbackStore,
}

impl Rag {
    /// Builds the models named in `cfg`. Both models are checked against the
    /// backend here, so a missing or unreachable model fails startup.
    pub fn from_config(cfg: Config) -> Result<Self> {
        cfg.validate()?;
        let embedder: Arc<dyn Embedder> = match cfg.embed_backend {
            EmbedBackend::Ollama => Arc::new(OllamaEmbedder::load(&cfg)?),
            EmbedBackend::Hashing => Arc::new(HashingEmbedder::new(cfg.hashing_dims)),
        };
        let generator: Arc<dyn Generator> = Arc::new(OllamaGenerator::load(&cfg)?);
        Self::new(cfg, embedder, generator)
    }

    pub fn new(
        cfg: Config,
        embedder: Arc<dyn Embedder>,
        generator: Arc<dyn Generator>,
    ) -> Result<Self> {
        cfg.validate()?;
        let snapshots = SnapshotStore::new(cfg.client_index_dir(), cfg.client.clone());
        let limiter = (cfg.rate_limit > 0).then(|| RateLimiter::new(cfg.rate_limit, cfg.rate_window));
        let feedback = FeedbackStore::open(&cfg.feedback_path)?;
        Ok(Self {
            cfg,
            embedder,
            generator,
            snapshots,
            limiter,
            feedback,
        })
    }

    pub fn config(&self) -> &Config {
        &self.cfg
    }

    pub fn snapshots(&self) -> &SnapshotStore {
        &self.snapshots
    }

    pub fn feedback(&self) -> &FeedbackStore {
        &self.feedback
    }

    /// Rebuilds the whole index from the client's data directory.
    pub fn index_corpus(&self) -> Result<IndexReport> {
        let guard = self.snapshots.try_lock_build()?;
        let tables = load_tables(&self.cfg.client_data_dir())?;
        self.build_locked(&guard, &tables)
    }

    /// Rebuilds the whole index from rows already in memory.
    pub fn index_tables(&self, tables: &[PlatformTable]) -> Result<IndexReport> {
        let guard = self.snapshots.try_lock_build()?;
        self.build_locked(&guard, tables)
    }

    fn build_locked(&self, guard: &BuildGuard, tables: &[PlatformTable]) -> Result<IndexReport> {
        let Extraction { chunks, skipped } = extract_chunks(tables);
        if skipped > 0 {
            tracing::warn!(client = %self.cfg.client, skipped, "[RAG] Skipped rows that are not key-value records");
        }
        if chunks.is_empty() {
            tracing::info!(client = %self.cfg.client, "[RAG] No data found to index.");
            return Ok(IndexReport::Empty {
                skipped,
                message: "No data found to index.".to_string(),
            });
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = self.embedder.embed_texts(&texts)?;
        if vectors.len() != texts.len() {
            return Err(RagError::unavailable(
                "embedding backend",
                format!("expected {} embeddings, got {}", texts.len(), vectors.len()),
            ));
        }
        let snapshot = IndexSnapshot::from_chunks(self.embedder.model(), chunks, &vectors)?;
        let generation = self.snapshots.publish(guard, &snapshot)?;
        tracing::info!(client = %self.cfg.client, chunks = snapshot.len(), "[RAG] Indexed {} chunks.", snapshot.len());
        Ok(IndexReport::Indexed {
            generation,
            chunks: snapshot.len(),
            skipped,
        })
    }

    /// Hybrid search over the current snapshot. `IndexUnavailable` when
    /// nothing has been built yet.
    pub fn retrieve_context(&self, query: &str, top_k: Option<usize>) -> Result<SearchResult> {
        let k = top_k.unwrap_or(self.cfg.top_k);
        let snapshot = self.snapshots.load_current()?.ok_or(RagError::IndexUnavailable)?;
        if snapshot.model() != self.embedder.model() {
            tracing::warn!(
                built_with = snapshot.model(),
                loaded = self.embedder.model(),
                "[RAG] Snapshot was built with a different embedding model; rebuild the index"
            );
        }
        if snapshot.is_empty() {
            return hybrid_search(&snapshot, query, &[], k);
        }
        let embedder = Arc::clone(&self.embedder);
        let text = query.to_string();
        let query_vector = call_with_timeout("embedding backend", self.cfg.embed_timeout, move || {
            embedder.embed_query(&text)
        })?;
        hybrid_search(&snapshot, query, &query_vector, k)
    }

    /// Answers one question for `identity`. Errors are logged with the
    /// identity and question before being returned.
    pub fn answer_query(&self, identity: &str, request: &QueryRequest) -> Result<QueryAnswer> {
        let result = self.try_answer(identity, request);
        if let Err(err) = &result {
            match err.kind() {
                ErrorKind::Input | ErrorKind::RateLimited => {
                    tracing::warn!(identity, query = %request.query, "[RAG] Query rejected: {}", err)
                }
                _ => tracing::error!(identity, query = %request.query, "[RAG] Error processing query: {}", err),
            }
        }
        result
    }

    fn try_answer(&self, identity: &str, request: &QueryRequest) -> Result<QueryAnswer> {
        let query = request.query.trim();
        if query.is_empty() {
            return Err(RagError::InvalidInput("No query provided.".to_string()));
        }
        if request.top_k == Some(0) {
            return Err(RagError::InvalidInput("top_k must be at least 1.".to_string()));
        }
        if let Some(limiter) = &self.limiter {
            if let Decision::Denied { retry_after } = limiter.check(identity) {
                return Err(RagError::RateLimited {
                    identity: identity.to_string(),
                    retry_after_secs: retry_after.as_secs().max(1),
                });
            }
        }

        let retrieved = self.retrieve_context(query, request.top_k)?;
        let context = retrieved.texts();
        let prompt = build_prompt(
            &self.cfg.system_prompt,
            &context,
            &request.history,
            query,
            self.cfg.history_turns,
        );

        let generator = Arc::clone(&self.generator);
        let max_tokens = self.cfg.max_new_tokens;
        let answer = call_with_timeout("generation backend", self.cfg.generate_timeout, move || {
            generator.generate(&prompt, max_tokens)
        })?;

        let feedback_id = self
            .feedback
            .record(Some(identity), query, &answer, &context.join("\n"))?;
        tracing::info!(
            identity,
            feedback_id,
            path = ?retrieved.path,
            "[RAG] Query by {}: '{}' | Answer: '{}...'",
            identity,
            query,
            answer.chars().take(100).collect::<String>()
        );
        Ok(QueryAnswer {
            answer,
            context,
            feedback_id,
        })
    }

    /// Applies a rating from the feedback endpoint.
    pub fn rate_answer(&self, feedback_id: u64, rating: i64) -> Result<()> {
        match self.feedback.rate(feedback_id, rating) {
            Ok(()) => {
                tracing::info!("[RAG] Feedback received: id={}, rating={}", feedback_id, rating);
                Ok(())
            }
            Err(err) => {
                tracing::warn!("[RAG] Feedback rejected: id={}, rating={}: {}", feedback_id, rating, err);
                Err(err)
            }
        }
    }
}
