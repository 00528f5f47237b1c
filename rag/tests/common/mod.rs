#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use adsight_rag::{
    ChunkMeta, Config, EmbedBackend, Embedder, Generator, HashingEmbedder, IndexSnapshot,
    MetadataStore, Platform, Rag, RagError, VectorIndex,
};

pub fn test_config(dir: &Path) -> Config {
    Config {
        client: "acme".to_string(),
        data_dir: dir.join("data"),
        index_dir: dir.join("index"),
        feedback_path: dir.join("feedback.jsonl"),
        log_dir: dir.join("logs"),
        embed_backend: EmbedBackend::Hashing,
        hashing_dims: 64,
        ..Config::default()
    }
}

/// Returns a canned answer and keeps every prompt it was given.
pub struct RecordingGenerator {
    pub reply: String,
    pub prompts: Mutex<Vec<String>>,
}

impl RecordingGenerator {
    pub fn new(reply: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: reply.to_string(),
            prompts: Mutex::new(Vec::new()),
        })
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

impl Generator for RecordingGenerator {
    fn generate(&self, prompt: &str, _max_tokens: usize) -> Result<String, RagError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        Ok(self.reply.clone())
    }
}

pub struct DownGenerator;

impl Generator for DownGenerator {
    fn generate(&self, _prompt: &str, _max_tokens: usize) -> Result<String, RagError> {
        Err(RagError::UpstreamUnavailable {
            service: "generation backend".to_string(),
            message: "connection refused".to_string(),
        })
    }
}

/// Hashing encoder that counts how often it is asked for vectors.
pub struct CountingEmbedder {
    inner: HashingEmbedder,
    pub calls: AtomicUsize,
}

impl CountingEmbedder {
    pub fn new(dims: usize) -> Arc<Self> {
        Arc::new(Self {
            inner: HashingEmbedder::new(dims),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Embedder for CountingEmbedder {
    fn model(&self) -> &str {
        self.inner.model()
    }

    fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RagError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.embed_texts(texts)
    }
}

pub fn rag_with(dir: &Path, embedder: Arc<dyn Embedder>, generator: Arc<dyn Generator>) -> Rag {
    Rag::new(test_config(dir), embedder, generator).expect("rag should open")
}

pub fn write_export(dir: &Path, platform: &str, file: &str, body: &str) {
    let target = dir.join("data").join("acme").join(platform);
    std::fs::create_dir_all(&target).unwrap();
    std::fs::write(target.join(file), body).unwrap();
}

/// Snapshot built straight from vectors and tags, bypassing any encoder.
pub fn snapshot_of(entries: Vec<(Vec<f32>, Option<Platform>, Option<&str>)>) -> IndexSnapshot {
    let vectors: Vec<Vec<f32>> = entries.iter().map(|(v, _, _)| v.clone()).collect();
    let texts: Vec<String> = (0..entries.len()).map(|i| format!("chunk {}", i)).collect();
    let metas = entries
        .into_iter()
        .map(|(_, platform, date)| ChunkMeta {
            platform,
            date: date.map(str::to_string),
            campaign: None,
        })
        .collect();
    IndexSnapshot::new(
        "test",
        VectorIndex::build(&vectors).unwrap(),
        texts,
        MetadataStore::new(metas),
    )
    .unwrap()
}
