mod common;

use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;

use adsight_rag::{Config, EmbedBackend, HashingEmbedder, Rag, RagError};
use common::{rag_with, test_config, RecordingGenerator};

/// A local URL nothing is listening on.
fn closed_backend_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    format!("http://127.0.0.1:{}", port)
}

fn unreachable_config(dir: &std::path::Path, backend: EmbedBackend) -> Config {
    Config {
        embed_backend: backend,
        ollama_url: closed_backend_url(),
        embed_timeout: Duration::from_secs(2),
        generate_timeout: Duration::from_secs(2),
        ..test_config(dir)
    }
}

#[test]
fn unreachable_embedding_backend_fails_startup() {
    let dir = tempfile::tempdir().unwrap();
    let err = Rag::from_config(unreachable_config(dir.path(), EmbedBackend::Ollama))
        .err()
        .expect("startup should fail");
    assert!(
        matches!(err, RagError::UpstreamUnavailable { .. } | RagError::UpstreamTimeout { .. }),
        "unexpected error: {:?}",
        err
    );
}

#[test]
fn unreachable_generation_backend_fails_startup() {
    let dir = tempfile::tempdir().unwrap();
    let err = Rag::from_config(unreachable_config(dir.path(), EmbedBackend::Hashing))
        .err()
        .expect("startup should fail");
    match err {
        RagError::UpstreamUnavailable { service, .. } | RagError::UpstreamTimeout { service, .. } => {
            assert_eq!(service, "generation backend")
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[test]
fn zero_top_k_is_rejected_before_anything_is_built() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = Config { top_k: 0, ..test_config(dir.path()) };
    let err = Rag::new(
        cfg.clone(),
        Arc::new(HashingEmbedder::new(64)),
        RecordingGenerator::new("unused"),
    )
    .err()
    .expect("top_k 0 should be rejected");
    assert!(matches!(err, RagError::Config(_)), "unexpected error: {:?}", err);
    assert!(!cfg.feedback_path.exists());

    let cfg = Config { rate_window: Duration::ZERO, ..test_config(dir.path()) };
    assert!(matches!(Rag::from_config(cfg), Err(RagError::Config(_))));

    // The defaults still start.
    rag_with(dir.path(), Arc::new(HashingEmbedder::new(64)), RecordingGenerator::new("ok"));
}
