mod common;

use std::sync::Arc;

use adsight_rag::{
    ErrorBody, ErrorKind, IndexReport, Platform, PlatformTable, QueryRequest, RagError, Rating,
    SearchPath, Turn,
};
use common::{rag_with, write_export, CountingEmbedder, DownGenerator, RecordingGenerator};
use serde_json::json;

#[test]
fn spring_sale_question_is_answered_from_its_own_row() {
    let dir = tempfile::tempdir().unwrap();
    write_export(
        dir.path(),
        "mailchimp",
        "2024-05.json",
        r#"[{"date":"2024-05-01","campaign":"Spring Sale","open_rate":0.29}]"#,
    );
    let generator = RecordingGenerator::new("The open rate was 29%.");
    let rag = rag_with(dir.path(), CountingEmbedder::new(64), generator.clone());
    rag.index_corpus().unwrap();

    let question = "What was the open rate for Spring Sale on 2024-05-01?";
    let retrieved = rag.retrieve_context(question, None).unwrap();
    assert_eq!(retrieved.path, SearchPath::Filtered);
    assert_eq!(retrieved.filters.date.as_deref(), Some("2024-05-01"));

    let answer = rag.answer_query("user_ana", &QueryRequest::new(question)).unwrap();
    assert_eq!(answer.context.len(), 1);
    assert!(answer.context[0].contains("Spring Sale"));
    assert_eq!(answer.answer, "The open rate was 29%.");

    let prompts = generator.prompts();
    assert_eq!(prompts.len(), 1);
    let context_section = prompts[0]
        .split("Context:\n")
        .nth(1)
        .and_then(|rest| rest.split("\n\nQuestion:").next())
        .unwrap();
    assert!(context_section.contains("Spring Sale"));

    let record = rag.feedback().get(answer.feedback_id).unwrap().unwrap();
    assert_eq!(record.user.as_deref(), Some("user_ana"));
    assert_eq!(record.query, question);
    assert!(record.context.contains("Spring Sale"));
    assert_eq!(record.rating, None);

    rag.rate_answer(answer.feedback_id, 1).unwrap();
    assert_eq!(rag.feedback().get(answer.feedback_id).unwrap().unwrap().rating, Some(Rating::Up));
}

#[test]
fn history_is_forwarded_to_the_prompt() {
    let dir = tempfile::tempdir().unwrap();
    write_export(dir.path(), "google_ads", "a.json", r#"{"Date":"2024-05-01","clicks":10}"#);
    let generator = RecordingGenerator::new("ok");
    let rag = rag_with(dir.path(), CountingEmbedder::new(32), generator.clone());
    rag.index_corpus().unwrap();

    let mut request = QueryRequest::new("and clicks?");
    request.history = (0..7)
        .map(|i| if i % 2 == 0 { Turn::user(format!("q{}", i)) } else { Turn::assistant(format!("a{}", i)) })
        .collect();
    rag.answer_query("user_ana", &request).unwrap();

    let prompt = &generator.prompts()[0];
    assert!(!prompt.contains("User: q0\n"));
    assert!(!prompt.contains("Assistant: a1\n"));
    assert!(prompt.contains("User: q2\n"));
    assert!(prompt.contains("User: q6\n"));
}

#[test]
fn unbuilt_index_is_reported_with_empty_context() {
    let dir = tempfile::tempdir().unwrap();
    let embedder = CountingEmbedder::new(32);
    let generator = RecordingGenerator::new("ok");
    let rag = rag_with(dir.path(), embedder.clone(), generator.clone());

    let err = rag.answer_query("ip_127.0.0.1", &QueryRequest::new("anything")).unwrap_err();
    assert!(matches!(err, RagError::IndexUnavailable));
    assert_eq!(err.kind(), ErrorKind::IndexUnavailable);

    let body = ErrorBody::from(&err);
    assert_eq!(body.context, Some(Vec::new()));
    let wire = serde_json::to_value(&body).unwrap();
    assert_eq!(wire["context"], json!([]));

    assert_eq!(embedder.calls(), 0);
    assert!(generator.prompts().is_empty());
    assert!(rag.feedback().records().unwrap().is_empty());
}

#[test]
fn blank_queries_are_rejected_before_any_model_call() {
    let dir = tempfile::tempdir().unwrap();
    write_export(dir.path(), "zoho", "a.json", r#"{"deal":"A"}"#);
    let embedder = CountingEmbedder::new(32);
    let generator = RecordingGenerator::new("ok");
    let rag = rag_with(dir.path(), embedder.clone(), generator.clone());
    rag.index_corpus().unwrap();
    let after_build = embedder.calls();

    for q in ["", "   ", "\n\t"] {
        let err = rag.answer_query("user_ana", &QueryRequest::new(q)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Input);
        assert_eq!(ErrorBody::from(&err).error, "No query provided.");
    }
    let mut zero_k = QueryRequest::new("deal");
    zero_k.top_k = Some(0);
    assert_eq!(rag.answer_query("user_ana", &zero_k).unwrap_err().kind(), ErrorKind::Input);

    assert_eq!(embedder.calls(), after_build);
    assert!(generator.prompts().is_empty());
    // Rejected input does not use up the caller's quota.
    for _ in 0..5 {
        rag.answer_query("user_ana", &QueryRequest::new("deal")).unwrap();
    }
}

#[test]
fn generator_failure_records_no_feedback() {
    let dir = tempfile::tempdir().unwrap();
    write_export(dir.path(), "zoho", "a.json", r#"{"deal":"A"}"#);
    let rag = rag_with(dir.path(), CountingEmbedder::new(32), Arc::new(DownGenerator));
    rag.index_corpus().unwrap();

    let err = rag.answer_query("user_ana", &QueryRequest::new("deal")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UpstreamUnavailable);
    assert!(rag.feedback().records().unwrap().is_empty());
}

#[test]
fn top_k_override_bounds_the_context() {
    let dir = tempfile::tempdir().unwrap();
    let rows: Vec<String> = (0..8).map(|i| format!(r#"{{"deal":"D{}"}}"#, i)).collect();
    write_export(dir.path(), "zoho", "a.json", &format!("[{}]", rows.join(",")));
    let rag = rag_with(dir.path(), CountingEmbedder::new(32), RecordingGenerator::new("ok"));
    rag.index_corpus().unwrap();

    let default_k = rag.answer_query("user_ana", &QueryRequest::new("deal")).unwrap();
    assert_eq!(default_k.context.len(), 5);

    let mut request = QueryRequest::new("deal");
    request.top_k = Some(2);
    assert_eq!(rag.answer_query("user_ana", &request).unwrap().context.len(), 2);
    request.top_k = Some(50);
    assert_eq!(rag.answer_query("user_ana", &request).unwrap().context.len(), 8);
}

#[test]
fn in_memory_tables_index_like_exports() {
    let dir = tempfile::tempdir().unwrap();
    let rag = rag_with(dir.path(), CountingEmbedder::new(32), RecordingGenerator::new("ok"));
    let tables = vec![PlatformTable {
        platform: Platform::LinkedinAds,
        rows: vec![json!({"date": "2024-06-01", "name": "Q2 ABM", "impressions": 5400}), json!(42)],
    }];
    match rag.index_tables(&tables).unwrap() {
        IndexReport::Indexed { chunks, skipped, .. } => {
            assert_eq!(chunks, 1);
            assert_eq!(skipped, 1);
        }
        other => panic!("expected an indexed report, got {:?}", other),
    }
    let hits = rag.retrieve_context("linkedin_ads impressions", None).unwrap();
    assert_eq!(hits.path, SearchPath::Filtered);
    assert_eq!(
        hits.texts(),
        vec!["[linkedin_ads] date: 2024-06-01; impressions: 5400; name: Q2 ABM".to_string()]
    );
}
