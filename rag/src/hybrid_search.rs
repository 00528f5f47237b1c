//! Query planning: metadata filters first, vector ranking second, and a
//! full-corpus search whenever the filters select nothing.

use std::sync::OnceLock;

use regex::Regex;

use crate::error::RagError;
use crate::metadata::{Platform, QueryFilters};
use crate::store_snapshot::IndexSnapshot;
use crate::vector_index::Neighbor;

pub const DEFAULT_TOP_K: usize = 5;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SearchPath {
    /// Ranked within the chunks matching the query's filters.
    Filtered,
    /// Ranked over the whole corpus.
    Fallback,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Hit {
    pub position: usize,
    pub distance: f32,
    pub text: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SearchResult {
    pub filters: QueryFilters,
    pub path: SearchPath,
    pub hits: Vec<Hit>,
}

impl SearchResult {
    pub fn texts(&self) -> Vec<String> {
        self.hits.iter().map(|h| h.text.clone()).collect()
    }
}

fn date_pattern() -> &'static Regex {
    static DATE: OnceLock<Regex> = OnceLock::new();
    DATE.get_or_init(|| Regex::new(r"\d{4}-\d{2}-\d{2}").expect("date pattern is valid"))
}

/// Platform: first word (split on anything but ASCII alphanumerics and `_`)
/// naming a platform, case-insensitively. Date: first `YYYY-MM-DD` substring.
pub fn parse_query_filters(query: &str) -> QueryFilters {
    let platform = query
        .split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .filter(|t| !t.is_empty())
        .find_map(|t| t.parse::<Platform>().ok());
    let date = date_pattern().find(query).map(|m| m.as_str().to_string());
    QueryFilters { platform, date }
}

/// Ranks `snapshot` against an already-encoded query.
pub fn hybrid_search(
    snapshot: &IndexSnapshot,
    query: &str,
    query_vector: &[f32],
    k: usize,
) -> Result<SearchResult, RagError> {
    let filters = parse_query_filters(query);
    if snapshot.is_empty() {
        return Ok(SearchResult {
            filters,
            path: SearchPath::Fallback,
            hits: Vec::new(),
        });
    }

    let candidates = if filters.is_empty() {
        Vec::new()
    } else {
        snapshot.metadata().filter(&filters)
    };

    let (path, neighbors) = if candidates.is_empty() {
        (SearchPath::Fallback, snapshot.index().search(query_vector, k)?)
    } else {
        // Stored vectors are reused by position; nothing is re-encoded.
        (
            SearchPath::Filtered,
            snapshot.index().search_among(query_vector, &candidates, k)?,
        )
    };

    tracing::debug!(
        ?filters,
        ?path,
        candidates = candidates.len(),
        hits = neighbors.len(),
        "[RAG] Hybrid search"
    );

    Ok(SearchResult {
        filters,
        path,
        hits: to_hits(snapshot, neighbors),
    })
}

fn to_hits(snapshot: &IndexSnapshot, neighbors: Vec<Neighbor>) -> Vec<Hit> {
    neighbors
        .into_iter()
        .filter_map(|n| {
            snapshot.texts().get(n.position).map(|text| Hit {
                position: n.position,
                distance: n.distance,
                text: text.clone(),
            })
        })
        .collect()
}
