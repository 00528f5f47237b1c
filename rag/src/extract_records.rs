//! Flattens stored per-platform export rows into (text, metadata) chunks.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde_json::{Map, Value};
use walkdir::WalkDir;

use crate::error::RagError;
use crate::metadata::{ChunkMeta, Platform};

/// All stored rows of one platform. Rows are kept raw; non-objects are
/// counted and skipped at extraction time.
#[derive(Clone, Debug, PartialEq)]
pub struct PlatformTable {
    pub platform: Platform,
    pub rows: Vec<Value>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Chunk {
    pub text: String,
    pub meta: ChunkMeta,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Extraction {
    pub chunks: Vec<Chunk>,
    /// Rows dropped because they were not key-value objects.
    pub skipped: usize,
}

pub fn extract_chunks(tables: &[PlatformTable]) -> Extraction {
    let mut out = Extraction::default();
    for table in tables {
        for row in &table.rows {
            match row.as_object() {
                Some(fields) => out.chunks.push(Chunk {
                    text: render_row(table.platform, fields),
                    meta: ChunkMeta {
                        platform: Some(table.platform),
                        date: first_field(fields, &["date", "Date"]),
                        campaign: first_field(fields, &["campaign_name", "name"]),
                    },
                }),
                None => out.skipped += 1,
            }
        }
    }
    out
}

/// `[platform] key: value; ...` with keys sorted so the text never depends on
/// upstream field order.
fn render_row(platform: Platform, fields: &Map<String, Value>) -> String {
    let mut keys: Vec<&String> = fields.keys().collect();
    keys.sort();
    let body = keys
        .into_iter()
        .map(|key| format!("{}: {}", key, render_value(&fields[key.as_str()])))
        .collect::<Vec<_>>()
        .join("; ");
    format!("[{}] {}", platform, body)
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// First usable value among `keys`. Strings (non-empty) and numbers count;
/// null, empty strings, arrays and objects are treated as absent.
fn first_field(fields: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match fields.get(*key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

/// Reads `<dir>/<platform>/**/*.json`. Each file holds one stored entry: a
/// single row object or an array of rows.
pub fn load_tables(dir: &Path) -> Result<Vec<PlatformTable>, RagError> {
    if !dir.is_dir() {
        tracing::warn!("[RAG] Data directory {} does not exist", dir.display());
        return Ok(Vec::new());
    }

    let mut by_platform: BTreeMap<Platform, Vec<Value>> = BTreeMap::new();
    let walker = WalkDir::new(dir).min_depth(2).sort_by_file_name();

    for entry in walker {
        let entry = entry.map_err(|e| RagError::Io(e.into()))?;
        if !entry.file_type().is_file() || !is_json_file(entry.path()) {
            continue;
        }
        let Some(platform) = platform_of(dir, entry.path()) else {
            tracing::warn!("[RAG] Skipping {}: not under a platform directory", entry.path().display());
            continue;
        };
        let raw = fs::read_to_string(entry.path())?;
        let payload: Value = match serde_json::from_str(&raw) {
            Ok(v) => v,
            Err(err) => {
                tracing::warn!("[RAG] Skipping unreadable export {}: {}", entry.path().display(), err);
                continue;
            }
        };
        let rows = by_platform.entry(platform).or_default();
        match payload {
            Value::Array(items) => rows.extend(items),
            single => rows.push(single),
        }
    }

    Ok(by_platform
        .into_iter()
        .map(|(platform, rows)| PlatformTable { platform, rows })
        .collect())
}

fn platform_of(base: &Path, path: &Path) -> Option<Platform> {
    let first = path.strip_prefix(base).ok()?.components().next()?;
    first.as_os_str().to_str()?.parse().ok()
}

fn is_json_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn text_contains_every_field_in_sorted_order() {
        let tables = vec![PlatformTable {
            platform: Platform::Mailchimp,
            rows: vec![json!({"open_rate": 0.29, "campaign": "Spring Sale", "date": "2024-05-01", "tags": ["a", "b"]})],
        }];
        let out = extract_chunks(&tables);
        assert_eq!(out.skipped, 0);
        assert_eq!(
            out.chunks[0].text,
            "[mailchimp] campaign: Spring Sale; date: 2024-05-01; open_rate: 0.29; tags: [\"a\",\"b\"]"
        );
    }

    #[test]
    fn metadata_prefers_lowercase_keys_and_ignores_blank_values() {
        let tables = vec![PlatformTable {
            platform: Platform::GoogleAds,
            rows: vec![
                json!({"date": "2024-01-01", "Date": "1999-01-01", "campaign_name": "Brand", "name": "x"}),
                json!({"date": "", "Date": "2024-02-02", "campaign_name": null, "name": "Fallback"}),
                json!({"clicks": 3}),
            ],
        }];
        let out = extract_chunks(&tables);
        let metas: Vec<_> = out.chunks.iter().map(|c| c.meta.clone()).collect();
        assert_eq!(metas[0].date.as_deref(), Some("2024-01-01"));
        assert_eq!(metas[0].campaign.as_deref(), Some("Brand"));
        assert_eq!(metas[1].date.as_deref(), Some("2024-02-02"));
        assert_eq!(metas[1].campaign.as_deref(), Some("Fallback"));
        assert_eq!(metas[2].date, None);
        assert_eq!(metas[2].campaign, None);
        assert!(metas.iter().all(|m| m.platform == Some(Platform::GoogleAds)));
    }

    #[test]
    fn non_object_rows_are_counted() {
        let tables = vec![PlatformTable {
            platform: Platform::Zoho,
            rows: vec![json!("stray"), json!(42), json!({"deal": "A"}), json!(null)],
        }];
        let out = extract_chunks(&tables);
        assert_eq!(out.chunks.len(), 1);
        assert_eq!(out.skipped, 3);
    }

    #[test]
    fn loads_single_and_array_payloads_grouped_by_platform() {
        let dir = tempfile::tempdir().unwrap();
        let zoho = dir.path().join("zoho");
        let gads = dir.path().join("google_ads").join("2024");
        let other = dir.path().join("facebook");
        fs::create_dir_all(&zoho).unwrap();
        fs::create_dir_all(&gads).unwrap();
        fs::create_dir_all(&other).unwrap();
        fs::write(zoho.join("deal.json"), r#"{"deal": "A"}"#).unwrap();
        fs::write(gads.join("may.json"), r#"[{"clicks": 1}, {"clicks": 2}]"#).unwrap();
        fs::write(gads.join("notes.txt"), "ignored").unwrap();
        fs::write(other.join("x.json"), r#"{"ignored": true}"#).unwrap();
        fs::write(dir.path().join("top.json"), r#"{"ignored": true}"#).unwrap();

        let tables = load_tables(dir.path()).unwrap();
        assert_eq!(tables.len(), 2);
        assert_eq!(tables[0].platform, Platform::GoogleAds);
        assert_eq!(tables[0].rows.len(), 2);
        assert_eq!(tables[1].platform, Platform::Zoho);
        assert_eq!(tables[1].rows.len(), 1);
    }

    #[test]
    fn missing_data_dir_is_an_empty_corpus() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_tables(&dir.path().join("nope")).unwrap().is_empty());
    }
}
