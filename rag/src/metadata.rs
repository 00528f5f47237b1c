//! Per-chunk tags kept positionally aligned with the vector index.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Marketing platforms whose exports can be indexed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    GoogleAds,
    LinkedinAds,
    Mailchimp,
    Zoho,
    Demandbase,
}

impl Platform {
    pub const ALL: [Platform; 5] = [
        Platform::GoogleAds,
        Platform::LinkedinAds,
        Platform::Mailchimp,
        Platform::Zoho,
        Platform::Demandbase,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Platform::GoogleAds => "google_ads",
            Platform::LinkedinAds => "linkedin_ads",
            Platform::Mailchimp => "mailchimp",
            Platform::Zoho => "zoho",
            Platform::Demandbase => "demandbase",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = String;

    /// Exact, case-insensitive match against the platform names.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Platform::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown platform '{}'", s))
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMeta {
    #[serde(default)]
    pub platform: Option<Platform>,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub campaign: Option<String>,
}

/// Filters pulled out of a question. Absent fields do not constrain.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct QueryFilters {
    pub platform: Option<Platform>,
    pub date: Option<String>,
}

impl QueryFilters {
    pub fn is_empty(&self) -> bool {
        self.platform.is_none() && self.date.is_none()
    }

    /// A chunk missing a field never matches a filter on that field.
    pub fn matches(&self, meta: &ChunkMeta) -> bool {
        let platform_ok = match self.platform {
            Some(wanted) => meta.platform == Some(wanted),
            None => true,
        };
        let date_ok = match &self.date {
            Some(wanted) => meta.date.as_deref() == Some(wanted.as_str()),
            None => true,
        };
        platform_ok && date_ok
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MetadataStore {
    entries: Vec<ChunkMeta>,
}

impl MetadataStore {
    pub fn new(entries: Vec<ChunkMeta>) -> Self {
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, position: usize) -> Option<&ChunkMeta> {
        self.entries.get(position)
    }

    pub fn entries(&self) -> &[ChunkMeta] {
        &self.entries
    }

    /// Positions whose tags satisfy `filters`, ascending.
    pub fn filter(&self, filters: &QueryFilters) -> Vec<usize> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, meta)| filters.matches(meta))
            .map(|(pos, _)| pos)
            .collect()
    }
}
