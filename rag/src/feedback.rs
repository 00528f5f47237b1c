//! Answered queries and their ratings, kept as an append-only JSON-lines log.
//!
//! Each answer appends a `created` event; a rating appends a `rated` event.
//! Opening the store folds the log back into records.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};

use crate::error::RagError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "i8", try_from = "i8")]
pub enum Rating {
    Down,
    Neutral,
    Up,
}

impl From<Rating> for i8 {
    fn from(r: Rating) -> i8 {
        match r {
            Rating::Down => -1,
            Rating::Neutral => 0,
            Rating::Up => 1,
        }
    }
}

impl TryFrom<i8> for Rating {
    type Error = RagError;

    fn try_from(v: i8) -> Result<Self, Self::Error> {
        Rating::try_from(i64::from(v))
    }
}

impl TryFrom<i64> for Rating {
    type Error = RagError;

    fn try_from(v: i64) -> Result<Self, Self::Error> {
        match v {
            -1 => Ok(Rating::Down),
            0 => Ok(Rating::Neutral),
            1 => Ok(Rating::Up),
            other => Err(RagError::InvalidInput(format!(
                "rating must be -1, 0 or 1, got {}",
                other
            ))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FeedbackRecord {
    pub id: u64,
    pub user: Option<String>,
    pub query: String,
    pub answer: String,
    pub context: String,
    pub rating: Option<Rating>,
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum LogEvent {
    Created(FeedbackRecord),
    Rated {
        id: u64,
        rating: Rating,
        at: DateTime<Utc>,
    },
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct FeedbackStats {
    pub total: usize,
    pub up: usize,
    pub down: usize,
    pub neutral: usize,
    pub unrated: usize,
}

#[derive(Debug)]
struct Inner {
    log: File,
    records: Vec<FeedbackRecord>,
    /// Bytes of the log already folded into `records`.
    offset: u64,
}

/// Feedback log shared by every process pointed at the same file. Each
/// append happens under an exclusive `fs2` lock after folding in lines other
/// writers added, so ids stay unique across processes.
#[derive(Debug)]
pub struct FeedbackStore {
    path: PathBuf,
    inner: Mutex<Inner>,
}

/// Releases the file lock on drop.
struct LogLock<'a>(&'a File);

impl<'a> LogLock<'a> {
    fn exclusive(file: &'a File) -> Result<Self, RagError> {
        FileExt::lock_exclusive(file)?;
        Ok(Self(file))
    }

    fn shared(file: &'a File) -> Result<Self, RagError> {
        FileExt::lock_shared(file)?;
        Ok(Self(file))
    }
}

impl Drop for LogLock<'_> {
    fn drop(&mut self) {
        let _ = FileExt::unlock(self.0);
    }
}

impl FeedbackStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, RagError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let log = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)?;
        let mut inner = Inner {
            log,
            records: Vec::new(),
            offset: 0,
        };
        {
            let Inner { log, records, offset } = &mut inner;
            let _lock = LogLock::exclusive(log)?;
            catch_up(log, records, offset, true)?;
        }
        tracing::debug!(path = %path.display(), records = inner.records.len(), "[RAG] Feedback log opened");
        Ok(Self {
            path,
            inner: Mutex::new(inner),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record(
        &self,
        user: Option<&str>,
        query: &str,
        answer: &str,
        context: &str,
    ) -> Result<u64, RagError> {
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let Inner { log, records, offset } = &mut *guard;
        let _lock = LogLock::exclusive(log)?;
        catch_up(log, records, offset, true)?;

        let id = records.iter().map(|r| r.id).max().unwrap_or(0) + 1;
        let record = FeedbackRecord {
            id,
            user: user.map(str::to_string),
            query: query.to_string(),
            answer: answer.to_string(),
            context: context.to_string(),
            rating: None,
            created_at: Utc::now(),
        };
        *offset += append(log, &LogEvent::Created(record.clone()))?;
        records.push(record);
        Ok(id)
    }

    /// Sets the rating of one record. Out-of-range values are rejected
    /// before anything is touched.
    pub fn rate(&self, id: u64, rating: i64) -> Result<(), RagError> {
        let rating = Rating::try_from(rating)?;
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let Inner { log, records, offset } = &mut *guard;
        let _lock = LogLock::exclusive(log)?;
        catch_up(log, records, offset, true)?;

        let Some(idx) = records.iter().position(|r| r.id == id) else {
            return Err(RagError::FeedbackNotFound(id));
        };
        *offset += append(
            log,
            &LogEvent::Rated {
                id,
                rating,
                at: Utc::now(),
            },
        )?;
        records[idx].rating = Some(rating);
        Ok(())
    }

    pub fn get(&self, id: u64) -> Result<Option<FeedbackRecord>, RagError> {
        self.read(|records| records.iter().find(|r| r.id == id).cloned())
    }

    pub fn records(&self) -> Result<Vec<FeedbackRecord>, RagError> {
        self.read(|records| records.to_vec())
    }

    pub fn stats(&self) -> Result<FeedbackStats, RagError> {
        self.read(|records| {
            let mut stats = FeedbackStats {
                total: records.len(),
                ..FeedbackStats::default()
            };
            for r in records {
                match r.rating {
                    Some(Rating::Up) => stats.up += 1,
                    Some(Rating::Down) => stats.down += 1,
                    Some(Rating::Neutral) => stats.neutral += 1,
                    None => stats.unrated += 1,
                }
            }
            stats
        })
    }

    fn read<T>(&self, f: impl FnOnce(&[FeedbackRecord]) -> T) -> Result<T, RagError> {
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let Inner { log, records, offset } = &mut *guard;
        let _lock = LogLock::shared(log)?;
        catch_up(log, records, offset, false)?;
        Ok(f(records))
    }
}

/// Appends one event line; returns the bytes written.
fn append(mut log: &File, event: &LogEvent) -> Result<u64, RagError> {
    let mut line = serde_json::to_vec(event)?;
    line.push(b'\n');
    log.write_all(&line)?;
    log.flush()?;
    Ok(line.len() as u64)
}

/// Folds complete lines past `offset` into `records`. A trailing partial line
/// is the remains of a crashed writer; with `repair` (exclusive lock held) it
/// is terminated so it is skipped as unreadable and later appends start clean.
fn catch_up(
    mut log: &File,
    records: &mut Vec<FeedbackRecord>,
    offset: &mut u64,
    repair: bool,
) -> Result<(), RagError> {
    log.seek(SeekFrom::Start(*offset))?;
    let mut tail = Vec::new();
    log.read_to_end(&mut tail)?;
    if tail.is_empty() {
        return Ok(());
    }

    let complete = match tail.iter().rposition(|b| *b == b'\n') {
        Some(last) => last + 1,
        None => 0,
    };
    for line in tail[..complete].split(|b| *b == b'\n') {
        apply_line(records, line);
    }
    *offset += complete as u64;

    if repair && complete < tail.len() {
        tracing::warn!("[RAG] Terminating a partial feedback line left by an interrupted write");
        log.write_all(b"\n")?;
        apply_line(records, &tail[complete..]);
        *offset += (tail.len() - complete) as u64 + 1;
    }
    Ok(())
}

fn apply_line(records: &mut Vec<FeedbackRecord>, line: &[u8]) {
    if line.iter().all(u8::is_ascii_whitespace) {
        return;
    }
    let event: LogEvent = match serde_json::from_slice(line) {
        Ok(ev) => ev,
        Err(err) => {
            tracing::warn!("[RAG] Ignoring unreadable feedback line: {}", err);
            return;
        }
    };
    match event {
        LogEvent::Created(record) => {
            if records.iter().any(|r| r.id == record.id) {
                tracing::warn!("[RAG] Duplicate feedback id {} in log; keeping the first", record.id);
            } else {
                records.push(record);
            }
        }
        LogEvent::Rated { id, rating, .. } => match records.iter_mut().find(|r| r.id == id) {
            Some(r) => r.rating = Some(rating),
            None => tracing::warn!("[RAG] Rating for unknown feedback {} in log", id),
        },
    }
}
