//! Snapshot persistence: the vectors, texts and metadata of one build are
//! written to a fresh generation directory and published by atomically
//! replacing the `CURRENT` pointer. Readers never see a partial build.

use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use chrono::Utc;
use fs2::FileExt;
use serde::{Deserialize, Serialize};

use crate::error::RagError;
use crate::extract_records::Chunk;
use crate::metadata::{ChunkMeta, MetadataStore};
use crate::vector_index::VectorIndex;

const CURRENT_FILE: &str = "CURRENT";
const LOCK_FILE: &str = "build.lock";
const VECTORS_FILE: &str = "vectors.bin";
const TEXTS_FILE: &str = "texts.json";
const META_FILE: &str = "metadata.json";
const GEN_PREFIX: &str = "gen-";
const STAGING_PREFIX: &str = ".staging-";

/// Vectors, texts and metadata of one build, positionally aligned.
#[derive(Clone, Debug, PartialEq)]
pub struct IndexSnapshot {
    model: String,
    index: VectorIndex,
    texts: Vec<String>,
    metadata: MetadataStore,
}

#[derive(Serialize, Deserialize)]
struct TextsFile {
    model: String,
    texts: Vec<String>,
}

impl IndexSnapshot {
    pub fn new(
        model: impl Into<String>,
        index: VectorIndex,
        texts: Vec<String>,
        metadata: MetadataStore,
    ) -> Result<Self, RagError> {
        if index.len() != texts.len() || texts.len() != metadata.len() {
            return Err(RagError::corrupt(format!(
                "misaligned snapshot: {} vectors, {} texts, {} metadata entries",
                index.len(),
                texts.len(),
                metadata.len()
            )));
        }
        Ok(Self {
            model: model.into(),
            index,
            texts,
            metadata,
        })
    }

    pub fn from_chunks(
        model: impl Into<String>,
        chunks: Vec<Chunk>,
        vectors: &[Vec<f32>],
    ) -> Result<Self, RagError> {
        let index = VectorIndex::build(vectors)?;
        let (texts, metas): (Vec<String>, Vec<ChunkMeta>) =
            chunks.into_iter().map(|c| (c.text, c.meta)).unzip();
        Self::new(model, index, texts, MetadataStore::new(metas))
    }

    pub fn len(&self) -> usize {
        self.texts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.texts.is_empty()
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    pub fn texts(&self) -> &[String] {
        &self.texts
    }

    pub fn metadata(&self) -> &MetadataStore {
        &self.metadata
    }

    /// Writes the three artifacts into `dir`, fsyncing each.
    pub fn write_dir(&self, dir: &Path) -> Result<(), RagError> {
        fs::create_dir_all(dir)?;

        let file = File::create(dir.join(VECTORS_FILE))?;
        let mut w = BufWriter::new(&file);
        self.index.write_to(&mut w)?;
        w.flush()?;
        drop(w);
        file.sync_all()?;

        let texts = TextsFile {
            model: self.model.clone(),
            texts: self.texts.clone(),
        };
        write_json(&dir.join(TEXTS_FILE), &texts)?;
        write_json(&dir.join(META_FILE), self.metadata.entries())?;
        Ok(())
    }

    pub fn read_dir(dir: &Path) -> Result<Self, RagError> {
        let index = VectorIndex::read_from(BufReader::new(File::open(dir.join(VECTORS_FILE))?))?;
        let texts: TextsFile =
            serde_json::from_reader(BufReader::new(File::open(dir.join(TEXTS_FILE))?))?;
        let metas: Vec<ChunkMeta> =
            serde_json::from_reader(BufReader::new(File::open(dir.join(META_FILE))?))?;
        Self::new(texts.model, index, texts.texts, MetadataStore::new(metas))
    }
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), RagError> {
    let file = File::create(path)?;
    let mut w = BufWriter::new(&file);
    serde_json::to_writer(&mut w, value)?;
    w.flush()?;
    drop(w);
    file.sync_all()?;
    Ok(())
}

/// Held for the whole of a build; dropping it releases the lock.
#[derive(Debug)]
pub struct BuildGuard {
    _file: File,
}

/// Published snapshots of one client, plus an in-memory copy of the current
/// generation shared by all readers.
#[derive(Debug)]
pub struct SnapshotStore {
    root: PathBuf,
    client: String,
    loaded: RwLock<Option<(String, Arc<IndexSnapshot>)>>,
}

impl SnapshotStore {
    pub fn new(root: impl Into<PathBuf>, client: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            client: client.into(),
            loaded: RwLock::new(None),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Takes the per-client build lock without waiting.
    pub fn try_lock_build(&self) -> Result<BuildGuard, RagError> {
        fs::create_dir_all(&self.root)?;
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(self.root.join(LOCK_FILE))?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(BuildGuard { _file: file }),
            Err(err) if err.raw_os_error() == fs2::lock_contended_error().raw_os_error() => {
                Err(RagError::BuildConflict {
                    client: self.client.clone(),
                })
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Writes `snapshot` as a new generation and makes it current.
    pub fn publish(&self, _guard: &BuildGuard, snapshot: &IndexSnapshot) -> Result<String, RagError> {
        let previous = self.current_generation()?;
        let generation = self.next_generation_name();
        let staging = self.root.join(format!("{}{}", STAGING_PREFIX, generation));
        if staging.exists() {
            fs::remove_dir_all(&staging)?;
        }
        snapshot.write_dir(&staging)?;
        fs::rename(&staging, self.root.join(&generation))?;

        let tmp = self.root.join(format!("{}.tmp", CURRENT_FILE));
        {
            let mut file = File::create(&tmp)?;
            file.write_all(generation.as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&tmp, self.root.join(CURRENT_FILE))?;
        sync_dir(&self.root);

        tracing::info!(client = %self.client, %generation, chunks = snapshot.len(), "[RAG] Snapshot published");
        self.prune(&generation, previous.as_deref());
        Ok(generation)
    }

    pub fn current_generation(&self) -> Result<Option<String>, RagError> {
        match fs::read_to_string(self.root.join(CURRENT_FILE)) {
            Ok(raw) => {
                let name = raw.trim().to_string();
                if !is_generation_name(&name) {
                    return Err(RagError::corrupt(format!("CURRENT names '{}'", name)));
                }
                Ok(Some(name))
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// The current snapshot, or `None` if nothing was ever published. Reloads
    /// from disk only when `CURRENT` names a new generation.
    pub fn load_current(&self) -> Result<Option<Arc<IndexSnapshot>>, RagError> {
        // A generation can be pruned between reading CURRENT and opening it
        // when two builds land back to back; one re-read covers that.
        for attempt in 0..2 {
            let Some(generation) = self.current_generation()? else {
                return Ok(None);
            };
            if let Some((loaded_gen, snap)) = self.loaded.read().unwrap_or_else(|e| e.into_inner()).as_ref() {
                if *loaded_gen == generation {
                    return Ok(Some(Arc::clone(snap)));
                }
            }
            match IndexSnapshot::read_dir(&self.root.join(&generation)) {
                Ok(snapshot) => {
                    let snapshot = Arc::new(snapshot);
                    tracing::info!(client = %self.client, %generation, chunks = snapshot.len(), "[RAG] Snapshot loaded");
                    *self.loaded.write().unwrap_or_else(|e| e.into_inner()) =
                        Some((generation, Arc::clone(&snapshot)));
                    return Ok(Some(snapshot));
                }
                Err(RagError::Io(err)) if err.kind() == ErrorKind::NotFound && attempt == 0 => continue,
                Err(err) => return Err(err),
            }
        }
        Err(RagError::corrupt("current generation disappeared while loading"))
    }

    fn next_generation_name(&self) -> String {
        let stamp = Utc::now().format("%Y%m%d%H%M%S%3f");
        let base = format!("{}{}", GEN_PREFIX, stamp);
        let mut name = base.clone();
        let mut n = 1;
        while self.root.join(&name).exists() {
            name = format!("{}-{}", base, n);
            n += 1;
        }
        name
    }

    /// Removes superseded generations, keeping the previous one for readers
    /// that resolved CURRENT just before the switch. Also clears staging
    /// leftovers of crashed builds; the caller holds the build lock.
    fn prune(&self, current: &str, previous: Option<&str>) {
        let Ok(entries) = fs::read_dir(&self.root) else {
            return;
        };
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().to_string();
            let stale_gen = is_generation_name(&name) && name != current && Some(name.as_str()) != previous;
            if stale_gen || name.starts_with(STAGING_PREFIX) {
                if let Err(err) = fs::remove_dir_all(entry.path()) {
                    tracing::warn!("[RAG] Failed to prune {}: {}", entry.path().display(), err);
                }
            }
        }
    }
}

fn is_generation_name(name: &str) -> bool {
    name.starts_with(GEN_PREFIX)
        && name.len() > GEN_PREFIX.len()
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
}

fn sync_dir(dir: &Path) {
    // Not supported on every platform; the rename is already atomic.
    if let Ok(d) = File::open(dir) {
        let _ = d.sync_all();
    }
}
