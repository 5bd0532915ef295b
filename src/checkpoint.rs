//! Checkpoints for restorable tool calls.
//!
//! Before a tool that mutates files runs, the scheduler snapshots the files
//! it will touch through a [`SnapshotStore`] and writes a [`Checkpoint`] to a
//! [`CheckpointJournal`]. [`restore_checkpoint`] puts both the files and the
//! session history back.
//!
//! # Layout
//!
//! ```text
//! <journal>/2026-10-19T08-30-00_123Z-main.rs-write_file.json
//! <store>/objects/<sha256 of file content>
//! <store>/manifests/<sha256 of manifest>.json
//! ```

use crate::chat::{ChatSession, extract_curated_history};
use crate::llm::Message;
use crate::scheduler::ToolCallRecord;
use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("checkpoint not found: {0}")]
    NotFound(String),

    #[error("invalid checkpoint name: {0}")]
    InvalidName(String),

    #[error("unknown snapshot: {0}")]
    UnknownSnapshot(String),

    #[error("malformed checkpoint {name}: {source}")]
    Malformed {
        name: String,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Io(#[from] anyhow::Error),
}

/// Versioning backend that captures and restores file contents.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Capture `paths` and return an id for [`SnapshotStore::restore`].
    async fn snapshot(&self, paths: &[PathBuf]) -> Result<String, CheckpointError>;

    /// Put every file captured by `commit_hash` back as it was.
    async fn restore(&self, commit_hash: &str) -> Result<(), CheckpointError>;
}

#[derive(Debug, Serialize, Deserialize)]
struct ManifestEntry {
    path: PathBuf,
    /// `None` when the file did not exist at snapshot time.
    object: Option<String>,
}

fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Content-addressed snapshot store on the local filesystem.
#[derive(Debug, Clone)]
pub struct ContentHashSnapshotStore {
    root: PathBuf,
}

impl ContentHashSnapshotStore {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn objects_dir(&self) -> PathBuf {
        self.root.join("objects")
    }

    fn manifests_dir(&self) -> PathBuf {
        self.root.join("manifests")
    }

    async fn write_object(&self, content: &[u8]) -> anyhow::Result<String> {
        let hash = sha256_hex(content);
        let path = self.objects_dir().join(&hash);
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            tokio::fs::write(&path, content)
                .await
                .with_context(|| format!("Failed to write object: {}", path.display()))?;
        }
        Ok(hash)
    }
}

#[async_trait]
impl SnapshotStore for ContentHashSnapshotStore {
    async fn snapshot(&self, paths: &[PathBuf]) -> Result<String, CheckpointError> {
        for dir in [self.objects_dir(), self.manifests_dir()] {
            tokio::fs::create_dir_all(&dir)
                .await
                .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
        }

        let mut entries = Vec::with_capacity(paths.len());
        for path in paths {
            let object = match tokio::fs::read(path).await {
                Ok(content) => Some(self.write_object(&content).await?),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
                Err(e) => {
                    return Err(anyhow::Error::new(e)
                        .context(format!("Failed to read file: {}", path.display()))
                        .into());
                }
            };
            entries.push(ManifestEntry {
                path: path.clone(),
                object,
            });
        }

        let manifest = serde_json::to_vec_pretty(&entries).context("Failed to encode manifest")?;
        let hash = sha256_hex(&manifest);
        let manifest_path = self.manifests_dir().join(format!("{hash}.json"));
        tokio::fs::write(&manifest_path, &manifest)
            .await
            .with_context(|| format!("Failed to write manifest: {}", manifest_path.display()))?;

        log::debug!("Snapshot written hash={hash} files={}", entries.len());
        Ok(hash)
    }

    async fn restore(&self, commit_hash: &str) -> Result<(), CheckpointError> {
        let manifest_path = self.manifests_dir().join(format!("{commit_hash}.json"));
        let manifest = match tokio::fs::read(&manifest_path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CheckpointError::UnknownSnapshot(commit_hash.to_owned()));
            }
            Err(e) => return Err(anyhow::Error::new(e).context("Failed to read manifest").into()),
        };
        let entries: Vec<ManifestEntry> =
            serde_json::from_slice(&manifest).map_err(|source| CheckpointError::Malformed {
                name: commit_hash.to_owned(),
                source,
            })?;

        for entry in entries {
            match entry.object {
                Some(object) => {
                    let content = tokio::fs::read(self.objects_dir().join(&object))
                        .await
                        .with_context(|| format!("Missing snapshot object: {object}"))?;
                    if let Some(parent) = entry.path.parent()
                        && !parent.as_os_str().is_empty()
                    {
                        tokio::fs::create_dir_all(parent).await.with_context(|| {
                            format!("Failed to create directory: {}", parent.display())
                        })?;
                    }
                    tokio::fs::write(&entry.path, content).await.with_context(|| {
                        format!("Failed to restore file: {}", entry.path.display())
                    })?;
                }
                None => match tokio::fs::remove_file(&entry.path).await {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => {
                        return Err(anyhow::Error::new(e)
                            .context(format!("Failed to remove file: {}", entry.path.display()))
                            .into());
                    }
                },
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointToolCall {
    pub name: String,
    pub args: Value,
}

/// One journal entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    /// Full session history
    pub history: Vec<Message>,
    /// Curated view of the same history
    pub client_history: Vec<Message>,
    pub tool_call: CheckpointToolCall,
    pub commit_hash: String,
    pub file_path: String,
}

/// `<timestamp>-<basename>-<toolname>`, with the timestamp made safe for
/// file names.
///
/// # Errors
/// Fails only if the timestamp cannot be formatted.
pub fn checkpoint_name(
    timestamp: OffsetDateTime,
    file_path: &Path,
    tool_name: &str,
) -> anyhow::Result<String> {
    let stamp = timestamp
        .format(&Rfc3339)
        .context("Failed to format checkpoint timestamp")?
        .replace(':', "-")
        .replace('.', "_");
    let basename = file_path
        .file_name()
        .map_or_else(|| "unknown".to_owned(), |n| n.to_string_lossy().into_owned());
    Ok(format!("{stamp}-{basename}-{tool_name}"))
}

/// Directory of checkpoint files, one JSON file per restorable call.
#[derive(Debug, Clone)]
pub struct CheckpointJournal {
    dir: PathBuf,
}

impl CheckpointJournal {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Checkpoint names are plain file stems inside the journal directory.
    fn path_for(&self, name: &str) -> Result<PathBuf, CheckpointError> {
        let stem = name.strip_suffix(".json").unwrap_or(name);
        let mut components = Path::new(stem).components();
        let plain = matches!(
            (components.next(), components.next()),
            (Some(Component::Normal(_)), None)
        ) && !stem.contains(['/', '\\']);
        if !plain {
            return Err(CheckpointError::InvalidName(name.to_owned()));
        }
        Ok(self.dir.join(format!("{stem}.json")))
    }

    /// Persist `checkpoint` and return its name.
    ///
    /// # Errors
    /// Returns an error if the directory or file cannot be written.
    pub async fn write(&self, checkpoint: &Checkpoint) -> Result<String, CheckpointError> {
        let name = checkpoint_name(
            OffsetDateTime::now_utc(),
            Path::new(&checkpoint.file_path),
            &checkpoint.tool_call.name,
        )?;
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create directory: {}", self.dir.display()))?;

        let path = self.path_for(&name)?;
        let json = serde_json::to_vec_pretty(checkpoint).context("Failed to encode checkpoint")?;
        tokio::fs::write(&path, json)
            .await
            .with_context(|| format!("Failed to write checkpoint: {}", path.display()))?;
        Ok(name)
    }

    /// Checkpoint names, oldest first. A missing directory lists nothing.
    ///
    /// # Errors
    /// Returns an error if the directory exists but cannot be read.
    pub async fn list(&self) -> Result<Vec<String>, CheckpointError> {
        let mut dir = match tokio::fs::read_dir(&self.dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(anyhow::Error::new(e)
                    .context(format!("Failed to read directory: {}", self.dir.display()))
                    .into());
            }
        };

        let mut names = Vec::new();
        while let Some(entry) = dir.next_entry().await.context("Failed to read directory entry")? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json")
                && let Some(stem) = path.file_stem()
            {
                names.push(stem.to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }

    /// # Errors
    /// Returns [`CheckpointError::NotFound`] for an unknown name and
    /// [`CheckpointError::Malformed`] for a file that does not parse.
    pub async fn load(&self, name: &str) -> Result<Checkpoint, CheckpointError> {
        let path = self.path_for(name)?;
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CheckpointError::NotFound(name.to_owned()));
            }
            Err(e) => {
                return Err(anyhow::Error::new(e)
                    .context(format!("Failed to read checkpoint: {}", path.display()))
                    .into());
            }
        };
        serde_json::from_slice(&bytes).map_err(|source| CheckpointError::Malformed {
            name: name.to_owned(),
            source,
        })
    }
}

/// Snapshot store plus journal, as used by the scheduler.
#[derive(Clone)]
pub struct Checkpointer {
    journal: CheckpointJournal,
    store: Arc<dyn SnapshotStore>,
}

impl Checkpointer {
    #[must_use]
    pub fn new(journal: CheckpointJournal, store: Arc<dyn SnapshotStore>) -> Self {
        Self { journal, store }
    }

    #[must_use]
    pub const fn journal(&self) -> &CheckpointJournal {
        &self.journal
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn SnapshotStore> {
        &self.store
    }

    /// Snapshot `paths` and journal the call. Returns the checkpoint name,
    /// or `None` when there is nothing to snapshot.
    ///
    /// # Errors
    /// Propagates snapshot and journal failures.
    pub async fn checkpoint(
        &self,
        record: &ToolCallRecord,
        paths: &[PathBuf],
        history: &[Message],
    ) -> Result<Option<String>, CheckpointError> {
        let Some(first) = paths.first() else {
            return Ok(None);
        };

        let commit_hash = self.store.snapshot(paths).await?;
        let checkpoint = Checkpoint {
            history: history.to_vec(),
            client_history: extract_curated_history(history),
            tool_call: CheckpointToolCall {
                name: record.name().to_owned(),
                args: record.request.args.clone(),
            },
            commit_hash,
            file_path: first.display().to_string(),
        };
        let name = self.journal.write(&checkpoint).await?;
        log::info!(
            "Checkpoint written name={name} call_id={} tool={}",
            record.call_id(),
            record.name()
        );
        Ok(Some(name))
    }
}

/// Restore the files and the session history saved under `name`.
///
/// Returns the checkpoint so the caller can offer to re-run its tool call.
///
/// # Errors
/// Fails if the checkpoint or its snapshot cannot be loaded. The session is
/// untouched unless the files were restored.
pub async fn restore_checkpoint(
    journal: &CheckpointJournal,
    store: &dyn SnapshotStore,
    session: &ChatSession,
    name: &str,
) -> Result<Checkpoint, CheckpointError> {
    let checkpoint = journal.load(name).await?;
    store.restore(&checkpoint.commit_hash).await?;
    session.set_history(checkpoint.history.clone()).await;
    log::info!("Checkpoint restored name={name}");
    Ok(checkpoint)
}
