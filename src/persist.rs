// Copyright 2025 Tomoki Hayashi
// MIT License (https://opensource.org/licenses/MIT)

//! Workspace persistence and debounced auto-save.
//!
//! Layout of a workspace directory:
//! - `workspace.json`: projects, image metadata, captions and statuses
//! - `blobs/<image id>`: original image bytes, written once per image
//!
//! Preview handles are never written; they are regenerated on load.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};

use crate::model::{ImageId, ImagePayload, ImageStatus, Project, ProjectId, Snapshot, TagImage};
use crate::store::StoreHandle;

const WORKSPACE_FILE: &str = "workspace.json";
const BLOB_DIR: &str = "blobs";
const FORMAT_VERSION: u32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid workspace file: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Persistence task failed: {0}")]
    Task(String),
}

#[async_trait]
pub trait Persistence: Send + Sync {
    async fn save(&self, projects: Snapshot) -> Result<(), PersistError>;
    async fn load(&self) -> Result<Vec<Project>, PersistError>;
}

#[derive(Debug, Serialize, Deserialize)]
struct WorkspaceFile {
    version: u32,
    projects: Vec<ProjectRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ProjectRecord {
    id: ProjectId,
    name: String,
    #[serde(default)]
    collapsed: bool,
    #[serde(default)]
    images: Vec<ImageRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ImageRecord {
    id: ImageId,
    name: String,
    mime: String,
    #[serde(default)]
    last_modified: u64,
    #[serde(default)]
    caption: String,
    #[serde(default)]
    status: ImageStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error_msg: Option<String>,
}

impl From<&TagImage> for ImageRecord {
    fn from(image: &TagImage) -> Self {
        Self {
            id: image.id,
            name: image.payload.name.clone(),
            mime: image.payload.mime.clone(),
            last_modified: image.payload.last_modified,
            caption: image.caption.clone(),
            status: image.status,
            error_msg: image.error_msg.clone(),
        }
    }
}

/// Write via a temp file and rename so readers never see a partial file.
fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)
}

/// Plain directory on the local filesystem.
#[derive(Clone, Debug)]
pub struct DirectoryStore {
    root: PathBuf,
}

impl DirectoryStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn blob_path(root: &Path, id: ImageId) -> PathBuf {
        root.join(BLOB_DIR).join(id.to_string())
    }

    fn save_sync(root: &Path, projects: &[Arc<Project>]) -> Result<(), PersistError> {
        let blob_dir = root.join(BLOB_DIR);
        std::fs::create_dir_all(&blob_dir)?;

        let mut live = HashSet::new();
        for image in projects.iter().flat_map(|p| &p.images) {
            let path = Self::blob_path(root, image.id);
            if !path.exists() {
                write_atomic(&path, &image.payload.bytes)?;
            }
            live.insert(image.id.to_string());
        }

        let file = WorkspaceFile {
            version: FORMAT_VERSION,
            projects: projects
                .iter()
                .map(|p| ProjectRecord {
                    id: p.id,
                    name: p.name.clone(),
                    collapsed: p.collapsed,
                    images: p.images.iter().map(|i| ImageRecord::from(i.as_ref())).collect(),
                })
                .collect(),
        };
        write_atomic(&root.join(WORKSPACE_FILE), &serde_json::to_vec_pretty(&file)?)?;

        for entry in std::fs::read_dir(&blob_dir)?.filter_map(|e| e.ok()) {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !live.contains(&name) {
                let _ = std::fs::remove_file(entry.path());
            }
        }
        Ok(())
    }

    fn load_sync(root: &Path) -> Result<Vec<Project>, PersistError> {
        let path = root.join(WORKSPACE_FILE);
        let content = match std::fs::read(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let file: WorkspaceFile = serde_json::from_slice(&content)?;

        let mut projects = Vec::with_capacity(file.projects.len());
        for record in file.projects {
            let mut project = Project::with_id(record.id, record.name);
            project.collapsed = record.collapsed;
            for image in record.images {
                let bytes = match std::fs::read(Self::blob_path(root, image.id)) {
                    Ok(b) => b,
                    Err(e) => {
                        tracing::warn!(image = %image.name, error = %e, "missing image data, skipped");
                        continue;
                    }
                };
                let payload = ImagePayload::new(image.name, image.mime, bytes)
                    .with_last_modified(image.last_modified);
                let error_msg = image.error_msg.filter(|_| image.status == ImageStatus::Error);
                project.push(TagImage {
                    id: image.id,
                    payload,
                    preview: None,
                    caption: image.caption,
                    status: image.status,
                    error_msg,
                });
            }
            projects.push(project);
        }
        Ok(projects)
    }
}

#[async_trait]
impl Persistence for DirectoryStore {
    async fn save(&self, projects: Snapshot) -> Result<(), PersistError> {
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || Self::save_sync(&root, &projects))
            .await
            .map_err(|e| PersistError::Task(e.to_string()))?
    }

    async fn load(&self) -> Result<Vec<Project>, PersistError> {
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || Self::load_sync(&root))
            .await
            .map_err(|e| PersistError::Task(e.to_string()))?
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SaveStatus {
    Saved,
    Saving,
    Unsaved,
}

impl SaveStatus {
    pub fn label(self) -> &'static str {
        match self {
            SaveStatus::Saved => "saved",
            SaveStatus::Saving => "saving",
            SaveStatus::Unsaved => "unsaved",
        }
    }
}

/// Debounced background saver.
///
/// Store changes arm a timer; further changes within `quiet` push it back, so
/// a burst of edits produces one write. A failed save leaves the status at
/// `Unsaved` until the next change triggers another attempt.
pub struct AutoSaver {
    status: watch::Receiver<SaveStatus>,
    flush_tx: mpsc::UnboundedSender<oneshot::Sender<SaveStatus>>,
    task: JoinHandle<()>,
}

struct SaveLoop {
    store: StoreHandle,
    persistence: Arc<dyn Persistence>,
    status: watch::Sender<SaveStatus>,
    saved_revision: u64,
}

impl SaveLoop {
    fn dirty(&self) -> bool {
        self.store.revision() != self.saved_revision
    }

    async fn save(&mut self) {
        let (revision, snapshot) = self.store.read(|s| (s.revision(), s.snapshot()));
        self.status.send_replace(SaveStatus::Saving);
        match self.persistence.save(snapshot).await {
            Ok(()) => {
                self.saved_revision = revision;
                tracing::debug!(revision, "workspace saved");
                let next = if self.dirty() {
                    SaveStatus::Unsaved
                } else {
                    SaveStatus::Saved
                };
                self.status.send_replace(next);
            }
            Err(err) => {
                tracing::warn!(error = %err, "workspace save failed");
                self.status.send_replace(SaveStatus::Unsaved);
            }
        }
    }

    async fn run(
        mut self,
        quiet: Duration,
        mut flush_rx: mpsc::UnboundedReceiver<oneshot::Sender<SaveStatus>>,
    ) {
        let mut revisions = self.store.subscribe();
        let mut deadline: Option<Instant> = None;
        loop {
            let armed = deadline;
            let timer = async move {
                match armed {
                    Some(at) => sleep_until(at).await,
                    None => std::future::pending().await,
                }
            };
            tokio::select! {
                changed = revisions.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    self.status.send_replace(SaveStatus::Unsaved);
                    deadline = Some(Instant::now() + quiet);
                }
                _ = timer => {
                    deadline = None;
                    self.save().await;
                }
                request = flush_rx.recv() => {
                    let Some(reply) = request else {
                        break;
                    };
                    deadline = None;
                    if self.dirty() {
                        self.save().await;
                    }
                    let _ = reply.send(*self.status.borrow());
                }
            }
        }
    }
}

impl AutoSaver {
    pub fn spawn(store: StoreHandle, persistence: Arc<dyn Persistence>, quiet: Duration) -> Self {
        let saved_revision = store.revision();
        let (status_tx, status) = watch::channel(SaveStatus::Saved);
        let (flush_tx, flush_rx) = mpsc::unbounded_channel();
        let save_loop = SaveLoop {
            store,
            persistence,
            status: status_tx,
            saved_revision,
        };
        let task = tokio::spawn(save_loop.run(quiet, flush_rx));
        Self {
            status,
            flush_tx,
            task,
        }
    }

    pub fn status(&self) -> SaveStatus {
        *self.status.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SaveStatus> {
        self.status.clone()
    }

    /// Save now if anything changed since the last save.
    pub async fn flush(&self) -> SaveStatus {
        let (tx, rx) = oneshot::channel();
        if self.flush_tx.send(tx).is_err() {
            return SaveStatus::Unsaved;
        }
        rx.await.unwrap_or(SaveStatus::Unsaved)
    }
}

impl Drop for AutoSaver {
    fn drop(&mut self) {
        self.task.abort();
    }
}
