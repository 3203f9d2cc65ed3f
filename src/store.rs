// Copyright 2025 Tomoki Hayashi
// MIT License (https://opensource.org/licenses/MIT)

//! Project store: the single authority over projects and images.
//!
//! Every mutation goes through a named operation on [`ProjectStore`]. The
//! project list, each project and each image live behind their own `Arc`
//! and are copied on write, so a snapshot handed out before a mutation never
//! observes a half-applied change and a write only copies what it touches.
//! Operations on ids that no longer exist are silent no-ops.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;

use crate::caption::CaptionEdit;
use crate::model::{self, ImageId, ImagePayload, ImageStatus, Project, ProjectId, Scope, Snapshot, TagImage};
use crate::preview::PreviewRegistry;

pub const IMPORT_CHUNK_SIZE: usize = 50;

/// Where imported files go.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ImportTarget {
    Append(ProjectId),
    Create { name: Option<String> },
}

impl ImportTarget {
    /// Fix the target project id up front so that chunked imports create the
    /// project exactly once.
    pub fn resolve(self) -> ResolvedTarget {
        match self {
            ImportTarget::Append(project_id) => ResolvedTarget {
                project_id,
                create_name: None,
            },
            ImportTarget::Create { name } => ResolvedTarget {
                project_id: ProjectId::new(),
                create_name: Some(non_empty(name).unwrap_or_else(|| default_name("Import"))),
            },
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedTarget {
    pub project_id: ProjectId,
    create_name: Option<String>,
}

impl ResolvedTarget {
    pub fn creates_project(&self) -> bool {
        self.create_name.is_some()
    }
}

/// Destination of a move or merge.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Destination {
    Existing(ProjectId),
    New { name: Option<String> },
}

/// One entry of a batch run's work queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct WorkItem {
    pub project_id: ProjectId,
    pub image_id: ImageId,
}

fn non_empty(name: Option<String>) -> Option<String> {
    name.map(|n| n.trim().to_string()).filter(|n| !n.is_empty())
}

fn default_name(prefix: &str) -> String {
    format!("{prefix} {}", chrono::Local::now().format("%H:%M:%S"))
}

#[derive(Debug, Default)]
pub struct ProjectStore {
    projects: Snapshot,
    previews: PreviewRegistry,
    revision: u64,
}

impl ProjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from loaded projects: preview handles are regenerated and
    /// images left `loading` by an interrupted run go back to `idle`.
    pub fn from_projects(mut projects: Vec<Project>) -> Self {
        let mut previews = PreviewRegistry::new();
        for image in projects.iter_mut().flat_map(|p| p.images.iter_mut()) {
            Arc::make_mut(image).preview = Some(previews.create(&image.payload));
        }
        let mut store = Self {
            projects: model::share(projects),
            previews,
            revision: 0,
        };
        store.reset_interrupted();
        store
    }

    pub fn projects(&self) -> &[Arc<Project>] {
        &self.projects
    }

    /// Cheap immutable view of the current state.
    pub fn snapshot(&self) -> Snapshot {
        Arc::clone(&self.projects)
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn previews(&self) -> &PreviewRegistry {
        &self.previews
    }

    pub fn project(&self, id: ProjectId) -> Option<&Project> {
        self.projects.iter().find(|p| p.id == id).map(AsRef::as_ref)
    }

    pub fn image(&self, project_id: ProjectId, image_id: ImageId) -> Option<&TagImage> {
        self.project(project_id)?.image(image_id)
    }

    /// Find an image by id alone.
    pub fn locate(&self, image_id: ImageId) -> Option<(ProjectId, &TagImage)> {
        self.projects
            .iter()
            .find_map(|p| p.image(image_id).map(|i| (p.id, i)))
    }

    pub fn image_count(&self) -> usize {
        self.projects.iter().map(|p| p.images.len()).sum()
    }

    fn touch(&mut self) {
        self.revision += 1;
    }

    /// Writable projects matching `pred`. Only those are copied out of a
    /// shared snapshot.
    fn projects_mut(&mut self, pred: impl Fn(&Project) -> bool) -> impl Iterator<Item = &mut Project> {
        Arc::make_mut(&mut self.projects)
            .iter_mut()
            .filter(move |p| pred(p))
            .map(Arc::make_mut)
    }

    fn project_mut(&mut self, id: ProjectId) -> Option<&mut Project> {
        self.project(id)?;
        self.projects_mut(|p| p.id == id).next()
    }

    fn image_mut(&mut self, project_id: ProjectId, image_id: ImageId) -> Option<&mut TagImage> {
        self.image(project_id, image_id)?;
        self.project_mut(project_id)?.image_mut(image_id)
    }

    /// Drop empty projects, keeping `keep` even if it is empty.
    fn prune_empty(&mut self, keep: Option<ProjectId>) {
        let prunable = |p: &Project| p.images.is_empty() && Some(p.id) != keep;
        if self.projects.iter().any(|p| prunable(p)) {
            Arc::make_mut(&mut self.projects).retain(|p| !prunable(p));
        }
    }

    /// Append one chunk of files to the target, creating it on first use.
    /// Returns the number of images added.
    pub fn add_files(&mut self, payloads: Vec<ImagePayload>, target: &ResolvedTarget) -> usize {
        if payloads.is_empty() {
            return 0;
        }
        if target.create_name.is_none() && self.project(target.project_id).is_none() {
            return 0;
        }

        let images: Vec<Arc<TagImage>> = payloads
            .into_iter()
            .map(|payload| {
                let mut image = TagImage::new(payload);
                image.preview = Some(self.previews.create(&image.payload));
                Arc::new(image)
            })
            .collect();
        let added = images.len();

        match self.project_mut(target.project_id) {
            Some(project) => project.images.extend(images),
            None => {
                let name = target.create_name.clone().unwrap_or_default();
                let mut project = Project::with_id(target.project_id, name);
                project.images = images;
                Arc::make_mut(&mut self.projects).push(Arc::new(project));
            }
        }
        self.touch();
        added
    }

    pub fn delete_project(&mut self, id: ProjectId) -> bool {
        let Some(idx) = self.projects.iter().position(|p| p.id == id) else {
            return false;
        };
        let project = Arc::make_mut(&mut self.projects).remove(idx);
        for handle in project.images.iter().filter_map(|i| i.preview) {
            self.previews.revoke(handle);
        }
        self.touch();
        true
    }

    /// Remove images matching `pred` from every project, releasing their
    /// previews, then prune projects left empty.
    fn remove_where(&mut self, pred: impl Fn(&TagImage) -> bool) -> usize {
        let mut gone = Vec::new();
        for project in self.projects_mut(|p| p.images.iter().any(|i| pred(i))) {
            let (take, kept): (Vec<_>, Vec<_>) = project.images.drain(..).partition(|i| pred(i));
            project.images = kept;
            gone.extend(take);
        }
        if gone.is_empty() {
            return 0;
        }
        for handle in gone.iter().filter_map(|i| i.preview) {
            self.previews.revoke(handle);
        }
        let removed = gone.len();
        self.prune_empty(None);
        self.touch();
        removed
    }

    pub fn remove_images(&mut self, ids: &HashSet<ImageId>) -> usize {
        if ids.is_empty() {
            return 0;
        }
        self.remove_where(|i| ids.contains(&i.id))
    }

    /// Change the file name. The payload wrapper is replaced, so its preview
    /// handle is swapped for a fresh one.
    pub fn rename_image(&mut self, project_id: ProjectId, image_id: ImageId, name: &str) -> bool {
        let name = name.trim();
        if name.is_empty() {
            return false;
        }
        let Some(current) = self.image(project_id, image_id) else {
            return false;
        };
        let payload = current.payload.renamed(name);
        let old = current.preview;
        let fresh = self.previews.create(&payload);
        if let Some(handle) = old {
            self.previews.revoke(handle);
        }
        if let Some(image) = self.image_mut(project_id, image_id) {
            image.payload = payload;
            image.preview = Some(fresh);
        }
        self.touch();
        true
    }

    pub fn update_caption(&mut self, project_id: ProjectId, image_id: ImageId, text: &str) -> bool {
        let Some(image) = self.image_mut(project_id, image_id) else {
            return false;
        };
        image.caption = text.to_string();
        self.touch();
        true
    }

    /// Set an image's status. `error_msg` and `caption` overwrite only when
    /// given; the error message is always cleared outside the `error` state.
    pub fn update_status(
        &mut self,
        project_id: ProjectId,
        image_id: ImageId,
        status: ImageStatus,
        error_msg: Option<String>,
        caption: Option<String>,
    ) -> bool {
        let Some(image) = self.image_mut(project_id, image_id) else {
            return false;
        };
        image.status = status;
        if status == ImageStatus::Error {
            if error_msg.is_some() {
                image.error_msg = error_msg;
            }
        } else {
            image.error_msg = None;
        }
        if let Some(caption) = caption {
            image.caption = caption;
        }
        self.touch();
        true
    }

    /// Apply `edit` to every image in `ids`, across all projects, as one
    /// transition. Returns how many captions changed.
    pub fn batch_update_captions(&mut self, ids: &HashSet<ImageId>, edit: &CaptionEdit) -> usize {
        let changes: Vec<(ImageId, String)> = self
            .projects
            .iter()
            .flat_map(|p| &p.images)
            .filter(|i| ids.contains(&i.id))
            .filter_map(|i| {
                let next = edit.apply(&i.caption);
                (next != i.caption).then_some((i.id, next))
            })
            .collect();
        if changes.is_empty() {
            return 0;
        }
        for (id, caption) in &changes {
            if let Some(image) = self
                .projects_mut(|p| p.image(*id).is_some())
                .next()
                .and_then(|p| p.image_mut(*id))
            {
                image.caption = caption.clone();
            }
        }
        self.touch();
        changes.len()
    }

    fn resolve_destination(&mut self, dest: Destination, fallback: impl FnOnce() -> String) -> Option<ProjectId> {
        match dest {
            Destination::Existing(id) => self.project(id).map(|p| p.id),
            Destination::New { name } => {
                let project = Project::new(non_empty(name).unwrap_or_else(fallback));
                let id = project.id;
                Arc::make_mut(&mut self.projects).push(Arc::new(project));
                Some(id)
            }
        }
    }

    /// Move images into a destination project. Images already there stay put.
    /// Sources left empty are pruned; the destination never is.
    pub fn move_images(&mut self, ids: &HashSet<ImageId>, dest: Destination) -> Option<ProjectId> {
        if let Destination::Existing(id) = dest
            && self.project(id).is_none()
        {
            return None;
        }
        let skip = match dest {
            Destination::Existing(id) => Some(id),
            Destination::New { .. } => None,
        };
        let movable = self
            .projects
            .iter()
            .filter(|p| Some(p.id) != skip)
            .flat_map(|p| &p.images)
            .any(|i| ids.contains(&i.id));
        if !movable {
            return None;
        }

        let target = self.resolve_destination(dest, || default_name("Project"))?;
        let mut moved = Vec::new();
        let holds_ids = |p: &Project| p.id != target && p.images.iter().any(|i| ids.contains(&i.id));
        for project in self.projects_mut(holds_ids) {
            let (take, keep): (Vec<_>, Vec<_>) =
                project.images.drain(..).partition(|i| ids.contains(&i.id));
            project.images = keep;
            moved.extend(take);
        }
        if let Some(project) = self.project_mut(target) {
            project.images.extend(moved);
        }
        self.prune_empty(Some(target));
        self.touch();
        Some(target)
    }

    /// Move every image of `source` into the destination and delete `source`.
    pub fn merge_projects(&mut self, source: ProjectId, dest: Destination) -> Option<ProjectId> {
        self.project(source)?;
        if let Destination::Existing(id) = dest
            && (id == source || self.project(id).is_none())
        {
            return None;
        }
        let target = self.resolve_destination(dest, || "Merged Project".to_string())?;
        let idx = self.projects.iter().position(|p| p.id == source)?;
        let merged = Arc::unwrap_or_clone(Arc::make_mut(&mut self.projects).remove(idx));
        if let Some(project) = self.project_mut(target) {
            project.images.extend(merged.images);
        }
        self.touch();
        Some(target)
    }

    /// Reset every errored image to `idle`.
    pub fn retry_errors(&mut self) -> usize {
        let count: usize = self
            .projects
            .iter()
            .map(|p| p.count(ImageStatus::Error))
            .sum();
        if count == 0 {
            return 0;
        }
        for project in self.projects_mut(|p| p.count(ImageStatus::Error) > 0) {
            for image in project.images.iter_mut().filter(|i| i.status == ImageStatus::Error) {
                let image = Arc::make_mut(image);
                image.status = ImageStatus::Idle;
                image.error_msg = None;
            }
        }
        self.touch();
        count
    }

    /// Remove every successfully captioned image.
    pub fn clear_done(&mut self) -> usize {
        self.remove_where(|i| i.status == ImageStatus::Success)
    }

    /// Images left `loading` with no run behind them go back to `idle`.
    pub fn reset_interrupted(&mut self) -> usize {
        let count: usize = self
            .projects
            .iter()
            .map(|p| p.count(ImageStatus::Loading))
            .sum();
        if count == 0 {
            return 0;
        }
        for project in self.projects_mut(|p| p.count(ImageStatus::Loading) > 0) {
            for image in project.images.iter_mut().filter(|i| i.status == ImageStatus::Loading) {
                Arc::make_mut(image).status = ImageStatus::Idle;
            }
        }
        self.touch();
        count
    }

    pub fn set_collapsed(&mut self, id: ProjectId, collapsed: bool) -> bool {
        let Some(project) = self.project_mut(id) else {
            return false;
        };
        project.collapsed = collapsed;
        self.touch();
        true
    }

    pub fn rename_project(&mut self, id: ProjectId, name: &str) -> bool {
        let name = name.trim();
        if name.is_empty() {
            return false;
        }
        let Some(project) = self.project_mut(id) else {
            return false;
        };
        project.name = name.to_string();
        self.touch();
        true
    }

    /// Queueable images in scope, in project order then image order.
    pub fn pending_queue(&self, scope: Scope) -> Vec<WorkItem> {
        self.projects
            .iter()
            .filter(|p| scope.includes(p.id))
            .flat_map(|p| {
                p.images
                    .iter()
                    .filter(|i| i.status.is_queueable())
                    .map(move |i| WorkItem {
                        project_id: p.id,
                        image_id: i.id,
                    })
            })
            .collect()
    }
}

/// Result of a chunked import.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImportOutcome {
    pub project_id: ProjectId,
    pub added: usize,
}

/// Shared handle to the store.
///
/// Mutations are serialized by the lock and every one that changes state
/// bumps the revision published to subscribers.
#[derive(Clone)]
pub struct StoreHandle {
    inner: Arc<Mutex<ProjectStore>>,
    revision: Arc<watch::Sender<u64>>,
}

impl StoreHandle {
    pub fn new(store: ProjectStore) -> Self {
        let (tx, _) = watch::channel(store.revision());
        Self {
            inner: Arc::new(Mutex::new(store)),
            revision: Arc::new(tx),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ProjectStore> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn read<R>(&self, f: impl FnOnce(&ProjectStore) -> R) -> R {
        f(&self.lock())
    }

    pub fn update<R>(&self, f: impl FnOnce(&mut ProjectStore) -> R) -> R {
        let mut store = self.lock();
        let before = store.revision();
        let result = f(&mut store);
        let after = store.revision();
        drop(store);
        if after != before {
            self.revision.send_replace(after);
        }
        result
    }

    pub fn snapshot(&self) -> Snapshot {
        self.lock().snapshot()
    }

    pub fn revision(&self) -> u64 {
        self.lock().revision()
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    /// Import files in chunks, yielding between chunks so other tasks keep
    /// running during large imports. Returns `None` when appending to a
    /// project that does not exist.
    pub async fn add_files(
        &self,
        payloads: Vec<ImagePayload>,
        target: ImportTarget,
        chunk_size: usize,
    ) -> Option<ImportOutcome> {
        let target = target.resolve();
        if target.create_name.is_none() && self.read(|s| s.project(target.project_id).is_none()) {
            return None;
        }
        let mut added = 0;
        for chunk in payloads.chunks(chunk_size.max(1)) {
            added += self.update(|s| s.add_files(chunk.to_vec(), &target));
            tokio::task::yield_now().await;
        }
        tracing::info!(project = %target.project_id, added, "import finished");
        Some(ImportOutcome {
            project_id: target.project_id,
            added,
        })
    }
}
