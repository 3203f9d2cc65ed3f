// Copyright 2025 Tomoki Hayashi
// MIT License (https://opensource.org/licenses/MIT)

//! Core data types: projects, images, payloads and their identities.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::preview::PreviewHandle;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageId(Uuid);

impl ImageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ImageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ImageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectId(Uuid);

impl ProjectId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ProjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Captioning state of a single image.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageStatus {
    #[default]
    Idle,
    Loading,
    Success,
    Error,
}

impl ImageStatus {
    /// Idle and errored images are picked up by the next batch run.
    pub fn is_queueable(self) -> bool {
        matches!(self, ImageStatus::Idle | ImageStatus::Error)
    }

    pub fn label(self) -> &'static str {
        match self {
            ImageStatus::Idle => "idle",
            ImageStatus::Loading => "loading",
            ImageStatus::Success => "done",
            ImageStatus::Error => "error",
        }
    }
}

/// Which projects an operation looks at.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Scope {
    #[default]
    All,
    Project(ProjectId),
}

impl Scope {
    pub fn includes(self, id: ProjectId) -> bool {
        match self {
            Scope::All => true,
            Scope::Project(p) => p == id,
        }
    }
}

/// The source file of an image. Bytes are shared, so cloning is cheap.
#[derive(Clone, Debug)]
pub struct ImagePayload {
    pub name: String,
    pub mime: String,
    /// Milliseconds since the Unix epoch.
    pub last_modified: u64,
    pub bytes: Arc<[u8]>,
}

impl ImagePayload {
    pub fn new(name: impl Into<String>, mime: impl Into<String>, bytes: impl Into<Arc<[u8]>>) -> Self {
        Self {
            name: name.into(),
            mime: mime.into(),
            last_modified: 0,
            bytes: bytes.into(),
        }
    }

    pub fn with_last_modified(mut self, millis: u64) -> Self {
        self.last_modified = millis;
        self
    }

    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    /// Same bytes, mime and modification time under a different file name.
    pub fn renamed(&self, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mime: self.mime.clone(),
            last_modified: self.last_modified,
            bytes: Arc::clone(&self.bytes),
        }
    }

    /// File name without its last extension (`a.b.png` -> `a.b`).
    /// Names without a usable extension are returned unchanged.
    pub fn stem(&self) -> &str {
        match self.name.rfind('.') {
            Some(idx) if idx > 0 => &self.name[..idx],
            _ => &self.name,
        }
    }
}

#[derive(Clone, Debug)]
pub struct TagImage {
    pub id: ImageId,
    pub payload: ImagePayload,
    pub preview: Option<PreviewHandle>,
    pub caption: String,
    pub status: ImageStatus,
    pub error_msg: Option<String>,
}

impl TagImage {
    /// A freshly imported image: idle, empty caption, new identity.
    pub fn new(payload: ImagePayload) -> Self {
        Self {
            id: ImageId::new(),
            payload,
            preview: None,
            caption: String::new(),
            status: ImageStatus::Idle,
            error_msg: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.payload.name
    }
}

/// Informational status derived from a project's images.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProjectStatus {
    Idle,
    Processing,
    Completed,
}

/// Images are shared between snapshots and only copied when written.
#[derive(Clone, Debug)]
pub struct Project {
    pub id: ProjectId,
    pub name: String,
    pub images: Vec<Arc<TagImage>>,
    pub collapsed: bool,
}

/// Immutable view of every project. Untouched projects and images are
/// shared with the store, so taking one is cheap.
pub type Snapshot = Arc<Vec<Arc<Project>>>;

pub fn share(projects: Vec<Project>) -> Snapshot {
    Arc::new(projects.into_iter().map(Arc::new).collect())
}

impl Project {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_id(ProjectId::new(), name)
    }

    pub fn with_id(id: ProjectId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            images: Vec::new(),
            collapsed: false,
        }
    }

    pub fn status(&self) -> ProjectStatus {
        if self.images.iter().any(|i| i.status == ImageStatus::Loading) {
            ProjectStatus::Processing
        } else if !self.images.is_empty()
            && self.images.iter().all(|i| i.status == ImageStatus::Success)
        {
            ProjectStatus::Completed
        } else {
            ProjectStatus::Idle
        }
    }

    pub fn push(&mut self, image: TagImage) {
        self.images.push(Arc::new(image));
    }

    pub fn image(&self, id: ImageId) -> Option<&TagImage> {
        self.images.iter().find(|i| i.id == id).map(AsRef::as_ref)
    }

    /// Writable image, copied first if a snapshot still shares it.
    pub fn image_mut(&mut self, id: ImageId) -> Option<&mut TagImage> {
        self.images.iter_mut().find(|i| i.id == id).map(Arc::make_mut)
    }

    pub fn count(&self, status: ImageStatus) -> usize {
        self.images.iter().filter(|i| i.status == status).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(name: &str) -> ImagePayload {
        ImagePayload::new(name, "image/png", vec![1u8, 2, 3])
    }

    #[test]
    fn test_stem_strips_last_extension() {
        assert_eq!(payload("a.png").stem(), "a");
        assert_eq!(payload("a.b.jpeg").stem(), "a.b");
    }

    #[test]
    fn test_stem_without_extension() {
        assert_eq!(payload("noext").stem(), "noext");
        assert_eq!(payload(".hidden").stem(), ".hidden");
    }

    #[test]
    fn test_renamed_shares_bytes() {
        let p = payload("a.png").with_last_modified(42);
        let r = p.renamed("b.png");
        assert_eq!(r.name, "b.png");
        assert_eq!(r.mime, "image/png");
        assert_eq!(r.last_modified, 42);
        assert!(Arc::ptr_eq(&p.bytes, &r.bytes));
    }

    #[test]
    fn test_queueable_statuses() {
        assert!(ImageStatus::Idle.is_queueable());
        assert!(ImageStatus::Error.is_queueable());
        assert!(!ImageStatus::Loading.is_queueable());
        assert!(!ImageStatus::Success.is_queueable());
    }

    #[test]
    fn test_project_status_derivation() {
        let mut project = Project::new("p");
        assert_eq!(project.status(), ProjectStatus::Idle);

        project.push(TagImage::new(payload("a.png")));
        project.push(TagImage::new(payload("b.png")));
        assert_eq!(project.status(), ProjectStatus::Idle);

        let (a, b) = (project.images[0].id, project.images[1].id);
        project.image_mut(a).unwrap().status = ImageStatus::Loading;
        assert_eq!(project.status(), ProjectStatus::Processing);

        project.image_mut(a).unwrap().status = ImageStatus::Success;
        project.image_mut(b).unwrap().status = ImageStatus::Success;
        assert_eq!(project.status(), ProjectStatus::Completed);
    }

    #[test]
    fn test_image_mut_copies_shared_image_only() {
        let mut project = Project::new("p");
        project.push(TagImage::new(payload("a.png")));
        project.push(TagImage::new(payload("b.png")));
        let before = project.clone();

        let id = project.images[0].id;
        project.image_mut(id).unwrap().caption = "edited".into();
        assert_eq!(before.images[0].caption, "");
        assert_eq!(project.images[0].caption, "edited");
        assert!(!Arc::ptr_eq(&before.images[0], &project.images[0]));
        assert!(Arc::ptr_eq(&before.images[1], &project.images[1]));
    }

    #[test]
    fn test_status_serializes_lowercase() {
        let json = serde_json::to_string(&ImageStatus::Success).unwrap();
        assert_eq!(json, "\"success\"");
    }
}
