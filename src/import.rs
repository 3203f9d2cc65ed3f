// Copyright 2025 Tomoki Hayashi
// MIT License (https://opensource.org/licenses/MIT)

//! File import: path scanning, grouping into projects and payload reads.
//!
//! Each directory becomes a new project named after it. Loose files go to
//! the active project, or to one new project when viewing all projects.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use rayon::prelude::*;
use walkdir::WalkDir;

use crate::model::{ImagePayload, ProjectId, Scope};
use crate::store::{ImportTarget, StoreHandle};

pub const SUPPORTED_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "webp", "bmp", "tiff", "avif", "heic",
];

#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error("Path does not exist: {0:?}")]
    NotFound(PathBuf),

    #[error("Failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("No image files found")]
    NoImages,

    #[error("Import task failed: {0}")]
    Task(String),
}

pub fn is_image_path(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| SUPPORTED_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

pub fn is_image_mime(mime: &str) -> bool {
    mime.starts_with("image/")
}

pub fn mime_for_path(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "tiff" => "image/tiff",
        "avif" => "image/avif",
        "heic" => "image/heic",
        _ => "application/octet-stream",
    }
}

/// Recursively collect image files under `dir`, sorted by path.
pub fn scan_dir(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .follow_links(true)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && is_image_path(e.path()))
        .map(|e| e.into_path())
        .collect();
    files.sort();
    files
}

/// Files bound for one project.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImportGroup {
    pub target: ImportTarget,
    pub files: Vec<PathBuf>,
}

fn dir_name(dir: &Path) -> Option<String> {
    dir.canonicalize()
        .ok()
        .as_deref()
        .unwrap_or(dir)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
}

/// Group input paths into import targets. Duplicate files are imported once.
pub fn plan_import(paths: &[PathBuf], active: Scope, name: Option<&str>) -> Result<Vec<ImportGroup>, ImportError> {
    let mut seen = HashSet::new();
    let mut groups = Vec::new();
    let mut loose = Vec::new();

    for path in paths {
        if path.is_dir() {
            let files: Vec<PathBuf> = scan_dir(path)
                .into_iter()
                .filter(|f| seen.insert(f.clone()))
                .collect();
            if files.is_empty() {
                tracing::warn!(dir = ?path, "no image files in directory");
                continue;
            }
            groups.push(ImportGroup {
                target: ImportTarget::Create {
                    name: dir_name(path),
                },
                files,
            });
        } else if path.is_file() {
            if is_image_path(path) && seen.insert(path.clone()) {
                loose.push(path.clone());
            }
        } else {
            return Err(ImportError::NotFound(path.clone()));
        }
    }

    if !loose.is_empty() {
        let target = match active {
            Scope::Project(id) => ImportTarget::Append(id),
            Scope::All => ImportTarget::Create {
                name: name.map(str::to_string),
            },
        };
        groups.push(ImportGroup {
            target,
            files: loose,
        });
    }
    if groups.is_empty() {
        return Err(ImportError::NoImages);
    }
    Ok(groups)
}

pub fn read_payload(path: &Path) -> Result<ImagePayload, ImportError> {
    let io_err = |source| ImportError::Io {
        path: path.to_path_buf(),
        source,
    };
    let bytes = std::fs::read(path).map_err(io_err)?;
    let modified = std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned());
    Ok(ImagePayload::new(name, mime_for_path(path), bytes).with_last_modified(modified))
}

/// Read files in parallel, preserving input order. Failures are returned
/// separately so one unreadable file does not sink the batch.
pub fn read_payloads(paths: &[PathBuf]) -> (Vec<ImagePayload>, Vec<ImportError>) {
    let results: Vec<_> = paths.par_iter().map(|p| read_payload(p)).collect();
    let mut payloads = Vec::with_capacity(results.len());
    let mut errors = Vec::new();
    for result in results {
        match result {
            Ok(payload) => payloads.push(payload),
            Err(err) => errors.push(err),
        }
    }
    (payloads, errors)
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub projects: Vec<ProjectId>,
    pub added: usize,
    pub failed: usize,
}

/// Import paths into the store.
///
/// Files are read and inserted `chunk_size` at a time, yielding in between,
/// so huge imports neither hold every file in memory nor stall other tasks.
/// Loose files aimed at a project that no longer exists go to a new one.
pub async fn import_paths(
    store: &StoreHandle,
    paths: &[PathBuf],
    active: Scope,
    name: Option<&str>,
    chunk_size: usize,
) -> Result<ImportSummary, ImportError> {
    let groups = plan_import(paths, active, name)?;
    let mut summary = ImportSummary::default();

    for group in groups {
        let mut target = group.target.resolve();
        if store.read(|s| s.project(target.project_id).is_none()) && !target.creates_project() {
            target = ImportTarget::Create {
                name: name.map(str::to_string),
            }
            .resolve();
        }
        let mut added = 0;
        for chunk in group.files.chunks(chunk_size.max(1)) {
            let chunk = chunk.to_vec();
            let (payloads, errors) = tokio::task::spawn_blocking(move || read_payloads(&chunk))
                .await
                .map_err(|e| ImportError::Task(e.to_string()))?;
            for err in &errors {
                tracing::warn!(error = %err, "skipping unreadable file");
            }
            summary.failed += errors.len();
            added += store.update(|s| s.add_files(payloads, &target));
            tokio::task::yield_now().await;
        }
        if added > 0 {
            summary.projects.push(target.project_id);
        }
        summary.added += added;
    }

    tracing::info!(added = summary.added, failed = summary.failed, projects = summary.projects.len(), "import finished");
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ProjectStore;

    struct TempDir(PathBuf);

    impl TempDir {
        fn new(tag: &str) -> Self {
            let dir = std::env::temp_dir().join(format!("batchtag-import-{tag}-{}", uuid::Uuid::new_v4()));
            std::fs::create_dir_all(&dir).unwrap();
            Self(dir)
        }

        fn file(&self, rel: &str, bytes: &[u8]) -> PathBuf {
            let path = self.0.join(rel);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(&path, bytes).unwrap();
            path
        }
    }

    impl Drop for TempDir {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.0);
        }
    }

    #[test]
    fn test_is_image_path() {
        assert!(is_image_path(Path::new("a.PNG")));
        assert!(is_image_path(Path::new("dir/b.heic")));
        assert!(!is_image_path(Path::new("notes.txt")));
        assert!(!is_image_path(Path::new("noext")));
        assert!(is_image_mime("image/webp"));
        assert!(!is_image_mime("text/plain"));
        assert_eq!(mime_for_path(Path::new("x.JPG")), "image/jpeg");
    }

    #[test]
    fn test_scan_dir_recursive_and_filtered() {
        let tmp = TempDir::new("scan");
        tmp.file("b.png", b"1");
        tmp.file("sub/a.jpg", b"2");
        tmp.file("sub/readme.txt", b"3");
        let files = scan_dir(&tmp.0);
        assert_eq!(files.len(), 2);
        assert!(files.iter().all(|f| is_image_path(f)));
    }

    #[test]
    fn test_plan_import_groups() {
        let tmp = TempDir::new("plan");
        let dir_file = tmp.file("shoot/x.png", b"1");
        let loose = tmp.file("y.webp", b"2");
        let ignored = tmp.file("z.txt", b"3");
        let paths = vec![tmp.0.join("shoot"), loose.clone(), ignored, dir_file];

        let groups = plan_import(&paths, Scope::All, Some("Loose")).unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].target, ImportTarget::Create { name: Some("shoot".into()) });
        assert_eq!(groups[1].target, ImportTarget::Create { name: Some("Loose".into()) });
        assert_eq!(groups[1].files, vec![loose.clone()]);

        let active = ProjectId::new();
        let groups = plan_import(&[loose], Scope::Project(active), None).unwrap();
        assert_eq!(groups[0].target, ImportTarget::Append(active));
    }

    #[test]
    fn test_plan_import_errors() {
        let tmp = TempDir::new("errors");
        let missing = tmp.0.join("missing.png");
        assert!(matches!(plan_import(&[missing], Scope::All, None), Err(ImportError::NotFound(_))));
        let txt = tmp.file("a.txt", b"x");
        assert!(matches!(plan_import(&[txt], Scope::All, None), Err(ImportError::NoImages)));
    }

    #[test]
    fn test_read_payload_metadata() {
        let tmp = TempDir::new("read");
        let path = tmp.file("pic.gif", b"GIF89a");
        let payload = read_payload(&path).unwrap();
        assert_eq!(payload.name, "pic.gif");
        assert_eq!(payload.mime, "image/gif");
        assert_eq!(payload.size(), 6);
        assert!(payload.last_modified > 0);
    }

    #[tokio::test]
    async fn test_import_paths_into_store() {
        let tmp = TempDir::new("store");
        for i in 0..5 {
            tmp.file(&format!("set/{i}.png"), b"png");
        }
        let store = StoreHandle::new(ProjectStore::new());
        let summary = import_paths(&store, &[tmp.0.join("set")], Scope::All, None, 2)
            .await
            .unwrap();
        assert_eq!(summary.added, 5);
        assert_eq!(summary.projects.len(), 1);
        let snapshot = store.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].name, "set");
        assert_eq!(snapshot[0].images[0].name(), "0.png");
    }

    #[tokio::test]
    async fn test_import_into_missing_active_project_creates_one() {
        let tmp = TempDir::new("fallback");
        let file = tmp.file("a.png", b"png");
        let store = StoreHandle::new(ProjectStore::new());
        let summary = import_paths(&store, &[file], Scope::Project(ProjectId::new()), Some("Fallback"), 50)
            .await
            .unwrap();
        assert_eq!(summary.added, 1);
        assert_eq!(store.snapshot()[0].name, "Fallback");
    }
}
