// Copyright 2025 Tomoki Hayashi
// MIT License (https://opensource.org/licenses/MIT)

//! Dataset export.
//!
//! The full export is one zip archive with a folder per non-empty project.
//! Each folder holds the original image files and, for every image with a
//! caption, a sidecar file with the same base name.

use std::collections::HashSet;
use std::io::{Seek, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use zip::CompressionMethod;
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

use crate::model::{Project, TagImage};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Txt,
    Json,
}

impl ExportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Txt => "txt",
            ExportFormat::Json => "json",
        }
    }

    fn sidecar_body(self, caption: &str) -> Result<Vec<u8>, ExportError> {
        match self {
            ExportFormat::Txt => Ok(caption.as_bytes().to_vec()),
            ExportFormat::Json => Ok(serde_json::to_vec_pretty(&serde_json::json!({ "tags": caption }))?),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("No content to export")]
    NoContent,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ExportStats {
    pub projects: usize,
    pub images: usize,
    pub sidecars: usize,
}

/// `a.b.png` -> `a.b.txt`. Names without an extension keep their full name.
pub fn sidecar_name(file_name: &str, format: ExportFormat) -> String {
    let stem = match file_name.rfind('.') {
        Some(idx) if idx > 0 => &file_name[..idx],
        _ => file_name,
    };
    format!("{stem}.{}", format.extension())
}

pub fn archive_file_name(date: chrono::NaiveDate) -> String {
    format!("lora_dataset_full_{}.zip", date.format("%Y-%m-%d"))
}

pub fn project_archive_file_name(project: &Project, date: chrono::NaiveDate) -> String {
    format!("{}_{}.zip", sanitize(&project.name), date.format("%Y-%m-%d"))
}

/// Archive entry names must not introduce extra path components.
fn sanitize(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| if matches!(c, '/' | '\\' | ':') { '_' } else { c })
        .collect();
    if cleaned.is_empty() || cleaned == "." || cleaned == ".." {
        "untitled".to_string()
    } else {
        cleaned
    }
}

/// Reserve `name`, or `stem (n).ext` if it is taken.
fn unique_name(taken: &mut HashSet<String>, name: &str) -> String {
    if taken.insert(name.to_lowercase()) {
        return name.to_string();
    }
    let (stem, ext) = match name.rfind('.') {
        Some(idx) if idx > 0 => (&name[..idx], &name[idx..]),
        _ => (name, ""),
    };
    (2..)
        .map(|n| format!("{stem} ({n}){ext}"))
        .find(|candidate| taken.insert(candidate.to_lowercase()))
        .unwrap_or_else(|| name.to_string())
}

fn has_content(projects: &[Arc<Project>]) -> bool {
    projects.iter().any(|p| !p.images.is_empty())
}

struct ArchiveWriter<W: Write + Seek> {
    zip: ZipWriter<W>,
    format: ExportFormat,
    stats: ExportStats,
}

impl<W: Write + Seek> ArchiveWriter<W> {
    fn new(writer: W, format: ExportFormat) -> Self {
        Self {
            zip: ZipWriter::new(writer),
            format,
            stats: ExportStats::default(),
        }
    }

    fn add_images(&mut self, prefix: &str, images: &[Arc<TagImage>]) -> Result<(), ExportError> {
        let stored = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
        let deflated = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        let mut taken = HashSet::new();
        for image in images {
            let file_name = unique_name(&mut taken, &sanitize(image.name()));
            self.zip.start_file(format!("{prefix}{file_name}"), stored)?;
            self.zip.write_all(&image.payload.bytes)?;
            self.stats.images += 1;

            if !image.caption.is_empty() {
                let sidecar = unique_name(&mut taken, &sidecar_name(&file_name, self.format));
                self.zip.start_file(format!("{prefix}{sidecar}"), deflated)?;
                self.zip.write_all(&self.format.sidecar_body(&image.caption)?)?;
                self.stats.sidecars += 1;
            }
        }
        Ok(())
    }

    fn finish(self) -> Result<(W, ExportStats), ExportError> {
        let stats = self.stats;
        Ok((self.zip.finish()?, stats))
    }
}

/// Write every non-empty project into one archive, one folder per project.
pub fn write_archive<W: Write + Seek>(
    writer: W,
    projects: &[Arc<Project>],
    format: ExportFormat,
) -> Result<(W, ExportStats), ExportError> {
    if !has_content(projects) {
        return Err(ExportError::NoContent);
    }
    let mut archive = ArchiveWriter::new(writer, format);
    let mut folders = HashSet::new();
    for project in projects.iter().filter(|p| !p.images.is_empty()) {
        let folder = unique_name(&mut folders, &sanitize(&project.name));
        archive.zip.add_directory(folder.as_str(), SimpleFileOptions::default())?;
        archive.add_images(&format!("{folder}/"), &project.images)?;
        archive.stats.projects += 1;
    }
    archive.finish()
}

/// Write one project as a flat archive.
pub fn write_project_archive<W: Write + Seek>(
    writer: W,
    project: &Project,
    format: ExportFormat,
) -> Result<(W, ExportStats), ExportError> {
    if project.images.is_empty() {
        return Err(ExportError::NoContent);
    }
    let mut archive = ArchiveWriter::new(writer, format);
    archive.add_images("", &project.images)?;
    archive.stats.projects = 1;
    archive.finish()
}

fn write_to_file(
    path: PathBuf,
    write: impl FnOnce(std::io::BufWriter<std::fs::File>) -> Result<(std::io::BufWriter<std::fs::File>, ExportStats), ExportError>,
) -> Result<(PathBuf, ExportStats), ExportError> {
    let tmp = path.with_extension("zip.part");
    let file = std::fs::File::create(&tmp)?;
    let result = write(std::io::BufWriter::new(file)).and_then(|(mut out, stats)| {
        out.flush()?;
        Ok(stats)
    });
    match result {
        Ok(stats) => {
            std::fs::rename(&tmp, &path)?;
            tracing::info!(path = ?path, images = stats.images, sidecars = stats.sidecars, "export written");
            Ok((path, stats))
        }
        Err(err) => {
            let _ = std::fs::remove_file(&tmp);
            Err(err)
        }
    }
}

/// Export all projects to `lora_dataset_full_<date>.zip` in `dir`.
pub fn export_all(projects: &[Arc<Project>], format: ExportFormat, dir: &Path) -> Result<(PathBuf, ExportStats), ExportError> {
    if !has_content(projects) {
        return Err(ExportError::NoContent);
    }
    let path = dir.join(archive_file_name(chrono::Local::now().date_naive()));
    export_all_to(projects, format, path)
}

/// Export all projects to an explicit archive path.
pub fn export_all_to(projects: &[Arc<Project>], format: ExportFormat, path: PathBuf) -> Result<(PathBuf, ExportStats), ExportError> {
    write_to_file(path, |w| write_archive(w, projects, format))
}

/// Export a single project to `<name>_<date>.zip` in `dir`.
pub fn export_project(project: &Project, format: ExportFormat, dir: &Path) -> Result<(PathBuf, ExportStats), ExportError> {
    if project.images.is_empty() {
        return Err(ExportError::NoContent);
    }
    let path = dir.join(project_archive_file_name(project, chrono::Local::now().date_naive()));
    write_to_file(path, |w| write_project_archive(w, project, format))
}

/// Write one image's caption to `<stem>.txt` in `dir`. Returns `None` when the
/// caption is empty.
pub fn write_caption_file(image: &TagImage, dir: &Path) -> Result<Option<PathBuf>, ExportError> {
    if image.caption.is_empty() {
        return Ok(None);
    }
    let path = dir.join(sidecar_name(&sanitize(image.name()), ExportFormat::Txt));
    std::fs::write(&path, image.caption.as_bytes())?;
    Ok(Some(path))
}

#[cfg(test)]
mod tests {
    use std::io::{Cursor, Read};

    use super::*;
    use crate::model::ImagePayload;

    fn image(name: &str, caption: &str) -> TagImage {
        let mut image = TagImage::new(ImagePayload::new(name, "image/png", name.as_bytes().to_vec()));
        image.caption = caption.to_string();
        image
    }

    fn project(name: &str, images: Vec<TagImage>) -> Arc<Project> {
        let mut project = Project::new(name);
        images.into_iter().for_each(|image| project.push(image));
        Arc::new(project)
    }

    fn entries(bytes: Vec<u8>) -> Vec<(String, String)> {
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        let mut out = Vec::new();
        for i in 0..archive.len() {
            let mut file = archive.by_index(i).unwrap();
            if file.is_dir() {
                continue;
            }
            let mut content = String::new();
            file.read_to_string(&mut content).unwrap();
            out.push((file.name().to_string(), content));
        }
        out
    }

    #[test]
    fn test_sidecar_name() {
        assert_eq!(sidecar_name("a.png", ExportFormat::Txt), "a.txt");
        assert_eq!(sidecar_name("a.b.jpeg", ExportFormat::Json), "a.b.json");
        assert_eq!(sidecar_name("noext", ExportFormat::Txt), "noext.txt");
        assert_eq!(sidecar_name(".hidden", ExportFormat::Txt), ".hidden.txt");
    }

    #[test]
    fn test_archive_layout_txt() {
        let projects = vec![
            project("set", vec![image("a.png", "red hair"), image("b.png", "")]),
            project("empty", vec![]),
            project("set", vec![image("c.png", "smile")]),
        ];
        let (cursor, stats) = write_archive(Cursor::new(Vec::new()), &projects, ExportFormat::Txt).unwrap();
        assert_eq!(stats, ExportStats { projects: 2, images: 3, sidecars: 2 });

        let files = entries(cursor.into_inner());
        let names: Vec<_> = files.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["set/a.png", "set/a.txt", "set/b.png", "set (2)/c.png", "set (2)/c.txt"]);
        assert_eq!(files[1].1, "red hair");
    }

    #[test]
    fn test_archive_json_sidecar() {
        let projects = vec![project("p", vec![image("a.png", "1girl, smile")])];
        let (cursor, _) = write_archive(Cursor::new(Vec::new()), &projects, ExportFormat::Json).unwrap();
        let files = entries(cursor.into_inner());
        assert_eq!(files[1].0, "p/a.json");
        let json: serde_json::Value = serde_json::from_str(&files[1].1).unwrap();
        assert_eq!(json["tags"], "1girl, smile");
        assert!(files[1].1.contains("\n  \"tags\""));
    }

    #[test]
    fn test_duplicate_file_names_are_renamed() {
        let projects = vec![project("p", vec![image("a.png", "x"), image("a.png", "y")])];
        let (cursor, _) = write_archive(Cursor::new(Vec::new()), &projects, ExportFormat::Txt).unwrap();
        let names: Vec<_> = entries(cursor.into_inner()).into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["p/a.png", "p/a.txt", "p/a (2).png", "p/a (2).txt"]);
    }

    #[test]
    fn test_no_content() {
        let err = write_archive(Cursor::new(Vec::new()), &[project("e", vec![])], ExportFormat::Txt).unwrap_err();
        assert_eq!(err.to_string(), "No content to export");
    }

    #[test]
    fn test_project_archive_is_flat() {
        let p = project("solo", vec![image("a.png", "tag")]);
        let (cursor, _) = write_project_archive(Cursor::new(Vec::new()), &p, ExportFormat::Txt).unwrap();
        let names: Vec<_> = entries(cursor.into_inner()).into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["a.png", "a.txt"]);
    }

    #[test]
    fn test_file_names() {
        let date = chrono::NaiveDate::from_ymd_opt(2025, 3, 9).unwrap();
        assert_eq!(archive_file_name(date), "lora_dataset_full_2025-03-09.zip");
        assert_eq!(project_archive_file_name(&project("a/b", vec![]), date), "a_b_2025-03-09.zip");
    }

    #[test]
    fn test_write_caption_file() {
        let dir = std::env::temp_dir().join(format!("batchtag-export-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();

        assert_eq!(write_caption_file(&image("a.png", ""), &dir).unwrap(), None);
        let path = write_caption_file(&image("a.png", "red hair"), &dir).unwrap().unwrap();
        assert_eq!(path.file_name().unwrap(), "a.txt");
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "red hair");

        let (archive, stats) = export_all(&[project("p", vec![image("b.png", "c")])], ExportFormat::Txt, &dir).unwrap();
        assert!(archive.exists());
        assert_eq!(stats.images, 1);

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
