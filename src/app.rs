use camino::{Utf8Path, Utf8PathBuf};
use chrono::Local;
use directories::UserDirs;
use serde::Serialize;

use crate::archive::{self, ArchiveHandle, Compression};
use crate::client::DicomWebClient;
use crate::error::DownloadError;
use crate::progress::{Progress, TaskList};
use crate::reference::ReferenceTree;
use crate::retrieve;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ProgressInfo {
    pub percent: f64,
    pub total: usize,
    pub failures: usize,
}

impl From<&Progress> for ProgressInfo {
    fn from(status: &Progress) -> Self {
        Self {
            percent: status.percent(),
            total: status.total,
            failures: status.failures,
        }
    }
}

pub type ProgressCallback = Box<dyn Fn(ProgressInfo) + Send + Sync>;

pub struct DownloadOptions {
    pub output: Utf8PathBuf,
    pub compression: Compression,
    pub on_progress: Option<ProgressCallback>,
}

impl DownloadOptions {
    pub fn new(output: impl Into<Utf8PathBuf>) -> Self {
        Self {
            output: output.into(),
            compression: Compression::default(),
            on_progress: None,
        }
    }

    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    pub fn on_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(ProgressInfo) + Send + Sync + 'static,
    {
        self.on_progress = Some(Box::new(callback));
        self
    }
}

/// Retrieves everything `tree` references and writes it as one zip archive
/// at `options.output`.
pub fn download_and_package<C>(
    client: &C,
    tree: &ReferenceTree,
    options: DownloadOptions,
) -> Result<ArchiveHandle, DownloadError>
where
    C: DicomWebClient + ?Sized,
{
    let tasks = TaskList::new();
    if let Some(callback) = options.on_progress {
        tasks.subscribe(move |status, _| callback(ProgressInfo::from(status)));
    }

    let payloads = retrieve::retrieve_all(client, tree, Some(&tasks))?;
    let archive = archive::assemble(payloads);
    archive.persist(&options.output, options.compression)
}

/// Single path form of [`download_and_package`].
pub fn download_and_package_path<C>(
    client: &C,
    study: &str,
    series: Option<&str>,
    instance: Option<&str>,
    options: DownloadOptions,
) -> Result<ArchiveHandle, DownloadError>
where
    C: DicomWebClient + ?Sized,
{
    let tree = ReferenceTree::from_path(study, series, instance);
    download_and_package(client, &tree, options)
}

/// `<dir>/dicom-<timestamp>.zip`, where `dir` defaults to the user's
/// download directory, then the current directory.
pub fn default_archive_path(dir: Option<&Utf8Path>) -> Utf8PathBuf {
    let dir = dir.map(Utf8Path::to_path_buf).unwrap_or_else(|| {
        UserDirs::new()
            .and_then(|dirs| dirs.download_dir().map(|dir| dir.to_path_buf()))
            .and_then(|dir| Utf8PathBuf::from_path_buf(dir).ok())
            .unwrap_or_else(|| Utf8PathBuf::from("."))
    });
    dir.join(format!("dicom-{}.zip", Local::now().format("%Y%m%d-%H%M%S")))
}
