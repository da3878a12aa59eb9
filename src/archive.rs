use std::collections::HashSet;
use std::fs;
use std::io::{Cursor, Seek, Write};

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use tracing::{debug, info};
use zip::CompressionMethod;
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

use crate::client::Payload;
use crate::error::DownloadError;
use crate::p10;

pub const EXTENSION: &str = "dcm";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Compression {
    /// Pixel data rarely shrinks, so entries are stored by default.
    #[default]
    Stored,
    Deflated,
}

impl Compression {
    fn method(self) -> CompressionMethod {
        match self {
            Compression::Stored => CompressionMethod::Stored,
            Compression::Deflated => CompressionMethod::Deflated,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub path: String,
    pub payload: Payload,
}

/// Named payloads ready to be written as one zip container.
#[derive(Debug, Clone, Default)]
pub struct Archive {
    entries: Vec<ArchiveEntry>,
}

/// A written archive on disk.
#[derive(Debug, Clone, Serialize)]
pub struct ArchiveHandle {
    pub path: Utf8PathBuf,
    pub entries: Vec<String>,
    pub size: u64,
}

/// `study/series/instance.dcm` from the object header, `<index>.dcm` when
/// the header does not name all three.
pub fn entry_path(payload: &[u8], index: usize) -> String {
    match p10::scan_identifiers(payload).path() {
        Some(path) => format!("{path}.{EXTENSION}"),
        None => positional_path(index),
    }
}

fn positional_path(index: usize) -> String {
    format!("{index}.{EXTENSION}")
}

/// Names every payload. Nothing is dropped: payloads whose header cannot be
/// read, or whose derived path is already taken, fall back to their index.
pub fn assemble(payloads: Vec<Payload>) -> Archive {
    let mut seen = HashSet::with_capacity(payloads.len());
    let mut entries = Vec::with_capacity(payloads.len());
    for (index, payload) in payloads.into_iter().enumerate() {
        let mut path = entry_path(&payload, index);
        if !seen.insert(path.clone()) {
            debug!(%path, index, "duplicate entry path, using positional name");
            path = positional_path(index);
            seen.insert(path.clone());
        }
        entries.push(ArchiveEntry { path, payload });
    }
    Archive { entries }
}

impl Archive {
    pub fn entries(&self) -> &[ArchiveEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn paths(&self) -> Vec<String> {
        self.entries.iter().map(|entry| entry.path.clone()).collect()
    }

    pub fn write_to<W>(&self, writer: W, compression: Compression) -> Result<W, DownloadError>
    where
        W: Write + Seek,
    {
        let mut zip = ZipWriter::new(writer);
        for entry in &self.entries {
            let options = SimpleFileOptions::default()
                .compression_method(compression.method())
                .large_file(entry.payload.len() as u64 >= u64::from(u32::MAX));
            zip.start_file(entry.path.as_str(), options)
                .map_err(|err| DownloadError::Archive(err.to_string()))?;
            zip.write_all(&entry.payload)
                .map_err(|err| DownloadError::Archive(err.to_string()))?;
        }
        zip.finish()
            .map_err(|err| DownloadError::Archive(err.to_string()))
    }

    pub fn to_bytes(&self, compression: Compression) -> Result<Vec<u8>, DownloadError> {
        self.write_to(Cursor::new(Vec::new()), compression)
            .map(Cursor::into_inner)
    }

    /// Writes the archive next to `dest` and moves it into place once
    /// complete, so `dest` never holds a partial archive.
    pub fn persist(
        &self,
        dest: &Utf8Path,
        compression: Compression,
    ) -> Result<ArchiveHandle, DownloadError> {
        let parent = dest
            .parent()
            .filter(|parent| !parent.as_str().is_empty())
            .unwrap_or(Utf8Path::new("."));
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| DownloadError::Filesystem(err.to_string()))?;

        let mut temp = tempfile::Builder::new()
            .prefix("p10dl-archive")
            .tempfile_in(parent.as_std_path())
            .map_err(|err| DownloadError::Filesystem(err.to_string()))?;
        self.write_to(temp.as_file_mut(), compression)?;
        let size = temp
            .as_file()
            .metadata()
            .map_err(|err| DownloadError::Filesystem(err.to_string()))?
            .len();
        temp.persist(dest.as_std_path())
            .map_err(|err| DownloadError::Filesystem(err.to_string()))?;

        info!(path = %dest, entries = self.entries.len(), size, "archive written");
        Ok(ArchiveHandle {
            path: dest.to_path_buf(),
            entries: self.paths(),
            size,
        })
    }
}
