use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum DownloadError {
    #[error("no valid study reference to download")]
    #[diagnostic(help("pass at least one StudyInstanceUID"))]
    NoValidReference,

    #[error("{failed} of {total} retrievals failed")]
    BatchFailed {
        failed: usize,
        total: usize,
        #[source]
        source: Box<DownloadError>,
    },

    #[error("retrieval response nested deeper than two levels")]
    NestingTooDeep,

    #[error("retrieval worker panicked: {0}")]
    WorkerPanicked(String),

    #[error("invalid DICOM UID: {0}")]
    InvalidUid(String),

    #[error("DICOMweb request failed: {0}")]
    Http(String),

    #[error("DICOMweb server returned status {status}: {message}")]
    ServerStatus { status: u16, message: String },

    #[error("malformed multipart response: {0}")]
    Multipart(String),

    #[error("failed to write archive: {0}")]
    Archive(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("missing config file p10dl.json in current directory")]
    MissingConfig,

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("no DICOMweb server configured")]
    NoServerConfigured,

    #[error("unknown DICOMweb server: {0}")]
    UnknownServer(String),
}

impl DownloadError {
    /// True for failures that happened before any request was issued.
    pub fn is_invalid_input(&self) -> bool {
        matches!(
            self,
            DownloadError::NoValidReference | DownloadError::InvalidUid(_)
        )
    }

    pub fn is_transport(&self) -> bool {
        match self {
            DownloadError::Http(_)
            | DownloadError::ServerStatus { .. }
            | DownloadError::Multipart(_)
            | DownloadError::NestingTooDeep => true,
            DownloadError::BatchFailed { source, .. } => source.is_transport(),
            _ => false,
        }
    }
}
