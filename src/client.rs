use crate::error::DownloadError;

/// Raw bytes of one DICOM P10 object.
pub type Payload = Vec<u8>;

/// What a single retrieve call hands back: one object, or a sequence for
/// study and series level requests. Servers answering with mixed results
/// may nest one further sequence inside.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Retrieved {
    Payload(Payload),
    Sequence(Vec<Retrieved>),
}

impl From<Payload> for Retrieved {
    fn from(payload: Payload) -> Self {
        Retrieved::Payload(payload)
    }
}

impl From<Vec<Payload>> for Retrieved {
    fn from(payloads: Vec<Payload>) -> Self {
        Retrieved::Sequence(payloads.into_iter().map(Retrieved::Payload).collect())
    }
}

/// WADO-RS retrieve operations at the three levels of the hierarchy.
pub trait DicomWebClient: Send + Sync {
    fn retrieve_study(&self, study: &str) -> Result<Retrieved, DownloadError>;
    fn retrieve_series(&self, study: &str, series: &str) -> Result<Retrieved, DownloadError>;
    fn retrieve_instance(
        &self,
        study: &str,
        series: &str,
        instance: &str,
    ) -> Result<Retrieved, DownloadError>;
}
