use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::DownloadError;

const MAX_UID_LEN: usize = 64;

static UID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(0|[1-9][0-9]*)(\.(0|[1-9][0-9]*))*$").unwrap());

/// A DICOM unique identifier (PS3.5 9.1): dot separated numeric components,
/// no leading zeros, at most 64 characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DicomUid(String);

impl DicomUid {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DicomUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for DicomUid {
    type Err = DownloadError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim();
        if normalized.len() > MAX_UID_LEN || !UID_RE.is_match(normalized) {
            return Err(DownloadError::InvalidUid(value.to_string()));
        }
        Ok(Self(normalized.to_string()))
    }
}

impl TryFrom<String> for DicomUid {
    type Error = DownloadError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<DicomUid> for String {
    fn from(uid: DicomUid) -> Self {
        uid.0
    }
}

/// Passes `subject` through when it is a well formed UID.
pub fn valid_dicom_uid(subject: Option<&str>) -> Option<&str> {
    subject
        .map(str::trim)
        .filter(|value| value.len() <= MAX_UID_LEN && UID_RE.is_match(value))
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn parse_uid_valid() {
        let uid: DicomUid = " 1.2.840.10008.5.1.4.1.1.2 ".parse().unwrap();
        assert_eq!(uid.as_str(), "1.2.840.10008.5.1.4.1.1.2");
    }

    #[test]
    fn parse_uid_rejects_leading_zero() {
        let err = "1.02.3".parse::<DicomUid>().unwrap_err();
        assert_matches!(err, DownloadError::InvalidUid(_));
    }

    #[test]
    fn parse_uid_rejects_too_long() {
        let long = format!("1.{}", "2".repeat(63));
        assert!(long.parse::<DicomUid>().is_err());
    }

    #[test]
    fn valid_uid_filter() {
        assert_eq!(valid_dicom_uid(Some("1.2.3")), Some("1.2.3"));
        assert_eq!(valid_dicom_uid(Some("1..2")), None);
        assert_eq!(valid_dicom_uid(Some("")), None);
        assert_eq!(valid_dicom_uid(None), None);
    }
}
