use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue, USER_AGENT};

use crate::client::{DicomWebClient, Retrieved};
use crate::config::ServerConfig;
use crate::error::DownloadError;
use crate::multipart;

const ACCEPT_DICOM: &str = r#"multipart/related; type="application/dicom"; transfer-syntax=*"#;
const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Blocking WADO-RS client.
#[derive(Clone)]
pub struct DicomWebHttpClient {
    client: Client,
    wado_root: String,
}

impl DicomWebHttpClient {
    pub fn new(wado_root: &str) -> Result<Self, DownloadError> {
        Self::with_headers(wado_root, &BTreeMap::new(), DEFAULT_TIMEOUT_SECS)
    }

    pub fn from_server(server: &ServerConfig) -> Result<Self, DownloadError> {
        Self::with_headers(
            &server.wado_root,
            &server.headers,
            server.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS),
        )
    }

    fn with_headers(
        wado_root: &str,
        extra: &BTreeMap<String, String>,
        timeout_secs: u64,
    ) -> Result<Self, DownloadError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("p10dl/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| DownloadError::Http(err.to_string()))?,
        );
        headers.insert(ACCEPT, HeaderValue::from_static(ACCEPT_DICOM));
        for (name, value) in extra {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|err| DownloadError::Http(format!("header {name}: {err}")))?;
            let value = HeaderValue::from_str(value.trim())
                .map_err(|err| DownloadError::Http(format!("header {name}: {err}")))?;
            headers.insert(name, value);
        }

        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|err| DownloadError::Http(err.to_string()))?;

        Ok(Self {
            client,
            wado_root: wado_root.trim_end_matches('/').to_string(),
        })
    }

    pub fn wado_root(&self) -> &str {
        &self.wado_root
    }

    pub fn study_url(&self, study: &str) -> String {
        format!("{}/studies/{study}", self.wado_root)
    }

    pub fn series_url(&self, study: &str, series: &str) -> String {
        format!("{}/series/{series}", self.study_url(study))
    }

    pub fn instance_url(&self, study: &str, series: &str, instance: &str) -> String {
        format!("{}/instances/{instance}", self.series_url(study, series))
    }

    fn get_parts(&self, url: &str) -> Result<Vec<Vec<u8>>, DownloadError> {
        tracing::debug!(url, "GET");
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|err| DownloadError::Http(err.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "DICOMweb request failed".to_string());
            return Err(DownloadError::ServerStatus { status, message });
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let body = response
            .bytes()
            .map_err(|err| DownloadError::Http(err.to_string()))?;

        if multipart::is_multipart(&content_type) {
            multipart::split_parts(&content_type, &body)
        } else {
            Ok(vec![body.to_vec()])
        }
    }
}

impl DicomWebClient for DicomWebHttpClient {
    fn retrieve_study(&self, study: &str) -> Result<Retrieved, DownloadError> {
        self.get_parts(&self.study_url(study)).map(Retrieved::from)
    }

    fn retrieve_series(&self, study: &str, series: &str) -> Result<Retrieved, DownloadError> {
        self.get_parts(&self.series_url(study, series))
            .map(Retrieved::from)
    }

    fn retrieve_instance(
        &self,
        study: &str,
        series: &str,
        instance: &str,
    ) -> Result<Retrieved, DownloadError> {
        let mut parts = self.get_parts(&self.instance_url(study, series, instance))?;
        if parts.len() == 1 {
            return Ok(Retrieved::Payload(parts.remove(0)));
        }
        Ok(Retrieved::from(parts))
    }
}
