use std::io::Cursor;
use std::sync::{Arc, Mutex};

use assert_matches::assert_matches;
use camino::Utf8PathBuf;
use zip::ZipArchive;

use dicom_p10_downloader::app::{self, DownloadOptions, ProgressInfo};
use dicom_p10_downloader::client::{DicomWebClient, Retrieved};
use dicom_p10_downloader::error::DownloadError;
use dicom_p10_downloader::reference::ReferenceTree;

fn element(out: &mut Vec<u8>, group: u16, element: u16, value: &str) {
    let mut value = value.as_bytes().to_vec();
    if value.len() % 2 == 1 {
        value.push(0);
    }
    out.extend_from_slice(&group.to_le_bytes());
    out.extend_from_slice(&element.to_le_bytes());
    out.extend_from_slice(b"UI");
    out.extend_from_slice(&(value.len() as u16).to_le_bytes());
    out.extend_from_slice(&value);
}

fn p10(study: &str, series: &str, instance: &str) -> Vec<u8> {
    let mut out = vec![0u8; 128];
    out.extend_from_slice(b"DICM");
    element(&mut out, 0x0002, 0x0010, "1.2.840.10008.1.2.1");
    element(&mut out, 0x0008, 0x0018, instance);
    element(&mut out, 0x0020, 0x000D, study);
    element(&mut out, 0x0020, 0x000E, series);
    out
}

/// Two series of two instances per study.
#[derive(Default)]
struct MockPacs {
    calls: Mutex<usize>,
}

impl MockPacs {
    fn series(study: &str, series: &str) -> Vec<Vec<u8>> {
        (1..=2)
            .map(|n| p10(study, series, &format!("{series}.{n}")))
            .collect()
    }
}

impl DicomWebClient for MockPacs {
    fn retrieve_study(&self, study: &str) -> Result<Retrieved, DownloadError> {
        *self.calls.lock().unwrap() += 1;
        Ok(Retrieved::Sequence(vec![
            Retrieved::from(Self::series(study, &format!("{study}.1"))),
            Retrieved::from(Self::series(study, &format!("{study}.2"))),
        ]))
    }

    fn retrieve_series(&self, study: &str, series: &str) -> Result<Retrieved, DownloadError> {
        *self.calls.lock().unwrap() += 1;
        Ok(Retrieved::from(Self::series(study, series)))
    }

    fn retrieve_instance(
        &self,
        study: &str,
        series: &str,
        instance: &str,
    ) -> Result<Retrieved, DownloadError> {
        *self.calls.lock().unwrap() += 1;
        Ok(Retrieved::Payload(p10(study, series, instance)))
    }
}

fn zip_names(path: &Utf8PathBuf) -> Vec<String> {
    let bytes = std::fs::read(path.as_std_path()).unwrap();
    let zip = ZipArchive::new(Cursor::new(bytes)).unwrap();
    let mut names: Vec<String> = zip.file_names().map(str::to_string).collect();
    names.sort();
    names
}

#[test]
fn download_and_package_writes_one_archive() {
    let temp = tempfile::tempdir().unwrap();
    let output = Utf8PathBuf::from_path_buf(temp.path().join("study.zip")).unwrap();
    let client = MockPacs::default();
    let mut tree = ReferenceTree::new();
    tree.insert_path("1.1", None, None);
    tree.insert_path("2.2", Some("2.2.7"), None);
    tree.insert_path("3.3", Some("3.3.1"), Some("3.3.1.9"));

    let updates: Arc<Mutex<Vec<ProgressInfo>>> = Arc::default();
    let sink = updates.clone();
    let options = DownloadOptions::new(output.clone())
        .on_progress(move |info| sink.lock().unwrap().push(info));

    let handle = app::download_and_package(&client, &tree, options).unwrap();

    assert_eq!(*client.calls.lock().unwrap(), 3);
    assert_eq!(handle.entries.len(), 7);
    assert_eq!(zip_names(&output).len(), 7);
    assert!(zip_names(&output).contains(&"3.3/3.3.1/3.3.1.9.dcm".to_string()));
    assert!(zip_names(&output).contains(&"1.1/1.1.2/1.1.2.1.dcm".to_string()));

    let updates = updates.lock().unwrap();
    let last = updates.last().unwrap();
    assert_eq!(last.percent, 100.0);
    assert_eq!(last.total, 3);
    assert_eq!(last.failures, 0);
}

#[test]
fn single_path_form() {
    let temp = tempfile::tempdir().unwrap();
    let output = Utf8PathBuf::from_path_buf(temp.path().join("one.zip")).unwrap();
    let client = MockPacs::default();

    let handle = app::download_and_package_path(
        &client,
        "4.4",
        Some("4.4.1"),
        None,
        DownloadOptions::new(output.clone()),
    )
    .unwrap();

    assert_eq!(handle.entries, vec!["4.4/4.4.1/4.4.1.1.dcm", "4.4/4.4.1/4.4.1.2.dcm"]);
    assert!(output.as_std_path().exists());
}

#[test]
fn invalid_reference_writes_nothing() {
    let temp = tempfile::tempdir().unwrap();
    let output = Utf8PathBuf::from_path_buf(temp.path().join("none.zip")).unwrap();
    let client = MockPacs::default();

    let options = DownloadOptions::new(output.clone());
    let err = app::download_and_package_path(&client, "", None, None, options).unwrap_err();

    assert_matches!(err, DownloadError::NoValidReference);
    assert!(err.is_invalid_input());
    assert_eq!(*client.calls.lock().unwrap(), 0);
    assert!(!output.as_std_path().exists());
}

/// Serves studies like [`MockPacs`] but answers every series request with
/// a server error.
#[derive(Default)]
struct SeriesOutage {
    pacs: MockPacs,
}

impl DicomWebClient for SeriesOutage {
    fn retrieve_study(&self, study: &str) -> Result<Retrieved, DownloadError> {
        self.pacs.retrieve_study(study)
    }

    fn retrieve_series(&self, _study: &str, _series: &str) -> Result<Retrieved, DownloadError> {
        *self.pacs.calls.lock().unwrap() += 1;
        Err(DownloadError::ServerStatus {
            status: 500,
            message: "series unavailable".to_string(),
        })
    }

    fn retrieve_instance(
        &self,
        study: &str,
        series: &str,
        instance: &str,
    ) -> Result<Retrieved, DownloadError> {
        self.pacs.retrieve_instance(study, series, instance)
    }
}

#[test]
fn failed_fetch_fails_the_batch_without_an_archive() {
    let temp = tempfile::tempdir().unwrap();
    let output = Utf8PathBuf::from_path_buf(temp.path().join("partial.zip")).unwrap();
    let client = SeriesOutage::default();
    let mut tree = ReferenceTree::new();
    tree.insert_path("1.1", None, None);
    tree.insert_path("2.2", Some("2.2.7"), None);
    tree.insert_path("3.3", Some("3.3.1"), Some("3.3.1.9"));

    let updates: Arc<Mutex<Vec<ProgressInfo>>> = Arc::default();
    let sink = updates.clone();
    let options = DownloadOptions::new(output.clone())
        .on_progress(move |info| sink.lock().unwrap().push(info));

    let err = app::download_and_package(&client, &tree, options).unwrap_err();

    assert_matches!(
        err,
        DownloadError::BatchFailed { failed: 1, total: 3, ref source }
            if matches!(**source, DownloadError::ServerStatus { status: 500, .. })
    );
    assert!(err.is_transport());
    assert_eq!(*client.pacs.calls.lock().unwrap(), 3);
    assert!(!output.as_std_path().exists());

    let updates = updates.lock().unwrap();
    let last = updates.last().unwrap();
    assert_eq!(last.failures, 1);
    assert_eq!(last.total, 3);
    assert_eq!(last.percent, 100.0);
}
