use std::sync::Mutex;

use assert_matches::assert_matches;

use dicom_p10_downloader::client::{DicomWebClient, Retrieved};
use dicom_p10_downloader::error::DownloadError;
use dicom_p10_downloader::progress::TaskList;
use dicom_p10_downloader::reference::ReferenceTree;
use dicom_p10_downloader::retrieve::{self, FetchUnit};

/// Answers every request with the request path as payload, except studies
/// listed in `failing`.
#[derive(Default)]
struct MockDicomWeb {
    calls: Mutex<Vec<String>>,
    failing: Vec<&'static str>,
    study_objects: usize,
}

impl MockDicomWeb {
    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn check(&self, study: &str) -> Result<(), DownloadError> {
        if self.failing.contains(&study) {
            return Err(DownloadError::ServerStatus {
                status: 503,
                message: format!("{study} unavailable"),
            });
        }
        Ok(())
    }
}

impl DicomWebClient for MockDicomWeb {
    fn retrieve_study(&self, study: &str) -> Result<Retrieved, DownloadError> {
        self.record(format!("study {study}"));
        self.check(study)?;
        let payloads = (0..self.study_objects)
            .map(|index| format!("{study}#{index}").into_bytes())
            .collect::<Vec<_>>();
        Ok(Retrieved::from(payloads))
    }

    fn retrieve_series(&self, study: &str, series: &str) -> Result<Retrieved, DownloadError> {
        self.record(format!("series {study}/{series}"));
        self.check(study)?;
        Ok(Retrieved::from(vec![format!("{study}/{series}").into_bytes()]))
    }

    fn retrieve_instance(
        &self,
        study: &str,
        series: &str,
        instance: &str,
    ) -> Result<Retrieved, DownloadError> {
        self.record(format!("instance {study}/{series}/{instance}"));
        self.check(study)?;
        Ok(Retrieved::Payload(
            format!("{study}/{series}/{instance}").into_bytes(),
        ))
    }
}

#[test]
fn empty_tree_fails_before_any_request() {
    let client = MockDicomWeb::default();
    let tasks = TaskList::new();

    let err = retrieve::retrieve_all(&client, &ReferenceTree::new(), Some(&tasks)).unwrap_err();

    assert_matches!(err, DownloadError::NoValidReference);
    assert!(client.calls().is_empty());
    assert!(tasks.is_empty());
}

#[test]
fn study_level_sequence_is_flattened_in_order() {
    let client = MockDicomWeb {
        study_objects: 2,
        ..MockDicomWeb::default()
    };
    let tree = ReferenceTree::from_path("1.2", None, None);

    let payloads = retrieve::retrieve_all(&client, &tree, None).unwrap();

    assert_eq!(payloads, vec![b"1.2#0".to_vec(), b"1.2#1".to_vec()]);
    assert_eq!(client.calls(), vec!["study 1.2"]);
}

#[test]
fn each_path_uses_its_most_specific_level() {
    let client = MockDicomWeb {
        study_objects: 1,
        ..MockDicomWeb::default()
    };
    let mut tree = ReferenceTree::new();
    tree.insert_path("1", None, None);
    tree.insert_path("2", Some("2.1"), None);
    tree.insert_path("3", Some("3.1"), Some("3.1.1"));

    let units = retrieve::fetch_units(&tree);
    assert_eq!(
        units,
        vec![
            FetchUnit::Study { study: "1" },
            FetchUnit::Series {
                study: "2",
                series: "2.1"
            },
            FetchUnit::Instance {
                study: "3",
                series: "3.1",
                instance: "3.1.1"
            },
        ]
    );

    let payloads = retrieve::retrieve_all(&client, &tree, None).unwrap();
    assert_eq!(
        payloads,
        vec![b"1#0".to_vec(), b"2/2.1".to_vec(), b"3/3.1/3.1.1".to_vec()]
    );

    let mut calls = client.calls();
    calls.sort();
    assert_eq!(
        calls,
        vec!["instance 3/3.1/3.1.1", "series 2/2.1", "study 1"]
    );
}

#[test]
fn one_failure_fails_the_whole_batch() {
    let client = MockDicomWeb {
        study_objects: 1,
        failing: vec!["2"],
        ..MockDicomWeb::default()
    };
    let mut tree = ReferenceTree::new();
    tree.insert_path("1", None, None);
    tree.insert_path("2", None, None);
    tree.insert_path("3", None, None);
    let tasks = TaskList::new();

    let err = retrieve::retrieve_all(&client, &tree, Some(&tasks)).unwrap_err();

    assert_matches!(
        err,
        DownloadError::BatchFailed { failed: 1, total: 3, ref source }
            if matches!(**source, DownloadError::ServerStatus { status: 503, .. })
    );
    assert_eq!(client.calls().len(), 3);

    let status = tasks.aggregate();
    assert_eq!(status.total, 3);
    assert_eq!(status.failures, 1);
    assert_eq!(status.progress, 1.0);
}

#[test]
fn tasks_are_registered_and_completed_per_request() {
    let client = MockDicomWeb {
        study_objects: 3,
        ..MockDicomWeb::default()
    };
    let mut tree = ReferenceTree::new();
    tree.insert_path("1", None, None);
    tree.insert_path("2", Some("2.1"), None);
    let tasks = TaskList::new();

    let payloads = retrieve::retrieve_all(&client, &tree, Some(&tasks)).unwrap();

    assert_eq!(payloads.len(), 4);
    let status = tasks.aggregate();
    assert_eq!(status.total, 2);
    assert_eq!(status.failures, 0);
    assert!(status.is_complete());
}

struct DeeplyNested;

impl DicomWebClient for DeeplyNested {
    fn retrieve_study(&self, _study: &str) -> Result<Retrieved, DownloadError> {
        Ok(Retrieved::Sequence(vec![Retrieved::Sequence(vec![
            Retrieved::Sequence(vec![Retrieved::Payload(vec![0])]),
        ])]))
    }

    fn retrieve_series(&self, _study: &str, _series: &str) -> Result<Retrieved, DownloadError> {
        Ok(Retrieved::Sequence(vec![
            Retrieved::Payload(vec![1]),
            Retrieved::from(vec![vec![2], vec![3]]),
        ]))
    }

    fn retrieve_instance(
        &self,
        _study: &str,
        _series: &str,
        _instance: &str,
    ) -> Result<Retrieved, DownloadError> {
        Err(DownloadError::Http("not implemented".to_string()))
    }
}

#[test]
fn mixed_sequence_is_flattened_one_level() {
    let tree = ReferenceTree::from_path("1", Some("1.1"), None);
    let payloads = retrieve::retrieve_all(&DeeplyNested, &tree, None).unwrap();
    assert_eq!(payloads, vec![vec![1], vec![2], vec![3]]);
}

#[test]
fn third_level_nesting_is_rejected() {
    let tree = ReferenceTree::from_path("1", None, None);
    let err = retrieve::retrieve_all(&DeeplyNested, &tree, None).unwrap_err();
    assert_matches!(
        err,
        DownloadError::BatchFailed { ref source, .. }
            if matches!(**source, DownloadError::NestingTooDeep)
    );
}
