use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc;
use std::thread;

use tracing::{debug, info, warn};

use crate::client::{DicomWebClient, Payload, Retrieved};
use crate::error::DownloadError;
use crate::progress::{Task, TaskList};
use crate::reference::{ReferencePath, ReferenceTree};

/// One retrieve request, at the most specific level its path names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchUnit<'a> {
    Study {
        study: &'a str,
    },
    Series {
        study: &'a str,
        series: &'a str,
    },
    Instance {
        study: &'a str,
        series: &'a str,
        instance: &'a str,
    },
}

impl<'a> FetchUnit<'a> {
    /// Paths without a study are not retrievable. An instance without its
    /// series cannot be addressed, so it widens to the whole study.
    pub fn from_path(path: ReferencePath<'a>) -> Option<Self> {
        match (path.study?, path.series, path.instance) {
            (study, Some(series), Some(instance)) => Some(FetchUnit::Instance {
                study,
                series,
                instance,
            }),
            (study, Some(series), None) => Some(FetchUnit::Series { study, series }),
            (study, None, _) => Some(FetchUnit::Study { study }),
        }
    }

    pub fn level(&self) -> &'static str {
        match self {
            FetchUnit::Study { .. } => "study",
            FetchUnit::Series { .. } => "series",
            FetchUnit::Instance { .. } => "instance",
        }
    }

    pub fn fetch<C>(&self, client: &C) -> Result<Retrieved, DownloadError>
    where
        C: DicomWebClient + ?Sized,
    {
        match *self {
            FetchUnit::Study { study } => client.retrieve_study(study),
            FetchUnit::Series { study, series } => client.retrieve_series(study, series),
            FetchUnit::Instance {
                study,
                series,
                instance,
            } => client.retrieve_instance(study, series, instance),
        }
    }
}

impl fmt::Display for FetchUnit<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchUnit::Study { study } => write!(f, "study {study}"),
            FetchUnit::Series { study, series } => write!(f, "series {study}/{series}"),
            FetchUnit::Instance {
                study,
                series,
                instance,
            } => write!(f, "instance {study}/{series}/{instance}"),
        }
    }
}

pub fn fetch_units(tree: &ReferenceTree) -> Vec<FetchUnit<'_>> {
    tree.paths().filter_map(FetchUnit::from_path).collect()
}

/// Flattens one retrieve result into payloads. A sequence may hold payloads
/// or sequences of payloads; anything nested deeper is rejected.
pub fn flatten(retrieved: Retrieved) -> Result<Vec<Payload>, DownloadError> {
    let items = match retrieved {
        Retrieved::Payload(payload) => return Ok(vec![payload]),
        Retrieved::Sequence(items) => items,
    };

    let mut payloads = Vec::with_capacity(items.len());
    for item in items {
        match item {
            Retrieved::Payload(payload) => payloads.push(payload),
            Retrieved::Sequence(nested) => {
                for inner in nested {
                    match inner {
                        Retrieved::Payload(payload) => payloads.push(payload),
                        Retrieved::Sequence(_) => return Err(DownloadError::NestingTooDeep),
                    }
                }
            }
        }
    }
    Ok(payloads)
}

/// Retrieves every path of `tree` concurrently and returns the payloads in
/// traversal order.
///
/// All requests are issued at once. The batch fails as a whole if any
/// request fails; the first failure in traversal order is reported as the
/// source. When `tasks` is given, one task per request is registered on it
/// and completed as each request settles.
pub fn retrieve_all<C>(
    client: &C,
    tree: &ReferenceTree,
    tasks: Option<&TaskList>,
) -> Result<Vec<Payload>, DownloadError>
where
    C: DicomWebClient + ?Sized,
{
    let units = fetch_units(tree);
    if units.is_empty() {
        return Err(DownloadError::NoValidReference);
    }

    let total = units.len();
    info!(requests = total, "retrieving DICOM references");

    let handles: Vec<Option<Task>> = units
        .iter()
        .map(|_| tasks.map(TaskList::register))
        .collect();
    let mut results: Vec<Option<Result<Vec<Payload>, DownloadError>>> =
        units.iter().map(|_| None).collect();

    thread::scope(|scope| {
        let (tx, rx) = mpsc::channel();
        for (index, unit) in units.iter().enumerate() {
            let tx = tx.clone();
            scope.spawn(move || {
                debug!(%unit, "retrieve started");
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                    unit.fetch(client).and_then(flatten)
                }))
                .unwrap_or_else(|panic| Err(DownloadError::WorkerPanicked(panic_message(panic))));
                // The receiver lives until every sender is gone.
                let _ = tx.send((index, outcome));
            });
        }
        drop(tx);

        for (index, outcome) in rx {
            let unit = &units[index];
            match &outcome {
                Ok(payloads) => debug!(%unit, objects = payloads.len(), "retrieve finished"),
                Err(err) => warn!(%unit, error = %err, "retrieve failed"),
            }
            if let Some(task) = &handles[index] {
                task.complete(outcome.is_ok());
            }
            results[index] = Some(outcome);
        }
    });

    let mut payloads = Vec::new();
    let mut failed = 0usize;
    let mut first_error = None;
    for (index, outcome) in results.into_iter().enumerate() {
        match outcome {
            Some(Ok(mut batch)) => payloads.append(&mut batch),
            Some(Err(err)) => {
                failed += 1;
                first_error.get_or_insert(err);
            }
            None => {
                failed += 1;
                first_error
                    .get_or_insert(DownloadError::WorkerPanicked(units[index].to_string()));
            }
        }
    }

    if let Some(source) = first_error {
        return Err(DownloadError::BatchFailed {
            failed,
            total,
            source: Box::new(source),
        });
    }

    info!(objects = payloads.len(), "retrieval complete");
    Ok(payloads)
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        String::from("unknown panic payload")
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn classify_paths() {
        let study_only = ReferencePath {
            study: Some("1.2"),
            ..ReferencePath::default()
        };
        assert_eq!(
            FetchUnit::from_path(study_only),
            Some(FetchUnit::Study { study: "1.2" })
        );

        let no_study = ReferencePath {
            series: Some("1.3"),
            ..ReferencePath::default()
        };
        assert_eq!(FetchUnit::from_path(no_study), None);

        let full = ReferencePath {
            study: Some("1"),
            series: Some("2"),
            instance: Some("3"),
        };
        assert_eq!(FetchUnit::from_path(full).map(|unit| unit.level()), Some("instance"));
    }

    #[test]
    fn flatten_accepts_one_nested_sequence() {
        let retrieved = Retrieved::Sequence(vec![
            Retrieved::Payload(vec![1]),
            Retrieved::from(vec![vec![2], vec![3]]),
        ]);
        assert_eq!(flatten(retrieved).unwrap(), vec![vec![1], vec![2], vec![3]]);
    }

    #[test]
    fn flatten_rejects_third_level() {
        let retrieved = Retrieved::Sequence(vec![Retrieved::Sequence(vec![
            Retrieved::Sequence(vec![Retrieved::Payload(vec![1])]),
        ])]);
        assert_matches!(flatten(retrieved), Err(DownloadError::NestingTooDeep));
    }
}
