//! Stage filter: freeze what is already placed, admit the next priority band.
//!
//! A multistage run configures the highest-priority targets first, then
//! re-runs `configure` on its own output with more targets admitted each
//! time. Targets already in the frozen document are never duplicated, and
//! neither input document is modified.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::document::{self, Document, DocumentError};
use crate::storage::{self, StorageError};

/// Which unfrozen targets a stage admits.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Threshold {
    /// Targets whose priority is strictly greater than the bound.
    Above(f64),
    /// Every remaining target, including those without a usable priority.
    Unbounded,
}

impl Threshold {
    pub fn admits(self, priority: f64) -> bool {
        match self {
            Self::Above(bound) => priority > bound,
            Self::Unbounded => true,
        }
    }

    pub fn is_final(self) -> bool {
        matches!(self, Self::Unbounded)
    }
}

impl fmt::Display for Threshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Above(bound) => write!(f, "targprio > {bound}"),
            Self::Unbounded => f.write_str("all remaining targets"),
        }
    }
}

/// Errors from the file-level stage helpers.
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error("{inputs} input files but {frozen} frozen files")]
    LengthMismatch { inputs: usize, frozen: usize },

    #[error("{}: {source}", path.display())]
    Document {
        path: PathBuf,
        #[source]
        source: DocumentError,
    },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

pub type Result<T> = core::result::Result<T, StageError>;

/// A copy of `doc` with every target removed: the stage-0 frozen document.
pub fn empty_copy(doc: &Document) -> document::Result<Document> {
    let mut empty = doc.clone();
    empty.clear_targets()?;
    Ok(empty)
}

/// `frozen` plus every target of `input` that `threshold` admits and whose
/// (survey, id) is not already present.
pub fn admit(input: &Document, frozen: &Document, threshold: Threshold) -> document::Result<Document> {
    // Both sides must hold a single field even when nothing is admitted.
    input.field()?;
    let mut output = frozen.clone();
    output.field()?;

    let mut seen: HashSet<_> = frozen.keys();
    for target in input.targets() {
        if threshold.admits(target.priority()) && seen.insert(target.key()) {
            output.push_target(target.element().clone())?;
        }
    }
    Ok(output)
}

/// Writes the empty copy of each input into `dir`, keeping file names.
pub fn copy_empty(inputs: &[PathBuf], dir: &Path) -> Result<Vec<PathBuf>> {
    inputs
        .iter()
        .map(|input| {
            let doc = read(input)?;
            let empty = empty_copy(&doc).map_err(|source| doc_error(input, source))?;
            let output = dir.join(storage::file_name(input)?);
            empty
                .write(&output)
                .map_err(|source| doc_error(&output, source))?;
            Ok(output)
        })
        .collect()
}

/// Applies [`admit`] pairwise to `inputs` and `frozen`, writing into `dir`
/// under each input's file name.
pub fn filter_files(
    inputs: &[PathBuf],
    frozen: &[PathBuf],
    dir: &Path,
    threshold: Threshold,
) -> Result<Vec<PathBuf>> {
    if inputs.len() != frozen.len() {
        return Err(StageError::LengthMismatch {
            inputs: inputs.len(),
            frozen: frozen.len(),
        });
    }

    let mut outputs = Vec::with_capacity(inputs.len());
    for (input, frozen_path) in inputs.iter().zip(frozen) {
        let candidates = read(input)?;
        let frozen_doc = read(frozen_path)?;

        let admitted =
            admit(&candidates, &frozen_doc, threshold).map_err(|source| doc_error(frozen_path, source))?;

        let output = dir.join(storage::file_name(input)?);
        admitted
            .write(&output)
            .map_err(|source| doc_error(&output, source))?;

        info!(
            input = %input.display(),
            total = candidates.target_count(),
            frozen = frozen_doc.target_count(),
            after = admitted.target_count(),
            output = %output.display(),
            "filtered targets ({threshold})"
        );
        outputs.push(output);
    }
    Ok(outputs)
}

fn read(path: &Path) -> Result<Document> {
    Document::read(path).map_err(|source| doc_error(path, source))
}

fn doc_error(path: &Path, source: DocumentError) -> StageError {
    StageError::Document {
        path: path.to_path_buf(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tempfile::TempDir;

    use crate::document::fixtures::{document, two_fields, write};

    fn ids(doc: &Document) -> Vec<String> {
        doc.targets()
            .iter()
            .map(|t| t.id().unwrap().to_string())
            .collect()
    }

    #[test]
    fn unbounded_admits_everything_into_empty_frozen() {
        let input = document(
            "F1",
            &[
                ("WL", "1", Some("10"), None),
                ("WL", "2", None, None),
                ("GA", "3", Some("junk"), None),
            ],
        );
        let frozen = empty_copy(&input).unwrap();

        let out = admit(&input, &frozen, Threshold::Unbounded).unwrap();
        assert_eq!(ids(&out), ["1", "2", "3"]);
    }

    #[test]
    fn multi_field_input_is_rejected() {
        let input = two_fields("F1", &[("WL", "1", Some("10"), None)]);
        let frozen = empty_copy(&document("F1", &[])).unwrap();

        let err = admit(&input, &frozen, Threshold::Unbounded).unwrap_err();
        assert!(matches!(err, DocumentError::MultipleFields(2)));

        let err = admit(&input, &frozen, Threshold::Above(100.0)).unwrap_err();
        assert!(matches!(err, DocumentError::MultipleFields(2)));
    }

    #[test]
    fn threshold_is_strict() {
        let input = document(
            "F1",
            &[
                ("WL", "1", Some("10"), None),
                ("WL", "2", Some("6"), None),
                ("WL", "3", Some("2"), None),
            ],
        );
        let frozen = empty_copy(&input).unwrap();

        let out = admit(&input, &frozen, Threshold::Above(6.0)).unwrap();
        assert_eq!(ids(&out), ["1"]);
    }

    #[test]
    fn missing_priority_only_passes_unbounded() {
        let input = document("F1", &[("WL", "1", None, None)]);
        let frozen = empty_copy(&input).unwrap();

        let out = admit(&input, &frozen, Threshold::Above(-1e300)).unwrap();
        assert_eq!(out.target_count(), 0);
    }

    #[test]
    fn frozen_pairs_are_never_duplicated() {
        let input = document(
            "F1",
            &[
                ("WL", "1", Some("10"), None),
                ("GA", "1", Some("10"), None),
                ("WL", "1", Some("10"), None),
            ],
        );
        let frozen = document("F1", &[("WL", "1", Some("10"), Some("5"))]);

        for threshold in [Threshold::Above(0.0), Threshold::Unbounded] {
            let out = admit(&input, &frozen, threshold).unwrap();
            let keys: Vec<_> = out.targets().iter().map(|t| t.key().to_string()).collect();
            assert_eq!(keys, ["WL/1", "GA/1"]);
            // The frozen copy keeps its fibre.
            assert!(out.targets()[0].is_assigned());
        }
    }

    #[test]
    fn inputs_are_not_mutated() {
        let input = document("F1", &[("WL", "1", Some("10"), None)]);
        let frozen = empty_copy(&input).unwrap();
        let (input_before, frozen_before) = (input.clone(), frozen.clone());

        admit(&input, &frozen, Threshold::Unbounded).unwrap();
        assert_eq!(input, input_before);
        assert_eq!(frozen, frozen_before);
    }

    #[test]
    fn filter_files_writes_under_input_names() {
        let dir = TempDir::new().unwrap();
        let out_dir = dir.path().join("out");
        std::fs::create_dir(&out_dir).unwrap();

        let input = write(
            dir.path(),
            "F1.xml",
            &document("F1", &[("WL", "1", Some("10"), None), ("WL", "2", Some("1"), None)]),
        );
        let empty_dir = dir.path().join("empty");
        std::fs::create_dir(&empty_dir).unwrap();
        let frozen = copy_empty(&[input.clone()], &empty_dir).unwrap();
        assert_eq!(Document::read(&frozen[0]).unwrap().target_count(), 0);

        let outputs = filter_files(&[input], &frozen, &out_dir, Threshold::Above(5.0)).unwrap();
        assert_eq!(outputs, [out_dir.join("F1.xml")]);
        assert_eq!(ids(&Document::read(&outputs[0]).unwrap()), ["1"]);
    }

    #[test]
    fn filter_files_requires_paired_lists() {
        let dir = TempDir::new().unwrap();
        let err = filter_files(
            &[PathBuf::from("a.xml"), PathBuf::from("b.xml")],
            &[PathBuf::from("a.xml")],
            dir.path(),
            Threshold::Unbounded,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            StageError::LengthMismatch {
                inputs: 2,
                frozen: 1
            }
        ));
    }
}
