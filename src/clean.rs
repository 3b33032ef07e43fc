//! Stripping placeholder targets out of observation templates.

use std::path::{Path, PathBuf};

use tracing::info;

use crate::document::{Document, DocumentError};
use crate::storage::{self, Claim, StorageError};

#[derive(Debug, thiserror::Error)]
pub enum CleanError {
    #[error("{}: {source}", path.display())]
    Document {
        path: PathBuf,
        source: DocumentError,
    },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

pub type Result<T> = core::result::Result<T, CleanError>;

/// Writes a `-c.xml` copy of each template into `output_dir` without its
/// placeholder targets. Returns the paths written; existing outputs are
/// skipped unless `overwrite` is set.
pub fn clean_templates(inputs: &[PathBuf], output_dir: &Path, overwrite: bool) -> Result<Vec<PathBuf>> {
    storage::ensure_dir(output_dir)?;
    let mut written = Vec::new();
    for input in inputs {
        let output = storage::tagged_output(input, output_dir, "c", "xml")?;
        if storage::claim_output(&output, overwrite)? == Claim::Skip {
            continue;
        }
        let with_path = |source: DocumentError| CleanError::Document {
            path: input.clone(),
            source,
        };

        let mut doc = Document::read(input).map_err(with_path)?;
        let removed = doc.remove_template_targets().map_err(with_path)?;
        doc.write(&output).map_err(with_path)?;

        info!(input = %input.display(), removed, "cleaned template");
        written.push(output);
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::fs;

    use tempfile::TempDir;

    use crate::document::TEMPLATE_SURVEY;
    use crate::document::fixtures::{document, write};

    #[test]
    fn placeholders_are_dropped() {
        let dir = TempDir::new().unwrap();
        let input = write(
            dir.path(),
            "F1.xml",
            &document(
                "F1",
                &[
                    (TEMPLATE_SURVEY, "0", Some("1"), None),
                    ("WL", "1", Some("10"), None),
                ],
            ),
        );
        let out = dir.path().join("clean");

        let written = clean_templates(&[input], &out, false).unwrap();

        assert_eq!(written, [out.join("F1-c.xml")]);
        let doc = Document::read(&written[0]).unwrap();
        assert_eq!(doc.target_count(), 1);
        assert_eq!(doc.targets()[0].survey(), Some("WL"));
    }

    #[test]
    fn existing_output_is_left_alone() {
        let dir = TempDir::new().unwrap();
        let input = write(dir.path(), "F1-.xml", &document("F1", &[]));
        fs::write(dir.path().join("F1-c.xml"), "keep").unwrap();

        let written = clean_templates(&[input], dir.path(), false).unwrap();

        assert!(written.is_empty());
        assert_eq!(fs::read_to_string(dir.path().join("F1-c.xml")).unwrap(), "keep");
    }

    #[test]
    fn unreadable_template_names_the_file() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("bad.xml");
        fs::write(&input, "<root>").unwrap();

        let err = clean_templates(&[input.clone()], dir.path(), false).unwrap_err();

        assert!(matches!(err, CleanError::Document { path, .. } if path == input));
    }
}
