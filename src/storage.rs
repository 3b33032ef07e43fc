//! On-disk layout for pipeline artifacts.
//!
//! Output files are named after their inputs and produced at most once:
//! an existing output is skipped unless overwriting was requested.
//! A multistage run keeps every intermediate stage next to the final output:
//!
//! ```text
//! <outdir>/
//!   stage-0-empty/             # inputs with all targets stripped
//!   stage-<k>-pre-configure/   # frozen + admitted targets, fed to configure
//!   stage-<k>-post-configure/  # configure output, frozen for stage k+1
//!   <name>-configured.xml      # final stage output
//!   stages.json                # stage manifest
//! ```

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::{fs, io};

use serde::Serialize;
use tracing::info;

/// Errors that can occur managing output files.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("path has no file name: {}", .0.display())]
    NoFileName(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = core::result::Result<T, StorageError>;

/// What to do about an output path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claim {
    /// The path is free (or was just cleared): produce it.
    Write,
    /// The output already exists and must be left alone.
    Skip,
}

/// Decides whether `output` should be produced.
///
/// Existing outputs are deleted first when `overwrite` is set, otherwise skipped.
pub fn claim_output(output: &Path, overwrite: bool) -> Result<Claim> {
    if !output.exists() {
        return Ok(Claim::Write);
    }
    if overwrite {
        info!(path = %output.display(), "removing previous file");
        fs::remove_file(output)?;
        Ok(Claim::Write)
    } else {
        info!(path = %output.display(), "skipping, output already exists");
        Ok(Claim::Skip)
    }
}

pub fn file_name(path: &Path) -> Result<&OsStr> {
    path.file_name()
        .ok_or_else(|| StorageError::NoFileName(path.to_path_buf()))
}

/// The output path for `input` in `dir`, tagged with `-<tag>` and the given extension.
///
/// A stem that already ends in `-<tag>` or `-` only gets `<tag>` appended:
/// `f-.xml` becomes `f-configured.xml`, `f-configured.xml` becomes
/// `f-configuredconfigured.xml`.
pub fn tagged_output(input: &Path, dir: &Path, tag: &str, extension: &str) -> Result<PathBuf> {
    let stem = input
        .file_stem()
        .ok_or_else(|| StorageError::NoFileName(input.to_path_buf()))?
        .to_string_lossy();

    let name = if stem.ends_with(&format!("-{tag}")) || stem.ends_with('-') {
        format!("{stem}{tag}.{extension}")
    } else {
        format!("{stem}-{tag}.{extension}")
    };
    Ok(dir.join(name))
}

/// Creates `dir` (and parents) if it doesn't exist.
pub fn ensure_dir(dir: &Path) -> Result<()> {
    if !dir.exists() {
        info!(path = %dir.display(), "creating output directory");
    }
    fs::create_dir_all(dir)?;
    Ok(())
}

/// Directory layout of one multistage run.
#[derive(Debug, Clone)]
pub struct StageLayout {
    root: PathBuf,
}

impl StageLayout {
    /// Creates the layout rooted at `root`. The directory is created if it doesn't exist.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        ensure_dir(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn empty_dir(&self) -> Result<PathBuf> {
        self.subdir("stage-0-empty".into())
    }

    pub fn pre_configure_dir(&self, stage: usize) -> Result<PathBuf> {
        self.subdir(format!("stage-{stage}-pre-configure"))
    }

    pub fn post_configure_dir(&self, stage: usize) -> Result<PathBuf> {
        self.subdir(format!("stage-{stage}-post-configure"))
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.root.join("stages.json")
    }

    /// Writes `manifest` as pretty JSON to `stages.json`.
    pub fn write_manifest(&self, manifest: &impl Serialize) -> Result<()> {
        let json = serde_json::to_string_pretty(manifest)?;
        fs::write(self.manifest_path(), json)?;
        Ok(())
    }

    fn subdir(&self, name: String) -> Result<PathBuf> {
        let dir = self.root.join(name);
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tempfile::TempDir;

    #[test]
    fn tagged_output_appends_suffix() {
        let dir = Path::new("/out");
        let tag = |input: &str| {
            tagged_output(Path::new(input), dir, "configured", "xml")
                .unwrap()
                .file_name()
                .unwrap()
                .to_string_lossy()
                .into_owned()
        };

        assert_eq!(tag("/in/F1.xml"), "F1-configured.xml");
        assert_eq!(tag("/in/F1-.xml"), "F1-configured.xml");
        assert_eq!(tag("/in/F1-configured.xml"), "F1-configuredconfigured.xml");
        assert_eq!(
            tagged_output(Path::new("cat.fits"), dir, "c", "xml").unwrap(),
            PathBuf::from("/out/cat-c.xml")
        );
    }

    #[test]
    fn claim_free_path_writes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("x.xml");
        assert_eq!(claim_output(&path, false).unwrap(), Claim::Write);
    }

    #[test]
    fn claim_existing_path_skips_without_overwrite() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("x.xml");
        fs::write(&path, "keep").unwrap();

        assert_eq!(claim_output(&path, false).unwrap(), Claim::Skip);
        assert_eq!(fs::read_to_string(&path).unwrap(), "keep");
    }

    #[test]
    fn claim_existing_path_deletes_with_overwrite() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("x.xml");
        fs::write(&path, "stale").unwrap();

        assert_eq!(claim_output(&path, true).unwrap(), Claim::Write);
        assert!(!path.exists());
    }

    #[test]
    fn layout_creates_stage_dirs() {
        let dir = TempDir::new().unwrap();
        let layout = StageLayout::new(dir.path().join("run")).unwrap();

        let empty = layout.empty_dir().unwrap();
        let pre = layout.pre_configure_dir(1).unwrap();
        let post = layout.post_configure_dir(1).unwrap();

        assert!(empty.ends_with("stage-0-empty") && empty.is_dir());
        assert!(pre.ends_with("stage-1-pre-configure") && pre.is_dir());
        assert!(post.ends_with("stage-1-post-configure") && post.is_dir());
    }

    #[test]
    fn manifest_is_pretty_json() {
        let dir = TempDir::new().unwrap();
        let layout = StageLayout::new(dir.path()).unwrap();
        layout
            .write_manifest(&serde_json::json!({ "stages": [] }))
            .unwrap();

        let text = fs::read_to_string(layout.manifest_path()).unwrap();
        assert!(text.contains("\"stages\": []"));
    }
}
