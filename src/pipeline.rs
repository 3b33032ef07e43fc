//! Multistage configuration driver.
//!
//! With priority bounds `[t1, …, tn]` (all positive), `configure` runs n+1
//! times. Stage 0 starts from the inputs with every target stripped. Stage k
//! admits the unfrozen targets with `targprio > tk` on top of the previous
//! stage's output, and the last stage admits everything left. Each stage's
//! output is frozen for the next, so fibres placed early are never taken
//! away by lower-priority targets.
//!
//! Without bounds the driver is a single plain `configure` pass.

use std::path::{Path, PathBuf};

use jiff::Timestamp;
use serde::Serialize;
use tracing::{info, warn};

use crate::configure::{ConfigureError, ConfigureOptions, Configurator, Shell, Submission};
use crate::document::{Document, DocumentError};
use crate::stage::{self, StageError, Threshold};
use crate::storage::{StageLayout, StorageError};

/// Appended to the extra flags once every bounded stage has run.
pub const PREALLOCATE_GUIDE_OFF: &str = "--preallocate-guide=0";

/// Errors that abort a pipeline run.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("all multistage targprio bounds must be > 0, got {0}")]
    NonPositiveBound(f64),

    #[error("{}: frozen targets dropped from {before} to {after}", path.display())]
    FrozenShrank {
        path: PathBuf,
        before: usize,
        after: usize,
    },

    #[error("{}: {source}", path.display())]
    Document {
        path: PathBuf,
        #[source]
        source: DocumentError,
    },

    #[error(transparent)]
    Stage(#[from] StageError),

    #[error(transparent)]
    Configure(#[from] ConfigureError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

pub type Result<T> = core::result::Result<T, PipelineError>;

/// The stage thresholds for `bounds`: each bound in order, then [`Threshold::Unbounded`].
///
/// Every bound must be strictly positive.
pub fn stage_thresholds(bounds: &[f64]) -> Result<Vec<Threshold>> {
    if let Some(&bad) = bounds.iter().find(|&&b| b.is_nan() || b <= 0.0) {
        return Err(PipelineError::NonPositiveBound(bad));
    }
    Ok(bounds
        .iter()
        .map(|&b| Threshold::Above(b))
        .chain(std::iter::once(Threshold::Unbounded))
        .collect())
}

/// Record of a multistage run, written to `stages.json`.
#[derive(Debug, Clone, Serialize)]
pub struct Manifest {
    pub inputs: Vec<PathBuf>,
    pub empty: Vec<PathBuf>,
    pub stages: Vec<StageRecord>,
}

impl Manifest {
    /// Outputs of the last stage.
    pub fn final_outputs(&self) -> &[PathBuf] {
        self.stages
            .last()
            .map_or(&[], |s| s.post_configure.as_slice())
    }
}

/// One filter → configure cycle.
#[derive(Debug, Clone, Serialize)]
pub struct StageRecord {
    pub stage: usize,
    /// `None` for the final, unbounded stage.
    pub targprio_above: Option<f64>,
    pub extra_flags: Vec<String>,
    pub pre_configure: Vec<PathBuf>,
    pub post_configure: Vec<PathBuf>,
    pub started_at: Timestamp,
    pub finished_at: Timestamp,
}

/// Runs `configure` over a set of fields, in one or several stages.
pub struct Pipeline<'a, S: Shell + ?Sized> {
    shell: &'a S,
    options: ConfigureOptions,
    submission: Submission,
    overwrite: bool,
}

impl<'a, S: Shell + ?Sized> Pipeline<'a, S> {
    pub fn new(
        shell: &'a S,
        options: ConfigureOptions,
        submission: Submission,
        overwrite: bool,
    ) -> Self {
        Self {
            shell,
            options,
            submission,
            overwrite,
        }
    }

    /// Single pass when `bounds` is empty, multistage otherwise.
    /// Returns the final output files.
    pub fn run(&self, inputs: &[PathBuf], output_dir: &Path, bounds: &[f64]) -> Result<Vec<PathBuf>> {
        if bounds.is_empty() {
            let configurator = Configurator::new(
                self.shell,
                self.options.clone(),
                self.submission.clone(),
                self.overwrite,
            );
            return Ok(configurator.configure_fields(inputs, output_dir)?);
        }
        let manifest = self.run_multistage(inputs, output_dir, bounds)?;
        Ok(manifest.final_outputs().to_vec())
    }

    /// Runs every stage and writes the manifest into `output_dir`.
    pub fn run_multistage(
        &self,
        inputs: &[PathBuf],
        output_dir: &Path,
        bounds: &[f64],
    ) -> Result<Manifest> {
        let thresholds = stage_thresholds(bounds)?;
        let layout = StageLayout::new(output_dir)?;
        let submission = self.stage_submission();

        let empty = stage::copy_empty(inputs, &layout.empty_dir()?)?;
        let mut frozen = empty.clone();
        let mut options = self.options.clone();
        let mut stages = Vec::with_capacity(thresholds.len());

        for (k, threshold) in thresholds.iter().copied().enumerate() {
            let started_at = Timestamp::now();
            info!(stage = k, "starting stage: {threshold}");

            let pre = stage::filter_files(inputs, &frozen, &layout.pre_configure_dir(k)?, threshold)?;

            let post_dir = if threshold.is_final() {
                layout.root().to_path_buf()
            } else {
                layout.post_configure_dir(k)?
            };
            let configurator =
                Configurator::new(self.shell, options.clone(), submission.clone(), self.overwrite);
            let post = configurator.configure_fields(&pre, &post_dir)?;

            check_frozen_growth(&frozen, &post)?;

            stages.push(StageRecord {
                stage: k,
                targprio_above: match threshold {
                    Threshold::Above(b) => Some(b),
                    Threshold::Unbounded => None,
                },
                extra_flags: options.extra_flags.clone(),
                pre_configure: pre,
                post_configure: post.clone(),
                started_at,
                finished_at: Timestamp::now(),
            });

            if k + 1 == bounds.len() {
                options = options.with_extra_flag(PREALLOCATE_GUIDE_OFF);
            }
            frozen = post;
        }

        let manifest = Manifest {
            inputs: inputs.to_vec(),
            empty,
            stages,
        };
        layout.write_manifest(&manifest)?;
        Ok(manifest)
    }

    /// Each stage reads the previous stage's outputs, so queued stages always wait.
    fn stage_submission(&self) -> Submission {
        match &self.submission {
            Submission::Queued { queue, sync: false } => {
                warn!("multistage runs wait for every queued stage, even without --sync");
                Submission::Queued {
                    queue: queue.clone(),
                    sync: true,
                }
            }
            other => other.clone(),
        }
    }
}

/// Fails if any new frozen document holds fewer targets than its predecessor.
fn check_frozen_growth(previous: &[PathBuf], next: &[PathBuf]) -> Result<()> {
    for (before_path, after_path) in previous.iter().zip(next) {
        let before = count_targets(before_path)?;
        let after = count_targets(after_path)?;
        if after < before {
            return Err(PipelineError::FrozenShrank {
                path: after_path.clone(),
                before,
                after,
            });
        }
    }
    Ok(())
}

fn count_targets(path: &Path) -> Result<usize> {
    Document::read(path)
        .map(|doc| doc.target_count())
        .map_err(|source| PipelineError::Document {
            path: path.to_path_buf(),
            source,
        })
}
