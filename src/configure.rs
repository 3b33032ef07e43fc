//! Running the external `configure` fibre-assignment program.
//!
//! Each input field is either configured synchronously (direct) or submitted
//! to the batch queue (queued). Queued runs can wait for every job through a
//! barrier job. See [`queue`].
//!
//! Outputs are produced at most once: an existing output is skipped unless
//! overwriting, and is still reported so later stages can read it.

pub mod queue;

use std::io::{self, Write};
use std::num::NonZero;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;

use tracing::{debug, info};

use crate::storage::{self, Claim, StorageError};

pub use queue::{JobId, QueueMode, QueueOptions};

/// Threads used on the cluster when none are requested.
const QUEUE_DEFAULT_THREADS: usize = 8;

/// Errors that can occur while configuring fields.
#[derive(Debug, thiserror::Error)]
pub enum ConfigureError {
    #[error("input is not a file: {}", .0.display())]
    MissingInput(PathBuf),

    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("{command} exited with {}: {stderr}", exit_description(.code))]
    Failed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("cannot quote job script: {0}")]
    Quote(#[from] shlex::QuoteError),

    #[error("{0} printed no job id")]
    EmptyJobId(String),

    #[error("no job_state in status of job {job}: {output:?}")]
    MalformedStatus { job: String, output: String },

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = core::result::Result<T, ConfigureError>;

/// Runs external programs. The seam tests use to stand in for `configure`,
/// `qsub` and `qstat`.
pub trait Shell {
    /// Runs `program` with `args`, writing `stdin` to it when given.
    /// Returns trimmed stdout; a non-zero exit is an error.
    fn run(&self, program: &str, args: &[String], stdin: Option<&str>) -> Result<String>;
}

/// Runs programs as real child processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemShell;

impl Shell for SystemShell {
    fn run(&self, program: &str, args: &[String], stdin: Option<&str>) -> Result<String> {
        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = command.spawn().map_err(|source| ConfigureError::Spawn {
            program: program.to_string(),
            source,
        })?;

        if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(input.as_bytes())?;
        }

        let output = child.wait_with_output()?;
        if !output.status.success() {
            return Err(ConfigureError::Failed {
                command: format!("{program} {}", args.join(" ")),
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

/// Options passed through to `configure`.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigureOptions {
    /// Path to the `configure` executable.
    pub program: PathBuf,
    pub epoch: String,
    pub seed: u64,
    pub threads: usize,
    /// Passed verbatim after the standard flags.
    pub extra_flags: Vec<String>,
}

impl ConfigureOptions {
    /// Returns a copy with `flag` appended to the extra flags.
    #[must_use]
    pub fn with_extra_flag(&self, flag: &str) -> Self {
        let mut options = self.clone();
        options.extra_flags.push(flag.to_string());
        options
    }

    /// `--gui 0 --epoch E --seed S --threads T --field <in> --output <out> <extra…>`.
    pub fn args(&self, field: &Path, output: &Path) -> Result<Vec<String>> {
        let mut args = vec![
            "--gui".to_string(),
            "0".to_string(),
            "--epoch".to_string(),
            self.epoch.clone(),
            "--seed".to_string(),
            self.seed.to_string(),
            "--threads".to_string(),
            self.threads.to_string(),
            "--field".to_string(),
            std::path::absolute(field)?.display().to_string(),
            "--output".to_string(),
            std::path::absolute(output)?.display().to_string(),
        ];
        args.extend(self.extra_flags.iter().cloned());
        Ok(args)
    }
}

/// Picks the thread count: `0` means 8 on the queue, otherwise every local core.
pub fn resolve_threads(requested: usize, queued: bool) -> usize {
    match requested {
        0 if queued => QUEUE_DEFAULT_THREADS,
        0 => thread::available_parallelism().map_or(1, NonZero::get),
        n => n,
    }
}

/// How `configure` runs are executed.
#[derive(Debug, Clone, PartialEq)]
pub enum Submission {
    /// Block on each run in turn.
    Direct,
    /// Submit each run as a batch job.
    Queued {
        queue: QueueOptions,
        /// Wait for every submitted job before returning.
        sync: bool,
    },
}

/// Configures a batch of fields with fixed options.
pub struct Configurator<'a, S: Shell + ?Sized> {
    shell: &'a S,
    options: ConfigureOptions,
    submission: Submission,
    overwrite: bool,
}

impl<'a, S: Shell + ?Sized> Configurator<'a, S> {
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

    /// Runs every input through `configure`, writing `<stem>-configured.xml` into `output_dir`.
    ///
    /// Returns one output path per input, in input order, including skipped ones.
    /// In queued mode with `sync`, blocks until all submitted jobs have finished.
    pub fn configure_fields(&self, inputs: &[PathBuf], output_dir: &Path) -> Result<Vec<PathBuf>> {
        let mut outputs = Vec::with_capacity(inputs.len());
        let mut jobs = Vec::new();

        for input in inputs {
            let (output, job) = self.configure_field(input, output_dir)?;
            outputs.push(output);
            jobs.extend(job);
        }

        if let Submission::Queued { queue, sync: true } = &self.submission {
            if !jobs.is_empty() {
                let barrier = queue::submit_barrier(self.shell, queue, &jobs)?;
                queue::wait_for(self.shell, queue, &barrier)?;
            }
        }

        Ok(outputs)
    }

    /// Configures one field. Returns its output path and, when queued, the job id.
    pub fn configure_field(&self, input: &Path, output_dir: &Path) -> Result<(PathBuf, Option<JobId>)> {
        if !input.is_file() {
            return Err(ConfigureError::MissingInput(input.to_path_buf()));
        }

        let output = storage::tagged_output(input, output_dir, "configured", "xml")?;
        if storage::claim_output(&output, self.overwrite)? == Claim::Skip {
            info!(input = %input.display(), "skipping field, its output already exists");
            return Ok((output, None));
        }

        let program = self.options.program.display().to_string();
        let args = self.options.args(input, &output)?;

        match &self.submission {
            Submission::Direct => {
                info!("running command: {program} {}", args.join(" "));
                let stdout = self.shell.run(&program, &args, None)?;
                debug!(output = %stdout, "configure finished");
                Ok((output, None))
            }
            Submission::Queued { queue, .. } => {
                let script = queue::script(&program, &args)?;
                let job_name = stem(input);
                let log_stem = stem(&output);
                let job = queue::submit_job(
                    self.shell,
                    queue,
                    &script,
                    &job_name,
                    &output_dir.join(format!("{log_stem}.stdout")),
                    &output_dir.join(format!("{log_stem}.stderr")),
                    self.options.threads,
                )?;
                Ok((output, Some(job)))
            }
        }
    }
}

fn stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn exit_description(code: &Option<i32>) -> String {
    match code {
        Some(c) => format!("status {c}"),
        None => "a signal".to_string(),
    }
}

#[cfg(test)]
pub(crate) mod fake {
    //! In-process stand-ins for `configure`, `qsub` and `qstat`.

    use std::cell::RefCell;
    use std::collections::{HashSet, VecDeque};

    use super::*;
    use crate::document::{Document, Element, Node};

    pub const CONFIGURE: &str = "/soft/configure/configure";

    /// One recorded invocation.
    #[derive(Debug, Clone)]
    pub struct Call {
        pub program: String,
        pub args: Vec<String>,
        pub stdin: Option<String>,
    }

    /// Emulates `configure` by binding a fibre to every target, and a batch
    /// queue that runs jobs immediately.
    #[derive(Default)]
    pub struct FakeShell {
        pub calls: RefCell<Vec<Call>>,
        /// States `qstat` reports in order; afterwards the barrier is complete.
        pub states: RefCell<VecDeque<String>>,
        /// Field file names for which `configure` exits non-zero.
        pub failing: HashSet<String>,
        next_job: RefCell<u32>,
    }

    impl FakeShell {
        pub fn with_states(states: &[&str]) -> Self {
            Self {
                states: RefCell::new(states.iter().map(|s| (*s).to_string()).collect()),
                ..Self::default()
            }
        }

        pub fn failing_on(fields: &[&str]) -> Self {
            Self {
                failing: fields.iter().map(|f| (*f).to_string()).collect(),
                ..Self::default()
            }
        }

        pub fn calls_to(&self, program: &str) -> Vec<Call> {
            self.calls
                .borrow()
                .iter()
                .filter(|c| c.program == program)
                .cloned()
                .collect()
        }

        fn run_configure(&self, args: &[String]) -> Result<String> {
            let flag = |name: &str| {
                args.iter()
                    .position(|a| a == name)
                    .and_then(|i| args.get(i + 1))
                    .map(PathBuf::from)
            };
            let (Some(field), Some(output)) = (flag("--field"), flag("--output")) else {
                return Err(ConfigureError::Failed {
                    command: CONFIGURE.into(),
                    code: Some(2),
                    stderr: "usage".into(),
                });
            };

            let name = field.file_name().unwrap().to_string_lossy().into_owned();
            if self.failing.contains(&name) {
                return Err(ConfigureError::Failed {
                    command: CONFIGURE.into(),
                    code: Some(1),
                    stderr: format!("cannot configure {name}"),
                });
            }

            let doc = Document::read(&field).unwrap();
            let mut root = doc.root().clone();
            let mut fibre = 0;
            assign_fibres(&mut root, &mut fibre);
            Document::from_root(root).write(&output).unwrap();
            Ok(String::new())
        }
    }

    fn assign_fibres(element: &mut Element, fibre: &mut u32) {
        if element.name == "target" && element.attr("fibreid").is_none() {
            *fibre += 1;
            element.set_attr("fibreid", fibre.to_string());
        }
        for child in &mut element.children {
            if let Node::Element(e) = child {
                assign_fibres(e, fibre);
            }
        }
    }

    impl Shell for FakeShell {
        fn run(&self, program: &str, args: &[String], stdin: Option<&str>) -> Result<String> {
            self.calls.borrow_mut().push(Call {
                program: program.to_string(),
                args: args.to_vec(),
                stdin: stdin.map(String::from),
            });

            match program {
                CONFIGURE => self.run_configure(args),
                "qsub" => {
                    let words = shlex::split(stdin.unwrap_or_default()).unwrap_or_default();
                    if let [program, args @ ..] = words.as_slice() {
                        if program == CONFIGURE {
                            self.run_configure(args)?;
                        }
                    }
                    let mut next = self.next_job.borrow_mut();
                    *next += 1;
                    Ok(format!("{next}.headnode"))
                }
                "qstat" => Ok(self
                    .states
                    .borrow_mut()
                    .pop_front()
                    .unwrap_or_else(|| "    job_state = C".to_string())),
                other => Err(ConfigureError::Spawn {
                    program: other.to_string(),
                    source: io::Error::from(io::ErrorKind::NotFound),
                }),
            }
        }
    }
}
