//! PBS-style batch queue: `qsub` submission, barrier jobs, `qstat` polling.
//!
//! The barrier is a trivial job that depends on every submitted job. Waiting
//! means polling its state until it is no longer held. There is no timeout:
//! if the barrier is deleted or never released the loop runs until the
//! process is killed.

use std::fmt;
use std::path::Path;
use std::thread;
use std::time::Duration;

use tracing::{debug, info};

use super::{ConfigureError, Result, Shell};

/// A batch job identifier, as printed by the submit tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobId(pub String);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Whether to submit through the batch queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueMode {
    /// Use the queue when its submit tool is available.
    Auto,
    Yes,
    No,
}

impl QueueMode {
    /// Resolves the mode, calling `available` with the submit tool's name only for `Auto`.
    pub fn resolve(self, submit_tool: &str, available: impl FnOnce(&str) -> bool) -> bool {
        match self {
            Self::Auto => available(submit_tool),
            Self::Yes => true,
            Self::No => false,
        }
    }
}

/// Batch queue tools and resource requests.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueOptions {
    /// Submit tool, reading the job script on stdin.
    pub submit: String,
    /// Status tool, queried with `-f <job>`.
    pub status: String,
    /// Memory per process, e.g. `16gb`.
    pub pmem: String,
    /// Wall-clock limit, e.g. `12:00:00`.
    pub walltime: String,
    /// Passed to the submit tool before the script marker.
    pub extra_options: Vec<String>,
    pub poll_interval: Duration,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            submit: "qsub".into(),
            status: "qstat".into(),
            pmem: "16gb".into(),
            walltime: "12:00:00".into(),
            extra_options: Vec::new(),
            poll_interval: Duration::from_secs(10),
        }
    }
}

/// Builds a one-line job script, quoting arguments for the shell.
pub fn script(program: &str, args: &[String]) -> Result<String> {
    Ok(shlex::try_join(
        std::iter::once(program).chain(args.iter().map(String::as_str)),
    )?)
}

/// Submits `script` as a job and returns its id.
pub fn submit_job<S: Shell + ?Sized>(
    shell: &S,
    queue: &QueueOptions,
    script: &str,
    name: &str,
    stdout: &Path,
    stderr: &Path,
    threads: usize,
) -> Result<JobId> {
    let mut args = vec![
        "-l".to_string(),
        format!("pmem={}", queue.pmem),
        "-l".to_string(),
        format!("walltime={}", queue.walltime),
        "-l".to_string(),
        format!("nodes=1:ppn={threads}"),
        "-o".to_string(),
        stdout.display().to_string(),
        "-e".to_string(),
        stderr.display().to_string(),
        "-N".to_string(),
        name.to_string(),
    ];
    args.extend(queue.extra_options.iter().cloned());
    args.push("-".to_string());

    info!("submitting job {name}: {script}");
    submit(shell, queue, &args, script)
}

/// Submits a job that only starts once every job in `jobs` has ended.
pub fn submit_barrier<S: Shell + ?Sized>(shell: &S, queue: &QueueOptions, jobs: &[JobId]) -> Result<JobId> {
    let depends = jobs
        .iter()
        .map(|j| j.0.as_str())
        .collect::<Vec<_>>()
        .join(":");
    let args = vec![
        "-W".to_string(),
        format!("depend=afterany:{depends}"),
        "-o".to_string(),
        "/dev/null".to_string(),
        "-e".to_string(),
        "/dev/null".to_string(),
        "-N".to_string(),
        "sync".to_string(),
    ];

    info!(jobs = jobs.len(), "submitting barrier job");
    submit(shell, queue, &args, "echo Done")
}

fn submit<S: Shell + ?Sized>(shell: &S, queue: &QueueOptions, args: &[String], script: &str) -> Result<JobId> {
    let id = shell.run(&queue.submit, args, Some(script))?;
    if id.is_empty() {
        return Err(ConfigureError::EmptyJobId(queue.submit.clone()));
    }
    Ok(JobId(id))
}

/// The value of the `job_state` line in `<status> -f <job>`, e.g. `H`, `Q`, `R`, `C`.
pub fn job_state<S: Shell + ?Sized>(shell: &S, queue: &QueueOptions, job: &JobId) -> Result<String> {
    let output = shell.run(&queue.status, &["-f".to_string(), job.0.clone()], None)?;
    parse_job_state(&output).ok_or_else(|| ConfigureError::MalformedStatus {
        job: job.0.clone(),
        output,
    })
}

fn parse_job_state(status: &str) -> Option<String> {
    status
        .lines()
        .find(|line| line.contains("job_state"))
        .and_then(|line| line.split_once('='))
        .map(|(_, state)| state.trim().to_string())
}

/// Blocks until `job` leaves the held state, checking every poll interval.
pub fn wait_for<S: Shell + ?Sized>(shell: &S, queue: &QueueOptions, job: &JobId) -> Result<()> {
    info!(job = %job, "waiting for queued jobs to finish");
    loop {
        let state = job_state(shell, queue, job)?;
        debug!(job = %job, state = %state, "polled barrier");
        if !state.contains('H') {
            return Ok(());
        }
        thread::sleep(queue.poll_interval);
    }
}
