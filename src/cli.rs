//! CLI interface for swgflow.
//!
//! Every subcommand is non-interactive: files in, files out, progress on
//! stderr. Output directories are created when missing, and existing outputs
//! are kept unless `--overwrite` is given.

mod format;

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand, ValueEnum};
use tracing::warn;

use crate::analysis::{self, report::GroupBy};
use crate::config::{Config, split_flags};
use crate::configure::{ConfigureOptions, QueueMode, Submission, SystemShell, resolve_threads};
use crate::pipeline::Pipeline;
use crate::{catalogue, clean, storage};

use format::{format_assignment_table, group_heading};

/// swgflow: drive `configure` over observation files and analyse the results.
#[derive(Debug, Parser)]
#[command(name = "swgflow", version, after_long_help = WORKFLOW_HELP)]
pub struct Cli {
    /// Config file (default: `~/.swgflow/config.toml` if it exists).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log verbosity. `SWGFLOW_LOG` takes precedence when set.
    #[arg(long, global = true, value_enum, default_value_t = LogLevelArg::Info)]
    pub log_level: LogLevelArg,

    #[command(subcommand)]
    pub command: Command,
}

const WORKFLOW_HELP: &str = r"Workflow: configuring a batch of fields
  1. swgflow clean templates/*.xml --outdir clean
  2. swgflow configure clean/*.xml --outdir output --multistage 10 6 2
  3. swgflow summarize output/*-configured.xml --outdir analysis
  4. swgflow crossmatch catalogues/*.csv --xml output/*-configured.xml
  5. swgflow source-lists sources/*.csv --catalogue crossmatch/*-configured.csv
  6. swgflow source-report source-lists/*-configured.csv";

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run `configure` over observation files.
    ///
    /// Without `--multistage` each file is configured once. With it, targets
    /// are admitted in stages of descending priority: stage k admits targets
    /// with priority above the k-th bound, and a final stage admits the rest.
    /// Assignments from earlier stages are kept in later ones.
    Configure {
        /// Observation files, one field each.
        #[arg(required = true)]
        xml: Vec<PathBuf>,

        #[arg(long, default_value = "output")]
        outdir: PathBuf,

        /// Path to the `configure` executable (overrides config).
        #[arg(long)]
        configure_path: Option<PathBuf>,

        #[arg(long)]
        epoch: Option<String>,

        #[arg(long)]
        seed: Option<u64>,

        /// Threads per run; 0 picks 8 on the queue, every core locally.
        #[arg(long)]
        threads: Option<usize>,

        /// Extra flags appended to every `configure` run, split with shell quoting.
        #[arg(long, allow_hyphen_values = true)]
        extra_configure_options: Option<String>,

        /// Submit through the batch queue.
        #[arg(long, value_enum, default_value_t = QueueArg::Auto)]
        qsub: QueueArg,

        /// Wait for queued jobs before returning.
        #[arg(long)]
        sync: bool,

        /// Replace existing outputs instead of skipping them.
        #[arg(long)]
        overwrite: bool,

        /// Priority bounds, highest first: one stage per bound, then a final stage for the rest.
        #[arg(long, num_args = 1..)]
        multistage: Vec<f64>,
    },

    /// Remove placeholder targets from template files, writing `<name>-c.xml`.
    Clean {
        #[arg(required = true)]
        xml: Vec<PathBuf>,

        #[arg(long, default_value = ".")]
        outdir: PathBuf,

        #[arg(long)]
        overwrite: bool,
    },

    /// Summarize configured files into `summaries.csv` and `targets.csv`.
    ///
    /// Files that can't be parsed are reported and left out.
    Summarize {
        #[arg(required = true)]
        xml: Vec<PathBuf>,

        #[arg(long, default_value = "analysis")]
        outdir: PathBuf,

        /// Print assignment rates grouped this way. Can be specified multiple times.
        #[arg(long, value_enum)]
        group_by: Vec<GroupByArg>,
    },

    /// Add configure results to target catalogues, writing `<name>-configured.csv`.
    Crossmatch {
        /// Target catalogues (CSV).
        #[arg(required = true)]
        catalogues: Vec<PathBuf>,

        /// Configured observation files.
        #[arg(long, required = true, num_args = 1..)]
        xml: Vec<PathBuf>,

        #[arg(long, default_value = "crossmatch")]
        outdir: PathBuf,

        #[arg(long)]
        overwrite: bool,
    },

    /// Copy cross-matched catalogue columns into source lists.
    SourceLists {
        /// Source lists (CSV).
        #[arg(required = true)]
        sources: Vec<PathBuf>,

        /// Cross-matched target catalogues.
        #[arg(long, required = true, num_args = 1..)]
        catalogue: Vec<PathBuf>,

        #[arg(long, default_value = "source-lists")]
        outdir: PathBuf,

        #[arg(long)]
        overwrite: bool,
    },

    /// Print configured and assigned totals for matched source lists.
    ///
    /// Each file is reported under the part of its name before the first `-`.
    SourceReport {
        /// Source lists written by `source-lists`.
        #[arg(required = true)]
        sources: Vec<PathBuf>,
    },
}

/// CLI-facing log level, turned into a tracing filter directive.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LogLevelArg {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevelArg {
    pub fn directive(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }
}

/// CLI-facing queue choice, mapped to the domain `QueueMode`.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum QueueArg {
    /// Use the queue if its submit tool is on `PATH`.
    Auto,
    Yes,
    No,
}

impl QueueArg {
    fn to_domain(self) -> QueueMode {
        match self {
            Self::Auto => QueueMode::Auto,
            Self::Yes => QueueMode::Yes,
            Self::No => QueueMode::No,
        }
    }
}

/// CLI-facing grouping, mapped to the domain `GroupBy`.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum GroupByArg {
    Survey,
    Priority,
    Progtemp,
    Targprog,
}

impl GroupByArg {
    fn to_domain(self) -> GroupBy {
        match self {
            Self::Survey => GroupBy::Survey,
            Self::Priority => GroupBy::Priority,
            Self::Progtemp => GroupBy::Progtemp,
            Self::Targprog => GroupBy::Targprog,
        }
    }
}

/// Run the CLI, returning an error message on failure.
pub fn run(cli: Cli, config: &Config) -> Result<(), String> {
    match cli.command {
        Command::Configure {
            xml,
            outdir,
            configure_path,
            epoch,
            seed,
            threads,
            extra_configure_options,
            qsub,
            sync,
            overwrite,
            multistage,
        } => {
            let queue = config.queue.to_options()?;
            let queued = qsub
                .to_domain()
                .resolve(&queue.submit, |tool| which::which(tool).is_ok());
            let submission = if queued {
                Submission::Queued { queue, sync }
            } else {
                if sync {
                    warn!("--sync only applies to queued runs");
                }
                Submission::Direct
            };
            let options = ConfigureOptions {
                program: configure_path.unwrap_or_else(|| config.configure_path.clone()),
                epoch: epoch.unwrap_or_else(|| config.epoch.clone()),
                seed: seed.unwrap_or(config.seed),
                threads: resolve_threads(threads.unwrap_or(config.threads), queued),
                extra_flags: split_flags(
                    extra_configure_options
                        .as_deref()
                        .unwrap_or(&config.extra_configure_options),
                )?,
            };
            cmd_configure(&xml, &outdir, options, submission, overwrite, &multistage)
        }
        Command::Clean {
            xml,
            outdir,
            overwrite,
        } => {
            let written = clean::clean_templates(&xml, &outdir, overwrite)
                .map_err(|e| format!("failed to clean templates: {e}"))?;
            report_written("cleaned", &written);
            Ok(())
        }
        Command::Summarize {
            xml,
            outdir,
            group_by,
        } => cmd_summarize(&xml, &outdir, &group_by),
        Command::Crossmatch {
            catalogues,
            xml,
            outdir,
            overwrite,
        } => {
            let batch = analysis::parse_batch(&xml);
            if batch.summaries.is_empty() {
                return Err("no configured file could be read".to_string());
            }
            let written = catalogue::crossmatch_files(&catalogues, &batch.targets, &outdir, overwrite)
                .map_err(|e| format!("cross-match failed: {e}"))?;
            report_written("cross-matched", &written);
            Ok(())
        }
        Command::SourceLists {
            sources,
            catalogue,
            outdir,
            overwrite,
        } => {
            let written = catalogue::source_list_files(&sources, &catalogue, &outdir, overwrite)
                .map_err(|e| format!("source-list matching failed: {e}"))?;
            report_written("matched", &written);
            Ok(())
        }
        Command::SourceReport { sources } => {
            let rows = catalogue::source_list_report(&sources)
                .map_err(|e| format!("source-list report failed: {e}"))?;
            println!("{}", format_assignment_table("source list", &rows));
            Ok(())
        }
    }
}

fn cmd_configure(
    xml: &[PathBuf],
    outdir: &Path,
    options: ConfigureOptions,
    submission: Submission,
    overwrite: bool,
    bounds: &[f64],
) -> Result<(), String> {
    storage::ensure_dir(outdir).map_err(|e| format!("failed to create {}: {e}", outdir.display()))?;

    let shell = SystemShell;
    let pipeline = Pipeline::new(&shell, options, submission, overwrite);
    let outputs = pipeline
        .run(xml, outdir, bounds)
        .map_err(|e| format!("configure failed: {e}"))?;

    report_written("configured", &outputs);
    Ok(())
}

fn cmd_summarize(xml: &[PathBuf], outdir: &Path, group_by: &[GroupByArg]) -> Result<(), String> {
    storage::ensure_dir(outdir).map_err(|e| format!("failed to create {}: {e}", outdir.display()))?;

    let batch = analysis::parse_batch(xml);
    let summaries = outdir.join("summaries.csv");
    let targets = outdir.join("targets.csv");
    analysis::write_summaries(&summaries, &batch.summaries)
        .map_err(|e| format!("failed to write {}: {e}", summaries.display()))?;
    analysis::write_targets(&targets, &batch.targets)
        .map_err(|e| format!("failed to write {}: {e}", targets.display()))?;

    for by in group_by {
        let rows = analysis::report::assignment_table(&batch.targets, by.to_domain());
        println!("{}", format_assignment_table(group_heading(by.to_domain()), &rows));
    }

    eprintln!(
        "Summarized {} file(s), {} target(s) → {}",
        batch.summaries.len(),
        batch.targets.len(),
        outdir.display()
    );
    if !batch.failed.is_empty() {
        eprintln!("{} file(s) could not be read", batch.failed.len());
    }
    Ok(())
}

fn report_written(verb: &str, paths: &[PathBuf]) {
    for path in paths {
        println!("{}", path.display());
    }
    eprintln!("{} {} file(s)", capitalize(verb), paths.len());
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    chars
        .next()
        .map(|first| first.to_uppercase().chain(chars).collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configure_flags_parse() {
        let cli = Cli::try_parse_from([
            "swgflow",
            "--log-level",
            "debug",
            "configure",
            "a.xml",
            "b.xml",
            "--qsub",
            "no",
            "--multistage",
            "10",
            "6",
            "2",
            "--extra-configure-options",
            "--foo=1 --bar",
        ])
        .unwrap();

        assert_eq!(cli.log_level.directive(), "debug");
        let Command::Configure {
            xml,
            outdir,
            qsub,
            multistage,
            extra_configure_options,
            ..
        } = cli.command
        else {
            panic!("expected configure");
        };
        assert_eq!(xml, [PathBuf::from("a.xml"), PathBuf::from("b.xml")]);
        assert_eq!(outdir, PathBuf::from("output"));
        assert_eq!(qsub.to_domain(), QueueMode::No);
        assert_eq!(multistage, [10.0, 6.0, 2.0]);
        assert_eq!(extra_configure_options.as_deref(), Some("--foo=1 --bar"));
    }

    #[test]
    fn crossmatch_requires_xml() {
        assert!(Cli::try_parse_from(["swgflow", "crossmatch", "cat.csv"]).is_err());
    }

    #[test]
    fn source_report_takes_source_lists() {
        let cli = Cli::try_parse_from(["swgflow", "source-report", "WL-a.csv", "GA-b.csv"]).unwrap();
        let Command::SourceReport { sources } = cli.command else {
            panic!("expected source-report");
        };
        assert_eq!(sources, [PathBuf::from("WL-a.csv"), PathBuf::from("GA-b.csv")]);
        assert!(Cli::try_parse_from(["swgflow", "source-report"]).is_err());
    }

    #[test]
    fn capitalize_first_letter() {
        assert_eq!(capitalize("configured"), "Configured");
        assert_eq!(capitalize(""), "");
    }
}
