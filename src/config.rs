//! swgflow configuration.
//!
//! Loaded from `--config <path>` when given, otherwise from
//! `~/.swgflow/config.toml` if it exists. Every key is optional; missing keys
//! take the defaults below. Command-line flags override the file.
//!
//! ```toml
//! configure-path = "/soft/configure/configure"
//! epoch = "2021.5"
//! seed = 42
//! threads = 0                     # 0: 8 on the queue, all cores locally
//! extra-configure-options = ""
//!
//! [queue]
//! submit = "qsub"
//! status = "qstat"
//! pmem = "16gb"
//! walltime = "12:00:00"
//! extra-options = ""
//! poll-interval-secs = 10
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::configure::QueueOptions;

/// swgflow configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct Config {
    /// Path to the `configure` executable.
    pub configure_path: PathBuf,
    pub epoch: String,
    pub seed: u64,
    pub threads: usize,
    /// Flags appended to every `configure` run, split with shell quoting.
    pub extra_configure_options: String,
    pub queue: QueueConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            configure_path: PathBuf::from("/soft/configure/configure"),
            epoch: "2021.5".into(),
            seed: 42,
            threads: 0,
            extra_configure_options: String::new(),
            queue: QueueConfig::default(),
        }
    }
}

/// The `[queue]` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct QueueConfig {
    pub submit: String,
    pub status: String,
    pub pmem: String,
    pub walltime: String,
    /// Options passed to the submit tool, split with shell quoting.
    pub extra_options: String,
    pub poll_interval_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        let queue = QueueOptions::default();
        Self {
            submit: queue.submit,
            status: queue.status,
            pmem: queue.pmem,
            walltime: queue.walltime,
            extra_options: String::new(),
            poll_interval_secs: queue.poll_interval.as_secs(),
        }
    }
}

impl QueueConfig {
    pub fn to_options(&self) -> Result<QueueOptions, String> {
        Ok(QueueOptions {
            submit: self.submit.clone(),
            status: self.status.clone(),
            pmem: self.pmem.clone(),
            walltime: self.walltime.clone(),
            extra_options: split_flags(&self.extra_options)?,
            poll_interval: Duration::from_secs(self.poll_interval_secs),
        })
    }
}

impl Config {
    /// Load config from `explicit` if given, otherwise from the default path
    /// when it exists, otherwise defaults.
    /// An explicit path that is missing or invalid is an error.
    pub fn load(explicit: Option<&Path>) -> Result<Self, String> {
        match explicit {
            Some(path) => {
                if !path.exists() {
                    return Err(format!("no config file found at {}", path.display()));
                }
                Self::read(path)
            }
            None => match Self::path() {
                Some(path) if path.exists() => Self::read(&path),
                _ => Ok(Self::default()),
            },
        }
    }

    fn read(path: &Path) -> Result<Self, String> {
        let contents = fs::read_to_string(path)
            .map_err(|e| format!("failed to read {}: {e}", path.display()))?;

        let config: Self = toml::from_str(&contents)
            .map_err(|e| format!("invalid config at {}: {e}", path.display()))?;

        if config.epoch.trim().is_empty() {
            return Err(format!("epoch is empty in {}", path.display()));
        }
        for flags in [&config.extra_configure_options, &config.queue.extra_options] {
            split_flags(flags).map_err(|e| format!("{e} in {}", path.display()))?;
        }

        Ok(config)
    }

    /// The default config file path: `~/.swgflow/config.toml`.
    pub fn path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".swgflow").join("config.toml"))
    }
}

/// Splits a flag string into arguments using shell quoting rules.
pub fn split_flags(flags: &str) -> Result<Vec<String>, String> {
    shlex::split(flags).ok_or_else(|| format!("unbalanced quotes in options {flags:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    use tempfile::TempDir;

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            "seed = 7\nextra-configure-options = \"--a 1\"\n\n[queue]\npoll-interval-secs = 30\n",
        )
        .unwrap();

        let config = Config::load(Some(&path)).unwrap();

        assert_eq!(config.seed, 7);
        assert_eq!(config.epoch, "2021.5");
        assert_eq!(split_flags(&config.extra_configure_options).unwrap(), ["--a", "1"]);
        let queue = config.queue.to_options().unwrap();
        assert_eq!(queue.poll_interval, Duration::from_secs(30));
        assert_eq!(queue.submit, "qsub");
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let err = Config::load(Some(&dir.path().join("nope.toml"))).unwrap_err();
        assert!(err.contains("no config file"));
    }

    #[test]
    fn invalid_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "seed = \"many\"").unwrap();

        let err = Config::load(Some(&path)).unwrap_err();
        assert!(err.contains("invalid config"));
    }

    #[test]
    fn empty_epoch_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "epoch = \" \"").unwrap();

        assert!(Config::load(Some(&path)).is_err());
    }

    #[test]
    fn split_flags_ignores_extra_whitespace() {
        assert_eq!(split_flags("  --x=1   --y ").unwrap(), ["--x=1", "--y"]);
        assert!(split_flags("").unwrap().is_empty());
    }

    #[test]
    fn split_flags_keeps_quoted_values_whole() {
        assert_eq!(
            split_flags("--label 'my field' --note=\"a b\"").unwrap(),
            ["--label", "my field", "--note=a b"]
        );
    }

    #[test]
    fn unbalanced_quotes_are_rejected() {
        assert!(split_flags("--label 'my field").is_err());

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[queue]\nextra-options = \"-q 'long\"\n").unwrap();

        let err = Config::load(Some(&path)).unwrap_err();
        assert!(err.contains("unbalanced quotes"));
    }
}
