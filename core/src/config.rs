use anyhow::Context;
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::Cli;

pub const CONFIG_FILE_NAME: &str = "strata.toml";
pub const DEFAULT_BUILD_FILE: &str = "Makefile";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Config {
    pub build: BuildConfig,
    pub execution: ExecutionConfig,
    pub display: DisplayConfig,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildConfig {
    pub file: String,
}

/// What happens to later levels once a command in the current level fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    #[default]
    Continue,
    Halt,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionConfig {
    /// Upper bound on concurrent commands within a level; 0 picks a bound
    /// from the CPU count.
    pub jobs: usize,
    pub on_failure: FailurePolicy,
    pub shell: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayConfig {
    pub show_timestamps: bool,
    pub echo_commands: bool,
    pub verbose: bool,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            file: DEFAULT_BUILD_FILE.to_string(),
        }
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            jobs: 0,
            on_failure: FailurePolicy::Continue,
            shell: None,
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            show_timestamps: true,
            echo_commands: true,
            verbose: false,
        }
    }
}

/// Commands mostly wait on child processes, so the default bound sits a
/// little above the CPU count. A single-CPU host still overlaps two commands.
const EXTRA_DEFAULT_JOBS: usize = 2;

impl ExecutionConfig {
    pub fn resolved_jobs(&self) -> usize {
        if self.jobs > 0 {
            return self.jobs;
        }

        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        cpus + EXTRA_DEFAULT_JOBS
    }
}

/// One config file as written. Keys absent from the file stay `None`, so a
/// layer can tell "not set" apart from "set to the default".
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ConfigLayer {
    #[serde(default)]
    pub build: BuildLayer,
    #[serde(default)]
    pub execution: ExecutionLayer,
    #[serde(default)]
    pub display: DisplayLayer,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct BuildLayer {
    pub file: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ExecutionLayer {
    pub jobs: Option<usize>,
    pub on_failure: Option<FailurePolicy>,
    pub shell: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct DisplayLayer {
    pub show_timestamps: Option<bool>,
    pub echo_commands: Option<bool>,
    pub verbose: Option<bool>,
}

impl ConfigLayer {
    /// A missing file is an empty layer.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = Config::expand_path(&path.as_ref().to_string_lossy());

        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let layer: ConfigLayer = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(layer)
    }

    /// Keys set in `self` win; everything else comes from `other`.
    pub fn merge_with(self, other: ConfigLayer) -> Self {
        Self {
            build: BuildLayer {
                file: self.build.file.or(other.build.file),
            },
            execution: ExecutionLayer {
                jobs: self.execution.jobs.or(other.execution.jobs),
                on_failure: self.execution.on_failure.or(other.execution.on_failure),
                shell: self.execution.shell.or(other.execution.shell),
            },
            display: DisplayLayer {
                show_timestamps: self.display.show_timestamps.or(other.display.show_timestamps),
                echo_commands: self.display.echo_commands.or(other.display.echo_commands),
                verbose: self.display.verbose.or(other.display.verbose),
            },
        }
    }

    pub fn resolve(self) -> Config {
        let defaults = Config::default();

        Config {
            build: BuildConfig {
                file: self.build.file.unwrap_or(defaults.build.file),
            },
            execution: ExecutionConfig {
                jobs: self.execution.jobs.unwrap_or(defaults.execution.jobs),
                on_failure: self
                    .execution
                    .on_failure
                    .unwrap_or(defaults.execution.on_failure),
                shell: self.execution.shell.or(defaults.execution.shell),
            },
            display: DisplayConfig {
                show_timestamps: self
                    .display
                    .show_timestamps
                    .unwrap_or(defaults.display.show_timestamps),
                echo_commands: self
                    .display
                    .echo_commands
                    .unwrap_or(defaults.display.echo_commands),
                verbose: self.display.verbose.unwrap_or(defaults.display.verbose),
            },
        }
    }
}

impl Config {
    /// Project config from `dir`, layered over the user's global config.
    pub fn load_from_dir(dir: &Path) -> anyhow::Result<Self> {
        let local = ConfigLayer::load_from_file(dir.join(CONFIG_FILE_NAME))?;
        let global = ConfigLayer::load_from_file(Config::global_path())?;

        Ok(local.merge_with(global).resolve())
    }

    pub fn global_path() -> PathBuf {
        Self::expand_path("~/.config/strata/strata.toml")
    }

    pub fn expand_path(path: &str) -> PathBuf {
        let expanded = shellexpand::tilde(path);
        PathBuf::from(expanded.as_ref())
    }

    /// The build description to read: the CLI flag wins over the config file.
    pub fn build_file(&self, cli: &Cli) -> PathBuf {
        match &cli.file {
            Some(path) => path.clone(),
            None => Self::expand_path(&self.build.file),
        }
    }
}
