use anyhow::Context;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::{Config, FailurePolicy};
use crate::dependency_graph::{BuildSchedule, TargetDependencyGraph};
use crate::executor::ShellRunner;
use crate::level_runner::{BuildSummary, LevelRunner};
use crate::logger::{LogLevel, Logger};
use crate::parser::BuildFileParser;
use crate::staleness::{DiskFileSystem, FileSystem, RebuildPlan, StalenessPropagator};
use crate::target::TargetRegistry;

#[derive(Debug, Clone)]
pub enum BuildOutcome {
    UpToDate,
    Built(BuildSummary),
}

impl BuildOutcome {
    /// Whether the invocation should report failure. Failed commands only
    /// fail the invocation under the halt policy.
    pub fn ensure_success(&self, policy: FailurePolicy) -> anyhow::Result<()> {
        let BuildOutcome::Built(summary) = self else {
            return Ok(());
        };

        if policy == FailurePolicy::Halt && summary.has_failures() {
            anyhow::bail!(
                "Build halted: {} command(s) failed",
                summary.failures().count()
            );
        }

        Ok(())
    }
}

/// Drives one invocation: schedule the registry, decide what is stale, then
/// run the rebuild groups level by level.
pub struct Builder {
    registry: TargetRegistry,
    config: Config,
    logger: Logger,
    working_dir: Option<PathBuf>,
    fs: Box<dyn FileSystem + Send + Sync>,
}

impl Builder {
    pub fn new(registry: TargetRegistry, config: Config) -> Self {
        let logger = Logger::from_config(&config.display);

        Self {
            registry,
            config,
            logger,
            working_dir: None,
            fs: Box::new(DiskFileSystem::new()),
        }
    }

    pub fn from_file<P: AsRef<Path>>(path: P, config: Config) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let registry = BuildFileParser::new()
            .parse_file(path)
            .with_context(|| format!("Invalid build description: {}", path.display()))?;

        Ok(Self::new(registry, config))
    }

    /// Resolve target names and run commands relative to `dir`.
    pub fn in_directory(mut self, dir: PathBuf) -> Self {
        self.fs = Box::new(DiskFileSystem::rooted_at(&dir));
        self.working_dir = Some(dir);
        self
    }

    pub fn with_logger(mut self, logger: Logger) -> Self {
        self.logger = logger;
        self
    }

    pub fn registry(&self) -> &TargetRegistry {
        &self.registry
    }

    /// Command output goes through the builder's current logger.
    fn shell_runner(&self) -> ShellRunner {
        ShellRunner::new(self.logger.clone())
            .with_shell(self.config.execution.shell.clone())
            .with_working_dir(self.working_dir.clone())
    }

    pub fn schedule(&self) -> anyhow::Result<BuildSchedule> {
        let schedule = TargetDependencyGraph::from_registry(&self.registry)
            .schedule()
            .context("Failed to resolve target dependencies")?;

        Ok(schedule)
    }

    pub fn plan(&self) -> anyhow::Result<RebuildPlan> {
        let schedule = self.schedule()?;
        let plan = StalenessPropagator::new(&self.registry, self.fs.as_ref()).plan(&schedule);

        for group in &plan.groups {
            for stale in &group.targets {
                self.logger.log(
                    LogLevel::Debug,
                    &format!(
                        "{} needs rebuild: {}",
                        self.registry[stale.id].name, stale.reason
                    ),
                );
            }
        }

        Ok(plan)
    }

    pub async fn run(&self) -> anyhow::Result<BuildOutcome> {
        let plan = self.plan()?;

        if plan.is_empty() {
            return Ok(BuildOutcome::UpToDate);
        }

        self.logger.log(
            LogLevel::Debug,
            &format!(
                "{} target(s) to rebuild across {} level(s)",
                plan.target_count(),
                plan.groups.len()
            ),
        );

        let execution = &self.config.execution;
        let summary = LevelRunner::new(Arc::new(self.shell_runner()), self.logger.clone())
            .with_jobs(execution.resolved_jobs())
            .with_policy(execution.on_failure)
            .with_echo(self.config.display.echo_commands)
            .execute(&self.registry, &plan)
            .await;

        Ok(BuildOutcome::Built(summary))
    }
}
