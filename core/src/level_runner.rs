use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use crate::config::FailurePolicy;
use crate::executor::CommandRunner;
use crate::logger::{LogLevel, Logger};
use crate::staleness::RebuildPlan;
use crate::target::{TargetId, TargetRegistry};

#[derive(Debug, Clone, PartialEq)]
pub enum TargetResult {
    Success {
        duration: f64,
    },
    Failed {
        error: String,
        duration: f64,
        exit_code: Option<i32>,
    },
    Skipped {
        reason: String,
    },
}

impl TargetResult {
    pub fn is_failed(&self) -> bool {
        matches!(self, TargetResult::Failed { .. })
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, TargetResult::Skipped { .. })
    }
}

#[derive(Debug, Clone)]
pub struct TargetOutcome {
    pub id: TargetId,
    pub name: String,
    pub depth: usize,
    pub result: TargetResult,
}

#[derive(Debug, Clone, Default)]
pub struct BuildSummary {
    pub outcomes: Vec<TargetOutcome>,
    pub levels_executed: usize,
    pub duration: f64,
}

impl BuildSummary {
    pub fn failures(&self) -> impl Iterator<Item = &TargetOutcome> {
        self.outcomes.iter().filter(|o| o.result.is_failed())
    }

    pub fn has_failures(&self) -> bool {
        self.failures().next().is_some()
    }

    pub fn executed_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| !o.result.is_skipped())
            .count()
    }

    pub fn outcome(&self, name: &str) -> Option<&TargetOutcome> {
        self.outcomes.iter().find(|o| o.name == name)
    }
}

/// Executes rebuild groups in order. Every command of a group runs
/// concurrently (at most `jobs` at a time) and the group is fully joined
/// before the next one starts.
pub struct LevelRunner {
    runner: Arc<dyn CommandRunner>,
    jobs: usize,
    policy: FailurePolicy,
    echo_commands: bool,
    logger: Logger,
}

impl LevelRunner {
    pub fn new(runner: Arc<dyn CommandRunner>, logger: Logger) -> Self {
        Self {
            runner,
            jobs: 1,
            policy: FailurePolicy::Continue,
            echo_commands: false,
            logger,
        }
    }

    pub fn with_jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs.max(1);
        self
    }

    pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_echo(mut self, echo_commands: bool) -> Self {
        self.echo_commands = echo_commands;
        self
    }

    pub async fn execute(&self, registry: &TargetRegistry, plan: &RebuildPlan) -> BuildSummary {
        let start = Instant::now();
        let semaphore = Arc::new(Semaphore::new(self.jobs));
        let mut summary = BuildSummary::default();
        let mut halted = false;

        for group in &plan.groups {
            if halted {
                for id in group.ids() {
                    summary.outcomes.push(TargetOutcome {
                        id,
                        name: registry[id].name.clone(),
                        depth: group.depth,
                        result: TargetResult::Skipped {
                            reason: "previous level failed".to_string(),
                        },
                    });
                }
                continue;
            }

            self.logger.log(
                LogLevel::Debug,
                &format!(
                    "Level {}: rebuilding {} target(s)",
                    group.depth,
                    group.len()
                ),
            );

            let mut handles: Vec<(TargetId, JoinHandle<TargetResult>)> = Vec::new();

            for id in group.ids() {
                let target = &registry[id];
                if self.echo_commands {
                    self.logger.log(LogLevel::Info, &target.command);
                }

                let runner = Arc::clone(&self.runner);
                let semaphore = Arc::clone(&semaphore);
                let name = target.name.clone();
                let command = target.command.clone();

                let handle = tokio::spawn(async move {
                    let _permit = match semaphore.acquire_owned().await {
                        Ok(permit) => permit,
                        Err(err) => {
                            return TargetResult::Failed {
                                error: format!("worker pool closed: {}", err),
                                duration: 0.0,
                                exit_code: None,
                            };
                        }
                    };

                    run_target(runner.as_ref(), &name, &command).await
                });

                handles.push((id, handle));
            }

            // Level barrier: nothing from the next group starts until every
            // handle here has resolved.
            for (id, handle) in handles {
                let result = match handle.await {
                    Ok(result) => result,
                    Err(err) => TargetResult::Failed {
                        error: format!("task panicked: {}", err),
                        duration: 0.0,
                        exit_code: None,
                    },
                };

                if let TargetResult::Failed { error, .. } = &result {
                    self.logger.log(
                        LogLevel::Warning,
                        &format!("{}: command failed ({})", registry[id].name, error),
                    );
                }

                summary.outcomes.push(TargetOutcome {
                    id,
                    name: registry[id].name.clone(),
                    depth: group.depth,
                    result,
                });
            }

            summary.levels_executed += 1;

            let level_failed = summary
                .outcomes
                .iter()
                .any(|o| o.depth == group.depth && o.result.is_failed());
            if level_failed && self.policy == FailurePolicy::Halt {
                self.logger.log(
                    LogLevel::Error,
                    &format!("Stopping after level {} because a command failed", group.depth),
                );
                halted = true;
            }
        }

        summary.duration = start.elapsed().as_secs_f64();
        summary
    }
}

async fn run_target(runner: &dyn CommandRunner, name: &str, command: &str) -> TargetResult {
    match runner.run(name, command).await {
        Ok(result) if result.success => TargetResult::Success {
            duration: result.duration,
        },
        Ok(result) => TargetResult::Failed {
            error: result
                .failure_reason
                .unwrap_or_else(|| "command failed".to_string()),
            duration: result.duration,
            exit_code: result.exit_code,
        },
        Err(err) => TargetResult::Failed {
            error: format!("{:#}", err),
            duration: 0.0,
            exit_code: None,
        },
    }
}
