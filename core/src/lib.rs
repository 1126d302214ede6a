pub mod builder;
pub mod cli;
pub mod config;
pub mod dependency_graph;
pub mod executor;
pub mod level_runner;
pub mod logger;
pub mod parser;
pub mod staleness;
pub mod target;

pub use builder::{BuildOutcome, Builder};
pub use cli::Cli;
pub use config::{Config, FailurePolicy};
pub use dependency_graph::{BuildSchedule, GraphError, Level, TargetDependencyGraph};
pub use executor::{execute_step, CommandRunner, ExecutionResult, ShellRunner};
pub use level_runner::{BuildSummary, LevelRunner, TargetOutcome, TargetResult};
pub use logger::{LogLevel, Logger};
pub use parser::{BuildFileParser, ParseError};
pub use staleness::{
    DiskFileSystem, FileSystem, RebuildGroup, RebuildPlan, RebuildReason, StalenessPropagator,
};
pub use target::{Target, TargetId, TargetRegistry};
