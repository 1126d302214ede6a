use anyhow::Context;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::{ExitStatus, Stdio};
use std::time::Instant;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;

use crate::logger::Logger;

#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub success: bool,
    pub duration: f64,
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
    pub exit_code: Option<i32>,
    pub failure_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputLine {
    Stdout(String),
    Stderr(String),
}

pub type RunFuture<'a> =
    Pin<Box<dyn Future<Output = anyhow::Result<ExecutionResult>> + Send + 'a>>;

/// Runs one target's command to completion.
pub trait CommandRunner: Send + Sync {
    fn run<'a>(&'a self, target: &'a str, command: &'a str) -> RunFuture<'a>;
}

/// Runs commands through the platform shell and forwards their output to
/// the logger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellRunner {
    shell: Option<String>,
    working_dir: Option<PathBuf>,
    logger: Logger,
}

impl ShellRunner {
    pub fn new(logger: Logger) -> Self {
        Self {
            shell: None,
            working_dir: None,
            logger,
        }
    }

    pub fn with_shell(mut self, shell: Option<String>) -> Self {
        self.shell = shell;
        self
    }

    pub fn with_working_dir(mut self, working_dir: Option<PathBuf>) -> Self {
        self.working_dir = working_dir;
        self
    }
}

impl CommandRunner for ShellRunner {
    fn run<'a>(&'a self, target: &'a str, command: &'a str) -> RunFuture<'a> {
        Box::pin(async move {
            let logger = self.logger.clone();
            let tag = target.to_string();

            let shell = self.shell.as_deref();
            let working_dir = self.working_dir.as_deref();

            execute_step(command, shell, working_dir, move |line| match line {
                OutputLine::Stdout(line) => logger.log_output(&tag, &line, false),
                OutputLine::Stderr(line) => logger.log_output(&tag, &line, true),
            })
            .await
        })
    }
}

/// The program and leading arguments used to hand a command string to a shell.
/// An override picks its argument style from the shell's name.
pub fn shell_invocation(shell: Option<&str>) -> (String, Vec<String>) {
    let Some(shell) = shell else {
        return if cfg!(windows) {
            ("cmd.exe".to_string(), vec!["/C".to_string()])
        } else {
            ("/bin/sh".to_string(), vec!["-c".to_string()])
        };
    };

    let program = Path::new(shell)
        .file_stem()
        .map(|stem| stem.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    let args = match program.as_str() {
        "powershell" | "pwsh" => vec!["-NoProfile".to_string(), "-Command".to_string()],
        "cmd" => vec!["/C".to_string()],
        _ => vec!["-c".to_string()],
    };

    (shell.to_string(), args)
}

pub async fn execute_step<F>(
    command: &str,
    shell: Option<&str>,
    working_dir: Option<&Path>,
    mut output_callback: F,
) -> anyhow::Result<ExecutionResult>
where
    F: FnMut(OutputLine) + Send + 'static,
{
    let start = Instant::now();
    let (program, args) = shell_invocation(shell);

    let mut process = Command::new(&program);
    process.args(&args).arg(command);
    if let Some(dir) = working_dir {
        process.current_dir(dir);
    }

    let mut child = process
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .with_context(|| format!("Failed to spawn command via {}: {}", program, command))?;

    let stdout = child.stdout.take().context("Failed to capture stdout")?;
    let stderr = child.stderr.take().context("Failed to capture stderr")?;

    let (tx, mut rx) = mpsc::unbounded_channel::<OutputLine>();

    let tx_clone = tx.clone();
    let stdout_task = tokio::spawn(async move {
        let mut lines = Vec::new();
        let mut reader = BufReader::new(stdout).lines();
        while let Ok(Some(line)) = reader.next_line().await {
            lines.push(line.clone());
            let _ = tx_clone.send(OutputLine::Stdout(line));
        }
        lines
    });

    let stderr_task = tokio::spawn(async move {
        let mut lines = Vec::new();
        let mut reader = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = reader.next_line().await {
            lines.push(line.clone());
            let _ = tx.send(OutputLine::Stderr(line));
        }
        lines
    });

    let callback_task = tokio::spawn(async move {
        while let Some(line) = rx.recv().await {
            output_callback(line);
        }
    });

    let status = child
        .wait()
        .await
        .context("Failed to wait for child process")?;

    let stdout_lines = stdout_task.await.context("stdout task panicked")?;
    let stderr_lines = stderr_task.await.context("stderr task panicked")?;

    // Both senders are gone once the readers finish, so this drains and exits.
    callback_task.await.context("output task panicked")?;

    Ok(ExecutionResult {
        success: status.success(),
        duration: start.elapsed().as_secs_f64(),
        stdout: stdout_lines,
        stderr: stderr_lines,
        exit_code: status.code(),
        failure_reason: failure_reason(&status),
    })
}

fn failure_reason(status: &ExitStatus) -> Option<String> {
    if status.success() {
        return None;
    }

    if let Some(code) = status.code() {
        return Some(format!("Exit code {}", code));
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;

        if let Some(signal) = status.signal() {
            let signal_name = match signal {
                1 => "SIGHUP (Hangup)",
                2 => "SIGINT (Interrupt)",
                3 => "SIGQUIT (Quit)",
                6 => "SIGABRT (Abort)",
                9 => "SIGKILL (Killed)",
                11 => "SIGSEGV (Segmentation fault)",
                13 => "SIGPIPE (Broken pipe)",
                15 => "SIGTERM (Terminated)",
                _ => "Unknown signal",
            };
            return Some(format!("Signal {} ({})", signal, signal_name));
        }
    }

    Some("Abnormal termination".to_string())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[tokio::test]
    async fn test_execute_step_success() {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&lines);

        let result = execute_step("echo hello; echo oops 1>&2", None, None, move |line| {
            sink.lock().unwrap().push(line);
        })
        .await
        .unwrap();

        assert!(result.success);
        assert_eq!(result.exit_code, Some(0));
        assert!(result.failure_reason.is_none());
        assert_eq!(result.stdout, vec!["hello"]);
        assert_eq!(result.stderr, vec!["oops"]);

        let lines = lines.lock().unwrap();
        assert!(lines.contains(&OutputLine::Stdout("hello".to_string())));
        assert!(lines.contains(&OutputLine::Stderr("oops".to_string())));
    }

    #[tokio::test]
    async fn test_execute_step_failure() {
        let result = execute_step("exit 3", None, None, |_| {}).await.unwrap();

        assert!(!result.success);
        assert_eq!(result.exit_code, Some(3));
        assert_eq!(result.failure_reason.as_deref(), Some("Exit code 3"));
    }

    #[tokio::test]
    async fn test_execute_step_signal() {
        let result = execute_step("kill -9 $$", None, None, |_| {}).await.unwrap();

        assert!(!result.success);
        assert_eq!(result.exit_code, None);
        assert_eq!(
            result.failure_reason.as_deref(),
            Some("Signal 9 (SIGKILL (Killed))")
        );
    }

    #[tokio::test]
    async fn test_missing_shell_is_spawn_error() {
        let err = execute_step("true", Some("/nonexistent/shell"), None, |_| {})
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Failed to spawn command"));
    }

    #[tokio::test]
    async fn test_shell_runner_uses_shell() {
        let dir = tempfile::tempdir().unwrap();

        let runner = ShellRunner::new(Logger::new().with_colors(false))
            .with_working_dir(Some(dir.path().to_path_buf()));
        let result = runner.run("out.txt", "printf built > out.txt").await.unwrap();

        assert!(result.success);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("out.txt")).unwrap(),
            "built"
        );
    }

    #[test]
    fn test_shell_invocation_override() {
        let (program, args) = shell_invocation(Some("/bin/bash"));
        assert_eq!(program, "/bin/bash");
        assert_eq!(args, vec!["-c"]);

        let (program, args) = shell_invocation(None);
        assert_eq!(program, "/bin/sh");
        assert_eq!(args, vec!["-c"]);
    }

    #[test]
    fn test_shell_invocation_follows_shell_name() {
        assert_eq!(shell_invocation(Some("cmd.exe")).1, vec!["/C"]);
        assert_eq!(shell_invocation(Some("CMD")).1, vec!["/C"]);
        assert_eq!(
            shell_invocation(Some("/usr/bin/pwsh")).1,
            vec!["-NoProfile", "-Command"]
        );
        assert_eq!(
            shell_invocation(Some("powershell.exe")).1,
            vec!["-NoProfile", "-Command"]
        );
        assert_eq!(shell_invocation(Some("zsh")).1, vec!["-c"]);
    }
}
