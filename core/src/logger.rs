use chrono::Local;
use std::io::Write;

use crate::config::DisplayConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl LogLevel {
    pub fn to_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warning => "WARNING",
            LogLevel::Error => "ERROR",
        }
    }

    fn color(&self) -> &'static str {
        match self {
            LogLevel::Debug => "\x1b[90m",
            LogLevel::Info => "\x1b[37m",
            LogLevel::Warning => "\x1b[33m",
            LogLevel::Error => "\x1b[31m",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Logger {
    use_colors: bool,
    show_timestamps: bool,
    verbose: bool,
}

impl Logger {
    pub fn new() -> Self {
        Self {
            use_colors: atty::is(atty::Stream::Stdout),
            show_timestamps: false,
            verbose: false,
        }
    }

    pub fn from_config(display: &DisplayConfig) -> Self {
        Self {
            use_colors: atty::is(atty::Stream::Stdout),
            show_timestamps: display.show_timestamps,
            verbose: display.verbose,
        }
    }

    pub fn with_colors(mut self, use_colors: bool) -> Self {
        self.use_colors = use_colors;
        self
    }

    pub fn is_enabled(&self, level: LogLevel) -> bool {
        level > LogLevel::Debug || self.verbose
    }

    pub fn log(&self, level: LogLevel, message: &str) {
        if !self.is_enabled(level) {
            return;
        }

        let line = self.format(level, message);
        let mut stdout = std::io::stdout().lock();
        let _ = writeln!(stdout, "{}", line);
        let _ = stdout.flush();
    }

    /// One line of a command's stdout or stderr, tagged with its target.
    pub fn log_output(&self, target: &str, line: &str, is_stderr: bool) {
        let message = if self.use_colors {
            format!("\x1b[36m[{}]\x1b[0m {}", target, line)
        } else {
            format!("[{}] {}", target, line)
        };

        let level = if is_stderr {
            LogLevel::Warning
        } else {
            LogLevel::Info
        };
        self.log(level, &message);
    }

    pub fn format(&self, level: LogLevel, message: &str) -> String {
        let mut line = String::new();

        if self.show_timestamps {
            let timestamp = Local::now().format("%H:%M:%S");
            if self.use_colors {
                line.push_str(&format!("\x1b[90m[{}]\x1b[0m ", timestamp));
            } else {
                line.push_str(&format!("[{}] ", timestamp));
            }
        }

        if self.use_colors {
            line.push_str(&format!("{}{}\x1b[0m", level.color(), message));
        } else {
            line.push_str(message);
        }

        line
    }
}

impl Default for Logger {
    fn default() -> Self {
        Self::new()
    }
}
