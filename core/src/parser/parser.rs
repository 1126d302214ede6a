use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};

use crate::target::{Target, TargetRegistry};

static RULE_HEADER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^([^:]*):(.*)$").unwrap());

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("failed to read build file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("line {line}: command line without a preceding rule header")]
    UnexpectedCommand { line: usize },

    #[error("line {line}: rule '{target}' is not followed by a tab-indented command")]
    MissingCommand { line: usize, target: String },

    #[error("line {line}: rule header has an empty target name")]
    EmptyTargetName { line: usize },
}

impl ParseError {
    pub fn line(&self) -> Option<usize> {
        match self {
            ParseError::Read { .. } => None,
            ParseError::UnexpectedCommand { line }
            | ParseError::MissingCommand { line, .. }
            | ParseError::EmptyTargetName { line } => Some(*line),
        }
    }
}

struct PendingRule {
    line: usize,
    name: String,
    dependencies: Vec<String>,
}

/// Reads `<target>: <deps...>` headers, each followed by exactly one
/// tab-indented command line.
#[derive(Debug, Clone, Default)]
pub struct BuildFileParser;

impl BuildFileParser {
    pub fn new() -> Self {
        Self
    }

    pub fn parse_file<P: AsRef<Path>>(&self, path: P) -> Result<TargetRegistry, ParseError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ParseError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        self.parse_str(&content)
    }

    pub fn parse_str(&self, content: &str) -> Result<TargetRegistry, ParseError> {
        let mut targets = Vec::new();
        let mut pending: Option<PendingRule> = None;

        for (index, line) in content.lines().enumerate() {
            let line_number = index + 1;

            if let Some(rule) = pending.take() {
                match line.strip_prefix('\t') {
                    Some(command) => {
                        targets.push(Target {
                            name: rule.name,
                            command: command.trim().to_string(),
                            dependencies: rule.dependencies,
                        });
                        continue;
                    }
                    None => {
                        return Err(ParseError::MissingCommand {
                            line: rule.line,
                            target: rule.name,
                        });
                    }
                }
            }

            if line.starts_with('\t') {
                return Err(ParseError::UnexpectedCommand { line: line_number });
            }

            if let Some(rule) = parse_header(line, line_number)? {
                pending = Some(rule);
            }
        }

        if let Some(rule) = pending {
            return Err(ParseError::MissingCommand {
                line: rule.line,
                target: rule.name,
            });
        }

        Ok(TargetRegistry::new(targets))
    }
}

fn parse_header(line: &str, line_number: usize) -> Result<Option<PendingRule>, ParseError> {
    let Some(caps) = RULE_HEADER.captures(line) else {
        return Ok(None);
    };

    let name = caps.get(1).map_or("", |m| m.as_str()).trim();
    if name.is_empty() {
        return Err(ParseError::EmptyTargetName { line: line_number });
    }

    let dependencies = caps
        .get(2)
        .map_or("", |m| m.as_str())
        .split_whitespace()
        .map(str::to_string)
        .collect();

    Ok(Some(PendingRule {
        line: line_number,
        name: name.to_string(),
        dependencies,
    }))
}
