//! C1 — Matcher Executor.
//!
//! Invokes the external structural-pattern matcher binary (ast-grep-shaped;
//! §6), with streaming JSON output, bounded result counts, timeouts, and
//! file-size filtering. Grounded on `exec.rs`'s child-spawn / stream-reader /
//! `tokio::select!` timeout race, narrowed to a single child (no process
//! group kill — see DESIGN.md).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::types::Match;

/// Options shared by all three C1 operations (§4.1).
#[derive(Clone, Debug, Default)]
pub struct MatcherOptions {
    pub max_results: Option<usize>,
    pub max_file_size_mb: Option<u64>,
    pub timeout_ms: Option<u64>,
    pub include_patterns: Vec<String>,
    pub exclude_patterns: Vec<String>,
}

/// What's being matched: a single structural pattern, or a declarative rule
/// document.
#[derive(Clone, Debug)]
pub enum Query {
    Pattern(String),
    RuleDoc(String),
}

/// Counters describing one invocation, for callers that want them
/// (the `skipped` metric from §4.1's file-size filtering).
#[derive(Clone, Debug, Default)]
pub struct ExecutionStats {
    pub files_considered: usize,
    pub files_skipped_for_size: usize,
    pub malformed_lines_skipped: usize,
}

/// Wire shape of one matcher match line (§6).
#[derive(Debug, Deserialize)]
struct MatchLine {
    file: PathBuf,
    range: MatchRange,
    text: String,
    #[serde(default)]
    #[allow(dead_code)]
    #[serde(rename = "metaVariables")]
    meta_variables: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct MatchRange {
    start: MatchPoint,
    end: MatchPoint,
}

#[derive(Debug, Deserialize)]
struct MatchPoint {
    line: u32,
    #[allow(dead_code)]
    column: u32,
}

pub struct MatcherExecutor {
    binary: String,
}

impl MatcherExecutor {
    pub fn new(binary: impl Into<String>) -> Self {
        Self { binary: binary.into() }
    }

    /// Resolve the binary path from `PATH`, failing with `ToolNotInstalled`
    /// if it isn't present (§4.1).
    pub fn resolve_binary(&self) -> Result<PathBuf> {
        which::which(&self.binary).map_err(|_| Error::ToolNotInstalled {
            binary: self.binary.clone(),
        })
    }

    /// `run_structural(pattern, language, target_path, opts) -> Matches`.
    pub async fn run_structural(
        &self,
        pattern: &str,
        language: &str,
        target_path: &Path,
        opts: &MatcherOptions,
    ) -> Result<Vec<Match>> {
        self.run(&Query::Pattern(pattern.to_string()), language, target_path, opts)
            .await
    }

    /// `run_rule(rule_doc, language, target_path, opts) -> Matches`.
    pub async fn run_rule(
        &self,
        rule_doc: &str,
        language: &str,
        target_path: &Path,
        opts: &MatcherOptions,
    ) -> Result<Vec<Match>> {
        self.run(&Query::RuleDoc(rule_doc.to_string()), language, target_path, opts)
            .await
    }

    async fn run(
        &self,
        query: &Query,
        language: &str,
        target_path: &Path,
        opts: &MatcherOptions,
    ) -> Result<Vec<Match>> {
        let mut out = Vec::new();
        for item in self.stream(query, language, target_path, opts).await? {
            out.push(item);
        }
        Ok(out)
    }

    /// `stream(pattern_or_rule, language, target_path, opts) -> sequence of
    /// Match`. Collected eagerly here (the crate has no async-generator
    /// story without pulling in `async-stream`'s macro machinery for a
    /// single call site); early termination after `max_results` still
    /// happens against the child process, not just the returned Vec.
    pub async fn stream(
        &self,
        query: &Query,
        language: &str,
        target_path: &Path,
        opts: &MatcherOptions,
    ) -> Result<Vec<Match>> {
        let binary = self.resolve_binary()?;

        let files = self.discover_files(target_path, opts)?;

        let mut command = Command::new(&binary);
        command.arg(match query {
            Query::Pattern(_) => "run",
            Query::RuleDoc(_) => "scan",
        });
        match query {
            Query::Pattern(pattern) => {
                command.arg("--pattern").arg(pattern);
            }
            Query::RuleDoc(rule_doc) => {
                command.arg("--rule").arg(rule_doc);
            }
        }
        command
            .arg("--lang")
            .arg(language)
            .arg("--json=stream");
        if files.is_empty() {
            command.arg(target_path);
        } else {
            command.args(&files);
        }
        let cwd = if target_path.is_dir() {
            target_path.to_path_buf()
        } else {
            target_path.parent().map(Path::to_path_buf).unwrap_or_else(|| target_path.to_path_buf())
        };
        command
            .current_dir(&cwd)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = command.spawn().map_err(Error::Io)?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Io(std::io::Error::other("stdout pipe not available")))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::Io(std::io::Error::other("stderr pipe not available")))?;

        let stderr_task = tokio::spawn(async move {
            use tokio::io::AsyncReadExt;
            let mut buf = String::new();
            let mut reader = stderr;
            let _ = reader.read_to_string(&mut buf).await;
            buf
        });

        let timeout_ms = opts.timeout_ms.unwrap_or(10_000);
        let operation = match query {
            Query::Pattern(_) => "run_structural",
            Query::RuleDoc(_) => "run_rule",
        };

        let read_result = tokio::time::timeout(
            Duration::from_millis(timeout_ms),
            read_matches(stdout, language, opts.max_results),
        )
        .await;

        let (matches, malformed) = match read_result {
            Ok(result) => result,
            Err(_) => {
                kill_child(&mut child);
                let _ = child.wait().await;
                warn!(operation, timeout_ms, "matcher invocation timed out");
                return Err(Error::Timeout {
                    operation: operation.to_string(),
                    elapsed_ms: timeout_ms,
                });
            }
        };

        if opts.max_results.map(|n| matches.len() >= n).unwrap_or(false) {
            // Early termination: we have enough matches, stop waiting on
            // the child and drain its streams instead of blocking on exit.
            kill_child(&mut child);
        }

        let status = child.wait().await.map_err(Error::Io)?;
        let stderr_text = stderr_task.await.unwrap_or_default();

        if malformed > 0 {
            debug!(malformed, "matcher emitted malformed JSON lines, skipped");
        }

        if !status.success() && matches.is_empty() && !stderr_text.trim().is_empty() {
            let tail: String = stderr_text
                .lines()
                .rev()
                .take(20)
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect::<Vec<_>>()
                .join("\n");
            return Err(Error::ExecutionError {
                stderr_tail: tail,
                exit_code: status.code(),
            });
        }

        info!(operation, matches = matches.len(), "matcher invocation complete");
        Ok(matches)
    }

    /// File-size filtering performed by the caller (§4.1): walk the target
    /// tree respecting excludes, drop files above `max_file_size_mb`, and
    /// return the surviving explicit file list via `ignore::WalkBuilder` with
    /// override globs.
    fn discover_files(&self, target_path: &Path, opts: &MatcherOptions) -> Result<Vec<PathBuf>> {
        if opts.include_patterns.is_empty() && opts.exclude_patterns.is_empty() && opts.max_file_size_mb.is_none() {
            return Ok(Vec::new());
        }

        let mut builder = ignore::WalkBuilder::new(target_path);
        builder.hidden(false);
        if !opts.exclude_patterns.is_empty() {
            let mut overrides = ignore::overrides::OverrideBuilder::new(target_path);
            for pattern in &opts.exclude_patterns {
                let _ = overrides.add(&format!("!{pattern}"));
            }
            if let Ok(overrides) = overrides.build() {
                builder.overrides(overrides);
            }
        }

        let max_bytes = opts.max_file_size_mb.map(|mb| mb * 1024 * 1024);
        let mut files = Vec::new();
        for entry in builder.build() {
            let Ok(entry) = entry else { continue };
            if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                continue;
            }
            if let Some(max_bytes) = max_bytes {
                if let Ok(meta) = entry.metadata() {
                    if meta.len() > max_bytes {
                        continue;
                    }
                }
            }
            files.push(entry.into_path());
        }
        Ok(files)
    }
}

async fn read_matches(
    stdout: impl tokio::io::AsyncRead + Unpin,
    language: &str,
    max_results: Option<usize>,
) -> (Vec<Match>, usize) {
    let mut reader = BufReader::new(stdout).lines();
    let mut matches = Vec::new();
    let mut malformed = 0usize;

    while let Ok(Some(line)) = reader.next_line().await {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<MatchLine>(&line) {
            Ok(parsed) => {
                matches.push(Match {
                    file_path: parsed.file,
                    start_line: parsed.range.start.line,
                    end_line: parsed.range.end.line,
                    text: parsed.text,
                    language: language.to_string(),
                });
                if let Some(max) = max_results {
                    if matches.len() >= max {
                        break;
                    }
                }
            }
            Err(_) => malformed += 1,
        }
    }

    (matches, malformed)
}

fn kill_child(child: &mut Child) {
    let _ = child.start_kill();
}

#[allow(dead_code)]
fn env_passthrough() -> HashMap<String, String> {
    std::env::vars().collect()
}
