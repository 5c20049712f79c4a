//! Probe Executor
//!
//! Runs a validated probe as a child process and streams its standard output
//! back in fixed-size chunks as it arrives. Chunks are not newline-aligned.

use super::{ProbeKind, ProbeRequest};
use crate::error::ProbeError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Default per-command deadline in seconds
const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Read size for standard output
pub const CHUNK_SIZE: usize = 4096;

/// Maximum stderr kept for error reports (4KB)
const MAX_STDERR_SIZE: usize = 4 * 1024;

/// Directories searched after `PATH`; ping often lives in sbin
const FALLBACK_DIRS: &[&str] = &["/usr/sbin", "/sbin", "/usr/bin", "/bin"];

/// Receives output chunks from a running probe.
#[async_trait]
pub trait OutputSink: Send + Sync {
    /// Forward one chunk. Returns `false` once the receiver is gone, which
    /// stops the probe.
    async fn emit(&self, chunk: String) -> bool;
}

/// Summary of a probe that exited successfully
#[derive(Debug, Clone)]
pub struct ProbeOutcome {
    pub kind: ProbeKind,
    pub exit_code: i32,
    pub bytes_streamed: usize,
    pub duration: Duration,
}

/// Configuration for probe execution
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Deadline for a single command (default: 60 seconds)
    pub timeout: Duration,

    /// Explicit `ping` binary; looked up on `PATH` when unset
    pub ping_path: Option<PathBuf>,

    /// Explicit `dig` binary; looked up on `PATH` when unset
    pub dig_path: Option<PathBuf>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            ping_path: None,
            dig_path: None,
        }
    }
}

impl ExecutorConfig {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout,
            ..Default::default()
        }
    }

    pub fn ping_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.ping_path = Some(path.into());
        self
    }

    pub fn dig_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.dig_path = Some(path.into());
        self
    }
}

/// Executes probes as child processes
///
/// # Security
///
/// - Arguments come from `ProbeRequest::arguments`, built from validated fields
/// - The binary is spawned directly, never through a shell
/// - Every command has a deadline; the child is killed on deadline, on
///   cancellation and when the executor future is dropped
#[derive(Debug, Clone, Default)]
pub struct ProbeExecutor {
    config: ExecutorConfig,
}

impl ProbeExecutor {
    pub fn new(config: ExecutorConfig) -> Self {
        Self { config }
    }

    /// Resolve the binary for `kind`
    pub fn locate(&self, kind: ProbeKind) -> Result<PathBuf, ProbeError> {
        let configured = match kind {
            ProbeKind::Ping => self.config.ping_path.as_deref(),
            ProbeKind::Dig => self.config.dig_path.as_deref(),
        };

        let found = match configured {
            Some(path) => is_executable(path).then(|| path.to_path_buf()),
            None => find_binary(kind.as_str()),
        };

        found.ok_or(ProbeError::ExecutorUnavailable {
            tool: kind.as_str(),
        })
    }

    /// Run `request`, forwarding stdout chunks to `sink` until the process
    /// exits.
    ///
    /// # Errors
    ///
    /// - `ExecutorUnavailable` if the binary is missing (nothing is spawned)
    /// - `Execution` on spawn failure, read failure or nonzero exit
    /// - `Timeout` when the per-command deadline passes
    /// - `Cancelled` when `cancel` fires or the sink goes away
    pub async fn execute(
        &self,
        request: &ProbeRequest,
        sink: &dyn OutputSink,
        cancel: &CancellationToken,
    ) -> Result<ProbeOutcome, ProbeError> {
        let kind = request.kind();
        let tool = kind.as_str();
        let program = self.locate(kind)?;
        let args = request.arguments();
        let start = Instant::now();

        info!(tool, program = %program.display(), ?args, "Executing probe");

        let mut child = Command::new(&program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ProbeError::Execution {
                tool,
                detail: format!("failed to spawn {}: {}", program.display(), e),
            })?;

        let mut stdout = child.stdout.take().ok_or_else(|| ProbeError::Execution {
            tool,
            detail: "stdout was not captured".to_string(),
        })?;
        let stderr_task = child
            .stderr
            .take()
            .map(|stderr| tokio::spawn(collect_stderr(stderr, MAX_STDERR_SIZE)));

        let deadline = tokio::time::sleep(self.config.timeout);
        tokio::pin!(deadline);

        let mut buf = vec![0u8; CHUNK_SIZE];
        let mut decoder = Utf8Chunker::default();
        let mut bytes_streamed = 0usize;

        let interrupted = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break Some(ProbeError::Cancelled),
                _ = &mut deadline => break Some(self.timeout_error(tool)),
                read = stdout.read(&mut buf) => match read {
                    Ok(0) => break None,
                    Ok(n) => {
                        bytes_streamed += n;
                        if let Some(text) = decoder.push(&buf[..n]) {
                            if !sink.emit(text).await {
                                break Some(ProbeError::Cancelled);
                            }
                        }
                    }
                    Err(e) => break Some(ProbeError::Execution {
                        tool,
                        detail: format!("failed to read output: {}", e),
                    }),
                },
            }
        };

        let interrupted = match (interrupted, decoder.finish()) {
            (None, Some(text)) => (!sink.emit(text).await).then_some(ProbeError::Cancelled),
            (interrupted, _) => interrupted,
        };

        let waited = match interrupted {
            Some(err) => Err(err),
            None => tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(ProbeError::Cancelled),
                _ = &mut deadline => Err(self.timeout_error(tool)),
                status = child.wait() => Ok(status),
            },
        };

        let status = match waited {
            Ok(status) => status.map_err(|e| ProbeError::Execution {
                tool,
                detail: format!("failed to wait for process: {}", e),
            })?,
            Err(err) => {
                terminate(&mut child, tool).await;
                if let Some(task) = stderr_task {
                    task.abort();
                }
                debug!(tool, error = %err, "Probe interrupted");
                return Err(err);
            }
        };

        // A descendant may keep stderr open after the probe exits
        let stderr = match stderr_task {
            Some(mut task) => tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    task.abort();
                    String::new()
                }
                _ = &mut deadline => {
                    task.abort();
                    debug!(tool, "Stderr still open at deadline; dropping it");
                    String::new()
                }
                collected = &mut task => collected.unwrap_or_default(),
            },
            None => String::new(),
        };
        let duration = start.elapsed();

        if status.success() {
            info!(tool, bytes_streamed, duration_ms = duration.as_millis() as u64, "Probe succeeded");
            Ok(ProbeOutcome {
                kind,
                exit_code: status.code().unwrap_or(0),
                bytes_streamed,
                duration,
            })
        } else {
            warn!(tool, ?status, "Probe failed");
            Err(ProbeError::Execution {
                tool,
                detail: describe_failure(status, &stderr),
            })
        }
    }

    fn timeout_error(&self, tool: &'static str) -> ProbeError {
        ProbeError::Timeout {
            tool,
            after: self.config.timeout,
        }
    }
}

/// Kill the child and reap it
async fn terminate(child: &mut Child, tool: &str) {
    if let Err(e) = child.kill().await {
        warn!(tool, error = %e, "Failed to kill probe process");
    }
}

fn describe_failure(status: ExitStatus, stderr: &str) -> String {
    let status = match status.code() {
        Some(code) => format!("exit status {}", code),
        None => "terminated by signal".to_string(),
    };
    let stderr = stderr.trim();
    if stderr.is_empty() {
        status
    } else {
        format!("{}: {}", status, stderr)
    }
}

/// Drain a stream to EOF, keeping at most `limit` bytes
async fn collect_stderr<R: AsyncRead + Unpin>(mut reader: R, limit: usize) -> String {
    let mut kept = Vec::new();
    let mut buf = [0u8; 1024];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let room = limit.saturating_sub(kept.len());
                kept.extend_from_slice(&buf[..n.min(room)]);
            }
        }
    }
    String::from_utf8_lossy(&kept).into_owned()
}

fn find_binary(name: &str) -> Option<PathBuf> {
    let from_path = std::env::var_os("PATH")
        .map(|paths| std::env::split_paths(&paths).collect::<Vec<_>>())
        .unwrap_or_default();

    from_path
        .into_iter()
        .chain(FALLBACK_DIRS.iter().map(PathBuf::from))
        .map(|dir| dir.join(name))
        .find(|candidate| is_executable(candidate))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// Turns raw byte chunks into text without splitting a UTF-8 sequence that
/// straddles two reads.
#[derive(Debug, Default)]
struct Utf8Chunker {
    pending: Vec<u8>,
}

impl Utf8Chunker {
    fn push(&mut self, bytes: &[u8]) -> Option<String> {
        self.pending.extend_from_slice(bytes);

        let mut text = String::new();
        let mut consumed = 0;
        loop {
            let rest = &self.pending[consumed..];
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    text.push_str(valid);
                    consumed = self.pending.len();
                    break;
                }
                Err(e) => {
                    let (valid, _) = rest.split_at(e.valid_up_to());
                    text.push_str(&String::from_utf8_lossy(valid));
                    match e.error_len() {
                        // Invalid sequence: replace it and keep decoding
                        Some(len) => {
                            text.push(char::REPLACEMENT_CHARACTER);
                            consumed += e.valid_up_to() + len;
                        }
                        // Incomplete sequence at the end: hold it back
                        None => {
                            consumed += e.valid_up_to();
                            break;
                        }
                    }
                }
            }
        }

        self.pending.drain(..consumed);
        (!text.is_empty()).then_some(text)
    }

    fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let text = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        Some(text)
    }
}
