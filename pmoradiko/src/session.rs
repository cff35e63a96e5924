//! Session supervisor: records one program through as many attempts as needed
//!
//! ```text
//! Idle ─▶ Recording ─┬─▶ Success
//!            ▲       ├─▶ Retrying ──(backoff)──┐
//!            └───────┼─────────────────────────┘
//!                    ├─▶ Exhausted   (retry ceiling reached)
//!                    ├─▶ Aborted     (error that no retry can fix)
//!                    └─▶ Cancelled   (token fired)
//! ```
//!
//! Each attempt runs in its own task and hands its result back over a
//! `oneshot` channel. The supervisor waits on that channel and on the
//! cancellation token at once; after cancellation it still drains the
//! channel for a bounded time, so an attempt that finished right as the
//! token fired is kept.

use crate::error::{Error, Result};
use crate::recorder::{AttemptOutcome, CaptureAttempt, Recorder};
use crate::models::Program;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Default retry ceiling (attempts = 1 + max_retries)
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Default delay between two attempts
pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(10);

/// Extra time the supervisor waits on top of the capture pipeline's own drain
pub const DRAIN_MARGIN: Duration = Duration::from_secs(2);

/// Default bound on the wait for an in-flight attempt after cancellation.
///
/// Strictly longer than [`crate::capture::DEFAULT_DRAIN_TIMEOUT`], so the
/// pipeline gives up (and reports) before the supervisor does.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(
    crate::capture::DEFAULT_DRAIN_TIMEOUT.as_secs() + DRAIN_MARGIN.as_secs(),
);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Duration,
    pub drain_timeout: Duration,
}

impl RetryPolicy {
    /// Drain bound for the capture pipeline nested inside an attempt
    pub fn capture_drain_timeout(&self) -> Duration {
        self.drain_timeout.saturating_sub(DRAIN_MARGIN)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            backoff: DEFAULT_BACKOFF,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Recording,
    Retrying,
    Success,
    Exhausted,
    Cancelled,
    Aborted,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Success | Self::Exhausted | Self::Cancelled | Self::Aborted
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Recording => "recording",
            Self::Retrying => "retrying",
            Self::Success => "success",
            Self::Exhausted => "exhausted",
            Self::Cancelled => "cancelled",
            Self::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// Attempts gathered by a session, in capture order
#[derive(Debug, Clone)]
pub struct SessionResult {
    pub attempts: Vec<CaptureAttempt>,
    pub state: SessionState,
    pub last_error: Option<String>,
}

impl SessionResult {
    /// Program of the earliest captured segment
    pub fn program(&self) -> Option<&Program> {
        self.attempts.first().map(|a| &a.program)
    }
}

/// Output path of attempt number `retry`
pub fn attempt_path(temp_dir: &Path, retry: u32) -> PathBuf {
    temp_dir.join(format!("radiko_{}.m4a", retry))
}

pub struct Session {
    recorder: Arc<dyn Recorder>,
    temp_dir: PathBuf,
    policy: RetryPolicy,
    state: SessionState,
}

impl Session {
    pub fn new(recorder: Arc<dyn Recorder>, temp_dir: impl Into<PathBuf>) -> Self {
        Self {
            recorder,
            temp_dir: temp_dir.into(),
            policy: RetryPolicy::default(),
            state: SessionState::Idle,
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run attempts until one completes, the ceiling is reached, an
    /// unrecoverable error occurs or `cancel` fires.
    ///
    /// Fails with [`Error::EmptyOutputs`] when no attempt left a file.
    pub async fn run(&mut self, cancel: &CancellationToken) -> Result<SessionResult> {
        tokio::fs::create_dir_all(&self.temp_dir).await?;

        let mut attempts = Vec::new();
        let mut last_error = None;
        let mut retry = 0;
        self.state = SessionState::Idle;

        loop {
            if cancel.is_cancelled() {
                self.state = SessionState::Cancelled;
                break;
            }

            self.state = SessionState::Recording;
            let output = attempt_path(&self.temp_dir, retry);
            info!(retry, output = %output.display(), "Starting attempt");

            match self.attempt(cancel, output).await {
                Ok(attempt) => {
                    let outcome = attempt.outcome.clone();
                    info!(retry, output = %attempt.output.display(), ?outcome, "Attempt produced output");
                    attempts.push(attempt);
                    match outcome {
                        AttemptOutcome::Completed => {
                            self.state = SessionState::Success;
                            break;
                        }
                        AttemptOutcome::Killed => {
                            self.state = SessionState::Cancelled;
                            break;
                        }
                        AttemptOutcome::Failed(cause) => last_error = Some(cause),
                    }
                }
                Err(Error::Cancelled) => {
                    self.state = SessionState::Cancelled;
                    break;
                }
                Err(e) if !e.is_retryable() => {
                    error!(retry, "Attempt failed, not retrying: {}", e);
                    last_error = Some(e.to_string());
                    self.state = SessionState::Aborted;
                    break;
                }
                Err(e) => {
                    warn!(retry, "Attempt failed: {}", e);
                    last_error = Some(e.to_string());
                }
            }

            if cancel.is_cancelled() {
                self.state = SessionState::Cancelled;
                break;
            }
            if retry >= self.policy.max_retries {
                self.state = SessionState::Exhausted;
                break;
            }

            self.state = SessionState::Retrying;
            debug!(backoff = ?self.policy.backoff, "Waiting before next attempt");
            tokio::select! {
                _ = cancel.cancelled() => {
                    self.state = SessionState::Cancelled;
                    break;
                }
                _ = tokio::time::sleep(self.policy.backoff) => {}
            }
            retry += 1;
        }

        info!(
            state = %self.state,
            attempts = attempts.len(),
            "Session finished"
        );

        if attempts.is_empty() {
            return Err(Error::EmptyOutputs(match &last_error {
                Some(cause) => format!("session {} without output, last error: {}", self.state, cause),
                None => format!("session {} without output", self.state),
            }));
        }

        Ok(SessionResult {
            attempts,
            state: self.state,
            last_error,
        })
    }

    async fn attempt(&self, cancel: &CancellationToken, output: PathBuf) -> Result<CaptureAttempt> {
        let (tx, mut rx) = oneshot::channel();
        let recorder = Arc::clone(&self.recorder);
        let task_cancel = cancel.clone();
        tokio::spawn(async move {
            let result = recorder.record(task_cancel, output).await;
            let _ = tx.send(result);
        });

        tokio::select! {
            result = &mut rx => result.unwrap_or_else(|_| {
                Err(Error::capture("recording task ended without reporting"))
            }),
            _ = cancel.cancelled() => {
                match tokio::time::timeout(self.policy.drain_timeout, rx).await {
                    Ok(Ok(result)) => result,
                    _ => {
                        warn!("Attempt did not report within the drain timeout");
                        Err(Error::Cancelled)
                    }
                }
            }
        }
    }
}
