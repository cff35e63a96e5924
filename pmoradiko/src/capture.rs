//! Capture pipeline: stream capture process piped into the decoder
//!
//! One capture runs two child processes. The decoder starts first with its
//! stdin piped; that pipe becomes the capture tool's stdout, so bytes flow
//! straight from one process to the other and backpressure goes through the
//! kernel pipe.
//!
//! ```text
//! rtmpdump --live ... -o -  ──pipe──▶  ffmpeg -i - ... radiko_N.m4a
//! ```
//!
//! Cancelling the token kills the capture process. The decoder then sees
//! end of input, finalizes what it has and exits, and its status is still
//! collected before the pipeline reports.

use crate::auth::AuthToken;
use crate::client::DEFAULT_PLAYER_URL;
use crate::error::{Error, Result};
use crate::tools::{resolve_tool, Converter, ProcessSpec};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Default stream capture tool
pub const CAPTURE_TOOL: &str = "rtmpdump";

/// Provider streaming endpoint
pub const STREAM_URL: &str = "rtmpe://f-radiko.smartstream.ne.jp";

/// Play path of the simulcast stream
pub const PLAYPATH: &str = "simul-stream.stream";

/// Default bound on the wait for an in-flight pipeline after cancellation
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Arguments of the stream capture process
///
/// Three empty connection parameters precede the token; the provider expects
/// exactly this shape.
pub fn capture_spec(
    program: impl Into<PathBuf>,
    player_url: &str,
    token: &AuthToken,
    station: &str,
    duration_secs: u64,
) -> ProcessSpec {
    ProcessSpec::new(
        program,
        [
            "--live".to_string(),
            "--quiet".into(),
            "-r".into(),
            STREAM_URL.into(),
            "--playpath".into(),
            PLAYPATH.into(),
            "--app".into(),
            format!("{}/_definst_", station),
            "-W".into(),
            player_url.into(),
            "-C".into(),
            "S:\"\"".into(),
            "-C".into(),
            "S:\"\"".into(),
            "-C".into(),
            "S:\"\"".into(),
            "-C".into(),
            format!("S:{}", token.as_str()),
            "--stop".into(),
            duration_secs.to_string(),
            "-o".into(),
            "-".into(),
        ],
    )
}

/// Everything one capture needs
#[derive(Debug, Clone)]
pub struct CaptureRequest {
    pub token: AuthToken,
    pub station: String,
    pub duration_secs: u64,
    pub bitrate: String,
    pub output: PathBuf,
    pub title: String,
    pub author: String,
}

/// Runs capture/decode process pairs
#[derive(Debug, Clone)]
pub struct CapturePipeline {
    converter: Converter,
    capture_tool: Option<PathBuf>,
    player_url: String,
    drain_timeout: Duration,
}

impl CapturePipeline {
    pub fn new(converter: Converter) -> Self {
        Self {
            converter,
            capture_tool: None,
            player_url: DEFAULT_PLAYER_URL.to_string(),
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        }
    }

    /// Use this capture tool instead of `rtmpdump` from `PATH`
    pub fn with_capture_tool(mut self, path: impl Into<PathBuf>) -> Self {
        self.capture_tool = Some(path.into());
        self
    }

    pub fn with_player_url(mut self, url: impl Into<String>) -> Self {
        self.player_url = url.into();
        self
    }

    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    pub fn converter(&self) -> &Converter {
        &self.converter
    }

    /// Capture `request.duration_secs` of `request.station` into `request.output`.
    ///
    /// The process pair runs in its own task. On cancellation this waits at
    /// most the drain timeout for that task so the real outcome is reported;
    /// only when nothing arrives in time does it return [`Error::Cancelled`].
    pub async fn capture(&self, cancel: &CancellationToken, request: &CaptureRequest) -> Result<()> {
        let tool = resolve_tool(self.capture_tool.as_deref(), CAPTURE_TOOL)
            .ok_or_else(|| Error::Config(format!("{} not found on PATH", CAPTURE_TOOL)))?;

        let capture = capture_spec(
            tool,
            &self.player_url,
            &request.token,
            &request.station,
            request.duration_secs,
        );
        let decode = self
            .converter
            .decode_spec(&request.output, &request.title, &request.author);

        info!(
            station = %request.station,
            duration_secs = request.duration_secs,
            bitrate = %request.bitrate,
            output = %request.output.display(),
            "Starting capture"
        );
        debug!(decoder = %decode, "Decoder command");

        let (tx, mut rx) = oneshot::channel();
        let task_cancel = cancel.clone();
        tokio::spawn(async move {
            let result = run_pipeline(&capture, &decode, &task_cancel).await;
            let _ = tx.send(result);
        });

        tokio::select! {
            result = &mut rx => result.unwrap_or_else(|_| {
                Err(Error::capture("capture task ended without reporting"))
            }),
            _ = cancel.cancelled() => {
                debug!(timeout = ?self.drain_timeout, "Draining capture after cancellation");
                match tokio::time::timeout(self.drain_timeout, rx).await {
                    Ok(Ok(result)) => result,
                    _ => {
                        warn!("Capture did not report within the drain timeout");
                        Err(Error::Cancelled)
                    }
                }
            }
        }
    }
}

async fn run_pipeline(
    capture: &ProcessSpec,
    decode: &ProcessSpec,
    cancel: &CancellationToken,
) -> Result<()> {
    let mut decoder = decode
        .command()
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| spawn_error(&decode.program, e))?;

    let pipe = decoder
        .stdin
        .take()
        .ok_or_else(|| Error::capture("decoder stdin is not piped"))?;
    let pipe: Stdio = pipe
        .try_into()
        .map_err(|e| Error::capture(format!("cannot hand decoder stdin over: {}", e)))?;

    // The command is dropped right after spawning so that the child holds the
    // only write end of the pipe.
    let spawned = {
        let mut command = capture.command();
        command
            .stdin(Stdio::null())
            .stdout(pipe)
            .stderr(Stdio::null())
            .kill_on_drop(true);
        command.spawn()
    };

    let capture_result = match spawned {
        Ok(mut child) => {
            tokio::select! {
                status = child.wait() => match status {
                    Ok(status) if status.success() => Ok(()),
                    Ok(status) => Err(Error::capture(format!(
                        "{} exited with {}",
                        capture.program.display(),
                        status
                    ))),
                    Err(e) => Err(Error::capture(format!(
                        "failed to wait for {}: {}",
                        capture.program.display(),
                        e
                    ))),
                },
                _ = cancel.cancelled() => {
                    warn!(tool = %capture.program.display(), "Cancelled, killing capture process");
                    if let Err(e) = child.kill().await {
                        warn!("Failed to kill capture process: {}", e);
                    }
                    Err(Error::capture(format!(
                        "{} killed on cancellation",
                        capture.program.display()
                    )))
                }
            }
        }
        Err(e) => Err(spawn_error(&capture.program, e)),
    };

    let decoder_result = match decoder.wait().await {
        Ok(status) if status.success() => Ok(()),
        Ok(status) => Err(Error::capture(format!(
            "{} exited with {}",
            decode.program.display(),
            status
        ))),
        Err(e) => Err(Error::capture(format!(
            "failed to wait for {}: {}",
            decode.program.display(),
            e
        ))),
    };

    capture_result.and(decoder_result)
}

fn spawn_error(program: &Path, e: std::io::Error) -> Error {
    Error::capture(format!("failed to start {}: {}", program.display(), e))
}
