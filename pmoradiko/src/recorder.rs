//! One capture attempt, from authentication to a file on disk

use crate::capture::{CapturePipeline, CaptureRequest};
use crate::client::RadikoClient;
use crate::error::{Error, Result};
use crate::models::Program;
use async_trait::async_trait;
use chrono::NaiveDateTime;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Default trailing buffer added to the remaining airtime
pub const DEFAULT_BUFFER_SECS: i64 = 60;

/// Default bitrate label
pub const DEFAULT_BITRATE: &str = "64k";

/// How an attempt that left a usable file ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// The pipeline exited cleanly
    Completed,
    /// The pipeline failed but left a partial file
    Failed(String),
    /// The capture was killed by cancellation
    Killed,
}

/// An output file produced by one attempt, with the program it belongs to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureAttempt {
    pub output: PathBuf,
    pub program: Program,
    pub station: String,
    pub outcome: AttemptOutcome,
}

impl CaptureAttempt {
    pub fn is_complete(&self) -> bool {
        self.outcome == AttemptOutcome::Completed
    }
}

/// Performs a single capture attempt into `output`.
///
/// Implementations return `Ok` only when `output` exists and is non-empty.
#[async_trait]
pub trait Recorder: Send + Sync {
    async fn record(&self, cancel: CancellationToken, output: PathBuf) -> Result<CaptureAttempt>;
}

/// Source of the current local time
pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> NaiveDateTime;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        chrono::Local::now().naive_local()
    }
}

/// A clock stuck at a given instant
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub NaiveDateTime);

impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        self.0
    }
}

/// Recorder backed by the radiko API and a [`CapturePipeline`]
///
/// Every attempt re-authenticates and re-resolves the program on air, so a
/// retry that lands in the next program records that one instead.
#[derive(Debug, Clone)]
pub struct RadikoRecorder {
    client: RadikoClient,
    pipeline: CapturePipeline,
    station: String,
    bitrate: String,
    buffer_secs: i64,
    clock: Arc<dyn Clock>,
}

impl RadikoRecorder {
    pub fn new(client: RadikoClient, pipeline: CapturePipeline, station: impl Into<String>) -> Self {
        Self {
            client,
            pipeline,
            station: station.into(),
            bitrate: DEFAULT_BITRATE.to_string(),
            buffer_secs: DEFAULT_BUFFER_SECS,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_bitrate(mut self, bitrate: impl Into<String>) -> Self {
        self.bitrate = bitrate.into();
        self
    }

    pub fn with_buffer_secs(mut self, buffer_secs: i64) -> Self {
        self.buffer_secs = buffer_secs;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn station(&self) -> &str {
        &self.station
    }
}

#[async_trait]
impl Recorder for RadikoRecorder {
    async fn record(&self, cancel: CancellationToken, output: PathBuf) -> Result<CaptureAttempt> {
        let (token, region) = self.client.authenticate(&cancel).await?;

        let now = self.clock.now();
        let program = self
            .client
            .current_program(&cancel, &region, &self.station, now)
            .await?;
        let duration_secs = capture_duration(program.remaining_secs(now)?, self.buffer_secs);

        info!(
            station = %self.station,
            title = %program.title,
            ft = %program.ft,
            to = %program.to,
            duration_secs,
            "Recording program"
        );

        let request = CaptureRequest {
            token,
            station: self.station.clone(),
            duration_secs,
            bitrate: self.bitrate.clone(),
            output: output.clone(),
            title: program.display_title()?,
            author: program.pfm.clone(),
        };
        let result = self.pipeline.capture(&cancel, &request).await;

        check_output(output, program, &self.station, result, cancel.is_cancelled()).await
    }
}

/// Seconds to capture: what is left of the program plus the buffer, at least 1
pub fn capture_duration(remaining_secs: i64, buffer_secs: i64) -> u64 {
    remaining_secs.saturating_add(buffer_secs).max(1) as u64
}

/// Turn a pipeline result into an attempt, keeping any non-empty output.
///
/// A missing or empty file is a failure whatever the pipeline reported.
pub(crate) async fn check_output(
    output: PathBuf,
    program: Program,
    station: &str,
    result: Result<()>,
    cancelled: bool,
) -> Result<CaptureAttempt> {
    if !has_content(&output).await {
        return Err(match result {
            Err(e) => e,
            Ok(()) => Error::capture(format!("{} was not produced", output.display())),
        });
    }

    let outcome = match result {
        Ok(()) => AttemptOutcome::Completed,
        Err(_) if cancelled => AttemptOutcome::Killed,
        Err(e) => {
            warn!(output = %output.display(), "Keeping partial capture: {}", e);
            AttemptOutcome::Failed(e.to_string())
        }
    };

    Ok(CaptureAttempt {
        output,
        program,
        station: station.to_string(),
        outcome,
    })
}

async fn has_content(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file() && m.len() > 0)
        .unwrap_or(false)
}
