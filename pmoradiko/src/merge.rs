//! Joining the segments of a multi-attempt session into one file

use crate::error::{Error, Result};
use crate::recorder::{AttemptOutcome, CaptureAttempt};
use crate::tools::Converter;
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use tracing::{error, info};

/// File name of the merged output inside the temporary directory
pub const CONCAT_FILE_NAME: &str = "radiko_concat.m4a";

/// Joins capture segments, in order, into a single attempt.
///
/// The result carries the first segment's program and station.
#[async_trait]
pub trait SegmentMerger: Send + Sync {
    async fn merge(&self, attempts: &[CaptureAttempt]) -> Result<CaptureAttempt>;
}

/// Merger running the decoder's `concat:` protocol with a stream copy
#[derive(Debug, Clone)]
pub struct ConcatMerger {
    converter: Converter,
    temp_dir: PathBuf,
}

impl ConcatMerger {
    pub fn new(converter: Converter, temp_dir: impl Into<PathBuf>) -> Self {
        Self {
            converter,
            temp_dir: temp_dir.into(),
        }
    }

    pub fn output_path(&self) -> PathBuf {
        self.temp_dir.join(CONCAT_FILE_NAME)
    }
}

#[async_trait]
impl SegmentMerger for ConcatMerger {
    async fn merge(&self, attempts: &[CaptureAttempt]) -> Result<CaptureAttempt> {
        let first = attempts
            .first()
            .ok_or_else(|| Error::EmptyOutputs("nothing to merge".into()))?;

        let inputs: Vec<PathBuf> = attempts.iter().map(|a| a.output.clone()).collect();
        let output = self.output_path();
        let spec = self.converter.concat_spec(&inputs, &output);
        info!(segments = inputs.len(), output = %output.display(), "Merging segments");

        let result = spec
            .command()
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| Error::Merge(format!("failed to run {}: {}", spec.program.display(), e)))?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            error!(status = %result.status, "Merge failed, segments left in place");
            return Err(Error::Merge(format!(
                "{} exited with {}: {}",
                spec.program.display(),
                result.status,
                stderr.trim()
            )));
        }

        if tokio::fs::metadata(&output).await.is_err() {
            return Err(Error::Merge(format!("{} was not produced", output.display())));
        }

        Ok(CaptureAttempt {
            output,
            program: first.program.clone(),
            station: first.station.clone(),
            outcome: AttemptOutcome::Completed,
        })
    }
}
