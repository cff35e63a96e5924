//! High-level entry point tying the session, the merger and the persister together

use crate::error::Result;
use crate::merge::SegmentMerger;
use crate::recorder::Recorder;
use crate::recording::Recording;
use crate::session::{RetryPolicy, Session, SessionState};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Records the program on air into a single file
///
/// ```no_run
/// use pmoradiko::{
///     CapturePipeline, ConcatMerger, Converter, Radiko, RadikoClient, RadikoRecorder,
/// };
/// use std::path::Path;
/// use std::sync::Arc;
/// use tokio_util::sync::CancellationToken;
///
/// # async fn example() -> pmoradiko::Result<()> {
/// let converter = Converter::lookup()?;
/// let client = RadikoClient::new().await?;
/// let recorder = RadikoRecorder::new(client, CapturePipeline::new(converter.clone()), "TBS");
/// let merger = ConcatMerger::new(converter, "tmp");
///
/// let mut radiko = Radiko::new(Arc::new(recorder), Arc::new(merger), "tmp");
/// let recording = radiko.run(&CancellationToken::new()).await?;
/// recording.save(Path::new("podcasts")).await?;
/// # Ok(())
/// # }
/// ```
pub struct Radiko {
    session: Session,
    merger: Arc<dyn SegmentMerger>,
}

impl Radiko {
    pub fn new(
        recorder: Arc<dyn Recorder>,
        merger: Arc<dyn SegmentMerger>,
        temp_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            session: Session::new(recorder, temp_dir),
            merger,
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.session = self.session.with_policy(policy);
        self
    }

    /// State the last session ended in
    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    /// Run a session, then merge its segments when there is more than one
    pub async fn run(&mut self, cancel: &CancellationToken) -> Result<Recording> {
        let result = self.session.run(cancel).await?;
        info!(
            state = %result.state,
            attempts = result.attempts.len(),
            "Session result"
        );

        let attempt = match <[_; 1]>::try_from(result.attempts) {
            Ok([single]) => single,
            Err(attempts) => self.merger.merge(&attempts).await?,
        };
        Ok(Recording::from(attempt))
    }
}
