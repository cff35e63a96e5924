//! radiko live recorder for PMORadiko
//!
//! This crate records the program currently airing on a radiko station into
//! a single audio file, with its schedule metadata saved alongside.
//!
//! # Features
//!
//! - **Authentication**: the four-step radiko handshake (player bundle, key
//!   extraction, `auth1_fms`, `auth2_fms`) yielding a token and a region
//! - **Program Lookup**: today's schedule for a region and the program on air
//! - **Capture**: `rtmpdump` piped into `ffmpeg` (or `avconv`), stream copy
//! - **Retries**: a session supervisor re-authenticating and re-capturing up to
//!   5 times, keeping every partial segment
//! - **Merge**: segments of a multi-attempt session joined with the decoder's
//!   `concat:` protocol
//! - **Persistence**: `<ft>_<station>/podcast.m4a` plus a `podcast.xml` sidecar
//!
//! Everything long-running takes a shared [`CancellationToken`]: cancelling it
//! aborts HTTP requests, kills the capture process and stops further retries,
//! while keeping the segments already on disk.
//!
//! # Example
//!
//! ```no_run
//! use pmoradiko::{
//!     CapturePipeline, ConcatMerger, Converter, Radiko, RadikoClient, RadikoRecorder,
//! };
//! use std::path::Path;
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let converter = Converter::lookup()?;
//!     let client = RadikoClient::new().await?;
//!
//!     let recorder = RadikoRecorder::new(client, CapturePipeline::new(converter.clone()), "TBS");
//!     let merger = ConcatMerger::new(converter, "tmp");
//!     let mut radiko = Radiko::new(Arc::new(recorder), Arc::new(merger), "tmp");
//!
//!     let recording = radiko.run(&CancellationToken::new()).await?;
//!     let saved = recording.save(Path::new("podcasts")).await?;
//!     println!("Saved {}", saved.audio_path.display());
//!     Ok(())
//! }
//! ```
//!
//! # Configuration Extension
//!
//! With the default `pmoconfig` feature, [`RadikoConfigExt`] reads the station,
//! directories and retry settings from the `radiko` section of the
//! configuration.
//!
//! [`CancellationToken`]: tokio_util::sync::CancellationToken

pub mod auth;
pub mod capture;
pub mod client;
pub mod error;
pub mod merge;
pub mod models;
pub mod radiko;
pub mod recorder;
pub mod recording;
pub mod session;
pub mod tools;

#[cfg(feature = "pmoconfig")]
pub mod config_ext;

// Re-exports
pub use auth::{AuthToken, Region};
pub use capture::{CapturePipeline, CaptureRequest};
pub use client::{ClientBuilder, RadikoClient};
pub use error::{Error, Result};
pub use merge::{ConcatMerger, SegmentMerger};
pub use models::{Program, Schedule, StationSchedule};
pub use radiko::Radiko;
pub use recorder::{
    AttemptOutcome, CaptureAttempt, Clock, FixedClock, RadikoRecorder, Recorder, SystemClock,
};
pub use recording::{PersistedProgram, Recording};
pub use session::{RetryPolicy, Session, SessionResult, SessionState};
pub use tools::{Converter, ProcessSpec};

#[cfg(feature = "pmoconfig")]
pub use config_ext::RadikoConfigExt;
