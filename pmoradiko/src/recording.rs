//! Saving a finished recording as a podcast directory
//!
//! Layout under the output root:
//!
//! ```text
//! <root>/
//!   20240101120000_TBS/
//!     podcast.m4a
//!     podcast.xml
//! ```
//!
//! The directory name depends only on the program start and the station, so
//! saving the same program twice lands in the same place.

use crate::error::{Error, Result};
use crate::models::Program;
use crate::recorder::CaptureAttempt;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};

/// Audio file name inside a program directory
pub const AUDIO_FILE_NAME: &str = "podcast.m4a";

/// Metadata sidecar file name inside a program directory
pub const METADATA_FILE_NAME: &str = "podcast.xml";

/// The final audio file of a session and the program it holds
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recording {
    pub audio_path: PathBuf,
    pub program: Program,
    pub station: String,
}

impl From<CaptureAttempt> for Recording {
    fn from(attempt: CaptureAttempt) -> Self {
        Self {
            audio_path: attempt.output,
            program: attempt.program,
            station: attempt.station,
        }
    }
}

/// A program saved on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedProgram {
    pub directory: PathBuf,
    pub audio_path: PathBuf,
    pub metadata_path: PathBuf,
    pub program: Program,
}

impl Recording {
    /// `{ft}_{station}`
    pub fn directory_name(&self) -> String {
        format!("{}_{}", self.program.ft, self.station)
    }

    /// Move the audio into its program directory under `root` and write the
    /// sidecar next to it.
    ///
    /// A sidecar failure after the audio has been moved is reported but the
    /// move is not undone.
    pub async fn save(self, root: &Path) -> Result<PersistedProgram> {
        let metadata = self
            .program
            .to_metadata_xml()
            .map_err(|e| Error::Persistence(format!("cannot encode metadata: {}", e)))?;

        let directory = root.join(self.directory_name());
        fs::create_dir_all(&directory)
            .await
            .map_err(|e| persistence("create", &directory, e))?;

        let audio_path = directory.join(AUDIO_FILE_NAME);
        move_file(&self.audio_path, &audio_path).await?;

        let metadata_path = directory.join(METADATA_FILE_NAME);
        let staging = directory.join(format!(".{}.part", METADATA_FILE_NAME));
        fs::write(&staging, metadata.as_bytes())
            .await
            .map_err(|e| persistence("write", &staging, e))?;
        fs::rename(&staging, &metadata_path)
            .await
            .map_err(|e| persistence("rename", &metadata_path, e))?;

        info!(
            directory = %directory.display(),
            title = %self.program.title,
            "Program saved"
        );

        Ok(PersistedProgram {
            directory,
            audio_path,
            metadata_path,
            program: self.program,
        })
    }
}

impl PersistedProgram {
    /// Read back a program directory written by [`Recording::save`]
    pub async fn load(directory: impl Into<PathBuf>) -> Result<Self> {
        let directory = directory.into();
        let metadata_path = directory.join(METADATA_FILE_NAME);
        let audio_path = directory.join(AUDIO_FILE_NAME);

        let xml = fs::read_to_string(&metadata_path)
            .await
            .map_err(|e| persistence("read", &metadata_path, e))?;
        let program = Program::from_metadata_xml(&xml)?;

        if !fs::try_exists(&audio_path).await.unwrap_or(false) {
            return Err(Error::Persistence(format!(
                "{} is missing",
                audio_path.display()
            )));
        }

        Ok(Self {
            directory,
            audio_path,
            metadata_path,
            program,
        })
    }
}

/// Rename, or copy then remove when the rename crosses filesystems
async fn move_file(from: &Path, to: &Path) -> Result<()> {
    match fs::rename(from, to).await {
        Ok(()) => Ok(()),
        Err(e) => {
            debug!(from = %from.display(), to = %to.display(), "rename failed ({}), copying", e);
            fs::copy(from, to)
                .await
                .map_err(|e| persistence("copy", to, e))?;
            if let Err(e) = fs::remove_file(from).await {
                warn!(path = %from.display(), "Copied but could not remove source: {}", e);
            }
            Ok(())
        }
    }
}

fn persistence(action: &str, path: &Path, e: std::io::Error) -> Error {
    Error::Persistence(format!("cannot {} {}: {}", action, path.display(), e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recorder::AttemptOutcome;
    use tempfile::TempDir;

    fn recording(audio_path: PathBuf) -> Recording {
        Recording {
            audio_path,
            program: Program {
                ft: "20240101120000".into(),
                to: "20240101130000".into(),
                ftl: "1200".into(),
                tol: "1300".into(),
                dur: "3600".into(),
                title: "Morning Show".into(),
                pfm: "Host B".into(),
                desc: "Talk & music".into(),
                ..Default::default()
            },
            station: "TEST1".into(),
        }
    }

    #[test]
    fn test_directory_name() {
        let recording = recording(PathBuf::from("radiko_0.m4a"));
        assert_eq!(recording.directory_name(), "20240101120000_TEST1");
    }

    #[test]
    fn test_from_attempt() {
        let attempt = CaptureAttempt {
            output: PathBuf::from("/tmp/radiko_concat.m4a"),
            program: Program::default(),
            station: "TBS".into(),
            outcome: AttemptOutcome::Completed,
        };
        let recording = Recording::from(attempt);
        assert_eq!(recording.audio_path, PathBuf::from("/tmp/radiko_concat.m4a"));
        assert_eq!(recording.station, "TBS");
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let temp = TempDir::new().unwrap();
        let root = TempDir::new().unwrap();
        let audio = temp.path().join("radiko_0.m4a");
        std::fs::write(&audio, b"audio").unwrap();

        let saved = recording(audio.clone()).save(root.path()).await.unwrap();

        assert_eq!(saved.directory, root.path().join("20240101120000_TEST1"));
        assert_eq!(std::fs::read(&saved.audio_path).unwrap(), b"audio");
        assert!(!audio.exists());
        assert!(!saved.directory.join(".podcast.xml.part").exists());

        let loaded = PersistedProgram::load(&saved.directory).await.unwrap();
        assert_eq!(loaded, saved);
        assert_eq!(loaded.program.title, "Morning Show");
        assert_eq!(loaded.program.desc, "Talk & music");
    }

    #[tokio::test]
    async fn test_save_into_existing_directory() {
        let temp = TempDir::new().unwrap();
        let root = TempDir::new().unwrap();
        std::fs::create_dir_all(root.path().join("20240101120000_TEST1")).unwrap();

        for round in 0..2 {
            let audio = temp.path().join(format!("radiko_{}.m4a", round));
            std::fs::write(&audio, format!("take {}", round)).unwrap();
            let saved = recording(audio).save(root.path()).await.unwrap();
            assert_eq!(
                std::fs::read_to_string(&saved.audio_path).unwrap(),
                format!("take {}", round)
            );
        }
    }

    #[tokio::test]
    async fn test_save_missing_audio_fails() {
        let root = TempDir::new().unwrap();
        let result = recording(root.path().join("nope.m4a"))
            .save(root.path())
            .await;
        assert!(matches!(result, Err(Error::Persistence(_))));
    }

    #[tokio::test]
    async fn test_load_without_audio_fails() {
        let root = TempDir::new().unwrap();
        let dir = root.path().join("20240101120000_TEST1");
        std::fs::create_dir_all(&dir).unwrap();
        let xml = recording(PathBuf::new()).program.to_metadata_xml().unwrap();
        std::fs::write(dir.join(METADATA_FILE_NAME), xml).unwrap();

        assert!(matches!(
            PersistedProgram::load(&dir).await,
            Err(Error::Persistence(_))
        ));
    }
}
