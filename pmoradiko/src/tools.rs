//! External tools: lookup on `PATH`, decoder templates and process specs
//!
//! The core never links against a codec. It drives three command line tools:
//! the key extractor (`swfextract`), the stream capture tool (`rtmpdump`) and
//! a decoder (`ffmpeg` or `avconv`). The decoder is resolved once at startup;
//! its kind decides the argument template used for decoding and concatenation.

use crate::error::{Error, Result};
use std::env;
use std::ffi::OsStr;
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::process::Command;

/// Decoder binaries accepted, in lookup order
pub const CONVERTER_CANDIDATES: &[&str] = &["ffmpeg", "avconv"];

/// A program and its arguments, ready to be turned into a [`Command`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl ProcessSpec {
    pub fn new<I, S>(program: impl Into<PathBuf>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// A fresh `tokio` command; stdio is left for the caller to wire
    pub fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args);
        command
    }
}

impl fmt::Display for ProcessSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Find `tool` in the directories listed by `PATH`
pub fn find_in_path(tool: &str) -> Option<PathBuf> {
    let path_var = env::var_os("PATH")?;
    for dir in env::split_paths(&path_var) {
        let full = dir.join(tool);
        if full.is_file() {
            return Some(full);
        }
        #[cfg(windows)]
        {
            let exe = dir.join(format!("{tool}.exe"));
            if exe.is_file() {
                return Some(exe);
            }
        }
    }
    None
}

/// Resolve a tool that may have been given explicitly, else look it up on `PATH`
pub(crate) fn resolve_tool(explicit: Option<&Path>, name: &str) -> Option<PathBuf> {
    match explicit {
        Some(path) if path.components().count() > 1 => Some(path.to_path_buf()),
        Some(path) => find_in_path(&path.to_string_lossy()),
        None => find_in_path(name),
    }
}

/// The decoder resolved at startup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Converter {
    Ffmpeg(PathBuf),
    Avconv(PathBuf),
}

impl Converter {
    /// Locate `ffmpeg`, then `avconv`, on `PATH`
    pub fn lookup() -> Result<Self> {
        for candidate in CONVERTER_CANDIDATES {
            if let Some(path) = find_in_path(candidate) {
                tracing::info!(converter = %path.display(), "Resolved decoder");
                return Self::from_path(path);
            }
        }
        Err(Error::Config(format!(
            "no decoder found on PATH (tried {})",
            CONVERTER_CANDIDATES.join(", ")
        )))
    }

    /// Resolve an explicit decoder and classify it by its file name.
    ///
    /// A bare name is looked up on `PATH`; anything else must be an existing file.
    pub fn from_path(path: impl Into<PathBuf>) -> Result<Self> {
        let requested = path.into();
        let path = resolve_tool(Some(requested.as_path()), "")
            .filter(|path| path.is_file())
            .ok_or_else(|| {
                Error::Config(format!("decoder {} not found", requested.display()))
            })?;
        let stem = path
            .file_stem()
            .and_then(OsStr::to_str)
            .unwrap_or_default()
            .to_string();

        if stem.ends_with("ffmpeg") {
            Ok(Self::Ffmpeg(path))
        } else if stem.ends_with("avconv") {
            Ok(Self::Avconv(path))
        } else {
            Err(Error::Config(format!(
                "decoder must be ffmpeg or avconv, got {}",
                path.display()
            )))
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            Self::Ffmpeg(path) | Self::Avconv(path) => path,
        }
    }

    /// Decode stdin into `output`, copying the audio stream.
    ///
    /// Only the ffmpeg template tags the file; avconv gets the bare copy.
    pub fn decode_spec(&self, output: &Path, title: &str, author: &str) -> ProcessSpec {
        let output = output.to_string_lossy().into_owned();
        match self {
            Self::Ffmpeg(path) => ProcessSpec::new(
                path.clone(),
                [
                    "-y".to_string(),
                    "-i".into(),
                    "-".into(),
                    "-vn".into(),
                    "-acodec".into(),
                    "copy".into(),
                    "-metadata".into(),
                    format!("title={}", title),
                    "-metadata".into(),
                    format!("artist={}", author),
                    "-metadata".into(),
                    "genre=radio".into(),
                    output,
                ],
            ),
            Self::Avconv(path) => ProcessSpec::new(
                path.clone(),
                ["-y", "-i", "-", "-vn", "-c:a", "copy", output.as_str()],
            ),
        }
    }

    /// Concatenate `inputs` (in order) into `output` without re-encoding
    pub fn concat_spec(&self, inputs: &[PathBuf], output: &Path) -> ProcessSpec {
        let joined = inputs
            .iter()
            .map(|p| p.to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("|");

        ProcessSpec::new(
            self.path().to_path_buf(),
            [
                "-y".to_string(),
                "-i".into(),
                format!("concat:{}", joined),
                "-acodec".into(),
                "copy".into(),
                output.to_string_lossy().into_owned(),
            ],
        )
    }
}
