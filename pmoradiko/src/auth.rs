//! radiko authentication handshake
//!
//! Obtaining a streaming token takes four steps, each a separate failure point:
//!
//! 1. download the player bundle to a temporary file
//! 2. extract the key resource (`-b 12`) from it with `swfextract`
//! 3. `auth1_fms`: the provider answers with a token plus an offset and a
//!    length into the key resource
//! 4. `auth2_fms`: send back the token and the base64 of those key bytes;
//!    the body is a comma-separated record whose first field is the region
//!
//! Both temporary files are [`NamedTempFile`]s and disappear when the call
//! returns, whatever the outcome.

use crate::client::{cancellable, RadikoClient};
use crate::error::{Error, Result};
use crate::tools::resolve_tool;
use base64::Engine;
use std::fmt;
use std::io::{ErrorKind, SeekFrom};
use std::path::Path;
use tempfile::NamedTempFile;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Default key extraction tool
pub const EXTRACTOR: &str = "swfextract";

/// Index of the binary resource holding the key inside the player bundle
pub const KEY_RESOURCE_INDEX: &str = "12";

/// Identification headers mandated by the provider
pub const APP_HEADERS: [(&str, &str); 4] = [
    ("X-Radiko-App", "pc_ts"),
    ("X-Radiko-App-Version", "4.0.0"),
    ("X-Radiko-User", "test-stream"),
    ("X-Radiko-Device", "pc"),
];

pub const HEADER_AUTHTOKEN: &str = "X-Radiko-Authtoken";
pub const HEADER_KEYLENGTH: &str = "X-Radiko-Keylength";
pub const HEADER_KEYOFFSET: &str = "X-Radiko-Keyoffset";
pub const HEADER_PARTIALKEY: &str = "X-Radiko-Partialkey";

/// Streaming token; valid for a provider-defined time, never persisted
#[derive(Clone, PartialEq, Eq)]
pub struct AuthToken(String);

impl AuthToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AuthToken(..)")
    }
}

/// Provider-assigned area code (e.g. `JP13`) deciding which stations are visible
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Region(String);

impl Region {
    pub fn new(region: impl Into<String>) -> Self {
        Self(region.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What `auth1_fms` hands back
#[derive(Debug)]
struct Challenge {
    token: AuthToken,
    key_length: usize,
    key_offset: u64,
}

impl RadikoClient {
    /// Run the full handshake and return a fresh token and the caller's region
    pub async fn authenticate(&self, cancel: &CancellationToken) -> Result<(AuthToken, Region)> {
        let bundle = self.scratch_file().await?;
        self.download_player(cancel, bundle.path()).await?;

        let key_file = self.scratch_file().await?;
        self.extract_key(cancel, bundle.path(), key_file.path())
            .await?;

        let challenge = self.auth1(cancel).await?;
        let partial_key =
            read_partial_key(key_file.path(), challenge.key_offset, challenge.key_length).await?;

        let region = self.auth2(cancel, &challenge.token, &partial_key).await?;
        info!(%region, "Authenticated");

        Ok((challenge.token, region))
    }

    async fn scratch_file(&self) -> Result<NamedTempFile> {
        match &self.temp_dir {
            Some(dir) => {
                tokio::fs::create_dir_all(dir).await?;
                Ok(NamedTempFile::new_in(dir)?)
            }
            None => Ok(NamedTempFile::new()?),
        }
    }

    async fn download_player(&self, cancel: &CancellationToken, dest: &Path) -> Result<()> {
        debug!(url = %self.player_url, "Downloading player bundle");
        let response = self
            .send(cancel, "player", self.client.get(&self.player_url))
            .await?;
        let bytes = cancellable(cancel, async {
            response
                .bytes()
                .await
                .map_err(|e| Error::transport("player", e))
        })
        .await?;
        tokio::fs::write(dest, &bytes).await?;
        Ok(())
    }

    async fn extract_key(
        &self,
        cancel: &CancellationToken,
        bundle: &Path,
        dest: &Path,
    ) -> Result<()> {
        let extractor = resolve_tool(self.extractor.as_deref(), EXTRACTOR).ok_or_else(|| {
            Error::Extraction(format!("{} not found on PATH", EXTRACTOR))
        })?;

        let mut command = Command::new(&extractor);
        command
            .arg("-b")
            .arg(KEY_RESOURCE_INDEX)
            .arg(bundle)
            .arg("-o")
            .arg(dest)
            .kill_on_drop(true);
        debug!(extractor = %extractor.display(), "Extracting key resource");

        let output = cancellable(cancel, async {
            command.output().await.map_err(|e| {
                Error::Extraction(format!("failed to run {}: {}", extractor.display(), e))
            })
        })
        .await?;

        if !output.status.success() {
            return Err(Error::Extraction(format!(
                "{} exited with {}: {}",
                extractor.display(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }

    async fn auth1(&self, cancel: &CancellationToken) -> Result<Challenge> {
        let mut request = self
            .client
            .post(self.api_url("/v2/api/auth1_fms"))
            .header("pragma", "no-cache");
        for (name, value) in APP_HEADERS {
            request = request.header(name, value);
        }

        let response = self.send(cancel, "auth1", request).await?;
        let headers = response.headers();
        let header = |name: &str| -> Result<String> {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
                .ok_or_else(|| Error::protocol(format!("auth1: {} header is missing", name)))
        };

        let token = AuthToken::new(header(HEADER_AUTHTOKEN)?);
        let key_length = header(HEADER_KEYLENGTH)?
            .parse::<usize>()
            .map_err(|e| Error::protocol(format!("auth1: invalid key length: {}", e)))?;
        let key_offset = header(HEADER_KEYOFFSET)?
            .parse::<u64>()
            .map_err(|e| Error::protocol(format!("auth1: invalid key offset: {}", e)))?;

        debug!(key_length, key_offset, "auth1 challenge received");
        Ok(Challenge {
            token,
            key_length,
            key_offset,
        })
    }

    async fn auth2(
        &self,
        cancel: &CancellationToken,
        token: &AuthToken,
        partial_key: &str,
    ) -> Result<Region> {
        let mut request = self
            .client
            .post(self.api_url("/v2/api/auth2_fms"))
            .header("pragma", "no-cache");
        for (name, value) in APP_HEADERS {
            request = request.header(name, value);
        }
        let request = request
            .header(HEADER_AUTHTOKEN, token.as_str())
            .header(HEADER_PARTIALKEY, partial_key);

        let response = self.send(cancel, "auth2", request).await?;
        let body = cancellable(cancel, async {
            response
                .text()
                .await
                .map_err(|e| Error::transport("auth2", e))
        })
        .await?;

        parse_region(&body)
    }
}

/// Base64 of `length` bytes read at `offset` in the extracted key resource
pub async fn read_partial_key(path: &Path, offset: u64, length: usize) -> Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let size = file.metadata().await?.len();

    // Bounds are checked before anything is allocated
    let in_range = u64::try_from(length)
        .ok()
        .and_then(|length| offset.checked_add(length))
        .is_some_and(|end| end <= size);
    if !in_range {
        return Err(Error::protocol(format!(
            "partial key out of range (offset {}, length {}, key file {} bytes)",
            offset, length, size
        )));
    }

    file.seek(SeekFrom::Start(offset)).await?;
    let mut key = vec![0u8; length];
    match file.read_exact(&mut key).await {
        Ok(_) => Ok(base64::engine::general_purpose::STANDARD.encode(&key)),
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => Err(Error::protocol(format!(
            "partial key out of range (offset {}, length {})",
            offset, length
        ))),
        Err(e) => Err(e.into()),
    }
}

/// Region from the `auth2_fms` body, e.g. `JP13,東京都,tokyo Japan`.
///
/// Needs at least three fields; anything after the third is ignored.
pub fn parse_region(body: &str) -> Result<Region> {
    let line = body
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or_default();
    let fields: Vec<&str> = line.split(',').map(str::trim).collect();

    match fields.first() {
        Some(region) if fields.len() >= 3 && !region.is_empty() => Ok(Region::new(*region)),
        _ => Err(Error::protocol("failed to auth")),
    }
}
