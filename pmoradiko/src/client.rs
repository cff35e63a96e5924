//! HTTP client for the radiko API
//!
//! This module provides the client used for the authentication handshake
//! (see [`crate::auth`]) and for schedule lookups.
//!
//! Every round-trip takes the session's [`CancellationToken`]: cancelling it
//! drops the in-flight request, which aborts the underlying connection.
//!
//! # Example
//!
//! ```no_run
//! use pmoradiko::RadikoClient;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = RadikoClient::new().await?;
//!     let cancel = CancellationToken::new();
//!
//!     let (_token, region) = client.authenticate(&cancel).await?;
//!     let now = chrono::Local::now().naive_local();
//!     let program = client.current_program(&cancel, &region, "TBS", now).await?;
//!     println!("On air: {}", program.title);
//!     Ok(())
//! }
//! ```

use crate::auth::Region;
use crate::error::{Error, Result};
use crate::models::{Program, Schedule};
use chrono::NaiveDateTime;
use reqwest::{Client, RequestBuilder, Response};
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

/// Default radiko API base URL
pub const DEFAULT_API_BASE: &str = "https://radiko.jp";

/// Player bundle holding the authentication key, also sent to the capture tool
pub const DEFAULT_PLAYER_URL: &str = "http://radiko.jp/apps/js/flash/myplayer-release.swf";

/// Default timeout for HTTP requests (30 seconds)
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Default User-Agent
pub const DEFAULT_USER_AGENT: &str = "PMORadiko/0.1.0 (pmoradiko)";

/// radiko HTTP client
///
/// Cheap to clone; clones share the connection pool.
#[derive(Debug, Clone)]
pub struct RadikoClient {
    pub(crate) client: Client,
    api_base: String,
    pub(crate) player_url: String,
    pub(crate) extractor: Option<PathBuf>,
    pub(crate) temp_dir: Option<PathBuf>,
}

impl RadikoClient {
    /// Create a new client with default settings
    pub async fn new() -> Result<Self> {
        Self::builder().build().await
    }

    /// Create a builder for configuring the client
    pub fn builder() -> ClientBuilder {
        ClientBuilder::default()
    }

    /// Get the API base URL
    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    pub(crate) fn api_url(&self, path: &str) -> String {
        format!("{}{}", self.api_base.trim_end_matches('/'), path)
    }

    /// Send a request and check its status, unless `cancel` fires first
    pub(crate) async fn send(
        &self,
        cancel: &CancellationToken,
        stage: &'static str,
        request: RequestBuilder,
    ) -> Result<Response> {
        let response = cancellable(cancel, async {
            request.send().await.map_err(|e| Error::transport(stage, e))
        })
        .await?;

        let status = response.status();
        debug!(stage, status = status.as_u16(), url = %response.url(), "radiko response");

        if !status.is_success() {
            return Err(Error::HttpStatus {
                stage,
                status: status.as_u16(),
                url: response.url().to_string(),
            });
        }
        Ok(response)
    }

    // ========================================================================
    // Program lookup
    // ========================================================================

    /// Fetch today's schedule for `region`
    pub async fn today_programs(
        &self,
        cancel: &CancellationToken,
        region: &Region,
    ) -> Result<Schedule> {
        let url = Url::parse_with_params(
            &self.api_url("/v2/api/program/today"),
            &[("area_id", region.as_str())],
        )?;
        debug!(%url, "Fetching today's programs");

        let response = self.send(cancel, "schedule", self.client.get(url)).await?;
        let body = cancellable(cancel, async {
            response
                .text()
                .await
                .map_err(|e| Error::transport("schedule", e))
        })
        .await?;

        Schedule::from_xml(&body)
    }

    /// The program airing on `station` at `now`
    pub async fn current_program(
        &self,
        cancel: &CancellationToken,
        region: &Region,
        station: &str,
        now: NaiveDateTime,
    ) -> Result<Program> {
        self.today_programs(cancel, region)
            .await?
            .current_program(station, now)
    }

    /// Ids of the stations visible from the caller's region
    pub async fn station_list(&self, cancel: &CancellationToken) -> Result<Vec<String>> {
        let (_, region) = self.authenticate(cancel).await?;
        Ok(self.today_programs(cancel, &region).await?.station_ids())
    }
}

/// Run `future` unless `cancel` fires first.
///
/// The future is dropped on cancellation, which aborts HTTP requests.
pub(crate) async fn cancellable<T, F>(cancel: &CancellationToken, future: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled),
        result = future => result,
    }
}

/// Builder for configuring a RadikoClient
#[derive(Debug)]
pub struct ClientBuilder {
    client: Option<Client>,
    api_base: String,
    player_url: String,
    extractor: Option<PathBuf>,
    temp_dir: Option<PathBuf>,
    timeout: Duration,
    user_agent: String,
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self {
            client: None,
            api_base: DEFAULT_API_BASE.to_string(),
            player_url: DEFAULT_PLAYER_URL.to_string(),
            extractor: None,
            temp_dir: None,
            timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl ClientBuilder {
    /// Create a new builder with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a custom HTTP client
    pub fn client(mut self, client: Client) -> Self {
        self.client = Some(client);
        self
    }

    /// Set the API base URL (auth and schedule endpoints live under it)
    pub fn api_base(mut self, url: impl Into<String>) -> Self {
        self.api_base = url.into();
        self
    }

    /// Set the URL the player bundle is downloaded from
    pub fn player_url(mut self, url: impl Into<String>) -> Self {
        self.player_url = url.into();
        self
    }

    /// Use this key extraction tool instead of `swfextract` from `PATH`
    pub fn extractor(mut self, path: impl Into<PathBuf>) -> Self {
        self.extractor = Some(path.into());
        self
    }

    /// Directory for the handshake's scratch files (system temp dir by default)
    pub fn temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = Some(dir.into());
        self
    }

    /// Set the request timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set a custom User-Agent header
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Build the client
    pub async fn build(self) -> Result<RadikoClient> {
        let client = match self.client {
            Some(client) => client,
            None => Client::builder()
                .user_agent(&self.user_agent)
                .timeout(self.timeout)
                .build()
                .map_err(|e| Error::transport("client", e))?,
        };

        Ok(RadikoClient {
            client,
            api_base: self.api_base,
            player_url: self.player_url,
            extractor: self.extractor,
            temp_dir: self.temp_dir,
        })
    }
}
