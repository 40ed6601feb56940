/*============================================================
  Synavera Project: Syn-Mod
  Module: synmod_core::feed
  Etiquette: Synavera Script Etiquette — Rust Profile v1.1.1
  ------------------------------------------------------------
  Purpose:
    Query a NuGet v3 flat-container feed for the latest published
    version of a package, bypassing a PowerShell host round-trip.

  Security / Safety Notes:
    Performs read-only HTTPS requests to the configured feed.
    No credentials are transmitted.

  Dependencies:
    reqwest for HTTP, serde for response parsing, urlencoding for
    package identifiers.

  Operational Scope:
    Optional; used by the registry client when `[feed] url` is set.

  Revision History:
    2025-11-12 COD  Adapted retrying HTTP client to flat-container feeds.
  ------------------------------------------------------------
  SSE Principles Observed:
    - Retry with exponential backoff on transient statuses
    - Structured response parsing with explicit error paths
============================================================*/

use std::time::Duration;

use reqwest::StatusCode;
use serde::Deserialize;
use tokio::time::sleep;
use urlencoding::encode;

use crate::config::FeedConfig;
use crate::error::{Result, SynmodError};
use crate::registry::RemoteVersionInfo;
use crate::version::ModuleVersion;

/// Client for a NuGet v3 flat-container endpoint.
#[derive(Clone)]
pub struct FeedClient {
    client: reqwest::Client,
    base_url: String,
    max_retries: usize,
}

#[derive(Debug, Deserialize)]
struct FlatContainerIndex {
    #[serde(default)]
    versions: Vec<String>,
}

impl FeedClient {
    pub fn new(base_url: &str, config: &FeedConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout.max(1)))
            .user_agent(concat!("Syn-Mod-Core/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|err| SynmodError::Network(format!("Failed to build HTTP client: {err}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            max_retries: config.max_retries.max(1),
        })
    }

    fn compose_url(&self, package: &str) -> String {
        format!(
            "{}/{}/index.json",
            self.base_url,
            encode(&package.to_ascii_lowercase())
        )
    }

    /// Latest stable version; `Ok(None)` when the feed does not know the id.
    pub async fn find_latest(&self, package: &str) -> Result<Option<RemoteVersionInfo>> {
        let url = self.compose_url(package);
        let mut attempt = 0;
        loop {
            let response = self.client.get(&url).send().await.map_err(|err| {
                SynmodError::Network(format!("Feed request to {url} failed: {err}"))
            })?;

            match response.status() {
                StatusCode::OK => {
                    let index = response.json::<FlatContainerIndex>().await.map_err(|err| {
                        SynmodError::Serialization(format!(
                            "Failed to decode feed index {url}: {err}"
                        ))
                    })?;
                    return Ok(latest_stable(&index.versions).map(|version| {
                        RemoteVersionInfo {
                            package: package.to_string(),
                            version,
                        }
                    }));
                }
                StatusCode::NOT_FOUND => return Ok(None),
                status => {
                    attempt += 1;
                    if attempt >= self.max_retries {
                        return Err(SynmodError::Network(format!(
                            "Feed request {url} failed with status {status} after {attempt} attempts"
                        )));
                    }
                    sleep(backoff(attempt)).await;
                }
            }
        }
    }
}

fn backoff(attempt: usize) -> Duration {
    let exponent = (attempt as u32).min(8);
    Duration::from_millis(200_u64.saturating_mul(1_u64 << exponent))
}

/// Highest non-prerelease entry; unparsable entries are ignored.
fn latest_stable(versions: &[String]) -> Option<ModuleVersion> {
    versions
        .iter()
        .filter_map(|raw| raw.parse::<ModuleVersion>().ok())
        .filter(|version| !version.is_prerelease())
        .max()
}
