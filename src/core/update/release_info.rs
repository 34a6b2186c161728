use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::version::Version;
use crate::core::checksum_manager::ChecksumManager;
use crate::error::{EdgeError, Result};
use crate::platform;

const USER_AGENT: &str = concat!("edgewatch/", env!("CARGO_PKG_VERSION"));
const GITHUB_API: &str = "https://api.github.com";

/// What a release source advertises as the newest build
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateManifest {
    pub version: Version,
    pub download_url: String,
    /// Hex SHA-256 of the artifact
    pub checksum: String,
}

impl UpdateManifest {
    /// File name of the artifact, taken from the last URL segment
    pub fn artifact_name(&self) -> &str {
        self.download_url
            .rsplit('/')
            .next()
            .map(|name| name.split(['?', '#']).next().unwrap_or(name))
            .filter(|name| !name.is_empty())
            .unwrap_or("artifact.bin")
    }
}

/// Where the update manager looks for new releases
#[async_trait]
pub trait ReleaseSource: Send + Sync {
    async fn fetch_manifest(&self) -> Result<UpdateManifest>;

    async fn download(&self, manifest: &UpdateManifest) -> Result<Vec<u8>>;
}

fn http_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .build()
        .map_err(|e| EdgeError::http(format!("failed to build HTTP client: {}", e)))
}

/// Map non-success statuses; 5xx and 429 are worth retrying
async fn check_status(response: Response, what: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let msg = format!("{} returned status {}: {}", what, status, body.trim());
    if status.is_server_error() || status.as_u16() == 429 {
        Err(EdgeError::transient(msg))
    } else {
        Err(EdgeError::http(msg))
    }
}

async fn fetch_bytes(request: RequestBuilder, what: &str) -> Result<Vec<u8>> {
    let response = check_status(request.send().await?, what).await?;
    Ok(response.bytes().await?.to_vec())
}

/// Reads a JSON [`UpdateManifest`] from a fixed URL
pub struct HttpManifestSource {
    client: Client,
    url: String,
}

impl HttpManifestSource {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: http_client(timeout)?,
            url: url.into(),
        })
    }
}

#[async_trait]
impl ReleaseSource for HttpManifestSource {
    async fn fetch_manifest(&self) -> Result<UpdateManifest> {
        let response = check_status(self.client.get(&self.url).send().await?, "manifest").await?;
        let manifest: UpdateManifest = response
            .json()
            .await
            .map_err(|e| EdgeError::http(format!("malformed manifest: {}", e)))?;
        Ok(manifest)
    }

    async fn download(&self, manifest: &UpdateManifest) -> Result<Vec<u8>> {
        fetch_bytes(self.client.get(&manifest.download_url), "artifact download").await
    }
}

#[derive(Debug, Deserialize)]
pub struct ReleaseInfo {
    pub tag_name: String,
    #[serde(default)]
    pub name: Option<String>,
    pub assets: Vec<ReleaseAsset>,
}

#[derive(Debug, Deserialize)]
pub struct ReleaseAsset {
    pub name: String,
    pub browser_download_url: String,
}

impl ReleaseInfo {
    pub fn version(&self) -> Result<Version> {
        self.tag_name.parse()
    }

    /// Artifact and `.sha256` companion for this host
    pub fn platform_assets(&self) -> Result<(&ReleaseAsset, &ReleaseAsset)> {
        let binary_name = platform_artifact_name();
        let checksum_name = format!("{}.sha256", binary_name);

        let binary_asset = self
            .assets
            .iter()
            .find(|asset| asset.name == binary_name)
            .ok_or_else(|| {
                EdgeError::http(format!("asset '{}' not found in release", binary_name))
            })?;

        let checksum_asset = self
            .assets
            .iter()
            .find(|asset| asset.name == checksum_name)
            .ok_or_else(|| {
                EdgeError::http(format!("asset '{}' not found in release", checksum_name))
            })?;

        Ok((binary_asset, checksum_asset))
    }
}

/// Release artifact name for the current platform
pub fn platform_artifact_name() -> String {
    format!("edgewatch-{}.tar.gz", platform::release_target())
}

/// Latest GitHub release of `owner/repo`
pub struct GitHubReleaseSource {
    client: Client,
    repo: String,
    token: Option<String>,
    api_base: String,
}

impl GitHubReleaseSource {
    pub fn new(repo: impl Into<String>, token: Option<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: http_client(timeout)?,
            repo: repo.into(),
            token,
            api_base: GITHUB_API.to_string(),
        })
    }

    /// Point at a GitHub Enterprise or mock API root
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    fn get(&self, url: &str) -> RequestBuilder {
        let request = self.client.get(url);
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn latest_release(&self) -> Result<ReleaseInfo> {
        let url = format!("{}/repos/{}/releases/latest", self.api_base, self.repo);
        let response = check_status(
            self.get(&url)
                .header("Accept", "application/vnd.github+json")
                .send()
                .await?,
            "GitHub API",
        )
        .await?;

        response
            .json()
            .await
            .map_err(|e| EdgeError::http(format!("failed to parse GitHub release JSON: {}", e)))
    }
}

#[async_trait]
impl ReleaseSource for GitHubReleaseSource {
    async fn fetch_manifest(&self) -> Result<UpdateManifest> {
        let release = self.latest_release().await?;
        let version = release.version()?;
        let (binary_asset, checksum_asset) = release.platform_assets()?;

        let checksum_text = fetch_bytes(
            self.get(&checksum_asset.browser_download_url),
            "checksum download",
        )
        .await?;
        let checksum =
            ChecksumManager::parse_checksum_line(&String::from_utf8_lossy(&checksum_text))?;

        log::debug!(
            "Latest release {} ({})",
            version,
            release.name.as_deref().unwrap_or(&release.tag_name)
        );

        Ok(UpdateManifest {
            version,
            download_url: binary_asset.browser_download_url.clone(),
            checksum,
        })
    }

    async fn download(&self, manifest: &UpdateManifest) -> Result<Vec<u8>> {
        fetch_bytes(self.get(&manifest.download_url), "artifact download").await
    }
}
