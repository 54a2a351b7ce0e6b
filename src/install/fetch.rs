//! Archive download and extraction.

use std::{
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
    time::Duration,
};

use flate2::read::GzDecoder;
use futures_util::StreamExt as _;
use reqwest::header::LAST_MODIFIED;
use tempfile::{NamedTempFile, TempDir};
use tracing::{debug, info};

use crate::{config::Config, error::SandboxError};

/// Remote archive metadata, fetched per update check and never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteArchiveMeta {
    pub url: String,
    pub last_modified: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct Fetcher {
    http: reqwest::Client,
}

impl Fetcher {
    /// Only the connect phase is bounded; archive bodies may take as long as
    /// the transport allows.
    pub fn new(connect_timeout: Duration) -> Result<Self, SandboxError> {
        let http = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| SandboxError::fetch("<client>", e))?;
        Ok(Self { http })
    }

    pub fn from_config(cfg: &Config) -> Result<Self, SandboxError> {
        let timeout = cfg.get_u64("REQUEST_TIMEOUT").unwrap_or(60);
        Self::new(Duration::from_secs(timeout))
    }

    pub async fn remote_meta(&self, url: &str) -> Result<RemoteArchiveMeta, SandboxError> {
        let resp = self
            .http
            .head(url)
            .send()
            .await
            .map_err(|e| SandboxError::fetch(url, e))?;
        if !resp.status().is_success() {
            return Err(SandboxError::fetch(url, format!("HTTP {}", resp.status())));
        }
        let last_modified = resp
            .headers()
            .get(LAST_MODIFIED)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_http_date);
        Ok(RemoteArchiveMeta { url: url.to_string(), last_modified })
    }

    /// Downloads `url` into `dest_dir` under the URL's basename.
    pub async fn download(&self, url: &str, dest_dir: &Path) -> Result<PathBuf, SandboxError> {
        let tmp = self.fetch_to_temp(url, dest_dir).await?;
        let target = dest_dir.join(archive_file_name(url));
        tmp.persist(&target)
            .map_err(|e| SandboxError::io(format!("moving download to {}", target.display()), e.error))?;
        Ok(target)
    }

    /// Downloads a gzip tarball and unpacks it into a fresh staging directory
    /// under `dest_dir`. Nothing else in `dest_dir` is touched, so a failed
    /// install leaves no partial tree behind. The archive itself never
    /// outlives this call.
    pub async fn download_and_stage(&self, url: &str, dest_dir: &Path) -> Result<TempDir, SandboxError> {
        let tmp = self.fetch_to_temp(url, dest_dir).await?;
        let staging = tempfile::Builder::new()
            .prefix(".staging-")
            .tempdir_in(dest_dir)
            .map_err(|e| SandboxError::io(format!("creating staging dir in {}", dest_dir.display()), e))?;
        let owned_url = url.to_string();
        let staging = tokio::task::spawn_blocking(move || {
            let res = extract_tgz(tmp.path(), staging.path());
            drop(tmp);
            res.map(|()| staging)
                .map_err(|e| SandboxError::fetch(&owned_url, format!("extraction failed: {e}")))
        })
        .await
        .map_err(|e| SandboxError::fetch(url, format!("extraction task failed: {e}")))??;
        info!(url, staging = %staging.path().display(), "extracted archive");
        Ok(staging)
    }

    async fn fetch_to_temp(&self, url: &str, dest_dir: &Path) -> Result<NamedTempFile, SandboxError> {
        fs::create_dir_all(dest_dir)
            .map_err(|e| SandboxError::io(format!("creating {}", dest_dir.display()), e))?;

        debug!(url, "downloading");
        let resp = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| SandboxError::fetch(url, e))?;
        if !resp.status().is_success() {
            return Err(SandboxError::fetch(url, format!("HTTP {}", resp.status())));
        }
        let expected = resp.content_length();

        let mut tmp = NamedTempFile::new_in(dest_dir)
            .map_err(|e| SandboxError::io(format!("creating temp file in {}", dest_dir.display()), e))?;
        let mut written: u64 = 0;
        let mut stream = resp.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let bytes = chunk.map_err(|e| SandboxError::fetch(url, format!("stream error: {e}")))?;
            tmp.write_all(&bytes)
                .map_err(|e| SandboxError::io("writing download", e))?;
            written += bytes.len() as u64;
        }
        tmp.flush().map_err(|e| SandboxError::io("writing download", e))?;

        if let Some(expected) = expected {
            if written != expected {
                return Err(SandboxError::fetch(
                    url,
                    format!("truncated download: got {written} of {expected} bytes"),
                ));
            }
        }
        debug!(url, bytes = written, "download complete");
        Ok(tmp)
    }
}

/// Moves the staged directory named like `target` into place, replacing
/// whatever was there. The rest of the staging tree is discarded.
pub fn promote(staging: TempDir, target: &Path) -> Result<(), SandboxError> {
    let name = target.file_name().ok_or_else(|| {
        SandboxError::io(format!("{} has no file name", target.display()), io::ErrorKind::InvalidInput.into())
    })?;
    let staged = staging.path().join(name);
    if !staged.is_dir() {
        return Err(SandboxError::io(
            format!("archive has no {} directory", Path::new(name).display()),
            io::ErrorKind::NotFound.into(),
        ));
    }
    if target.exists() {
        debug!(target = %target.display(), "replacing incomplete install");
        fs::remove_dir_all(target)
            .map_err(|e| SandboxError::io(format!("removing {}", target.display()), e))?;
    }
    fs::rename(&staged, target)
        .map_err(|e| SandboxError::io(format!("moving {} into place", target.display()), e))
}

/// Unpacks a `.tgz` / `.tar.gz` into `dest_dir`, keeping its directory layout.
pub fn extract_tgz(archive: &Path, dest_dir: &Path) -> std::io::Result<()> {
    fs::create_dir_all(dest_dir)?;
    let file = fs::File::open(archive)?;
    let mut tar = tar::Archive::new(GzDecoder::new(file));
    tar.set_preserve_permissions(true);
    tar.unpack(dest_dir)
}

pub fn archive_file_name(url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    path.rsplit('/')
        .find(|s| !s.is_empty())
        .filter(|s| !s.contains(':'))
        .unwrap_or("download")
        .to_string()
}

fn parse_http_date(value: &str) -> Option<i64> {
    chrono::DateTime::parse_from_rfc2822(value.trim())
        .ok()
        .map(|d| d.timestamp())
}
