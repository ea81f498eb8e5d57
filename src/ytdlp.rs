use std::{
    path::{Path, PathBuf},
    process::Stdio,
    time::Duration,
};

use async_trait::async_trait;
use tokio::process::Command;
use tokio_retry::{
    strategy::{jitter, ExponentialBackoff},
    RetryIf,
};

use crate::{
    download::{DownloadJob, MediaSource, ResolvedStream},
    metadata::{self, ItemRecord, ResolvedInfo},
    util::{DownloadError, HttpClient},
};

/// yt-dlp messages that no amount of retrying will fix.
const PERMANENT_FAILURES: &[&str] = &[
    "Unsupported URL",
    "Private video",
    "Video unavailable",
    "does not exist",
    "This video has been removed",
    "Sign in to confirm your age",
];

#[derive(thiserror::Error, Debug)]
pub enum ResolutionError {
    #[error("could not run yt-dlp: {0}")]
    IoError(#[from] std::io::Error),
    #[error("yt-dlp failed for {url}: {stderr}")]
    ProcessError { url: String, stderr: String },
    #[error("invalid yt-dlp output: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("no downloadable item behind {url}")]
    NoItem { url: String },
}

impl ResolutionError {
    fn is_transient(&self) -> bool {
        match self {
            ResolutionError::ProcessError { stderr, .. } => {
                !PERMANENT_FAILURES.iter().any(|m| stderr.contains(m))
            }
            _ => false,
        }
    }
}

/// Resolves URLs with the `yt-dlp` executable and fetches the selected audio
/// stream over HTTP.
pub struct YtDlp {
    binary: PathBuf,
    client: HttpClient,
    max_retries: usize,
}

impl YtDlp {
    pub fn new(binary: impl Into<PathBuf>, max_retries: u32) -> reqwest::Result<Self> {
        Ok(Self {
            binary: binary.into(),
            client: HttpClient::new(max_retries)?,
            max_retries: max_retries as usize,
        })
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    pub async fn version(&self) -> std::io::Result<String> {
        let output = Command::new(&self.binary).arg("--version").output().await?;
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Runs yt-dlp in metadata-only mode. `flat` lists playlist entries
    /// without visiting every item page.
    async fn dump_json(&self, url: &str, flat: bool) -> Result<ResolvedInfo, ResolutionError> {
        let mut cmd = Command::new(&self.binary);
        cmd.args(dump_json_args(url, flat))
            .stdin(Stdio::null())
            .kill_on_drop(true);

        debug!("Running {} {:?}", self.binary.display(), dump_json_args(url, flat));
        let output = cmd.output().await?;

        if !output.status.success() {
            return Err(ResolutionError::ProcessError {
                url: url.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(serde_json::from_slice(&output.stdout)?)
    }

    async fn dump_json_with_retry(
        &self,
        url: &str,
        flat: bool,
    ) -> Result<ResolvedInfo, ResolutionError> {
        let strategy = ExponentialBackoff::from_millis(10)
            .factor(50)
            .max_delay(Duration::from_secs(10))
            .map(jitter)
            .take(self.max_retries);

        RetryIf::spawn(
            strategy,
            || async move {
                let res = self.dump_json(url, flat).await;
                if let Err(e) = &res {
                    warn!("yt-dlp attempt for {} failed: {}", url, e);
                }
                res
            },
            ResolutionError::is_transient,
        )
        .await
    }
}

fn dump_json_args(url: &str, flat: bool) -> Vec<&str> {
    let mut args = vec!["-J", "--no-warnings"];
    args.push(if flat { "--flat-playlist" } else { "--no-playlist" });
    args.push("--");
    args.push(url);
    args
}

/// Item records behind a resolved payload. An empty playlist has no items,
/// but a single video that yields no record could not be resolved.
fn items_from(info: ResolvedInfo, url: &str) -> Result<Vec<ItemRecord>, ResolutionError> {
    if info.is_playlist() {
        return Ok(info.into_items());
    }
    info.to_item()
        .map(|item| vec![item])
        .ok_or_else(|| ResolutionError::NoItem {
            url: url.to_string(),
        })
}

#[async_trait]
impl MediaSource for YtDlp {
    async fn resolve(&self, url: &str) -> Result<Vec<ItemRecord>, ResolutionError> {
        let info = self.dump_json_with_retry(url, true).await?;
        if info.is_playlist() {
            info!(
                "Playlist \"{}\"",
                info.title.as_deref().unwrap_or("untitled")
            );
        }
        items_from(info, url)
    }

    async fn select_stream(&self, item: &ItemRecord) -> Result<ResolvedStream, DownloadError> {
        let info = self
            .dump_json_with_retry(&item.source_url, false)
            .await
            .map_err(|e| DownloadError::MetadataError {
                url: item.source_url.clone(),
                message: e.to_string(),
            })?;

        let format = metadata::select_audio_format(&info.formats)
            .ok_or_else(|| DownloadError::NoAudioStream(item.source_url.clone()))?
            .clone();

        let mut record = info.merge_item(item);
        if !format.ext.is_empty() {
            record.container_ext = Some(format.ext.clone());
        }

        debug!(
            "Selected format {} ({}, {:?} kbps) for {}",
            format.format_id, format.ext, format.abr, item.source_url
        );

        Ok(ResolvedStream { record, format })
    }

    async fn transfer(&self, job: &DownloadJob) -> Result<u64, DownloadError> {
        let url = job
            .format
            .url
            .as_deref()
            .ok_or_else(|| DownloadError::NoAudioStream(job.record.source_url.clone()))?;

        self.client
            .download_file(url, &job.format.http_headers, &job.path)
            .await
    }
}
