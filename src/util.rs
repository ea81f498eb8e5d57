use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Arc,
};

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest_cookie_store::CookieStoreMutex;
use reqwest_middleware::ClientWithMiddleware;
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use tokio::{fs::File, io::AsyncWriteExt};

pub struct HttpClient {
    pub client: ClientWithMiddleware,
    pub cookies: Arc<CookieStoreMutex>,
}

#[derive(thiserror::Error, Debug)]
pub enum DownloadError {
    #[error("reqwest error: {0}")]
    ReqwestError(#[from] reqwest::Error),
    #[error("reqwest middleware error: {0}")]
    ReqwestMiddlewareError(#[from] reqwest_middleware::Error),
    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("could not fetch metadata for {url}: {message}")]
    MetadataError { url: String, message: String },
    #[error("no downloadable audio stream for {0}")]
    NoAudioStream(String),
}

#[derive(thiserror::Error, Debug)]
pub enum FilesystemError {
    #[error("could not create directory {}: {source}", path.display())]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("could not read directory {}: {source}", path.display())]
    ReadDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("could not delete converted source {}: {source}", path.display())]
    RemoveSource {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Creates `dir` and its parents if they do not exist yet.
pub async fn ensure_dir(dir: &Path) -> Result<(), FilesystemError> {
    if tokio::fs::try_exists(dir).await.unwrap_or(false) {
        return Ok(());
    }
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|source| FilesystemError::CreateDir {
            path: dir.to_path_buf(),
            source,
        })?;
    info!("Created directory {}", dir.display());
    Ok(())
}

impl HttpClient {
    pub fn new(max_retries: u32) -> reqwest::Result<HttpClient> {
        let cookies = Arc::new(CookieStoreMutex::default());
        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(max_retries);

        let client = reqwest::Client::builder()
            .cookie_provider(cookies.clone())
            .build()?;

        let client = reqwest_middleware::ClientBuilder::new(client)
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        Ok(HttpClient { client, cookies })
    }

    /// Streams `url` into `path`. The body goes to `{path}.part` first and is
    /// renamed once complete, so `path` never holds a partial file.
    pub async fn download_file(
        &self,
        url: &str,
        headers: &HashMap<String, String>,
        path: &Path,
    ) -> Result<u64, DownloadError> {
        let temp_path = part_path(path);
        let mut resp = self
            .client
            .get(url)
            .headers(header_map(headers))
            .send()
            .await?
            .error_for_status()?;

        let mut file = File::create(&temp_path).await?;
        let mut size = 0;

        let written: Result<(), DownloadError> = async {
            while let Some(chunk) = resp.chunk().await? {
                file.write_all(&chunk).await?;
                size += chunk.len() as u64;
            }
            file.flush().await?;
            Ok(())
        }
        .await;

        if let Err(e) = written {
            drop(file);
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(e);
        }

        drop(file);
        tokio::fs::rename(&temp_path, path).await?;

        Ok(size)
    }
}

/// Sibling path with `.part` appended to the full file name.
pub fn part_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    path.with_file_name(name)
}

fn header_map(headers: &HashMap<String, String>) -> HeaderMap {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                map.insert(name, value);
            }
            _ => debug!("Ignoring invalid header {}", name),
        }
    }
    map
}

pub fn format_bytes(bytes: u64) -> String {
    let mut bytes = bytes as f64;
    let mut suffix = "B";

    if bytes > 1024.0 {
        bytes /= 1024.0;
        suffix = "KiB";
    }
    if bytes > 1024.0 {
        bytes /= 1024.0;
        suffix = "MiB";
    }
    if bytes > 1024.0 {
        bytes /= 1024.0;
        suffix = "GiB";
    }
    if bytes > 1024.0 {
        bytes /= 1024.0;
        suffix = "TiB";
    }

    format!("{:.2} {}", bytes, suffix)
}
