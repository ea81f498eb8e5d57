use std::{
    collections::HashSet,
    path::{Path, PathBuf},
};

use async_trait::async_trait;

use crate::{
    metadata::{Format, ItemRecord},
    naming::derive_stem,
    progress::CancelToken,
    util::{self, DownloadError},
    worker::PipelineError,
    ytdlp::ResolutionError,
};

/// An item together with the stream chosen for it.
#[derive(Debug, Clone)]
pub struct ResolvedStream {
    pub record: ItemRecord,
    pub format: Format,
}

/// One transfer: a stream and where it goes.
#[derive(Debug, Clone)]
pub struct DownloadJob {
    pub record: ItemRecord,
    pub format: Format,
    pub path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct DownloadedFile {
    pub record: ItemRecord,
    pub path: PathBuf,
    pub bytes: u64,
}

/// Resolves URLs into items and fetches their audio.
#[async_trait]
pub trait MediaSource: Send + Sync {
    /// Lists the items behind `url` in playlist order. A single video yields
    /// one item.
    async fn resolve(&self, url: &str) -> Result<Vec<ItemRecord>, ResolutionError>;

    /// Picks the audio stream for an item. The returned record carries the
    /// container extension of that stream.
    async fn select_stream(&self, item: &ItemRecord) -> Result<ResolvedStream, DownloadError>;

    /// Writes the stream to `job.path`, returning the number of bytes.
    async fn transfer(&self, job: &DownloadJob) -> Result<u64, DownloadError>;
}

/// Appends " (2)", " (3)", ... until the stem is unused in this run.
fn unique_stem(stem: String, used: &mut HashSet<String>) -> String {
    if used.insert(stem.clone()) {
        return stem;
    }
    let mut n = 2;
    loop {
        let candidate = format!("{} ({})", stem, n);
        if used.insert(candidate.clone()) {
            return candidate;
        }
        n += 1;
    }
}

/// Downloads every item behind `url` into `dest_dir`, one after the other.
///
/// `on_progress(current, total)` is called once per finished item with
/// `current` running from 1 to `total`. The first failing item aborts the
/// step.
pub async fn download_playlist<S, F>(
    source: &S,
    url: &str,
    dest_dir: &Path,
    cancel: &CancelToken,
    mut on_progress: F,
) -> Result<Vec<DownloadedFile>, PipelineError>
where
    S: MediaSource + ?Sized,
    F: FnMut(usize, usize),
{
    let items = source
        .resolve(url)
        .await
        .map_err(|source| PipelineError::Resolution {
            url: url.to_string(),
            source,
        })?;

    let total = items.len();
    info!("Resolved {} item(s) from {}", total, url);

    util::ensure_dir(dest_dir).await?;

    let mut used_stems = HashSet::new();
    let mut downloaded = Vec::with_capacity(total);

    for (index, item) in items.iter().enumerate() {
        cancel.check()?;

        let download_err = |e| PipelineError::Download {
            url: item.source_url.clone(),
            source: e,
        };

        let stream = source.select_stream(item).await.map_err(download_err)?;
        let ext = stream
            .record
            .container_ext
            .clone()
            .filter(|e| !e.is_empty())
            .unwrap_or_else(|| stream.format.ext.clone());
        let stem = unique_stem(derive_stem(&stream.record), &mut used_stems);

        let job = DownloadJob {
            path: dest_dir.join(format!("{}.{}", stem, ext)),
            record: stream.record,
            format: stream.format,
        };

        info!(
            "[{}/{}] Downloading {} -> {}",
            index + 1,
            total,
            job.record.source_url,
            job.path.display()
        );
        let bytes = source.transfer(&job).await.map_err(download_err)?;
        debug!("Wrote {} to {}", util::format_bytes(bytes), job.path.display());

        downloaded.push(DownloadedFile {
            record: job.record,
            path: job.path,
            bytes,
        });
        on_progress(index + 1, total);
    }

    Ok(downloaded)
}
