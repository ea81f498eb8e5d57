use std::{
    collections::BTreeSet,
    path::{Path, PathBuf},
    sync::Arc,
};

use tokio::{sync::watch, task::JoinHandle};

use crate::{
    config::Config,
    convert::{self, ConvertOptions, Transcoder},
    download::{self, MediaSource},
    ffmpeg::ConversionError,
    progress::{CancelToken, Phase, ProgressReporter, ProgressState},
    stats::RunSummary,
    util::{DownloadError, FilesystemError},
    ytdlp::ResolutionError,
};

#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error("could not resolve {url}: {source}")]
    Resolution {
        url: String,
        source: ResolutionError,
    },
    #[error("could not download {url}: {source}")]
    Download { url: String, source: DownloadError },
    #[error("could not convert {}: {source}", path.display())]
    Conversion {
        path: PathBuf,
        source: ConversionError,
    },
    #[error(transparent)]
    Filesystem(#[from] FilesystemError),
    #[error("{} file(s) failed to convert: {}", .0.len(), .0.join("; "))]
    ConversionFailures(Vec<String>),
    #[error("cancelled")]
    Cancelled,
    #[error("worker task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[derive(Debug, Clone)]
pub struct RunRequest {
    /// Playlist or single video URL.
    pub url: String,
    /// Where the downloaded containers land.
    pub download_dir: PathBuf,
}

/// Runs download and conversion for one request on a background task.
pub struct Controller {
    config: Config,
    source: Arc<dyn MediaSource>,
    transcoder: Arc<dyn Transcoder>,
}

/// Handle on a started run.
pub struct RunHandle {
    progress: watch::Receiver<ProgressState>,
    cancel: CancelToken,
    task: JoinHandle<Result<RunSummary, PipelineError>>,
}

impl RunHandle {
    pub fn progress(&self) -> watch::Receiver<ProgressState> {
        self.progress.clone()
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Stops the run before the next item.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub async fn wait(self) -> Result<RunSummary, PipelineError> {
        self.task.await?
    }
}

impl Controller {
    pub fn new(
        config: Config,
        source: Arc<dyn MediaSource>,
        transcoder: Arc<dyn Transcoder>,
    ) -> Self {
        Self {
            config,
            source,
            transcoder,
        }
    }

    /// Spawns the worker. `on_error` is called once with a readable message
    /// if the run ends in [`Phase::Failed`].
    ///
    /// Must be called from within a tokio runtime.
    pub fn start<E>(&self, request: RunRequest, on_error: E) -> RunHandle
    where
        E: FnOnce(String) + Send + 'static,
    {
        let (reporter, progress) = ProgressReporter::new();
        let cancel = CancelToken::new();

        let config = self.config.clone();
        let source = Arc::clone(&self.source);
        let transcoder = Arc::clone(&self.transcoder);
        let token = cancel.clone();

        let task = tokio::spawn(async move {
            let mut outcome = Outcome {
                reporter,
                on_error: Some(on_error),
            };
            let result = run(
                &config,
                source.as_ref(),
                transcoder.as_ref(),
                &request,
                &outcome.reporter,
                &token,
            )
            .await;

            match &result {
                Ok(summary) => {
                    outcome.succeed();
                    info!(
                        "Finished {}: {} downloaded, {} converted",
                        request.url, summary.files_downloaded, summary.files_converted
                    );
                }
                Err(e) => {
                    error!("Run for {} failed: {}", request.url, e);
                    outcome.fail(e.to_string());
                }
            }

            result
        });

        RunHandle {
            progress,
            cancel,
            task,
        }
    }
}

/// Final phase of a run. If the worker unwinds before either outcome was
/// reported, dropping this marks the run failed.
struct Outcome<E: FnOnce(String)> {
    reporter: ProgressReporter,
    on_error: Option<E>,
}

impl<E: FnOnce(String)> Outcome<E> {
    fn succeed(&mut self) {
        self.on_error = None;
        self.reporter.finish(Phase::Done);
    }

    fn fail(&mut self, message: String) {
        self.reporter.finish(Phase::Failed);
        if let Some(on_error) = self.on_error.take() {
            on_error(message);
        }
    }
}

impl<E: FnOnce(String)> Drop for Outcome<E> {
    fn drop(&mut self) {
        if self.on_error.is_some() {
            error!("Worker stopped before finishing the run");
            self.fail("worker stopped unexpectedly".to_string());
        }
    }
}

/// Containers present among the downloads, falling back to the configured
/// ones when nothing was downloaded.
fn source_extensions(downloads: &[download::DownloadedFile], fallback: &[String]) -> Vec<String> {
    let found: BTreeSet<String> = downloads
        .iter()
        .filter_map(|f| f.path.extension())
        .map(|e| e.to_string_lossy().to_lowercase())
        .collect();

    if found.is_empty() {
        fallback.to_vec()
    } else {
        found.into_iter().collect()
    }
}

async fn run(
    config: &Config,
    source: &dyn MediaSource,
    transcoder: &dyn Transcoder,
    request: &RunRequest,
    reporter: &ProgressReporter,
    cancel: &CancelToken,
) -> Result<RunSummary, PipelineError> {
    let download_dir: &Path = &request.download_dir;

    reporter.begin(Phase::Downloading);
    let downloads = download::download_playlist(
        source,
        &request.url,
        download_dir,
        cancel,
        |current, total| reporter.update(current, total),
    )
    .await?;

    reporter.begin(Phase::Converting);
    let options = ConvertOptions {
        bitrate: config.bitrate.clone(),
        extensions: source_extensions(&downloads, &config.source_extensions),
        policy: config.error_policy,
    };
    let output_dir = config.output_dir.as_deref().unwrap_or(download_dir);
    let report = convert::convert_directory(
        transcoder,
        download_dir,
        output_dir,
        &options,
        cancel,
        |current, total| reporter.update(current, total),
    )
    .await?;

    if !report.failures.is_empty() {
        return Err(PipelineError::ConversionFailures(
            report
                .failures
                .iter()
                .map(|(_, e)| e.to_string())
                .collect(),
        ));
    }

    Ok(RunSummary {
        files_downloaded: downloads.len() as u64,
        bytes_downloaded: downloads.iter().map(|f| f.bytes).sum(),
        files_converted: report.converted.len() as u64,
    })
}
