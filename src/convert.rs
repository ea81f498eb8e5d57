use std::path::{Path, PathBuf};

use async_trait::async_trait;
use futures::TryStreamExt;
use serde::Deserialize;
use tokio_stream::wrappers::ReadDirStream;

use crate::{
    ffmpeg::ConversionError,
    progress::CancelToken,
    util::{self, FilesystemError},
    worker::PipelineError,
};

pub const DEFAULT_BITRATE: &str = "256k";

#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Writes an MP3 rendition of `input` to `output`. `output` must not
    /// exist afterwards unless the call succeeded.
    async fn transcode(
        &self,
        input: &Path,
        output: &Path,
        bitrate: &str,
    ) -> Result<(), ConversionError>;
}

/// What to do when one file fails to convert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorPolicy {
    /// Record the failure and carry on with the next file.
    #[default]
    Continue,
    /// Stop at the first failure.
    Abort,
}

#[derive(Debug, Clone)]
pub struct ConvertOptions {
    pub bitrate: String,
    /// Source container extensions, without the dot.
    pub extensions: Vec<String>,
    pub policy: ErrorPolicy,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        Self {
            bitrate: DEFAULT_BITRATE.to_string(),
            extensions: vec!["webm".to_string()],
            policy: ErrorPolicy::default(),
        }
    }
}

#[derive(Debug, Default)]
pub struct ConversionReport {
    pub converted: Vec<PathBuf>,
    /// Sources that were not converted, or whose MP3 was written but which
    /// could not be deleted afterwards.
    pub failures: Vec<(PathBuf, PipelineError)>,
}

impl ConversionReport {
    fn record(
        &mut self,
        policy: ErrorPolicy,
        source: PathBuf,
        e: PipelineError,
    ) -> Result<(), PipelineError> {
        error!("{}", e);
        match policy {
            ErrorPolicy::Abort => Err(e),
            ErrorPolicy::Continue => {
                self.failures.push((source, e));
                Ok(())
            }
        }
    }
}

fn has_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map_or(false, |ext| {
            extensions.iter().any(|wanted| wanted.eq_ignore_ascii_case(ext))
        })
}

fn mp3_path(dest_dir: &Path, source: &Path) -> PathBuf {
    let mut name = source.file_stem().unwrap_or_default().to_os_string();
    name.push(".mp3");
    dest_dir.join(name)
}

/// Lists the regular files directly inside `dir` with one of the given
/// extensions, sorted by name.
pub async fn scan_sources(
    dir: &Path,
    extensions: &[String],
) -> Result<Vec<PathBuf>, FilesystemError> {
    let read_dir_err = |source| FilesystemError::ReadDir {
        path: dir.to_path_buf(),
        source,
    };

    let entries = tokio::fs::read_dir(dir).await.map_err(read_dir_err)?;
    let mut entries = ReadDirStream::new(entries);
    let mut sources = Vec::new();

    while let Some(entry) = entries.try_next().await.map_err(read_dir_err)? {
        let path = entry.path();
        let is_file = entry
            .file_type()
            .await
            .map(|t| t.is_file())
            .unwrap_or(false);
        if is_file && has_extension(&path, extensions) {
            sources.push(path);
        }
    }

    sources.sort();
    Ok(sources)
}

/// Converts every matching file in `src_dir` into `dest_dir/{stem}.mp3`.
///
/// A source file is removed only after its MP3 was written. `on_progress`
/// runs after every attempted file, whether it converted or not.
pub async fn convert_directory<T, F>(
    transcoder: &T,
    src_dir: &Path,
    dest_dir: &Path,
    options: &ConvertOptions,
    cancel: &CancelToken,
    mut on_progress: F,
) -> Result<ConversionReport, PipelineError>
where
    T: Transcoder + ?Sized,
    F: FnMut(usize, usize),
{
    util::ensure_dir(dest_dir).await?;

    let sources = scan_sources(src_dir, &options.extensions).await?;
    let total = sources.len();
    info!(
        "Converting {} file(s) from {} to {}",
        total,
        src_dir.display(),
        dest_dir.display()
    );

    let mut report = ConversionReport::default();

    for (index, source) in sources.into_iter().enumerate() {
        cancel.check()?;

        let output = mp3_path(dest_dir, &source);
        if output == source {
            warn!("Skipping {}, it would overwrite itself", source.display());
            on_progress(index + 1, total);
            continue;
        }

        match transcoder
            .transcode(&source, &output, &options.bitrate)
            .await
        {
            Ok(()) => {
                info!(
                    "[{}/{}] Converted {} -> {}",
                    index + 1,
                    total,
                    source.display(),
                    output.display()
                );
                match tokio::fs::remove_file(&source).await {
                    Ok(()) => report.converted.push(output),
                    Err(e) => {
                        let e = FilesystemError::RemoveSource {
                            path: source.clone(),
                            source: e,
                        };
                        report.record(options.policy, source, e.into())?;
                    }
                }
            }
            Err(e) => {
                let e = PipelineError::Conversion {
                    path: source.clone(),
                    source: e,
                };
                report.record(options.policy, source, e)?;
            }
        }

        on_progress(index + 1, total);
    }

    Ok(report)
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Mutex;

    use super::*;

    /// Copies the input, failing for file names containing `fail_marker`.
    #[derive(Default)]
    pub(crate) struct FakeTranscoder {
        pub fail_marker: Option<String>,
        pub calls: Mutex<Vec<(PathBuf, String)>>,
    }

    #[async_trait]
    impl Transcoder for FakeTranscoder {
        async fn transcode(
            &self,
            input: &Path,
            output: &Path,
            bitrate: &str,
        ) -> Result<(), ConversionError> {
            self.calls
                .lock()
                .unwrap()
                .push((input.to_path_buf(), bitrate.to_string()));
            let name = input.file_name().unwrap_or_default().to_string_lossy();
            if let Some(marker) = &self.fail_marker {
                if name.contains(marker.as_str()) {
                    return Err(ConversionError::IoError(std::io::Error::new(
                        std::io::ErrorKind::InvalidData,
                        "corrupt input",
                    )));
                }
            }
            tokio::fs::copy(input, output).await?;
            Ok(())
        }
    }

    /// Converts, then leaves a directory where the source was so that it
    /// cannot be removed as a file.
    struct PinningTranscoder;

    #[async_trait]
    impl Transcoder for PinningTranscoder {
        async fn transcode(
            &self,
            input: &Path,
            output: &Path,
            _bitrate: &str,
        ) -> Result<(), ConversionError> {
            tokio::fs::copy(input, output).await?;
            tokio::fs::remove_file(input).await?;
            tokio::fs::create_dir(input).await?;
            Ok(())
        }
    }

    fn touch(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, name.as_bytes()).unwrap();
        path
    }

    #[tokio::test]
    async fn converts_matching_files_and_removes_sources() {
        let dir = tempfile::tempdir().unwrap();
        let a = touch(dir.path(), "Band - A.webm");
        let b = touch(dir.path(), "Band - B.WEBM");
        let other = touch(dir.path(), "notes.txt");
        std::fs::create_dir(dir.path().join("folder.webm")).unwrap();

        let transcoder = FakeTranscoder::default();
        let mut calls = Vec::new();
        let report = convert_directory(
            &transcoder,
            dir.path(),
            dir.path(),
            &ConvertOptions::default(),
            &CancelToken::new(),
            |c, t| calls.push((c, t)),
        )
        .await
        .unwrap();

        assert_eq!(calls, vec![(1, 2), (2, 2)]);
        assert_eq!(
            report.converted,
            vec![dir.path().join("Band - A.mp3"), dir.path().join("Band - B.mp3")]
        );
        assert!(report.failures.is_empty());
        assert!(!a.exists());
        assert!(!b.exists());
        assert!(other.exists());
        assert_eq!(
            transcoder.calls.lock().unwrap()[0].1,
            DEFAULT_BITRATE.to_string()
        );
    }

    #[tokio::test]
    async fn failed_file_keeps_source_and_continues() {
        let dir = tempfile::tempdir().unwrap();
        let a = touch(dir.path(), "a.webm");
        let broken = touch(dir.path(), "b-broken.webm");
        let c = touch(dir.path(), "c.webm");

        let transcoder = FakeTranscoder {
            fail_marker: Some("broken".to_string()),
            ..Default::default()
        };
        let mut calls = Vec::new();
        let report = convert_directory(
            &transcoder,
            dir.path(),
            dir.path(),
            &ConvertOptions::default(),
            &CancelToken::new(),
            |c, t| calls.push((c, t)),
        )
        .await
        .unwrap();

        assert_eq!(calls, vec![(1, 3), (2, 3), (3, 3)]);
        assert_eq!(report.converted.len(), 2);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].0, broken);
        assert!(broken.exists());
        assert!(!dir.path().join("b-broken.mp3").exists());
        assert!(!a.exists());
        assert!(!c.exists());
    }

    #[tokio::test]
    async fn abort_policy_stops_at_first_failure() {
        let dir = tempfile::tempdir().unwrap();
        let broken = touch(dir.path(), "a-broken.webm");
        let b = touch(dir.path(), "b.webm");

        let transcoder = FakeTranscoder {
            fail_marker: Some("broken".to_string()),
            ..Default::default()
        };
        let options = ConvertOptions {
            policy: ErrorPolicy::Abort,
            ..Default::default()
        };
        let mut calls = 0;
        let err = convert_directory(
            &transcoder,
            dir.path(),
            dir.path(),
            &options,
            &CancelToken::new(),
            |_, _| calls += 1,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, PipelineError::Conversion { .. }));
        assert!(err.to_string().contains("a-broken.webm"));
        assert_eq!(calls, 0);
        assert!(broken.exists());
        assert!(b.exists());
    }

    #[tokio::test]
    async fn second_run_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "a.webm");
        let transcoder = FakeTranscoder::default();
        let options = ConvertOptions::default();

        convert_directory(
            &transcoder,
            dir.path(),
            dir.path(),
            &options,
            &CancelToken::new(),
            |_, _| {},
        )
        .await
        .unwrap();

        let mut calls = 0;
        let report = convert_directory(
            &transcoder,
            dir.path(),
            dir.path(),
            &options,
            &CancelToken::new(),
            |_, _| calls += 1,
        )
        .await
        .unwrap();

        assert_eq!(calls, 0);
        assert!(report.converted.is_empty());
        assert_eq!(transcoder.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn writes_into_separate_output_directory() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("mp3");
        touch(dir.path(), "a.m4a");
        let options = ConvertOptions {
            bitrate: "192k".to_string(),
            extensions: vec!["m4a".to_string()],
            ..Default::default()
        };
        let transcoder = FakeTranscoder::default();

        let report = convert_directory(
            &transcoder,
            dir.path(),
            &out,
            &options,
            &CancelToken::new(),
            |_, _| {},
        )
        .await
        .unwrap();

        assert_eq!(report.converted, vec![out.join("a.mp3")]);
        assert_eq!(transcoder.calls.lock().unwrap()[0].1, "192k");
    }

    #[tokio::test]
    async fn cancellation_stops_between_files() {
        let dir = tempfile::tempdir().unwrap();
        let a = touch(dir.path(), "a.webm");
        let cancel = CancelToken::new();
        cancel.cancel();

        let err = convert_directory(
            &FakeTranscoder::default(),
            dir.path(),
            dir.path(),
            &ConvertOptions::default(),
            &cancel,
            |_, _| {},
        )
        .await
        .unwrap_err();
        assert!(matches!(err, PipelineError::Cancelled));
        assert!(a.exists());
    }

    #[tokio::test]
    async fn undeletable_source_is_a_failure() {
        let dir = tempfile::tempdir().unwrap();
        let a = touch(dir.path(), "a.webm");
        let mut calls = Vec::new();

        let report = convert_directory(
            &PinningTranscoder,
            dir.path(),
            dir.path(),
            &ConvertOptions::default(),
            &CancelToken::new(),
            |c, t| calls.push((c, t)),
        )
        .await
        .unwrap();

        assert_eq!(calls, vec![(1, 1)]);
        assert!(report.converted.is_empty());
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].0, a);
        assert!(matches!(
            report.failures[0].1,
            PipelineError::Filesystem(FilesystemError::RemoveSource { .. })
        ));
        assert!(dir.path().join("a.mp3").exists());

        let b = dir.path().join("b.webm");
        std::fs::remove_dir(&a).unwrap();
        std::fs::write(&b, b"b").unwrap();
        let options = ConvertOptions {
            policy: ErrorPolicy::Abort,
            ..Default::default()
        };
        let err = convert_directory(
            &PinningTranscoder,
            dir.path(),
            dir.path(),
            &options,
            &CancelToken::new(),
            |_, _| {},
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("b.webm"));
        assert!(matches!(
            err,
            PipelineError::Filesystem(FilesystemError::RemoveSource { .. })
        ));
    }

    #[tokio::test]
    async fn missing_source_directory_is_a_filesystem_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = convert_directory(
            &FakeTranscoder::default(),
            &dir.path().join("missing"),
            dir.path(),
            &ConvertOptions::default(),
            &CancelToken::new(),
            |_, _| {},
        )
        .await
        .unwrap_err();
        assert!(matches!(err, PipelineError::Filesystem(FilesystemError::ReadDir { .. })));
    }
}
