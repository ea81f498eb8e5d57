use std::{
    ffi::OsString,
    path::{Path, PathBuf},
    process::{ExitStatus, Stdio},
};

use async_trait::async_trait;

use crate::{convert::Transcoder, util::part_path};

#[derive(thiserror::Error, Debug)]
pub enum ConversionError {
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("ffmpeg exited with {status}: {stderr}")]
    FfmpegFailed { status: ExitStatus, stderr: String },
}

/// Transcodes with the `ffmpeg` executable using `libmp3lame`.
pub struct Ffmpeg {
    binary: PathBuf,
}

impl Ffmpeg {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    pub async fn version(&self) -> std::io::Result<String> {
        let output = tokio::process::Command::new(&self.binary)
            .arg("-version")
            .output()
            .await?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout.lines().next().unwrap_or_default().to_string())
    }
}

fn mp3_args(input: &Path, output: &Path, bitrate: &str) -> Vec<OsString> {
    let mut args: Vec<OsString> = ["-hide_banner", "-nostdin", "-loglevel", "error", "-y", "-i"]
        .iter()
        .map(OsString::from)
        .collect();
    args.push(input.into());
    for arg in ["-vn", "-codec:a", "libmp3lame", "-b:a", bitrate, "-f", "mp3"] {
        args.push(arg.into());
    }
    args.push(output.into());
    args
}

/// Decodes `input` and encodes it as MP3 at `bitrate` into `output`.
///
/// ffmpeg writes to `{output}.part`, which is renamed once the encoder exits
/// successfully. A failed run leaves no file at `output`.
pub async fn transcode(
    binary: &Path,
    input: &Path,
    output: &Path,
    bitrate: &str,
) -> Result<(), ConversionError> {
    let temp_path = part_path(output);

    let mut child = tokio::process::Command::new(binary);
    child
        .args(mp3_args(input, &temp_path, bitrate))
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let result = child.output().await?;

    if !result.status.success() {
        let _ = tokio::fs::remove_file(&temp_path).await;
        return Err(ConversionError::FfmpegFailed {
            status: result.status,
            stderr: String::from_utf8_lossy(&result.stderr).trim().to_string(),
        });
    }

    tokio::fs::rename(&temp_path, output).await?;

    Ok(())
}

#[async_trait]
impl Transcoder for Ffmpeg {
    async fn transcode(
        &self,
        input: &Path,
        output: &Path,
        bitrate: &str,
    ) -> Result<(), ConversionError> {
        transcode(&self.binary, input, output, bitrate).await
    }
}
