#[macro_use]
extern crate log;

use std::{path::PathBuf, process::ExitCode, sync::Arc};

use ytmp3_rs::{
    config::{self, Config},
    ffmpeg::Ffmpeg,
    stats,
    worker::{Controller, RunRequest},
    ytdlp::YtDlp,
};

const USAGE: &str =
    "Usage: ytmp3-rs [--config FILE] [--bitrate RATE] [--output DIR] <URL> <DEST_DIR>";

#[derive(Debug, Default, PartialEq)]
struct Args {
    config: Option<PathBuf>,
    bitrate: Option<String>,
    output: Option<PathBuf>,
    url: String,
    dest_dir: PathBuf,
}

fn parse_args<I>(args: I) -> Result<Args, String>
where
    I: IntoIterator<Item = String>,
{
    let mut parsed = Args::default();
    let mut positional = Vec::new();
    let mut args = args.into_iter();

    while let Some(arg) = args.next() {
        let mut value = |name: &str| {
            args.next()
                .ok_or_else(|| format!("{} requires a value", name))
        };
        match arg.as_str() {
            "--config" => parsed.config = Some(value("--config")?.into()),
            "--bitrate" => parsed.bitrate = Some(value("--bitrate")?),
            "--output" => parsed.output = Some(value("--output")?.into()),
            "-h" | "--help" => return Err(USAGE.to_string()),
            flag if flag.starts_with("--") => return Err(format!("Unknown option {}", flag)),
            other => positional.push(other.to_string()),
        }
    }

    let mut positional = positional.into_iter();
    match (positional.next(), positional.next(), positional.next()) {
        (Some(url), Some(dest_dir), None) => {
            parsed.url = url;
            parsed.dest_dir = dest_dir.into();
            Ok(parsed)
        }
        _ => Err(USAGE.to_string()),
    }
}

fn load_config(args: &Args) -> Result<Config, config::ConfigError> {
    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(bitrate) = &args.bitrate {
        config::validate_bitrate(bitrate)?;
        config.bitrate = bitrate.clone();
    }
    if let Some(output) = &args.output {
        config.output_dir = Some(output.clone());
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // Read url and destination from args
    let args = match parse_args(std::env::args().skip(1)) {
        Ok(args) => args,
        Err(message) => {
            eprintln!("{}", message);
            return ExitCode::from(2);
        }
    };

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    // Create backends
    let source = match YtDlp::new(&config.ytdlp_path, config.max_retries) {
        Ok(source) => source,
        Err(e) => {
            eprintln!("Could not create HttpClient: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let transcoder = Ffmpeg::new(&config.ffmpeg_path);

    match source.version().await {
        Ok(version) => debug!("yt-dlp {}", version),
        Err(e) => warn!("{} is not usable: {}", source.binary().display(), e),
    }
    match transcoder.version().await {
        Ok(version) => debug!("{}", version),
        Err(e) => warn!("{} is not usable: {}", config.ffmpeg_path.display(), e),
    }

    println!("Files will be saved to: {}", args.dest_dir.display());

    let controller = Controller::new(config, Arc::new(source), Arc::new(transcoder));
    let handle = controller.start(
        RunRequest {
            url: args.url,
            download_dir: args.dest_dir,
        },
        |message| error!("{}", message),
    );

    // Cancel between items on Ctrl-C
    let cancel = handle.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Cancelling after the current item");
            cancel.cancel();
        }
    });

    let mut progress = handle.progress();
    while progress.changed().await.is_ok() {
        let state = *progress.borrow();
        stats::print_progress(&state);
    }
    println!();

    match handle.wait().await {
        Ok(summary) => {
            summary.print();
            println!("Done");
            ExitCode::SUCCESS
        }
        // Already reported through the error callback
        Err(_) => ExitCode::FAILURE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Result<Args, String> {
        parse_args(list.iter().map(|s| s.to_string()))
    }

    #[test]
    fn parses_positional_arguments() {
        let parsed = args(&["https://youtu.be/x", "/music"]).unwrap();
        assert_eq!(parsed.url, "https://youtu.be/x");
        assert_eq!(parsed.dest_dir, PathBuf::from("/music"));
        assert_eq!(parsed.bitrate, None);
    }

    #[test]
    fn parses_options() {
        let parsed = args(&[
            "--bitrate",
            "320k",
            "u",
            "--output",
            "/mp3",
            "/music",
            "--config",
            "c.json",
        ])
        .unwrap();
        assert_eq!(parsed.bitrate.as_deref(), Some("320k"));
        assert_eq!(parsed.output, Some(PathBuf::from("/mp3")));
        assert_eq!(parsed.config, Some(PathBuf::from("c.json")));
        assert_eq!(parsed.url, "u");
    }

    #[test]
    fn rejects_bad_usage() {
        assert!(args(&[]).is_err());
        assert!(args(&["u"]).is_err());
        assert!(args(&["u", "d", "extra"]).is_err());
        assert!(args(&["u", "d", "--bitrate"]).is_err());
        assert!(args(&["--verbose", "u", "d"]).is_err());
    }

    #[test]
    fn cli_overrides_config() {
        let parsed = args(&["--bitrate", "128k", "--output", "/mp3", "u", "d"]).unwrap();
        let config = load_config(&parsed).unwrap();
        assert_eq!(config.bitrate, "128k");
        assert_eq!(config.output_dir, Some(PathBuf::from("/mp3")));

        let parsed = args(&["--bitrate", "loud", "u", "d"]).unwrap();
        assert!(load_config(&parsed).is_err());
    }
}
