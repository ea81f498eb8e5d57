//! # ytmp3-rs
//!
//! This crate downloads every entry of a YouTube playlist (or a single video)
//! as audio and transcodes it to MP3. Metadata and stream URLs come from
//! [yt-dlp](https://github.com/yt-dlp/yt-dlp), the audio itself is fetched
//! over HTTP and transcoded with `ffmpeg`.
//!
//! ## Usage
//!
//! A run is a download step followed by a conversion step, driven by a
//! [`worker::Controller`] on a background task. Progress is published through
//! a `tokio::sync::watch` channel.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use ytmp3_rs::{config::Config, ffmpeg::Ffmpeg, worker, ytdlp::YtDlp};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = Config::default();
//!     let source = YtDlp::new(&config.ytdlp_path, config.max_retries).unwrap();
//!     let transcoder = Ffmpeg::new(&config.ffmpeg_path);
//!
//!     let controller = worker::Controller::new(config, Arc::new(source), Arc::new(transcoder));
//!     let handle = controller.start(
//!         worker::RunRequest {
//!             url: "https://www.youtube.com/playlist?list=...".to_string(),
//!             download_dir: "music".into(),
//!         },
//!         |message| eprintln!("{}", message),
//!     );
//!
//!     let mut progress = handle.progress();
//!     while progress.changed().await.is_ok() {
//!         let state = *progress.borrow();
//!         println!("{:?} {}/{}", state.phase, state.current, state.total);
//!     }
//!
//!     handle.wait().await.unwrap();
//! }
//! ```
//!
//! The steps can also be used on their own: [`download::download_playlist`]
//! and [`convert::convert_directory`] take any [`download::MediaSource`] and
//! [`convert::Transcoder`] implementation.

#[forbid(unsafe_code)]
#[macro_use]
extern crate log;

pub mod config;
pub mod convert;
pub mod download;
pub mod ffmpeg;
pub mod metadata;
pub mod naming;
pub mod progress;
pub mod stats;
pub mod util;
pub mod worker;
pub mod ytdlp;
