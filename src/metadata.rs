use std::collections::HashMap;

use serde::Deserialize;
use serde_aux::prelude::*;

use crate::naming::{UNKNOWN_TITLE, UNKNOWN_UPLOADER};

/// One playlist entry as needed by the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemRecord {
    pub title: String,
    pub uploader: String,
    pub source_url: String,
    /// Native container of the selected audio stream, known once a stream
    /// has been picked.
    pub container_ext: Option<String>,
}

/// Subset of the `yt-dlp -J` payload. Playlists and single videos share the
/// same shape; playlists carry `entries`, single videos carry `formats`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ResolvedInfo {
    #[serde(rename = "_type")]
    pub kind: Option<String>,
    pub id: Option<String>,
    pub title: Option<String>,
    pub uploader: Option<String>,
    pub channel: Option<String>,
    pub url: Option<String>,
    pub webpage_url: Option<String>,
    pub ext: Option<String>,
    #[serde(default, deserialize_with = "deserialize_default_from_null")]
    pub entries: Vec<Option<ResolvedInfo>>,
    #[serde(default, deserialize_with = "deserialize_default_from_null")]
    pub formats: Vec<Format>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Format {
    #[serde(default, deserialize_with = "deserialize_default_from_null")]
    pub format_id: String,
    #[serde(default, deserialize_with = "deserialize_default_from_null")]
    pub ext: String,
    pub url: Option<String>,
    pub protocol: Option<String>,
    pub acodec: Option<String>,
    pub vcodec: Option<String>,
    #[serde(default, deserialize_with = "deserialize_option_number_from_string")]
    pub abr: Option<f64>,
    #[serde(default, deserialize_with = "deserialize_option_number_from_string")]
    pub tbr: Option<f64>,
    #[serde(default, deserialize_with = "deserialize_default_from_null")]
    pub http_headers: HashMap<String, String>,
}

impl Format {
    /// Whether the stream can be fetched with a single HTTP GET.
    pub fn is_direct(&self) -> bool {
        let url_ok = self
            .url
            .as_deref()
            .map_or(false, |u| u.starts_with("http://") || u.starts_with("https://"));
        let protocol_ok = match self.protocol.as_deref() {
            None => true,
            Some(p) => p == "http" || p == "https",
        };
        url_ok && protocol_ok
    }

    pub fn has_audio(&self) -> bool {
        self.acodec.as_deref() != Some("none")
    }

    pub fn is_audio_only(&self) -> bool {
        self.vcodec.as_deref() == Some("none") && self.has_audio()
    }

    fn bitrate(&self) -> f64 {
        self.abr.or(self.tbr).unwrap_or(0.0)
    }
}

/// Picks the stream to download, the equivalent of `bestaudio/best`.
///
/// Audio-only streams are ranked by bitrate. yt-dlp lists formats from worst
/// to best, so on equal bitrate the later one wins. Without any audio-only
/// stream the last direct stream that carries audio is used.
pub fn select_audio_format(formats: &[Format]) -> Option<&Format> {
    let mut best: Option<(&Format, f64)> = None;
    for format in formats.iter().filter(|f| f.is_direct() && f.is_audio_only()) {
        let rate = format.bitrate();
        if best.map_or(true, |(_, b)| rate >= b) {
            best = Some((format, rate));
        }
    }

    best.map(|(f, _)| f).or_else(|| {
        formats
            .iter()
            .rev()
            .find(|f| f.is_direct() && f.has_audio())
    })
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

impl ResolvedInfo {
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    pub fn is_playlist(&self) -> bool {
        self.kind.as_deref() == Some("playlist") || !self.entries.is_empty()
    }

    /// URL that identifies the item itself, not one of its streams.
    pub fn source_url(&self) -> Option<String> {
        if let Some(url) = non_empty(self.webpage_url.as_deref()) {
            return Some(url.to_string());
        }
        // Flat playlist entries only carry `url`, pointing at the item page.
        if self.kind.as_deref() == Some("url") {
            if let Some(url) = non_empty(self.url.as_deref()) {
                return Some(url.to_string());
            }
        }
        non_empty(self.id.as_deref()).map(|id| format!("https://www.youtube.com/watch?v={}", id))
    }

    /// Builds an item record, or `None` when nothing identifies the item.
    pub fn to_item(&self) -> Option<ItemRecord> {
        let source_url = self.source_url()?;
        let uploader = non_empty(self.uploader.as_deref())
            .or_else(|| non_empty(self.channel.as_deref()))
            .unwrap_or(UNKNOWN_UPLOADER);

        Some(ItemRecord {
            title: non_empty(self.title.as_deref())
                .unwrap_or(UNKNOWN_TITLE)
                .to_string(),
            uploader: uploader.to_string(),
            source_url,
            container_ext: non_empty(self.ext.as_deref()).map(str::to_string),
        })
    }

    /// Flattens the payload into item records in resolver order. Nested
    /// playlists (e.g. channel tabs) are expanded depth-first; unavailable
    /// entries are skipped.
    pub fn into_items(self) -> Vec<ItemRecord> {
        if !self.is_playlist() {
            return self.to_item().into_iter().collect();
        }

        let mut items = Vec::new();
        for entry in self.entries.into_iter().flatten() {
            if entry.is_playlist() {
                items.extend(entry.into_items());
            } else if let Some(item) = entry.to_item() {
                items.push(item);
            } else {
                warn!("Skipping playlist entry without URL: {:?}", entry.title);
            }
        }
        items
    }

    /// Fills gaps in `self` from a previously resolved record of the same
    /// item, used when the flat playlist listing knew more than the item page.
    pub fn merge_item(&self, previous: &ItemRecord) -> ItemRecord {
        let mut item = self.to_item().unwrap_or_else(|| previous.clone());
        if item.title == UNKNOWN_TITLE {
            item.title = previous.title.clone();
        }
        if item.uploader == UNKNOWN_UPLOADER {
            item.uploader = previous.uploader.clone();
        }
        item
    }
}
