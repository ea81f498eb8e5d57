use std::sync::OnceLock;

use regex::Regex;

use crate::metadata::ItemRecord;

pub const UNKNOWN_TITLE: &str = "Unknown Title";
pub const UNKNOWN_UPLOADER: &str = "Unknown Artist";

/// Auto-generated "Topic" channels are named "<Artist> - Topic".
const TOPIC_MARKER: &str = " - Topic";

const MAX_STEM_LEN: usize = 200;

/// Promotional tags removed from titles before building a file name.
pub const PROMO_TAGS: &[&str] = &[
    "(Official Music Video)",
    "(Official Video)",
    "(Official Audio)",
    "(Official Lyric Video)",
    "(Official)",
    "(Lyric Video)",
    "(Lyrics)",
    "(Audio)",
    "(Music Video)",
    "(Video)",
    "(Lyrics Video)",
    "(Lyric)",
];

fn unsafe_chars() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"[<>:"/\\|?*\x00-\x1f]"#).expect("valid regex"))
}

/// Removes every promotional tag from `title` until nothing changes anymore.
///
/// A single pass is not enough: removing a tag can join the surrounding text
/// into another tag, e.g. `"(Offic(Video)ial Video)"`.
pub fn clean_title(title: &str) -> String {
    let mut current = title.trim().to_string();
    loop {
        let mut next = current.clone();
        for tag in PROMO_TAGS {
            next = next.replace(tag, "").trim().to_string();
        }
        if next == current {
            return current;
        }
        current = next;
    }
}

pub fn clean_uploader(uploader: &str) -> String {
    match uploader.find(TOPIC_MARKER) {
        Some(idx) => uploader[..idx].trim().to_string(),
        None => uploader.trim().to_string(),
    }
}

/// Replaces characters that are not allowed in file names on common
/// platforms and caps the length.
pub fn sanitize_filename(name: &str) -> String {
    let replaced = unsafe_chars().replace_all(name, "_");
    let trimmed = replaced.trim().trim_matches('.').trim();

    if trimmed.len() <= MAX_STEM_LEN {
        return trimmed.to_string();
    }

    let mut end = MAX_STEM_LEN;
    while !trimmed.is_char_boundary(end) {
        end -= 1;
    }
    trimmed[..end].trim_end().to_string()
}

/// Derives the destination file name (without extension) for an item.
///
/// Titles that already carry a hyphen are assumed to be "Artist - Track" and
/// used as they are; otherwise the cleaned uploader is prepended.
pub fn derive_stem(record: &ItemRecord) -> String {
    let mut title = clean_title(&record.title);
    if title.is_empty() {
        title = UNKNOWN_TITLE.to_string();
    }

    let stem = if title.contains('-') {
        title
    } else {
        let mut uploader = clean_uploader(&record.uploader);
        if uploader.is_empty() {
            uploader = UNKNOWN_UPLOADER.to_string();
        }
        format!("{} - {}", uploader, title)
    };

    let stem = sanitize_filename(&stem);
    if stem.is_empty() {
        format!("{} - {}", UNKNOWN_UPLOADER, UNKNOWN_TITLE)
    } else {
        stem
    }
}
