//! URL parsing helpers.
//!
//! The downloader names its output after the video id, so deriving the id
//! from the input URL lets the fetch step recognise files it has already
//! written under the non-overwriting output policy.

use thiserror::Error;

/// Why an identifier did not yield a YouTube video id.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum YoutubeIdError {
    #[error("URL is not a valid YouTube URL")]
    InvalidYoutubeUrl,

    #[error("Video ID has invalid format")]
    InvalidVideoId,

    #[error("Video ID not found in URL")]
    VideoIdNotFound,
}

pub type YoutubeIdResult<T> = Result<T, YoutubeIdError>;

/// URL fragments that directly precede a video id, in order of preference.
const ID_MARKERS: [&str; 6] = ["?v=", "&v=", "youtu.be/", "/embed/", "/v/", "/shorts/"];

/// Extract the 11-character YouTube video id from a URL.
///
/// Supports `watch?v=`, `youtu.be/`, `/embed/`, `/v/` and `/shorts/` forms,
/// with or without trailing query parameters and fragments.
pub fn extract_youtube_id(url: &str) -> YoutubeIdResult<String> {
    let url = url.trim();
    let lower = url.to_ascii_lowercase();

    if !lower.contains("youtube.com") && !lower.contains("youtu.be") {
        return Err(YoutubeIdError::InvalidYoutubeUrl);
    }

    for marker in ID_MARKERS {
        if let Some(pos) = url.find(marker) {
            let remaining = &url[pos + marker.len()..];
            if remaining.is_empty() {
                continue;
            }
            return validate_youtube_id(id_segment(remaining));
        }
    }

    Err(YoutubeIdError::VideoIdNotFound)
}

/// Video id the downloader is expected to name its output after, when it can
/// be derived from the identifier alone (YouTube URLs or bare ids).
pub fn requested_video_id(identifier: &str) -> Option<String> {
    if let Ok(id) = extract_youtube_id(identifier) {
        return Some(id);
    }

    let bare = identifier.trim();
    if !bare.is_empty() && !bare.contains('/') && !bare.contains(':') {
        return Some(bare.to_string());
    }

    None
}

/// Take everything up to the next URL delimiter.
fn id_segment(segment: &str) -> &str {
    let end = segment
        .find(['&', '#', '?', '/'])
        .unwrap_or(segment.len());
    segment[..end].trim()
}

/// Ids are 11 characters of the URL-safe base64 alphabet.
fn validate_youtube_id(id: &str) -> YoutubeIdResult<String> {
    let well_formed = id.len() == 11
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_'));
    well_formed
        .then(|| id.to_owned())
        .ok_or(YoutubeIdError::InvalidVideoId)
}
