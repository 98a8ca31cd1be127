//! Media file utilities for loopcast
//!
//! This module provides functions for working with media files,
//! including MIME detection, DLNA profile inference and subtitle sidecars.

use std::path::{Path, PathBuf};

/// Infers a subtitle sidecar path from a video file path
///
/// Tries subtitle extensions in order of preference and returns the first
/// one that exists next to the video.
pub fn infer_subtitle_from_video(video_path: &Path) -> Option<PathBuf> {
    for extension in ["srt", "vtt"] {
        let inferred_subtitle_path = video_path.with_extension(extension);

        if inferred_subtitle_path.exists() {
            return Some(inferred_subtitle_path);
        }
    }

    None
}

/// Validates if a file path has a supported video extension
pub fn is_supported_video_file(path: &Path) -> bool {
    if let Some(extension) = path.extension() {
        if let Some(ext_str) = extension.to_str() {
            let ext_lower = ext_str.to_lowercase();
            return crate::config::SUPPORTED_VIDEO_EXTENSIONS.contains(&ext_lower.as_str());
        }
    }
    false
}

/// Gets the MIME type for a media file path from its extension
pub fn mime_type_for_path(path: &Path) -> String {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or("")
        .to_lowercase();

    match extension.as_str() {
        "mp4" | "m4v" => "video/mp4",
        "avi" => "video/x-msvideo",
        "mkv" => "video/x-matroska",
        "mov" => "video/quicktime",
        "wmv" => "video/x-ms-wmv",
        "flv" => "video/x-flv",
        "webm" => "video/webm",
        "3gp" => "video/3gpp",
        "ogv" => "video/ogg",
        "mpg" | "mpeg" => "video/mpeg",
        "ts" => "video/mp2t",
        "srt" => "text/srt",
        "vtt" => "text/vtt",
        _ => "application/octet-stream",
    }
    .to_string()
}

/// Picks a DLNA.ORG_PN profile for a container MIME type.
///
/// Renderers use the profile to decide acceptability before streaming; an
/// unknown container gets no profile and the `contentFeatures` header omits
/// the `DLNA.ORG_PN` field.
pub fn dlna_profile_for_mime(mime: &str) -> Option<&'static str> {
    match mime {
        "video/mp4" => Some("AVC_MP4_HP_HD_AAC"),
        "video/x-matroska" => Some("AVC_MKV_HP_HD_AAC_MULT5"),
        "video/mpeg" => Some("MPEG_PS_PAL"),
        "video/mp2t" => Some("AVC_TS_HD_50_AC3"),
        "video/x-ms-wmv" => Some("WMVHIGH_FULL"),
        _ => None,
    }
}

/// Sanitizes a filename for use in URLs
pub fn sanitize_filename_for_url(filename: &str) -> String {
    use slugify::slugify;
    slugify!(filename, separator = ".")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_is_supported_video_file() {
        assert!(is_supported_video_file(&PathBuf::from("test.mp4")));
        assert!(is_supported_video_file(&PathBuf::from("test.avi")));
        assert!(!is_supported_video_file(&PathBuf::from("test.txt")));
    }

    #[test]
    fn test_mime_type_for_path() {
        assert_eq!(mime_type_for_path(Path::new("movie.mp4")), "video/mp4");
        assert_eq!(mime_type_for_path(Path::new("movie.MKV")), "video/x-matroska");
        assert_eq!(mime_type_for_path(Path::new("movie.srt")), "text/srt");
        assert_eq!(
            mime_type_for_path(Path::new("movie.bin")),
            "application/octet-stream"
        );
    }

    #[test]
    fn test_dlna_profile_for_mime() {
        assert_eq!(dlna_profile_for_mime("video/mp4"), Some("AVC_MP4_HP_HD_AAC"));
        assert_eq!(dlna_profile_for_mime("application/octet-stream"), None);
    }

    #[test]
    fn test_sanitize_filename_for_url() {
        assert_eq!(
            sanitize_filename_for_url("My Video File.mp4"),
            "my.video.file.mp4"
        );
        assert_eq!(sanitize_filename_for_url("Test (2023).avi"), "test.2023.avi");
    }
}
