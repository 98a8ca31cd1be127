//! DIDL-Lite metadata generation for loopcast
//!
//! Renderers receive a DIDL-Lite `<item>` alongside the transport URI; its
//! `<res protocolInfo>` advertises the container, DLNA profile and flags so
//! the device can judge acceptability before it starts streaming. Samsung
//! caption tags are included when a subtitle sidecar is published.

use quick_xml::escape::escape;

use crate::config::{DEFAULT_DLNA_FLAGS, DEFAULT_DLNA_VIDEO_TITLE};

/// Everything the DIDL builder needs to know about one published video.
#[derive(Debug, Clone)]
pub struct MediaMetadata {
    /// Title shown by renderers that display one
    pub title: String,
    /// Published media URL; must equal the CurrentURI of the transport
    pub video_uri: String,
    /// Container MIME type
    pub mime: String,
    /// DLNA.ORG_PN profile, omitted from protocolInfo when unknown
    pub dlna_profile: Option<String>,
    /// DLNA.ORG_FLAGS bitfield literal
    pub flags: String,
    /// Published subtitle sidecar URL, when one exists
    pub subtitle_uri: Option<String>,
}

impl MediaMetadata {
    /// Builds metadata with the default title and flags.
    pub fn new(video_uri: impl Into<String>, mime: impl Into<String>) -> Self {
        Self {
            title: DEFAULT_DLNA_VIDEO_TITLE.to_string(),
            video_uri: video_uri.into(),
            mime: mime.into(),
            dlna_profile: None,
            flags: DEFAULT_DLNA_FLAGS.to_string(),
            subtitle_uri: None,
        }
    }
}

/// Builds the `protocolInfo` attribute for a `<res>` element.
pub fn build_protocol_info(mime: &str, dlna_profile: Option<&str>, flags: &str) -> String {
    match dlna_profile {
        Some(profile) => format!(
            "http-get:*:{mime}:DLNA.ORG_PN={profile};DLNA.ORG_OP=01;DLNA.ORG_CI=0;DLNA.ORG_FLAGS={flags}"
        ),
        None => format!("http-get:*:{mime}:DLNA.ORG_OP=01;DLNA.ORG_CI=0;DLNA.ORG_FLAGS={flags}"),
    }
}

/// Builds the CurrentURIMetaData value for SetAVTransportURI: a DIDL-Lite
/// document, attribute-escaped for embedding in the SOAP envelope.
pub fn build_didl_metadata(metadata: &MediaMetadata) -> String {
    let protocol_info = build_protocol_info(
        &metadata.mime,
        metadata.dlna_profile.as_deref(),
        &metadata.flags,
    );
    let title = escape(metadata.title.as_str());

    let didl = match &metadata.subtitle_uri {
        Some(subtitle_uri) => format!(
            r###"<DIDL-Lite xmlns="urn:schemas-upnp-org:metadata-1-0/DIDL-Lite/"
            xmlns:dc="http://purl.org/dc/elements/1.1/"
            xmlns:upnp="urn:schemas-upnp-org:metadata-1-0/upnp/"
            xmlns:dlna="urn:schemas-dlna-org:metadata-1-0/"
            xmlns:sec="http://www.sec.co.kr/">
    <item id="0" parentID="-1" restricted="1">
        <dc:title>{title}</dc:title>
        <res protocolInfo="{protocol_info}" xmlns:pv="http://www.pv.com/pvns/" pv:subtitleFileUri="{subtitle_uri}" pv:subtitleFileType="srt">{video_uri}</res>
        <res protocolInfo="http-get:*:text/srt:*">{subtitle_uri}</res>
        <sec:CaptionInfoEx sec:type="srt">{subtitle_uri}</sec:CaptionInfoEx>
        <sec:CaptionInfo sec:type="srt">{subtitle_uri}</sec:CaptionInfo>
        <upnp:class>object.item.videoItem.movie</upnp:class>
    </item>
</DIDL-Lite>"###,
            video_uri = metadata.video_uri,
        ),
        None => format!(
            r###"<DIDL-Lite xmlns="urn:schemas-upnp-org:metadata-1-0/DIDL-Lite/"
            xmlns:dc="http://purl.org/dc/elements/1.1/"
            xmlns:upnp="urn:schemas-upnp-org:metadata-1-0/upnp/"
            xmlns:dlna="urn:schemas-dlna-org:metadata-1-0/">
    <item id="0" parentID="-1" restricted="1">
        <dc:title>{title}</dc:title>
        <res protocolInfo="{protocol_info}">{video_uri}</res>
        <upnp:class>object.item.videoItem.movie</upnp:class>
    </item>
</DIDL-Lite>"###,
            video_uri = metadata.video_uri,
        ),
    };

    escape(didl.as_str()).to_string()
}
