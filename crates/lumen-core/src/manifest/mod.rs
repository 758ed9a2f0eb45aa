//! HLS manifest model and parsing

mod hls;

pub use hls::HlsParser;

use crate::{types::Resolution, Result};
use std::time::Duration;
use url::Url;

/// A parsed playlist: either a master listing variants or a media playlist
#[derive(Debug, Clone, PartialEq)]
pub enum HlsPlaylist {
    Master(MasterPlaylist),
    Media(MediaPlaylist),
}

impl HlsPlaylist {
    /// Returns true if the stream carries timed metadata
    pub fn has_timed_metadata(&self) -> bool {
        match self {
            HlsPlaylist::Master(master) => master.has_session_data,
            HlsPlaylist::Media(media) => media.has_timed_metadata,
        }
    }

    pub fn is_master(&self) -> bool {
        matches!(self, HlsPlaylist::Master(_))
    }
}

/// Multivariant playlist
#[derive(Debug, Clone, PartialEq)]
pub struct MasterPlaylist {
    pub base_url: Url,
    /// Variants in manifest order
    pub variants: Vec<Variant>,
    pub audio: Vec<AlternateRendition>,
    pub subtitles: Vec<AlternateRendition>,
    pub closed_captions: Vec<AlternateRendition>,
    /// `EXT-X-SESSION-DATA` present
    pub has_session_data: bool,
}

/// One bitrate/resolution rendition of the main content
#[derive(Debug, Clone, PartialEq)]
pub struct Variant {
    pub uri: Url,
    pub bandwidth: u64,
    pub codecs: Option<String>,
    pub resolution: Option<Resolution>,
    pub frame_rate: Option<f32>,
}

impl Variant {
    /// Display name: resolution tier, else bitrate
    pub fn name(&self) -> String {
        match self.resolution {
            Some(resolution) => resolution.quality_name().to_string(),
            None => format!("{} kbps", self.bandwidth / 1000),
        }
    }

    /// Individual RFC 6381 codec entries
    pub fn codec_list(&self) -> Vec<&str> {
        self.codecs
            .as_deref()
            .map(|codecs| {
                codecs
                    .split(',')
                    .map(str::trim)
                    .filter(|c| !c.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// An `EXT-X-MEDIA` alternative (audio, subtitles or closed captions)
#[derive(Debug, Clone, PartialEq)]
pub struct AlternateRendition {
    /// Absent for renditions muxed into the variant streams
    pub uri: Option<Url>,
    pub group_id: String,
    pub name: String,
    pub language: Option<String>,
    pub default: bool,
}

/// Segment playlist for one rendition
#[derive(Debug, Clone, PartialEq)]
pub struct MediaPlaylist {
    pub base_url: Url,
    pub segment_count: usize,
    pub duration: Duration,
    pub is_live: bool,
    /// Any segment carries an `EXT-X-DATERANGE`
    pub has_timed_metadata: bool,
}

/// Turns manifest bytes into a typed playlist
pub trait ManifestParser: Send + Sync {
    fn parse(&self, base_url: &Url, data: &[u8]) -> Result<HlsPlaylist>;
}

/// Returns true if the URL names an HLS playlist
pub fn is_hls_url(url: &Url) -> bool {
    let path = url.path().to_lowercase();
    path.ends_with(".m3u8") || path.ends_with(".m3u")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_hls() {
        let url = Url::parse("https://example.com/master.m3u8").unwrap();
        assert!(is_hls_url(&url));
        let url = Url::parse("file:///media/movie.mp4").unwrap();
        assert!(!is_hls_url(&url));
    }

    #[test]
    fn test_variant_name_and_codecs() {
        let variant = Variant {
            uri: Url::parse("https://example.com/720.m3u8").unwrap(),
            bandwidth: 2_500_000,
            codecs: Some("avc1.64001f, mp4a.40.2".into()),
            resolution: Some(Resolution::HD_720P),
            frame_rate: None,
        };
        assert_eq!(variant.name(), "720p");
        assert_eq!(variant.codec_list(), vec!["avc1.64001f", "mp4a.40.2"]);

        let audio_only = Variant {
            resolution: None,
            codecs: None,
            ..variant
        };
        assert_eq!(audio_only.name(), "2500 kbps");
        assert!(audio_only.codec_list().is_empty());
    }
}
