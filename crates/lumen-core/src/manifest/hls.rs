//! HLS playlist parser backed by m3u8-rs
//!
//! Handles:
//! - Master playlists (variants and `EXT-X-MEDIA` alternatives)
//! - Media playlists (duration, liveness, date ranges)

use super::{
    AlternateRendition, HlsPlaylist, ManifestParser, MasterPlaylist, MediaPlaylist, Variant,
};
use crate::{types::Resolution, Error, Result};
use m3u8_rs::{AlternativeMedia, AlternativeMediaType, Playlist};
use std::time::Duration;
use tracing::debug;
use url::Url;

/// HLS manifest parser
#[derive(Debug, Clone, Copy, Default)]
pub struct HlsParser;

impl HlsParser {
    pub fn new() -> Self {
        Self
    }

    fn convert_master(
        &self,
        master: &m3u8_rs::MasterPlaylist,
        base_url: &Url,
    ) -> Result<MasterPlaylist> {
        let variants = master
            .variants
            .iter()
            .filter(|variant| !variant.is_i_frame)
            .map(|variant| {
                Ok(Variant {
                    uri: resolve_uri(base_url, &variant.uri)?,
                    bandwidth: variant.bandwidth,
                    codecs: variant.codecs.clone(),
                    resolution: variant.resolution.as_ref().map(|r| Resolution {
                        width: r.width as u32,
                        height: r.height as u32,
                    }),
                    frame_rate: variant.frame_rate.map(|f| f as f32),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let alternatives = |kind: fn(&AlternativeMediaType) -> bool| {
            master
                .alternatives
                .iter()
                .filter(|media| kind(&media.media_type))
                .map(|media| convert_alternative(media, base_url))
                .collect::<Result<Vec<_>>>()
        };

        Ok(MasterPlaylist {
            base_url: base_url.clone(),
            variants,
            audio: alternatives(|t| matches!(t, AlternativeMediaType::Audio))?,
            subtitles: alternatives(|t| matches!(t, AlternativeMediaType::Subtitles))?,
            closed_captions: alternatives(|t| matches!(t, AlternativeMediaType::ClosedCaptions))?,
            has_session_data: !master.session_data.is_empty(),
        })
    }

    fn convert_media(
        &self,
        media: &m3u8_rs::MediaPlaylist,
        base_url: &Url,
    ) -> Result<MediaPlaylist> {
        let seconds: f32 = media.segments.iter().map(|s| s.duration).sum();
        let duration = Duration::try_from_secs_f32(seconds.max(0.0)).map_err(|e| {
            Error::ManifestParse(format!("Invalid playlist duration {}s: {}", seconds, e))
        })?;
        Ok(MediaPlaylist {
            base_url: base_url.clone(),
            segment_count: media.segments.len(),
            duration,
            is_live: !media.end_list,
            has_timed_metadata: media.segments.iter().any(|s| s.daterange.is_some()),
        })
    }
}

impl ManifestParser for HlsParser {
    fn parse(&self, base_url: &Url, data: &[u8]) -> Result<HlsPlaylist> {
        let playlist = m3u8_rs::parse_playlist_res(data)
            .map_err(|e| Error::ManifestParse(format!("Failed to parse HLS playlist: {:?}", e)))?;

        match playlist {
            Playlist::MasterPlaylist(master) => {
                let master = self.convert_master(&master, base_url)?;
                if master.variants.is_empty() {
                    return Err(Error::ManifestParse("master playlist lists no variants".into()));
                }
                debug!(
                    variants = master.variants.len(),
                    audio = master.audio.len(),
                    subtitles = master.subtitles.len(),
                    "Parsed master playlist"
                );
                Ok(HlsPlaylist::Master(master))
            }
            Playlist::MediaPlaylist(media) => {
                let media = self.convert_media(&media, base_url)?;
                debug!(
                    segments = media.segment_count,
                    live = media.is_live,
                    "Parsed media playlist"
                );
                Ok(HlsPlaylist::Media(media))
            }
        }
    }
}

fn convert_alternative(media: &AlternativeMedia, base_url: &Url) -> Result<AlternateRendition> {
    Ok(AlternateRendition {
        uri: media
            .uri
            .as_deref()
            .map(|uri| resolve_uri(base_url, uri))
            .transpose()?,
        group_id: media.group_id.clone(),
        name: media.name.clone(),
        language: media.language.clone(),
        default: media.default,
    })
}

/// Resolve relative URI against base URL
fn resolve_uri(base: &Url, relative: &str) -> Result<Url> {
    base.join(relative)
        .map_err(|e| Error::ManifestParse(format!("Invalid URI '{}': {}", relative, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const MASTER: &str = "#EXTM3U
#EXT-X-MEDIA:TYPE=AUDIO,GROUP-ID=\"aud\",NAME=\"English\",LANGUAGE=\"en\",DEFAULT=YES,URI=\"audio/en.m3u8\"
#EXT-X-MEDIA:TYPE=SUBTITLES,GROUP-ID=\"subs\",NAME=\"Deutsch\",LANGUAGE=\"de\",URI=\"subs/de.m3u8\"
#EXT-X-STREAM-INF:BANDWIDTH=800000,RESOLUTION=640x360,CODECS=\"avc1.4d401e,mp4a.40.2\",AUDIO=\"aud\",SUBTITLES=\"subs\"
low/index.m3u8
#EXT-X-STREAM-INF:BANDWIDTH=2500000,RESOLUTION=1280x720,CODECS=\"avc1.64001f,mp4a.40.2\",AUDIO=\"aud\",SUBTITLES=\"subs\"
mid/index.m3u8
";

    const MEDIA: &str = "#EXTM3U
#EXT-X-VERSION:3
#EXT-X-TARGETDURATION:6
#EXT-X-MEDIA-SEQUENCE:0
#EXTINF:6.0,
seg0.ts
#EXTINF:4.0,
seg1.ts
#EXT-X-ENDLIST
";

    fn base() -> Url {
        Url::parse("https://cdn.example.com/show/master.m3u8").unwrap()
    }

    #[test]
    fn test_parse_master() {
        let playlist = HlsParser::new().parse(&base(), MASTER.as_bytes()).unwrap();
        let HlsPlaylist::Master(master) = playlist else {
            panic!("expected master playlist");
        };
        assert_eq!(master.variants.len(), 2);
        assert_eq!(master.variants[1].bandwidth, 2_500_000);
        assert_eq!(master.variants[1].resolution, Some(Resolution::HD_720P));
        assert_eq!(
            master.variants[0].uri.as_str(),
            "https://cdn.example.com/show/low/index.m3u8"
        );
        assert_eq!(master.audio.len(), 1);
        assert_eq!(master.audio[0].language.as_deref(), Some("en"));
        assert_eq!(master.subtitles[0].name, "Deutsch");
        assert!(master.closed_captions.is_empty());
        assert!(!master.has_session_data);
    }

    #[test]
    fn test_parse_media() {
        let playlist = HlsParser::new().parse(&base(), MEDIA.as_bytes()).unwrap();
        let HlsPlaylist::Media(media) = playlist else {
            panic!("expected media playlist");
        };
        assert_eq!(media.segment_count, 2);
        assert_eq!(media.duration, Duration::from_secs(10));
        assert!(!media.is_live);
        assert!(!media.has_timed_metadata);
    }

    #[test]
    fn test_parse_garbage_is_parse_error() {
        let err = HlsParser::new().parse(&base(), b"<html>not a playlist</html>").unwrap_err();
        assert_eq!(err.error_code(), "MANIFEST_PARSE");
    }

    #[test]
    fn test_out_of_range_segment_duration_is_parse_error() {
        let media = "#EXTM3U
#EXT-X-TARGETDURATION:6
#EXTINF:1e30,
seg0.ts
#EXTINF:1e30,
seg1.ts
#EXT-X-ENDLIST
";
        let err = HlsParser::new().parse(&base(), media.as_bytes()).unwrap_err();
        assert_eq!(err.error_code(), "MANIFEST_PARSE");
        assert_eq!(err.build_phase(), Some(crate::error::BuildPhase::ManifestFetch));
    }
}
