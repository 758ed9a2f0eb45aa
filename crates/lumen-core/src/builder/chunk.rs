//! HLS chunk sources

use crate::{
    bandwidth::BandwidthEstimator,
    engine::ChunkSource,
    manifest::{HlsPlaylist, ManifestParser, MediaPlaylist},
    types::TrackSlot,
    upstream::DataSource,
    Error, Result,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, instrument};
use url::Url;

/// One rendition a chunk source can switch to
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkTrack {
    pub name: String,
    pub uri: Url,
    /// Declared bitrate, 0 when unknown
    pub bandwidth: u64,
    pub language: Option<String>,
}

/// Bandwidth-driven switching for the main source
#[derive(Debug, Clone)]
pub struct AdaptiveConfig {
    pub estimator: Arc<BandwidthEstimator>,
    /// Fraction of the estimate a rendition may use
    pub safety_factor: f64,
}

/// Everything needed to create a chunk source for one role
#[derive(Clone)]
pub struct ChunkSourceRequest {
    pub slot: TrackSlot,
    pub tracks: Vec<ChunkTrack>,
    pub data_source: Arc<dyn DataSource>,
    pub adaptive: Option<AdaptiveConfig>,
}

pub trait ChunkSourceFactory: Send + Sync {
    fn create(&self, request: ChunkSourceRequest) -> Result<Arc<dyn ChunkSource>>;
}

/// Creates [`HlsChunkSource`]s
#[derive(Debug, Clone, Copy, Default)]
pub struct HlsChunkSourceFactory;

impl ChunkSourceFactory for HlsChunkSourceFactory {
    fn create(&self, request: ChunkSourceRequest) -> Result<Arc<dyn ChunkSource>> {
        Ok(Arc::new(HlsChunkSource::new(request)?))
    }
}

/// Chunk source over the renditions of one track role
pub struct HlsChunkSource {
    slot: TrackSlot,
    tracks: Vec<ChunkTrack>,
    selected: AtomicUsize,
    data_source: Arc<dyn DataSource>,
    adaptive: Option<AdaptiveConfig>,
}

impl HlsChunkSource {
    pub fn new(request: ChunkSourceRequest) -> Result<Self> {
        if request.tracks.is_empty() {
            return Err(Error::renderer(request.slot, "chunk source has no tracks"));
        }
        Ok(Self {
            slot: request.slot,
            tracks: request.tracks,
            selected: AtomicUsize::new(0),
            data_source: request.data_source,
            adaptive: request.adaptive,
        })
    }

    pub fn slot(&self) -> TrackSlot {
        self.slot
    }

    pub fn tracks(&self) -> &[ChunkTrack] {
        &self.tracks
    }

    pub fn selected(&self) -> &ChunkTrack {
        &self.tracks[self.selected_track()]
    }

    /// Re-evaluate the adaptive choice against the bandwidth estimate.
    ///
    /// Picks the highest-bandwidth track within `estimate × safety_factor`,
    /// else the lowest. Without an estimate the current choice stands.
    pub fn evaluate(&self) -> usize {
        let current = self.selected_track();
        let Some(adaptive) = &self.adaptive else {
            return current;
        };
        let Some(estimate) = adaptive.estimator.estimate().bitrate() else {
            return current;
        };

        let available = (estimate as f64 * adaptive.safety_factor) as u64;
        let best = self
            .tracks
            .iter()
            .enumerate()
            .filter(|(_, track)| track.bandwidth <= available)
            .max_by_key(|(_, track)| track.bandwidth)
            .or_else(|| self.tracks.iter().enumerate().min_by_key(|(_, track)| track.bandwidth))
            .map(|(index, _)| index)
            .unwrap_or(current);

        if best != current {
            debug!(slot = %self.slot, from = current, to = best, available, "Adaptive switch");
            self.selected.store(best, Ordering::SeqCst);
        }
        best
    }

    /// Fetch and parse the media playlist of the selected track
    #[instrument(skip(self, parser), fields(slot = %self.slot))]
    pub async fn load_selected_playlist(
        &self,
        parser: &dyn ManifestParser,
    ) -> Result<MediaPlaylist> {
        let uri = self.selected().uri.clone();
        let data = self.data_source.fetch(&uri).await?;
        match parser.parse(&uri, &data)? {
            HlsPlaylist::Media(media) => Ok(media),
            HlsPlaylist::Master(_) => Err(Error::ManifestParse(format!(
                "expected a media playlist at {}",
                uri
            ))),
        }
    }
}

impl ChunkSource for HlsChunkSource {
    fn track_count(&self) -> usize {
        self.tracks.len()
    }

    fn track_name(&self, index: usize) -> Option<String> {
        self.tracks.get(index).map(|track| track.name.clone())
    }

    fn selected_track(&self) -> usize {
        self.selected.load(Ordering::SeqCst)
    }

    fn select_track(&self, index: usize) -> Result<()> {
        if index >= self.tracks.len() {
            return Err(Error::InvalidTrack {
                slot: self.slot,
                index,
                count: self.tracks.len(),
            });
        }
        debug!(slot = %self.slot, index, "Selected track");
        self.selected.store(index, Ordering::SeqCst);
        Ok(())
    }
}

impl std::fmt::Debug for HlsChunkSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HlsChunkSource")
            .field("slot", &self.slot)
            .field("tracks", &self.tracks)
            .field("selected", &self.selected_track())
            .field("adaptive", &self.adaptive.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bandwidth::{Clock, TransferListener, DEFAULT_MAX_WEIGHT};
    use crate::manifest::HlsParser;
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::sync::atomic::AtomicU64;

    struct StaticSource(&'static str);

    #[async_trait]
    impl DataSource for StaticSource {
        async fn fetch(&self, _url: &Url) -> Result<Bytes> {
            Ok(Bytes::from_static(self.0.as_bytes()))
        }
    }

    #[derive(Default)]
    struct ManualClock(AtomicU64);

    impl Clock for ManualClock {
        fn elapsed_ms(&self) -> u64 {
            self.0.load(Ordering::SeqCst)
        }
    }

    fn track(name: &str, bandwidth: u64) -> ChunkTrack {
        ChunkTrack {
            name: name.to_string(),
            uri: Url::parse(&format!("https://example.com/{}.m3u8", name)).unwrap(),
            bandwidth,
            language: None,
        }
    }

    fn request(adaptive: Option<AdaptiveConfig>) -> ChunkSourceRequest {
        ChunkSourceRequest {
            slot: TrackSlot::Video,
            tracks: vec![
                track("360p", 800_000),
                track("720p", 2_500_000),
                track("1080p", 5_000_000),
            ],
            data_source: Arc::new(StaticSource(
                "#EXTM3U\n#EXT-X-TARGETDURATION:6\n#EXTINF:6.0,\na.ts\n#EXT-X-ENDLIST\n",
            )),
            adaptive,
        }
    }

    #[test]
    fn test_select_track_bounds() {
        let source = HlsChunkSource::new(request(None)).unwrap();
        assert_eq!(source.track_count(), 3);
        source.select_track(2).unwrap();
        assert_eq!(source.selected().name, "1080p");
        let err = source.select_track(3).unwrap_err();
        assert!(matches!(err, Error::InvalidTrack { count: 3, .. }));
    }

    #[test]
    fn test_empty_tracks_rejected() {
        let mut request = request(None);
        request.tracks.clear();
        assert!(HlsChunkSource::new(request).is_err());
    }

    #[test]
    fn test_adaptive_evaluation_applies_safety_factor() {
        let clock = Arc::new(ManualClock::default());
        let estimator = Arc::new(BandwidthEstimator::with_clock(clock.clone(), DEFAULT_MAX_WEIGHT));
        let source = HlsChunkSource::new(request(Some(AdaptiveConfig {
            estimator: estimator.clone(),
            safety_factor: 0.8,
        })))
        .unwrap();

        // No estimate yet
        assert_eq!(source.evaluate(), 0);

        // 4 Mbps × 0.8 = 3.2 Mbps: 720p fits, 1080p does not
        estimator.on_transfer_start();
        estimator.on_bytes_transferred(500_000);
        clock.0.store(1000, Ordering::SeqCst);
        estimator.on_transfer_end();
        assert_eq!(source.evaluate(), 1);

        estimator.set_cap(100_000);
        assert_eq!(source.evaluate(), 0);
    }

    #[tokio::test]
    async fn test_load_selected_playlist() {
        let source = HlsChunkSource::new(request(None)).unwrap();
        let media = source.load_selected_playlist(&HlsParser::new()).await.unwrap();
        assert_eq!(media.segment_count, 1);
        assert_eq!(media.base_url.as_str(), "https://example.com/360p.m3u8");
    }
}
