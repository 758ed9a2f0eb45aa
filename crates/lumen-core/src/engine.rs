//! Media engine seam
//!
//! The engine (demuxing, decoding, audio output) lives outside this crate.
//! Lumen builds renderer pipelines through a [`RendererFactory`], hands them
//! to a [`MediaEngine`] and consumes the [`EngineEvent`]s it posts back.

use crate::{
    bandwidth::{BandwidthSample, BandwidthSampleListener},
    error::AudioOutputError,
    session::ControlMessage,
    types::*,
    upstream::DataSource,
    Error, Result,
};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use url::Url;

/// Construction parameters for an engine instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    pub renderer_count: usize,
    pub min_buffer_ms: u64,
    pub max_buffer_ms: u64,
}

/// The playback engine driven by a session.
///
/// Methods are called on the control thread. `send_message` is
/// fire-and-forget; `blocking_send_message` returns only once the engine's
/// processing thread has handled the message.
pub trait MediaEngine: Send {
    fn prepare(&mut self, renderers: [Arc<dyn TrackRenderer>; RENDERER_COUNT]);
    fn stop(&mut self);
    fn release(&mut self);

    fn playback_state(&self) -> PlaybackState;
    fn current_position(&self) -> u64;
    fn duration(&self) -> Option<u64>;
    fn buffered_position(&self) -> u64;
    fn buffered_percentage(&self) -> u8;

    fn play_when_ready(&self) -> bool;
    fn set_play_when_ready(&mut self, play_when_ready: bool);
    fn seek_to(&mut self, position_ms: u64);

    fn send_message(&mut self, target: MessageTarget, message: EngineMessage);
    fn blocking_send_message(&mut self, target: MessageTarget, message: EngineMessage);

    fn set_renderer_enabled(&mut self, slot: TrackSlot, enabled: bool);
}

/// Creates engine instances and the renderers they accept
pub trait MediaEngineFactory: Send + Sync {
    fn create(&self, config: EngineConfig, events: EngineEventSender) -> Box<dyn MediaEngine>;

    /// Factory for renderers compatible with engines from this factory
    fn renderer_factory(&self) -> Arc<dyn RendererFactory>;
}

/// A per-track decode/render pipeline owned by the engine
pub trait TrackRenderer: Send + Sync {
    fn slot(&self) -> TrackSlot;

    /// Decoder counters, for renderers that decode
    fn codec_counters(&self) -> Option<CodecCounters> {
        None
    }

    fn is_placeholder(&self) -> bool {
        false
    }
}

/// Inert renderer standing in for a slot the source does not provide
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaceholderRenderer {
    slot: TrackSlot,
}

impl PlaceholderRenderer {
    pub fn new(slot: TrackSlot) -> Self {
        Self { slot }
    }

    pub fn shared(slot: TrackSlot) -> Arc<dyn TrackRenderer> {
        Arc::new(Self::new(slot))
    }
}

impl TrackRenderer for PlaceholderRenderer {
    fn slot(&self) -> TrackSlot {
        self.slot
    }

    fn is_placeholder(&self) -> bool {
        true
    }
}

/// Turns a manifest rendition into fetchable media segments
pub trait ChunkSource: Send + Sync {
    fn track_count(&self) -> usize;
    fn track_name(&self, index: usize) -> Option<String>;
    fn selected_track(&self) -> usize;
    fn select_track(&self, index: usize) -> Result<()>;

    /// Apply a message delivered by the engine's processing thread
    fn handle_message(&self, message: &EngineMessage) -> Result<()> {
        match message {
            EngineMessage::SelectTrack(index) => self.select_track(*index),
            EngineMessage::SetSurface(_) => Ok(()),
        }
    }
}

/// Recipient of an engine message
#[derive(Clone)]
pub enum MessageTarget {
    Renderer(Arc<dyn TrackRenderer>),
    ChunkSource(Arc<dyn ChunkSource>),
}

impl std::fmt::Debug for MessageTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageTarget::Renderer(renderer) => write!(f, "Renderer({})", renderer.slot()),
            MessageTarget::ChunkSource(source) => {
                write!(f, "ChunkSource({} tracks)", source.track_count())
            }
        }
    }
}

/// Messages delivered on the engine's processing thread
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineMessage {
    /// Attach (or with `None`, detach) the video output surface
    SetSurface(Option<Surface>),
    /// Switch the chunk source to another rendition
    SelectTrack(usize),
}

/// Where a sample source reads media from
#[derive(Clone)]
pub enum SampleInput {
    /// Segments produced by a chunk source
    Chunked(Arc<dyn ChunkSource>),
    /// A single container file read through a data source
    Extractor {
        uri: Url,
        data_source: Arc<dyn DataSource>,
    },
}

/// Description of a buffered sample source feeding renderers.
///
/// Specs sharing a `source_id` refer to the same sample source; the engine
/// instantiates it once and demultiplexes tracks to each renderer.
#[derive(Clone)]
pub struct SampleSourceSpec {
    pub source_id: TrackSlot,
    pub input: SampleInput,
    pub buffer_bytes: usize,
}

impl std::fmt::Debug for SampleSourceSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let input = match &self.input {
            SampleInput::Chunked(_) => "chunked".to_string(),
            SampleInput::Extractor { uri, .. } => format!("extractor {}", uri),
        };
        f.debug_struct("SampleSourceSpec")
            .field("source_id", &self.source_id)
            .field("input", &input)
            .field("buffer_bytes", &self.buffer_bytes)
            .finish()
    }
}

/// How a text renderer obtains cues
#[derive(Debug, Clone)]
pub enum TextSpec {
    /// Text tracks demultiplexed from a sample source
    Tracks(SampleSourceSpec),
    /// CEA-608 captions carried inside the main video stream
    Embedded608(SampleSourceSpec),
}

/// Request to the engine for one renderer
#[derive(Debug, Clone)]
pub enum RendererSpec {
    Video {
        source: SampleSourceSpec,
    },
    /// Audio reads from every listed source, switching between them by track
    Audio {
        sources: Vec<SampleSourceSpec>,
        capabilities: AudioCapabilities,
    },
    Text(TextSpec),
    Metadata {
        source: SampleSourceSpec,
    },
}

impl RendererSpec {
    pub fn slot(&self) -> TrackSlot {
        match self {
            RendererSpec::Video { .. } => TrackSlot::Video,
            RendererSpec::Audio { .. } => TrackSlot::Audio,
            RendererSpec::Text(_) => TrackSlot::Text,
            RendererSpec::Metadata { .. } => TrackSlot::Metadata,
        }
    }
}

/// Engine-supplied constructor for renderer pipelines
pub trait RendererFactory: Send + Sync {
    fn create_renderer(&self, spec: RendererSpec) -> Result<Arc<dyn TrackRenderer>>;
}

/// Why the engine switched formats on a source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionTrigger {
    Initial,
    Manual,
    Adaptive,
    Unknown,
}

/// Callbacks posted by the engine and its renderers
#[derive(Debug)]
pub enum EngineEvent {
    StateChanged {
        play_when_ready: bool,
        state: PlaybackState,
    },
    /// Unrecoverable playback failure
    PlayerError(String),
    DroppedFrames {
        count: u32,
        elapsed_ms: u64,
    },
    VideoSizeChanged(VideoSize),
    DecoderInitialized {
        decoder_name: String,
        elapsed_realtime_ms: u64,
        initialization_duration_ms: u64,
    },
    DecoderInitializationError(String),
    CryptoError(String),
    AudioOutput(AudioOutputError),
    Cues(Vec<Cue>),
    Metadata(Vec<Id3Frame>),
    DownstreamFormatChanged {
        source: TrackSlot,
        format: Format,
        trigger: SelectionTrigger,
        media_time_ms: u64,
    },
    LoadStarted {
        source: TrackSlot,
        length: Option<u64>,
        media_start_ms: u64,
        media_end_ms: u64,
    },
    LoadCompleted {
        source: TrackSlot,
        bytes_loaded: u64,
        elapsed_ms: u64,
    },
    LoadError {
        source: TrackSlot,
        error: String,
    },
    DrmSessionError(String),
    AvailableRangeChanged(TimeRange),
    BandwidthSample(BandwidthSample),
}

/// Posts engine events onto a session's control channel.
///
/// Events sent after the session is dropped are discarded.
#[derive(Clone)]
pub struct EngineEventSender {
    tx: UnboundedSender<ControlMessage>,
}

impl EngineEventSender {
    pub(crate) fn new(tx: UnboundedSender<ControlMessage>) -> Self {
        Self { tx }
    }

    pub fn send(&self, event: EngineEvent) {
        let _ = self.tx.send(ControlMessage::Engine(event));
    }

    /// Report a fatal engine failure
    pub fn send_error(&self, error: &Error) {
        self.send(EngineEvent::PlayerError(error.to_string()));
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl std::fmt::Debug for EngineEventSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineEventSender")
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

impl BandwidthSampleListener for EngineEventSender {
    fn on_bandwidth_sample(&self, sample: BandwidthSample) {
        self.send(EngineEvent::BandwidthSample(sample));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use tokio::sync::mpsc;

    struct Tracks {
        selected: Mutex<usize>,
    }

    impl ChunkSource for Tracks {
        fn track_count(&self) -> usize {
            2
        }

        fn track_name(&self, index: usize) -> Option<String> {
            (index < 2).then(|| format!("track {}", index))
        }

        fn selected_track(&self) -> usize {
            *self.selected.lock()
        }

        fn select_track(&self, index: usize) -> Result<()> {
            *self.selected.lock() = index;
            Ok(())
        }
    }

    #[test]
    fn test_placeholder_renderer() {
        let renderer = PlaceholderRenderer::shared(TrackSlot::Text);
        assert!(renderer.is_placeholder());
        assert_eq!(renderer.slot(), TrackSlot::Text);
        assert!(renderer.codec_counters().is_none());
    }

    #[test]
    fn test_chunk_source_handles_select_message() {
        let source = Tracks {
            selected: Mutex::new(0),
        };
        source.handle_message(&EngineMessage::SelectTrack(1)).unwrap();
        assert_eq!(source.selected_track(), 1);
        source.handle_message(&EngineMessage::SetSurface(None)).unwrap();
        assert_eq!(source.selected_track(), 1);
    }

    #[test]
    fn test_event_sender_posts_bandwidth_samples() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sender = EngineEventSender::new(tx);
        sender.on_bandwidth_sample(BandwidthSample {
            elapsed_ms: 10,
            bytes: 100,
            estimate: crate::bandwidth::BandwidthEstimate::Bitrate(80_000),
        });

        match rx.try_recv() {
            Ok(ControlMessage::Engine(EngineEvent::BandwidthSample(sample))) => {
                assert_eq!(sample.bytes, 100)
            }
            _ => panic!("expected a bandwidth sample"),
        }

        drop(rx);
        assert!(sender.is_closed());
        sender.send(EngineEvent::DrmSessionError("ignored".into()));
    }
}
