//! Event router
//!
//! Fans engine callbacks out to a small set of listener traits registered by
//! the host. Session-level events (state changes, fatal errors, video size)
//! are handed back to the caller as [`SessionSignal`]s rather than delivered
//! here, so the router never holds a reference to its session.

use crate::{
    bandwidth::{BandwidthEstimate, BandwidthEstimator, BandwidthSample},
    engine::{EngineEvent, SelectionTrigger, TrackRenderer},
    listener::{ListenerId, ListenerSet},
    types::*,
    Error,
};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

/// Diagnostic callbacks. All methods default to no-ops.
pub trait InfoListener: Send + Sync {
    fn on_video_format_enabled(
        &self,
        _format: &Format,
        _trigger: SelectionTrigger,
        _media_time_ms: u64,
    ) {
    }
    fn on_audio_format_enabled(
        &self,
        _format: &Format,
        _trigger: SelectionTrigger,
        _media_time_ms: u64,
    ) {
    }
    fn on_dropped_frames(&self, _count: u32, _elapsed_ms: u64) {}
    fn on_bandwidth_sample(&self, _sample: &BandwidthSample) {}
    fn on_load_started(
        &self,
        _source: TrackSlot,
        _length: Option<u64>,
        _media_start_ms: u64,
        _media_end_ms: u64,
    ) {
    }
    fn on_load_completed(&self, _source: TrackSlot, _bytes_loaded: u64, _elapsed_ms: u64) {}
    fn on_decoder_initialized(
        &self,
        _decoder_name: &str,
        _elapsed_realtime_ms: u64,
        _initialization_duration_ms: u64,
    ) {
    }
    fn on_available_range_changed(&self, _range: TimeRange) {}
}

/// Errors the engine recovers from (or that only matter for diagnostics)
pub trait InternalErrorListener: Send + Sync {
    fn on_renderer_initialization_error(&self, _error: &Error) {}
    /// Carries [`Error::AudioOutput`]
    fn on_audio_output_error(&self, _error: &Error) {}
    fn on_decoder_initialization_error(&self, _error: &str) {}
    fn on_crypto_error(&self, _error: &str) {}
    fn on_load_error(&self, _source: TrackSlot, _error: &str) {}
    /// Carries [`Error::DrmSession`]
    fn on_drm_session_error(&self, _error: &Error) {}
}

pub trait CaptionListener: Send + Sync {
    /// An empty slice clears any captions on screen
    fn on_cues(&self, cues: &[Cue]);
}

pub trait MetadataListener: Send + Sync {
    fn on_metadata(&self, frames: &[Id3Frame]);
}

/// Engine events the session itself must act on
#[derive(Debug)]
pub enum SessionSignal {
    StateChanged {
        play_when_ready: bool,
        state: PlaybackState,
    },
    Fatal(Error),
    VideoSizeChanged(VideoSize),
}

/// Read-only diagnostics snapshot
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnostics {
    pub video_format: Option<Format>,
    pub codec_counters: Option<CodecCounters>,
    pub bandwidth_estimate: BandwidthEstimate,
}

#[derive(Default)]
struct RouterState {
    video_format: Option<Format>,
    counters_source: Option<Arc<dyn TrackRenderer>>,
    estimator: Option<Arc<BandwidthEstimator>>,
}

/// Fan-in/fan-out hub between the engine and host listeners
pub struct EventRouter {
    info: ListenerSet<dyn InfoListener>,
    internal_errors: ListenerSet<dyn InternalErrorListener>,
    captions: ListenerSet<dyn CaptionListener>,
    metadata: ListenerSet<dyn MetadataListener>,
    selections: Arc<RwLock<TrackSlots<TrackSelection>>>,
    state: Mutex<RouterState>,
}

impl EventRouter {
    /// `selections` is the session's live selection table, read at delivery time
    pub fn new(selections: Arc<RwLock<TrackSlots<TrackSelection>>>) -> Self {
        Self {
            info: ListenerSet::new(),
            internal_errors: ListenerSet::new(),
            captions: ListenerSet::new(),
            metadata: ListenerSet::new(),
            selections,
            state: Mutex::new(RouterState::default()),
        }
    }

    pub fn add_info_listener(&self, listener: Arc<dyn InfoListener>) -> ListenerId {
        self.info.add(listener)
    }

    pub fn remove_info_listener(&self, id: ListenerId) -> bool {
        self.info.remove(id)
    }

    pub fn add_internal_error_listener(
        &self,
        listener: Arc<dyn InternalErrorListener>,
    ) -> ListenerId {
        self.internal_errors.add(listener)
    }

    pub fn remove_internal_error_listener(&self, id: ListenerId) -> bool {
        self.internal_errors.remove(id)
    }

    pub fn add_caption_listener(&self, listener: Arc<dyn CaptionListener>) -> ListenerId {
        self.captions.add(listener)
    }

    pub fn remove_caption_listener(&self, id: ListenerId) -> bool {
        self.captions.remove(id)
    }

    pub fn add_metadata_listener(&self, listener: Arc<dyn MetadataListener>) -> ListenerId {
        self.metadata.add(listener)
    }

    pub fn remove_metadata_listener(&self, id: ListenerId) -> bool {
        self.metadata.remove(id)
    }

    pub fn clear_listeners(&self) {
        self.info.clear();
        self.internal_errors.clear();
        self.captions.clear();
        self.metadata.clear();
    }

    /// Deliver one engine event; returns the part the session must handle
    pub fn route(&self, event: EngineEvent) -> Option<SessionSignal> {
        match event {
            EngineEvent::StateChanged {
                play_when_ready,
                state,
            } => {
                return Some(SessionSignal::StateChanged {
                    play_when_ready,
                    state,
                })
            }
            EngineEvent::PlayerError(message) => {
                return Some(SessionSignal::Fatal(Error::EngineFatal(message)))
            }
            EngineEvent::VideoSizeChanged(size) => {
                return Some(SessionSignal::VideoSizeChanged(size))
            }
            EngineEvent::DroppedFrames { count, elapsed_ms } => {
                self.info.for_each(|l| l.on_dropped_frames(count, elapsed_ms));
            }
            EngineEvent::DecoderInitialized {
                decoder_name,
                elapsed_realtime_ms,
                initialization_duration_ms,
            } => {
                self.info.for_each(|l| {
                    l.on_decoder_initialized(
                        &decoder_name,
                        elapsed_realtime_ms,
                        initialization_duration_ms,
                    )
                });
            }
            EngineEvent::DecoderInitializationError(error) => {
                warn!(%error, "Decoder initialization failed");
                self.internal_errors
                    .for_each(|l| l.on_decoder_initialization_error(&error));
            }
            EngineEvent::CryptoError(error) => {
                warn!(%error, "Crypto error");
                self.internal_errors.for_each(|l| l.on_crypto_error(&error));
            }
            EngineEvent::AudioOutput(error) => {
                debug!(%error, "Audio output error");
                let error = Error::AudioOutput(error);
                self.internal_errors.for_each(|l| l.on_audio_output_error(&error));
            }
            EngineEvent::Cues(cues) => self.deliver_cues(&cues),
            EngineEvent::Metadata(frames) => self.deliver_metadata(&frames),
            EngineEvent::DownstreamFormatChanged {
                source,
                format,
                trigger,
                media_time_ms,
            } => match source {
                TrackSlot::Video => {
                    self.state.lock().video_format = Some(format.clone());
                    self.info
                        .for_each(|l| l.on_video_format_enabled(&format, trigger, media_time_ms));
                }
                TrackSlot::Audio => {
                    self.info
                        .for_each(|l| l.on_audio_format_enabled(&format, trigger, media_time_ms));
                }
                _ => {}
            },
            EngineEvent::LoadStarted {
                source,
                length,
                media_start_ms,
                media_end_ms,
            } => {
                self.info
                    .for_each(|l| l.on_load_started(source, length, media_start_ms, media_end_ms));
            }
            EngineEvent::LoadCompleted {
                source,
                bytes_loaded,
                elapsed_ms,
            } => {
                self.info
                    .for_each(|l| l.on_load_completed(source, bytes_loaded, elapsed_ms));
            }
            EngineEvent::LoadError { source, error } => {
                warn!(%source, %error, "Load error");
                self.internal_errors.for_each(|l| l.on_load_error(source, &error));
            }
            EngineEvent::DrmSessionError(error) => {
                warn!(%error, "DRM session error");
                let error = Error::DrmSession(error);
                self.internal_errors.for_each(|l| l.on_drm_session_error(&error));
            }
            EngineEvent::AvailableRangeChanged(range) => {
                self.info.for_each(|l| l.on_available_range_changed(range));
            }
            EngineEvent::BandwidthSample(sample) => {
                self.info.for_each(|l| l.on_bandwidth_sample(&sample));
            }
        }
        None
    }

    /// Deliver caption cues. An empty batch always goes out so that stale
    /// captions are cleared even while the text slot is disabled.
    pub fn deliver_cues(&self, cues: &[Cue]) {
        if !cues.is_empty() && self.is_disabled(TrackSlot::Text) {
            return;
        }
        self.captions.for_each(|l| l.on_cues(cues));
    }

    pub fn deliver_metadata(&self, frames: &[Id3Frame]) {
        if self.is_disabled(TrackSlot::Metadata) {
            return;
        }
        self.metadata.for_each(|l| l.on_metadata(frames));
    }

    /// Report a failed renderer build
    pub fn on_build_error(&self, error: &Error) {
        self.internal_errors
            .for_each(|l| l.on_renderer_initialization_error(error));
    }

    /// Bind diagnostics to freshly built renderers
    pub fn on_renderers_built(
        &self,
        renderers: &TrackSlots<Arc<dyn TrackRenderer>>,
        estimator: Option<Arc<BandwidthEstimator>>,
    ) {
        let video = &renderers[TrackSlot::Video];
        let counters_source = if video.is_placeholder() {
            &renderers[TrackSlot::Audio]
        } else {
            video
        };
        let mut state = self.state.lock();
        state.counters_source = Some(Arc::clone(counters_source));
        state.estimator = estimator;
    }

    /// Forget the video format and renderer bindings of the previous build
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.video_format = None;
        state.counters_source = None;
    }

    pub fn video_format(&self) -> Option<Format> {
        self.state.lock().video_format.clone()
    }

    pub fn codec_counters(&self) -> Option<CodecCounters> {
        self.state
            .lock()
            .counters_source
            .as_ref()
            .and_then(|renderer| renderer.codec_counters())
    }

    pub fn bandwidth_estimator(&self) -> Option<Arc<BandwidthEstimator>> {
        self.state.lock().estimator.clone()
    }

    pub fn diagnostics(&self) -> Diagnostics {
        let state = self.state.lock();
        Diagnostics {
            video_format: state.video_format.clone(),
            codec_counters: state
                .counters_source
                .as_ref()
                .and_then(|renderer| renderer.codec_counters()),
            bandwidth_estimate: state
                .estimator
                .as_ref()
                .map(|estimator| estimator.estimate())
                .unwrap_or(BandwidthEstimate::NoEstimate),
        }
    }

    fn is_disabled(&self, slot: TrackSlot) -> bool {
        self.selections.read()[slot].is_disabled()
    }
}

impl std::fmt::Debug for EventRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventRouter")
            .field("info", &self.info)
            .field("internal_errors", &self.internal_errors)
            .field("captions", &self.captions)
            .field("metadata", &self.metadata)
            .finish()
    }
}
