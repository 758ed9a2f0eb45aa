//! Renderer build pipeline
//!
//! A [`RendererBuilder`] turns a source into four renderer pipelines, one per
//! [`TrackSlot`]. Builds run asynchronously and report through a
//! [`BuildCallback`] bound to a [`BuildToken`]:
//!
//! ```text
//! session.prepare()
//!   └─ builder.build(callback)          issue token N
//!        ├─ fetch manifest              check token
//!        ├─ select variants             check token
//!        ├─ construct renderers         check token
//!        └─ callback.on_built(..)  ──►  control channel ──► session (drops if N is stale)
//! ```

mod chunk;
mod hls;
mod progressive;
mod variants;

pub use chunk::{
    AdaptiveConfig, ChunkSourceFactory, ChunkSourceRequest, ChunkTrack, HlsChunkSource,
    HlsChunkSourceFactory,
};
pub use hls::HlsRendererBuilder;
pub use progressive::ProgressiveRendererBuilder;
pub use variants::{select_variants, DecoderCapabilities, DefaultDecoderCapabilities};

use crate::{
    bandwidth::{BandwidthEstimator, Clock, SystemClock},
    config::DecoderProfile,
    engine::{ChunkSource, EngineEventSender, PlaceholderRenderer, RendererFactory, TrackRenderer},
    session::ControlMessage,
    types::*,
    Error, Result,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, warn};

/// Builds the renderers for one source
pub trait RendererBuilder: Send {
    /// Start building. Exactly one of `on_built`/`on_error` is posted through
    /// `callback` unless the build is canceled first.
    fn build(&mut self, callback: BuildCallback);

    /// Abandon any in-flight build; its callback will not fire
    fn cancel(&mut self);

    /// Upper bound applied to the bandwidth estimate of current and future builds
    fn set_bandwidth_cap(&mut self, cap: u64);
}

/// Cancellation handle for one build invocation
#[derive(Debug, Clone)]
pub struct BuildToken {
    generation: u64,
    current: Arc<AtomicU64>,
}

impl BuildToken {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Returns false once this build was canceled or superseded
    pub fn is_valid(&self) -> bool {
        self.current.load(Ordering::SeqCst) == self.generation
    }

    /// Invalidate this token; a newer token is left untouched
    pub fn cancel(&self) {
        let _ = self.current.compare_exchange(
            self.generation,
            self.generation + 1,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
    }
}

/// Issues tokens; issuing a new one invalidates all earlier ones
#[derive(Debug, Default)]
pub struct BuildTokenSource {
    current: Arc<AtomicU64>,
}

impl BuildTokenSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn issue(&self) -> BuildToken {
        let generation = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        BuildToken {
            generation,
            current: Arc::clone(&self.current),
        }
    }

    pub fn invalidate(&self) {
        self.current.fetch_add(1, Ordering::SeqCst);
    }
}

/// Completion handle for one build.
///
/// Consumed by [`on_built`](Self::on_built) or [`on_error`](Self::on_error).
/// Dropping it unconsumed while the build is still current reports
/// [`Error::BuildAbandoned`].
pub struct BuildCallback {
    token: BuildToken,
    tx: Option<UnboundedSender<ControlMessage>>,
}

impl BuildCallback {
    pub(crate) fn new(token: BuildToken, tx: UnboundedSender<ControlMessage>) -> Self {
        Self { token, tx: Some(tx) }
    }

    pub fn token(&self) -> &BuildToken {
        &self.token
    }

    pub fn is_canceled(&self) -> bool {
        !self.token.is_valid()
    }

    pub fn on_built(mut self, renderers: BuiltRenderers) {
        self.post(Ok(renderers));
    }

    pub fn on_error(mut self, error: Error) {
        self.post(Err(error));
    }

    fn post(&mut self, outcome: Result<BuiltRenderers>) {
        let Some(tx) = self.tx.take() else {
            return;
        };
        if !self.token.is_valid() {
            debug!(generation = self.token.generation, "Discarding result of canceled build");
            return;
        }
        let _ = tx.send(ControlMessage::Build {
            token: self.token.clone(),
            outcome,
        });
    }
}

impl Drop for BuildCallback {
    fn drop(&mut self) {
        if self.tx.is_some() && self.token.is_valid() {
            warn!(generation = self.token.generation, "Build callback dropped without a result");
            self.post(Err(Error::BuildAbandoned));
        }
    }
}

impl std::fmt::Debug for BuildCallback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildCallback")
            .field("generation", &self.token.generation)
            .field("pending", &self.tx.is_some())
            .finish()
    }
}

/// Result of a successful build
pub struct BuiltRenderers {
    /// `None` slots are filled with placeholders by the session
    pub renderers: TrackSlots<Option<Arc<dyn TrackRenderer>>>,
    pub track_names: TrackSlots<Vec<String>>,
    /// Chunk sources of slots offering several renditions
    pub multi_track_sources: TrackSlots<Option<Arc<dyn ChunkSource>>>,
    pub estimator: Option<Arc<BandwidthEstimator>>,
}

impl BuiltRenderers {
    pub fn new() -> Self {
        Self {
            renderers: TrackSlots::default(),
            track_names: TrackSlots::default(),
            multi_track_sources: TrackSlots::default(),
            estimator: None,
        }
    }

    pub fn with_renderer(mut self, renderer: Arc<dyn TrackRenderer>, names: Vec<String>) -> Self {
        let slot = renderer.slot();
        self.renderers[slot] = Some(renderer);
        self.track_names[slot] = names;
        self
    }

    pub fn with_multi_track_source(
        mut self,
        slot: TrackSlot,
        source: Arc<dyn ChunkSource>,
    ) -> Self {
        self.multi_track_sources[slot] = Some(source);
        self
    }

    pub fn with_estimator(mut self, estimator: Arc<BandwidthEstimator>) -> Self {
        self.estimator = Some(estimator);
        self
    }

    /// Replace missing slots with placeholders
    pub fn fill_placeholders(mut self) -> Self {
        for slot in TrackSlot::ALL {
            if self.renderers[slot].is_none() {
                self.renderers[slot] = Some(PlaceholderRenderer::shared(slot));
                self.track_names[slot].clear();
            }
        }
        self
    }
}

impl Default for BuiltRenderers {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for BuiltRenderers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let present: Vec<_> = self
            .renderers
            .iter()
            .filter(|(_, r)| r.as_ref().is_some_and(|r| !r.is_placeholder()))
            .map(|(slot, _)| slot)
            .collect();
        f.debug_struct("BuiltRenderers")
            .field("present", &present)
            .field("track_names", &self.track_names)
            .finish()
    }
}

/// Engine-side collaborators available to every builder
#[derive(Clone)]
pub struct BuildContext {
    pub renderer_factory: Arc<dyn RendererFactory>,
    pub decoder_capabilities: Arc<dyn DecoderCapabilities>,
    pub audio_capabilities: AudioCapabilities,
    pub clock: Arc<dyn Clock>,
    pub events: EngineEventSender,
}

impl BuildContext {
    pub fn new(renderer_factory: Arc<dyn RendererFactory>, events: EngineEventSender) -> Self {
        Self {
            renderer_factory,
            decoder_capabilities: Arc::new(DefaultDecoderCapabilities::new(
                DecoderProfile::default(),
            )),
            audio_capabilities: AudioCapabilities::default(),
            clock: Arc::new(SystemClock::new()),
            events,
        }
    }

    pub fn with_decoder_capabilities(mut self, capabilities: Arc<dyn DecoderCapabilities>) -> Self {
        self.decoder_capabilities = capabilities;
        self
    }

    pub fn with_audio_capabilities(mut self, capabilities: AudioCapabilities) -> Self {
        self.audio_capabilities = capabilities;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

impl std::fmt::Debug for BuildContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildContext")
            .field("audio_capabilities", &self.audio_capabilities)
            .field("events", &self.events)
            .finish()
    }
}
