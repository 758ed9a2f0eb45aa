//! Test doubles shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use lumen_core::{
    bandwidth::Clock,
    engine::{
        EngineConfig, EngineEvent, EngineEventSender, EngineMessage, MediaEngine,
        MediaEngineFactory, MessageTarget, RendererFactory, RendererSpec, TrackRenderer,
    },
    DataSource, DataSourceFactory, Error, PlaybackState, Result, SessionListener, TrackSlot,
    TransferListener, VideoSize, RENDERER_COUNT,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use url::Url;

/// Route `tracing` output through the test harness; honors `RUST_LOG`
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// =============================================================================
// Engine
// =============================================================================

/// Where an engine message was sent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Renderer(TrackSlot),
    ChunkSource,
}

/// One recorded engine call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Prepare { placeholders: Vec<TrackSlot> },
    Stop,
    Release,
    SetPlayWhenReady(bool),
    SeekTo(u64),
    Send(Target, EngineMessage),
    BlockingSend(Target, EngineMessage),
    SetEnabled(TrackSlot, bool),
}

#[derive(Default)]
pub struct EngineState {
    pub state: PlaybackState,
    pub play_when_ready: bool,
    pub position_ms: u64,
    pub calls: Vec<Call>,
    pub engines_created: usize,
    pub events: Option<EngineEventSender>,
}

/// Engine that records every call and applies chunk-source messages inline
pub struct MockEngine {
    state: Arc<Mutex<EngineState>>,
}

impl MockEngine {
    fn record(&self, call: Call) {
        self.state.lock().calls.push(call);
    }

    fn deliver(&self, target: &MessageTarget, message: &EngineMessage) -> Target {
        match target {
            MessageTarget::Renderer(renderer) => Target::Renderer(renderer.slot()),
            MessageTarget::ChunkSource(source) => {
                source
                    .handle_message(message)
                    .expect("chunk source rejected message");
                Target::ChunkSource
            }
        }
    }
}

impl MediaEngine for MockEngine {
    fn prepare(&mut self, renderers: [Arc<dyn TrackRenderer>; RENDERER_COUNT]) {
        let placeholders = renderers
            .iter()
            .filter(|renderer| renderer.is_placeholder())
            .map(|renderer| renderer.slot())
            .collect();
        self.record(Call::Prepare { placeholders });
    }

    fn stop(&mut self) {
        self.state.lock().state = PlaybackState::Idle;
        self.record(Call::Stop);
    }

    fn release(&mut self) {
        self.record(Call::Release);
    }

    fn playback_state(&self) -> PlaybackState {
        self.state.lock().state
    }

    fn current_position(&self) -> u64 {
        self.state.lock().position_ms
    }

    fn duration(&self) -> Option<u64> {
        Some(600_000)
    }

    fn buffered_position(&self) -> u64 {
        self.state.lock().position_ms + 10_000
    }

    fn buffered_percentage(&self) -> u8 {
        42
    }

    fn play_when_ready(&self) -> bool {
        self.state.lock().play_when_ready
    }

    fn set_play_when_ready(&mut self, play_when_ready: bool) {
        self.state.lock().play_when_ready = play_when_ready;
        self.record(Call::SetPlayWhenReady(play_when_ready));
    }

    fn seek_to(&mut self, position_ms: u64) {
        self.state.lock().position_ms = position_ms;
        self.record(Call::SeekTo(position_ms));
    }

    fn send_message(&mut self, target: MessageTarget, message: EngineMessage) {
        let target = self.deliver(&target, &message);
        self.record(Call::Send(target, message));
    }

    fn blocking_send_message(&mut self, target: MessageTarget, message: EngineMessage) {
        let target = self.deliver(&target, &message);
        self.record(Call::BlockingSend(target, message));
    }

    fn set_renderer_enabled(&mut self, slot: TrackSlot, enabled: bool) {
        self.record(Call::SetEnabled(slot, enabled));
    }
}

/// Creates [`MockEngine`]s sharing one recorded state
#[derive(Clone, Default)]
pub struct MockEngineFactory {
    pub state: Arc<Mutex<EngineState>>,
    pub renderers: Arc<MockRenderers>,
}

impl MockEngineFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    pub fn prepare_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, Call::Prepare { .. }))
            .count()
    }

    pub fn engines_created(&self) -> usize {
        self.state.lock().engines_created
    }

    /// Move the engine to `state` and post the matching event
    pub fn transition(&self, state: PlaybackState) {
        let (play_when_ready, events) = {
            let mut engine = self.state.lock();
            engine.state = state;
            (engine.play_when_ready, engine.events.clone())
        };
        if let Some(events) = events {
            events.send(EngineEvent::StateChanged {
                play_when_ready,
                state,
            });
        }
    }

    /// Post an event from the most recently created engine
    pub fn emit(&self, event: EngineEvent) {
        let events = self.state.lock().events.clone();
        events.expect("no engine created").send(event);
    }
}

impl MediaEngineFactory for MockEngineFactory {
    fn create(&self, _config: EngineConfig, events: EngineEventSender) -> Box<dyn MediaEngine> {
        {
            let mut state = self.state.lock();
            state.engines_created += 1;
            state.events = Some(events);
            state.state = PlaybackState::Idle;
            state.play_when_ready = false;
        }
        Box::new(MockEngine {
            state: Arc::clone(&self.state),
        })
    }

    fn renderer_factory(&self) -> Arc<dyn RendererFactory> {
        self.renderers.clone()
    }
}

// =============================================================================
// Renderers
// =============================================================================

pub struct MockRenderer {
    slot: TrackSlot,
}

impl TrackRenderer for MockRenderer {
    fn slot(&self) -> TrackSlot {
        self.slot
    }
}

/// Renderer factory that records the slot of every spec it is given
#[derive(Default)]
pub struct MockRenderers {
    pub created: Mutex<Vec<TrackSlot>>,
    pub fail: Mutex<Option<TrackSlot>>,
}

impl RendererFactory for MockRenderers {
    fn create_renderer(&self, spec: RendererSpec) -> Result<Arc<dyn TrackRenderer>> {
        let slot = spec.slot();
        if *self.fail.lock() == Some(slot) {
            return Err(Error::Internal(format!("no decoder for {}", slot)));
        }
        self.created.lock().push(slot);
        Ok(Arc::new(MockRenderer { slot }))
    }
}

// =============================================================================
// Data sources
// =============================================================================

/// Serves fixed documents and reports each fetch as one transfer
#[derive(Clone, Default)]
pub struct StaticDataSourceFactory {
    documents: Arc<Mutex<HashMap<String, Bytes>>>,
    offline: Arc<AtomicBool>,
    fetches: Arc<AtomicUsize>,
}

impl StaticDataSourceFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_document(self, uri: &str, body: &'static str) -> Self {
        self.documents
            .lock()
            .insert(uri.to_string(), Bytes::from_static(body.as_bytes()));
        self
    }

    /// While offline every fetch fails
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

struct StaticDataSource {
    factory: StaticDataSourceFactory,
    listener: Option<Arc<dyn TransferListener>>,
}

#[async_trait]
impl DataSource for StaticDataSource {
    async fn fetch(&self, url: &Url) -> Result<Bytes> {
        self.factory.fetches.fetch_add(1, Ordering::SeqCst);
        if self.factory.offline.load(Ordering::SeqCst) {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "network unreachable",
            )));
        }
        let body = self
            .factory
            .documents
            .lock()
            .get(url.as_str())
            .cloned()
            .ok_or_else(|| Error::Http {
                uri: url.to_string(),
                status: 404,
            })?;
        if let Some(listener) = &self.listener {
            listener.on_transfer_start();
            listener.on_bytes_transferred(body.len());
            listener.on_transfer_end();
        }
        Ok(body)
    }
}

impl DataSourceFactory for StaticDataSourceFactory {
    fn create(
        &self,
        listener: Option<Arc<dyn TransferListener>>,
        _user_agent: &str,
    ) -> Arc<dyn DataSource> {
        Arc::new(StaticDataSource {
            factory: self.clone(),
            listener,
        })
    }
}

// =============================================================================
// Clock and listeners
// =============================================================================

#[derive(Default)]
pub struct ManualClock(AtomicU64);

impl ManualClock {
    pub fn advance(&self, ms: u64) {
        self.0.fetch_add(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn elapsed_ms(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

/// Records every session callback
#[derive(Default)]
pub struct RecordingListener {
    pub states: Mutex<Vec<(bool, PlaybackState)>>,
    pub errors: Mutex<Vec<String>>,
    pub sizes: Mutex<Vec<VideoSize>>,
}

impl RecordingListener {
    pub fn states(&self) -> Vec<(bool, PlaybackState)> {
        self.states.lock().clone()
    }

    pub fn error_codes(&self) -> Vec<String> {
        self.errors.lock().clone()
    }
}

impl SessionListener for RecordingListener {
    fn on_state_changed(&self, play_when_ready: bool, state: PlaybackState) {
        self.states.lock().push((play_when_ready, state));
    }

    fn on_error(&self, error: &Error) {
        self.errors.lock().push(error.error_code().to_string());
    }

    fn on_video_size_changed(&self, size: VideoSize) {
        self.sizes.lock().push(size);
    }
}
