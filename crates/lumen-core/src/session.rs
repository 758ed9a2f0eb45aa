//! Playback Session - state machine driving one engine instance
//!
//! Coordinates:
//! - Renderer builds (prepare, cancellation, hand-off to the engine)
//! - Per-slot track selection, mute and background policies
//! - Output surface hand-off
//! - Coalesced state reporting
//!
//! The session lives on the host's control thread. Build results and engine
//! callbacks are queued on a control channel and applied by
//! [`PlaybackSession::dispatch_pending`] or [`PlaybackSession::next_event`].

use crate::{
    bandwidth::BandwidthEstimate,
    builder::{
        BuildCallback, BuildContext, BuildToken, BuildTokenSource, BuiltRenderers, RendererBuilder,
    },
    config::SessionConfig,
    engine::{
        ChunkSource, EngineConfig, EngineEvent, EngineEventSender, EngineMessage, MediaEngine,
        MediaEngineFactory, MessageTarget, PlaceholderRenderer, RendererFactory, TrackRenderer,
    },
    listener::{ListenerId, ListenerSet},
    router::{Diagnostics, EventRouter, SessionSignal},
    types::*,
    Error, Result,
};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, warn};

/// Work posted onto a session's control channel
pub(crate) enum ControlMessage {
    Engine(EngineEvent),
    Build {
        token: BuildToken,
        outcome: Result<BuiltRenderers>,
    },
}

/// Host-facing session callbacks. All methods default to no-ops.
pub trait SessionListener: Send + Sync {
    fn on_state_changed(&self, _play_when_ready: bool, _state: PlaybackState) {}
    fn on_error(&self, _error: &Error) {}
    fn on_video_size_changed(&self, _size: VideoSize) {}
}

/// Playback session managing one engine instance
pub struct PlaybackSession {
    id: SessionId,
    engine: Box<dyn MediaEngine>,
    renderer_factory: Arc<dyn RendererFactory>,
    router: Arc<EventRouter>,
    listeners: ListenerSet<dyn SessionListener>,
    builder: Option<Box<dyn RendererBuilder>>,
    tokens: BuildTokenSource,
    control_tx: UnboundedSender<ControlMessage>,
    control_rx: UnboundedReceiver<ControlMessage>,
    build_state: BuildState,
    /// Shared with the router, which reads it at delivery time
    selections: Arc<RwLock<TrackSlots<TrackSelection>>>,
    renderers: Option<TrackSlots<Arc<dyn TrackRenderer>>>,
    track_names: TrackSlots<Vec<String>>,
    multi_track_sources: TrackSlots<Option<Arc<dyn ChunkSource>>>,
    surface: Option<Surface>,
    backgrounded: bool,
    video_to_restore: TrackSelection,
    muted: bool,
    audio_to_restore: TrackSelection,
    last_reported: (bool, PlaybackState),
    released: bool,
}

impl PlaybackSession {
    /// Create a session and its engine instance
    pub fn new(engine_factory: &dyn MediaEngineFactory, config: SessionConfig) -> Result<Self> {
        config.validate()?;
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let engine = engine_factory.create(
            EngineConfig {
                renderer_count: RENDERER_COUNT,
                min_buffer_ms: config.min_buffer_ms,
                max_buffer_ms: config.max_buffer_ms,
            },
            EngineEventSender::new(control_tx.clone()),
        );

        let mut initial = TrackSlots::default();
        initial[TrackSlot::Text] = TrackSelection::Disabled;
        let selections = Arc::new(RwLock::new(initial));

        let id = SessionId::new();
        info!(session_id = %id, "Created playback session");

        Ok(Self {
            id,
            engine,
            renderer_factory: engine_factory.renderer_factory(),
            router: Arc::new(EventRouter::new(Arc::clone(&selections))),
            listeners: ListenerSet::new(),
            builder: None,
            tokens: BuildTokenSource::new(),
            control_tx,
            control_rx,
            build_state: BuildState::Idle,
            selections,
            renderers: None,
            track_names: TrackSlots::default(),
            multi_track_sources: TrackSlots::default(),
            surface: None,
            backgrounded: false,
            video_to_restore: TrackSelection::DEFAULT,
            muted: false,
            audio_to_restore: TrackSelection::DEFAULT,
            last_reported: (false, PlaybackState::Idle),
            released: false,
        })
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Event router for diagnostic, caption, metadata and internal-error listeners
    pub fn router(&self) -> &Arc<EventRouter> {
        &self.router
    }

    /// Collaborators a renderer builder for this session needs
    pub fn build_context(&self) -> BuildContext {
        BuildContext::new(
            Arc::clone(&self.renderer_factory),
            EngineEventSender::new(self.control_tx.clone()),
        )
    }

    pub fn add_listener(&self, listener: Arc<dyn SessionListener>) -> ListenerId {
        self.listeners.add(listener)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }

    pub fn clear_listeners(&self) {
        self.listeners.clear();
    }

    /// Install the builder used by [`prepare`](Self::prepare)
    pub fn set_renderer_builder(&mut self, builder: Box<dyn RendererBuilder>) -> Result<()> {
        self.ensure_live()?;
        if let Some(mut previous) = self.builder.replace(builder) {
            previous.cancel();
            self.tokens.invalidate();
            if self.build_state == BuildState::Building {
                self.build_state = BuildState::Idle;
                self.report_state();
            }
        }
        Ok(())
    }

    /// Forwarded to the renderer builder
    pub fn set_bandwidth_cap(&mut self, cap: u64) -> Result<()> {
        self.ensure_live()?;
        if let Some(builder) = self.builder.as_mut() {
            builder.set_bandwidth_cap(cap);
        }
        Ok(())
    }

    /// Start (or restart) building renderers for the current source
    pub fn prepare(&mut self) -> Result<()> {
        self.ensure_live()?;
        if self.builder.is_none() {
            return Err(Error::NoSource);
        }

        if self.build_state == BuildState::Built {
            self.engine.stop();
        }
        self.cancel_build();

        self.router.reset();
        self.renderers = None;
        self.track_names = TrackSlots::default();
        self.multi_track_sources = TrackSlots::default();

        self.build_state = BuildState::Building;
        self.report_state();

        let token = self.tokens.issue();
        debug!(session_id = %self.id, generation = token.generation(), "Building renderers");
        let callback = BuildCallback::new(token, self.control_tx.clone());
        if let Some(builder) = self.builder.as_mut() {
            builder.build(callback);
        }
        Ok(())
    }

    /// Stop playback; renderers must be prepared again
    pub fn stop(&mut self) -> Result<()> {
        self.ensure_live()?;
        self.engine.stop();
        match self.build_state {
            BuildState::Building => {
                debug!(session_id = %self.id, "Stopped while building, canceling build");
                self.cancel_build();
            }
            BuildState::Built => self.renderers = None,
            BuildState::Idle => {}
        }
        self.build_state = BuildState::Idle;
        self.report_state();
        Ok(())
    }

    /// Tear down the session. Later commands fail with [`Error::Released`].
    pub fn release(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        if let Some(mut builder) = self.builder.take() {
            builder.cancel();
        }
        self.tokens.invalidate();
        self.build_state = BuildState::Idle;

        self.engine.stop();
        self.engine.release();
        self.surface = None;
        self.renderers = None;
        self.multi_track_sources = TrackSlots::default();
        self.router.reset();
        self.released = true;
        info!(session_id = %self.id, "Released playback session");
        Ok(())
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    pub fn set_play_when_ready(&mut self, play_when_ready: bool) -> Result<()> {
        self.ensure_live()?;
        self.engine.set_play_when_ready(play_when_ready);
        self.report_state();
        Ok(())
    }

    pub fn play_when_ready(&self) -> bool {
        !self.released && self.engine.play_when_ready()
    }

    pub fn seek_to(&mut self, position_ms: u64) -> Result<()> {
        self.ensure_live()?;
        self.engine.seek_to(position_ms);
        Ok(())
    }

    /// Reported state: `Preparing` while renderers are being built or handed over
    pub fn playback_state(&self) -> PlaybackState {
        if self.released {
            return PlaybackState::Idle;
        }
        match self.build_state {
            BuildState::Building => PlaybackState::Preparing,
            BuildState::Built if self.engine.playback_state() == PlaybackState::Idle => {
                PlaybackState::Preparing
            }
            _ => self.engine.playback_state(),
        }
    }

    pub fn current_position(&self) -> u64 {
        if self.released {
            0
        } else {
            self.engine.current_position()
        }
    }

    pub fn duration(&self) -> Option<u64> {
        if self.released {
            None
        } else {
            self.engine.duration()
        }
    }

    pub fn buffered_position(&self) -> u64 {
        if self.released {
            0
        } else {
            self.engine.buffered_position()
        }
    }

    pub fn buffered_percentage(&self) -> u8 {
        if self.released {
            0
        } else {
            self.engine.buffered_percentage()
        }
    }

    pub fn track_count(&self, slot: TrackSlot) -> usize {
        match &self.multi_track_sources[slot] {
            Some(source) => source.track_count(),
            None => self.track_names[slot].len(),
        }
    }

    pub fn track_names(&self, slot: TrackSlot) -> Vec<String> {
        self.track_names[slot].clone()
    }

    pub fn selected_track(&self, slot: TrackSlot) -> TrackSelection {
        self.selections.read()[slot]
    }

    /// Change the selection for a slot; unchanged selections are ignored
    pub fn select_track(&mut self, slot: TrackSlot, selection: TrackSelection) -> Result<()> {
        self.ensure_live()?;
        if self.selections.read()[slot] == selection {
            return Ok(());
        }

        if let TrackSelection::Track(index) = selection {
            if self.renderers.is_some() {
                let count = self.track_count(slot);
                if count > 0 && index >= count {
                    return Err(Error::InvalidTrack { slot, index, count });
                }
            }
        }

        debug!(%slot, %selection, "Track selection changed");
        self.selections.write()[slot] = selection;
        self.push_selection(slot);

        if slot == TrackSlot::Text && selection.is_disabled() {
            self.router.deliver_cues(&[]);
        }
        self.report_state();
        Ok(())
    }

    /// Disable video and release the surface while in the background
    pub fn set_backgrounded(&mut self, backgrounded: bool) -> Result<()> {
        self.ensure_live()?;
        if self.backgrounded == backgrounded {
            return Ok(());
        }
        if backgrounded {
            let current = self.selected_track(TrackSlot::Video);
            self.select_track(TrackSlot::Video, TrackSelection::Disabled)?;
            self.video_to_restore = current;
            self.blocking_clear_surface()?;
        } else {
            self.select_track(TrackSlot::Video, self.video_to_restore)?;
        }
        self.backgrounded = backgrounded;
        Ok(())
    }

    pub fn is_backgrounded(&self) -> bool {
        self.backgrounded
    }

    pub fn set_mute(&mut self, muted: bool) -> Result<()> {
        self.ensure_live()?;
        if self.muted == muted {
            return Ok(());
        }
        if muted {
            let current = self.selected_track(TrackSlot::Audio);
            self.select_track(TrackSlot::Audio, TrackSelection::Disabled)?;
            self.audio_to_restore = current;
        } else {
            self.select_track(TrackSlot::Audio, self.audio_to_restore)?;
        }
        self.muted = muted;
        Ok(())
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    /// Hand the output surface to the video renderer, or clear it with `None`.
    ///
    /// Deferred until a video renderer exists.
    pub fn set_surface(&mut self, surface: Option<Surface>) -> Result<()> {
        self.ensure_live()?;
        self.surface = surface;
        self.push_surface(false);
        Ok(())
    }

    /// Clear the surface, returning once the engine no longer references it
    pub fn blocking_clear_surface(&mut self) -> Result<()> {
        self.ensure_live()?;
        self.surface = None;
        self.push_surface(true);
        Ok(())
    }

    pub fn surface(&self) -> Option<Surface> {
        self.surface
    }

    pub fn diagnostics(&self) -> Diagnostics {
        self.router.diagnostics()
    }

    pub fn bandwidth_estimate(&self) -> BandwidthEstimate {
        self.router.diagnostics().bandwidth_estimate
    }

    /// Apply every queued build result and engine event without waiting
    pub fn dispatch_pending(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(message) = self.control_rx.try_recv() {
            self.handle(message);
            handled += 1;
        }
        handled
    }

    /// Wait for the next queued message and apply it.
    ///
    /// Returns false once the session is released.
    pub async fn next_event(&mut self) -> bool {
        if self.released {
            return false;
        }
        match self.control_rx.recv().await {
            Some(message) => {
                self.handle(message);
                true
            }
            None => false,
        }
    }

    fn handle(&mut self, message: ControlMessage) {
        if self.released {
            debug!(session_id = %self.id, "Dropping message for released session");
            return;
        }
        match message {
            ControlMessage::Engine(event) => {
                if let Some(signal) = self.router.route(event) {
                    self.on_signal(signal);
                }
            }
            ControlMessage::Build { token, outcome } => {
                if !token.is_valid() {
                    debug!(generation = token.generation(), "Dropping stale build result");
                    return;
                }
                match outcome {
                    Ok(built) => self.on_renderers_built(built),
                    Err(error) => self.on_build_error(error),
                }
            }
        }
    }

    fn on_signal(&mut self, signal: SessionSignal) {
        match signal {
            SessionSignal::StateChanged { .. } => self.report_state(),
            SessionSignal::Fatal(error) => {
                warn!(session_id = %self.id, %error, "Engine error");
                if self.build_state == BuildState::Building {
                    self.cancel_build();
                }
                self.build_state = BuildState::Idle;
                self.listeners.for_each(|l| l.on_error(&error));
                self.report_state();
            }
            SessionSignal::VideoSizeChanged(size) => {
                self.listeners.for_each(|l| l.on_video_size_changed(size));
            }
        }
    }

    fn on_renderers_built(&mut self, built: BuiltRenderers) {
        let BuiltRenderers {
            mut renderers,
            track_names,
            multi_track_sources,
            estimator,
        } = built;
        let renderers = TrackSlots::from_fn(|slot| {
            renderers[slot]
                .take()
                .unwrap_or_else(|| PlaceholderRenderer::shared(slot))
        });

        self.track_names = track_names;
        self.multi_track_sources = multi_track_sources;
        self.renderers = Some(renderers.clone());

        for slot in TrackSlot::ALL {
            self.clamp_selection(slot);
            self.apply_initial_selection(slot);
        }
        self.push_surface(false);
        self.engine.prepare(renderers.clone().into_array());
        self.build_state = BuildState::Built;
        self.router.on_renderers_built(&renderers, estimator);

        info!(session_id = %self.id, "Renderers handed to engine");
        self.report_state();
    }

    fn on_build_error(&mut self, error: Error) {
        warn!(session_id = %self.id, %error, phase = ?error.build_phase(), "Renderer build failed");
        self.listeners.for_each(|l| l.on_error(&error));
        self.router.on_build_error(&error);
        self.build_state = BuildState::Idle;
        self.report_state();
    }

    /// Fall back to the first track when a selection carried over from an
    /// earlier build is out of range for this one
    fn clamp_selection(&mut self, slot: TrackSlot) {
        let count = self.track_count(slot);
        let clamp = |selection: TrackSelection| match selection {
            TrackSelection::Track(index) if count > 0 && index >= count => {
                warn!(%slot, index, count, "Selected track missing from new build, using track 0");
                TrackSelection::Track(0)
            }
            other => other,
        };

        let selected = clamp(self.selected_track(slot));
        self.selections.write()[slot] = selected;
        match slot {
            TrackSlot::Audio => self.audio_to_restore = clamp(self.audio_to_restore),
            TrackSlot::Video => self.video_to_restore = clamp(self.video_to_restore),
            _ => {}
        }
    }

    /// Selection applied to freshly built renderers before the engine is prepared
    fn apply_initial_selection(&mut self, slot: TrackSlot) {
        match self.selected_track(slot) {
            TrackSelection::Disabled => self.engine.set_renderer_enabled(slot, false),
            TrackSelection::Track(index) => {
                if let Some(source) = &self.multi_track_sources[slot] {
                    if source.selected_track() != index {
                        self.engine.send_message(
                            MessageTarget::ChunkSource(Arc::clone(source)),
                            EngineMessage::SelectTrack(index),
                        );
                    }
                }
                self.engine.set_renderer_enabled(slot, true);
            }
        }
    }

    fn push_selection(&mut self, slot: TrackSlot) {
        if self.renderers.is_none() {
            return;
        }
        match self.selected_track(slot) {
            TrackSelection::Disabled => self.engine.set_renderer_enabled(slot, false),
            TrackSelection::Track(index) => match self.multi_track_sources[slot].clone() {
                Some(source) => {
                    // The renderer must not see the new rendition while bound to the old one
                    let play_when_ready = self.engine.play_when_ready();
                    self.engine.set_play_when_ready(false);
                    self.engine.set_renderer_enabled(slot, false);
                    self.engine.send_message(
                        MessageTarget::ChunkSource(source),
                        EngineMessage::SelectTrack(index),
                    );
                    self.engine.set_renderer_enabled(slot, true);
                    self.engine.set_play_when_ready(play_when_ready);
                }
                None => self.engine.set_renderer_enabled(slot, true),
            },
        }
    }

    fn push_surface(&mut self, blocking: bool) {
        let Some(video) = self
            .renderers
            .as_ref()
            .map(|renderers| Arc::clone(&renderers[TrackSlot::Video]))
            .filter(|video| !video.is_placeholder())
        else {
            debug!("No video renderer yet, deferring surface hand-off");
            return;
        };
        let target = MessageTarget::Renderer(video);
        let message = EngineMessage::SetSurface(self.surface);
        if blocking {
            self.engine.blocking_send_message(target, message);
        } else {
            self.engine.send_message(target, message);
        }
    }

    fn report_state(&mut self) {
        let reported = (self.engine.play_when_ready(), self.playback_state());
        if reported == self.last_reported {
            return;
        }
        self.last_reported = reported;
        let (play_when_ready, state) = reported;
        info!(session_id = %self.id, play_when_ready, %state, "State changed");
        self.listeners
            .for_each(|l| l.on_state_changed(play_when_ready, state));
    }

    /// Cancel the in-flight build; its result, if already queued, is dropped
    fn cancel_build(&mut self) {
        if let Some(builder) = self.builder.as_mut() {
            builder.cancel();
        }
        self.tokens.invalidate();
    }

    fn ensure_live(&self) -> Result<()> {
        if self.released {
            Err(Error::Released)
        } else {
            Ok(())
        }
    }
}

impl Drop for PlaybackSession {
    fn drop(&mut self) {
        let _ = self.release();
    }
}

impl std::fmt::Debug for PlaybackSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackSession")
            .field("id", &self.id)
            .field("build_state", &self.build_state)
            .field("selections", &*self.selections.read())
            .field("surface", &self.surface)
            .field("backgrounded", &self.backgrounded)
            .field("muted", &self.muted)
            .field("released", &self.released)
            .finish()
    }
}
