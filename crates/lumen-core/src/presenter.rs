//! Session presenter
//!
//! Host-lifecycle wrapper around [`PlaybackSession`]. The presenter outlives
//! sessions: it creates one lazily, tears it down on release and rebuilds it
//! when the device's audio capabilities change, carrying the source, surface,
//! bandwidth cap, position and mute/background flags across.

use crate::{
    builder::DecoderCapabilities,
    config::SessionConfig,
    engine::MediaEngineFactory,
    listener::{ListenerId, ListenerSet},
    router::Diagnostics,
    session::{PlaybackSession, SessionListener},
    source::Source,
    types::*,
    Error, Result,
};
use std::sync::Arc;
use tracing::{debug, info};

/// Fans session callbacks out to the presenter's listeners.
///
/// Registered on every session the presenter creates.
#[derive(Default)]
struct PresenterListeners(ListenerSet<dyn SessionListener>);

impl SessionListener for PresenterListeners {
    fn on_state_changed(&self, play_when_ready: bool, state: PlaybackState) {
        self.0.for_each(|l| l.on_state_changed(play_when_ready, state));
    }

    fn on_error(&self, error: &Error) {
        self.0.for_each(|l| l.on_error(error));
    }

    fn on_video_size_changed(&self, size: VideoSize) {
        self.0.for_each(|l| l.on_video_size_changed(size));
    }
}

/// Drives a playback session from host lifecycle callbacks
pub struct SessionPresenter {
    engine_factory: Arc<dyn MediaEngineFactory>,
    config: SessionConfig,
    session: Option<PlaybackSession>,
    source: Option<Source>,
    bandwidth_cap: u64,
    needs_prepare: bool,
    surface: Option<Surface>,
    position_ms: u64,
    listeners: Arc<PresenterListeners>,
    audio_capabilities: AudioCapabilities,
    decoder_capabilities: Option<Arc<dyn DecoderCapabilities>>,
    backgrounded: bool,
    muted: bool,
}

impl SessionPresenter {
    pub fn new(engine_factory: Arc<dyn MediaEngineFactory>, config: SessionConfig) -> Self {
        Self {
            engine_factory,
            config,
            session: None,
            source: None,
            bandwidth_cap: u64::MAX,
            needs_prepare: true,
            surface: None,
            position_ms: 0,
            listeners: Arc::new(PresenterListeners::default()),
            audio_capabilities: AudioCapabilities::default(),
            decoder_capabilities: None,
            backgrounded: false,
            muted: false,
        }
    }

    /// Override the decoder capability query used by future sessions
    pub fn with_decoder_capabilities(mut self, capabilities: Arc<dyn DecoderCapabilities>) -> Self {
        self.decoder_capabilities = Some(capabilities);
        self
    }

    pub fn add_listener(&self, listener: Arc<dyn SessionListener>) -> ListenerId {
        self.listeners.0.add(listener)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.listeners.0.remove(id)
    }

    pub fn clear_listeners(&self) {
        self.listeners.0.clear();
    }

    /// Current session, if one exists
    pub fn session(&self) -> Option<&PlaybackSession> {
        self.session.as_ref()
    }

    pub fn session_mut(&mut self) -> Option<&mut PlaybackSession> {
        self.session.as_mut()
    }

    pub fn source(&self) -> Option<&Source> {
        self.source.as_ref()
    }

    /// Replace the source. The current session is released; the next
    /// [`play`](Self::play) or [`prepare`](Self::prepare) starts from the top.
    pub fn set_source(&mut self, source: Source) -> Result<()> {
        info!(content_id = source.content_id(), uri = %source.uri(), "Source set");
        self.release()?;
        self.position_ms = 0;
        self.source = Some(source);
        Ok(())
    }

    pub fn set_bandwidth_cap(&mut self, cap: u64) -> Result<()> {
        self.bandwidth_cap = cap;
        match self.session.as_mut() {
            Some(session) => session.set_bandwidth_cap(cap),
            None => Ok(()),
        }
    }

    pub fn bandwidth_cap(&self) -> u64 {
        self.bandwidth_cap
    }

    /// Create the session if needed, prepare it if needed and apply the
    /// surface and play intent
    pub fn prepare(&mut self, play_when_ready: bool) -> Result<()> {
        if self.session.is_none() {
            let session = self.create_session()?;
            self.session = Some(session);
            self.needs_prepare = true;
        }
        let surface = self.surface;
        let needs_prepare = self.needs_prepare;
        let session = self.session.as_mut().ok_or(Error::NoSource)?;

        if needs_prepare {
            session.prepare()?;
        }
        self.needs_prepare = false;
        if !self.backgrounded {
            session.set_surface(surface)?;
        }
        session.set_play_when_ready(play_when_ready)
    }

    fn create_session(&self) -> Result<PlaybackSession> {
        let source = self.source.as_ref().ok_or(Error::NoSource)?;
        let mut session = PlaybackSession::new(self.engine_factory.as_ref(), self.config.clone())?;
        session.add_listener(self.listeners.clone());

        let mut context = session
            .build_context()
            .with_audio_capabilities(self.audio_capabilities.clone());
        if let Some(capabilities) = &self.decoder_capabilities {
            context = context.with_decoder_capabilities(Arc::clone(capabilities));
        }
        session.set_renderer_builder(source.create_renderer_builder(context))?;
        session.set_bandwidth_cap(self.bandwidth_cap)?;
        session.set_mute(self.muted)?;
        session.set_backgrounded(self.backgrounded)?;
        if self.position_ms > 0 {
            session.seek_to(self.position_ms)?;
        }

        debug!(session_id = %session.id(), content_id = source.content_id(), "Session created");
        Ok(session)
    }

    /// Release the session, remembering the playback position
    pub fn release(&mut self) -> Result<()> {
        if let Some(mut session) = self.session.take() {
            self.position_ms = session.current_position();
            session.release()?;
            info!(session_id = %session.id(), position_ms = self.position_ms, "Session released");
        }
        self.needs_prepare = true;
        Ok(())
    }

    /// Start playback, preparing first when needed
    pub fn play(&mut self) -> Result<()> {
        if self.needs_prepare || self.session.is_none() {
            return self.prepare(true);
        }
        match self.session.as_mut() {
            Some(session) => session.set_play_when_ready(true),
            None => Ok(()),
        }
    }

    pub fn pause(&mut self) -> Result<()> {
        match self.session.as_mut() {
            Some(session) => session.set_play_when_ready(false),
            None => Ok(()),
        }
    }

    /// Stop and rewind; the next [`play`](Self::play) prepares again
    pub fn stop(&mut self) -> Result<()> {
        self.position_ms = 0;
        if let Some(session) = self.session.as_mut() {
            session.stop()?;
            session.seek_to(0)?;
            self.needs_prepare = true;
        }
        Ok(())
    }

    pub fn seek_to(&mut self, position_ms: u64) -> Result<()> {
        match self.session.as_mut() {
            Some(session) => session.seek_to(position_ms),
            None => {
                self.position_ms = position_ms;
                Ok(())
            }
        }
    }

    pub fn set_mute(&mut self, muted: bool) -> Result<()> {
        self.muted = muted;
        match self.session.as_mut() {
            Some(session) => session.set_mute(muted),
            None => Ok(()),
        }
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    /// Host moved to the background or back. Video is disabled and the
    /// surface released while backgrounded; the surface is re-applied on return.
    pub fn set_backgrounded(&mut self, backgrounded: bool) -> Result<()> {
        self.backgrounded = backgrounded;
        let surface = self.surface;
        let Some(session) = self.session.as_mut() else {
            return Ok(());
        };
        session.set_backgrounded(backgrounded)?;
        if !backgrounded && surface.is_some() {
            session.set_surface(surface)?;
        }
        Ok(())
    }

    pub fn is_backgrounded(&self) -> bool {
        self.backgrounded
    }

    pub fn on_surface_available(&mut self, surface: Surface) -> Result<()> {
        debug!(handle = surface.handle(), "Surface available");
        self.surface = Some(surface);
        match self.session.as_mut() {
            Some(session) if !self.backgrounded => session.set_surface(Some(surface)),
            _ => Ok(()),
        }
    }

    /// The surface is gone: detach it synchronously and require a fresh
    /// prepare before the next play
    pub fn on_surface_destroyed(&mut self) -> Result<()> {
        debug!("Surface destroyed");
        self.surface = None;
        if let Some(session) = self.session.as_mut() {
            session.blocking_clear_surface()?;
            self.needs_prepare = true;
        }
        Ok(())
    }

    /// Rebuild the session for new audio output capabilities, preserving
    /// play intent and position. Returns whether a rebuild happened.
    ///
    /// Renderers are only built again when the old session was playing; a
    /// paused or stopped session waits for the next [`play`](Self::play).
    pub fn on_audio_capabilities_changed(
        &mut self,
        capabilities: AudioCapabilities,
    ) -> Result<bool> {
        if capabilities == self.audio_capabilities {
            return Ok(false);
        }
        info!(?capabilities, "Audio capabilities changed");
        self.audio_capabilities = capabilities;

        let Some(session) = self.session.as_ref() else {
            return Ok(false);
        };
        let resume = session.play_when_ready() && !self.needs_prepare;
        self.release()?;
        if resume {
            self.prepare(true)?;
        } else {
            let session = self.create_session()?;
            self.session = Some(session);
        }
        Ok(true)
    }

    pub fn audio_capabilities(&self) -> &AudioCapabilities {
        &self.audio_capabilities
    }

    pub fn current_position(&self) -> u64 {
        self.session
            .as_ref()
            .map_or(self.position_ms, |session| session.current_position())
    }

    pub fn duration(&self) -> Option<u64> {
        self.session.as_ref().and_then(|session| session.duration())
    }

    pub fn buffered_percentage(&self) -> u8 {
        self.session
            .as_ref()
            .map_or(0, |session| session.buffered_percentage())
    }

    pub fn buffered_position(&self) -> u64 {
        self.session
            .as_ref()
            .map_or(0, |session| session.buffered_position())
    }

    /// `None` until a session exists
    pub fn playback_state(&self) -> Option<PlaybackState> {
        self.session.as_ref().map(|session| session.playback_state())
    }

    pub fn is_playing(&self) -> bool {
        self.session.as_ref().is_some_and(|session| {
            session.play_when_ready() && session.playback_state() == PlaybackState::Ready
        })
    }

    pub fn diagnostics(&self) -> Option<Diagnostics> {
        self.session.as_ref().map(|session| session.diagnostics())
    }

    /// Apply queued session work without waiting
    pub fn dispatch_pending(&mut self) -> usize {
        self.session
            .as_mut()
            .map_or(0, |session| session.dispatch_pending())
    }

    /// Wait for and apply the next queued session message.
    ///
    /// Returns false when there is no live session.
    pub async fn next_event(&mut self) -> bool {
        match self.session.as_mut() {
            Some(session) => session.next_event().await,
            None => false,
        }
    }
}

impl std::fmt::Debug for SessionPresenter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionPresenter")
            .field("session", &self.session)
            .field("source", &self.source)
            .field("bandwidth_cap", &self.bandwidth_cap)
            .field("needs_prepare", &self.needs_prepare)
            .field("surface", &self.surface)
            .field("backgrounded", &self.backgrounded)
            .field("muted", &self.muted)
            .finish()
    }
}
