//! Core types for Lumen

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::ops::{Index, IndexMut};
use uuid::Uuid;

/// Number of renderer slots every session manages
pub const RENDERER_COUNT: usize = 4;

/// Unique identifier for a playback session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Fixed renderer roles a session manages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrackSlot {
    Video,
    Audio,
    Text,
    Metadata,
}

impl TrackSlot {
    /// All slots in engine index order
    pub const ALL: [TrackSlot; RENDERER_COUNT] = [
        TrackSlot::Video,
        TrackSlot::Audio,
        TrackSlot::Text,
        TrackSlot::Metadata,
    ];

    /// Engine index of this slot
    pub fn index(self) -> usize {
        match self {
            TrackSlot::Video => 0,
            TrackSlot::Audio => 1,
            TrackSlot::Text => 2,
            TrackSlot::Metadata => 3,
        }
    }
}

impl std::fmt::Display for TrackSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrackSlot::Video => write!(f, "video"),
            TrackSlot::Audio => write!(f, "audio"),
            TrackSlot::Text => write!(f, "text"),
            TrackSlot::Metadata => write!(f, "metadata"),
        }
    }
}

/// One value per [`TrackSlot`], indexable by slot
#[derive(Debug, Clone, PartialEq)]
pub struct TrackSlots<T>([T; RENDERER_COUNT]);

impl<T> TrackSlots<T> {
    /// Build a value for every slot
    pub fn from_fn(mut f: impl FnMut(TrackSlot) -> T) -> Self {
        Self(TrackSlot::ALL.map(&mut f))
    }

    /// Iterate slots with their values
    pub fn iter(&self) -> impl Iterator<Item = (TrackSlot, &T)> {
        TrackSlot::ALL.into_iter().zip(self.0.iter())
    }

    /// Transform every value, keeping slot positions
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> TrackSlots<U> {
        TrackSlots(self.0.map(f))
    }

    pub fn into_array(self) -> [T; RENDERER_COUNT] {
        self.0
    }
}

impl<T: Default> Default for TrackSlots<T> {
    fn default() -> Self {
        Self::from_fn(|_| T::default())
    }
}

impl<T> Index<TrackSlot> for TrackSlots<T> {
    type Output = T;

    fn index(&self, slot: TrackSlot) -> &T {
        &self.0[slot.index()]
    }
}

impl<T> IndexMut<TrackSlot> for TrackSlots<T> {
    fn index_mut(&mut self, slot: TrackSlot) -> &mut T {
        &mut self.0[slot.index()]
    }
}

/// Selected track for a slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrackSelection {
    /// The slot's renderer is disabled
    Disabled,
    /// Index into the slot's track list
    Track(usize),
}

impl TrackSelection {
    /// The engine's default track
    pub const DEFAULT: TrackSelection = TrackSelection::Track(0);

    pub fn is_disabled(self) -> bool {
        self == TrackSelection::Disabled
    }
}

impl Default for TrackSelection {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl std::fmt::Display for TrackSelection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrackSelection::Disabled => write!(f, "disabled"),
            TrackSelection::Track(index) => write!(f, "track {}", index),
        }
    }
}

/// Playback state reported to listeners
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlaybackState {
    /// Nothing prepared, or a fatal error occurred
    #[default]
    Idle,
    /// Renderers are being built or handed to the engine
    Preparing,
    /// Waiting for enough media to play
    Buffering,
    /// Able to play immediately
    Ready,
    /// Playback reached the end of the media
    Ended,
}

impl std::fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlaybackState::Idle => write!(f, "idle"),
            PlaybackState::Preparing => write!(f, "preparing"),
            PlaybackState::Buffering => write!(f, "buffering"),
            PlaybackState::Ready => write!(f, "ready"),
            PlaybackState::Ended => write!(f, "ended"),
        }
    }
}

/// Progress of the asynchronous renderer build
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BuildState {
    Idle,
    Building,
    Built,
}

/// Video resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Returns true if this resolution fits inside `bounds` in either orientation
    pub fn fits_within(&self, bounds: Resolution) -> bool {
        (self.width <= bounds.width && self.height <= bounds.height)
            || (self.width <= bounds.height && self.height <= bounds.width)
    }

    /// Returns quality tier name
    pub fn quality_name(&self) -> &'static str {
        match self.height {
            0..=240 => "240p",
            241..=360 => "360p",
            361..=480 => "480p",
            481..=720 => "720p",
            721..=1080 => "1080p",
            1081..=1440 => "1440p",
            _ => "4K",
        }
    }

    pub const HD_720P: Resolution = Resolution { width: 1280, height: 720 };
    pub const FHD_1080P: Resolution = Resolution { width: 1920, height: 1080 };
    pub const UHD_4K: Resolution = Resolution { width: 3840, height: 2160 };
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Media format of a loaded chunk or enabled track
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Format {
    /// Identifier of the rendition
    pub id: String,
    /// Container MIME type
    pub mime_type: String,
    /// RFC 6381 codecs string
    pub codecs: Option<String>,
    /// Declared bitrate in bits per second
    pub bitrate: u64,
    pub resolution: Option<Resolution>,
    pub frame_rate: Option<f32>,
    pub language: Option<String>,
}

/// Decoded video dimensions reported by the engine
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VideoSize {
    pub width: u32,
    pub height: u32,
    /// Rotation the output surface still has to apply
    pub unapplied_rotation_degrees: i32,
    pub pixel_width_height_ratio: f32,
}

impl VideoSize {
    /// Display aspect ratio, 1.0 when the height is unknown
    pub fn aspect_ratio(&self) -> f32 {
        if self.height == 0 {
            1.0
        } else {
            (self.width as f32 * self.pixel_width_height_ratio) / self.height as f32
        }
    }
}

/// A caption cue to be shown on screen
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cue {
    pub text: String,
    /// Line position as a fraction of the viewport, if specified
    pub line: Option<f32>,
    /// Horizontal position as a fraction of the viewport, if specified
    pub position: Option<f32>,
    /// Width as a fraction of the viewport, if specified
    pub size: Option<f32>,
}

impl Cue {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            line: None,
            position: None,
            size: None,
        }
    }
}

/// A timed-metadata frame extracted from the stream
#[derive(Debug, Clone, PartialEq)]
pub struct Id3Frame {
    /// Four character frame id, e.g. `TXXX` or `PRIV`
    pub id: String,
    pub payload: Bytes,
}

/// Opaque handle to a host-owned drawable surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Surface(u64);

impl Surface {
    pub fn new(handle: u64) -> Self {
        Self(handle)
    }

    pub fn handle(&self) -> u64 {
        self.0
    }
}

/// Decoder counters kept by a renderer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodecCounters {
    pub decoder_init_count: u32,
    pub decoder_release_count: u32,
    pub input_buffer_count: u64,
    pub rendered_output_buffer_count: u64,
    pub skipped_output_buffer_count: u64,
    pub dropped_output_buffer_count: u64,
    pub max_consecutive_dropped_output_buffer_count: u64,
}

/// Audio encodings an output route can pass through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AudioEncoding {
    Pcm16,
    Ac3,
    Eac3,
    Dts,
}

/// Capabilities of the current audio output route
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioCapabilities {
    pub encodings: Vec<AudioEncoding>,
    pub max_channel_count: u8,
}

impl AudioCapabilities {
    pub fn supports(&self, encoding: AudioEncoding) -> bool {
        self.encodings.contains(&encoding)
    }
}

impl Default for AudioCapabilities {
    fn default() -> Self {
        Self {
            encodings: vec![AudioEncoding::Pcm16],
            max_channel_count: 2,
        }
    }
}

/// Seekable window of a live stream, in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start_ms: u64,
    pub end_ms: u64,
}
