//! Lumen Core - playback control plane for an external media engine
//!
//! This crate decides *what* an engine plays and keeps it honest:
//! - Sliding-percentile bandwidth estimation over network transfers
//! - Asynchronous renderer builds for HLS and progressive sources
//! - Per-slot track selection, mute and background policies
//! - Engine event routing to typed diagnostic, caption and metadata listeners
//! - A host-lifecycle presenter that survives session rebuilds
//!
//! Decoding, rendering and the playback loop belong to the engine, reached
//! through the traits in [`engine`].
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         Lumen Core                           │
//! ├──────────────────────────────────────────────────────────────┤
//! │                                                              │
//! │                    ┌──────────────────┐                      │
//! │                    │ SessionPresenter │                      │
//! │                    └────────┬─────────┘                      │
//! │                             │                                │
//! │  ┌──────────────┐  ┌────────┴─────────┐  ┌──────────────┐    │
//! │  │   Renderer   │──│ PlaybackSession  │──│    Event     │    │
//! │  │   Builder    │  │ (control thread) │  │    Router    │    │
//! │  └──────┬───────┘  └────────┬─────────┘  └──────────────┘    │
//! │         │                   │                                │
//! │  ┌──────┴───────┐  ┌────────┴─────────┐  ┌──────────────┐    │
//! │  │  Manifest /  │  │   MediaEngine    │  │  Bandwidth   │    │
//! │  │  DataSource  │  │    (external)    │  │  Estimator   │    │
//! │  └──────────────┘  └──────────────────┘  └──────────────┘    │
//! └──────────────────────────────────────────────────────────────┘
//! ```

pub mod bandwidth;
pub mod builder;
pub mod config;
pub mod engine;
pub mod error;
pub mod listener;
pub mod manifest;
pub mod presenter;
pub mod router;
pub mod session;
pub mod source;
pub mod types;
pub mod upstream;

pub use bandwidth::{BandwidthEstimate, BandwidthEstimator, BandwidthSample, TransferListener};
pub use builder::{BuildCallback, BuildContext, BuiltRenderers, RendererBuilder};
pub use config::{BufferConfig, HlsOptions, SessionConfig};
pub use engine::{MediaEngine, MediaEngineFactory, RendererFactory, TrackRenderer};
pub use error::{Error, Result};
pub use listener::ListenerId;
pub use manifest::{HlsParser, HlsPlaylist, ManifestParser};
pub use presenter::SessionPresenter;
pub use router::{
    CaptionListener, Diagnostics, EventRouter, InfoListener, InternalErrorListener,
    MetadataListener,
};
pub use session::{PlaybackSession, SessionListener};
pub use source::{Source, SourceKind};
pub use types::*;
pub use upstream::{DataSource, DataSourceFactory, DefaultDataSourceFactory};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the library with default configuration
pub fn init() {
    tracing::info!(version = VERSION, "Lumen Core initialized");
}
