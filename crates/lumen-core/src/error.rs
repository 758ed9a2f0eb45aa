//! Error types for Lumen Core

use crate::types::TrackSlot;
use thiserror::Error;

/// Result type alias for player operations
pub type Result<T> = std::result::Result<T, Error>;

/// Phase of a renderer build that produced an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildPhase {
    /// Fetching or parsing the manifest
    ManifestFetch,
    /// Querying decoder capabilities and selecting variants
    VariantSelection,
    /// Constructing chunk sources and renderers
    RendererConstruction,
}

/// Audio output failures reported by the engine.
///
/// These are informational: the engine attempts recovery on its own.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AudioOutputError {
    #[error("Audio track initialization failed: {0}")]
    Initialization(String),

    #[error("Audio track write failed: {0}")]
    Write(String),

    #[error(
        "Audio track underrun: buffer {buffer_size} bytes ({buffer_size_ms} ms), \
         {elapsed_since_last_feed_ms} ms since last feed"
    )]
    Underrun {
        buffer_size: usize,
        buffer_size_ms: u64,
        elapsed_since_last_feed_ms: u64,
    },
}

/// Player error types
#[derive(Error, Debug)]
pub enum Error {
    // Build errors
    #[error("Failed to fetch manifest {uri}")]
    ManifestFetch {
        uri: String,
        #[source]
        source: Box<Error>,
    },

    #[error("Failed to parse manifest: {0}")]
    ManifestParse(String),

    #[error("Decoder capability query failed: {0}")]
    DecoderQuery(String),

    #[error("No variant can be decoded on this device")]
    NoSupportedVariant,

    #[error("Failed to construct {slot} renderer: {reason}")]
    RendererConstruction { slot: TrackSlot, reason: String },

    #[error("Renderer build was dropped without completing")]
    BuildAbandoned,

    // Engine errors
    #[error("Engine fatal error: {0}")]
    EngineFatal(String),

    #[error("DRM session error: {0}")]
    DrmSession(String),

    #[error(transparent)]
    AudioOutput(#[from] AudioOutputError),

    // Network errors
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("HTTP {status} while fetching {uri}")]
    Http { uri: String, status: u16 },

    #[error("Unsupported URI scheme: {0}")]
    UnsupportedScheme(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Session errors
    #[error("Track {index} out of range for {slot} ({count} tracks)")]
    InvalidTrack {
        slot: TrackSlot,
        index: usize,
        count: usize,
    },

    #[error("No source has been set")]
    NoSource,

    #[error("Session has been released")]
    Released,

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Wrap a data-source failure as a manifest fetch error
    pub fn manifest_fetch(uri: impl Into<String>, source: Error) -> Self {
        Error::ManifestFetch {
            uri: uri.into(),
            source: Box::new(source),
        }
    }

    /// Create a renderer construction error
    pub fn renderer(slot: TrackSlot, reason: impl Into<String>) -> Self {
        Error::RendererConstruction {
            slot,
            reason: reason.into(),
        }
    }

    /// Build phase this error belongs to, if it aborted a build
    pub fn build_phase(&self) -> Option<BuildPhase> {
        match self {
            Error::ManifestFetch { .. } | Error::ManifestParse(_) => {
                Some(BuildPhase::ManifestFetch)
            }
            Error::DecoderQuery(_) | Error::NoSupportedVariant => {
                Some(BuildPhase::VariantSelection)
            }
            Error::RendererConstruction { .. } | Error::BuildAbandoned => {
                Some(BuildPhase::RendererConstruction)
            }
            _ => None,
        }
    }

    /// Returns true if this error is recoverable
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::ManifestFetch { .. }
                | Error::Network(_)
                | Error::Http { .. }
                | Error::AudioOutput(_)
        )
    }

    /// Returns the error code for diagnostics
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::ManifestFetch { .. } => "MANIFEST_FETCH",
            Error::ManifestParse(_) => "MANIFEST_PARSE",
            Error::DecoderQuery(_) => "DECODER_QUERY",
            Error::NoSupportedVariant => "NO_VARIANT",
            Error::RendererConstruction { .. } => "RENDERER_CONSTRUCTION",
            Error::BuildAbandoned => "BUILD_ABANDONED",
            Error::EngineFatal(_) => "ENGINE_FATAL",
            Error::DrmSession(_) => "DRM_SESSION",
            Error::AudioOutput(_) => "AUDIO_OUTPUT",
            Error::Network(_) => "NETWORK",
            Error::Http { .. } => "HTTP",
            Error::UnsupportedScheme(_) => "UNSUPPORTED_SCHEME",
            Error::Io(_) => "IO",
            Error::InvalidTrack { .. } => "INVALID_TRACK",
            Error::NoSource => "NO_SOURCE",
            Error::Released => "RELEASED",
            Error::InvalidConfig(_) => "INVALID_CONFIG",
            Error::Internal(_) => "INTERNAL",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_phase_distinguishes_fetch_and_capability() {
        let fetch = Error::manifest_fetch("https://example.com/a.m3u8", Error::Http {
            uri: "https://example.com/a.m3u8".to_string(),
            status: 404,
        });
        assert_eq!(fetch.build_phase(), Some(BuildPhase::ManifestFetch));
        assert_eq!(
            Error::DecoderQuery("codec list unavailable".into()).build_phase(),
            Some(BuildPhase::VariantSelection)
        );
        assert_eq!(Error::Released.build_phase(), None);
    }

    #[test]
    fn test_manifest_fetch_keeps_source() {
        use std::error::Error as _;

        let err = Error::manifest_fetch(
            "file:///missing.m3u8",
            Error::UnsupportedScheme("ftp".into()),
        );
        let source = err.source().map(|s| s.to_string());
        assert_eq!(source.as_deref(), Some("Unsupported URI scheme: ftp"));
        assert_eq!(err.error_code(), "MANIFEST_FETCH");
    }
}
