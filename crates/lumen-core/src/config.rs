//! Configuration for sessions and renderer builds
//!
//! Every default that used to be a hidden constant lives here:
//! - [`SessionConfig`]: engine buffering thresholds
//! - [`BufferConfig`]: per-role sample buffer sizing
//! - [`HlsOptions`]: adaptive-streaming build knobs
//! - [`DecoderProfile`]: what the default capability query reports

use crate::{types::Resolution, Error, Result};
use serde::{Deserialize, Serialize};

/// Session configuration handed to the engine at construction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Minimum buffered media before playback starts (milliseconds)
    pub min_buffer_ms: u64,
    /// Buffered media required to resume after a rebuffer (milliseconds)
    pub max_buffer_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            min_buffer_ms: 1000,
            max_buffer_ms: 5000,
        }
    }
}

impl SessionConfig {
    /// Load from a JSON document; missing fields take their defaults
    pub fn from_json(json: &str) -> Result<Self> {
        let config: SessionConfig = serde_json::from_str(json)
            .map_err(|e| Error::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.min_buffer_ms > self.max_buffer_ms {
            return Err(Error::InvalidConfig(format!(
                "min_buffer_ms ({}) exceeds max_buffer_ms ({})",
                self.min_buffer_ms, self.max_buffer_ms
            )));
        }
        Ok(())
    }
}

/// Sample buffer sizing per track role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    /// Size of one buffer segment in bytes
    pub segment_size: usize,
    /// Segments reserved for the main (video) source
    pub main_segment_count: usize,
    /// Segments reserved for an alternate audio source
    pub audio_segment_count: usize,
    /// Segments reserved for a sideloaded text source
    pub text_segment_count: usize,
}

impl BufferConfig {
    pub const DEFAULT_SEGMENT_SIZE: usize = 64 * 1024;
    pub const DEFAULT_MAIN_SEGMENT_COUNT: usize = 254;
    pub const DEFAULT_AUDIO_SEGMENT_COUNT: usize = 54;
    pub const DEFAULT_TEXT_SEGMENT_COUNT: usize = 2;
    pub const DEFAULT_PROGRESSIVE_SEGMENT_COUNT: usize = 256;

    /// Defaults for single-file sources
    pub fn progressive() -> Self {
        Self {
            main_segment_count: Self::DEFAULT_PROGRESSIVE_SEGMENT_COUNT,
            ..Self::default()
        }
    }

    pub fn main_buffer_bytes(&self) -> usize {
        self.segment_size * self.main_segment_count
    }

    pub fn audio_buffer_bytes(&self) -> usize {
        self.segment_size * self.audio_segment_count
    }

    pub fn text_buffer_bytes(&self) -> usize {
        self.segment_size * self.text_segment_count
    }

    pub fn validate(&self) -> Result<()> {
        if self.segment_size == 0 || self.main_segment_count == 0 {
            return Err(Error::InvalidConfig(
                "buffer segment size and main segment count must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            segment_size: Self::DEFAULT_SEGMENT_SIZE,
            main_segment_count: Self::DEFAULT_MAIN_SEGMENT_COUNT,
            audio_segment_count: Self::DEFAULT_AUDIO_SEGMENT_COUNT,
            text_segment_count: Self::DEFAULT_TEXT_SEGMENT_COUNT,
        }
    }
}

/// Adaptive-streaming build options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HlsOptions {
    /// Build a metadata renderer even when the manifest declares no timed metadata
    pub force_timed_metadata: bool,
    /// Fraction of the bandwidth estimate the adaptive source may use
    pub safety_factor: f64,
    /// Total sample weight kept by the bandwidth estimator window
    pub estimator_max_weight: u32,
}

impl Default for HlsOptions {
    fn default() -> Self {
        Self {
            force_timed_metadata: false,
            safety_factor: 0.8,
            estimator_max_weight: crate::bandwidth::DEFAULT_MAX_WEIGHT,
        }
    }
}

/// Decoder profile answered by the default capability query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoderProfile {
    /// Codec prefixes the device can decode (`avc1`, `mp4a`, ...)
    pub codec_prefixes: Vec<String>,
    /// Largest frame the video decoder accepts
    pub max_frame_size: Resolution,
}

impl Default for DecoderProfile {
    fn default() -> Self {
        Self {
            codec_prefixes: ["avc1", "avc3", "mp4a", "ac-3", "ec-3"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            max_frame_size: Resolution::FHD_1080P,
        }
    }
}
