//! Variant selection for multivariant playlists

use crate::{
    bandwidth::BandwidthEstimate,
    config::DecoderProfile,
    manifest::Variant,
    types::Resolution,
    Error, Result,
};
use tracing::debug;

/// On-device decoder capability query
pub trait DecoderCapabilities: Send + Sync {
    /// Whether a single RFC 6381 codec entry (e.g. `avc1.64001f`) can be decoded
    fn supports(&self, codec: &str) -> Result<bool>;

    /// Largest frame the video decoder accepts, if limited
    fn max_frame_size(&self) -> Result<Option<Resolution>>;
}

/// Capability query answered from a static [`DecoderProfile`]
#[derive(Debug, Clone)]
pub struct DefaultDecoderCapabilities {
    profile: DecoderProfile,
}

impl DefaultDecoderCapabilities {
    pub fn new(profile: DecoderProfile) -> Self {
        Self { profile }
    }
}

impl DecoderCapabilities for DefaultDecoderCapabilities {
    fn supports(&self, codec: &str) -> Result<bool> {
        let codec = codec.to_lowercase();
        Ok(self
            .profile
            .codec_prefixes
            .iter()
            .any(|prefix| codec.starts_with(&prefix.to_lowercase())))
    }

    fn max_frame_size(&self) -> Result<Option<Resolution>> {
        Ok(Some(self.profile.max_frame_size))
    }
}

fn capability_error(error: Error) -> Error {
    match error {
        Error::DecoderQuery(_) => error,
        other => Error::DecoderQuery(other.to_string()),
    }
}

/// Pick the variant indices to play.
///
/// Variants the device cannot decode are dropped. Of the rest, those within
/// the bandwidth estimate are kept; if none fit, the lowest-bandwidth one is
/// kept. Indices are returned in manifest order.
pub fn select_variants(
    variants: &[Variant],
    capabilities: &dyn DecoderCapabilities,
    estimate: BandwidthEstimate,
) -> Result<Vec<usize>> {
    let max_frame = capabilities.max_frame_size().map_err(capability_error)?;

    let mut decodable = Vec::new();
    for (index, variant) in variants.iter().enumerate() {
        let mut supported = true;
        for codec in variant.codec_list() {
            if !capabilities.supports(codec).map_err(capability_error)? {
                supported = false;
                break;
            }
        }
        if let (Some(resolution), Some(max)) = (variant.resolution, max_frame) {
            supported &= resolution.fits_within(max);
        }
        if supported {
            decodable.push(index);
        }
    }

    if decodable.is_empty() {
        return Err(Error::NoSupportedVariant);
    }

    let selected = match estimate.bitrate() {
        None => decodable,
        Some(bitrate) => {
            let within: Vec<usize> = decodable
                .iter()
                .copied()
                .filter(|&i| variants[i].bandwidth <= bitrate)
                .collect();
            if within.is_empty() {
                decodable
                    .iter()
                    .copied()
                    .min_by_key(|&i| variants[i].bandwidth)
                    .into_iter()
                    .collect()
            } else {
                within
            }
        }
    };

    debug!(
        offered = variants.len(),
        selected = selected.len(),
        estimate = ?estimate,
        "Selected variants"
    );
    Ok(selected)
}
