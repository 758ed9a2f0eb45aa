//! Builder for single-file sources
//!
//! One extractor-backed sample source feeds the video, audio and text
//! renderers. Construction is synchronous.

use super::{BuildCallback, BuildContext, BuildToken, BuiltRenderers, RendererBuilder};
use crate::{
    bandwidth::{BandwidthEstimator, TransferListener, DEFAULT_MAX_WEIGHT},
    engine::{RendererSpec, SampleInput, SampleSourceSpec, TextSpec},
    source::Source,
    types::TrackSlot,
    Error, Result,
};
use std::sync::Arc;
use tracing::{debug, info};

pub struct ProgressiveRendererBuilder {
    source: Source,
    context: BuildContext,
    cap: u64,
    estimator: Option<Arc<BandwidthEstimator>>,
    current: Option<BuildToken>,
}

impl ProgressiveRendererBuilder {
    pub fn new(source: Source, context: BuildContext) -> Self {
        Self {
            source,
            context,
            cap: u64::MAX,
            estimator: None,
            current: None,
        }
    }

    fn construct(&mut self) -> Result<BuiltRenderers> {
        let estimator = Arc::new(
            BandwidthEstimator::with_clock(self.context.clock.clone(), DEFAULT_MAX_WEIGHT)
                .with_listener(Arc::new(self.context.events.clone()))
                .with_cap(self.cap),
        );
        self.estimator = Some(Arc::clone(&estimator));

        let listener: Arc<dyn TransferListener> = estimator.clone();
        let data_source = self
            .source
            .data_source_factory()
            .create(Some(listener), self.source.user_agent());
        let sample_source = SampleSourceSpec {
            source_id: TrackSlot::Video,
            input: SampleInput::Extractor {
                uri: self.source.uri().clone(),
                data_source,
            },
            buffer_bytes: self.source.buffers().main_buffer_bytes(),
        };

        let factory = &self.context.renderer_factory;
        let create = |spec: RendererSpec| {
            let slot = spec.slot();
            factory.create_renderer(spec).map_err(|e| match e {
                Error::RendererConstruction { .. } => e,
                other => Error::renderer(slot, other.to_string()),
            })
        };
        let default_name = || vec!["default".to_string()];

        let video = create(RendererSpec::Video {
            source: sample_source.clone(),
        })?;
        let audio = create(RendererSpec::Audio {
            sources: vec![sample_source.clone()],
            capabilities: self.context.audio_capabilities.clone(),
        })?;
        let text = create(RendererSpec::Text(TextSpec::Tracks(sample_source)))?;

        Ok(BuiltRenderers::new()
            .with_renderer(video, default_name())
            .with_renderer(audio, default_name())
            .with_renderer(text, default_name())
            .fill_placeholders()
            .with_estimator(estimator))
    }
}

impl RendererBuilder for ProgressiveRendererBuilder {
    fn build(&mut self, callback: BuildCallback) {
        self.current = Some(callback.token().clone());
        debug!(uri = %self.source.uri(), "Building progressive renderers");
        match self.construct() {
            Ok(built) => {
                info!(uri = %self.source.uri(), "Renderers built");
                callback.on_built(built);
            }
            Err(error) => callback.on_error(error),
        }
    }

    fn cancel(&mut self) {
        if let Some(token) = self.current.take() {
            token.cancel();
        }
    }

    fn set_bandwidth_cap(&mut self, cap: u64) {
        self.cap = cap;
        if let Some(estimator) = &self.estimator {
            estimator.set_cap(cap);
        }
    }
}
