//! HLS renderer builder
//!
//! Build steps, each followed by a cancellation check:
//! 1. Fetch the playlist through the source's data source
//! 2. Select variants against decoder capabilities and the last estimate
//! 3. Create a fresh bandwidth estimator seeded with the configured cap
//! 4. Create chunk sources and one renderer per present track role

use super::{
    chunk::{AdaptiveConfig, ChunkSourceRequest, ChunkTrack},
    select_variants, BuildCallback, BuildContext, BuildToken, BuiltRenderers, RendererBuilder,
};
use crate::{
    bandwidth::{BandwidthEstimate, BandwidthEstimator, TransferListener},
    config::HlsOptions,
    engine::{ChunkSource, RendererSpec, SampleInput, SampleSourceSpec, TextSpec, TrackRenderer},
    manifest::{HlsPlaylist, MasterPlaylist},
    source::Source,
    types::TrackSlot,
    upstream::DataSource,
    Error, Result,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

type EstimatorSlot = Arc<Mutex<Option<Arc<BandwidthEstimator>>>>;

struct InFlight {
    token: BuildToken,
    task: JoinHandle<()>,
}

/// Builds renderers for an HLS source
pub struct HlsRendererBuilder {
    source: Source,
    options: HlsOptions,
    context: BuildContext,
    cap: Arc<AtomicU64>,
    estimator: EstimatorSlot,
    in_flight: Option<InFlight>,
}

impl HlsRendererBuilder {
    pub fn new(source: Source, options: HlsOptions, context: BuildContext) -> Self {
        Self {
            source,
            options,
            context,
            cap: Arc::new(AtomicU64::new(u64::MAX)),
            estimator: Arc::new(Mutex::new(None)),
            in_flight: None,
        }
    }

    /// Estimator of the most recent build
    pub fn estimator(&self) -> Option<Arc<BandwidthEstimator>> {
        self.estimator.lock().clone()
    }
}

impl RendererBuilder for HlsRendererBuilder {
    fn build(&mut self, callback: BuildCallback) {
        self.cancel();

        let handle = match Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                callback.on_error(Error::Internal(
                    "renderer builds require a tokio runtime".into(),
                ));
                return;
            }
        };

        let previous_estimate = self
            .estimator
            .lock()
            .as_ref()
            .map(|estimator| estimator.estimate())
            .unwrap_or(BandwidthEstimate::NoEstimate);

        let job = HlsBuild {
            source: self.source.clone(),
            options: self.options.clone(),
            context: self.context.clone(),
            cap: Arc::clone(&self.cap),
            estimator_slot: Arc::clone(&self.estimator),
            previous_estimate,
        };
        let token = callback.token().clone();
        let task = handle.spawn(job.run(callback));
        self.in_flight = Some(InFlight { token, task });
    }

    fn cancel(&mut self) {
        if let Some(in_flight) = self.in_flight.take() {
            in_flight.token.cancel();
            in_flight.task.abort();
        }
    }

    fn set_bandwidth_cap(&mut self, cap: u64) {
        let slot = self.estimator.lock();
        self.cap.store(cap, Ordering::SeqCst);
        if let Some(estimator) = slot.as_ref() {
            estimator.set_cap(cap);
        }
    }
}

impl Drop for HlsRendererBuilder {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// State moved into the build task
struct HlsBuild {
    source: Source,
    options: HlsOptions,
    context: BuildContext,
    cap: Arc<AtomicU64>,
    estimator_slot: EstimatorSlot,
    previous_estimate: BandwidthEstimate,
}

fn construction_error(slot: TrackSlot, error: Error) -> Error {
    match error {
        Error::RendererConstruction { .. } => error,
        other => Error::renderer(slot, other.to_string()),
    }
}

impl HlsBuild {
    async fn run(self, callback: BuildCallback) {
        match self.execute(&callback).await {
            Ok(Some(built)) => {
                info!(uri = %self.source.uri(), "Renderers built");
                callback.on_built(built);
            }
            Ok(None) => debug!("Build canceled"),
            Err(error) => {
                warn!(error = %error, phase = ?error.build_phase(), "Build failed");
                callback.on_error(error);
            }
        }
    }

    #[instrument(skip_all, fields(uri = %self.source.uri()))]
    async fn execute(&self, callback: &BuildCallback) -> Result<Option<BuiltRenderers>> {
        let uri = self.source.uri();
        let manifest_source = self
            .source
            .data_source_factory()
            .create(None, self.source.user_agent());
        let data = manifest_source
            .fetch(uri)
            .await
            .map_err(|e| Error::manifest_fetch(uri.as_str(), e))?;
        if callback.is_canceled() {
            return Ok(None);
        }

        let playlist = self.source.manifest_parser().parse(uri, &data)?;
        let main_tracks = match &playlist {
            HlsPlaylist::Master(master) => {
                let selected = select_variants(
                    &master.variants,
                    self.context.decoder_capabilities.as_ref(),
                    self.previous_estimate,
                )?;
                selected
                    .into_iter()
                    .map(|index| {
                        let variant = &master.variants[index];
                        ChunkTrack {
                            name: variant.name(),
                            uri: variant.uri.clone(),
                            bandwidth: variant.bandwidth,
                            language: None,
                        }
                    })
                    .collect()
            }
            HlsPlaylist::Media(_) => vec![ChunkTrack {
                name: "default".to_string(),
                uri: uri.clone(),
                bandwidth: 0,
                language: None,
            }],
        };
        debug!(tracks = main_tracks.len(), "Playlist resolved");
        if callback.is_canceled() {
            return Ok(None);
        }

        let estimator = {
            let mut slot = self.estimator_slot.lock();
            let estimator = Arc::new(
                BandwidthEstimator::with_clock(
                    self.context.clock.clone(),
                    self.options.estimator_max_weight,
                )
                .with_listener(Arc::new(self.context.events.clone()))
                .with_cap(self.cap.load(Ordering::SeqCst)),
            );
            *slot = Some(Arc::clone(&estimator));
            estimator
        };
        let listener: Arc<dyn TransferListener> = estimator.clone();
        let data_source = self
            .source
            .data_source_factory()
            .create(Some(listener), self.source.user_agent());

        let built = self.construct(&playlist, main_tracks, data_source, &estimator)?;
        if callback.is_canceled() {
            return Ok(None);
        }
        Ok(Some(built.fill_placeholders().with_estimator(estimator)))
    }

    fn construct(
        &self,
        playlist: &HlsPlaylist,
        main_tracks: Vec<ChunkTrack>,
        data_source: Arc<dyn DataSource>,
        estimator: &Arc<BandwidthEstimator>,
    ) -> Result<BuiltRenderers> {
        let buffers = self.source.buffers();
        let chunk_sources = self.source.chunk_source_factory();
        let chunk_source =
            |slot: TrackSlot, tracks: Vec<ChunkTrack>, adaptive: Option<AdaptiveConfig>| {
                chunk_sources
                    .create(ChunkSourceRequest {
                        slot,
                        tracks,
                        data_source: Arc::clone(&data_source),
                        adaptive,
                    })
                    .map_err(|e| construction_error(slot, e))
            };
        let create = |spec: RendererSpec| -> Result<Arc<dyn TrackRenderer>> {
            let slot = spec.slot();
            self.context
                .renderer_factory
                .create_renderer(spec)
                .map_err(|e| construction_error(slot, e))
        };

        let video_name = match main_tracks.as_slice() {
            [only] => only.name.clone(),
            _ => "auto".to_string(),
        };
        let video_source = chunk_source(
            TrackSlot::Video,
            main_tracks,
            Some(AdaptiveConfig {
                estimator: Arc::clone(estimator),
                safety_factor: self.options.safety_factor,
            }),
        )?;
        let main = SampleSourceSpec {
            source_id: TrackSlot::Video,
            input: SampleInput::Chunked(video_source),
            buffer_bytes: buffers.main_buffer_bytes(),
        };

        let mut built = BuiltRenderers::new().with_renderer(
            create(RendererSpec::Video { source: main.clone() })?,
            vec![video_name],
        );

        let master = match playlist {
            HlsPlaylist::Master(master) => Some(master),
            HlsPlaylist::Media(_) => None,
        };

        // Audio: alternate renditions get their own chunk source
        let audio_tracks = master.map(alternate_audio).unwrap_or_default();
        if audio_tracks.is_empty() {
            let audio = create(RendererSpec::Audio {
                sources: vec![main.clone()],
                capabilities: self.context.audio_capabilities.clone(),
            })?;
            built = built.with_renderer(audio, vec!["default".to_string()]);
        } else {
            let names = audio_tracks.iter().map(|t| t.name.clone()).collect();
            let audio_source = chunk_source(TrackSlot::Audio, audio_tracks, None)?;
            let audio = create(RendererSpec::Audio {
                sources: vec![
                    main.clone(),
                    SampleSourceSpec {
                        source_id: TrackSlot::Audio,
                        input: SampleInput::Chunked(Arc::clone(&audio_source)),
                        buffer_bytes: buffers.audio_buffer_bytes(),
                    },
                ],
                capabilities: self.context.audio_capabilities.clone(),
            })?;
            built = built
                .with_renderer(audio, names)
                .with_multi_track_source(TrackSlot::Audio, audio_source);
        }

        // Text: sideloaded subtitles, else captions embedded in the video stream
        let subtitle_tracks = master.map(subtitles).unwrap_or_default();
        if !subtitle_tracks.is_empty() {
            let names = subtitle_tracks.iter().map(|t| t.name.clone()).collect();
            let text_source: Arc<dyn ChunkSource> =
                chunk_source(TrackSlot::Text, subtitle_tracks, None)?;
            let text = create(RendererSpec::Text(TextSpec::Tracks(SampleSourceSpec {
                source_id: TrackSlot::Text,
                input: SampleInput::Chunked(Arc::clone(&text_source)),
                buffer_bytes: buffers.text_buffer_bytes(),
            })))?;
            built = built
                .with_renderer(text, names)
                .with_multi_track_source(TrackSlot::Text, text_source);
        } else if let Some(master) = master.filter(|m| !m.closed_captions.is_empty()) {
            let names = master.closed_captions.iter().map(|cc| cc.name.clone()).collect();
            let text = create(RendererSpec::Text(TextSpec::Embedded608(main.clone())))?;
            built = built.with_renderer(text, names);
        }

        if playlist.has_timed_metadata() || self.options.force_timed_metadata {
            let metadata = create(RendererSpec::Metadata { source: main })?;
            built = built.with_renderer(metadata, vec!["ID3".to_string()]);
        }

        Ok(built)
    }
}

fn alternate_audio(master: &MasterPlaylist) -> Vec<ChunkTrack> {
    master
        .audio
        .iter()
        .filter_map(|rendition| {
            rendition.uri.as_ref().map(|uri| ChunkTrack {
                name: rendition.name.clone(),
                uri: uri.clone(),
                bandwidth: 0,
                language: rendition.language.clone(),
            })
        })
        .collect()
}

fn subtitles(master: &MasterPlaylist) -> Vec<ChunkTrack> {
    master
        .subtitles
        .iter()
        .filter_map(|rendition| {
            rendition.uri.as_ref().map(|uri| ChunkTrack {
                name: rendition.name.clone(),
                uri: uri.clone(),
                bandwidth: 0,
                language: rendition.language.clone(),
            })
        })
        .collect()
}
