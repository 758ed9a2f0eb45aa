//! Source descriptors
//!
//! A [`Source`] names what to play and carries the transport hooks used to
//! build it. It is immutable once built and produces one
//! [`RendererBuilder`] per session.

use crate::{
    builder::{
        BuildContext, ChunkSourceFactory, HlsChunkSourceFactory, HlsRendererBuilder,
        ProgressiveRendererBuilder, RendererBuilder,
    },
    config::{BufferConfig, HlsOptions},
    manifest::{is_hls_url, HlsParser, ManifestParser},
    upstream::{DataSourceFactory, DefaultDataSourceFactory},
    Error, Result,
};
use std::sync::Arc;
use url::Url;

/// How the source is delivered
#[derive(Debug, Clone, PartialEq)]
pub enum SourceKind {
    /// Adaptive HLS playlist
    Hls(HlsOptions),
    /// Single media file
    Progressive,
}

/// Immutable description of media to play
#[derive(Clone)]
pub struct Source {
    uri: Url,
    content_id: String,
    kind: SourceKind,
    user_agent: String,
    buffers: BufferConfig,
    data_source_factory: Arc<dyn DataSourceFactory>,
    chunk_source_factory: Arc<dyn ChunkSourceFactory>,
    manifest_parser: Arc<dyn ManifestParser>,
}

impl Source {
    pub fn hls(uri: impl AsRef<str>, user_agent: impl Into<String>) -> SourceBuilder {
        SourceBuilder::new(
            uri.as_ref(),
            user_agent.into(),
            Some(SourceKind::Hls(HlsOptions::default())),
        )
    }

    pub fn progressive(uri: impl AsRef<str>, user_agent: impl Into<String>) -> SourceBuilder {
        SourceBuilder::new(uri.as_ref(), user_agent.into(), Some(SourceKind::Progressive))
    }

    /// Infer the kind from the URI: `.m3u8`/`.m3u` paths are HLS
    pub fn from_uri(uri: impl AsRef<str>, user_agent: impl Into<String>) -> SourceBuilder {
        SourceBuilder::new(uri.as_ref(), user_agent.into(), None)
    }

    pub fn uri(&self) -> &Url {
        &self.uri
    }

    pub fn content_id(&self) -> &str {
        &self.content_id
    }

    pub fn kind(&self) -> &SourceKind {
        &self.kind
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    pub fn buffers(&self) -> &BufferConfig {
        &self.buffers
    }

    pub fn data_source_factory(&self) -> &Arc<dyn DataSourceFactory> {
        &self.data_source_factory
    }

    pub fn chunk_source_factory(&self) -> &Arc<dyn ChunkSourceFactory> {
        &self.chunk_source_factory
    }

    pub fn manifest_parser(&self) -> &Arc<dyn ManifestParser> {
        &self.manifest_parser
    }

    /// Create the builder that turns this source into renderers
    pub fn create_renderer_builder(&self, context: BuildContext) -> Box<dyn RendererBuilder> {
        match &self.kind {
            SourceKind::Hls(options) => {
                Box::new(HlsRendererBuilder::new(self.clone(), options.clone(), context))
            }
            SourceKind::Progressive => {
                Box::new(ProgressiveRendererBuilder::new(self.clone(), context))
            }
        }
    }
}

impl std::fmt::Debug for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Source")
            .field("uri", &self.uri.as_str())
            .field("content_id", &self.content_id)
            .field("kind", &self.kind)
            .field("user_agent", &self.user_agent)
            .finish()
    }
}

/// Builder for [`Source`]
pub struct SourceBuilder {
    uri: String,
    user_agent: String,
    kind: Option<SourceKind>,
    content_id: Option<String>,
    buffers: Option<BufferConfig>,
    data_source_factory: Option<Arc<dyn DataSourceFactory>>,
    chunk_source_factory: Option<Arc<dyn ChunkSourceFactory>>,
    manifest_parser: Option<Arc<dyn ManifestParser>>,
}

impl SourceBuilder {
    fn new(uri: &str, user_agent: String, kind: Option<SourceKind>) -> Self {
        Self {
            uri: uri.to_string(),
            user_agent,
            kind,
            content_id: None,
            buffers: None,
            data_source_factory: None,
            chunk_source_factory: None,
            manifest_parser: None,
        }
    }

    pub fn content_id(mut self, content_id: impl Into<String>) -> Self {
        self.content_id = Some(content_id.into());
        self
    }

    pub fn buffers(mut self, buffers: BufferConfig) -> Self {
        self.buffers = Some(buffers);
        self
    }

    /// Replace the HLS options; ignored for progressive sources
    pub fn hls_options(mut self, options: HlsOptions) -> Self {
        if let Some(SourceKind::Hls(current)) = &mut self.kind {
            *current = options;
        }
        self
    }

    pub fn data_source_factory(mut self, factory: Arc<dyn DataSourceFactory>) -> Self {
        self.data_source_factory = Some(factory);
        self
    }

    pub fn chunk_source_factory(mut self, factory: Arc<dyn ChunkSourceFactory>) -> Self {
        self.chunk_source_factory = Some(factory);
        self
    }

    pub fn manifest_parser(mut self, parser: Arc<dyn ManifestParser>) -> Self {
        self.manifest_parser = Some(parser);
        self
    }

    pub fn build(self) -> Result<Source> {
        let uri = Url::parse(&self.uri).map_err(|e| {
            Error::InvalidConfig(format!("invalid source URI '{}': {}", self.uri, e))
        })?;
        if self.user_agent.trim().is_empty() {
            return Err(Error::InvalidConfig("user agent must not be empty".into()));
        }

        let kind = self.kind.unwrap_or_else(|| {
            if is_hls_url(&uri) {
                SourceKind::Hls(HlsOptions::default())
            } else {
                SourceKind::Progressive
            }
        });
        let buffers = self.buffers.unwrap_or_else(|| match &kind {
            SourceKind::Hls(_) => BufferConfig::default(),
            SourceKind::Progressive => BufferConfig::progressive(),
        });
        buffers.validate()?;

        let data_source_factory: Arc<dyn DataSourceFactory> = match self.data_source_factory {
            Some(factory) => factory,
            None => Arc::new(DefaultDataSourceFactory::new()?),
        };

        Ok(Source {
            content_id: self.content_id.unwrap_or_else(|| uri.to_string()),
            uri,
            kind,
            user_agent: self.user_agent,
            buffers,
            data_source_factory,
            chunk_source_factory: self
                .chunk_source_factory
                .unwrap_or_else(|| Arc::new(HlsChunkSourceFactory)),
            manifest_parser: self.manifest_parser.unwrap_or_else(|| Arc::new(HlsParser::new())),
        })
    }
}
