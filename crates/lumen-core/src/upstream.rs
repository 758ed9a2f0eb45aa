//! Data sources
//!
//! Byte transport used for manifests and media. Every transfer is reported to
//! an optional [`TransferListener`], normally the build's bandwidth estimator.

use crate::{bandwidth::TransferListener, Error, Result};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use reqwest::{header::USER_AGENT, Client};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};
use url::Url;

/// Fetches the bytes behind a URI
#[async_trait]
pub trait DataSource: Send + Sync {
    async fn fetch(&self, url: &Url) -> Result<Bytes>;
}

/// Creates data sources for a build
pub trait DataSourceFactory: Send + Sync {
    fn create(
        &self,
        listener: Option<Arc<dyn TransferListener>>,
        user_agent: &str,
    ) -> Arc<dyn DataSource>;
}

/// Pairs `on_transfer_start` with `on_transfer_end`, including on early return
struct TransferGuard<'a> {
    listener: Option<&'a Arc<dyn TransferListener>>,
}

impl<'a> TransferGuard<'a> {
    fn start(listener: Option<&'a Arc<dyn TransferListener>>) -> Self {
        if let Some(listener) = listener {
            listener.on_transfer_start();
        }
        Self { listener }
    }

    fn bytes(&self, count: usize) {
        if let Some(listener) = self.listener {
            listener.on_bytes_transferred(count);
        }
    }
}

impl Drop for TransferGuard<'_> {
    fn drop(&mut self) {
        if let Some(listener) = self.listener {
            listener.on_transfer_end();
        }
    }
}

/// Data source for `http`, `https` and `file` URIs
pub struct DefaultDataSource {
    client: Client,
    user_agent: String,
    listener: Option<Arc<dyn TransferListener>>,
}

impl DefaultDataSource {
    async fn fetch_http(&self, url: &Url) -> Result<Bytes> {
        let transfer = TransferGuard::start(self.listener.as_ref());
        let mut response = self
            .client
            .get(url.clone())
            .header(USER_AGENT, &self.user_agent)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Http {
                uri: url.to_string(),
                status: status.as_u16(),
            });
        }

        let mut body = BytesMut::new();
        while let Some(chunk) = response.chunk().await? {
            transfer.bytes(chunk.len());
            body.extend_from_slice(&chunk);
        }
        Ok(body.freeze())
    }

    async fn fetch_file(&self, url: &Url) -> Result<Bytes> {
        let path = url.to_file_path().map_err(|_| {
            Error::UnsupportedScheme(format!("file URL without a local path: {}", url))
        })?;
        let transfer = TransferGuard::start(self.listener.as_ref());
        let data = tokio::fs::read(&path).await?;
        transfer.bytes(data.len());
        Ok(Bytes::from(data))
    }
}

#[async_trait]
impl DataSource for DefaultDataSource {
    #[instrument(skip(self), fields(url = %url))]
    async fn fetch(&self, url: &Url) -> Result<Bytes> {
        let data = match url.scheme() {
            "http" | "https" => self.fetch_http(url).await?,
            "file" => self.fetch_file(url).await?,
            other => return Err(Error::UnsupportedScheme(other.to_string())),
        };
        debug!(bytes = data.len(), "Fetched");
        Ok(data)
    }
}

/// Factory for [`DefaultDataSource`] sharing one HTTP client
#[derive(Debug, Clone)]
pub struct DefaultDataSourceFactory {
    client: Client,
}

impl DefaultDataSourceFactory {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

impl DataSourceFactory for DefaultDataSourceFactory {
    fn create(
        &self,
        listener: Option<Arc<dyn TransferListener>>,
        user_agent: &str,
    ) -> Arc<dyn DataSource> {
        Arc::new(DefaultDataSource {
            client: self.client.clone(),
            user_agent: user_agent.to_string(),
            listener,
        })
    }
}
