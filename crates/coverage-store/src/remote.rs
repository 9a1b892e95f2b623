//! Remote store implementation over HTTP.
//!
//! Speaks the same row shapes as the in-process backends, serialized as
//! JSON by a catalog service. Selected through
//! [`ConnectionMode::Remote`](crate::ConnectionMode).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use tracing::debug;

use coverage_common::{CatalogError, CatalogResult};

use crate::{CoverageRow, DataConnection, ExtentRow, LayerRow, QueryWindow, SeriesRow};

/// HTTP client for a remote catalog service.
pub struct RemoteConnection {
    client: reqwest::Client,
    base_url: String,
}

impl RemoteConnection {
    /// Create a client for the service at `base_url` (no trailing slash).
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> CatalogResult<T> {
        let url = format!("{}{}", self.base_url, path);
        debug!(%url, "remote store request");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| CatalogError::Remote(format!("request failed: {}", e)))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(CatalogError::Remote(format!("not found: {}", path)));
        }
        if !response.status().is_success() {
            return Err(CatalogError::Remote(format!(
                "unexpected status {} for {}",
                response.status(),
                path
            )));
        }

        response
            .json()
            .await
            .map_err(|e| CatalogError::Remote(format!("invalid response body: {}", e)))
    }

    async fn post_json<B: serde::Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> CatalogResult<T> {
        let url = format!("{}{}", self.base_url, path);
        debug!(%url, "remote store request");

        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| CatalogError::Remote(format!("request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(CatalogError::Remote(format!(
                "unexpected status {} for {}",
                response.status(),
                path
            )));
        }

        response
            .json()
            .await
            .map_err(|e| CatalogError::Remote(format!("invalid response body: {}", e)))
    }
}

#[async_trait]
impl DataConnection for RemoteConnection {
    async fn coverage_rows(
        &self,
        layer: &str,
        window: &QueryWindow,
    ) -> CatalogResult<Vec<CoverageRow>> {
        self.post_json(&format!("/layers/{}/coverages", layer), window)
            .await
    }

    async fn extent(&self, id: &str) -> CatalogResult<ExtentRow> {
        self.get_json(&format!("/extents/{}", id)).await
    }

    async fn layer(&self, name: &str) -> CatalogResult<LayerRow> {
        self.get_json(&format!("/layers/{}", name)).await
    }

    async fn series_for_layer(&self, layer: &str) -> CatalogResult<Vec<SeriesRow>> {
        self.get_json(&format!("/layers/{}/series", layer)).await
    }

    async fn distinct_times(&self, layer: &str) -> CatalogResult<Vec<DateTime<Utc>>> {
        self.get_json(&format!("/layers/{}/times", layer)).await
    }

    async fn distinct_elevations(&self, layer: &str) -> CatalogResult<Vec<f64>> {
        self.get_json(&format!("/layers/{}/elevations", layer)).await
    }
}
