//! Typed client for the inspection server API.
//!
//! Two timeout tiers: metadata calls (products, sessions, ROI groups) get
//! 10 seconds; the inspect call runs every detector server-side and gets
//! 180. A timed-out inspect fails the cycle but leaves the session open
//! for a retry.

use std::time::Duration;

use thiserror::Error;
use tracing::warn;

use aoi_types::{
    CloseSessionResponse, CreateSessionRequest, CreateSessionResponse, InspectRequest,
    InspectResponse, ListProductsResponse, ProductInfo, RoiGroup, RoiGroupsResponse,
};

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("server unreachable: {0}")]
    Unreachable(reqwest::Error),
    #[error("server returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("malformed server response: {0}")]
    Malformed(reqwest::Error),
}

pub struct ServerApi {
    base_url: String,
    meta: reqwest::Client,
    inspect: reqwest::Client,
}

impl ServerApi {
    pub fn new(base_url: &str, meta_timeout: Duration, inspect_timeout: Duration) -> Self {
        let build = |timeout: Duration| {
            reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_else(|e| {
                    warn!("http client builder failed ({e}), using defaults");
                    reqwest::Client::new()
                })
        };
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            meta: build(meta_timeout),
            inspect: build(inspect_timeout),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn parse<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Status { status: status.as_u16(), body });
        }
        response.json().await.map_err(ApiError::Malformed)
    }

    pub async fn list_products(&self) -> Result<Vec<ProductInfo>, ApiError> {
        let response = self
            .meta
            .get(self.url("/api/products"))
            .send()
            .await
            .map_err(ApiError::Unreachable)?;
        let parsed: ListProductsResponse = Self::parse(response).await?;
        Ok(parsed.products)
    }

    pub async fn get_roi_groups(&self, product: &str) -> Result<Vec<RoiGroup>, ApiError> {
        let response = self
            .meta
            .get(self.url(&format!("/api/products/{product}/roi-groups")))
            .send()
            .await
            .map_err(ApiError::Unreachable)?;
        let parsed: RoiGroupsResponse = Self::parse(response).await?;
        Ok(parsed.roi_groups)
    }

    pub async fn create_session(
        &self,
        request: &CreateSessionRequest,
    ) -> Result<CreateSessionResponse, ApiError> {
        let response = self
            .meta
            .post(self.url("/api/session"))
            .json(request)
            .send()
            .await
            .map_err(ApiError::Unreachable)?;
        Self::parse(response).await
    }

    pub async fn close_session(&self, session_id: &str) -> Result<CloseSessionResponse, ApiError> {
        let response = self
            .meta
            .post(self.url(&format!("/api/session/{session_id}/close")))
            .send()
            .await
            .map_err(ApiError::Unreachable)?;
        Self::parse(response).await
    }

    pub async fn inspect(&self, request: &InspectRequest) -> Result<InspectResponse, ApiError> {
        let response = self
            .inspect
            .post(self.url("/api/inspect"))
            .json(request)
            .send()
            .await
            .map_err(ApiError::Unreachable)?;
        Self::parse(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_trailing_slash_is_normalized() {
        let api = ServerApi::new(
            "http://host:5000/",
            Duration::from_secs(10),
            Duration::from_secs(180),
        );
        assert_eq!(api.url("/api/products"), "http://host:5000/api/products");
    }

    #[tokio::test]
    async fn unreachable_server_reports_unreachable() {
        let api = ServerApi::new(
            "http://127.0.0.1:9",
            Duration::from_secs(1),
            Duration::from_secs(1),
        );
        assert!(matches!(
            api.list_products().await,
            Err(ApiError::Unreachable(_))
        ));
    }
}
