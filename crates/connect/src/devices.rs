//! Typed client for the device management platform.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Method;
use serde::Deserialize;

use fleetmon_core::sync::{DeviceTelemetrySource, RemoteDevice, SourceError};

use crate::client::{ApiClient, RequestOptions};
use crate::error::Result;
use crate::token::AccessTokenProvider;

/// Device endpoints in preference order. The platform moved device reads to
/// v2; older tenants still answer only on v1.
const DEVICE_PATHS: [&str; 2] = ["/api/v2/devices", "/api/v1/devices"];

#[derive(Debug, Deserialize)]
struct DeviceListResponse {
    devices: Vec<RemoteDevice>,
}

pub struct DevicePlatformClient {
    api: ApiClient,
    tokens: Arc<dyn AccessTokenProvider>,
}

impl DevicePlatformClient {
    pub fn new(api: ApiClient, tokens: Arc<dyn AccessTokenProvider>) -> Self {
        Self { api, tokens }
    }

    /// Fetch one device by its platform identifier.
    pub async fn get_device(&self, external_id: &str) -> Result<RemoteDevice> {
        let encoded = urlencoding::encode(external_id);
        let candidates: Vec<String> = DEVICE_PATHS
            .iter()
            .map(|path| format!("{}/{}", path, encoded))
            .collect();
        let candidate_refs: Vec<&str> = candidates.iter().map(String::as_str).collect();

        let token = self.tokens.access_token().await?;
        self.api
            .request_json(
                &token,
                Method::GET,
                &candidate_refs,
                &RequestOptions::default(),
            )
            .await
    }

    /// List every device visible to the token.
    pub async fn list_devices(&self) -> Result<Vec<RemoteDevice>> {
        let token = self.tokens.access_token().await?;
        let response: DeviceListResponse = self
            .api
            .request_json(
                &token,
                Method::GET,
                &DEVICE_PATHS,
                &RequestOptions::default(),
            )
            .await?;
        Ok(response.devices)
    }
}

#[async_trait]
impl DeviceTelemetrySource for DevicePlatformClient {
    async fn fetch_device(&self, external_id: &str) -> Result<RemoteDevice, SourceError> {
        self.get_device(external_id).await.map_err(SourceError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_ids_are_url_encoded_into_the_path() {
        let encoded = urlencoding::encode("ap 301/b");
        assert_eq!(
            format!("{}/{}", DEVICE_PATHS[0], encoded),
            "/api/v2/devices/ap%20301%2Fb"
        );
    }
}
