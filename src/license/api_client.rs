use async_trait::async_trait;
use std::time::{Duration, Instant};

use super::error::{LicenseError, LicenseResult};
use super::types::*;
use crate::utils::logger::{log_event, LogEvent, NetworkDetails, NetworkStatus};

const VERIFY_PATH: &str = "/license/verify";
const HEARTBEAT_PATH: &str = "/license/heartbeat";

/// The remote service that confirms codes and receives heartbeats.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RemoteAuthority: Send + Sync {
    /// Any transport or decoding failure is a `LicenseError::Network`.
    async fn verify(&self, activation_code: &str, machine_id: &str) -> LicenseResult<VerifyResponse>;

    /// Best effort. Callers log the error and move on.
    async fn heartbeat(
        &self,
        activation_code: &str,
        machine_id: &str,
        computer_name: &str,
    ) -> LicenseResult<()>;
}

pub struct LicenseApiClient {
    client: reqwest::Client,
    base_url: String,
}

impl LicenseApiClient {
    pub fn new(base_url: &str, timeout: Duration) -> LicenseResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LicenseError::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn post<B: serde::Serialize + ?Sized>(
        &self,
        operation: &str,
        path: &str,
        body: &B,
    ) -> LicenseResult<reqwest::Response> {
        let url = self.endpoint(path);
        let start = Instant::now();

        let result = self.client.post(&url).json(body).send().await;
        let duration_ms = start.elapsed().as_millis() as u64;

        let (status, status_code) = match &result {
            Ok(response) if response.status().is_success() => {
                (NetworkStatus::Success, Some(response.status().as_u16()))
            }
            Ok(response) => (
                NetworkStatus::Failed {
                    error: format!("HTTP {}", response.status()),
                },
                Some(response.status().as_u16()),
            ),
            Err(e) if e.is_timeout() => (NetworkStatus::Timeout { duration_ms }, None),
            Err(e) => (NetworkStatus::Failed { error: e.to_string() }, None),
        };
        log_event(LogEvent::Network {
            operation: operation.to_string(),
            status,
            duration_ms,
            details: Some(NetworkDetails {
                endpoint: path.to_string(),
                method: "POST".to_string(),
                status_code,
            }),
        });

        let response = result.map_err(|e| LicenseError::Network(e.to_string()))?;
        if response.status().is_success() {
            return Ok(response);
        }

        let fallback = format!("license server returned HTTP {}", response.status());
        let message = response
            .json::<ApiError>()
            .await
            .map(|error| error.message)
            .unwrap_or(fallback);
        Err(LicenseError::Network(message))
    }
}

#[async_trait]
impl RemoteAuthority for LicenseApiClient {
    async fn verify(&self, activation_code: &str, machine_id: &str) -> LicenseResult<VerifyResponse> {
        let body = VerifyRequest {
            activation_code,
            machine_id,
        };
        self.post("license verify", VERIFY_PATH, &body)
            .await?
            .json::<VerifyResponse>()
            .await
            .map_err(|e| LicenseError::Network(format!("Failed to parse response: {}", e)))
    }

    async fn heartbeat(
        &self,
        activation_code: &str,
        machine_id: &str,
        computer_name: &str,
    ) -> LicenseResult<()> {
        let body = HeartbeatRequest {
            activation_code,
            machine_id,
            computer_name,
        };
        // Response body is ignored
        self.post("license heartbeat", HEARTBEAT_PATH, &body).await?;
        Ok(())
    }
}
