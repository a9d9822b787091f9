use crate::config::Downstream;
use crate::metrics_defs::{DELIVERY_ATTEMPTS, DELIVERY_DURATION};
use crate::payload::InboundPayload;
use reqwest::StatusCode;
use serde::Serialize;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::time::timeout;

/// Why a delivery attempt did not succeed.
#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("downstream responded with status {0}")]
    BadStatus(StatusCode),

    #[error("downstream did not respond within {0:?}")]
    Timeout(Duration),

    #[error("could not reach downstream: {0}")]
    Request(#[from] reqwest::Error),
}

impl DeliveryError {
    fn outcome_tag(&self) -> &'static str {
        match self {
            DeliveryError::BadStatus(_) => "bad_status",
            DeliveryError::Timeout(_) | DeliveryError::Request(_) => "failed",
        }
    }
}

/// Result of the single delivery attempt, reported back to the sender as
/// `local_delivery`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeliveryOutcome {
    pub success: bool,
    pub error: Option<String>,
    pub target_url: String,
}

impl DeliveryOutcome {
    pub fn delivered(target_url: impl Into<String>) -> Self {
        Self {
            success: true,
            error: None,
            target_url: target_url.into(),
        }
    }

    pub fn failed(target_url: impl Into<String>, error: &DeliveryError) -> Self {
        Self {
            success: false,
            error: Some(error.to_string()),
            target_url: target_url.into(),
        }
    }
}

/// Posts payloads to the downstream `/webhook` endpoint.
///
/// There is exactly one attempt per call, bounded by the configured timeout.
/// Nothing is retried.
pub struct Forwarder {
    client: reqwest::Client,
    target_url: String,
    webhook_url: String,
    timeout: Duration,
}

impl Forwarder {
    pub fn new(downstream: &Downstream) -> Result<Self, reqwest::Error> {
        // The downstream is a directly reachable application
        let client = reqwest::Client::builder()
            .no_proxy()
            .user_agent(concat!("signal-relay/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            target_url: downstream.url.clone(),
            webhook_url: downstream.webhook_url(),
            timeout: downstream.timeout(),
        })
    }

    /// The configured downstream base URL.
    pub fn target_url(&self) -> &str {
        &self.target_url
    }

    /// Sends `payload` as JSON and returns whatever status the downstream
    /// answered with.
    pub async fn post<T>(&self, payload: &T) -> Result<StatusCode, DeliveryError>
    where
        T: Serialize + ?Sized,
    {
        let request = self.client.post(&self.webhook_url).json(payload).send();

        let response = timeout(self.timeout, request)
            .await
            .map_err(|_| DeliveryError::Timeout(self.timeout))??;

        Ok(response.status())
    }

    /// Delivers a relayed webhook. Only a 200 counts as delivered.
    pub async fn deliver(&self, payload: &InboundPayload) -> DeliveryOutcome {
        let started = Instant::now();
        let result = match self.post(payload).await {
            Ok(status) if status == StatusCode::OK => Ok(()),
            Ok(status) => Err(DeliveryError::BadStatus(status)),
            Err(e) => Err(e),
        };
        shared::histogram!(DELIVERY_DURATION).record(started.elapsed().as_secs_f64());

        match result {
            Ok(()) => {
                tracing::info!(target_url = %self.webhook_url, "Delivered webhook downstream");
                shared::counter!(DELIVERY_ATTEMPTS, "outcome" => "delivered").increment(1);
                DeliveryOutcome::delivered(&self.target_url)
            }
            Err(e) => {
                match &e {
                    DeliveryError::BadStatus(_) => {
                        tracing::warn!(target_url = %self.webhook_url, error = %e, "Downstream rejected webhook")
                    }
                    _ => {
                        tracing::error!(target_url = %self.webhook_url, error = %e, "Downstream delivery failed")
                    }
                }
                shared::counter!(DELIVERY_ATTEMPTS, "outcome" => e.outcome_tag()).increment(1);
                DeliveryOutcome::failed(&self.target_url, &e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutils::{start_downstream, start_slow_downstream, unreachable_url};
    use serde_json::json;

    fn forwarder(url: &str, timeout_secs: u64) -> Forwarder {
        Forwarder::new(&Downstream {
            url: url.into(),
            timeout_secs,
        })
        .unwrap()
    }

    fn payload() -> InboundPayload {
        let mut payload = InboundPayload::new();
        payload.insert("symbol".into(), json!("BTCUSDT"));
        payload
    }

    #[tokio::test]
    async fn delivers_json_to_webhook_path() {
        let mut downstream = start_downstream(StatusCode::OK).await;
        let forwarder = forwarder(&downstream.url, 5);

        let outcome = forwarder.deliver(&payload()).await;
        assert_eq!(outcome, DeliveryOutcome::delivered(&downstream.url));

        let received = downstream.received.recv().await.unwrap();
        assert_eq!(received.path, "/webhook");
        assert_eq!(received.content_type.as_deref(), Some("application/json"));
        assert_eq!(received.body, json!({"symbol": "BTCUSDT"}));
    }

    #[tokio::test]
    async fn non_200_is_a_failed_delivery() {
        for status in [StatusCode::CREATED, StatusCode::INTERNAL_SERVER_ERROR] {
            let downstream = start_downstream(status).await;
            let outcome = forwarder(&downstream.url, 5).deliver(&payload()).await;

            assert!(!outcome.success);
            let error = outcome.error.unwrap();
            assert!(error.contains(status.as_str()), "{error}");
        }
    }

    #[tokio::test]
    async fn connection_failure_is_a_failed_delivery() {
        let url = unreachable_url().await;
        let outcome = forwarder(&url, 5).deliver(&payload()).await;

        assert!(!outcome.success);
        assert!(!outcome.error.unwrap().is_empty());
        assert_eq!(outcome.target_url, url);
    }

    #[tokio::test]
    async fn post_times_out() {
        let url = start_slow_downstream(Duration::from_secs(3)).await;
        let result = forwarder(&url, 1).post(&payload()).await;

        assert!(matches!(
            result,
            Err(DeliveryError::Timeout(d)) if d == Duration::from_secs(1)
        ));
    }

    #[tokio::test]
    async fn post_reports_any_status() {
        let downstream = start_downstream(StatusCode::ACCEPTED).await;
        let status = forwarder(&downstream.url, 5).post(&json!({"a": 1})).await.unwrap();
        assert_eq!(status, StatusCode::ACCEPTED);
    }
}
