use crate::config::Config;
use crate::delivery::{DeliveryOutcome, Forwarder};
use crate::errors::Result;
use crate::metrics_defs::{WEBHOOKS_RECEIVED, WEBHOOKS_REJECTED};
use crate::payload::{self, Encoding, InboundPayload, PayloadError};
use crate::receipt::{ReceiptMetadata, epoch_secs};
use chrono::Utc;
use http::header::{CONTENT_TYPE, USER_AGENT};
use http::{HeaderMap, StatusCode};
use serde::Serialize;
use std::net::IpAddr;

pub const RECEIVED_MESSAGE: &str = "Webhook received";
pub const FAILED_MESSAGE: &str = "Error while processing webhook";

/// What the sender of a webhook gets back.
///
/// `success` only says whether the webhook itself was accepted. Whether it
/// reached the local application is reported separately in `local_delivery`.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum RelayAcknowledgment {
    Received {
        success: bool,
        message: &'static str,
        timestamp: f64,
        data_received: InboundPayload,
        local_delivery: DeliveryOutcome,
    },
    Failed {
        success: bool,
        error: String,
        message: &'static str,
    },
}

impl RelayAcknowledgment {
    pub fn received(payload: InboundPayload, delivery: DeliveryOutcome) -> Self {
        RelayAcknowledgment::Received {
            success: true,
            message: RECEIVED_MESSAGE,
            timestamp: epoch_secs(Utc::now()),
            data_received: payload,
            local_delivery: delivery,
        }
    }

    pub fn failed(error: &PayloadError) -> Self {
        RelayAcknowledgment::Failed {
            success: false,
            error: error.to_string(),
            message: FAILED_MESSAGE,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            RelayAcknowledgment::Received { .. } => StatusCode::OK,
            RelayAcknowledgment::Failed { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Normalizes a webhook body and stamps it with its receipt metadata.
pub async fn receive(
    headers: &HeaderMap,
    body: &[u8],
    receipt: &ReceiptMetadata,
) -> std::result::Result<(Encoding, InboundPayload), PayloadError> {
    let content_type = headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok());
    let (encoding, mut payload) = payload::normalize(content_type, body).await?;
    receipt.apply(&mut payload);
    Ok((encoding, payload))
}

/// Receives webhooks and relays them to the local application.
///
/// Holds nothing but read-only state, so one instance serves all
/// connections concurrently.
pub struct RelayHandler {
    config: Config,
    forwarder: Forwarder,
}

impl RelayHandler {
    pub fn new(config: Config) -> Result<Self> {
        let forwarder = Forwarder::new(&config.downstream)?;
        Ok(Self { config, forwarder })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn forwarder(&self) -> &Forwarder {
        &self.forwarder
    }

    /// Handles one webhook: normalize, enrich, forward once, acknowledge.
    ///
    /// A failed delivery still yields a 200 acknowledgment. Only a body that
    /// cannot be normalized fails the request.
    pub async fn handle(
        &self,
        headers: &HeaderMap,
        peer: Option<IpAddr>,
        body: &[u8],
    ) -> (RelayAcknowledgment, StatusCode) {
        let receipt = ReceiptMetadata::capture(headers, peer);
        let client_ip = receipt.client_ip();
        let user_agent = headers
            .get(USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("Unknown");

        tracing::info!(client_ip, user_agent, "Webhook received");

        let (encoding, payload) = match receive(headers, body, &receipt).await {
            Ok(received) => received,
            Err(e) => {
                tracing::error!(client_ip, user_agent, error = %e, "Failed to process webhook");
                shared::counter!(WEBHOOKS_REJECTED).increment(1);
                let ack = RelayAcknowledgment::failed(&e);
                let status = ack.status();
                return (ack, status);
            }
        };

        shared::counter!(WEBHOOKS_RECEIVED, "encoding" => encoding.as_str()).increment(1);
        tracing::info!(
            encoding = encoding.as_str(),
            payload = %serde_json::to_string(&payload).unwrap_or_default(),
            "Webhook payload"
        );

        let delivery = self.forwarder.deliver(&payload).await;
        let ack = RelayAcknowledgment::received(payload, delivery);
        let status = ack.status();
        (ack, status)
    }
}
