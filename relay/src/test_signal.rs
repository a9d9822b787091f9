use crate::delivery::Forwarder;
use crate::payload::InboundPayload;
use crate::receipt::epoch_secs;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;

pub const SENT_MESSAGE: &str = "Test webhook sent";
pub const FAILED_MESSAGE: &str = "Test webhook could not be sent";

/// The fixed signal sent by `/test`.
pub fn test_signal(at: DateTime<Utc>) -> InboundPayload {
    let mut signal = InboundPayload::new();
    signal.insert("symbol".into(), json!("BTCUSDT"));
    signal.insert("action".into(), json!("buy"));
    signal.insert("price".into(), json!(45000));
    signal.insert("strategy".into(), json!("test_strategy"));
    signal.insert("timestamp".into(), json!(epoch_secs(at)));
    signal.insert("test".into(), json!(true));
    signal.insert("source".into(), json!("heroku_test"));
    signal
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum TestSignalReport {
    /// The downstream answered, with any status.
    Sent {
        success: bool,
        message: &'static str,
        test_data: InboundPayload,
        local_response: u16,
    },
    Failed {
        success: bool,
        error: String,
        message: &'static str,
        test_data: InboundPayload,
    },
}

/// Pushes the test signal through the regular forward step.
pub async fn send_test_signal(forwarder: &Forwarder) -> TestSignalReport {
    let test_data = test_signal(Utc::now());

    match forwarder.post(&test_data).await {
        Ok(status) => {
            tracing::info!(status = status.as_u16(), "Test webhook sent");
            TestSignalReport::Sent {
                success: true,
                message: SENT_MESSAGE,
                test_data,
                local_response: status.as_u16(),
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "Test webhook failed");
            TestSignalReport::Failed {
                success: false,
                error: e.to_string(),
                message: FAILED_MESSAGE,
                test_data,
            }
        }
    }
}
