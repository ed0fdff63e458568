//! SMS trade alerts via the ClickSend REST API.

use async_trait::async_trait;
use serde_json::{json, Value};
use thiserror::Error;

const CLICKSEND_SMS_URL: &str = "https://rest.clicksend.com/v3/sms/send";
const SENDER_ID: &str = "TRADES";

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("sms request failed: {0}")]
    Request(String),
    #[error("failed to send SMS: {0}")]
    Status(u16),
}

/// Outbound notification channel. Trades report fills and failures here.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_sms(&self, body: &str, to: &str) -> Result<(), NotifyError>;
}

pub struct ClicksendClient {
    http: reqwest::Client,
    username: String,
    api_key: String,
    endpoint: String,
}

impl ClicksendClient {
    pub fn new(username: String, api_key: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            username,
            api_key,
            endpoint: CLICKSEND_SMS_URL.to_string(),
        }
    }
}

#[async_trait]
impl Notifier for ClicksendClient {
    async fn send_sms(&self, body: &str, to: &str) -> Result<(), NotifyError> {
        let response = self
            .http
            .post(&self.endpoint)
            .basic_auth(&self.username, Some(&self.api_key))
            .json(&sms_payload(body, to))
            .send()
            .await
            .map_err(|e| NotifyError::Request(e.to_string()))?;

        if !response.status().is_success() {
            return Err(NotifyError::Status(response.status().as_u16()));
        }
        Ok(())
    }
}

fn sms_payload(body: &str, to: &str) -> Value {
    json!({
        "messages": [
            {
                "source": SENDER_ID,
                "to": to,
                "body": body,
            }
        ]
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_carries_a_single_message_from_the_trades_sender() {
        let payload = sms_payload("BUY: something", "+10000000000");
        let messages = payload["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["source"], "TRADES");
        assert_eq!(messages[0]["to"], "+10000000000");
        assert_eq!(messages[0]["body"], "BUY: something");
    }

    #[test]
    fn rejected_status_maps_to_the_send_failure_message() {
        let err = NotifyError::Status(401);
        assert_eq!(err.to_string(), "failed to send SMS: 401");
    }
}
