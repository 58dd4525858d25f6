//! Websocket feed envelopes
//!
//! The feed speaks JSON-RPC: the subscription request is answered with
//! `{"jsonrpc":"2.0","result":<subscription id>,"id":1}`, after which every
//! matching transaction arrives as a `logsNotification`.

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionAck {
    pub result: u64,
    pub id: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogNotification {
    pub params: NotificationParams,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotificationParams {
    pub result: NotificationResult,
    #[serde(default)]
    pub subscription: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotificationResult {
    #[serde(default)]
    pub context: NotificationContext,
    pub value: LogValue,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NotificationContext {
    #[serde(default)]
    pub slot: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogValue {
    pub signature: String,
    #[serde(default)]
    pub err: Option<serde_json::Value>,
    #[serde(default)]
    pub logs: Vec<String>,
}

/// A parsed inbound frame
#[derive(Debug, Clone)]
pub enum FeedMessage {
    Ack(SubscriptionAck),
    Logs(LogNotification),
}

impl FeedMessage {
    pub fn parse(raw: &[u8]) -> Result<Self, serde_json::Error> {
        match serde_json::from_slice::<LogNotification>(raw) {
            Ok(notification) => Ok(FeedMessage::Logs(notification)),
            Err(err) => match serde_json::from_slice::<SubscriptionAck>(raw) {
                Ok(ack) => Ok(FeedMessage::Ack(ack)),
                Err(_) => Err(err),
            },
        }
    }
}

impl LogNotification {
    pub fn signature(&self) -> &str {
        &self.params.result.value.signature
    }

    pub fn logs(&self) -> &[String] {
        &self.params.result.value.logs
    }

    /// The transaction failed on chain
    pub fn failed(&self) -> bool {
        self.params
            .result
            .value
            .err
            .as_ref()
            .is_some_and(|err| !err.is_null())
    }
}
