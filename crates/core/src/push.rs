use base64::{Engine, engine::general_purpose::STANDARD};
use serde::Deserialize;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

use crate::models::WorkRequest;

/// Body of a Pub/Sub push delivery.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PushEnvelope {
    pub message: PushMessage,
    pub subscription: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PushMessage {
    /// Base64-encoded JSON `WorkRequest`.
    pub data: String,
    pub message_id: String,
    pub publish_time: String,
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("decode envelope: {0}")]
    Envelope(#[source] serde_json::Error),
    #[error("b64 decode: {0}")]
    Base64(#[source] base64::DecodeError),
    #[error("decode message: {0}")]
    Payload(#[source] serde_json::Error),
}

/// A decoded, not yet validated, work request.
#[derive(Debug, Clone)]
pub struct DecodedMessage {
    pub message_id: String,
    pub subscription: String,
    pub published: Option<OffsetDateTime>,
    pub request: WorkRequest,
}

impl PushEnvelope {
    pub fn decode(body: &[u8]) -> Result<DecodedMessage, DecodeError> {
        let envelope: PushEnvelope = serde_json::from_slice(body).map_err(DecodeError::Envelope)?;
        let raw = STANDARD.decode(envelope.message.data.trim()).map_err(DecodeError::Base64)?;
        let request: WorkRequest = serde_json::from_slice(&raw).map_err(DecodeError::Payload)?;
        let published = parse_publish_time(&envelope.message.publish_time);
        Ok(DecodedMessage {
            message_id: envelope.message.message_id,
            subscription: envelope.subscription,
            published,
            request,
        })
    }
}

fn parse_publish_time(value: &str) -> Option<OffsetDateTime> {
    if value.is_empty() {
        return None;
    }
    match OffsetDateTime::parse(value, &Rfc3339) {
        Ok(time) => Some(time),
        Err(e) => {
            tracing::debug!("Ignoring unparseable publishTime {value:?}: {e}");
            None
        }
    }
}
