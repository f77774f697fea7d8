//! JSON domain events carried inside [`Envelope`](crate::envelope::Envelope)s.
//!
//! Field names are camelCase on the wire and unknown fields are ignored on
//! input, so newer platform versions can add attributes without breaking
//! older members.

use serde::{Deserialize, Serialize};

/// Discriminator of the announce event sent when a stream opens.
pub const JOIN_EVENT_TYPE: &str = "CalculationMemberJoinEvent";

/// Discriminator of an inbound calculation request.
pub const CALCULATION_REQUEST_TYPE: &str = "EntityProcessorCalculationRequest";

/// Discriminator of an outbound calculation response.
pub const CALCULATION_RESPONSE_TYPE: &str = "EntityProcessorCalculationResponse";

/// Error code for a request naming a processor that is not registered.
pub const UNKNOWN_PROCESSOR_CODE: &str = "UNKNOWN PROCESSOR";

/// Error code for a processor that failed while handling a request.
pub const EXCEPTION_CODE: &str = "EXCEPTION";

/// Announces this member's identity and capability tags to the platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalculationMemberJoinEvent {
    pub id: String,
    pub owner: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl CalculationMemberJoinEvent {
    pub fn new(owner: impl Into<String>, tags: Vec<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            owner: owner.into(),
            tags,
        }
    }
}

/// Typed JSON payload attached to requests and responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataPayload {
    #[serde(rename = "type")]
    pub payload_type: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// Structured error returned to the platform instead of an RPC failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventError {
    pub code: String,
    pub message: String,
}

impl EventError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// A unit of work routed to a named processor. Immutable once received.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityProcessorCalculationRequest {
    #[serde(default)]
    pub id: String,
    pub request_id: String,
    pub entity_id: String,
    pub processor_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processor_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<DataPayload>,
}

impl EntityProcessorCalculationRequest {
    /// Builds an empty response correlated to this request.
    pub fn to_response(&self) -> EntityProcessorCalculationResponse {
        EntityProcessorCalculationResponse {
            id: self.id.clone(),
            request_id: self.request_id.clone(),
            entity_id: self.entity_id.clone(),
            error: None,
            payload: None,
        }
    }

    /// Builds a correlated response carrying `error`.
    pub fn to_error_response(&self, error: EventError) -> EntityProcessorCalculationResponse {
        EntityProcessorCalculationResponse {
            error: Some(error),
            ..self.to_response()
        }
    }

    /// The JSON data of the payload, or `Null` when the request carries none.
    pub fn data(&self) -> &serde_json::Value {
        static NULL: serde_json::Value = serde_json::Value::Null;
        self.payload.as_ref().map_or(&NULL, |p| &p.data)
    }
}

/// The result of a calculation, correlated by request and entity id.
///
/// Exactly one of `error` and `payload` is expected to be set, although the
/// type does not forbid both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityProcessorCalculationResponse {
    #[serde(default)]
    pub id: String,
    pub request_id: String,
    pub entity_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<EventError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<DataPayload>,
}

/// Every event a member may put on the stream.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundEvent {
    Join(CalculationMemberJoinEvent),
    CalculationResponse(EntityProcessorCalculationResponse),
}

impl OutboundEvent {
    /// The envelope type discriminator for this event.
    pub const fn event_type(&self) -> &'static str {
        match self {
            Self::Join(_) => JOIN_EVENT_TYPE,
            Self::CalculationResponse(_) => CALCULATION_RESPONSE_TYPE,
        }
    }

    /// Serializes the inner event to JSON bytes.
    pub fn to_json(&self) -> crate::Result<Vec<u8>> {
        let bytes = match self {
            Self::Join(event) => serde_json::to_vec(event)?,
            Self::CalculationResponse(event) => serde_json::to_vec(event)?,
        };
        Ok(bytes)
    }

    /// A short, log-friendly description. Payload data is never included.
    pub fn summary(&self) -> String {
        match self {
            Self::Join(event) => format!(
                "{JOIN_EVENT_TYPE} for owner {} with tags {:?}",
                event.owner, event.tags
            ),
            Self::CalculationResponse(event) => format!(
                "{CALCULATION_RESPONSE_TYPE} for entity {} and request {} having errors: {:?}",
                event.entity_id, event.request_id, event.error
            ),
        }
    }
}

impl From<CalculationMemberJoinEvent> for OutboundEvent {
    fn from(event: CalculationMemberJoinEvent) -> Self {
        Self::Join(event)
    }
}

impl From<EntityProcessorCalculationResponse> for OutboundEvent {
    fn from(event: EntityProcessorCalculationResponse) -> Self {
        Self::CalculationResponse(event)
    }
}
