//! Transport-neutral event envelope.
//!
//! Every outbound domain event is wrapped in exactly one [`Envelope`] before it
//! reaches the wire, and every inbound [`CloudEvent`] is unwrapped into one so
//! the session can route on [`Envelope::event_type`] alone.

use crate::{
    Error, Result,
    events::OutboundEvent,
    proto::{
        CloudEvent, CloudEventAttributeValue, DATA_CONTENT_TYPE_ATTRIBUTE, SPEC_VERSION,
        cloud_event::Data,
    },
};
use bytes::Bytes;
use serde::de::DeserializeOwned;

/// Content type of every envelope produced by this crate.
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// A typed wrapper around an opaque, serialized event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub event_type: String,
    pub id: String,
    pub source: String,
    pub content_type: String,
    pub data: Bytes,
}

impl Envelope {
    /// Wraps `event` with a fresh random id and the given `source`.
    pub fn wrap(event: &OutboundEvent, source: &str) -> Result<Self> {
        Ok(Self {
            event_type: event.event_type().to_string(),
            id: uuid::Uuid::new_v4().to_string(),
            source: source.to_string(),
            content_type: JSON_CONTENT_TYPE.to_string(),
            data: Bytes::from(event.to_json()?),
        })
    }

    /// Deserializes the JSON payload into `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.data)?)
    }

    fn is_textual(&self) -> bool {
        let essence = self
            .content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim();
        essence == JSON_CONTENT_TYPE || essence.ends_with("+json") || essence.starts_with("text/")
    }
}

impl TryFrom<Envelope> for CloudEvent {
    type Error = Error;

    fn try_from(envelope: Envelope) -> Result<Self> {
        let data = if envelope.is_textual() {
            let text = String::from_utf8(envelope.data.to_vec()).map_err(|e| {
                Error::Serialization {
                    reason: format!("textual payload is not UTF-8: {e}"),
                }
            })?;
            Data::TextData(text)
        } else {
            Data::BinaryData(envelope.data.to_vec())
        };

        let mut event = CloudEvent {
            id: envelope.id,
            source: envelope.source,
            spec_version: SPEC_VERSION.to_string(),
            r#type: envelope.event_type,
            data: Some(data),
            ..Default::default()
        };
        event.attributes.insert(
            DATA_CONTENT_TYPE_ATTRIBUTE.to_string(),
            CloudEventAttributeValue::string(envelope.content_type),
        );
        Ok(event)
    }
}

impl TryFrom<CloudEvent> for Envelope {
    type Error = Error;

    fn try_from(event: CloudEvent) -> Result<Self> {
        let content_type = event
            .attributes
            .get(DATA_CONTENT_TYPE_ATTRIBUTE)
            .and_then(CloudEventAttributeValue::as_str)
            .unwrap_or(JSON_CONTENT_TYPE)
            .to_string();

        let data = match event.data {
            None => Bytes::new(),
            Some(Data::TextData(text)) => Bytes::from(text),
            Some(Data::BinaryData(bytes)) => Bytes::from(bytes),
            Some(Data::ProtoData(any)) => {
                return Err(Error::UnsupportedPayload {
                    reason: format!("protobuf data of type {} is not supported", any.type_url),
                });
            }
        };

        Ok(Self {
            event_type: event.r#type,
            id: event.id,
            source: event.source,
            content_type,
            data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{CalculationMemberJoinEvent, EntityProcessorCalculationRequest};

    #[test]
    fn wrapped_join_event_travels_as_text_data() {
        let event = OutboundEvent::from(CalculationMemberJoinEvent::new(
            "CYODA",
            vec!["default".into(), "prizes".into()],
        ));
        let envelope = Envelope::wrap(&event, "SimpleSample").expect("event should wrap");
        assert_eq!(envelope.event_type, "CalculationMemberJoinEvent");
        assert_eq!(envelope.source, "SimpleSample");
        assert!(uuid::Uuid::parse_str(&envelope.id).is_ok());

        let cloud_event = CloudEvent::try_from(envelope).expect("envelope should convert");
        assert_eq!(cloud_event.spec_version, "1.0");
        let Some(Data::TextData(text)) = &cloud_event.data else {
            panic!("expected text data, got {:?}", cloud_event.data);
        };
        assert!(text.contains("\"owner\":\"CYODA\""));
        assert_eq!(
            cloud_event
                .attributes
                .get(DATA_CONTENT_TYPE_ATTRIBUTE)
                .and_then(CloudEventAttributeValue::as_str),
            Some(JSON_CONTENT_TYPE)
        );
    }

    #[test]
    fn every_wrap_gets_a_distinct_id() {
        let event = OutboundEvent::from(CalculationMemberJoinEvent::new("CYODA", vec![]));
        let a = Envelope::wrap(&event, "s").expect("wrap");
        let b = Envelope::wrap(&event, "s").expect("wrap");
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn inbound_binary_request_decodes() {
        let body = br#"{"requestId":"r","entityId":"e","processorName":"p"}"#;
        let cloud_event = CloudEvent {
            id: "1".into(),
            source: "platform".into(),
            spec_version: "1.0".into(),
            r#type: "EntityProcessorCalculationRequest".into(),
            data: Some(Data::BinaryData(body.to_vec())),
            ..Default::default()
        };

        let envelope = Envelope::try_from(cloud_event).expect("event should unwrap");
        assert_eq!(envelope.content_type, JSON_CONTENT_TYPE);
        let request: EntityProcessorCalculationRequest =
            envelope.decode().expect("payload should decode");
        assert_eq!(request.processor_name, "p");
    }

    #[test]
    fn protobuf_data_is_rejected() {
        let cloud_event = CloudEvent {
            r#type: "Anything".into(),
            data: Some(Data::ProtoData(prost_types::Any {
                type_url: "type.googleapis.com/x.Y".into(),
                value: vec![],
            })),
            ..Default::default()
        };
        assert!(matches!(
            Envelope::try_from(cloud_event),
            Err(Error::UnsupportedPayload { .. })
        ));
    }

    #[test]
    fn non_textual_content_travels_as_binary() {
        let envelope = Envelope {
            event_type: "Blob".into(),
            id: "1".into(),
            source: "s".into(),
            content_type: "application/octet-stream".into(),
            data: Bytes::from_static(&[0xff, 0x00]),
        };
        let cloud_event = CloudEvent::try_from(envelope).expect("convert");
        assert_eq!(cloud_event.data, Some(Data::BinaryData(vec![0xff, 0x00])));
    }
}
