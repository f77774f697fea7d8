use crate::client::publish::PublishError;
use async_trait::async_trait;
use cyoda_calc_core::events::{EntityProcessorCalculationRequest, EntityProcessorCalculationResponse};

/// Failures a processor may report. The dispatcher turns every one of them
/// into an `EXCEPTION` response, using the display text as the message.
#[derive(Debug, thiserror::Error)]
pub enum ProcessorError {
    #[error("Unexpected payload shape: {reason}")]
    UnexpectedPayload { reason: String },

    #[error("Invalid entity id `{entity_id}`: {reason}")]
    InvalidEntityId { entity_id: String, reason: String },

    #[error("Publish failed: {0}")]
    Publish(#[from] PublishError),

    #[error("Could not decode payload: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

/// Business logic selected by name for each calculation request.
#[async_trait]
pub trait Processor: Send + Sync + 'static {
    /// The name requests use to select this processor.
    fn name(&self) -> &str;

    async fn process(
        &self,
        request: &EntityProcessorCalculationRequest,
    ) -> Result<EntityProcessorCalculationResponse, ProcessorError>;
}
