use super::model::NobelPrize;
use crate::client::processing::{Processor, ProcessorError};
use crate::client::publish::EntityPublisher;
use async_trait::async_trait;
use cyoda_calc_core::events::{
    DataPayload, EntityProcessorCalculationRequest, EntityProcessorCalculationResponse, EventError,
};
use futures::future::try_join_all;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

pub const NOBEL_PROCESSOR_NAME: &str = "Process Nobel Prize Dataset";
pub const PRIZE_MODEL: &str = "prize";
pub const PRIZE_MODEL_VERSION: u32 = 1;
/// Prizes saved per publish call, and so per platform transaction.
pub const PRIZES_PER_CHUNK: usize = 1200;
pub const SAVE_FAILED_CODE: &str = "SAVE FAILED";

/// Splits a Nobel prize dataset into individual `prize` entities.
///
/// Expects the request data to look like `{"data": {"prizes": [...]}}` and the
/// entity id to be the dataset's UUID, which is stamped on every prize. Chunks
/// are published concurrently. If any chunk is not saved the response carries
/// a `SAVE FAILED` error; otherwise it echoes the request data unchanged.
pub struct NobelPrizeProcessor {
    publisher: Arc<dyn EntityPublisher>,
    chunk_size: usize,
}

impl NobelPrizeProcessor {
    pub fn new(publisher: Arc<dyn EntityPublisher>) -> Self {
        Self {
            publisher,
            chunk_size: PRIZES_PER_CHUNK,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    async fn publish_chunk(&self, prizes: Vec<NobelPrize>) -> Result<bool, ProcessorError> {
        tracing::info!(count = prizes.len(), "Publishing Nobel prizes in a single transaction");
        let body = serde_json::to_value(&prizes)?;
        let outcome = self
            .publisher
            .publish(&body, PRIZE_MODEL, PRIZE_MODEL_VERSION)
            .await?;

        if outcome.is_ok() {
            tracing::debug!(count = prizes.len(), "Published prizes");
        } else {
            tracing::warn!(
                count = prizes.len(),
                status = %outcome.status,
                response = %outcome.body,
                "Failed to publish prizes"
            );
        }
        Ok(outcome.is_ok())
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[async_trait]
impl Processor for NobelPrizeProcessor {
    fn name(&self) -> &str {
        NOBEL_PROCESSOR_NAME
    }

    async fn process(
        &self,
        request: &EntityProcessorCalculationRequest,
    ) -> Result<EntityProcessorCalculationResponse, ProcessorError> {
        let data = request.data();
        if !data.is_object() {
            return Err(ProcessorError::UnexpectedPayload {
                reason: format!("expected an object, got {}", json_kind(data)),
            });
        }

        let prizes = match data.get("data").and_then(|d| d.get("prizes")) {
            Some(Value::Array(prizes)) => prizes,
            other => {
                return Err(ProcessorError::UnexpectedPayload {
                    reason: format!(
                        "expected `data.prizes` to be an array, got {}",
                        other.map_or("nothing", json_kind)
                    ),
                });
            }
        };

        let data_set_id =
            Uuid::parse_str(&request.entity_id).map_err(|e| ProcessorError::InvalidEntityId {
                entity_id: request.entity_id.clone(),
                reason: e.to_string(),
            })?;

        let chunks = prizes
            .chunks(self.chunk_size)
            .map(|chunk| {
                chunk
                    .iter()
                    .map(|raw| {
                        NobelPrize::deserialize(raw).map(|p| p.with_data_set_id(data_set_id))
                    })
                    .collect::<Result<Vec<_>, _>>()
            })
            .collect::<Result<Vec<_>, _>>()?;

        let saved = try_join_all(chunks.into_iter().map(|chunk| self.publish_chunk(chunk))).await?;

        if saved.iter().all(|ok| *ok) {
            let mut response = request.to_response();
            response.payload = Some(DataPayload {
                payload_type: "TREE".to_string(),
                data: data.clone(),
            });
            Ok(response)
        } else {
            let error = EventError::new(SAVE_FAILED_CODE, "Save Failed");
            tracing::warn!(?error, "Returning calculation response with error");
            Ok(request.to_error_response(error))
        }
    }
}
