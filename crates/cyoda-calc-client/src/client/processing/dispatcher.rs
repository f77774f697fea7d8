use super::registry::ProcessorRegistry;
use crate::client::telemetry::{
    decrement_dispatches_inflight, increment_dispatch_errors, increment_dispatches_inflight,
    record_dispatch_duration,
};
use core::panic::AssertUnwindSafe;
use cyoda_calc_core::events::{
    EXCEPTION_CODE, EntityProcessorCalculationRequest, EntityProcessorCalculationResponse,
    EventError, UNKNOWN_PROCESSOR_CODE,
};
use futures::FutureExt;
use std::any::Any;
use std::sync::Arc;
use tokio::time::Instant;

/// Resolves a request's processor and runs it.
///
/// `dispatch` never fails: an unknown processor becomes an
/// `UNKNOWN PROCESSOR` response, and a processor error or panic becomes an
/// `EXCEPTION` response. Correlation fields are always copied from the
/// request.
#[derive(Clone)]
pub struct CalculationDispatcher {
    registry: Arc<ProcessorRegistry>,
}

impl CalculationDispatcher {
    pub fn new(registry: Arc<ProcessorRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &ProcessorRegistry {
        &self.registry
    }

    #[tracing::instrument(
        skip_all,
        fields(
            processor = %request.processor_name,
            entity_id = %request.entity_id,
            request_id = %request.request_id,
        )
    )]
    pub async fn dispatch(
        &self,
        request: &EntityProcessorCalculationRequest,
    ) -> EntityProcessorCalculationResponse {
        let started = Instant::now();
        increment_dispatches_inflight();
        tracing::info!("Processing calculation request");

        let response = self.resolve_and_run(request).await;

        decrement_dispatches_inflight();
        record_dispatch_duration(started.elapsed().as_secs_f64() * 1000.0);
        match &response.error {
            Some(error) => {
                increment_dispatch_errors(&error.code);
                tracing::warn!(code = %error.code, message = %error.message, "Calculation failed");
            }
            None => tracing::info!("Calculation finished"),
        }
        response
    }

    async fn resolve_and_run(
        &self,
        request: &EntityProcessorCalculationRequest,
    ) -> EntityProcessorCalculationResponse {
        let Some(processor) = self.registry.get(&request.processor_name) else {
            return request.to_error_response(EventError::new(
                UNKNOWN_PROCESSOR_CODE,
                format!("Processor {} not supported.", request.processor_name),
            ));
        };

        match AssertUnwindSafe(processor.process(request))
            .catch_unwind()
            .await
        {
            Ok(Ok(response)) => response,
            Ok(Err(err)) => {
                request.to_error_response(EventError::new(EXCEPTION_CODE, err.to_string()))
            }
            Err(panic) => request.to_error_response(EventError::new(
                EXCEPTION_CODE,
                panic_message(panic.as_ref()),
            )),
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "processor panicked".to_string()
    }
}
