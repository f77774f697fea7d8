//! The single bidirectional stream between this member and the platform.
//!
//! A [`Session`] moves through [`SessionState`]s:
//!
//! ```text
//! Uninitialized --start--> Streaming --shutdown--> ShuttingDown --> Closed
//! ```
//!
//! - `start` opens the stream at most once, even when called concurrently,
//!   and announces the member with a join event.
//! - Inbound calculation requests are dispatched on their own tasks so a slow
//!   processor never stalls the receive loop. Responses go back through the
//!   [`StreamWriter`], which serializes all writes.
//! - Other inbound event types are skipped. A transport error from the
//!   platform is logged and the session stays in `Streaming`; there is no
//!   reconnect.
//! - `shutdown` half-closes the writer and waits up to the drain timeout for
//!   the platform to finish its half. If the timeout elapses, the receive task
//!   is aborted and the [`ShutdownReport`] records an unclean termination.
//!   In-flight dispatches are not cancelled; responses they produce after the
//!   half-close are dropped.

pub mod connector;
pub mod writer;

pub use connector::{GrpcConnector, InboundStream, StreamConnector};
pub use writer::StreamWriter;

use crate::client::{
    config::SessionConfig,
    processing::CalculationDispatcher,
    telemetry::{increment_events_received, increment_events_skipped},
};
use core::sync::atomic::{AtomicU8, Ordering};
use cyoda_calc_core::{
    Error, Result,
    envelope::Envelope,
    events::{
        CALCULATION_REQUEST_TYPE, CalculationMemberJoinEvent, EntityProcessorCalculationRequest,
        OutboundEvent,
    },
    proto::CloudEvent,
};
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    Uninitialized = 0,
    Streaming = 1,
    ShuttingDown = 2,
    Closed = 3,
}

impl SessionState {
    const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Uninitialized,
            1 => Self::Streaming,
            2 => Self::ShuttingDown,
            _ => Self::Closed,
        }
    }
}

/// Outcome of [`Session::shutdown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownReport {
    /// `true` when the platform finished the stream within the drain timeout.
    pub clean: bool,
}

struct Streaming {
    writer: Arc<StreamWriter>,
}

pub struct Session {
    config: SessionConfig,
    connector: Arc<dyn StreamConnector>,
    dispatcher: CalculationDispatcher,
    state: AtomicU8,
    stream: OnceCell<Streaming>,
    receiver: parking_lot::Mutex<Option<JoinHandle<()>>>,
    cancel: CancellationToken,
    report: OnceCell<ShutdownReport>,
}

impl Session {
    pub fn new(
        config: SessionConfig,
        connector: Arc<dyn StreamConnector>,
        dispatcher: CalculationDispatcher,
    ) -> Self {
        Self {
            config,
            connector,
            dispatcher,
            state: AtomicU8::new(SessionState::Uninitialized as u8),
            stream: OnceCell::new(),
            receiver: parking_lot::Mutex::new(None),
            cancel: CancellationToken::new(),
            report: OnceCell::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// `None` until shutdown has completed.
    pub fn terminated_cleanly(&self) -> Option<bool> {
        self.report.get().map(|report| report.clean)
    }

    /// Opens the stream and announces this member.
    ///
    /// Only the first successful call does any work; later and concurrent
    /// calls wait for it and then return `Ok(())`. A failed attempt may be
    /// retried.
    pub async fn start(&self) -> Result<()> {
        self.stream.get_or_try_init(|| self.open()).await?;
        Ok(())
    }

    async fn open(&self) -> Result<Streaming> {
        if self.state() != SessionState::Uninitialized {
            return Err(Error::StreamClosed);
        }

        let (writer, outbound) = StreamWriter::channel(
            self.config.outbound_buffer_size,
            self.config.event_source.clone(),
        );
        let writer = Arc::new(writer);

        // Queued ahead of the open call so it is the first message on the
        // stream whatever the platform does before answering.
        let join = CalculationMemberJoinEvent::new(self.config.owner.clone(), self.config.tags.clone());
        tracing::info!(owner = %join.owner, tags = ?join.tags, "Announcing calculation member");
        writer.send(&join.into()).await?;

        let inbound = self.connector.open(outbound, &self.cancel).await?;

        let handle = tokio::spawn(receive_loop(
            inbound,
            Arc::clone(&writer),
            self.dispatcher.clone(),
        ));

        if self
            .state
            .compare_exchange(
                SessionState::Uninitialized as u8,
                SessionState::Streaming as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            // Shutdown began while the stream was opening.
            writer.close().await;
            handle.abort();
            return Err(Error::StreamClosed);
        }

        *self.receiver.lock() = Some(handle);
        tracing::info!("Session streaming");
        Ok(Streaming { writer })
    }

    /// Sends `event` on the stream.
    pub async fn send_event(&self, event: impl Into<OutboundEvent>) -> Result<()> {
        let Some(stream) = self.stream.get() else {
            return Err(Error::ChannelError {
                context: "session has not started".to_string(),
            });
        };
        stream.writer.send(&event.into()).await
    }

    /// Half-closes the stream and waits for it to drain.
    ///
    /// Safe to call repeatedly or concurrently; every caller gets the same
    /// report.
    pub async fn shutdown(&self) -> ShutdownReport {
        *self.report.get_or_init(|| self.drain()).await
    }

    async fn drain(&self) -> ShutdownReport {
        let previous = SessionState::from_u8(
            self.state
                .swap(SessionState::ShuttingDown as u8, Ordering::AcqRel),
        );
        tracing::info!(?previous, "Shutting down session");
        self.cancel.cancel();

        if let Some(stream) = self.stream.get() {
            stream.writer.close().await;
        }

        let handle = self.receiver.lock().take();
        let clean = match handle {
            None => true,
            Some(mut handle) => {
                match tokio::time::timeout(self.config.drain_timeout, &mut handle).await {
                    Ok(_) => true,
                    Err(_) => {
                        tracing::warn!(
                            timeout = ?self.config.drain_timeout,
                            "Stream did not drain in time, forcing close"
                        );
                        handle.abort();
                        false
                    }
                }
            }
        };

        self.state.store(SessionState::Closed as u8, Ordering::Release);
        tracing::info!(clean, "Session closed");
        ShutdownReport { clean }
    }
}

async fn receive_loop(
    mut inbound: InboundStream,
    writer: Arc<StreamWriter>,
    dispatcher: CalculationDispatcher,
) {
    while let Some(item) = inbound.next().await {
        match item {
            Ok(event) => {
                increment_events_received();
                route(event, &writer, &dispatcher);
            }
            Err(status) => {
                tracing::error!(
                    code = ?status.code(),
                    message = %status.message(),
                    "Stream reported an error"
                );
            }
        }
    }
    tracing::info!("Platform completed the stream");
}

fn route(event: CloudEvent, writer: &Arc<StreamWriter>, dispatcher: &CalculationDispatcher) {
    let envelope = match Envelope::try_from(event) {
        Ok(envelope) => envelope,
        Err(err) => {
            tracing::warn!(error = %err, "Dropping unreadable event");
            return;
        }
    };

    if envelope.event_type != CALCULATION_REQUEST_TYPE {
        increment_events_skipped();
        tracing::debug!(event_type = %envelope.event_type, id = %envelope.id, "Skipping event");
        return;
    }

    let request: EntityProcessorCalculationRequest = match envelope.decode() {
        Ok(request) => request,
        Err(err) => {
            tracing::warn!(id = %envelope.id, error = %err, "Dropping malformed calculation request");
            return;
        }
    };

    let writer = Arc::clone(writer);
    let dispatcher = dispatcher.clone();
    tokio::spawn(async move {
        let response = dispatcher.dispatch(&request).await;
        let event = OutboundEvent::from(response);
        if let Err(err) = writer.send(&event).await {
            tracing::warn!(error = %err, event = %event.summary(), "Response dropped");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::processing::{Processor, ProcessorError, ProcessorRegistry};
    use async_trait::async_trait;
    use core::sync::atomic::AtomicUsize;
    use core::time::Duration;
    use cyoda_calc_core::events::{
        CALCULATION_RESPONSE_TYPE, DataPayload, EntityProcessorCalculationResponse, JOIN_EVENT_TYPE,
    };
    use cyoda_calc_core::proto::cloud_event::Data;
    use serde_json::json;
    use tokio::sync::mpsc;
    use tokio_stream::wrappers::ReceiverStream;
    use tonic::Status;

    type Inbound = mpsc::Sender<core::result::Result<CloudEvent, Status>>;

    /// Connector backed by in-memory channels. The test side keeps the
    /// platform's ends.
    struct MemoryConnector {
        opens: AtomicUsize,
        inbound: parking_lot::Mutex<Option<mpsc::Receiver<core::result::Result<CloudEvent, Status>>>>,
        outbound: mpsc::UnboundedSender<ReceiverStream<CloudEvent>>,
    }

    struct Platform {
        inbound: Inbound,
        outbound: mpsc::UnboundedReceiver<ReceiverStream<CloudEvent>>,
    }

    impl Platform {
        async fn take_outbound(&mut self) -> ReceiverStream<CloudEvent> {
            self.outbound.recv().await.expect("stream opened")
        }
    }

    fn memory_connector() -> (Arc<MemoryConnector>, Platform) {
        let (inbound_tx, inbound_rx) = mpsc::channel(16);
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let connector = Arc::new(MemoryConnector {
            opens: AtomicUsize::new(0),
            inbound: parking_lot::Mutex::new(Some(inbound_rx)),
            outbound: outbound_tx,
        });
        (
            connector,
            Platform {
                inbound: inbound_tx,
                outbound: outbound_rx,
            },
        )
    }

    #[async_trait]
    impl StreamConnector for MemoryConnector {
        async fn open(
            &self,
            outbound: ReceiverStream<CloudEvent>,
            _cancel: &CancellationToken,
        ) -> Result<InboundStream> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            let inbound = self.inbound.lock().take().ok_or(Error::ChannelError {
                context: "opened twice".to_string(),
            })?;
            let _ = self.outbound.send(outbound);
            Ok(ReceiverStream::new(inbound).boxed())
        }
    }

    struct Echo;

    #[async_trait]
    impl Processor for Echo {
        fn name(&self) -> &str {
            "Echo"
        }

        async fn process(
            &self,
            request: &EntityProcessorCalculationRequest,
        ) -> core::result::Result<EntityProcessorCalculationResponse, ProcessorError> {
            let mut response = request.to_response();
            response.payload = request.payload.clone();
            Ok(response)
        }
    }

    struct Stuck;

    #[async_trait]
    impl Processor for Stuck {
        fn name(&self) -> &str {
            "Stuck"
        }

        async fn process(
            &self,
            _request: &EntityProcessorCalculationRequest,
        ) -> core::result::Result<EntityProcessorCalculationResponse, ProcessorError> {
            futures::future::pending().await
        }
    }

    /// Waits for the test to open the gate, then echoes.
    struct Gated {
        gate: Arc<tokio::sync::Notify>,
        finished: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Processor for Gated {
        fn name(&self) -> &str {
            "Gated"
        }

        async fn process(
            &self,
            request: &EntityProcessorCalculationRequest,
        ) -> core::result::Result<EntityProcessorCalculationResponse, ProcessorError> {
            self.gate.notified().await;
            self.finished.fetch_add(1, Ordering::SeqCst);
            Ok(request.to_response())
        }
    }

    fn session(connector: Arc<MemoryConnector>) -> Arc<Session> {
        let config = SessionConfig {
            drain_timeout: Duration::from_secs(10),
            ..SessionConfig::default()
        };
        session_with(connector, config, ProcessorRegistry::new())
    }

    fn session_with(
        connector: Arc<MemoryConnector>,
        config: SessionConfig,
        registry: ProcessorRegistry,
    ) -> Arc<Session> {
        let registry = registry
            .with(Arc::new(Echo))
            .and_then(|r| r.with(Arc::new(Stuck)))
            .expect("distinct names");
        Arc::new(Session::new(
            config,
            connector,
            CalculationDispatcher::new(Arc::new(registry)),
        ))
    }

    fn request_event(processor: &str, request_id: &str) -> CloudEvent {
        let body = json!({
            "id": "evt",
            "requestId": request_id,
            "entityId": "ent-1",
            "processorName": processor,
            "payload": { "type": "TREE", "data": { "n": 1 } }
        });
        CloudEvent {
            id: request_id.to_string(),
            source: "platform".to_string(),
            spec_version: "1.0".to_string(),
            r#type: CALCULATION_REQUEST_TYPE.to_string(),
            data: Some(Data::TextData(body.to_string())),
            ..Default::default()
        }
    }

    fn decode_response(event: &CloudEvent) -> EntityProcessorCalculationResponse {
        Envelope::try_from(event.clone())
            .and_then(|e| e.decode())
            .expect("response decodes")
    }

    #[tokio::test]
    async fn start_announces_before_anything_else() {
        let (connector, mut platform) = memory_connector();
        let session = session(connector);

        session.start().await.expect("start");
        assert_eq!(session.state(), SessionState::Streaming);

        let mut outbound = platform.take_outbound().await;
        let first = outbound.next().await.expect("join event");
        assert_eq!(first.r#type, JOIN_EVENT_TYPE);
        assert_eq!(first.source, "SimpleSample");
        let Some(Data::TextData(text)) = &first.data else {
            panic!("join should travel as text");
        };
        assert!(text.contains(r#""tags":["default","prizes"]"#));
    }

    #[tokio::test]
    async fn concurrent_starts_open_the_stream_once() {
        let (connector, _platform) = memory_connector();
        let session = session(connector.clone());

        let (a, b) = tokio::join!(session.start(), session.start());
        a.expect("first start");
        b.expect("second start");
        session.start().await.expect("third start");

        assert_eq!(connector.opens.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn calculation_requests_get_correlated_responses() {
        let (connector, mut platform) = memory_connector();
        let session = session(connector);
        session.start().await.expect("start");
        let mut outbound = platform.take_outbound().await;
        let _join = outbound.next().await;

        platform
            .inbound
            .send(Ok(request_event("Echo", "req-1")))
            .await
            .expect("inbound open");

        let event = outbound.next().await.expect("response");
        assert_eq!(event.r#type, CALCULATION_RESPONSE_TYPE);
        let response = decode_response(&event);
        assert_eq!(response.request_id, "req-1");
        assert_eq!(response.entity_id, "ent-1");
        assert!(response.error.is_none());
        assert_eq!(
            response.payload,
            Some(DataPayload {
                payload_type: "TREE".to_string(),
                data: json!({ "n": 1 })
            })
        );
    }

    #[tokio::test]
    async fn unknown_types_and_transport_errors_keep_the_session_streaming() {
        let (connector, mut platform) = memory_connector();
        let session = session(connector);
        session.start().await.expect("start");
        let mut outbound = platform.take_outbound().await;
        let _join = outbound.next().await;

        let other = CloudEvent {
            r#type: "SomethingElse".to_string(),
            ..Default::default()
        };
        platform.inbound.send(Ok(other)).await.expect("send");
        platform
            .inbound
            .send(Err(Status::unavailable("blip")))
            .await
            .expect("send");
        platform
            .inbound
            .send(Ok(request_event("Nope", "req-2")))
            .await
            .expect("send");

        let response = decode_response(&outbound.next().await.expect("response"));
        assert_eq!(response.request_id, "req-2");
        assert_eq!(
            response.error.map(|e| e.code).as_deref(),
            Some("UNKNOWN PROCESSOR")
        );
        assert_eq!(session.state(), SessionState::Streaming);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_sends_produce_exactly_one_write_each() {
        let (connector, mut platform) = memory_connector();
        let session = session(connector);
        session.start().await.expect("start");
        let mut outbound = platform.take_outbound().await;
        let _join = outbound.next().await;

        const SENDERS: usize = 64;
        let reader = tokio::spawn(async move {
            let mut ids = Vec::with_capacity(SENDERS);
            while ids.len() < SENDERS {
                let event = outbound.next().await.expect("event");
                ids.push(decode_response(&event).request_id);
            }
            ids
        });

        let mut tasks = Vec::with_capacity(SENDERS);
        for i in 0..SENDERS {
            let session = Arc::clone(&session);
            tasks.push(tokio::spawn(async move {
                let response = EntityProcessorCalculationResponse {
                    id: String::new(),
                    request_id: format!("req-{i}"),
                    entity_id: "ent".to_string(),
                    error: None,
                    payload: None,
                };
                session.send_event(response).await
            }));
        }
        for task in tasks {
            task.await.expect("task").expect("send");
        }

        let mut ids = reader.await.expect("reader");
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), SENDERS);
    }

    #[tokio::test]
    async fn send_before_start_fails() {
        let (connector, _platform) = memory_connector();
        let session = session(connector);
        let join = CalculationMemberJoinEvent::new("CYODA", vec![]);
        assert!(matches!(
            session.send_event(join).await,
            Err(Error::ChannelError { .. })
        ));
    }

    #[tokio::test]
    async fn shutdown_is_clean_when_the_platform_completes() {
        let (connector, mut platform) = memory_connector();
        let session = session(connector);
        session.start().await.expect("start");
        let mut outbound = platform.take_outbound().await;

        let platform_side = tokio::spawn(async move {
            // Drain until the member half-closes, then complete our half.
            while outbound.next().await.is_some() {}
            drop(platform.inbound);
        });

        let report = session.shutdown().await;
        assert!(report.clean);
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(session.terminated_cleanly(), Some(true));
        platform_side.await.expect("platform task");

        let join = CalculationMemberJoinEvent::new("CYODA", vec![]);
        assert!(matches!(
            session.send_event(join).await,
            Err(Error::StreamClosed)
        ));
        assert_eq!(session.shutdown().await, report);
    }

    #[tokio::test(start_paused = true)]
    async fn drain_timeout_forces_an_unclean_close() {
        let (connector, mut platform) = memory_connector();
        let session = session(connector);
        session.start().await.expect("start");
        let mut outbound = platform.take_outbound().await;
        let _join = outbound.next().await;

        // One dispatch that never finishes, and a platform that never
        // completes its half.
        platform
            .inbound
            .send(Ok(request_event("Stuck", "req-3")))
            .await
            .expect("send");
        tokio::task::yield_now().await;

        let started = tokio::time::Instant::now();
        let report = session.shutdown().await;
        assert!(!report.clean);
        assert!(started.elapsed() >= Duration::from_secs(10));
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(session.terminated_cleanly(), Some(false));
        drop(platform);
    }

    #[tokio::test(start_paused = true)]
    async fn blocked_writer_does_not_outlast_the_drain_timeout() {
        let (connector, mut platform) = memory_connector();
        let config = SessionConfig {
            drain_timeout: Duration::from_secs(1),
            outbound_buffer_size: 1,
            ..SessionConfig::default()
        };
        let session = session_with(connector, config, ProcessorRegistry::new());
        session.start().await.expect("start");

        // The platform takes the stream but never reads it; the join event
        // fills the single slot.
        let outbound = platform.take_outbound().await;
        let blocked = tokio::spawn({
            let session = Arc::clone(&session);
            async move {
                session
                    .send_event(CalculationMemberJoinEvent::new("CYODA", vec![]))
                    .await
            }
        });
        tokio::task::yield_now().await;
        assert!(!blocked.is_finished());

        let report = tokio::time::timeout(Duration::from_secs(5), session.shutdown())
            .await
            .expect("shutdown is bounded by the drain timeout");
        assert!(!report.clean);
        assert_eq!(session.state(), SessionState::Closed);
        assert!(matches!(
            blocked.await.expect("send task"),
            Err(Error::StreamClosed)
        ));
        drop(outbound);
        drop(platform);
    }

    #[tokio::test]
    async fn response_finished_after_shutdown_is_dropped() {
        let (connector, mut platform) = memory_connector();
        let gate = Arc::new(tokio::sync::Notify::new());
        let finished = Arc::new(AtomicUsize::new(0));
        let registry = ProcessorRegistry::new()
            .with(Arc::new(Gated {
                gate: Arc::clone(&gate),
                finished: Arc::clone(&finished),
            }))
            .expect("registry");
        let session = session_with(connector, SessionConfig::default(), registry);
        session.start().await.expect("start");
        let mut outbound = platform.take_outbound().await;
        let _join = outbound.next().await;

        platform
            .inbound
            .send(Ok(request_event("Gated", "req-4")))
            .await
            .expect("send");
        tokio::task::yield_now().await;

        let platform_side = tokio::spawn(async move {
            let mut seen = Vec::new();
            while let Some(event) = outbound.next().await {
                seen.push(event);
            }
            drop(platform.inbound);
            seen
        });

        let report = session.shutdown().await;
        assert!(report.clean);

        gate.notify_one();
        while finished.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }

        let seen = platform_side.await.expect("platform task");
        assert!(seen.is_empty(), "nothing may be written after half-close");
        assert_eq!(session.state(), SessionState::Closed);
        assert!(matches!(
            session.send_event(CalculationMemberJoinEvent::new("CYODA", vec![])).await,
            Err(Error::StreamClosed)
        ));
    }

    #[tokio::test]
    async fn shutdown_before_start_closes_immediately() {
        let (connector, _platform) = memory_connector();
        let session = session(connector.clone());

        let report = session.shutdown().await;
        assert!(report.clean);
        assert_eq!(session.state(), SessionState::Closed);
        assert!(session.start().await.is_err());
        assert_eq!(connector.opens.load(Ordering::SeqCst), 0);
    }
}
