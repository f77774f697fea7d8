use crate::client::telemetry::increment_events_sent;
use cyoda_calc_core::{
    Error, Result, envelope::Envelope, events::OutboundEvent, proto::CloudEvent,
};
use tokio::sync::{Mutex, mpsc};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

/// The only way onto the outbound half of the stream.
///
/// Every send wraps the event in a fresh envelope and then holds one lock for
/// the duration of the write, so at most one write is in flight no matter how
/// many tasks produce responses. [`close`](Self::close) half-closes the stream;
/// sends after that fail with [`Error::StreamClosed`]. A send waiting on a full
/// queue is abandoned as soon as `close` is called, so closing never waits on
/// a peer that has stopped reading.
pub struct StreamWriter {
    sender: Mutex<Option<mpsc::Sender<CloudEvent>>>,
    closed: CancellationToken,
    source: String,
}

impl StreamWriter {
    /// Creates a writer and the stream that carries its events to the
    /// transport.
    pub fn channel(capacity: usize, source: impl Into<String>) -> (Self, ReceiverStream<CloudEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        let writer = Self {
            sender: Mutex::new(Some(tx)),
            closed: CancellationToken::new(),
            source: source.into(),
        };
        (writer, ReceiverStream::new(rx))
    }

    pub async fn send(&self, event: &OutboundEvent) -> Result<()> {
        let cloud_event = CloudEvent::try_from(Envelope::wrap(event, &self.source)?)?;

        let guard = tokio::select! {
            biased;
            () = self.closed.cancelled() => return Err(Error::StreamClosed),
            guard = self.sender.lock() => guard,
        };
        let sender = guard.as_ref().ok_or(Error::StreamClosed)?;
        tokio::select! {
            biased;
            () = self.closed.cancelled() => return Err(Error::StreamClosed),
            sent = sender.send(cloud_event) => sent.map_err(|_| Error::StreamClosed)?,
        }
        drop(guard);

        increment_events_sent(event.event_type());
        tracing::debug!(event = %event.summary(), "Sent event");
        Ok(())
    }

    /// Half-closes the stream. Returns `false` if it was already closed.
    pub async fn close(&self) -> bool {
        // Wakes any send parked on a full queue so the lock below is released.
        self.closed.cancel();
        self.sender.lock().await.take().is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cyoda_calc_core::events::CalculationMemberJoinEvent;
    use futures::StreamExt;

    fn join() -> OutboundEvent {
        CalculationMemberJoinEvent::new("CYODA", vec!["default".into()]).into()
    }

    #[tokio::test]
    async fn wraps_events_with_the_configured_source() {
        let (writer, mut outbound) = StreamWriter::channel(4, "SimpleSample");
        writer.send(&join()).await.expect("send");

        let event = outbound.next().await.expect("one event");
        assert_eq!(event.r#type, "CalculationMemberJoinEvent");
        assert_eq!(event.source, "SimpleSample");
    }

    #[tokio::test]
    async fn close_ends_the_stream_and_rejects_later_sends() {
        let (writer, mut outbound) = StreamWriter::channel(4, "s");
        assert!(writer.close().await);
        assert!(!writer.close().await);
        assert!(writer.is_closed());

        assert!(matches!(writer.send(&join()).await, Err(Error::StreamClosed)));
        assert!(outbound.next().await.is_none());
    }

    #[tokio::test]
    async fn close_releases_a_send_blocked_on_a_full_queue() {
        let (writer, outbound) = StreamWriter::channel(1, "s");
        let writer = std::sync::Arc::new(writer);
        writer.send(&join()).await.expect("fills the queue");

        let blocked = tokio::spawn({
            let writer = std::sync::Arc::clone(&writer);
            async move { writer.send(&join()).await }
        });
        tokio::task::yield_now().await;
        assert!(!blocked.is_finished());

        let closed = tokio::time::timeout(core::time::Duration::from_secs(1), writer.close())
            .await
            .expect("close does not wait on the reader");
        assert!(closed);
        assert!(matches!(
            blocked.await.expect("send task"),
            Err(Error::StreamClosed)
        ));
        drop(outbound);
    }

    #[tokio::test]
    async fn send_fails_when_the_transport_is_gone() {
        let (writer, outbound) = StreamWriter::channel(1, "s");
        drop(outbound);
        assert!(matches!(writer.send(&join()).await, Err(Error::StreamClosed)));
    }
}
