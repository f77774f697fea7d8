//! Opening the bidirectional event stream.

use crate::client::auth::ChannelFactory;
use async_trait::async_trait;
use cyoda_calc_core::{
    Result,
    proto::{CloudEvent, cloud_events_service_client::CloudEventsServiceClient},
};
use futures::{StreamExt, stream::BoxStream};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tonic::Status;

/// Events arriving from the platform.
pub type InboundStream = BoxStream<'static, core::result::Result<CloudEvent, Status>>;

/// Opens one bidirectional stream: everything yielded by `outbound` is sent
/// to the platform, and the returned stream yields what the platform sends
/// back.
#[async_trait]
pub trait StreamConnector: Send + Sync + 'static {
    /// `cancel` fires when shutdown begins; a connector still waiting for the
    /// endpoint should give up.
    async fn open(
        &self,
        outbound: ReceiverStream<CloudEvent>,
        cancel: &CancellationToken,
    ) -> Result<InboundStream>;
}

/// [`StreamConnector`] calling `CloudEventsService/startStreaming` over an
/// authenticated channel.
pub struct GrpcConnector {
    factory: ChannelFactory,
}

impl GrpcConnector {
    pub fn new(factory: ChannelFactory) -> Self {
        Self { factory }
    }
}

#[async_trait]
impl StreamConnector for GrpcConnector {
    async fn open(
        &self,
        outbound: ReceiverStream<CloudEvent>,
        cancel: &CancellationToken,
    ) -> Result<InboundStream> {
        let channel = self.factory.connect(cancel).await?;
        let mut client = CloudEventsServiceClient::new(channel);
        let response = client.start_streaming(outbound).await?;
        tracing::info!("Event stream opened");
        Ok(response.into_inner().boxed())
    }
}
