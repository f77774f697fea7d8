//! CloudEvents protobuf messages and `CloudEventsService` gRPC bindings.
//!
//! Message layout follows `io.cloudevents.v1.CloudEvent` from the CloudEvents
//! protobuf format. The service is the platform's single bidirectional
//! streaming endpoint:
//!
//! ```text
//! service CloudEventsService {
//!   rpc startStreaming(stream CloudEvent) returns (stream CloudEvent);
//! }
//! ```
//!
//! The bindings mirror what `tonic-prost-build` emits from `proto/*.proto`, so
//! callers use the usual
//! `cloud_events_service_client::CloudEventsServiceClient` and
//! `cloud_events_service_server::{CloudEventsService, CloudEventsServiceServer}`
//! names.

use std::collections::HashMap;

/// Fully qualified gRPC service name.
pub const SERVICE_NAME: &str = "org.cyoda.cloud.api.grpc.CloudEventsService";

/// CloudEvents spec version written on every outbound event.
pub const SPEC_VERSION: &str = "1.0";

/// Extension attribute carrying the content type of `data`.
pub const DATA_CONTENT_TYPE_ATTRIBUTE: &str = "datacontenttype";

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CloudEvent {
    /// Required attributes.
    #[prost(string, tag = "1")]
    pub id: String,
    /// URI-reference
    #[prost(string, tag = "2")]
    pub source: String,
    #[prost(string, tag = "3")]
    pub spec_version: String,
    #[prost(string, tag = "4")]
    pub r#type: String,
    /// Optional and extension attributes.
    #[prost(map = "string, message", tag = "5")]
    pub attributes: HashMap<String, CloudEventAttributeValue>,
    #[prost(oneof = "cloud_event::Data", tags = "6, 7, 8")]
    pub data: Option<cloud_event::Data>,
}

/// Nested message and enum types in `CloudEvent`.
pub mod cloud_event {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Data {
        #[prost(bytes, tag = "6")]
        BinaryData(Vec<u8>),
        #[prost(string, tag = "7")]
        TextData(String),
        #[prost(message, tag = "8")]
        ProtoData(::prost_types::Any),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CloudEventAttributeValue {
    #[prost(
        oneof = "cloud_event_attribute_value::Attr",
        tags = "1, 2, 3, 4, 5, 6, 7"
    )]
    pub attr: Option<cloud_event_attribute_value::Attr>,
}

/// Nested message and enum types in `CloudEventAttributeValue`.
pub mod cloud_event_attribute_value {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Attr {
        #[prost(bool, tag = "1")]
        CeBoolean(bool),
        #[prost(int32, tag = "2")]
        CeInteger(i32),
        #[prost(string, tag = "3")]
        CeString(String),
        #[prost(bytes, tag = "4")]
        CeBytes(Vec<u8>),
        #[prost(string, tag = "5")]
        CeUri(String),
        #[prost(string, tag = "6")]
        CeUriRef(String),
        #[prost(message, tag = "7")]
        CeTimestamp(::prost_types::Timestamp),
    }
}

impl CloudEventAttributeValue {
    pub fn string(value: impl Into<String>) -> Self {
        Self {
            attr: Some(cloud_event_attribute_value::Attr::CeString(value.into())),
        }
    }

    /// Returns the attribute as text when it is a string, URI or URI-reference.
    pub fn as_str(&self) -> Option<&str> {
        use cloud_event_attribute_value::Attr;
        match self.attr.as_ref()? {
            Attr::CeString(s) | Attr::CeUri(s) | Attr::CeUriRef(s) => Some(s),
            _ => None,
        }
    }
}

/// Generated client implementations.
pub mod cloud_events_service_client {
    use tonic::codegen::http::Uri;
    use tonic::codegen::*;

    #[derive(Debug, Clone)]
    pub struct CloudEventsServiceClient<T> {
        inner: tonic::client::Grpc<T>,
    }

    impl<T> CloudEventsServiceClient<T>
    where
        T: tonic::client::GrpcService<tonic::body::Body>,
        T::Error: Into<StdError>,
        T::ResponseBody: Body<Data = Bytes> + Send + 'static,
        <T::ResponseBody as Body>::Error: Into<StdError> + Send,
    {
        pub fn new(inner: T) -> Self {
            let inner = tonic::client::Grpc::new(inner);
            Self { inner }
        }

        pub fn with_origin(inner: T, origin: Uri) -> Self {
            let inner = tonic::client::Grpc::with_origin(inner, origin);
            Self { inner }
        }

        /// Opens the bidirectional event stream.
        pub async fn start_streaming(
            &mut self,
            request: impl tonic::IntoStreamingRequest<Message = super::CloudEvent>,
        ) -> Result<tonic::Response<tonic::codec::Streaming<super::CloudEvent>>, tonic::Status>
        {
            self.inner.ready().await.map_err(|e| {
                tonic::Status::unknown(format!("Service was not ready: {}", e.into()))
            })?;
            let codec = tonic_prost::ProstCodec::default();
            let path = http::uri::PathAndQuery::from_static(
                "/org.cyoda.cloud.api.grpc.CloudEventsService/startStreaming",
            );
            let mut req = request.into_streaming_request();
            req.extensions_mut()
                .insert(GrpcMethod::new(super::SERVICE_NAME, "startStreaming"));
            self.inner.streaming(req, path, codec).await
        }
    }
}

/// Generated server implementations.
pub mod cloud_events_service_server {
    use tonic::codegen::*;

    /// Generated trait containing gRPC methods that should be implemented for
    /// use with `CloudEventsServiceServer`.
    #[async_trait]
    pub trait CloudEventsService: Send + Sync + 'static {
        /// Server streaming response type for the `start_streaming` method.
        type StartStreamingStream: tokio_stream::Stream<Item = Result<super::CloudEvent, tonic::Status>>
            + Send
            + 'static;

        async fn start_streaming(
            &self,
            request: tonic::Request<tonic::Streaming<super::CloudEvent>>,
        ) -> Result<tonic::Response<Self::StartStreamingStream>, tonic::Status>;
    }

    #[derive(Debug)]
    pub struct CloudEventsServiceServer<T> {
        inner: Arc<T>,
    }

    impl<T> CloudEventsServiceServer<T> {
        pub fn new(inner: T) -> Self {
            Self::from_arc(Arc::new(inner))
        }

        pub fn from_arc(inner: Arc<T>) -> Self {
            Self { inner }
        }
    }

    impl<T, B> Service<http::Request<B>> for CloudEventsServiceServer<T>
    where
        T: CloudEventsService,
        B: Body + Send + 'static,
        B::Error: Into<StdError> + Send + 'static,
    {
        type Response = http::Response<tonic::body::Body>;
        type Error = std::convert::Infallible;
        type Future = BoxFuture<Self::Response, Self::Error>;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, req: http::Request<B>) -> Self::Future {
            match req.uri().path() {
                "/org.cyoda.cloud.api.grpc.CloudEventsService/startStreaming" => {
                    struct StartStreamingSvc<T: CloudEventsService>(pub Arc<T>);

                    impl<T: CloudEventsService> tonic::server::StreamingService<super::CloudEvent>
                        for StartStreamingSvc<T>
                    {
                        type Response = super::CloudEvent;
                        type ResponseStream = T::StartStreamingStream;
                        type Future =
                            BoxFuture<tonic::Response<Self::ResponseStream>, tonic::Status>;

                        fn call(
                            &mut self,
                            request: tonic::Request<tonic::Streaming<super::CloudEvent>>,
                        ) -> Self::Future {
                            let inner = Arc::clone(&self.0);
                            let fut = async move {
                                <T as CloudEventsService>::start_streaming(&inner, request).await
                            };
                            Box::pin(fut)
                        }
                    }

                    let inner = Arc::clone(&self.inner);
                    let fut = async move {
                        let method = StartStreamingSvc(inner);
                        let codec = tonic_prost::ProstCodec::default();
                        let mut grpc = tonic::server::Grpc::new(codec);
                        let res = grpc.streaming(method, req).await;
                        Ok(res)
                    };
                    Box::pin(fut)
                }
                _ => Box::pin(async move { Ok(tonic::Status::unimplemented("").into_http()) }),
            }
        }
    }

    impl<T> Clone for CloudEventsServiceServer<T> {
        fn clone(&self) -> Self {
            Self {
                inner: Arc::clone(&self.inner),
            }
        }
    }

    impl<T> tonic::server::NamedService for CloudEventsServiceServer<T> {
        const NAME: &'static str = super::SERVICE_NAME;
    }
}
