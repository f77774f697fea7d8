//! Error types shared by the envelope codec and the streaming session.
//!
//! This module defines the central `Error` enum, which captures the failures a
//! calculation member can hit while framing events or talking to the stream.
//! It implements `From<Error>` for `tonic::Status` so the RPC layer can surface
//! them with appropriate status codes.
//!
//! ## Error Cases
//! - `ChannelError`: An internal communication failure between tasks.
//! - `Serialization`: A domain event could not be encoded or decoded as JSON.
//! - `UnsupportedPayload`: An inbound CloudEvent carried data we cannot read.
//! - `StreamClosed`: A send was attempted after the writer was half-closed.
//! - `Unauthenticated`: No bearer credential could be obtained for a call.
//! - `Transport`: The underlying gRPC transport failed.

use tonic::Status;

pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for the calculation member contract.
#[derive(Clone, thiserror::Error, Debug)]
pub enum Error {
    /// Internal channel send/receive failure (e.g., closed or full channel).
    #[error("Channel error: {context}")]
    ChannelError { context: String },

    /// JSON encoding or decoding of a domain event failed.
    #[error("Serialization error: {reason}")]
    Serialization { reason: String },

    /// The inbound CloudEvent carried a data variant we do not decode.
    #[error("Unsupported payload: {reason}")]
    UnsupportedPayload { reason: String },

    /// The outbound half of the stream has been closed.
    #[error("Stream is closed for writing")]
    StreamClosed,

    /// Fetching the per-call bearer credential failed.
    #[error("Unauthenticated: {reason}")]
    Unauthenticated { reason: String },

    /// The RPC transport reported a failure.
    #[error("Transport error: {context}")]
    Transport { context: String },
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            reason: err.to_string(),
        }
    }
}

impl From<Status> for Error {
    fn from(status: Status) -> Self {
        match status.code() {
            tonic::Code::Unauthenticated => Self::Unauthenticated {
                reason: status.message().to_string(),
            },
            _ => Self::Transport {
                context: format!("{:?}: {}", status.code(), status.message()),
            },
        }
    }
}

impl From<tonic::transport::Error> for Error {
    fn from(err: tonic::transport::Error) -> Self {
        Self::Transport {
            context: err.to_string(),
        }
    }
}

impl From<Error> for Status {
    fn from(err: Error) -> Self {
        match err {
            Error::ChannelError { context } => {
                Status::internal(format!("Channel error: {}", context))
            }
            Error::Serialization { reason } => Status::invalid_argument(reason),
            Error::UnsupportedPayload { reason } => Status::invalid_argument(reason),
            Error::StreamClosed => Status::unavailable("Stream is closed for writing"),
            Error::Unauthenticated { reason } => Status::unauthenticated(reason),
            Error::Transport { context } => Status::unavailable(context),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unauthenticated_round_trips_through_status() {
        let status = Status::unauthenticated("refresh failed");
        let err = Error::from(status);
        assert!(matches!(err, Error::Unauthenticated { .. }));

        let status = Status::from(err);
        assert_eq!(status.code(), tonic::Code::Unauthenticated);
        assert_eq!(status.message(), "refresh failed");
    }

    #[test]
    fn closed_stream_maps_to_unavailable() {
        let status = Status::from(Error::StreamClosed);
        assert_eq!(status.code(), tonic::Code::Unavailable);
    }
}
