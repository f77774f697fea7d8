//! Shared contract between a calculation member and the platform.
//!
//! ## Structure
//!
//! - [`proto`] - CloudEvents protobuf messages and the `CloudEventsService`
//!   gRPC bindings.
//! - [`envelope`] - [`Envelope`](envelope::Envelope), the transport-neutral
//!   wrapper around a serialized domain event.
//! - [`events`] - JSON domain events exchanged inside envelopes.
//! - [`error`] - The shared [`Error`] type and its gRPC status mapping.

pub mod envelope;
pub mod error;
pub mod events;
pub mod proto;

pub use error::{Error, Result};
