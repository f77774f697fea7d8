//! Calculation member internals.
//!
//! ## Structure
//!
//! - [`config`] - CLI and environment configuration.
//! - [`telemetry`] - logging and optional OpenTelemetry export.
//! - [`auth`] - credential provider and the authenticated channel.
//! - [`publish`] - saving derived entities through the REST API.
//! - [`processing`] - processor registry and dispatcher.
//! - [`session`] - the bidirectional event stream.
//! - [`lifecycle`] - ready and shutdown handling.
//! - [`nobel`] - the Nobel prize dataset processor.

pub mod auth;
pub mod config;
pub mod lifecycle;
pub mod nobel;
pub mod processing;
pub mod publish;
pub mod session;
pub mod telemetry;
