//! Named processors and the dispatcher that shields the stream from their
//! failures.
//!
//! - [`processor`] - the [`Processor`] trait and [`ProcessorError`].
//! - [`registry`] - name to processor lookup, built once at startup.
//! - [`dispatcher`] - resolves, invokes, and converts every failure into a
//!   structured calculation response.

pub mod dispatcher;
pub mod processor;
pub mod registry;

pub use dispatcher::CalculationDispatcher;
pub use processor::{Processor, ProcessorError};
pub use registry::{DuplicateProcessor, ProcessorRegistry};
