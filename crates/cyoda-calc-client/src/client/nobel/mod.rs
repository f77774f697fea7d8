//! The Nobel prize dataset processor.

pub mod model;
pub mod processor;

pub use model::{Laureate, NobelPrize};
pub use processor::{NOBEL_PROCESSOR_NAME, NobelPrizeProcessor};
