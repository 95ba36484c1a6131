//! Worker: message processing and the consume loop.

mod processor;
mod runner;

pub use processor::{ProcessOutcome, Processor};
pub use runner::WorkerRunner;
