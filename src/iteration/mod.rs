//! The per-run iteration loop and its two small companions: the completion
//! secret and the progress document.

pub mod engine;
pub mod progress;
pub mod secret;

pub use engine::{IterationEngine, LoopOutcome, LoopRequest};
