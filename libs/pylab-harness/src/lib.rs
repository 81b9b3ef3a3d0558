//! Exercise-grading harness: runs untrusted Python submissions against test
//! cases in a separate, time-bounded process and returns a per-test verdict.

pub mod decoder;
pub mod error;
pub mod executor;
pub mod pool;
pub mod sandbox;
pub mod synthesizer;

pub use error::HarnessError;
pub use executor::Harness;
