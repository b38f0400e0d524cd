//! Cooperative cancellation for running stages.

mod token;

pub use token::CancellationToken;
