//! Error types and result handling for order-publisher.
//!
//! This module defines the main error type [`Error`] and a convenience
//! [`Result`] type alias used throughout the crate.
//!
//! # Example
//!
//! ```rust
//! use order_publisher::{Error, Result};
//!
//! fn submit_order(topic: &str) -> Result<()> {
//!     if topic.is_empty() {
//!         return Err(Error::Submission("topic must not be empty".to_string()));
//!     }
//!     Ok(())
//! }
//!
//! match submit_order("") {
//!     Ok(()) => println!("Submitted"),
//!     Err(Error::Submission(msg)) => eprintln!("Rejected: {}", msg),
//!     Err(e) => eprintln!("Other error: {}", e),
//! }
//! ```

use thiserror::Error;

/// The main error type for order-publisher operations.
///
/// Every variant except [`Error::FlushTimeout`] and [`Error::PartialDelivery`]
/// is fatal for a publishing run. Those two report delivery that did not
/// complete and are surfaced after the channel has been closed.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed channel or schema registry configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// No compatible schema could be resolved or registered for a topic.
    #[error("Schema registration error: {0}")]
    SchemaRegistration(String),

    /// A record could not be converted to its wire form.
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// Malformed input handed to the delivery channel.
    #[error("Submission error: {0}")]
    Submission(String),

    /// Kafka client or producer error.
    #[error("Kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),

    /// JSON serialization error when encoding messages.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error, typically from reading a client properties file.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Publishing stopped at `source` after some records were submitted.
    /// Those were drained and the channel closed before this was returned.
    #[error("{source} (aborted after {submitted} submission(s), {unflushed} not flushed)")]
    Aborted {
        source: Box<Error>,
        /// Records accepted by the channel before the failure
        submitted: usize,
        /// Submissions still in flight when the flush returned
        unflushed: usize,
        /// Whether the flush completed within its timeout
        flushed: bool,
    },

    /// Flush deadline elapsed with messages still in flight.
    #[error("Flush timed out with {pending} message(s) still in flight")]
    FlushTimeout {
        /// Number of submissions without an outcome
        pending: usize,
    },

    /// Flush completed but some messages were reported as failed.
    #[error("{failed} message(s) failed delivery, {pending} still pending")]
    PartialDelivery {
        /// Number of `Failed` outcomes observed
        failed: usize,
        /// Number of submissions without an outcome
        pending: usize,
    },
}

impl Error {
    /// Process exit code used by the binary for this error.
    ///
    /// The codes only distinguish error classes in diagnostics, they are
    /// not a stable machine-readable contract.
    pub fn exit_code(&self) -> u8 {
        match self {
            Error::Config(_) | Error::Io(_) => 2,
            Error::SchemaRegistration(_) | Error::Encoding(_) | Error::Serialization(_) => 3,
            Error::Submission(_) => 4,
            Error::Kafka(_) => 5,
            Error::FlushTimeout { .. } | Error::PartialDelivery { .. } => 6,
            Error::Aborted { source, .. } => source.exit_code(),
        }
    }
}

/// A convenient Result type alias for order-publisher operations.
///
/// This is equivalent to `std::result::Result<T, order_publisher::Error>`.
pub type Result<T> = std::result::Result<T, Error>;
