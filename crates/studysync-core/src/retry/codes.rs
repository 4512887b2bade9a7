//! Symbolic transport error codes understood by the classifier.

pub const CONNECTION_RESET: &str = "ECONNRESET";
pub const DNS_NOT_FOUND: &str = "ENOTFOUND";
pub const TIMED_OUT: &str = "ETIMEDOUT";
pub const CONNECTION_REFUSED: &str = "ECONNREFUSED";
pub const NETWORK_ERROR: &str = "NETWORK_ERROR";

/// Codes retried when the config does not override the set.
pub const DEFAULT_RETRYABLE: [&str; 5] = [
    CONNECTION_RESET,
    DNS_NOT_FOUND,
    TIMED_OUT,
    CONNECTION_REFUSED,
    NETWORK_ERROR,
];
