//! Persistent, room-scoped connection to the real-time server.
//!
//! [`ConnectionManager`] is a handle to a single actor task that owns the
//! link. Consumers register rooms and subscribe to the decoded event stream;
//! the actor reconnects with backoff after drops and re-joins every
//! registered room each time the link comes back.

mod error;
mod manager;
pub mod memory;
mod state;
mod transport;

pub use error::{ConnectionError, TransportError};
pub use manager::{ConnectionManager, EventStream};
pub use state::{ConnectionState, ConnectionStateMachine, ConnectionStatus, Transition};
pub use transport::{Link, Transport};

#[cfg(test)]
mod tests;
