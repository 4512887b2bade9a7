pub mod config;
pub mod logging;

pub mod aggregate;
pub mod breaker;
pub mod chat;
pub mod connection;
pub mod presence;
pub mod probe;
pub mod protocol;
pub mod retry;
