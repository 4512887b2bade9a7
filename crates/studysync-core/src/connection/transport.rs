use std::future::Future;

use tokio::sync::mpsc;

use super::TransportError;

/// An open link: JSON frames out, JSON frames in.
///
/// The inbound channel ending means the remote side dropped the link.
#[derive(Debug)]
pub struct Link {
    pub outbound: mpsc::Sender<String>,
    pub inbound: mpsc::Receiver<String>,
}

/// Opens links to the real-time server.
pub trait Transport: Send + Sync + 'static {
    fn connect(&self) -> impl Future<Output = Result<Link, TransportError>> + Send;
}
