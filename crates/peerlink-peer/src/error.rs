/// Errors that can occur in link operations.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] peerlink_transport::TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] peerlink_frame::FrameError),

    /// A send was attempted with no active link.
    #[error("not connected")]
    NotConnected,

    /// The manager has been stopped or its event loop is gone.
    #[error("link manager stopped")]
    Stopped,

    /// Waiting on a completion signal timed out.
    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),
}

pub type Result<T> = std::result::Result<T, LinkError>;
