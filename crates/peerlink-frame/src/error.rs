/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The payload exceeds the configured maximum size.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection was closed before a complete frame was received.
    #[error("connection closed (incomplete frame)")]
    ConnectionClosed,
}

pub type Result<T> = std::result::Result<T, FrameError>;

/// Fold a transport-level failure into the frame error space.
pub(crate) fn transport_to_frame_error(err: peerlink_transport::TransportError) -> FrameError {
    match err {
        peerlink_transport::TransportError::Io(io)
        | peerlink_transport::TransportError::Accept(io) => FrameError::Io(io),
        peerlink_transport::TransportError::Bind { source, .. }
        | peerlink_transport::TransportError::Connect { source, .. } => FrameError::Io(source),
    }
}
