use bytes::Bytes;

/// Receives link events from a [`LinkManager`](crate::LinkManager).
///
/// All three callbacks are invoked on the manager's event thread, one at a
/// time and exactly once per logical event. Implementations must not block;
/// hand work off to another thread if it is slow.
pub trait LinkDelegate: Send + Sync {
    /// Return whether a frame of this type should be delivered.
    ///
    /// Called before [`did_receive_frame`](Self::did_receive_frame);
    /// returning `false` discards the frame silently.
    fn should_accept_frame(&self, frame_type: u32) -> bool {
        let _ = frame_type;
        true
    }

    /// A frame arrived on the active link and passed the accept check.
    fn did_receive_frame(&self, frame_type: u32, payload: Bytes);

    /// The link went up (`true`) or down (`false`).
    fn did_change_connection(&self, connected: bool);
}
