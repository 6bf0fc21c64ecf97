//! The handle for one established link.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;

use bytes::Bytes;
use peerlink_frame::{FrameConfig, FrameError, FrameReader, FrameWriter};
use peerlink_transport::LinkStream;
use tracing::debug;

use crate::error::LinkError;
use crate::manager::Event;

/// One queued outbound frame. The outcome travels back through `done`.
struct WriteRequest {
    frame_type: u32,
    tag: u32,
    payload: Bytes,
    done: Sender<Result<(), LinkError>>,
}

/// One established connection to a peer.
///
/// Owns two I/O threads: a reader that forwards inbound frames and the
/// end-of-stream notification (error or clean) to the manager, and a writer
/// that drains a queue of outbound frames. Both tag their events with this
/// channel's id so late events from a superseded channel can be told apart
/// from the active one. Sends are queued, never performed on the caller's
/// thread, so a peer that stops reading can only stall the writer thread.
pub struct ChannelHandle {
    id: u64,
    writes: Sender<WriteRequest>,
    control: LinkStream,
    closed: AtomicBool,
}

impl ChannelHandle {
    /// Wrap an established stream and start its reader and writer threads.
    pub(crate) fn spawn(
        id: u64,
        stream: LinkStream,
        max_payload: usize,
        events: Sender<Event>,
    ) -> crate::error::Result<Arc<Self>> {
        let reader_stream = stream.try_clone()?;
        let control = stream.try_clone()?;

        let config = FrameConfig {
            max_payload_size: max_payload,
            ..FrameConfig::default()
        };

        let mut reader = FrameReader::with_config_link(reader_stream, config.clone())?;
        let mut writer = FrameWriter::with_config_link(stream, config)?;

        let (writes, write_rx) = mpsc::channel::<WriteRequest>();

        let handle = Arc::new(Self {
            id,
            writes,
            control,
            closed: AtomicBool::new(false),
        });

        std::thread::spawn(move || loop {
            match reader.read_frame() {
                Ok(frame) => {
                    if events.send(Event::Inbound { channel: id, frame }).is_err() {
                        return;
                    }
                }
                Err(FrameError::ConnectionClosed) => {
                    let _ = events.send(Event::ChannelEnded {
                        channel: id,
                        error: None,
                    });
                    return;
                }
                Err(err) => {
                    let _ = events.send(Event::ChannelEnded {
                        channel: id,
                        error: Some(err),
                    });
                    return;
                }
            }
        });

        // Exits when every queue sender is gone, i.e. when the handle drops.
        // A write stalled on a full socket is unblocked by close(), which
        // shuts the socket down under it.
        std::thread::spawn(move || {
            while let Ok(request) = write_rx.recv() {
                let result = writer
                    .send(request.frame_type, request.tag, request.payload.as_ref())
                    .map_err(LinkError::from);
                let _ = request.done.send(result);
            }
        });

        Ok(handle)
    }

    /// Identifier used to match events against the currently active channel.
    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    /// Queue one frame for writing. Never blocks; the outcome (including
    /// the write error of a stalled send cut off by `close`) is delivered
    /// through `done`.
    pub(crate) fn send_frame(
        &self,
        frame_type: u32,
        tag: u32,
        payload: Bytes,
        done: Sender<Result<(), LinkError>>,
    ) {
        if self.closed.load(Ordering::SeqCst) {
            let _ = done.send(Err(LinkError::Frame(FrameError::ConnectionClosed)));
            return;
        }
        let request = WriteRequest {
            frame_type,
            tag,
            payload,
            done,
        };
        if let Err(rejected) = self.writes.send(request) {
            let _ = rejected
                .0
                .done
                .send(Err(LinkError::Frame(FrameError::ConnectionClosed)));
        }
    }

    /// Close the channel. Idempotent; unblocks the reader thread and any
    /// write currently stalled against a full socket.
    pub(crate) fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            let _ = self.control.shutdown();
            debug!(channel = self.id, "channel closed");
        }
    }
}

impl Drop for ChannelHandle {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;
    use std::time::Duration;

    use peerlink_frame::{DEFAULT_MAX_PAYLOAD, NO_TAG};
    use peerlink_transport::TcpLoopback;

    use super::*;

    fn connected_pair() -> (LinkStream, LinkStream) {
        let listener = TcpLoopback::bind(0).unwrap();
        let port = listener.port();
        let handle = std::thread::spawn(move || listener.accept().unwrap());
        let client = TcpLoopback::connect(port).unwrap();
        let server = handle.join().unwrap();
        (client, server)
    }

    fn send_and_wait(
        handle: &ChannelHandle,
        frame_type: u32,
        payload: &'static [u8],
    ) -> Result<(), LinkError> {
        let (done, outcome) = mpsc::channel();
        handle.send_frame(frame_type, NO_TAG, Bytes::from_static(payload), done);
        outcome.recv_timeout(Duration::from_secs(2)).unwrap()
    }

    #[test]
    fn forwards_inbound_frames_with_channel_id() {
        let (local, remote) = connected_pair();
        let (tx, rx) = mpsc::channel();

        let _handle = ChannelHandle::spawn(7, local, DEFAULT_MAX_PAYLOAD, tx).unwrap();

        let mut writer = FrameWriter::new(remote);
        writer.send(100, NO_TAG, b"ping").unwrap();

        match rx.recv_timeout(Duration::from_secs(2)).unwrap() {
            Event::Inbound { channel, frame } => {
                assert_eq!(channel, 7);
                assert_eq!(frame.frame_type, 100);
                assert_eq!(frame.payload.as_ref(), b"ping");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn reports_clean_end_when_remote_closes() {
        let (local, remote) = connected_pair();
        let (tx, rx) = mpsc::channel();

        let _handle = ChannelHandle::spawn(3, local, DEFAULT_MAX_PAYLOAD, tx).unwrap();
        drop(remote);

        match rx.recv_timeout(Duration::from_secs(2)).unwrap() {
            Event::ChannelEnded { channel, error } => {
                assert_eq!(channel, 3);
                assert!(error.is_none());
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn close_unblocks_reader_and_is_idempotent() {
        let (local, _remote) = connected_pair();
        let (tx, rx) = mpsc::channel();

        let handle = ChannelHandle::spawn(5, local, DEFAULT_MAX_PAYLOAD, tx).unwrap();
        handle.close();
        handle.close();

        match rx.recv_timeout(Duration::from_secs(2)).unwrap() {
            Event::ChannelEnded { channel, .. } => assert_eq!(channel, 5),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn send_after_close_fails() {
        let (local, _remote) = connected_pair();
        let (tx, _rx) = mpsc::channel();

        let handle = ChannelHandle::spawn(1, local, DEFAULT_MAX_PAYLOAD, tx).unwrap();
        handle.close();

        let err = send_and_wait(&handle, 100, b"late").unwrap_err();
        assert!(matches!(
            err,
            LinkError::Frame(FrameError::ConnectionClosed)
        ));
    }

    #[test]
    fn roundtrip_between_two_handles() {
        let (left, right) = connected_pair();
        let (tx_l, _rx_l) = mpsc::channel();
        let (tx_r, rx_r) = mpsc::channel();

        let sender = ChannelHandle::spawn(1, left, DEFAULT_MAX_PAYLOAD, tx_l).unwrap();
        let _receiver = ChannelHandle::spawn(2, right, DEFAULT_MAX_PAYLOAD, tx_r).unwrap();

        send_and_wait(&sender, 101, b"image-bytes").unwrap();

        match rx_r.recv_timeout(Duration::from_secs(2)).unwrap() {
            Event::Inbound { frame, .. } => {
                assert_eq!(frame.frame_type, 101);
                assert_eq!(frame.payload.as_ref(), b"image-bytes");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn queued_sends_do_not_block_the_caller() {
        let (local, _remote) = connected_pair();
        let (tx, _rx) = mpsc::channel();

        let handle = ChannelHandle::spawn(9, local, 256 * 1024 * 1024, tx).unwrap();

        // The counterpart never reads; a payload this large cannot fit in
        // the socket buffers, so the write itself must stall. Queuing it
        // still returns immediately.
        let (done, outcome) = mpsc::channel();
        let start = std::time::Instant::now();
        handle.send_frame(101, NO_TAG, Bytes::from(vec![0u8; 64 * 1024 * 1024]), done);
        assert!(start.elapsed() < Duration::from_millis(500));

        // Closing cuts the stalled write off and resolves its outcome.
        handle.close();
        let result = outcome.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(result.is_err());
    }
}
