//! Typed, length-prefixed message framing for peerlink.
//!
//! Every message on a link is framed with:
//! - A 4-byte big-endian frame type tag
//! - A 4-byte big-endian correlation tag ([`NO_TAG`] when unused)
//! - A 4-byte big-endian payload length
//!
//! No partial reads, no buffer management in user code. The type space is
//! open — the connection manager passes unrecognized types through to the
//! delegate's accept decision rather than rejecting them here.

pub mod codec;
pub mod error;
pub mod reader;
pub mod types;
pub mod writer;

pub use codec::{
    decode_frame, encode_frame, Frame, FrameConfig, DEFAULT_MAX_PAYLOAD, HEADER_SIZE, NO_TAG,
};
pub use error::{FrameError, Result};
pub use reader::FrameReader;
pub use types::{decode_number, encode_number, frame_type_name, IMAGE, NUMBER, USER_TYPE_START};
pub use writer::FrameWriter;
