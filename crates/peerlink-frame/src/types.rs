//! Well-known frame types of the example protocol.
//!
//! Types 0-255 are reserved for protocol use.
//! Types 256 and up are available for application-defined use.

/// A counter value; payload is an 8-byte little-endian signed integer.
pub const NUMBER: u32 = 100;

/// An encoded image; payload is an opaque image byte blob.
pub const IMAGE: u32 = 101;

/// First application-defined frame type.
pub const USER_TYPE_START: u32 = 256;

/// Returns a human-readable name for a frame type.
pub fn frame_type_name(frame_type: u32) -> &'static str {
    match frame_type {
        NUMBER => "NUMBER",
        IMAGE => "IMAGE",
        0..=255 => "RESERVED",
        _ => "USER",
    }
}

/// Encode a counter value as a NUMBER payload.
pub fn encode_number(value: i64) -> [u8; 8] {
    value.to_le_bytes()
}

/// Decode a NUMBER payload back into a counter value.
///
/// Returns `None` if the payload is not exactly 8 bytes.
pub fn decode_number(payload: &[u8]) -> Option<i64> {
    let bytes: [u8; 8] = payload.try_into().ok()?;
    Some(i64::from_le_bytes(bytes))
}
