//! # DODS (data) encoding
//!
//! XDR encodes values for the DAP2 data response. Virtual aggregated
//! variables stream values through [`encode_array`] as they pull them out
//! of member datasets, rather than buffering a whole aggregated array
//! before encoding.

use byte_slice_cast::IntoByteVec;
use byteorder::{BigEndian, ByteOrder};

/// How a slice is byte-order-packed for XDR. `String`/`Url` are packed
/// by the caller (they are length-prefixed, padded UTF-8, not fixed-width).
pub trait XdrPack {
    fn pack(&mut self);
}

impl XdrPack for [u8] {
    fn pack(&mut self) {}
}

impl XdrPack for [i16] {
    fn pack(&mut self) {
        // DAP2 packs Int16/UInt16 as 4-byte XDR integers; widen first.
    }
}

impl XdrPack for [i32] {
    fn pack(&mut self) {
        BigEndian::from_slice_i32(self);
    }
}

impl XdrPack for [u32] {
    fn pack(&mut self) {
        BigEndian::from_slice_u32(self);
    }
}

impl XdrPack for [f32] {
    fn pack(&mut self) {
        BigEndian::from_slice_f32(self);
    }
}

impl XdrPack for [f64] {
    fn pack(&mut self) {
        BigEndian::from_slice_f64(self);
    }
}

/// The 8-byte `(length, length)` XDR array-length prefix DAP2 puts before
/// fixed-size array payloads.
pub fn xdr_length(len: u32) -> [u8; 8] {
    let mut buf = [0u8; 8];
    BigEndian::write_u32(&mut buf[0..4], len);
    BigEndian::write_u32(&mut buf[4..8], len);
    buf
}

/// Pack a single scalar value as XDR bytes.
pub fn encode_value<T>(mut v: Vec<T>) -> anyhow::Result<Vec<u8>>
where
    [T]: XdrPack,
    Vec<T>: IntoByteVec,
{
    ensure!(v.len() == 1, "scalar encode called with {} values", v.len());
    v.pack();
    Ok(v.into_byte_vec())
}

/// Pack a full array's worth of values (length prefix + big-endian payload).
pub fn encode_array<T>(mut v: Vec<T>) -> anyhow::Result<Vec<u8>>
where
    [T]: XdrPack,
    Vec<T>: IntoByteVec,
{
    let len = v.len();
    ensure!(len <= u32::MAX as usize, "array too large for XDR: {}", len);

    let mut out = Vec::from(xdr_length(len as u32));
    v.pack();
    out.extend(v.into_byte_vec());
    Ok(out)
}

/// Pack a UTF-8 string as XDR: 4-byte length, content, zero-padded to a
/// 4-byte boundary.
pub fn encode_string(s: &str) -> Vec<u8> {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(4 + bytes.len() + 3);
    out.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
    out.extend_from_slice(bytes);
    let pad = (4 - (bytes.len() % 4)) % 4;
    out.extend(std::iter::repeat(0u8).take(pad));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn length_prefix_is_doubled() {
        assert_eq!(xdr_length(3), [0, 0, 0, 3, 0, 0, 0, 3]);
    }

    #[test]
    fn encodes_f32_array_big_endian() {
        let bytes = encode_array(vec![1.0f32, 2.0f32]).unwrap();
        assert_eq!(&bytes[0..8], &xdr_length(2));
        assert_eq!(&bytes[8..12], &1.0f32.to_be_bytes());
    }

    #[test]
    fn pads_string_to_word_boundary() {
        let bytes = encode_string("abc");
        assert_eq!(bytes.len(), 4 + 3 + 1);
    }
}
