//! Byte-level encoding and decoding of the common frame header and the
//! metadata/data regions.
//!
//! All multi-byte fields are big-endian and unsigned. The 24-bit length
//! writer emits three explicit bytes so no sign extension can leak in from
//! a wider integer write.

use bytes::BufMut;
use nom::number::complete::{be_u16, be_u24, be_u32};

use super::{
    FLAGS_MASK, FRAME_HEADER_SIZE, FRAME_LENGTH_SIZE, FRAME_TYPE_SHIFT, Flags, FrameHeader,
    FrameType, MAX_FRAME_SIZE, TYPE_AND_FLAGS_OFFSET,
};
use crate::error::FrameError;

/// Write a 24-bit big-endian unsigned integer, one byte at a time.
pub fn put_u24<B: BufMut>(buf: &mut B, value: u32) {
    buf.put_u8((value >> 16) as u8);
    buf.put_u8((value >> 8) as u8);
    buf.put_u8(value as u8);
}

/// Write the 9-byte common header: the 24-bit frame length (excluding the
/// length field itself), the stream id, and the packed type-and-flags short.
///
/// `frame_length` is the total size of the frame including the length field.
pub fn encode_header<B: BufMut>(
    buf: &mut B,
    frame_length: usize,
    flags: Flags,
    frame_type: FrameType,
    stream_id: u32,
) -> Result<(), FrameError> {
    if frame_length > MAX_FRAME_SIZE {
        return Err(FrameError::FrameTooLarge { len: frame_length });
    }
    put_u24(buf, (frame_length - FRAME_LENGTH_SIZE) as u32);
    buf.put_u32(stream_id);
    buf.put_u16((frame_type.wire().encoding() << FRAME_TYPE_SHIFT) | flags.bits());
    Ok(())
}

/// Write a metadata block. Frame types that may also carry data prefix the
/// block with a 24-bit length; for metadata-only types the block extends to
/// the end of the frame and carries no prefix.
pub fn encode_metadata<B: BufMut>(buf: &mut B, frame_type: FrameType, metadata: &[u8]) {
    if frame_type.wire().can_have_data() {
        put_u24(buf, metadata.len() as u32);
    }
    buf.put_slice(metadata);
}

/// Append raw data bytes; data is never length-prefixed.
pub fn encode_data<B: BufMut>(buf: &mut B, data: &[u8]) {
    buf.put_slice(data);
}

fn be_exact<O>(result: nom::IResult<&[u8], O>) -> nom::IResult<&[u8], O, FrameError> {
    result.map_err(|_| nom::Err::Error(FrameError::Incomplete))
}

/// Parse the common frame header from the input buffer,
/// [nom](https://docs.rs/nom/latest/nom/) parser style.
///
/// The returned header carries the logical frame type: a PAYLOAD wire type
/// resolves to NEXT, COMPLETE or NEXT_COMPLETE from its flag bits, and a
/// PAYLOAD with neither bit set is an illegal frame.
pub fn be_frame_header(input: &[u8]) -> nom::IResult<&[u8], FrameHeader, FrameError> {
    let (remain, length) = be_exact(be_u24(input))?;
    let (remain, stream_id) = be_exact(be_u32(remain))?;
    let (remain, type_and_flags) = be_exact(be_u16(remain))?;

    let flags = Flags::from_bits_truncate(type_and_flags & FLAGS_MASK);
    let wire = FrameType::from_encoding(type_and_flags >> FRAME_TYPE_SHIFT).ok_or(
        nom::Err::Error(FrameError::InvalidType(type_and_flags >> FRAME_TYPE_SHIFT)),
    )?;
    let frame_type = FrameType::logical(wire, flags).map_err(nom::Err::Error)?;

    Ok((
        remain,
        FrameHeader {
            length,
            stream_id,
            frame_type,
            flags,
        },
    ))
}

pub(crate) fn read_u8(buf: &[u8], at: usize) -> Option<u8> {
    buf.get(at).copied()
}

pub(crate) fn read_u16(buf: &[u8], at: usize) -> Option<u16> {
    Some(u16::from_be_bytes([*buf.get(at)?, *buf.get(at + 1)?]))
}

pub(crate) fn read_u24(buf: &[u8], at: usize) -> Option<u32> {
    Some(u32::from_be_bytes([
        0,
        *buf.get(at)?,
        *buf.get(at + 1)?,
        *buf.get(at + 2)?,
    ]))
}

pub(crate) fn read_u32(buf: &[u8], at: usize) -> Option<u32> {
    let bytes = buf.get(at..at + 4)?;
    Some(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

pub(crate) fn read_u64(buf: &[u8], at: usize) -> Option<u64> {
    let bytes = buf.get(at..at + 8)?;
    let mut raw = [0u8; 8];
    raw.copy_from_slice(bytes);
    Some(u64::from_be_bytes(raw))
}

/// Offset of the metadata/data region from the start of the frame.
///
/// Data-driven per frame type: most types place the region right after the
/// common header; SETUP, LEASE, KEEPALIVE, ERROR, the credit-carrying
/// request types, REQUEST_N and the resumption frames interpose a
/// type-specific header first. Clamped to the buffer length so slicing a
/// truncated frame yields empty regions rather than a panic.
pub fn payload_offset(frame: &[u8]) -> usize {
    let Some(type_and_flags) = read_u16(frame, TYPE_AND_FLAGS_OFFSET) else {
        return frame.len();
    };
    let flags = Flags::from_bits_truncate(type_and_flags & FLAGS_MASK);
    let offset = match FrameType::from_encoding(type_and_flags >> FRAME_TYPE_SHIFT) {
        Some(FrameType::Setup) => setup_payload_offset(frame, flags),
        // time to live + number of requests
        Some(FrameType::Lease) => FRAME_HEADER_SIZE + 8,
        // last received position
        Some(FrameType::Keepalive) => FRAME_HEADER_SIZE + 8,
        // error code
        Some(FrameType::Error) => FRAME_HEADER_SIZE + 4,
        // initial request n / request n
        Some(FrameType::RequestStream | FrameType::RequestChannel | FrameType::RequestN) => {
            FRAME_HEADER_SIZE + 4
        }
        Some(FrameType::Resume) => resume_payload_offset(frame),
        // last received client position
        Some(FrameType::ResumeOk) => FRAME_HEADER_SIZE + 8,
        // extended type field
        Some(FrameType::Ext) => FRAME_HEADER_SIZE + 4,
        _ => FRAME_HEADER_SIZE,
    };
    offset.min(frame.len())
}

fn setup_payload_offset(frame: &[u8], flags: Flags) -> usize {
    // version, keepalive interval, max lifetime
    let mut offset = FRAME_HEADER_SIZE + 12;
    if flags.contains(Flags::RESUME_ENABLE) {
        offset += 2 + read_u16(frame, offset).unwrap_or_default() as usize;
    }
    // metadata then data encoding MIME types, each with a one-byte length
    for _ in 0..2 {
        offset += 1 + read_u8(frame, offset).unwrap_or_default() as usize;
    }
    offset
}

fn resume_payload_offset(frame: &[u8]) -> usize {
    // version, then the length-prefixed resume token
    let mut offset = FRAME_HEADER_SIZE + 4;
    offset += 2 + read_u16(frame, offset).unwrap_or_default() as usize;
    // last received server position, first available client position
    offset + 16
}
