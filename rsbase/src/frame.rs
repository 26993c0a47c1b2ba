//! The RSocket frame: a length-prefixed, typed, flagged byte block.
//!
//! A [`Frame`] wraps one complete frame in a contiguous [`Bytes`] buffer.
//! All accessors are zero-copy views into that buffer; cloning a frame or
//! slicing its payload bumps a reference count and never copies. The wire
//! carries a single PAYLOAD type whose NEXT/COMPLETE flag bits select one
//! of three logical types, so [`FrameType`] models both alphabets and the
//! codec translates at the boundary.

use std::time::Duration;

use bitflags::bitflags;
use bytes::{Bytes, BytesMut};
use derive_more::Deref;

use crate::{error::FrameError, payload::Payload};

/// IO module for frame encoding and decoding
pub mod io;

/// Size of the 24-bit frame length field.
pub const FRAME_LENGTH_SIZE: usize = 3;
/// Size of the common header: length, stream id, type and flags.
pub const FRAME_HEADER_SIZE: usize = 9;
/// Largest frame representable by the 24-bit length field.
pub const MAX_FRAME_SIZE: usize = 1 << 24;
/// The maximum value a 31-bit unsigned integer can hold; request credit at
/// or above this value means unbounded.
pub const MAX_REQUEST_N: u32 = 0x7FFF_FFFF;

const STREAM_ID_OFFSET: usize = 3;
const TYPE_AND_FLAGS_OFFSET: usize = 7;
const FRAME_TYPE_SHIFT: u16 = 10;
const FLAGS_MASK: u16 = 0x03FF;

const VERSION_MAJOR: u16 = 1;
const VERSION_MINOR: u16 = 0;

bitflags! {
    /// The low 10 bits of the type-and-flags short.
    ///
    /// Several bits are shared: which name applies depends on the frame
    /// type carrying them.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Flags: u16 {
        /// Ignore the frame if the type is not understood.
        const IGNORE        = 0b10_0000_0000;
        /// Metadata present.
        const METADATA      = 0b01_0000_0000;
        /// More fragments follow this fragment.
        const FOLLOWS       = 0b00_1000_0000;
        /// SETUP: the client requests resumption support.
        const RESUME_ENABLE = 0b00_1000_0000;
        /// KEEPALIVE: the receiver must respond in kind.
        const RESPOND       = 0b00_1000_0000;
        /// PAYLOAD: stream completion.
        const COMPLETE      = 0b00_0100_0000;
        /// SETUP: the client will honor LEASE frames.
        const LEASE         = 0b00_0100_0000;
        /// PAYLOAD: payload data and/or metadata present.
        const NEXT          = 0b00_0010_0000;
    }
}

/// The sum type of the frame alphabet.
///
/// `Next`, `Complete` and `NextComplete` are the logical readings of the
/// PAYLOAD wire type; they never appear in the 6-bit type field themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    /// SETUP frame, sent by the client to start the connection.
    Setup,
    /// LEASE frame, granting the peer the right to send requests.
    Lease,
    /// KEEPALIVE frame, the connection liveness probe.
    Keepalive,
    /// REQUEST_RESPONSE frame: request a single response.
    RequestResponse,
    /// REQUEST_FNF frame: a single one-way message.
    RequestFnf,
    /// REQUEST_STREAM frame: request a completable stream.
    RequestStream,
    /// REQUEST_CHANNEL frame: request a completable stream in both directions.
    RequestChannel,
    /// REQUEST_N frame: grant N more items of credit.
    RequestN,
    /// CANCEL frame: cancel an outstanding request.
    Cancel,
    /// PAYLOAD frame as it appears on the wire. Never constructed directly;
    /// decode resolves it to one of the three logical types below.
    Payload,
    /// ERROR frame, at connection or stream level.
    Error,
    /// METADATA_PUSH frame, the connection-level metadata side channel.
    MetadataPush,
    /// RESUME frame (optional resumption handshake).
    Resume,
    /// RESUME_OK frame (optional resumption handshake).
    ResumeOk,
    /// EXT frame, reserved for extension types.
    Ext,
    /// PAYLOAD with the NEXT bit: an item on the stream.
    Next,
    /// PAYLOAD with the COMPLETE bit: end of the stream, no item.
    Complete,
    /// PAYLOAD with both bits: the final item of the stream.
    NextComplete,
}

impl FrameType {
    /// The 6-bit wire value of this type; the logical payload types encode
    /// as PAYLOAD.
    pub fn encoding(self) -> u16 {
        match self {
            FrameType::Setup => 0x01,
            FrameType::Lease => 0x02,
            FrameType::Keepalive => 0x03,
            FrameType::RequestResponse => 0x04,
            FrameType::RequestFnf => 0x05,
            FrameType::RequestStream => 0x06,
            FrameType::RequestChannel => 0x07,
            FrameType::RequestN => 0x08,
            FrameType::Cancel => 0x09,
            FrameType::Payload | FrameType::Next | FrameType::Complete | FrameType::NextComplete => {
                0x0A
            }
            FrameType::Error => 0x0B,
            FrameType::MetadataPush => 0x0C,
            FrameType::Resume => 0x0D,
            FrameType::ResumeOk => 0x0E,
            FrameType::Ext => 0x3F,
        }
    }

    /// The wire type for a 6-bit type value. Never yields a logical
    /// payload type.
    pub fn from_encoding(value: u16) -> Option<FrameType> {
        match value {
            0x01 => Some(FrameType::Setup),
            0x02 => Some(FrameType::Lease),
            0x03 => Some(FrameType::Keepalive),
            0x04 => Some(FrameType::RequestResponse),
            0x05 => Some(FrameType::RequestFnf),
            0x06 => Some(FrameType::RequestStream),
            0x07 => Some(FrameType::RequestChannel),
            0x08 => Some(FrameType::RequestN),
            0x09 => Some(FrameType::Cancel),
            0x0A => Some(FrameType::Payload),
            0x0B => Some(FrameType::Error),
            0x0C => Some(FrameType::MetadataPush),
            0x0D => Some(FrameType::Resume),
            0x0E => Some(FrameType::ResumeOk),
            0x3F => Some(FrameType::Ext),
            _ => None,
        }
    }

    /// Collapse a logical payload type back onto its wire type.
    pub fn wire(self) -> FrameType {
        match self {
            FrameType::Next | FrameType::Complete | FrameType::NextComplete => FrameType::Payload,
            other => other,
        }
    }

    /// Resolve a decoded wire type against its flag bits.
    ///
    /// PAYLOAD with neither NEXT nor COMPLETE is a protocol violation.
    pub fn logical(wire: FrameType, flags: Flags) -> Result<FrameType, FrameError> {
        match wire {
            FrameType::Payload => match (flags.contains(Flags::NEXT), flags.contains(Flags::COMPLETE)) {
                (true, true) => Ok(FrameType::NextComplete),
                (true, false) => Ok(FrameType::Next),
                (false, true) => Ok(FrameType::Complete),
                (false, false) => Err(FrameError::IllegalFrame(
                    "PAYLOAD frame carries neither NEXT nor COMPLETE",
                )),
            },
            other => Ok(other),
        }
    }

    /// The flag bits implied by a logical payload type.
    pub fn synthetic_flags(self) -> Flags {
        match self {
            FrameType::Next => Flags::NEXT,
            FrameType::Complete => Flags::COMPLETE,
            FrameType::NextComplete => Flags::NEXT | Flags::COMPLETE,
            _ => Flags::empty(),
        }
    }

    /// Whether frames of this type may carry a data block. This also
    /// decides whether a metadata block is length-prefixed.
    pub fn can_have_data(self) -> bool {
        matches!(
            self,
            FrameType::Setup
                | FrameType::Keepalive
                | FrameType::RequestResponse
                | FrameType::RequestFnf
                | FrameType::RequestStream
                | FrameType::RequestChannel
                | FrameType::Payload
                | FrameType::Next
                | FrameType::Complete
                | FrameType::NextComplete
                | FrameType::Error
                | FrameType::ResumeOk
                | FrameType::Ext
        )
    }

    /// Whether frames of this type may carry a metadata block.
    pub fn can_have_metadata(self) -> bool {
        matches!(
            self,
            FrameType::Setup
                | FrameType::Lease
                | FrameType::RequestResponse
                | FrameType::RequestFnf
                | FrameType::RequestStream
                | FrameType::RequestChannel
                | FrameType::Cancel
                | FrameType::Payload
                | FrameType::Next
                | FrameType::Complete
                | FrameType::NextComplete
                | FrameType::Error
                | FrameType::MetadataPush
                | FrameType::Ext
        )
    }

    /// Whether the type-specific header carries an `initial_request_n`.
    pub fn has_initial_request_n(self) -> bool {
        matches!(self, FrameType::RequestStream | FrameType::RequestChannel)
    }

    /// Whether this type opens a new interaction.
    pub fn is_request(self) -> bool {
        matches!(
            self,
            FrameType::RequestResponse
                | FrameType::RequestFnf
                | FrameType::RequestStream
                | FrameType::RequestChannel
        )
    }

    fn validate_stream_id(self, stream_id: u32) -> Result<(), FrameError> {
        match self {
            FrameType::Setup
            | FrameType::Lease
            | FrameType::Keepalive
            | FrameType::MetadataPush
            | FrameType::Resume
            | FrameType::ResumeOk
                if stream_id != 0 =>
            {
                Err(FrameError::IllegalFrame(
                    "connection frame with a nonzero stream id",
                ))
            }
            FrameType::RequestResponse
            | FrameType::RequestFnf
            | FrameType::RequestStream
            | FrameType::RequestChannel
            | FrameType::RequestN
            | FrameType::Cancel
            | FrameType::Next
            | FrameType::Complete
            | FrameType::NextComplete
                if stream_id == 0 =>
            {
                Err(FrameError::IllegalFrame("stream frame with stream id zero"))
            }
            _ => Ok(()),
        }
    }
}

/// The decoded common header: frame length, stream id, logical type, flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Number of bytes following the length field.
    pub length: u32,
    /// `0` for connection-level frames, nonzero for stream frames.
    pub stream_id: u32,
    /// The logical frame type.
    pub frame_type: FrameType,
    /// The low 10 flag bits.
    pub flags: Flags,
}

/// One complete frame backed by a contiguous buffer, length prefix included.
#[derive(Debug, Clone, PartialEq, Eq, Deref)]
pub struct Frame {
    frame_type: FrameType,
    #[deref]
    buf: Bytes,
}

impl Frame {
    /// Encode a frame whose payload region starts right after the common
    /// header.
    ///
    /// The logical payload types are rewritten to PAYLOAD with the matching
    /// NEXT/COMPLETE bits; passing the raw `Payload` type is rejected, as
    /// are types that carry a dedicated header (those have their own
    /// constructors). The METADATA bit is set iff metadata is non-empty.
    pub fn encode(
        stream_id: u32,
        flags: Flags,
        frame_type: FrameType,
        metadata: Option<Bytes>,
        data: Option<Bytes>,
    ) -> Result<Frame, FrameError> {
        if frame_type == FrameType::Payload {
            return Err(FrameError::IllegalFrame(
                "encode NEXT, COMPLETE or NEXT_COMPLETE rather than raw PAYLOAD",
            ));
        }
        if !matches!(
            frame_type,
            FrameType::RequestResponse
                | FrameType::RequestFnf
                | FrameType::MetadataPush
                | FrameType::Cancel
                | FrameType::Next
                | FrameType::Complete
                | FrameType::NextComplete
        ) {
            return Err(FrameError::IllegalFrame(
                "frame type carries a dedicated header and its own constructor",
            ));
        }
        Self::assemble(stream_id, flags, frame_type, &[], metadata, data)
    }

    fn assemble(
        stream_id: u32,
        flags: Flags,
        frame_type: FrameType,
        fields: &[u8],
        metadata: Option<Bytes>,
        data: Option<Bytes>,
    ) -> Result<Frame, FrameError> {
        let wire = frame_type.wire();
        frame_type.validate_stream_id(stream_id)?;
        let metadata = metadata.filter(|m| !m.is_empty());
        let data = data.filter(|d| !d.is_empty());
        if metadata.is_some() && !wire.can_have_metadata() {
            return Err(FrameError::IllegalFrame("frame type cannot carry metadata"));
        }
        if data.is_some() && !wire.can_have_data() {
            return Err(FrameError::IllegalFrame("frame type cannot carry data"));
        }

        let mut flags = flags | frame_type.synthetic_flags();
        let mut frame_length = FRAME_HEADER_SIZE + fields.len();
        if let Some(metadata) = &metadata {
            flags |= Flags::METADATA;
            if wire.can_have_data() {
                frame_length += FRAME_LENGTH_SIZE;
            }
            frame_length += metadata.len();
        }
        if let Some(data) = &data {
            frame_length += data.len();
        }

        let mut buf = BytesMut::with_capacity(frame_length);
        io::encode_header(&mut buf, frame_length, flags, wire, stream_id)?;
        buf.extend_from_slice(fields);
        if let Some(metadata) = &metadata {
            io::encode_metadata(&mut buf, wire, metadata);
        }
        if let Some(data) = &data {
            io::encode_data(&mut buf, data);
        }
        Ok(Frame {
            frame_type,
            buf: buf.freeze(),
        })
    }

    /// Validate a complete buffer and wrap it without copying.
    pub fn parse(buf: Bytes) -> Result<Frame, FrameError> {
        let (_, header) = io::be_frame_header(&buf).map_err(|err| match err {
            nom::Err::Error(e) | nom::Err::Failure(e) => e,
            nom::Err::Incomplete(_) => FrameError::Incomplete,
        })?;
        if header.length as usize + FRAME_LENGTH_SIZE != buf.len() {
            return Err(FrameError::IllegalFrame(
                "length prefix does not match the buffer",
            ));
        }
        header.frame_type.validate_stream_id(header.stream_id)?;
        Ok(Frame {
            frame_type: header.frame_type,
            buf,
        })
    }

    /// A SETUP frame. The resume token, when given, sets the resumption
    /// flag alongside it.
    pub fn setup(
        keepalive_interval: Duration,
        max_lifetime: Duration,
        resume_token: Option<Bytes>,
        metadata_mime: &str,
        data_mime: &str,
        payload: Payload,
    ) -> Result<Frame, FrameError> {
        if metadata_mime.len() > u8::MAX as usize || data_mime.len() > u8::MAX as usize {
            return Err(FrameError::IllegalFrame("MIME type longer than 255 bytes"));
        }
        let mut flags = Flags::empty();
        let mut fields = Vec::with_capacity(16 + metadata_mime.len() + data_mime.len());
        fields.extend_from_slice(&VERSION_MAJOR.to_be_bytes());
        fields.extend_from_slice(&VERSION_MINOR.to_be_bytes());
        fields.extend_from_slice(&saturating_millis(keepalive_interval).to_be_bytes());
        fields.extend_from_slice(&saturating_millis(max_lifetime).to_be_bytes());
        if let Some(token) = resume_token {
            if token.len() > u16::MAX as usize {
                return Err(FrameError::IllegalFrame("resume token longer than 65535 bytes"));
            }
            flags |= Flags::RESUME_ENABLE;
            fields.extend_from_slice(&(token.len() as u16).to_be_bytes());
            fields.extend_from_slice(&token);
        }
        for mime in [metadata_mime, data_mime] {
            fields.push(mime.len() as u8);
            fields.extend_from_slice(mime.as_bytes());
        }
        let (metadata, data) = payload.split();
        Self::assemble(0, flags, FrameType::Setup, &fields, metadata, data)
    }

    /// A LEASE frame granting `number_of_requests` for `time_to_live`.
    pub fn lease(
        time_to_live: Duration,
        number_of_requests: u32,
        metadata: Option<Bytes>,
    ) -> Result<Frame, FrameError> {
        let mut fields = [0u8; 8];
        fields[..4].copy_from_slice(&saturating_millis(time_to_live).to_be_bytes());
        fields[4..].copy_from_slice(&number_of_requests.to_be_bytes());
        Self::assemble(0, Flags::empty(), FrameType::Lease, &fields, metadata, None)
    }

    /// A KEEPALIVE frame. `respond` asks the peer to echo; `data` is
    /// opaque and echoed verbatim.
    pub fn keepalive(
        respond: bool,
        last_received_position: u64,
        data: Bytes,
    ) -> Result<Frame, FrameError> {
        let flags = if respond { Flags::RESPOND } else { Flags::empty() };
        Self::assemble(
            0,
            flags,
            FrameType::Keepalive,
            &last_received_position.to_be_bytes(),
            None,
            Some(data),
        )
    }

    /// A REQUEST_RESPONSE frame.
    pub fn request_response(stream_id: u32, payload: Payload) -> Result<Frame, FrameError> {
        let (metadata, data) = payload.split();
        Self::encode(stream_id, Flags::empty(), FrameType::RequestResponse, metadata, data)
    }

    /// A REQUEST_FNF frame.
    pub fn request_fnf(stream_id: u32, payload: Payload) -> Result<Frame, FrameError> {
        let (metadata, data) = payload.split();
        Self::encode(stream_id, Flags::empty(), FrameType::RequestFnf, metadata, data)
    }

    /// A REQUEST_STREAM frame carrying the stream's initial credit.
    pub fn request_stream(
        stream_id: u32,
        initial_request_n: u32,
        payload: Payload,
    ) -> Result<Frame, FrameError> {
        Self::request_with_credit(stream_id, FrameType::RequestStream, initial_request_n, payload)
    }

    /// A REQUEST_CHANNEL frame carrying the channel's initial credit and
    /// bootstrap payload.
    pub fn request_channel(
        stream_id: u32,
        initial_request_n: u32,
        payload: Payload,
    ) -> Result<Frame, FrameError> {
        Self::request_with_credit(stream_id, FrameType::RequestChannel, initial_request_n, payload)
    }

    fn request_with_credit(
        stream_id: u32,
        frame_type: FrameType,
        initial_request_n: u32,
        payload: Payload,
    ) -> Result<Frame, FrameError> {
        if initial_request_n == 0 {
            return Err(FrameError::IllegalFrame("request credit must be positive"));
        }
        let fields = initial_request_n.min(MAX_REQUEST_N).to_be_bytes();
        let (metadata, data) = payload.split();
        Self::assemble(stream_id, Flags::empty(), frame_type, &fields, metadata, data)
    }

    /// A REQUEST_N frame granting `n` more items of credit.
    pub fn request_n(stream_id: u32, n: u32) -> Result<Frame, FrameError> {
        if n == 0 {
            return Err(FrameError::IllegalFrame("request credit must be positive"));
        }
        let fields = n.min(MAX_REQUEST_N).to_be_bytes();
        Self::assemble(stream_id, Flags::empty(), FrameType::RequestN, &fields, None, None)
    }

    /// A CANCEL frame for an outstanding request.
    pub fn cancel(stream_id: u32) -> Result<Frame, FrameError> {
        Self::encode(stream_id, Flags::empty(), FrameType::Cancel, None, None)
    }

    /// A METADATA_PUSH frame; the metadata extends to the end of the frame.
    pub fn metadata_push(metadata: Bytes) -> Result<Frame, FrameError> {
        Self::encode(0, Flags::empty(), FrameType::MetadataPush, Some(metadata), None)
    }

    /// A PAYLOAD frame carrying one item.
    pub fn next(stream_id: u32, payload: Payload) -> Result<Frame, FrameError> {
        let (metadata, data) = payload.split();
        Self::encode(stream_id, Flags::empty(), FrameType::Next, metadata, data)
    }

    /// A PAYLOAD frame signalling completion without an item.
    pub fn complete(stream_id: u32) -> Result<Frame, FrameError> {
        Self::encode(stream_id, Flags::empty(), FrameType::Complete, None, None)
    }

    /// A PAYLOAD frame carrying the final item of the stream.
    pub fn next_complete(stream_id: u32, payload: Payload) -> Result<Frame, FrameError> {
        let (metadata, data) = payload.split();
        Self::encode(stream_id, Flags::empty(), FrameType::NextComplete, metadata, data)
    }

    /// An ERROR frame; `stream_id` 0 makes it a connection error.
    pub fn error(stream_id: u32, error: &crate::error::Error) -> Result<Frame, FrameError> {
        Self::assemble(
            stream_id,
            Flags::empty(),
            FrameType::Error,
            &error.code().to_be_bytes(),
            None,
            Some(Bytes::copy_from_slice(error.message().as_bytes())),
        )
    }

    /// The logical frame type.
    pub fn frame_type(&self) -> FrameType {
        self.frame_type
    }

    /// The stream id; `0` denotes a connection-level frame.
    pub fn stream_id(&self) -> u32 {
        io::read_u32(&self.buf, STREAM_ID_OFFSET).unwrap_or_default()
    }

    /// The low 10 flag bits.
    pub fn flags(&self) -> Flags {
        let type_and_flags = io::read_u16(&self.buf, TYPE_AND_FLAGS_OFFSET).unwrap_or_default();
        Flags::from_bits_truncate(type_and_flags & FLAGS_MASK)
    }

    /// KEEPALIVE only: whether the peer must respond in kind.
    pub fn respond(&self) -> bool {
        self.frame_type.wire() == FrameType::Keepalive && self.flags().contains(Flags::RESPOND)
    }

    /// The credit carried by REQUEST_STREAM, REQUEST_CHANNEL or REQUEST_N.
    pub fn initial_request_n(&self) -> Option<u32> {
        match self.frame_type {
            FrameType::RequestStream | FrameType::RequestChannel | FrameType::RequestN => {
                io::read_u32(&self.buf, FRAME_HEADER_SIZE)
            }
            _ => None,
        }
    }

    /// The error code of an ERROR frame.
    pub fn error_code(&self) -> Option<u32> {
        match self.frame_type {
            FrameType::Error => io::read_u32(&self.buf, FRAME_HEADER_SIZE),
            _ => None,
        }
    }

    /// The resume position of a KEEPALIVE or RESUME_OK frame.
    pub fn last_received_position(&self) -> Option<u64> {
        match self.frame_type {
            FrameType::Keepalive | FrameType::ResumeOk => {
                io::read_u64(&self.buf, FRAME_HEADER_SIZE)
            }
            _ => None,
        }
    }

    /// Zero-copy view of the metadata block; empty when the METADATA bit
    /// is clear.
    pub fn metadata(&self) -> Bytes {
        if !self.flags().contains(Flags::METADATA) {
            return Bytes::new();
        }
        let offset = io::payload_offset(&self.buf);
        if self.frame_type.wire().can_have_data() {
            let Some(metadata_len) = io::read_u24(&self.buf, offset) else {
                return Bytes::new();
            };
            let start = (offset + FRAME_LENGTH_SIZE).min(self.buf.len());
            let end = (start + metadata_len as usize).min(self.buf.len());
            self.buf.slice(start..end)
        } else {
            // metadata-only frame types: the block extends to the end
            self.buf.slice(offset..)
        }
    }

    /// Zero-copy view of the data block; empty when the type carries no
    /// data or the frame ends at the metadata.
    pub fn data(&self) -> Bytes {
        if !self.frame_type.wire().can_have_data() {
            return Bytes::new();
        }
        let mut offset = io::payload_offset(&self.buf);
        if self.flags().contains(Flags::METADATA) {
            let metadata_len = io::read_u24(&self.buf, offset).unwrap_or_default() as usize;
            offset += FRAME_LENGTH_SIZE + metadata_len;
        }
        self.buf.slice(offset.min(self.buf.len())..)
    }

    /// The metadata/data pair as a [`Payload`]; empty blocks become `None`.
    pub fn payload(&self) -> Payload {
        let metadata = self.metadata();
        let data = self.data();
        let mut builder = Payload::builder();
        if !metadata.is_empty() {
            builder = builder.set_metadata(metadata);
        }
        if !data.is_empty() {
            builder = builder.set_data(data);
        }
        builder.build()
    }
}

fn saturating_millis(duration: Duration) -> u32 {
    u32::try_from(duration.as_millis()).unwrap_or(u32::MAX)
}

/// Splits a raw inbound byte feed into complete frames.
///
/// Bytes arrive in arbitrary chunks from the transport; complete frames are
/// taken off the front of the accumulation buffer, partial frames stay
/// buffered until the rest arrives.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: BytesMut,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append freshly received bytes.
    pub fn push(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Take the next complete frame off the buffer, if one has fully
    /// arrived. Errors are fatal for the connection.
    pub fn next_frame(&mut self) -> Result<Option<Frame>, FrameError> {
        let Some(length) = io::read_u24(&self.buffer, 0) else {
            return Ok(None);
        };
        let total = FRAME_LENGTH_SIZE + length as usize;
        if self.buffer.len() < total {
            return Ok(None);
        }
        let frame = self.buffer.split_to(total).freeze();
        Frame::parse(frame).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(metadata: &'static str, data: &'static str) -> Payload {
        Payload::builder()
            .set_metadata(Bytes::from_static(metadata.as_bytes()))
            .set_data(Bytes::from_static(data.as_bytes()))
            .build()
    }

    fn reparse(frame: &Frame) -> Frame {
        Frame::parse(Bytes::copy_from_slice(frame)).unwrap()
    }

    #[test]
    fn test_request_round_trips() {
        let frames = [
            Frame::request_response(1, payload("m", "d")).unwrap(),
            Frame::request_fnf(3, payload("m", "d")).unwrap(),
            Frame::request_stream(5, 2, payload("m", "d")).unwrap(),
            Frame::request_channel(7, 16, payload("m", "d")).unwrap(),
        ];
        for frame in &frames {
            let decoded = reparse(frame);
            assert_eq!(decoded, *frame);
            assert_eq!(decoded.stream_id(), frame.stream_id());
            assert_eq!(decoded.metadata().as_ref(), b"m");
            assert_eq!(decoded.data().as_ref(), b"d");
            assert!(decoded.flags().contains(Flags::METADATA));
        }
        assert_eq!(frames[2].initial_request_n(), Some(2));
        assert_eq!(frames[3].initial_request_n(), Some(16));
    }

    #[test]
    fn test_frame_length_law() {
        let frame = Frame::request_stream(9, 8, payload("meta", "data")).unwrap();
        let prefixed = io::read_u24(&frame, 0).unwrap() as usize;
        assert_eq!(prefixed + FRAME_LENGTH_SIZE, frame.len());
    }

    #[test]
    fn test_payload_logical_types() {
        let next = Frame::next(1, payload("m", "d")).unwrap();
        assert_eq!(next.frame_type(), FrameType::Next);
        assert_eq!(reparse(&next).frame_type(), FrameType::Next);
        assert!(next.flags().contains(Flags::NEXT));
        assert!(!next.flags().contains(Flags::COMPLETE));

        let complete = Frame::complete(1).unwrap();
        assert_eq!(reparse(&complete).frame_type(), FrameType::Complete);
        assert!(complete.metadata().is_empty());
        assert!(complete.data().is_empty());

        let both = Frame::next_complete(1, payload("M", "D")).unwrap();
        let decoded = reparse(&both);
        assert_eq!(decoded.frame_type(), FrameType::NextComplete);
        assert!(decoded.flags().contains(Flags::NEXT | Flags::COMPLETE));
        assert_eq!(decoded.metadata().as_ref(), b"M");
        assert_eq!(decoded.data().as_ref(), b"D");
    }

    #[test]
    fn test_raw_payload_rejected_both_ways() {
        assert!(matches!(
            Frame::encode(1, Flags::empty(), FrameType::Payload, None, None),
            Err(FrameError::IllegalFrame(_)),
        ));

        // a wire PAYLOAD with neither N nor C fails to parse
        let mut raw = BytesMut::new();
        io::encode_header(&mut raw, FRAME_HEADER_SIZE, Flags::empty(), FrameType::Payload, 1)
            .unwrap();
        assert!(matches!(
            Frame::parse(raw.freeze()),
            Err(FrameError::IllegalFrame(_)),
        ));
    }

    #[test]
    fn test_metadata_flag_iff_metadata_present() {
        let with = Frame::next(1, payload("m", "d")).unwrap();
        assert!(with.flags().contains(Flags::METADATA));
        assert!(!with.metadata().is_empty());

        let without = Frame::next(1, Payload::from("d")).unwrap();
        assert!(!without.flags().contains(Flags::METADATA));
        assert!(without.metadata().is_empty());
        assert_eq!(without.data().as_ref(), b"d");
    }

    #[test]
    fn test_error_frame() {
        let cause = crate::error::Error::application("something broke");
        let frame = Frame::error(11, &cause).unwrap();
        let decoded = reparse(&frame);
        assert_eq!(decoded.frame_type(), FrameType::Error);
        assert_eq!(decoded.error_code(), Some(crate::error::APPLICATION_ERROR));
        assert_eq!(decoded.data().as_ref(), b"something broke");
        assert!(decoded.metadata().is_empty());
    }

    #[test]
    fn test_keepalive_frame() {
        let frame = Frame::keepalive(true, 42, Bytes::from_static(b"ka")).unwrap();
        let decoded = reparse(&frame);
        assert_eq!(decoded.frame_type(), FrameType::Keepalive);
        assert!(decoded.respond());
        assert_eq!(decoded.last_received_position(), Some(42));
        assert_eq!(decoded.data().as_ref(), b"ka");

        let reply = Frame::keepalive(false, 42, decoded.data()).unwrap();
        assert!(!reply.respond());
        assert_eq!(reply.data().as_ref(), b"ka");
    }

    #[test]
    fn test_request_n_frame() {
        let frame = Frame::request_n(5, 10).unwrap();
        let decoded = reparse(&frame);
        assert_eq!(decoded.frame_type(), FrameType::RequestN);
        assert_eq!(decoded.initial_request_n(), Some(10));

        assert!(matches!(
            Frame::request_n(5, 0),
            Err(FrameError::IllegalFrame(_)),
        ));
        // credit saturates at the 31-bit maximum
        let capped = Frame::request_n(5, u32::MAX).unwrap();
        assert_eq!(capped.initial_request_n(), Some(MAX_REQUEST_N));
    }

    #[test]
    fn test_cancel_frame() {
        let frame = Frame::cancel(7).unwrap();
        let decoded = reparse(&frame);
        assert_eq!(decoded.frame_type(), FrameType::Cancel);
        assert_eq!(decoded.stream_id(), 7);
        assert_eq!(decoded.len(), FRAME_HEADER_SIZE);
    }

    #[test]
    fn test_metadata_push_has_no_length_prefix() {
        let frame = Frame::metadata_push(Bytes::from_static(b"push")).unwrap();
        // common header followed directly by the metadata bytes
        assert_eq!(frame.len(), FRAME_HEADER_SIZE + 4);
        let decoded = reparse(&frame);
        assert_eq!(decoded.frame_type(), FrameType::MetadataPush);
        assert_eq!(decoded.metadata().as_ref(), b"push");
        assert!(decoded.data().is_empty());
    }

    #[test]
    fn test_setup_round_trip() {
        let frame = Frame::setup(
            Duration::from_millis(500),
            Duration::from_millis(1500),
            Some(Bytes::from_static(b"token")),
            "application/json",
            "application/octet-stream",
            payload("sm", "sd"),
        )
        .unwrap();
        let decoded = reparse(&frame);
        assert_eq!(decoded.frame_type(), FrameType::Setup);
        assert_eq!(decoded.stream_id(), 0);
        assert!(decoded.flags().contains(Flags::RESUME_ENABLE));
        assert_eq!(decoded.metadata().as_ref(), b"sm");
        assert_eq!(decoded.data().as_ref(), b"sd");
    }

    #[test]
    fn test_lease_round_trip() {
        let frame =
            Frame::lease(Duration::from_secs(30), 128, Some(Bytes::from_static(b"lm"))).unwrap();
        let decoded = reparse(&frame);
        assert_eq!(decoded.frame_type(), FrameType::Lease);
        // metadata-only type: no length prefix, extends to the end
        assert_eq!(decoded.metadata().as_ref(), b"lm");
        assert!(decoded.data().is_empty());
    }

    #[test]
    fn test_too_large_frame() {
        let oversized = Bytes::from(vec![0u8; MAX_FRAME_SIZE]);
        assert!(matches!(
            Frame::next(1, Payload::from(oversized)),
            Err(FrameError::FrameTooLarge { .. }),
        ));
    }

    #[test]
    fn test_stream_id_domain() {
        // connection frames must use stream id 0
        let keepalive = Frame::keepalive(false, 0, Bytes::new()).unwrap();
        let mut raw = BytesMut::from(keepalive.as_ref());
        raw[3..7].copy_from_slice(&7u32.to_be_bytes());
        assert!(matches!(
            Frame::parse(raw.freeze()),
            Err(FrameError::IllegalFrame(_)),
        ));

        // stream frames must not
        assert!(matches!(
            Frame::next(0, Payload::from("d")),
            Err(FrameError::IllegalFrame(_)),
        ));
    }

    #[test]
    fn test_slices_share_the_backing_buffer() {
        let frame = Frame::next(1, payload("meta", "data")).unwrap();
        let metadata = frame.metadata();
        let within = frame.as_ptr() as usize..frame.as_ptr() as usize + frame.len();
        assert!(within.contains(&(metadata.as_ptr() as usize)));
    }

    #[test]
    fn test_decoder_reassembles_split_frames() {
        let first = Frame::next(1, payload("m1", "d1")).unwrap();
        let second = Frame::complete(1).unwrap();
        let mut wire = Vec::new();
        wire.extend_from_slice(&first);
        wire.extend_from_slice(&second);

        let mut decoder = FrameDecoder::new();
        let (head, tail) = wire.split_at(5);
        decoder.push(head);
        assert_eq!(decoder.next_frame().unwrap(), None);
        decoder.push(tail);
        assert_eq!(decoder.next_frame().unwrap(), Some(first));
        assert_eq!(decoder.next_frame().unwrap(), Some(second));
        assert_eq!(decoder.next_frame().unwrap(), None);
    }

    #[test]
    fn test_decoder_surfaces_illegal_frames() {
        let mut raw = BytesMut::new();
        io::encode_header(&mut raw, FRAME_HEADER_SIZE, Flags::empty(), FrameType::Payload, 1)
            .unwrap();
        let mut decoder = FrameDecoder::new();
        decoder.push(&raw);
        assert!(matches!(
            decoder.next_frame(),
            Err(FrameError::IllegalFrame(_)),
        ));
    }
}
