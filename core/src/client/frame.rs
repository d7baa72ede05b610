// Copyright (c) 2025 Meshkit Contributors. Licensed under Apache License, Version 2.0.

//! Wire framing between clients and services, and the streaming tokenizer
//! that reassembles frames from arbitrary transport chunks.
//!
//! Every frame starts with a 16-bit size in network byte order covering the
//! whole frame (header included), then a 16-bit type in network byte order,
//! then `size - 4` bytes of payload. This framing is the universal contract
//! between services and their clients; nothing else goes over the wire.

use miette::Diagnostic;
use thiserror::Error;

/// Bytes of the size+type prefix on every frame.
pub const FRAME_HEADER_LEN: usize = 4;

/// Largest possible frame, header included (the size prefix is 16 bits).
pub const MAX_FRAME_LEN: usize = u16::MAX as usize;

/// Framing violations.
#[derive(Debug, Error, Diagnostic)]
pub enum FrameError {
    /// The payload cannot be expressed in a 16-bit length prefix.
    #[error("frame payload of {len} bytes exceeds the {max} byte maximum")]
    #[diagnostic(
        code(meshkit_core::client::payload_too_large),
        help("split the payload across several frames")
    )]
    PayloadTooLarge {
        /// Payload length the caller asked for.
        len: usize,
        /// Largest payload a frame can carry.
        max: usize,
    },

    /// The peer sent a length prefix smaller than the frame header itself.
    #[error("frame header declares {declared} bytes, below the {FRAME_HEADER_LEN} byte minimum")]
    #[diagnostic(
        code(meshkit_core::client::bad_length),
        help("the stream is corrupt; reset the connection and resynchronize")
    )]
    BadLength {
        /// The bogus declared frame size.
        declared: u16,
    },
}

/// An outbound message, already framed.
#[derive(Debug, Clone)]
pub struct MessageBuf {
    bytes: Vec<u8>,
}

impl MessageBuf {
    /// Frame `payload` under `msg_type`.
    ///
    /// # Errors
    ///
    /// [`FrameError::PayloadTooLarge`] if the frame would not fit a 16-bit
    /// length prefix.
    pub fn new(msg_type: u16, payload: &[u8]) -> Result<Self, FrameError> {
        let total = FRAME_HEADER_LEN + payload.len();
        if total > MAX_FRAME_LEN {
            return Err(FrameError::PayloadTooLarge {
                len: payload.len(),
                max: MAX_FRAME_LEN - FRAME_HEADER_LEN,
            });
        }
        let mut bytes = Vec::with_capacity(total);
        #[allow(clippy::cast_possible_truncation)]
        bytes.extend_from_slice(&(total as u16).to_be_bytes());
        bytes.extend_from_slice(&msg_type.to_be_bytes());
        bytes.extend_from_slice(payload);
        Ok(Self { bytes })
    }

    /// The frame's message type.
    #[must_use]
    pub fn msg_type(&self) -> u16 {
        u16::from_be_bytes([self.bytes[2], self.bytes[3]])
    }

    /// Total frame length, header included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Never true; a frame always carries at least its header.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        false
    }

    /// The full wire representation.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub(crate) fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

/// A borrowed view of one well-formed inbound frame.
#[derive(Debug, Clone, Copy)]
pub struct Frame<'a> {
    /// The frame's message type.
    pub msg_type: u16,
    /// The payload (everything after the 4-byte header).
    pub payload: &'a [u8],
}

impl Frame<'_> {
    /// Total frame length on the wire, header included.
    #[must_use]
    pub fn wire_len(&self) -> usize {
        FRAME_HEADER_LEN + self.payload.len()
    }
}

/// Streaming reassembly of frames from arbitrary inbound chunks.
///
/// Accepts bytes however the transport delivers them - a frame split across
/// many chunks, many frames inside one chunk - and emits each complete
/// frame exactly once. After a reconnect the buffer must be [`reset`] so
/// tokenization restarts at a frame boundary.
///
/// [`reset`]: FrameTokenizer::reset
#[derive(Debug, Default)]
pub struct FrameTokenizer {
    buf: Vec<u8>,
}

impl FrameTokenizer {
    /// An empty tokenizer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Discard any partial frame, e.g. after a reconnect left the stream
    /// mid-frame.
    pub fn reset(&mut self) {
        self.buf.clear();
    }

    /// Append `chunk` and emit every frame that is now complete.
    ///
    /// # Errors
    ///
    /// [`FrameError::BadLength`] when a header declares a size smaller than
    /// the header itself; the internal buffer is discarded, since nothing
    /// after a corrupt length prefix can be trusted.
    pub fn feed(
        &mut self,
        chunk: &[u8],
        mut emit: impl FnMut(Frame<'_>),
    ) -> Result<(), FrameError> {
        self.buf.extend_from_slice(chunk);
        let mut offset = 0;
        while self.buf.len() - offset >= FRAME_HEADER_LEN {
            let declared =
                u16::from_be_bytes([self.buf[offset], self.buf[offset + 1]]) as usize;
            if declared < FRAME_HEADER_LEN {
                self.buf.clear();
                #[allow(clippy::cast_possible_truncation)]
                return Err(FrameError::BadLength {
                    declared: declared as u16,
                });
            }
            if self.buf.len() - offset < declared {
                break;
            }
            let msg_type = u16::from_be_bytes([self.buf[offset + 2], self.buf[offset + 3]]);
            emit(Frame {
                msg_type,
                payload: &self.buf[offset + FRAME_HEADER_LEN..offset + declared],
            });
            offset += declared;
        }
        self.buf.drain(..offset);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    fn collect(tokenizer: &mut FrameTokenizer, chunk: &[u8]) -> Vec<(u16, Vec<u8>)> {
        let mut frames = Vec::new();
        tokenizer
            .feed(chunk, |frame| {
                frames.push((frame.msg_type, frame.payload.to_vec()));
            })
            .expect("well-formed input");
        frames
    }

    #[test]
    fn builds_and_reads_back_a_frame() {
        let msg = MessageBuf::new(7, b"hello").unwrap();
        assert_eq!(msg.len(), 9);
        assert_eq!(msg.msg_type(), 7);
        assert_eq!(&msg.as_bytes()[..4], &[0, 9, 0, 7]);
    }

    #[test]
    fn rejects_oversized_payload() {
        let payload = vec![0_u8; MAX_FRAME_LEN - FRAME_HEADER_LEN + 1];
        assert!(matches!(
            MessageBuf::new(1, &payload),
            Err(FrameError::PayloadTooLarge { .. })
        ));
    }

    #[test]
    fn frame_spanning_multiple_chunks() {
        let msg = MessageBuf::new(42, b"split across chunks").unwrap();
        let bytes = msg.as_bytes();
        let mut tokenizer = FrameTokenizer::new();
        // One byte at a time: nothing emits until the last byte lands.
        for byte in &bytes[..bytes.len() - 1] {
            assert!(collect(&mut tokenizer, std::slice::from_ref(byte)).is_empty());
        }
        let frames = collect(&mut tokenizer, &bytes[bytes.len() - 1..]);
        assert_eq!(frames, vec![(42, b"split across chunks".to_vec())]);
    }

    #[test]
    fn multiple_frames_in_one_chunk() {
        let mut wire = Vec::new();
        wire.extend_from_slice(MessageBuf::new(1, b"a").unwrap().as_bytes());
        wire.extend_from_slice(MessageBuf::new(2, b"").unwrap().as_bytes());
        wire.extend_from_slice(MessageBuf::new(3, b"ccc").unwrap().as_bytes());
        let mut tokenizer = FrameTokenizer::new();
        let frames = collect(&mut tokenizer, &wire);
        assert_eq!(
            frames,
            vec![
                (1, b"a".to_vec()),
                (2, Vec::new()),
                (3, b"ccc".to_vec()),
            ]
        );
    }

    #[test_case(0; "size zero")]
    #[test_case(3; "size below header")]
    fn corrupt_length_prefix_is_rejected(declared: u16) {
        let mut tokenizer = FrameTokenizer::new();
        let mut wire = declared.to_be_bytes().to_vec();
        wire.extend_from_slice(&[0, 1]);
        let result = tokenizer.feed(&wire, |_| panic!("no frame should emit"));
        assert!(matches!(result, Err(FrameError::BadLength { .. })));
        // The buffer was discarded; fresh, well-formed input parses again.
        let frames = collect(&mut tokenizer, MessageBuf::new(9, b"ok").unwrap().as_bytes());
        assert_eq!(frames, vec![(9, b"ok".to_vec())]);
    }

    #[test]
    fn reset_discards_partial_frame() {
        let msg = MessageBuf::new(5, b"partial").unwrap();
        let mut tokenizer = FrameTokenizer::new();
        assert!(collect(&mut tokenizer, &msg.as_bytes()[..6]).is_empty());
        tokenizer.reset();
        // Resumes cleanly at a frame boundary.
        let frames = collect(&mut tokenizer, msg.as_bytes());
        assert_eq!(frames, vec![(5, b"partial".to_vec())]);
    }
}
