//! Incremental re-assembly of backend frames from the socket byte stream.
use bytes::{Buf, Bytes, BytesMut};

use crate::postgres::ProtocolError;

const DEFAULT_BUF_CAPACITY: usize = 1024;

/// A complete type-tagged backend frame.
#[derive(Debug)]
pub struct Frame {
    pub msgtype: u8,
    pub body: Bytes,
}

/// Reassembles length-prefixed messages out of arbitrarily chunked reads.
///
/// The backend framing is a 1-byte type tag followed by a 4-byte big-endian
/// length which includes itself but not the tag. Bytes are appended through
/// [`buf_mut`][Framer::buf_mut] and complete frames peeled off one at a time
/// with [`next`][Framer::next], so the caller can interpret each frame before
/// the following one is parsed.
#[derive(Debug)]
pub struct Framer {
    tail: BytesMut,
}

impl Framer {
    pub fn new() -> Framer {
        Framer { tail: BytesMut::with_capacity(DEFAULT_BUF_CAPACITY) }
    }

    /// The buffer reads append into.
    pub fn buf_mut(&mut self) -> &mut BytesMut {
        self.tail.reserve(DEFAULT_BUF_CAPACITY);
        &mut self.tail
    }

    /// Append bytes to the residual tail.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.tail.extend_from_slice(bytes);
    }

    /// Peel off the next complete frame, if any.
    ///
    /// Returns `None` when fewer than one whole frame is buffered; the
    /// residue stays in the tail until more bytes arrive.
    pub fn next(&mut self) -> Result<Option<Frame>, ProtocolError> {
        let Some(mut header) = self.tail.get(..5) else {
            return Ok(None);
        };

        let msgtype = header.get_u8();
        let len = header.get_i32();

        // the length field includes itself
        if len < 4 {
            return Err(ProtocolError::frame_length(len));
        }

        if self.tail.len() - 1/* msgtype */ < len as usize {
            self.tail.reserve(1 + len as usize);
            return Ok(None);
        }

        self.tail.advance(5);
        let body = self.tail.split_to(len as usize - 4).freeze();

        Ok(Some(Frame { msgtype, body }))
    }
}

impl Default for Framer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn frame(msgtype: u8, body: &[u8]) -> Vec<u8> {
        let mut buf = vec![msgtype];
        buf.extend_from_slice(&(body.len() as i32 + 4).to_be_bytes());
        buf.extend_from_slice(body);
        buf
    }

    fn collect(framer: &mut Framer) -> Vec<(u8, Bytes)> {
        let mut out = vec![];
        while let Some(f) = framer.next().unwrap() {
            out.push((f.msgtype, f.body));
        }
        out
    }

    #[test]
    fn single_frame() {
        let mut framer = Framer::new();
        framer.feed(&frame(b'Z', b"I"));

        let frames = collect(&mut framer);
        assert_eq!(frames, [(b'Z', Bytes::from_static(b"I"))]);
        assert!(framer.tail.is_empty());
    }

    #[test]
    fn split_across_arbitrary_chunks() {
        let mut stream = Vec::new();
        stream.extend(frame(b'C', b"SELECT 1\0"));
        stream.extend(frame(b'Z', b"I"));
        stream.extend(frame(b'S', b"TimeZone\0UTC\0"));

        let whole = {
            let mut framer = Framer::new();
            framer.feed(&stream);
            collect(&mut framer)
        };

        // every split point yields the same frame sequence
        for split in 0..stream.len() {
            let mut framer = Framer::new();
            framer.feed(&stream[..split]);
            let mut frames = collect(&mut framer);
            framer.feed(&stream[split..]);
            frames.extend(collect(&mut framer));
            assert_eq!(frames, whole, "diverged at split {split}");
        }
    }

    #[test]
    fn byte_at_a_time() {
        let stream = frame(b'D', &[0, 1, 0, 0, 0, 2, b'4', b'2']);
        let mut framer = Framer::new();
        for byte in &stream {
            framer.feed(std::slice::from_ref(byte));
        }
        let frames = collect(&mut framer);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].0, b'D');
    }

    #[test]
    fn residual_tail_is_less_than_one_frame() {
        let mut framer = Framer::new();
        let stream = frame(b'C', b"LISTEN\0");
        framer.feed(&stream[..stream.len() - 1]);

        assert!(collect(&mut framer).is_empty());
        assert_eq!(framer.tail.len(), stream.len() - 1);
    }

    #[test]
    fn bogus_length_is_error() {
        let mut framer = Framer::new();
        framer.feed(&[b'Z', 0, 0, 0, 1, 0]);
        assert!(framer.next().is_err());
    }
}
