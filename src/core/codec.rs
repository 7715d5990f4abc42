use crate::config::MAX_FRAME_SIZE;
use crate::core::frame::{Frame, FrameKind, DELIMITER};
use crate::error::{constants, RelayError, Result};
use crate::utils::crypto;
use bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, trace};

/// Splits a client byte stream into [`Frame`]s.
///
/// Bytes accumulate across reads until a whole frame is present, so frames
/// may arrive in any number of fragments. A prefix that is valid UTF-8 and
/// ends in `<EOF>` is plaintext. Otherwise the buffer is tried as an
/// encryption envelope whose decrypted text contains `<EOF>`.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    max_frame_size: usize,
}

impl FrameCodec {
    pub fn new(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(MAX_FRAME_SIZE)
    }
}

fn find_delimiter(buf: &[u8]) -> Option<usize> {
    buf.windows(DELIMITER.len())
        .position(|window| window == DELIMITER.as_bytes())
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = RelayError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        if src.is_empty() {
            return Ok(None);
        }

        let delimited = find_delimiter(src).map(|pos| pos + DELIMITER.len());
        if let Some(end) = delimited {
            if let Ok(text) = std::str::from_utf8(&src[..end]) {
                if end > self.max_frame_size {
                    return Err(RelayError::OversizedFrame(end));
                }
                let text = text.to_owned();
                let raw = src.split_to(end).freeze();
                trace!(len = end, "plaintext frame");
                return Ok(Some(Frame::from_wire(FrameKind::Plaintext, raw, text)));
            }
        }

        if let Some((len, text)) = crypto::locate(src, DELIMITER.as_bytes()) {
            if len > self.max_frame_size {
                return Err(RelayError::OversizedFrame(len));
            }
            let raw = src.split_to(len).freeze();
            trace!(len, "encrypted frame");
            return Ok(Some(Frame::from_wire(FrameKind::Encrypted, raw, text)));
        }

        // A visible delimiter behind bytes that are neither text nor an envelope
        if let Some(end) = delimited {
            debug!(len = end, "{}", constants::ERR_INVALID_TEXT);
            return Err(RelayError::ParseError(constants::ERR_INVALID_TEXT.into()));
        }

        if src.len() > self.max_frame_size {
            return Err(RelayError::OversizedFrame(src.len()));
        }

        Ok(None)
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>> {
        match self.decode(buf)? {
            Some(frame) => Ok(Some(frame)),
            None => {
                if !buf.is_empty() {
                    debug!(len = buf.len(), "discarding partial frame at end of stream");
                    buf.clear();
                }
                Ok(None)
            }
        }
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = RelayError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<()> {
        dst.reserve(item.len());
        dst.extend_from_slice(&item);
        Ok(())
    }
}
