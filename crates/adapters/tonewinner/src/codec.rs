//! `#...*` framing.
//!
//! Bytes outside a frame are noise and dropped. A frame that sees a
//! newline, a new `#` or grows past [`MAX_FRAME_LEN`] before its `*` is
//! dropped too. Decoding only ever looks at complete windows, so the result
//! does not depend on how the stream is chunked.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::protocol::Command;

const START: u8 = b'#';
const END: u8 = b'*';

/// Longest accepted frame, delimiters included.
pub const MAX_FRAME_LEN: usize = 128;

#[derive(Debug, Default, Clone, Copy)]
pub struct FrameCodec;

impl Decoder for FrameCodec {
    type Item = String;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<String>, Self::Error> {
        loop {
            let Some(start) = src.iter().position(|byte| *byte == START) else {
                src.clear();
                return Ok(None);
            };
            src.advance(start);

            let window = &src[1..src.len().min(MAX_FRAME_LEN)];
            match window
                .iter()
                .position(|byte| matches!(*byte, END | START | b'\n'))
            {
                Some(end) if window[end] == END => {
                    let frame = src.split_to(end + 2);
                    let body = String::from_utf8_lossy(&frame[1..=end]).trim().to_string();
                    if body.is_empty() {
                        continue;
                    }
                    return Ok(Some(body));
                }
                // a new `#` restarts the frame there
                Some(restart) if window[restart] == START => src.advance(restart + 1),
                // newline: drop the frame and the newline
                Some(newline) => src.advance(newline + 2),
                None if src.len() >= MAX_FRAME_LEN => {
                    tracing::debug!("dropping oversized frame");
                    src.advance(1);
                }
                None => return Ok(None),
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<String>, Self::Error> {
        let frame = self.decode(src)?;
        if frame.is_none() {
            src.clear();
        }
        Ok(frame)
    }
}

impl Encoder<Command> for FrameCodec {
    type Error = std::io::Error;

    fn encode(&mut self, command: Command, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let body = command.to_string();
        dst.reserve(body.len() + 2);
        dst.put_u8(START);
        dst.put_slice(body.as_bytes());
        dst.put_u8(END);
        Ok(())
    }
}
