use bytes::BytesMut;
use std::io;
use tokio_util::codec::Decoder;

/// Longest run of bytes without a separator before it is flushed as a line.
const MAX_LINE_BYTES: usize = 64 * 1024;

/// Splits tool output on `\n` and `\r`.
///
/// Progress bars redraw with a bare carriage return, so `\r` must end a line
/// just like `\n` does. Blank lines are dropped and invalid UTF-8 is replaced.
#[derive(Debug, Default, Clone, Copy)]
pub struct ToolLineCodec;

impl ToolLineCodec {
    fn take_line(buf: &mut BytesMut, len: usize, consumed: usize) -> Option<String> {
        let chunk = buf.split_to(consumed);
        let line = String::from_utf8_lossy(&chunk[..len]);
        let line = line.trim_end();
        (!line.is_empty()).then(|| line.to_string())
    }
}

impl Decoder for ToolLineCodec {
    type Item = String;
    type Error = io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<String>, io::Error> {
        loop {
            let Some(pos) = buf.iter().position(|b| *b == b'\n' || *b == b'\r') else {
                if buf.len() >= MAX_LINE_BYTES {
                    let len = buf.len();
                    return Ok(Self::take_line(buf, len, len));
                }
                return Ok(None);
            };

            if let Some(line) = Self::take_line(buf, pos, pos + 1) {
                return Ok(Some(line));
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<String>, io::Error> {
        if let Some(line) = self.decode(buf)? {
            return Ok(Some(line));
        }
        let len = buf.len();
        if len == 0 {
            return Ok(None);
        }
        Ok(Self::take_line(buf, len, len))
    }
}
