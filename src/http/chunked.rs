//! Incremental `Transfer-Encoding: chunked` request body decoding
//! (RFC 9112 §7.1).
//!
//! Chunk-size lines are parsed with [`httparse::parse_chunk_size`]; chunk
//! extensions are ignored and trailer fields are skipped. The decoder
//! consumes from the front of the connection buffer, so bytes are looked at
//! once no matter how the body is split across reads.

use bytes::{Buf, Bytes, BytesMut};
use thiserror::Error;

/// Longest chunk-size or trailer line we are willing to buffer.
const MAX_LINE_LEN: usize = 8 * 1024;

/// Errors produced while decoding a chunked body.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChunkedError {
    #[error("invalid chunk size line")]
    InvalidChunkSize,

    #[error("chunk data is not followed by CRLF")]
    MissingChunkTerminator,

    #[error("chunk size or trailer line exceeds {MAX_LINE_LEN} bytes")]
    LineTooLong,
}

/// One step of progress through a chunked body.
#[derive(Debug, PartialEq, Eq)]
pub enum Decoded {
    /// A run of payload bytes.
    Data(Bytes),
    /// The buffer holds no further complete element; read more.
    NeedMore,
    /// The last chunk and the trailer section have been consumed.
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Size,
    Data { remaining: u64 },
    DataEnd,
    Trailers,
    Done,
}

/// Streaming decoder for one chunked body.
///
/// # Examples
///
/// ```
/// use bytes::BytesMut;
/// use rttp_cache::http::chunked::{ChunkedDecoder, Decoded};
///
/// let mut decoder = ChunkedDecoder::new();
/// let mut buf = BytesMut::from(&b"5\r\nhel"[..]);
/// assert_eq!(decoder.decode(&mut buf), Ok(Decoded::Data("hel".into())));
/// assert_eq!(decoder.decode(&mut buf), Ok(Decoded::NeedMore));
///
/// buf.extend_from_slice(b"lo\r\n0\r\n\r\nNEXT");
/// assert_eq!(decoder.decode(&mut buf), Ok(Decoded::Data("lo".into())));
/// assert_eq!(decoder.decode(&mut buf), Ok(Decoded::Done));
/// assert_eq!(&buf[..], b"NEXT");
/// ```
#[derive(Debug)]
pub struct ChunkedDecoder {
    state: State,
}

impl Default for ChunkedDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkedDecoder {
    pub fn new() -> Self {
        Self { state: State::Size }
    }

    pub fn is_done(&self) -> bool {
        self.state == State::Done
    }

    /// Consumes as much of `buf` as needed to make one step of progress.
    ///
    /// Bytes after the end of the body (a pipelined request) are left in
    /// `buf` untouched.
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<Decoded, ChunkedError> {
        loop {
            match self.state {
                State::Size => {
                    let (line_len, size) = match httparse::parse_chunk_size(buf) {
                        Ok(httparse::Status::Complete(pair)) => pair,
                        Ok(httparse::Status::Partial) => {
                            return if buf.len() > MAX_LINE_LEN {
                                Err(ChunkedError::LineTooLong)
                            } else {
                                Ok(Decoded::NeedMore)
                            };
                        }
                        Err(_) => return Err(ChunkedError::InvalidChunkSize),
                    };
                    buf.advance(line_len);
                    self.state = if size == 0 {
                        State::Trailers
                    } else {
                        State::Data { remaining: size }
                    };
                }
                State::Data { remaining } => {
                    if buf.is_empty() {
                        return Ok(Decoded::NeedMore);
                    }
                    let take = usize::try_from(remaining).map_or(buf.len(), |r| r.min(buf.len()));
                    let data = buf.split_to(take).freeze();
                    let left = remaining - take as u64;
                    self.state = if left == 0 {
                        State::DataEnd
                    } else {
                        State::Data { remaining: left }
                    };
                    return Ok(Decoded::Data(data));
                }
                State::DataEnd => {
                    if buf.len() < 2 {
                        return Ok(Decoded::NeedMore);
                    }
                    if &buf[..2] != b"\r\n" {
                        return Err(ChunkedError::MissingChunkTerminator);
                    }
                    buf.advance(2);
                    self.state = State::Size;
                }
                State::Trailers => {
                    let Some(line_len) = buf.windows(2).position(|w| w == b"\r\n") else {
                        return if buf.len() > MAX_LINE_LEN {
                            Err(ChunkedError::LineTooLong)
                        } else {
                            Ok(Decoded::NeedMore)
                        };
                    };
                    buf.advance(line_len + 2);
                    if line_len == 0 {
                        self.state = State::Done;
                    }
                }
                State::Done => return Ok(Decoded::Done),
            }
        }
    }
}
