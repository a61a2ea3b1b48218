//! FICS prompt codec: frames the server byte stream on prompt markers.
//!
//! The server has no message boundary other than its prompts, so a frame is
//! "everything up to and including the first delimiter". The delimiter set
//! changes over the life of a connection (`login:` during the handshake,
//! `fics%` in steady state), so it lives on the codec and is swapped through
//! `Framed::codec_mut`.
//!
//! Telnet IAC negotiation is filtered out before framing so that option
//! bytes never reach the sanitizer or split a delimiter.
use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Upper bound on buffered output without seeing a delimiter.
const MAX_FRAME_LENGTH: usize = 1 << 20;

const IAC: u8 = 255;
const DONT: u8 = 254;
const DO: u8 = 253;
const WONT: u8 = 252;
const WILL: u8 = 251;
const SB: u8 = 250;
const SE: u8 = 240;

/// Codec error: oversized frame or an I/O error.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("no delimiter found within {MAX_FRAME_LENGTH} bytes")]
    FrameTooLong,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A tokio codec that frames server output on a configurable set of
/// delimiters and writes newline-terminated commands.
#[derive(Debug, Default)]
pub struct PromptCodec {
    delimiters: Vec<Vec<u8>>,
    /// Telnet-filtered bytes that have not been returned as a frame yet.
    pending: BytesMut,
    /// Prefix of `pending` already searched without finding a delimiter.
    scanned: usize,
    /// Inside `IAC SB ... IAC SE`.
    in_subnegotiation: bool,
}

impl PromptCodec {
    pub fn new<I, D>(delimiters: I) -> Self
    where
        I: IntoIterator<Item = D>,
        D: AsRef<[u8]>,
    {
        let mut codec = Self::default();
        codec.set_delimiters(delimiters);
        codec
    }

    /// Replace the delimiter set. Already buffered bytes are kept and will be
    /// matched against the new set.
    pub fn set_delimiters<I, D>(&mut self, delimiters: I)
    where
        I: IntoIterator<Item = D>,
        D: AsRef<[u8]>,
    {
        self.delimiters = delimiters
            .into_iter()
            .map(|d| d.as_ref().to_vec())
            .filter(|d| !d.is_empty())
            .collect();
        self.scanned = 0;
    }

    /// Move data bytes from `src` into `pending`, dropping telnet commands.
    /// An incomplete command at the end of `src` is left there for the next
    /// read.
    fn filter_telnet(&mut self, src: &mut BytesMut) {
        let mut i = 0;
        while i < src.len() {
            let b = src[i];
            if b != IAC {
                if !self.in_subnegotiation {
                    self.pending.put_u8(b);
                }
                i += 1;
                continue;
            }
            let Some(&command) = src.get(i + 1) else {
                break;
            };
            match command {
                IAC => {
                    if !self.in_subnegotiation {
                        self.pending.put_u8(IAC);
                    }
                    i += 2;
                }
                WILL | WONT | DO | DONT => {
                    if i + 2 >= src.len() {
                        break;
                    }
                    i += 3;
                }
                SB => {
                    self.in_subnegotiation = true;
                    i += 2;
                }
                SE => {
                    self.in_subnegotiation = false;
                    i += 2;
                }
                _ => i += 2,
            }
        }
        src.advance(i);
    }

    /// End offset (exclusive) of the earliest delimiter match in `pending`.
    ///
    /// Only the bytes past `scanned` (plus enough overlap for a delimiter
    /// that straddles the boundary) are searched.
    fn frame_end(&self) -> Option<usize> {
        let longest = self.delimiters.iter().map(Vec::len).max()?;
        let from = self.scanned.saturating_sub(longest - 1);
        let tail = &self.pending[from..];
        self.delimiters
            .iter()
            .filter_map(|d| {
                tail.windows(d.len())
                    .position(|w| w == d.as_slice())
                    .map(|pos| from + pos + d.len())
            })
            .min()
    }
}

impl Decoder for PromptCodec {
    type Item = BytesMut;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        self.filter_telnet(src);

        match self.frame_end() {
            Some(end) => {
                self.scanned = 0;
                Ok(Some(self.pending.split_to(end)))
            }
            None if self.pending.len() > MAX_FRAME_LENGTH => Err(CodecError::FrameTooLong),
            None => {
                self.scanned = self.pending.len();
                Ok(None)
            }
        }
    }
}

impl Encoder<String> for PromptCodec {
    type Error = CodecError;

    fn encode(&mut self, command: String, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.reserve(command.len() + 1);
        dst.put_slice(command.as_bytes());
        dst.put_u8(b'\n');
        Ok(())
    }
}
