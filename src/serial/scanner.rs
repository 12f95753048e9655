use super::buffer::ReceiveBuffer;
use super::{Result, SerialError};

/// Location of a delimiter inside the receive buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenMatch {
    /// Offset of the first delimiter byte from the oldest buffered byte
    pub offset: usize,
    pub token_len: usize,
    pub preserve_token: bool,
}

impl TokenMatch {
    /// Bytes removed from the buffer when this match is extracted
    pub fn consumed(&self) -> usize {
        self.offset + self.token_len
    }
}

/// Incremental search for a delimiter in a `ReceiveBuffer`.
///
/// Each call to `find_token` resumes where the previous one stopped, backing up
/// `token.len() - 1` bytes so a delimiter split across two pushes is still found.
/// The resume point is dropped whenever the buffer's generation changes.
#[derive(Debug, Clone)]
pub struct TokenScanner {
    token: Vec<u8>,
    preserve_token: bool,
    resume_from: usize,
    generation: Option<u64>,
}

impl TokenScanner {
    pub fn new(token: &[u8], preserve_token: bool) -> Result<Self> {
        if token.is_empty() {
            return Err(SerialError::Configuration("token must not be empty".to_string()));
        }
        Ok(Self {
            token: token.to_vec(),
            preserve_token,
            resume_from: 0,
            generation: None,
        })
    }

    pub fn token(&self) -> &[u8] {
        &self.token
    }

    pub fn find_token(&mut self, buffer: &ReceiveBuffer) -> Option<TokenMatch> {
        if self.generation != Some(buffer.generation()) {
            self.resume_from = 0;
            self.generation = Some(buffer.generation());
        }

        let available = buffer.bytes_available();
        let token_len = self.token.len();
        if available < token_len {
            return None;
        }

        let last_start = available - token_len;
        let mut start = self.resume_from;
        while start <= last_start {
            let hit = self
                .token
                .iter()
                .enumerate()
                .all(|(i, &b)| buffer.byte_at(start + i) == Some(b));
            if hit {
                return Some(TokenMatch {
                    offset: start,
                    token_len,
                    preserve_token: self.preserve_token,
                });
            }
            start += 1;
        }

        // Every start up to last_start failed; a match can only begin after it
        self.resume_from = last_start + 1;
        None
    }

    /// Remove the match and everything before it from `buffer`
    pub fn extract(buffer: &mut ReceiveBuffer, found: TokenMatch) -> (Vec<u8>, usize) {
        let consumed = found.consumed();
        let mut bytes = buffer.read(consumed);
        if !found.preserve_token {
            bytes.truncate(found.offset);
        }
        (bytes, consumed)
    }
}
