//! Incremental decoder for `text/event-stream` bodies.
//!
//! Network chunks do not line up with SSE frames: a frame may arrive in
//! several chunks, one chunk may carry several frames, and a chunk boundary may
//! fall inside a multi-byte UTF-8 character. The decoder buffers raw bytes and
//! only decodes complete lines, so none of that leaks into the payloads.
//!
//! A complete line that is not valid UTF-8, or a frame that grows past
//! [`MAX_FRAME_LEN`] without being terminated, is an error.

use thiserror::Error;

/// Maximum bytes buffered for one frame (1MB)
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// Number of leading bytes of an offending line kept in an error.
const EXCERPT_LEN: usize = 64;

#[derive(Error, Debug)]
pub enum SseError {
    #[error("event stream line is not valid UTF-8: {source}")]
    InvalidUtf8 {
        line: String,
        #[source]
        source: std::str::Utf8Error,
    },
    #[error("event stream frame exceeds {limit} bytes")]
    FrameTooLarge { line: String, limit: usize },
}

impl SseError {
    /// Leading part of the line that caused the error, lossily decoded.
    pub fn line(&self) -> &str {
        match self {
            SseError::InvalidUtf8 { line, .. } | SseError::FrameTooLarge { line, .. } => line,
        }
    }
}

fn excerpt(bytes: &[u8]) -> String {
    String::from_utf8_lossy(&bytes[..bytes.len().min(EXCERPT_LEN)]).into_owned()
}

/// Buffered SSE frame decoder that yields `data` payloads.
#[derive(Debug)]
pub struct SseDecoder {
    /// Bytes of the line currently being received.
    pending: Vec<u8>,
    /// `data:` lines of the frame currently being received.
    data: Vec<String>,
    /// Bytes held by `data`.
    data_len: usize,
    max_frame_len: usize,
}

impl Default for SseDecoder {
    fn default() -> Self {
        Self::with_max_frame_len(MAX_FRAME_LEN)
    }
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_frame_len(max_frame_len: usize) -> Self {
        Self {
            pending: Vec::new(),
            data: Vec::new(),
            data_len: 0,
            max_frame_len,
        }
    }

    /// Feed one network chunk. Returns the payload of every frame the chunk
    /// completed, in order.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<String>, SseError> {
        let mut payloads = Vec::new();
        let mut rest = chunk;

        while let Some(pos) = rest.iter().position(|&b| b == b'\n') {
            self.buffer(&rest[..pos])?;
            rest = &rest[pos + 1..];

            let line = std::mem::take(&mut self.pending);
            if let Some(payload) = self.process_line(&line)? {
                payloads.push(payload);
            }
        }

        self.buffer(rest)?;
        Ok(payloads)
    }

    /// Flush a trailing frame that was cut off by end of input without its
    /// terminating blank line.
    pub fn finish(&mut self) -> Result<Option<String>, SseError> {
        if !self.pending.is_empty() {
            let line = std::mem::take(&mut self.pending);
            if let Some(payload) = self.process_line(&line)? {
                return Ok(Some(payload));
            }
        }
        Ok(self.dispatch())
    }

    fn buffer(&mut self, bytes: &[u8]) -> Result<(), SseError> {
        self.pending.extend_from_slice(bytes);
        if self.pending.len() + self.data_len > self.max_frame_len {
            let err = SseError::FrameTooLarge {
                line: excerpt(&self.pending),
                limit: self.max_frame_len,
            };
            self.pending.clear();
            return Err(err);
        }
        Ok(())
    }

    fn process_line(&mut self, line: &[u8]) -> Result<Option<String>, SseError> {
        let line = line.strip_suffix(b"\r").unwrap_or(line);

        if line.is_empty() {
            return Ok(self.dispatch());
        }

        // Comment / keep-alive line
        if line[0] == b':' {
            return Ok(None);
        }

        let text = std::str::from_utf8(line).map_err(|source| SseError::InvalidUtf8 {
            line: excerpt(line),
            source,
        })?;
        let (field, value) = match text.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (text, ""),
        };

        if field == "data" {
            self.data_len += value.len() + 1;
            self.data.push(value.to_string());
        } else {
            log::trace!("ignoring SSE field {:?}", field);
        }

        Ok(None)
    }

    fn dispatch(&mut self) -> Option<String> {
        if self.data.is_empty() {
            return None;
        }
        let payload = self.data.join("\n");
        self.data.clear();
        self.data_len = 0;
        Some(payload)
    }
}
