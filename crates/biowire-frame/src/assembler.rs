use bytes::BytesMut;
use tracing::debug;

use crate::codec::{decode_frame, Frame, FrameConfig};
use crate::error::{FrameError, Result};

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;

/// Incremental frame parser over an arbitrarily chunked byte stream.
///
/// Bytes go in with [`feed`](Self::feed); complete frames come out of
/// [`try_extract`](Self::try_extract) in stream order. An incomplete trailing
/// frame stays buffered until more bytes arrive.
///
/// A malformed header poisons the assembler: the stream position is lost, so
/// every later call fails.
pub struct FrameAssembler {
    buf: BytesMut,
    config: FrameConfig,
    pending_error: Option<FrameError>,
    poisoned: bool,
}

impl FrameAssembler {
    /// Create an assembler with default configuration.
    pub fn new() -> Self {
        Self::with_config(FrameConfig::default())
    }

    /// Create an assembler with explicit configuration.
    pub fn with_config(config: FrameConfig) -> Self {
        Self::with_buffered(config, BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY))
    }

    /// Create an assembler that resumes from already-buffered bytes.
    pub fn with_buffered(config: FrameConfig, buf: BytesMut) -> Self {
        Self {
            buf,
            config,
            pending_error: None,
            poisoned: false,
        }
    }

    /// Append newly arrived bytes.
    pub fn feed(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Extract the next complete frame, if one is buffered.
    pub fn next_frame(&mut self) -> Result<Option<Frame>> {
        if let Some(err) = self.pending_error.take() {
            return Err(err);
        }
        if self.poisoned {
            return Err(FrameError::Desynchronized);
        }

        match decode_frame(&mut self.buf, self.config.max_payload_size) {
            Ok(frame) => Ok(frame),
            Err(err) => {
                debug!(error = %err, buffered = self.buf.len(), "frame assembler poisoned");
                self.poisoned = true;
                Err(err)
            }
        }
    }

    /// Extract every complete frame currently buffered.
    ///
    /// Frames that precede a malformed header are returned first; the error
    /// is reported by the following call.
    pub fn try_extract(&mut self) -> Result<Vec<Frame>> {
        let mut frames = Vec::new();
        loop {
            match self.next_frame() {
                Ok(Some(frame)) => frames.push(frame),
                Ok(None) => return Ok(frames),
                Err(err) if frames.is_empty() => return Err(err),
                Err(err) => {
                    self.pending_error = Some(err);
                    return Ok(frames);
                }
            }
        }
    }

    /// Feed `data` and extract every complete frame.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Frame>> {
        self.feed(data);
        self.try_extract()
    }

    /// Number of buffered bytes not yet consumed by a frame.
    pub fn buffered_len(&self) -> usize {
        self.buf.len()
    }

    /// Whether no bytes are buffered.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Whether an earlier malformed header poisoned the stream.
    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Consume the assembler and return the unconsumed bytes.
    pub fn into_remaining(self) -> BytesMut {
        self.buf
    }
}

impl Default for FrameAssembler {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for FrameAssembler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameAssembler")
            .field("buffered", &self.buf.len())
            .field("max_payload_size", &self.config.max_payload_size)
            .field("poisoned", &self.poisoned)
            .finish()
    }
}
