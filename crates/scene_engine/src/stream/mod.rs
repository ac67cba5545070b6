//! Chunked stream ingestion
//!
//! [`ChunkStreamParser`] is the push-driven state machine that frames an
//! incoming byte stream into document chunks. Fragments may arrive at any
//! size; boundaries are unrelated to chunk boundaries. Between calls the
//! parser buffers only the minimum unconsumed suffix: completed chunks are
//! handed off and never re-scanned, and `pending` only ever holds a
//! partial fixed-size header.
//!
//! [`sink::DocumentStream`] wraps a parser into a loading session with
//! backpressure and engine hand-off.

pub mod sink;

use thiserror::Error;

use crate::document::{
    Chunk, ChunkHeader, DocumentHeader, CHUNK_HEADER_SIZE, FORMAT_MAJOR, FORMAT_MINOR,
    HEADER_SIZE, MAGIC,
};

/// Stream framing and session errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamError {
    /// Stream did not start with the document magic
    #[error("bad magic 0x{0:08X}, expected 0x{MAGIC:08X} (\"SCNE\")")]
    BadMagic(u32),

    /// Document was written by an incompatible engine
    #[error(
        "unsupported format version {major}.{minor}, engine speaks \
         {FORMAT_MAJOR}.{FORMAT_MINOR}"
    )]
    VersionMismatch {
        /// Major version found in the header
        major: u16,
        /// Minor version found in the header
        minor: u16,
    },

    /// Stream closed before all declared chunk bytes arrived
    #[error("Unexpected end of data")]
    UnexpectedEndOfData,

    /// Bytes arrived past the declared total length
    #[error("Unexpected extra data")]
    UnexpectedExtraData,

    /// Session was cancelled; dependent operations are rejected with the
    /// same reason
    #[error("stream aborted: {0}")]
    Aborted(String),

    /// Write or close on a session that already completed or was released
    #[error("session is not loading")]
    NotLoading,
}

/// Parser state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestState {
    /// Waiting for the 12-byte document header
    AwaitingMagicHeader,
    /// Waiting for the next 8-byte chunk header
    ReadingChunkHeader,
    /// Accumulating a chunk payload
    BufferingChunkBody,
    /// All declared bytes arrived; waiting for `close()`
    Finalizing,
    /// Closed successfully; chunks handed off
    Completed,
    /// Cancelled via [`ChunkStreamParser::abort`]
    Aborted,
    /// Poisoned by a framing error; every later call fails the same way
    Errored,
}

impl IngestState {
    /// Whether no further input transitions are possible
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Aborted | Self::Errored)
    }
}

/// Push-driven chunk framing state machine
///
/// Drive with any mix of [`push`](Self::push) calls and a final
/// [`close`](Self::close); the resulting chunks are identical for every
/// fragmentation of the same byte stream.
#[derive(Debug)]
pub struct ChunkStreamParser {
    state: IngestState,
    /// Partial fixed-size header bytes (never grows past a header size)
    pending: Vec<u8>,
    current_kind: u32,
    current_needed: usize,
    /// Accumulating chunk payload
    current: Vec<u8>,
    chunks: Vec<Chunk>,
    /// Declared chunk bytes still outstanding
    remaining: u64,
    bytes_consumed: u64,
    error: Option<StreamError>,
}

impl ChunkStreamParser {
    /// Parser awaiting the document header
    pub fn new() -> Self {
        Self {
            state: IngestState::AwaitingMagicHeader,
            pending: Vec::new(),
            current_kind: 0,
            current_needed: 0,
            current: Vec::new(),
            chunks: Vec::new(),
            remaining: 0,
            bytes_consumed: 0,
            error: None,
        }
    }

    /// Current state
    pub fn state(&self) -> IngestState {
        self.state
    }

    /// Total bytes accepted so far; zeroed by [`abort`](Self::abort)
    pub fn bytes_consumed(&self) -> u64 {
        self.bytes_consumed
    }

    /// Chunks fully framed so far
    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    fn fail(&mut self, error: StreamError) -> StreamError {
        self.state = IngestState::Errored;
        self.pending.clear();
        self.current.clear();
        self.chunks.clear();
        self.error = Some(error.clone());
        error
    }

    pub(crate) fn rejection(&self) -> Option<StreamError> {
        match self.state {
            IngestState::Errored => {
                Some(self.error.clone().unwrap_or(StreamError::UnexpectedEndOfData))
            }
            IngestState::Aborted => Some(match &self.error {
                Some(error) => error.clone(),
                None => StreamError::NotLoading,
            }),
            _ => None,
        }
    }

    /// Feed one fragment
    ///
    /// A fragment may contain the tail of one chunk, several whole chunks,
    /// and the head of another; the parser consumes it all in one pass.
    pub fn push(&mut self, mut input: &[u8]) -> Result<(), StreamError> {
        if let Some(error) = self.rejection() {
            return Err(error);
        }
        while !input.is_empty() {
            match self.state {
                IngestState::AwaitingMagicHeader => {
                    let need = HEADER_SIZE - self.pending.len();
                    let take = need.min(input.len());
                    self.pending.extend_from_slice(&input[..take]);
                    input = &input[take..];
                    self.bytes_consumed += take as u64;
                    if self.pending.len() < HEADER_SIZE {
                        continue;
                    }
                    let header: DocumentHeader = bytemuck::pod_read_unaligned(&self.pending);
                    self.pending.clear();
                    if header.magic != MAGIC {
                        return Err(self.fail(StreamError::BadMagic(header.magic)));
                    }
                    if header.major != FORMAT_MAJOR || header.minor > FORMAT_MINOR {
                        return Err(self.fail(StreamError::VersionMismatch {
                            major: header.major,
                            minor: header.minor,
                        }));
                    }
                    self.remaining = u64::from(header.total_length);
                    self.state = if self.remaining == 0 {
                        IngestState::Finalizing
                    } else {
                        IngestState::ReadingChunkHeader
                    };
                }
                IngestState::ReadingChunkHeader => {
                    let need = CHUNK_HEADER_SIZE - self.pending.len();
                    let take = need.min(input.len()).min(self.remaining as usize);
                    if take == 0 {
                        // Declared length ran out mid-header.
                        return Err(self.fail(StreamError::UnexpectedExtraData));
                    }
                    self.pending.extend_from_slice(&input[..take]);
                    input = &input[take..];
                    self.bytes_consumed += take as u64;
                    self.remaining -= take as u64;
                    if self.pending.len() < CHUNK_HEADER_SIZE {
                        continue;
                    }
                    let header: ChunkHeader = bytemuck::pod_read_unaligned(&self.pending);
                    self.pending.clear();
                    self.current_kind = header.kind;
                    self.current_needed = header.length as usize;
                    if self.current_needed == 0 {
                        self.finish_chunk();
                    } else {
                        self.state = IngestState::BufferingChunkBody;
                    }
                }
                IngestState::BufferingChunkBody => {
                    let need = self.current_needed - self.current.len();
                    let take = need.min(input.len()).min(self.remaining as usize);
                    if take == 0 {
                        return Err(self.fail(StreamError::UnexpectedExtraData));
                    }
                    self.current.extend_from_slice(&input[..take]);
                    input = &input[take..];
                    self.bytes_consumed += take as u64;
                    self.remaining -= take as u64;
                    if self.current.len() == self.current_needed {
                        self.finish_chunk();
                    }
                }
                IngestState::Finalizing | IngestState::Completed => {
                    return Err(self.fail(StreamError::UnexpectedExtraData));
                }
                IngestState::Aborted | IngestState::Errored => unreachable!("checked above"),
            }
        }
        Ok(())
    }

    fn finish_chunk(&mut self) {
        self.chunks.push(Chunk {
            kind: self.current_kind,
            payload: std::mem::take(&mut self.current),
        });
        self.state = if self.remaining == 0 {
            IngestState::Finalizing
        } else {
            IngestState::ReadingChunkHeader
        };
    }

    /// Declare the stream finished, yielding the framed chunks
    ///
    /// Fails with [`StreamError::UnexpectedEndOfData`] if any declared byte
    /// is still outstanding; a stream poisoned by extra data refuses the
    /// close with the poisoning error.
    pub fn close(&mut self) -> Result<Vec<Chunk>, StreamError> {
        if let Some(error) = self.rejection() {
            return Err(error);
        }
        match self.state {
            IngestState::Finalizing => {
                self.state = IngestState::Completed;
                Ok(std::mem::take(&mut self.chunks))
            }
            IngestState::Completed => Err(StreamError::NotLoading),
            _ => Err(self.fail(StreamError::UnexpectedEndOfData)),
        }
    }

    /// Cancel the session: all buffered state is discarded and the byte
    /// count reset; later calls are rejected with the same reason
    pub fn abort(&mut self, reason: impl Into<String>) {
        self.pending.clear();
        self.current.clear();
        self.chunks.clear();
        self.bytes_consumed = 0;
        self.remaining = 0;
        self.error = Some(StreamError::Aborted(reason.into()));
        self.state = IngestState::Aborted;
    }
}

impl Default for ChunkStreamParser {
    fn default() -> Self {
        Self::new()
    }
}
