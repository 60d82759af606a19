//! Replayable request bodies.
//!
//! A [`ReplayableBody`] is a view over a shared seekable source. Every view
//! keeps its own read offset, so handing a fresh view to each attempt lets
//! the same payload be sent from offset 0 no matter how much an earlier
//! attempt consumed.
//!
//! Closing a view is idempotent and may race with a read on another thread:
//! the read either completes with the bytes it already pulled or observes the
//! closed flag and reports end-of-stream.

use parking_lot::Mutex;
use std::fmt;
use std::io::{self, Read, Seek, SeekFrom};
use std::sync::Arc;

/// A readable, seekable, sendable byte source.
pub trait ReadSeek: Read + Seek + Send {}

impl<T: Read + Seek + Send> ReadSeek for T {}

/// Boxed byte source stored by requests.
pub type BoxedSource = Box<dyn ReadSeek>;

#[derive(Debug)]
struct ViewState {
    offset: u64,
    closed: bool,
}

/// A rewindable view over a seekable payload.
pub struct ReplayableBody<R = BoxedSource> {
    source: Arc<Mutex<R>>,
    state: Mutex<ViewState>,
}

impl<R: Read + Seek> ReplayableBody<R> {
    /// Wrap a source. The first view starts at offset 0.
    pub fn new(source: R) -> Self {
        Self::at(Arc::new(Mutex::new(source)), 0)
    }

    fn at(source: Arc<Mutex<R>>, offset: u64) -> Self {
        Self {
            source,
            state: Mutex::new(ViewState {
                offset,
                closed: false,
            }),
        }
    }

    /// An independent view over the same source, starting at offset 0.
    pub fn replay(&self) -> Self {
        Self::at(Arc::clone(&self.source), 0)
    }

    /// Close this view and return a fresh one at `offset`.
    pub fn close_and_replay(&self, offset: u64) -> Self {
        self.close();
        Self::at(Arc::clone(&self.source), offset)
    }

    /// Close the view. Later reads return end-of-stream without touching
    /// the source.
    pub fn close(&self) {
        self.state.lock().closed = true;
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Current read offset of this view.
    pub fn offset(&self) -> u64 {
        self.state.lock().offset
    }

    /// Read the remainder of the view into memory.
    pub fn read_remaining(&self) -> io::Result<Vec<u8>> {
        let mut buf = Vec::new();
        let mut reader = self;
        reader.read_to_end(&mut buf)?;
        Ok(buf)
    }

    fn read_at_offset(&self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.state.lock();
        if state.closed {
            return Ok(0);
        }

        let mut source = self.source.lock();
        source.seek(SeekFrom::Start(state.offset))?;
        let n = source.read(buf)?;
        state.offset += n as u64;
        Ok(n)
    }

    fn seek_view(&self, pos: SeekFrom) -> io::Result<u64> {
        let mut state = self.state.lock();
        let mut source = self.source.lock();
        let target = match pos {
            SeekFrom::Current(delta) => {
                source.seek(SeekFrom::Start(state.offset))?;
                SeekFrom::Current(delta)
            }
            other => other,
        };
        state.offset = source.seek(target)?;
        Ok(state.offset)
    }
}

impl<R: Read + Seek> Read for ReplayableBody<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.read_at_offset(buf)
    }
}

impl<R: Read + Seek> Read for &ReplayableBody<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.read_at_offset(buf)
    }
}

impl<R: Read + Seek> Seek for ReplayableBody<R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.seek_view(pos)
    }
}

impl<R: Read + Seek> Seek for &ReplayableBody<R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.seek_view(pos)
    }
}

impl<R> fmt::Debug for ReplayableBody<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ReplayableBody")
            .field("offset", &state.offset)
            .field("closed", &state.closed)
            .finish()
    }
}
