//! In-memory stream used for exercising protocol logic without sockets.

use std::collections::VecDeque;
use std::io::{ErrorKind, Read, Write};

/// Stream replaying a scripted sequence of reads.
///
/// Every chunk is handed out by consecutive `read` calls, never merged with
/// the next chunk. An empty chunk, as well as an exhausted script, behaves
/// like a non-blocking socket with nothing to read.
#[derive(Default)]
pub struct ScriptedStream {
    chunks: VecDeque<Vec<u8>>,
    pub written: Vec<u8>,
    pub writes: Vec<usize>,
    /// Caps the number of bytes accepted by a single `write` call, a limit
    /// of zero makes every write fail with `WouldBlock`
    pub write_limit: Option<usize>,
    /// Makes an exhausted script read as end of stream
    pub eof: bool,
}

impl ScriptedStream {
    pub fn new(chunks: Vec<Vec<u8>>) -> Self {
        ScriptedStream {
            chunks: chunks.into(),
            ..Default::default()
        }
    }

    pub fn push(&mut self, chunk: Vec<u8>) {
        self.chunks.push_back(chunk);
    }
}

impl Read for ScriptedStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let chunk = match self.chunks.front_mut() {
            Some(c) => c,
            None if self.eof => return Ok(0),
            None => return Err(ErrorKind::WouldBlock.into()),
        };
        if chunk.is_empty() {
            self.chunks.pop_front();
            return Err(ErrorKind::WouldBlock.into());
        }
        let n = chunk.len().min(buf.len());
        buf[..n].copy_from_slice(&chunk[..n]);
        chunk.drain(..n);
        if chunk.is_empty() {
            self.chunks.pop_front();
        }
        Ok(n)
    }
}

impl Write for ScriptedStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = match self.write_limit {
            Some(0) => return Err(ErrorKind::WouldBlock.into()),
            Some(limit) => buf.len().min(limit),
            None => buf.len(),
        };
        self.written.extend_from_slice(&buf[..n]);
        self.writes.push(n);
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl crate::transport::StreamInterface for ScriptedStream {}
