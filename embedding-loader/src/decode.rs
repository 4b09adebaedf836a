use std::marker::PhantomData;

use futures::{Stream, StreamExt};
use serde::de::DeserializeOwned;

use crate::{error::DecodeError, source::ChunkStream};

const NEWLINE_DELIM: u8 = b'\n';

/// Decodes newline-delimited JSON from a chunk stream, one record per line.
///
/// Only the unfinished tail of the input is buffered, so memory is bounded by the longest line
/// plus one chunk. Lines are kept as bytes until complete, which means a multi-byte character
/// split across two chunks is reassembled before it is decoded. Blank lines are skipped. The
/// first malformed line ends the decode: the error is returned once and every later call
/// yields `Ok(None)`.
pub struct JsonLines<T> {
    chunks: ChunkStream,
    buffer: Vec<u8>,
    // Start of the first unconsumed line in `buffer`
    start: usize,
    // Everything in `start..scanned` is known to contain no newline
    scanned: usize,
    line: usize,
    exhausted: bool,
    failed: bool,
    _record: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> JsonLines<T> {
    pub fn new(chunks: ChunkStream) -> Self {
        Self {
            chunks,
            buffer: Vec::new(),
            start: 0,
            scanned: 0,
            line: 0,
            exhausted: false,
            failed: false,
            _record: PhantomData,
        }
    }

    /// Number of lines consumed so far, blank ones included.
    pub fn lines_read(&self) -> usize {
        self.line
    }

    pub async fn next_record(&mut self) -> Result<Option<T>, DecodeError> {
        if self.failed {
            return Ok(None);
        }

        loop {
            if let Some(offset) = self.buffer[self.scanned..]
                .iter()
                .position(|b| *b == NEWLINE_DELIM)
            {
                let line_start = self.start;
                let line_end = self.scanned + offset;
                self.start = line_end + 1;
                self.scanned = self.start;
                self.line += 1;

                match self.parse(line_start, line_end)? {
                    Some(record) => return Ok(Some(record)),
                    None => continue,
                }
            }
            self.scanned = self.buffer.len();

            if self.exhausted {
                if self.start == self.buffer.len() {
                    return Ok(None);
                }
                // Final line without a trailing newline
                let (line_start, line_end) = (self.start, self.buffer.len());
                self.start = line_end;
                self.line += 1;
                return self.parse(line_start, line_end);
            }

            match self.chunks.next().await {
                Some(Ok(chunk)) => {
                    self.compact();
                    self.buffer.extend_from_slice(&chunk);
                }
                Some(Err(e)) => {
                    self.failed = true;
                    return Err(DecodeError::Read(e));
                }
                None => self.exhausted = true,
            }
        }
    }

    /// The remaining records as a stream. Ends after the first error.
    pub fn into_stream(self) -> impl Stream<Item = Result<T, DecodeError>> {
        futures::stream::unfold(self, |mut lines| async move {
            match lines.next_record().await {
                Ok(Some(record)) => Some((Ok(record), lines)),
                Ok(None) => None,
                Err(e) => Some((Err(e), lines)),
            }
        })
    }

    fn parse(&mut self, line_start: usize, line_end: usize) -> Result<Option<T>, DecodeError> {
        let res = parse_line(&self.buffer[line_start..line_end], self.line);
        if res.is_err() {
            self.failed = true;
        }
        res
    }

    fn compact(&mut self) {
        if self.start > 0 {
            self.buffer.drain(..self.start);
            self.scanned -= self.start;
            self.start = 0;
        }
    }
}

fn parse_line<T: DeserializeOwned>(bytes: &[u8], line: usize) -> Result<Option<T>, DecodeError> {
    let text = std::str::from_utf8(bytes).map_err(|e| DecodeError::MalformedRecord {
        line,
        raw: String::from_utf8_lossy(bytes).into_owned(),
        reason: format!("invalid utf-8: {e}"),
    })?;

    if text.trim().is_empty() {
        return Ok(None);
    }

    serde_json::from_str(text)
        .map(Some)
        .map_err(|e| DecodeError::MalformedRecord {
            line,
            raw: text.to_string(),
            reason: e.to_string(),
        })
}
