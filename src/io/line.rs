//! Line reader over a byte source, with a fixed refill buffer.

use anyhow::Result;
use std::io::Read;

/// Refill buffer size. Lines longer than this are assembled across refills.
pub const LINE_BUF_SIZE: usize = 1 << 20;

/// Emits lines with their terminators (`\n`, `\r`, `\r\n`) stripped.
///
/// The reader pulls the source through a fixed buffer and tracks
/// `(data_len, used_len)` over it; a refill happens once every buffered
/// byte has been consumed. A short refill marks the end of the stream, so
/// the source must only return short counts at EOF (all readers in this
/// crate do).
pub struct LineReader<R> {
    src: R,
    buf: Vec<u8>,
    data_len: usize,
    used_len: usize,
    src_eof: bool,
    no_line_break_at_end: bool,
}

impl<R: Read> LineReader<R> {
    pub fn new(src: R) -> Self {
        Self::with_capacity(src, LINE_BUF_SIZE)
    }

    pub fn with_capacity(src: R, capacity: usize) -> Self {
        Self {
            src,
            buf: vec![0u8; capacity],
            data_len: 0,
            used_len: 0,
            src_eof: false,
            no_line_break_at_end: false,
        }
    }

    pub fn get_ref(&self) -> &R {
        &self.src
    }

    /// True when the final line of the input had no terminator.
    pub fn no_line_break_at_end(&self) -> bool {
        self.no_line_break_at_end
    }

    fn refill(&mut self) -> Result<()> {
        let mut filled = 0;
        while filled < self.buf.len() {
            let n = self.src.read(&mut self.buf[filled..])?;
            if n == 0 {
                self.src_eof = true;
                break;
            }
            filled += n;
        }
        self.data_len = filled;
        self.used_len = 0;
        if filled < self.buf.len() && filled > 0 && self.buf[filled - 1] != b'\n' {
            self.no_line_break_at_end = true;
        }
        Ok(())
    }

    /// Scan from `used_len` to the next terminator or end of buffered data.
    fn scan_line_end(&self, start: usize) -> usize {
        let mut end = start;
        while end < self.data_len && self.buf[end] != b'\n' && self.buf[end] != b'\r' {
            end += 1;
        }
        end
    }

    /// Advance `used_len` past the terminator at `end`.
    fn consume_terminator(&mut self, end: usize) {
        let mut pos = end;
        if pos < self.data_len && self.buf[pos] == b'\r' {
            pos += 1;
            if pos < self.data_len && self.buf[pos] == b'\n' {
                pos += 1;
            }
        } else {
            pos += 1;
        }
        self.used_len = pos;
    }

    /// Next line without its terminator, or `None` at end of stream.
    pub fn next_line(&mut self) -> Result<Option<Vec<u8>>> {
        if self.used_len >= self.data_len {
            if self.src_eof {
                return Ok(None);
            }
            self.refill()?;
            if self.data_len == 0 {
                return Ok(None);
            }
        }

        let start = self.used_len;
        let end = self.scan_line_end(start);

        if end < self.data_len || self.src_eof {
            // Line fully buffered, or this is the final refill.
            let line = self.buf[start..end].to_vec();
            self.consume_terminator(end);
            return Ok(Some(line));
        }

        // The line continues past the buffer; accumulate across refills.
        let mut line = self.buf[start..self.data_len].to_vec();
        loop {
            self.refill()?;
            if self.data_len == 0 {
                return Ok(Some(line));
            }
            let end = self.scan_line_end(0);
            line.extend_from_slice(&self.buf[..end]);
            if end < self.data_len || self.src_eof {
                self.consume_terminator(end);
                return Ok(Some(line));
            }
            self.used_len = self.data_len;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn lines_of(data: &[u8], capacity: usize) -> (Vec<Vec<u8>>, bool) {
        let mut reader = LineReader::with_capacity(Cursor::new(data.to_vec()), capacity);
        let mut out = Vec::new();
        while let Some(line) = reader.next_line().unwrap() {
            out.push(line);
        }
        (out, reader.no_line_break_at_end())
    }

    #[test]
    fn test_basic_lines() {
        let (lines, no_break) = lines_of(b"abc\ndef\nghi\n", 64);
        assert_eq!(lines, vec![b"abc".to_vec(), b"def".to_vec(), b"ghi".to_vec()]);
        assert!(!no_break);
    }

    #[test]
    fn test_crlf_and_bare_cr() {
        let (lines, _) = lines_of(b"abc\r\ndef\rghi\r\n", 64);
        assert_eq!(lines, vec![b"abc".to_vec(), b"def".to_vec(), b"ghi".to_vec()]);
    }

    #[test]
    fn test_missing_final_terminator() {
        let (lines, no_break) = lines_of(b"abc\ndef", 64);
        assert_eq!(lines, vec![b"abc".to_vec(), b"def".to_vec()]);
        assert!(no_break);
    }

    #[test]
    fn test_line_longer_than_buffer() {
        let long = vec![b'x'; 100];
        let mut data = long.clone();
        data.push(b'\n');
        data.extend_from_slice(b"tail\n");
        let (lines, _) = lines_of(&data, 16);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], long);
        assert_eq!(lines[1], b"tail".to_vec());
    }

    #[test]
    fn test_empty_input() {
        let (lines, no_break) = lines_of(b"", 64);
        assert!(lines.is_empty());
        assert!(!no_break);
    }

    #[test]
    fn test_empty_lines_preserved() {
        let (lines, _) = lines_of(b"a\n\nb\n", 64);
        assert_eq!(lines, vec![b"a".to_vec(), b"".to_vec(), b"b".to_vec()]);
    }
}
