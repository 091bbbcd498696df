//! Paired chunk streaming: record-aligned chunk pairs from two mate files.
//!
//! Each call to `next_chunk_pair` refills one chunk per side, finds a cut
//! point in each that lands on a record boundary, then re-balances the two
//! cuts so both chunks hold the same number of records. Bytes between the
//! chosen cut and the true end of a refill are carried into a per-side
//! swap buffer and prepended to the next refill, so the chunk sequence
//! covers each file without gaps.

use anyhow::{bail, Result};
use std::path::Path;
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::warn;

use super::chunk::{
    spawn_feed, ByteFeed, ChunkPair, ChunkPool, ChunkSource, DirectFeed, FastqChunk, QueuedFeed,
    CHUNK_BUF_SIZE, CHUNK_POOL_SIZE,
};
use super::source::ByteSource;

/// Tail reserved at the end of each full refill so the record-boundary
/// probe always has a complete `@name / sequence / +` run ahead of it.
pub const CHUNK_TAIL_RESERVE: usize = 1 << 10;

/// Carry-over state for one side.
#[derive(Debug)]
struct SideState {
    swap: Vec<u8>,
    fill: usize,
}

/// Outcome of one side's refill.
struct SideFill {
    chunk: FastqChunk,
    /// Valid bytes in the chunk buffer (carry-over plus bytes read).
    end: usize,
    /// This side's stream is exhausted; `end` bytes are all that remain.
    at_eof: bool,
}

/// Streaming splitter over two mate files.
///
/// Single-threaded; each call performs one refill per side. Consumers may
/// run on other threads and hand chunks back through cloned pool handles
/// (`pools`) or through `release`.
#[derive(Debug)]
pub struct PairedChunkReader<F> {
    left: ChunkSource<F>,
    right: ChunkSource<F>,
    side_left: SideState,
    side_right: SideState,
    tail_reserve: usize,
    uses_crlf: bool,
    finished: bool,
    has_quality: bool,
    phred64: bool,
}

impl PairedChunkReader<DirectFeed<ByteSource>> {
    /// Open a mate pair for chunk streaming. Chunk-level interleaved input
    /// is not supported; use the record-level interleaved reader instead.
    pub fn open(
        left_path: &Path,
        right_path: &Path,
        has_quality: bool,
        phred64: bool,
        interleaved: bool,
    ) -> Result<Self> {
        if interleaved {
            bail!("interleaved chunk input is not supported");
        }
        let left = DirectFeed::new(ByteSource::open(left_path)?);
        let right = DirectFeed::new(ByteSource::open(right_path)?);
        Ok(Self::with_feeds(
            left,
            right,
            CHUNK_POOL_SIZE,
            CHUNK_BUF_SIZE,
            CHUNK_TAIL_RESERVE,
            has_quality,
            phred64,
        ))
    }

    /// Per-side `(bytes_consumed, total_bytes)` for progress reporting.
    pub fn progress(&self) -> ((u64, Option<u64>), (u64, Option<u64>)) {
        (
            self.left.feed().get_ref().position(),
            self.right.feed().get_ref().position(),
        )
    }
}

impl PairedChunkReader<QueuedFeed> {
    /// Open a mate pair with decompression running on dedicated threads,
    /// each feeding a bounded queue. Join the returned handles after the
    /// stream is drained.
    pub fn open_pipelined(
        left_path: &Path,
        right_path: &Path,
        has_quality: bool,
        phred64: bool,
    ) -> Result<(Self, Vec<JoinHandle<()>>)> {
        let (left, left_handle) = spawn_feed(ByteSource::open(left_path)?);
        let (right, right_handle) = spawn_feed(ByteSource::open(right_path)?);
        Ok((
            Self::with_feeds(
                left,
                right,
                CHUNK_POOL_SIZE,
                CHUNK_BUF_SIZE,
                CHUNK_TAIL_RESERVE,
                has_quality,
                phred64,
            ),
            vec![left_handle, right_handle],
        ))
    }
}

impl<F: ByteFeed> PairedChunkReader<F> {
    pub fn with_feeds(
        left_feed: F,
        right_feed: F,
        pool_chunks: usize,
        chunk_size: usize,
        tail_reserve: usize,
        has_quality: bool,
        phred64: bool,
    ) -> Self {
        assert!(tail_reserve < chunk_size);
        let left_pool = Arc::new(ChunkPool::new(pool_chunks, chunk_size));
        let right_pool = Arc::new(ChunkPool::new(pool_chunks, chunk_size));
        Self {
            left: ChunkSource::new(left_pool, left_feed),
            right: ChunkSource::new(right_pool, right_feed),
            side_left: SideState {
                swap: vec![0u8; chunk_size],
                fill: 0,
            },
            side_right: SideState {
                swap: vec![0u8; chunk_size],
                fill: 0,
            },
            tail_reserve,
            uses_crlf: false,
            finished: false,
            has_quality,
            phred64,
        }
    }

    pub fn has_quality(&self) -> bool {
        self.has_quality
    }

    pub fn phred64(&self) -> bool {
        self.phred64
    }

    /// True once a `\r\n` terminator has been observed on either side.
    pub fn uses_crlf(&self) -> bool {
        self.uses_crlf
    }

    /// Cloned pool handles, for consumers releasing from other threads.
    pub fn pools(&self) -> (Arc<ChunkPool>, Arc<ChunkPool>) {
        (Arc::clone(self.left.pool()), Arc::clone(self.right.pool()))
    }

    /// Return both chunks of a consumed pair to their pools.
    pub fn release(&self, pair: ChunkPair) {
        self.left.release(pair.left);
        self.right.release(pair.right);
    }

    /// Next record-balanced chunk pair, or `None` once either stream can
    /// no longer contribute a pair.
    pub fn next_chunk_pair(&mut self) -> Result<Option<ChunkPair>> {
        if self.finished {
            return Ok(None);
        }

        let left_fill = refill_side(&mut self.left, &mut self.side_left)?;
        let right_fill = match refill_side(&mut self.right, &mut self.side_right) {
            Ok(fill) => fill,
            Err(e) => {
                self.left.release(left_fill.chunk);
                return Err(e);
            }
        };

        if (left_fill.at_eof && left_fill.end == 0)
            || (right_fill.at_eof && right_fill.end == 0)
        {
            self.left.release(left_fill.chunk);
            self.right.release(right_fill.chunk);
            self.finished = true;
            return Ok(None);
        }

        let cuts = self
            .cut_point(&left_fill)
            .and_then(|l| self.cut_point(&right_fill).map(|r| (l, r)));
        let (cut_left, cut_right) = match cuts {
            Ok(cuts) => cuts,
            Err(e) => {
                self.left.release(left_fill.chunk);
                self.right.release(right_fill.chunk);
                return Err(e);
            }
        };

        let (cut_left, cut_right) =
            balance(&left_fill, cut_left, &right_fill, cut_right);

        if left_fill.at_eof && right_fill.at_eof {
            self.finished = true;
        }

        let left = finish_side(&mut self.side_left, left_fill, cut_left, self.uses_crlf);
        let right = finish_side(&mut self.side_right, right_fill, cut_right, self.uses_crlf);
        Ok(Some(ChunkPair { left, right }))
    }

    /// Candidate cut for one side: the end of the data at EOF, otherwise
    /// the first record start inside the reserved tail.
    fn cut_point(&mut self, fill: &SideFill) -> Result<usize> {
        if fill.at_eof {
            Ok(fill.end)
        } else {
            let data = &fill.chunk.data[..fill.end];
            let start = fill.end - self.tail_reserve;
            self.next_record_start(data, start)
        }
    }

    /// Advance `pos` to the terminator ending the current line, latching
    /// the CRLF convention the first time `\r\n` is seen.
    fn skip_to_eol(&mut self, data: &[u8], pos: &mut usize) -> Result<()> {
        while *pos < data.len() && data[*pos] != b'\n' && data[*pos] != b'\r' {
            *pos += 1;
        }
        if *pos >= data.len() {
            bail!("ran out of buffered data while scanning for a line break");
        }
        if data[*pos] == b'\r' && *pos + 1 < data.len() && data[*pos + 1] == b'\n' {
            self.uses_crlf = true;
            *pos += 1;
        }
        Ok(())
    }

    /// Find the start of the next record at or after `pos`.
    ///
    /// An `@` at the start of a line is ambiguous: it may open a name line
    /// or be the first character of a quality string. The probe reads the
    /// line after the candidate: another `@`-initial line means the
    /// candidate was a quality line and that next line is the real name;
    /// otherwise the line after next must be the `+` separator of the
    /// candidate's own record.
    fn next_record_start(&mut self, data: &[u8], mut pos: usize) -> Result<usize> {
        self.skip_to_eol(data, &mut pos)?;
        pos += 1;
        loop {
            match data.get(pos) {
                Some(&b'@') => break,
                Some(_) => {
                    self.skip_to_eol(data, &mut pos)?;
                    pos += 1;
                }
                None => bail!("no record start found before the end of the buffer"),
            }
        }
        let mark = pos;

        self.skip_to_eol(data, &mut pos)?;
        pos += 1;
        if data.get(pos) == Some(&b'@') {
            return Ok(pos);
        }

        self.skip_to_eol(data, &mut pos)?;
        pos += 1;
        match data.get(pos) {
            Some(&b'+') => Ok(mark),
            _ => bail!(
                "malformed record structure while probing for a boundary near byte {}",
                mark
            ),
        }
    }
}

/// Refill one side: carry-over first, then stream bytes into the rest of
/// the buffer. A short read marks the side's stream as exhausted; when the
/// carry-over alone fills the buffer nothing is read at all.
fn refill_side<F: ByteFeed>(
    source: &mut ChunkSource<F>,
    side: &mut SideState,
) -> Result<SideFill> {
    let mut chunk = source.acquire_chunk();
    let capacity = chunk.capacity();

    let mut end = 0;
    if side.fill > 0 {
        chunk.data[..side.fill].copy_from_slice(&side.swap[..side.fill]);
        end = side.fill;
        side.fill = 0;
    }

    let to_read = capacity - end;
    let (read, at_eof) = if to_read == 0 {
        (0, false)
    } else {
        match source.read_bytes(&mut chunk.data[end..]) {
            Ok(n) => (n, n < to_read),
            Err(e) => {
                source.release(chunk);
                return Err(e);
            }
        }
    };
    end += read;

    Ok(SideFill { chunk, end, at_eof })
}

/// Lines before `cut`, counting an unterminated final line at EOF.
fn effective_lines(fill: &SideFill, cut: usize) -> usize {
    let data = &fill.chunk.data[..cut];
    let newlines = data.iter().filter(|&&b| b == b'\n').count();
    if fill.at_eof && cut > 0 && data[cut - 1] != b'\n' {
        newlines + 1
    } else {
        newlines
    }
}

/// Equalize line counts on both sides of a pair by walking the cut of the
/// side with surplus lines backward. Since every record is exactly four
/// lines and both cuts sit on line boundaries, equal line counts mean
/// equal record counts.
fn balance(
    left: &SideFill,
    cut_left: usize,
    right: &SideFill,
    cut_right: usize,
) -> (usize, usize) {
    let lines_left = effective_lines(left, cut_left);
    let lines_right = effective_lines(right, cut_right);

    let (cut_left, cut_right) = if lines_left > lines_right {
        let cut = retreat(
            &left.chunk.data[..cut_left],
            lines_left - lines_right,
            unterminated_at(left, cut_left),
        );
        (cut.unwrap_or(cut_left), cut_right)
    } else if lines_right > lines_left {
        let cut = retreat(
            &right.chunk.data[..cut_right],
            lines_right - lines_left,
            unterminated_at(right, cut_right),
        );
        (cut_left, cut.unwrap_or(cut_right))
    } else {
        (cut_left, cut_right)
    };

    let check_left = effective_lines(left, cut_left);
    let check_right = effective_lines(right, cut_right);
    if check_left != check_right {
        warn!(
            left_lines = check_left,
            right_lines = check_right,
            "chunk pair still unbalanced after re-sync"
        );
    }
    (cut_left, cut_right)
}

fn unterminated_at(fill: &SideFill, cut: usize) -> bool {
    fill.at_eof && cut > 0 && fill.chunk.data[cut - 1] != b'\n'
}

/// Walk backward from the end of `data` until `surplus` complete lines
/// have been dropped, returning a cut just after a newline. `None` when
/// the buffer runs out of newlines first.
fn retreat(data: &[u8], surplus: usize, unterminated: bool) -> Option<usize> {
    // Dropping `surplus` lines means stopping at the (surplus + 1)-th
    // newline back from the cut, one fewer when the final line has no
    // terminator.
    let stop = surplus + 1 - (unterminated as usize);
    let mut seen = 0;
    let mut pos = data.len();
    while pos > 0 {
        pos -= 1;
        if data[pos] == b'\n' {
            seen += 1;
            if seen == stop {
                return Some(pos + 1);
            }
        }
    }
    warn!(surplus, "re-sync walked past the start of the buffer");
    None
}

/// Fix the chunk's final size (stripping the terminator just before the
/// cut, when present) and carry the bytes past the cut into the side's
/// swap buffer.
fn finish_side(
    side: &mut SideState,
    fill: SideFill,
    cut: usize,
    uses_crlf: bool,
) -> FastqChunk {
    let mut chunk = fill.chunk;

    let mut size = cut;
    if size > 0 && chunk.data[size - 1] == b'\n' {
        size -= 1;
        if uses_crlf && size > 0 && chunk.data[size - 1] == b'\r' {
            size -= 1;
        }
    }
    chunk.size = size;

    let tail = fill.end - cut;
    if tail > 0 {
        side.swap[..tail].copy_from_slice(&chunk.data[cut..fill.end]);
    }
    side.fill = tail;

    chunk
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const TEST_POOL: usize = 8;
    const TEST_CHUNK: usize = 512;
    const TEST_RESERVE: usize = 160;

    fn record(prefix: &str, index: usize, seq_len: usize, quality_at: bool) -> String {
        let seq: String = "ACGT".chars().cycle().take(seq_len).collect();
        let mut qual: String = "I".repeat(seq_len);
        if quality_at {
            qual.replace_range(0..1, "@");
        }
        format!("@{prefix}{index:04}\n{seq}\n+\n{qual}\n")
    }

    fn make_side(prefix: &str, count: usize, seq_len: usize, quality_at: bool) -> Vec<u8> {
        (0..count)
            .map(|i| record(prefix, i, seq_len, quality_at))
            .collect::<String>()
            .into_bytes()
    }

    fn reader_over(
        left: Vec<u8>,
        right: Vec<u8>,
    ) -> PairedChunkReader<DirectFeed<Cursor<Vec<u8>>>> {
        PairedChunkReader::with_feeds(
            DirectFeed::new(Cursor::new(left)),
            DirectFeed::new(Cursor::new(right)),
            TEST_POOL,
            TEST_CHUNK,
            TEST_RESERVE,
            true,
            false,
        )
    }

    /// Drain the reader, asserting per-pair balance, and return the
    /// reassembled bytes and total record count per side.
    fn drain(
        reader: &mut PairedChunkReader<DirectFeed<Cursor<Vec<u8>>>>,
        terminator: &str,
    ) -> ((Vec<u8>, Vec<u8>), (usize, usize)) {
        let mut left_bytes = Vec::new();
        let mut right_bytes = Vec::new();
        let mut left_records = 0;
        let mut right_records = 0;

        while let Some(pair) = reader.next_chunk_pair().unwrap() {
            assert!(
                pair.is_balanced(),
                "unbalanced pair: {} vs {}",
                pair.left.records(),
                pair.right.records()
            );
            assert!(!pair.left.bytes().is_empty());
            assert_eq!(pair.left.bytes()[0], b'@');
            assert_eq!(pair.right.bytes()[0], b'@');

            left_records += pair.left.records();
            right_records += pair.right.records();
            left_bytes.extend_from_slice(pair.left.bytes());
            left_bytes.extend_from_slice(terminator.as_bytes());
            right_bytes.extend_from_slice(pair.right.bytes());
            right_bytes.extend_from_slice(terminator.as_bytes());
            reader.release(pair);
        }
        assert!(reader.next_chunk_pair().unwrap().is_none());

        ((left_bytes, right_bytes), (left_records, right_records))
    }

    #[test]
    fn test_single_pair_round_trip() {
        let left = make_side("L", 5, 20, false);
        let right = make_side("R", 5, 20, false);
        let mut reader = reader_over(left.clone(), right.clone());

        let ((l, r), (lr, rr)) = drain(&mut reader, "\n");
        assert_eq!(l, left);
        assert_eq!(r, right);
        assert_eq!(lr, 5);
        assert_eq!(rr, 5);
    }

    #[test]
    fn test_multi_chunk_reassembly_with_resync() {
        // Different record lengths per side force the natural cut points
        // to hold different record counts, so every pair re-balances.
        let left = make_side("L", 60, 30, false);
        let right = make_side("R", 60, 12, false);
        let mut reader = reader_over(left.clone(), right.clone());

        let ((l, r), (lr, rr)) = drain(&mut reader, "\n");
        assert_eq!(l, left);
        assert_eq!(r, right);
        assert_eq!(lr, 60);
        assert_eq!(rr, 60);
    }

    #[test]
    fn test_quality_starting_with_at_not_split() {
        // Every quality string opens with '@'; the boundary probe must
        // still put every cut on a name line.
        let left = make_side("L", 50, 24, true);
        let right = make_side("R", 50, 24, true);
        let mut reader = reader_over(left.clone(), right.clone());

        let mut pairs = 0;
        let mut total = 0;
        while let Some(pair) = reader.next_chunk_pair().unwrap() {
            assert!(pair.is_balanced());
            // A cut placed on a quality line would make the chunk open
            // with '@' followed by quality characters instead of a name.
            assert!(pair.left.bytes().starts_with(b"@L"));
            assert!(pair.right.bytes().starts_with(b"@R"));
            total += pair.left.records();
            pairs += 1;
            reader.release(pair);
        }
        assert!(pairs > 1, "input must span several chunks");
        assert_eq!(total, 50);
    }

    #[test]
    fn test_shorter_side_truncates_stream() {
        let left = make_side("L", 12, 20, false);
        let right = make_side("R", 9, 20, false);
        let mut reader = reader_over(left, right);

        let (_, (lr, rr)) = drain(&mut reader, "\n");
        assert_eq!(lr, 9, "left must truncate to the shared prefix");
        assert_eq!(rr, 9);
    }

    #[test]
    fn test_crlf_terminators() {
        let to_crlf = |v: Vec<u8>| {
            String::from_utf8(v).unwrap().replace('\n', "\r\n").into_bytes()
        };
        let left = to_crlf(make_side("L", 40, 20, false));
        let right = to_crlf(make_side("R", 40, 20, false));
        let mut reader = reader_over(left.clone(), right.clone());

        let ((l, r), (lr, rr)) = drain(&mut reader, "\r\n");
        assert!(reader.uses_crlf());
        assert_eq!(l, left);
        assert_eq!(r, right);
        assert_eq!(lr, 40);
        assert_eq!(rr, 40);
    }

    #[test]
    fn test_no_final_newline_keeps_last_byte() {
        let mut left = make_side("L", 5, 20, false);
        let mut right = make_side("R", 5, 20, false);
        left.pop();
        right.pop();
        let mut reader = reader_over(left.clone(), right.clone());

        let pair = reader.next_chunk_pair().unwrap().unwrap();
        assert_eq!(pair.left.bytes(), &left[..]);
        assert_eq!(pair.right.bytes(), &right[..]);
        assert_eq!(pair.left.records(), 5);
        reader.release(pair);
        assert!(reader.next_chunk_pair().unwrap().is_none());
    }

    #[test]
    fn test_empty_side_yields_nothing() {
        let left = make_side("L", 3, 20, false);
        let mut reader = reader_over(left, Vec::new());
        assert!(reader.next_chunk_pair().unwrap().is_none());
        assert!(reader.next_chunk_pair().unwrap().is_none());
    }

    #[test]
    fn test_pool_closure_after_drain() {
        // Small enough that every pair fits in the pool while held.
        let left = make_side("L", 15, 30, false);
        let right = make_side("R", 15, 12, false);
        let mut reader = reader_over(left, right);

        let mut pairs = Vec::new();
        while let Some(pair) = reader.next_chunk_pair().unwrap() {
            pairs.push(pair);
        }
        assert!(pairs.len() > 1, "input must span several chunks");
        assert!(pairs.len() < TEST_POOL);
        let (left_pool, right_pool) = reader.pools();
        assert_eq!(left_pool.available(), TEST_POOL - pairs.len());
        for pair in pairs {
            reader.release(pair);
        }
        assert_eq!(left_pool.available(), TEST_POOL);
        assert_eq!(right_pool.available(), TEST_POOL);
    }

    #[test]
    fn test_drain_continues_from_carry_over() {
        // The left file ends inside the first refill round while the right
        // side keeps reading; left's surplus records must survive in its
        // swap buffer and pair up on later calls rather than being lost.
        let left = make_side("L", 20, 12, false);
        let right = make_side("R", 20, 40, false);
        let mut reader = reader_over(left.clone(), right.clone());

        let ((l, r), (lr, rr)) = drain(&mut reader, "\n");
        assert_eq!(l, left);
        assert_eq!(r, right);
        assert_eq!(lr, 20);
        assert_eq!(rr, 20);
    }
}
