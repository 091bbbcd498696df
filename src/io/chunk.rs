//! Reusable chunk buffers, the bounded chunk pool, and byte feeds.

use anyhow::Result;
use crossbeam_channel::{bounded, Receiver, Sender};
use std::io::Read;
use std::sync::Arc;
use std::thread::JoinHandle;

use super::source::ByteSource;

/// Chunk buffer capacity.
pub const CHUNK_BUF_SIZE: usize = 1 << 20;

/// Chunks per pool. With 1 MiB chunks this bounds each side at 128 MiB.
pub const CHUNK_POOL_SIZE: usize = 128;

/// Block size used by the queued decompression feed.
pub const FEED_BLOCK_SIZE: usize = 1 << 18;

/// Queue depth of the queued decompression feed.
pub const FEED_QUEUE_DEPTH: usize = 16;

/// A fixed-capacity byte buffer holding a record-aligned slice of one
/// input file. `size` bytes are valid; the rest is scratch space reused
/// across refills.
#[derive(Debug)]
pub struct FastqChunk {
    pub data: Vec<u8>,
    pub size: usize,
}

impl FastqChunk {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            data: vec![0u8; capacity],
            size: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// The valid prefix of the buffer.
    pub fn bytes(&self) -> &[u8] {
        &self.data[..self.size]
    }

    /// Number of complete FASTQ records in the valid prefix.
    ///
    /// Chunk contents have the terminator before each cut stripped, so an
    /// unterminated final line is a real line.
    pub fn records(&self) -> usize {
        record_count(self.bytes())
    }
}

/// Count records in a record-aligned byte slice.
pub fn record_count(bytes: &[u8]) -> usize {
    if bytes.is_empty() {
        return 0;
    }
    let newlines = bytes.iter().filter(|&&b| b == b'\n').count();
    let lines = if bytes[bytes.len() - 1] == b'\n' {
        newlines
    } else {
        newlines + 1
    };
    lines / 4
}

/// Two record-aligned chunks, one per mate file, holding the same number
/// of records.
pub struct ChunkPair {
    pub left: FastqChunk,
    pub right: FastqChunk,
}

impl ChunkPair {
    pub fn is_balanced(&self) -> bool {
        self.left.records() == self.right.records()
    }
}

/// Bounded free-list of reusable chunks.
///
/// Backed by a pre-filled bounded channel: `acquire` blocks while every
/// chunk is checked out, which is what bounds memory when downstream
/// consumers fall behind. Handles are cheap to share (`Arc<ChunkPool>`)
/// and releases may come from any thread.
#[derive(Debug)]
pub struct ChunkPool {
    tx: Sender<FastqChunk>,
    rx: Receiver<FastqChunk>,
}

impl ChunkPool {
    pub fn new(chunks: usize, chunk_size: usize) -> Self {
        let (tx, rx) = bounded(chunks);
        for _ in 0..chunks {
            tx.send(FastqChunk::with_capacity(chunk_size))
                .expect("free-list channel sized to hold every chunk");
        }
        Self { tx, rx }
    }

    /// Borrow a chunk, blocking until one is free.
    pub fn acquire(&self) -> FastqChunk {
        self.rx
            .recv()
            .expect("chunk pool outlives every outstanding chunk")
    }

    /// Return a chunk to the free list.
    pub fn release(&self, mut chunk: FastqChunk) {
        chunk.size = 0;
        self.tx
            .send(chunk)
            .expect("free-list channel sized to hold every chunk");
    }

    /// Chunks currently sitting in the free list.
    pub fn available(&self) -> usize {
        self.rx.len()
    }
}

/// Byte delivery abstraction for chunk refills.
///
/// A short count means end of stream; implementations must fill `dst`
/// completely otherwise.
pub trait ByteFeed {
    fn read_bytes(&mut self, dst: &mut [u8]) -> Result<usize>;
}

/// Feed that reads straight from an underlying reader.
#[derive(Debug)]
pub struct DirectFeed<R> {
    src: R,
}

impl<R: Read> DirectFeed<R> {
    pub fn new(src: R) -> Self {
        Self { src }
    }

    pub fn get_ref(&self) -> &R {
        &self.src
    }
}

impl<R: Read> ByteFeed for DirectFeed<R> {
    fn read_bytes(&mut self, dst: &mut [u8]) -> Result<usize> {
        let mut filled = 0;
        while filled < dst.len() {
            let n = self.src.read(&mut dst[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        Ok(filled)
    }
}

/// Feed that drains `(buffer, len)` blocks produced by a decompression
/// thread over a bounded single-producer single-consumer channel,
/// carrying partially consumed blocks between calls.
pub struct QueuedFeed {
    rx: Receiver<Result<(Vec<u8>, usize)>>,
    pending: Option<(Vec<u8>, usize)>,
    consumed: usize,
    done: bool,
}

impl ByteFeed for QueuedFeed {
    fn read_bytes(&mut self, dst: &mut [u8]) -> Result<usize> {
        let mut filled = 0;
        while filled < dst.len() {
            if self.pending.is_none() {
                if self.done {
                    break;
                }
                match self.rx.recv() {
                    Ok(Ok(block)) => {
                        self.pending = Some(block);
                        self.consumed = 0;
                    }
                    Ok(Err(e)) => {
                        self.done = true;
                        return Err(e);
                    }
                    Err(_) => {
                        self.done = true;
                        break;
                    }
                }
            }

            let (block, len) = self
                .pending
                .as_ref()
                .expect("pending block was just installed");
            let len = *len;
            let take = (len - self.consumed).min(dst.len() - filled);
            dst[filled..filled + take]
                .copy_from_slice(&block[self.consumed..self.consumed + take]);
            filled += take;
            self.consumed += take;
            if self.consumed == len {
                self.pending = None;
            }
        }
        Ok(filled)
    }
}

/// Spawn a decompression thread reading `src` into a bounded queue and
/// return the consuming feed. Errors travel in-band through the queue, so
/// a gzip decode failure surfaces from the next `read_bytes` call.
pub fn spawn_feed(mut src: ByteSource) -> (QueuedFeed, JoinHandle<()>) {
    let (tx, rx) = bounded::<Result<(Vec<u8>, usize)>>(FEED_QUEUE_DEPTH);
    let handle = std::thread::spawn(move || {
        loop {
            let mut block = vec![0u8; FEED_BLOCK_SIZE];
            let mut filled = 0;
            while filled < block.len() {
                match src.read(&mut block[filled..]) {
                    Ok(0) => break,
                    Ok(n) => filled += n,
                    Err(e) => {
                        let _ = tx.send(Err(e.into()));
                        return;
                    }
                }
            }
            if filled == 0 {
                break;
            }
            let short = filled < block.len();
            if tx.send(Ok((block, filled))).is_err() {
                break;
            }
            if short {
                break;
            }
        }
    });
    (
        QueuedFeed {
            rx,
            pending: None,
            consumed: 0,
            done: false,
        },
        handle,
    )
}

/// Per-file chunk provider: a pool of reusable buffers plus a byte feed.
#[derive(Debug)]
pub struct ChunkSource<F> {
    pool: Arc<ChunkPool>,
    feed: F,
}

impl<F: ByteFeed> ChunkSource<F> {
    pub fn new(pool: Arc<ChunkPool>, feed: F) -> Self {
        Self { pool, feed }
    }

    pub fn acquire_chunk(&self) -> FastqChunk {
        self.pool.acquire()
    }

    pub fn read_bytes(&mut self, dst: &mut [u8]) -> Result<usize> {
        self.feed.read_bytes(dst)
    }

    pub fn release(&self, chunk: FastqChunk) {
        self.pool.release(chunk);
    }

    pub fn pool(&self) -> &Arc<ChunkPool> {
        &self.pool
    }

    pub fn feed(&self) -> &F {
        &self.feed
    }
}
