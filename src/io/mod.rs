//! Input layer: byte sources, line/record readers, and paired chunk
//! streaming.

pub mod chunk;
pub mod fastq;
pub mod line;
pub mod pair;
pub mod source;

use anyhow::Result;
use std::path::Path;

pub use chunk::{
    record_count, ByteFeed, ChunkPair, ChunkPool, ChunkSource, DirectFeed, FastqChunk,
    QueuedFeed, CHUNK_BUF_SIZE, CHUNK_POOL_SIZE,
};
pub use fastq::{FastqReader, FastqRecord, PairedFastqReader};
pub use line::LineReader;
pub use pair::{PairedChunkReader, CHUNK_TAIL_RESERVE};
pub use source::{is_fastq_path, is_gzipped_fastq_path, ByteSource};

/// Open two mate files for record-aligned chunk streaming.
pub fn open_pair(
    left_path: &Path,
    right_path: &Path,
    has_quality: bool,
    phred64: bool,
    interleaved: bool,
) -> Result<PairedChunkReader<DirectFeed<ByteSource>>> {
    PairedChunkReader::open(left_path, right_path, has_quality, phred64, interleaved)
}

/// Open one file for record-at-a-time reading.
pub fn open_single(
    path: &Path,
    has_quality: bool,
    phred64: bool,
) -> Result<FastqReader<ByteSource>> {
    FastqReader::open(path, has_quality, phred64)
}
