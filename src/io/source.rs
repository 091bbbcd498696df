//! Byte-level input: plain files, gzip-compressed files, and stdin.

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

/// Recognized uncompressed suffixes.
const FASTQ_SUFFIXES: [&str; 4] = [".fastq", ".fq", ".fasta", ".fa"];

/// Recognized gzip-compressed suffixes.
const FASTQ_GZ_SUFFIXES: [&str; 4] = [".fastq.gz", ".fq.gz", ".fasta.gz", ".fa.gz"];

/// Returns true for an uncompressed FASTQ/FASTA path.
pub fn is_fastq_path(path: &Path) -> bool {
    let name = path.to_string_lossy();
    FASTQ_SUFFIXES.iter().any(|s| name.ends_with(s))
}

/// Returns true for a gzip-compressed FASTQ/FASTA path.
pub fn is_gzipped_fastq_path(path: &Path) -> bool {
    let name = path.to_string_lossy();
    FASTQ_GZ_SUFFIXES.iter().any(|s| name.ends_with(s))
}

fn is_stdin_path(path: &Path) -> bool {
    let name = path.to_string_lossy();
    name == "/dev/stdin" || name == "-"
}

/// Reader wrapper that counts bytes pulled through it.
///
/// Placed under the gzip decoder so the count reflects compressed file
/// offsets, the number a progress bar over the on-disk file needs.
#[derive(Debug)]
pub struct CountingReader<R> {
    inner: R,
    count: u64,
}

impl<R> CountingReader<R> {
    fn new(inner: R) -> Self {
        Self { inner, count: 0 }
    }

    pub fn bytes_read(&self) -> u64 {
        self.count
    }
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.count += n as u64;
        Ok(n)
    }
}

#[derive(Debug)]
enum Input {
    Plain(CountingReader<BufReader<File>>),
    Gzipped(GzDecoder<CountingReader<BufReader<File>>>),
    Stdin(CountingReader<BufReader<std::io::Stdin>>),
}

/// Decompressed byte stream over one input path.
///
/// Compression is decided by the path suffix (`.gz`), the convention
/// sequencing pipelines use when naming their outputs; the literal paths
/// `/dev/stdin` and `-` select standard input. A gzip decode error is
/// fatal and surfaces from `read`.
#[derive(Debug)]
pub struct ByteSource {
    input: Input,
    total: Option<u64>,
    at_eof: bool,
}

impl ByteSource {
    pub fn open(path: &Path) -> Result<ByteSource> {
        if is_stdin_path(path) {
            let reader = CountingReader::new(BufReader::new(std::io::stdin()));
            return Ok(ByteSource {
                input: Input::Stdin(reader),
                total: None,
                at_eof: false,
            });
        }

        let file = File::open(path)
            .with_context(|| format!("Failed to open file: {}", path.display()))?;
        let total = file.metadata().ok().map(|m| m.len());
        let reader = CountingReader::new(BufReader::new(file));

        let input = if path.to_string_lossy().ends_with(".gz") {
            Input::Gzipped(GzDecoder::new(reader))
        } else {
            Input::Plain(reader)
        };

        Ok(ByteSource {
            input,
            total,
            at_eof: false,
        })
    }

    /// True once a read has observed the end of the stream.
    pub fn eof(&self) -> bool {
        self.at_eof
    }

    /// `(bytes_consumed, total_bytes)` for progress reporting. The consumed
    /// count is the compressed offset for gzip input; the total is `None`
    /// when reading from stdin.
    pub fn position(&self) -> (u64, Option<u64>) {
        let consumed = match &self.input {
            Input::Plain(r) => r.bytes_read(),
            Input::Gzipped(r) => r.get_ref().bytes_read(),
            Input::Stdin(r) => r.bytes_read(),
        };
        (consumed, self.total)
    }
}

impl Read for ByteSource {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = match &mut self.input {
            Input::Plain(r) => r.read(buf)?,
            Input::Gzipped(r) => r.read(buf)?,
            Input::Stdin(r) => r.read(buf)?,
        };
        if n == 0 {
            self.at_eof = true;
        }
        Ok(n)
    }
}
