//! FASTQ record parsing over the line reader.

use anyhow::Result;
use std::io::Read;
use std::path::Path;
use tracing::warn;

use super::line::LineReader;
use super::source::ByteSource;

/// A single FASTQ record with byte-oriented fields.
///
/// Fields are stored as `Vec<u8>` rather than `String` because FASTQ data
/// is ASCII and downstream consumers (trimmers, aligners, counters) work on
/// raw bytes. This avoids UTF-8 validation when records come out of
/// decompressed byte streams.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FastqRecord {
    pub name: Vec<u8>,
    pub sequence: Vec<u8>,
    pub strand: Vec<u8>,
    pub quality: Vec<u8>,
    /// Quality encoding hint carried through to downstream consumers; the
    /// reader itself never interprets quality values.
    pub phred64: bool,
}

/// Streaming single-file record reader.
///
/// Reads four-line FASTQ records, tolerating leading junk before the first
/// `@` name line. When the source is declared quality-free (`has_quality ==
/// false`, three-line records), quality is synthesized as `K` repeated to
/// the sequence length.
pub struct FastqReader<R> {
    lines: LineReader<R>,
    has_quality: bool,
    phred64: bool,
}

impl FastqReader<ByteSource> {
    pub fn open(path: &Path, has_quality: bool, phred64: bool) -> Result<Self> {
        let src = ByteSource::open(path)?;
        Ok(Self::new(src, has_quality, phred64))
    }

    /// `(bytes_consumed, total_bytes)` of the underlying file, for
    /// progress reporting.
    pub fn position(&self) -> (u64, Option<u64>) {
        self.lines.get_ref().position()
    }
}

impl<R: Read> FastqReader<R> {
    pub fn new(src: R, has_quality: bool, phred64: bool) -> Self {
        Self {
            lines: LineReader::new(src),
            has_quality,
            phred64,
        }
    }

    /// True when the final line of the input had no terminator.
    pub fn no_line_break_at_end(&self) -> bool {
        self.lines.no_line_break_at_end()
    }

    /// Next record, or `None` at end of stream.
    ///
    /// A quality/sequence length mismatch is reported on the diagnostic
    /// stream and ends the stream, matching how truncated files are
    /// treated.
    pub fn next_record(&mut self) -> Result<Option<FastqRecord>> {
        let name = loop {
            match self.lines.next_line()? {
                None => return Ok(None),
                Some(line) if line.first() == Some(&b'@') => break line,
                Some(_) => continue,
            }
        };

        let sequence = match self.lines.next_line()? {
            Some(line) => line,
            None => return Ok(None),
        };
        let strand = match self.lines.next_line()? {
            Some(line) => line,
            None => return Ok(None),
        };

        let quality = if self.has_quality {
            match self.lines.next_line()? {
                Some(line) => line,
                None => return Ok(None),
            }
        } else {
            vec![b'K'; sequence.len()]
        };

        if quality.len() != sequence.len() {
            warn!(
                name = %String::from_utf8_lossy(&name),
                sequence_len = sequence.len(),
                quality_len = quality.len(),
                "sequence and quality have different length"
            );
            return Ok(None);
        }

        Ok(Some(FastqRecord {
            name,
            sequence,
            strand,
            quality,
            phred64: self.phred64,
        }))
    }
}

/// Record-level paired reader over two mate files, or over one interleaved
/// file (mates alternate within a single stream).
pub struct PairedFastqReader<R> {
    left: FastqReader<R>,
    right: Option<FastqReader<R>>,
}

impl PairedFastqReader<ByteSource> {
    pub fn open(
        left_path: &Path,
        right_path: &Path,
        has_quality: bool,
        phred64: bool,
    ) -> Result<Self> {
        Ok(Self {
            left: FastqReader::open(left_path, has_quality, phred64)?,
            right: Some(FastqReader::open(right_path, has_quality, phred64)?),
        })
    }

    pub fn open_interleaved(path: &Path, has_quality: bool, phred64: bool) -> Result<Self> {
        Ok(Self {
            left: FastqReader::open(path, has_quality, phred64)?,
            right: None,
        })
    }
}

impl<R: Read> PairedFastqReader<R> {
    pub fn new(left: FastqReader<R>, right: Option<FastqReader<R>>) -> Self {
        Self { left, right }
    }

    /// Next mate pair; stops as soon as either side runs dry.
    pub fn next_pair(&mut self) -> Result<Option<(FastqRecord, FastqRecord)>> {
        let first = self.left.next_record()?;
        let second = match &mut self.right {
            Some(right) => right.next_record()?,
            None => self.left.next_record()?,
        };
        match (first, second) {
            (Some(r1), Some(r2)) => Ok(Some((r1, r2))),
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn reader(data: &[u8], has_quality: bool) -> FastqReader<Cursor<Vec<u8>>> {
        FastqReader::new(Cursor::new(data.to_vec()), has_quality, false)
    }

    #[test]
    fn test_basic_records() {
        let mut r = reader(b"@read1\nACGT\n+\nIIII\n@read2\nTGCA\n+\nJJJJ\n", true);

        let rec = r.next_record().unwrap().unwrap();
        assert_eq!(rec.name, b"@read1");
        assert_eq!(rec.sequence, b"ACGT");
        assert_eq!(rec.strand, b"+");
        assert_eq!(rec.quality, b"IIII");
        assert!(!rec.phred64);

        let rec = r.next_record().unwrap().unwrap();
        assert_eq!(rec.name, b"@read2");
        assert!(r.next_record().unwrap().is_none());
    }

    #[test]
    fn test_leading_junk_and_blank_lines_skipped() {
        let mut r = reader(b"junk\n\n@read1\nACGT\n+\nIIII\n", true);
        let rec = r.next_record().unwrap().unwrap();
        assert_eq!(rec.name, b"@read1");
    }

    #[test]
    fn test_synthesized_quality() {
        let mut r = reader(b"@read1\nACGTAC\n+\n", false);
        let rec = r.next_record().unwrap().unwrap();
        assert_eq!(rec.quality, b"KKKKKK");
        assert_eq!(rec.quality.len(), rec.sequence.len());
    }

    #[test]
    fn test_length_mismatch_ends_stream() {
        let mut r = reader(b"@read1\nACGT\n+\nII\n@read2\nACGT\n+\nIIII\n", true);
        assert!(r.next_record().unwrap().is_none());
    }

    #[test]
    fn test_no_final_newline_still_yields_record() {
        let mut r = reader(b"@read1\nACGT\n+\nIIII", true);
        let rec = r.next_record().unwrap().unwrap();
        assert_eq!(rec.quality, b"IIII");
        assert!(r.no_line_break_at_end());
        assert!(r.next_record().unwrap().is_none());
    }

    #[test]
    fn test_phred64_flag_carried() {
        let mut r = FastqReader::new(
            Cursor::new(b"@read1\nACGT\n+\nIIII\n".to_vec()),
            true,
            true,
        );
        assert!(r.next_record().unwrap().unwrap().phred64);
    }

    #[test]
    fn test_paired_reading_stops_at_shorter_side() {
        let left = reader(b"@l1\nAA\n+\nII\n@l2\nCC\n+\nII\n", true);
        let right = reader(b"@r1\nGG\n+\nII\n", true);
        let mut pair = PairedFastqReader::new(left, Some(right));

        let (r1, r2) = pair.next_pair().unwrap().unwrap();
        assert_eq!(r1.name, b"@l1");
        assert_eq!(r2.name, b"@r1");
        assert!(pair.next_pair().unwrap().is_none());
    }

    #[test]
    fn test_interleaved_pairs() {
        let data = b"@a/1\nAA\n+\nII\n@a/2\nCC\n+\nII\n@b/1\nGG\n+\nII\n@b/2\nTT\n+\nII\n";
        let mut pair = PairedFastqReader::new(reader(data, true), None);

        let (r1, r2) = pair.next_pair().unwrap().unwrap();
        assert_eq!(r1.name, b"@a/1");
        assert_eq!(r2.name, b"@a/2");
        let (r1, r2) = pair.next_pair().unwrap().unwrap();
        assert_eq!(r1.name, b"@b/1");
        assert_eq!(r2.name, b"@b/2");
        assert!(pair.next_pair().unwrap().is_none());
    }
}
