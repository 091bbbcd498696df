//! fqchunk: record-aligned chunk streaming for paired FASTQ files.
//!
//! The chunk pair is the unit of work handed to parallel consumers: two
//! byte buffers, one per mate file, whose boundaries fall on complete
//! FASTQ records and which hold the same number of records on each side.

pub mod cli;
pub mod io;
