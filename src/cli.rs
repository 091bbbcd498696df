use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "fqchunk")]
#[command(author = "fqchunk contributors")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Record-aligned chunk streaming for paired FASTQ files", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Stream paired chunks and report record statistics
    Stats(StatsArgs),
    /// Count records in a single FASTQ stream
    Count(CountArgs),
    /// Shard a mate pair into record-aligned chunk files
    Split(SplitArgs),
}

#[derive(Parser)]
pub struct StatsArgs {
    /// First mate file (.fastq/.fq/.fasta/.fa, optionally .gz, or - for stdin)
    #[arg(short = '1', long = "in1", value_name = "FILE", required = true)]
    pub in1: PathBuf,

    /// Second mate file
    #[arg(short = '2', long = "in2", value_name = "FILE", required = true)]
    pub in2: PathBuf,

    /// Number of worker threads (0 = auto-detect)
    #[arg(short = 't', long, default_value = "0")]
    pub threads: usize,

    /// Input has no quality lines (three-line records; quality is synthesized)
    #[arg(long)]
    pub fasta: bool,

    /// Treat quality values as Phred+64
    #[arg(long)]
    pub phred64: bool,

    /// Decompress on dedicated threads feeding bounded queues
    #[arg(long)]
    pub pipelined: bool,
}

#[derive(Parser)]
pub struct CountArgs {
    /// Input file (.fastq/.fq/.fasta/.fa, optionally .gz, or - for stdin)
    #[arg(short, long, value_name = "FILE", required = true)]
    pub input: PathBuf,

    /// Input has no quality lines (three-line records; quality is synthesized)
    #[arg(long)]
    pub fasta: bool,

    /// Treat quality values as Phred+64
    #[arg(long)]
    pub phred64: bool,
}

#[derive(Parser)]
pub struct SplitArgs {
    /// First mate file
    #[arg(short = '1', long = "in1", value_name = "FILE", required = true)]
    pub in1: PathBuf,

    /// Second mate file
    #[arg(short = '2', long = "in2", value_name = "FILE", required = true)]
    pub in2: PathBuf,

    /// Output directory for the chunk files
    #[arg(short, long, value_name = "DIR", required = true)]
    pub outdir: PathBuf,

    /// Basename prefix for chunk files (<prefix>_NNNN.R1.fastq / .R2.fastq)
    #[arg(long, default_value = "chunk")]
    pub prefix: String,
}

pub fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(8)
}
