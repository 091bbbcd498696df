use anyhow::{Context, Result};
use clap::Parser;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use fqchunk::cli::{self, Cli, Commands, CountArgs, SplitArgs, StatsArgs};
use fqchunk::io::{self, ByteFeed, ChunkPair, PairedChunkReader};

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    // Show version banner (hide with FQCHUNK_NO_BANNER=1)
    if std::env::var("FQCHUNK_NO_BANNER").is_err() {
        eprintln!(
            "fqchunk v{} - record-aligned paired FASTQ chunking",
            env!("CARGO_PKG_VERSION")
        );
        eprintln!();
    }

    match cli.command {
        Commands::Stats(args) => run_stats(args),
        Commands::Count(args) => run_count(args),
        Commands::Split(args) => run_split(args),
    }
}

#[derive(Default)]
struct PairTotals {
    pairs: u64,
    left_records: u64,
    right_records: u64,
    left_bases: u64,
    right_bases: u64,
    unbalanced: u64,
}

impl PairTotals {
    fn merge(&mut self, other: &PairTotals) {
        self.pairs += other.pairs;
        self.left_records += other.left_records;
        self.right_records += other.right_records;
        self.left_bases += other.left_bases;
        self.right_bases += other.right_bases;
        self.unbalanced += other.unbalanced;
    }
}

fn run_stats(args: StatsArgs) -> Result<()> {
    for path in [&args.in1, &args.in2] {
        if !io::is_fastq_path(path) && !io::is_gzipped_fastq_path(path) {
            warn!("{} does not have a FASTQ suffix", path.display());
        }
    }
    let threads = if args.threads == 0 {
        cli::num_cpus()
    } else {
        args.threads
    };
    let has_quality = !args.fasta;

    info!("Streaming chunk pairs with {} worker threads", threads);
    let totals = if args.pipelined {
        let (mut reader, feeders) = PairedChunkReader::open_pipelined(
            &args.in1,
            &args.in2,
            has_quality,
            args.phred64,
        )?;
        let totals = consume_pairs(&mut reader, threads)?;
        for feeder in feeders {
            let _ = feeder.join();
        }
        totals
    } else {
        let mut reader =
            io::open_pair(&args.in1, &args.in2, has_quality, args.phred64, false)?;
        consume_pairs(&mut reader, threads)?
    };

    println!("chunk pairs    {}", totals.pairs);
    println!("left records   {}", totals.left_records);
    println!("right records  {}", totals.right_records);
    println!("left bases     {}", totals.left_bases);
    println!("right bases    {}", totals.right_bases);
    if totals.unbalanced > 0 {
        warn!(
            pairs = totals.unbalanced,
            "pairs with unequal record counts"
        );
    }
    Ok(())
}

/// Drive the splitter on this thread while scoped workers drain a bounded
/// channel of pairs, releasing chunks back through cloned pool handles.
fn consume_pairs<F: ByteFeed>(
    reader: &mut PairedChunkReader<F>,
    threads: usize,
) -> Result<PairTotals> {
    let (pair_tx, pair_rx) = crossbeam_channel::bounded::<ChunkPair>(threads * 2);
    let (left_pool, right_pool) = reader.pools();

    std::thread::scope(|scope| -> Result<PairTotals> {
        let mut workers = Vec::with_capacity(threads);
        for _ in 0..threads {
            let rx = pair_rx.clone();
            let left_pool = Arc::clone(&left_pool);
            let right_pool = Arc::clone(&right_pool);
            workers.push(scope.spawn(move || {
                let mut totals = PairTotals::default();
                while let Ok(pair) = rx.recv() {
                    let (left_records, left_bases) = side_stats(pair.left.bytes());
                    let (right_records, right_bases) = side_stats(pair.right.bytes());
                    totals.pairs += 1;
                    totals.left_records += left_records;
                    totals.right_records += right_records;
                    totals.left_bases += left_bases;
                    totals.right_bases += right_bases;
                    if left_records != right_records {
                        totals.unbalanced += 1;
                    }
                    left_pool.release(pair.left);
                    right_pool.release(pair.right);
                }
                totals
            }));
        }
        drop(pair_rx);

        while let Some(pair) = reader.next_chunk_pair()? {
            if pair_tx.send(pair).is_err() {
                break;
            }
        }
        drop(pair_tx);

        let mut sum = PairTotals::default();
        for worker in workers {
            let totals = worker.join().expect("stats worker panicked");
            sum.merge(&totals);
        }
        Ok(sum)
    })
}

/// Records and sequence bases in a record-aligned chunk. The final line
/// has its terminator stripped at the cut, so an unterminated tail line
/// is a real line.
fn side_stats(bytes: &[u8]) -> (u64, u64) {
    if bytes.is_empty() {
        return (0, 0);
    }
    let mut lines = 0u64;
    let mut bases = 0u64;
    for (index, line) in bytes.split(|&b| b == b'\n').enumerate() {
        if line.is_empty() && index > 0 {
            // Trailing empty slice after a final newline.
            continue;
        }
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        lines += 1;
        if index % 4 == 1 {
            bases += line.len() as u64;
        }
    }
    (lines / 4, bases)
}

fn run_count(args: CountArgs) -> Result<()> {
    let mut reader = io::open_single(&args.input, !args.fasta, args.phred64)?;

    let mut records = 0u64;
    let mut bases = 0u64;
    while let Some(record) = reader.next_record()? {
        records += 1;
        bases += record.sequence.len() as u64;
    }

    let (consumed, total) = reader.position();
    match total {
        Some(total) => info!("Consumed {} of {} input bytes", consumed, total),
        None => info!("Consumed {} input bytes", consumed),
    }
    if reader.no_line_break_at_end() {
        info!("Input had no final line break");
    }

    println!("records {}", records);
    println!("bases   {}", bases);
    Ok(())
}

fn run_split(args: SplitArgs) -> Result<()> {
    std::fs::create_dir_all(&args.outdir).with_context(|| {
        format!("Failed to create output directory: {}", args.outdir.display())
    })?;

    let mut reader = io::open_pair(&args.in1, &args.in2, true, false, false)?;
    let mut index = 0u32;
    while let Some(pair) = reader.next_chunk_pair()? {
        let terminator: &[u8] = if reader.uses_crlf() { b"\r\n" } else { b"\n" };
        write_chunk(&args.outdir, &args.prefix, index, 1, pair.left.bytes(), terminator)?;
        write_chunk(&args.outdir, &args.prefix, index, 2, pair.right.bytes(), terminator)?;
        reader.release(pair);
        index += 1;
    }

    info!("Wrote {} chunk pairs to {}", index, args.outdir.display());
    Ok(())
}

/// Write one chunk verbatim, restoring the terminator stripped at the cut.
fn write_chunk(
    outdir: &Path,
    prefix: &str,
    index: u32,
    mate: u32,
    bytes: &[u8],
    terminator: &[u8],
) -> Result<()> {
    let path = outdir.join(format!("{prefix}_{index:04}.R{mate}.fastq"));
    let file = File::create(&path)
        .with_context(|| format!("Failed to create output file: {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    writer.write_all(bytes)?;
    writer.write_all(terminator)?;
    writer.flush()?;
    Ok(())
}
