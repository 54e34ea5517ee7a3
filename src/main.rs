use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use tracing::Level;

use sav::{
    index_path_for, CoordBound, DataFormat, FileHeader, IndexedReader, MergeOptions, Reader,
    Region, S1rReader, SiteInfo, SparseVector, WriterBuilder, DEFAULT_BLOCK_SIZE,
    DEFAULT_COMPRESSION_LEVEL,
};

#[derive(Parser)]
#[command(name = "sav")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Block-compressed, region-indexed storage for sparse genomic variant data")]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Dump records as tab-separated text
    Export(ExportArgs),
    /// Merge files by position, concatenating their samples
    Merge(MergeArgs),
    /// Re-encode a file into fresh blocks with a sidecar index
    Index(IndexArgs),
    /// Print file and index statistics
    Stat(StatArgs),
}

/// Bounding policy deciding when a variant belongs to a region
#[derive(Clone, Copy, Debug, Default, ValueEnum)]
enum Bounding {
    /// Any overlap with the region
    #[default]
    Any,
    /// Left endpoint inside the region
    Beg,
    /// Right endpoint inside the region
    End,
    /// Midpoint inside the region
    Mid,
}

impl From<Bounding> for CoordBound {
    fn from(value: Bounding) -> Self {
        match value {
            Bounding::Any => CoordBound::Any,
            Bounding::Beg => CoordBound::LeftPoint,
            Bounding::End => CoordBound::RightPoint,
            Bounding::Mid => CoordBound::Midpoint,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, ValueEnum)]
enum CliFormat {
    /// Biallelic hard calls
    #[default]
    Gt,
    /// Quantized haplotype dosages
    Hds,
}

impl From<CliFormat> for DataFormat {
    fn from(value: CliFormat) -> Self {
        match value {
            CliFormat::Gt => DataFormat::Genotype,
            CliFormat::Hds => DataFormat::HaplotypeDosage,
        }
    }
}

#[derive(Parser)]
struct ExportArgs {
    /// Input sav file
    input: PathBuf,

    /// Output file (default: stdout)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Comma separated list of regions formatted as chr[:beg-end]
    #[arg(short, long)]
    regions: Option<String>,

    /// Bounding policy for region filtering
    #[arg(long, value_enum, default_value = "any")]
    bounding: Bounding,

    /// Comma separated list of sample IDs to subset
    #[arg(short = 'i', long)]
    sample_ids: Option<String>,

    /// Path to a file containing sample IDs to subset, one per line
    #[arg(short = 'I', long)]
    sample_ids_file: Option<PathBuf>,
}

#[derive(Parser)]
struct MergeArgs {
    /// Input sav files
    #[arg(num_args = 2.., required = true)]
    inputs: Vec<PathBuf>,

    /// Output sav file
    #[arg(short, long)]
    output: PathBuf,

    /// Format field to copy
    #[arg(short = 'f', long, value_enum, default_value = "gt")]
    data_format: CliFormat,

    /// Number of markers in a compression block (0-65535)
    #[arg(short, long, default_value_t = DEFAULT_BLOCK_SIZE)]
    block_size: u16,

    /// Zstd compression level (1-19)
    #[arg(short = 'l', long, default_value_t = DEFAULT_COMPRESSION_LEVEL)]
    level: i32,

    /// Also write a sidecar index for the output
    #[arg(short = 'x', long)]
    index: bool,
}

#[derive(Parser)]
struct IndexArgs {
    /// Input sav file
    input: PathBuf,

    /// Re-encoded output sav file; its .s1r sidecar is written next to it
    #[arg(short, long)]
    output: PathBuf,

    /// Number of markers in a compression block (0-65535)
    #[arg(short, long, default_value_t = DEFAULT_BLOCK_SIZE)]
    block_size: u16,

    /// Zstd compression level (1-19)
    #[arg(short = 'l', long, default_value_t = DEFAULT_COMPRESSION_LEVEL)]
    level: i32,
}

#[derive(Parser)]
struct StatArgs {
    /// Input sav file
    input: PathBuf,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        _ => Level::DEBUG,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(io::stderr)
        .init();

    match cli.command {
        Commands::Export(args) => export(args),
        Commands::Merge(args) => merge(args),
        Commands::Index(args) => index(args),
        Commands::Stat(args) => stat(args),
    }
}

fn subset_ids(inline: Option<&str>, file: Option<&Path>) -> Result<Option<Vec<String>>> {
    match (inline, file) {
        (Some(_), Some(_)) => bail!("--sample-ids and --sample-ids-file are mutually exclusive"),
        (Some(ids), None) => Ok(Some(
            ids.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        )),
        (None, Some(path)) => {
            let reader = File::open(path)
                .map(BufReader::new)
                .with_context(|| format!("opening {}", path.display()))?;
            let mut ids = Vec::new();
            for line in reader.lines() {
                let line = line?;
                let line = line.trim();
                if !line.is_empty() {
                    ids.push(line.to_string());
                }
            }
            Ok(Some(ids))
        }
        (None, None) => Ok(None),
    }
}

fn out_writer(path: Option<&Path>) -> Result<Box<dyn Write>> {
    Ok(match path {
        Some(path) => Box::new(BufWriter::new(
            File::create(path).with_context(|| format!("creating {}", path.display()))?,
        )),
        None => Box::new(BufWriter::new(io::stdout())),
    })
}

fn write_header_line<W: Write>(out: &mut W, header: &FileHeader, samples: &[String]) -> Result<()> {
    write!(out, "#CHROM\tPOS\tREF\tALT")?;
    for field in header.info_fields() {
        write!(out, "\t{field}")?;
    }
    for sample in samples {
        write!(out, "\t{sample}")?;
    }
    writeln!(out)?;
    Ok(())
}

fn write_record_line<W: Write>(
    out: &mut W,
    header: &FileHeader,
    site: &SiteInfo,
    values: &[f32],
) -> Result<()> {
    write!(
        out,
        "{}\t{}\t{}\t{}",
        site.chromosome(),
        site.position(),
        site.ref_allele(),
        site.alt_allele()
    )?;
    for field in header.info_fields() {
        let value = site.info(field);
        write!(out, "\t{}", if value.is_empty() { "." } else { value })?;
    }
    for value in values {
        if value.is_nan() {
            write!(out, "\t.")?;
        } else {
            write!(out, "\t{value}")?;
        }
    }
    writeln!(out)?;
    Ok(())
}

fn export(args: ExportArgs) -> Result<()> {
    let subset = subset_ids(args.sample_ids.as_deref(), args.sample_ids_file.as_deref())?;
    let mut out = out_writer(args.output.as_deref())?;

    let mut site = SiteInfo::default();
    let mut values = Vec::new();

    if let Some(regions) = &args.regions {
        let regions: Vec<Region> = regions
            .split(',')
            .map(|r| r.trim().parse())
            .collect::<sav::Result<_>>()?;
        let Some((first, rest)) = regions.split_first() else {
            bail!("--regions is empty");
        };

        let mut reader =
            IndexedReader::with_options(&args.input, None, first.clone(), args.bounding.into())?;
        let samples = match &subset {
            Some(ids) => reader.subset_samples(ids),
            None => reader.header().samples().to_vec(),
        };
        let header = reader.header().clone();
        write_header_line(&mut out, &header, &samples)?;

        let mut remaining = rest.iter();
        loop {
            while reader.read_dense(&mut site, &mut values)? {
                write_record_line(&mut out, &header, &site, &values)?;
            }
            match remaining.next() {
                Some(region) => reader.reset_region(region.clone()),
                None => break,
            }
        }
    } else {
        let mut reader = Reader::from_path(&args.input)?;
        let samples = match &subset {
            Some(ids) => reader.subset_samples(ids),
            None => reader.header().samples().to_vec(),
        };
        let header = reader.header().clone();
        write_header_line(&mut out, &header, &samples)?;
        while reader.read_dense(&mut site, &mut values)? {
            write_record_line(&mut out, &header, &site, &values)?;
        }
    }

    out.flush()?;
    Ok(())
}

fn merge(args: MergeArgs) -> Result<()> {
    let mut inputs = Vec::with_capacity(args.inputs.len());
    for path in &args.inputs {
        inputs.push(
            Reader::from_path(path).with_context(|| format!("opening {}", path.display()))?,
        );
    }

    let options = MergeOptions {
        data_format: args.data_format.into(),
        compression_level: args.level,
        block_size: args.block_size,
        index_path: args.index.then(|| index_path_for(&args.output)),
    };
    let sink = File::create(&args.output)
        .map(BufWriter::new)
        .with_context(|| format!("creating {}", args.output.display()))?;
    let records = sav::merge(inputs, sink, &options)?;
    eprintln!("merged {} records into {}", records, args.output.display());
    Ok(())
}

fn index(args: IndexArgs) -> Result<()> {
    let mut reader = Reader::from_path(&args.input)?;
    let header = FileHeader::new(
        reader.header().data_format(),
        reader.header().headers().to_vec(),
        reader.header().samples().to_vec(),
    );

    let sink = File::create(&args.output)
        .map(BufWriter::new)
        .with_context(|| format!("creating {}", args.output.display()))?;
    let mut writer = WriterBuilder::new(header)
        .block_size(args.block_size)
        .compression_level(args.level)
        .index_path(index_path_for(&args.output))
        .build(sink)?;

    let mut site = SiteInfo::default();
    let mut genotypes = SparseVector::new();
    let mut records = 0u64;
    while reader.read(&mut site, &mut genotypes)? {
        writer.write_sparse(&site, &genotypes)?;
        records += 1;
    }
    writer.finish()?;
    eprintln!(
        "indexed {} records into {} (+.s1r)",
        records,
        args.output.display()
    );
    Ok(())
}

fn stat(args: StatArgs) -> Result<()> {
    let reader = Reader::from_path(&args.input)?;
    let header = reader.header();

    println!("file\t{}", args.input.display());
    println!(
        "format\t{}",
        match header.data_format() {
            DataFormat::Genotype => "GT",
            DataFormat::HaplotypeDosage => "HDS",
        }
    );
    println!("samples\t{}", header.n_samples());
    println!("headers\t{}", header.headers().len());
    println!("info fields\t{}", header.info_fields().join(","));

    let index_path = index_path_for(&args.input);
    if index_path.exists() {
        let index = S1rReader::from_path(&index_path)?;
        println!("index\t{}", index_path.display());
        let mut total = 0usize;
        for (chrom, entries) in index.trees() {
            let records: usize = entries.iter().map(|e| e.records()).sum();
            total += records;
            println!("chrom\t{chrom}\t{} blocks\t{records} records", entries.len());
        }
        println!("records\t{total}");
    } else {
        println!("index\t(none)");
    }
    Ok(())
}
