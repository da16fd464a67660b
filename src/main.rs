use anyhow::{bail, Context, Result};
use biscuit::{Biscuit, Heap, MemoryHeap, Predicate, WindowConfig};
use clap::{Parser, Subcommand};
use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

/// TSV fields with this literal value are treated as SQL NULL.
const NULL_LITERAL: &str = "\\N";

#[derive(Parser)]
#[command(name = "biscuit")]
#[command(about = "Exact substring containment index over text columns")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build an index over a TSV relation
    Build {
        /// Input relation, one row per line, tab-separated columns
        input: PathBuf,

        /// Where to write the index image
        #[arg(short, long)]
        output: PathBuf,

        /// Window length in bytes
        #[arg(long, default_value_t = 3)]
        window_len: u32,

        /// Distance between window starts
        #[arg(long, default_value_t = 1)]
        stride: u32,

        /// Fold ASCII case before indexing
        #[arg(long)]
        case_insensitive: bool,
    },
    /// Search an index for rows containing patterns
    Search {
        /// Index image written by `build`
        index: PathBuf,

        /// The relation the index was built over
        #[arg(short, long)]
        input: PathBuf,

        /// Column to search
        #[arg(short, long, default_value_t = 0)]
        column: u16,

        /// Patterns; a row must contain all of them (use --any for OR)
        #[arg(required = true)]
        patterns: Vec<String>,

        /// Match rows containing any pattern instead of all
        #[arg(long)]
        any: bool,

        /// Print matching row contents, not just ids
        #[arg(short, long)]
        verbose: bool,
    },
    /// Print index statistics as JSON
    Stats {
        /// Index image written by `build`
        index: PathBuf,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Build {
            input,
            output,
            window_len,
            stride,
            case_insensitive,
        } => build(&input, &output, window_len, stride, case_insensitive),
        Commands::Search {
            index,
            input,
            column,
            patterns,
            any,
            verbose,
        } => search(&index, &input, column, &patterns, any, verbose),
        Commands::Stats { index } => stats(&index),
    }
}

fn build(
    input: &Path,
    output: &Path,
    window_len: u32,
    stride: u32,
    case_insensitive: bool,
) -> Result<()> {
    let heap = load_relation(input)?;
    let columns = relation_arity(&heap, input)?;
    let config = WindowConfig {
        window_len,
        stride,
        columns,
        case_insensitive,
    };

    let index = Biscuit::build(config, &heap, None)
        .with_context(|| format!("building index over {}", input.display()))?;

    let image = index.to_bytes()?;
    File::create(output)
        .and_then(|mut f| f.write_all(&image))
        .with_context(|| format!("writing {}", output.display()))?;

    let stats = index.stats();
    println!(
        "indexed {} rows, {} units, {} postings -> {} ({} bytes)",
        stats.row_count,
        stats.unit_count,
        stats.posting_count,
        output.display(),
        image.len()
    );
    Ok(())
}

fn search(
    index_path: &Path,
    input: &Path,
    column: u16,
    patterns: &[String],
    any: bool,
    verbose: bool,
) -> Result<()> {
    let index = open_index(index_path)?;
    let heap = load_relation(input)?;

    let leaves: Vec<Predicate> = patterns
        .iter()
        .map(|p| Predicate::contains(column, p.as_str()))
        .collect();
    let predicate = match (leaves.len(), any) {
        (1, _) => leaves.into_iter().next().unwrap(),
        (_, true) => Predicate::or(leaves),
        (_, false) => Predicate::and(leaves),
    };

    let rows = index.search(&predicate, &heap, None)?;
    for row in &rows {
        if verbose {
            let value = heap.read_column(*row, column)?;
            println!("{row}\t{}", value.as_deref().unwrap_or(NULL_LITERAL));
        } else {
            println!("{row}");
        }
    }
    eprintln!("{} rows matched", rows.len());
    Ok(())
}

fn stats(index_path: &Path) -> Result<()> {
    let index = open_index(index_path)?;
    println!("{}", serde_json::to_string_pretty(&index.stats())?);
    Ok(())
}

fn open_index(path: &Path) -> Result<Biscuit> {
    let file =
        File::open(path).with_context(|| format!("opening index {}", path.display()))?;
    // Safety: the image is read once up front; concurrent truncation of
    // the file would be an operator error.
    let mmap = unsafe { memmap2::Mmap::map(&file) }
        .with_context(|| format!("mapping index {}", path.display()))?;
    Ok(Biscuit::from_bytes(&mmap)?)
}

/// Load a TSV relation into a [`MemoryHeap`]. Every row must have the
/// same arity; `\N` fields are NULL.
fn load_relation(path: &Path) -> Result<MemoryHeap> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let mut heap = MemoryHeap::new();
    let mut arity: Option<usize> = None;

    for (lineno, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("reading {}", path.display()))?;
        let fields: Vec<Option<String>> = line
            .split('\t')
            .map(|f| (f != NULL_LITERAL).then(|| f.to_string()))
            .collect();

        match arity {
            None => arity = Some(fields.len()),
            Some(expected) if expected != fields.len() => bail!(
                "{}:{}: expected {} columns, found {}",
                path.display(),
                lineno + 1,
                expected,
                fields.len()
            ),
            Some(_) => {}
        }
        heap.push_row(fields);
    }
    Ok(heap)
}

fn relation_arity(heap: &MemoryHeap, input: &Path) -> Result<u16> {
    if heap.row_count() == 0 {
        bail!("{} is empty, nothing to index", input.display());
    }
    let mut arity = 0;
    heap.for_each_row(&mut |_, values| {
        arity = values.len();
        Ok(false)
    })?;
    Ok(arity as u16)
}
