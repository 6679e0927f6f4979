//! Command-line surface: a previous two-flag `planet_cache`/`small_cache`
//! group is collapsed into a single `--cache-strategy` enum plus one
//! `--nodes-file` path (see DESIGN.md).

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(about, version)]
pub struct Args {
    /// Enable verbose (debug-level) logging.
    #[arg(short, long)]
    pub verbose: bool,

    /// Disable way centroid emission (`osmm:loc` on ways).
    #[arg(long)]
    pub skip_way_geo: bool,

    /// Node coordinate cache file, used to resolve way geometry.
    #[arg(short = 'c', long, value_name = "path")]
    pub nodes_file: Option<PathBuf>,

    /// Node cache backing store.
    #[arg(short = 's', long, value_enum, default_value_t = CacheStrategyArg::Dense)]
    pub cache_strategy: CacheStrategyArg,

    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum CacheStrategyArg {
    /// In-memory hash map, suitable for small extracts.
    Sparse,
    /// Memory-mapped flat file sized for the whole planet.
    Dense,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Parses a PBF file into a sequence of `.ttl.gz` (Turtle) files.
    Parse {
        /// Maximum statements per output file, in thousands.
        #[arg(long, default_value = "20000")]
        max_statements: usize,
        /// Number of writer worker threads.
        #[arg(long, default_value = "4")]
        workers: usize,
        /// OSM input PBF file.
        input_file: PathBuf,
        /// Output directory (must already exist).
        #[arg(value_parser = parse_outdir)]
        output_dir: PathBuf,
    },
    /// Polls minutely replication diffs and applies them to a SPARQL
    /// 1.1 Update endpoint.
    Update {
        /// Start updating from this sequence ID. By default, queried
        /// from the SPARQL endpoint's stored status.
        #[arg(long)]
        seqid: Option<u64>,
        /// Base URL of the minutely-diff replication source.
        #[arg(long, default_value = "http://planet.openstreetmap.org/replication/minute")]
        update_url: String,
        /// SPARQL 1.1 Update/Query endpoint.
        #[arg(long, default_value = "http://localhost:9999/bigdata/sparql")]
        host: String,
        /// Maximum size in kB for a single diff download.
        #[arg(long, default_value = "5120")]
        max_download: usize,
        /// Do not modify the RDF database; log what would have been sent.
        #[arg(short = 'n', long)]
        dry_run: bool,
    },
}

fn parse_outdir(path_str: &str) -> anyhow::Result<PathBuf> {
    let path = PathBuf::from(path_str);
    if !path.is_dir() {
        anyhow::bail!("Output directory `{path_str}` does not exist")
    }
    Ok(path)
}
