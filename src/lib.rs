#![doc = include_str!("../README.md")]

pub mod cli;
pub mod file_pipeline;
pub mod geometry;
pub mod handler;
pub mod model;
pub mod osc_source;
pub mod pbf_source;
pub mod replication;
pub mod sparql_pipeline;
pub mod statement;
pub mod vocab;

use std::path::Path;

use anyhow::Context as _;
use log::info;
use osmpbf::BlobReader;

use cli::{Args, CacheStrategyArg, Command};
use handler::{EntityHandler, Outcome};
use pbf_source::{CacheStrategy, NodeCache};
use sparql_pipeline::{SparqlClient, SparqlUpdatePipeline};

pub fn run(args: Args) -> anyhow::Result<()> {
    let strategy = match args.cache_strategy {
        CacheStrategyArg::Sparse => CacheStrategy::Sparse { path: args.nodes_file.clone() },
        CacheStrategyArg::Dense => CacheStrategy::Dense {
            path: args
                .nodes_file
                .clone()
                .context("--cache-strategy dense requires -c/--nodes-file")?,
        },
    };
    let add_way_location = !args.skip_way_geo;

    match args.cmd {
        Command::Parse {
            max_statements,
            workers,
            ref input_file,
            ref output_dir,
        } => run_parse(&strategy, add_way_location, max_statements, workers, input_file, output_dir),
        Command::Update {
            seqid,
            ref update_url,
            ref host,
            max_download,
            dry_run,
        } => run_update(&strategy, add_way_location, seqid, update_url, host, max_download, dry_run),
    }
}

fn run_parse(
    strategy: &CacheStrategy,
    add_way_location: bool,
    max_statements: usize,
    workers: usize,
    input_file: &Path,
    output_dir: &Path,
) -> anyhow::Result<()> {
    let mut node_cache = NodeCache::open(strategy)?;
    let mut handler = EntityHandler::new(add_way_location);
    let mut pipeline = file_pipeline::FilePipeline::new(output_dir, workers, max_statements);

    let reader = BlobReader::from_path(input_file).with_context(|| format!("opening {input_file:?}"))?;
    pbf_source::for_each_object(reader, &mut node_cache, |obj| {
        match handler.visit(&obj) {
            Outcome::Created(finalized) => pipeline.push(finalized),
            Outcome::Removed { kind, id } => {
                // Bulk files cannot retract a prior file's triples.
                info!("delete of {}:{id} is not supported in bulk output, skipping", kind.prefix());
            }
        }
        if let Some(summary) = handler.format_stats() {
            info!("{summary}");
        }
    })?;

    pipeline.finish();
    node_cache.save(strategy)?;
    info!("final stats: {}", handler.flush());
    Ok(())
}

fn run_update(
    strategy: &CacheStrategy,
    add_way_location: bool,
    seqid: Option<u64>,
    update_url: &str,
    host: &str,
    max_download: usize,
    dry_run: bool,
) -> anyhow::Result<()> {
    let node_cache = NodeCache::open(strategy)?;
    let mut accessor = node_cache.accessor();
    let mut handler = EntityHandler::new(add_way_location);
    let client = SparqlClient::new(host, dry_run)?;
    let mut pipeline = SparqlUpdatePipeline::new(client);
    let replication = replication::ReplicationClient::new(update_url, max_download)?;

    let seqid = match seqid {
        Some(seqid) => seqid,
        None => starting_sequence(&replication, &pipeline)?,
    };

    info!("starting replication from sequence #{seqid}");
    replication::run(&replication, &mut handler, &mut pipeline, accessor.as_mut(), seqid)
}

/// Determines where to resume from when `--seqid` is absent: the stored
/// `schema:version`, or (failing that) `schema:dateModified` minus 60
/// minutes mapped back to a sequence id.
fn starting_sequence(
    replication: &replication::ReplicationClient,
    pipeline: &SparqlUpdatePipeline,
) -> anyhow::Result<u64> {
    let status = pipeline.query_status()?;
    if let Some(version) = status.version {
        return Ok(version);
    }
    let date_modified = status
        .date_modified
        .context("RDF store has neither schema:version nor schema:dateModified set")?;
    let target = chrono::DateTime::from_timestamp_millis(date_modified)
        .context("invalid stored schema:dateModified")?
        - chrono::Duration::minutes(60);
    replication.timestamp_to_sequence(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser as _;

    #[test]
    fn cli_parses_minimal_parse_invocation() {
        let args = Args::parse_from(["osm2rdf-sync", "-s", "sparse", "parse", "in.pbf", "."]);
        assert!(matches!(args.cmd, Command::Parse { .. }));
    }

    #[test]
    fn cli_parses_update_invocation_with_defaults() {
        let args = Args::parse_from(["osm2rdf-sync", "-s", "sparse", "update"]);
        match args.cmd {
            Command::Update { update_url, host, max_download, .. } => {
                assert_eq!(update_url, "http://planet.openstreetmap.org/replication/minute");
                assert_eq!(host, "http://localhost:9999/bigdata/sparql");
                assert_eq!(max_download, 5120);
            }
            other => panic!("expected Update, got {other:?}"),
        }
    }
}
