use clap::Parser;
use osm2rdf_sync::cli::Args;

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(if args.verbose {
        "debug"
    } else {
        "info"
    }))
    .init();

    osm2rdf_sync::run(args)
}
