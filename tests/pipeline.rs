//! End-to-end exercises over the handler/pipeline wiring, using synthetic
//! entities instead of a binary PBF fixture (none are shipped with this
//! crate).

use std::fs::File;
use std::io::Read as _;

use flate2::read::GzDecoder;
use osmnodecache::{CacheStore as _, HashMapCache};
use temp_dir::TempDir;

use osm2rdf_sync::file_pipeline::FilePipeline;
use osm2rdf_sync::handler::{EntityHandler, Outcome};
use osm2rdf_sync::model::{Geometry, Kind, OsmObject};
use osm2rdf_sync::osc_source;
use osm2rdf_sync::sparql_pipeline::{SparqlClient, SparqlUpdatePipeline};

fn tagged_node(id: i64) -> OsmObject {
    OsmObject {
        kind: Kind::Node,
        id,
        version: 1,
        changeset: 42,
        user: "alice".into(),
        milli_timestamp: 1_700_000_000_000,
        deleted: false,
        tags: vec![("amenity".into(), "cafe".into())],
        geometry: Some(Geometry::Point { lat: 52.5, lon: 13.4 }),
        is_closed: false,
        members: vec![],
    }
}

fn read_gz_files(dir: &std::path::Path) -> Vec<String> {
    let mut out = vec![];
    let mut names: Vec<_> = std::fs::read_dir(dir).unwrap().map(|e| e.unwrap().path()).collect();
    names.sort();
    for path in names {
        let file = File::open(&path).unwrap();
        let mut content = String::new();
        GzDecoder::new(file).read_to_string(&mut content).unwrap();
        out.push(content);
    }
    out
}

#[test]
fn bulk_pipeline_writes_prefixed_turtle_with_entity_and_watermark() {
    let temp_dir = TempDir::new().unwrap();
    let mut handler = EntityHandler::new(true);
    let mut pipeline = FilePipeline::new(temp_dir.path(), 1, 20000);

    let outcome = handler.visit(&tagged_node(1));
    match outcome {
        Outcome::Created(finalized) => pipeline.push(finalized),
        Outcome::Removed { .. } => panic!("expected a tagged node to be created"),
    }
    pipeline.finish();

    let files = read_gz_files(temp_dir.path());
    assert_eq!(files.len(), 1);
    let content = &files[0];
    assert!(content.contains("@prefix osmnode: <https://www.openstreetmap.org/node/> ."));
    assert!(content.contains("osmnode:1"));
    assert!(content.contains(r#"osmt:amenity "cafe""#));
    assert!(content.contains("osmm:loc \"Point(13.4 52.5)\"^^geo:wktLiteral;"));
    assert!(content.contains("osmm:changeset \"42\"^^xsd:integer."));
    assert!(content.contains("osmroot: schema:dateModified"));
}

#[test]
fn untagged_node_outcome_is_never_handed_to_the_file_pipeline() {
    let mut handler = EntityHandler::new(true);
    let mut untagged = tagged_node(2);
    untagged.tags.clear();
    assert!(matches!(
        handler.visit(&untagged),
        Outcome::Removed { kind: Kind::Node, id: 2 }
    ));
}

const DIFF: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<osmChange version="0.6" generator="test">
  <create>
    <node id="100" version="1" changeset="7" timestamp="2024-03-01T00:00:00Z" user="bob" lat="1.0" lon="2.0">
      <tag k="shop" v="bakery"/>
    </node>
  </create>
  <delete>
    <node id="101" version="2" changeset="7" timestamp="2024-03-01T00:01:00Z" user="bob" visible="false"/>
  </delete>
</osmChange>"#;

#[test]
fn osc_diff_drives_handler_and_sparql_pipeline_without_error() {
    let cache = HashMapCache::new();
    let mut accessor = cache.get_accessor();
    let mut handler = EntityHandler::new(true);
    let client = SparqlClient::new("http://localhost:9999/bigdata/sparql", true).unwrap();
    let mut pipeline = SparqlUpdatePipeline::new(client);

    osc_source::for_each_object(DIFF.as_bytes(), accessor.as_mut(), |obj| {
        pipeline.apply(handler.visit(&obj)).unwrap();
    })
    .unwrap();

    pipeline.flush(0).unwrap();
    assert_eq!(handler.stats().added_n, 1);
    assert_eq!(handler.stats().deleted_n, 1);
}
