//! Source-neutral view of an OSM entity.
//!
//! Both the PBF adapter (bulk extracts) and the OSC adapter (replication
//! diffs) produce the same [`OsmObject`] shape so [`crate::handler`] never
//! has to know which wire format it came from.

use std::fmt;

/// Which of the three OSM entity kinds an object is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Node,
    Way,
    Relation,
}

impl Kind {
    /// The entity-subject IRI prefix, e.g. `osmnode`.
    pub fn prefix(self) -> &'static str {
        match self {
            Kind::Node => "osmnode",
            Kind::Way => "osmway",
            Kind::Relation => "osmrel",
        }
    }

    /// The single-letter `osmm:type` code used in OSC and in `osmm:type`
    /// metadata statements.
    pub fn type_code(self) -> &'static str {
        match self {
            Kind::Node => "n",
            Kind::Way => "w",
            Kind::Relation => "r",
        }
    }

    pub fn from_code(code: &str) -> Option<Kind> {
        match code {
            "n" | "node" => Some(Kind::Node),
            "w" | "way" => Some(Kind::Way),
            "r" | "rel" | "relation" => Some(Kind::Relation),
            _ => None,
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

/// A single member of a relation.
#[derive(Debug, Clone)]
pub struct Member {
    pub kind: Kind,
    pub id: i64,
    pub role: String,
}

impl Member {
    /// `osmnode:123` / `osmway:123` / `osmrel:123`.
    pub fn iri(&self) -> String {
        format!("{}:{}", self.kind.prefix(), self.id)
    }
}

/// Geometry attached to a node or way, already resolved to plain
/// coordinates by the source adapter (see DESIGN.md OQ-3: neither adapter
/// available in this ecosystem hands back raw WKB the way the original
/// Python `osmium.geom.WKBFactory` did, so the geometry adapter works on
/// coordinates directly rather than decoding WKB bytes).
#[derive(Debug, Clone)]
pub enum Geometry {
    /// A node's point location.
    Point { lat: f64, lon: f64 },
    /// A way's member node coordinates, in order, as far as they could be
    /// resolved from the node cache. Missing entries are simply absent
    /// (the geometry adapter treats a too-short list as a decode failure).
    Line(Vec<(f64, f64)>),
}

/// A read-only, source-neutral view of one OSM entity.
#[derive(Debug, Clone)]
pub struct OsmObject {
    pub kind: Kind,
    pub id: i64,
    pub version: i32,
    pub changeset: i64,
    pub user: String,
    /// Milliseconds since the Unix epoch, UTC.
    pub milli_timestamp: i64,
    pub deleted: bool,
    /// Tags in source order; `created_by` has NOT been filtered yet.
    pub tags: Vec<(String, String)>,
    pub geometry: Option<Geometry>,
    /// Way-only: whether the first and last node ids are identical.
    pub is_closed: bool,
    /// Relation-only: ordered member list.
    pub members: Vec<Member>,
}

impl OsmObject {
    pub fn iri(&self) -> String {
        format!("{}:{}", self.kind.prefix(), self.id)
    }
}
