//! Entity handler: turns one [`OsmObject`] into zero or one statement list,
//! tracking run-wide counters and the high-water timestamp.

use log::info;

use crate::geometry;
use crate::model::{Kind, OsmObject};
use crate::statement::Statement;

const CREATED_BY: &str = "created_by";

/// Running counters, one triple of `{n,w,r}` per bucket, plus the total
/// number of statements ever emitted.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Stats {
    pub added_n: u64,
    pub added_w: u64,
    pub added_r: u64,
    pub skipped_n: u64,
    pub skipped_w: u64,
    pub skipped_r: u64,
    pub deleted_n: u64,
    pub deleted_w: u64,
    pub deleted_r: u64,
    pub new_statements: u64,
}

impl Stats {
    pub fn combine(&mut self, other: &Stats) {
        self.added_n += other.added_n;
        self.added_w += other.added_w;
        self.added_r += other.added_r;
        self.skipped_n += other.skipped_n;
        self.skipped_w += other.skipped_w;
        self.skipped_r += other.skipped_r;
        self.deleted_n += other.deleted_n;
        self.deleted_w += other.deleted_w;
        self.deleted_r += other.deleted_r;
        self.new_statements += other.new_statements;
    }

    fn format(&self) -> String {
        format!(
            "added n/w/r={}/{}/{}, skipped n/w/r={}/{}/{}, deleted n/w/r={}/{}/{}, statements={}",
            self.added_n,
            self.added_w,
            self.added_r,
            self.skipped_n,
            self.skipped_w,
            self.skipped_r,
            self.deleted_n,
            self.deleted_w,
            self.deleted_r,
            self.new_statements,
        )
    }
}

/// One finalized entity, ready to hand to a downstream pipeline.
#[derive(Debug, Clone)]
pub struct Finalized {
    pub kind: Kind,
    pub id: i64,
    pub statements: Vec<Statement>,
    pub milli_timestamp: i64,
}

/// What happened to one visited [`OsmObject`]. Both an explicit delete and
/// an object that no longer carries any live statements (no tags, no
/// members) collapse to `Removed` — either way, whatever the subject used
/// to say needs to be retracted. The bulk file pipeline has no way to
/// retract a prior file's triples and so only ever acts on `Created`
/// ("delete is not supported" for bulk output); the SPARQL pipeline acts
/// on both.
#[derive(Debug, Clone)]
pub enum Outcome {
    Created(Finalized),
    Removed { kind: Kind, id: i64 },
}

/// Consumes a stream of [`OsmObject`]s and produces [`Outcome`]s, per spec
/// §4.C.
pub struct EntityHandler {
    add_way_location: bool,
    stats: Stats,
    last_timestamp: i64,
    last_formatted: Option<String>,
}

impl EntityHandler {
    pub fn new(add_way_location: bool) -> Self {
        EntityHandler {
            add_way_location,
            stats: Stats::default(),
            last_timestamp: 0,
            last_formatted: None,
        }
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    pub fn last_timestamp(&self) -> i64 {
        self.last_timestamp
    }

    fn parse_tags(tags: &[(String, String)]) -> Vec<Statement> {
        tags.iter()
            .filter(|(k, _)| k != CREATED_BY)
            .map(|(k, v)| Statement::tag(k.clone(), v.clone()))
            .collect()
    }

    fn finalize(&mut self, obj: &OsmObject, statements: Vec<Statement>) -> Option<Finalized> {
        if statements.is_empty() {
            return None;
        }
        let mut statements = statements;
        if obj.milli_timestamp > self.last_timestamp {
            self.last_timestamp = obj.milli_timestamp;
        }
        statements.push(Statement::string("osmm:type", obj.kind.type_code()));
        statements.push(Statement::int("osmm:version", i64::from(obj.version)));
        statements.push(Statement::string("osmm:user", obj.user.clone()));
        statements.push(Statement::date("osmm:timestamp", obj.milli_timestamp));
        statements.push(Statement::int("osmm:changeset", obj.changeset));

        self.stats.new_statements += statements.len() as u64;
        Some(Finalized {
            kind: obj.kind,
            id: obj.id,
            statements,
            milli_timestamp: obj.milli_timestamp,
        })
    }

    pub fn visit_node(&mut self, obj: &OsmObject) -> Outcome {
        if obj.deleted {
            self.stats.deleted_n += 1;
            return Outcome::Removed { kind: Kind::Node, id: obj.id };
        }
        let mut statements = Self::parse_tags(&obj.tags);
        if statements.is_empty() {
            self.stats.skipped_n += 1;
            return Outcome::Removed { kind: Kind::Node, id: obj.id };
        }
        statements.push(geometry::node_point(obj.geometry.as_ref()));
        self.stats.added_n += 1;
        Outcome::Created(self.finalize(obj, statements).expect("non-empty statements"))
    }

    pub fn visit_way(&mut self, obj: &OsmObject) -> Outcome {
        if obj.deleted {
            self.stats.deleted_w += 1;
            return Outcome::Removed { kind: Kind::Way, id: obj.id };
        }
        let mut statements = Self::parse_tags(&obj.tags);
        if statements.is_empty() {
            self.stats.skipped_w += 1;
            return Outcome::Removed { kind: Kind::Way, id: obj.id };
        }
        statements.push(Statement::bool("osmm:isClosed", obj.is_closed));
        if self.add_way_location {
            statements.push(geometry::way_representative_point(obj.geometry.as_ref()));
        }
        self.stats.added_w += 1;
        Outcome::Created(self.finalize(obj, statements).expect("non-empty statements"))
    }

    pub fn visit_relation(&mut self, obj: &OsmObject) -> Outcome {
        if obj.deleted {
            self.stats.deleted_r += 1;
            return Outcome::Removed { kind: Kind::Relation, id: obj.id };
        }
        let mut statements = Self::parse_tags(&obj.tags);
        for member in &obj.members {
            let iri = member.iri();
            statements.push(Statement::reference("osmm:has", iri.clone()));
            statements.push(Statement::string(iri, member.role.clone()));
        }
        if statements.is_empty() {
            self.stats.skipped_r += 1;
            return Outcome::Removed { kind: Kind::Relation, id: obj.id };
        }
        self.stats.added_r += 1;
        Outcome::Created(self.finalize(obj, statements).expect("non-empty statements"))
    }

    /// Dispatches to the right `visit_*` based on `obj.kind`.
    pub fn visit(&mut self, obj: &OsmObject) -> Outcome {
        match obj.kind {
            Kind::Node => self.visit_node(obj),
            Kind::Way => self.visit_way(obj),
            Kind::Relation => self.visit_relation(obj),
        }
    }

    /// A compact summary of progress so far, or `None` if it's identical to
    /// the last one returned (consecutive-duplicate suppression, ported
    /// from the original `RdfHandler.format_stats`).
    pub fn format_stats(&mut self) -> Option<String> {
        let formatted = self.stats.format();
        if self.last_formatted.as_deref() == Some(formatted.as_str()) {
            return None;
        }
        self.last_formatted = Some(formatted.clone());
        Some(formatted)
    }

    /// Final, unconditional summary; logs and returns it regardless of
    /// dedup state.
    pub fn flush(&mut self) -> String {
        let formatted = self.stats.format();
        info!("final stats: {formatted}");
        self.last_formatted = Some(formatted.clone());
        formatted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Geometry, Member};

    fn node(id: i64, tags: &[(&str, &str)], deleted: bool) -> OsmObject {
        OsmObject {
            kind: Kind::Node,
            id,
            version: 1,
            changeset: 1,
            user: "alice".into(),
            milli_timestamp: 1_000,
            deleted,
            tags: tags.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            geometry: Some(Geometry::Point { lat: 1.0, lon: 2.0 }),
            is_closed: false,
            members: vec![],
        }
    }

    fn created(outcome: Outcome) -> Finalized {
        match outcome {
            Outcome::Created(f) => f,
            Outcome::Removed { kind, id } => panic!("expected Created, got Removed({kind:?}, {id})"),
        }
    }

    #[test]
    fn untagged_node_is_removed() {
        let mut h = EntityHandler::new(true);
        assert!(matches!(
            h.visit_node(&node(1, &[], false)),
            Outcome::Removed { kind: Kind::Node, id: 1 }
        ));
        assert_eq!(h.stats().skipped_n, 1);
        assert_eq!(h.stats().added_n, 0);
    }

    #[test]
    fn deleted_node_is_counted_and_removed() {
        let mut h = EntityHandler::new(true);
        assert!(matches!(
            h.visit_node(&node(1, &[("amenity", "cafe")], true)),
            Outcome::Removed { kind: Kind::Node, id: 1 }
        ));
        assert_eq!(h.stats().deleted_n, 1);
    }

    #[test]
    fn created_by_tag_is_dropped_silently() {
        let mut h = EntityHandler::new(true);
        let obj = node(1, &[("created_by", "JOSM"), ("amenity", "cafe")], false);
        let f = created(h.visit_node(&obj));
        assert!(f.statements.iter().all(|s| !matches!(s, Statement::Tag { key, .. } if key == "created_by")));
    }

    #[test]
    fn tagged_node_gets_five_metadata_statements_and_advances_timestamp() {
        let mut h = EntityHandler::new(true);
        let obj = node(1, &[("amenity", "cafe")], false);
        let f = created(h.visit_node(&obj));
        assert_eq!(h.last_timestamp(), 1_000);
        assert_eq!(h.stats().added_n, 1);
        // tag + point + 5 metadata
        assert_eq!(f.statements.len(), 7);
    }

    #[test]
    fn relation_seeds_statements_from_members_even_without_tags() {
        let mut h = EntityHandler::new(true);
        let obj = OsmObject {
            kind: Kind::Relation,
            id: 9,
            version: 1,
            changeset: 1,
            user: "bob".into(),
            milli_timestamp: 2_000,
            deleted: false,
            tags: vec![],
            geometry: None,
            is_closed: false,
            members: vec![Member {
                kind: Kind::Node,
                id: 5,
                role: "stop".into(),
            }],
        };
        let f = created(h.visit_relation(&obj));
        // has + role + 5 metadata
        assert_eq!(f.statements.len(), 7);
        assert_eq!(h.stats().added_r, 1);
    }

    #[test]
    fn format_stats_suppresses_consecutive_duplicates() {
        let mut h = EntityHandler::new(true);
        h.visit_node(&node(1, &[], false));
        let first = h.format_stats();
        assert!(first.is_some());
        let second = h.format_stats();
        assert!(second.is_none());
        h.visit_node(&node(2, &[], false));
        let third = h.format_stats();
        assert!(third.is_some());
    }
}
