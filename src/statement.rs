//! Statement model: a closed tagged union over RDF-statement kinds and
//! their rendering to Turtle fragments.

use std::borrow::Cow;
use std::fmt;

use crate::vocab;

/// One RDF statement about the current entity-subject, in the fixed set
/// of kinds this system ever produces.
///
/// Rendering is total: every variant always produces a valid Turtle
/// predicate-object fragment (no trailing `;`/`.`  — joining statements
/// into an entity block is [`render_block`]'s job). `Way`/`Point` never
/// fail here because the geometry adapter (`crate::geometry`) has already
/// resolved or failed over before a statement is constructed.
#[derive(Debug, Clone)]
pub enum Statement {
    Bool {
        predicate: Cow<'static, str>,
        value: bool,
    },
    Date {
        predicate: Cow<'static, str>,
        milli_timestamp: i64,
    },
    Int {
        predicate: Cow<'static, str>,
        value: i64,
    },
    /// An object that is itself an IRI rather than a literal, e.g.
    /// `osmm:has osmway:99`.
    Ref {
        predicate: Cow<'static, str>,
        target: String,
    },
    Str {
        predicate: Cow<'static, str>,
        value: String,
    },
    /// A raw OSM tag; key validation and wikidata/wikipedia rewriting
    /// happen at render time.
    Tag { key: String, value: String },
    /// A way reduced to its representative interior point.
    Way {
        predicate: Cow<'static, str>,
        lat: f64,
        lon: f64,
    },
    /// A node's own point.
    Point {
        predicate: Cow<'static, str>,
        lat: f64,
        lon: f64,
    },
}

impl Statement {
    pub fn bool(predicate: impl Into<Cow<'static, str>>, value: bool) -> Self {
        Statement::Bool {
            predicate: predicate.into(),
            value,
        }
    }

    pub fn date(predicate: impl Into<Cow<'static, str>>, milli_timestamp: i64) -> Self {
        Statement::Date {
            predicate: predicate.into(),
            milli_timestamp,
        }
    }

    pub fn int(predicate: impl Into<Cow<'static, str>>, value: i64) -> Self {
        Statement::Int {
            predicate: predicate.into(),
            value,
        }
    }

    pub fn reference(predicate: impl Into<Cow<'static, str>>, target: impl Into<String>) -> Self {
        Statement::Ref {
            predicate: predicate.into(),
            target: target.into(),
        }
    }

    pub fn string(predicate: impl Into<Cow<'static, str>>, value: impl Into<String>) -> Self {
        Statement::Str {
            predicate: predicate.into(),
            value: value.into(),
        }
    }

    pub fn tag(key: impl Into<String>, value: impl Into<String>) -> Self {
        Statement::Tag {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn point(predicate: impl Into<Cow<'static, str>>, lat: f64, lon: f64) -> Self {
        Statement::Point {
            predicate: predicate.into(),
            lat,
            lon,
        }
    }

    pub fn way_point(predicate: impl Into<Cow<'static, str>>, lat: f64, lon: f64) -> Self {
        Statement::Way {
            predicate: predicate.into(),
            lat,
            lon,
        }
    }
}

fn fmt_point(f: &mut fmt::Formatter<'_>, predicate: &str, lat: f64, lon: f64) -> fmt::Result {
    write!(f, r#"{predicate} "Point({lon} {lat})"^^geo:wktLiteral"#)
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Statement::Bool { predicate, value } => {
                let v = if *value { "true" } else { "false" };
                write!(f, r#"{predicate} "{v}"^^xsd:boolean"#)
            }
            Statement::Date {
                predicate,
                milli_timestamp,
            } => write!(f, "{predicate} {}", vocab::xsd_date_time(*milli_timestamp)),
            Statement::Int { predicate, value } => {
                write!(f, r#"{predicate} "{value}"^^xsd:integer"#)
            }
            Statement::Ref { predicate, target } => write!(f, "{predicate} {target}"),
            Statement::Str { predicate, value } => {
                write!(f, "{predicate} {}", vocab::json_string(value))
            }
            Statement::Tag { key, value } => write!(f, "{}", vocab::render_tag(key, value)),
            Statement::Way { predicate, lat, lon } => fmt_point(f, predicate, *lat, *lon),
            Statement::Point { predicate, lat, lon } => fmt_point(f, predicate, *lat, *lon),
        }
    }
}

/// Joins the statements of one entity into the body of a Turtle block
/// (without the leading `<prefix><id>\n` subject line):
/// `<s1>;\n<s2>;\n…;\n<sN>.\n`.
pub fn render_block(statements: &[Statement]) -> String {
    let mut out = String::new();
    for (i, s) in statements.iter().enumerate() {
        use std::fmt::Write as _;
        let sep = if i + 1 == statements.len() { "." } else { ";" };
        writeln!(out, "{s}{sep}").unwrap();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_block_matches_the_documented_output_shape() {
        let block = render_block(&[
            Statement::tag("amenity", "cafe"),
            Statement::bool("osmm:isClosed", true),
            Statement::int("osmm:version", 3),
            Statement::point("osmm:loc", 52.5, 13.4),
        ]);
        insta::assert_snapshot!(block, @r###"
        osmt:amenity "cafe";
        osmm:isClosed "true"^^xsd:boolean;
        osmm:version "3"^^xsd:integer;
        osmm:loc "Point(13.4 52.5)"^^geo:wktLiteral.
        "###);
    }

    #[test]
    fn wikidata_tag_renders_as_an_entity_reference() {
        let rendered = Statement::tag("wikidata", "Q64").to_string();
        assert_eq!(rendered, "osmt:wikidata wd:Q64");
    }
}
