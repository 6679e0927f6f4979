//! IRI prefixes, literal escaping, and tag-rendering rules.
//!
//! Regex definitions here are the normative source of truth for key and
//! Wikidata-id validity.

use std::fmt::Write as _;

use chrono::{TimeZone, Utc};
use json::JsonValue;
use lazy_static::lazy_static;
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use regex::Regex;

use crate::model::Kind;

/// Emitted verbatim as the `@prefix` header of every Turtle file and as
/// the `PREFIX` preamble of every SPARQL Update request.
pub static PREFIXES: &[(&str, &str)] = &[
    ("wd", "http://www.wikidata.org/entity/"),
    ("xsd", "http://www.w3.org/2001/XMLSchema#"),
    ("geo", "http://www.opengis.net/ont/geosparql#"),
    ("schema", "http://schema.org/"),
    ("osmroot", "https://www.openstreetmap.org"),
    ("osmnode", "https://www.openstreetmap.org/node/"),
    ("osmway", "https://www.openstreetmap.org/way/"),
    ("osmrel", "https://www.openstreetmap.org/relation/"),
    ("osmt", "https://wiki.openstreetmap.org/wiki/Key:"),
    ("osmm", "https://www.openstreetmap.org/meta/"),
];

/// Maximum length of a "valid" tag local name.
const MAX_KEY_LENGTH: usize = 60;

lazy_static! {
    /// Letters/digits/underscore at both ends, letters/digits/underscore/
    /// colon/hyphen in the middle, length <= 60.
    pub static ref RE_SIMPLE_LOCAL_NAME: Regex = Regex::new(&format!(
        r"^[0-9a-zA-Z_]([-:0-9a-zA-Z_]{{0,{}}}[0-9a-zA-Z_])?$",
        MAX_KEY_LENGTH - 2
    ))
    .unwrap();
    pub static ref RE_WIKIDATA_VALUE: Regex = Regex::new(r"^Q[1-9][0-9]{0,18}$").unwrap();
    pub static ref RE_WIKIDATA_MULTI_VALUE: Regex =
        Regex::new(r"^Q[1-9][0-9]{0,18}(;Q[1-9][0-9]{0,18})+$").unwrap();
    pub static ref RE_WIKIPEDIA_VALUE: Regex = Regex::new(r"^([-a-z]+):(.+)$").unwrap();
}

/// Safe set for percent-encoding Wikipedia titles. Includes `#` to
/// preserve anchor fragments.
pub const PERCENT_ENC_SET: &AsciiSet = &CONTROLS
    .add(b';')
    .add(b'@')
    .add(b'$')
    .add(b'!')
    .add(b'*')
    .add(b'(')
    .add(b')')
    .add(b',')
    .add(b'/')
    .add(b'~')
    .add(b':')
    .add(b'#');

/// JSON-escapes `value`, preserving non-ASCII verbatim, and wraps it in
/// double quotes.
pub fn json_string(value: &str) -> String {
    JsonValue::from(value).dump()
}

/// `"YYYY-MM-DDTHH:MM:SSZ"^^xsd:dateTime`.
pub fn xsd_date_time(milli_timestamp: i64) -> String {
    let dt = Utc
        .timestamp_opt(milli_timestamp.div_euclid(1000), 0)
        .single()
        .unwrap_or_else(|| Utc.timestamp_opt(0, 0).unwrap());
    format!(r#""{}"^^xsd:dateTime"#, dt.format("%Y-%m-%dT%H:%M:%SZ"))
}

/// Parses an ISO-8601 UTC timestamp (`YYYY-MM-DDTHH:MM:SSZ`, as returned
/// by a SPARQL endpoint for `schema:dateModified`) into milliseconds since
/// the epoch, mirroring `osm2rdf/utils.py::parse_date`.
pub fn parse_iso_utc(value: &str) -> anyhow::Result<i64> {
    use chrono::NaiveDateTime;
    let naive = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%SZ")
        .or_else(|_| NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.fZ"))?;
    Ok(naive.and_utc().timestamp_millis())
}

/// `osmnode:`/`osmway:`/`osmrel:` plus the decimal id.
pub fn entity_iri(kind: Kind, id: i64) -> String {
    format!("{}:{}", kind.prefix(), id)
}

/// Renders one OSM tag as an `osmt:<key> <object>` fragment, or
/// `osmm:badkey "<key>"` if the key is invalid.
pub fn render_tag(key: &str, value: &str) -> String {
    if !RE_SIMPLE_LOCAL_NAME.is_match(key) {
        return format!("osmm:badkey {}", json_string(key));
    }

    let mut out = format!("osmt:{key} ");
    if key.contains("wikidata") {
        if RE_WIKIDATA_VALUE.is_match(value) {
            write!(out, "wd:{value}").unwrap();
            return out;
        } else if RE_WIKIDATA_MULTI_VALUE.is_match(value) {
            let objects: Vec<String> = value.split(';').map(|v| format!("wd:{v}")).collect();
            out.push_str(&objects.join(","));
            return out;
        }
    } else if key.contains("wikipedia") {
        if let Some(caps) = RE_WIKIPEDIA_VALUE.captures(value) {
            let lang = &caps[1];
            let title = caps[2].replace(' ', "_");
            let title = utf8_percent_encode(&title, PERCENT_ENC_SET);
            write!(out, "<https://{lang}.wikipedia.org/wiki/{title}>").unwrap();
            return out;
        }
    }
    out.push_str(&json_string(value));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::distributions::Alphanumeric;
    use rand::Rng as _;

    #[test]
    fn invalid_key_becomes_badkey() {
        assert_eq!(render_tag("", "x"), r#"osmm:badkey """#);
        assert_eq!(render_tag("a b", "x"), r#"osmm:badkey "a b""#);
    }

    #[test]
    fn wikidata_multi_value_joins_entity_refs() {
        assert_eq!(render_tag("wikidata", "Q1;Q42"), "osmt:wikidata wd:Q1,wd:Q42");
    }

    #[test]
    fn wikipedia_value_percent_encodes_title() {
        assert_eq!(
            render_tag("wikipedia", "en:Foo Bar"),
            "osmt:wikipedia <https://en.wikipedia.org/wiki/Foo_Bar>"
        );
    }

    /// `render_tag` must never panic, regardless of what a tag key/value
    /// looks like — malformed input becomes `osmm:badkey`, not a crash.
    #[test]
    fn render_tag_never_panics_on_random_input() {
        let mut rng = rand::thread_rng();
        for _ in 0..200 {
            let key_len = rng.gen_range(0..80);
            let key: String = (&mut rng).sample_iter(&Alphanumeric).take(key_len).map(char::from).collect();
            let value_len = rng.gen_range(0..40);
            let value: String = (&mut rng).sample_iter(&Alphanumeric).take(value_len).map(char::from).collect();
            let rendered = render_tag(&key, &value);
            assert!(!rendered.is_empty());
        }
    }
}
