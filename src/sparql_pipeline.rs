//! SPARQL 1.1 Update pipeline, following the `pending`/`flush`/
//! `get_osm_schema_ver` and `set_status_query`/`query_status` shape of
//! `osm2rdf/RdfUpdateHandler.py` and `osm2rdf/utils.py`, wired over HTTP
//! via a blocking `reqwest::blocking::Client`.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{bail, Context as _, Result};
use log::info;
use reqwest::blocking::Client;

use crate::handler::Outcome;
use crate::statement::Statement;
use crate::vocab::{self, PREFIXES};

const FLUSH_THRESHOLD: usize = 5000;
const HTTP_TIMEOUT: Duration = Duration::from_secs(60);

/// Thin wrapper over the SPARQL 1.1 endpoint's HTTP surface, following
/// the shape of the Python `Sparql` class.
pub struct SparqlClient {
    http: Client,
    endpoint: String,
    dry_run: bool,
}

impl SparqlClient {
    pub fn new(endpoint: impl Into<String>, dry_run: bool) -> Result<Self> {
        let http = Client::builder()
            .connect_timeout(HTTP_TIMEOUT)
            .timeout(HTTP_TIMEOUT)
            .build()
            .context("building SPARQL HTTP client")?;
        Ok(SparqlClient {
            http,
            endpoint: endpoint.into(),
            dry_run,
        })
    }

    /// `POST {endpoint}` with `update=<sparql>`, form-urlencoded.
    pub fn update(&self, sparql: &str) -> Result<()> {
        if self.dry_run {
            info!("[dry-run] would send SPARQL update ({} bytes)", sparql.len());
            return Ok(());
        }
        let resp = self
            .http
            .post(&self.endpoint)
            .form(&[("update", sparql)])
            .send()
            .context("sending SPARQL update")?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().unwrap_or_default();
            bail!("SPARQL update failed ({status}): {body}");
        }
        Ok(())
    }

    /// `GET {endpoint}?query=<sparql>` with
    /// `Accept: application/sparql-results+json`, returning the first
    /// bindings row, or `None` if the result set is empty.
    pub fn query(&self, sparql: &str) -> Result<Option<HashMap<String, String>>> {
        let resp = self
            .http
            .get(&self.endpoint)
            .query(&[("query", sparql)])
            .header("Accept", "application/sparql-results+json")
            .send()
            .context("sending SPARQL query")?;
        if !resp.status().is_success() {
            bail!("SPARQL query failed: {}", resp.status());
        }
        let body = resp.text().context("reading SPARQL query response")?;
        let parsed = json::parse(&body).context("parsing SPARQL JSON results")?;
        let bindings = &parsed["results"]["bindings"];
        if !bindings.is_array() || bindings.is_empty() {
            return Ok(None);
        }
        let mut row = HashMap::new();
        for (key, value) in bindings[0].entries() {
            if let Some(v) = value["value"].as_str() {
                row.insert(key.to_string(), v.to_string());
            }
        }
        Ok(Some(row))
    }
}

/// Buffers finalized entities into prefixed-subject → rendered-statement
/// groups and periodically flushes them as one SPARQL Update request.
/// `None` in the buffer means "delete this subject's statements, insert
/// nothing" (object was deleted, or no longer carries any live
/// statement).
pub struct SparqlUpdatePipeline {
    client: SparqlClient,
    order: Vec<String>,
    pending: HashMap<String, Option<Vec<String>>>,
    pending_statement_count: usize,
    last_timestamp: i64,
}

impl SparqlUpdatePipeline {
    pub fn new(client: SparqlClient) -> Self {
        SparqlUpdatePipeline {
            client,
            order: Vec::new(),
            pending: HashMap::new(),
            pending_statement_count: 0,
            last_timestamp: 0,
        }
    }

    /// Applies one handler outcome, flushing first if the subject is
    /// already buffered (exactly one delete entry per object per flush
    /// window).
    pub fn apply(&mut self, outcome: Outcome) -> Result<()> {
        let (prefixed_id, statements, milli_timestamp) = match outcome {
            Outcome::Created(f) => (format!("{}:{}", f.kind.prefix(), f.id), Some(f.statements), Some(f.milli_timestamp)),
            Outcome::Removed { kind, id } => (format!("{}:{}", kind.prefix(), id), None, None),
        };

        if self.pending.contains_key(&prefixed_id) {
            self.flush(0)?;
        }

        match statements {
            Some(statements) => {
                self.pending_statement_count += statements.len();
                let rendered: Vec<String> = statements
                    .iter()
                    .map(|s| format!("{prefixed_id} {s} ."))
                    .collect();
                self.pending.insert(prefixed_id.clone(), Some(rendered));
            }
            None => {
                self.pending_statement_count += 1;
                self.pending.insert(prefixed_id.clone(), None);
            }
        }
        self.order.push(prefixed_id);
        if let Some(ts) = milli_timestamp {
            if ts > self.last_timestamp {
                self.last_timestamp = ts;
            }
        }

        if self.pending_statement_count > FLUSH_THRESHOLD {
            self.flush(0)?;
        }
        Ok(())
    }

    /// Flushes the buffer as a single SPARQL Update request. If `seqid` is
    /// non-zero, appends a status-update block that atomically replaces
    /// `osmroot: schema:version` and `schema:dateModified`.
    pub fn flush(&mut self, seqid: u64) -> Result<()> {
        let mut sparql = String::new();

        if !self.order.is_empty() {
            let subjects: Vec<&str> = self.order.iter().map(String::as_str).collect();
            sparql.push_str(&format!(
                "\nDELETE {{ ?s ?p ?o . }}\nWHERE {{\n  VALUES ?s {{ {} }}\n  ?s ?p ?o .\n  FILTER (osmm:task != ?p)\n}};",
                subjects.join(" ")
            ));

            let inserts: Vec<&String> = self
                .order
                .iter()
                .filter_map(|id| self.pending.get(id).and_then(|v| v.as_ref()))
                .flatten()
                .collect();
            if !inserts.is_empty() {
                let lines: Vec<String> = inserts.iter().map(|s| s.to_string()).collect();
                sparql.push_str(&format!("\nINSERT {{ {} }} WHERE {{}};\n", lines.join("\n")));
            }
        }

        if seqid > 0 {
            if self.last_timestamp < 978_307_200_000 {
                bail!("last_timestamp was not updated before status flush");
            }
            sparql.push_str(&status_update_query(
                "osmroot:",
                self.last_timestamp,
                "version",
                seqid,
            ));
        }

        if !sparql.is_empty() {
            let prefix_block: String = PREFIXES
                .iter()
                .map(|(p, iri)| format!("PREFIX {p}: <{iri}>"))
                .collect::<Vec<_>>()
                .join("\n");
            self.client.update(&format!("{prefix_block}\n\n{sparql}"))?;
            self.order.clear();
            self.pending.clear();
            self.pending_statement_count = 0;
        } else if self.pending_statement_count != 0 {
            bail!(
                "pending_statement_count={} but nothing to flush",
                self.pending_statement_count
            );
        }
        Ok(())
    }

    /// Looks up `osmroot: schema:version`, falling back to
    /// `schema:dateModified` minus 60 minutes when version is unset,
    /// matching `RdfUpdateHandler.get_osm_schema_ver`.
    pub fn query_status(&self) -> Result<StatusProbe> {
        let sparql = format!(
            "SELECT ?dummy ?dateModified ?version WHERE {{\n BIND(\"42\" as ?dummy)\n OPTIONAL {{ osmroot: schema:dateModified ?dateModified . }}\n OPTIONAL {{ osmroot: schema:version ?version . }}\n}}"
        );
        let prefix_block: String = PREFIXES
            .iter()
            .map(|(p, iri)| format!("PREFIX {p}: <{iri}>"))
            .collect::<Vec<_>>()
            .join("\n");
        let row = self
            .client
            .query(&format!("{prefix_block}\n{sparql}"))?
            .context("empty SPARQL status result")?;
        if row.get("dummy").map(String::as_str) != Some("42") {
            bail!("failed to get a dummy value from the RDF store");
        }
        Ok(StatusProbe {
            version: row.get("version").and_then(|v| v.parse().ok()),
            date_modified: row
                .get("dateModified")
                .map(|v| vocab::parse_iso_utc(v))
                .transpose()?,
        })
    }
}

pub struct StatusProbe {
    pub version: Option<u64>,
    pub date_modified: Option<i64>,
}

/// Atomically replaces `{uri} schema:dateModified` and `{uri} schema:{field}`,
/// ported from `osm2rdf/utils.py::set_status_query`.
fn status_update_query(uri: &str, last_timestamp: i64, field: &str, value: u64) -> String {
    format!(
        "\nDELETE {{ {uri} schema:dateModified ?m . }} WHERE {{ {uri} schema:dateModified ?m . }};\nDELETE {{ {uri} schema:{field} ?v . }} WHERE {{ {uri} schema:{field} ?v . }};\nINSERT {{\n {uri} schema:dateModified {} .\n {uri} schema:{field} {value} .\n}} WHERE {{}};",
        vocab::xsd_date_time(last_timestamp)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::Finalized;
    use crate::model::Kind;

    fn pipeline() -> SparqlUpdatePipeline {
        SparqlUpdatePipeline::new(SparqlClient::new("http://localhost:9999/bigdata/sparql", true).unwrap())
    }

    #[test]
    fn created_entity_is_buffered_until_flush() {
        let mut p = pipeline();
        p.apply(Outcome::Created(Finalized {
            kind: Kind::Node,
            id: 1,
            statements: vec![Statement::bool("osmm:isClosed", false)],
            milli_timestamp: 978_307_200_000,
        }))
        .unwrap();
        assert_eq!(p.pending_statement_count, 1);
        p.flush(0).unwrap();
        assert_eq!(p.pending_statement_count, 0);
        assert!(p.order.is_empty());
    }

    #[test]
    fn repeated_subject_flushes_before_re_insert() {
        let mut p = pipeline();
        p.apply(Outcome::Created(Finalized {
            kind: Kind::Node,
            id: 1,
            statements: vec![Statement::bool("osmm:isClosed", false)],
            milli_timestamp: 978_307_200_000,
        }))
        .unwrap();
        // Same subject again: must flush internally rather than double-insert.
        p.apply(Outcome::Removed { kind: Kind::Node, id: 1 }).unwrap();
        assert_eq!(p.order.len(), 1);
        assert!(p.pending.get("osmnode:1").unwrap().is_none());
    }

    #[test]
    fn status_flush_requires_advanced_timestamp() {
        let mut p = pipeline();
        assert!(p.flush(5).is_err());
    }
}
