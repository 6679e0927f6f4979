//! Minutely-replication client and polling loop.
//!
//! No published Rust equivalent of `osmium.replication.server.ReplicationServer`
//! exists (DESIGN.md OQ-2), so this talks to
//! `planet.openstreetmap.org/replication/minute`'s plain HTTP layout
//! directly: `state.txt` for the current sequence, and
//! `NNN/NNN/NNN.osc.gz` for a diff block, mirroring what
//! `osmium::replication::server` does internally.

use std::io::Read as _;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context as _, Result};
use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use log::{info, warn};
use osmnodecache::Cache;
use reqwest::blocking::Client;

use crate::handler::EntityHandler;
use crate::osc_source;
use crate::sparql_pipeline::SparqlUpdatePipeline;

const POLL_INTERVAL: Duration = Duration::from_secs(60);
const PROGRESS_INTERVAL: Duration = Duration::from_secs(60);
const HTTP_TIMEOUT: Duration = Duration::from_secs(60);

pub struct ReplicationClient {
    http: Client,
    base_url: String,
    max_download_bytes: u64,
}

struct ServerState {
    sequence: u64,
    timestamp: Option<DateTime<Utc>>,
}

impl ReplicationClient {
    /// `max_download_kb` bounds a single diff block's compressed size;
    /// blocks advertising a larger `Content-Length` are rejected rather
    /// than downloaded.
    pub fn new(base_url: impl Into<String>, max_download_kb: usize) -> Result<Self> {
        let http = Client::builder()
            .connect_timeout(HTTP_TIMEOUT)
            .timeout(HTTP_TIMEOUT)
            .build()
            .context("building replication HTTP client")?;
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Ok(ReplicationClient {
            http,
            base_url,
            max_download_bytes: max_download_kb as u64 * 1024,
        })
    }

    /// The server's current published sequence id, from the root
    /// `state.txt`.
    pub fn current_sequence(&self) -> Result<u64> {
        Ok(self.state_at_path(&format!("{}/state.txt", self.base_url))?.sequence)
    }

    fn state(&self, seqid: u64) -> Result<ServerState> {
        self.state_at_path(&format!("{}/{}.state.txt", self.base_url, seq_path(seqid)))
    }

    fn state_at_path(&self, url: &str) -> Result<ServerState> {
        let body = self
            .http
            .get(url)
            .send()
            .with_context(|| format!("fetching {url}"))?
            .error_for_status()
            .with_context(|| format!("{url} returned an error status"))?
            .text()
            .with_context(|| format!("reading body of {url}"))?;
        parse_state_txt(&body)
    }

    /// Fetches and gzip-decompresses one `.osc.gz` diff block. Empty on
    /// any fetch error — callers tolerate that as "no data yet".
    pub fn diff_block(&self, seqid: u64) -> Vec<u8> {
        match self.try_diff_block(seqid) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!("failed to fetch diff block #{seqid}: {err:#}");
                Vec::new()
            }
        }
    }

    fn try_diff_block(&self, seqid: u64) -> Result<Vec<u8>> {
        let url = format!("{}/{}.osc.gz", self.base_url, seq_path(seqid));
        let resp = self
            .http
            .get(&url)
            .send()
            .with_context(|| format!("fetching {url}"))?
            .error_for_status()
            .with_context(|| format!("{url} returned an error status"))?;
        if let Some(len) = resp.content_length() {
            if len > self.max_download_bytes {
                bail!("{url} is {len} bytes, exceeding the {} byte cap", self.max_download_bytes);
            }
        }
        let compressed = resp.bytes().with_context(|| format!("reading body of {url}"))?;
        let mut decoder = GzDecoder::new(&compressed[..]);
        let mut out = Vec::new();
        decoder
            .read_to_end(&mut out)
            .with_context(|| format!("decompressing {url}"))?;
        Ok(out)
    }

    /// Backward search for the sequence id whose diff was published
    /// closest to (but not after) `target`, the way
    /// `osmium::replication::server::ReplicationServer::timestamp_to_sequence`
    /// does: estimate from elapsed-minutes arithmetic (sequence numbers
    /// advance by exactly one per minute), then correct with a handful of
    /// probes.
    pub fn timestamp_to_sequence(&self, target: DateTime<Utc>) -> Result<u64> {
        let head = self.state(self.current_sequence()?)?;
        let head_ts = head
            .timestamp
            .context("replication head state has no timestamp")?;

        let minutes_back = (head_ts - target).num_minutes().max(0);
        let mut guess = head.sequence.saturating_sub(minutes_back as u64).max(1);

        for _ in 0..10 {
            let probe = self.state(guess)?;
            let probe_ts = probe.timestamp.context("probed state has no timestamp")?;
            if probe_ts <= target {
                return Ok(guess);
            }
            let overshoot_minutes = (probe_ts - target).num_minutes().max(1);
            guess = guess.saturating_sub(overshoot_minutes as u64).max(1);
        }
        Ok(guess)
    }
}

fn seq_path(seqid: u64) -> String {
    let s = format!("{seqid:09}");
    format!("{}/{}/{}", &s[0..3], &s[3..6], &s[6..9])
}

/// `state.txt` is a Java-properties file; `:` in values is backslash-escaped.
fn parse_state_txt(body: &str) -> Result<ServerState> {
    let mut sequence = None;
    let mut timestamp = None;
    for line in body.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let value = value.replace("\\:", ":");
        match key.trim() {
            "sequenceNumber" => sequence = Some(value.parse().context("invalid sequenceNumber")?),
            "timestamp" => {
                timestamp = Some(
                    DateTime::parse_from_rfc3339(&value)
                        .with_context(|| format!("invalid timestamp `{value}`"))?
                        .with_timezone(&Utc),
                )
            }
            _ => {}
        }
    }
    Ok(ServerState {
        sequence: sequence.context("state.txt missing sequenceNumber")?,
        timestamp,
    })
}

/// Drives the `update` subcommand's main loop: poll the replication
/// server, apply each diff through the entity handler, flush the SPARQL
/// buffer, and advance the committed sequence id only after a successful
/// flush.
pub fn run(
    replication: &ReplicationClient,
    handler: &mut EntityHandler,
    pipeline: &mut SparqlUpdatePipeline,
    node_cache: &mut dyn Cache,
    mut seqid: u64,
) -> Result<()> {
    let mut server_sequence: Option<u64> = None;
    let mut last_tick = Instant::now();
    let mut last_logged_seqid = seqid;

    loop {
        if server_sequence.is_none() {
            match replication.current_sequence() {
                Ok(seq) => server_sequence = Some(seq),
                Err(err) => warn!("failed to refresh replication server state: {err:#}"),
            }
        }

        let mut advanced = false;
        if let Some(server_seq) = server_sequence {
            if seqid <= server_seq {
                let diff = replication.diff_block(seqid);
                if !diff.is_empty() {
                    let mut apply_error: Option<anyhow::Error> = None;
                    osc_source::for_each_object(diff.as_slice(), node_cache, |obj| {
                        if apply_error.is_some() {
                            return;
                        }
                        let outcome = handler.visit(&obj);
                        if let Err(err) = pipeline.apply(outcome) {
                            apply_error = Some(err);
                        }
                    })
                    .with_context(|| format!("parsing diff block #{seqid}"))?;

                    if let Some(err) = apply_error {
                        return Err(err.context(format!("buffering diff block #{seqid}")));
                    }

                    pipeline.flush(seqid)?;
                    seqid += 1;
                    advanced = true;
                }
            }
            if seqid > server_seq {
                server_sequence = None;
            }
        }

        if last_tick.elapsed() >= PROGRESS_INTERVAL {
            let todo = server_sequence.map_or("???".to_string(), |s| (s + 1).saturating_sub(seqid).to_string());
            info!(
                "processed {} diffs, {todo} to go; {}",
                seqid.saturating_sub(last_logged_seqid),
                handler.flush()
            );
            last_logged_seqid = seqid;
            last_tick = Instant::now();
        }

        if !advanced {
            thread::sleep(POLL_INTERVAL);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seq_path_splits_into_three_triplets() {
        assert_eq!(seq_path(123), "000/000/123");
        assert_eq!(seq_path(123_456_789), "123/456/789");
    }

    #[test]
    fn state_txt_unescapes_colons_in_timestamp() {
        let body = "#comment\nsequenceNumber=42\ntimestamp=2024-01-02T03\\:04\\:05Z\n";
        let state = parse_state_txt(body).unwrap();
        assert_eq!(state.sequence, 42);
        assert_eq!(state.timestamp.unwrap().to_rfc3339(), "2024-01-02T03:04:05+00:00");
    }

    #[test]
    fn state_txt_without_sequence_number_errors() {
        assert!(parse_state_txt("timestamp=2024-01-02T03\\:04\\:05Z\n").is_err());
    }
}
