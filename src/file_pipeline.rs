//! Bulk Turtle-file writer pipeline: a bounded queue feeding a fixed pool
//! of worker threads, generalized from a single writer thread to `W` of
//! them (parsing itself stays single-threaded; this is the only part of
//! the pipeline that runs in parallel).

use std::fs::OpenOptions;
use std::io::Write as _;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use flate2::write::GzEncoder;
use flate2::Compression;
use log::info;
use path_absolutize::Absolutize as _;

use crate::handler::Finalized;
use crate::statement::render_block;
use crate::vocab::{self, PREFIXES};

const GZIP_LEVEL: u32 = 3;

struct WriteJob {
    counter: u32,
    entries: Vec<Finalized>,
    high_water_timestamp: i64,
}

/// Producer-side handle: accumulates finalized entities and hands off
/// batches to the worker pool once they cross the statement-count
/// threshold.
pub struct FilePipeline {
    sender: Option<SyncSender<WriteJob>>,
    workers: Vec<JoinHandle<()>>,
    job_counter: Arc<AtomicU32>,
    pending: Vec<Finalized>,
    pending_statements: usize,
    max_statements: usize,
    batch_high_water: i64,
}

impl FilePipeline {
    /// `max_statements_thousands` is the CLI's `--max-statements` value;
    /// the actual threshold is that many thousand statements per file.
    pub fn new(output_dir: &Path, workers: usize, max_statements_thousands: usize) -> Self {
        let (sender, receiver) = sync_channel::<WriteJob>(1);
        let receiver = Arc::new(Mutex::new(receiver));
        let job_counter = Arc::new(AtomicU32::new(1));
        let worker_count = workers.max(1);
        let mut handles = Vec::with_capacity(worker_count);
        for i in 0..worker_count {
            let receiver = Arc::clone(&receiver);
            let output_dir = output_dir.to_path_buf();
            handles.push(
                thread::Builder::new()
                    .name(format!("ttl-writer-{i}"))
                    .spawn(move || writer_loop(&output_dir, &receiver))
                    .expect("failed to spawn ttl writer thread"),
            );
        }
        FilePipeline {
            sender: Some(sender),
            workers: handles,
            job_counter,
            pending: Vec::new(),
            pending_statements: 0,
            max_statements: max_statements_thousands * 1000,
            batch_high_water: 0,
        }
    }

    /// Enqueues one finalized entity, flushing a job to the worker pool if
    /// the pending batch has crossed the threshold.
    pub fn push(&mut self, entry: Finalized) {
        self.pending_statements += entry.statements.len();
        if entry.milli_timestamp > self.batch_high_water {
            self.batch_high_water = entry.milli_timestamp;
        }
        self.pending.push(entry);
        if self.pending_statements > self.max_statements {
            self.flush_pending();
        }
    }

    fn flush_pending(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let entries = std::mem::take(&mut self.pending);
        self.pending_statements = 0;
        let high_water_timestamp = self.batch_high_water;
        self.batch_high_water = 0;
        let counter = self.job_counter.fetch_add(1, Ordering::Relaxed);
        let job = WriteJob {
            counter,
            entries,
            high_water_timestamp,
        };
        self.sender
            .as_ref()
            .expect("pipeline already finished")
            .send(job)
            .expect("writer pool still alive while producer is running");
    }

    /// Flushes the final partial batch, signals workers to shut down (by
    /// dropping the sender), and joins them. Propagates any worker panic
    /// by panicking itself.
    pub fn finish(mut self) {
        self.flush_pending();
        drop(self.sender.take());
        for handle in self.workers {
            handle.join().expect("ttl writer thread panicked");
        }
    }
}

fn writer_loop(output_dir: &Path, receiver: &Mutex<Receiver<WriteJob>>) {
    loop {
        let job = {
            let rx = receiver.lock().unwrap();
            rx.recv()
        };
        let Ok(job) = job else { break };
        write_job(output_dir, job);
    }
}

fn write_job(output_dir: &Path, job: WriteJob) {
    let path = output_dir.join(format!("osm-{:06}.ttl.gz", job.counter));
    info!("Creating {:?}", path.absolutize().unwrap_or_else(|_| path.clone().into()));
    let file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&path)
        .unwrap_or_else(|e| panic!("creating {path:?}: {e}"));
    let mut enc = GzEncoder::new(file, Compression::new(GZIP_LEVEL));

    for (prefix, iri) in PREFIXES {
        writeln!(enc, "@prefix {prefix}: <{iri}> .").unwrap();
    }

    for entry in &job.entries {
        writeln!(enc, "\n{}", entry_subject(entry)).unwrap();
        write!(enc, "{}", render_block(&entry.statements)).unwrap();
    }

    if is_real_timestamp(job.high_water_timestamp) {
        writeln!(
            enc,
            "\nosmroot: schema:dateModified {}.",
            vocab::xsd_date_time(job.high_water_timestamp)
        )
        .unwrap();
    }

    enc.finish().unwrap_or_else(|e| panic!("closing {path:?}: {e}"));
}

fn entry_subject(entry: &Finalized) -> String {
    format!("{}:{}", entry.kind.prefix(), entry.id)
}

/// Guards against an unset (epoch-zero) high-water mark.
fn is_real_timestamp(milli_timestamp: i64) -> bool {
    const YEAR_2001_MILLIS: i64 = 978_307_200_000;
    milli_timestamp >= YEAR_2001_MILLIS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn year_2001_guard_matches_boundary() {
        assert!(!is_real_timestamp(0));
        assert!(is_real_timestamp(978_307_200_000));
        assert!(!is_real_timestamp(978_307_199_999));
    }
}
