use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use anyhow::Context;
use bytes::{Bytes, BytesMut};
use crossbeam_channel::{Receiver, Sender};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::CaptureConfig;
use crate::record::PacketRecord;

/// Asynchronous binary journal: serialized records go into a bounded queue
///  drained by a pool of writer threads appending to a rotating file set.
///
/// `submit` never fails on the caller. When the queue is full it blocks until
///  a writer frees a slot - stalling the capture loop is deliberate, dropping
///  market data is worse. A disk error is fatal: the failing writer records
///  the error, trips the process stop signal and exits.
pub struct Journal {
    /// Taken (and thereby disconnected) on shutdown; the writers exit once
    ///  the queue runs dry after disconnection.
    tx: Mutex<Option<Sender<Bytes>>>,
    writers: Mutex<Vec<JoinHandle<()>>>,
    sink: Arc<Mutex<RotatingSink>>,
    in_flight: Arc<InFlight>,
    failure: Arc<Mutex<Option<anyhow::Error>>>,
}

impl Journal {
    /// Opens the active file and starts the writer pool. `stop` is the
    ///  process-wide stop signal, tripped if a writer hits a disk error.
    pub fn new(config: &CaptureConfig, stop: watch::Sender<bool>) -> anyhow::Result<Journal> {
        let sink = Arc::new(Mutex::new(RotatingSink::open(
            config.log_file.clone(),
            config.log_file_size,
            config.log_file_count,
        )?));

        let (tx, rx) = crossbeam_channel::bounded::<Bytes>(config.async_queue_size);
        let in_flight = Arc::new(InFlight::default());
        let failure: Arc<Mutex<Option<anyhow::Error>>> = Default::default();

        let mut writers = Vec::with_capacity(config.async_threads);
        for worker in 0..config.async_threads {
            let rx = rx.clone();
            let sink = sink.clone();
            let in_flight = in_flight.clone();
            let failure = failure.clone();
            let stop = stop.clone();
            writers.push(
                std::thread::Builder::new()
                    .name(format!("journal-writer-{}", worker))
                    .spawn(move || writer_loop(worker, rx, sink, in_flight, failure, stop))
                    .context("spawning journal writer thread")?,
            );
        }

        info!(
            "journal ready: {} ({} MiB x {} files, {} writers, {} queue slots)",
            config.log_file.display(),
            config.log_file_size / (1024 * 1024),
            config.log_file_count,
            config.async_threads,
            config.async_queue_size,
        );

        Ok(Journal {
            tx: Mutex::new(Some(tx)),
            writers: Mutex::new(writers),
            sink,
            in_flight,
            failure,
        })
    }

    /// Serializes one record and queues it for writing. Blocks while the
    ///  queue is full; never drops.
    pub fn submit(&self, record: &PacketRecord, payload: &[u8]) {
        let stored = &payload[..payload.len().min(record.payload_length as usize)];

        let mut buf = BytesMut::with_capacity(PacketRecord::HEADER_LEN + stored.len());
        record.ser(&mut buf);
        buf.extend_from_slice(stored);

        let tx = self.tx.lock().unwrap();
        let Some(tx) = tx.as_ref() else {
            warn!("journal already shut down, record #{} lost", record.packet_id);
            return;
        };

        self.in_flight.add_one();
        if tx.send(buf.freeze()).is_err() {
            // all writers are gone; the stop signal is already tripped
            self.in_flight.remove_one();
            warn!("journal queue is closed, record #{} lost", record.packet_id);
        }
    }

    /// Waits until every submitted record has reached the file, then flushes
    ///  the write buffer. Returns early if the writer pool has failed.
    pub fn drain(&self) -> anyhow::Result<()> {
        self.in_flight.wait_until_empty();
        if let Some(error) = self.failure.lock().unwrap().as_ref() {
            anyhow::bail!("journal writer failed: {:#}", error);
        }
        self.sink.lock().unwrap().flush()
    }

    /// Drains, stops the writer pool and syncs the active file. The journal
    ///  accepts no further submissions afterwards.
    pub fn shutdown(&self) -> anyhow::Result<()> {
        let drain_result = self.drain();

        // disconnect the queue; writers exit once it runs dry
        drop(self.tx.lock().unwrap().take());

        let writers = std::mem::take(&mut *self.writers.lock().unwrap());
        for handle in writers {
            if handle.join().is_err() {
                error!("journal writer panicked");
            }
        }

        self.sink.lock().unwrap().close()?;
        drain_result
    }

    /// The error that killed the writer pool, if any.
    pub fn take_failure(&self) -> Option<anyhow::Error> {
        self.failure.lock().unwrap().take()
    }
}

fn writer_loop(
    worker: usize,
    rx: Receiver<Bytes>,
    sink: Arc<Mutex<RotatingSink>>,
    in_flight: Arc<InFlight>,
    failure: Arc<Mutex<Option<anyhow::Error>>>,
    stop: watch::Sender<bool>,
) {
    debug!("journal writer {} up", worker);
    while let Ok(entry) = rx.recv() {
        let result = sink.lock().unwrap().append(&entry);
        in_flight.remove_one();

        if let Err(e) = result {
            error!("journal writer {}: write failed, shutting down: {:#}", worker, e);
            failure.lock().unwrap().get_or_insert(e);
            in_flight.abandon();
            let _ = stop.send(true);
            return;
        }
    }
    debug!("journal writer {} down", worker);
}

/// Count of records submitted but not yet written, with a condvar so `drain`
///  can wait for the pipeline to run dry.
#[derive(Default)]
struct InFlight {
    state: Mutex<InFlightState>,
    empty: Condvar,
}

#[derive(Default)]
struct InFlightState {
    count: u64,
    abandoned: bool,
}

impl InFlight {
    fn add_one(&self) {
        self.state.lock().unwrap().count += 1;
    }

    fn remove_one(&self) {
        let mut state = self.state.lock().unwrap();
        state.count -= 1;
        if state.count == 0 {
            self.empty.notify_all();
        }
    }

    /// Called on writer failure so a concurrent `drain` cannot wait forever
    ///  for records that will never be written.
    fn abandon(&self) {
        self.state.lock().unwrap().abandoned = true;
        self.empty.notify_all();
    }

    fn wait_until_empty(&self) {
        let mut state = self.state.lock().unwrap();
        while state.count > 0 && !state.abandoned {
            state = self.empty.wait(state).unwrap();
        }
    }
}

/// The file set behind the journal: one active file appended until it reaches
///  the size threshold, then rotated through numbered slots. `<path>` is the
///  active file, `<path>.1` the most recently rotated, `<path>.N` the oldest
///  retained one.
struct RotatingSink {
    path: PathBuf,
    max_file_size: u64,
    max_files: usize,
    writer: BufWriter<File>,
    current_size: u64,
}

impl RotatingSink {
    fn open(path: PathBuf, max_file_size: u64, max_files: usize) -> anyhow::Result<RotatingSink> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("opening journal file {}", path.display()))?;
        let current_size = file.metadata()?.len();

        Ok(RotatingSink {
            path,
            max_file_size,
            max_files,
            writer: BufWriter::new(file),
            current_size,
        })
    }

    fn append(&mut self, entry: &[u8]) -> anyhow::Result<()> {
        if self.current_size > 0 && self.current_size + entry.len() as u64 > self.max_file_size {
            self.rotate()?;
        }
        self.writer.write_all(entry)?;
        self.current_size += entry.len() as u64;
        Ok(())
    }

    fn flush(&mut self) -> anyhow::Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    fn close(&mut self) -> anyhow::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        Ok(())
    }

    fn slot_path(&self, slot: usize) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(format!(".{}", slot));
        PathBuf::from(name)
    }

    /// Cascade rename: the slot beyond retention is unlinked, every rotated
    ///  file moves one slot up, the active file becomes slot 1 and a fresh
    ///  active file is opened.
    fn rotate(&mut self) -> anyhow::Result<()> {
        self.writer.flush()?;

        let oldest = self.slot_path(self.max_files);
        if oldest.exists() {
            fs::remove_file(&oldest)
                .with_context(|| format!("unlinking {}", oldest.display()))?;
        }
        for slot in (1..self.max_files).rev() {
            let from = self.slot_path(slot);
            if from.exists() {
                let to = self.slot_path(slot + 1);
                fs::rename(&from, &to)
                    .with_context(|| format!("rotating {} -> {}", from.display(), to.display()))?;
            }
        }
        fs::rename(&self.path, self.slot_path(1))
            .with_context(|| format!("rotating {} -> {}", self.path.display(), self.slot_path(1).display()))?;

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("opening fresh journal file {}", self.path.display()))?;
        self.writer = BufWriter::new(file);
        self.current_size = 0;

        debug!("rotated journal, fresh file at {}", self.path.display());
        Ok(())
    }
}
