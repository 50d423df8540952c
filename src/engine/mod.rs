mod conflict;
mod error;
mod mutations;
mod queries;

pub use conflict::has_overlap;
pub use error::EngineError;

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedRwLockWriteGuard, RwLock, mpsc, oneshot};
use tracing::{error, info, warn};
use ulid::Ulid;

use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::events::{EventHub, EventKind, LifecycleEvent};
use crate::model::*;
use crate::registry::ResourceRegistry;
use crate::wal::Wal;

pub type SharedBook = Arc<RwLock<ResourceBook>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        record: Record,
        response: oneshot::Sender<io::Result<()>>,
    },
    /// Report the committed length. Everything appended later is carried
    /// over by the next `Compact` that names this offset.
    Fence {
        response: oneshot::Sender<u64>,
    },
    Compact {
        records: Vec<Record>,
        tail_from: u64,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit:
/// block for the first append, drain whatever else is queued, fsync once,
/// answer every sender with the shared result.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { record, response } => {
                let mut batch = vec![(record, response)];
                let mut deferred = None;
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { record, response }) => batch.push((record, response)),
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }
                commit_batch(&mut wal, batch);
                if let Some(other) = deferred {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

/// All or nothing: a batch that fails anywhere is cut out of the file before
/// any sender hears back.
fn commit_batch(wal: &mut Wal, batch: Vec<(Record, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = Instant::now();
    let committed = wal.committed_len();

    let mut result = Ok(());
    for (record, _) in &batch {
        if let Err(e) = wal.append_buffered(record) {
            result = Err(e);
            break;
        }
    }
    let result = result.and_then(|()| wal.flush_sync());
    if let Err(e) = &result {
        warn!("WAL batch of {} failed, rolling back: {e}", batch.len());
        if let Err(e) = wal.rollback(committed) {
            error!("WAL rollback to {committed} bytes failed: {e}");
        }
    }

    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());

    for (_, tx) in batch {
        let reply = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(reply);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Fence { response } => {
            let _ = response.send(wal.committed_len());
        }
        WalCommand::Compact {
            records,
            tail_from,
            response,
        } => {
            let result = wal
                .write_compact_file(&records, tail_from)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { record, response } => commit_batch(wal, vec![(record, response)]),
    }
}

/// The booking coordinator. One instance owns one reservation log.
pub struct Engine {
    pub(super) books: DashMap<ResourceId, SharedBook>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    /// Reverse lookup: reservation id → resource id.
    pub(super) reservation_to_resource: DashMap<Ulid, ResourceId>,
    pub(super) registry: Arc<dyn ResourceRegistry>,
    pub(super) clock: Arc<dyn Clock>,
    pub(super) config: EngineConfig,
    /// One compaction at a time; a fence is only valid for the file it was taken on.
    pub(super) compacting: Mutex<()>,
    pub events: Arc<EventHub>,
}

/// Apply a committed record to a book (caller holds the lock). Idempotent, so
/// entries carried past a compaction fence can replay over the snapshot.
fn apply_to_book(book: &mut ResourceBook, record: &Record, index: &DashMap<Ulid, ResourceId>) {
    match record {
        Record::ReservationCreated(reservation) => {
            index.insert(reservation.id, reservation.resource_id.clone());
            book.insert(reservation.clone());
        }
        Record::Transitioned {
            id,
            status,
            payment_status,
            reason,
            at,
            ..
        } => {
            if let Some(r) = book.get_mut(id) {
                r.status = *status;
                r.payment_status = *payment_status;
                r.reason = reason.clone();
                r.updated_at = *at;
            }
        }
        Record::PaymentRecorded {
            id,
            payment_status,
            at,
            ..
        } => {
            if let Some(r) = book.get_mut(id) {
                r.payment_status = *payment_status;
                r.updated_at = *at;
            }
        }
    }
}

impl Engine {
    /// Replay the log at `wal_path` and start the group-commit writer.
    /// Must be called from inside a tokio runtime.
    pub fn new(
        wal_path: PathBuf,
        registry: Arc<dyn ResourceRegistry>,
        events: Arc<EventHub>,
        config: EngineConfig,
    ) -> io::Result<Self> {
        let replay = Wal::replay(&wal_path)?;
        if replay.discarded_tail {
            warn!(
                "discarded torn tail of {}, truncating to {} bytes",
                wal_path.display(),
                replay.valid_len
            );
            Wal::truncate(&wal_path, replay.valid_len)?;
        }
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let reservation_to_resource = DashMap::new();
        let mut books: HashMap<ResourceId, ResourceBook> = HashMap::new();
        for record in &replay.records {
            let resource_id = record.resource_id();
            let book = books
                .entry(resource_id.to_string())
                .or_insert_with(|| ResourceBook::new(resource_id.to_string()));
            apply_to_book(book, record, &reservation_to_resource);
        }
        info!(
            "replayed {} records into {} resources",
            replay.records.len(),
            books.len()
        );

        Ok(Self {
            books: books
                .into_iter()
                .map(|(id, book)| (id, Arc::new(RwLock::new(book))))
                .collect(),
            wal_tx,
            reservation_to_resource,
            registry,
            clock: Arc::new(SystemClock),
            config,
            compacting: Mutex::new(()),
            events,
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Write a record via the background group-commit writer.
    async fn wal_append(&self, record: &Record) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                record: record.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::Storage("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Storage("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Storage(e.to_string()))
    }

    pub(super) fn get_book(&self, resource_id: &str) -> Option<SharedBook> {
        self.books.get(resource_id).map(|e| e.value().clone())
    }

    /// The one lock per resource. Created on first use and never replaced.
    pub(super) fn book_for(&self, resource_id: &str) -> SharedBook {
        if let Some(book) = self.get_book(resource_id) {
            return book;
        }
        self.books
            .entry(resource_id.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(ResourceBook::new(resource_id.to_string()))))
            .value()
            .clone()
    }

    /// Acquire a resource's write lock, giving up after `lock_timeout`.
    pub(super) async fn lock_book(
        &self,
        resource_id: &str,
        book: SharedBook,
    ) -> Result<OwnedRwLockWriteGuard<ResourceBook>, EngineError> {
        let started = Instant::now();
        let guard = tokio::time::timeout(self.config.lock_timeout, book.write_owned())
            .await
            .map_err(|_| {
                warn!("lock wait on {resource_id} exceeded {:?}", self.config.lock_timeout);
                EngineError::ResourceBusy(resource_id.to_string())
            })?;
        metrics::histogram!(crate::observability::LOCK_WAIT_SECONDS)
            .record(started.elapsed().as_secs_f64());
        Ok(guard)
    }

    /// Lookup reservation → resource, then acquire that resource's write lock.
    pub(super) async fn resolve_reservation_write(
        &self,
        id: &Ulid,
    ) -> Result<OwnedRwLockWriteGuard<ResourceBook>, EngineError> {
        let resource_id = self
            .reservation_to_resource
            .get(id)
            .map(|e| e.value().clone())
            .ok_or(EngineError::NotFound(*id))?;
        let book = self
            .get_book(&resource_id)
            .ok_or(EngineError::NotFound(*id))?;
        self.lock_book(&resource_id, book).await
    }

    /// WAL-append then apply. Nothing is applied if the append fails.
    pub(super) async fn persist_and_apply(
        &self,
        book: &mut ResourceBook,
        record: &Record,
    ) -> Result<(), EngineError> {
        self.wal_append(record).await?;
        apply_to_book(book, record, &self.reservation_to_resource);
        Ok(())
    }

    /// Called with the book's write lock held. Never blocks.
    pub(super) fn publish(&self, kind: EventKind, reservation: &Reservation) {
        self.events
            .publish(LifecycleEvent::for_reservation(kind, reservation));
    }
}
