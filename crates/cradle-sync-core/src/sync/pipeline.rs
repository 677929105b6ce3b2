//! Producer/consumer pipeline between a streamed download and the store.
//!
//! The decoder (producer) pushes each record into a bounded channel as soon
//! as it is parsed; a consumer on another blocking thread applies them to
//! the database inside one transaction. The transaction commits only when
//! the producer closes the channel normally, so a phase is all-or-nothing.
//! A full channel blocks the producer, which in turn stops reading from the
//! socket.

use std::future::Future;

use rusqlite::Connection;
use tokio::sync::mpsc;
use tracing::debug;

use super::lock_db;
use crate::codec::ItemSink;
use crate::db::{DbError, DbResult, SharedDatabase};
use crate::error::{SyncError, SyncResult};
use crate::net::NetworkResult;

/// Message on a download channel.
#[derive(Debug)]
pub enum Delivery<T> {
    Item(T),
    /// Producer finished normally.
    Complete,
    /// Producer gave up; the consumer must discard what it received.
    Failed(String),
}

/// Create a bounded download channel.
pub fn download_channel<T>(capacity: usize) -> (DownloadSender<T>, DownloadReceiver<T>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (DownloadSender { tx, closed: false }, DownloadReceiver { rx })
}

/// Producer half. Must be used from a blocking context.
///
/// Dropping a sender without calling [`close`](Self::close) counts as a
/// failure on the consumer side.
pub struct DownloadSender<T> {
    tx: mpsc::Sender<Delivery<T>>,
    closed: bool,
}

impl<T> DownloadSender<T> {
    /// Send one record, waiting while the channel is full.
    pub fn send(&self, item: T) -> SyncResult<()> {
        if self.closed {
            return Err(SyncError::ChannelFailed("send on closed channel".into()));
        }
        self.tx
            .blocking_send(Delivery::Item(item))
            .map_err(|_| SyncError::ChannelFailed("consumer stopped receiving".into()))
    }

    /// Signal normal completion. Idempotent.
    pub fn close(&mut self) -> SyncResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.tx
            .blocking_send(Delivery::Complete)
            .map_err(|_| SyncError::ChannelFailed("consumer stopped receiving".into()))
    }

    /// Signal failure. Idempotent, and a no-op after `close`.
    pub fn fail(&mut self, reason: impl Into<String>) {
        if self.closed {
            return;
        }
        self.closed = true;
        // A consumer that is already gone needs no notice
        self.tx.blocking_send(Delivery::Failed(reason.into())).ok();
    }
}

/// Consumer half.
pub struct DownloadReceiver<T> {
    rx: mpsc::Receiver<Delivery<T>>,
}

impl<T> DownloadReceiver<T> {
    /// Next message; `None` once every sender is gone.
    pub fn recv_blocking(&mut self) -> Option<Delivery<T>> {
        self.rx.blocking_recv()
    }
}

/// Apply every record from `rx` to the database in a single transaction.
///
/// Blocks; run it on a blocking thread. Commits on [`Delivery::Complete`] and
/// returns the number of records written. On [`Delivery::Failed`], an early
/// end of the channel, or a `writer` error, the transaction is rolled back
/// and the error returned.
pub fn write_in_transaction<T, W>(
    db: &SharedDatabase,
    mut rx: DownloadReceiver<T>,
    mut writer: W,
) -> SyncResult<usize>
where
    W: FnMut(&Connection, T) -> DbResult<()>,
{
    let mut guard = lock_db(db)?;
    let tx = guard.transaction()?;
    let mut written = 0;

    loop {
        match rx.recv_blocking() {
            Some(Delivery::Item(item)) => {
                writer(&tx, item)?;
                written += 1;
            }
            Some(Delivery::Complete) => {
                tx.commit().map_err(DbError::from)?;
                debug!(written, "download transaction committed");
                return Ok(written);
            }
            Some(Delivery::Failed(reason)) => {
                debug!(written, %reason, "download failed, rolling back");
                return Err(SyncError::ChannelFailed(reason));
            }
            None => {
                return Err(SyncError::ChannelFailed(
                    "download ended before completion".into(),
                ))
            }
        }
    }
}

/// Run `producer` against a fresh download channel while a consumer writes
/// its records to the database.
///
/// Success requires both sides to succeed; the count of written records is
/// returned next to the producer's value. A local write failure takes
/// precedence over the producer's resulting channel error.
pub async fn stream_into_store<T, R, W, P, Fut>(
    db: &SharedDatabase,
    capacity: usize,
    writer: W,
    producer: P,
) -> NetworkResult<(R, usize)>
where
    T: Send + 'static,
    W: FnMut(&Connection, T) -> DbResult<()> + Send + 'static,
    P: FnOnce(DownloadSender<T>) -> Fut,
    Fut: Future<Output = NetworkResult<R>>,
{
    let (sender, receiver) = download_channel(capacity);
    let consumer_db = db.clone();
    let consumer =
        tokio::task::spawn_blocking(move || write_in_transaction(&consumer_db, receiver, writer));

    let produced = producer(sender).await;
    let written = match consumer.await {
        Ok(written) => written,
        Err(e) => Err(e.into()),
    };

    match (produced, written) {
        (NetworkResult::Success { value, status_code }, Ok(count)) => NetworkResult::Success {
            value: (value, count),
            status_code,
        },
        (NetworkResult::Success { .. }, Err(e)) => NetworkResult::NetworkException(e),
        (NetworkResult::NetworkException(_), Err(e)) if !matches!(e, SyncError::ChannelFailed(_)) => {
            NetworkResult::NetworkException(e)
        }
        (other, _) => other.cast(),
    }
}

/// Callback receiving `(received, total)` after each forwarded record.
pub type ProgressFn = Box<dyn FnMut(u32, u32) + Send>;

/// [`ItemSink`] that forwards decoded records into a download channel.
pub struct ForwardingSink<T> {
    sender: DownloadSender<T>,
    on_progress: ProgressFn,
    received: u32,
    total: u32,
}

impl<T> ForwardingSink<T> {
    pub fn new(sender: DownloadSender<T>, on_progress: ProgressFn) -> Self {
        Self {
            sender,
            on_progress,
            received: 0,
            total: 0,
        }
    }

    /// Close the channel normally.
    pub fn finish(mut self) -> SyncResult<()> {
        self.sender.close()
    }

    /// Close the channel with a failure.
    pub fn abort(mut self, error: &SyncError) {
        self.sender.fail(error.to_string());
    }
}

impl<T> ItemSink<T> for ForwardingSink<T> {
    fn total(&mut self, total: u64) {
        self.total = u32::try_from(total).unwrap_or(u32::MAX);
    }

    fn item(&mut self, item: T) -> SyncResult<()> {
        self.sender.send(item)?;
        self.received += 1;
        (self.on_progress)(self.received, self.total.max(self.received));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{upsert_patient, Database};
    use crate::models::{Patient, Sex};
    use std::sync::{Arc, Mutex};

    fn setup_db() -> SharedDatabase {
        Database::open_in_memory().unwrap().into_shared()
    }

    fn patient(n: usize) -> Patient {
        let mut p = Patient::new(format!("Patient {}", n), Sex::Female);
        p.id = format!("p{:04}", n);
        p.base = Some(1);
        p.last_edited = Some(1);
        p
    }

    fn write_patient(conn: &Connection, p: Patient) -> DbResult<()> {
        upsert_patient(conn, &p)
    }

    fn patient_count(db: &SharedDatabase) -> usize {
        db.lock().unwrap().list_patients().unwrap().len()
    }

    #[tokio::test]
    async fn test_commit_on_close() {
        let db = setup_db();
        let (mut sender, receiver) = download_channel::<Patient>(4);

        let consumer_db = db.clone();
        let consumer = tokio::task::spawn_blocking(move || {
            write_in_transaction(&consumer_db, receiver, write_patient)
        });
        tokio::task::spawn_blocking(move || {
            for n in 0..20 {
                sender.send(patient(n)).unwrap();
            }
            sender.close().unwrap();
            sender.close().unwrap();
        })
        .await
        .unwrap();

        assert_eq!(consumer.await.unwrap().unwrap(), 20);
        assert_eq!(patient_count(&db), 20);
    }

    #[tokio::test]
    async fn test_failure_mid_stream_rolls_back() {
        let db = setup_db();
        let (mut sender, receiver) = download_channel::<Patient>(8);

        let consumer_db = db.clone();
        let consumer = tokio::task::spawn_blocking(move || {
            write_in_transaction(&consumer_db, receiver, write_patient)
        });
        tokio::task::spawn_blocking(move || {
            for n in 0..50 {
                sender.send(patient(n)).unwrap();
            }
            sender.fail("parse error at element 50");
            sender.fail("second failure is ignored");
        })
        .await
        .unwrap();

        let err = consumer.await.unwrap().unwrap_err();
        assert!(matches!(err, SyncError::ChannelFailed(ref r) if r.contains("element 50")));
        assert_eq!(patient_count(&db), 0);
    }

    #[tokio::test]
    async fn test_dropped_sender_rolls_back() {
        let db = setup_db();
        let (sender, receiver) = download_channel::<Patient>(8);

        let consumer_db = db.clone();
        let consumer = tokio::task::spawn_blocking(move || {
            write_in_transaction(&consumer_db, receiver, write_patient)
        });
        tokio::task::spawn_blocking(move || {
            sender.send(patient(1)).unwrap();
            drop(sender);
        })
        .await
        .unwrap();

        assert!(consumer.await.unwrap().is_err());
        assert_eq!(patient_count(&db), 0);
    }

    #[tokio::test]
    async fn test_writer_error_stops_producer() {
        let db = setup_db();
        let (sender, receiver) = download_channel::<Patient>(1);

        let consumer_db = db.clone();
        let consumer = tokio::task::spawn_blocking(move || {
            write_in_transaction(&consumer_db, receiver, |conn: &Connection, p: Patient| {
                if p.id == "p0003" {
                    return Err(DbError::Constraint("rejected".into()));
                }
                upsert_patient(conn, &p)
            })
        });
        let producer = tokio::task::spawn_blocking(move || {
            let mut sent = 0;
            for n in 0..100 {
                if sender.send(patient(n)).is_err() {
                    break;
                }
                sent += 1;
            }
            sent
        });

        let err = consumer.await.unwrap().unwrap_err();
        assert!(matches!(err, SyncError::Database(DbError::Constraint(_))));
        assert!(producer.await.unwrap() < 100);
        assert_eq!(patient_count(&db), 0);
    }

    #[tokio::test]
    async fn test_stream_into_store_success() {
        let db = setup_db();

        let result = stream_into_store(&db, 4, write_patient, |sender| async move {
            let value = tokio::task::spawn_blocking(move || {
                let mut sink = ForwardingSink::new(sender, Box::new(|_, _| {}));
                for n in 0..10 {
                    sink.item(patient(n))?;
                }
                sink.finish()?;
                Ok::<_, SyncError>("done")
            })
            .await
            .unwrap()
            .unwrap();
            NetworkResult::Success {
                value,
                status_code: 200,
            }
        })
        .await;

        assert_eq!(result.unwrapped(), Some(("done", 10)));
        assert_eq!(patient_count(&db), 10);
    }

    #[tokio::test]
    async fn test_stream_into_store_server_failure() {
        let db = setup_db();

        let result: NetworkResult<((), usize)> =
            stream_into_store(&db, 4, write_patient, |sender| async move {
                drop(sender);
                NetworkResult::<()>::Failure {
                    body: b"boom".to_vec(),
                    status_code: 500,
                }
            })
            .await;

        assert_eq!(result.status_code(), Some(500));
        assert_eq!(patient_count(&db), 0);
    }

    #[test]
    fn test_forwarding_sink_progress() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let (sender, mut receiver) = download_channel::<u32>(16);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_in_sink = seen.clone();

        runtime.block_on(async {
            tokio::task::spawn_blocking(move || {
                let mut sink = ForwardingSink::new(
                    sender,
                    Box::new(move |cur, total| seen_in_sink.lock().unwrap().push((cur, total))),
                );
                sink.total(3);
                for n in 0..3 {
                    sink.item(n).unwrap();
                }
                sink.finish().unwrap();
            })
            .await
            .unwrap();
        });

        assert_eq!(*seen.lock().unwrap(), vec![(1, 3), (2, 3), (3, 3)]);
        let mut delivered = Vec::new();
        while let Some(d) = receiver.recv_blocking() {
            delivered.push(d);
        }
        assert!(matches!(delivered.last(), Some(Delivery::Complete)));
        assert_eq!(delivered.len(), 4);
    }
}
