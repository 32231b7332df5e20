//! Structured request log
//!
//! Every query the sinkhole accepts is appended to a date-stamped log file
//! as a human-readable block: transport, client endpoint, millisecond
//! timestamp, a parsed question summary, and a canonical hex dump of the
//! raw bytes.
//!
//! # Design
//!
//! 1. **Non-blocking submission**: records are formatted by the caller and
//!    handed to a bounded channel with `try_send`; the handler never waits
//!    on disk I/O. Records dropped at a full queue are counted.
//! 2. **Flush discipline**: the writer task flushes after every record and
//!    syncs on a 1-second ticker.
//! 3. **Reopen on failure**: a failed write closes and reopens the file,
//!    which also covers log rotation by rename.
//! 4. **Clean shutdown**: `shutdown()` drains pending records and syncs
//!    before returning.
//!
//! The file is named `YYYY-MM-DD_<basename>` in the configured directory;
//! the date is chosen once at startup.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::Local;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::codec;
use crate::error::{SinkholeError, SinkholeResult};
use crate::server::Transport;

/// Queue capacity between the handler and the writer task
const QUEUE_CAPACITY: usize = 10_000;

/// Interval of the background sync ticker
const FLUSH_INTERVAL: Duration = Duration::from_secs(1);

/// How long `shutdown()` waits for the writer to drain
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

enum LogCommand {
    Record(String),
    Shutdown(oneshot::Sender<()>),
}

/// Append-only structured request log
///
/// Cheap to clone handles are not provided; share it behind an `Arc`.
pub struct QueryLogger {
    tx: mpsc::Sender<LogCommand>,
    path: PathBuf,
    dropped: AtomicU64,
}

impl QueryLogger {
    /// Open the dated log file and start the writer task
    ///
    /// Creates `logs_dir` if needed and writes a startup line.
    ///
    /// # Errors
    ///
    /// Returns a network error when the directory or file cannot be
    /// created.
    pub async fn create(
        logs_dir: &Path,
        basename: &str,
        debug_mirror: bool,
    ) -> SinkholeResult<Self> {
        Self::create_with_capacity(logs_dir, basename, debug_mirror, QUEUE_CAPACITY).await
    }

    /// [`create`](Self::create) with an explicit queue capacity
    pub async fn create_with_capacity(
        logs_dir: &Path,
        basename: &str,
        debug_mirror: bool,
        capacity: usize,
    ) -> SinkholeResult<Self> {
        tokio::fs::create_dir_all(logs_dir).await.map_err(|e| {
            SinkholeError::network_io(
                format!("failed to create log directory {}", logs_dir.display()),
                e,
            )
        })?;

        let date = Local::now().format("%Y-%m-%d");
        let path = logs_dir.join(format!("{date}_{basename}"));

        let mut file = open_log_file(&path).await?;
        let start_line = format!(
            "[{}] DNS sinkhole started\n",
            Local::now().format("%Y-%m-%d %H:%M:%S")
        );
        file.write_all(start_line.as_bytes())
            .await
            .map_err(|e| SinkholeError::network_io("failed to write startup entry", e))?;
        file.flush()
            .await
            .map_err(|e| SinkholeError::network_io("failed to flush startup entry", e))?;

        info!(path = %path.display(), "request log opened");

        let (tx, rx) = mpsc::channel(capacity.max(1));
        tokio::spawn(writer_task(file, path.clone(), rx, debug_mirror));

        Ok(Self {
            tx,
            path,
            dropped: AtomicU64::new(0),
        })
    }

    /// Submit a request record
    ///
    /// Never blocks; returns `false` when the record was dropped because
    /// the queue was full or the writer has stopped.
    pub fn log_request(&self, transport: Transport, client: &str, data: &[u8]) -> bool {
        self.submit(format_record(transport, client, data))
    }

    /// Submit a freeform line (terminated with a newline if missing)
    pub fn note(&self, line: impl Into<String>) -> bool {
        let mut line = line.into();
        if !line.ends_with('\n') {
            line.push('\n');
        }
        self.submit(line)
    }

    /// Records dropped at the queue so far
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Path of the current log file
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Drain pending records, sync the file, and stop the writer
    pub async fn shutdown(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(LogCommand::Shutdown(ack_tx)).await.is_err() {
            return;
        }
        if tokio::time::timeout(SHUTDOWN_TIMEOUT, ack_rx).await.is_err() {
            warn!("request log writer did not acknowledge shutdown in time");
        }
    }

    fn submit(&self, record: String) -> bool {
        match self.tx.try_send(LogCommand::Record(record)) {
            Ok(()) => true,
            Err(_) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }
}

/// Format one request record block
fn format_record(transport: Transport, client: &str, data: &[u8]) -> String {
    let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
    let mut out = String::with_capacity(256 + data.len() * 4);
    out.push_str(&format!("[{timestamp}] [{transport}] Client: {client}\n"));

    match codec::parse_header(data) {
        Some(header) => {
            out.push_str(&format!("Transaction ID: {:#06x}\n", header.id));
            out.push_str(&format!("Flags: {:#06x}\n", header.flags));
            out.push_str(&format!("Questions: {}\n", header.qdcount));
            for question in codec::questions(data) {
                out.push_str(&format!("Question: {}\n", question.name));
                out.push_str(&format!("Type: {}\n", codec::qtype_name(question.qtype)));
                out.push_str(&format!("Class: {}\n", codec::qclass_name(question.qclass)));
            }
        }
        None => {
            out.push_str(&format!(
                "Error: message too short to parse ({} bytes)\n",
                data.len()
            ));
        }
    }

    out.push_str("Raw Query (Hex):\n");
    out.push_str(&codec::hex_dump(data));
    out.push('\n');
    out
}

async fn open_log_file(path: &Path) -> SinkholeResult<File> {
    OpenOptions::new()
        .append(true)
        .create(true)
        .open(path)
        .await
        .map_err(|e| {
            SinkholeError::network_io(format!("failed to open log file {}", path.display()), e)
        })
}

async fn writer_task(
    mut file: File,
    path: PathBuf,
    mut rx: mpsc::Receiver<LogCommand>,
    debug_mirror: bool,
) {
    let mut ticker = tokio::time::interval(FLUSH_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            cmd = rx.recv() => match cmd {
                Some(LogCommand::Record(record)) => {
                    write_record(&mut file, &path, &record).await;
                    if debug_mirror {
                        print!("{record}");
                    }
                }
                Some(LogCommand::Shutdown(ack)) => {
                    // Drain whatever is already queued before stopping.
                    while let Ok(cmd) = rx.try_recv() {
                        if let LogCommand::Record(record) = cmd {
                            write_record(&mut file, &path, &record).await;
                        }
                    }
                    let _ = file.sync_all().await;
                    let _ = ack.send(());
                    debug!("request log writer stopped");
                    return;
                }
                None => {
                    let _ = file.sync_all().await;
                    return;
                }
            },
            _ = ticker.tick() => {
                if let Err(e) = file.sync_data().await {
                    warn!(error = %e, "request log sync failed");
                }
            }
        }
    }
}

/// Write one record, reopening the file once on failure
async fn write_record(file: &mut File, path: &Path, record: &str) {
    if write_and_flush(file, record).await.is_ok() {
        return;
    }

    warn!(path = %path.display(), "log write failed, reopening file");
    match open_log_file(path).await {
        Ok(reopened) => {
            *file = reopened;
            if let Err(e) = write_and_flush(file, record).await {
                error!(error = %e, "log write failed after reopen, record lost");
            }
        }
        Err(e) => {
            error!(error = %e, "failed to reopen log file, record lost");
        }
    }
}

async fn write_and_flush(file: &mut File, record: &str) -> std::io::Result<()> {
    file.write_all(record.as_bytes()).await?;
    file.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_query() -> Vec<u8> {
        let mut q = vec![
            0x12, 0x34, 0x01, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        ];
        q.extend_from_slice(&[
            0x07, b'e', b'x', b'a', b'm', b'p', b'l', b'e', 0x03, b'c', b'o', b'm', 0x00, 0x00,
            0x01, 0x00, 0x01,
        ]);
        q
    }

    // ========================================================================
    // Record Formatting Tests
    // ========================================================================

    #[test]
    fn test_format_record_contains_summary() {
        let record = format_record(Transport::Udp, "10.0.0.1:5353", &sample_query());
        assert!(record.contains("[UDP] Client: 10.0.0.1:5353"));
        assert!(record.contains("Transaction ID: 0x1234"));
        assert!(record.contains("Flags: 0x0100"));
        assert!(record.contains("Questions: 1"));
        assert!(record.contains("Question: example.com"));
        assert!(record.contains("Type: A"));
        assert!(record.contains("Class: IN"));
        assert!(record.contains("Raw Query (Hex):"));
        assert!(record.contains("65 78 61")); // "exa" in the dump
        assert!(record.ends_with('\n'));
    }

    #[test]
    fn test_format_record_unparseable_keeps_dump() {
        let record = format_record(Transport::Tcp, "10.0.0.1:5353", &[0xDE, 0xAD]);
        assert!(record.contains("Error: message too short"));
        assert!(record.contains("Raw Query (Hex):"));
        assert!(record.contains("de ad"));
    }

    // ========================================================================
    // File Tests
    // ========================================================================

    #[tokio::test]
    async fn test_create_writes_dated_file() {
        let dir = tempfile::tempdir().unwrap();
        let logger = QueryLogger::create(dir.path(), "dns_listener.log", false)
            .await
            .unwrap();

        let expected = format!("{}_dns_listener.log", Local::now().format("%Y-%m-%d"));
        assert_eq!(logger.path().file_name().unwrap().to_str().unwrap(), expected);

        logger.shutdown().await;
        let contents = std::fs::read_to_string(logger.path()).unwrap();
        assert!(contents.contains("DNS sinkhole started"));
    }

    #[tokio::test]
    async fn test_log_request_persisted_after_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let logger = QueryLogger::create(dir.path(), "q.log", false).await.unwrap();

        assert!(logger.log_request(Transport::Udp, "127.0.0.1:9999", &sample_query()));
        assert!(logger.note("Cache hit for 127.0.0.1:9999"));
        logger.shutdown().await;

        let contents = std::fs::read_to_string(logger.path()).unwrap();
        assert!(contents.contains("Question: example.com"));
        assert!(contents.contains("Cache hit for 127.0.0.1:9999"));
    }

    #[tokio::test]
    async fn test_note_gets_trailing_newline() {
        let dir = tempfile::tempdir().unwrap();
        let logger = QueryLogger::create(dir.path(), "q.log", false).await.unwrap();
        logger.note("no newline");
        logger.shutdown().await;

        let contents = std::fs::read_to_string(logger.path()).unwrap();
        assert!(contents.contains("no newline\n"));
    }

    #[tokio::test]
    async fn test_full_queue_drops_are_counted() {
        let dir = tempfile::tempdir().unwrap();
        let logger = QueryLogger::create_with_capacity(dir.path(), "q.log", false, 1)
            .await
            .unwrap();

        // Saturate the one-slot queue synchronously; at least one of these
        // submissions must be dropped and counted.
        let mut accepted = 0;
        for _ in 0..50 {
            if logger.note("spam") {
                accepted += 1;
            }
        }
        assert!(accepted >= 1);
        assert!(logger.dropped() >= 1);
        assert_eq!(logger.dropped() + accepted, 50);

        logger.shutdown().await;
    }

    #[tokio::test]
    async fn test_append_preserves_existing_content() {
        let dir = tempfile::tempdir().unwrap();

        let logger = QueryLogger::create(dir.path(), "q.log", false).await.unwrap();
        logger.note("first run");
        logger.shutdown().await;

        let logger = QueryLogger::create(dir.path(), "q.log", false).await.unwrap();
        logger.note("second run");
        logger.shutdown().await;

        let contents = std::fs::read_to_string(logger.path()).unwrap();
        assert!(contents.contains("first run"));
        assert!(contents.contains("second run"));
    }
}
