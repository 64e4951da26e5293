//! Audit Trail
//!
//! Fire-and-forget audit pipeline. Request workers serialize an
//! [`AuditRecord`], XOR-obfuscate the payload, and `try_send` it onto a
//! bounded channel; a dedicated writer thread drains the channel and
//! appends one formatted line per record to the audit log.
//!
//! Auditing never blocks or fails a request: a full queue drops the
//! record (counted, periodically warned about), and a closed channel
//! during shutdown is ignored.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use chrono::{Local, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{info, warn};

/// Every payload byte is XORed with this key on the channel
pub const AUDIT_XOR_KEY: u8 = 0xAB;

/// Warn once per this many dropped records
const DROP_WARN_INTERVAL: u64 = 100;

/// XOR every byte with [`AUDIT_XOR_KEY`]. Applying it twice restores the
/// original bytes.
pub fn xor_obfuscate(payload: &mut [u8]) {
    for byte in payload.iter_mut() {
        *byte ^= AUDIT_XOR_KEY;
    }
}

// ============================================================
// RECORDS
// ============================================================

/// Operation being audited
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditOp {
    Login,
    Balance,
    Transfer,
}

impl AuditOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditOp::Login => "LOGIN",
            AuditOp::Balance => "BALANCE",
            AuditOp::Transfer => "TRANSFER",
        }
    }
}

/// One audited operation outcome, stamped when the worker publishes it,
/// not when the writer gets around to it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub op: AuditOp,
    pub status: i32,
    pub src_id: i32,
    pub dst_id: i32,
    pub amount: i32,
    /// Seconds since the Unix epoch at publish time
    pub timestamp: i64,
}

impl AuditRecord {
    /// Single-account ops log the same id on both sides and a zero amount
    pub fn login(account_id: i32, status: i32) -> Self {
        Self {
            op: AuditOp::Login,
            status,
            src_id: account_id,
            dst_id: account_id,
            amount: 0,
            timestamp: Utc::now().timestamp(),
        }
    }

    pub fn balance(account_id: i32, status: i32) -> Self {
        Self {
            op: AuditOp::Balance,
            status,
            src_id: account_id,
            dst_id: account_id,
            amount: 0,
            timestamp: Utc::now().timestamp(),
        }
    }

    pub fn transfer(src_id: i32, dst_id: i32, amount: i32, status: i32) -> Self {
        Self {
            op: AuditOp::Transfer,
            status,
            src_id,
            dst_id,
            amount,
            timestamp: Utc::now().timestamp(),
        }
    }
}

// ============================================================
// PUBLISHER (request side)
// ============================================================

/// Cloneable sending half handed to every worker
#[derive(Clone)]
pub struct AuditPublisher {
    tx: mpsc::Sender<Vec<u8>>,
    published: Arc<AtomicU64>,
    dropped: Arc<AtomicU64>,
}

impl AuditPublisher {
    /// Queue a record for the writer. Never blocks; a full queue drops
    /// the record and a closed channel is ignored.
    pub fn publish(&self, record: &AuditRecord) {
        let mut payload = match bincode::serialize(record) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Failed to serialize audit record: {}", e);
                return;
            }
        };
        xor_obfuscate(&mut payload);

        match self.tx.try_send(payload) {
            Ok(()) => {
                self.published.fetch_add(1, Ordering::Relaxed);
            }
            Err(TrySendError::Full(_)) => {
                let old = self.dropped.fetch_add(1, Ordering::Relaxed);
                if old % DROP_WARN_INTERVAL == 0 {
                    warn!(dropped = old + 1, "Audit queue full, dropping record");
                }
            }
            // Writer already gone during shutdown
            Err(TrySendError::Closed(_)) => {}
        }
    }

    /// Total records handed to the channel
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    /// Total records dropped because the queue was full
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

// ============================================================
// WRITER (log side)
// ============================================================

/// Receiving half plus the log destination. Runs on its own OS thread,
/// never inside the async runtime: [`AuditWriter::run`] blocks on the
/// channel.
pub struct AuditWriter {
    rx: mpsc::Receiver<Vec<u8>>,
    log_dir: PathBuf,
    log_file: String,
}

impl AuditWriter {
    /// Drain the channel until every publisher is dropped, appending one
    /// line per record. Returns the number of lines written.
    pub fn run(mut self) -> io::Result<u64> {
        fs::create_dir_all(&self.log_dir)?;
        let path = self.log_dir.join(&self.log_file);
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        info!(path = %path.display(), "Audit writer started");

        let mut written: u64 = 0;
        while let Some(mut payload) = self.rx.blocking_recv() {
            xor_obfuscate(&mut payload);
            let record: AuditRecord = match bincode::deserialize(&payload) {
                Ok(record) => record,
                Err(e) => {
                    warn!("Discarding undecodable audit payload: {}", e);
                    continue;
                }
            };

            let when = Local
                .timestamp_opt(record.timestamp, 0)
                .single()
                .unwrap_or_else(Local::now);
            writeln!(
                file,
                "[{}] CMD:{:<10} | Status:{:<8} | Src:{} -> Dst:{} | Amt:${}",
                when.format("%Y-%m-%d %H:%M:%S"),
                record.op.as_str(),
                if record.status == 0 { "SUCCESS" } else { "FAILED" },
                record.src_id,
                record.dst_id,
                record.amount,
            )?;
            // One flush per record: audit lines must survive a crash of
            // the serving process
            file.flush()?;
            written += 1;
        }

        info!(written, "Audit writer finished");
        Ok(written)
    }

    /// Move the writer onto a dedicated thread.
    pub fn spawn(self) -> thread::JoinHandle<io::Result<u64>> {
        thread::spawn(move || self.run())
    }
}

/// Build a bounded audit channel: one publisher (clone per worker) and
/// the writer that owns the receiving half.
pub fn audit_channel(
    capacity: usize,
    log_dir: impl Into<PathBuf>,
    log_file: impl Into<String>,
) -> (AuditPublisher, AuditWriter) {
    let (tx, rx) = mpsc::channel(capacity);
    (
        AuditPublisher {
            tx,
            published: Arc::new(AtomicU64::new(0)),
            dropped: Arc::new(AtomicU64::new(0)),
        },
        AuditWriter {
            rx,
            log_dir: log_dir.into(),
            log_file: log_file.into(),
        },
    )
}

// ============================================================
// TESTS
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_xor_obfuscate_is_an_involution() {
        let original = vec![0x00, 0x01, 0xAB, 0xFF, 0x42];
        let mut payload = original.clone();

        xor_obfuscate(&mut payload);
        assert_ne!(payload, original);

        xor_obfuscate(&mut payload);
        assert_eq!(payload, original);
    }

    #[test]
    fn test_single_account_records_mirror_the_id() {
        let login = AuditRecord::login(7, 0);
        assert_eq!(login.op, AuditOp::Login);
        assert_eq!(login.src_id, 7);
        assert_eq!(login.dst_id, 7);
        assert_eq!(login.amount, 0);
        assert!(login.timestamp > 0, "records are stamped at publish time");

        let balance = AuditRecord::balance(3, -2);
        assert_eq!(balance.op, AuditOp::Balance);
        assert_eq!(balance.status, -2);

        let transfer = AuditRecord::transfer(1, 2, 500, 0);
        assert_eq!(transfer.op, AuditOp::Transfer);
        assert_eq!(transfer.dst_id, 2);
        assert_eq!(transfer.amount, 500);
    }

    #[test]
    fn test_record_survives_the_channel_encoding() {
        let record = AuditRecord::transfer(1, 2, 500, -5);
        let mut payload = bincode::serialize(&record).unwrap();
        xor_obfuscate(&mut payload);

        xor_obfuscate(&mut payload);
        let decoded: AuditRecord = bincode::deserialize(&payload).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_writer_appends_formatted_lines() {
        let dir = tempfile::tempdir().unwrap();
        let (publisher, writer) = audit_channel(16, dir.path(), "audit.log");

        publisher.publish(&AuditRecord::transfer(1, 2, 500, 0));
        publisher.publish(&AuditRecord::transfer(1, 2, 999_999, -5));
        publisher.publish(&AuditRecord::login(1, 0));
        assert_eq!(publisher.published(), 3);
        drop(publisher);

        let written = writer.run().unwrap();
        assert_eq!(written, 3);

        let contents = std::fs::read_to_string(dir.path().join("audit.log")).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].contains("CMD:TRANSFER"));
        assert!(lines[0].contains("Status:SUCCESS"));
        assert!(lines[0].contains("Src:1 -> Dst:2"));
        assert!(lines[0].contains("Amt:$500"));
        assert!(lines[1].contains("Status:FAILED"));
        assert!(lines[1].contains("Amt:$999999"));
        assert!(lines[2].contains("CMD:LOGIN"));
        assert!(lines[2].contains("Src:1 -> Dst:1"));
    }

    #[test]
    fn test_full_queue_drops_instead_of_blocking() {
        let dir = tempfile::tempdir().unwrap();
        let (publisher, _writer) = audit_channel(1, dir.path(), "audit.log");

        publisher.publish(&AuditRecord::login(1, 0));
        publisher.publish(&AuditRecord::login(2, 0));
        publisher.publish(&AuditRecord::login(3, 0));

        assert_eq!(publisher.published(), 1);
        assert_eq!(publisher.dropped(), 2);
    }

    #[test]
    fn test_publish_after_writer_shutdown_is_silent() {
        let dir = tempfile::tempdir().unwrap();
        let (publisher, writer) = audit_channel(4, dir.path(), "audit.log");
        drop(writer);

        publisher.publish(&AuditRecord::balance(1, 0));
        // Closed channel is not a drop: nothing was queued to lose
        assert_eq!(publisher.published(), 0);
        assert_eq!(publisher.dropped(), 0);
    }

    #[test]
    fn test_spawned_writer_reports_line_count() {
        let dir = tempfile::tempdir().unwrap();
        let (publisher, writer) = audit_channel(16, dir.path(), "audit.log");
        let handle = writer.spawn();

        publisher.publish(&AuditRecord::balance(1, 0));
        publisher.publish(&AuditRecord::balance(2, 0));
        drop(publisher);

        let written = handle.join().unwrap().unwrap();
        assert_eq!(written, 2);
        assert!(dir.path().join("audit.log").exists());
    }
}
