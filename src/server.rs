//! Transaction Server
//!
//! A fixed pool of worker tasks shares one TCP listener; whichever
//! worker wins the accept owns that connection for its single
//! request/response exchange, then the connection closes.
//!
//! Malformed frames (bad magic, oversized body, checksum mismatch,
//! short read) drop the connection without a response. A well-formed
//! frame always gets a reply: LOGIN and TRANSFER answer with a status
//! code, BALANCE answers with the balance itself in the status field,
//! so errors stay negative and balances non-negative.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::audit::{AuditPublisher, AuditRecord};
use crate::codec::{self, FrameError, Request};
use crate::core_types::Amount;
use crate::engine::TransferEngine;

/// How often a running server logs its stats snapshot
const STATS_LOG_INTERVAL: Duration = Duration::from_secs(60);

// ============================================================
// SERVER
// ============================================================

pub struct TransactionServer {
    listener: Arc<TcpListener>,
    engine: Arc<TransferEngine>,
    audit: AuditPublisher,
    workers: usize,
}

impl TransactionServer {
    /// Bind the shared listener. Workers are not started yet.
    pub async fn bind(
        addr: &str,
        workers: usize,
        engine: Arc<TransferEngine>,
        audit: AuditPublisher,
    ) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener: Arc::new(listener),
            engine,
            audit,
            workers,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Start the accept workers without consuming the server. Each task
    /// runs until aborted.
    pub fn spawn_workers(&self) -> Vec<JoinHandle<()>> {
        (0..self.workers)
            .map(|worker_id| {
                let listener = Arc::clone(&self.listener);
                let engine = Arc::clone(&self.engine);
                let audit = self.audit.clone();
                tokio::spawn(worker_loop(worker_id, listener, engine, audit))
            })
            .collect()
    }

    /// Serve until every worker exits. Workers only exit on abort, so in
    /// production this runs until the process is killed.
    pub async fn run(self) {
        let handles = self.spawn_workers();
        info!(workers = self.workers, "Transaction server running");

        let stats_store = Arc::clone(self.engine.store());
        let stats_audit = self.audit.clone();
        let stats_task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(STATS_LOG_INTERVAL);
            // First tick fires immediately and carries no information
            ticker.tick().await;
            loop {
                ticker.tick().await;
                info!(
                    "{} | Audit: published={}, dropped={}",
                    stats_store.stats().snapshot(),
                    stats_audit.published(),
                    stats_audit.dropped()
                );
            }
        });

        for handle in handles {
            if let Err(e) = handle.await {
                warn!("Worker task failed: {}", e);
            }
        }
        stats_task.abort();
    }
}

// ============================================================
// WORKERS
// ============================================================

async fn worker_loop(
    worker_id: usize,
    listener: Arc<TcpListener>,
    engine: Arc<TransferEngine>,
    audit: AuditPublisher,
) {
    debug!(worker_id, "Worker accepting connections");
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!(worker_id, "Accept failed: {}", e);
                continue;
            }
        };

        if let Err(e) = serve_connection(stream, &engine, &audit).await {
            // Untrusted traffic gets no response; a debug line is all it
            // leaves behind
            debug!(worker_id, %peer, "Connection dropped: {}", e);
        }
    }
}

/// One request, one response, then the stream drops.
async fn serve_connection(
    mut stream: TcpStream,
    engine: &TransferEngine,
    audit: &AuditPublisher,
) -> Result<(), FrameError> {
    let frame = codec::read_frame(&mut stream).await?;

    let request = match Request::decode(&frame) {
        Ok(request) => request,
        Err(e) => {
            // The frame itself was intact, so the peer gets an answer
            debug!("Unusable request: {}", e);
            codec::write_response(&mut stream, frame.header.opcode, e.wire_code()).await?;
            return Ok(());
        }
    };

    let status = match request {
        Request::Login { account_id } => {
            let status = match engine.login(account_id) {
                Ok(()) => 0,
                Err(e) => e.wire_code(),
            };
            audit.publish(&AuditRecord::login(account_id, status));
            status
        }
        Request::Balance { account_id } => match engine.get_balance(account_id) {
            Ok(balance) => {
                audit.publish(&AuditRecord::balance(account_id, 0));
                balance_to_wire(balance)
            }
            Err(e) => {
                let status = e.wire_code();
                audit.publish(&AuditRecord::balance(account_id, status));
                status
            }
        },
        Request::Transfer {
            src_id,
            dst_id,
            amount,
        } => {
            let status = match engine.transfer(src_id, dst_id, amount).await {
                Ok(()) => 0,
                Err(e) => e.wire_code(),
            };
            audit.publish(&AuditRecord::transfer(src_id, dst_id, amount, status));
            status
        }
    };

    codec::write_response(&mut stream, request.opcode() as u8, status).await?;
    Ok(())
}

/// The wire speaks 32-bit amounts; clamp balances configured beyond
/// that rather than letting them wrap negative.
fn balance_to_wire(balance: Amount) -> i32 {
    i32::try_from(balance).unwrap_or(i32::MAX)
}

// ============================================================
// TESTS
// ============================================================
