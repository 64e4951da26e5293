//! tellerd - Concurrent Transaction Server
//!
//! This is the main entry point. Architecture:
//!
//! ```text
//! ┌──────────┐    ┌───────────┐    ┌──────────┐    ┌──────────┐
//! │ Clients  │───▶│  Workers  │───▶│  Engine  │───▶│  Store   │
//! │ (1 req)  │    │ (accept)  │    │  (2PL)   │    │ (locks)  │
//! └──────────┘    └───────────┘    └────┬─────┘    └──────────┘
//!                                       │ try_send
//!                                  ┌────▼─────┐
//!                                  │  Audit   │
//!                                  │ (thread) │
//!                                  └──────────┘
//! ```
//!
//! Every request is one connection: read a frame, execute, answer,
//! close. The audit writer runs on its own OS thread so a slow disk
//! never backs up into the request path.

use std::sync::Arc;

use anyhow::Context;

use tellerd::audit::audit_channel;
use tellerd::config::AppConfig;
use tellerd::engine::TransferEngine;
use tellerd::logging::init_logging;
use tellerd::server::TransactionServer;
use tellerd::store::AccountStore;

// ============================================================
// COMMAND LINE
// ============================================================

fn get_env() -> String {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if (args[i] == "--env" || args[i] == "-e") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }
    "dev".to_string()
}

/// Get port override from command line (--port argument)
fn get_port_override() -> Option<u16> {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if args[i] == "--port" && i + 1 < args.len() {
            return args[i + 1].parse().ok();
        }
    }
    None
}

// ============================================================
// MAIN
// ============================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = get_env();
    let config = AppConfig::load(&env);
    let _log_guard = init_logging(&config);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        env = %env,
        "Starting tellerd"
    );
    println!("=== tellerd: Concurrent Transaction Server ===");

    // Attach to the named store, seeding it on first creation
    let store =
        AccountStore::attach_or_create(&config.ledger).context("account store bootstrap failed")?;
    println!(
        "✅ Account store '{}' ready: {} accounts x {} initial balance ({})",
        store.name(),
        store.account_count(),
        config.ledger.initial_balance,
        if store.is_creator() {
            "created"
        } else {
            "attached"
        },
    );

    // Audit trail: bounded queue drained by its own thread
    let (audit, writer) = audit_channel(
        config.audit.queue_capacity,
        &config.audit.log_dir,
        &config.audit.log_file,
    );
    let _audit_thread = writer.spawn();
    println!(
        "✅ Audit writer started: {}/{}",
        config.audit.log_dir, config.audit.log_file
    );

    let engine = Arc::new(TransferEngine::new(Arc::clone(store.store())));

    let port = get_port_override().unwrap_or(config.server.port);
    let addr = format!("{}:{}", config.server.host, port);
    let server = TransactionServer::bind(&addr, config.server.workers, engine, audit)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;

    println!(
        "🚀 Listening on {} with {} workers (admission ceiling {})",
        server.local_addr()?,
        config.server.workers,
        config.ledger.max_concurrent_transfers
    );
    println!("Press Ctrl+C to shutdown\n");

    tokio::select! {
        _ = server.run() => {}
        _ = tokio::signal::ctrl_c() => {
            println!("\nShutting down");
        }
    }

    // Creator unlinks the store name on the way out
    store.destroy();
    Ok(())
}
