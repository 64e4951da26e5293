//! tellerd - Concurrent Transaction Server
//!
//! A small banking core: a fixed table of in-memory accounts served
//! over a binary TCP protocol by a pool of worker tasks.
//!
//! # Modules
//!
//! - [`core_types`] - Core type definitions (AccountId, Amount, etc.)
//! - [`error`] - Ledger error taxonomy and wire status codes
//! - [`config`] - YAML configuration loading
//! - [`logging`] - Tracing subscriber setup
//! - [`store`] - Named account store: per-account locks, admission gate
//! - [`engine`] - Transfer engine (two-phase locking, validation order)
//! - [`codec`] - Binary wire protocol framing
//! - [`audit`] - Fire-and-forget audit trail
//! - [`server`] - TCP listener and worker pool

// Core types - must be first!
pub mod core_types;

pub mod config;
pub mod error;
pub mod logging;

// Ledger components
pub mod audit;
pub mod codec;
pub mod engine;
pub mod server;
pub mod store;

// Convenient re-exports at crate root
pub use audit::{AuditOp, AuditPublisher, AuditRecord, AuditWriter, audit_channel};
pub use codec::{FrameError, FrameHeader, OpCode, Request, RequestError};
pub use config::AppConfig;
pub use core_types::{AccountId, Amount, Timestamp};
pub use engine::TransferEngine;
pub use error::LedgerError;
pub use server::TransactionServer;
pub use store::{AccountStore, StoreHandle, StoreStats, StoreStatsSnapshot};
