//! Core types used throughout the system
//!
//! These are fundamental type aliases used by all modules.
//! They provide semantic meaning and enable future type evolution.

/// Account ID - identifies one ledger entry.
///
/// # Constraints:
/// - **Dense**: Assigned contiguously (0, 1, 2, ...)
/// - **Small Values**: Enables O(1) direct array indexing
/// - **Immutable**: Once assigned, NEVER changes
///
/// # Performance:
/// Used as array index for O(1) account lookup:
/// ```ignore
/// accounts[account_id as usize]  // Direct access, no hash needed
/// ```
pub type AccountId = u32;

/// Internal balance/amount width.
///
/// Wire amounts are 32-bit; balances are widened to 64 bits internally so
/// debit/credit arithmetic cannot overflow under any wire-representable
/// transfer.
pub type Amount = i64;

/// Seconds since the Unix epoch, used for `last_updated` stamps.
pub type Timestamp = u64;
