//! Ledger Error Types
//!
//! Every operation failure maps to a fixed negative wire code; success is
//! reported as status 0 on the wire and is not represented here.

use thiserror::Error;

/// Ledger operation errors
///
/// Wire codes are part of the client protocol and must never be renumbered.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    // === Validation Errors ===
    #[error("Account id out of range")]
    InvalidAccountId,

    #[error("Source and destination account cannot be the same")]
    SameAccount,

    #[error("Amount must be greater than zero")]
    InvalidAmount,

    // === Ledger Errors ===
    #[error("Insufficient funds")]
    InsufficientFunds,

    // === System Errors ===
    #[error("Admission gate closed or wait failed")]
    Busy,

    #[error("Account store unavailable or not initialized")]
    StoreUnavailable,
}

impl LedgerError {
    /// Get the signed status code sent back to clients
    pub fn wire_code(&self) -> i32 {
        match self {
            LedgerError::StoreUnavailable => -1,
            LedgerError::InvalidAccountId => -2,
            LedgerError::SameAccount => -3,
            LedgerError::InvalidAmount => -4,
            LedgerError::InsufficientFunds => -5,
            LedgerError::Busy => -6,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_codes() {
        assert_eq!(LedgerError::StoreUnavailable.wire_code(), -1);
        assert_eq!(LedgerError::InvalidAccountId.wire_code(), -2);
        assert_eq!(LedgerError::SameAccount.wire_code(), -3);
        assert_eq!(LedgerError::InvalidAmount.wire_code(), -4);
        assert_eq!(LedgerError::InsufficientFunds.wire_code(), -5);
        assert_eq!(LedgerError::Busy.wire_code(), -6);
    }

    #[test]
    fn test_wire_codes_are_distinct_and_negative() {
        let all = [
            LedgerError::StoreUnavailable,
            LedgerError::InvalidAccountId,
            LedgerError::SameAccount,
            LedgerError::InvalidAmount,
            LedgerError::InsufficientFunds,
            LedgerError::Busy,
        ];
        let mut codes: Vec<i32> = all.iter().map(|e| e.wire_code()).collect();
        assert!(codes.iter().all(|&c| c < 0), "error codes must be negative");
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), all.len(), "error codes must be distinct");
    }

    #[test]
    fn test_display() {
        let err = LedgerError::InsufficientFunds;
        assert_eq!(err.to_string(), "Insufficient funds");
    }
}
