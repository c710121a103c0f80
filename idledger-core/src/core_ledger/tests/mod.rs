//! Core ledger test suite
//!
//! Organized by component: versioned details, pre-keys, membership with
//! commit notifications, backup/restore and revocation records

mod prekey_tests;
mod revocation_tests;

// Test helpers and fixtures
pub mod helpers;
