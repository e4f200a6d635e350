//! Vault module: encrypted file storage.
//!
//! This module provides:
//! - `VaultEntry` and id derivation (`entry`)
//! - The encrypted index with quarantine on corruption (`index`)
//! - Multi-pass secure erase (`erase`)
//! - The `VaultStore` storage engine (`store`)

pub mod entry;
pub mod erase;
mod fsio;
pub mod index;
pub mod store;

// Re-export the most commonly used items.
pub use entry::VaultEntry;
pub use erase::{secure_erase, EraseOutcome};
pub use index::VaultIndex;
pub use store::{AddOutcome, DeleteOutcome, OpenReport, VaultStore};

pub(crate) use fsio::{create_private_dir, write_private_atomic};
