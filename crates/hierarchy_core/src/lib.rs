//! Core domain logic for the hierarchy accounts tree.
//! This crate is the single source of truth for tree invariants.

pub mod db;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;

pub use db::{open_db, open_db_in_memory, DbError, DbResult};
pub use logging::{default_log_level, init_logging, logging_status};
pub use model::account::{
    Account, AccountId, AccountRef, AccountTree, AccountView, ROOT_ACCOUNT_ID,
};
pub use model::path::{HierarchyPath, PathError};
pub use repo::account_repo::{
    AccountReader, AccountStore, AccountTransaction, SqliteAccountStore, StoreError, StoreResult,
};
pub use service::integrity::IntegrityViolation;
pub use service::tree_assembler::assemble_tree;
pub use service::tree_service::{
    AccountTreeService, ErrorKind, SeedOutcome, TreeConfig, TreeServiceError, DEFAULT_MAX_LEVEL,
    DEFAULT_ROOT_NAME, MAX_ACCOUNT_NAME_CHARS,
};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
