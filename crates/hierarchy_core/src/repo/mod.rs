//! Repository layer contracts and persistence implementations.
//!
//! # Responsibility
//! - Define the record-level store contract consumed by the tree service.
//! - Isolate SQLite query details from tree validation and orchestration.
//!
//! # Invariants
//! - Repository APIs return semantic errors (`AccountNotFound`, `Conflict`)
//!   in addition to DB transport errors.

pub mod account_repo;
