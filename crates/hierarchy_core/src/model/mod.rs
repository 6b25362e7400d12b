//! Account hierarchy domain model.
//!
//! # Responsibility
//! - Define the materialized path value and the flat account record.
//! - Define read models produced for tree queries.
//!
//! # Invariants
//! - Exactly one tree per store: one root, reached from every record by
//!   following parent ids.
//! - Records reference parents by id only; no object back-references.

pub mod account;
pub mod path;
