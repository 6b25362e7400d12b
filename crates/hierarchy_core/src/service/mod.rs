//! Account tree use-case services.
//!
//! # Responsibility
//! - Enforce tree invariants on top of the record store.
//! - Turn flat records into the read models handed to callers.

pub mod integrity;
pub mod tree_assembler;
pub mod tree_service;
