//! Whole-tree invariant audit over a flat snapshot.
//!
//! # Responsibility
//! - Report every broken tree invariant in a set of persisted records.
//!
//! # Invariants
//! - The audit only reads; it never repairs records.
//! - Parent chains are walked iteratively and stop at the first revisited
//!   id, so cyclic input always terminates.

use crate::model::account::{Account, AccountId};
use crate::model::path::HierarchyPath;
use std::collections::{HashMap, HashSet};
use std::fmt::{Display, Formatter};

/// One broken tree invariant found by `audit_tree`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntegrityViolation {
    /// Records exist but none of them is a root.
    NoRoot,
    /// More than one record has no parent.
    MultipleRoots(Vec<AccountId>),
    /// The root does not carry the `/` path.
    RootPathMismatch {
        account_id: AccountId,
        path: HierarchyPath,
    },
    /// Parent id points at a record that does not exist.
    OrphanedAccount {
        account_id: AccountId,
        parent_id: AccountId,
    },
    /// Path is not `parent.path + account_id + "/"`.
    PathMismatch {
        account_id: AccountId,
        expected: HierarchyPath,
        actual: HierarchyPath,
    },
    DepthExceeded {
        account_id: AccountId,
        level: usize,
        max_level: usize,
    },
    /// Parent sits inside the account's own subtree.
    CycleDetected {
        account_id: AccountId,
        parent_id: AccountId,
    },
}

impl Display for IntegrityViolation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoRoot => write!(f, "tree has no root account"),
            Self::MultipleRoots(ids) => write!(f, "tree has multiple roots: {ids:?}"),
            Self::RootPathMismatch { account_id, path } => {
                write!(f, "root account {account_id} has path `{path}` instead of `/`")
            }
            Self::OrphanedAccount {
                account_id,
                parent_id,
            } => write!(f, "account {account_id} references missing parent {parent_id}"),
            Self::PathMismatch {
                account_id,
                expected,
                actual,
            } => write!(
                f,
                "account {account_id} has path `{actual}`, expected `{expected}`"
            ),
            Self::DepthExceeded {
                account_id,
                level,
                max_level,
            } => write!(
                f,
                "account {account_id} sits at level {level}, above maximum {max_level}"
            ),
            Self::CycleDetected {
                account_id,
                parent_id,
            } => write!(
                f,
                "account {account_id} has parent {parent_id} inside its own subtree"
            ),
        }
    }
}

/// Checks single root, path derivation, depth bound and acyclicity.
///
/// An empty snapshot is a valid (unseeded) store and yields no violations.
pub fn audit_tree(accounts: &[Account], max_level: usize) -> Vec<IntegrityViolation> {
    let mut violations = Vec::new();
    if accounts.is_empty() {
        return violations;
    }

    let by_id = accounts
        .iter()
        .map(|account| (account.account_id, account))
        .collect::<HashMap<_, _>>();

    let mut roots = accounts
        .iter()
        .filter(|account| account.is_root())
        .map(|account| account.account_id)
        .collect::<Vec<_>>();
    roots.sort_unstable();
    match roots.len() {
        0 => violations.push(IntegrityViolation::NoRoot),
        1 => {}
        _ => violations.push(IntegrityViolation::MultipleRoots(roots)),
    }

    for account in accounts {
        if account.level() > max_level {
            violations.push(IntegrityViolation::DepthExceeded {
                account_id: account.account_id,
                level: account.level(),
                max_level,
            });
        }

        let Some(parent_id) = account.parent_id else {
            if !account.path.is_root() {
                violations.push(IntegrityViolation::RootPathMismatch {
                    account_id: account.account_id,
                    path: account.path.clone(),
                });
            }
            continue;
        };

        let Some(parent) = by_id.get(&parent_id) else {
            violations.push(IntegrityViolation::OrphanedAccount {
                account_id: account.account_id,
                parent_id,
            });
            continue;
        };

        let cyclic = parent_id == account.account_id
            || parent.path.is_within(&account.path)
            || !reaches_root(account, &by_id);
        if cyclic {
            violations.push(IntegrityViolation::CycleDetected {
                account_id: account.account_id,
                parent_id,
            });
        }

        let expected = HierarchyPath::build_child_path(&parent.path, account.account_id);
        if expected != account.path {
            violations.push(IntegrityViolation::PathMismatch {
                account_id: account.account_id,
                expected,
                actual: account.path.clone(),
            });
        }
    }

    violations
}

/// Follows parent ids from `account` until a root or a missing parent.
///
/// Returns false when the chain revisits an id. A missing parent ends the
/// walk as reachable; it is reported as `OrphanedAccount` instead.
fn reaches_root(account: &Account, by_id: &HashMap<AccountId, &Account>) -> bool {
    let mut visited = HashSet::with_capacity(by_id.len());
    let mut current = account;
    while let Some(parent_id) = current.parent_id {
        if !visited.insert(current.account_id) {
            return false;
        }
        match by_id.get(&parent_id) {
            Some(parent) => current = *parent,
            None => return true,
        }
    }
    true
}
