//! Account record and read models.
//!
//! # Responsibility
//! - Define the flat persisted account record.
//! - Define the view shapes returned to callers of the tree service.
//!
//! # Invariants
//! - `account_id` is assigned once and never reused.
//! - `parent_id == None` iff the record is the root and its path is `/`.
//! - A non-root path is always `parent.path + account_id + "/"`.
//! - Records hold only the parent id; children are always derived.

use crate::model::path::HierarchyPath;
use serde::{Deserialize, Serialize};

/// Stable account identifier allocated from the store sequence.
pub type AccountId = i64;

/// Fixed id of the root account.
pub const ROOT_ACCOUNT_ID: AccountId = 0;

/// Flat persisted account record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub account_id: AccountId,
    /// Non-blank display name.
    pub name: String,
    /// `None` only for the root.
    pub parent_id: Option<AccountId>,
    /// Materialized ancestry, derived from the parent chain.
    pub path: HierarchyPath,
}

impl Account {
    /// Creates the root record with the fixed root id and path.
    pub fn new_root(name: impl Into<String>) -> Self {
        Self {
            account_id: ROOT_ACCOUNT_ID,
            name: name.into(),
            parent_id: None,
            path: HierarchyPath::root(),
        }
    }

    /// Creates a record attached directly below `parent`.
    pub fn new_child(account_id: AccountId, name: impl Into<String>, parent: &Account) -> Self {
        Self {
            account_id,
            name: name.into(),
            parent_id: Some(parent.account_id),
            path: HierarchyPath::build_child_path(&parent.path, account_id),
        }
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    pub fn level(&self) -> usize {
        self.path.level()
    }
}

/// Minimal id + name reference to another account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountRef {
    pub account_id: AccountId,
    pub name: String,
}

impl From<&Account> for AccountRef {
    fn from(value: &Account) -> Self {
        Self {
            account_id: value.account_id,
            name: value.name.clone(),
        }
    }
}

/// Single-account read model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountView {
    pub account_id: AccountId,
    pub name: String,
    pub path: HierarchyPath,
    /// Level of `path`; root is 0.
    pub depth: usize,
    pub parent: Option<AccountRef>,
}

impl AccountView {
    /// Builds the view for `account`, with `parent` rendered as a reference.
    pub fn from_account(account: &Account, parent: Option<&Account>) -> Self {
        Self {
            account_id: account.account_id,
            name: account.name.clone(),
            path: account.path.clone(),
            depth: account.level(),
            parent: parent.map(AccountRef::from),
        }
    }
}

/// Nested subtree read model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountTree {
    pub account_id: AccountId,
    pub name: String,
    pub parent_id: Option<AccountId>,
    pub depth: usize,
    pub children: Vec<AccountTree>,
}

impl AccountTree {
    /// Creates a node with no children attached yet.
    pub fn leaf(account: &Account) -> Self {
        Self {
            account_id: account.account_id,
            name: account.name.clone(),
            parent_id: account.parent_id,
            depth: account.level(),
            children: Vec::new(),
        }
    }

    /// Finds a node anywhere in this subtree by id.
    pub fn find(&self, account_id: AccountId) -> Option<&AccountTree> {
        let mut pending = vec![self];
        while let Some(node) = pending.pop() {
            if node.account_id == account_id {
                return Some(node);
            }
            pending.extend(node.children.iter());
        }
        None
    }

    /// Counts nodes in this subtree, including itself.
    pub fn node_count(&self) -> usize {
        let mut count = 0;
        let mut pending = vec![self];
        while let Some(node) = pending.pop() {
            count += 1;
            pending.extend(node.children.iter());
        }
        count
    }
}
