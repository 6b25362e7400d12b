//! Account tree use-case service.
//!
//! # Responsibility
//! - Validate tree invariants above the record store and execute add, move
//!   and remove as single transactions.
//! - Serve single-account, children and subtree reads.
//!
//! # Invariants
//! - Exactly one root (`parent_id == None`, path `/`) and it is never removed.
//! - Every non-root path is `parent.path + account_id + "/"`.
//! - No account sits deeper than `TreeConfig::max_level`.
//! - An account is never attached below itself or its own descendants.
//! - All checks of one operation run before its first write, and every
//!   failure after `begin` rolls the whole transaction back.

use crate::model::account::{Account, AccountId, AccountTree, AccountView};
use crate::model::path::{HierarchyPath, PathError};
use crate::repo::account_repo::{AccountReader, AccountStore, AccountTransaction, StoreError};
use crate::service::integrity::{audit_tree, IntegrityViolation};
use crate::service::tree_assembler::assemble_tree;
use log::{error, info, warn};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Instant;

/// Deepest permitted level; root is level 0, so five levels in total.
pub const DEFAULT_MAX_LEVEL: usize = 4;
/// Longest accepted account name, in characters.
pub const MAX_ACCOUNT_NAME_CHARS: usize = 200;
/// Name given to the root created by `ensure_root` seeding.
pub const DEFAULT_ROOT_NAME: &str = "Global Account";

/// Tunable tree limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeConfig {
    pub max_level: usize,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            max_level: DEFAULT_MAX_LEVEL,
        }
    }
}

/// Closed classification of service failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Account or parent id does not exist.
    NotFound,
    /// Request would break a tree invariant or carries invalid input.
    InvariantViolation,
    /// A concurrent writer held the store.
    Conflict,
    /// Store or transport failure.
    Unexpected,
}

/// Errors from account tree service operations.
#[derive(Debug)]
pub enum TreeServiceError {
    /// Name is blank after trim.
    InvalidAccountName,
    /// Name is longer than `max_chars` characters.
    AccountNameTooLong { max_chars: usize },
    AccountNotFound(AccountId),
    ParentNotFound(AccountId),
    /// Tree query without an id found no root.
    RootNotFound,
    RootAlreadyExists,
    RootRemovalForbidden,
    /// Account was asked to become its own parent.
    SelfParent(AccountId),
    /// Target parent lies inside the subtree being attached.
    CycleDetected {
        account_id: AccountId,
        parent_id: AccountId,
    },
    /// Operation would place some account at `level > max_level`.
    MaxDepthExceeded {
        account_id: Option<AccountId>,
        level: usize,
        max_level: usize,
    },
    /// Store stayed locked by another writer.
    Conflict(String),
    /// Store-level failure.
    Store(StoreError),
    /// Rolling back after `error` failed as well.
    RollbackFailed {
        error: Box<TreeServiceError>,
        rollback: StoreError,
    },
}

impl TreeServiceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::AccountNotFound(_) | Self::ParentNotFound(_) | Self::RootNotFound => {
                ErrorKind::NotFound
            }
            Self::InvalidAccountName
            | Self::AccountNameTooLong { .. }
            | Self::RootAlreadyExists
            | Self::RootRemovalForbidden
            | Self::SelfParent(_)
            | Self::CycleDetected { .. }
            | Self::MaxDepthExceeded { .. } => ErrorKind::InvariantViolation,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::Store(_) | Self::RollbackFailed { .. } => ErrorKind::Unexpected,
        }
    }

    /// Stable snake_case code used in log events.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidAccountName => "invalid_account_name",
            Self::AccountNameTooLong { .. } => "account_name_too_long",
            Self::AccountNotFound(_) => "account_not_found",
            Self::ParentNotFound(_) => "parent_not_found",
            Self::RootNotFound => "root_not_found",
            Self::RootAlreadyExists => "root_already_exists",
            Self::RootRemovalForbidden => "root_removal_forbidden",
            Self::SelfParent(_) => "self_parent",
            Self::CycleDetected { .. } => "cycle_detected",
            Self::MaxDepthExceeded { .. } => "max_depth_exceeded",
            Self::Conflict(_) => "conflict",
            Self::Store(_) => "store_failure",
            Self::RollbackFailed { .. } => "rollback_failed",
        }
    }
}

impl Display for TreeServiceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidAccountName => write!(f, "account name must not be blank"),
            Self::AccountNameTooLong { max_chars } => {
                write!(f, "account name must not exceed {max_chars} characters")
            }
            Self::AccountNotFound(id) => write!(f, "account not found: {id}"),
            Self::ParentNotFound(id) => write!(f, "parent account not found: {id}"),
            Self::RootNotFound => write!(f, "root account not found"),
            Self::RootAlreadyExists => write!(f, "root account already exists"),
            Self::RootRemovalForbidden => write!(f, "root account cannot be removed"),
            Self::SelfParent(id) => write!(f, "account {id} cannot be its own parent"),
            Self::CycleDetected {
                account_id,
                parent_id,
            } => write!(
                f,
                "cycle detected: account {account_id} under parent {parent_id}"
            ),
            Self::MaxDepthExceeded {
                account_id,
                level,
                max_level,
            } => match account_id {
                Some(id) => write!(
                    f,
                    "max depth exceeded: account {id} would reach level {level} (max {max_level})"
                ),
                None => write!(
                    f,
                    "max depth exceeded: new account would reach level {level} (max {max_level})"
                ),
            },
            Self::Conflict(message) => write!(f, "concurrent tree change: {message}"),
            Self::Store(err) => write!(f, "{err}"),
            Self::RollbackFailed { error, rollback } => {
                write!(f, "{error}; rollback also failed: {rollback}")
            }
        }
    }
}

impl Error for TreeServiceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Store(err) => Some(err),
            Self::RollbackFailed { error, .. } => Some(error.as_ref()),
            _ => None,
        }
    }
}

impl From<StoreError> for TreeServiceError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Conflict(message) => Self::Conflict(message),
            other => Self::Store(other),
        }
    }
}

impl From<PathError> for TreeServiceError {
    fn from(value: PathError) -> Self {
        Self::Store(StoreError::InvalidData(value.to_string()))
    }
}

/// Result of `ensure_root` seeding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SeedOutcome {
    /// Store was empty; root created.
    Created(AccountView),
    /// A root already exists; nothing written.
    Skipped,
}

/// One planned record rewrite.
#[derive(Debug)]
struct PathRewrite {
    account_id: AccountId,
    path: HierarchyPath,
    parent_id: Option<AccountId>,
}

/// Account tree service facade.
pub struct AccountTreeService<S: AccountStore> {
    store: S,
    config: TreeConfig,
}

impl<S: AccountStore> AccountTreeService<S> {
    /// Creates service with the default tree limits.
    pub fn new(store: S) -> Self {
        Self::with_config(store, TreeConfig::default())
    }

    pub fn with_config(store: S, config: TreeConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> TreeConfig {
        self.config
    }

    /// Loads one account with its parent reference.
    pub fn get_account(&self, account_id: AccountId) -> Result<AccountView, TreeServiceError> {
        let account = self
            .store
            .find_by_id(account_id)?
            .ok_or(TreeServiceError::AccountNotFound(account_id))?;
        let parent = match account.parent_id {
            Some(parent_id) => self.store.find_by_id(parent_id)?,
            None => None,
        };
        Ok(AccountView::from_account(&account, parent.as_ref()))
    }

    /// Builds the nested subtree under `account_id`, or the whole tree when
    /// no id is given.
    pub fn get_account_tree(
        &self,
        account_id: Option<AccountId>,
    ) -> Result<AccountTree, TreeServiceError> {
        let snapshot = self.store.snapshot_all()?;
        let root_id = match account_id {
            Some(account_id) => account_id,
            None => snapshot
                .iter()
                .find(|account| account.is_root())
                .map(|account| account.account_id)
                .ok_or(TreeServiceError::RootNotFound)?,
        };
        assemble_tree(&snapshot, root_id)
    }

    /// Lists direct children of one account, ordered by path.
    pub fn list_children(
        &self,
        account_id: AccountId,
    ) -> Result<Vec<AccountView>, TreeServiceError> {
        let parent = self
            .store
            .find_by_id(account_id)?
            .ok_or(TreeServiceError::AccountNotFound(account_id))?;
        Ok(self
            .store
            .list_children(account_id)?
            .iter()
            .map(|child| AccountView::from_account(child, Some(&parent)))
            .collect())
    }

    /// Creates the root (`parent_id == None`) or a child account.
    ///
    /// The root always receives id 0 and path `/`; children receive the next
    /// id from the store sequence, allocated inside the same transaction.
    pub fn add_account(
        &self,
        name: impl Into<String>,
        parent_id: Option<AccountId>,
    ) -> Result<AccountView, TreeServiceError> {
        let name = normalize_account_name(name.into())?;
        let detail = format!("parent_id={}", id_field(parent_id));

        let Some(parent_id) = parent_id else {
            return self.in_transaction("account_add_root", &detail, |tx| {
                if !tx.list_roots()?.is_empty() {
                    return Err(TreeServiceError::RootAlreadyExists);
                }
                let root = Account::new_root(name);
                tx.add(&root)?;
                Ok(AccountView::from_account(&root, None))
            });
        };

        self.in_transaction("account_add", &detail, |tx| {
            let parent = tx
                .find_by_id(parent_id)?
                .ok_or(TreeServiceError::ParentNotFound(parent_id))?;
            self.ensure_parent_has_room(&parent, None)?;

            let account_id = tx.next_id()?;
            let child = Account::new_child(account_id, name, &parent);
            ensure_acyclic(account_id, &parent, &child.path)?;

            tx.add(&child)?;
            Ok(AccountView::from_account(&child, Some(&parent)))
        })
    }

    /// Re-attaches an account (and its whole subtree) under a new parent, or
    /// as the root when `new_parent_id` is `None`.
    ///
    /// Descendant paths are rewritten by prefix substitution, so ids and the
    /// relative layout below the moved account are preserved.
    pub fn move_account(
        &self,
        account_id: AccountId,
        new_parent_id: Option<AccountId>,
    ) -> Result<AccountView, TreeServiceError> {
        let detail = format!(
            "account_id={account_id} new_parent_id={}",
            id_field(new_parent_id)
        );

        self.in_transaction("account_move", &detail, |tx| {
            let node = tx
                .find_by_id(account_id)?
                .ok_or(TreeServiceError::AccountNotFound(account_id))?;
            if new_parent_id == Some(account_id) {
                return Err(TreeServiceError::SelfParent(account_id));
            }
            let subtree = tx.load_subtree(&node.path)?;

            let (new_path, parent) = match new_parent_id {
                None => {
                    let other_root = tx
                        .list_roots()?
                        .iter()
                        .any(|root| root.account_id != account_id);
                    if other_root {
                        return Err(TreeServiceError::RootAlreadyExists);
                    }
                    (HierarchyPath::root(), None)
                }
                Some(parent_id) => {
                    let parent = tx
                        .find_by_id(parent_id)?
                        .ok_or(TreeServiceError::ParentNotFound(parent_id))?;
                    self.ensure_parent_has_room(&parent, Some(account_id))?;
                    let new_path = HierarchyPath::build_child_path(&parent.path, account_id);
                    ensure_acyclic(account_id, &parent, &node.path)?;
                    (new_path, Some(parent))
                }
            };

            self.ensure_subtree_fits(&node, &subtree, new_path.level())?;
            let rewrites = plan_subtree_rewrite(&node, &subtree, &new_path, new_parent_id)?;
            apply_rewrites(tx, &rewrites)?;

            let moved = Account {
                parent_id: new_parent_id,
                path: new_path,
                ..node
            };
            Ok(AccountView::from_account(&moved, parent.as_ref()))
        })
    }

    /// Deletes one non-root account, promoting each of its direct children
    /// (with their subtrees) to the removed account's parent.
    pub fn remove_account(&self, account_id: AccountId) -> Result<(), TreeServiceError> {
        let detail = format!("account_id={account_id}");

        self.in_transaction("account_remove", &detail, |tx| {
            let node = tx
                .find_by_id(account_id)?
                .ok_or(TreeServiceError::AccountNotFound(account_id))?;
            let parent_id = node
                .parent_id
                .ok_or(TreeServiceError::RootRemovalForbidden)?;

            let subtree = tx.load_subtree(&node.path)?;
            let grandparent = tx
                .find_by_id(parent_id)?
                .ok_or(TreeServiceError::ParentNotFound(parent_id))?;

            let mut rewrites = Vec::new();
            for child in subtree
                .iter()
                .filter(|account| account.parent_id == Some(account_id))
            {
                let new_child_path =
                    HierarchyPath::build_child_path(&grandparent.path, child.account_id);
                ensure_acyclic(child.account_id, &grandparent, &child.path)?;

                let child_subtree = subtree
                    .iter()
                    .filter(|account| account.path.is_within(&child.path))
                    .cloned()
                    .collect::<Vec<_>>();
                self.ensure_subtree_fits(child, &child_subtree, new_child_path.level())?;
                rewrites.extend(plan_subtree_rewrite(
                    child,
                    &child_subtree,
                    &new_child_path,
                    Some(grandparent.account_id),
                )?);
            }

            apply_rewrites(tx, &rewrites)?;
            tx.remove(account_id)?;
            Ok(())
        })
    }

    /// Creates the root when the store holds no accounts at all.
    pub fn ensure_root(&self, name: impl Into<String>) -> Result<SeedOutcome, TreeServiceError> {
        let name = normalize_account_name(name.into())?;

        let outcome = self.in_transaction("account_seed", "", |tx| {
            if !tx.snapshot_all()?.is_empty() {
                return Ok(SeedOutcome::Skipped);
            }
            let root = Account::new_root(name);
            tx.add(&root)?;
            Ok(SeedOutcome::Created(AccountView::from_account(&root, None)))
        })?;

        if outcome == SeedOutcome::Skipped {
            info!("event=account_seed module=tree status=skipped reason=store_not_empty");
        }
        Ok(outcome)
    }

    /// Audits the current snapshot against every tree invariant.
    pub fn verify_integrity(&self) -> Result<Vec<IntegrityViolation>, TreeServiceError> {
        let snapshot = self.store.snapshot_all()?;
        let violations = audit_tree(&snapshot, self.config.max_level);
        for violation in &violations {
            warn!("event=tree_audit module=tree status=violation detail=\"{violation}\"");
        }
        Ok(violations)
    }

    fn ensure_parent_has_room(
        &self,
        parent: &Account,
        account_id: Option<AccountId>,
    ) -> Result<(), TreeServiceError> {
        if parent.level() >= self.config.max_level {
            return Err(TreeServiceError::MaxDepthExceeded {
                account_id,
                level: parent.level() + 1,
                max_level: self.config.max_level,
            });
        }
        Ok(())
    }

    /// Rejects re-attachments whose deepest member would pass the bound.
    fn ensure_subtree_fits(
        &self,
        node: &Account,
        subtree: &[Account],
        new_level: usize,
    ) -> Result<(), TreeServiceError> {
        let deepest = subtree
            .iter()
            .map(Account::level)
            .max()
            .unwrap_or_else(|| node.level());
        let new_max_level = new_level + deepest.saturating_sub(node.level());
        if new_max_level > self.config.max_level {
            return Err(TreeServiceError::MaxDepthExceeded {
                account_id: Some(node.account_id),
                level: new_max_level,
                max_level: self.config.max_level,
            });
        }
        Ok(())
    }

    /// Runs `body` in one store transaction and logs the terminal event.
    ///
    /// Commits on success. On failure rolls back and returns the original
    /// error, or `RollbackFailed` carrying both when the rollback fails too.
    fn in_transaction<'s, T>(
        &'s self,
        event: &'static str,
        detail: &str,
        body: impl FnOnce(&S::Tx<'s>) -> Result<T, TreeServiceError>,
    ) -> Result<T, TreeServiceError> {
        let started_at = Instant::now();
        let result = self.store.begin().map_err(TreeServiceError::from).and_then(|tx| {
            match body(&tx) {
                Ok(value) => {
                    tx.commit()?;
                    Ok(value)
                }
                Err(err) => match tx.rollback() {
                    Ok(()) => Err(err),
                    Err(rollback) => Err(TreeServiceError::RollbackFailed {
                        error: Box::new(err),
                        rollback,
                    }),
                },
            }
        });

        let duration_ms = started_at.elapsed().as_millis();
        match &result {
            Ok(_) => info!("event={event} module=tree status=ok {detail} duration_ms={duration_ms}"),
            Err(err) => match err.kind() {
                ErrorKind::NotFound | ErrorKind::InvariantViolation => warn!(
                    "event={event} module=tree status=rejected {detail} duration_ms={duration_ms} error_code={}",
                    err.error_code()
                ),
                ErrorKind::Conflict => warn!(
                    "event={event} module=tree status=conflict {detail} duration_ms={duration_ms} error_code={} error={err}",
                    err.error_code()
                ),
                ErrorKind::Unexpected => error!(
                    "event={event} module=tree status=error {detail} duration_ms={duration_ms} error_code={} error={err}",
                    err.error_code()
                ),
            },
        }
        result
    }
}

/// Rejects attaching below `parent` when `parent` lies within `subtree_path`.
fn ensure_acyclic(
    account_id: AccountId,
    parent: &Account,
    subtree_path: &HierarchyPath,
) -> Result<(), TreeServiceError> {
    if parent.path.is_within(subtree_path) {
        return Err(TreeServiceError::CycleDetected {
            account_id,
            parent_id: parent.account_id,
        });
    }
    Ok(())
}

/// Plans the rewrite of `node` to `new_path` and of every other subtree
/// member by prefix substitution. Unchanged records are left out.
fn plan_subtree_rewrite(
    node: &Account,
    subtree: &[Account],
    new_path: &HierarchyPath,
    new_parent_id: Option<AccountId>,
) -> Result<Vec<PathRewrite>, TreeServiceError> {
    let mut rewrites = Vec::with_capacity(subtree.len());
    for member in subtree {
        let (path, parent_id) = if member.account_id == node.account_id {
            (new_path.clone(), new_parent_id)
        } else {
            (member.path.rebase(&node.path, new_path)?, member.parent_id)
        };
        if path == member.path && parent_id == member.parent_id {
            continue;
        }
        rewrites.push(PathRewrite {
            account_id: member.account_id,
            path,
            parent_id,
        });
    }
    Ok(rewrites)
}

fn apply_rewrites<T: AccountTransaction>(
    tx: &T,
    rewrites: &[PathRewrite],
) -> Result<(), TreeServiceError> {
    for rewrite in rewrites {
        tx.update_path_and_parent(rewrite.account_id, &rewrite.path, rewrite.parent_id)?;
    }
    Ok(())
}

fn normalize_account_name(value: String) -> Result<String, TreeServiceError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(TreeServiceError::InvalidAccountName);
    }
    if trimmed.chars().count() > MAX_ACCOUNT_NAME_CHARS {
        return Err(TreeServiceError::AccountNameTooLong {
            max_chars: MAX_ACCOUNT_NAME_CHARS,
        });
    }
    Ok(trimmed.to_string())
}

fn id_field(value: Option<AccountId>) -> String {
    value.map_or_else(|| "none".to_string(), |id| id.to_string())
}
