//! Nested subtree view built from a flat account snapshot.
//!
//! # Responsibility
//! - Turn flat records into an owned `AccountTree` rooted at one account.
//!
//! # Invariants
//! - Work is iterative (index, then link); input depth never grows the stack.
//! - Members are taken in path order, so a parent is always indexed before
//!   any of its descendants and siblings keep path order.

use crate::model::account::{Account, AccountId, AccountTree};
use crate::service::tree_service::TreeServiceError;
use log::debug;
use std::collections::HashMap;

/// Builds the subtree rooted at `root_id` from `snapshot`.
///
/// Records outside the target's path range are ignored. A record whose parent
/// is not part of the subtree is dropped from the view.
///
/// # Errors
/// - `TreeServiceError::AccountNotFound` when `root_id` is not in `snapshot`.
pub fn assemble_tree(
    snapshot: &[Account],
    root_id: AccountId,
) -> Result<AccountTree, TreeServiceError> {
    let target = snapshot
        .iter()
        .find(|account| account.account_id == root_id)
        .ok_or(TreeServiceError::AccountNotFound(root_id))?;

    let mut members = snapshot
        .iter()
        .filter(|account| account.path.is_within(&target.path))
        .collect::<Vec<_>>();
    members.sort_by(|left, right| left.path.cmp(&right.path));

    let index = members
        .iter()
        .enumerate()
        .map(|(position, account)| (account.account_id, position))
        .collect::<HashMap<_, _>>();
    let mut slots = members
        .iter()
        .map(|account| Some(AccountTree::leaf(account)))
        .collect::<Vec<_>>();

    // Reverse path order finishes every descendant before its parent, so each
    // node is complete by the time it is moved into its parent's children.
    for position in (1..members.len()).rev() {
        let Some(mut node) = slots[position].take() else {
            continue;
        };
        node.children.reverse();

        let parent_slot = members[position]
            .parent_id
            .and_then(|parent_id| index.get(&parent_id).copied())
            .filter(|&parent_position| parent_position < position);
        match parent_slot.and_then(|parent_position| slots[parent_position].as_mut()) {
            Some(parent) => parent.children.push(node),
            None => debug!(
                "event=tree_assemble module=tree status=skipped account_id={} reason=parent_outside_subtree",
                node.account_id
            ),
        }
    }

    let mut root = slots
        .first_mut()
        .and_then(Option::take)
        .ok_or(TreeServiceError::AccountNotFound(root_id))?;
    root.children.reverse();
    Ok(root)
}

#[cfg(test)]
mod tests {
    use super::assemble_tree;
    use crate::model::account::Account;
    use crate::model::path::HierarchyPath;
    use crate::service::tree_service::TreeServiceError;

    fn account(account_id: i64, parent_id: Option<i64>, path: &str) -> Account {
        Account {
            account_id,
            name: format!("Account {account_id}"),
            parent_id,
            path: HierarchyPath::new(path).unwrap(),
        }
    }

    fn sample_snapshot() -> Vec<Account> {
        // Deliberately unsorted to exercise the path ordering step.
        vec![
            account(3, Some(2), "/1/2/3/"),
            account(4, Some(1), "/1/4/"),
            account(0, None, "/"),
            account(2, Some(1), "/1/2/"),
            account(5, Some(0), "/5/"),
            account(1, Some(0), "/1/"),
        ]
    }

    #[test]
    fn assembles_full_tree_from_root() {
        let tree = assemble_tree(&sample_snapshot(), 0).unwrap();

        assert_eq!(tree.account_id, 0);
        assert_eq!(tree.depth, 0);
        assert_eq!(tree.node_count(), 6);
        let child_ids = tree.children.iter().map(|c| c.account_id).collect::<Vec<_>>();
        assert_eq!(child_ids, vec![1, 5]);
    }

    #[test]
    fn assembles_subtree_with_children_in_path_order() {
        let tree = assemble_tree(&sample_snapshot(), 1).unwrap();

        assert_eq!(tree.account_id, 1);
        assert_eq!(tree.parent_id, Some(0));
        let child_ids = tree.children.iter().map(|c| c.account_id).collect::<Vec<_>>();
        assert_eq!(child_ids, vec![2, 4]);

        let two = tree.find(2).unwrap();
        assert_eq!(two.children.len(), 1);
        assert_eq!(two.children[0].account_id, 3);
        assert_eq!(two.children[0].depth, 3);
        assert!(tree.find(5).is_none());
    }

    #[test]
    fn leaf_target_has_no_children() {
        let tree = assemble_tree(&sample_snapshot(), 3).unwrap();
        assert_eq!(tree.account_id, 3);
        assert!(tree.children.is_empty());
    }

    #[test]
    fn missing_target_is_not_found() {
        let err = assemble_tree(&sample_snapshot(), 99).unwrap_err();
        assert!(matches!(err, TreeServiceError::AccountNotFound(99)));
    }

    #[test]
    fn record_with_parent_outside_subtree_is_dropped() {
        let mut snapshot = sample_snapshot();
        // Path claims to be under 1 while parent id points elsewhere.
        snapshot.push(account(9, Some(5), "/1/9/"));

        let tree = assemble_tree(&snapshot, 1).unwrap();
        assert!(tree.find(9).is_none());
        assert_eq!(tree.node_count(), 4);
    }
}
