use hierarchy_core::db::open_db_in_memory;
use hierarchy_core::model::account::Account;
use hierarchy_core::repo::account_repo::{AccountReader, SqliteAccountStore};
use hierarchy_core::service::integrity::IntegrityViolation;
use hierarchy_core::service::tree_service::{
    AccountTreeService, ErrorKind, SeedOutcome, TreeConfig, TreeServiceError, DEFAULT_ROOT_NAME,
    MAX_ACCOUNT_NAME_CHARS,
};
use rusqlite::Connection;

fn service(conn: &Connection) -> AccountTreeService<SqliteAccountStore<'_>> {
    AccountTreeService::new(SqliteAccountStore::try_new(conn).unwrap())
}

fn insert_raw(conn: &Connection, account_id: i64, parent_id: Option<i64>, path: &str) {
    conn.execute(
        "INSERT INTO accounts (account_id, name, parent_account_id, account_node_path)
         VALUES (?1, ?2, ?3, ?4);",
        rusqlite::params![account_id, format!("Account {account_id}"), parent_id, path],
    )
    .unwrap();
}

/// `0(/) -> 1(/1/) -> 2(/1/2/) -> 3(/1/2/3/)`
fn seed_chain(conn: &Connection) {
    insert_raw(conn, 0, None, "/");
    insert_raw(conn, 1, Some(0), "/1/");
    insert_raw(conn, 2, Some(1), "/1/2/");
    insert_raw(conn, 3, Some(2), "/1/2/3/");
}

fn snapshot(conn: &Connection) -> Vec<Account> {
    SqliteAccountStore::try_new(conn)
        .unwrap()
        .snapshot_all()
        .unwrap()
}

fn find(conn: &Connection, account_id: i64) -> Option<Account> {
    snapshot(conn)
        .into_iter()
        .find(|account| account.account_id == account_id)
}

#[test]
fn root_is_created_once() {
    let conn = open_db_in_memory().unwrap();
    let service = service(&conn);

    let root = service.add_account("Global Account", None).unwrap();
    assert_eq!(root.account_id, 0);
    assert_eq!(root.path.as_str(), "/");
    assert_eq!(root.depth, 0);
    assert!(root.parent.is_none());

    let err = service.add_account("Second Root", None).unwrap_err();
    assert!(matches!(err, TreeServiceError::RootAlreadyExists));
    assert_eq!(err.kind(), ErrorKind::InvariantViolation);
    assert_eq!(snapshot(&conn).len(), 1);
}

#[test]
fn children_get_sequential_ids_and_derived_paths() {
    let conn = open_db_in_memory().unwrap();
    let service = service(&conn);
    service.add_account("Root", None).unwrap();

    let sales = service.add_account("Sales", Some(0)).unwrap();
    let emea = service.add_account("EMEA", Some(sales.account_id)).unwrap();
    let ops = service.add_account("Operations", Some(0)).unwrap();

    assert_eq!(sales.account_id, 1);
    assert_eq!(sales.path.as_str(), "/1/");
    assert_eq!(emea.account_id, 2);
    assert_eq!(emea.path.as_str(), "/1/2/");
    assert_eq!(emea.depth, 2);
    let parent = emea.parent.unwrap();
    assert_eq!(parent.account_id, 1);
    assert_eq!(parent.name, "Sales");
    assert_eq!(ops.path.as_str(), "/3/");
}

#[test]
fn add_under_missing_parent_is_not_found() {
    let conn = open_db_in_memory().unwrap();
    let service = service(&conn);
    service.add_account("Root", None).unwrap();

    let err = service.add_account("Orphan", Some(42)).unwrap_err();
    assert!(matches!(err, TreeServiceError::ParentNotFound(42)));
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[test]
fn add_below_max_level_is_rejected() {
    let conn = open_db_in_memory().unwrap();
    let service = service(&conn);
    service.add_account("Root", None).unwrap();

    let mut parent_id = 0;
    for level in 1..=4 {
        let account = service
            .add_account(format!("Level {level}"), Some(parent_id))
            .unwrap();
        assert_eq!(account.depth, level);
        parent_id = account.account_id;
    }

    let err = service.add_account("Too Deep", Some(parent_id)).unwrap_err();
    assert!(matches!(
        err,
        TreeServiceError::MaxDepthExceeded {
            account_id: None,
            level: 5,
            max_level: 4
        }
    ));
    assert_eq!(snapshot(&conn).len(), 5);
}

#[test]
fn account_names_are_trimmed_and_validated() {
    let conn = open_db_in_memory().unwrap();
    let service = service(&conn);

    assert!(matches!(
        service.add_account("   ", None),
        Err(TreeServiceError::InvalidAccountName)
    ));
    assert!(matches!(
        service.add_account("x".repeat(MAX_ACCOUNT_NAME_CHARS + 1), None),
        Err(TreeServiceError::AccountNameTooLong { .. })
    ));

    let root = service.add_account("  Global Account \n", None).unwrap();
    assert_eq!(root.name, "Global Account");
}

#[test]
fn move_under_own_descendant_is_a_cycle() {
    let conn = open_db_in_memory().unwrap();
    seed_chain(&conn);
    let service = service(&conn);

    let err = service.move_account(1, Some(3)).unwrap_err();
    assert!(matches!(
        err,
        TreeServiceError::CycleDetected {
            account_id: 1,
            parent_id: 3
        }
    ));
    assert_eq!(find(&conn, 1).unwrap().path.as_str(), "/1/");
}

#[test]
fn move_below_deepest_level_exceeds_max_depth() {
    let conn = open_db_in_memory().unwrap();
    insert_raw(&conn, 0, None, "/");
    insert_raw(&conn, 10, Some(0), "/10/");
    insert_raw(&conn, 11, Some(10), "/10/11/");
    insert_raw(&conn, 12, Some(11), "/10/11/12/");
    insert_raw(&conn, 13, Some(12), "/10/11/12/13/");
    insert_raw(&conn, 2, Some(0), "/2/");
    insert_raw(&conn, 3, Some(2), "/2/3/");
    let before = snapshot(&conn);
    let service = service(&conn);

    let err = service.move_account(2, Some(13)).unwrap_err();
    assert!(matches!(
        err,
        TreeServiceError::MaxDepthExceeded {
            account_id: Some(2),
            level: 5,
            max_level: 4
        }
    ));
    assert_eq!(snapshot(&conn), before);
}

#[test]
fn move_checks_depth_of_whole_subtree() {
    let conn = open_db_in_memory().unwrap();
    insert_raw(&conn, 0, None, "/");
    insert_raw(&conn, 1, Some(0), "/1/");
    insert_raw(&conn, 2, Some(1), "/1/2/");
    insert_raw(&conn, 3, Some(2), "/1/2/3/");
    insert_raw(&conn, 4, Some(3), "/1/2/3/4/");
    insert_raw(&conn, 5, Some(0), "/5/");
    insert_raw(&conn, 6, Some(5), "/5/6/");
    let service = service(&conn);

    // 2 itself would land at level 3, but its grandchild 4 would reach 5.
    let err = service.move_account(2, Some(6)).unwrap_err();
    assert!(matches!(
        err,
        TreeServiceError::MaxDepthExceeded {
            account_id: Some(2),
            level: 5,
            max_level: 4
        }
    ));

    // One level shallower fits exactly.
    let moved = service.move_account(2, Some(5)).unwrap();
    assert_eq!(moved.path.as_str(), "/5/2/");
    assert_eq!(find(&conn, 4).unwrap().path.as_str(), "/5/2/3/4/");
}

#[test]
fn move_rewrites_subtree_by_prefix_substitution() {
    let conn = open_db_in_memory().unwrap();
    seed_chain(&conn);
    insert_raw(&conn, 4, Some(2), "/1/2/4/");
    insert_raw(&conn, 5, Some(0), "/5/");
    let service = service(&conn);

    let moved = service.move_account(2, Some(5)).unwrap();
    assert_eq!(moved.account_id, 2);
    assert_eq!(moved.path.as_str(), "/5/2/");
    assert_eq!(moved.depth, 2);
    assert_eq!(moved.parent.unwrap().account_id, 5);

    let two = find(&conn, 2).unwrap();
    assert_eq!(two.parent_id, Some(5));
    let three = find(&conn, 3).unwrap();
    assert_eq!(three.path.as_str(), "/5/2/3/");
    assert_eq!(three.parent_id, Some(2));
    assert_eq!(find(&conn, 4).unwrap().path.as_str(), "/5/2/4/");
    assert_eq!(find(&conn, 1).unwrap().path.as_str(), "/1/");
    assert!(service.verify_integrity().unwrap().is_empty());
}

#[test]
fn move_rejects_self_parent_and_unknown_ids() {
    let conn = open_db_in_memory().unwrap();
    seed_chain(&conn);
    let service = service(&conn);

    assert!(matches!(
        service.move_account(2, Some(2)),
        Err(TreeServiceError::SelfParent(2))
    ));
    assert!(matches!(
        service.move_account(99, Some(0)),
        Err(TreeServiceError::AccountNotFound(99))
    ));
    assert!(matches!(
        service.move_account(2, Some(99)),
        Err(TreeServiceError::ParentNotFound(99))
    ));
}

#[test]
fn move_to_root_position_requires_no_other_root() {
    let conn = open_db_in_memory().unwrap();
    seed_chain(&conn);
    let service = service(&conn);

    let err = service.move_account(2, None).unwrap_err();
    assert!(matches!(err, TreeServiceError::RootAlreadyExists));
}

#[test]
fn root_cannot_move_below_its_descendants() {
    let conn = open_db_in_memory().unwrap();
    seed_chain(&conn);
    let service = service(&conn);

    let err = service.move_account(0, Some(1)).unwrap_err();
    assert!(matches!(err, TreeServiceError::CycleDetected { .. }));
}

#[test]
fn remove_promotes_children_to_grandparent() {
    let conn = open_db_in_memory().unwrap();
    seed_chain(&conn);
    let service = service(&conn);

    service.remove_account(2).unwrap();

    assert!(find(&conn, 2).is_none());
    let three = find(&conn, 3).unwrap();
    assert_eq!(three.parent_id, Some(1));
    assert_eq!(three.path.as_str(), "/1/3/");
}

#[test]
fn remove_keeps_relative_layout_of_promoted_subtrees() {
    let conn = open_db_in_memory().unwrap();
    insert_raw(&conn, 0, None, "/");
    insert_raw(&conn, 1, Some(0), "/1/");
    insert_raw(&conn, 2, Some(1), "/1/2/");
    insert_raw(&conn, 3, Some(1), "/1/3/");
    insert_raw(&conn, 4, Some(3), "/1/3/4/");
    insert_raw(&conn, 5, Some(4), "/1/3/4/5/");
    insert_raw(&conn, 6, Some(0), "/6/");
    let service = service(&conn);

    service.remove_account(1).unwrap();

    assert!(find(&conn, 1).is_none());
    let paths = snapshot(&conn)
        .into_iter()
        .map(|account| (account.account_id, account.parent_id, account.path.to_string()))
        .collect::<Vec<_>>();
    assert_eq!(
        paths,
        vec![
            (0, None, "/".to_string()),
            (2, Some(0), "/2/".to_string()),
            (3, Some(0), "/3/".to_string()),
            (4, Some(3), "/3/4/".to_string()),
            (5, Some(4), "/3/4/5/".to_string()),
            (6, Some(0), "/6/".to_string()),
        ]
    );
    let children = service
        .list_children(0)
        .unwrap()
        .into_iter()
        .map(|view| view.account_id)
        .collect::<Vec<_>>();
    assert_eq!(children, vec![2, 3, 6]);
    assert!(service.verify_integrity().unwrap().is_empty());
}

#[test]
fn remove_leaf_deletes_only_that_record() {
    let conn = open_db_in_memory().unwrap();
    seed_chain(&conn);
    let service = service(&conn);

    service.remove_account(3).unwrap();
    assert_eq!(snapshot(&conn).len(), 3);
    assert!(service.list_children(2).unwrap().is_empty());
}

#[test]
fn root_cannot_be_removed() {
    let conn = open_db_in_memory().unwrap();
    insert_raw(&conn, 0, None, "/");
    insert_raw(&conn, 1, Some(0), "/1/");
    let service = service(&conn);

    let err = service.remove_account(0).unwrap_err();
    assert!(matches!(err, TreeServiceError::RootRemovalForbidden));
    assert_eq!(err.error_code(), "root_removal_forbidden");
    assert_eq!(snapshot(&conn).len(), 2);

    assert!(matches!(
        service.remove_account(77),
        Err(TreeServiceError::AccountNotFound(77))
    ));
}

#[test]
fn get_account_tree_returns_requested_subtree() {
    let conn = open_db_in_memory().unwrap();
    insert_raw(&conn, 0, None, "/");
    insert_raw(&conn, 1, Some(0), "/1/");
    insert_raw(&conn, 2, Some(1), "/1/2/");
    let service = service(&conn);

    let tree = service.get_account_tree(Some(1)).unwrap();
    assert_eq!(tree.account_id, 1);
    assert_eq!(tree.children.len(), 1);
    assert_eq!(tree.children[0].account_id, 2);

    let whole = service.get_account_tree(None).unwrap();
    assert_eq!(whole.account_id, 0);
    assert_eq!(whole.node_count(), 3);

    assert!(matches!(
        service.get_account_tree(Some(9)),
        Err(TreeServiceError::AccountNotFound(9))
    ));
}

#[test]
fn get_account_tree_without_root_is_not_found() {
    let conn = open_db_in_memory().unwrap();
    let service = service(&conn);

    let err = service.get_account_tree(None).unwrap_err();
    assert!(matches!(err, TreeServiceError::RootNotFound));
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[test]
fn get_account_includes_parent_reference() {
    let conn = open_db_in_memory().unwrap();
    seed_chain(&conn);
    let service = service(&conn);

    let view = service.get_account(2).unwrap();
    assert_eq!(view.path.as_str(), "/1/2/");
    assert_eq!(view.depth, 2);
    let parent = view.parent.unwrap();
    assert_eq!(parent.account_id, 1);
    assert_eq!(parent.name, "Account 1");

    assert!(service.get_account(0).unwrap().parent.is_none());
    assert!(matches!(
        service.get_account(8),
        Err(TreeServiceError::AccountNotFound(8))
    ));
    assert!(matches!(
        service.list_children(8),
        Err(TreeServiceError::AccountNotFound(8))
    ));
}

#[test]
fn account_view_serializes_to_json() {
    let conn = open_db_in_memory().unwrap();
    seed_chain(&conn);
    let service = service(&conn);

    let json = serde_json::to_value(service.get_account(1).unwrap()).unwrap();
    assert_eq!(json["account_id"], 1);
    assert_eq!(json["path"], "/1/");
    assert_eq!(json["depth"], 1);
    assert_eq!(json["parent"]["account_id"], 0);

    let tree = serde_json::to_value(service.get_account_tree(Some(2)).unwrap()).unwrap();
    assert_eq!(tree["children"][0]["account_id"], 3);
    assert_eq!(tree["children"][0]["depth"], 3);
}

#[test]
fn ensure_root_seeds_only_empty_store() {
    let conn = open_db_in_memory().unwrap();
    let service = service(&conn);

    match service.ensure_root(DEFAULT_ROOT_NAME).unwrap() {
        SeedOutcome::Created(root) => {
            assert_eq!(root.account_id, 0);
            assert_eq!(root.name, DEFAULT_ROOT_NAME);
        }
        SeedOutcome::Skipped => panic!("empty store should be seeded"),
    }
    assert_eq!(
        service.ensure_root(DEFAULT_ROOT_NAME).unwrap(),
        SeedOutcome::Skipped
    );
    assert_eq!(snapshot(&conn).len(), 1);
}

#[test]
fn ensure_root_skips_store_with_records_but_no_root() {
    let conn = open_db_in_memory().unwrap();
    conn.execute_batch("PRAGMA foreign_keys = OFF;").unwrap();
    insert_raw(&conn, 5, Some(3), "/3/5/");
    let service = service(&conn);

    assert_eq!(
        service.ensure_root(DEFAULT_ROOT_NAME).unwrap(),
        SeedOutcome::Skipped
    );
    let accounts = snapshot(&conn);
    assert_eq!(accounts.len(), 1);
    assert_eq!(accounts[0].account_id, 5);
}

#[test]
fn custom_max_level_is_enforced() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteAccountStore::try_new(&conn).unwrap();
    let service = AccountTreeService::with_config(store, TreeConfig { max_level: 1 });
    assert_eq!(service.config().max_level, 1);

    service.add_account("Root", None).unwrap();
    let first = service.add_account("First", Some(0)).unwrap();
    let second = service.add_account("Second", Some(0)).unwrap();

    assert!(matches!(
        service.add_account("Nested", Some(first.account_id)),
        Err(TreeServiceError::MaxDepthExceeded { max_level: 1, .. })
    ));
    assert!(matches!(
        service.move_account(second.account_id, Some(first.account_id)),
        Err(TreeServiceError::MaxDepthExceeded { max_level: 1, .. })
    ));
}

#[test]
fn mixed_operations_keep_tree_consistent() {
    let conn = open_db_in_memory().unwrap();
    let service = service(&conn);
    service.ensure_root(DEFAULT_ROOT_NAME).unwrap();

    let a = service.add_account("A", Some(0)).unwrap().account_id;
    let b = service.add_account("B", Some(a)).unwrap().account_id;
    let c = service.add_account("C", Some(b)).unwrap().account_id;
    let d = service.add_account("D", Some(0)).unwrap().account_id;
    let e = service.add_account("E", Some(d)).unwrap().account_id;

    service.move_account(b, Some(d)).unwrap();
    service.remove_account(d).unwrap();
    service.move_account(e, Some(c)).unwrap();
    let _ = service.move_account(c, Some(e)).unwrap_err();

    assert!(service.verify_integrity().unwrap().is_empty());
    let tree = service.get_account_tree(None).unwrap();
    assert_eq!(tree.node_count(), 5);
    let e_node = tree.find(e).unwrap();
    assert_eq!(e_node.parent_id, Some(c));
    assert_eq!(e_node.depth, 3);
}

#[test]
fn verify_integrity_reports_corrupted_records() {
    let conn = open_db_in_memory().unwrap();
    insert_raw(&conn, 0, None, "/");
    insert_raw(&conn, 1, Some(0), "/1/");
    insert_raw(&conn, 2, Some(0), "/1/2/");
    let service = service(&conn);

    let violations = service.verify_integrity().unwrap();
    assert_eq!(violations.len(), 1);
    assert!(matches!(
        violations[0],
        IntegrityViolation::PathMismatch { account_id: 2, .. }
    ));
}
