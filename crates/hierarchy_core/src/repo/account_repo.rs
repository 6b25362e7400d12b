//! Account store contracts and SQLite implementation.
//!
//! # Responsibility
//! - Define the transactional record-keeping contract the tree service uses.
//! - Keep SQL, row parsing and lock handling inside the repository boundary.
//!
//! # Invariants
//! - The store enforces no tree rules; it only keeps records consistent with
//!   what the service writes.
//! - Multi-row reads are ordered by path, so parents precede descendants.
//! - Persisted paths must match `^/([0-9]+/)*$`; anything else is `InvalidData`.
//! - Write transactions start `IMMEDIATE`: concurrent mutations serialize on
//!   the database write lock and surface `Conflict` when it stays busy.

use crate::db::migrations::latest_version;
use crate::db::DbError;
use crate::model::account::{Account, AccountId};
use crate::model::path::HierarchyPath;
use once_cell::sync::Lazy;
use regex::Regex;
use rusqlite::{
    params, Connection, ErrorCode, OptionalExtension, Row, Transaction, TransactionBehavior,
};
use std::error::Error;
use std::fmt::{Display, Formatter};

const ACCOUNT_SELECT_SQL: &str = "SELECT
    account_id,
    name,
    parent_account_id,
    account_node_path
FROM accounts";

const ACCOUNT_ID_SEQUENCE: &str = "accounts";

static PATH_GRAMMAR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^/(?:[0-9]+/)*$").expect("valid path grammar regex"));

pub type StoreResult<T> = Result<T, StoreError>;

/// Errors from account store operations.
#[derive(Debug)]
pub enum StoreError {
    /// Underlying SQLite/bootstrap error.
    Db(DbError),
    /// Another writer holds the database and the busy timeout elapsed.
    Conflict(String),
    /// A write targeted a record that does not exist.
    AccountNotFound(AccountId),
    /// Connection schema is not at the expected migrated version.
    UninitializedConnection {
        expected_version: u32,
        actual_version: u32,
    },
    /// Required table is missing.
    MissingRequiredTable(&'static str),
    /// Required column is missing from expected table.
    MissingRequiredColumn {
        table: &'static str,
        column: &'static str,
    },
    /// Persisted or submitted data does not fit the record format.
    InvalidData(String),
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::Conflict(message) => write!(f, "account store is busy: {message}"),
            Self::AccountNotFound(id) => write!(f, "account record not found: {id}"),
            Self::UninitializedConnection {
                expected_version,
                actual_version,
            } => write!(
                f,
                "account store requires schema version {expected_version}, got {actual_version}"
            ),
            Self::MissingRequiredTable(table) => {
                write!(f, "account store requires table `{table}`")
            }
            Self::MissingRequiredColumn { table, column } => write!(
                f,
                "account store requires column `{column}` in table `{table}`"
            ),
            Self::InvalidData(message) => write!(f, "invalid account data: {message}"),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for StoreError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        let busy = matches!(
            &value,
            rusqlite::Error::SqliteFailure(err, _)
                if matches!(err.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
        );
        if busy {
            return Self::Conflict(value.to_string());
        }
        Self::Db(DbError::Sqlite(value))
    }
}

/// Read operations available both outside and inside a transaction.
pub trait AccountReader {
    /// Point lookup by id.
    fn find_by_id(&self, account_id: AccountId) -> StoreResult<Option<Account>>;
    /// All records without a parent. A consistent tree has at most one.
    fn list_roots(&self) -> StoreResult<Vec<Account>>;
    /// Every record, ordered by path.
    fn snapshot_all(&self) -> StoreResult<Vec<Account>>;
    /// Records whose path equals or descends from `path`, ordered by path.
    fn load_subtree(&self, path: &HierarchyPath) -> StoreResult<Vec<Account>>;
    /// Direct children of one record, ordered by path.
    fn list_children(&self, parent_id: AccountId) -> StoreResult<Vec<Account>>;
}

/// Store entry point: reads plus transaction creation.
pub trait AccountStore: AccountReader {
    type Tx<'a>: AccountTransaction
    where
        Self: 'a;

    /// Opens one write transaction. Nested transactions are not supported.
    fn begin(&self) -> StoreResult<Self::Tx<'_>>;
}

/// Write operations scoped to one transaction.
///
/// Dropping a transaction without `commit` rolls it back.
pub trait AccountTransaction: AccountReader {
    /// Allocates the next id from the monotonic sequence.
    fn next_id(&self) -> StoreResult<AccountId>;
    fn add(&self, account: &Account) -> StoreResult<()>;
    fn update_path_and_parent(
        &self,
        account_id: AccountId,
        path: &HierarchyPath,
        parent_id: Option<AccountId>,
    ) -> StoreResult<()>;
    fn remove(&self, account_id: AccountId) -> StoreResult<()>;
    fn commit(self) -> StoreResult<()>;
    fn rollback(self) -> StoreResult<()>;
}

/// SQLite-backed account store.
pub struct SqliteAccountStore<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteAccountStore<'conn> {
    /// Creates store from a migrated connection.
    pub fn try_new(conn: &'conn Connection) -> StoreResult<Self> {
        ensure_account_connection_ready(conn)?;
        Ok(Self { conn })
    }
}

/// One `BEGIN IMMEDIATE` transaction on the store connection.
pub struct SqliteAccountTransaction<'conn> {
    tx: Transaction<'conn>,
}

impl AccountReader for SqliteAccountStore<'_> {
    fn find_by_id(&self, account_id: AccountId) -> StoreResult<Option<Account>> {
        find_account(self.conn, account_id)
    }

    fn list_roots(&self) -> StoreResult<Vec<Account>> {
        query_roots(self.conn)
    }

    fn snapshot_all(&self) -> StoreResult<Vec<Account>> {
        query_all(self.conn)
    }

    fn load_subtree(&self, path: &HierarchyPath) -> StoreResult<Vec<Account>> {
        query_subtree(self.conn, path)
    }

    fn list_children(&self, parent_id: AccountId) -> StoreResult<Vec<Account>> {
        query_children(self.conn, parent_id)
    }
}

impl AccountStore for SqliteAccountStore<'_> {
    type Tx<'a>
        = SqliteAccountTransaction<'a>
    where
        Self: 'a;

    fn begin(&self) -> StoreResult<SqliteAccountTransaction<'_>> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        Ok(SqliteAccountTransaction { tx })
    }
}

impl AccountReader for SqliteAccountTransaction<'_> {
    fn find_by_id(&self, account_id: AccountId) -> StoreResult<Option<Account>> {
        find_account(&self.tx, account_id)
    }

    fn list_roots(&self) -> StoreResult<Vec<Account>> {
        query_roots(&self.tx)
    }

    fn snapshot_all(&self) -> StoreResult<Vec<Account>> {
        query_all(&self.tx)
    }

    fn load_subtree(&self, path: &HierarchyPath) -> StoreResult<Vec<Account>> {
        query_subtree(&self.tx, path)
    }

    fn list_children(&self, parent_id: AccountId) -> StoreResult<Vec<Account>> {
        query_children(&self.tx, parent_id)
    }
}

impl AccountTransaction for SqliteAccountTransaction<'_> {
    fn next_id(&self) -> StoreResult<AccountId> {
        let next: Option<AccountId> = self
            .tx
            .query_row(
                "SELECT next_value
                 FROM account_id_sequence
                 WHERE name = ?1;",
                [ACCOUNT_ID_SEQUENCE],
                |row| row.get(0),
            )
            .optional()?;
        let next = next.ok_or_else(|| {
            StoreError::InvalidData(format!(
                "sequence `{ACCOUNT_ID_SEQUENCE}` missing from account_id_sequence"
            ))
        })?;

        self.tx.execute(
            "UPDATE account_id_sequence
             SET next_value = ?2
             WHERE name = ?1;",
            params![ACCOUNT_ID_SEQUENCE, next + 1],
        )?;
        Ok(next)
    }

    fn add(&self, account: &Account) -> StoreResult<()> {
        ensure_canonical_path(&account.path)?;
        self.tx.execute(
            "INSERT INTO accounts (
                account_id,
                name,
                parent_account_id,
                account_node_path
            ) VALUES (?1, ?2, ?3, ?4);",
            params![
                account.account_id,
                account.name.as_str(),
                account.parent_id,
                account.path.as_str(),
            ],
        )?;
        Ok(())
    }

    fn update_path_and_parent(
        &self,
        account_id: AccountId,
        path: &HierarchyPath,
        parent_id: Option<AccountId>,
    ) -> StoreResult<()> {
        ensure_canonical_path(path)?;
        let changed = self.tx.execute(
            "UPDATE accounts
             SET account_node_path = ?2,
                 parent_account_id = ?3
             WHERE account_id = ?1;",
            params![account_id, path.as_str(), parent_id],
        )?;
        if changed == 0 {
            return Err(StoreError::AccountNotFound(account_id));
        }
        Ok(())
    }

    fn remove(&self, account_id: AccountId) -> StoreResult<()> {
        let changed = self.tx.execute(
            "DELETE FROM accounts
             WHERE account_id = ?1;",
            [account_id],
        )?;
        if changed == 0 {
            return Err(StoreError::AccountNotFound(account_id));
        }
        Ok(())
    }

    fn commit(self) -> StoreResult<()> {
        self.tx.commit()?;
        Ok(())
    }

    fn rollback(self) -> StoreResult<()> {
        self.tx.rollback()?;
        Ok(())
    }
}

/// Exclusive upper bound of the path range holding `path` and its descendants.
///
/// Every such path is `P + tail` with `P` ending in `/`; replacing that final
/// `/` (0x2F) with `0` (0x30) yields the smallest string above all of them.
fn subtree_upper_bound(path: &HierarchyPath) -> String {
    let raw = path.as_str();
    format!("{}0", &raw[..raw.len() - 1])
}

fn find_account(conn: &Connection, account_id: AccountId) -> StoreResult<Option<Account>> {
    let mut stmt = conn.prepare(&format!(
        "{ACCOUNT_SELECT_SQL}
         WHERE account_id = ?1;"
    ))?;
    let mut rows = stmt.query([account_id])?;
    if let Some(row) = rows.next()? {
        return Ok(Some(parse_account_row(row)?));
    }
    Ok(None)
}

fn query_roots(conn: &Connection) -> StoreResult<Vec<Account>> {
    collect_accounts(
        conn,
        &format!(
            "{ACCOUNT_SELECT_SQL}
             WHERE parent_account_id IS NULL
             ORDER BY account_id ASC;"
        ),
        params![],
    )
}

fn query_all(conn: &Connection) -> StoreResult<Vec<Account>> {
    collect_accounts(
        conn,
        &format!("{ACCOUNT_SELECT_SQL} ORDER BY account_node_path ASC;"),
        params![],
    )
}

fn query_subtree(conn: &Connection, path: &HierarchyPath) -> StoreResult<Vec<Account>> {
    collect_accounts(
        conn,
        &format!(
            "{ACCOUNT_SELECT_SQL}
             WHERE account_node_path >= ?1
               AND account_node_path < ?2
             ORDER BY account_node_path ASC;"
        ),
        params![path.as_str(), subtree_upper_bound(path)],
    )
}

fn query_children(conn: &Connection, parent_id: AccountId) -> StoreResult<Vec<Account>> {
    collect_accounts(
        conn,
        &format!(
            "{ACCOUNT_SELECT_SQL}
             WHERE parent_account_id = ?1
             ORDER BY account_node_path ASC;"
        ),
        params![parent_id],
    )
}

fn collect_accounts(
    conn: &Connection,
    sql: &str,
    values: &[&dyn rusqlite::ToSql],
) -> StoreResult<Vec<Account>> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query(values)?;
    let mut accounts = Vec::new();
    while let Some(row) = rows.next()? {
        accounts.push(parse_account_row(row)?);
    }
    Ok(accounts)
}

fn parse_account_row(row: &Row<'_>) -> StoreResult<Account> {
    let account_id: AccountId = row.get("account_id")?;
    let path_text: String = row.get("account_node_path")?;
    if !PATH_GRAMMAR_RE.is_match(&path_text) {
        return Err(StoreError::InvalidData(format!(
            "invalid path `{path_text}` in accounts.account_node_path for account {account_id}"
        )));
    }
    let path = HierarchyPath::new(path_text)
        .map_err(|err| StoreError::InvalidData(err.to_string()))?;

    let name: String = row.get("name")?;
    if name.trim().is_empty() {
        return Err(StoreError::InvalidData(format!(
            "blank name in accounts.name for account {account_id}"
        )));
    }

    Ok(Account {
        account_id,
        name,
        parent_id: row.get("parent_account_id")?,
        path,
    })
}

fn ensure_canonical_path(path: &HierarchyPath) -> StoreResult<()> {
    if PATH_GRAMMAR_RE.is_match(path.as_str()) {
        return Ok(());
    }
    Err(StoreError::InvalidData(format!(
        "path `{path}` does not match the account path grammar"
    )))
}

fn ensure_account_connection_ready(conn: &Connection) -> StoreResult<()> {
    let expected_version = latest_version();
    let actual_version: u32 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    if actual_version != expected_version {
        return Err(StoreError::UninitializedConnection {
            expected_version,
            actual_version,
        });
    }

    for (table, columns) in [
        (
            "accounts",
            &[
                "account_id",
                "name",
                "parent_account_id",
                "account_node_path",
            ][..],
        ),
        ("account_id_sequence", &["name", "next_value"][..]),
    ] {
        if !table_exists(conn, table)? {
            return Err(StoreError::MissingRequiredTable(table));
        }
        for &column in columns {
            if !table_has_column(conn, table, column)? {
                return Err(StoreError::MissingRequiredColumn { table, column });
            }
        }
    }

    Ok(())
}

fn table_exists(conn: &Connection, table: &str) -> StoreResult<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(
            SELECT 1
            FROM sqlite_master
            WHERE type = 'table' AND name = ?1
        );",
        [table],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> StoreResult<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table});"))?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let current: String = row.get(1)?;
        if current == column {
            return Ok(true);
        }
    }
    Ok(false)
}
