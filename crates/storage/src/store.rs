//! SQLite hierarchy store implementation.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use permissions::{
    Family, HIERARCHY, Hierarchy, HierarchyStore, NodeId, Patent, PermissionNode, StoreResult, User,
    UserId, Version,
};
use rusqlite::{Connection, ErrorCode, OptionalExtension, Transaction, ffi, params};
use tracing::debug;
use uuid::Uuid;

use crate::{Error, Result};

const PATENT: &str = "patent";
const FAMILY: &str = "family";

/// A node as listed by [`SqliteStore::list_nodes`].
#[derive(Debug, Clone)]
pub struct NodeSummary {
    pub id: NodeId,
    pub kind: &'static str,
    pub name: String,
    pub version: Version,
    pub updated_at: DateTime<Utc>,
}

/// SQLite-backed hierarchy store.
///
/// The connection sits behind a mutex so one store can be shared between
/// threads. Every write runs in its own transaction.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create a store at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::with_connection(conn)
    }

    /// Create an in-memory store (useful for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| Error::Poisoned)
    }

    /// Insert a new patent. Any version on the value is ignored.
    pub fn create_patent(&self, patent: &Patent) -> Result<Version> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let version = insert_node(&tx, patent.id.as_str(), PATENT, patent.name(), patent.view_ref.as_deref())?;
        tx.commit()?;
        debug!(id = %patent.id, "created patent");
        Ok(version)
    }

    /// Insert a new family together with its child edges.
    pub fn create_family(&self, family: &Family) -> Result<Version> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let version = insert_node(&tx, family.id.as_str(), FAMILY, family.name(), None)?;
        replace_children(&tx, family)?;
        bump_revision(&tx, None)?;
        tx.commit()?;
        debug!(id = %family.id, children = family.children().len(), "created family");
        Ok(version)
    }

    /// Insert a new user together with their direct assignments.
    pub fn create_user(&self, user: &User) -> Result<Version> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        if exists(&tx, "users", user.id.as_str())? {
            return Err(Error::AlreadyExists {
                id: user.id.to_string(),
            });
        }
        let version = new_version();
        tx.execute(
            "INSERT INTO users (id, name, version, updated_at) VALUES (?1, ?2, ?3, ?4)",
            params![user.id.as_str(), user.name(), version.as_str(), now()],
        )?;
        replace_assignments(&tx, user)?;
        tx.commit()?;
        debug!(id = %user.id, "created user");
        Ok(version)
    }

    /// Delete a patent or family.
    ///
    /// Refused with [`Error::InUse`] while a family or user still references
    /// it. A family's own child edges are removed with it.
    pub fn delete_node(&self, id: &NodeId) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        if !exists(&tx, "nodes", id.as_str())? {
            return Err(Error::NotFound {
                kind: "node",
                id: id.to_string(),
            });
        }
        let parents: i64 = tx.query_row(
            "SELECT COUNT(*) FROM family_children WHERE child_id = ?1",
            [id.as_str()],
            |row| row.get(0),
        )?;
        let holders: i64 = tx.query_row(
            "SELECT COUNT(*) FROM user_assignments WHERE node_id = ?1",
            [id.as_str()],
            |row| row.get(0),
        )?;
        if parents + holders > 0 {
            return Err(Error::InUse {
                id: id.to_string(),
                referenced_by: (parents + holders) as usize,
            });
        }
        tx.execute("DELETE FROM family_children WHERE family_id = ?1", [id.as_str()])?;
        tx.execute("DELETE FROM nodes WHERE id = ?1", [id.as_str()])?;
        bump_revision(&tx, None)?;
        tx.commit()?;
        debug!(%id, "deleted node");
        Ok(())
    }

    pub fn delete_user(&self, id: &UserId) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM user_assignments WHERE user_id = ?1", [id.as_str()])?;
        let deleted = tx.execute("DELETE FROM users WHERE id = ?1", [id.as_str()])?;
        if deleted == 0 {
            return Err(Error::NotFound {
                kind: "user",
                id: id.to_string(),
            });
        }
        tx.commit()?;
        Ok(())
    }

    /// Load the whole hierarchy in one read transaction.
    pub fn snapshot(&self) -> Result<Hierarchy> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let mut children: HashMap<String, Vec<NodeId>> = HashMap::new();
        {
            let mut stmt = tx.prepare("SELECT family_id, child_id FROM family_children")?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?;
            for row in rows {
                let (family_id, child_id) = row?;
                children.entry(family_id).or_default().push(NodeId::from(child_id));
            }
        }

        let mut hierarchy = Hierarchy::new();
        hierarchy.set_revision(read_revision(&tx)?);
        {
            let mut stmt = tx.prepare("SELECT id, kind, name, view_ref, version FROM nodes")?;
            let rows = stmt.query_map([], NodeRow::from_row)?;
            for row in rows {
                let row = row?;
                let edges = children.remove(&row.id).unwrap_or_default();
                hierarchy.insert(row.into_node(edges)?);
            }
        }
        tx.commit()?;

        debug!(nodes = hierarchy.len(), "loaded hierarchy snapshot");
        Ok(hierarchy)
    }

    /// The current hierarchy revision.
    pub fn revision(&self) -> Result<Version> {
        let conn = self.conn()?;
        read_revision(&conn)
    }

    pub fn load_patent(&self, id: &NodeId) -> Result<Patent> {
        let conn = self.conn()?;
        match load_node(&conn, id)? {
            Some(PermissionNode::Patent(patent)) => Ok(patent),
            _ => Err(Error::NotFound {
                kind: PATENT,
                id: id.to_string(),
            }),
        }
    }

    pub fn load_family(&self, id: &NodeId) -> Result<Family> {
        let conn = self.conn()?;
        match load_node(&conn, id)? {
            Some(PermissionNode::Family(family)) => Ok(family),
            _ => Err(Error::NotFound {
                kind: FAMILY,
                id: id.to_string(),
            }),
        }
    }

    pub fn load_user(&self, id: &UserId) -> Result<User> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT name, version FROM users WHERE id = ?1",
                [id.as_str()],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()?;
        let Some((name, version)) = row else {
            return Err(Error::NotFound {
                kind: "user",
                id: id.to_string(),
            });
        };
        build_user(&conn, id.as_str(), name, version)
    }

    /// All users, ordered by id.
    pub fn list_users(&self) -> Result<Vec<User>> {
        let conn = self.conn()?;
        let rows: Vec<(String, String, String)> = {
            let mut stmt = conn.prepare("SELECT id, name, version FROM users ORDER BY id")?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };
        rows.into_iter()
            .map(|(id, name, version)| build_user(&conn, &id, name, version))
            .collect()
    }

    /// All patents and families, most recently updated first.
    pub fn list_nodes(&self) -> Result<Vec<NodeSummary>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, kind, name, version, updated_at FROM nodes ORDER BY updated_at DESC, id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?;

        let mut nodes = Vec::new();
        for row in rows {
            let (id, kind, name, version, updated_at) = row?;
            let kind = match kind.as_str() {
                PATENT => PATENT,
                FAMILY => FAMILY,
                other => return Err(corrupt(&id, format!("unknown kind '{other}'"))),
            };
            let updated_at = DateTime::parse_from_rfc3339(&updated_at)
                .map_err(|e| corrupt(&id, e.to_string()))?
                .with_timezone(&Utc);
            nodes.push(NodeSummary {
                id: NodeId::from(id),
                kind,
                name,
                version: Version::new(version),
                updated_at,
            });
        }
        Ok(nodes)
    }

    /// Rename a patent or change its view, conditioned on its version.
    pub fn save_patent(&self, patent: &Patent) -> Result<Version> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let version = bump_node_version(&tx, PATENT, &patent.id, patent.version.as_ref())?;
        tx.execute(
            "UPDATE nodes SET name = ?1, view_ref = ?2 WHERE id = ?3",
            params![patent.name(), patent.view_ref.as_deref(), patent.id.as_str()],
        )?;
        tx.commit()?;
        debug!(id = %patent.id, %version, "saved patent");
        Ok(version)
    }

    /// Replace a family's name and children, conditioned on its version and
    /// on the hierarchy revision the caller's snapshot was taken at.
    pub fn save_family(&self, family: &Family, revision: &Version) -> Result<Version> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let version = bump_node_version(&tx, FAMILY, &family.id, family.version.as_ref())?;
        bump_revision(&tx, Some(revision))?;
        tx.execute(
            "UPDATE nodes SET name = ?1 WHERE id = ?2",
            params![family.name(), family.id.as_str()],
        )?;
        replace_children(&tx, family)?;
        tx.commit()?;
        debug!(id = %family.id, %version, "saved family");
        Ok(version)
    }

    /// Replace a user's name and assignments, conditioned on their version.
    pub fn save_user(&self, user: &User) -> Result<Version> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let version = new_version();
        let updated = match &user.version {
            Some(expected) => tx.execute(
                "UPDATE users SET name = ?1, version = ?2, updated_at = ?3 WHERE id = ?4 AND version = ?5",
                params![user.name(), version.as_str(), now(), user.id.as_str(), expected.as_str()],
            )?,
            None => 0,
        };
        if updated == 0 {
            return Err(if exists(&tx, "users", user.id.as_str())? {
                Error::Conflict {
                    id: user.id.to_string(),
                }
            } else {
                Error::NotFound {
                    kind: "user",
                    id: user.id.to_string(),
                }
            });
        }
        replace_assignments(&tx, user)?;
        tx.commit()?;
        debug!(id = %user.id, %version, "saved user");
        Ok(version)
    }
}

impl HierarchyStore for SqliteStore {
    fn snapshot(&self) -> StoreResult<Hierarchy> {
        Ok(SqliteStore::snapshot(self)?)
    }

    fn load_patent(&self, id: &NodeId) -> StoreResult<Patent> {
        Ok(SqliteStore::load_patent(self, id)?)
    }

    fn load_family(&self, id: &NodeId) -> StoreResult<Family> {
        Ok(SqliteStore::load_family(self, id)?)
    }

    fn load_user(&self, id: &UserId) -> StoreResult<User> {
        Ok(SqliteStore::load_user(self, id)?)
    }

    fn list_users(&self) -> StoreResult<Vec<User>> {
        Ok(SqliteStore::list_users(self)?)
    }

    fn save_patent(&self, patent: &Patent) -> StoreResult<Version> {
        Ok(SqliteStore::save_patent(self, patent)?)
    }

    fn save_family(&self, family: &Family, revision: &Version) -> StoreResult<Version> {
        Ok(SqliteStore::save_family(self, family, revision)?)
    }

    fn save_user(&self, user: &User) -> StoreResult<Version> {
        Ok(SqliteStore::save_user(self, user)?)
    }
}

fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        PRAGMA foreign_keys = ON;
        CREATE TABLE IF NOT EXISTS nodes (
            id TEXT PRIMARY KEY,
            kind TEXT NOT NULL CHECK (kind IN ('patent', 'family')),
            name TEXT NOT NULL,
            view_ref TEXT,
            version TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS family_children (
            family_id TEXT NOT NULL REFERENCES nodes(id),
            child_id TEXT NOT NULL REFERENCES nodes(id),
            PRIMARY KEY (family_id, child_id)
        );
        CREATE INDEX IF NOT EXISTS idx_family_children_child
            ON family_children(child_id);
        CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            version TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS user_assignments (
            user_id TEXT NOT NULL REFERENCES users(id),
            node_id TEXT NOT NULL REFERENCES nodes(id),
            kind TEXT NOT NULL CHECK (kind IN ('patent', 'family')),
            PRIMARY KEY (user_id, node_id)
        );
        CREATE INDEX IF NOT EXISTS idx_user_assignments_node
            ON user_assignments(node_id);
        CREATE TABLE IF NOT EXISTS hierarchy_revision (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            version TEXT NOT NULL
        );
        "#,
    )?;
    conn.execute(
        "INSERT OR IGNORE INTO hierarchy_revision (id, version) VALUES (1, ?1)",
        [new_version().as_str()],
    )?;
    Ok(())
}

struct NodeRow {
    id: String,
    kind: String,
    name: String,
    view_ref: Option<String>,
    version: String,
}

impl NodeRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            kind: row.get(1)?,
            name: row.get(2)?,
            view_ref: row.get(3)?,
            version: row.get(4)?,
        })
    }

    fn into_node(self, children: Vec<NodeId>) -> Result<PermissionNode> {
        let version = Some(Version::new(self.version));
        match self.kind.as_str() {
            PATENT => {
                let mut patent =
                    Patent::new(self.id.as_str(), self.name).map_err(|e| corrupt(&self.id, e.to_string()))?;
                patent.view_ref = self.view_ref;
                patent.version = version;
                Ok(patent.into())
            }
            FAMILY => {
                let family = Family::from_parts(NodeId::from(self.id.as_str()), self.name, children, version)
                    .map_err(|e| corrupt(&self.id, e.to_string()))?;
                Ok(family.into())
            }
            other => Err(corrupt(&self.id, format!("unknown kind '{other}'"))),
        }
    }
}

fn load_node(conn: &Connection, id: &NodeId) -> Result<Option<PermissionNode>> {
    let row = conn
        .query_row(
            "SELECT id, kind, name, view_ref, version FROM nodes WHERE id = ?1",
            [id.as_str()],
            NodeRow::from_row,
        )
        .optional()?;
    let Some(row) = row else {
        return Ok(None);
    };

    let mut stmt = conn.prepare("SELECT child_id FROM family_children WHERE family_id = ?1")?;
    let children = stmt
        .query_map([id.as_str()], |row| row.get::<_, String>(0))?
        .map(|child| child.map(NodeId::from))
        .collect::<rusqlite::Result<Vec<_>>>()?;

    row.into_node(children).map(Some)
}

fn build_user(conn: &Connection, id: &str, name: String, version: String) -> Result<User> {
    let mut stmt = conn.prepare("SELECT node_id, kind FROM user_assignments WHERE user_id = ?1")?;
    let rows = stmt.query_map([id], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;

    let mut families = Vec::new();
    let mut patents = Vec::new();
    for row in rows {
        let (node_id, kind) = row?;
        match kind.as_str() {
            FAMILY => families.push(NodeId::from(node_id)),
            PATENT => patents.push(NodeId::from(node_id)),
            other => return Err(corrupt(id, format!("unknown assignment kind '{other}'"))),
        }
    }

    User::from_parts(UserId::from(id), name, families, patents, Some(Version::new(version)))
        .map_err(|e| corrupt(id, e.to_string()))
}

fn insert_node(
    tx: &Transaction<'_>,
    id: &str,
    kind: &str,
    name: &str,
    view_ref: Option<&str>,
) -> Result<Version> {
    if exists(tx, "nodes", id)? {
        return Err(Error::AlreadyExists { id: id.to_string() });
    }
    let version = new_version();
    tx.execute(
        "INSERT INTO nodes (id, kind, name, view_ref, version, updated_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![id, kind, name, view_ref, version.as_str(), now()],
    )?;
    Ok(version)
}

/// Move a node to a fresh version if `expected` is still current.
fn bump_node_version(
    tx: &Transaction<'_>,
    kind: &'static str,
    id: &NodeId,
    expected: Option<&Version>,
) -> Result<Version> {
    let version = new_version();
    let updated = match expected {
        Some(expected) => tx.execute(
            "UPDATE nodes SET version = ?1, updated_at = ?2 WHERE id = ?3 AND kind = ?4 AND version = ?5",
            params![version.as_str(), now(), id.as_str(), kind, expected.as_str()],
        )?,
        None => 0,
    };
    if updated > 0 {
        return Ok(version);
    }

    let stored_kind: Option<String> = tx
        .query_row("SELECT kind FROM nodes WHERE id = ?1", [id.as_str()], |row| row.get(0))
        .optional()?;
    match stored_kind {
        Some(stored) if stored == kind => Err(Error::Conflict { id: id.to_string() }),
        _ => Err(Error::NotFound {
            kind,
            id: id.to_string(),
        }),
    }
}

fn read_revision(conn: &Connection) -> Result<Version> {
    let version: String =
        conn.query_row("SELECT version FROM hierarchy_revision WHERE id = 1", [], |row| row.get(0))?;
    Ok(Version::new(version))
}

/// Move the hierarchy to a fresh revision, optionally only if `expected` is
/// still current.
fn bump_revision(tx: &Transaction<'_>, expected: Option<&Version>) -> Result<Version> {
    let version = new_version();
    let updated = match expected {
        Some(expected) => tx.execute(
            "UPDATE hierarchy_revision SET version = ?1 WHERE id = 1 AND version = ?2",
            params![version.as_str(), expected.as_str()],
        )?,
        None => tx.execute(
            "UPDATE hierarchy_revision SET version = ?1 WHERE id = 1",
            [version.as_str()],
        )?,
    };
    if updated == 0 {
        return Err(Error::Conflict {
            id: HIERARCHY.to_string(),
        });
    }
    Ok(version)
}

/// Report a foreign key failure on `id` as the missing record it is.
fn missing_reference(err: rusqlite::Error, id: &NodeId) -> Error {
    match err {
        rusqlite::Error::SqliteFailure(failure, _)
            if failure.code == ErrorCode::ConstraintViolation
                && failure.extended_code == ffi::SQLITE_CONSTRAINT_FOREIGNKEY =>
        {
            Error::NotFound {
                kind: "node",
                id: id.to_string(),
            }
        }
        other => Error::Database(other),
    }
}

fn replace_children(tx: &Transaction<'_>, family: &Family) -> Result<()> {
    tx.execute(
        "DELETE FROM family_children WHERE family_id = ?1",
        [family.id.as_str()],
    )?;
    let mut stmt = tx.prepare("INSERT INTO family_children (family_id, child_id) VALUES (?1, ?2)")?;
    for child in family.children() {
        stmt.execute(params![family.id.as_str(), child.as_str()])
            .map_err(|e| missing_reference(e, child))?;
    }
    Ok(())
}

fn replace_assignments(tx: &Transaction<'_>, user: &User) -> Result<()> {
    tx.execute(
        "DELETE FROM user_assignments WHERE user_id = ?1",
        [user.id.as_str()],
    )?;
    let mut stmt =
        tx.prepare("INSERT INTO user_assignments (user_id, node_id, kind) VALUES (?1, ?2, ?3)")?;
    for family in user.direct_families() {
        stmt.execute(params![user.id.as_str(), family.as_str(), FAMILY])
            .map_err(|e| missing_reference(e, family))?;
    }
    for patent in user.direct_patents() {
        stmt.execute(params![user.id.as_str(), patent.as_str(), PATENT])
            .map_err(|e| missing_reference(e, patent))?;
    }
    Ok(())
}

fn exists(conn: &Connection, table: &str, id: &str) -> Result<bool> {
    let found = conn.query_row(
        &format!("SELECT EXISTS(SELECT 1 FROM {table} WHERE id = ?1)"),
        [id],
        |row| row.get(0),
    )?;
    Ok(found)
}

fn new_version() -> Version {
    Version::new(Uuid::new_v4().to_string())
}

fn now() -> String {
    Utc::now().to_rfc3339()
}

fn corrupt(id: &str, reason: impl Into<String>) -> Error {
    Error::Corrupt {
        id: id.to_string(),
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn id(s: &str) -> NodeId {
        NodeId::from(s)
    }

    /// Admin -> { Sales, ManageUsers }, Sales -> { CreateInvoice, ViewClients }
    fn seeded() -> SqliteStore {
        let store = SqliteStore::in_memory().unwrap();
        for patent in ["CreateInvoice", "ViewClients", "ManageUsers", "ExportReport"] {
            store.create_patent(&Patent::new(patent, patent).unwrap()).unwrap();
        }
        let sales = Family::from_parts(id("Sales"), "Sales", [id("CreateInvoice"), id("ViewClients")], None).unwrap();
        store.create_family(&sales).unwrap();
        let admin = Family::from_parts(id("Admin"), "Admin", [id("Sales"), id("ManageUsers")], None).unwrap();
        store.create_family(&admin).unwrap();
        store
    }

    #[test]
    fn snapshot_round_trip() {
        let store = seeded();
        let hierarchy = store.snapshot().unwrap();

        assert_eq!(hierarchy.len(), 6);
        let admin = hierarchy.family(&id("Admin")).unwrap();
        assert!(admin.contains(&id("Sales")));
        assert!(admin.version.is_some());
        assert!(hierarchy.patent(&id("ViewClients")).is_some());
    }

    #[test]
    fn create_duplicate_rejected() {
        let store = seeded();
        let err = store
            .create_patent(&Patent::new("ViewClients", "again").unwrap())
            .unwrap_err();
        assert!(matches!(err, Error::AlreadyExists { .. }));
    }

    #[test]
    fn stale_version_conflicts() {
        let store = seeded();
        let mut first = store.load_family(&id("Sales")).unwrap();
        let second = store.load_family(&id("Sales")).unwrap();
        assert_eq!(first.version, second.version);

        first.rename("Sales team").unwrap();
        let v2 = store.save_family(&first, &store.revision().unwrap()).unwrap();
        assert_ne!(Some(&v2), second.version.as_ref());

        let err = store.save_family(&second, &store.revision().unwrap()).unwrap_err();
        assert!(matches!(err, Error::Conflict { .. }));
        assert_eq!(store.load_family(&id("Sales")).unwrap().name(), "Sales team");
    }

    #[test]
    fn save_missing_or_wrong_kind_is_not_found() {
        let store = seeded();
        let ghost = Family::from_parts(id("Ghost"), "Ghost", [], Some(Version::new("v"))).unwrap();
        let revision = store.revision().unwrap();
        assert!(matches!(
            store.save_family(&ghost, &revision),
            Err(Error::NotFound { .. })
        ));

        let mut patent = store.load_patent(&id("ViewClients")).unwrap();
        patent.view_ref = Some("ClientsView".into());
        store.save_patent(&patent).unwrap();
        assert!(matches!(
            store.load_family(&id("ViewClients")),
            Err(Error::NotFound { .. })
        ));
        assert_eq!(
            store.load_patent(&id("ViewClients")).unwrap().view_ref.as_deref(),
            Some("ClientsView")
        );
    }

    #[test]
    fn user_round_trip_and_conflict() {
        let store = seeded();
        let mut user = User::new("U1", "Alice").unwrap();
        user.assign_family(id("Admin"));
        user.assign_patent(id("ExportReport"));
        store.create_user(&user).unwrap();

        let mut loaded = store.load_user(&UserId::from("U1")).unwrap();
        assert!(loaded.direct_families().contains(&id("Admin")));
        assert!(loaded.direct_patents().contains(&id("ExportReport")));

        let stale = loaded.clone();
        loaded.unassign_patent(&id("ExportReport"));
        store.save_user(&loaded).unwrap();
        assert!(matches!(store.save_user(&stale), Err(Error::Conflict { .. })));
        assert_eq!(store.list_users().unwrap().len(), 1);
    }

    #[test]
    fn delete_refused_while_in_use() {
        let store = seeded();
        let err = store.delete_node(&id("Sales")).unwrap_err();
        assert!(matches!(err, Error::InUse { referenced_by: 1, .. }));

        store.delete_node(&id("ExportReport")).unwrap();
        store.delete_node(&id("Admin")).unwrap();
        store.delete_node(&id("Sales")).unwrap();
        assert!(matches!(
            store.delete_node(&id("Sales")),
            Err(Error::NotFound { .. })
        ));
        assert_eq!(store.snapshot().unwrap().len(), 3);
    }

    #[test]
    fn list_nodes() {
        let store = seeded();
        let nodes = store.list_nodes().unwrap();
        assert_eq!(nodes.len(), 6);
        assert_eq!(nodes.iter().filter(|n| n.kind == FAMILY).count(), 2);
    }

    #[test]
    fn only_one_concurrent_writer_wins() {
        let store = Arc::new(seeded());
        let read = store.load_family(&id("Sales")).unwrap();
        let revision = store.revision().unwrap();

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                let mut family = read.clone();
                let revision = revision.clone();
                thread::spawn(move || {
                    family.rename(format!("Sales {i}")).unwrap();
                    store.save_family(&family, &revision).is_ok()
                })
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }

    #[test]
    fn structural_writes_move_the_revision() {
        let store = seeded();
        let taken = store.revision().unwrap();
        assert_eq!(store.snapshot().unwrap().revision(), Some(&taken));

        // Another family changes after `taken` was read.
        let admin = store.load_family(&id("Admin")).unwrap();
        store.save_family(&admin, &taken).unwrap();

        let sales = store.load_family(&id("Sales")).unwrap();
        let err = store.save_family(&sales, &taken).unwrap_err();
        assert!(matches!(err, Error::Conflict { ref id } if id == HIERARCHY));
        assert_eq!(store.load_family(&id("Sales")).unwrap().version, sales.version);

        let before = store.revision().unwrap();
        store.create_family(&Family::new("Ops", "Ops").unwrap()).unwrap();
        assert_ne!(store.revision().unwrap(), before);
        let before = store.revision().unwrap();
        store.delete_node(&id("ExportReport")).unwrap();
        assert_ne!(store.revision().unwrap(), before);
    }

    #[test]
    fn unknown_child_is_not_found() {
        let store = seeded();
        let orphan = Family::from_parts(id("Ops"), "Ops", [id("Nowhere")], None).unwrap();
        let err = store.create_family(&orphan).unwrap_err();
        assert!(matches!(err, Error::NotFound { ref id, .. } if id == "Nowhere"));
        assert!(!store.snapshot().unwrap().contains(&id("Ops")));

        let loaded = store.load_family(&id("Sales")).unwrap();
        let children = loaded.children().iter().cloned().chain([id("Nowhere")]);
        let sales = Family::from_parts(id("Sales"), "Sales", children, loaded.version.clone()).unwrap();
        let err = store.save_family(&sales, &store.revision().unwrap()).unwrap_err();
        assert!(matches!(err, Error::NotFound { ref id, .. } if id == "Nowhere"));
        assert!(!store.load_family(&id("Sales")).unwrap().contains(&id("Nowhere")));
    }

    #[test]
    fn unknown_assignment_is_not_found() {
        let store = seeded();
        let mut user = User::new("U1", "Alice").unwrap();
        user.assign_family(id("Nowhere"));
        let err = store.create_user(&user).unwrap_err();
        assert!(matches!(err, Error::NotFound { ref id, .. } if id == "Nowhere"));

        let mut user = User::new("U2", "Bob").unwrap();
        store.create_user(&user).unwrap();
        user = store.load_user(&UserId::from("U2")).unwrap();
        user.assign_patent(id("Missing"));
        let err = store.save_user(&user).unwrap_err();
        assert!(matches!(err, Error::NotFound { ref id, .. } if id == "Missing"));
    }

    #[test]
    fn unknown_assignment_kind_is_corrupt() {
        let store = seeded();
        store.create_user(&User::new("U1", "Alice").unwrap()).unwrap();
        {
            let conn = store.conn().unwrap();
            conn.execute_batch("PRAGMA ignore_check_constraints = ON").unwrap();
            conn.execute(
                "INSERT INTO user_assignments (user_id, node_id, kind) VALUES ('U1', 'Admin', 'role')",
                [],
            )
            .unwrap();
        }
        let err = store.load_user(&UserId::from("U1")).unwrap_err();
        assert!(matches!(err, Error::Corrupt { ref reason, .. } if reason.contains("role")));
    }
}
