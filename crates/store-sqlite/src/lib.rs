use std::path::{Path, PathBuf};

use anyhow::Context;
use core_model::{CaseRecord, CaseStore, Role, UserDirectory, UserRecord};
use rusqlite::{Connection, OptionalExtension, Row, params};
use tracing::debug;

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn default_path() -> PathBuf {
        let base = dirs::data_dir().unwrap_or_else(|| PathBuf::from("."));
        base.join("casebook").join("casebook.db")
    }

    pub fn open_default() -> anyhow::Result<Self> {
        Self::open_at(Self::default_path())
    }

    /// Opens a file-backed store, creating the parent directory if needed.
    pub fn open_at(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating parent dir for {}", path.display()))?;
        }
        Self::open(path)
    }

    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let conn = Connection::open(path.as_ref())
            .with_context(|| format!("opening sqlite db {}", path.as_ref().display()))?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL; PRAGMA foreign_keys = ON;",
        )?;
        Ok(Self { conn })
    }

    pub fn init_schema(&self) -> anyhow::Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS cases (
              id TEXT PRIMARY KEY,
              message_id TEXT NOT NULL DEFAULT '',
              officer_name TEXT NOT NULL,
              ts TEXT NOT NULL DEFAULT '',
              created_at TEXT
            );
            CREATE INDEX IF NOT EXISTS cases_ts ON cases (ts DESC);
            CREATE TABLE IF NOT EXISTS users (
              id TEXT PRIMARY KEY,
              email TEXT,
              display_name TEXT,
              role TEXT NOT NULL DEFAULT 'user',
              created_at TEXT
            );
            "#,
        )?;
        Ok(())
    }

    pub fn get_case(&self, id: &str) -> anyhow::Result<Option<CaseRecord>> {
        self.conn
            .query_row(
                "SELECT id, message_id, officer_name, ts, created_at FROM cases WHERE id = ?1",
                params![id],
                case_from_row,
            )
            .optional()
            .map_err(Into::into)
    }

    pub fn count_cases(&self) -> anyhow::Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM cases", [], |r| r.get(0))?;
        Ok(count as usize)
    }

    pub fn delete_case(&self, id: &str) -> anyhow::Result<bool> {
        let changed = self
            .conn
            .execute("DELETE FROM cases WHERE id = ?1", params![id])?;
        Ok(changed > 0)
    }

    pub fn integrity_check(&self) -> anyhow::Result<String> {
        self.conn
            .query_row("PRAGMA integrity_check;", [], |r| r.get(0))
            .map_err(Into::into)
    }
}

impl CaseStore for SqliteStore {
    fn list_cases(&self) -> anyhow::Result<Vec<CaseRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, message_id, officer_name, ts, created_at FROM cases ORDER BY ts DESC",
        )?;
        let rows = stmt.query_map([], case_from_row)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(Into::into)
    }

    fn upsert_cases(
        &mut self,
        records: &[CaseRecord],
        created_at: &str,
    ) -> anyhow::Result<usize> {
        let tx = self.conn.transaction()?;
        {
            // Merge semantics: an empty incoming field never clobbers a stored one.
            let mut stmt = tx.prepare_cached(
                r#"INSERT INTO cases (id, message_id, officer_name, ts, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5)
                ON CONFLICT(id) DO UPDATE SET
                  message_id=COALESCE(NULLIF(excluded.message_id, ''), cases.message_id),
                  officer_name=COALESCE(NULLIF(excluded.officer_name, ''), cases.officer_name),
                  ts=COALESCE(NULLIF(excluded.ts, ''), cases.ts),
                  created_at=excluded.created_at"#,
            )?;
            for c in records {
                if c.id.is_empty() {
                    anyhow::bail!("case without id cannot be stored");
                }
                stmt.execute(params![c.id, c.message_id, c.officer_name, c.timestamp, created_at])?;
            }
        }
        tx.commit()?;
        debug!(count = records.len(), "cases upserted");
        Ok(records.len())
    }
}

impl UserDirectory for SqliteStore {
    fn get_user(&self, id: &str) -> anyhow::Result<Option<UserRecord>> {
        self.conn
            .query_row(
                "SELECT id, email, display_name, role, created_at FROM users WHERE id = ?1",
                params![id],
                user_from_row,
            )
            .optional()
            .map_err(Into::into)
    }

    fn list_users(&self) -> anyhow::Result<Vec<UserRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, email, display_name, role, created_at FROM users ORDER BY COALESCE(created_at, '') DESC",
        )?;
        let rows = stmt.query_map([], user_from_row)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(Into::into)
    }

    fn upsert_user(&self, user: &UserRecord) -> anyhow::Result<()> {
        self.conn.execute(
            r#"INSERT INTO users (id, email, display_name, role, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(id) DO UPDATE SET
              email=COALESCE(excluded.email, users.email),
              display_name=COALESCE(excluded.display_name, users.display_name),
              role=excluded.role,
              created_at=COALESCE(users.created_at, excluded.created_at)"#,
            params![
                user.id,
                user.email,
                user.display_name,
                user.role.as_str(),
                user.created_at
            ],
        )?;
        Ok(())
    }

    fn set_user_role(&self, id: &str, role: Role) -> anyhow::Result<bool> {
        let changed = self.conn.execute(
            "UPDATE users SET role = ?2 WHERE id = ?1",
            params![id, role.as_str()],
        )?;
        Ok(changed > 0)
    }

    fn delete_user(&self, id: &str) -> anyhow::Result<bool> {
        let changed = self
            .conn
            .execute("DELETE FROM users WHERE id = ?1", params![id])?;
        Ok(changed > 0)
    }
}

fn case_from_row(r: &Row<'_>) -> rusqlite::Result<CaseRecord> {
    Ok(CaseRecord {
        id: r.get(0)?,
        message_id: r.get(1)?,
        officer_name: r.get(2)?,
        timestamp: r.get(3)?,
        created_at: r.get(4)?,
    })
}

fn user_from_row(r: &Row<'_>) -> rusqlite::Result<UserRecord> {
    let role: String = r.get(3)?;
    Ok(UserRecord {
        id: r.get(0)?,
        email: r.get(1)?,
        display_name: r.get(2)?,
        role: Role::from_stored(&role),
        created_at: r.get(4)?,
    })
}
