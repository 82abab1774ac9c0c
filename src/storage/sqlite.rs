use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};

use super::{StorageMedium, StoreError};

/// SQLite-backed medium.
/// One `kv` table holds every raw record, foreign ones included.
pub struct SqliteMedium {
    conn: Connection,
    db_path: Option<PathBuf>,
}

impl SqliteMedium {
    /// Open (or create) the database file at `db_path`.
    ///
    /// The parent directory is created if it doesn't exist.
    pub fn open(db_path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(db_path)?;
        tracing::debug!(path = %db_path.display(), "opened session database");

        let medium = SqliteMedium {
            conn,
            db_path: Some(db_path.to_path_buf()),
        };
        medium.init_schema()?;
        Ok(medium)
    }

    /// A throwaway database that lives as long as this value.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let medium = SqliteMedium {
            conn: Connection::open_in_memory()?,
            db_path: None,
        };
        medium.init_schema()?;
        Ok(medium)
    }

    /// Creates the kv table if it doesn't exist.
    fn init_schema(&self) -> Result<(), StoreError> {
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS kv (
                key     TEXT PRIMARY KEY NOT NULL,
                value   TEXT NOT NULL
            )",
            [],
        )?;
        Ok(())
    }

    /// Get the path to the database file (None for in-memory databases)
    pub fn path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }
}

impl StorageMedium for SqliteMedium {
    fn read(&self, key: &str) -> Result<Option<String>, StoreError> {
        let value = self
            .conn
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    fn write(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT OR REPLACE INTO kv (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }

    fn delete(&mut self, key: &str) -> Result<(), StoreError> {
        self.conn
            .execute("DELETE FROM kv WHERE key = ?1", params![key])?;
        Ok(())
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        // substr() instead of LIKE so '%' and '_' in the prefix stay literal
        let mut stmt = self
            .conn
            .prepare("SELECT key FROM kv WHERE substr(key, 1, length(?1)) = ?1 ORDER BY key")?;

        let keys = stmt
            .query_map(params![prefix], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(keys)
    }
}

impl std::fmt::Debug for SqliteMedium {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteMedium")
            .field("db_path", &self.db_path)
            .finish()
    }
}
