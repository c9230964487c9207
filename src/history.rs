use crate::security::Severity;
use rusqlite::{params, Connection, OptionalExtension, Result as SqliteResult};
use std::path::Path;

/// Only the most recent entries are kept.
pub const MAX_ENTRIES: usize = 100;

#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub id: i64,
    pub task: String,
    pub command: String,
    pub verdict: Severity,
    pub executed: bool,
    pub exit_code: Option<i32>,
    pub created_at: String,
}

pub struct HistoryStore {
    conn: Connection,
}

impl HistoryStore {
    pub fn open(db_path: &Path) -> SqliteResult<Self> {
        if let Some(parent) = db_path.parent() {
            // Connection::open reports the failure if the directory is still missing.
            if let Err(e) = std::fs::create_dir_all(parent) {
                tracing::warn!(dir = %parent.display(), error = %e, "cannot create history directory");
            }
        }
        let conn = Connection::open(db_path)?;
        let store = Self { conn };
        store.init_tables()?;
        Ok(store)
    }

    /// Create an in-memory store (for testing).
    pub fn in_memory() -> SqliteResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.init_tables()?;
        Ok(store)
    }

    fn init_tables(&self) -> SqliteResult<()> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                task TEXT NOT NULL,
                command TEXT NOT NULL,
                verdict TEXT NOT NULL,
                executed INTEGER NOT NULL DEFAULT 0,
                exit_code INTEGER,
                created_at TEXT NOT NULL
            );",
        )?;
        Ok(())
    }

    /// Record a generated command and prune old entries. Returns the row id.
    pub fn record(&self, task: &str, command: &str, verdict: Severity) -> SqliteResult<i64> {
        let now = chrono::Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO history (task, command, verdict, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![task, command, verdict.as_str(), now],
        )?;
        let id = self.conn.last_insert_rowid();
        self.prune(MAX_ENTRIES)?;
        Ok(id)
    }

    pub fn mark_executed(&self, id: i64, exit_code: Option<i32>) -> SqliteResult<()> {
        self.conn.execute(
            "UPDATE history SET executed = 1, exit_code = ?1 WHERE id = ?2",
            params![exit_code, id],
        )?;
        Ok(())
    }

    fn prune(&self, keep: usize) -> SqliteResult<()> {
        self.conn.execute(
            "DELETE FROM history WHERE id NOT IN (
                SELECT id FROM history ORDER BY id DESC LIMIT ?1
            )",
            params![keep as i64],
        )?;
        Ok(())
    }

    /// All kept entries, oldest first.
    pub fn list(&self) -> SqliteResult<Vec<HistoryEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, task, command, verdict, executed, exit_code, created_at
             FROM history ORDER BY id ASC",
        )?;
        let entries = stmt
            .query_map([], Self::row_to_entry)?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(entries)
    }

    /// Entry by display index (0 = oldest kept entry).
    pub fn get(&self, index: usize) -> SqliteResult<Option<HistoryEntry>> {
        self.conn
            .query_row(
                "SELECT id, task, command, verdict, executed, exit_code, created_at
                 FROM history ORDER BY id ASC LIMIT 1 OFFSET ?1",
                params![index as i64],
                Self::row_to_entry,
            )
            .optional()
    }

    /// Distinct tasks, most recently used first.
    pub fn recent_tasks(&self) -> SqliteResult<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT task FROM history GROUP BY task ORDER BY MAX(id) DESC")?;
        let tasks = stmt
            .query_map([], |row| row.get(0))?
            .collect::<SqliteResult<Vec<String>>>()?;
        Ok(tasks)
    }

    pub fn len(&self) -> SqliteResult<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM history", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn is_empty(&self) -> SqliteResult<bool> {
        Ok(self.len()? == 0)
    }

    fn row_to_entry(row: &rusqlite::Row<'_>) -> SqliteResult<HistoryEntry> {
        let verdict: String = row.get(3)?;
        Ok(HistoryEntry {
            id: row.get(0)?,
            task: row.get(1)?,
            command: row.get(2)?,
            verdict: Severity::parse(&verdict).unwrap_or(Severity::Blocked),
            executed: row.get::<_, i64>(4)? != 0,
            exit_code: row.get(5)?,
            created_at: row.get(6)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_list() {
        let store = HistoryStore::in_memory().unwrap();
        assert!(store.is_empty().unwrap());
        store
            .record("list python files", "ls *.py", Severity::Safe)
            .unwrap();
        store
            .record("clear cache", "rm -rf /tmp/cache", Severity::Destructive)
            .unwrap();

        let entries = store.list().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].command, "ls *.py");
        assert_eq!(entries[0].verdict, Severity::Safe);
        assert!(!entries[0].executed);
        assert_eq!(entries[1].task, "clear cache");
        assert_eq!(entries[1].verdict, Severity::Destructive);
    }

    #[test]
    fn test_mark_executed() {
        let store = HistoryStore::in_memory().unwrap();
        let id = store.record("t", "false", Severity::Safe).unwrap();
        store.mark_executed(id, Some(1)).unwrap();
        let entry = store.get(0).unwrap().unwrap();
        assert!(entry.executed);
        assert_eq!(entry.exit_code, Some(1));
    }

    #[test]
    fn test_get_by_index() {
        let store = HistoryStore::in_memory().unwrap();
        store.record("a", "echo a", Severity::Safe).unwrap();
        store.record("b", "echo b", Severity::Safe).unwrap();
        assert_eq!(store.get(1).unwrap().unwrap().command, "echo b");
        assert!(store.get(2).unwrap().is_none());
    }

    #[test]
    fn test_prune_keeps_most_recent() {
        let store = HistoryStore::in_memory().unwrap();
        for i in 0..(MAX_ENTRIES + 5) {
            store
                .record(&format!("task {}", i), &format!("echo {}", i), Severity::Safe)
                .unwrap();
        }
        assert_eq!(store.len().unwrap(), MAX_ENTRIES);
        let oldest = store.get(0).unwrap().unwrap();
        assert_eq!(oldest.command, "echo 5");
    }

    #[test]
    fn test_open_fails_when_directory_cannot_be_created() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, "x").unwrap();
        assert!(HistoryStore::open(&blocker.join("history.db")).is_err());
    }

    #[test]
    fn test_recent_tasks() {
        let store = HistoryStore::in_memory().unwrap();
        store.record("list files", "ls", Severity::Safe).unwrap();
        store.record("disk usage", "df -h", Severity::Safe).unwrap();
        store.record("list files", "ls -la", Severity::Safe).unwrap();
        assert_eq!(store.recent_tasks().unwrap(), vec!["list files", "disk usage"]);
    }

    #[test]
    fn test_open_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sub").join("history.db");
        {
            let store = HistoryStore::open(&path).unwrap();
            store.record("t", "pwd", Severity::Safe).unwrap();
        }
        let store = HistoryStore::open(&path).unwrap();
        assert_eq!(store.list().unwrap().len(), 1);
    }
}
