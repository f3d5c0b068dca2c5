use anyhow::{Context, Result};
use rusqlite::{Connection, params};
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

const QUERY_TIMEOUT: Duration = Duration::from_secs(10);
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub fn get_database_path() -> PathBuf {
    if let Ok(path) = env::var("DATABASE_PATH") {
        return PathBuf::from(path);
    }
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("heraldbot")
        .join("bot.db")
}

pub fn init_database() -> Result<()> {
    init_database_at(&get_database_path())
}

pub fn init_database_at(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create database directory {:?}", parent))?;
    }

    let conn = Connection::open(path)
        .with_context(|| format!("Failed to open database at {:?}", path))?;

    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS users (
             telegram_id INTEGER PRIMARY KEY,
             display_name TEXT,
             first_seen TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
             last_active TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
             message_count INTEGER NOT NULL DEFAULT 0
         );

         CREATE TABLE IF NOT EXISTS broadcasts (
             id INTEGER PRIMARY KEY AUTOINCREMENT,
             broadcast_id TEXT NOT NULL UNIQUE,
             payload TEXT NOT NULL,
             total INTEGER NOT NULL,
             sent INTEGER NOT NULL,
             failed INTEGER NOT NULL,
             started_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
         );

         CREATE INDEX IF NOT EXISTS idx_users_last_active ON users (last_active);",
    )?;

    Ok(())
}

/// Bounds the number of simultaneous SQLite connections and runs every
/// query on the blocking pool under a timeout.
pub struct DatabasePool {
    path: PathBuf,
    semaphore: Arc<Semaphore>,
}

impl DatabasePool {
    pub fn new(path: PathBuf, max_connections: usize) -> Self {
        Self {
            path,
            semaphore: Arc::new(Semaphore::new(max_connections)),
        }
    }

    pub async fn execute_with_timeout<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let _permit = self.semaphore.acquire().await?;

        let path = self.path.clone();
        let task = tokio::task::spawn_blocking(move || -> rusqlite::Result<T> {
            let conn = Connection::open(path)?;
            conn.busy_timeout(BUSY_TIMEOUT)?;
            f(&conn)
        });

        let result = tokio::time::timeout(QUERY_TIMEOUT, task)
            .await
            .context("Database query timed out")??;

        Ok(result?)
    }
}

#[derive(Debug, Clone)]
pub struct UserRow {
    pub telegram_id: i64,
    pub display_name: Option<String>,
    pub first_seen: String,
    pub last_active: String,
    pub message_count: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub total_users: i64,
    pub active_today: i64,
    pub total_messages: i64,
    pub broadcasts: i64,
}

/// Registers a user on first contact and refreshes the mutable columns on
/// every later one. `display_name` is best-effort: a `None` never erases a
/// name recorded earlier.
pub async fn record_user(
    pool: &DatabasePool,
    telegram_id: i64,
    display_name: Option<String>,
) -> Result<()> {
    pool.execute_with_timeout(move |conn| {
        conn.execute(
            "INSERT OR IGNORE INTO users (telegram_id, display_name) VALUES (?1, ?2)",
            params![telegram_id, display_name],
        )?;
        conn.execute(
            "UPDATE users SET
                 display_name = COALESCE(?2, display_name),
                 last_active = CURRENT_TIMESTAMP,
                 message_count = message_count + 1
             WHERE telegram_id = ?1",
            params![telegram_id, display_name],
        )?;
        Ok(())
    })
    .await
}

pub async fn all_user_ids(pool: &DatabasePool) -> Result<Vec<i64>> {
    pool.execute_with_timeout(|conn| {
        let mut stmt = conn.prepare("SELECT telegram_id FROM users ORDER BY telegram_id")?;
        let users_iter = stmt.query_map([], |row| row.get::<_, i64>(0))?;
        let mut users = Vec::new();
        for user_result in users_iter {
            users.push(user_result?);
        }
        Ok(users)
    })
    .await
}

/// One page of the user listing, most recently active first, plus the
/// total row count for pagination arithmetic.
pub async fn list_users_page(
    pool: &DatabasePool,
    offset: i64,
    limit: i64,
) -> Result<(i64, Vec<UserRow>)> {
    pool.execute_with_timeout(move |conn| {
        let total: i64 = conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;

        let mut stmt = conn.prepare(
            "SELECT telegram_id, display_name, first_seen, last_active, message_count
             FROM users
             ORDER BY last_active DESC, telegram_id ASC
             LIMIT ?1 OFFSET ?2",
        )?;
        let users_iter = stmt.query_map(params![limit, offset], |row| {
            Ok(UserRow {
                telegram_id: row.get(0)?,
                display_name: row.get(1)?,
                first_seen: row.get(2)?,
                last_active: row.get(3)?,
                message_count: row.get(4)?,
            })
        })?;

        let mut users = Vec::new();
        for user_result in users_iter {
            users.push(user_result?);
        }
        Ok((total, users))
    })
    .await
}

pub async fn stats_snapshot(pool: &DatabasePool) -> Result<StatsSnapshot> {
    pool.execute_with_timeout(|conn| {
        let total_users: i64 =
            conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
        let active_today: i64 = conn.query_row(
            "SELECT COUNT(*) FROM users WHERE last_active >= datetime('now', 'start of day')",
            [],
            |row| row.get(0),
        )?;
        let total_messages: i64 = conn.query_row(
            "SELECT COALESCE(SUM(message_count), 0) FROM users",
            [],
            |row| row.get(0),
        )?;
        let broadcasts: i64 =
            conn.query_row("SELECT COUNT(*) FROM broadcasts", [], |row| row.get(0))?;

        Ok(StatsSnapshot {
            total_users,
            active_today,
            total_messages,
            broadcasts,
        })
    })
    .await
}

pub async fn record_broadcast(
    pool: &DatabasePool,
    broadcast_id: String,
    payload: String,
    total: i64,
    sent: i64,
    failed: i64,
) -> Result<()> {
    pool.execute_with_timeout(move |conn| {
        conn.execute(
            "INSERT INTO broadcasts (broadcast_id, payload, total, sent, failed)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![broadcast_id, payload, total, sent, failed],
        )?;
        Ok(())
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    fn test_pool(dir: &TempDir) -> DatabasePool {
        let path = dir.path().join("test.db");
        init_database_at(&path).expect("schema should apply to a fresh file");
        DatabasePool::new(path, 2)
    }

    #[test]
    #[serial]
    fn database_path_env_override() {
        unsafe { env::set_var("DATABASE_PATH", "/tmp/herald-test.db") };
        assert_eq!(get_database_path(), PathBuf::from("/tmp/herald-test.db"));
        unsafe { env::remove_var("DATABASE_PATH") };
        assert!(get_database_path().ends_with("heraldbot/bot.db"));
    }

    #[tokio::test]
    async fn record_user_is_idempotent_on_id() {
        let dir = tempfile::tempdir().unwrap();
        let pool = test_pool(&dir);

        record_user(&pool, 42, Some("Alice".to_string())).await.unwrap();
        record_user(&pool, 42, Some("Alice (@alice)".to_string())).await.unwrap();

        let (total, users) = list_users_page(&pool, 0, 10).await.unwrap();
        assert_eq!(total, 1);
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].telegram_id, 42);
        assert_eq!(users[0].display_name.as_deref(), Some("Alice (@alice)"));
        assert_eq!(users[0].message_count, 2);
    }

    #[tokio::test]
    async fn missing_display_name_keeps_the_old_one() {
        let dir = tempfile::tempdir().unwrap();
        let pool = test_pool(&dir);

        record_user(&pool, 7, Some("Bob".to_string())).await.unwrap();
        record_user(&pool, 7, None).await.unwrap();

        let (_, users) = list_users_page(&pool, 0, 10).await.unwrap();
        assert_eq!(users[0].display_name.as_deref(), Some("Bob"));
        assert_eq!(users[0].message_count, 2);
    }

    #[tokio::test]
    async fn list_users_page_slices_and_reports_total() {
        let dir = tempfile::tempdir().unwrap();
        let pool = test_pool(&dir);

        for id in 1..=25 {
            record_user(&pool, id, None).await.unwrap();
        }

        let (total, first) = list_users_page(&pool, 0, 10).await.unwrap();
        assert_eq!(total, 25);
        assert_eq!(first.len(), 10);

        let (_, last) = list_users_page(&pool, 20, 10).await.unwrap();
        assert_eq!(last.len(), 5);

        let (_, past_end) = list_users_page(&pool, 30, 10).await.unwrap();
        assert!(past_end.is_empty());
    }

    #[tokio::test]
    async fn stats_snapshot_counts_users_and_broadcasts() {
        let dir = tempfile::tempdir().unwrap();
        let pool = test_pool(&dir);

        for id in 1..=3 {
            record_user(&pool, id, None).await.unwrap();
        }
        record_user(&pool, 1, None).await.unwrap();
        record_broadcast(&pool, "run-1".to_string(), "{}".to_string(), 3, 2, 1)
            .await
            .unwrap();

        let stats = stats_snapshot(&pool).await.unwrap();
        assert_eq!(stats.total_users, 3);
        assert_eq!(stats.active_today, 3);
        assert_eq!(stats.total_messages, 4);
        assert_eq!(stats.broadcasts, 1);
    }

    #[tokio::test]
    async fn all_user_ids_returns_every_registered_user() {
        let dir = tempfile::tempdir().unwrap();
        let pool = test_pool(&dir);

        for id in [30, 10, 20] {
            record_user(&pool, id, None).await.unwrap();
        }

        let ids = all_user_ids(&pool).await.unwrap();
        assert_eq!(ids, vec![10, 20, 30]);
    }

    #[tokio::test]
    async fn duplicate_broadcast_id_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let pool = test_pool(&dir);

        record_broadcast(&pool, "run-1".to_string(), "{}".to_string(), 1, 1, 0)
            .await
            .unwrap();
        let duplicate =
            record_broadcast(&pool, "run-1".to_string(), "{}".to_string(), 1, 1, 0).await;
        assert!(duplicate.is_err());
    }
}
