use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params;
use std::path::Path;

pub type DbPool = Pool<SqliteConnectionManager>;

pub const MIGRATIONS: &[(&str, &str)] = &[
    (
        "001_initial",
        include_str!("../../migrations/001_initial.sql"),
    ),
    ("002_pods", include_str!("../../migrations/002_pods.sql")),
    (
        "003_messages",
        include_str!("../../migrations/003_messages.sql"),
    ),
];

pub fn create_pool(db_path: &Path) -> anyhow::Result<DbPool> {
    // Ensure parent directory exists
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let manager = SqliteConnectionManager::file(db_path).with_init(|conn| {
        conn.execute_batch(
            "
            PRAGMA foreign_keys = ON;
            PRAGMA busy_timeout = 5000;
            ",
        )
    });
    let pool = Pool::builder().max_size(8).build(manager)?;

    let conn = pool.get()?;
    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        ",
    )?;

    Ok(pool)
}

pub fn run_migrations(pool: &DbPool) -> anyhow::Result<()> {
    let conn = pool.get()?;

    // Create migrations tracking table
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            name TEXT PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;

    for (name, sql) in MIGRATIONS {
        let already_applied: bool = conn.query_row(
            "SELECT COUNT(*) > 0 FROM schema_version WHERE name = ?1",
            params![name],
            |row| row.get(0),
        )?;

        if !already_applied {
            tracing::info!("Applying migration: {}", name);
            conn.execute_batch(sql)?;
            conn.execute(
                "INSERT INTO schema_version (name) VALUES (?1)",
                params![name],
            )?;
        }
    }

    tracing::info!("Database migrations complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_pool() -> DbPool {
        let manager = SqliteConnectionManager::memory()
            .with_init(|conn| conn.execute_batch("PRAGMA foreign_keys = ON;"));
        Pool::builder().max_size(1).build(manager).unwrap()
    }

    #[test]
    fn create_pool_creates_db_file() {
        let tmp = tempfile::tempdir().unwrap();
        let db_path = tmp.path().join("sub/dir/test.db");
        let pool = create_pool(&db_path).unwrap();
        assert!(db_path.exists());

        let conn = pool.get().unwrap();
        let mode: String = conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap();
        assert_eq!(mode, "wal");
        let fk: i64 = conn
            .query_row("PRAGMA foreign_keys", [], |row| row.get(0))
            .unwrap();
        assert_eq!(fk, 1);
    }

    #[test]
    fn migrations_run_successfully() {
        let pool = test_pool();
        run_migrations(&pool).unwrap();

        let conn = pool.get().unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, MIGRATIONS.len() as i64);

        let tables: Vec<String> = {
            let mut stmt = conn
                .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
                .unwrap();
            stmt.query_map([], |row| row.get(0))
                .unwrap()
                .filter_map(|r| r.ok())
                .collect()
        };
        for table in ["users", "sessions", "profiles", "pods", "pod_members", "messages"] {
            assert!(tables.contains(&table.to_string()), "missing {table}");
        }
    }

    #[test]
    fn migrations_are_idempotent() {
        let pool = test_pool();
        run_migrations(&pool).unwrap();
        run_migrations(&pool).unwrap();

        let conn = pool.get().unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, MIGRATIONS.len() as i64);
    }

    #[test]
    fn membership_is_unique_per_pod_and_profile() {
        let pool = test_pool();
        run_migrations(&pool).unwrap();
        let conn = pool.get().unwrap();

        conn.execute_batch(
            "INSERT INTO users (id, email, password_hash, created_at) VALUES ('u1', 'a@b.c', 'x', 'now');
             INSERT INTO profiles (id, user_id, username, created_at, updated_at) VALUES ('p1', 'u1', 'sam', 'now', 'now');
             INSERT INTO pods (id, name, created_at, updated_at) VALUES ('pod1', 'Dinner Club', 'now', 'now');
             INSERT INTO pod_members (id, pod_id, profile_id, joined_at) VALUES ('m1', 'pod1', 'p1', 'now');",
        )
        .unwrap();

        let duplicate = conn.execute(
            "INSERT INTO pod_members (id, pod_id, profile_id, joined_at) VALUES ('m2', 'pod1', 'p1', 'now')",
            [],
        );
        assert!(duplicate.is_err());
    }

    #[test]
    fn foreign_keys_enforced() {
        let pool = test_pool();
        run_migrations(&pool).unwrap();

        let conn = pool.get().unwrap();
        let result = conn.execute(
            "INSERT INTO messages (id, pod_id, sender_id, content, created_at, updated_at)
             VALUES ('m1', 'no-pod', 'no-profile', 'hi', 'now', 'now')",
            [],
        );
        assert!(result.is_err());
    }

    #[test]
    fn blank_message_content_rejected() {
        let pool = test_pool();
        run_migrations(&pool).unwrap();
        let conn = pool.get().unwrap();

        conn.execute_batch(
            "PRAGMA foreign_keys = OFF;
             INSERT INTO pods (id, name, created_at, updated_at) VALUES ('pod1', 'x', 'now', 'now');",
        )
        .unwrap();
        let result = conn.execute(
            "INSERT INTO messages (id, pod_id, sender_id, content, created_at, updated_at)
             VALUES ('m1', 'pod1', 'p1', '   ', 'now', 'now')",
            [],
        );
        assert!(result.is_err());
    }
}
