use std::path::{Path, PathBuf};

use rusqlite::{Connection, OpenFlags};
use tracing::info;

use crate::errors::AppResult;

pub struct DatabaseContext {
    pub connection: Connection,
    pub path: PathBuf,
}

pub fn bootstrap<P: AsRef<Path>>(db_path: P) -> AppResult<DatabaseContext> {
    let db_path = db_path.as_ref();
    if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE;
    let connection = Connection::open_with_flags(db_path, flags)?;
    apply_pragmas(&connection)?;
    run_migrations(&connection)?;

    info!(
        target: "database_bootstrap",
        path = %db_path.display(),
        "database ready"
    );
    Ok(DatabaseContext {
        connection,
        path: db_path.to_path_buf(),
    })
}

pub fn open_in_memory() -> AppResult<Connection> {
    let connection = Connection::open_in_memory()?;
    connection.execute_batch("PRAGMA foreign_keys = ON;")?;
    run_migrations(&connection)?;
    Ok(connection)
}

fn apply_pragmas(connection: &Connection) -> AppResult<()> {
    connection.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;
        PRAGMA foreign_keys = ON;
        "#,
    )?;
    Ok(())
}

fn run_migrations(connection: &Connection) -> AppResult<()> {
    connection.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS countries (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            alpha2 TEXT,
            alpha3 TEXT,
            lat REAL,
            lng REAL,
            created_at TEXT NOT NULL DEFAULT (DATETIME('now'))
        );

        CREATE TABLE IF NOT EXISTS provinces (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            code TEXT,
            country_id INTEGER NOT NULL,
            lat REAL,
            lng REAL,
            created_at TEXT NOT NULL DEFAULT (DATETIME('now')),
            FOREIGN KEY (country_id) REFERENCES countries(id) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS counties (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            code TEXT NOT NULL DEFAULT '',
            province_id INTEGER NOT NULL,
            lat REAL,
            lng REAL,
            created_at TEXT NOT NULL DEFAULT (DATETIME('now')),
            FOREIGN KEY (province_id) REFERENCES provinces(id) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS cases (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            type TEXT NOT NULL CHECK (type IN ('confirmed', 'dead', 'recovered')),
            date TEXT NOT NULL,
            amount INTEGER NOT NULL,
            country_id INTEGER NOT NULL,
            province_id INTEGER,
            county_id INTEGER,
            updated_at TEXT NOT NULL DEFAULT (DATETIME('now')),
            FOREIGN KEY (country_id) REFERENCES countries(id) ON DELETE CASCADE,
            FOREIGN KEY (province_id) REFERENCES provinces(id) ON DELETE CASCADE,
            FOREIGN KEY (county_id) REFERENCES counties(id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_countries_name ON countries(name);
        CREATE INDEX IF NOT EXISTS idx_provinces_name ON provinces(name);
        CREATE INDEX IF NOT EXISTS idx_counties_name ON counties(name);
        "#,
    )?;

    connection.execute(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_cases_key ON cases(
            type, date, country_id, COALESCE(province_id, -1), COALESCE(county_id, -1)
        )",
        [],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn runs_migrations_and_creates_tables() {
        let dir = tempdir().unwrap();
        let ctx = bootstrap(dir.path().join("data").join("covid.db")).unwrap();

        let mut stmt = ctx
            .connection
            .prepare(
                "SELECT name FROM sqlite_master
                WHERE type='table' AND name IN ('countries','provinces','counties','cases')",
            )
            .unwrap();
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .unwrap()
            .count();
        assert_eq!(rows, 4);
        assert!(ctx.path.ends_with("covid.db"));

        ctx.connection
            .execute_batch(
                "INSERT INTO countries (name) VALUES ('Spain');
                INSERT INTO provinces (name, country_id) VALUES ('Canarias', 1);
                INSERT INTO counties (name, province_id) VALUES ('Arona', 1);",
            )
            .unwrap();
        let code: String = ctx
            .connection
            .query_row("SELECT code FROM counties WHERE name = 'Arona'", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(code, "");
    }

    #[test]
    fn migrations_are_idempotent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("again.db");
        drop(bootstrap(&path).unwrap());
        let ctx = bootstrap(&path).unwrap();
        run_migrations(&ctx.connection).unwrap();
    }

    #[test]
    fn case_key_treats_missing_levels_as_equal() {
        let conn = open_in_memory().unwrap();
        conn.execute("INSERT INTO countries (name) VALUES ('Spain')", [])
            .unwrap();
        let insert = "INSERT INTO cases (type, date, amount, country_id)
            VALUES ('confirmed', '2020-03-01', 1, 1)";
        conn.execute(insert, []).unwrap();
        let err = conn.execute(insert, []).unwrap_err();
        assert!(err.to_string().contains("UNIQUE"), "{err}");
    }
}
