use crate::infrastructure::error::InfraError;
use rusqlite::Connection;
use std::path::Path;

const SCHEMA_SQL: &str = include_str!("../../sql/schema.sql");

pub fn initialize_database(path: &Path) -> Result<(), InfraError> {
    let connection = Connection::open(path)?;
    connection.execute_batch(SCHEMA_SQL)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initialize_database_is_repeatable() {
        let path = std::env::temp_dir().join(format!(
            "sleepwake-storage-test-{}.sqlite",
            std::process::id()
        ));
        initialize_database(&path).expect("first initialization");
        initialize_database(&path).expect("second initialization");

        let connection = Connection::open(&path).expect("open database");
        let count: i64 = connection
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'kv_store'",
                [],
                |row| row.get(0),
            )
            .expect("query schema");
        assert_eq!(count, 1);
        let _ = std::fs::remove_file(&path);
    }
}
