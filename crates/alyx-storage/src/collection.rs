use alyx_base::AlyxError;
use rusqlite::Connection;

/// Application collection names are used verbatim as SQLite table names;
/// validate them as identifiers so they can never be used to break out of a
/// quoted table name, and keep the `_alyx_` prefix reserved for internal
/// tables (change log, events, schedules, sessions).
pub fn validate_name(name: &str) -> anyhow::Result<()> {
    let valid = !name.is_empty()
        && name.len() <= 64
        && name.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_')
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid {
        anyhow::bail!(AlyxError::validation(format!("'{name}' is not a valid collection name")));
    }
    if name.starts_with("_alyx_") {
        anyhow::bail!(AlyxError::validation("collection names may not use the reserved '_alyx_' prefix"));
    }
    Ok(())
}

pub fn ensure_table(conn: &Connection, name: &str) -> anyhow::Result<()> {
    validate_name(name)?;
    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS \"{name}\" (
            id TEXT PRIMARY KEY,
            data TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );"
    ))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_names_with_sql_metacharacters() {
        assert!(validate_name("users; DROP TABLE x;").is_err());
        assert!(validate_name("users\"").is_err());
        assert!(validate_name("").is_err());
    }

    #[test]
    fn rejects_reserved_internal_prefix() {
        assert!(validate_name("_alyx_events").is_err());
    }

    #[test]
    fn accepts_ordinary_identifiers() {
        assert!(validate_name("users").is_ok());
        assert!(validate_name("user_posts_2").is_ok());
    }
}
