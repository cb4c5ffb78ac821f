use alyx_base::AlyxError;
use rusqlite::ErrorCode as SqliteErrorCode;

/// Classified sub-kind of a `CONSTRAINT_VIOLATION`, carrying table/column
/// (and referenced table, for foreign keys) when SQLite's error text makes
/// them extractable (§4.A).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConstraintKind {
    ForeignKey {
        table: Option<String>,
        referenced_table: Option<String>,
    },
    Unique {
        table: Option<String>,
        column: Option<String>,
    },
    NotNull {
        table: Option<String>,
        column: Option<String>,
    },
    Check {
        table: Option<String>,
        check_name: Option<String>,
    },
}

impl ConstraintKind {
    pub fn tag(&self) -> &'static str {
        match self {
            ConstraintKind::ForeignKey { .. } => "foreign_key",
            ConstraintKind::Unique { .. } => "unique",
            ConstraintKind::NotNull { .. } => "not_null",
            ConstraintKind::Check { .. } => "check",
        }
    }
}

/// Classifies a `rusqlite::Error` into the constraint taxonomy, returning
/// `None` for errors that are not constraint violations (caller should treat
/// those as `INTERNAL` instead).
pub fn classify(err: &rusqlite::Error) -> Option<ConstraintKind> {
    let rusqlite::Error::SqliteFailure(sqlite_err, message) = err else {
        return None;
    };
    if sqlite_err.code != SqliteErrorCode::ConstraintViolation {
        return None;
    }
    let message = message.as_deref().unwrap_or_default();
    if message.starts_with("UNIQUE constraint failed") {
        let (table, column) = split_table_column(message, "UNIQUE constraint failed: ");
        return Some(ConstraintKind::Unique { table, column });
    }
    if message.starts_with("FOREIGN KEY constraint failed") {
        return Some(ConstraintKind::ForeignKey { table: None, referenced_table: None });
    }
    if message.starts_with("NOT NULL constraint failed") {
        let (table, column) = split_table_column(message, "NOT NULL constraint failed: ");
        return Some(ConstraintKind::NotNull { table, column });
    }
    if message.starts_with("CHECK constraint failed") {
        let check_name = message.strip_prefix("CHECK constraint failed: ").map(str::to_string);
        return Some(ConstraintKind::Check { table: None, check_name });
    }
    Some(ConstraintKind::Check { table: None, check_name: None })
}

/// SQLite reports `UNIQUE`/`NOT NULL` failures as `table.column` (the first
/// one, if multiple columns participate in a composite constraint).
fn split_table_column(message: &str, prefix: &str) -> (Option<String>, Option<String>) {
    let Some(rest) = message.strip_prefix(prefix) else {
        return (None, None);
    };
    let first = rest.split(", ").next().unwrap_or(rest);
    match first.split_once('.') {
        Some((table, column)) => (Some(table.to_string()), Some(column.to_string())),
        None => (None, None),
    }
}

pub fn classify_as_error(err: &rusqlite::Error) -> AlyxError {
    match classify(err) {
        Some(kind) => {
            let detail = match &kind {
                ConstraintKind::ForeignKey { table, referenced_table } => {
                    serde_json::json!({"kind": "foreign_key", "table": table, "referenced_table": referenced_table})
                },
                ConstraintKind::Unique { table, column } => {
                    serde_json::json!({"kind": "unique", "table": table, "column": column})
                },
                ConstraintKind::NotNull { table, column } => {
                    serde_json::json!({"kind": "not_null", "table": table, "column": column})
                },
                ConstraintKind::Check { table, check_name } => {
                    serde_json::json!({"kind": "check", "table": table, "check_name": check_name})
                },
            };
            AlyxError::constraint_violation(format!("{} constraint violated", kind.tag()))
                .with_details(detail)
        },
        None => AlyxError::internal(format!("sqlite error: {err}")),
    }
}

#[cfg(test)]
mod tests {
    use rusqlite::ffi;

    use super::*;

    fn sqlite_failure(code: rusqlite::ErrorCode, message: &str) -> rusqlite::Error {
        rusqlite::Error::SqliteFailure(
            ffi::Error {
                code,
                extended_code: 0,
            },
            Some(message.to_string()),
        )
    }

    #[test]
    fn classifies_unique_violation_with_table_and_column() {
        let err = sqlite_failure(
            rusqlite::ErrorCode::ConstraintViolation,
            "UNIQUE constraint failed: users.email",
        );
        let kind = classify(&err).unwrap();
        assert_eq!(kind, ConstraintKind::Unique { table: Some("users".into()), column: Some("email".into()) });
    }

    #[test]
    fn classifies_not_null_violation() {
        let err = sqlite_failure(
            rusqlite::ErrorCode::ConstraintViolation,
            "NOT NULL constraint failed: posts.title",
        );
        let kind = classify(&err).unwrap();
        assert_eq!(kind, ConstraintKind::NotNull { table: Some("posts".into()), column: Some("title".into()) });
    }

    #[test]
    fn non_constraint_errors_are_not_classified() {
        let err = sqlite_failure(rusqlite::ErrorCode::DatabaseBusy, "database is locked");
        assert!(classify(&err).is_none());
    }

    #[test]
    fn classify_as_error_tags_code_and_details() {
        let err = sqlite_failure(
            rusqlite::ErrorCode::ConstraintViolation,
            "UNIQUE constraint failed: users.email",
        );
        let alyx = classify_as_error(&err);
        assert_eq!(alyx.code, alyx_base::ErrorCode::ConstraintViolation);
        assert_eq!(alyx.details.unwrap()["kind"], "unique");
    }
}
