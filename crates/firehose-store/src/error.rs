use snafu::Snafu;

#[derive(Debug, Snafu)]
pub enum StoreError {
    #[snafu(display("failed to acquire a pooled connection"))]
    Pool { source: deadpool_postgres::PoolError },
    #[snafu(display("query failed: {source}"))]
    Query { source: tokio_postgres::Error },
    #[snafu(display("failed to build the connection pool: {source}"))]
    Build { source: deadpool_postgres::CreatePoolError },
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// How a Postgres error from an insert should be treated, per §4.5.8 and
/// §7: duplicate key is success, foreign key miss goes to a pending queue,
/// anything else propagates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Inserted,
    AlreadyExists,
    ForeignKeyMissing,
}

/// Classifies a query error using the Postgres `SQLSTATE` class codes, the
/// same signal the original relies on (`unique_violation` / 23505,
/// `foreign_key_violation` / 23503) to decide between "treat as success"
/// and "enqueue to pending queue".
pub fn classify_write_error(err: &tokio_postgres::Error) -> Option<WriteOutcome> {
    let code = err.code()?;
    if *code == tokio_postgres::error::SqlState::UNIQUE_VIOLATION {
        Some(WriteOutcome::AlreadyExists)
    } else if *code == tokio_postgres::error::SqlState::FOREIGN_KEY_VIOLATION {
        Some(WriteOutcome::ForeignKeyMissing)
    } else {
        None
    }
}
