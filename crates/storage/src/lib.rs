mod domains;
mod rate_limit;

use std::{path::Path, str::FromStr};

use sqlx::{
    migrate::MigrateError,
    sqlite::{SqliteConnectOptions, SqliteConnection, SqlitePoolOptions},
    Connection, Row, SqlitePool,
};
use thiserror::Error;
use tracing::{debug, info};

pub use domains::{DomainRecord, DomainRepository, DomainStoreError, NewDomain};
pub use rate_limit::{
    RateDecision, RateLimitError, RateLimitRepository, RateLimiter, UserRateLimitRecord,
};

/// Engine settings applied in order on every new connection, each verified by reading it back.
///
/// WAL with manual checkpoints and `synchronous = EXTRA` keeps committed rows
/// on disk across crashes; exclusive locking makes this process the only writer.
pub const DURABILITY_PRAGMAS: &[(&str, &str)] = &[
    ("journal_mode", "wal"),
    ("wal_autocheckpoint", "0"),
    ("synchronous", "3"),
    ("locking_mode", "exclusive"),
    ("journal_size_limit", "-1"),
    ("checkpoint_fullfsync", "1"),
    ("fullfsync", "1"),
];

/// Top-level database handle that owns the SQLite connection pool.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Opens (creating if needed) the database file and applies the durability pragmas.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        Self::connect_with(options).await
    }

    /// Establishes the pool for a connection string such as `sqlite://domains.db?mode=rwc`.
    pub async fn connect(database_url: &str) -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str(database_url).map_err(StorageError::Connect)?;
        Self::connect_with(options).await
    }

    async fn connect_with(options: SqliteConnectOptions) -> Result<Self, StorageError> {
        // Check the settings once on a standalone connection so a misconfigured
        // file reports the offending pragma instead of a pool timeout.
        let mut conn = SqliteConnection::connect_with(&options)
            .await
            .map_err(StorageError::Connect)?;
        let version: String = sqlx::query_scalar("SELECT sqlite_version()")
            .fetch_one(&mut conn)
            .await
            .map_err(StorageError::Connect)?;
        info!(stage = "storage", sqlite_version = %version, "connected to sqlite database");
        apply_pragmas(&mut conn).await?;
        conn.close().await.map_err(StorageError::Connect)?;

        // Exclusive locking mode pins the write lock to one connection, so the
        // pool must never open a second one or recycle the first. A replacement
        // connection is only handed out once the pragmas hold on it too.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .after_connect(|conn, _meta| {
                Box::pin(async move {
                    apply_pragmas(conn)
                        .await
                        .map_err(|err| sqlx::Error::Configuration(err.into()))?;
                    debug!(stage = "storage", "durability pragmas applied to new connection");
                    Ok(())
                })
            })
            .connect_with(options)
            .await
            .map_err(StorageError::Connect)?;
        info!(stage = "storage", "durability pragmas applied and verified");

        Ok(Self { pool })
    }

    /// Applies migrations located under `migrations/`.
    pub async fn run_migrations(&self) -> Result<(), StorageError> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(StorageError::Migration)?;
        Ok(())
    }

    /// Returns a handle for inserting accepted domains.
    pub fn domains(&self) -> DomainRepository {
        DomainRepository::new(self.pool.clone())
    }

    /// Returns a handle for the per-user attempt counters.
    pub fn rate_limits(&self) -> RateLimitRepository {
        RateLimitRepository::new(self.pool.clone())
    }

    /// Copies the WAL back into the database file and truncates it.
    ///
    /// Automatic checkpoints are disabled, so this is the only thing keeping
    /// the WAL from growing without bound.
    pub async fn wal_checkpoint_truncate(&self) -> Result<CheckpointStats, sqlx::Error> {
        let (busy, log_frames, checkpointed_frames): (i64, i64, i64) =
            sqlx::query_as("PRAGMA wal_checkpoint(TRUNCATE);")
                .fetch_one(&self.pool)
                .await?;
        Ok(CheckpointStats {
            busy: busy != 0,
            log_frames,
            checkpointed_frames,
        })
    }

    /// Exposes the inner pool when lower level access is required.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Closes the pool, waiting for the connection to be returned.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// Result row of `PRAGMA wal_checkpoint`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckpointStats {
    /// The checkpoint could not complete because the database was locked.
    pub busy: bool,
    pub log_frames: i64,
    pub checkpointed_frames: i64,
}

async fn apply_pragmas(conn: &mut SqliteConnection) -> Result<(), StorageError> {
    for &(name, expected) in DURABILITY_PRAGMAS {
        let statement = format!("PRAGMA {name} = {expected};");
        sqlx::query(&statement)
            .execute(&mut *conn)
            .await
            .map_err(|source| StorageError::Pragma { name, source })?;

        let statement = format!("PRAGMA {name};");
        let row = sqlx::query(&statement)
            .fetch_optional(&mut *conn)
            .await
            .map_err(|source| StorageError::Pragma { name, source })?
            .ok_or(StorageError::PragmaMissing { name })?;
        // Integer pragmas come back as INTEGER; sqlite renders them as text on request.
        let actual: String = row
            .try_get_unchecked(0)
            .map_err(|source| StorageError::Pragma { name, source })?;

        if actual != expected {
            return Err(StorageError::PragmaMismatch {
                name,
                expected,
                actual,
            });
        }
        debug!(stage = "storage", pragma = name, value = %actual, "pragma verified");
    }

    Ok(())
}

/// General storage level errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to connect to sqlite: {0}")]
    Connect(sqlx::Error),
    #[error("failed to apply pragma '{name}': {source}")]
    Pragma {
        name: &'static str,
        #[source]
        source: sqlx::Error,
    },
    #[error("pragma '{name}' returned no value")]
    PragmaMissing { name: &'static str },
    #[error("pragma '{name}' updated value is not equal to previously set expected value. expected {expected}, got: {actual}")]
    PragmaMismatch {
        name: &'static str,
        expected: &'static str,
        actual: String,
    },
    #[error("failed to run database migrations: {0}")]
    Migration(MigrateError),
}

const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;
const SQLITE_CONSTRAINT_UNIQUE: &str = "2067";

/// Returns `true` when the error reports lock contention rather than a real failure.
///
/// Extended result codes are folded onto their primary code. A pool acquire
/// timeout counts as contention because the pool holds the only connection.
pub fn is_sqlite_busy(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err
            .code()
            .and_then(|code| code.parse::<i32>().ok())
            .map(|code| matches!(code & 0xff, SQLITE_BUSY | SQLITE_LOCKED))
            .unwrap_or(false),
        sqlx::Error::PoolTimedOut => true,
        _ => false,
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().as_deref() == Some(SQLITE_CONSTRAINT_UNIQUE),
        _ => false,
    }
}
