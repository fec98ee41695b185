use domain_intake_core::ErrorKind;
use sqlx::SqlitePool;
use thiserror::Error;

use crate::{is_sqlite_busy, is_unique_violation};

/// Repository responsible for the `domains` table.
#[derive(Clone)]
pub struct DomainRepository {
    pool: SqlitePool,
}

impl DomainRepository {
    /// Wraps an existing pool. Prefer the accessor on [`crate::Database`], which
    /// guarantees the durability pragmas.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Records an accepted domain. Exactly one row must be written.
    pub async fn insert(&self, record: &NewDomain<'_>) -> Result<(), DomainStoreError> {
        let result = sqlx::query(
            "INSERT INTO domains (domain, created_ts, created_by_id) VALUES (?, ?, ?)",
        )
        .bind(record.domain)
        .bind(record.created_at_unix)
        .bind(record.created_by_user_id)
        .execute(&self.pool)
        .await
        .map_err(|err| {
            if is_unique_violation(&err) {
                DomainStoreError::Duplicate
            } else if is_sqlite_busy(&err) {
                DomainStoreError::Busy(err)
            } else {
                DomainStoreError::Database(err)
            }
        })?;

        match result.rows_affected() {
            1 => Ok(()),
            other => Err(DomainStoreError::UnexpectedRowCount(other)),
        }
    }

    /// Looks up a recorded domain by its normalized name.
    pub async fn find(&self, domain: &str) -> Result<Option<DomainRecord>, sqlx::Error> {
        sqlx::query_as::<_, DomainRecord>(
            "SELECT domain, created_ts, created_by_id FROM domains WHERE domain = ?",
        )
        .bind(domain)
        .fetch_optional(&self.pool)
        .await
    }

    /// Counts recorded domains.
    pub async fn count(&self) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar("SELECT COUNT(*) FROM domains")
            .fetch_one(&self.pool)
            .await
    }
}

/// Data required to record an accepted domain.
#[derive(Debug, Clone, Copy)]
pub struct NewDomain<'a> {
    pub domain: &'a str,
    pub created_at_unix: i64,
    pub created_by_user_id: i64,
}

/// Row stored in `domains`.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct DomainRecord {
    pub domain: String,
    pub created_ts: i64,
    pub created_by_id: i64,
}

/// Errors that can occur while recording a domain.
#[derive(Debug, Error)]
pub enum DomainStoreError {
    #[error("domain already exists")]
    Duplicate,
    #[error("database is busy at the moment. try again later: {0}")]
    Busy(sqlx::Error),
    #[error("expected 1 row to be affected by domain insert query, got {0}")]
    UnexpectedRowCount(u64),
    #[error("failed to insert domain into database: {0}")]
    Database(sqlx::Error),
}

impl DomainStoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Duplicate => ErrorKind::Duplicate,
            Self::Busy(_) => ErrorKind::StoreBusy,
            Self::UnexpectedRowCount(_) | Self::Database(_) => ErrorKind::InternalError,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::setup_db;

    fn record(domain: &str, user: i64) -> NewDomain<'_> {
        NewDomain {
            domain,
            created_at_unix: 1_700_000_000,
            created_by_user_id: user,
        }
    }

    #[tokio::test]
    async fn insert_persists_record() {
        let (db, _dir) = setup_db().await;
        let repo = db.domains();

        repo.insert(&record("git.ir", 42)).await.expect("insert");

        let stored = repo.find("git.ir").await.expect("find").expect("row");
        assert_eq!(
            stored,
            DomainRecord {
                domain: "git.ir".to_string(),
                created_ts: 1_700_000_000,
                created_by_id: 42,
            }
        );
    }

    #[tokio::test]
    async fn insert_returns_duplicate_on_conflict() {
        let (db, _dir) = setup_db().await;
        let repo = db.domains();

        repo.insert(&record("example.com", 1)).await.expect("first insert");
        let err = repo
            .insert(&record("example.com", 2))
            .await
            .expect_err("second insert must fail");
        assert!(matches!(err, DomainStoreError::Duplicate));
        assert_eq!(err.kind(), ErrorKind::Duplicate);

        assert_eq!(repo.count().await.expect("count"), 1);
        let stored = repo.find("example.com").await.expect("find").expect("row");
        assert_eq!(stored.created_by_id, 1, "first submitter is kept");
    }

    #[tokio::test]
    async fn distinct_domains_are_independent() {
        let (db, _dir) = setup_db().await;
        let repo = db.domains();

        repo.insert(&record("a.ir", 1)).await.expect("insert a");
        repo.insert(&record("b.ir", 1)).await.expect("insert b");
        assert_eq!(repo.count().await.expect("count"), 2);
    }

    #[tokio::test]
    async fn other_database_errors_are_internal() {
        let (db, _dir) = setup_db().await;
        sqlx::query("DROP TABLE domains")
            .execute(db.pool())
            .await
            .expect("drop table");

        let err = db
            .domains()
            .insert(&record("git.ir", 1))
            .await
            .expect_err("insert into missing table fails");
        assert!(matches!(err, DomainStoreError::Database(_)));
        assert_eq!(err.kind(), ErrorKind::InternalError);
    }
}
