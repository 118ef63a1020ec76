//! The process-wide system store: cross-user records (repo registry and
//! its encrypted remote credentials). Separate from the per-user `Index`
//! because its scope is the whole server, not one repository.

use anyhow::Result;
use sqlx::SqlitePool;

use crate::types::RepoRecord;

const SYSTEM_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS repo_registry (
    user_id TEXT PRIMARY KEY,
    repo_path TEXT NOT NULL,
    encrypted_remote_credential TEXT
);
"#;

pub struct SystemStore {
    pool: SqlitePool,
}

impl SystemStore {
    pub async fn open(database_url: &str) -> Result<Self> {
        let pool = SqlitePool::connect(database_url).await?;
        sqlx::query(SYSTEM_SCHEMA).execute(&pool).await?;
        Ok(Self { pool })
    }

    pub async fn upsert_repo(&self, record: &RepoRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO repo_registry (user_id, repo_path, encrypted_remote_credential) \
             VALUES (?, ?, ?) \
             ON CONFLICT(user_id) DO UPDATE SET \
               repo_path = excluded.repo_path, \
               encrypted_remote_credential = excluded.encrypted_remote_credential",
        )
        .bind(&record.user_id)
        .bind(&record.repo_path)
        .bind(&record.encrypted_remote_credential)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_repo(&self, user_id: &str) -> Result<Option<RepoRecord>> {
        let row: Option<(String, String, Option<String>)> = sqlx::query_as(
            "SELECT user_id, repo_path, encrypted_remote_credential FROM repo_registry WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(user_id, repo_path, encrypted_remote_credential)| RepoRecord {
            user_id,
            repo_path,
            encrypted_remote_credential,
        }))
    }

    /// All repos that have a remote credential on file — the Scheduler's
    /// sweep candidates.
    pub async fn repos_with_remote(&self) -> Result<Vec<RepoRecord>> {
        let rows: Vec<(String, String, Option<String>)> = sqlx::query_as(
            "SELECT user_id, repo_path, encrypted_remote_credential FROM repo_registry \
             WHERE encrypted_remote_credential IS NOT NULL",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(
                |(user_id, repo_path, encrypted_remote_credential)| RepoRecord {
                    user_id,
                    repo_path,
                    encrypted_remote_credential,
                },
            )
            .collect())
    }

    pub async fn close(self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn upsert_then_get_round_trips() {
        let store = SystemStore::open("sqlite::memory:").await.unwrap();
        let record = RepoRecord {
            user_id: "alice".to_string(),
            repo_path: "/data/cairn-alice".to_string(),
            encrypted_remote_credential: Some("sealed-blob".to_string()),
        };
        store.upsert_repo(&record).await.unwrap();

        let fetched = store.get_repo("alice").await.unwrap().unwrap();
        assert_eq!(fetched.repo_path, record.repo_path);
        assert_eq!(
            fetched.encrypted_remote_credential,
            record.encrypted_remote_credential
        );
    }

    #[tokio::test]
    async fn repos_with_remote_excludes_credential_free_rows() {
        let store = SystemStore::open("sqlite::memory:").await.unwrap();
        store
            .upsert_repo(&RepoRecord {
                user_id: "bob".to_string(),
                repo_path: "/data/cairn-bob".to_string(),
                encrypted_remote_credential: None,
            })
            .await
            .unwrap();
        store
            .upsert_repo(&RepoRecord {
                user_id: "carol".to_string(),
                repo_path: "/data/cairn-carol".to_string(),
                encrypted_remote_credential: Some("blob".to_string()),
            })
            .await
            .unwrap();

        let repos = store.repos_with_remote().await.unwrap();
        assert_eq!(repos.len(), 1);
        assert_eq!(repos[0].user_id, "carol");
    }
}
