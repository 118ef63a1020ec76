//! `sync`: wraps the Sync Engine for one user's repository, decrypting
//! their stored remote credential (if any) from the system store before
//! handing off to [`crate::sync::sync`].

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::crypto::{self, EncryptionKey};
use crate::git::RemoteCredential;
use crate::index::{Index, SystemStore};
use crate::sync::{self, SyncReport};

/// JSON shape sealed into `repo_registry.encrypted_remote_credential`.
#[derive(Serialize, Deserialize)]
struct StoredCredential {
    username: String,
    secret: String,
}

/// Run one sync cycle for `user_id`, returning the report plus a fresh
/// `Index` handle (the old one is consumed, since the Sync Engine must
/// close it before git touches the worktree).
pub async fn sync_repository(
    system: &SystemStore,
    encryption_key: Option<&EncryptionKey>,
    user_id: &str,
    repo_root: &std::path::Path,
    index: Index,
) -> Result<(SyncReport, Index)> {
    let credential = match (system.get_repo(user_id).await?, encryption_key) {
        (Some(record), Some(key)) => match record.encrypted_remote_credential {
            Some(blob) => {
                let plaintext = crypto::open(key, &blob)?;
                let stored: StoredCredential = serde_json::from_slice(&plaintext)?;
                Some(RemoteCredential {
                    username: stored.username,
                    secret: stored.secret,
                })
            }
            None => None,
        },
        _ => None,
    };

    sync::sync(repo_root, credential, index).await
}

/// Seal a credential for storage, ready to hand to `SystemStore::upsert_repo`.
pub fn seal_credential(key: &EncryptionKey, credential: &RemoteCredential) -> Result<String> {
    let payload = serde_json::to_vec(&StoredCredential {
        username: credential.username.clone(),
        secret: credential.secret.clone(),
    })?;
    crypto::seal(key, &payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RepoRecord;

    #[tokio::test]
    async fn sync_repository_without_stored_credential_is_a_noop() {
        let dir = tempfile::TempDir::new().unwrap();
        #[cfg(feature = "git-integration")]
        crate::git::Repository::init(dir.path()).unwrap();

        let system = SystemStore::open("sqlite::memory:").await.unwrap();
        let index = Index::open(dir.path()).await.unwrap();

        let (report, _index) = sync_repository(&system, None, "alice", dir.path(), index)
            .await
            .unwrap();

        assert!(!report.pushed);
    }

    #[tokio::test]
    async fn seal_credential_round_trips_through_sync_repository_lookup() {
        let key = EncryptionKey::generate();
        let credential = RemoteCredential {
            username: "alice".to_string(),
            secret: "token-123".to_string(),
        };
        let sealed = seal_credential(&key, &credential).unwrap();

        let system = SystemStore::open("sqlite::memory:").await.unwrap();
        system
            .upsert_repo(&RepoRecord {
                user_id: "alice".to_string(),
                repo_path: "/data/cairn-alice".to_string(),
                encrypted_remote_credential: Some(sealed),
            })
            .await
            .unwrap();

        let record = system.get_repo("alice").await.unwrap().unwrap();
        let plaintext = crypto::open(&key, &record.encrypted_remote_credential.unwrap()).unwrap();
        let stored: StoredCredential = serde_json::from_slice(&plaintext).unwrap();
        assert_eq!(stored.username, "alice");
        assert_eq!(stored.secret, "token-123");
    }
}
