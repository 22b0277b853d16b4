use std::{
    fs,
    io::{self, ErrorKind, Write},
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use rand::{distr::Alphanumeric, Rng};
use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use thiserror::Error;
use tracing::{debug, info, warn};

use bulb_common::{Credential, DeviceIdentity};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("credential file I/O failed: {0}")]
    Io(#[from] io::Error),

    #[error("credential encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("credential storage task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Non-volatile home of the device credential.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Missing, unreadable or corrupt records all read as `None`.
    async fn load(&self, identity: &DeviceIdentity) -> Option<Credential>;

    async fn save(&self, identity: &DeviceIdentity, credential: &Credential)
        -> Result<(), StoreError>;
}

#[derive(Debug, Serialize, Deserialize)]
struct CredentialRecord {
    #[serde(rename = "productId")]
    product_id: String,
    #[serde(rename = "deviceId")]
    device_id: String,
    credential: Credential,
    sha256: String,
}

impl CredentialRecord {
    fn new(identity: &DeviceIdentity, credential: &Credential) -> Self {
        Self {
            product_id: identity.product_id.clone(),
            device_id: identity.device_id.clone(),
            credential: credential.clone(),
            sha256: sha256_hex_digest(credential.as_str()),
        }
    }

    fn is_intact(&self, identity: &DeviceIdentity) -> bool {
        self.product_id == identity.product_id
            && self.device_id == identity.device_id
            && !self.credential.is_empty()
            && self.sha256 == sha256_hex_digest(self.credential.as_str())
    }
}

/// One JSON record per identity under a data directory.
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    dir: PathBuf,
}

impl FileCredentialStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Record path keyed by a digest of the whole identity, so distinct
    /// (product id, device id) pairs never share a file.
    pub fn path_for(&self, identity: &DeviceIdentity) -> PathBuf {
        let key = sha256_hex_digest(format!(
            "{}\0{}",
            identity.product_id, identity.device_id
        ));
        self.dir.join(format!("cik_{key}.json"))
    }
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn load(&self, identity: &DeviceIdentity) -> Option<Credential> {
        let path = self.path_for(identity);
        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "no stored credential");
                return None;
            }
            Err(err) => {
                warn!(path = %path.display(), "failed to read stored credential: {err}");
                return None;
            }
        };

        let record = match serde_json::from_slice::<CredentialRecord>(&raw) {
            Ok(record) => record,
            Err(err) => {
                warn!(path = %path.display(), "stored credential is corrupt: {err}");
                return None;
            }
        };

        if !record.is_intact(identity) {
            warn!(path = %path.display(), "stored credential failed integrity check");
            return None;
        }

        info!("stored credential: {}", record.credential.redacted());
        Some(record.credential)
    }

    async fn save(
        &self,
        identity: &DeviceIdentity,
        credential: &Credential,
    ) -> Result<(), StoreError> {
        let path = self.path_for(identity);
        let payload = serde_json::to_vec_pretty(&CredentialRecord::new(identity, credential))?;

        tokio::task::spawn_blocking(move || {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            safe_write_all(&path, &payload)
        })
        .await??;

        Ok(())
    }
}

/// Writes `buf` to a sibling temp file, syncs it and renames it over `path`
/// so a crash never leaves a half-written record behind.
fn safe_write_all<P: AsRef<Path>, B: AsRef<[u8]>>(path: P, buf: B) -> io::Result<()> {
    let suffix: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(6)
        .map(char::from)
        .collect();
    let tmp_path = path.as_ref().with_extension(format!("sync-{suffix}"));
    let mut tmp_file = fs::File::create(&tmp_path)?;

    tmp_file.write_all(buf.as_ref())?;
    tmp_file.flush()?;
    tmp_file.sync_all()?;
    drop(tmp_file);

    fs::rename(&tmp_path, path.as_ref()).inspect_err(|_| {
        _ = fs::remove_file(&tmp_path);
    })
}

fn sha256_hex_digest<D: AsRef<[u8]>>(data: D) -> String {
    let digest = Sha256::digest(data.as_ref());
    format!("{digest:x}")
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    use super::*;

    fn identity() -> DeviceIdentity {
        DeviceIdentity::new("p1", "000001")
    }

    #[tokio::test]
    async fn load_missing_record_is_none() {
        let dir = TempDir::new().unwrap();
        let store = FileCredentialStore::new(dir.path());

        assert_eq!(store.load(&identity()).await, None);
    }

    #[tokio::test]
    async fn save_then_load() {
        let dir = TempDir::new().unwrap();
        let store = FileCredentialStore::new(dir.path().join("nested"));
        let credential = Credential::new("0123456789abcdef");

        store.save(&identity(), &credential).await.unwrap();

        assert_eq!(store.load(&identity()).await, Some(credential));
    }

    #[tokio::test]
    async fn save_overwrites_and_leaves_no_temp_files() {
        let dir = TempDir::new().unwrap();
        let store = FileCredentialStore::new(dir.path());

        store
            .save(&identity(), &Credential::new("first"))
            .await
            .unwrap();
        store
            .save(&identity(), &Credential::new("second"))
            .await
            .unwrap();

        let entries: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(entries.len(), 1);
        assert_eq!(
            store.load(&identity()).await,
            Some(Credential::new("second"))
        );
    }

    #[tokio::test]
    async fn corrupt_record_is_none() {
        let dir = TempDir::new().unwrap();
        let store = FileCredentialStore::new(dir.path());
        fs::write(store.path_for(&identity()), b"{not json").unwrap();

        assert_eq!(store.load(&identity()).await, None);
    }

    #[tokio::test]
    async fn tampered_token_is_none() {
        let dir = TempDir::new().unwrap();
        let store = FileCredentialStore::new(dir.path());
        store
            .save(&identity(), &Credential::new("genuine"))
            .await
            .unwrap();

        let path = store.path_for(&identity());
        let tampered = fs::read_to_string(&path)
            .unwrap()
            .replace("genuine", "forged");
        fs::write(&path, tampered).unwrap();

        assert_eq!(store.load(&identity()).await, None);
    }

    #[tokio::test]
    async fn records_are_keyed_by_identity() {
        let dir = TempDir::new().unwrap();
        let store = FileCredentialStore::new(dir.path());
        store
            .save(&identity(), &Credential::new("mine"))
            .await
            .unwrap();

        let other = DeviceIdentity::new("p1", "000002");
        assert_eq!(store.load(&other).await, None);
    }

    #[test]
    fn path_stays_inside_data_dir() {
        let store = FileCredentialStore::new("/data");
        let path = store.path_for(&DeviceIdentity::new("p/1", "../dev"));

        assert_eq!(path.parent(), Some(Path::new("/data")));
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("cik_"));
        assert!(name.ends_with(".json"));
    }

    #[tokio::test]
    async fn separator_in_identity_does_not_share_records() {
        let dir = TempDir::new().unwrap();
        let store = FileCredentialStore::new(dir.path());
        let first = DeviceIdentity::new("p", "1_2");
        let second = DeviceIdentity::new("p_1", "2");

        store
            .save(&first, &Credential::new("token-a"))
            .await
            .unwrap();
        store
            .save(&second, &Credential::new("token-b"))
            .await
            .unwrap();

        assert_ne!(store.path_for(&first), store.path_for(&second));
        assert_eq!(store.load(&first).await, Some(Credential::new("token-a")));
        assert_eq!(store.load(&second).await, Some(Credential::new("token-b")));
    }

    #[tokio::test]
    async fn save_into_unwritable_location_fails() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, b"file, not a directory").unwrap();
        let store = FileCredentialStore::new(&blocker);

        let result = store.save(&identity(), &Credential::new("token")).await;

        assert!(matches!(result, Err(StoreError::Io(_))));
    }
}
