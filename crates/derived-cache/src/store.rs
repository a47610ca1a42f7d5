//! Backing store implementations
//!
//! A backing store is the durable tier behind a cache manager. It exchanges
//! opaque bytes; serialization belongs to the persistence tier. Keys arrive
//! already namespaced as `"{namespace}:{key}"`.

use crate::error::{CacheError, Result};
use crate::key::{AHashKeyHasher, KeyHasher};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::fs;

/// Durable key/value medium
#[async_trait]
pub trait BackingStore: Send + Sync {
    /// Fetch the bytes stored under `key`, `None` if absent or expired
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Store bytes under `key`; the store may drop them after `ttl`
    async fn put(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()>;

    /// Remove `key`; removing an absent key is not an error
    async fn delete(&self, key: &str) -> Result<()>;

    /// Remove every key in `namespace`
    async fn clear(&self, namespace: &str) -> Result<()>;

    /// Short name used in logs
    fn name(&self) -> &str;
}

/// Prefix shared by every key of a namespace
pub fn namespace_prefix(namespace: &str) -> String {
    format!("{}:", namespace)
}

struct StoredValue {
    bytes: Vec<u8>,
    expires_at: Instant,
}

/// In-process store, mainly for tests and single-process setups
#[derive(Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, StoredValue>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys held, expired ones included
    pub fn len(&self) -> usize {
        self.values.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.lock().is_empty()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.values.lock().contains_key(key)
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("keys", &self.len())
            .finish()
    }
}

#[async_trait]
impl BackingStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut values = self.values.lock();
        let expired = match values.get(key) {
            Some(stored) if stored.expires_at > Instant::now() => {
                return Ok(Some(stored.bytes.clone()))
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            values.remove(key);
        }
        Ok(None)
    }

    async fn put(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()> {
        let expires_at = Instant::now()
            .checked_add(ttl)
            .unwrap_or_else(|| Instant::now() + Duration::from_secs(365 * 24 * 60 * 60));
        self.values.lock().insert(
            key.to_string(),
            StoredValue {
                bytes: value,
                expires_at,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.values.lock().remove(key);
        Ok(())
    }

    async fn clear(&self, namespace: &str) -> Result<()> {
        let prefix = namespace_prefix(namespace);
        self.values.lock().retain(|key, _| !key.starts_with(&prefix));
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

/// File-per-key store rooted at a directory
///
/// Each file holds the expiry time (milliseconds since the Unix epoch, u64
/// little-endian), the key length (u32 little-endian), the key and then the
/// payload. Short keys are named by their hex encoding; longer ones by a
/// hex prefix plus a hash of the whole key, so names stay within file system
/// limits. The key stored in the file is authoritative.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

const EXPIRY_LEN: usize = 8;
const KEY_LEN_LEN: usize = 4;
const FILE_EXTENSION: &str = "entry";
/// Longest key, in bytes, named by its plain hex encoding
const MAX_PLAIN_KEY_LEN: usize = 64;
/// Key bytes kept in the name of a hashed entry file
const HASHED_PREFIX_LEN: usize = 32;

/// Decoded entry file
struct EntryFile<'a> {
    expires_at: u64,
    key: &'a str,
    payload: &'a [u8],
}

impl<'a> EntryFile<'a> {
    fn parse(contents: &'a [u8]) -> Option<Self> {
        let header_len = EXPIRY_LEN + KEY_LEN_LEN;
        if contents.len() < header_len {
            return None;
        }
        let expires_at = u64::from_le_bytes(contents[..EXPIRY_LEN].try_into().ok()?);
        let key_len = u32::from_le_bytes(contents[EXPIRY_LEN..header_len].try_into().ok()?);
        let key_end = header_len.checked_add(key_len as usize)?;
        let key = contents.get(header_len..key_end)?;

        Some(Self {
            expires_at,
            key: std::str::from_utf8(key).ok()?,
            payload: &contents[key_end..],
        })
    }

    fn encode(expires_at: u64, key: &str, payload: &[u8]) -> Result<Vec<u8>> {
        let key_len = u32::try_from(key.len())
            .map_err(|_| CacheError::Store(format!("key of {} bytes is too long", key.len())))?;

        let mut contents = Vec::with_capacity(EXPIRY_LEN + KEY_LEN_LEN + key.len() + payload.len());
        contents.extend_from_slice(&expires_at.to_le_bytes());
        contents.extend_from_slice(&key_len.to_le_bytes());
        contents.extend_from_slice(key.as_bytes());
        contents.extend_from_slice(payload);
        Ok(contents)
    }
}

impl FileStore {
    /// Open a store, creating the directory if needed
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    /// Directory this store writes to
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}.{}", file_stem(key), FILE_EXTENSION))
    }

    /// Read every entry file, handing each key and path to `visit`
    async fn scan(&self, mut visit: impl FnMut(&str, PathBuf)) -> Result<()> {
        let mut dir = fs::read_dir(&self.root).await?;
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|s| s.to_str()) != Some(FILE_EXTENSION) {
                continue;
            }
            let contents = match fs::read(&path).await {
                Ok(contents) => contents,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            match EntryFile::parse(&contents) {
                Some(file) => visit(file.key, path),
                None => tracing::debug!("Skipping unreadable entry file {}", path.display()),
            }
        }
        Ok(())
    }

    /// All keys currently on disk, expired ones included
    pub async fn keys(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        self.scan(|key, _| keys.push(key.to_string())).await?;
        keys.sort();
        Ok(keys)
    }
}

#[async_trait]
impl BackingStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(key);
        let contents = match fs::read(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let file = EntryFile::parse(&contents).ok_or_else(|| {
            CacheError::Store(format!("truncated entry file {}", path.display()))
        })?;
        // Another key hashed to the same name and replaced this one
        if file.key != key {
            return Ok(None);
        }
        if file.expires_at <= unix_millis(SystemTime::now()) {
            if let Err(e) = fs::remove_file(&path).await {
                tracing::debug!("Failed to remove expired entry {}: {}", path.display(), e);
            }
            return Ok(None);
        }

        Ok(Some(file.payload.to_vec()))
    }

    async fn put(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()> {
        let expires_at = unix_millis(SystemTime::now())
            .saturating_add(u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX));
        let contents = EntryFile::encode(expires_at, key, &value)?;

        // Write then rename so readers never see a partial file
        let path = self.path_for(key);
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, contents).await?;
        fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.path_for(key);
        let contents = match fs::read(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        // Leave a colliding key's file alone
        if let Some(file) = EntryFile::parse(&contents) {
            if file.key != key {
                return Ok(());
            }
        }
        remove_if_present(&path).await
    }

    async fn clear(&self, namespace: &str) -> Result<()> {
        let prefix = namespace_prefix(namespace);
        let mut doomed = Vec::new();
        self.scan(|key, path| {
            if key.starts_with(&prefix) {
                doomed.push(path);
            }
        })
        .await?;

        for path in doomed {
            remove_if_present(&path).await?;
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "file"
    }
}

async fn remove_if_present(path: &Path) -> Result<()> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn unix_millis(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

fn file_stem(key: &str) -> String {
    let bytes = key.as_bytes();
    if bytes.len() <= MAX_PLAIN_KEY_LEN {
        return hex_encode(bytes);
    }
    format!(
        "{}-{:016x}",
        hex_encode(&bytes[..HASHED_PREFIX_LEN]),
        AHashKeyHasher::new().hash(bytes)
    )
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_stem_is_bounded() {
        assert_eq!(file_stem("ns:a"), hex_encode(b"ns:a"));

        let long = format!("results:{}", "k".repeat(400));
        let stem = file_stem(&long);
        assert!(stem.len() < 100);
        assert_ne!(stem, file_stem(&format!("results:{}", "k".repeat(401))));
    }

    #[tokio::test]
    async fn test_memory_store_basic() {
        let store = MemoryStore::new();
        store
            .put("ns:a", b"one".to_vec(), Duration::from_secs(60))
            .await
            .unwrap();

        assert_eq!(store.get("ns:a").await.unwrap(), Some(b"one".to_vec()));
        assert_eq!(store.get("ns:b").await.unwrap(), None);

        store.delete("ns:a").await.unwrap();
        store.delete("ns:a").await.unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_memory_store_ttl() {
        let store = MemoryStore::new();
        store
            .put("ns:a", b"one".to_vec(), Duration::from_millis(20))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(40)).await;

        assert_eq!(store.get("ns:a").await.unwrap(), None);
        assert!(!store.contains_key("ns:a"));
    }

    #[tokio::test]
    async fn test_memory_store_clear_namespace() {
        let store = MemoryStore::new();
        let ttl = Duration::from_secs(60);
        store.put("results:a", vec![1], ttl).await.unwrap();
        store.put("results:b", vec![2], ttl).await.unwrap();
        store.put("templates:a", vec![3], ttl).await.unwrap();

        store.clear("results").await.unwrap();

        assert_eq!(store.len(), 1);
        assert!(store.contains_key("templates:a"));
    }

    #[tokio::test]
    async fn test_file_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path().join("cache")).await.unwrap();

        store
            .put("results:k1", b"payload".to_vec(), Duration::from_secs(60))
            .await
            .unwrap();

        assert_eq!(
            store.get("results:k1").await.unwrap(),
            Some(b"payload".to_vec())
        );
        assert_eq!(store.keys().await.unwrap(), vec!["results:k1".to_string()]);

        store.delete("results:k1").await.unwrap();
        store.delete("results:k1").await.unwrap();
        assert_eq!(store.get("results:k1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_file_store_expiry() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).await.unwrap();

        store
            .put("results:k1", b"payload".to_vec(), Duration::from_millis(10))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert_eq!(store.get("results:k1").await.unwrap(), None);
        assert!(store.keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_file_store_clear_namespace() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).await.unwrap();
        let ttl = Duration::from_secs(60);

        store.put("results:a", vec![1], ttl).await.unwrap();
        store.put("templates:a", vec![2], ttl).await.unwrap();
        store.clear("results").await.unwrap();

        assert_eq!(store.keys().await.unwrap(), vec!["templates:a".to_string()]);
    }

    #[tokio::test]
    async fn test_file_store_truncated_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).await.unwrap();
        std::fs::write(store.path_for("results:bad"), [1u8, 2]).unwrap();

        assert!(store.get("results:bad").await.is_err());
    }

    #[tokio::test]
    async fn test_file_store_long_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).await.unwrap();
        let ttl = Duration::from_secs(60);
        let long = format!("results:{}", "k".repeat(300));
        let longer = format!("results:{}", "k".repeat(301));

        store.put(&long, b"one".to_vec(), ttl).await.unwrap();
        store.put(&longer, b"two".to_vec(), ttl).await.unwrap();

        assert_eq!(store.get(&long).await.unwrap(), Some(b"one".to_vec()));
        assert_eq!(store.get(&longer).await.unwrap(), Some(b"two".to_vec()));
        assert_eq!(store.keys().await.unwrap(), vec![long.clone(), longer.clone()]);

        store.delete(&long).await.unwrap();
        assert_eq!(store.get(&long).await.unwrap(), None);

        store.clear("results").await.unwrap();
        assert!(store.keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_file_store_ignores_colliding_name() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).await.unwrap();
        let contents = EntryFile::encode(u64::MAX, "results:other", b"x").unwrap();
        std::fs::write(store.path_for("results:mine"), contents).unwrap();

        assert_eq!(store.get("results:mine").await.unwrap(), None);
        store.delete("results:mine").await.unwrap();
        assert_eq!(store.keys().await.unwrap(), vec!["results:other".to_string()]);
    }
}
