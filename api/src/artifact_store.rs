// Copyright 2024 the registry authors. All rights reserved. MIT license.
//! The persistent build cache (spec.md §4.2). The key/value store itself is
//! an out-of-scope external collaborator (spec.md §1 "the disk-backed
//! key/value store primitives") — [`KvStore`] is the interface this module
//! needs from it, with [`FileKvStore`] as a minimal working implementation
//! so the pipeline is exercisable without a real embedded database.
use std::path::Path;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::Deserialize;
use serde::Serialize;
use tracing::instrument;
use tracing::warn;

use crate::errors::BuildError;
use crate::fingerprint::BuildId;
use crate::model::ImportMetaMap;
use crate::paths;

/// What [`KvStore`] persists per [`BuildId`] (spec.md §3 CacheEntry).
#[derive(Serialize, Deserialize)]
struct CacheRecord {
  import_meta: ImportMetaMap,
  has_css: bool,
}

/// The atomic single-key store the Artifact Store is built on. A real
/// deployment would back this with an embedded KV engine; this crate only
/// needs `get`/`put`/`delete` on opaque bytes keyed by [`BuildId`].
#[async_trait]
pub trait KvStore: Send + Sync {
  async fn get(&self, key: &str) -> std::io::Result<Option<Vec<u8>>>;
  async fn put(&self, key: &str, value: &[u8]) -> std::io::Result<()>;
  async fn delete(&self, key: &str) -> std::io::Result<()>;
}

/// A [`KvStore`] backed by one file per key under `<root>/kv`, written via a
/// temp-file-then-rename so a single `put` is atomic — the store "provides
/// atomic single-key writes" per spec.md §5 "Shared-resource policy".
pub struct FileKvStore {
  root: PathBuf,
}

impl FileKvStore {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    FileKvStore { root: root.into() }
  }

  fn key_path(&self, key: &str) -> PathBuf {
    // BuildIDs are already path-safe (spec.md §3), but slashes in them are
    // meaningful path segments, so flatten to a single filename.
    self.root.join(key.replace('/', "_"))
  }
}

#[async_trait]
impl KvStore for FileKvStore {
  async fn get(&self, key: &str) -> std::io::Result<Option<Vec<u8>>> {
    match tokio::fs::read(self.key_path(key)).await {
      Ok(bytes) => Ok(Some(bytes)),
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
      Err(e) => Err(e),
    }
  }

  async fn put(&self, key: &str, value: &[u8]) -> std::io::Result<()> {
    tokio::fs::create_dir_all(&self.root).await?;
    let path = self.key_path(key);
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, value).await?;
    tokio::fs::rename(&tmp, &path).await?;
    Ok(())
  }

  async fn delete(&self, key: &str) -> std::io::Result<()> {
    match tokio::fs::remove_file(self.key_path(key)).await {
      Ok(()) => Ok(()),
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
      Err(e) => Err(e),
    }
  }
}

/// Outcome of [`ArtifactStore::lookup`].
pub enum LookupOutcome {
  Hit {
    import_meta: ImportMetaMap,
    has_css: bool,
  },
  Miss,
}

pub struct ArtifactStore<K: KvStore> {
  kv: K,
  storage_root: String,
  build_version: u32,
}

impl<K: KvStore> ArtifactStore<K> {
  pub fn new(kv: K, storage_root: impl Into<String>, build_version: u32) -> Self {
    ArtifactStore {
      kv,
      storage_root: storage_root.into(),
      build_version,
    }
  }

  /// `Lookup(BuildID) -> (ImportMeta map, hasCSS) | Miss | Corrupt`.
  /// Corrupt entries are purged before returning [`LookupOutcome::Miss`]
  /// (spec.md §4.2, §8 property 3 "self-heal").
  #[instrument(skip(self), err)]
  pub async fn lookup(
    &self,
    build_id: &BuildId,
  ) -> Result<LookupOutcome, BuildError> {
    let Some(raw) = self.kv.get(build_id).await? else {
      return Ok(LookupOutcome::Miss);
    };

    let record: CacheRecord = match serde_json::from_slice(&raw) {
      Ok(record) => record,
      Err(e) => {
        warn!(build_id, error = %e, "corrupt cache record, purging");
        self.purge(build_id).await?;
        return Ok(LookupOutcome::Miss);
      }
    };

    let js_path = paths::js_sidecar_path(&self.storage_root, self.build_version, build_id);
    if !path_exists(&js_path).await {
      warn!(build_id, "cache record present but .js sidecar missing, purging");
      self.purge(build_id).await?;
      return Ok(LookupOutcome::Miss);
    }

    Ok(LookupOutcome::Hit {
      import_meta: record.import_meta,
      has_css: record.has_css,
    })
  }

  /// `Commit(BuildID, jsBytes, cssBytes?, ImportMeta map)`. Sidecars are
  /// written before the kv record so a crash mid-commit always leaves the
  /// next Lookup observing Corrupt-or-Miss, never a false hit (spec.md
  /// §4.2, §5 "Ordering guarantees").
  #[instrument(skip(self, js_bytes, css_bytes, import_meta), err)]
  pub async fn commit(
    &self,
    build_id: &BuildId,
    js_bytes: &[u8],
    css_bytes: Option<&[u8]>,
    import_meta: ImportMetaMap,
  ) -> Result<(), BuildError> {
    let js_path = paths::js_sidecar_path(&self.storage_root, self.build_version, build_id);
    write_sidecar(&js_path, js_bytes).await?;

    if let Some(css) = css_bytes {
      let css_path = paths::css_sidecar_path(&self.storage_root, self.build_version, build_id);
      write_sidecar(&css_path, css).await?;
    }

    let record = CacheRecord {
      import_meta,
      has_css: css_bytes.is_some(),
    };
    let bytes = serde_json::to_vec(&record).map_err(|e| {
      BuildError::IoFailed(std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    })?;
    self.kv.put(build_id, &bytes).await?;
    Ok(())
  }

  async fn purge(&self, build_id: &BuildId) -> Result<(), BuildError> {
    self.kv.delete(build_id).await?;
    Ok(())
  }
}

async fn write_sidecar(path: &str, bytes: &[u8]) -> Result<(), BuildError> {
  if let Some(parent) = Path::new(path).parent() {
    tokio::fs::create_dir_all(parent).await?;
  }
  tokio::fs::write(path, bytes).await?;
  Ok(())
}

async fn path_exists(path: &str) -> bool {
  tokio::fs::metadata(path).await.is_ok()
}

#[cfg(test)]
mod tests {
  use super::*;

  fn sample_meta() -> ImportMetaMap {
    let mut map = ImportMetaMap::new();
    map.insert(
      "preact".to_string(),
      crate::model::ImportMeta {
        name: "preact".to_string(),
        version: "10.5.0".to_string(),
        main: "dist/preact.js".to_string(),
        module: "dist/preact.module.js".to_string(),
        r#type: String::new(),
        types: String::new(),
        typings: String::new(),
        dependencies: Default::default(),
        peer_dependencies: Default::default(),
        exports: vec!["h".to_string(), "default".to_string()],
        dts: String::new(),
        is_esm: true,
      },
    );
    map
  }

  #[tokio::test]
  async fn miss_when_absent() {
    let dir = tempfile::tempdir().unwrap();
    let store = ArtifactStore::new(
      FileKvStore::new(dir.path().join("kv")),
      dir.path().to_str().unwrap().to_string(),
      1,
    );
    let id = "v1/preact@10.5.0/es2020/preact".to_string();
    assert!(matches!(
      store.lookup(&id).await.unwrap(),
      LookupOutcome::Miss
    ));
  }

  #[tokio::test]
  async fn commit_then_lookup_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let store = ArtifactStore::new(
      FileKvStore::new(dir.path().join("kv")),
      dir.path().to_str().unwrap().to_string(),
      1,
    );
    let id = "v1/preact@10.5.0/es2020/preact".to_string();
    store
      .commit(&id, b"export default {}", None, sample_meta())
      .await
      .unwrap();

    match store.lookup(&id).await.unwrap() {
      LookupOutcome::Hit { import_meta, has_css } => {
        assert!(!has_css);
        assert!(import_meta.contains_key("preact"));
      }
      LookupOutcome::Miss => panic!("expected hit"),
    }
  }

  #[tokio::test]
  async fn missing_js_sidecar_self_heals_to_miss() {
    let dir = tempfile::tempdir().unwrap();
    let store = ArtifactStore::new(
      FileKvStore::new(dir.path().join("kv")),
      dir.path().to_str().unwrap().to_string(),
      1,
    );
    let id = "v1/preact@10.5.0/es2020/preact".to_string();
    store
      .commit(&id, b"export default {}", None, sample_meta())
      .await
      .unwrap();

    tokio::fs::remove_file(paths::js_sidecar_path(
      dir.path().to_str().unwrap(),
      1,
      &id,
    ))
    .await
    .unwrap();

    assert!(matches!(
      store.lookup(&id).await.unwrap(),
      LookupOutcome::Miss
    ));
    // the kv record must have been purged too
    assert!(matches!(
      store.lookup(&id).await.unwrap(),
      LookupOutcome::Miss
    ));
  }

  #[tokio::test]
  async fn corrupt_json_self_heals_to_miss() {
    let dir = tempfile::tempdir().unwrap();
    let kv = FileKvStore::new(dir.path().join("kv"));
    let id = "v1/preact@10.5.0/es2020/preact".to_string();
    kv.put(&id, b"not json").await.unwrap();

    let store = ArtifactStore::new(kv, dir.path().to_str().unwrap().to_string(), 1);
    assert!(matches!(
      store.lookup(&id).await.unwrap(),
      LookupOutcome::Miss
    ));
  }
}
