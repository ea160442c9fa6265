//! Filesystem-backed object store.
//!
//! URIs keep the `scheme://bucket/key` shape the rest of the system treats
//! as opaque; this backend maps `bucket/key` onto a directory tree under a
//! configured root. The scheme is accepted and ignored.

use std::path::{Component, PathBuf};

use kindred_core::store::ObjectStore;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ObjectStoreError {
  #[error("object not found: {0}")]
  NotFound(String),

  #[error("invalid object uri: {0:?}")]
  InvalidUri(String),

  #[error("upload failed for {uri}: {source}")]
  Upload {
    uri:    String,
    source: std::io::Error,
  },

  #[error("io error reading {uri}: {source}")]
  Io {
    uri:    String,
    source: std::io::Error,
  },
}

#[derive(Debug, Clone)]
pub struct FsObjectStore {
  root: PathBuf,
}

impl FsObjectStore {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self { root: root.into() }
  }

  /// Resolve `scheme://bucket/key` to a path under the root. Relative
  /// components are rejected so a URI cannot escape it.
  fn resolve(&self, uri: &str) -> Result<PathBuf, ObjectStoreError> {
    let rest = uri
      .split_once("://")
      .map(|(_, rest)| rest)
      .ok_or_else(|| ObjectStoreError::InvalidUri(uri.to_owned()))?;

    let relative = PathBuf::from(rest);
    let safe = relative
      .components()
      .all(|c| matches!(c, Component::Normal(_)));
    if rest.is_empty() || !safe {
      return Err(ObjectStoreError::InvalidUri(uri.to_owned()));
    }

    Ok(self.root.join(relative))
  }
}

impl ObjectStore for FsObjectStore {
  type Error = ObjectStoreError;

  async fn get(&self, uri: &str) -> Result<Vec<u8>, ObjectStoreError> {
    let path = self.resolve(uri)?;
    match tokio::fs::read(&path).await {
      Ok(bytes) => Ok(bytes),
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
        Err(ObjectStoreError::NotFound(uri.to_owned()))
      }
      Err(source) => Err(ObjectStoreError::Io { uri: uri.to_owned(), source }),
    }
  }

  async fn put(&self, uri: &str, bytes: &[u8]) -> Result<(), ObjectStoreError> {
    let path = self.resolve(uri)?;
    let upload = |source| ObjectStoreError::Upload {
      uri: uri.to_owned(),
      source,
    };

    if let Some(parent) = path.parent() {
      tokio::fs::create_dir_all(parent).await.map_err(upload)?;
    }
    tokio::fs::write(&path, bytes).await.map_err(upload)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn put_then_get_roundtrips() {
    let dir = tempfile::tempdir().unwrap();
    let store = FsObjectStore::new(dir.path());

    store
      .put("file://imports/batch-1.csv", b"first_name\nAlice\n")
      .await
      .unwrap();
    let bytes = store.get("file://imports/batch-1.csv").await.unwrap();
    assert_eq!(bytes, b"first_name\nAlice\n");
  }

  #[tokio::test]
  async fn missing_object_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let store = FsObjectStore::new(dir.path());

    let err = store.get("file://imports/absent.csv").await.unwrap_err();
    assert!(matches!(err, ObjectStoreError::NotFound(_)));
  }

  #[tokio::test]
  async fn traversal_uris_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let store = FsObjectStore::new(dir.path());

    for uri in ["file://../secrets", "no-scheme/key", "file://"] {
      let err = store.get(uri).await.unwrap_err();
      assert!(matches!(err, ObjectStoreError::InvalidUri(_)), "{uri}");
    }
  }
}
