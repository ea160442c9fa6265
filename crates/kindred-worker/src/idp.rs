//! File-backed identity provider.
//!
//! Reads the full user list from a JSON file on each call. Other backends
//! (OIDC directories, SCIM feeds) plug in behind the same trait; this one
//! keeps deployments without a directory service workable.

use std::path::PathBuf;

use kindred_core::user::{IdentityProvider, IdpUser};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IdpError {
  #[error("reading users file {path}: {source}")]
  Io {
    path:   PathBuf,
    source: std::io::Error,
  },

  #[error("parsing users file: {0}")]
  Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone)]
pub struct FileIdentityProvider {
  path: PathBuf,
}

impl FileIdentityProvider {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self { path: path.into() }
  }
}

impl IdentityProvider for FileIdentityProvider {
  type Error = IdpError;

  async fn get_users(&self) -> Result<Vec<IdpUser>, IdpError> {
    let bytes = tokio::fs::read(&self.path).await.map_err(|source| {
      IdpError::Io { path: self.path.clone(), source }
    })?;
    Ok(serde_json::from_slice(&bytes)?)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn reads_a_users_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("users.json");
    std::fs::write(
      &path,
      r#"[{"id": "idp-1", "email": "alice@example.com"}]"#,
    )
    .unwrap();

    let users = FileIdentityProvider::new(path).get_users().await.unwrap();
    assert_eq!(users, vec![IdpUser {
      id:    "idp-1".into(),
      email: "alice@example.com".into(),
    }]);
  }

  #[tokio::test]
  async fn malformed_json_is_a_typed_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("users.json");
    std::fs::write(&path, "not json").unwrap();

    let err = FileIdentityProvider::new(path).get_users().await.unwrap_err();
    assert!(matches!(err, IdpError::Json(_)));
  }
}
