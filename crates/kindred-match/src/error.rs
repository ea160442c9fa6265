//! Error type for `kindred-match`.

use thiserror::Error;

type BoxedError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] kindred_core::Error),

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("store error: {0}")]
  Store(BoxedError),

  #[error("object store error: {0}")]
  ObjectStore(BoxedError),

  #[error("linkage engine error: {0}")]
  Engine(String),

  #[error("csv error: {0}")]
  Csv(#[from] csv::Error),

  #[error("csv error at line {line}: {message}")]
  CsvField { line: u64, message: String },
}

impl Error {
  pub fn store(e: impl std::error::Error + Send + Sync + 'static) -> Self {
    Self::Store(Box::new(e))
  }

  pub fn object_store(
    e: impl std::error::Error + Send + Sync + 'static,
  ) -> Self {
    Self::ObjectStore(Box::new(e))
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
