//! Users and the identity-provider seam.
//!
//! Authentication happens outside this system. The core only needs a stable
//! local user row for audit attribution, keyed by the external identity
//! provider's user id.

use std::future::Future;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ─── User ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
  Admin,
  Member,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
  pub user_id:     i64,
  pub created:     DateTime<Utc>,
  /// The identity provider's user id. Unique; practically a UUID but treated
  /// as opaque text.
  pub idp_user_id: String,
  pub role:        UserRole,
}

/// Input to [`crate::store::MatchStore::add_user`].
#[derive(Debug, Clone)]
pub struct NewUser {
  pub idp_user_id: String,
  pub role:        UserRole,
}

// ─── Identity provider ───────────────────────────────────────────────────────

/// A user as known to the external identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdpUser {
  pub id:    String,
  pub email: String,
}

/// Flat capability interface over whatever identity backend is configured.
/// Implementations are swapped by configuration, not subclassing.
pub trait IdentityProvider: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  fn get_users(
    &self,
  ) -> impl Future<Output = Result<Vec<IdpUser>, Self::Error>> + Send + '_;
}
