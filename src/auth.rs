//! Resolves `Authorization: Bearer <token>` to an owner id.
//!
//! `SupabaseAuth` asks the identity provider (`/auth/v1/user`); `StaticTokenAuth`
//! serves local runs from tokens listed in the TOML config.

use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use axum::{
  extract::FromRequestParts,
  http::{header::AUTHORIZATION, request::Parts},
};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::{DevToken, SupabaseSettings};
use crate::error::AppError;
use crate::state::AppState;

#[async_trait]
pub trait AuthProvider: Send + Sync {
  /// Owner id for a valid token, None for an unknown/expired one.
  async fn resolve(&self, token: &str) -> Result<Option<String>, AppError>;
}

pub struct StaticTokenAuth {
  tokens: HashMap<String, String>,
}

impl StaticTokenAuth {
  pub fn new(tokens: &[DevToken]) -> Self {
    Self {
      tokens: tokens.iter().map(|t| (t.token.clone(), t.user_id.clone())).collect(),
    }
  }

  pub fn len(&self) -> usize {
    self.tokens.len()
  }

  pub fn is_empty(&self) -> bool {
    self.tokens.is_empty()
  }
}

#[async_trait]
impl AuthProvider for StaticTokenAuth {
  async fn resolve(&self, token: &str) -> Result<Option<String>, AppError> {
    Ok(self.tokens.get(token).cloned())
  }
}

pub struct SupabaseAuth {
  client: reqwest::Client,
  url: String,
  anon_key: String,
}

impl SupabaseAuth {
  pub fn new(settings: &SupabaseSettings) -> Result<Self, reqwest::Error> {
    let client = reqwest::Client::builder().timeout(Duration::from_secs(10)).build()?;
    Ok(Self { client, url: format!("{}/auth/v1/user", settings.url), anon_key: settings.anon_key.clone() })
  }
}

#[async_trait]
impl AuthProvider for SupabaseAuth {
  async fn resolve(&self, token: &str) -> Result<Option<String>, AppError> {
    #[derive(Deserialize)]
    struct User {
      id: String,
    }

    let res = self
      .client
      .get(&self.url)
      .header("apikey", &self.anon_key)
      .header(reqwest::header::AUTHORIZATION, format!("Bearer {}", token))
      .send()
      .await
      .map_err(|e| AppError::Internal(format!("auth request failed: {e}")))?;

    let status = res.status();
    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
      return Ok(None);
    }
    if !status.is_success() {
      return Err(AppError::Internal(format!("auth provider HTTP {}", status)));
    }
    let user: User = res
      .json()
      .await
      .map_err(|e| AppError::Internal(format!("auth provider returned an unexpected payload: {e}")))?;
    Ok(Some(user.id))
  }
}

fn bearer_token(parts: &Parts) -> Option<&str> {
  let value = parts.headers.get(AUTHORIZATION)?.to_str().ok()?;
  let token = value.strip_prefix("Bearer ").or_else(|| value.strip_prefix("bearer "))?.trim();
  if token.is_empty() { None } else { Some(token) }
}

/// Authenticated owner id. Rejects with 401 before any body is read.
#[derive(Clone, Debug)]
pub struct Owner(pub String);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for Owner {
  type Rejection = AppError;

  async fn from_request_parts(parts: &mut Parts, state: &Arc<AppState>) -> Result<Self, Self::Rejection> {
    let Some(token) = bearer_token(parts) else {
      debug!(target: "kotoba_backend", "Missing bearer token");
      return Err(AppError::Unauthorized);
    };
    match state.auth.resolve(token).await? {
      Some(id) => Ok(Owner(id)),
      None => {
        warn!(target: "kotoba_backend", "Rejected unknown bearer token");
        Err(AppError::Unauthorized)
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use axum::http::Request;

  #[tokio::test]
  async fn static_tokens_resolve() {
    let auth = StaticTokenAuth::new(&[DevToken { token: "t".into(), user_id: "u".into() }]);
    assert_eq!(auth.resolve("t").await.unwrap().as_deref(), Some("u"));
    assert_eq!(auth.resolve("nope").await.unwrap(), None);
    assert_eq!(auth.len(), 1);
  }

  #[test]
  fn bearer_header_parsing() {
    let (parts, _) = Request::builder().header("authorization", "Bearer abc ").body(()).unwrap().into_parts();
    assert_eq!(bearer_token(&parts), Some("abc"));

    let (parts, _) = Request::builder().header("authorization", "Basic abc").body(()).unwrap().into_parts();
    assert_eq!(bearer_token(&parts), None);

    let (parts, _) = Request::builder().body(()).unwrap().into_parts();
    assert_eq!(bearer_token(&parts), None);
  }
}
