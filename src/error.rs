//! Error types: completion client failures, store failures, and the
//! application-level taxonomy that maps onto HTTP statuses.

use axum::{
  http::StatusCode,
  response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::{error, warn};

/// Failures of a single structured completion call.
#[derive(Debug, Error)]
pub enum CompletionError {
  #[error("OpenAI HTTP {status}: {message}")]
  Http { status: u16, message: String },

  #[error("OpenAI request failed: {0}")]
  Transport(String),

  #[error("Empty OpenAI response")]
  EmptyResponse,

  /// `detail` is empty unless raw diagnostics are enabled.
  #[error("OpenAI returned non-JSON{detail}")]
  NonJsonResponse { detail: String },

  #[error("OpenAI response schema mismatch. {summary}.{detail}")]
  SchemaMismatch { summary: String, detail: String },
}

/// Failures reported by the persistence gateway.
#[derive(Debug, Error)]
pub enum StoreError {
  #[error("store HTTP {status}: {message}")]
  Http { status: u16, message: String },

  #[error("store request failed: {0}")]
  Transport(String),

  #[error("store returned an unexpected payload: {0}")]
  Decode(String),

  #[error("{0}")]
  Rejected(String),
}

impl From<reqwest::Error> for StoreError {
  fn from(e: reqwest::Error) -> Self {
    StoreError::Transport(e.to_string())
  }
}

#[derive(Debug, Error)]
pub enum AppError {
  #[error("{0}")]
  BadRequest(String),

  #[error("Unauthorized")]
  Unauthorized,

  #[error("{0}")]
  NotFound(String),

  /// Completion backend failed after the fallback model was tried (or none was configured).
  #[error(transparent)]
  Upstream(#[from] CompletionError),

  /// Syntactically valid reply whose content failed a post-normalization gate.
  #[error("{0}")]
  SchemaMismatch(String),

  /// Internal inconsistency while mapping synthetic keys to stored ids.
  #[error("{0}")]
  Mapping(String),

  #[error("저장할 단어를 만들지 못했어요.")]
  NoVocabulary,

  #[error(transparent)]
  Store(#[from] StoreError),

  #[error("{0}")]
  Internal(String),

  /// Another failure reported under a leading message; keeps the inner status.
  #[error("{prefix}{source}")]
  Context {
    prefix: &'static str,
    #[source]
    source: Box<AppError>,
  },
}

impl AppError {
  pub fn status(&self) -> StatusCode {
    match self {
      AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
      AppError::Unauthorized => StatusCode::UNAUTHORIZED,
      AppError::NotFound(_) => StatusCode::NOT_FOUND,
      AppError::Upstream(_) | AppError::SchemaMismatch(_) => StatusCode::BAD_GATEWAY,
      AppError::Mapping(_) | AppError::NoVocabulary | AppError::Store(_) | AppError::Internal(_) => {
        StatusCode::INTERNAL_SERVER_ERROR
      }
      AppError::Context { source, .. } => source.status(),
    }
  }

  pub fn context(self, prefix: &'static str) -> Self {
    AppError::Context { prefix, source: Box::new(self) }
  }

  /// Collapse any failure into a 500 carrying the same message.
  /// Used by endpoints that report every pipeline failure uniformly.
  pub fn into_internal(self) -> Self {
    match self {
      AppError::BadRequest(_) | AppError::Unauthorized | AppError::Internal(_) => self,
      other => AppError::Internal(other.to_string()),
    }
  }
}

impl IntoResponse for AppError {
  fn into_response(self) -> Response {
    let status = self.status();
    let message = self.to_string();
    if status.is_server_error() {
      error!(target: "kotoba_backend", %status, error = %message, "request failed");
    } else {
      warn!(target: "kotoba_backend", %status, error = %message, "request rejected");
    }
    (status, message).into_response()
  }
}
