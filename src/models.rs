//! Model policy: per-task primary and fallback model ids, plus the
//! "primary, then fallback once" runner every orchestrator uses.

use std::fmt::Display;
use std::future::Future;

use serde::Deserialize;
use tracing::{error, info, warn};

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct ModelChoice {
  pub model: String,
  #[serde(default)]
  pub fallback_model: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct GradeModelChoice {
  #[serde(flatten)]
  pub choice: ModelChoice,
  #[serde(default = "default_true")]
  pub fallback_on_needs_fix: bool,
}

fn default_true() -> bool {
  true
}

/// Model ids per task. Defaults are constants; TOML `[models.*]` tables override them.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ModelPolicy {
  pub generate: ModelChoice,
  pub autofill: ModelChoice,
  pub grade: GradeModelChoice,
  pub tts: ModelChoice,
}

impl Default for ModelPolicy {
  fn default() -> Self {
    Self {
      generate: ModelChoice::new("gpt-5-mini", Some("gpt-5-mini")),
      autofill: ModelChoice::new("gpt-5-nano", Some("gpt-5-mini")),
      grade: GradeModelChoice {
        choice: ModelChoice::new("gpt-5-nano", Some("gpt-5-mini")),
        fallback_on_needs_fix: true,
      },
      tts: ModelChoice::new("gpt-4o-mini-tts", Some("gpt-4o-mini-tts")),
    }
  }
}

impl ModelChoice {
  pub fn new(model: &str, fallback_model: Option<&str>) -> Self {
    Self { model: model.to_string(), fallback_model: fallback_model.map(String::from) }
  }

  /// The fallback model, only if it is set and differs from the primary.
  pub fn distinct_fallback(&self) -> Option<&str> {
    self
      .fallback_model
      .as_deref()
      .map(str::trim)
      .filter(|f| !f.is_empty() && *f != self.model)
  }

  /// Run `call` with the primary model; on failure retry exactly once with a
  /// distinct fallback model. When both fail, the primary's error is returned.
  pub async fn run<T, E, F, Fut>(&self, task: &str, mut call: F) -> Result<T, E>
  where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
  {
    match call(self.model.clone()).await {
      Ok(v) => Ok(v),
      Err(e) => match self.distinct_fallback() {
        Some(fallback) => {
          warn!(target: "pipeline", %task, model = %self.model, %fallback, error = %e, "Primary model failed; retrying with fallback");
          match call(fallback.to_string()).await {
            Ok(v) => {
              info!(target: "pipeline", %task, %fallback, "Fallback model succeeded");
              Ok(v)
            }
            Err(e2) => {
              error!(target: "pipeline", %task, %fallback, error = %e2, "Fallback model failed");
              Err(e)
            }
          }
        }
        None => {
          error!(target: "pipeline", %task, model = %self.model, error = %e, "Model failed; no distinct fallback configured");
          Err(e)
        }
      },
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::Mutex;

  #[test]
  fn distinct_fallback_ignores_same_or_blank() {
    assert_eq!(ModelChoice::new("a", Some("a")).distinct_fallback(), None);
    assert_eq!(ModelChoice::new("a", Some(" ")).distinct_fallback(), None);
    assert_eq!(ModelChoice::new("a", None).distinct_fallback(), None);
    assert_eq!(ModelChoice::new("a", Some("b")).distinct_fallback(), Some("b"));
  }

  #[tokio::test]
  async fn run_retries_once_with_fallback() {
    let calls = Mutex::new(Vec::new());
    let choice = ModelChoice::new("primary", Some("backup"));
    let out: Result<String, String> = choice
      .run("test", |m| {
        calls.lock().unwrap().push(m.clone());
        async move { if m == "primary" { Err("boom".to_string()) } else { Ok(m) } }
      })
      .await;
    assert_eq!(out.unwrap(), "backup");
    assert_eq!(*calls.lock().unwrap(), vec!["primary", "backup"]);
  }

  #[tokio::test]
  async fn run_without_distinct_fallback_fails_after_one_call() {
    let calls = Mutex::new(0);
    let choice = ModelChoice::new("same", Some("same"));
    let out: Result<(), String> = choice
      .run("test", |_| {
        *calls.lock().unwrap() += 1;
        async { Err("boom".to_string()) }
      })
      .await;
    assert_eq!(out.unwrap_err(), "boom");
    assert_eq!(*calls.lock().unwrap(), 1);
  }

  #[tokio::test]
  async fn run_returns_primary_error_when_both_fail() {
    let choice = ModelChoice::new("a", Some("b"));
    let out: Result<(), String> = choice.run("test", |m| async move { Err(format!("{m} failed")) }).await;
    assert_eq!(out.unwrap_err(), "a failed");
  }
}
