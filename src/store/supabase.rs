//! Supabase (PostgREST) store over reqwest.
//!
//! Uses the service-role key, so row-level security is bypassed and every
//! query carries an explicit `user_id=eq.<owner>` filter instead.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, instrument};

use super::{ItemRef, Store};
use crate::config::SupabaseSettings;
use crate::domain::{
  JlptLevel, NewPracticeAttempt, NewPracticeProblem, NewPracticeSession, NewVocabItem, NewVocabList,
  PracticeAttempt, PracticeProblem, PracticeSession, VocabItem, VocabList,
};
use crate::error::StoreError;

const LISTS: &str = "vocab_lists";
const ITEMS: &str = "vocab_items";
const SESSIONS: &str = "practice_sessions";
const PROBLEMS: &str = "practice_problems";
const ATTEMPTS: &str = "practice_attempts";
const SETTINGS: &str = "user_settings";

#[derive(Clone)]
pub struct SupabaseStore {
  client: reqwest::Client,
  rest_url: String,
}

#[derive(Deserialize)]
struct IdRow {
  id: String,
}

#[derive(Deserialize)]
struct SettingsRow {
  #[serde(default)]
  jlpt_level: Option<String>,
}

type Query = Vec<(&'static str, String)>;

fn eq(v: &str) -> String {
  format!("eq.{}", v)
}

/// PostgREST `in.(...)` filter with every value double-quoted.
fn in_list(values: &[String]) -> String {
  let quoted: Vec<String> = values
    .iter()
    .map(|v| format!("\"{}\"", v.replace('\\', "\\\\").replace('"', "\\\"")))
    .collect();
  format!("in.({})", quoted.join(","))
}

/// Total from a `Content-Range` header such as `0-9/42` or `*/0`.
fn content_range_total(header: &str) -> Option<usize> {
  header.rsplit('/').next()?.trim().parse().ok()
}

impl SupabaseStore {
  pub fn new(settings: &SupabaseSettings) -> Result<Self, StoreError> {
    let mut headers = HeaderMap::new();
    let key = HeaderValue::from_str(&settings.service_role_key)
      .map_err(|e| StoreError::Rejected(format!("invalid service role key: {e}")))?;
    let bearer = HeaderValue::from_str(&format!("Bearer {}", settings.service_role_key))
      .map_err(|e| StoreError::Rejected(format!("invalid service role key: {e}")))?;
    headers.insert("apikey", key);
    headers.insert(reqwest::header::AUTHORIZATION, bearer);
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

    let client = reqwest::Client::builder()
      .default_headers(headers)
      .timeout(Duration::from_secs(15))
      .build()?;
    Ok(Self { client, rest_url: format!("{}/rest/v1", settings.url) })
  }

  fn url(&self, table: &str) -> String {
    format!("{}/{}", self.rest_url, table)
  }

  async fn check(res: reqwest::Response) -> Result<reqwest::Response, StoreError> {
    if res.status().is_success() {
      return Ok(res);
    }
    #[derive(Deserialize)]
    struct PgError {
      message: String,
    }
    let status = res.status().as_u16();
    let body = res.text().await.unwrap_or_default();
    let message = serde_json::from_str::<PgError>(&body).map(|e| e.message).unwrap_or(body);
    Err(StoreError::Http { status, message })
  }

  #[instrument(level = "debug", skip_all, fields(%table))]
  async fn select<T: DeserializeOwned>(&self, table: &str, query: Query) -> Result<Vec<T>, StoreError> {
    let res = self.client.get(self.url(table)).query(&query).send().await?;
    let res = Self::check(res).await?;
    res.json::<Vec<T>>().await.map_err(|e| StoreError::Decode(e.to_string()))
  }

  #[instrument(level = "debug", skip_all, fields(%table))]
  async fn insert_returning_id<B: Serialize + ?Sized>(&self, table: &str, body: &B) -> Result<String, StoreError> {
    let res = self
      .client
      .post(self.url(table))
      .query(&[("select", "id")])
      .header("Prefer", "return=representation")
      .json(body)
      .send()
      .await?;
    let rows: Vec<IdRow> = Self::check(res)
      .await?
      .json()
      .await
      .map_err(|e| StoreError::Decode(e.to_string()))?;
    rows
      .into_iter()
      .next()
      .map(|r| r.id)
      .ok_or_else(|| StoreError::Decode(format!("insert into {table} returned no row")))
  }

  #[instrument(level = "debug", skip_all, fields(%table))]
  async fn insert_minimal<B: Serialize + ?Sized>(&self, table: &str, body: &B, prefer: &str) -> Result<(), StoreError> {
    let res = self
      .client
      .post(self.url(table))
      .header("Prefer", prefer)
      .json(body)
      .send()
      .await?;
    Self::check(res).await.map(|_| ())
  }

  /// PATCH matching rows; returns how many were updated.
  #[instrument(level = "debug", skip_all, fields(%table))]
  async fn update<B: Serialize + ?Sized>(&self, table: &str, mut query: Query, body: &B) -> Result<usize, StoreError> {
    query.push(("select", "id".into()));
    let res = self
      .client
      .patch(self.url(table))
      .query(&query)
      .header("Prefer", "return=representation")
      .json(body)
      .send()
      .await?;
    let rows: Vec<IdRow> = Self::check(res)
      .await?
      .json()
      .await
      .map_err(|e| StoreError::Decode(e.to_string()))?;
    Ok(rows.len())
  }

  #[instrument(level = "debug", skip_all, fields(%table))]
  async fn delete(&self, table: &str, query: Query) -> Result<(), StoreError> {
    let res = self.client.delete(self.url(table)).query(&query).send().await?;
    Self::check(res).await.map(|_| ())
  }
}

#[async_trait]
impl Store for SupabaseStore {
  async fn insert_list(&self, list: NewVocabList) -> Result<String, StoreError> {
    self.insert_returning_id(LISTS, &list).await
  }

  async fn get_list(&self, owner: &str, list_id: &str) -> Result<Option<VocabList>, StoreError> {
    let rows: Vec<VocabList> = self
      .select(LISTS, vec![("select", "*".into()), ("id", eq(list_id)), ("user_id", eq(owner))])
      .await?;
    Ok(rows.into_iter().next())
  }

  async fn delete_lists(&self, owner: &str, list_ids: &[String]) -> Result<(), StoreError> {
    if list_ids.is_empty() {
      return Ok(());
    }
    self.delete(LISTS, vec![("id", in_list(list_ids)), ("user_id", eq(owner))]).await
  }

  async fn lists(&self, owner: &str) -> Result<Vec<VocabList>, StoreError> {
    self
      .select(LISTS, vec![("select", "*".into()), ("user_id", eq(owner)), ("order", "created_at.desc".into())])
      .await
  }

  async fn insert_item(&self, item: NewVocabItem) -> Result<String, StoreError> {
    self.insert_returning_id(ITEMS, &item).await
  }

  async fn insert_items(&self, items: Vec<NewVocabItem>) -> Result<(), StoreError> {
    if items.is_empty() {
      return Ok(());
    }
    self.insert_minimal(ITEMS, &items, "return=minimal").await
  }

  async fn count_items(&self, owner: &str, list_id: &str, active_only: bool) -> Result<usize, StoreError> {
    let mut query: Query = vec![("select", "id".into()), ("list_id", eq(list_id)), ("user_id", eq(owner))];
    if active_only {
      query.push(("is_active", "eq.true".into()));
    }
    let res = self
      .client
      .head(self.url(ITEMS))
      .query(&query)
      .header("Prefer", "count=exact")
      .send()
      .await?;
    let res = Self::check(res).await?;
    let total = res
      .headers()
      .get("content-range")
      .and_then(|v| v.to_str().ok())
      .and_then(content_range_total)
      .ok_or_else(|| StoreError::Decode("missing Content-Range count".into()))?;
    debug!(%list_id, total, "Counted items");
    Ok(total)
  }

  async fn items_by_surface(&self, owner: &str, list_id: &str, surfaces: &[String]) -> Result<Vec<ItemRef>, StoreError> {
    if surfaces.is_empty() {
      return Ok(Vec::new());
    }
    self
      .select(
        ITEMS,
        vec![
          ("select", "id,ja_surface".into()),
          ("list_id", eq(list_id)),
          ("user_id", eq(owner)),
          ("ja_surface", in_list(surfaces)),
        ],
      )
      .await
  }

  async fn active_items(&self, owner: &str, list_id: &str, limit: usize) -> Result<Vec<VocabItem>, StoreError> {
    self
      .select(
        ITEMS,
        vec![
          ("select", "*".into()),
          ("list_id", eq(list_id)),
          ("user_id", eq(owner)),
          ("is_active", "eq.true".into()),
          ("order", "created_at.desc".into()),
          ("limit", limit.to_string()),
        ],
      )
      .await
  }

  async fn items(&self, owner: &str, list_id: &str) -> Result<Vec<VocabItem>, StoreError> {
    self
      .select(
        ITEMS,
        vec![
          ("select", "*".into()),
          ("list_id", eq(list_id)),
          ("user_id", eq(owner)),
          ("order", "created_at.desc".into()),
        ],
      )
      .await
  }

  async fn set_item_active(&self, owner: &str, list_id: &str, item_id: &str, active: bool) -> Result<bool, StoreError> {
    #[derive(Serialize)]
    struct Patch {
      is_active: bool,
    }
    let updated = self
      .update(
        ITEMS,
        vec![("id", eq(item_id)), ("list_id", eq(list_id)), ("user_id", eq(owner))],
        &Patch { is_active: active },
      )
      .await?;
    Ok(updated > 0)
  }

  async fn delete_items(&self, owner: &str, list_id: &str, item_ids: &[String]) -> Result<(), StoreError> {
    if item_ids.is_empty() {
      return Ok(());
    }
    self
      .delete(ITEMS, vec![("id", in_list(item_ids)), ("list_id", eq(list_id)), ("user_id", eq(owner))])
      .await
  }

  async fn jlpt_level(&self, owner: &str) -> Result<Option<JlptLevel>, StoreError> {
    let rows: Vec<SettingsRow> = self
      .select(SETTINGS, vec![("select", "jlpt_level".into()), ("user_id", eq(owner))])
      .await?;
    Ok(rows.into_iter().next().and_then(|r| r.jlpt_level).as_deref().and_then(JlptLevel::parse))
  }

  async fn set_jlpt_level(&self, owner: &str, level: JlptLevel) -> Result<(), StoreError> {
    #[derive(Serialize)]
    struct Upsert<'a> {
      user_id: &'a str,
      jlpt_level: JlptLevel,
    }
    let url = format!("{}?on_conflict=user_id", self.url(SETTINGS));
    let res = self
      .client
      .post(url)
      .header("Prefer", "resolution=merge-duplicates,return=minimal")
      .json(&Upsert { user_id: owner, jlpt_level: level })
      .send()
      .await?;
    Self::check(res).await.map(|_| ())
  }

  async fn insert_session(&self, session: NewPracticeSession) -> Result<String, StoreError> {
    self.insert_returning_id(SESSIONS, &session).await
  }

  async fn get_session(&self, owner: &str, session_id: &str) -> Result<Option<PracticeSession>, StoreError> {
    let rows: Vec<PracticeSession> = self
      .select(SESSIONS, vec![("select", "*".into()), ("id", eq(session_id)), ("user_id", eq(owner))])
      .await?;
    Ok(rows.into_iter().next())
  }

  async fn insert_problems(&self, problems: Vec<NewPracticeProblem>) -> Result<(), StoreError> {
    if problems.is_empty() {
      return Ok(());
    }
    self.insert_minimal(PROBLEMS, &problems, "return=minimal").await
  }

  async fn get_problem(&self, owner: &str, problem_id: &str) -> Result<Option<PracticeProblem>, StoreError> {
    let rows: Vec<PracticeProblem> = self
      .select(PROBLEMS, vec![("select", "*".into()), ("id", eq(problem_id)), ("user_id", eq(owner))])
      .await?;
    Ok(rows.into_iter().next())
  }

  async fn session_problems(&self, owner: &str, session_id: &str) -> Result<Vec<PracticeProblem>, StoreError> {
    self
      .select(
        PROBLEMS,
        vec![
          ("select", "*".into()),
          ("session_id", eq(session_id)),
          ("user_id", eq(owner)),
          ("order", "created_at.asc".into()),
        ],
      )
      .await
  }

  async fn insert_attempt(&self, attempt: NewPracticeAttempt) -> Result<String, StoreError> {
    self.insert_returning_id(ATTEMPTS, &attempt).await
  }

  async fn attempts_for(&self, owner: &str, problem_ids: &[String]) -> Result<Vec<PracticeAttempt>, StoreError> {
    if problem_ids.is_empty() {
      return Ok(Vec::new());
    }
    self
      .select(
        ATTEMPTS,
        vec![
          ("select", "*".into()),
          ("problem_id", in_list(problem_ids)),
          ("user_id", eq(owner)),
          ("order", "created_at.desc,id.desc".into()),
        ],
      )
      .await
  }

  async fn delete_attempts(&self, owner: &str, problem_ids: &[String]) -> Result<(), StoreError> {
    if problem_ids.is_empty() {
      return Ok(());
    }
    self
      .delete(ATTEMPTS, vec![("problem_id", in_list(problem_ids)), ("user_id", eq(owner))])
      .await
  }
}
