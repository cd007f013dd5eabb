//! Test doubles: a scripted completion backend and a store that fails on demand.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::auth::StaticTokenAuth;
use crate::config::{DevToken, Prompts};
use crate::domain::{
  JlptLevel, NewPracticeAttempt, NewPracticeProblem, NewPracticeSession, NewVocabItem, NewVocabList,
  PracticeAttempt, PracticeProblem, PracticeSession, VocabItem, VocabList,
};
use crate::error::{CompletionError, StoreError};
use crate::models::{ModelChoice, ModelPolicy};
use crate::openai::{ChatMessage, CompletionBackend, StructuredClient};
use crate::state::AppState;
use crate::store::{ItemRef, MemoryStore, Store};

type Scripted = Result<Option<String>, CompletionError>;

/// Completion backend that replays queued replies per model and records calls.
#[derive(Default)]
pub struct StubBackend {
  replies: Mutex<HashMap<String, VecDeque<Scripted>>>,
  calls: Mutex<Vec<(String, Vec<ChatMessage>)>>,
}

impl StubBackend {
  pub fn new() -> Self {
    Self::default()
  }

  fn push(self, model: &str, reply: Scripted) -> Self {
    self.replies.lock().unwrap().entry(model.to_string()).or_default().push_back(reply);
    self
  }

  pub fn reply(self, model: &str, content: &str) -> Self {
    self.push(model, Ok(Some(content.to_string())))
  }

  pub fn no_content(self, model: &str) -> Self {
    self.push(model, Ok(None))
  }

  pub fn fail(self, model: &str, message: &str) -> Self {
    self.push(model, Err(CompletionError::Http { status: 500, message: message.to_string() }))
  }

  /// Models called, in order.
  pub fn calls(&self) -> Vec<String> {
    self.calls.lock().unwrap().iter().map(|(m, _)| m.clone()).collect()
  }

  pub fn requests(&self) -> Vec<(String, Vec<ChatMessage>)> {
    self.calls.lock().unwrap().clone()
  }
}

#[async_trait]
impl CompletionBackend for StubBackend {
  async fn complete(&self, model: &str, messages: &[ChatMessage]) -> Result<Option<String>, CompletionError> {
    self.calls.lock().unwrap().push((model.to_string(), messages.to_vec()));
    self
      .replies
      .lock()
      .unwrap()
      .get_mut(model)
      .and_then(VecDeque::pop_front)
      .unwrap_or_else(|| Err(CompletionError::Transport(format!("no scripted reply for model {model}"))))
  }
}

/// `MemoryStore` that rejects one named operation.
pub struct FlakyStore {
  pub inner: MemoryStore,
  fail_on: &'static str,
  cleanup_fails: bool,
}

impl FlakyStore {
  pub fn failing(fail_on: &'static str) -> Self {
    Self { inner: MemoryStore::new(), fail_on, cleanup_fails: false }
  }

  /// Also fail `delete_lists`, to observe that cleanup errors do not mask the original one.
  pub fn with_failing_cleanup(mut self) -> Self {
    self.cleanup_fails = true;
    self
  }

  fn check(&self, op: &str) -> Result<(), StoreError> {
    if op == self.fail_on || (op == "delete_lists" && self.cleanup_fails) {
      Err(StoreError::Rejected(format!("injected failure in {op}")))
    } else {
      Ok(())
    }
  }
}

#[async_trait]
impl Store for FlakyStore {
  async fn insert_list(&self, list: NewVocabList) -> Result<String, StoreError> {
    self.check("insert_list")?;
    self.inner.insert_list(list).await
  }

  async fn get_list(&self, owner: &str, list_id: &str) -> Result<Option<VocabList>, StoreError> {
    self.check("get_list")?;
    self.inner.get_list(owner, list_id).await
  }

  async fn delete_lists(&self, owner: &str, list_ids: &[String]) -> Result<(), StoreError> {
    self.check("delete_lists")?;
    self.inner.delete_lists(owner, list_ids).await
  }

  async fn lists(&self, owner: &str) -> Result<Vec<VocabList>, StoreError> {
    self.check("lists")?;
    self.inner.lists(owner).await
  }

  async fn insert_item(&self, item: NewVocabItem) -> Result<String, StoreError> {
    self.check("insert_item")?;
    self.inner.insert_item(item).await
  }

  async fn insert_items(&self, items: Vec<NewVocabItem>) -> Result<(), StoreError> {
    self.check("insert_items")?;
    self.inner.insert_items(items).await
  }

  async fn count_items(&self, owner: &str, list_id: &str, active_only: bool) -> Result<usize, StoreError> {
    self.check("count_items")?;
    self.inner.count_items(owner, list_id, active_only).await
  }

  async fn items_by_surface(&self, owner: &str, list_id: &str, surfaces: &[String]) -> Result<Vec<ItemRef>, StoreError> {
    self.check("items_by_surface")?;
    self.inner.items_by_surface(owner, list_id, surfaces).await
  }

  async fn active_items(&self, owner: &str, list_id: &str, limit: usize) -> Result<Vec<VocabItem>, StoreError> {
    self.check("active_items")?;
    self.inner.active_items(owner, list_id, limit).await
  }

  async fn items(&self, owner: &str, list_id: &str) -> Result<Vec<VocabItem>, StoreError> {
    self.check("items")?;
    self.inner.items(owner, list_id).await
  }

  async fn set_item_active(&self, owner: &str, list_id: &str, item_id: &str, active: bool) -> Result<bool, StoreError> {
    self.check("set_item_active")?;
    self.inner.set_item_active(owner, list_id, item_id, active).await
  }

  async fn delete_items(&self, owner: &str, list_id: &str, item_ids: &[String]) -> Result<(), StoreError> {
    self.check("delete_items")?;
    self.inner.delete_items(owner, list_id, item_ids).await
  }

  async fn jlpt_level(&self, owner: &str) -> Result<Option<JlptLevel>, StoreError> {
    self.check("jlpt_level")?;
    self.inner.jlpt_level(owner).await
  }

  async fn set_jlpt_level(&self, owner: &str, level: JlptLevel) -> Result<(), StoreError> {
    self.check("set_jlpt_level")?;
    self.inner.set_jlpt_level(owner, level).await
  }

  async fn insert_session(&self, session: NewPracticeSession) -> Result<String, StoreError> {
    self.check("insert_session")?;
    self.inner.insert_session(session).await
  }

  async fn get_session(&self, owner: &str, session_id: &str) -> Result<Option<PracticeSession>, StoreError> {
    self.check("get_session")?;
    self.inner.get_session(owner, session_id).await
  }

  async fn insert_problems(&self, problems: Vec<NewPracticeProblem>) -> Result<(), StoreError> {
    self.check("insert_problems")?;
    self.inner.insert_problems(problems).await
  }

  async fn get_problem(&self, owner: &str, problem_id: &str) -> Result<Option<PracticeProblem>, StoreError> {
    self.check("get_problem")?;
    self.inner.get_problem(owner, problem_id).await
  }

  async fn session_problems(&self, owner: &str, session_id: &str) -> Result<Vec<PracticeProblem>, StoreError> {
    self.check("session_problems")?;
    self.inner.session_problems(owner, session_id).await
  }

  async fn insert_attempt(&self, attempt: NewPracticeAttempt) -> Result<String, StoreError> {
    self.check("insert_attempt")?;
    self.inner.insert_attempt(attempt).await
  }

  async fn attempts_for(&self, owner: &str, problem_ids: &[String]) -> Result<Vec<PracticeAttempt>, StoreError> {
    self.check("attempts_for")?;
    self.inner.attempts_for(owner, problem_ids).await
  }

  async fn delete_attempts(&self, owner: &str, problem_ids: &[String]) -> Result<(), StoreError> {
    self.check("delete_attempts")?;
    self.inner.delete_attempts(owner, problem_ids).await
  }
}

pub const OWNER: &str = "user-1";
pub const TOKEN: &str = "test-token";

/// Model policy with distinct primary/fallback ids so call order is observable.
pub fn test_policy() -> ModelPolicy {
  let mut policy = ModelPolicy::default();
  policy.generate = ModelChoice::new("gen-primary", Some("gen-fallback"));
  policy.autofill = ModelChoice::new("fill-primary", Some("fill-fallback"));
  policy
}

/// App state over the given store and stub, with `TOKEN` resolving to `OWNER`.
pub fn test_state(store: Arc<dyn Store>, backend: Arc<StubBackend>, policy: ModelPolicy) -> Arc<AppState> {
  Arc::new(AppState {
    store,
    llm: StructuredClient::new(backend, false),
    models: policy,
    prompts: Prompts::default(),
    auth: Arc::new(StaticTokenAuth::new(&[DevToken { token: TOKEN.into(), user_id: OWNER.into() }])),
  })
}

/// Inserts a manual list holding `surfaces` (oldest first); returns the list id.
pub async fn seed_list(store: &dyn Store, owner: &str, surfaces: &[&str]) -> String {
  let list_id = store
    .insert_list(NewVocabList {
      user_id: owner.into(),
      name: "테스트".into(),
      kind: crate::domain::ListKind::Manual,
      scenario_prompt: None,
    })
    .await
    .unwrap();
  for s in surfaces {
    store
      .insert_item(NewVocabItem {
        user_id: owner.into(),
        list_id: list_id.clone(),
        ja_surface: s.to_string(),
        ja_reading_hira: None,
        ko_meaning: format!("{s} 뜻"),
        memo: None,
        is_active: true,
      })
      .await
      .unwrap();
  }
  list_id
}
