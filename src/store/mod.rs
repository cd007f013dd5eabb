//! Persistence gateway: owner-scoped table operations over the relational store.
//!
//! Every read and delete filters by owner id. Deleting a list cascades to its
//! items, sessions, problems and attempts.

use async_trait::async_trait;

use crate::domain::{
  JlptLevel, NewPracticeAttempt, NewPracticeProblem, NewPracticeSession, NewVocabItem, NewVocabList,
  PracticeAttempt, PracticeProblem, PracticeSession, VocabItem, VocabList,
};
use crate::error::StoreError;

pub mod memory;
pub mod supabase;

pub use memory::MemoryStore;
pub use supabase::SupabaseStore;

/// Id and surface of a stored item, used to map surfaces back to ids.
#[derive(Clone, Debug, PartialEq, Eq, serde::Deserialize)]
pub struct ItemRef {
  pub id: String,
  pub ja_surface: String,
}

#[async_trait]
pub trait Store: Send + Sync {
  async fn insert_list(&self, list: NewVocabList) -> Result<String, StoreError>;
  async fn get_list(&self, owner: &str, list_id: &str) -> Result<Option<VocabList>, StoreError>;
  async fn delete_lists(&self, owner: &str, list_ids: &[String]) -> Result<(), StoreError>;
  /// Owner's lists, most recently created first.
  async fn lists(&self, owner: &str) -> Result<Vec<VocabList>, StoreError>;

  async fn insert_item(&self, item: NewVocabItem) -> Result<String, StoreError>;
  /// Bulk insert; ids are not echoed back.
  async fn insert_items(&self, items: Vec<NewVocabItem>) -> Result<(), StoreError>;
  async fn count_items(&self, owner: &str, list_id: &str, active_only: bool) -> Result<usize, StoreError>;
  async fn items_by_surface(&self, owner: &str, list_id: &str, surfaces: &[String]) -> Result<Vec<ItemRef>, StoreError>;
  /// Active items of a list, most recently created first.
  async fn active_items(&self, owner: &str, list_id: &str, limit: usize) -> Result<Vec<VocabItem>, StoreError>;
  /// Every item of a list, active or not, most recently created first.
  async fn items(&self, owner: &str, list_id: &str) -> Result<Vec<VocabItem>, StoreError>;
  /// False when no owned item matched.
  async fn set_item_active(&self, owner: &str, list_id: &str, item_id: &str, active: bool) -> Result<bool, StoreError>;
  async fn delete_items(&self, owner: &str, list_id: &str, item_ids: &[String]) -> Result<(), StoreError>;

  async fn jlpt_level(&self, owner: &str) -> Result<Option<JlptLevel>, StoreError>;
  async fn set_jlpt_level(&self, owner: &str, level: JlptLevel) -> Result<(), StoreError>;

  async fn insert_session(&self, session: NewPracticeSession) -> Result<String, StoreError>;
  async fn get_session(&self, owner: &str, session_id: &str) -> Result<Option<PracticeSession>, StoreError>;

  async fn insert_problems(&self, problems: Vec<NewPracticeProblem>) -> Result<(), StoreError>;
  async fn get_problem(&self, owner: &str, problem_id: &str) -> Result<Option<PracticeProblem>, StoreError>;
  /// Problems of a session in creation order.
  async fn session_problems(&self, owner: &str, session_id: &str) -> Result<Vec<PracticeProblem>, StoreError>;

  async fn insert_attempt(&self, attempt: NewPracticeAttempt) -> Result<String, StoreError>;
  /// Attempts on `problem_ids`, newest first; equal timestamps keep the later insert first.
  async fn attempts_for(&self, owner: &str, problem_ids: &[String]) -> Result<Vec<PracticeAttempt>, StoreError>;
  async fn delete_attempts(&self, owner: &str, problem_ids: &[String]) -> Result<(), StoreError>;
}
