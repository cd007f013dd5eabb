//! In-process store. Enforces owner scoping, parent-row existence and
//! cascading deletes the way the relational schema does.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{ItemRef, Store};
use crate::domain::{
  JlptLevel, NewPracticeAttempt, NewPracticeProblem, NewPracticeSession, NewVocabItem, NewVocabList,
  PracticeAttempt, PracticeProblem, PracticeSession, VocabItem, VocabList,
};
use crate::error::StoreError;

#[derive(Clone, Debug, Default)]
pub struct Tables {
  pub lists: Vec<VocabList>,
  pub items: Vec<VocabItem>,
  pub sessions: Vec<PracticeSession>,
  pub problems: Vec<PracticeProblem>,
  pub attempts: Vec<PracticeAttempt>,
  pub settings: HashMap<String, JlptLevel>,
}

#[derive(Default)]
pub struct MemoryStore {
  tables: RwLock<Tables>,
}

fn new_id() -> String {
  Uuid::new_v4().to_string()
}

fn fk_violation(table: &str, parent: &str) -> StoreError {
  StoreError::Rejected(format!("insert into {table} violates foreign key: {parent} not found"))
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  /// Copy of every table, for inspection.
  #[cfg(test)]
  pub async fn snapshot(&self) -> Tables {
    self.tables.read().await.clone()
  }
}

impl Tables {
  fn owns_list(&self, owner: &str, list_id: &str) -> bool {
    self.lists.iter().any(|l| l.id == list_id && l.user_id == owner)
  }

  fn push_item(&mut self, item: NewVocabItem) -> Result<String, StoreError> {
    if !self.owns_list(&item.user_id, &item.list_id) {
      return Err(fk_violation("vocab_items", "list"));
    }
    let id = new_id();
    self.items.push(VocabItem {
      id: id.clone(),
      user_id: item.user_id,
      list_id: item.list_id,
      ja_surface: item.ja_surface,
      ja_reading_hira: item.ja_reading_hira,
      ko_meaning: item.ko_meaning,
      memo: item.memo,
      is_active: item.is_active,
      created_at: Utc::now(),
    });
    Ok(id)
  }

  fn cascade_delete_lists(&mut self, owner: &str, list_ids: &HashSet<&str>) {
    let doomed: HashSet<String> = self
      .lists
      .iter()
      .filter(|l| l.user_id == owner && list_ids.contains(l.id.as_str()))
      .map(|l| l.id.clone())
      .collect();
    if doomed.is_empty() {
      return;
    }
    let sessions: HashSet<String> = self
      .sessions
      .iter()
      .filter(|s| doomed.contains(&s.list_id))
      .map(|s| s.id.clone())
      .collect();
    let problems: HashSet<String> = self
      .problems
      .iter()
      .filter(|p| sessions.contains(&p.session_id))
      .map(|p| p.id.clone())
      .collect();

    self.attempts.retain(|a| !problems.contains(&a.problem_id));
    self.problems.retain(|p| !sessions.contains(&p.session_id));
    self.sessions.retain(|s| !doomed.contains(&s.list_id));
    self.items.retain(|i| !doomed.contains(&i.list_id));
    self.lists.retain(|l| !doomed.contains(&l.id));
  }
}

#[async_trait]
impl Store for MemoryStore {
  async fn insert_list(&self, list: NewVocabList) -> Result<String, StoreError> {
    let id = new_id();
    self.tables.write().await.lists.push(VocabList {
      id: id.clone(),
      user_id: list.user_id,
      name: list.name,
      kind: list.kind,
      scenario_prompt: list.scenario_prompt,
      created_at: Utc::now(),
    });
    Ok(id)
  }

  async fn get_list(&self, owner: &str, list_id: &str) -> Result<Option<VocabList>, StoreError> {
    let t = self.tables.read().await;
    Ok(t.lists.iter().find(|l| l.id == list_id && l.user_id == owner).cloned())
  }

  async fn delete_lists(&self, owner: &str, list_ids: &[String]) -> Result<(), StoreError> {
    let ids: HashSet<&str> = list_ids.iter().map(String::as_str).collect();
    self.tables.write().await.cascade_delete_lists(owner, &ids);
    Ok(())
  }

  async fn lists(&self, owner: &str) -> Result<Vec<VocabList>, StoreError> {
    let t = self.tables.read().await;
    let mut lists: Vec<VocabList> = t.lists.iter().rev().filter(|l| l.user_id == owner).cloned().collect();
    lists.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(lists)
  }

  async fn insert_item(&self, item: NewVocabItem) -> Result<String, StoreError> {
    self.tables.write().await.push_item(item)
  }

  async fn insert_items(&self, items: Vec<NewVocabItem>) -> Result<(), StoreError> {
    let mut t = self.tables.write().await;
    // all-or-nothing, like a single multi-row INSERT
    if items.iter().any(|i| !t.owns_list(&i.user_id, &i.list_id)) {
      return Err(fk_violation("vocab_items", "list"));
    }
    for item in items {
      t.push_item(item)?;
    }
    Ok(())
  }

  async fn count_items(&self, owner: &str, list_id: &str, active_only: bool) -> Result<usize, StoreError> {
    let t = self.tables.read().await;
    Ok(
      t.items
        .iter()
        .filter(|i| i.user_id == owner && i.list_id == list_id && (!active_only || i.is_active))
        .count(),
    )
  }

  async fn items_by_surface(&self, owner: &str, list_id: &str, surfaces: &[String]) -> Result<Vec<ItemRef>, StoreError> {
    let wanted: HashSet<&str> = surfaces.iter().map(String::as_str).collect();
    let t = self.tables.read().await;
    Ok(
      t.items
        .iter()
        .filter(|i| i.user_id == owner && i.list_id == list_id && wanted.contains(i.ja_surface.as_str()))
        .map(|i| ItemRef { id: i.id.clone(), ja_surface: i.ja_surface.clone() })
        .collect(),
    )
  }

  async fn active_items(&self, owner: &str, list_id: &str, limit: usize) -> Result<Vec<VocabItem>, StoreError> {
    let t = self.tables.read().await;
    // newest insert first; stable sort keeps that order for equal timestamps
    let mut items: Vec<VocabItem> = t
      .items
      .iter()
      .rev()
      .filter(|i| i.user_id == owner && i.list_id == list_id && i.is_active)
      .cloned()
      .collect();
    items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    items.truncate(limit);
    Ok(items)
  }

  async fn items(&self, owner: &str, list_id: &str) -> Result<Vec<VocabItem>, StoreError> {
    let t = self.tables.read().await;
    let mut items: Vec<VocabItem> = t
      .items
      .iter()
      .rev()
      .filter(|i| i.user_id == owner && i.list_id == list_id)
      .cloned()
      .collect();
    items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(items)
  }

  async fn set_item_active(&self, owner: &str, list_id: &str, item_id: &str, active: bool) -> Result<bool, StoreError> {
    let mut t = self.tables.write().await;
    match t
      .items
      .iter_mut()
      .find(|i| i.id == item_id && i.list_id == list_id && i.user_id == owner)
    {
      Some(item) => {
        item.is_active = active;
        Ok(true)
      }
      None => Ok(false),
    }
  }

  async fn delete_items(&self, owner: &str, list_id: &str, item_ids: &[String]) -> Result<(), StoreError> {
    let ids: HashSet<&str> = item_ids.iter().map(String::as_str).collect();
    self
      .tables
      .write()
      .await
      .items
      .retain(|i| !(i.user_id == owner && i.list_id == list_id && ids.contains(i.id.as_str())));
    Ok(())
  }

  async fn jlpt_level(&self, owner: &str) -> Result<Option<JlptLevel>, StoreError> {
    Ok(self.tables.read().await.settings.get(owner).copied())
  }

  async fn set_jlpt_level(&self, owner: &str, level: JlptLevel) -> Result<(), StoreError> {
    self.tables.write().await.settings.insert(owner.to_string(), level);
    Ok(())
  }

  async fn insert_session(&self, session: NewPracticeSession) -> Result<String, StoreError> {
    let mut t = self.tables.write().await;
    if !t.owns_list(&session.user_id, &session.list_id) {
      return Err(fk_violation("practice_sessions", "list"));
    }
    let id = new_id();
    t.sessions.push(PracticeSession {
      id: id.clone(),
      user_id: session.user_id,
      list_id: session.list_id,
      problem_count: Some(session.problem_count),
      jlpt_level: Some(session.jlpt_level.as_str().to_string()),
      scenario_prompt: session.scenario_prompt,
      created_at: Utc::now(),
    });
    Ok(id)
  }

  async fn get_session(&self, owner: &str, session_id: &str) -> Result<Option<PracticeSession>, StoreError> {
    let t = self.tables.read().await;
    Ok(t.sessions.iter().find(|s| s.id == session_id && s.user_id == owner).cloned())
  }

  async fn insert_problems(&self, problems: Vec<NewPracticeProblem>) -> Result<(), StoreError> {
    let mut t = self.tables.write().await;
    let orphan = problems
      .iter()
      .any(|p| !t.sessions.iter().any(|s| s.id == p.session_id && s.user_id == p.user_id));
    if orphan {
      return Err(fk_violation("practice_problems", "session"));
    }
    let now = Utc::now();
    for p in problems {
      t.problems.push(PracticeProblem {
        id: new_id(),
        user_id: p.user_id,
        session_id: p.session_id,
        prompt_ko: p.prompt_ko,
        target_item_ids: p.target_item_ids,
        model_answer_ja: p.model_answer_ja,
        alt_answer_ja: p.alt_answer_ja,
        created_at: now,
      });
    }
    Ok(())
  }

  async fn get_problem(&self, owner: &str, problem_id: &str) -> Result<Option<PracticeProblem>, StoreError> {
    let t = self.tables.read().await;
    Ok(t.problems.iter().find(|p| p.id == problem_id && p.user_id == owner).cloned())
  }

  async fn session_problems(&self, owner: &str, session_id: &str) -> Result<Vec<PracticeProblem>, StoreError> {
    let t = self.tables.read().await;
    let mut problems: Vec<PracticeProblem> = t
      .problems
      .iter()
      .filter(|p| p.session_id == session_id && p.user_id == owner)
      .cloned()
      .collect();
    problems.sort_by(|a, b| a.created_at.cmp(&b.created_at));
    Ok(problems)
  }

  async fn insert_attempt(&self, attempt: NewPracticeAttempt) -> Result<String, StoreError> {
    let mut t = self.tables.write().await;
    if !t.problems.iter().any(|p| p.id == attempt.problem_id && p.user_id == attempt.user_id) {
      return Err(fk_violation("practice_attempts", "problem"));
    }
    let id = new_id();
    t.attempts.push(PracticeAttempt {
      id: id.clone(),
      user_id: attempt.user_id,
      problem_id: attempt.problem_id,
      user_answer_ja: attempt.user_answer_ja,
      verdict: attempt.verdict,
      feedback: attempt.feedback,
      created_at: Utc::now(),
    });
    Ok(id)
  }

  async fn attempts_for(&self, owner: &str, problem_ids: &[String]) -> Result<Vec<PracticeAttempt>, StoreError> {
    let ids: HashSet<&str> = problem_ids.iter().map(String::as_str).collect();
    let t = self.tables.read().await;
    let mut attempts: Vec<PracticeAttempt> = t
      .attempts
      .iter()
      .rev()
      .filter(|a| a.user_id == owner && ids.contains(a.problem_id.as_str()))
      .cloned()
      .collect();
    attempts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(attempts)
  }

  async fn delete_attempts(&self, owner: &str, problem_ids: &[String]) -> Result<(), StoreError> {
    let ids: HashSet<&str> = problem_ids.iter().map(String::as_str).collect();
    self
      .tables
      .write()
      .await
      .attempts
      .retain(|a| !(a.user_id == owner && ids.contains(a.problem_id.as_str())));
    Ok(())
  }
}
